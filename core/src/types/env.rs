//! Variable environment
//!
//! A script binds three kinds of values. The kind is never declared: it is
//! read off the variable name by [`VarKind::classify`], the single place the
//! naming convention lives.
//!
//! | name shape                    | kind   | value                  |
//! |-------------------------------|--------|------------------------|
//! | one uppercase letter (`A`)    | Model  | `provider:modelName`   |
//! | starts with `p` (`p1`, `p`)   | Prompt | quoted string literal  |
//! | starts with `i` (`i`, `i2`)   | Input  | quoted string literal  |

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ast::Span;

/// Variable kind, derived from the variable name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    Model,
    Prompt,
    Input,
}

impl VarKind {
    /// Infer the kind of a variable from the shape of its name.
    ///
    /// Returns `None` for names that fit none of the conventions.
    pub fn classify(name: &str) -> Option<VarKind> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_uppercase() => Some(VarKind::Model),
            (Some('p'), _) => Some(VarKind::Prompt),
            (Some('i'), _) => Some(VarKind::Input),
            _ => None,
        }
    }
}

impl fmt::Display for VarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VarKind::Model => "model",
            VarKind::Prompt => "prompt",
            VarKind::Input => "input",
        };
        f.write_str(name)
    }
}

/// Provider-qualified model identifier (`provider:modelName`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId {
    pub provider: String,
    pub name: String,
}

impl ModelId {
    pub fn new(provider: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            name: name.into(),
        }
    }

    /// Split at the first colon. Both halves must be non-empty; the model
    /// name may contain further colons (`ollama:llama3:8b`).
    pub fn parse(text: &str) -> Option<ModelId> {
        let (provider, name) = text.split_once(':')?;
        if provider.is_empty() || name.is_empty() {
            return None;
        }
        Some(ModelId::new(provider, name))
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.name)
    }
}

/// Bound value, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum VarValue {
    Model(ModelId),
    Prompt(String),
    Input(String),
}

impl VarValue {
    pub fn kind(&self) -> VarKind {
        match self {
            VarValue::Model(_) => VarKind::Model,
            VarValue::Prompt(_) => VarKind::Prompt,
            VarValue::Input(_) => VarKind::Input,
        }
    }
}

/// A named binding produced by an assignment statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: VarValue,
    #[serde(default)]
    pub span: Span,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: VarValue) -> Self {
        Self {
            name: name.into(),
            value,
            span: Span::default(),
        }
    }

    pub fn kind(&self) -> VarKind {
        self.value.kind()
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            VarValue::Model(model) => write!(f, "{} = {}", self.name, model),
            VarValue::Prompt(text) | VarValue::Input(text) => {
                let escaped = text.replace('\\', "\\\\").replace('\'', "\\'");
                write!(f, "{} = '{}'", self.name, escaped)
            }
        }
    }
}

/// Symbol table built while parsing; read-only once parsing finishes.
///
/// Keeps first-assignment order for rendering. Re-assigning a name replaces
/// the value in place (last write wins).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<Variable>", from = "Vec<Variable>")]
pub struct Environment {
    vars: Vec<Variable>,
    index: HashMap<String, usize>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable, returning the previous binding of the same name
    pub fn define(&mut self, var: Variable) -> Option<Variable> {
        match self.index.get(&var.name) {
            Some(&slot) => Some(std::mem::replace(&mut self.vars[slot], var)),
            None => {
                self.index.insert(var.name.clone(), self.vars.len());
                self.vars.push(var);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.index.get(name).map(|&slot| &self.vars[slot])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Model id bound to `name`, if `name` is a Model variable
    pub fn model(&self, name: &str) -> Option<&ModelId> {
        match self.get(name).map(|var| &var.value) {
            Some(VarValue::Model(model)) => Some(model),
            _ => None,
        }
    }

    /// Text bound to `name`, if `name` is a Prompt variable
    pub fn prompt(&self, name: &str) -> Option<&str> {
        match self.get(name).map(|var| &var.value) {
            Some(VarValue::Prompt(text)) => Some(text),
            _ => None,
        }
    }

    /// Text bound to `name`, if `name` is an Input variable
    pub fn input(&self, name: &str) -> Option<&str> {
        match self.get(name).map(|var| &var.value) {
            Some(VarValue::Input(text)) => Some(text),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl From<Vec<Variable>> for Environment {
    fn from(vars: Vec<Variable>) -> Self {
        let mut env = Environment::new();
        for var in vars {
            env.define(var);
        }
        env
    }
}

impl From<Environment> for Vec<Variable> {
    fn from(env: Environment) -> Self {
        env.vars
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for var in &self.vars {
            writeln!(f, "{}", var)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_name_shape() {
        assert_eq!(VarKind::classify("A"), Some(VarKind::Model));
        assert_eq!(VarKind::classify("Z"), Some(VarKind::Model));
        assert_eq!(VarKind::classify("p1"), Some(VarKind::Prompt));
        assert_eq!(VarKind::classify("p"), Some(VarKind::Prompt));
        assert_eq!(VarKind::classify("i2"), Some(VarKind::Input));
        assert_eq!(VarKind::classify("input"), Some(VarKind::Input));
    }

    #[test]
    fn test_classify_rejects_other_shapes() {
        assert_eq!(VarKind::classify("xx"), None);
        assert_eq!(VarKind::classify("AB"), None);
        assert_eq!(VarKind::classify("a"), None);
        assert_eq!(VarKind::classify(""), None);
        assert_eq!(VarKind::classify("p-1"), None);
        assert_eq!(VarKind::classify("1i"), None);
    }

    #[test]
    fn test_model_id_splits_at_first_colon() {
        let model = ModelId::parse("ollama:llama3:8b").unwrap();
        assert_eq!(model.provider, "ollama");
        assert_eq!(model.name, "llama3:8b");
        assert_eq!(model.to_string(), "ollama:llama3:8b");

        assert!(ModelId::parse("nocolon").is_none());
        assert!(ModelId::parse(":m1").is_none());
        assert!(ModelId::parse("prov:").is_none());
    }

    #[test]
    fn test_redefine_keeps_position_and_overwrites() {
        let mut env = Environment::new();
        env.define(Variable::new("p1", VarValue::Prompt("first".into())));
        env.define(Variable::new("i", VarValue::Input("q".into())));
        let previous = env.define(Variable::new("p1", VarValue::Prompt("second".into())));

        assert_eq!(previous.map(|v| v.value), Some(VarValue::Prompt("first".into())));
        assert_eq!(env.len(), 2);
        assert_eq!(env.prompt("p1"), Some("second"));
        assert_eq!(env.iter().next().unwrap().name, "p1");
    }

    #[test]
    fn test_typed_lookups() {
        let mut env = Environment::new();
        env.define(Variable::new("A", VarValue::Model(ModelId::new("provX", "m1"))));
        env.define(Variable::new("i", VarValue::Input("hello".into())));

        assert_eq!(env.model("A"), Some(&ModelId::new("provX", "m1")));
        assert_eq!(env.input("i"), Some("hello"));
        assert_eq!(env.prompt("i"), None);
        assert_eq!(env.model("B"), None);
    }

    #[test]
    fn test_json_keeps_lookups_working() {
        let mut env = Environment::new();
        env.define(Variable::new("A", VarValue::Model(ModelId::new("provX", "m1"))));
        env.define(Variable::new("i", VarValue::Input("hello".into())));

        let json = serde_json::to_string(&env).unwrap();
        let restored: Environment = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, env);
        assert_eq!(restored.input("i"), Some("hello"));
    }

    #[test]
    fn test_display_renders_assignments() {
        let mut env = Environment::new();
        env.define(Variable::new("A", VarValue::Model(ModelId::new("provX", "m1"))));
        env.define(Variable::new("p1", VarValue::Prompt("it's short".into())));
        assert_eq!(env.to_string(), "A = provX:m1\np1 = 'it\\'s short'\n");
    }
}
