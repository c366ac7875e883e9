//! Workflow AST node types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Source location span for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Span {
    /// Start byte offset
    pub start: usize,
    /// End byte offset
    pub end: usize,
    /// Line of the start offset (0-indexed)
    pub line: usize,
    /// Column of the start offset (0-indexed, in chars)
    pub col: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, col: usize) -> Self {
        Self {
            start,
            end,
            line,
            col,
        }
    }

    /// Create a span that covers both self and other
    pub fn merge(&self, other: &Span) -> Span {
        let (line, col) = if self.start <= other.start {
            (self.line, self.col)
        } else {
            (other.line, other.col)
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line,
            col,
        }
    }

    /// Build a span for `[start, end)` within `source`, computing line and column
    pub fn locate(source: &str, start: usize, end: usize) -> Span {
        let (line, col) = offset_to_line_col(source, start);
        Span::new(start, end, line, col)
    }
}

/// Convert byte offset to (line, column) - 0-indexed
pub(crate) fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 0;
    let mut col = 0;

    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }

    (line, col)
}

fn is_default_span(span: &Span) -> bool {
    *span == Span::default()
}

/* ===================== Nodes ===================== */

/// One model invocation: `Model(_Prompt)?(\(Input\))?`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorCall {
    /// Name of the Model variable
    pub model: String,
    /// Name of the Prompt variable used as system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Name of the Input variable supplied as side context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_input: Option<String>,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

impl OperatorCall {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: None,
            extra_input: None,
            span: Span::default(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_extra_input(mut self, input: impl Into<String>) -> Self {
        self.extra_input = Some(input.into());
        self
    }
}

impl fmt::Display for OperatorCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.model)?;
        if let Some(prompt) = &self.prompt {
            write!(f, "_{}", prompt)?;
        }
        if let Some(input) = &self.extra_input {
            write!(f, "({})", input)?;
        }
        Ok(())
    }
}

/// Workflow AST node
///
/// A Sequential node holds its stages in order (`a -> b -> c` is one node
/// with three stages) rather than nesting binary pairs, so the tree stays
/// shallow however long the chain gets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Node {
    OperatorCall(OperatorCall),
    Sequential { stages: Vec<Node> },
    Parallel { branches: Vec<OperatorCall> },
}

/// A top-level step of the sequential chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage<'a> {
    Call(&'a OperatorCall),
    Parallel(&'a [OperatorCall]),
}

impl Node {
    /// Chain `self -> right`
    pub fn then(self, right: Node) -> Node {
        let mut stages = self.into_sequence();
        stages.extend(right.into_sequence());
        Node::Sequential { stages }
    }

    /// Build a chain from stages, splicing in any nested Sequential nodes.
    /// A single stage is returned as is.
    pub fn chain(stages: Vec<Node>) -> Option<Node> {
        let mut flat = Vec::with_capacity(stages.len());
        for stage in stages {
            flat.extend(stage.into_sequence());
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Node::Sequential { stages: flat }),
        }
    }

    fn into_sequence(self) -> Vec<Node> {
        match self {
            Node::Sequential { stages } => stages,
            other => vec![other],
        }
    }

    /// Flatten into stages, left to right. Iterative, so hand-built or
    /// deserialized trees of any nesting are safe to walk.
    pub fn stages(&self) -> Vec<Stage<'_>> {
        let mut out = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match node {
                Node::OperatorCall(call) => out.push(Stage::Call(call)),
                Node::Parallel { branches } => out.push(Stage::Parallel(branches)),
                Node::Sequential { stages } => pending.extend(stages.iter().rev()),
            }
        }
        out
    }
}

impl fmt::Display for Stage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Call(call) => write!(f, "{}", call),
            Stage::Parallel(branches) => {
                write!(f, "{{")?;
                for (idx, branch) in branches.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", branch)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, stage) in self.stages().iter().enumerate() {
            if idx > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

/* ===================== Workflow ===================== */

/// A parsed pipeline: the leading input variable and the stage chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    /// Input variable whose text seeds the first stage
    pub start_input: String,
    pub root: Node,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

impl Workflow {
    pub fn stages(&self) -> Vec<Stage<'_>> {
        self.root.stages()
    }

    pub fn stage_count(&self) -> usize {
        self.stages().len()
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.start_input, self.root)
    }
}
