//! Parser - turns a token stream into an Environment and a Workflow AST
//!
//! Statements are read in source order. Assignments bind variables as they
//! are met, so the workflow statement can only reference names assigned
//! before it:
//!
//! ```text
//! statement := assignment | workflow
//! assignment:= Name '=' ( String | provider ':' model )
//! workflow  := InputName ( '->' stage | loop )+
//! stage     := call | '{' call (',' call)* '}'
//! loop      := '[' ( '->' stage | loop )+ ']' '*' Count
//! call      := ModelName ('_' PromptName)? ('(' InputName ')')?
//! ```
//!
//! Commas, spaces and newlines separate statements interchangeably.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ParserConfig;
use crate::error::ZflowError;
use crate::lexer::{self, Token, TokenKind};
use crate::types::{Environment, ModelId, Node, OperatorCall, Span, VarKind, VarValue, Variable, Workflow};


/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("'{name}' is not a valid variable name: use one uppercase letter for models, or a name starting with 'p' (prompt) or 'i' (input)")]
    UnknownVariableKind { name: String, span: Span },

    #[error("'{name}' must be a {expected} variable")]
    VariableKindMismatch {
        name: String,
        expected: VarKind,
        span: Span,
    },

    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String, span: Span },

    #[error("script has no workflow expression")]
    EmptyWorkflow,

    #[error("'{name}' is re-assigned a value that is not a {expected}")]
    DuplicateKindMismatch {
        name: String,
        expected: VarKind,
        span: Span,
    },

    #[error("syntax error at line {}, col {}: {}", .span.line + 1, .span.col + 1, .message)]
    SyntaxError { message: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::UnknownVariableKind { span, .. }
            | ParseError::VariableKindMismatch { span, .. }
            | ParseError::UndefinedVariable { span, .. }
            | ParseError::DuplicateKindMismatch { span, .. }
            | ParseError::SyntaxError { span, .. } => Some(*span),
            ParseError::EmptyWorkflow => None,
        }
    }

    fn syntax(message: impl Into<String>, span: Span) -> Self {
        ParseError::SyntaxError {
            message: message.into(),
            span,
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/* ===================== Script ===================== */

/// A parsed script: immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub env: Environment,
    pub workflow: Workflow,
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.env, self.workflow)
    }
}

/* ===================== Public API ===================== */

/// Parse a token stream with default limits
pub fn parse(tokens: &[Token]) -> ParseResult<Script> {
    parse_with(tokens, &ParserConfig::default())
}

/// Parse a token stream
pub fn parse_with(tokens: &[Token], config: &ParserConfig) -> ParseResult<Script> {
    let mut parser = Parser::new(tokens, config);
    parser.parse_script()
}

/// Tokenize and parse a script
pub fn parse_script(source: &str, config: &ParserConfig) -> Result<Script, ZflowError> {
    let tokens = lexer::tokenize(source)?;
    let script = parse_with(&tokens, config)?;
    debug!(
        variables = script.env.len(),
        stages = script.workflow.stage_count(),
        "parsed zflow script"
    );
    Ok(script)
}

/* ===================== Parser ===================== */

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    config: &'a ParserConfig,
    env: Environment,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], config: &'a ParserConfig) -> Self {
        Self {
            tokens,
            pos: 0,
            config,
            env: Environment::new(),
        }
    }

    fn parse_script(&mut self) -> ParseResult<Script> {
        let mut workflow: Option<Workflow> = None;

        loop {
            self.skip_statement_separators();
            let Some(token) = self.peek() else { break };

            if token.is(TokenKind::Identifier) && self.peek_kind_at(1) == Some(TokenKind::Equals) {
                self.parse_assignment()?;
                continue;
            }

            if workflow.is_some() {
                return Err(ParseError::syntax(
                    "multiple workflow definitions; only one is allowed",
                    token.span,
                ));
            }
            workflow = Some(self.parse_workflow()?);

            let at_boundary = match self.peek_kind() {
                None | Some(TokenKind::StatementSeparator | TokenKind::Comma) => true,
                Some(TokenKind::Identifier) => self.peek_kind_at(1) == Some(TokenKind::Equals),
                Some(_) => false,
            };
            if !at_boundary {
                return Err(self.unexpected("'->' or the end of the workflow statement"));
            }
        }

        let workflow = workflow.ok_or(ParseError::EmptyWorkflow)?;
        Ok(Script {
            env: std::mem::take(&mut self.env),
            workflow,
        })
    }

    /* ---------- Assignments ---------- */

    fn parse_assignment(&mut self) -> ParseResult<()> {
        let name_token = self.advance_expect(TokenKind::Identifier)?;
        self.advance_expect(TokenKind::Equals)?;

        let name = name_token.text.clone();
        let kind = VarKind::classify(&name).ok_or_else(|| ParseError::UnknownVariableKind {
            name: name.clone(),
            span: name_token.span,
        })?;

        let value_token = self.peek().ok_or_else(|| {
            ParseError::syntax(format!("expected a value after '{} ='", name), name_token.span)
        })?;
        let span = name_token.span.merge(&value_token.span);

        let value = match (kind, value_token.kind) {
            (VarKind::Prompt, TokenKind::StringLiteral) => {
                let text = self.advance().text.clone();
                VarValue::Prompt(text)
            }
            (VarKind::Input, TokenKind::StringLiteral) => {
                let text = self.advance().text.clone();
                VarValue::Input(text)
            }
            (VarKind::Model, TokenKind::Identifier) => VarValue::Model(self.parse_model_id()?),
            (_, TokenKind::StringLiteral | TokenKind::Identifier) => {
                return Err(self.shape_mismatch(name, kind, span));
            }
            (_, other) => {
                return Err(ParseError::syntax(
                    format!("expected a value after '{} =', found {}", name, other.describe()),
                    value_token.span,
                ));
            }
        };

        self.env.define(Variable { name, value, span });
        Ok(())
    }

    /// First assignment with the wrong shape is a kind mismatch; re-assigning
    /// an existing name with the wrong shape is reported as a duplicate.
    fn shape_mismatch(&self, name: String, expected: VarKind, span: Span) -> ParseError {
        if self.env.contains(&name) {
            ParseError::DuplicateKindMismatch {
                name,
                expected,
                span,
            }
        } else {
            ParseError::VariableKindMismatch {
                name,
                expected,
                span,
            }
        }
    }

    /// `provider:model`, where the model part may span several touching
    /// tokens (`llama3:8b`, `gpt_4o`).
    fn parse_model_id(&mut self) -> ParseResult<ModelId> {
        let first = self.advance();
        let mut span = first.span;
        let mut text = first.text.clone();
        let mut last = first;

        while let Some(next) = self.peek() {
            let joinable = matches!(
                next.kind,
                TokenKind::Identifier | TokenKind::Colon | TokenKind::Underscore
            );
            if !joinable || !last.touches(next) {
                break;
            }
            text.push_str(&next.text);
            span = span.merge(&next.span);
            last = self.advance();
        }

        ModelId::parse(&text).ok_or_else(|| {
            ParseError::syntax(
                format!("expected a model id of the form provider:modelName, found '{}'", text),
                span,
            )
        })
    }

    /* ---------- Workflow ---------- */

    fn parse_workflow(&mut self) -> ParseResult<Workflow> {
        let head = self.advance();
        let start_span = head.span;

        let is_input = head.is(TokenKind::Identifier) && VarKind::classify(&head.text) == Some(VarKind::Input);
        if !is_input {
            return Err(ParseError::syntax(
                format!("workflow must start with an input variable (e.g. i, i1), found '{}'", head.text),
                head.span,
            ));
        }
        let start_input = head.text.clone();
        self.resolve(&start_input, VarKind::Input, head.span)?;

        let mut stages = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Arrow) => {
                    self.advance();
                    self.skip_newlines();
                    stages.push(self.parse_stage()?);
                }
                Some(TokenKind::LBracket) => stages.extend(self.parse_loop(1)?),
                _ => break,
            }
            self.check_stage_count(stages.len())?;
        }

        let span = match self.tokens.get(self.pos.saturating_sub(1)) {
            Some(last) => start_span.merge(&last.span),
            None => start_span,
        };
        let root = Node::chain(stages).ok_or(ParseError::EmptyWorkflow)?;

        Ok(Workflow {
            start_input,
            root,
            span,
        })
    }

    fn parse_stage(&mut self) -> ParseResult<Node> {
        match self.peek_kind() {
            Some(TokenKind::LBrace) => self.parse_parallel(),
            Some(TokenKind::Identifier) => Ok(Node::OperatorCall(self.parse_call()?)),
            _ => Err(self.unexpected("an operator call or '{'")),
        }
    }

    fn parse_parallel(&mut self) -> ParseResult<Node> {
        let open = self.advance_expect(TokenKind::LBrace)?;
        let mut branches = Vec::new();

        loop {
            self.skip_newlines();
            if branches.is_empty() && self.peek_kind() == Some(TokenKind::RBrace) {
                return Err(ParseError::syntax("parallel block '{}' cannot be empty", open.span));
            }
            branches.push(self.parse_call()?);
            self.skip_newlines();
            match self.peek_kind() {
                Some(TokenKind::Comma) => {
                    self.advance();
                }
                Some(TokenKind::RBrace) => {
                    self.advance();
                    break;
                }
                _ => return Err(self.unexpected("',' or '}'")),
            }
        }

        Ok(Node::Parallel { branches })
    }

    fn parse_call(&mut self) -> ParseResult<OperatorCall> {
        let model = self.advance_expect(TokenKind::Identifier)?;
        self.resolve(&model.text, VarKind::Model, model.span)?;
        let mut call = OperatorCall::new(model.text.clone());
        let mut span = model.span;

        if self.peek_kind() == Some(TokenKind::Underscore) {
            self.advance();
            let prompt = self.advance_expect(TokenKind::Identifier)?;
            self.resolve(&prompt.text, VarKind::Prompt, prompt.span)?;
            call.prompt = Some(prompt.text.clone());
            span = span.merge(&prompt.span);
        }

        if self.peek_kind() == Some(TokenKind::LParen) {
            self.advance();
            let input = self.advance_expect(TokenKind::Identifier)?;
            self.resolve(&input.text, VarKind::Input, input.span)?;
            let close = self.advance_expect(TokenKind::RParen)?;
            call.extra_input = Some(input.text.clone());
            span = span.merge(&close.span);
        }

        call.span = span;
        Ok(call)
    }

    /// `[-> stage ...]*N`, expanded inline. `depth` is 1 for an outermost loop.
    fn parse_loop(&mut self, depth: usize) -> ParseResult<Vec<Node>> {
        let open = self.advance_expect(TokenKind::LBracket)?;
        if depth > self.config.max_loop_depth {
            return Err(ParseError::syntax(
                format!("loops nest deeper than the limit of {}", self.config.max_loop_depth),
                open.span,
            ));
        }
        let mut body = Vec::new();

        loop {
            self.skip_newlines();
            match self.peek_kind() {
                Some(TokenKind::Arrow) => {
                    self.advance();
                    self.skip_newlines();
                    body.push(self.parse_stage()?);
                }
                Some(TokenKind::LBracket) => body.extend(self.parse_loop(depth + 1)?),
                Some(TokenKind::RBracket) => {
                    self.advance();
                    break;
                }
                _ => return Err(self.unexpected("'->' or ']'")),
            }
            self.check_stage_count(body.len())?;
        }

        if body.is_empty() {
            return Err(ParseError::syntax(
                "loop body must contain at least one '-> stage'",
                open.span,
            ));
        }

        self.advance_expect(TokenKind::Star)?;
        let count_token = self.advance_expect(TokenKind::Identifier)?;
        let count = match count_token.text.parse::<usize>() {
            Ok(count) if count > 0 => count,
            _ => {
                return Err(ParseError::syntax(
                    format!("loop repetition count must be a positive integer, found '{}'", count_token.text),
                    count_token.span,
                ))
            }
        };
        if count > self.config.max_loop_repetitions {
            return Err(ParseError::syntax(
                format!(
                    "loop repetition count {} exceeds the limit of {}",
                    count, self.config.max_loop_repetitions
                ),
                count_token.span,
            ));
        }

        self.check_stage_count(body.len().saturating_mul(count))?;

        let mut expanded = Vec::with_capacity(body.len() * count);
        for _ in 0..count {
            expanded.extend(body.iter().cloned());
        }
        Ok(expanded)
    }

    /// Fail once the expanded workflow would exceed `max_stages`
    fn check_stage_count(&self, count: usize) -> ParseResult<()> {
        if count <= self.config.max_stages {
            return Ok(());
        }
        let span = self
            .tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| t.span)
            .unwrap_or_default();
        Err(ParseError::syntax(
            format!("workflow expands to more than {} stages", self.config.max_stages),
            span,
        ))
    }

    /// Check that `name` is bound, and bound to the expected kind
    fn resolve(&self, name: &str, expected: VarKind, span: Span) -> ParseResult<()> {
        match self.env.get(name) {
            None => Err(ParseError::UndefinedVariable {
                name: name.to_string(),
                span,
            }),
            Some(var) if var.kind() != expected => Err(ParseError::VariableKindMismatch {
                name: name.to_string(),
                expected,
                span,
            }),
            Some(_) => Ok(()),
        }
    }

    /* ---------- Token helpers ---------- */

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek_kind_at(&self, offset: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| t.kind)
    }

    /// Consume the current token. Callers check `peek` first.
    fn advance(&mut self) -> &'a Token {
        let token = &self.tokens[self.pos];
        self.pos += 1;
        token
    }

    fn advance_expect(&mut self, kind: TokenKind) -> ParseResult<&'a Token> {
        match self.peek() {
            Some(token) if token.is(kind) => Ok(self.advance()),
            _ => Err(self.unexpected(kind.describe())),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::syntax(
                format!("expected {}, found {} '{}'", expected, token.kind.describe(), token.text.escape_default()),
                token.span,
            ),
            None => {
                let span = self.tokens.last().map(|t| Span { start: t.span.end, ..t.span }).unwrap_or_default();
                ParseError::syntax(format!("expected {}, found end of script", expected), span)
            }
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek_kind() == Some(TokenKind::StatementSeparator) {
            self.pos += 1;
        }
    }

    fn skip_statement_separators(&mut self) {
        while matches!(
            self.peek_kind(),
            Some(TokenKind::StatementSeparator | TokenKind::Comma)
        ) {
            self.pos += 1;
        }
    }
}
