//! Router condition expressions.
//!
//! Conditions are a restricted expression language: boolean logic,
//! comparisons, numeric arithmetic, parentheses, literals, and `$...`
//! references. There are no calls, no attribute access, no subscripts — the
//! grammar simply cannot express them, so forbidden constructs fail at
//! compile time. Conditions are never handed to a host-language eval.
//!
//! Before parsing, every `$...` reference in the source is rewritten to a
//! synthetic local name (`ref_0`, `ref_1`, ...); at evaluation time those
//! names are bound to the non-strictly resolved values.

use std::collections::HashMap;

use serde_json::{Number, Value};

use super::reference::{Reference, ResolveOptions};
use crate::engine::WorkflowState;
use crate::error::{Error, Result};

/// A router condition, compiled once and evaluated per run.
#[derive(Debug, Clone)]
pub enum CompiledCondition {
    /// The literal condition `else`: always true.
    Else,
    /// A parsed expression plus the references it binds.
    Expr {
        source: String,
        ast: Expr,
        refs: Vec<(String, Reference)>,
    },
}

impl CompiledCondition {
    /// Compile a condition string. Any construct outside the restricted
    /// grammar is rejected here, before the workflow can execute.
    pub fn compile(source: &str) -> Result<CompiledCondition> {
        let trimmed = source.trim();
        if trimmed == "else" {
            return Ok(CompiledCondition::Else);
        }

        let (rewritten, refs) = extract_references(trimmed)?;
        let tokens = tokenize(&rewritten)
            .map_err(|e| Error::Compile(format!("Invalid condition '{source}': {e}")))?;
        let ast = Parser::new(tokens)
            .parse()
            .map_err(|e| Error::Compile(format!("Invalid condition '{source}': {e}")))?;

        Ok(CompiledCondition::Expr {
            source: source.to_string(),
            ast,
            refs,
        })
    }

    /// Evaluate against the workflow state. Missing references resolve to
    /// null; type errors surface as `Error::Condition` so the router can
    /// treat the case as false.
    pub fn evaluate(&self, state: &WorkflowState) -> Result<bool> {
        match self {
            CompiledCondition::Else => Ok(true),
            CompiledCondition::Expr { ast, refs, .. } => {
                let mut env: HashMap<String, Value> = HashMap::with_capacity(refs.len() + 2);
                for (name, reference) in refs {
                    env.insert(
                        name.clone(),
                        reference
                            .resolve(state, ResolveOptions::LENIENT)
                            .unwrap_or(Value::Null),
                    );
                }
                // Bare roots usable without a `$` prefix.
                env.insert("input".to_string(), state.input.clone());
                env.insert(
                    "nodes".to_string(),
                    serde_json::to_value(&state.data).unwrap_or(Value::Null),
                );

                Ok(truthy(&eval(ast, &env)?))
            }
        }
    }
}

/// Rewrite `$...` references to synthetic names. The recognized shapes match
/// what conditions may reference: `$input.*`, `$nodes.*.*`, `$state.*`.
fn extract_references(source: &str) -> Result<(String, Vec<(String, Reference)>)> {
    let mut rewritten = String::with_capacity(source.len());
    let mut refs: Vec<(String, Reference)> = Vec::new();
    let mut i = 0;

    while i < source.len() {
        let rest = &source[i..];
        let Some(c) = rest.chars().next() else {
            break;
        };
        if c != '$' {
            rewritten.push(c);
            i += c.len_utf8();
            continue;
        }

        match match_reference(rest) {
            Some(len) => {
                let token = &rest[..len];
                let reference = Reference::parse(token)
                    .map_err(|e| Error::Compile(format!("Invalid condition reference: {e}")))?;
                let name = format!("ref_{}", refs.len());
                rewritten.push_str(&name);
                refs.push((name, reference));
                i += len;
            }
            None => {
                // Not a recognized reference shape. Keep the character: a
                // stray `$` inside a string literal is legal, and one
                // outside is rejected by the lexer.
                rewritten.push('$');
                i += 1;
            }
        }
    }

    Ok((rewritten, refs))
}

/// Length of the reference token starting at `$`, or None if malformed.
/// `$input` needs at least one path segment here; bare roots are bound as
/// plain names instead.
fn match_reference(s: &str) -> Option<usize> {
    let seg = |t: &str| -> usize {
        t.chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .map(|c| c.len_utf8())
            .sum()
    };

    let (min_segments, root_len) = if s.starts_with("$input.") {
        (1, "$input".len())
    } else if s.starts_with("$nodes.") {
        (2, "$nodes".len())
    } else if s.starts_with("$state.") {
        (1, "$state".len())
    } else {
        return None;
    };

    let mut len = root_len;
    let mut segments = 0;
    while s[len..].starts_with('.') {
        let taken = seg(&s[len + 1..]);
        if taken == 0 {
            break;
        }
        len += 1 + taken;
        segments += 1;
    }

    if segments >= min_segments {
        Some(len)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(Number),
    Str(String),
    And,
    Or,
    Not,
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err("assignment is not allowed; use '=='".to_string());
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    return Err("unexpected '!'".to_string());
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::LtE);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::GtE);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = chars
                                .get(i + 1)
                                .ok_or_else(|| "unterminated escape".to_string())?;
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            '0'..='9' => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
                {
                    is_float = true;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let number = if is_float {
                    Number::from_f64(
                        text.parse::<f64>()
                            .map_err(|_| format!("invalid number: {text}"))?,
                    )
                    .ok_or_else(|| format!("invalid number: {text}"))?
                } else {
                    Number::from(
                        text.parse::<i64>()
                            .map_err(|_| format!("invalid number: {text}"))?,
                    )
                };
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    // Python-spelled literals are accepted alongside the
                    // JSON spellings; authors write both.
                    "true" | "True" => Token::Ident("__true".to_string()),
                    "false" | "False" => Token::Ident("__false".to_string()),
                    "null" | "None" => Token::Ident("__null".to_string()),
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Comparison operators, chainable Python-style (`1 < x < 10`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// The restricted expression AST.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> std::result::Result<Expr, String> {
        if self.tokens.is_empty() {
            return Err("empty condition".to_string());
        }
        let expr = self.or_expr()?;
        match self.peek() {
            None => Ok(expr),
            Some(t) => Err(format!("unexpected trailing token: {t:?}")),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.not_expr()?;
        while self.eat(&Token::And) {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> std::result::Result<Expr, String> {
        if self.eat(&Token::Not) {
            let operand = self.not_expr()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> std::result::Result<Expr, String> {
        let first = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CmpOp::Eq,
                Some(Token::NotEq) => CmpOp::NotEq,
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::LtE) => CmpOp::LtE,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::GtE) => CmpOp::GtE,
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn arith(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> std::result::Result<Expr, String> {
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.primary()
    }

    fn primary(&mut self) -> std::result::Result<Expr, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(name)) => {
                // Calls are the classic injection vector; reject an opening
                // paren directly after an identifier.
                if self.peek() == Some(&Token::LParen) {
                    return Err(format!("function calls are not allowed: {name}(...)"));
                }
                match name.as_str() {
                    "__true" => Ok(Expr::Literal(Value::Bool(true))),
                    "__false" => Ok(Expr::Literal(Value::Bool(false))),
                    "__null" => Ok(Expr::Literal(Value::Null)),
                    _ => Ok(Expr::Var(name)),
                }
            }
            Some(Token::LParen) => {
                let expr = self.or_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err("missing closing parenthesis".to_string());
                }
                Ok(expr)
            }
            Some(other) => Err(format!("unexpected token: {other:?}")),
            None => Err("unexpected end of condition".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// Python-flavored truthiness over JSON values.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn eval(expr: &Expr, env: &HashMap<String, Value>) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => Ok(env.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Not(operand) => Ok(Value::Bool(!truthy(&eval(operand, env)?))),
        Expr::Neg(operand) => {
            let v = eval(operand, env)?;
            let n = as_number(&v)?;
            Ok(number_value(-n))
        }
        Expr::And(left, right) => {
            if !truthy(&eval(left, env)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(right, env)?)))
        }
        Expr::Or(left, right) => {
            if truthy(&eval(left, env)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(right, env)?)))
        }
        Expr::Binary(op, left, right) => {
            let lv = eval(left, env)?;
            let rv = eval(right, env)?;
            apply_binary(*op, &lv, &rv)
        }
        Expr::Compare(first, rest) => {
            let mut left = eval(first, env)?;
            for (op, right_expr) in rest {
                let right = eval(right_expr, env)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
    }
}

fn as_number(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::Condition("non-finite number".to_string())),
        other => Err(Error::Condition(format!(
            "expected a number, got {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < (i64::MAX as f64) {
        Value::Number(Number::from(f as i64))
    } else {
        Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn apply_binary(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    // String concatenation is the one non-numeric arithmetic form.
    if op == BinOp::Add {
        if let (Value::String(a), Value::String(b)) = (left, right) {
            return Ok(Value::String(format!("{a}{b}")));
        }
    }

    let a = as_number(left)?;
    let b = as_number(right)?;
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(Error::Condition("division by zero".to_string()));
            }
            a / b
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(Error::Condition("modulo by zero".to_string()));
            }
            a.rem_euclid(b)
        }
    };
    Ok(number_value(result))
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    match op {
        CmpOp::Eq => return Ok(values_equal(left, right)),
        CmpOp::NotEq => return Ok(!values_equal(left, right)),
        _ => {}
    }

    let cmp = match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (
                a.as_f64()
                    .ok_or_else(|| Error::Condition("non-finite number".to_string()))?,
                b.as_f64()
                    .ok_or_else(|| Error::Condition("non-finite number".to_string()))?,
            );
            a.partial_cmp(&b)
                .ok_or_else(|| Error::Condition("incomparable numbers".to_string()))?
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (a, b) => {
            return Err(Error::Condition(format!(
                "cannot order {} and {}",
                type_name(a),
                type_name(b)
            )))
        }
    };

    Ok(match op {
        CmpOp::Lt => cmp.is_lt(),
        CmpOp::LtE => cmp.is_le(),
        CmpOp::Gt => cmp.is_gt(),
        CmpOp::GtE => cmp.is_ge(),
        CmpOp::Eq | CmpOp::NotEq => false,
    })
}

/// Equality with numeric coercion: `3 == 3.0` holds.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (a, b) => a == b,
    }
}
