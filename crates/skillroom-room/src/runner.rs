//! Code execution backends for the code tool.
//!
//! [`MockRunner`] waits a fixed delay, then evaluates a small JavaScript
//! subset: `console.log(...)`, `let`/`const`/`var` bindings, `+` over
//! literals and bindings, and `throw new Error(...)`. Other languages get a
//! placeholder transcript.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use skillroom_core::code::Language;

use crate::error::RunError;

#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Run `code`, returning printed output or the raised error.
    async fn run(&self, code: &str, language: &Language) -> Result<String, RunError>;
}

pub struct MockRunner {
    delay: Duration,
}

impl MockRunner {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl CodeRunner for MockRunner {
    async fn run(&self, code: &str, language: &Language) -> Result<String, RunError> {
        tokio::time::sleep(self.delay).await;
        match language {
            Language::JavaScript => evaluate(code),
            other => Ok(format!(
                "[Mock output] Running {} code...\nHello, world!",
                other.tag()
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Undefined,
}

impl Value {
    fn to_number(&self) -> f64 {
        match self {
            Self::Num(n) => *n,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Null => 0.0,
            Self::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
            Self::Undefined => f64::NAN,
        }
    }

    fn plus(self, rhs: Value) -> Value {
        match (&self, &rhs) {
            (Self::Str(_), _) | (_, Self::Str(_)) => Self::Str(format!("{self}{rhs}")),
            _ => Self::Num(self.to_number() + rhs.to_number()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Num(n) => f.write_str(&format_number(*n)),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Null => f.write_str("null"),
            Self::Undefined => f.write_str("undefined"),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

type Scope = HashMap<String, Value>;

/// Deepest parenthesised nesting the evaluator follows.
const MAX_DEPTH: usize = 256;

fn syntax_error(token: &str) -> RunError {
    RunError::Thrown(format!("SyntaxError: Unexpected token '{token}'"))
}

/// Evaluate a JavaScript snippet, collecting `console.log` output.
fn evaluate(source: &str) -> Result<String, RunError> {
    let source = strip_comments(source);
    let mut scope = Scope::new();
    let mut output = String::new();
    for statement in split_top_level(&source, &[';', '\n']) {
        let statement = statement.trim();
        if !statement.is_empty() {
            execute(statement, &mut scope, &mut output)?;
        }
    }
    Ok(output)
}

fn execute(statement: &str, scope: &mut Scope, output: &mut String) -> Result<(), RunError> {
    for keyword in ["let ", "const ", "var "] {
        if let Some(binding) = statement.strip_prefix(keyword) {
            let (name, value) = match binding.split_once('=') {
                Some((name, expr)) => (name.trim(), eval_expr(expr, scope, 0)?),
                None => (binding.trim(), Value::Undefined),
            };
            if !is_identifier(name) {
                return Err(syntax_error(name));
            }
            let _ = scope.insert(name.to_string(), value);
            return Ok(());
        }
    }

    if let Some(thrown) = statement.strip_prefix("throw ") {
        let thrown = thrown.trim();
        let message = match call_args(thrown, "new Error") {
            Some(args) if args.trim().is_empty() => String::new(),
            Some(args) => eval_expr(args, scope, 0)?.to_string(),
            None => eval_expr(thrown, scope, 0)?.to_string(),
        };
        return Err(RunError::Thrown(message));
    }

    if let Some(args) = call_args(statement, "console.log") {
        let values = split_top_level(args, &[','])
            .into_iter()
            .filter(|arg| !arg.trim().is_empty())
            .map(|arg| eval_expr(arg, scope, 0).map(|v| v.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        output.push_str(&values.join(" "));
        output.push('\n');
        return Ok(());
    }

    let _ = eval_expr(statement, scope, 0)?;
    Ok(())
}

/// Arguments of `callee(...)` when `text` is exactly such a call.
fn call_args<'a>(text: &'a str, callee: &str) -> Option<&'a str> {
    text.strip_prefix(callee)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn eval_expr(expr: &str, scope: &Scope, depth: usize) -> Result<Value, RunError> {
    if depth > MAX_DEPTH {
        return Err(RunError::Thrown(
            "RangeError: Maximum call stack size exceeded".to_string(),
        ));
    }
    let mut terms = split_top_level(expr, &['+']).into_iter();
    let first = terms.next().unwrap_or_default();
    let mut value = eval_term(first, scope, depth)?;
    for term in terms {
        value = value.plus(eval_term(term, scope, depth)?);
    }
    Ok(value)
}

fn eval_term(term: &str, scope: &Scope, depth: usize) -> Result<Value, RunError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(syntax_error("+"));
    }
    if let Some(inner) = term.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        return eval_expr(inner, scope, depth + 1);
    }
    if let Some(literal) = string_literal(term) {
        return Ok(Value::Str(unescape(literal)));
    }
    match term {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        "undefined" => return Ok(Value::Undefined),
        _ => {}
    }
    let numeric = term
        .trim_start_matches('-')
        .starts_with(|c: char| c.is_ascii_digit() || c == '.');
    if numeric {
        return term
            .parse::<f64>()
            .map(Value::Num)
            .map_err(|_| syntax_error(term));
    }
    if is_identifier(term) {
        return scope
            .get(term)
            .cloned()
            .ok_or_else(|| RunError::Thrown(format!("ReferenceError: {term} is not defined")));
    }
    Err(syntax_error(term))
}

fn string_literal(term: &str) -> Option<&str> {
    let quote = term.chars().next().filter(|c| matches!(c, '\'' | '"' | '`'))?;
    if term.len() < 2 || !term.ends_with(quote) {
        return None;
    }
    let inner = &term[1..term.len() - 1];
    // `'a' 'b'` ends with a quote but is two literals.
    (!has_unescaped(inner, quote) && !inner.ends_with('\\')).then_some(inner)
}

fn has_unescaped(text: &str, quote: char) -> bool {
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return true;
        }
    }
    false
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Split on `separators` outside quotes and brackets.
fn split_top_level<'a>(source: &'a str, separators: &[char]) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in source.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ if depth == 0 && separators.contains(&c) => {
                parts.push(&source[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&source[start..]);
    parts
}

/// Drop `//` and `/* */` comments outside string literals.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                let _ = chars.next();
                let mut prev = ' ';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
            }
            ('\'' | '"' | '`', _) => {
                quote = Some(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
