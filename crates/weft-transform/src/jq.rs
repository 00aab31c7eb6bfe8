//! A small `jq` dialect: paths, iteration, pipes, comma, comparisons and a
//! handful of built-ins (`keys`, `values`, `length`, `select`, `map`, ...).
//!
//! Programs evaluate to a stream of values. `jq_query` collapses the stream
//! into the single value when there is exactly one, or an array otherwise.

use serde_json::Value;

use weft_core::error::{Result, WeftError};

use crate::stack::on_evaluator_stack;
use crate::value::{as_number, loose_eq, number};

/// Evaluate a program and return every output value.
pub fn jq_eval(input: &Value, program: &str) -> Result<Vec<Value>> {
    on_evaluator_stack(|| {
        let expr = parse(program).map_err(WeftError::Jq)?;
        eval(&expr, input).map_err(WeftError::Jq)
    })
}

/// Evaluate a program; one result is returned as-is, otherwise an array.
pub fn jq_query(input: &Value, program: &str) -> Result<Value> {
    let mut results = jq_eval(input, program)?;
    if results.len() == 1 {
        Ok(results.remove(0))
    } else {
        Ok(Value::Array(results))
    }
}

// ── Tokens ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Dot,
    Ident(String),
    Str(String),
    Num(f64),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Pipe,
    Comma,
    Question,
    Cmp(CmpOp),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

fn tokenize(src: &str) -> std::result::Result<Vec<Tok>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                toks.push(Tok::Dot);
                i += 1;
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '|' => {
                toks.push(Tok::Pipe);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '?' => {
                toks.push(Tok::Question);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => (CmpOp::Eq, 2),
                    ('!', Some('=')) => (CmpOp::Ne, 2),
                    ('<', Some('=')) => (CmpOp::Le, 2),
                    ('>', Some('=')) => (CmpOp::Ge, 2),
                    ('<', _) => (CmpOp::Lt, 1),
                    ('>', _) => (CmpOp::Gt, 1),
                    _ => return Err(format!("unexpected '{}' at {}", c, i)),
                };
                toks.push(Tok::Cmp(op));
                i += width;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string".into()),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(other) => s.push(*other),
                                None => return Err("unterminated string".into()),
                            }
                            i += 2;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                toks.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                toks.push(Tok::Num(n));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                toks.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}' at {}", other, i)),
        }
    }
    Ok(toks)
}

// ── AST + parser ────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Identity,
    Literal(Value),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Iterate(Box<Expr>),
    Optional(Box<Expr>),
    Pipe(Box<Expr>, Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Array(Option<Box<Expr>>),
    Call(String, Option<Box<Expr>>),
}

/// Deepest expression tree the parser will build.
const MAX_NESTING: usize = 256;

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    depth: usize,
}

fn parse(src: &str) -> std::result::Result<Expr, String> {
    let toks = tokenize(src)?;
    if toks.is_empty() {
        return Ok(Expr::Identity);
    }
    let mut p = Parser { toks, pos: 0, depth: 0 };
    let expr = p.pipe()?;
    if p.pos < p.toks.len() {
        return Err(format!("unexpected token {:?}", p.toks[p.pos]));
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.toks.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: Tok) -> std::result::Result<(), String> {
        match self.next() {
            Some(t) if t == tok => Ok(()),
            other => Err(format!("expected {:?}, found {:?}", tok, other)),
        }
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(n)) if n == name)
    }

    /// Account for one more level in the tree under construction. Chains
    /// such as `.a.b.c` or `x | y | z` nest one level per link.
    fn descend(&mut self) -> std::result::Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(format!("expression nests deeper than {} levels", MAX_NESTING));
        }
        Ok(())
    }

    fn pipe(&mut self) -> std::result::Result<Expr, String> {
        self.descend()?;
        let mut links = 1;
        let mut left = self.comma()?;
        while self.peek() == Some(&Tok::Pipe) {
            self.pos += 1;
            self.descend()?;
            links += 1;
            let right = self.comma()?;
            left = Expr::Pipe(Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn comma(&mut self) -> std::result::Result<Expr, String> {
        let mut links = 0;
        let mut left = self.or()?;
        while self.peek() == Some(&Tok::Comma) {
            self.pos += 1;
            self.descend()?;
            links += 1;
            let right = self.or()?;
            left = Expr::Comma(Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn or(&mut self) -> std::result::Result<Expr, String> {
        let mut links = 0;
        let mut left = self.and()?;
        while self.is_ident("or") {
            self.pos += 1;
            self.descend()?;
            links += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn and(&mut self) -> std::result::Result<Expr, String> {
        let mut links = 0;
        let mut left = self.compare()?;
        while self.is_ident("and") {
            self.pos += 1;
            self.descend()?;
            links += 1;
            let right = self.compare()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn compare(&mut self) -> std::result::Result<Expr, String> {
        let left = self.postfix()?;
        if let Some(Tok::Cmp(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.postfix()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn postfix(&mut self) -> std::result::Result<Expr, String> {
        let mut links = 0;
        let mut expr = self.primary()?;
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(Tok::Dot), Some(Tok::Ident(_))) | (Some(Tok::Dot), Some(Tok::Str(_))) => {
                    self.descend()?;
                    links += 1;
                    self.pos += 1;
                    let name = match self.next() {
                        Some(Tok::Ident(n)) | Some(Tok::Str(n)) => n,
                        _ => unreachable!("peeked identifier"),
                    };
                    expr = Expr::Field(Box::new(expr), name);
                }
                (Some(Tok::Dot), Some(Tok::LBracket)) => {
                    self.pos += 1;
                }
                (Some(Tok::LBracket), _) => {
                    self.descend()?;
                    links += 1;
                    self.pos += 1;
                    if self.peek() == Some(&Tok::RBracket) {
                        self.pos += 1;
                        expr = Expr::Iterate(Box::new(expr));
                    } else {
                        let index = self.pipe()?;
                        self.expect(Tok::RBracket)?;
                        expr = Expr::Index(Box::new(expr), Box::new(index));
                    }
                }
                (Some(Tok::Question), _) => {
                    self.descend()?;
                    links += 1;
                    self.pos += 1;
                    expr = Expr::Optional(Box::new(expr));
                }
                _ => break,
            }
        }
        self.depth -= links;
        Ok(expr)
    }

    fn primary(&mut self) -> std::result::Result<Expr, String> {
        match self.next() {
            Some(Tok::Dot) => match self.peek().cloned() {
                Some(Tok::Ident(name)) | Some(Tok::Str(name)) => {
                    self.pos += 1;
                    Ok(Expr::Field(Box::new(Expr::Identity), name))
                }
                _ => Ok(Expr::Identity),
            },
            Some(Tok::Num(n)) => Ok(Expr::Literal(number(n))),
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::LParen) => {
                let inner = self.pipe()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                if self.peek() == Some(&Tok::RBracket) {
                    self.pos += 1;
                    return Ok(Expr::Array(None));
                }
                let inner = self.pipe()?;
                self.expect(Tok::RBracket)?;
                Ok(Expr::Array(Some(Box::new(inner))))
            }
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    let arg = if self.peek() == Some(&Tok::LParen) {
                        self.pos += 1;
                        let arg = self.pipe()?;
                        self.expect(Tok::RParen)?;
                        Some(Box::new(arg))
                    } else {
                        None
                    };
                    Ok(Expr::Call(name, arg))
                }
            },
            other => Err(format!("unexpected token {:?}", other)),
        }
    }
}

// ── Evaluation ──────────────────────────────────────────────────

type Stream = std::result::Result<Vec<Value>, String>;

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

fn eval(expr: &Expr, input: &Value) -> Stream {
    match expr {
        Expr::Identity => Ok(vec![input.clone()]),
        Expr::Literal(v) => Ok(vec![v.clone()]),
        Expr::Field(base, name) => eval(base, input)?
            .into_iter()
            .map(|v| match v {
                Value::Object(mut map) => Ok(map.remove(name).unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                other => Err(format!("Cannot index {} with \"{}\"", kind(&other), name)),
            })
            .collect(),
        Expr::Index(base, index) => {
            let keys = eval(index, input)?;
            let mut out = Vec::new();
            for v in eval(base, input)? {
                for key in &keys {
                    out.push(index_value(&v, key)?);
                }
            }
            Ok(out)
        }
        Expr::Iterate(base) => {
            let mut out = Vec::new();
            for v in eval(base, input)? {
                match v {
                    Value::Array(items) => out.extend(items),
                    Value::Object(map) => out.extend(map.into_iter().map(|(_, v)| v)),
                    other => return Err(format!("Cannot iterate over {}", kind(&other))),
                }
            }
            Ok(out)
        }
        Expr::Optional(inner) => Ok(eval(inner, input).unwrap_or_default()),
        Expr::Pipe(left, right) => {
            let mut out = Vec::new();
            for v in eval(left, input)? {
                out.extend(eval(right, &v)?);
            }
            Ok(out)
        }
        Expr::Comma(left, right) => {
            let mut out = eval(left, input)?;
            out.extend(eval(right, input)?);
            Ok(out)
        }
        Expr::Compare(op, left, right) => {
            let rights = eval(right, input)?;
            let mut out = Vec::new();
            for l in eval(left, input)? {
                for r in &rights {
                    out.push(Value::Bool(compare(*op, &l, r)));
                }
            }
            Ok(out)
        }
        Expr::And(left, right) => {
            let mut out = Vec::new();
            for l in eval(left, input)? {
                if !truthy(&l) {
                    out.push(Value::Bool(false));
                    continue;
                }
                for r in eval(right, input)? {
                    out.push(Value::Bool(truthy(&r)));
                }
            }
            Ok(out)
        }
        Expr::Or(left, right) => {
            let mut out = Vec::new();
            for l in eval(left, input)? {
                if truthy(&l) {
                    out.push(Value::Bool(true));
                    continue;
                }
                for r in eval(right, input)? {
                    out.push(Value::Bool(truthy(&r)));
                }
            }
            Ok(out)
        }
        Expr::Array(inner) => Ok(vec![Value::Array(match inner {
            Some(e) => eval(e, input)?,
            None => vec![],
        })]),
        Expr::Call(name, arg) => call(name, arg.as_deref(), input),
    }
}

fn index_value(v: &Value, key: &Value) -> std::result::Result<Value, String> {
    match (v, key) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n.as_f64().unwrap_or(0.0) as i64;
            let idx = if i < 0 { items.len() as i64 + i } else { i };
            Ok(usize::try_from(idx)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Null, _) => Ok(Value::Null),
        (other, key) => Err(format!("Cannot index {} with {}", kind(other), kind(key))),
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> bool {
    match op {
        CmpOp::Eq => loose_eq(l, r),
        CmpOp::Ne => !loose_eq(l, r),
        _ => {
            let ord = match (l, r) {
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                _ => match (as_number(l), as_number(r)) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            };
            let Some(ord) = ord else {
                return false;
            };
            match op {
                CmpOp::Lt => ord.is_lt(),
                CmpOp::Gt => ord.is_gt(),
                CmpOp::Le => ord.is_le(),
                CmpOp::Ge => ord.is_ge(),
                CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
            }
        }
    }
}

fn require_arg<'a>(name: &str, arg: Option<&'a Expr>) -> std::result::Result<&'a Expr, String> {
    arg.ok_or_else(|| format!("{}/0 is not defined, {} takes one argument", name, name))
}

fn call(name: &str, arg: Option<&Expr>, input: &Value) -> Stream {
    match name {
        "select" => {
            let cond = require_arg(name, arg)?;
            Ok(eval(cond, input)?
                .into_iter()
                .filter(truthy)
                .map(|_| input.clone())
                .collect())
        }
        "map" => {
            let f = require_arg(name, arg)?;
            let items = match input {
                Value::Array(items) => items.clone(),
                Value::Object(map) => map.values().cloned().collect(),
                other => return Err(format!("Cannot iterate over {}", kind(other))),
            };
            let mut out = Vec::new();
            for item in &items {
                out.extend(eval(f, item)?);
            }
            Ok(vec![Value::Array(out)])
        }
        "keys" => match input {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                Ok(vec![Value::Array(
                    keys.into_iter().map(|k| Value::String(k.clone())).collect(),
                )])
            }
            Value::Array(items) => Ok(vec![Value::Array(
                (0..items.len()).map(Value::from).collect(),
            )]),
            other => Err(format!("{} has no keys", kind(other))),
        },
        "values" => match input {
            Value::Object(map) => Ok(vec![Value::Array(map.values().cloned().collect())]),
            Value::Array(_) => Ok(vec![input.clone()]),
            other => Err(format!("{} has no values", kind(other))),
        },
        "length" => Ok(vec![match input {
            Value::Null => Value::from(0),
            Value::Bool(_) => return Err("boolean has no length".into()),
            Value::Number(n) => number(n.as_f64().unwrap_or(0.0).abs()),
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(items) => Value::from(items.len()),
            Value::Object(map) => Value::from(map.len()),
        }]),
        "not" => Ok(vec![Value::Bool(!truthy(input))]),
        "type" => Ok(vec![Value::String(kind(input).to_string())]),
        "first" => match arg {
            Some(f) => Ok(eval(f, input)?.into_iter().take(1).collect()),
            None => Ok(vec![index_value(input, &Value::from(0))?]),
        },
        "last" => Ok(vec![index_value(input, &Value::from(-1))?]),
        "reverse" => match input {
            Value::Array(items) => Ok(vec![Value::Array(items.iter().rev().cloned().collect())]),
            Value::String(s) => Ok(vec![Value::String(s.chars().rev().collect())]),
            Value::Null => Ok(vec![Value::Array(vec![])]),
            other => Err(format!("Cannot reverse {}", kind(other))),
        },
        "sort" => match input {
            Value::Array(items) => {
                let mut items = items.clone();
                items.sort_by(|a, b| {
                    match (as_number(a), as_number(b)) {
                        (Some(x), Some(y)) if a.is_number() && b.is_number() => {
                            x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
                        }
                        _ => a.to_string().cmp(&b.to_string()),
                    }
                });
                Ok(vec![Value::Array(items)])
            }
            other => Err(format!("{} cannot be sorted", kind(other))),
        },
        "add" => match input {
            Value::Array(items) => Ok(vec![add_all(items)?]),
            Value::Null => Ok(vec![Value::Null]),
            other => Err(format!("Cannot add over {}", kind(other))),
        },
        "tostring" => Ok(vec![match input {
            Value::String(_) => input.clone(),
            other => Value::String(other.to_string()),
        }]),
        "empty" => Ok(vec![]),
        other => Err(format!("{}/{} is not defined", other, usize::from(arg.is_some()))),
    }
}

fn add_all(items: &[Value]) -> std::result::Result<Value, String> {
    let mut iter = items.iter().filter(|v| !v.is_null());
    let Some(first) = iter.next() else {
        return Ok(Value::Null);
    };
    let mut acc = first.clone();
    for item in iter {
        acc = match (acc, item) {
            (Value::Number(a), Value::Number(b)) => {
                number(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0))
            }
            (Value::String(a), Value::String(b)) => Value::String(a + b),
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b.iter().cloned());
                Value::Array(a)
            }
            (Value::Object(mut a), Value::Object(b)) => {
                a.extend(b.clone());
                Value::Object(a)
            }
            (a, b) => return Err(format!("{} and {} cannot be added", kind(&a), kind(b))),
        };
    }
    Ok(acc)
}
