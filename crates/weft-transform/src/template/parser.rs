use serde_json::Value;

use weft_core::error::{Result, WeftError};

use super::lexer::{Tag, TagKind, Token};
use crate::value::number;

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Text(String),
    Expr { expr: Expr, source: String },
    Block(Block),
}

#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub name: String,
    pub params: Vec<Expr>,
    pub body: Vec<Node>,
    pub inverse: Vec<Node>,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Path(PathRef),
    Literal(Value),
    Call { name: String, args: Vec<Expr> },
}

/// A variable reference: `name.sub`, `this`, `../parent`, `@index`, `@root.x`.
#[derive(Debug, Clone)]
pub(crate) struct PathRef {
    /// Number of `../` hops.
    pub depth: usize,
    /// `@`-prefixed data variable.
    pub data: bool,
    /// Dot path below the resolved scope; empty for `this`.
    pub path: String,
    pub raw: String,
}

impl PathRef {
    /// A bare identifier with no scope hops or sub-path, eligible to be a
    /// zero-argument helper call.
    pub fn simple_name(&self) -> Option<&str> {
        (!self.data && self.depth == 0 && !self.path.is_empty() && !self.path.contains(['.', '[']))
            .then_some(self.path.as_str())
    }
}

enum Stop {
    Eof,
    Else(String),
    Close,
}

/// Deepest block or subexpression nesting accepted.
const MAX_NESTING: usize = 128;

pub(crate) fn parse(tokens: Vec<Token>) -> Result<Vec<Node>> {
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    let (nodes, stop) = parser.nodes(None)?;
    match stop {
        Stop::Eof => Ok(nodes),
        Stop::Else(_) | Stop::Close => Err(WeftError::Template("unexpected block tag".into())),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    /// Parse nodes until end of input, an `{{else}}`, or the close tag for
    /// `closing`.
    fn nodes(&mut self, closing: Option<&str>) -> Result<(Vec<Node>, Stop)> {
        let mut out = Vec::new();
        while let Some(tok) = self.next() {
            let tag = match tok {
                Token::Text(s) => {
                    out.push(Node::Text(s));
                    continue;
                }
                Token::Tag(tag) => tag,
            };
            match tag.kind {
                TagKind::Expr | TagKind::Unescaped => out.push(Node::Expr {
                    expr: parse_expression(&tag.body).map_err(|e| located(&tag, e))?,
                    source: tag.source,
                }),
                TagKind::Open => {
                    let (name, rest) = split_name(&tag.body);
                    if name.is_empty() {
                        return Err(located(&tag, "empty block name".into()));
                    }
                    let params = parse_params(rest).map_err(|e| located(&tag, e))?;
                    out.push(Node::Block(self.block(name, params, name)?));
                }
                TagKind::Else => {
                    if closing.is_none() {
                        return Err(located(&tag, "{{else}} outside of a block".into()));
                    }
                    return Ok((out, Stop::Else(tag.body)));
                }
                TagKind::Close => match closing {
                    Some(expected) if expected == tag.body => return Ok((out, Stop::Close)),
                    Some(expected) => {
                        return Err(located(
                            &tag,
                            format!("expected {{{{/{}}}}}, found {{{{/{}}}}}", expected, tag.body),
                        ))
                    }
                    None => return Err(located(&tag, format!("unmatched {{{{/{}}}}}", tag.body))),
                },
            }
        }
        match closing {
            Some(name) => Err(WeftError::Template(format!("unclosed block {{{{#{}}}}}", name))),
            None => Ok((out, Stop::Eof)),
        }
    }

    /// Parse a block body and its inverse. `{{else if x}}` chains become a
    /// nested block in the inverse that shares the outer close tag.
    fn block(&mut self, name: &str, params: Vec<Expr>, closing: &str) -> Result<Block> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(WeftError::Template(format!(
                "blocks nest deeper than {} levels",
                MAX_NESTING
            )));
        }
        let (body, stop) = self.nodes(Some(closing))?;
        let inverse = match stop {
            Stop::Close | Stop::Eof => Vec::new(),
            Stop::Else(rest) if rest.is_empty() => {
                let (inverse, stop) = self.nodes(Some(closing))?;
                if let Stop::Else(_) = stop {
                    return Err(WeftError::Template(format!(
                        "multiple {{{{else}}}} in {{{{#{}}}}}",
                        closing
                    )));
                }
                inverse
            }
            Stop::Else(rest) => {
                let (chained, rest) = split_name(&rest);
                let params = parse_params(rest).map_err(WeftError::Template)?;
                vec![Node::Block(self.block(chained, params, closing)?)]
            }
        };
        self.depth -= 1;
        Ok(Block {
            name: name.to_string(),
            params,
            body,
            inverse,
        })
    }
}

fn located(tag: &Tag, message: String) -> WeftError {
    WeftError::Template(format!("{} at offset {} in {}", message, tag.offset, tag.source))
}

fn split_name(body: &str) -> (&str, &str) {
    let body = body.trim();
    match body.find(char::is_whitespace) {
        Some(i) => (&body[..i], body[i..].trim_start()),
        None => (body, ""),
    }
}

/// A tag body is either a single value (`name`, `"lit"`, `(sub expr)`) or a
/// helper call (`helper arg1 arg2`).
pub(crate) fn parse_expression(body: &str) -> std::result::Result<Expr, String> {
    let mut params = parse_params(body)?;
    match params.len() {
        0 => Err("empty expression".into()),
        1 => Ok(params.remove(0)),
        _ => {
            let name = match &params[0] {
                Expr::Path(p) => p.simple_name().map(str::to_string),
                _ => None,
            }
            .ok_or_else(|| format!("'{}' is not a helper name", body))?;
            params.remove(0);
            Ok(Expr::Call { name, args: params })
        }
    }
}

fn parse_params(src: &str) -> std::result::Result<Vec<Expr>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0;
    let params = params_until(&chars, &mut pos, None, 0)?;
    Ok(params)
}

fn params_until(
    chars: &[char],
    pos: &mut usize,
    close: Option<char>,
    depth: usize,
) -> std::result::Result<Vec<Expr>, String> {
    if depth > MAX_NESTING {
        return Err(format!("subexpressions nest deeper than {} levels", MAX_NESTING));
    }
    let mut out = Vec::new();
    loop {
        while *pos < chars.len() && chars[*pos].is_whitespace() {
            *pos += 1;
        }
        let Some(&c) = chars.get(*pos) else {
            return match close {
                Some(_) => Err("unclosed subexpression".into()),
                None => Ok(out),
            };
        };
        if Some(c) == close {
            *pos += 1;
            return Ok(out);
        }
        match c {
            '"' | '\'' => {
                *pos += 1;
                let mut s = String::new();
                loop {
                    match chars.get(*pos) {
                        None => return Err("unterminated string literal".into()),
                        Some('\\') if chars.get(*pos + 1).is_some() => {
                            s.push(chars[*pos + 1]);
                            *pos += 2;
                        }
                        Some(&ch) if ch == c => {
                            *pos += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            *pos += 1;
                        }
                    }
                }
                out.push(Expr::Literal(Value::String(s)));
            }
            '(' => {
                *pos += 1;
                let mut inner = params_until(chars, pos, Some(')'), depth + 1)?;
                if inner.is_empty() {
                    return Err("empty subexpression".into());
                }
                let name = match inner.remove(0) {
                    Expr::Path(p) => p
                        .simple_name()
                        .map(str::to_string)
                        .ok_or_else(|| format!("'{}' is not a helper name", p.raw))?,
                    _ => return Err("subexpression must start with a helper name".into()),
                };
                out.push(Expr::Call { name, args: inner });
            }
            ')' => return Err("unexpected ')'".into()),
            _ => {
                let start = *pos;
                while *pos < chars.len()
                    && !chars[*pos].is_whitespace()
                    && chars[*pos] != ')'
                    && chars[*pos] != '('
                {
                    *pos += 1;
                }
                let word: String = chars[start..*pos].iter().collect();
                out.push(atom(&word));
            }
        }
    }
}

fn atom(word: &str) -> Expr {
    match word {
        "true" => return Expr::Literal(Value::Bool(true)),
        "false" => return Expr::Literal(Value::Bool(false)),
        "null" | "undefined" => return Expr::Literal(Value::Null),
        _ => {}
    }
    if word.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        if let Ok(n) = word.parse::<f64>() {
            return Expr::Literal(number(n));
        }
    }
    Expr::Path(path_ref(word))
}

fn path_ref(word: &str) -> PathRef {
    let raw = word.to_string();
    let mut rest = word;
    let mut depth = 0;
    while let Some(r) = rest.strip_prefix("../") {
        depth += 1;
        rest = r;
    }
    let data = rest.starts_with('@');
    if data {
        rest = &rest[1..];
    }
    let path = if rest == "this" || rest == "." {
        ""
    } else if let Some(r) = rest.strip_prefix("this.").or_else(|| rest.strip_prefix("./")) {
        r
    } else {
        rest
    };
    PathRef {
        depth,
        data,
        path: path.to_string(),
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse_src(src: &str) -> Result<Vec<Node>> {
        parse(tokenize(src)?)
    }

    #[test]
    fn nested_blocks_share_delimiters() {
        let nodes = parse_src("{{#each items}}{{#if this.ok}}{{name}}{{/if}}{{/each}}").unwrap();
        let Node::Block(each) = &nodes[0] else { panic!("expected block") };
        assert_eq!(each.name, "each");
        let Node::Block(inner) = &each.body[0] else { panic!("expected nested block") };
        assert_eq!(inner.name, "if");
        assert_eq!(inner.body.len(), 1);
    }

    #[test]
    fn else_if_chains_into_inverse() {
        let nodes = parse_src("{{#if a}}A{{else if b}}B{{else}}C{{/if}}").unwrap();
        let Node::Block(outer) = &nodes[0] else { panic!() };
        let Node::Block(chained) = &outer.inverse[0] else { panic!() };
        assert_eq!(chained.name, "if");
        assert!(matches!(&chained.inverse[0], Node::Text(t) if t == "C"));
    }

    #[test]
    fn helper_calls_with_literals_and_subexpressions() {
        let expr = parse_expression(r#"concat "a" (upper name) 3 true"#).unwrap();
        let Expr::Call { name, args } = expr else { panic!() };
        assert_eq!(name, "concat");
        assert_eq!(args.len(), 4);
        assert!(matches!(&args[1], Expr::Call { name, .. } if name == "upper"));
        assert!(matches!(&args[2], Expr::Literal(v) if v == &serde_json::json!(3)));
    }

    #[test]
    fn path_references() {
        let p = path_ref("../../user.name");
        assert_eq!((p.depth, p.data, p.path.as_str()), (2, false, "user.name"));
        let p = path_ref("@index");
        assert!(p.data);
        assert_eq!(path_ref("this").path, "");
        assert_eq!(path_ref("this.x").path, "x");
    }

    #[test]
    fn structural_errors() {
        assert!(parse_src("{{#if a}}never closed").is_err());
        assert!(parse_src("{{#if a}}x{{/each}}").is_err());
        assert!(parse_src("{{/if}}").is_err());
        assert!(parse_src("{{else}}").is_err());
        assert!(parse_src("{{(upper name}}").is_err());
    }
}
