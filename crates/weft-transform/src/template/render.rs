use serde_json::{Map, Value};

use weft_core::error::{Result, WeftError};

use super::helpers;
use super::parser::{Block, Expr, Node, PathRef};
use crate::path::lookup;
use crate::value::{display, is_truthy};

struct Frame {
    this: Value,
    data: Map<String, Value>,
}

pub(crate) struct Renderer {
    strict: bool,
    stack: Vec<Frame>,
}

impl Renderer {
    pub fn new(root: &Value, strict: bool) -> Self {
        Self {
            strict,
            stack: vec![Frame {
                this: root.clone(),
                data: Map::new(),
            }],
        }
    }

    pub fn render(&mut self, nodes: &[Node], out: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Expr { expr, source } => match self.eval(expr)? {
                    Some(v) => out.push_str(&display(&v)),
                    None if self.strict => {
                        return Err(WeftError::Template(format!("\"{}\" not defined", source)))
                    }
                    None => out.push_str(source),
                },
                Node::Block(block) => self.block(block, out)?,
            }
        }
        Ok(())
    }

    fn block(&mut self, block: &Block, out: &mut String) -> Result<()> {
        let subject = match block.params.first() {
            Some(expr) => self.eval(expr)?,
            None => {
                return Err(WeftError::Template(format!(
                    "{{{{#{}}}}} requires an argument",
                    block.name
                )))
            }
        };
        match block.name.as_str() {
            "if" | "unless" => {
                let truthy = subject.as_ref().is_some_and(is_truthy);
                let branch = if truthy == (block.name == "if") {
                    &block.body
                } else {
                    &block.inverse
                };
                self.render(branch, out)
            }
            "each" => match subject {
                Some(Value::Array(items)) if !items.is_empty() => {
                    let len = items.len();
                    for (i, item) in items.into_iter().enumerate() {
                        let mut data = Map::new();
                        data.insert("index".into(), Value::from(i));
                        data.insert("first".into(), Value::Bool(i == 0));
                        data.insert("last".into(), Value::Bool(i + 1 == len));
                        data.insert("length".into(), Value::from(len));
                        self.scoped(item, data, &block.body, out)?;
                    }
                    Ok(())
                }
                Some(Value::Object(map)) if !map.is_empty() => {
                    let len = map.len();
                    for (i, (key, item)) in map.into_iter().enumerate() {
                        let mut data = Map::new();
                        data.insert("key".into(), Value::String(key));
                        data.insert("index".into(), Value::from(i));
                        data.insert("first".into(), Value::Bool(i == 0));
                        data.insert("last".into(), Value::Bool(i + 1 == len));
                        data.insert("length".into(), Value::from(len));
                        self.scoped(item, data, &block.body, out)?;
                    }
                    Ok(())
                }
                None if self.strict => Err(self.undefined(&block.params[0])),
                _ => self.render(&block.inverse, out),
            },
            "with" => match subject {
                Some(v) if is_truthy(&v) => self.scoped(v, Map::new(), &block.body, out),
                None if self.strict => Err(self.undefined(&block.params[0])),
                _ => self.render(&block.inverse, out),
            },
            other => Err(WeftError::Template(format!("unknown block helper '{}'", other))),
        }
    }

    fn scoped(&mut self, this: Value, data: Map<String, Value>, body: &[Node], out: &mut String) -> Result<()> {
        self.stack.push(Frame { this, data });
        let result = self.render(body, out);
        self.stack.pop();
        result
    }

    fn undefined(&self, expr: &Expr) -> WeftError {
        let name = match expr {
            Expr::Path(p) => p.raw.clone(),
            Expr::Call { name, .. } => name.clone(),
            Expr::Literal(v) => v.to_string(),
        };
        WeftError::Template(format!("\"{}\" not defined", name))
    }

    /// Evaluate an expression; `None` means an unresolved variable.
    fn eval(&self, expr: &Expr) -> Result<Option<Value>> {
        match expr {
            Expr::Literal(v) => Ok(Some(v.clone())),
            Expr::Path(p) => match self.resolve(p) {
                Some(v) => Ok(Some(v)),
                None => match p.simple_name().filter(|n| helpers::exists(n)) {
                    Some(name) => self.call(name, &[]).map(Some),
                    None => Ok(None),
                },
            },
            Expr::Call { name, args } => self.call(name, args).map(Some),
        }
    }

    fn call(&self, name: &str, args: &[Expr]) -> Result<Value> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match self.eval(arg)? {
                Some(v) => values.push(v),
                None if self.strict => return Err(self.undefined(arg)),
                None => values.push(Value::Null),
            }
        }
        match helpers::call(name, &values) {
            Some(result) => result.map_err(|e| WeftError::Template(format!("{}: {}", name, e))),
            None => Err(WeftError::Template(format!("unknown helper '{}'", name))),
        }
    }

    fn resolve(&self, p: &PathRef) -> Option<Value> {
        let idx = self.stack.len().checked_sub(1 + p.depth)?;
        if p.data {
            let (head, rest) = match p.path.split_once('.') {
                Some((h, r)) => (h, r),
                None => (p.path.as_str(), ""),
            };
            let base = if head == "root" {
                self.stack[0].this.clone()
            } else {
                self.stack[..=idx]
                    .iter()
                    .rev()
                    .find_map(|f| f.data.get(head))?
                    .clone()
            };
            return if rest.is_empty() { Some(base) } else { lookup(&base, rest) };
        }

        let frame = &self.stack[idx];
        if p.path.is_empty() {
            return Some(frame.this.clone());
        }
        lookup(&frame.this, &p.path).or_else(|| {
            // unqualified names fall back to the root scope
            (p.depth == 0 && idx > 0)
                .then(|| lookup(&self.stack[0].this, &p.path))
                .flatten()
        })
    }
}
