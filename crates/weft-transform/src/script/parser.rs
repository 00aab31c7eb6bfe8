use std::rc::Rc;

use serde_json::Value;

use weft_core::error::{Result, WeftError};

use super::ast::*;
use super::lexer::{Tok, TplChunk};
use crate::value::{display, number};

/// Deepest syntax tree the parser will build. Left-deep chains such as
/// `a.b.c` or `1 + 2 + 3` nest one level per link.
const MAX_NESTING: usize = 512;

pub(crate) fn parse_program(toks: Vec<Tok>) -> Result<Vec<Stmt>> {
    let mut p = Parser { toks, pos: 0, depth: 0 };
    let mut out = Vec::new();
    while !p.at_end() {
        out.push(p.statement()?);
    }
    Ok(out)
}

pub(crate) fn parse_expression(toks: Vec<Tok>) -> Result<Expr> {
    parse_nested(toks, 0)
}

/// Parse a standalone expression that sits `depth` levels into an enclosing tree.
fn parse_nested(toks: Vec<Tok>, depth: usize) -> Result<Expr> {
    let mut p = Parser { toks, pos: 0, depth };
    if p.at_end() {
        return Err(syntax("empty expression"));
    }
    let expr = p.expression()?;
    if !p.at_end() {
        return Err(syntax(format!("unexpected {}", p.describe())));
    }
    Ok(expr)
}

fn syntax(msg: impl Into<String>) -> WeftError {
    WeftError::Script(format!("SyntaxError: {}", msg.into()))
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(syntax(format!("nesting deeper than {} levels", MAX_NESTING)));
        }
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.toks.get(self.pos + offset)
    }

    fn describe(&self) -> String {
        match self.peek() {
            None => "end of input".to_string(),
            Some(Tok::Punct(p)) => format!("'{}'", p),
            Some(Tok::Ident(n)) => format!("'{}'", n),
            Some(Tok::Num(n)) => format!("number {}", n),
            Some(Tok::Str(_)) => "string".to_string(),
            Some(Tok::Template(_)) => "template literal".to_string(),
        }
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Some(Tok::Punct(q)) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(syntax(format!("expected '{}', found {}", p, self.describe())))
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(n)) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Tok::Ident(n)) => {
                self.pos += 1;
                Ok(n)
            }
            _ => Err(syntax(format!("expected identifier, found {}", self.describe()))),
        }
    }

    fn end_statement(&mut self) {
        self.eat_punct(";");
    }

    // ── Statements ─────────────────────────────────────────────

    fn statement(&mut self) -> Result<Stmt> {
        self.descend()?;
        let stmt = self.statement_kind()?;
        self.depth -= 1;
        Ok(stmt)
    }

    fn statement_kind(&mut self) -> Result<Stmt> {
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Block(Vec::new()));
        }
        let kw = match self.peek() {
            Some(Tok::Ident(n)) => n.clone(),
            _ => String::new(),
        };
        match kw.as_str() {
            "let" | "const" | "var" => {
                let stmt = self.declaration()?;
                self.end_statement();
                Ok(stmt)
            }
            "if" => {
                self.pos += 1;
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat_kw("else") {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If { cond, then, otherwise })
            }
            "for" => self.for_statement(),
            "while" => {
                self.pos += 1;
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { cond, body })
            }
            "return" => {
                self.pos += 1;
                let value = if self.at_end() || self.is_punct(";") || self.is_punct("}") {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement();
                Ok(Stmt::Return(value))
            }
            "break" => {
                self.pos += 1;
                self.end_statement();
                Ok(Stmt::Break)
            }
            "continue" => {
                self.pos += 1;
                self.end_statement();
                Ok(Stmt::Continue)
            }
            "throw" => {
                self.pos += 1;
                let value = self.expression()?;
                self.end_statement();
                Ok(Stmt::Throw(value))
            }
            "try" => self.try_statement(),
            "function" if matches!(self.peek_at(1), Some(Tok::Ident(_))) => {
                self.pos += 1;
                let name = self.ident()?;
                let def = self.function_rest()?;
                Ok(Stmt::Let {
                    mutable: true,
                    decls: vec![(Pattern::Name(name), Some(Expr::Function(def)))],
                })
            }
            _ => {
                let expr = self.expression()?;
                self.end_statement();
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut out = Vec::new();
        while !self.eat_punct("}") {
            if self.at_end() {
                return Err(syntax("unterminated block"));
            }
            out.push(self.statement()?);
        }
        Ok(out)
    }

    fn declaration(&mut self) -> Result<Stmt> {
        let mutable = !self.is_kw("const");
        self.pos += 1;
        let mut decls = Vec::new();
        loop {
            let pattern = self.pattern()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push((pattern, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Let { mutable, decls })
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        self.pos += 1;
        self.expect_punct("(")?;

        let init = if self.is_kw("let") || self.is_kw("const") || self.is_kw("var") {
            let mutable = !self.is_kw("const");
            let start = self.pos;
            self.pos += 1;
            let pattern = self.pattern()?;
            if self.eat_kw("of") {
                let iterable = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                return Ok(Stmt::ForOf { mutable, pattern, iterable, body });
            }
            if self.eat_kw("in") {
                let Pattern::Name(name) = pattern else {
                    return Err(syntax("for...in requires a simple binding"));
                };
                let object = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                return Ok(Stmt::ForIn { mutable, name, object, body });
            }
            self.pos = start;
            let decl = self.declaration()?;
            self.expect_punct(";")?;
            Some(Box::new(decl))
        } else if self.eat_punct(";") {
            None
        } else {
            let expr = self.expression()?;
            self.expect_punct(";")?;
            Some(Box::new(Stmt::Expr(expr)))
        };

        let cond = if self.is_punct(";") { None } else { Some(self.expression()?) };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") { None } else { Some(self.expression()?) };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For { init, cond, update, body })
    }

    fn try_statement(&mut self) -> Result<Stmt> {
        self.pos += 1;
        let body = self.block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_kw("catch") {
            if self.eat_punct("(") {
                param = Some(self.pattern()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_kw("finally") { Some(self.block()?) } else { None };
        if handler.is_none() && finalizer.is_none() {
            return Err(syntax("try without catch or finally"));
        }
        Ok(Stmt::Try { body, param, handler, finalizer })
    }

    fn pattern(&mut self) -> Result<Pattern> {
        if self.eat_punct("{") {
            let mut props = Vec::new();
            let mut rest = None;
            while !self.eat_punct("}") {
                if self.eat_punct("...") {
                    rest = Some(self.ident()?);
                } else {
                    let key = match self.peek().cloned() {
                        Some(Tok::Str(s)) => {
                            self.pos += 1;
                            s
                        }
                        _ => self.ident()?,
                    };
                    let local = if self.eat_punct(":") { self.ident()? } else { key.clone() };
                    props.push((key, local));
                }
                if !self.eat_punct(",") {
                    self.expect_punct("}")?;
                    break;
                }
            }
            return Ok(Pattern::Object { props, rest });
        }
        if self.eat_punct("[") {
            let mut items = Vec::new();
            let mut rest = None;
            while !self.eat_punct("]") {
                if self.is_punct(",") {
                    self.pos += 1;
                    items.push(None);
                    continue;
                }
                if self.eat_punct("...") {
                    rest = Some(self.ident()?);
                } else {
                    items.push(Some(self.ident()?));
                }
                if !self.eat_punct(",") {
                    self.expect_punct("]")?;
                    break;
                }
            }
            return Ok(Pattern::Array { items, rest });
        }
        Ok(Pattern::Name(self.ident()?))
    }

    // ── Expressions ────────────────────────────────────────────

    fn expression(&mut self) -> Result<Expr> {
        self.assignment()
    }

    fn is_arrow_start(&self) -> bool {
        match self.peek() {
            Some(Tok::Ident(_)) => matches!(self.peek_at(1), Some(Tok::Punct("=>"))),
            Some(Tok::Punct("(")) => {
                let mut depth = 0usize;
                let mut i = self.pos;
                while let Some(tok) = self.toks.get(i) {
                    match tok {
                        Tok::Punct("(") | Tok::Punct("[") | Tok::Punct("{") => depth += 1,
                        Tok::Punct(")") | Tok::Punct("]") | Tok::Punct("}") => {
                            depth = depth.saturating_sub(1);
                            if depth == 0 {
                                return matches!(self.toks.get(i + 1), Some(Tok::Punct("=>")));
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                false
            }
            _ => false,
        }
    }

    fn arrow(&mut self) -> Result<Expr> {
        let params = if self.is_punct("(") {
            self.params()?
        } else {
            vec![Pattern::Name(self.ident()?)]
        };
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(self.assignment()?)
        };
        Ok(Expr::Function(Rc::new(FunctionDef { params, body })))
    }

    fn params(&mut self) -> Result<Vec<Pattern>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.eat_punct(")") {
            params.push(self.pattern()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(params)
    }

    fn function_rest(&mut self) -> Result<Rc<FunctionDef>> {
        let params = self.params()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(Rc::new(FunctionDef { params, body }))
    }

    fn assignment(&mut self) -> Result<Expr> {
        self.descend()?;
        let expr = self.assignment_kind()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn assignment_kind(&mut self) -> Result<Expr> {
        if self.is_arrow_start() {
            return self.arrow();
        }
        let target = self.conditional()?;
        let op = match self.peek() {
            Some(Tok::Punct("=")) => None,
            Some(Tok::Punct("+=")) => Some(BinOp::Add),
            Some(Tok::Punct("-=")) => Some(BinOp::Sub),
            Some(Tok::Punct("*=")) => Some(BinOp::Mul),
            Some(Tok::Punct("/=")) => Some(BinOp::Div),
            Some(Tok::Punct("%=")) => Some(BinOp::Rem),
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) {
            return Err(syntax("invalid assignment target"));
        }
        self.pos += 1;
        let value = self.assignment()?;
        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> Result<Expr> {
        let cond = self.binary(1)?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn binop(&self) -> Option<(u8, Op)> {
        Some(match self.peek()? {
            Tok::Punct("??") => (1, Op::Logic(LogicOp::Nullish)),
            Tok::Punct("||") => (2, Op::Logic(LogicOp::Or)),
            Tok::Punct("&&") => (3, Op::Logic(LogicOp::And)),
            Tok::Punct("==") => (4, Op::Bin(BinOp::Eq)),
            Tok::Punct("!=") => (4, Op::Bin(BinOp::Ne)),
            Tok::Punct("===") => (4, Op::Bin(BinOp::StrictEq)),
            Tok::Punct("!==") => (4, Op::Bin(BinOp::StrictNe)),
            Tok::Punct("<") => (5, Op::Bin(BinOp::Lt)),
            Tok::Punct(">") => (5, Op::Bin(BinOp::Gt)),
            Tok::Punct("<=") => (5, Op::Bin(BinOp::Le)),
            Tok::Punct(">=") => (5, Op::Bin(BinOp::Ge)),
            Tok::Ident(n) if n == "in" => (5, Op::Bin(BinOp::In)),
            Tok::Punct("+") => (6, Op::Bin(BinOp::Add)),
            Tok::Punct("-") => (6, Op::Bin(BinOp::Sub)),
            Tok::Punct("*") => (7, Op::Bin(BinOp::Mul)),
            Tok::Punct("/") => (7, Op::Bin(BinOp::Div)),
            Tok::Punct("%") => (7, Op::Bin(BinOp::Rem)),
            Tok::Punct("**") => (8, Op::Bin(BinOp::Pow)),
            _ => return None,
        })
    }

    fn binary(&mut self, min: u8) -> Result<Expr> {
        let mut left = self.unary()?;
        let mut links = 0;
        while let Some((prec, op)) = self.binop() {
            if prec < min {
                break;
            }
            self.pos += 1;
            self.descend()?;
            links += 1;
            let right_assoc = op == Op::Bin(BinOp::Pow);
            let right = self.binary(if right_assoc { prec } else { prec + 1 })?;
            left = match op {
                Op::Bin(b) => Expr::Binary(b, Box::new(left), Box::new(right)),
                Op::Logic(l) => Expr::Logical(l, Box::new(left), Box::new(right)),
            };
        }
        self.depth -= links;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Tok::Punct("!")) => Some(UnaryOp::Not),
            Some(Tok::Punct("-")) => Some(UnaryOp::Neg),
            Some(Tok::Punct("+")) => Some(UnaryOp::Plus),
            Some(Tok::Ident(n)) if n == "typeof" => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            self.descend()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }
        for (p, delta) in [("++", 1.0), ("--", -1.0)] {
            if self.eat_punct(p) {
                self.descend()?;
                let target = self.unary()?;
                self.depth -= 1;
                return Ok(Expr::Update {
                    target: Box::new(target),
                    delta,
                    prefix: true,
                });
            }
        }
        let expr = self.call_member()?;
        for (p, delta) in [("++", 1.0), ("--", -1.0)] {
            if self.eat_punct(p) {
                return Ok(Expr::Update {
                    target: Box::new(expr),
                    delta,
                    prefix: false,
                });
            }
        }
        Ok(expr)
    }

    fn call_member(&mut self) -> Result<Expr> {
        let mut expr = if self.eat_kw("new") {
            let class = self.ident()?;
            let args = if self.is_punct("(") { self.args()? } else { Vec::new() };
            Expr::New { class, args }
        } else {
            self.primary()?
        };
        // once a chain contains `?.` the remaining links short-circuit too
        let mut optional = false;
        let links_before = self.depth;
        loop {
            if !self.is_punct(".") && !self.is_punct("?.") && !self.is_punct("[") && !self.is_punct("(") {
                break;
            }
            self.descend()?;
            if self.eat_punct(".") {
                let property = self.ident()?;
                expr = Expr::Member { object: Box::new(expr), property, optional };
            } else if self.eat_punct("?.") {
                optional = true;
                if self.is_punct("(") {
                    let args = self.args()?;
                    expr = Expr::Call { callee: Box::new(expr), args, optional };
                } else if self.eat_punct("[") {
                    let index = self.expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Index { object: Box::new(expr), index: Box::new(index), optional };
                } else {
                    let property = self.ident()?;
                    expr = Expr::Member { object: Box::new(expr), property, optional };
                }
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index { object: Box::new(expr), index: Box::new(index), optional };
            } else {
                let args = self.args()?;
                expr = Expr::Call { callee: Box::new(expr), args, optional };
            }
        }
        self.depth = links_before;
        Ok(expr)
    }

    fn args(&mut self) -> Result<Vec<Item>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            args.push(self.item()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn item(&mut self) -> Result<Item> {
        if self.eat_punct("...") {
            Ok(Item::Spread(self.assignment()?))
        } else {
            Ok(Item::Expr(self.assignment()?))
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let Some(tok) = self.peek().cloned() else {
            return Err(syntax("unexpected end of input"));
        };
        self.pos += 1;
        match tok {
            Tok::Num(n) => Ok(Expr::Literal(number(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Template(chunks) => {
                let mut parts = Vec::with_capacity(chunks.len());
                for chunk in chunks {
                    parts.push(match chunk {
                        TplChunk::Text(t) => TplPart::Text(t),
                        TplChunk::Code(toks) => TplPart::Expr(parse_nested(toks, self.depth)?),
                    });
                }
                Ok(Expr::Template(parts))
            }
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "undefined" => Ok(Expr::Undefined),
                "function" => {
                    if matches!(self.peek(), Some(Tok::Ident(_))) {
                        self.pos += 1;
                    }
                    Ok(Expr::Function(self.function_rest()?))
                }
                _ => Ok(Expr::Ident(name)),
            },
            Tok::Punct("(") => {
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.item()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            Tok::Punct("{") => self.object_literal(),
            Tok::Punct(p) => Err(syntax(format!("unexpected '{}'", p))),
        }
    }

    fn object_literal(&mut self) -> Result<Expr> {
        let mut props = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_punct("...") {
                props.push(Prop::Spread(self.assignment()?));
            } else {
                let key = match self.peek().cloned() {
                    Some(Tok::Ident(n)) => {
                        self.pos += 1;
                        PropKey::Static(n)
                    }
                    Some(Tok::Str(s)) => {
                        self.pos += 1;
                        PropKey::Static(s)
                    }
                    Some(Tok::Num(n)) => {
                        self.pos += 1;
                        PropKey::Static(display(&number(n)))
                    }
                    Some(Tok::Punct("[")) => {
                        self.pos += 1;
                        let e = self.expression()?;
                        self.expect_punct("]")?;
                        PropKey::Computed(e)
                    }
                    _ => return Err(syntax(format!("unexpected {} in object literal", self.describe()))),
                };
                let value = if self.eat_punct(":") {
                    self.assignment()?
                } else if self.is_punct("(") {
                    Expr::Function(self.function_rest()?)
                } else {
                    match &key {
                        PropKey::Static(name) => Expr::Ident(name.clone()),
                        PropKey::Computed(_) => return Err(syntax("computed key requires a value")),
                    }
                };
                props.push(Prop::Pair(key, value));
            }
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Object(props))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Bin(BinOp),
    Logic(LogicOp),
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn program(src: &str) -> Vec<Stmt> {
        parse_program(tokenize(src).unwrap()).unwrap()
    }

    fn expr(src: &str) -> Expr {
        parse_expression(tokenize(src).unwrap()).unwrap()
    }

    #[test]
    fn precedence() {
        let Expr::Binary(BinOp::Add, _, right) = expr("1 + 2 * 3") else { panic!() };
        assert!(matches!(*right, Expr::Binary(BinOp::Mul, _, _)));
        assert!(matches!(expr("a || b && c"), Expr::Logical(LogicOp::Or, _, _)));
        assert!(matches!(expr("a ? b : c ? d : e"), Expr::Conditional(_, _, _)));
    }

    #[test]
    fn arrows_and_calls() {
        let Expr::Call { args, .. } = expr("xs.map((x, i) => x * i)") else { panic!() };
        assert!(matches!(&args[0], Item::Expr(Expr::Function(_))));
        assert!(matches!(expr("x => ({a: x})"), Expr::Function(_)));
        assert!(matches!(expr("(a)"), Expr::Ident(_)));
    }

    #[test]
    fn statements() {
        let stmts = program(
            "const {a, b: c} = input; let total = 0;
             for (const x of input.items) { total += x; }
             for (let i = 0; i < 3; i++) total++;
             if (total > 2) { return total } else return 0;",
        );
        assert_eq!(stmts.len(), 5);
        assert!(matches!(stmts[2], Stmt::ForOf { .. }));
        assert!(matches!(stmts[3], Stmt::For { .. }));
    }

    #[test]
    fn syntax_errors() {
        assert!(parse_program(tokenize("let = 5").unwrap()).is_err());
        assert!(parse_program(tokenize("if (x { }").unwrap()).is_err());
        assert!(parse_expression(tokenize("1 +").unwrap()).is_err());
        assert!(parse_expression(tokenize("f(1) 2").unwrap()).is_err());
        assert!(parse_program(tokenize("3 = x").unwrap()).is_err());
    }
}
