//! Tree-walking evaluator for the script AST.
//!
//! Values are JSON plus a few runtime-only kinds (`undefined`, closures,
//! dates, built-in namespaces). Objects and arrays have value semantics:
//! mutation through a binding (`o.x = 1`, `xs.push(v)`) rewrites that
//! binding only.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use weft_core::error::WeftError;

use super::ast::*;
use super::builtins;
use super::lexer::check_identifier;
use crate::value::{display, loose_eq, number};

const MAX_CALL_DEPTH: usize = 100;
/// Statement and expression levels live at once, calls included. Bounds the
/// native stack the walk can use.
const MAX_NESTING: usize = 512;
/// Largest string a script may build, in bytes.
pub(crate) const MAX_STRING_BYTES: usize = 16 * 1024 * 1024;
/// Largest array a script may build.
pub(crate) const MAX_ARRAY_LEN: usize = 1 << 20;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub max_operations: u64,
    pub timeout: Duration,
}

#[derive(Clone)]
pub(crate) enum Val {
    Undefined,
    Json(Value),
    /// NaN and the infinities, which JSON cannot carry.
    NonFinite(f64),
    Date(DateTime<Utc>),
    Func(Rc<Closure>),
    /// A built-in: a namespace (`Math`), a callable global (`parseInt`) or a
    /// static member (`Math.round`).
    Global(&'static str),
}

pub(crate) struct Closure {
    def: Rc<FunctionDef>,
    env: Scope,
}

impl Val {
    pub fn from_f64(f: f64) -> Val {
        if f.is_finite() {
            Val::Json(number(f))
        } else {
            Val::NonFinite(f)
        }
    }

    pub fn str(s: impl Into<String>) -> Val {
        Val::Json(Value::String(s.into()))
    }

    pub fn bool(b: bool) -> Val {
        Val::Json(Value::Bool(b))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Val::Undefined | Val::Json(Value::Null))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Val::Undefined => false,
            Val::Json(Value::Null) => false,
            Val::Json(Value::Bool(b)) => *b,
            Val::Json(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Val::Json(Value::String(s)) => !s.is_empty(),
            Val::Json(_) => true,
            Val::NonFinite(f) => !f.is_nan(),
            Val::Date(_) | Val::Func(_) | Val::Global(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Val::Undefined => f64::NAN,
            Val::Json(Value::Null) => 0.0,
            Val::Json(Value::Bool(b)) => f64::from(u8::from(*b)),
            Val::Json(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
            Val::Json(Value::String(s)) => {
                let t = s.trim();
                if t.is_empty() {
                    0.0
                } else {
                    t.parse().unwrap_or(f64::NAN)
                }
            }
            Val::Json(Value::Array(items)) if items.is_empty() => 0.0,
            Val::Json(Value::Array(items)) if items.len() == 1 => Val::Json(items[0].clone()).to_number(),
            Val::NonFinite(f) => *f,
            Val::Date(d) => d.timestamp_millis() as f64,
            _ => f64::NAN,
        }
    }

    pub fn to_js_string(&self) -> String {
        match self {
            Val::Undefined => "undefined".to_string(),
            Val::Json(Value::Null) => "null".to_string(),
            Val::Json(Value::Array(items)) => items
                .iter()
                .map(|v| if v.is_null() { String::new() } else { Val::Json(v.clone()).to_js_string() })
                .collect::<Vec<_>>()
                .join(","),
            Val::Json(Value::Object(_)) => "[object Object]".to_string(),
            Val::Json(v) => display(v),
            Val::NonFinite(f) if f.is_nan() => "NaN".to_string(),
            Val::NonFinite(f) if *f > 0.0 => "Infinity".to_string(),
            Val::NonFinite(_) => "-Infinity".to_string(),
            Val::Date(d) => d.to_rfc3339_opts(SecondsFormat::Millis, true),
            Val::Func(_) => "function () { [code] }".to_string(),
            Val::Global(name) => format!("function {}() {{ [native code] }}", name),
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Val::Undefined => "undefined",
            Val::Json(Value::Bool(_)) => "boolean",
            Val::Json(Value::Number(_)) | Val::NonFinite(_) => "number",
            Val::Json(Value::String(_)) => "string",
            Val::Json(_) | Val::Date(_) => "object",
            Val::Func(_) => "function",
            Val::Global(name) if builtins::is_namespace(name) => "object",
            Val::Global(_) => "function",
        }
    }

    /// Convert to plain JSON for storage in objects/arrays or as a result.
    pub fn to_json(&self) -> R<Value> {
        match self {
            Val::Undefined | Val::NonFinite(_) => Ok(Value::Null),
            Val::Json(v) => Ok(v.clone()),
            Val::Date(d) => Ok(Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))),
            Val::Func(_) | Val::Global(_) => throw("functions cannot be stored in data"),
        }
    }
}

// ── Scopes ──────────────────────────────────────────────────────

pub(crate) type Scope = Rc<RefCell<Env>>;

pub(crate) struct Env {
    vars: HashMap<String, Binding>,
    parent: Option<Scope>,
}

struct Binding {
    value: Val,
    mutable: bool,
}

impl Env {
    pub fn root() -> Scope {
        Rc::new(RefCell::new(Env {
            vars: HashMap::new(),
            parent: None,
        }))
    }

    pub fn child(parent: &Scope) -> Scope {
        Rc::new(RefCell::new(Env {
            vars: HashMap::new(),
            parent: Some(parent.clone()),
        }))
    }
}

pub(crate) fn declare(scope: &Scope, name: &str, value: Val, mutable: bool) {
    scope
        .borrow_mut()
        .vars
        .insert(name.to_string(), Binding { value, mutable });
}

fn find_scope(scope: &Scope, name: &str) -> Option<Scope> {
    let mut current = scope.clone();
    loop {
        if current.borrow().vars.contains_key(name) {
            return Some(current);
        }
        let parent = current.borrow().parent.clone()?;
        current = parent;
    }
}

fn lookup(scope: &Scope, name: &str) -> Option<Val> {
    let owner = find_scope(scope, name)?;
    let env = owner.borrow();
    env.vars.get(name).map(|b| b.value.clone())
}

// ── Faults ──────────────────────────────────────────────────────

/// `Thrown` is catchable by `try`; `Fatal` (budget exhaustion, forbidden
/// access) always unwinds to the caller.
pub(crate) enum Fault {
    Thrown(Val),
    Fatal(WeftError),
}

pub(crate) type R<T> = std::result::Result<T, Fault>;

pub(crate) fn check_string_len(bytes: usize) -> R<()> {
    if bytes > MAX_STRING_BYTES {
        return throw("RangeError: Invalid string length");
    }
    Ok(())
}

pub(crate) fn check_array_len(len: usize) -> R<()> {
    if len > MAX_ARRAY_LEN {
        return throw("RangeError: Invalid array length");
    }
    Ok(())
}

pub(crate) fn throw<T>(msg: impl Into<String>) -> R<T> {
    Err(Fault::Thrown(Val::str(msg)))
}

fn forbid(key: &str) -> R<()> {
    check_identifier(key).map_err(Fault::Fatal)
}

enum Flow {
    Normal,
    Return(Val),
    Break,
    Continue,
}

enum Key {
    Prop(String),
    Idx(usize),
}

// ── Interpreter ─────────────────────────────────────────────────

pub(crate) struct Interpreter {
    limits: Limits,
    ops: u64,
    depth: usize,
    nesting: usize,
    deadline: Instant,
}

impl Interpreter {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            ops: 0,
            depth: 0,
            nesting: 0,
            deadline: Instant::now() + limits.timeout,
        }
    }

    pub fn operations(&self) -> u64 {
        self.ops
    }

    fn tick(&mut self) -> R<()> {
        self.ops += 1;
        if self.ops > self.limits.max_operations {
            return Err(Fault::Fatal(WeftError::Script(format!(
                "operation budget of {} exceeded",
                self.limits.max_operations
            ))));
        }
        if self.ops % 64 == 0 && Instant::now() >= self.deadline {
            return Err(Fault::Fatal(WeftError::ScriptTimeout(
                self.limits.timeout.as_millis() as u64,
            )));
        }
        Ok(())
    }

    /// Run top-level statements. The result is the `return` value, or the
    /// value of the last expression statement when nothing returns.
    pub fn run_program(&mut self, stmts: &[Stmt], scope: &Scope) -> R<Val> {
        let mut completion = Val::Undefined;
        for stmt in stmts {
            if let Stmt::Expr(e) = stmt {
                completion = self.eval(e, scope)?;
                continue;
            }
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                Flow::Return(v) => return Ok(v),
                Flow::Break | Flow::Continue => return throw("SyntaxError: Illegal break statement"),
            }
        }
        Ok(completion)
    }

    fn exec_block(&mut self, stmts: &[Stmt], scope: &Scope) -> R<Flow> {
        for stmt in stmts {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn enter(&mut self) -> R<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            self.nesting -= 1;
            return Err(Fault::Fatal(WeftError::Script(format!(
                "script nests deeper than {} levels",
                MAX_NESTING
            ))));
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Scope) -> R<Flow> {
        self.enter()?;
        let flow = self.exec_stmt(stmt, scope);
        self.nesting -= 1;
        flow
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Scope) -> R<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Let { mutable, decls } => {
                for (pattern, init) in decls {
                    let value = match init {
                        Some(e) => self.eval(e, scope)?,
                        None => Val::Undefined,
                    };
                    self.bind(scope, pattern, value, *mutable)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Expr(e) => {
                self.eval(e, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::If { cond, then, otherwise } => {
                if self.eval(cond, scope)?.truthy() {
                    self.exec(then, scope)
                } else if let Some(other) = otherwise {
                    self.exec(other, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Block(stmts) => self.exec_block(stmts, &Env::child(scope)),
            Stmt::ForOf { mutable, pattern, iterable, body } => {
                let items = match self.eval(iterable, scope)? {
                    Val::Json(Value::Array(items)) => items,
                    Val::Json(Value::String(s)) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    other => return throw(format!("TypeError: {} is not iterable", other.type_of())),
                };
                for item in items {
                    let iter_scope = Env::child(scope);
                    self.bind(&iter_scope, pattern, Val::Json(item), *mutable)?;
                    match self.exec(body, &iter_scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForIn { mutable, name, object, body } => {
                let keys: Vec<String> = match self.eval(object, scope)? {
                    Val::Json(Value::Object(map)) => map.keys().cloned().collect(),
                    Val::Json(Value::Array(items)) => (0..items.len()).map(|i| i.to_string()).collect(),
                    _ => Vec::new(),
                };
                for key in keys {
                    let iter_scope = Env::child(scope);
                    declare(&iter_scope, name, Val::str(key), *mutable);
                    match self.exec(body, &iter_scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { init, cond, update, body } => {
                let loop_scope = Env::child(scope);
                if let Some(init) = init {
                    self.exec(init, &loop_scope)?;
                }
                loop {
                    if let Some(cond) = cond {
                        if !self.eval(cond, &loop_scope)?.truthy() {
                            break;
                        }
                    }
                    match self.exec(body, &loop_scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, &loop_scope)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::While { cond, body } => {
                while self.eval(cond, scope)?.truthy() {
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => Ok(Flow::Return(match value {
                Some(e) => self.eval(e, scope)?,
                None => Val::Undefined,
            })),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Throw(e) => Err(Fault::Thrown(self.eval(e, scope)?)),
            Stmt::Try { body, param, handler, finalizer } => {
                let mut result = self.exec_block(body, &Env::child(scope));
                if let Some(handler) = handler {
                    if let Err(Fault::Thrown(thrown)) = result {
                        let catch_scope = Env::child(scope);
                        if let Some(param) = param {
                            self.bind(&catch_scope, param, thrown, true)?;
                        }
                        result = self.exec_block(handler, &catch_scope);
                    }
                }
                if let Some(finalizer) = finalizer {
                    if let Flow::Return(v) = self.exec_block(finalizer, &Env::child(scope))? {
                        return Ok(Flow::Return(v));
                    }
                }
                result
            }
        }
    }

    fn bind(&mut self, scope: &Scope, pattern: &Pattern, value: Val, mutable: bool) -> R<()> {
        match pattern {
            Pattern::Name(name) => declare(scope, name, value, mutable),
            Pattern::Object { props, rest } => {
                let map = match value {
                    Val::Json(Value::Object(map)) => map,
                    v if v.is_nullish() => {
                        return throw(format!("TypeError: Cannot destructure '{}'", v.to_js_string()))
                    }
                    _ => Map::new(),
                };
                for (key, local) in props {
                    forbid(key)?;
                    let v = map.get(key).cloned().map(Val::Json).unwrap_or(Val::Undefined);
                    declare(scope, local, v, mutable);
                }
                if let Some(rest) = rest {
                    let remaining: Map<String, Value> = map
                        .into_iter()
                        .filter(|(k, _)| !props.iter().any(|(key, _)| key == k))
                        .collect();
                    declare(scope, rest, Val::Json(Value::Object(remaining)), mutable);
                }
            }
            Pattern::Array { items, rest } => {
                let list = match value {
                    Val::Json(Value::Array(list)) => list,
                    Val::Json(Value::String(s)) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    other => return throw(format!("TypeError: {} is not iterable", other.type_of())),
                };
                for (i, name) in items.iter().enumerate() {
                    if let Some(name) = name {
                        let v = list.get(i).cloned().map(Val::Json).unwrap_or(Val::Undefined);
                        declare(scope, name, v, mutable);
                    }
                }
                if let Some(rest) = rest {
                    let tail = list.into_iter().skip(items.len()).collect();
                    declare(scope, rest, Val::Json(Value::Array(tail)), mutable);
                }
            }
        }
        Ok(())
    }

    pub fn eval(&mut self, expr: &Expr, scope: &Scope) -> R<Val> {
        self.enter()?;
        let value = self.eval_expr(expr, scope);
        self.nesting -= 1;
        value
    }

    fn eval_expr(&mut self, expr: &Expr, scope: &Scope) -> R<Val> {
        self.tick()?;
        match expr {
            Expr::Literal(v) => Ok(Val::Json(v.clone())),
            Expr::Undefined => Ok(Val::Undefined),
            Expr::Ident(name) => match lookup(scope, name) {
                Some(v) => Ok(v),
                None => throw(format!("ReferenceError: {} is not defined", name)),
            },
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TplPart::Text(t) => out.push_str(t),
                        TplPart::Expr(e) => {
                            let piece = self.eval(e, scope)?.to_js_string();
                            check_string_len(out.len() + piece.len())?;
                            out.push_str(&piece);
                        }
                    }
                }
                Ok(Val::str(out))
            }
            Expr::Array(items) => {
                let values = self.spread_items(items, scope)?;
                let json = values.iter().map(Val::to_json).collect::<R<Vec<_>>>()?;
                Ok(Val::Json(Value::Array(json)))
            }
            Expr::Object(props) => {
                let mut map = Map::new();
                for prop in props {
                    match prop {
                        Prop::Pair(key, value) => {
                            let key = match key {
                                PropKey::Static(k) => k.clone(),
                                PropKey::Computed(e) => self.eval(e, scope)?.to_js_string(),
                            };
                            forbid(&key)?;
                            let value = self.eval(value, scope)?;
                            if !matches!(value, Val::Undefined) {
                                map.insert(key, value.to_json()?);
                            }
                        }
                        Prop::Spread(e) => match self.eval(e, scope)? {
                            Val::Json(Value::Object(other)) => map.extend(other),
                            Val::Json(Value::Array(items)) => {
                                map.extend(items.into_iter().enumerate().map(|(i, v)| (i.to_string(), v)))
                            }
                            _ => {}
                        },
                    }
                }
                Ok(Val::Json(Value::Object(map)))
            }
            Expr::Member { object, property, optional } => {
                let target = self.eval(object, scope)?;
                if *optional && target.is_nullish() {
                    return Ok(Val::Undefined);
                }
                get_property(&target, property)
            }
            Expr::Index { object, index, optional } => {
                let target = self.eval(object, scope)?;
                if *optional && target.is_nullish() {
                    return Ok(Val::Undefined);
                }
                let key = self.eval(index, scope)?;
                get_index(&target, &key)
            }
            Expr::Call { callee, args, optional } => self.call_expr(callee, args, *optional, scope),
            Expr::New { class, args } => {
                let args = self.spread_items(args, scope)?;
                builtins::construct(class, args)
            }
            Expr::Unary(op, operand) => {
                if let (UnaryOp::TypeOf, Expr::Ident(name)) = (op, operand.as_ref()) {
                    if lookup(scope, name).is_none() {
                        return Ok(Val::str("undefined"));
                    }
                }
                let v = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Val::bool(!v.truthy()),
                    UnaryOp::Neg => Val::from_f64(-v.to_number()),
                    UnaryOp::Plus => Val::from_f64(v.to_number()),
                    UnaryOp::TypeOf => Val::str(v.type_of()),
                })
            }
            Expr::Binary(op, left, right) => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                binary(*op, &l, &r)
            }
            Expr::Logical(op, left, right) => {
                let l = self.eval(left, scope)?;
                let short = match op {
                    LogicOp::And => !l.truthy(),
                    LogicOp::Or => l.truthy(),
                    LogicOp::Nullish => !l.is_nullish(),
                };
                if short {
                    Ok(l)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional(cond, then, otherwise) => {
                if self.eval(cond, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Assign { target, op, value } => {
                let new = match op {
                    Some(op) => {
                        let current = self.eval(target, scope)?;
                        let rhs = self.eval(value, scope)?;
                        binary(*op, &current, &rhs)?
                    }
                    None => self.eval(value, scope)?,
                };
                self.assign(target, new.clone(), scope)?;
                Ok(new)
            }
            Expr::Update { target, delta, prefix } => {
                let old = self.eval(target, scope)?.to_number();
                let new = Val::from_f64(old + delta);
                self.assign(target, new.clone(), scope)?;
                Ok(if *prefix { new } else { Val::from_f64(old) })
            }
            Expr::Function(def) => Ok(Val::Func(Rc::new(Closure {
                def: def.clone(),
                env: scope.clone(),
            }))),
        }
    }

    fn spread_items(&mut self, items: &[Item], scope: &Scope) -> R<Vec<Val>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Item::Expr(e) => out.push(self.eval(e, scope)?),
                Item::Spread(e) => match self.eval(e, scope)? {
                    Val::Json(Value::Array(list)) => {
                        check_array_len(out.len() + list.len())?;
                        out.extend(list.into_iter().map(Val::Json))
                    }
                    Val::Json(Value::String(s)) => out.extend(s.chars().map(|c| Val::str(c.to_string()))),
                    other => return throw(format!("TypeError: {} is not iterable", other.type_of())),
                },
            }
        }
        Ok(out)
    }

    fn call_expr(&mut self, callee: &Expr, args: &[Item], optional: bool, scope: &Scope) -> R<Val> {
        let (receiver_expr, receiver, method) = match callee {
            Expr::Member { object, property, optional: member_opt } => {
                let recv = self.eval(object, scope)?;
                if (*member_opt || optional) && recv.is_nullish() {
                    return Ok(Val::Undefined);
                }
                (object.as_ref(), recv, property.clone())
            }
            Expr::Index { object, index, optional: index_opt } => {
                let recv = self.eval(object, scope)?;
                if (*index_opt || optional) && recv.is_nullish() {
                    return Ok(Val::Undefined);
                }
                let key = self.eval(index, scope)?;
                match key {
                    Val::Json(Value::String(name)) => {
                        forbid(&name)?;
                        (object.as_ref(), recv, name)
                    }
                    other => {
                        let f = get_index(&recv, &other)?;
                        let args = self.spread_items(args, scope)?;
                        return self.call_value(&f, args);
                    }
                }
            }
            _ => {
                let f = self.eval(callee, scope)?;
                if optional && f.is_nullish() {
                    return Ok(Val::Undefined);
                }
                let args = self.spread_items(args, scope)?;
                return self.call_value(&f, args);
            }
        };

        let args = self.spread_items(args, scope)?;
        if let Val::Json(Value::Array(items)) = &receiver {
            if builtins::is_mutating_array_method(&method) {
                let mut items = items.clone();
                let result = builtins::call_array_mut(self, &mut items, &method, args)?;
                if is_assignable(receiver_expr) {
                    self.write_back(receiver_expr, Val::Json(Value::Array(items)), scope)?;
                }
                return Ok(result);
            }
        }
        builtins::call_method(self, receiver, &method, args)
    }

    pub fn call_value(&mut self, f: &Val, args: Vec<Val>) -> R<Val> {
        match f {
            Val::Func(closure) => {
                self.depth += 1;
                if self.depth > MAX_CALL_DEPTH {
                    self.depth -= 1;
                    return Err(Fault::Fatal(WeftError::Script(
                        "maximum call stack size exceeded".into(),
                    )));
                }
                let result = self.invoke(closure, args);
                self.depth -= 1;
                result
            }
            Val::Global(name) => builtins::call_global(self, name, args),
            other => throw(format!("TypeError: {} is not a function", other.type_of())),
        }
    }

    fn invoke(&mut self, closure: &Closure, args: Vec<Val>) -> R<Val> {
        let scope = Env::child(&closure.env);
        let mut args = args.into_iter();
        for param in &closure.def.params {
            let value = args.next().unwrap_or(Val::Undefined);
            self.bind(&scope, param, value, true)?;
        }
        match &closure.def.body {
            FunctionBody::Expr(e) => self.eval(e, &scope),
            FunctionBody::Block(stmts) => match self.exec_block(stmts, &scope)? {
                Flow::Return(v) => Ok(v),
                _ => Ok(Val::Undefined),
            },
        }
    }

    /// Store the result of an in-place method. `const xs = []; xs.push(1)`
    /// is legal, so the binding's mutability is not consulted.
    fn write_back(&mut self, target: &Expr, value: Val, scope: &Scope) -> R<()> {
        if let Expr::Ident(name) = target {
            if let Some(owner) = find_scope(scope, name) {
                if let Some(binding) = owner.borrow_mut().vars.get_mut(name) {
                    binding.value = value;
                }
            }
            return Ok(());
        }
        self.assign(target, value, scope)
    }

    fn assign(&mut self, target: &Expr, value: Val, scope: &Scope) -> R<()> {
        if let Expr::Ident(name) = target {
            let Some(owner) = find_scope(scope, name) else {
                return throw(format!("ReferenceError: {} is not defined", name));
            };
            let mut env = owner.borrow_mut();
            let Some(binding) = env.vars.get_mut(name) else {
                return throw(format!("ReferenceError: {} is not defined", name));
            };
            if !binding.mutable {
                return throw("TypeError: Assignment to constant variable.");
            }
            binding.value = value;
            return Ok(());
        }

        let mut keys = Vec::new();
        let root = self.lvalue_path(target, scope, &mut keys)?;
        let json = value.to_json()?;
        let Some(owner) = find_scope(scope, &root) else {
            return throw(format!("ReferenceError: {} is not defined", root));
        };
        let mut env = owner.borrow_mut();
        let Some(binding) = env.vars.get_mut(&root) else {
            return throw(format!("ReferenceError: {} is not defined", root));
        };
        let Val::Json(current) = &mut binding.value else {
            return throw(format!("TypeError: Cannot set properties of {}", root));
        };
        set_in(current, &keys, json)
    }

    /// Resolve `a.b[0].c` into its root binding name and key path.
    fn lvalue_path(&mut self, target: &Expr, scope: &Scope, keys: &mut Vec<Key>) -> R<String> {
        match target {
            Expr::Ident(name) => Ok(name.clone()),
            Expr::Member { object, property, .. } => {
                let root = self.lvalue_path(object, scope, keys)?;
                keys.push(Key::Prop(property.clone()));
                Ok(root)
            }
            Expr::Index { object, index, .. } => {
                let root = self.lvalue_path(object, scope, keys)?;
                let key = self.eval(index, scope)?;
                match &key {
                    Val::Json(Value::Number(n)) if n.as_u64().is_some() => {
                        keys.push(Key::Idx(n.as_u64().map_or(0, |i| i as usize)))
                    }
                    other => {
                        let name = other.to_js_string();
                        forbid(&name)?;
                        keys.push(Key::Prop(name));
                    }
                }
                Ok(root)
            }
            _ => throw("SyntaxError: Invalid assignment target"),
        }
    }
}

fn is_assignable(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(_) => true,
        Expr::Member { object, .. } | Expr::Index { object, .. } => is_assignable(object),
        _ => false,
    }
}

fn set_in(current: &mut Value, keys: &[Key], value: Value) -> R<()> {
    let Some((first, rest)) = keys.split_first() else {
        *current = value;
        return Ok(());
    };
    let slot = match (first, current) {
        (Key::Prop(k), Value::Object(map)) => {
            if rest.is_empty() {
                map.insert(k.clone(), value);
                return Ok(());
            }
            match map.get_mut(k) {
                Some(slot) => slot,
                None => return throw(format!("TypeError: Cannot set properties of undefined (setting '{}')", k)),
            }
        }
        (Key::Idx(i), Value::Array(items)) => {
            if rest.is_empty() {
                if *i >= items.len() {
                    items.resize(*i + 1, Value::Null);
                }
                items[*i] = value;
                return Ok(());
            }
            match items.get_mut(*i) {
                Some(slot) => slot,
                None => return throw(format!("TypeError: Cannot set properties of undefined (setting '{}')", i)),
            }
        }
        (Key::Idx(i), Value::Object(map)) => {
            let k = i.to_string();
            if rest.is_empty() {
                map.insert(k, value);
                return Ok(());
            }
            match map.get_mut(&k) {
                Some(slot) => slot,
                None => return throw(format!("TypeError: Cannot set properties of undefined (setting '{}')", k)),
            }
        }
        (key, other) => {
            let name = match key {
                Key::Prop(k) => k.clone(),
                Key::Idx(i) => i.to_string(),
            };
            return throw(format!(
                "TypeError: Cannot set properties of {} (setting '{}')",
                Val::Json(other.clone()).to_js_string(),
                name
            ));
        }
    };
    set_in(slot, rest, value)
}

pub(crate) fn get_property(target: &Val, prop: &str) -> R<Val> {
    forbid(prop)?;
    Ok(match target {
        Val::Json(Value::Object(map)) => map.get(prop).cloned().map(Val::Json).unwrap_or(Val::Undefined),
        Val::Json(Value::Array(items)) => match prop {
            "length" => Val::Json(Value::from(items.len())),
            _ => match prop.parse::<usize>() {
                Ok(i) => items.get(i).cloned().map(Val::Json).unwrap_or(Val::Undefined),
                Err(_) => Val::Undefined,
            },
        },
        Val::Json(Value::String(s)) => match prop {
            "length" => Val::Json(Value::from(s.chars().count())),
            _ => match prop.parse::<usize>() {
                Ok(i) => s.chars().nth(i).map(|c| Val::str(c.to_string())).unwrap_or(Val::Undefined),
                Err(_) => Val::Undefined,
            },
        },
        Val::Undefined | Val::Json(Value::Null) => {
            return throw(format!(
                "TypeError: Cannot read properties of {} (reading '{}')",
                target.to_js_string(),
                prop
            ))
        }
        Val::Global(ns) => builtins::global_property(ns, prop).unwrap_or(Val::Undefined),
        _ => Val::Undefined,
    })
}

pub(crate) fn get_index(target: &Val, key: &Val) -> R<Val> {
    match key {
        Val::Json(Value::Number(n)) => match n.as_f64() {
            Some(f) if f >= 0.0 && f.fract() == 0.0 => get_property(target, &(f as usize).to_string()),
            _ => get_property(target, &key.to_js_string()),
        },
        other => get_property(target, &other.to_js_string()),
    }
}

pub(crate) fn loose_equals(l: &Val, r: &Val) -> bool {
    match (l, r) {
        (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
        (Val::Json(a), Val::Json(b)) => loose_eq(a, b),
        (Val::NonFinite(a), Val::NonFinite(b)) => a == b,
        (Val::Date(a), Val::Date(b)) => a == b,
        (a, b) => {
            let (x, y) = (a.to_number(), b.to_number());
            !x.is_nan() && x == y
        }
    }
}

pub(crate) fn strict_equals(l: &Val, r: &Val) -> bool {
    match (l, r) {
        (Val::Undefined, Val::Undefined) => true,
        (Val::Json(Value::Number(a)), Val::Json(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Val::Json(a), Val::Json(b)) => a == b,
        (Val::NonFinite(a), Val::NonFinite(b)) => a == b,
        (Val::Date(a), Val::Date(b)) => a == b,
        (Val::Func(a), Val::Func(b)) => Rc::ptr_eq(a, b),
        (Val::Global(a), Val::Global(b)) => a == b,
        _ => false,
    }
}

fn is_stringish(v: &Val) -> bool {
    matches!(
        v,
        Val::Json(Value::String(_)) | Val::Json(Value::Array(_)) | Val::Json(Value::Object(_)) | Val::Date(_)
    )
}

fn binary(op: BinOp, l: &Val, r: &Val) -> R<Val> {
    Ok(match op {
        BinOp::Add if is_stringish(l) || is_stringish(r) => {
            let (left, right) = (l.to_js_string(), r.to_js_string());
            check_string_len(left.len() + right.len())?;
            Val::str(left + &right)
        }
        BinOp::Add => Val::from_f64(l.to_number() + r.to_number()),
        BinOp::Sub => Val::from_f64(l.to_number() - r.to_number()),
        BinOp::Mul => Val::from_f64(l.to_number() * r.to_number()),
        BinOp::Div => Val::from_f64(l.to_number() / r.to_number()),
        BinOp::Rem => Val::from_f64(l.to_number() % r.to_number()),
        BinOp::Pow => Val::from_f64(l.to_number().powf(r.to_number())),
        BinOp::Eq => Val::bool(loose_equals(l, r)),
        BinOp::Ne => Val::bool(!loose_equals(l, r)),
        BinOp::StrictEq => Val::bool(strict_equals(l, r)),
        BinOp::StrictNe => Val::bool(!strict_equals(l, r)),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let ord = match (l, r) {
                (Val::Json(Value::String(a)), Val::Json(Value::String(b))) => Some(a.cmp(b)),
                _ => l.to_number().partial_cmp(&r.to_number()),
            };
            Val::bool(ord.is_some_and(|o| match op {
                BinOp::Lt => o.is_lt(),
                BinOp::Gt => o.is_gt(),
                BinOp::Le => o.is_le(),
                _ => o.is_ge(),
            }))
        }
        BinOp::In => {
            let key = l.to_js_string();
            Val::bool(match r {
                Val::Json(Value::Object(map)) => map.contains_key(&key),
                Val::Json(Value::Array(items)) => key.parse::<usize>().is_ok_and(|i| i < items.len()),
                other => {
                    return throw(format!(
                        "TypeError: Cannot use 'in' operator to search for '{}' in {}",
                        key,
                        other.to_js_string()
                    ))
                }
            })
        }
    })
}
