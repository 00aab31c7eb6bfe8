use std::rc::Rc;

#[derive(Debug, Clone)]
pub(crate) enum Stmt {
    Let {
        mutable: bool,
        decls: Vec<(Pattern, Option<Expr>)>,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    ForOf {
        mutable: bool,
        pattern: Pattern,
        iterable: Expr,
        body: Box<Stmt>,
    },
    ForIn {
        mutable: bool,
        name: String,
        object: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Return(Option<Expr>),
    Break,
    Continue,
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        param: Option<Pattern>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    Name(String),
    /// `{ a, b: local, ...rest }`
    Object {
        props: Vec<(String, String)>,
        rest: Option<String>,
    },
    /// `[a, , b, ...rest]`
    Array {
        items: Vec<Option<String>>,
        rest: Option<String>,
    },
}

#[derive(Debug)]
pub(crate) struct FunctionDef {
    pub params: Vec<Pattern>,
    pub body: FunctionBody,
}

#[derive(Debug)]
pub(crate) enum FunctionBody {
    Expr(Expr),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone)]
pub(crate) enum Item {
    Expr(Expr),
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub(crate) enum PropKey {
    Static(String),
    Computed(Expr),
}

#[derive(Debug, Clone)]
pub(crate) enum Prop {
    Pair(PropKey, Expr),
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub(crate) enum TplPart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Gt,
    Le,
    Ge,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LogicOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(serde_json::Value),
    Undefined,
    Ident(String),
    Template(Vec<TplPart>),
    Array(Vec<Item>),
    Object(Vec<Prop>),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Item>,
        optional: bool,
    },
    New {
        class: String,
        args: Vec<Item>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Logical(LogicOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `target op= value`; `op` is `None` for plain assignment.
    Assign {
        target: Box<Expr>,
        op: Option<BinOp>,
        value: Box<Expr>,
    },
    Update {
        target: Box<Expr>,
        delta: f64,
        prefix: bool,
    },
    Function(Rc<FunctionDef>),
}
