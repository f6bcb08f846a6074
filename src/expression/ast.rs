use std::{ops::Range, rc::Rc};

use parse_display::Display;

use crate::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub kind: AstKind,
    /// Byte range in the source text.
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstKind {
    Literal(Value),
    Identifier(Rc<str>),
    Member {
        object: Box<Ast>,
        property: Rc<str>,
        optional: bool,
    },
    Index {
        object: Box<Ast>,
        index: Box<Ast>,
        optional: bool,
    },
    Call {
        callee: Box<Ast>,
        args: Vec<Ast>,
    },
    New {
        callee: Box<Ast>,
        args: Vec<Ast>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Ast>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Ast>,
        right: Box<Ast>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Ast>,
        right: Box<Ast>,
    },
    Conditional {
        test: Box<Ast>,
        consequent: Box<Ast>,
        alternate: Box<Ast>,
    },
    Sequence(Vec<Ast>),
    Template {
        quasis: Vec<Rc<str>>,
        exprs: Vec<Ast>,
    },
    Array(Vec<Ast>),
    Object(Vec<(Rc<str>, Ast)>),
}

impl AstKind {
    pub fn name(&self) -> &'static str {
        match self {
            AstKind::Literal(_) => "literal",
            AstKind::Identifier(_) => "identifier",
            AstKind::Member { .. } => "member",
            AstKind::Index { .. } => "index",
            AstKind::Call { .. } => "call",
            AstKind::New { .. } => "new",
            AstKind::Unary { .. } => "unary",
            AstKind::Binary { .. } => "binary",
            AstKind::Logical { .. } => "logical",
            AstKind::Conditional { .. } => "conditional",
            AstKind::Sequence(_) => "sequence",
            AstKind::Template { .. } => "template",
            AstKind::Array(_) => "array",
            AstKind::Object(_) => "object",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum UnaryOp {
    #[display("-")]
    Neg,
    #[display("+")]
    Plus,
    #[display("!")]
    Not,
    #[display("~")]
    BitNot,
    #[display("typeof")]
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BinaryOp {
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Rem,
    #[display("**")]
    Exp,
    #[display("&")]
    BitAnd,
    #[display("|")]
    BitOr,
    #[display("^")]
    BitXor,
    #[display("<<")]
    Shl,
    #[display(">>")]
    Shr,
    #[display(">>>")]
    UShr,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("===")]
    StrictEq,
    #[display("!==")]
    StrictNe,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    #[display("in")]
    In,
    #[display("instanceof")]
    InstanceOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LogicalOp {
    #[display("&&")]
    And,
    #[display("||")]
    Or,
    #[display("??")]
    Nullish,
}
