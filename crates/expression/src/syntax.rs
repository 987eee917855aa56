//! Untyped syntax tree produced by the parser.
//!
//! Still permissive: identifiers, loose equality and arbitrary callees are
//! accepted here and only checked when lowered to [`crate::ast::Node`].

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
}

impl UnaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Negate => "-",
            UnaryOp::Plus => "+",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Match,
    NotMatch,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNe => "!==",
            BinaryOp::LooseEq => "==",
            BinaryOp::LooseNe => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Match => "=~",
            BinaryOp::NotMatch => "!~",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Syntax {
    Number(f64),
    String(String),
    Identifier(String),
    Variable(String),
    JsonPath(String),
    Array(Vec<Syntax>),
    Unary {
        op: UnaryOp,
        operand: Box<Syntax>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Syntax>,
        right: Box<Syntax>,
    },
    Conditional {
        test: Box<Syntax>,
        consequent: Box<Syntax>,
        alternate: Box<Syntax>,
    },
    /// `object.name` (property is an identifier) or `object[expr]`.
    Member {
        object: Box<Syntax>,
        property: Box<Syntax>,
        computed: bool,
    },
    Call {
        callee: Box<Syntax>,
        args: Vec<Syntax>,
    },
}
