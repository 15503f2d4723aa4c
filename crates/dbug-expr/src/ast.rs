//! Untyped parse tree produced by [`crate::parser`] and consumed by [`crate::compile`].
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

/// A type as written in source: `int`, `java.lang.String`, `List<String>[]`.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeName {
    pub name: String,
    pub args: Vec<TypeName>,
    pub dims: usize,
}

impl TypeName {
    pub fn simple(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
            dims: 0,
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.args.is_empty() {
            f.write_str("<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            f.write_str(">")?;
        }
        for _ in 0..self.dims {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    BitNot,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
            UnaryOp::BitNot => "~",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    UShr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Literal(Literal),
    Name(String),
    Field {
        target: Box<Node>,
        name: String,
    },
    /// `target.name(args)`; a call without a receiver has `target: None`.
    Call {
        target: Option<Box<Node>>,
        name: String,
        args: Vec<Node>,
    },
    Index {
        array: Box<Node>,
        index: Box<Node>,
    },
    New {
        ty: TypeName,
        args: Vec<Node>,
    },
    /// `new T[a][b][]` (sized) or `new T[][]{...}` (initialized); `element.dims` is zero and the
    /// total dimension count is `dims.len() + extra_dims`.
    NewArray {
        element: TypeName,
        dims: Vec<Node>,
        extra_dims: usize,
        init: Option<Vec<Node>>,
    },
    /// A nested `{a, b}` inside an array initializer.
    ArrayInit(Vec<Node>),
    Cast {
        ty: TypeName,
        expr: Box<Node>,
    },
    InstanceOf {
        expr: Box<Node>,
        ty: TypeName,
    },
    Conditional {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    /// The dotted name spelled by a chain of plain names and field accesses, e.g. `java.lang.Math`.
    pub fn qualified_name(&self) -> Option<String> {
        match self {
            Node::Name(name) => Some(name.clone()),
            Node::Field { target, name } => {
                target.qualified_name().map(|prefix| format!("{prefix}.{name}"))
            }
            _ => None,
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Node]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Literal(Literal::Null) => f.write_str("null"),
            Node::Literal(Literal::Bool(v)) => write!(f, "{v}"),
            Node::Literal(Literal::Char(c)) => write!(f, "{c:?}"),
            Node::Literal(Literal::Int(v)) => write!(f, "{v}"),
            Node::Literal(Literal::Long(v)) => write!(f, "{v}L"),
            Node::Literal(Literal::Float(v)) => write!(f, "{v:?}f"),
            Node::Literal(Literal::Double(v)) => write!(f, "{v:?}"),
            Node::Literal(Literal::Str(s)) => write!(f, "{s:?}"),
            Node::Name(name) => f.write_str(name),
            Node::Field { target, name } => write!(f, "{target}.{name}"),
            Node::Call { target, name, args } => {
                if let Some(target) = target {
                    write!(f, "{target}.")?;
                }
                write!(f, "{name}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Node::Index { array, index } => write!(f, "{array}[{index}]"),
            Node::New { ty, args } => {
                write!(f, "new {ty}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Node::NewArray {
                element,
                dims,
                extra_dims,
                init,
            } => {
                write!(f, "new {element}")?;
                for dim in dims {
                    write!(f, "[{dim}]")?;
                }
                for _ in 0..*extra_dims {
                    f.write_str("[]")?;
                }
                if let Some(init) = init {
                    f.write_str("{")?;
                    write_list(f, init)?;
                    f.write_str("}")?;
                }
                Ok(())
            }
            Node::ArrayInit(items) => {
                f.write_str("{")?;
                write_list(f, items)?;
                f.write_str("}")
            }
            Node::Cast { ty, expr } => write!(f, "(({ty}) {expr})"),
            Node::InstanceOf { expr, ty } => write!(f, "({expr} instanceof {ty})"),
            Node::Conditional {
                cond,
                then,
                otherwise,
            } => write!(f, "({cond} ? {then} : {otherwise})"),
            Node::Unary { op, expr } => write!(f, "{}{expr}", op.symbol()),
            Node::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
        }
    }
}
