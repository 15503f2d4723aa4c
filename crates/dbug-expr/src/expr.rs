//! Typed, resolved expression trees.
use crate::ast::{BinaryOp, UnaryOp};
use crate::model::{ConstructorInfo, FieldInfo, MethodInfo, ValueModel};
use crate::types::{Primitive, Type};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// What a resolved identifier reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// The whole host value the anchor is bound to.
    Host,
    Static,
    Dynamic,
    Event,
    ConfigVariable,
    EventVariable,
}

/// How a binary operator interprets its operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operands {
    /// Both operands promoted to this primitive.
    Numeric(Primitive),
    Boolean,
    /// String concatenation.
    Concat,
    /// `==`/`!=` on references.
    Reference,
}

/// A runtime type check against `ty`, carrying the model that knows the class hierarchy.
#[derive(Clone)]
pub struct TypeTest {
    pub ty: Type,
    pub(crate) model: Arc<dyn ValueModel>,
}

impl TypeTest {
    pub fn new(ty: Type, model: Arc<dyn ValueModel>) -> Self {
        Self { ty, model }
    }

    pub fn model(&self) -> &dyn ValueModel {
        self.model.as_ref()
    }
}

impl PartialEq for TypeTest {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty
    }
}

impl fmt::Debug for TypeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTest({})", self.ty)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Constant(Value),
    Reference {
        kind: RefKind,
        index: usize,
        name: Arc<str>,
    },
    /// A type in value position; only meaningful as the root of a static member access.
    TypeRef,
    FieldAccess {
        target: Option<Box<Expression>>,
        field: FieldInfo,
    },
    MethodCall {
        target: Option<Box<Expression>>,
        method: MethodInfo,
        args: Vec<Expression>,
    },
    ConstructorCall {
        constructor: ConstructorInfo,
        args: Vec<Expression>,
    },
    ArrayAccess {
        array: Box<Expression>,
        index: Box<Expression>,
    },
    /// `new T[a][b]`: the expression type is the full array type.
    NewArray {
        dims: Vec<Expression>,
    },
    /// `new T[]{a, b}` or trailing variable-arity arguments.
    ArrayLiteral {
        items: Vec<Expression>,
    },
    Conditional {
        cond: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        operands: Operands,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    /// Conversion to the expression's type: numeric conversion, unboxing or a checked cast.
    Cast {
        expr: Box<Expression>,
        test: TypeTest,
    },
    InstanceOf {
        expr: Box<Expression>,
        test: TypeTest,
    },
    /// `expr != null`, produced for type tests that can only fail on `null`.
    NotNull(Box<Expression>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    ty: Type,
    kind: ExprKind,
}

impl Expression {
    pub fn new(ty: Type, kind: ExprKind) -> Self {
        Self { ty, kind }
    }

    pub fn constant(ty: Type, value: Value) -> Self {
        Self::new(ty, ExprKind::Constant(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::constant(Type::boolean(), Value::Bool(value))
    }

    pub fn reference(ty: Type, kind: RefKind, index: usize, name: &str) -> Self {
        Self::new(
            ty,
            ExprKind::Reference {
                kind,
                index,
                name: Arc::from(name),
            },
        )
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match &self.kind {
            ExprKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }

    /// Calls `visit` on every reference in the tree.
    pub fn for_each_reference(&self, visit: &mut dyn FnMut(RefKind, usize)) {
        if let ExprKind::Reference { kind, index, .. } = &self.kind {
            visit(*kind, *index);
        }
        self.for_each_child(&mut |child| child.for_each_reference(visit));
    }

    pub(crate) fn for_each_child(&self, visit: &mut dyn FnMut(&Expression)) {
        match &self.kind {
            ExprKind::Constant(_) | ExprKind::Reference { .. } | ExprKind::TypeRef => {}
            ExprKind::FieldAccess { target, .. } => {
                if let Some(target) = target {
                    visit(target);
                }
            }
            ExprKind::MethodCall { target, args, .. } => {
                if let Some(target) = target {
                    visit(target);
                }
                args.iter().for_each(|arg| visit(arg));
            }
            ExprKind::ConstructorCall { args, .. } => args.iter().for_each(|arg| visit(arg)),
            ExprKind::ArrayAccess { array, index } => {
                visit(array);
                visit(index);
            }
            ExprKind::NewArray { dims } => dims.iter().for_each(|dim| visit(dim)),
            ExprKind::ArrayLiteral { items } => items.iter().for_each(|item| visit(item)),
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                visit(cond);
                visit(then);
                visit(otherwise);
            }
            ExprKind::Binary { left, right, .. } => {
                visit(left);
                visit(right);
            }
            ExprKind::Unary { expr, .. }
            | ExprKind::Cast { expr, .. }
            | ExprKind::InstanceOf { expr, .. }
            | ExprKind::NotNull(expr) => visit(expr),
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expression]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Constant(Value::Str(s)) => write!(f, "{:?}", &**s),
            ExprKind::Constant(Value::Char(c)) => write!(f, "{c:?}"),
            ExprKind::Constant(value) => write!(f, "{value}"),
            ExprKind::Reference { name, .. } => f.write_str(name),
            ExprKind::TypeRef => write!(f, "{}", self.ty),
            ExprKind::FieldAccess { target, field } => match target {
                Some(target) => write!(f, "{target}.{}", field.name),
                None => write!(f, "{}.{}", field.owner, field.name),
            },
            ExprKind::MethodCall {
                target,
                method,
                args,
            } => {
                match target {
                    Some(target) => write!(f, "{target}.{}(", method.name)?,
                    None => write!(f, "{}.{}(", method.owner, method.name)?,
                }
                write_args(f, args)?;
                f.write_str(")")
            }
            ExprKind::ConstructorCall { constructor, args } => {
                write!(f, "new {}(", constructor.owner)?;
                write_args(f, args)?;
                f.write_str(")")
            }
            ExprKind::ArrayAccess { array, index } => write!(f, "{array}[{index}]"),
            ExprKind::NewArray { dims } => {
                let mut element = &self.ty;
                let mut depth = 0;
                while let Some(component) = element.component() {
                    element = component;
                    depth += 1;
                }
                write!(f, "new {element}")?;
                for dim in dims {
                    write!(f, "[{dim}]")?;
                }
                for _ in dims.len()..depth {
                    f.write_str("[]")?;
                }
                Ok(())
            }
            ExprKind::ArrayLiteral { items } => {
                write!(f, "new {}{{", self.ty)?;
                write_args(f, items)?;
                f.write_str("}")
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => write!(f, "({cond} ? {then} : {otherwise})"),
            ExprKind::Binary {
                op, left, right, ..
            } => write!(f, "({left} {} {right})", op.symbol()),
            ExprKind::Unary { op, expr } => write!(f, "{}{expr}", op.symbol()),
            ExprKind::Cast { expr, .. } => write!(f, "(({}) {expr})", self.ty),
            ExprKind::InstanceOf { expr, test } => write!(f, "({expr} instanceof {})", test.ty),
            ExprKind::NotNull(expr) => write!(f, "({expr} != null)"),
        }
    }
}
