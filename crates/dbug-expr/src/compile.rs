//! Resolution of parse trees into typed [`Expression`]s.
use crate::assign::{common_type, is_assignable, may_be_instance};
use crate::ast::{BinaryOp, Literal, Node, TypeName, UnaryOp};
use crate::error::{TypeError, TypeResult};
use crate::expr::{ExprKind, Expression, Operands, RefKind, TypeTest};
use crate::model::{array_length_field, ValueModel};
use crate::overload::{implicit_conversion, select};
use crate::types::{Primitive, Type};
use crate::value::Value;
use std::sync::Arc;

/// The name that denotes the whole host value.
pub const HOST_VALUE_NAME: &str = "value";

/// Identifier scope an expression is compiled in.
pub trait Environment {
    fn model(&self) -> Arc<dyn ValueModel>;

    /// Resolves a bare identifier to a value reference, or `None` to fall through to type names.
    fn resolve_identifier(&mut self, name: &str) -> TypeResult<Option<Expression>>;

    /// Receives non-fatal diagnostics such as casts that can never fail.
    fn warn(&mut self, message: String) {
        log::warn!("{message}");
    }
}

/// Parses and resolves `text`.
pub fn compile(
    text: &str,
    expected: Option<&Type>,
    env: &mut dyn Environment,
) -> TypeResult<Expression> {
    let node = crate::parser::parse(text)?;
    resolve(&node, expected, env)
}

/// Resolves `node` against `env`, checking the result is assignable to `expected`.
pub fn resolve(
    node: &Node,
    expected: Option<&Type>,
    env: &mut dyn Environment,
) -> TypeResult<Expression> {
    let model = env.model();
    let mut compiler = Compiler { env, model };
    let expr = compiler.value(node)?;
    match expected {
        Some(expected) => {
            if !is_assignable(compiler.model.as_ref(), expr.ty(), expected) {
                return Err(TypeError::Incompatible {
                    expr: node.to_string(),
                    expected: expected.clone(),
                    actual: expr.ty().clone(),
                });
            }
            Ok(implicit_conversion(&compiler.model, expr, expected))
        }
        None => Ok(expr),
    }
}

/// Resolves a written type name.
pub fn resolve_type(model: &dyn ValueModel, name: &TypeName) -> TypeResult<Type> {
    let mut ty = match Primitive::from_name(&name.name) {
        Some(p) if name.args.is_empty() => Type::Primitive(p),
        _ => {
            let base = model.lookup_type(&name.name).ok_or_else(|| TypeError::UnknownType {
                name: name.name.clone(),
            })?;
            if name.args.is_empty() {
                base
            } else {
                let args = name
                    .args
                    .iter()
                    .map(|arg| resolve_type(model, arg))
                    .collect::<TypeResult<Vec<_>>>()?;
                if args.iter().any(Type::is_primitive) {
                    return Err(TypeError::invalid(format!(
                        "type argument of {name} cannot be primitive"
                    )));
                }
                match base {
                    Type::Class { name, .. } => Type::Class { name, args },
                    other => other,
                }
            }
        }
    };
    for _ in 0..name.dims {
        ty = Type::array_of(ty);
    }
    Ok(ty)
}

enum Resolved {
    Value(Expression),
    Type(Type),
    /// A dotted prefix that may still name a type once more segments are added.
    Package(String),
}

struct Compiler<'a> {
    env: &'a mut dyn Environment,
    model: Arc<dyn ValueModel>,
}

impl Compiler<'_> {
    fn model(&self) -> &dyn ValueModel {
        self.model.as_ref()
    }

    fn test(&self, ty: &Type) -> TypeTest {
        TypeTest::new(ty.clone(), self.model.clone())
    }

    fn value(&mut self, node: &Node) -> TypeResult<Expression> {
        match self.node(node)? {
            Resolved::Value(expr) => Ok(expr),
            Resolved::Type(ty) => Err(TypeError::Expected {
                expr: node.to_string(),
                expected: "a value",
                actual: ty,
            }),
            Resolved::Package(name) => Err(TypeError::UnknownIdentifier { name }),
        }
    }

    fn node(&mut self, node: &Node) -> TypeResult<Resolved> {
        let expr = match node {
            Node::Literal(literal) => literal_expr(literal),
            Node::Name(name) => {
                if let Some(expr) = self.env.resolve_identifier(name)? {
                    return Ok(Resolved::Value(expr));
                }
                return Ok(match self.model().lookup_type(name) {
                    Some(ty) => Resolved::Type(ty),
                    None => Resolved::Package(name.clone()),
                });
            }
            Node::Field { target, name } => return self.field(target, name),
            Node::Call { target: None, name, .. } => {
                return Err(TypeError::FunctionCall { name: name.clone() })
            }
            Node::Call {
                target: Some(target),
                name,
                args,
            } => self.call(target, name, args)?,
            Node::Index { array, index } => self.index(node, array, index)?,
            Node::New { ty, args } => self.construct(ty, args)?,
            Node::NewArray {
                element,
                dims,
                extra_dims,
                init,
            } => self.new_array(element, dims, *extra_dims, init.as_deref())?,
            Node::ArrayInit(_) => {
                return Err(TypeError::invalid(
                    "array initializers are only allowed in array creation",
                ))
            }
            Node::Cast { ty, expr } => self.cast(node, ty, expr)?,
            Node::InstanceOf { expr, ty } => self.instance_of(node, expr, ty)?,
            Node::Conditional {
                cond,
                then,
                otherwise,
            } => self.conditional(cond, then, otherwise)?,
            Node::Unary { op, expr } => self.unary(*op, expr)?,
            Node::Binary { op, left, right } => self.binary(*op, left, right)?,
        };
        Ok(Resolved::Value(expr))
    }

    fn field(&mut self, target: &Node, name: &str) -> TypeResult<Resolved> {
        match self.node(target)? {
            Resolved::Package(prefix) => {
                let qualified = format!("{prefix}.{name}");
                Ok(match self.model().lookup_type(&qualified) {
                    Some(ty) => Resolved::Type(ty),
                    None => Resolved::Package(qualified),
                })
            }
            Resolved::Type(ty) => {
                let field = self
                    .model()
                    .list_fields(&ty)
                    .into_iter()
                    .find(|f| &*f.name == name);
                match field {
                    Some(field) if field.is_static => Ok(Resolved::Value(Expression::new(
                        field.ty.clone(),
                        ExprKind::FieldAccess {
                            target: None,
                            field,
                        },
                    ))),
                    Some(_) => Err(TypeError::InstanceField {
                        ty,
                        name: name.to_string(),
                    }),
                    None => {
                        let nested = format!("{ty}.{name}");
                        match self.model().lookup_type(&nested) {
                            Some(nested) => Ok(Resolved::Type(nested)),
                            None => Err(TypeError::NoSuchField {
                                ty,
                                name: name.to_string(),
                            }),
                        }
                    }
                }
            }
            Resolved::Value(target) => {
                if matches!(target.ty(), Type::Array(_)) && name == "length" {
                    return Ok(Resolved::Value(Expression::new(
                        Type::int(),
                        ExprKind::FieldAccess {
                            target: Some(Box::new(target)),
                            field: array_length_field(),
                        },
                    )));
                }
                let field = self
                    .model()
                    .list_fields(target.ty())
                    .into_iter()
                    .find(|f| &*f.name == name)
                    .ok_or_else(|| TypeError::NoSuchField {
                        ty: target.ty().clone(),
                        name: name.to_string(),
                    })?;
                let ty = field.ty.erase_vars();
                let target = (!field.is_static).then(|| Box::new(target));
                Ok(Resolved::Value(Expression::new(
                    ty,
                    ExprKind::FieldAccess { target, field },
                )))
            }
        }
    }

    fn args(&mut self, args: &[Node]) -> TypeResult<Vec<Expression>> {
        args.iter().map(|arg| self.value(arg)).collect()
    }

    fn call(&mut self, target: &Node, name: &str, args: &[Node]) -> TypeResult<Expression> {
        let (receiver, target_ty) = match self.node(target)? {
            Resolved::Package(name) => return Err(TypeError::UnknownIdentifier { name }),
            Resolved::Type(ty) => (None, ty),
            Resolved::Value(expr) => {
                let ty = expr.ty().clone();
                (Some(expr), ty)
            }
        };
        if matches!(target_ty, Type::Null | Type::Void) {
            return Err(TypeError::NoSuchMethod {
                ty: target_ty,
                name: name.to_string(),
            });
        }
        let mut methods = self.model().list_methods(&target_ty, name);
        if methods.is_empty() {
            return Err(TypeError::NoSuchMethod {
                ty: target_ty,
                name: name.to_string(),
            });
        }
        if receiver.is_none() {
            methods.retain(|m| m.is_static);
            if methods.is_empty() {
                return Err(TypeError::invalid(format!(
                    "non-static method {target_ty}.{name} cannot be called without a receiver"
                )));
            }
        }
        let args = self.args(args)?;
        let selection = select(&self.model, &methods, &args).ok_or_else(|| {
            TypeError::NotApplicable {
                member: format!("{target_ty}.{name}"),
                args: describe_args(&args),
            }
        })?;
        let return_type = selection.instantiate(&selection.member.return_type);
        let target = match receiver {
            Some(receiver) if !selection.member.is_static => Some(Box::new(receiver)),
            _ => None,
        };
        Ok(Expression::new(
            return_type,
            ExprKind::MethodCall {
                target,
                method: selection.member,
                args: selection.args,
            },
        ))
    }

    fn index(&mut self, node: &Node, array: &Node, index: &Node) -> TypeResult<Expression> {
        let array = self.value(array)?;
        let Some(element) = array.ty().component().cloned() else {
            return Err(TypeError::Expected {
                expr: node.to_string(),
                expected: "an array",
                actual: array.ty().clone(),
            });
        };
        let index = self.int_operand(index)?;
        Ok(Expression::new(
            element,
            ExprKind::ArrayAccess {
                array: Box::new(array),
                index: Box::new(index),
            },
        ))
    }

    /// Resolves an array index or dimension: any integral type promoting to `int`.
    fn int_operand(&mut self, node: &Node) -> TypeResult<Expression> {
        let expr = self.value(node)?;
        match expr.ty().unboxed().map(Primitive::promoted) {
            Some(Primitive::Int) => Ok(implicit_conversion(&self.model, expr, &Type::int())),
            _ => Err(TypeError::Incompatible {
                expr: node.to_string(),
                expected: Type::int(),
                actual: expr.ty().clone(),
            }),
        }
    }

    fn construct(&mut self, ty: &TypeName, args: &[Node]) -> TypeResult<Expression> {
        let ty = resolve_type(self.model(), ty)?;
        let class = ty
            .class_name()
            .and_then(|name| self.model().class(name))
            .ok_or_else(|| TypeError::NoSuchConstructor { ty: ty.clone() })?;
        if class.is_interface {
            return Err(TypeError::invalid(format!("{ty} is an interface")));
        }
        let constructors = self.model().list_constructors(&ty);
        if constructors.is_empty() {
            return Err(TypeError::NoSuchConstructor { ty });
        }
        let args = self.args(args)?;
        let selection = select(&self.model, &constructors, &args).ok_or_else(|| {
            TypeError::NotApplicable {
                member: format!("new {ty}"),
                args: describe_args(&args),
            }
        })?;
        Ok(Expression::new(
            ty,
            ExprKind::ConstructorCall {
                constructor: selection.member,
                args: selection.args,
            },
        ))
    }

    fn new_array(
        &mut self,
        element: &TypeName,
        dims: &[Node],
        extra_dims: usize,
        init: Option<&[Node]>,
    ) -> TypeResult<Expression> {
        let mut ty = resolve_type(self.model(), element)?;
        if ty == Type::Void {
            return Err(TypeError::invalid("cannot create an array of void"));
        }
        for _ in 0..dims.len() + extra_dims {
            ty = Type::array_of(ty);
        }
        match init {
            Some(items) => self.array_init(&ty, items),
            None => {
                let dims = dims
                    .iter()
                    .map(|dim| self.int_operand(dim))
                    .collect::<TypeResult<Vec<_>>>()?;
                Ok(Expression::new(ty, ExprKind::NewArray { dims }))
            }
        }
    }

    fn array_init(&mut self, array_ty: &Type, items: &[Node]) -> TypeResult<Expression> {
        let component = array_ty.component().cloned().unwrap_or_else(Type::object);
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let expr = match item {
                Node::ArrayInit(nested) => {
                    if component.component().is_none() {
                        return Err(TypeError::invalid(format!(
                            "nested initializer for non-array element type {component}"
                        )));
                    }
                    self.array_init(&component, nested)?
                }
                other => {
                    let expr = self.value(other)?;
                    if !is_assignable(self.model(), expr.ty(), &component) {
                        return Err(TypeError::Incompatible {
                            expr: other.to_string(),
                            expected: component,
                            actual: expr.ty().clone(),
                        });
                    }
                    implicit_conversion(&self.model, expr, &component)
                }
            };
            out.push(expr);
        }
        Ok(Expression::new(
            array_ty.clone(),
            ExprKind::ArrayLiteral { items: out },
        ))
    }

    fn cast(&mut self, node: &Node, ty: &TypeName, operand: &Node) -> TypeResult<Expression> {
        let target = resolve_type(self.model(), ty)?;
        let expr = self.value(operand)?;
        let source = expr.ty().clone();
        if source == target {
            self.env.warn(format!("redundant cast in {node}"));
            return Ok(expr);
        }
        let impossible = || TypeError::ImpossibleConversion {
            expr: operand.to_string(),
            ty: target.clone(),
        };
        let allowed = match (&source, &target) {
            (Type::Void, _) | (_, Type::Void) => false,
            (Type::Primitive(s), Type::Primitive(t)) => s.is_numeric() && t.is_numeric(),
            (Type::Null, Type::Primitive(_)) => false,
            (_, Type::Primitive(t)) => match source.unboxed() {
                Some(s) => s == *t || (s.is_numeric() && t.is_numeric()),
                None => may_be_instance(self.model(), &source, &Type::boxed(*t)),
            },
            (Type::Primitive(s), _) => is_assignable(self.model(), &Type::boxed(*s), &target),
            _ => {
                if is_assignable(self.model(), &source, &target) {
                    self.env.warn(format!("cast in {node} always succeeds"));
                    true
                } else {
                    may_be_instance(self.model(), &source, &target)
                }
            }
        };
        if !allowed {
            return Err(impossible());
        }
        let test = self.test(&target);
        Ok(Expression::new(
            target,
            ExprKind::Cast {
                expr: Box::new(expr),
                test,
            },
        ))
    }

    fn instance_of(&mut self, node: &Node, operand: &Node, ty: &TypeName) -> TypeResult<Expression> {
        let target = resolve_type(self.model(), ty)?;
        if target.is_parameterized() {
            return Err(TypeError::ParameterizedInstanceOf { ty: target });
        }
        if target.is_primitive() || target == Type::Void {
            return Err(TypeError::invalid(format!(
                "instanceof requires a reference type, found {target}"
            )));
        }
        let expr = self.value(operand)?;
        let source = expr.ty().clone();
        if !source.is_reference() {
            return Err(TypeError::BadOperand {
                op: "instanceof",
                operand: source,
            });
        }
        if source == Type::Null {
            self.env.warn(format!("{node} is always false"));
            return Ok(Expression::boolean(false));
        }
        if is_assignable(self.model(), &source, &target) {
            self.env
                .warn(format!("{node} is always true for non-null values"));
            return Ok(Expression::new(
                Type::boolean(),
                ExprKind::NotNull(Box::new(expr)),
            ));
        }
        if !may_be_instance(self.model(), &source, &target) {
            return Err(TypeError::ImpossibleConversion {
                expr: operand.to_string(),
                ty: target,
            });
        }
        let test = self.test(&target);
        Ok(Expression::new(
            Type::boolean(),
            ExprKind::InstanceOf {
                expr: Box::new(expr),
                test,
            },
        ))
    }

    fn boolean_operand(&mut self, node: &Node) -> TypeResult<Expression> {
        let expr = self.value(node)?;
        if !expr.ty().is_boolean() {
            return Err(TypeError::Expected {
                expr: node.to_string(),
                expected: "boolean",
                actual: expr.ty().clone(),
            });
        }
        Ok(implicit_conversion(&self.model, expr, &Type::boolean()))
    }

    fn conditional(&mut self, cond: &Node, then: &Node, otherwise: &Node) -> TypeResult<Expression> {
        let cond = self.boolean_operand(cond)?;
        let then = self.value(then)?;
        let otherwise = self.value(otherwise)?;
        let ty = common_type(self.model(), then.ty(), otherwise.ty()).ok_or_else(|| {
            TypeError::BadOperands {
                op: "?:",
                left: then.ty().clone(),
                right: otherwise.ty().clone(),
            }
        })?;
        let then = implicit_conversion(&self.model, then, &ty);
        let otherwise = implicit_conversion(&self.model, otherwise, &ty);
        Ok(Expression::new(
            ty,
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        ))
    }

    fn unary(&mut self, op: UnaryOp, operand: &Node) -> TypeResult<Expression> {
        let expr = self.value(operand)?;
        let bad = || TypeError::BadOperand {
            op: op.symbol(),
            operand: expr.ty().clone(),
        };
        let ty = match (op, expr.ty().unboxed()) {
            (UnaryOp::Not, Some(Primitive::Boolean)) => Type::boolean(),
            (UnaryOp::Plus | UnaryOp::Minus, Some(p)) if p.is_numeric() => {
                Type::Primitive(p.promoted())
            }
            (UnaryOp::BitNot, Some(p)) if p.is_integral() => Type::Primitive(p.promoted()),
            _ => return Err(bad()),
        };
        Ok(Expression::new(
            ty,
            ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
        ))
    }

    fn binary(&mut self, op: BinaryOp, left: &Node, right: &Node) -> TypeResult<Expression> {
        let lhs = self.value(left)?;
        let rhs = self.value(right)?;
        let (l, r) = (lhs.ty().clone(), rhs.ty().clone());
        let bad = || TypeError::BadOperands {
            op: op.symbol(),
            left: l.clone(),
            right: r.clone(),
        };
        let numeric = |a: &Type, b: &Type| match (a.unboxed(), b.unboxed()) {
            (Some(x), Some(y)) if x.is_numeric() && y.is_numeric() => Some((x, y)),
            _ => None,
        };
        let (operands, ty) = match op {
            BinaryOp::Add if l.is_string() || r.is_string() => {
                if l == Type::Void || r == Type::Void {
                    return Err(bad());
                }
                (Operands::Concat, Type::string())
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                let (x, y) = numeric(&l, &r).ok_or_else(bad)?;
                let p = Primitive::binary_promotion(x, y);
                (Operands::Numeric(p), Type::Primitive(p))
            }
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => match numeric(&l, &r) {
                Some((x, y)) if x.is_integral() && y.is_integral() => {
                    (Operands::Numeric(x.promoted()), Type::Primitive(x.promoted()))
                }
                _ => return Err(bad()),
            },
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if l.is_boolean() && r.is_boolean() {
                    (Operands::Boolean, Type::boolean())
                } else {
                    match numeric(&l, &r) {
                        Some((x, y)) if x.is_integral() && y.is_integral() => {
                            let p = Primitive::binary_promotion(x, y);
                            (Operands::Numeric(p), Type::Primitive(p))
                        }
                        _ => return Err(bad()),
                    }
                }
            }
            BinaryOp::And | BinaryOp::Or => {
                if !(l.is_boolean() && r.is_boolean()) {
                    return Err(bad());
                }
                (Operands::Boolean, Type::boolean())
            }
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                let (x, y) = numeric(&l, &r).ok_or_else(bad)?;
                (
                    Operands::Numeric(Primitive::binary_promotion(x, y)),
                    Type::boolean(),
                )
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                let either_primitive = l.is_primitive() || r.is_primitive();
                let operands = match numeric(&l, &r) {
                    Some((x, y)) if either_primitive => {
                        Operands::Numeric(Primitive::binary_promotion(x, y))
                    }
                    _ if either_primitive && l.is_boolean() && r.is_boolean() => Operands::Boolean,
                    _ if either_primitive => return Err(bad()),
                    _ if l == Type::Void || r == Type::Void => return Err(bad()),
                    _ => {
                        if !may_be_instance(self.model(), &l, &r) {
                            return Err(bad());
                        }
                        Operands::Reference
                    }
                };
                (operands, Type::boolean())
            }
        };
        Ok(Expression::new(
            ty,
            ExprKind::Binary {
                op,
                operands,
                left: Box::new(lhs),
                right: Box::new(rhs),
            },
        ))
    }
}

fn literal_expr(literal: &Literal) -> Expression {
    let (ty, value) = match literal {
        Literal::Null => (Type::Null, Value::Null),
        Literal::Bool(v) => (Type::boolean(), Value::Bool(*v)),
        Literal::Char(c) => (Type::char(), Value::Char(*c)),
        Literal::Int(v) => (Type::int(), Value::Int(*v)),
        Literal::Long(v) => (Type::long(), Value::Long(*v)),
        Literal::Float(v) => (Type::float(), Value::Float(*v)),
        Literal::Double(v) => (Type::double(), Value::Double(*v)),
        Literal::Str(s) => (Type::string(), Value::string(s)),
    };
    Expression::constant(ty, value)
}

fn describe_args(args: &[Expression]) -> String {
    args.iter()
        .map(|arg| arg.ty().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A fixed table of typed names, for compiling expressions outside an anchor runtime.
pub struct Names {
    model: Arc<dyn ValueModel>,
    host: Option<Type>,
    entries: Vec<(String, RefKind, usize, Type)>,
}

impl Names {
    pub fn new(model: Arc<dyn ValueModel>) -> Self {
        Self {
            model,
            host: None,
            entries: Vec::new(),
        }
    }

    /// Makes [`HOST_VALUE_NAME`] resolve to the host value.
    pub fn with_host(mut self, ty: Type) -> Self {
        self.host = Some(ty);
        self
    }

    /// Binds `name` to the next slot of `kind` and returns that slot's index.
    pub fn bind(&mut self, name: &str, kind: RefKind, ty: Type) -> usize {
        let index = self.entries.iter().filter(|(_, k, _, _)| *k == kind).count();
        self.entries.push((name.to_string(), kind, index, ty));
        index
    }
}

impl Environment for Names {
    fn model(&self) -> Arc<dyn ValueModel> {
        self.model.clone()
    }

    fn resolve_identifier(&mut self, name: &str) -> TypeResult<Option<Expression>> {
        if name == HOST_VALUE_NAME {
            if let Some(ty) = &self.host {
                return Ok(Some(Expression::reference(ty.clone(), RefKind::Host, 0, name)));
            }
        }
        Ok(self
            .entries
            .iter()
            .find(|(entry, ..)| entry == name)
            .map(|(_, kind, index, ty)| Expression::reference(ty.clone(), *kind, *index, name)))
    }
}
