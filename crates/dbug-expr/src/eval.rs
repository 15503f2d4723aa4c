//! Evaluation and specialization (partial evaluation) of [`Expression`] trees.
use crate::assign::{coerce_value, is_instance};
use crate::ast::{BinaryOp, UnaryOp};
use crate::error::{EvalError, EvalResult};
use crate::expr::{ExprKind, Expression, Operands, RefKind};
use crate::types::{Primitive, Type};
use crate::value::Value;

/// Supplies the values references read.
pub trait Scope {
    fn reference(&self, kind: RefKind, index: usize) -> EvalResult<Value>;

    /// The value a reference folds to during specialization, or `None` to leave it residual.
    ///
    /// By default the host value and static fields always fold, dynamic fields fold only when
    /// `eval_dynamic` is set, and everything else stays residual.
    fn fold(&self, kind: RefKind, index: usize, eval_dynamic: bool) -> Option<Value> {
        match kind {
            RefKind::Host | RefKind::Static => self.reference(kind, index).ok(),
            RefKind::Dynamic if eval_dynamic => self.reference(kind, index).ok(),
            _ => None,
        }
    }
}

/// A scope with nothing bound; only constant trees evaluate against it.
pub struct EmptyScope;

impl Scope for EmptyScope {
    fn reference(&self, kind: RefKind, index: usize) -> EvalResult<Value> {
        Err(EvalError::Unbound {
            name: format!("{kind:?}#{index}"),
        })
    }
}

/// Plain value tables, one per reference kind.
#[derive(Clone, Debug, Default)]
pub struct Bindings {
    pub host: Option<Value>,
    pub statics: Vec<Value>,
    pub dynamics: Vec<Value>,
    pub events: Vec<Value>,
    pub config_variables: Vec<Value>,
    pub event_variables: Vec<Value>,
}

impl Scope for Bindings {
    fn reference(&self, kind: RefKind, index: usize) -> EvalResult<Value> {
        let table = match kind {
            RefKind::Host => {
                return self.host.clone().ok_or(EvalError::Unbound {
                    name: "value".to_string(),
                })
            }
            RefKind::Static => &self.statics,
            RefKind::Dynamic => &self.dynamics,
            RefKind::Event => &self.events,
            RefKind::ConfigVariable => &self.config_variables,
            RefKind::EventVariable => &self.event_variables,
        };
        table.get(index).cloned().ok_or_else(|| EvalError::Unbound {
            name: format!("{kind:?}#{index}"),
        })
    }
}

fn null_check(value: Value, context: &dyn std::fmt::Display) -> EvalResult<Value> {
    if value.is_null() {
        Err(EvalError::NullDereference {
            context: context.to_string(),
        })
    } else {
        Ok(value)
    }
}

fn as_bool(value: &Value) -> EvalResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| EvalError::mismatch("boolean", value.runtime_type()))
}

fn numeric(value: &Value, p: Primitive, context: &Expression) -> EvalResult<Value> {
    if value.is_null() {
        return Err(EvalError::NullDereference {
            context: context.to_string(),
        });
    }
    value
        .convert_primitive(p)
        .ok_or_else(|| EvalError::mismatch(p.name(), value.runtime_type()))
}

impl Expression {
    pub fn evaluate(&self, scope: &dyn Scope) -> EvalResult<Value> {
        match self.kind() {
            ExprKind::Constant(value) => Ok(value.clone()),
            ExprKind::Reference { kind, index, .. } => scope.reference(*kind, *index),
            ExprKind::TypeRef => Err(EvalError::TypeHasNoValue {
                ty: self.ty().clone(),
            }),
            ExprKind::FieldAccess { target, field } => match target {
                Some(target) => {
                    let target = null_check(target.evaluate(scope)?, self)?;
                    field.get(Some(&target))
                }
                None => field.get(None),
            },
            ExprKind::MethodCall {
                target,
                method,
                args,
            } => {
                let target = match target {
                    Some(target) => Some(null_check(target.evaluate(scope)?, self)?),
                    None => None,
                };
                let args = evaluate_all(args, scope)?;
                method.invoke(target.as_ref(), &args)
            }
            ExprKind::ConstructorCall { constructor, args } => {
                let args = evaluate_all(args, scope)?;
                constructor.invoke(&args)
            }
            ExprKind::ArrayAccess { array, index } => {
                let array = null_check(array.evaluate(scope)?, self)?;
                let index = index.evaluate(scope)?;
                let index = index
                    .as_i64()
                    .ok_or_else(|| EvalError::mismatch("int", index.runtime_type()))?;
                match array {
                    Value::Array(array) => array.get(index),
                    other => Err(EvalError::mismatch("array", other.runtime_type())),
                }
            }
            ExprKind::NewArray { dims } => {
                let mut sizes = Vec::with_capacity(dims.len());
                for dim in dims {
                    let size = dim.evaluate(scope)?;
                    let size = size
                        .as_i64()
                        .ok_or_else(|| EvalError::mismatch("int", size.runtime_type()))?;
                    if size < 0 {
                        return Err(EvalError::NegativeArraySize { size });
                    }
                    sizes.push(size as usize);
                }
                Ok(allocate_array(self.ty(), &sizes))
            }
            ExprKind::ArrayLiteral { items } => {
                let element = self.ty().component().cloned().unwrap_or_else(Type::object);
                Ok(Value::array(element, evaluate_all(items, scope)?))
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if as_bool(&cond.evaluate(scope)?)? {
                    then.evaluate(scope)
                } else {
                    otherwise.evaluate(scope)
                }
            }
            ExprKind::Binary {
                op,
                operands,
                left,
                right,
            } => {
                let lhs = left.evaluate(scope)?;
                if let Some(decided) = short_circuit(*op, &lhs)? {
                    return Ok(Value::Bool(decided));
                }
                let rhs = right.evaluate(scope)?;
                binary(*op, *operands, &lhs, &rhs, self)
            }
            ExprKind::Unary { op, expr } => unary(*op, &expr.evaluate(scope)?, self),
            ExprKind::Cast { expr, test } => {
                coerce_value(test.model(), expr.evaluate(scope)?, self.ty())
            }
            ExprKind::InstanceOf { expr, test } => {
                let value = expr.evaluate(scope)?;
                Ok(Value::Bool(is_instance(test.model(), &value, &test.ty)))
            }
            ExprKind::NotNull(expr) => Ok(Value::Bool(!expr.evaluate(scope)?.is_null())),
        }
    }

    /// Partially evaluates the tree against `scope`.
    ///
    /// Children are specialized first. A node folds into a constant when every operand is a
    /// constant and `cacheable` is set; references fold as [`Scope::fold`] decides. `&&` and `||`
    /// fold on a deciding left operand whether or not `cacheable` is set. A node whose folding
    /// fails to evaluate stays residual so the error surfaces when the residual is evaluated.
    pub fn specialize(&self, scope: &dyn Scope, eval_dynamic: bool, cacheable: bool) -> Expression {
        let spec = |e: &Expression| e.specialize(scope, eval_dynamic, cacheable);
        let boxed = |e: &Expression| Box::new(spec(e));
        let kind = match self.kind() {
            ExprKind::Constant(_) | ExprKind::TypeRef => return self.clone(),
            ExprKind::Reference { kind, index, .. } => {
                return match scope.fold(*kind, *index, eval_dynamic) {
                    Some(value) => Expression::constant(self.ty().clone(), value),
                    None => self.clone(),
                };
            }
            ExprKind::Binary {
                op,
                operands,
                left,
                right,
            } => {
                let left = spec(left);
                if let Some(value) = left.as_constant() {
                    if let Ok(Some(decided)) = short_circuit(*op, value) {
                        return Expression::boolean(decided);
                    }
                    if op.is_short_circuit() && value.as_bool().is_some() {
                        // `true && x` is `x`; `false || x` is `x`.
                        return spec(right);
                    }
                }
                let right = spec(right);
                if cacheable
                    && matches!(op, BinaryOp::Eq | BinaryOp::Ne)
                    && !left.is_constant()
                    && left == right
                    && !matches!(
                        operands,
                        Operands::Numeric(Primitive::Float | Primitive::Double)
                    )
                {
                    return Expression::boolean(*op == BinaryOp::Eq);
                }
                ExprKind::Binary {
                    op: *op,
                    operands: *operands,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let cond = spec(cond);
                if cacheable {
                    if let Some(Value::Bool(decided)) = cond.as_constant() {
                        return if *decided { spec(then) } else { spec(otherwise) };
                    }
                }
                ExprKind::Conditional {
                    cond: Box::new(cond),
                    then: boxed(then),
                    otherwise: boxed(otherwise),
                }
            }
            ExprKind::FieldAccess { target, field } => ExprKind::FieldAccess {
                target: target.as_deref().map(boxed),
                field: field.clone(),
            },
            ExprKind::MethodCall {
                target,
                method,
                args,
            } => {
                let target = target.as_deref().map(boxed);
                let args: Vec<Expression> = args.iter().map(spec).collect();
                if cacheable && &*method.name == "equals" && args.len() == 1 {
                    if let Some(target) = &target {
                        if !target.is_constant() && **target == args[0] {
                            return Expression::boolean(true);
                        }
                    }
                }
                ExprKind::MethodCall {
                    target,
                    method: method.clone(),
                    args,
                }
            }
            ExprKind::ConstructorCall { constructor, args } => ExprKind::ConstructorCall {
                constructor: constructor.clone(),
                args: args.iter().map(spec).collect(),
            },
            ExprKind::ArrayAccess { array, index } => ExprKind::ArrayAccess {
                array: boxed(array),
                index: boxed(index),
            },
            ExprKind::NewArray { dims } => ExprKind::NewArray {
                dims: dims.iter().map(spec).collect(),
            },
            ExprKind::ArrayLiteral { items } => ExprKind::ArrayLiteral {
                items: items.iter().map(spec).collect(),
            },
            ExprKind::Unary { op, expr } => ExprKind::Unary {
                op: *op,
                expr: boxed(expr),
            },
            ExprKind::Cast { expr, test } => ExprKind::Cast {
                expr: boxed(expr),
                test: test.clone(),
            },
            ExprKind::InstanceOf { expr, test } => ExprKind::InstanceOf {
                expr: boxed(expr),
                test: test.clone(),
            },
            ExprKind::NotNull(expr) => ExprKind::NotNull(boxed(expr)),
        };
        let residual = Expression::new(self.ty().clone(), kind);
        if cacheable && all_children_constant(&residual) {
            if let Ok(value) = residual.evaluate(&EmptyScope) {
                return Expression::constant(self.ty().clone(), value);
            }
        }
        residual
    }
}

fn all_children_constant(expr: &Expression) -> bool {
    let mut all = true;
    expr.for_each_child(&mut |child| all &= child.is_constant());
    all
}

fn evaluate_all(exprs: &[Expression], scope: &dyn Scope) -> EvalResult<Vec<Value>> {
    exprs.iter().map(|e| e.evaluate(scope)).collect()
}

fn allocate_array(ty: &Type, sizes: &[usize]) -> Value {
    let element = ty.component().cloned().unwrap_or_else(Type::object);
    match sizes.split_first() {
        None => Value::Null,
        Some((len, rest)) => {
            let items = (0..*len)
                .map(|_| {
                    if rest.is_empty() {
                        Value::default_for(&element)
                    } else {
                        allocate_array(&element, rest)
                    }
                })
                .collect();
            Value::array(element, items)
        }
    }
}

/// The result of `&&`/`||` decided by the left operand alone.
fn short_circuit(op: BinaryOp, lhs: &Value) -> EvalResult<Option<bool>> {
    Ok(match op {
        BinaryOp::And if !as_bool(lhs)? => Some(false),
        BinaryOp::Or if as_bool(lhs)? => Some(true),
        _ => None,
    })
}

fn binary(
    op: BinaryOp,
    operands: Operands,
    lhs: &Value,
    rhs: &Value,
    context: &Expression,
) -> EvalResult<Value> {
    match operands {
        Operands::Concat => Ok(Value::string(format!("{lhs}{rhs}"))),
        Operands::Reference => {
            let same = lhs.same(rhs);
            Ok(Value::Bool(if op == BinaryOp::Ne { !same } else { same }))
        }
        Operands::Boolean => {
            let (a, b) = (as_bool(lhs)?, as_bool(rhs)?);
            let out = match op {
                BinaryOp::Eq => a == b,
                BinaryOp::Ne => a != b,
                BinaryOp::BitAnd | BinaryOp::And => a & b,
                BinaryOp::BitOr | BinaryOp::Or => a | b,
                BinaryOp::BitXor => a ^ b,
                other => return Err(unsupported(other, "boolean")),
            };
            Ok(Value::Bool(out))
        }
        Operands::Numeric(p) => {
            let a = numeric(lhs, p, context)?;
            if matches!(op, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr) {
                let distance = numeric(rhs, Primitive::Long, context)?
                    .as_i64()
                    .unwrap_or_default();
                return shift(op, &a, distance);
            }
            let b = numeric(rhs, p, context)?;
            match (a, b) {
                (Value::Int(a), Value::Int(b)) => int_op(op, a, b),
                (Value::Long(a), Value::Long(b)) => long_op(op, a, b),
                (Value::Float(a), Value::Float(b)) => {
                    float_op(op, f64::from(a), f64::from(b)).map(|v| match v {
                        Value::Double(d) => Value::Float(d as f32),
                        other => other,
                    })
                }
                (Value::Double(a), Value::Double(b)) => float_op(op, a, b),
                (a, _) => Err(EvalError::mismatch("number", a.runtime_type())),
            }
        }
    }
}

fn unsupported(op: BinaryOp, ty: &str) -> EvalError {
    EvalError::invocation(op.symbol(), format!("not defined on {ty}"))
}

fn compare<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> Option<bool> {
    Some(match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Gt => a > b,
        BinaryOp::Le => a <= b,
        BinaryOp::Ge => a >= b,
        BinaryOp::Eq => a == b,
        BinaryOp::Ne => a != b,
        _ => return None,
    })
}

fn int_op(op: BinaryOp, a: i32, b: i32) -> EvalResult<Value> {
    if let Some(out) = compare(op, a, b) {
        return Ok(Value::Bool(out));
    }
    let out = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        other => return Err(unsupported(other, "int")),
    };
    Ok(Value::Int(out))
}

fn long_op(op: BinaryOp, a: i64, b: i64) -> EvalResult<Value> {
    if let Some(out) = compare(op, a, b) {
        return Ok(Value::Bool(out));
    }
    let out = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Rem => a.wrapping_rem(b),
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        other => return Err(unsupported(other, "long")),
    };
    Ok(Value::Long(out))
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> EvalResult<Value> {
    if let Some(out) = compare(op, a, b) {
        return Ok(Value::Bool(out));
    }
    let out = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        other => return Err(unsupported(other, "floating point")),
    };
    Ok(Value::Double(out))
}

fn shift(op: BinaryOp, value: &Value, distance: i64) -> EvalResult<Value> {
    match value {
        Value::Int(v) => {
            let n = (distance & 0x1f) as u32;
            Ok(Value::Int(match op {
                BinaryOp::Shl => v.wrapping_shl(n),
                BinaryOp::Shr => v.wrapping_shr(n),
                _ => ((*v as u32) >> n) as i32,
            }))
        }
        Value::Long(v) => {
            let n = (distance & 0x3f) as u32;
            Ok(Value::Long(match op {
                BinaryOp::Shl => v.wrapping_shl(n),
                BinaryOp::Shr => v.wrapping_shr(n),
                _ => ((*v as u64) >> n) as i64,
            }))
        }
        other => Err(EvalError::mismatch("integral", other.runtime_type())),
    }
}

fn unary(op: UnaryOp, value: &Value, context: &Expression) -> EvalResult<Value> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!as_bool(value)?));
    }
    let p = context.ty().primitive().unwrap_or(Primitive::Int);
    let value = numeric(value, p, context)?;
    Ok(match (op, value) {
        (UnaryOp::Plus, value) => value,
        (UnaryOp::Minus, Value::Int(v)) => Value::Int(v.wrapping_neg()),
        (UnaryOp::Minus, Value::Long(v)) => Value::Long(v.wrapping_neg()),
        (UnaryOp::Minus, Value::Float(v)) => Value::Float(-v),
        (UnaryOp::Minus, Value::Double(v)) => Value::Double(-v),
        (UnaryOp::BitNot, Value::Int(v)) => Value::Int(!v),
        (UnaryOp::BitNot, Value::Long(v)) => Value::Long(!v),
        (_, other) => return Err(EvalError::mismatch("number", other.runtime_type())),
    })
}

/// Re-runs a specialized tree with dynamic fields folded, yielding its current value.
pub fn refresh(residual: &Expression, scope: &dyn Scope) -> EvalResult<Value> {
    let folded = residual.specialize(scope, true, true);
    match folded.as_constant() {
        Some(value) => Ok(value.clone()),
        None => folded.evaluate(scope),
    }
}
