//! Assignability, conversion distance and common-type rules.
use crate::error::{EvalError, EvalResult};
use crate::model::{interface_hops, superclass_hops, supertype_as, walk_supertypes, ValueModel};
use crate::types::{Primitive, Type};
use crate::value::Value;

/// Whether a value of type `from` may be used where `to` is expected without an explicit cast:
/// identity, reference widening, boxing/unboxing (followed by widening) or numeric widening.
pub fn is_assignable(model: &dyn ValueModel, from: &Type, to: &Type) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (Type::Void, _) | (_, Type::Void) => false,
        (Type::Null, to) => to.is_reference(),
        (Type::Primitive(a), Type::Primitive(b)) => a.widens_to(*b),
        (Type::Primitive(a), to) => is_reference_assignable(model, &Type::boxed(*a), to),
        (from, Type::Primitive(b)) => from.unboxed().is_some_and(|a| a.widens_to(*b)),
        (from, to) => is_reference_assignable(model, from, to),
    }
}

fn is_reference_assignable(model: &dyn ValueModel, from: &Type, to: &Type) -> bool {
    if from == to || to.is_object() || matches!(to, Type::Var(_)) {
        return true;
    }
    match (from, to) {
        (Type::Null, _) => true,
        (Type::Array(a), Type::Array(b)) => match (a.as_ref(), b.as_ref()) {
            (Type::Primitive(x), Type::Primitive(y)) => x == y,
            (Type::Primitive(_), _) | (_, Type::Primitive(_)) => false,
            (a, b) => is_reference_assignable(model, a, b),
        },
        (Type::Class { .. }, Type::Class { name, args }) => {
            let Some(view) = supertype_as(model, from, name) else {
                return false;
            };
            if args.is_empty() || view.type_args().is_empty() {
                return true;
            }
            view.type_args().len() == args.len()
                && view
                    .type_args()
                    .iter()
                    .zip(args)
                    .all(|(have, want)| have == want || matches!(want, Type::Var(_)))
        }
        _ => false,
    }
}

/// Conversion distance from an argument type to a parameter type, used to rank overloads.
///
/// Zero for an exact match; boxing or unboxing costs one, numeric widening costs the rank
/// difference, reference widening costs one per supertype hop, and type arguments contribute a
/// tenth of their own distance.
pub fn distance(model: &dyn ValueModel, from: &Type, to: &Type) -> f64 {
    if *from == Type::Null {
        return 0.0;
    }
    let boxing = if from.is_primitive() != to.is_primitive() { 1.0 } else { 0.0 };
    boxing + reference_distance(model, &from.wrap(), &to.wrap())
}

fn reference_distance(model: &dyn ValueModel, from: &Type, to: &Type) -> f64 {
    if from == to {
        return 0.0;
    }
    if let (Some(a), Some(b)) = (from.unboxed(), to.unboxed()) {
        return match (a.numeric_rank(), b.numeric_rank()) {
            (Some(x), Some(y)) => f64::from(y.abs_diff(x)),
            _ => 0.0,
        };
    }
    match (from, to) {
        (Type::Array(a), Type::Array(b)) => distance(model, a, b),
        (Type::Array(_), _) => 1.0,
        (_, Type::Var(_)) => reference_distance(model, from, &Type::object()),
        (Type::Class { name: sub, .. }, Type::Class { name: sup, args }) => {
            let hops = class_hops(model, sub, sup).unwrap_or(0) as f64;
            if args.is_empty() {
                return hops;
            }
            let nested = match supertype_as(model, from, sup) {
                Some(view) => view
                    .type_args()
                    .iter()
                    .zip(args)
                    .map(|(have, want)| distance(model, have, want))
                    .sum::<f64>(),
                None => 0.0,
            };
            hops + nested / 10.0
        }
        _ => 0.0,
    }
}

/// Superclass hops, or the cheapest path through the superclass chain and then interfaces.
fn class_hops(model: &dyn ValueModel, sub: &str, sup: &str) -> Option<usize> {
    if let Some(hops) = superclass_hops(model, sub, sup) {
        return Some(hops);
    }
    let mut best: Option<usize> = None;
    let mut current = Some(sub.to_string());
    let mut chain = 0;
    while let Some(name) = current {
        if let Some(via_interfaces) = interface_hops(model, &name, sup) {
            let total = chain + via_interfaces;
            best = Some(best.map_or(total, |b| b.min(total)));
        }
        current = model.class(&name).and_then(|class| {
            class
                .superclass
                .as_ref()
                .and_then(|s| s.class_name().map(str::to_string))
        });
        chain += 1;
    }
    best
}

/// Result type of `cond ? a : b`.
pub fn common_type(model: &dyn ValueModel, a: &Type, b: &Type) -> Option<Type> {
    if a == b {
        return Some(a.clone());
    }
    match (a, b) {
        (Type::Void, _) | (_, Type::Void) => return None,
        (Type::Null, other) | (other, Type::Null) => return Some(other.wrap()),
        _ => {}
    }
    if let (Some(x), Some(y)) = (a.unboxed(), b.unboxed()) {
        if x == y {
            return Some(Type::Primitive(x));
        }
        if x.is_numeric() && y.is_numeric() {
            let widest = if x.widens_to(y) {
                y
            } else if y.widens_to(x) {
                x
            } else {
                Primitive::binary_promotion(x, y)
            };
            return Some(Type::Primitive(widest));
        }
    }
    let (a, b) = (a.wrap(), b.wrap());
    if is_assignable(model, &a, &b) {
        return Some(b);
    }
    if is_assignable(model, &b, &a) {
        return Some(a);
    }
    let mut found = None;
    walk_supertypes(model, &a, &mut |_, candidate| {
        if !candidate.is_object() && is_assignable(model, &b, candidate) {
            found = Some(candidate.clone());
            false
        } else {
            true
        }
    });
    Some(found.unwrap_or_else(Type::object))
}

/// Whether some runtime value could be both of static type `from` and an instance of `to`.
pub fn may_be_instance(model: &dyn ValueModel, from: &Type, to: &Type) -> bool {
    let (from, to) = (from.wrap().raw(), to.wrap().raw());
    if from == Type::Null
        || from.is_object()
        || to.is_object()
        || matches!(from, Type::Var(_))
        || matches!(to, Type::Var(_))
        || is_assignable(model, &from, &to)
        || is_assignable(model, &to, &from)
    {
        return true;
    }
    match (&from, &to) {
        (Type::Array(a), Type::Array(b)) => match (a.as_ref(), b.as_ref()) {
            (Type::Primitive(_), _) | (_, Type::Primitive(_)) => false,
            (a, b) => may_be_instance(model, a, b),
        },
        (Type::Class { name: x, .. }, Type::Class { name: y, .. }) => {
            let (Some(x), Some(y)) = (model.class(x), model.class(y)) else {
                return false;
            };
            match (x.is_interface, y.is_interface) {
                (false, false) => false,
                (true, true) => true,
                (true, false) => !y.is_final,
                (false, true) => !x.is_final,
            }
        }
        _ => false,
    }
}

/// Runtime `instanceof`: `null` is never an instance of anything.
pub fn is_instance(model: &dyn ValueModel, value: &Value, ty: &Type) -> bool {
    if value.is_null() {
        return false;
    }
    is_assignable(model, &value.runtime_type(), &ty.wrap().raw())
}

/// Converts an evaluated value to the representation of the static type `to`: numeric widening
/// or narrowing for primitives, unboxing checks for `null`, and a checked reference cast.
pub fn coerce_value(model: &dyn ValueModel, value: Value, to: &Type) -> EvalResult<Value> {
    match to {
        Type::Primitive(p) => match value {
            Value::Null => Err(EvalError::NullDereference {
                context: format!("unboxing to {p}"),
            }),
            value if value.primitive() == Some(*p) => Ok(value),
            value => value.convert_primitive(*p).ok_or_else(|| EvalError::ClassCast {
                value: value.to_string(),
                ty: to.clone(),
            }),
        },
        Type::Class { .. } if to.unboxed().is_some() => {
            let p = to.unboxed().unwrap_or(Primitive::Int);
            match value {
                Value::Null => Ok(Value::Null),
                value if value.primitive() == Some(p) => Ok(value),
                value => Err(EvalError::ClassCast {
                    value: value.to_string(),
                    ty: to.clone(),
                }),
            }
        }
        Type::Var(_) | Type::Void | Type::Null => Ok(value),
        reference => {
            if value.is_null() || is_instance(model, &value, reference) {
                Ok(value)
            } else {
                Err(EvalError::ClassCast {
                    value: value.to_string(),
                    ty: reference.clone(),
                })
            }
        }
    }
}
