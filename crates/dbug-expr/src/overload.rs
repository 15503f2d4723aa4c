//! Overload resolution for method and constructor calls.
use crate::assign::{distance, is_assignable};
use crate::expr::{ExprKind, Expression, TypeTest};
use crate::model::{supertype_as, ConstructorInfo, MethodInfo, ValueModel};
use crate::types::Type;
use ahash::AHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

pub(crate) trait Signature: Clone {
    fn params(&self) -> &[Type];
    fn varargs(&self) -> bool;
    fn type_params(&self) -> &[Arc<str>];
}

impl Signature for MethodInfo {
    fn params(&self) -> &[Type] {
        &self.params
    }

    fn varargs(&self) -> bool {
        self.varargs
    }

    fn type_params(&self) -> &[Arc<str>] {
        &self.type_params
    }
}

impl Signature for ConstructorInfo {
    fn params(&self) -> &[Type] {
        &self.params
    }

    fn varargs(&self) -> bool {
        self.varargs
    }

    fn type_params(&self) -> &[Arc<str>] {
        &[]
    }
}

/// The chosen member with its arguments converted to the parameter types.
pub(crate) struct Selection<S> {
    pub member: S,
    pub args: Vec<Expression>,
    /// Method type variables inferred from the arguments.
    pub bindings: AHashMap<String, Type>,
}

impl<S> Selection<S> {
    /// `ty` with inferred type variables substituted and any leftovers erased.
    pub fn instantiate(&self, ty: &Type) -> Type {
        ty.substitute(&|var| self.bindings.get(var).cloned())
            .erase_vars()
    }
}

struct Candidate {
    distance: f64,
    /// Parameter type each argument is converted to; trailing varargs share the component type.
    targets: SmallVec<[Type; 4]>,
    /// Index from which arguments are collapsed into a variable-arity array.
    collapse_from: Option<usize>,
    bindings: AHashMap<String, Type>,
}

/// Picks the applicable candidate with the smallest conversion distance. Ties go to the first
/// applicable candidate in `candidates` order.
pub(crate) fn select<S: Signature>(
    model: &Arc<dyn ValueModel>,
    candidates: &[S],
    args: &[Expression],
) -> Option<Selection<S>> {
    let arg_types: SmallVec<[&Type; 4]> = args.iter().map(Expression::ty).collect();
    let mut best: Option<(usize, Candidate)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let direct = (candidate.params().len() == args.len())
            .then(|| applicable(model.as_ref(), candidate, &arg_types, None))
            .flatten();
        let found = direct.or_else(|| {
            let fixed = candidate.params().len().checked_sub(1)?;
            (candidate.varargs() && args.len() >= fixed)
                .then(|| applicable(model.as_ref(), candidate, &arg_types, Some(fixed)))
                .flatten()
        });
        let Some(found) = found else {
            continue;
        };
        if best
            .as_ref()
            .map_or(true, |(_, current)| found.distance < current.distance)
        {
            best = Some((i, found));
        }
    }
    let (index, chosen) = best?;
    let member = candidates[index].clone();
    let mut converted = Vec::with_capacity(args.len());
    let mut trailing = Vec::new();
    for (i, (arg, target)) in args.iter().zip(&chosen.targets).enumerate() {
        let arg = implicit_conversion(model, arg.clone(), target);
        match chosen.collapse_from {
            Some(from) if i >= from => trailing.push(arg),
            _ => converted.push(arg),
        }
    }
    if let Some(from) = chosen.collapse_from {
        let array_ty = member
            .params()
            .get(from)
            .map(|p| p.substitute(&|var| chosen.bindings.get(var).cloned()).erase_vars())
            .unwrap_or_else(|| Type::array_of(Type::object()));
        converted.push(Expression::new(
            array_ty,
            ExprKind::ArrayLiteral { items: trailing },
        ));
    }
    Some(Selection {
        member,
        args: converted,
        bindings: chosen.bindings,
    })
}

fn applicable<S: Signature>(
    model: &dyn ValueModel,
    candidate: &S,
    args: &[&Type],
    collapse_from: Option<usize>,
) -> Option<Candidate> {
    let params = candidate.params();
    let param_for = |i: usize| -> Option<Type> {
        match collapse_from {
            Some(from) if i >= from => params.get(from)?.component().cloned(),
            _ => params.get(i).cloned(),
        }
    };
    let mut bindings = AHashMap::new();
    let type_params = candidate.type_params();
    if !type_params.is_empty() {
        for (i, arg) in args.iter().enumerate() {
            if let Some(param) = param_for(i) {
                infer(model, &param, arg, type_params, &mut bindings);
            }
        }
    }
    let mut targets = SmallVec::new();
    let mut total = 0.0;
    for (i, arg) in args.iter().enumerate() {
        let param = param_for(i)?
            .substitute(&|var| bindings.get(var).cloned())
            .erase_vars();
        if !is_assignable(model, arg, &param) {
            return None;
        }
        total += distance(model, arg, &param);
        targets.push(param);
    }
    Some(Candidate {
        distance: total,
        targets,
        collapse_from,
        bindings,
    })
}

/// Binds method type variables appearing in `param` from the argument type `arg`.
fn infer(
    model: &dyn ValueModel,
    param: &Type,
    arg: &Type,
    vars: &[Arc<str>],
    out: &mut AHashMap<String, Type>,
) {
    match param {
        Type::Var(name) if vars.contains(name) => {
            if *arg != Type::Null {
                out.entry(name.to_string()).or_insert_with(|| arg.wrap());
            }
        }
        Type::Array(component) => {
            if let Some(arg_component) = arg.component() {
                infer(model, component, arg_component, vars, out);
            }
        }
        Type::Class { name, args } if !args.is_empty() => {
            if let Some(view) = supertype_as(model, arg, name) {
                for (param_arg, arg_arg) in args.iter().zip(view.type_args()) {
                    infer(model, param_arg, arg_arg, vars, out);
                }
            }
        }
        _ => {}
    }
}

/// Inserts the conversion needed to use `expr` where a primitive `to` is expected.
pub(crate) fn implicit_conversion(
    model: &Arc<dyn ValueModel>,
    expr: Expression,
    to: &Type,
) -> Expression {
    if !to.is_primitive() || expr.ty() == to {
        return expr;
    }
    Expression::new(
        to.clone(),
        ExprKind::Cast {
            expr: Box::new(expr),
            test: TypeTest::new(to.clone(), model.clone()),
        },
    )
}
