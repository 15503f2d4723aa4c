//! Typed expression language used by dbug configurations.
//!
//! Expressions are parsed ([`parser`]), resolved against an [`Environment`] and a [`ValueModel`]
//! into typed [`Expression`] trees ([`compile`]), and then either evaluated or specialized
//! against a [`Scope`] ([`eval`]).
pub mod assign;
pub mod ast;
mod builtins;
pub mod compile;
mod error;
pub mod eval;
mod expr;
pub mod model;
mod overload;
pub mod parser;
mod types;
mod value;

pub use crate::compile::{compile, resolve, resolve_type, Environment, Names, HOST_VALUE_NAME};
pub use crate::error::{
    EvalError, EvalResult, ParseError, ParseResult, TypeError, TypeResult,
};
pub use crate::eval::{refresh, Bindings, EmptyScope, Scope};
pub use crate::expr::{ExprKind, Expression, Operands, RefKind, TypeTest};
pub use crate::model::{
    ClassBuilder, ClassInfo, ConstructorInfo, FieldInfo, MethodInfo, TypeRegistry, ValueModel,
};
pub use crate::types::{Primitive, Type};
pub use crate::value::{ArrayValue, HostObject, Value};
