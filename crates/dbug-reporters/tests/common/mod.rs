#![allow(dead_code)]

use dbug_core::{AnchorType, AnchorTypeDef, Dbug};
use dbug_expr::{ClassBuilder, HostObject, Type, TypeRegistry, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
pub struct Order {
    pub number: i32,
}

impl HostObject for Order {
    fn type_name(&self) -> &str {
        "Order"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order #{}", self.number)
    }
}

pub fn order(number: i32) -> Value {
    Value::object(Order { number })
}

pub fn runtime() -> Dbug {
    let mut registry = TypeRegistry::new();
    registry.register(ClassBuilder::new("Order").build());
    Dbug::new(Arc::new(registry))
}

/// `Order` with a `region` static field, `status` and `qty` dynamic fields and the events
/// `load()` and `checkout(count: int)`.
pub fn declare_order(dbug: &Dbug) -> AnchorType {
    dbug.declare(
        AnchorTypeDef::builder("shop", Type::class("Order"))
            .external_static("region", Type::string())
            .external_dynamic("status", Type::string())
            .external_dynamic("qty", Type::int())
            .event("load", &[])
            .event("checkout", &[("count", Type::int())]),
    )
    .unwrap()
}
