#![allow(dead_code)]

use dbug_core::{
    AnchorType, AnchorTypeDef, Compiled, ConfigEvent, Dbug, Reporter, ReporterResult,
};
use dbug_expr::{ClassBuilder, HostObject, Type, TypeRegistry, Value};
use std::any::Any;
use std::sync::{Arc, Mutex};

/// A host object standing in for an application's order entity.
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
}

pub fn order(number: i32) -> Value {
    Value::object(Order { number })
}

pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register(ClassBuilder::new("Order").build());
    registry
}

pub fn runtime() -> Dbug {
    Dbug::new(Arc::new(registry()))
}

/// `Order` with an external `region` static field, dynamic `status`, `price` and `qty` fields and
/// a `checkout(count: int)` event.
pub fn declare_order(dbug: &Dbug) -> AnchorType {
    dbug.declare(
        AnchorTypeDef::builder("shop", Type::class("Order"))
            .external_static("region", Type::string())
            .external_dynamic("status", Type::string())
            .external_dynamic("price", Type::int())
            .external_dynamic("qty", Type::int())
            .event("checkout", &[("count", Type::int())]),
    )
    .unwrap()
}

/// One delivery as seen by a reporter.
#[derive(Clone, Debug, PartialEq)]
pub struct Recorded {
    pub event: String,
    pub values: Vec<Value>,
    pub event_config_values: Vec<Option<Value>>,
}

#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<Recorded>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn names(&self) -> Vec<String> {
        self.take().into_iter().map(|r| r.event).collect()
    }
}

impl Reporter for RecordingReporter {
    fn event_occurred(
        &self,
        event: &ConfigEvent,
        _configured: &Compiled,
        _compiled: &Compiled,
    ) -> ReporterResult<()> {
        self.events.lock().unwrap().push(Recorded {
            event: event.event_type().name().to_string(),
            values: event.occurrence().values().to_vec(),
            event_config_values: event.event_config_values().to_vec(),
        });
        Ok(())
    }
}
