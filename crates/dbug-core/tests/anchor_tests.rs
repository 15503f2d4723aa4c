mod common;

use common::{declare_order, order, registry, runtime, Order, Recorded, RecordingReporter};
use dbug_core::{
    AnchorTypeDef, ConfigTemplate, Dbug, DbugError, EventConfigTemplate, ANCHOR_ACTIVE,
    VALUE_UPDATE,
};
use dbug_expr::{ClassBuilder, EvalError, Type, Value};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn shipped_config() -> ConfigTemplate {
    ConfigTemplate::new("Order")
        .id("shipped")
        .condition(r#"status == "SHIPPED""#)
        .event(EventConfigTemplate::new(ANCHOR_ACTIVE))
        .reporter("rec")
}

#[test]
fn shipping_an_order_activates_its_anchor() {
    let dbug = runtime();
    let reporter = RecordingReporter::new();
    dbug.add_reporter("rec", reporter.clone());
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![shipped_config()]);

    let anchor = orders
        .debug(order(1))
        .with("region", "EU")
        .unwrap()
        .with("status", "NEW")
        .unwrap()
        .build()
        .unwrap();
    assert!(!anchor.is_active());
    assert_eq!(anchor.attached_configs(), 1);
    assert!(reporter.take().is_empty());

    let previous = anchor.set_dynamic_value("status", "SHIPPED").unwrap();
    assert_eq!(previous, Value::from("NEW"));
    assert!(anchor.is_active());
    assert_eq!(anchor.active_count(), 1);
    assert_eq!(
        reporter.take(),
        vec![Recorded {
            event: ANCHOR_ACTIVE.to_string(),
            values: vec![Value::Bool(true), Value::from("status"), Value::from("NEW")],
            event_config_values: vec![],
        }]
    );

    anchor.set_dynamic_value("status", "RETURNED").unwrap();
    assert!(!anchor.is_active());
    assert_eq!(
        reporter.take(),
        vec![Recorded {
            event: ANCHOR_ACTIVE.to_string(),
            values: vec![
                Value::Bool(false),
                Value::from("status"),
                Value::from("RETURNED")
            ],
            event_config_values: vec![],
        }]
    );
}

#[test]
fn anchors_active_at_attach_report_without_a_field() {
    let dbug = runtime();
    let reporter = RecordingReporter::new();
    dbug.add_reporter("rec", reporter.clone());
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![shipped_config()]);

    let anchor = orders
        .debug(order(2))
        .with("region", "EU")
        .unwrap()
        .with("status", "SHIPPED")
        .unwrap()
        .build()
        .unwrap();
    assert!(anchor.is_active());
    assert_eq!(
        reporter.take(),
        vec![Recorded {
            event: ANCHOR_ACTIVE.to_string(),
            values: vec![Value::Bool(true), Value::Null, Value::Null],
            event_config_values: vec![],
        }]
    );
}

fn counting_runtime(calls: &Arc<AtomicUsize>) -> Dbug {
    let counter = calls.clone();
    let mut registry = registry();
    registry.register(
        ClassBuilder::new("Calc")
            .static_method("mul", vec![Type::int(), Type::int()], Type::int(), move |args| {
                counter.fetch_add(1, Ordering::SeqCst);
                let a = args[0].as_i32().unwrap_or_default();
                let b = args[1].as_i32().unwrap_or_default();
                Ok(Value::Int(a * b))
            })
            .build(),
    );
    Dbug::new(Arc::new(registry))
}

#[test]
fn cacheable_variables_recompute_only_when_their_inputs_change() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dbug = counting_runtime(&calls);
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("totals")
        .variable("total", "Calc.mul(price, qty)")]);

    let anchor = orders
        .debug(order(3))
        .with("region", "EU")
        .unwrap()
        .with("price", 10)
        .unwrap()
        .with("qty", 1)
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(anchor.config_value("totals", "total"), Some(Value::Int(10)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    anchor.set_dynamic_value("qty", 5).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(anchor.config_value("totals", "total"), Some(Value::Int(50)));
    assert_eq!(anchor.config_value("totals", "total"), Some(Value::Int(50)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    anchor.set_dynamic_value("status", "PAID").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(anchor.config_value("totals", "missing"), None);
    assert_eq!(anchor.config_value("other", "total"), None);
}

#[test]
fn uncached_variables_evaluate_on_every_read() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dbug = counting_runtime(&calls);
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("totals")
        .uncached_variable("total", "Calc.mul(price, qty)")]);

    let anchor = orders
        .debug(order(4))
        .with("region", "EU")
        .unwrap()
        .with("price", 3)
        .unwrap()
        .with("qty", 2)
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(anchor.config_value("totals", "total"), Some(Value::Int(6)));
    assert_eq!(anchor.config_value("totals", "total"), Some(Value::Int(6)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    anchor.set_dynamic_value("qty", 4).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(anchor.config_value("totals", "total"), Some(Value::Int(12)));
}

#[test]
fn variables_of_inactive_configs_catch_up_when_read() {
    let dbug = runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("big")
        .condition("qty > 10")
        .variable("total", "price * qty")]);

    let anchor = orders
        .debug(order(5))
        .with("region", "EU")
        .unwrap()
        .with("price", 2)
        .unwrap()
        .build()
        .unwrap();
    assert!(!anchor.is_active());
    anchor.set_dynamic_value("price", 7).unwrap();
    assert_eq!(anchor.config_value("big", "total"), Some(Value::Int(0)));
    anchor.set_dynamic_value("qty", 3).unwrap();
    assert_eq!(anchor.config_value("big", "total"), Some(Value::Int(21)));
    anchor.set_dynamic_value("qty", 11).unwrap();
    assert!(anchor.is_active());
    assert_eq!(anchor.config_value("big", "total"), Some(Value::Int(77)));
}

#[test]
fn value_updates_name_the_variables_reading_the_field() {
    let dbug = runtime();
    let reporter = RecordingReporter::new();
    dbug.add_reporter("rec", reporter.clone());
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("totals")
        .variable("total", "price * qty")
        .variable("label", r#"status + "!""#)
        .event(EventConfigTemplate::new(VALUE_UPDATE))
        .reporter("rec")]);

    let anchor = orders
        .debug(order(6))
        .with("region", "EU")
        .unwrap()
        .build()
        .unwrap();
    anchor.set_dynamic_value("qty", 2).unwrap();

    let recorded = reporter.take();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].event, VALUE_UPDATE);
    assert_eq!(recorded[0].values[0], Value::from("qty"));
    let names = recorded[0].values[1].as_array().unwrap().items().to_vec();
    assert_eq!(names, vec![Value::from("total")]);
}

#[test]
fn event_conditions_filter_deliveries() {
    let dbug = runtime();
    let reporter = RecordingReporter::new();
    dbug.add_reporter("rec", reporter.clone());
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order").id("bulk").event(
        EventConfigTemplate::new("checkout")
            .condition("count > 10")
            .variable("doubled", "count * 2")
            .reporter("rec"),
    )]);

    let anchor = orders
        .debug(order(7))
        .with("region", "EU")
        .unwrap()
        .build()
        .unwrap();
    anchor.event("checkout").unwrap().with("count", 5).unwrap().occurred().unwrap();
    assert!(reporter.take().is_empty());

    anchor.event("checkout").unwrap().with("count", 11).unwrap().occurred().unwrap();
    assert_eq!(
        reporter.take(),
        vec![Recorded {
            event: "checkout".to_string(),
            values: vec![Value::Int(11)],
            event_config_values: vec![Some(Value::Int(22))],
        }]
    );
}

#[test]
fn events_reach_attached_configs_that_are_not_active() {
    let dbug = runtime();
    let reporter = RecordingReporter::new();
    dbug.add_reporter("rec", reporter.clone());
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![
        ConfigTemplate::new("Order")
            .id("a")
            .condition(r#"status == "SHIPPED""#)
            .event(EventConfigTemplate::new("checkout"))
            .reporter("rec"),
        ConfigTemplate::new("Order")
            .id("b")
            .condition("qty > 100")
            .event(EventConfigTemplate::new("checkout"))
            .reporter("rec"),
    ]);

    let anchor = orders
        .debug(order(6))
        .with("region", "EU")
        .unwrap()
        .with("status", "SHIPPED")
        .unwrap()
        .with("qty", 1)
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(anchor.attached_configs(), 2);
    assert_eq!(anchor.active_count(), 1);

    anchor.event("checkout").unwrap().with("count", 3).unwrap().occurred().unwrap();
    assert_eq!(reporter.names(), vec!["checkout", "checkout"]);
}

#[test]
fn events_check_their_fields() {
    let dbug = runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order").id("all")]);
    let anchor = orders
        .debug(order(8))
        .with("region", "EU")
        .unwrap()
        .build()
        .unwrap();

    assert!(matches!(
        anchor.event("refund"),
        Err(DbugError::UnknownEvent { .. })
    ));
    assert!(matches!(
        anchor.event(ANCHOR_ACTIVE),
        Err(DbugError::ReservedEvent { .. })
    ));
    let builder = anchor.event("checkout").unwrap();
    assert!(!builder.is_noop());
    assert!(matches!(
        builder.with("count", "many"),
        Err(DbugError::FieldType { .. })
    ));
    assert!(matches!(
        anchor.event("checkout").unwrap().with("total", 1),
        Err(DbugError::UnknownEventField { .. })
    ));
    match anchor.event("checkout").unwrap().occurred() {
        Err(DbugError::MissingEventFields { names, .. }) => assert_eq!(names, vec!["count"]),
        other => panic!("expected missing fields, got {other:?}"),
    }
}

#[test]
fn events_on_inactive_anchors_are_no_ops() {
    let dbug = runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![shipped_config()]);
    let anchor = orders
        .debug(order(9))
        .with("region", "EU")
        .unwrap()
        .build()
        .unwrap();
    let builder = anchor.event("checkout").unwrap();
    assert!(builder.is_noop());
    builder.occurred().unwrap();
}

#[test]
fn configs_that_can_never_hold_are_not_attached() {
    let dbug = runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("us")
        .condition(r#"region == "US""#)]);
    let eu = orders
        .debug(order(10))
        .with("region", "EU")
        .unwrap()
        .build()
        .unwrap();
    assert!(!eu.is_inert());
    assert_eq!(eu.attached_configs(), 0);
    let us = orders
        .debug(order(11))
        .with("region", "US")
        .unwrap()
        .build()
        .unwrap();
    assert!(us.is_active());
}

#[test]
fn anchors_without_configs_are_inert() {
    let dbug = runtime();
    let orders = declare_order(&dbug);
    let anchor = orders.debug(order(12)).build().unwrap();
    assert!(anchor.is_inert());
    assert!(!anchor.is_active());
    assert_eq!(anchor.host(), None);
    assert_eq!(anchor.set_dynamic_value("qty", 3).unwrap(), Value::Null);
    assert_eq!(anchor.dynamic_value("qty"), None);
    assert!(matches!(
        anchor.set_dynamic_value("qty", "three"),
        Err(DbugError::FieldType { .. })
    ));
    assert!(matches!(
        anchor.set_dynamic_value("weight", 3),
        Err(DbugError::UnknownField { .. })
    ));
    assert!(anchor.event("checkout").unwrap().is_noop());
}

#[test]
fn building_twice_returns_the_same_anchor() {
    let dbug = runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order").id("all")]);
    let host = order(13);
    let first = orders
        .debug(host.clone())
        .with("region", "EU")
        .unwrap()
        .build()
        .unwrap();
    first.set_dynamic_value("qty", 9).unwrap();

    // The existing anchor is returned even without the external fields.
    let second = orders.debug(host.clone()).build().unwrap();
    assert_eq!(second.dynamic_value("qty"), Some(Value::Int(9)));
    assert_eq!(second.static_value("region"), Some(Value::from("EU")));
    assert_eq!(orders.anchors(), 1);

    let other = orders.debug(order(13)).build();
    assert!(matches!(
        other,
        Err(DbugError::MissingParameters { ref names, .. }) if names == &vec!["region".to_string()]
    ));

    drop((first, second, host));
    assert_eq!(orders.anchors(), 0);
    assert_eq!(dbug.sweep(), 1);
}

#[test]
fn builder_rejects_unknown_and_produced_fields() {
    let dbug = runtime();
    let orders = dbug
        .declare(
            AnchorTypeDef::builder("shop", Type::class("Order"))
                .static_field("number", Type::int(), |host| {
                    host.as_host::<Order>()
                        .map(|order| Value::Int(order.number))
                        .ok_or_else(|| EvalError::mismatch("Order", host.runtime_type()))
                })
                .external_dynamic("status", Type::string()),
        )
        .unwrap();
    dbug.set_templates(vec![ConfigTemplate::new("Order").id("all")]);

    assert!(matches!(
        orders.debug(order(14)).with("number", 1),
        Err(DbugError::NotExternal { .. })
    ));
    assert!(matches!(
        orders.debug(order(14)).with("weight", 1),
        Err(DbugError::UnknownField { .. })
    ));
    assert!(matches!(
        orders.debug(order(14)).with("status", 1),
        Err(DbugError::FieldType { .. })
    ));
    assert!(matches!(
        orders.debug(Value::Int(1)).build(),
        Err(DbugError::NoIdentity { .. })
    ));

    let anchor = orders.debug(order(14)).build().unwrap();
    assert_eq!(anchor.static_value("number"), Some(Value::Int(14)));
    assert_eq!(anchor.dynamic_value("status"), Some(Value::Null));
}

#[test]
fn produced_dynamic_fields_refresh_from_the_host() {
    let dbug = runtime();
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = reads.clone();
    let orders = dbug
        .declare(
            AnchorTypeDef::builder("shop", Type::class("Order"))
                .dynamic_field("reads", Type::int(), move |_| {
                    Ok(Value::Int(counter.fetch_add(1, Ordering::SeqCst) as i32))
                })
                .external_dynamic("status", Type::string()),
        )
        .unwrap();
    dbug.set_templates(vec![ConfigTemplate::new("Order").id("all")]);
    let anchor = orders.debug(order(15)).build().unwrap();
    assert_eq!(anchor.dynamic_value("reads"), Some(Value::Int(0)));
    assert_eq!(anchor.refresh_dynamic("reads").unwrap(), Value::Int(0));
    assert_eq!(anchor.dynamic_value("reads"), Some(Value::Int(1)));
    assert!(matches!(
        anchor.refresh_dynamic("status"),
        Err(DbugError::NoProducer { .. })
    ));
    anchor
        .modify_dynamic_value("status", |_| Value::from("NEW"))
        .unwrap();
    assert_eq!(anchor.dynamic_value("status"), Some(Value::from("NEW")));
}

#[test]
fn placeholders_resolve_once_the_anchor_is_built() {
    let dbug = runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order").id("all")]);
    let host = order(16);

    let placeholder = orders.debug(host.clone()).build_if_satisfied().unwrap();
    assert!(placeholder.is_placeholder());
    assert!(!placeholder.is_active());
    assert!(placeholder.event("checkout").unwrap().is_noop());
    assert!(matches!(
        placeholder.set_dynamic_value("qty", 1),
        Err(DbugError::Unresolved { .. })
    ));

    let anchor = orders
        .debug(host.clone())
        .with("region", "EU")
        .unwrap()
        .build()
        .unwrap();
    assert!(!placeholder.is_placeholder());
    assert!(placeholder.is_active());
    placeholder.set_dynamic_value("qty", 2).unwrap();
    assert_eq!(anchor.dynamic_value("qty"), Some(Value::Int(2)));
}
