mod common;

use common::{declare_order, order, registry, runtime, RecordingReporter};
use dbug_core::{
    CollectingSink, Compiled, ConfigChange, ConfigEvent, ConfigTemplate, Dbug, DbugDocument,
    DbugError, EventConfigTemplate, Reporter, ReporterDecl, ReporterError, ReporterResult,
    Severity,
};
use dbug_expr::Value;
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

fn checked_runtime() -> (Dbug, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let dbug = Dbug::with_error_sink(Arc::new(registry()), sink.clone());
    (dbug, sink)
}

#[test]
fn template_changes_reach_live_anchors() {
    let dbug = runtime();
    let orders = declare_order(&dbug);
    let a = ConfigTemplate::new("Order").id("a").condition("qty > 1");
    let b = ConfigTemplate::new("Order").id("b");
    dbug.set_templates(vec![a.clone()]);

    let anchor = orders
        .debug(order(1))
        .with("region", "EU")
        .unwrap()
        .with("qty", 2)
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(anchor.active_count(), 1);

    let changes = dbug.set_templates(vec![a.clone(), b.clone()]);
    assert_eq!(changes, vec![ConfigChange::Added(Arc::new(b.clone()))]);
    assert_eq!(anchor.active_count(), 2);
    assert_eq!(anchor.attached_configs(), 2);

    let stricter = ConfigTemplate::new("Order").id("a").condition("qty > 5");
    let changes = dbug.set_templates(vec![stricter.clone(), b.clone()]);
    assert_eq!(changes.len(), 1);
    assert!(matches!(changes[0], ConfigChange::Updated { .. }));
    assert_eq!(anchor.active_count(), 1);
    assert_eq!(anchor.attached_configs(), 2);
    anchor.set_dynamic_value("qty", 6).unwrap();
    assert_eq!(anchor.active_count(), 2);

    assert!(dbug.set_templates(vec![stricter.clone(), b.clone()]).is_empty());

    dbug.set_templates(vec![b]);
    assert_eq!(anchor.active_count(), 1);
    assert_eq!(anchor.attached_configs(), 1);

    dbug.set_templates(Vec::new());
    assert_eq!(anchor.active_count(), 0);
    assert_eq!(anchor.attached_configs(), 0);
    assert!(anchor.event("checkout").unwrap().is_noop());
    assert!(orders.configs().is_empty());
}

#[test]
fn retargeting_a_template_moves_it_between_types() {
    let dbug = runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order").id("x")]);
    assert_eq!(orders.configs().len(), 1);

    let changes = dbug.set_templates(vec![ConfigTemplate::new("Order").id("x").schema("other")]);
    assert_eq!(changes.len(), 1);
    assert!(orders.configs().is_empty());

    dbug.apply(vec![ConfigChange::Added(Arc::new(ConfigTemplate::new("Order").id("y")))]);
    assert_eq!(orders.configs().len(), 1);
    assert_eq!(dbug.templates().len(), 2);
}

#[test]
fn types_declared_later_pick_up_installed_templates() {
    let dbug = runtime();
    dbug.set_templates(vec![
        ConfigTemplate::new("Order").id("a"),
        ConfigTemplate::new("Cart").id("b"),
    ]);
    let orders = declare_order(&dbug);
    let configs = orders.configs();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].id(), Some("a"));

    // Declaring from the same site again returns the existing registration.
    let again = declare_order(&dbug);
    assert_eq!(again.configs().len(), 1);
    assert_eq!(dbug.anchor_types().len(), 1);
}

#[test]
fn broken_parts_of_a_template_are_dropped() {
    let (dbug, sink) = checked_runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("partial")
        .variable("total", "price * qty")
        .variable("bad", "weight + 1")
        .variable("status", "1")
        .uncached_variable("clock", "qty + 1")
        .variable("cached", "clock * 2")
        .event(EventConfigTemplate::new("refund"))
        .event(EventConfigTemplate::new("checkout").variable("count", "1"))]);

    let configs = orders.configs();
    assert_eq!(configs.len(), 1);
    let names: Vec<&str> = configs[0].variables().map(|v| &*v.name).collect();
    assert_eq!(names, vec!["total", "clock"]);

    let targets: Vec<String> = sink.errors().into_iter().map(|d| d.target).collect();
    assert_eq!(
        targets,
        vec!["status", "bad", "cached", "refund", "checkout.count"]
    );
    let diagnostics = sink.take();
    assert!(diagnostics
        .iter()
        .all(|d| d.anchor_type == "shop:Order" && d.config_id.as_deref() == Some("partial")));
    assert!(diagnostics[0].message.contains("hides an anchor field"));
    assert!(diagnostics[2]
        .message
        .contains("cannot depend on uncacheable variable clock"));
}

#[test]
fn circular_variables_are_reported() {
    let (dbug, sink) = checked_runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("loop")
        .variable("a", "b + 1")
        .variable("b", "a + 1")
        .variable("c", "qty")]);

    let errors = sink.errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].target, "b");
    assert_eq!(errors[1].target, "a");
    for error in &errors {
        assert_eq!(error.message, "circular dependency detected: a->b->a");
    }
    let configs = orders.configs();
    let names: Vec<&str> = configs[0].variables().map(|v| &*v.name).collect();
    assert_eq!(names, vec!["c"]);
}

#[test]
fn templates_with_broken_conditions_are_not_installed() {
    let (dbug, sink) = checked_runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![
        ConfigTemplate::new("Order").id("typed").condition("qty + 1"),
        ConfigTemplate::new("Order").id("syntax").condition("qty >"),
    ]);
    assert!(orders.configs().is_empty());
    let errors = sink.errors();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|d| d.target == "condition" && d.severity == Severity::Error));

    // With no compiled config the type's anchors are inert.
    assert!(orders.debug(order(2)).build().unwrap().is_inert());
}

#[test]
fn dependency_sets_follow_variables_transitively() {
    let dbug = runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("deps")
        .condition("total > 100")
        .variable("total", "price * qty")
        .variable("label", "region")]);
    let configs = orders.configs();
    let config = &configs[0];
    let def = config.anchor_type();
    let price = def.dynamic_index("price").unwrap();
    let qty = def.dynamic_index("qty").unwrap();
    let status = def.dynamic_index("status").unwrap();

    let condition = config.condition_dependencies();
    assert!(condition.dynamic.contains(price) && condition.dynamic.contains(qty));
    assert!(!condition.dynamic.contains(status));
    assert!(condition.variables.contains(config.variable_index("total").unwrap()));

    let label = config.variable(config.variable_index("label").unwrap()).unwrap();
    assert!(label.deps.dynamic.is_empty());
}

/// Records the lifecycle calls reporters created by the factory receive.
struct LifecycleReporter {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    events: Arc<RecordingReporter>,
}

impl Reporter for LifecycleReporter {
    fn configure(&mut self, config: &serde_json::Value) -> ReporterResult<()> {
        if config["fail"] == true {
            return Err(ReporterError::config("fail requested"));
        }
        self.log.lock().unwrap().push(format!("configure {}", self.name));
        Ok(())
    }

    fn event_occurred(
        &self,
        event: &ConfigEvent,
        configured: &Compiled,
        compiled: &Compiled,
    ) -> ReporterResult<()> {
        self.events.event_occurred(event, configured, compiled)
    }

    fn close(&self) -> ReporterResult<()> {
        self.log.lock().unwrap().push(format!("close {}", self.name));
        Ok(())
    }
}

fn lifecycle_runtime() -> (Dbug, Arc<Mutex<Vec<String>>>, Arc<RecordingReporter>) {
    let dbug = runtime();
    let log = Arc::new(Mutex::new(Vec::new()));
    let events = RecordingReporter::new();
    let (factory_log, factory_events) = (log.clone(), events.clone());
    dbug.register_factory(
        "lifecycle",
        move |decl: &ReporterDecl| -> ReporterResult<Box<dyn Reporter>> {
            factory_log.lock().unwrap().push(format!("create {}", decl.name));
            Ok(Box::new(LifecycleReporter {
                name: decl.name.clone(),
                log: factory_log.clone(),
                events: factory_events.clone(),
            }))
        },
    );
    (dbug, log, events)
}

const DOCUMENT: &str = r#"{
    "reporters": [
        {"name": "audit", "kind": "lifecycle"},
        {"name": "spare", "kind": "lifecycle"}
    ],
    "configs": [{
        "id": "checkout",
        "type": "Order",
        "events": [{"event": "checkout"}],
        "reporters": ["audit"]
    }]
}"#;

#[test]
fn documents_install_reporters_and_templates() {
    let (dbug, log, events) = lifecycle_runtime();
    let orders = declare_order(&dbug);
    dbug.load_document(DbugDocument::from_json(DOCUMENT).unwrap())
        .unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["create audit", "configure audit", "create spare", "configure spare"]
    );
    assert!(dbug.reporter("audit").is_some());

    let anchor = orders
        .debug(order(3))
        .with("region", "EU")
        .unwrap()
        .build()
        .unwrap();
    anchor.event("checkout").unwrap().with("count", 1).unwrap().occurred().unwrap();
    assert_eq!(events.names(), vec!["checkout"]);

    // Reloading the same document keeps every reporter.
    log.lock().unwrap().clear();
    dbug.load_document(DbugDocument::from_json(DOCUMENT).unwrap())
        .unwrap();
    assert!(log.lock().unwrap().is_empty());

    // Changing a declaration recreates that reporter and recompiles the templates naming it.
    let mut document = DbugDocument::from_json(DOCUMENT).unwrap();
    document.reporters[0].config = serde_json::json!({"verbose": true});
    document.reporters.truncate(1);
    dbug.load_document(document).unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["create audit", "configure audit", "close spare", "close audit"]
    );
    assert!(dbug.reporter("spare").is_none());
    let configs = orders.configs();
    assert!(configs[0].reporters()[0].same(&dbug.reporter("audit").unwrap()));

    anchor.event("checkout").unwrap().with("count", 2).unwrap().occurred().unwrap();
    assert_eq!(events.names(), vec!["checkout"]);

    log.lock().unwrap().clear();
    dbug.close();
    assert_eq!(*log.lock().unwrap(), vec!["close audit"]);
}

#[test]
fn failing_documents_change_nothing() {
    let (dbug, log, _) = lifecycle_runtime();
    declare_order(&dbug);
    let document = DbugDocument {
        reporters: vec![
            ReporterDecl::new("ok", "lifecycle"),
            ReporterDecl::new("broken", "lifecycle").with_config(serde_json::json!({"fail": true})),
        ],
        configs: vec![ConfigTemplate::new("Order").id("x")],
    };
    assert!(matches!(
        dbug.load_document(document),
        Err(DbugError::Reporter { ref name, .. }) if name == "broken"
    ));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["create ok", "configure ok", "create broken", "close ok"]
    );
    assert!(dbug.reporter("ok").is_none());
    assert!(dbug.templates().is_empty());

    let unknown = DbugDocument {
        reporters: vec![ReporterDecl::new("x", "missing")],
        configs: Vec::new(),
    };
    assert!(matches!(
        dbug.load_document(unknown),
        Err(DbugError::UnknownReporterKind { .. })
    ));
}

#[test]
fn adding_a_reporter_recompiles_templates_naming_it() {
    let (dbug, sink) = checked_runtime();
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("late")
        .event(EventConfigTemplate::new("checkout"))
        .reporter("late")]);
    assert_eq!(sink.take().len(), 1);
    assert!(orders.configs()[0].reporters().is_empty());

    let reporter = RecordingReporter::new();
    dbug.add_reporter("late", reporter.clone());
    assert_eq!(orders.configs()[0].reporters().len(), 1);

    let anchor = orders
        .debug(order(4))
        .with("region", "EU")
        .unwrap()
        .build()
        .unwrap();
    anchor.event("checkout").unwrap().with("count", 3).unwrap().occurred().unwrap();
    let recorded = reporter.take();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].values, vec![Value::Int(3)]);
}
