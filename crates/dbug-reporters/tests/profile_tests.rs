mod common;

use common::{declare_order, order, runtime};
use dbug_core::{ConfigTemplate, EventConfigTemplate};
use dbug_reporters::ProfilingReporter;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn keys(nodes: &[dbug_reporters::ProfileNode]) -> Vec<(String, u64)> {
    nodes.iter().map(|n| (n.key.clone(), n.count)).collect()
}

#[test]
fn nested_transactions_build_a_call_tree() {
    let dbug = runtime();
    let profiler = Arc::new(ProfilingReporter::new());
    dbug.add_reporter("timing", profiler.clone());
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("shop")
        .event(EventConfigTemplate::new("load"))
        .event(EventConfigTemplate::new("checkout").variable("big", "count > 5"))
        .reporter("timing")]);
    let anchor = orders
        .debug(order(1))
        .with("region", "EU")
        .unwrap()
        .build()
        .unwrap();

    {
        let _load = anchor.event("load").unwrap().begin().unwrap();
        for count in [1, 9, 2] {
            let _checkout = anchor
                .event("checkout")
                .unwrap()
                .with("count", count)
                .unwrap()
                .begin()
                .unwrap();
            thread::sleep(Duration::from_millis(2));
        }
    }

    let report = profiler.report();
    assert_eq!(report.len(), 1);
    let roots = &report[0].roots;
    assert_eq!(keys(roots), vec![("shop:load".to_string(), 1)]);
    let load = &roots[0];
    assert_eq!(
        keys(&load.children),
        vec![
            ("shop:checkout[false]".to_string(), 2),
            ("shop:checkout[true]".to_string(), 1),
        ]
    );
    let nested: Duration = load.children.iter().map(|c| c.total).sum();
    assert!(nested >= Duration::from_millis(6));
    assert!(load.total >= nested);
    assert_eq!(load.intrinsic, load.total - nested);

    profiler.reset();
    let report = profiler.report();
    assert_eq!(report[0].roots[0].count, 0);
    assert_eq!(report[0].roots[0].total, Duration::ZERO);
}

#[test]
fn threads_are_profiled_separately() {
    let dbug = runtime();
    let profiler = Arc::new(ProfilingReporter::new());
    dbug.add_reporter("timing", profiler.clone());
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("shop")
        .event(EventConfigTemplate::new("load"))
        .reporter("timing")]);
    let anchor = orders
        .debug(order(2))
        .with("region", "EU")
        .unwrap()
        .build()
        .unwrap();

    let _outer = anchor.event("load").unwrap().begin().unwrap();
    let worker = anchor.clone();
    thread::Builder::new()
        .name("worker".to_string())
        .spawn(move || {
            worker.event("load").unwrap().begin().unwrap().end();
        })
        .unwrap()
        .join()
        .unwrap();

    let report = profiler.report();
    assert_eq!(report.len(), 2);
    let worker = report.iter().find(|t| t.thread == "worker").unwrap();
    assert_eq!(keys(&worker.roots), vec![("shop:load".to_string(), 1)]);
    assert!(worker.roots[0].children.is_empty());
}
