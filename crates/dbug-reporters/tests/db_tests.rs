mod common;

use common::{declare_order, order, runtime};
use dbug_core::{ConfigTemplate, DbugDocument, EventConfigTemplate};
use dbug_reporters::{register_defaults, DbReporter};
use pretty_assertions::assert_eq;
use rusqlite::Connection;
use std::sync::Arc;

fn count(db: &DbReporter, table: &str) -> i64 {
    db.with_connection(|conn| {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
    })
    .unwrap()
}

fn rows(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<(String, Option<String>)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
    rows.collect()
}

#[test]
fn events_are_recorded_with_their_anchor_and_config() {
    let dbug = runtime();
    let db = Arc::new(DbReporter::open_in_memory().unwrap());
    dbug.add_reporter("db", db.clone());
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .id("cfg")
        .condition("qty < 10")
        .event(EventConfigTemplate::new("load"))
        .event(EventConfigTemplate::new("checkout").variable("big", "count > 5"))
        .reporter("db")]);
    let anchor = orders
        .debug(order(4))
        .with("region", "EU")
        .unwrap()
        .with("qty", 2)
        .unwrap()
        .build()
        .unwrap();
    anchor.set_dynamic_value("status", "open").unwrap();

    let load = anchor.event("load").unwrap().begin().unwrap();
    anchor
        .event("checkout")
        .unwrap()
        .with("count", 9)
        .unwrap()
        .occurred()
        .unwrap();
    anchor
        .event("checkout")
        .unwrap()
        .with("count", 2)
        .unwrap()
        .occurred()
        .unwrap();

    assert_eq!(count(&db, "schemas"), 1);
    assert_eq!(count(&db, "anchor_types"), 1);
    assert_eq!(count(&db, "anchors"), 1);
    assert_eq!(count(&db, "anchor_configs"), 1);
    assert_eq!(count(&db, "config_events"), 2);
    assert_eq!(count(&db, "events"), 3);

    let config = db
        .with_connection(|conn| {
            conn.query_row("SELECT config_id, condition FROM configs", [], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
            })
        })
        .unwrap();
    assert_eq!(config, ("cfg".to_string(), Some("qty < 10".to_string())));

    let anchor_row = db
        .with_connection(|conn| {
            rows(
                conn,
                "SELECT a.host, v.value FROM anchors a JOIN anchor_values v ON v.anchor = a.id",
            )
        })
        .unwrap();
    assert_eq!(anchor_row, vec![("order #4".to_string(), Some("EU".to_string()))]);

    let checkout = db
        .with_connection(|conn| {
            rows(
                conn,
                "SELECT v.name, v.value FROM event_values v JOIN events e ON e.id = v.event
                 JOIN config_events c ON c.id = e.config_event
                 JOIN event_types t ON t.id = c.event_type
                 WHERE t.name = 'checkout' ORDER BY e.id, v.rowid",
            )
        })
        .unwrap();
    let some = |name: &str, value: &str| (name.to_string(), Some(value.to_string()));
    assert_eq!(
        checkout,
        vec![
            some("count", "9"),
            some("status", "open"),
            some("qty", "2"),
            some("big", "true"),
            some("count", "2"),
            some("status", "open"),
            some("qty", "2"),
            some("big", "false"),
        ]
    );

    let open_loads: i64 = db
        .with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM events e JOIN config_events c ON c.id = e.config_event
                 JOIN event_types t ON t.id = c.event_type
                 WHERE t.name = 'load' AND e.end_time IS NULL",
                [],
                |r| r.get(0),
            )
        })
        .unwrap();
    assert_eq!(open_loads, 1);

    load.end();
    let ended: (String, String) = db
        .with_connection(|conn| {
            conn.query_row(
                "SELECT e.start_time, e.end_time FROM events e JOIN config_events c ON c.id = e.config_event
                 JOIN event_types t ON t.id = c.event_type WHERE t.name = 'load'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
        })
        .unwrap();
    assert!(ended.0 <= ended.1, "{ended:?}");
}

#[test]
fn a_second_anchor_reuses_the_type_and_config_rows() {
    let dbug = runtime();
    let db = Arc::new(DbReporter::open_in_memory().unwrap());
    dbug.add_reporter("db", db.clone());
    let orders = declare_order(&dbug);
    dbug.set_templates(vec![ConfigTemplate::new("Order")
        .event(EventConfigTemplate::new("checkout"))
        .reporter("db")]);
    for number in [1, 2] {
        let anchor = orders
            .debug(order(number))
            .with("region", "US")
            .unwrap()
            .build()
            .unwrap();
        anchor
            .event("checkout")
            .unwrap()
            .with("count", number)
            .unwrap()
            .occurred()
            .unwrap();
    }
    assert_eq!(count(&db, "anchor_types"), 1);
    assert_eq!(count(&db, "configs"), 1);
    assert_eq!(count(&db, "config_events"), 1);
    assert_eq!(count(&db, "anchors"), 2);
    assert_eq!(count(&db, "events"), 2);
}

#[test]
fn documents_create_database_reporters() {
    let dbug = runtime();
    register_defaults(&dbug);
    let _orders = declare_order(&dbug);
    dbug.load_document(
        DbugDocument::from_json(
            r#"{
              "reporters": [{ "name": "store", "kind": "db" }],
              "configs": [{ "type": "Order", "events": [{ "event": "checkout" }], "reporters": ["store"] }]
            }"#,
        )
        .unwrap(),
    )
    .unwrap();
    assert!(dbug.reporter("store").is_some());
}
