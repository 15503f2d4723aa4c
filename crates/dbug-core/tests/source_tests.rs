mod common;

use common::{declare_order, runtime};
use dbug_core::{ConfigSource, Dbug};
use pretty_assertions::assert_eq;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

/// Writes `text` and moves the file's modification time `age` seconds into the future, so
/// consecutive writes never share a timestamp.
fn write(path: &Path, text: &str, age: u64) {
    fs::write(path, text).unwrap();
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(age))
        .unwrap();
}

fn ids(dbug: &Dbug) -> Vec<String> {
    dbug.templates()
        .iter()
        .map(|t| t.id.clone().unwrap_or_default())
        .collect()
}

const ONE: &str = r#"{ "configs": [{ "type": "Order", "id": "a" }] }"#;
const TWO: &str = r#"{ "configs": [{ "type": "Order", "id": "a" }, { "type": "Order", "id": "b" }] }"#;

#[test]
fn polling_reloads_only_after_the_file_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dbug.json");
    write(&path, ONE, 1);
    let dbug = runtime();
    let orders = declare_order(&dbug);
    let mut source = ConfigSource::new(&path);

    assert!(source.poll(&dbug));
    assert_eq!(ids(&dbug), vec!["a"]);
    let first = orders.configs()[0].clone();
    assert!(!source.poll(&dbug));

    write(&path, TWO, 2);
    assert!(source.poll(&dbug));
    assert_eq!(ids(&dbug), vec!["a", "b"]);
    let configs = orders.configs();
    assert_eq!(configs.len(), 2);
    assert!(configs.iter().any(|c| Arc::ptr_eq(c, &first)));
    assert_eq!(source.last_error(), None);
}

#[test]
fn broken_documents_keep_the_installed_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dbug.json");
    write(&path, ONE, 1);
    let dbug = runtime();
    let _orders = declare_order(&dbug);
    let mut source = ConfigSource::new(&path);
    assert!(source.poll(&dbug));

    write(&path, "{ \"configs\": [", 2);
    assert!(!source.poll(&dbug));
    let error = source.last_error().unwrap().to_string();
    assert!(error.starts_with("invalid configuration document"), "{error}");
    assert_eq!(ids(&dbug), vec!["a"]);

    write(&path, "{ \"configs\": 7 }", 3);
    assert!(!source.poll(&dbug));
    assert_ne!(source.last_error().unwrap(), error);

    write(&path, TWO, 4);
    assert!(source.poll(&dbug));
    assert_eq!(source.last_error(), None);
    assert_eq!(ids(&dbug), vec!["a", "b"]);
}

#[test]
fn missing_files_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let dbug = runtime();
    let mut source = ConfigSource::new(dir.path().join("absent.json"));
    assert!(!source.poll(&dbug));
    let error = source.last_error().unwrap();
    assert!(error.starts_with("could not read"), "{error}");
    assert!(dbug.templates().is_empty());
}

#[test]
fn watchers_install_documents_in_the_background() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dbug.json");
    write(&path, ONE, 1);
    let dbug = runtime();
    let _orders = declare_order(&dbug);

    let watcher = ConfigSource::new(&path)
        .watch(dbug.clone(), Duration::from_millis(5))
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while ids(&dbug).is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(ids(&dbug), vec!["a"]);

    write(&path, TWO, 2);
    while ids(&dbug).len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(ids(&dbug), vec!["a", "b"]);
    drop(watcher);
}
