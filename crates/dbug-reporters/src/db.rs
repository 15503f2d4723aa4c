//! Persists anchors and events into SQLite.
//!
//! Compile stages write the static rows (schemas, anchor types, configs, anchors) once and
//! keep their row ids in the compiled state, so each delivery only inserts its event rows.
use ahash::AHashMap;
use dbug_core::{
    AnchorInfo, AnchorTypeDef, Compiled, CompiledConfig, ConfigEvent, ConfiguredAnchor, EndHook,
    EventConfig, EventOccurrence, Reporter, ReporterError, ReporterResult,
};
use dbug_expr::Value;
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DbConfig {
    /// Database file; an in-memory database when missing.
    path: Option<String>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schemas (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS anchor_types (
  id INTEGER PRIMARY KEY,
  schema_id INTEGER NOT NULL REFERENCES schemas(id),
  type_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS anchor_fields (
  id INTEGER PRIMARY KEY,
  anchor_type INTEGER NOT NULL REFERENCES anchor_types(id),
  name TEXT NOT NULL,
  dynamic INTEGER NOT NULL,
  field_type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS event_types (
  id INTEGER PRIMARY KEY,
  anchor_type INTEGER NOT NULL REFERENCES anchor_types(id),
  ordinal INTEGER NOT NULL,
  name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS configs (
  id INTEGER PRIMARY KEY,
  anchor_type INTEGER NOT NULL REFERENCES anchor_types(id),
  config_id TEXT,
  condition TEXT
);

CREATE TABLE IF NOT EXISTS config_events (
  id INTEGER PRIMARY KEY,
  config INTEGER NOT NULL REFERENCES configs(id),
  event_type INTEGER NOT NULL REFERENCES event_types(id)
);

CREATE TABLE IF NOT EXISTS anchors (
  id INTEGER PRIMARY KEY,
  anchor_type INTEGER NOT NULL REFERENCES anchor_types(id),
  host TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS anchor_values (
  anchor INTEGER NOT NULL REFERENCES anchors(id),
  name TEXT NOT NULL,
  value TEXT
);

CREATE TABLE IF NOT EXISTS anchor_configs (
  id INTEGER PRIMARY KEY,
  anchor INTEGER NOT NULL REFERENCES anchors(id),
  config INTEGER NOT NULL REFERENCES configs(id)
);

CREATE TABLE IF NOT EXISTS events (
  id INTEGER PRIMARY KEY,
  anchor_config INTEGER NOT NULL REFERENCES anchor_configs(id),
  config_event INTEGER NOT NULL REFERENCES config_events(id),
  occurrence INTEGER NOT NULL,
  thread TEXT NOT NULL,
  start_time TEXT NOT NULL,
  end_time TEXT
);

-- kind is 'field', 'dynamic' or 'variable'
CREATE TABLE IF NOT EXISTS event_values (
  event INTEGER NOT NULL REFERENCES events(id),
  kind TEXT NOT NULL,
  name TEXT NOT NULL,
  value TEXT
);

CREATE INDEX IF NOT EXISTS idx_events_anchor_config ON events(anchor_config);
"#;

fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)
}

fn sql_error(err: rusqlite::Error) -> ReporterError {
    ReporterError::failed(format!("sqlite error: {err}"))
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Row ids of an anchor type and of its event types by ordinal.
#[derive(Debug)]
struct TypeRow {
    id: i64,
    event_types: Vec<i64>,
}

struct ConfigRow {
    id: i64,
    anchor_type: Arc<TypeRow>,
}

struct ConfigEventRow(i64);

struct AnchorRow(i64);

struct AnchorConfigRow(i64);

/// What an event row points at.
struct EventTarget {
    anchor_config: i64,
    config_event: i64,
}

struct Db {
    conn: Connection,
    schemas: AHashMap<String, i64>,
    types: AHashMap<(String, String), Arc<TypeRow>>,
}

impl Db {
    fn new(conn: Connection) -> rusqlite::Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        init(&conn)?;
        Ok(Self {
            conn,
            schemas: AHashMap::new(),
            types: AHashMap::new(),
        })
    }

    fn schema(&mut self, name: &str) -> rusqlite::Result<i64> {
        if let Some(&id) = self.schemas.get(name) {
            return Ok(id);
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO schemas (name) VALUES (?1)",
            params![name],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM schemas WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )?;
        self.schemas.insert(name.to_string(), id);
        Ok(id)
    }

    /// The anchor type's rows, written with its fields and event types on first use.
    fn anchor_type(&mut self, def: &AnchorTypeDef) -> rusqlite::Result<Arc<TypeRow>> {
        let key = (def.schema().to_string(), def.type_name());
        if let Some(row) = self.types.get(&key) {
            return Ok(row.clone());
        }
        let schema = self.schema(def.schema())?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO anchor_types (schema_id, type_name) VALUES (?1, ?2)",
            params![schema, &key.1],
        )?;
        let id = tx.last_insert_rowid();
        for (fields, dynamic) in [(def.static_fields(), false), (def.dynamic_fields(), true)] {
            for field in fields {
                tx.execute(
                    "INSERT INTO anchor_fields (anchor_type, name, dynamic, field_type) VALUES (?1, ?2, ?3, ?4)",
                    params![id, field.name(), dynamic, field.ty().to_string()],
                )?;
            }
        }
        let mut event_types = Vec::with_capacity(def.event_types().len());
        for event_type in def.event_types() {
            tx.execute(
                "INSERT INTO event_types (anchor_type, ordinal, name) VALUES (?1, ?2, ?3)",
                params![id, event_type.ordinal() as i64, event_type.name()],
            )?;
            event_types.push(tx.last_insert_rowid());
        }
        tx.commit()?;
        let row = Arc::new(TypeRow { id, event_types });
        self.types.insert(key, row.clone());
        Ok(row)
    }

    fn insert_event(&mut self, target: &EventTarget, event: &ConfigEvent) -> rusqlite::Result<i64> {
        let occurrence = event.occurrence();
        let thread = thread::current()
            .name()
            .map_or_else(|| format!("{:?}", thread::current().id()), str::to_string);
        let end = if occurrence.is_transactional() {
            occurrence.end()
        } else {
            Some(occurrence.start())
        };
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO events (anchor_config, config_event, occurrence, thread, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                target.anchor_config,
                target.config_event,
                occurrence.id() as i64,
                thread,
                occurrence.start().to_rfc3339(),
                end.map(|end| end.to_rfc3339()),
            ],
        )?;
        let id = tx.last_insert_rowid();
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO event_values (event, kind, name, value) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for ((name, _), value) in event.event_type().fields().iter().zip(occurrence.values()) {
                insert.execute(params![id, "field", &**name, text(value)])?;
            }
            let def = occurrence.anchor_type();
            for (field, value) in def.dynamic_fields().iter().zip(occurrence.dynamics()) {
                insert.execute(params![id, "dynamic", field.name(), text(value)])?;
            }
            let variables = &event.event_config().template().variables;
            for (variable, value) in variables.iter().zip(event.event_config_values()) {
                insert.execute(params![
                    id,
                    "variable",
                    &variable.name,
                    value.as_ref().and_then(text)
                ])?;
            }
        }
        tx.commit()?;
        Ok(id)
    }
}

/// Records anchors and events in a SQLite database.
///
/// Configuration: `path`, the database file. Without it the reporter writes to an in-memory
/// database.
pub struct DbReporter {
    db: Arc<Mutex<Db>>,
}

impl DbReporter {
    pub fn open_in_memory() -> ReporterResult<Self> {
        Self::open(Connection::open_in_memory().map_err(sql_error)?)
    }

    pub fn open_path(path: impl AsRef<Path>) -> ReporterResult<Self> {
        Self::open(Connection::open(path).map_err(sql_error)?)
    }

    fn open(conn: Connection) -> ReporterResult<Self> {
        Ok(Self {
            db: Arc::new(Mutex::new(Db::new(conn).map_err(sql_error)?)),
        })
    }

    fn db(&self) -> MutexGuard<'_, Db> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `query` against the reporter's connection.
    pub fn with_connection<T>(
        &self,
        query: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> ReporterResult<T> {
        query(&self.db().conn).map_err(sql_error)
    }
}

fn missing(stage: &str) -> ReporterError {
    ReporterError::failed(format!("missing compiled state for {stage}"))
}

impl Reporter for DbReporter {
    fn configure(&mut self, config: &serde_json::Value) -> ReporterResult<()> {
        if config.is_null() {
            return Ok(());
        }
        let config: DbConfig = serde_json::from_value(config.clone())
            .map_err(|err| ReporterError::config(err.to_string()))?;
        if let Some(path) = config.path {
            *self = Self::open_path(&path)
                .map_err(|err| ReporterError::config(format!("cannot open {path}: {err}")))?;
        }
        Ok(())
    }

    fn compile_for_config(&self, config: &CompiledConfig) -> ReporterResult<Compiled> {
        let mut db = self.db();
        let anchor_type = db.anchor_type(config.anchor_type()).map_err(sql_error)?;
        db.conn
            .execute(
                "INSERT INTO configs (anchor_type, config_id, condition) VALUES (?1, ?2, ?3)",
                params![anchor_type.id, config.id(), config.template().condition],
            )
            .map_err(sql_error)?;
        Ok(Compiled::new(ConfigRow {
            id: db.conn.last_insert_rowid(),
            anchor_type,
        }))
    }

    fn compile_for_event_config(
        &self,
        config: &Compiled,
        event_config: &EventConfig,
    ) -> ReporterResult<Compiled> {
        let config = config.get::<ConfigRow>().ok_or_else(|| missing("event config"))?;
        let event_type = config
            .anchor_type
            .event_types
            .get(event_config.event_type().ordinal())
            .copied()
            .ok_or_else(|| missing("event type"))?;
        let db = self.db();
        db.conn
            .execute(
                "INSERT INTO config_events (config, event_type) VALUES (?1, ?2)",
                params![config.id, event_type],
            )
            .map_err(sql_error)?;
        Ok(Compiled::new(ConfigEventRow(db.conn.last_insert_rowid())))
    }

    fn compile_for_anchor(&self, anchor: &AnchorInfo) -> ReporterResult<Compiled> {
        let mut db = self.db();
        let anchor_type = db.anchor_type(anchor.anchor_type()).map_err(sql_error)?;
        let tx = db.conn.transaction().map_err(sql_error)?;
        tx.execute(
            "INSERT INTO anchors (anchor_type, host) VALUES (?1, ?2)",
            params![anchor_type.id, anchor.host().to_string()],
        )
        .map_err(sql_error)?;
        let id = tx.last_insert_rowid();
        for (field, value) in anchor.anchor_type().static_fields().iter().zip(anchor.statics()) {
            tx.execute(
                "INSERT INTO anchor_values (anchor, name, value) VALUES (?1, ?2, ?3)",
                params![id, field.name(), text(value)],
            )
            .map_err(sql_error)?;
        }
        tx.commit().map_err(sql_error)?;
        Ok(Compiled::new(AnchorRow(id)))
    }

    fn compile_for_configured_anchor(
        &self,
        anchor: &Compiled,
        config: &Compiled,
        _configured: &ConfiguredAnchor,
    ) -> ReporterResult<Compiled> {
        let anchor = anchor.get::<AnchorRow>().ok_or_else(|| missing("anchor"))?;
        let config = config.get::<ConfigRow>().ok_or_else(|| missing("config"))?;
        let db = self.db();
        db.conn
            .execute(
                "INSERT INTO anchor_configs (anchor, config) VALUES (?1, ?2)",
                params![anchor.0, config.id],
            )
            .map_err(sql_error)?;
        Ok(Compiled::new(AnchorConfigRow(db.conn.last_insert_rowid())))
    }

    fn compile_for_event(
        &self,
        configured: &Compiled,
        event_config: &Compiled,
        _occurrence: &EventOccurrence,
    ) -> ReporterResult<Compiled> {
        let configured = configured
            .get::<AnchorConfigRow>()
            .ok_or_else(|| missing("configured anchor"))?;
        let event_config = event_config
            .get::<ConfigEventRow>()
            .ok_or_else(|| missing("event config"))?;
        Ok(Compiled::new(EventTarget {
            anchor_config: configured.0,
            config_event: event_config.0,
        }))
    }

    fn event_occurred(
        &self,
        event: &ConfigEvent,
        _configured: &Compiled,
        compiled: &Compiled,
    ) -> ReporterResult<()> {
        let target = compiled.get::<EventTarget>().ok_or_else(|| missing("event"))?;
        self.db().insert_event(target, event).map_err(sql_error)?;
        Ok(())
    }

    fn event_begun(
        &self,
        event: &ConfigEvent,
        _configured: &Compiled,
        compiled: &Compiled,
    ) -> ReporterResult<Option<EndHook>> {
        let target = compiled.get::<EventTarget>().ok_or_else(|| missing("event"))?;
        let id = self.db().insert_event(target, event).map_err(sql_error)?;
        let db = Arc::clone(&self.db);
        Ok(Some(Box::new(move |event: &ConfigEvent| {
            let Some(end) = event.occurrence().end() else {
                return;
            };
            let db = db.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = db.conn.execute(
                "UPDATE events SET end_time = ?1 WHERE id = ?2",
                params![end.to_rfc3339(), id],
            ) {
                log::warn!("could not record the end of event {id}: {err}");
            }
        })))
    }
}
