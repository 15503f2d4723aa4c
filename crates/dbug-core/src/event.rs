//! Event occurrences and the views reporters receive of them.
use crate::anchor::LiveAnchor;
use crate::anchor_type::{check_value, AnchorTypeDef, EventType};
use crate::config::{CompiledConfig, EventConfig};
use crate::error::{DbugError, DbugResult};
use crate::reporter::{run_end_hooks, PendingHooks};
use chrono::{DateTime, Utc};
use dbug_expr::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// One firing of an event on one anchor.
pub struct EventOccurrence {
    id: u64,
    anchor_type: Arc<AnchorTypeDef>,
    ordinal: usize,
    dynamics: Arc<[Value]>,
    values: Vec<Value>,
    start: DateTime<Utc>,
    end: OnceLock<DateTime<Utc>>,
    transactional: bool,
}

impl EventOccurrence {
    pub(crate) fn new(
        anchor_type: Arc<AnchorTypeDef>,
        ordinal: usize,
        dynamics: Arc<[Value]>,
        values: Vec<Value>,
        transactional: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            anchor_type,
            ordinal,
            dynamics,
            values,
            start: Utc::now(),
            end: OnceLock::new(),
            transactional,
        })
    }

    /// Process-unique, increasing in creation order.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn anchor_type(&self) -> &AnchorTypeDef {
        &self.anchor_type
    }

    pub fn event_type(&self) -> &EventType {
        &self.anchor_type.event_types()[self.ordinal]
    }

    /// Dynamic field values when the event was created.
    pub fn dynamics(&self) -> &[Value] {
        &self.dynamics
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.event_type()
            .field_index(name)
            .and_then(|index| self.values.get(index))
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// When a transactional event ended; `None` while it is still running.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end.get().copied()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end().map(|end| end - self.start)
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub(crate) fn finish(&self) {
        let _ = self.end.set(Utc::now());
    }
}

impl fmt::Debug for EventOccurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventOccurrence")
            .field("id", &self.id)
            .field("event", &self.event_type().name())
            .field("values", &self.values)
            .field("start", &self.start)
            .field("end", &self.end())
            .finish()
    }
}

/// The immutable part of an anchor.
#[derive(Debug)]
pub struct AnchorInfo {
    pub(crate) def: Arc<AnchorTypeDef>,
    pub(crate) host: Value,
    pub(crate) statics: Vec<Value>,
}

impl AnchorInfo {
    pub fn anchor_type(&self) -> &AnchorTypeDef {
        &self.def
    }

    pub fn host(&self) -> &Value {
        &self.host
    }

    pub fn statics(&self) -> &[Value] {
        &self.statics
    }

    pub fn static_value(&self, name: &str) -> Option<&Value> {
        self.def.static_index(name).and_then(|index| self.statics.get(index))
    }
}

/// An anchor seen through one attached config.
#[derive(Clone, Debug)]
pub struct ConfiguredAnchor {
    pub(crate) info: Arc<AnchorInfo>,
    pub(crate) config: Arc<CompiledConfig>,
    /// Config variable values by template position; `None` where unavailable.
    pub(crate) values: Arc<[Option<Value>]>,
}

impl ConfiguredAnchor {
    pub fn info(&self) -> &AnchorInfo {
        &self.info
    }

    pub fn config(&self) -> &CompiledConfig {
        &self.config
    }

    pub fn config_values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn config_value(&self, name: &str) -> Option<&Value> {
        self.config
            .variable_index(name)
            .and_then(|index| self.values.get(index))
            .and_then(Option::as_ref)
    }
}

/// An event occurrence as delivered through one event config.
#[derive(Clone, Debug)]
pub struct ConfigEvent {
    pub(crate) occurrence: Arc<EventOccurrence>,
    pub(crate) anchor: ConfiguredAnchor,
    pub(crate) event_config: Arc<EventConfig>,
    /// Event variable values by template position; `None` where unavailable.
    pub(crate) values: Vec<Option<Value>>,
}

impl ConfigEvent {
    pub fn occurrence(&self) -> &EventOccurrence {
        &self.occurrence
    }

    pub fn anchor(&self) -> &ConfiguredAnchor {
        &self.anchor
    }

    pub fn config(&self) -> &CompiledConfig {
        &self.anchor.config
    }

    pub fn event_config(&self) -> &EventConfig {
        &self.event_config
    }

    pub fn event_type(&self) -> &EventType {
        self.occurrence.event_type()
    }

    pub fn host(&self) -> &Value {
        &self.anchor.info.host
    }

    pub fn event_value(&self, name: &str) -> Option<&Value> {
        self.occurrence.value(name)
    }

    pub fn event_config_values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn event_config_value(&self, name: &str) -> Option<&Value> {
        self.event_config
            .variable_index(name)
            .and_then(|index| self.values.get(index))
            .and_then(Option::as_ref)
    }

    pub fn config_value(&self, name: &str) -> Option<&Value> {
        self.anchor.config_value(name)
    }

    /// Dynamic field value when the event was created.
    pub fn dynamic_value(&self, name: &str) -> Option<&Value> {
        self.anchor
            .info
            .def
            .dynamic_index(name)
            .and_then(|index| self.occurrence.dynamics.get(index))
    }

    pub fn static_value(&self, name: &str) -> Option<&Value> {
        self.anchor.info.static_value(name)
    }
}

pub(crate) struct PendingEvent {
    anchor: Arc<LiveAnchor>,
    ordinal: usize,
    dynamics: Arc<[Value]>,
    values: Vec<Option<Value>>,
}

/// Collects the fields of a user event before firing it.
///
/// Builders for anchors with no active config are no-ops that accept anything.
#[must_use]
pub struct EventBuilder {
    pending: Option<Box<PendingEvent>>,
}

impl EventBuilder {
    pub(crate) fn noop() -> Self {
        Self { pending: None }
    }

    pub(crate) fn new(anchor: Arc<LiveAnchor>, ordinal: usize, dynamics: Arc<[Value]>) -> Self {
        let fields = anchor.info.def.event_types()[ordinal].fields().len();
        Self {
            pending: Some(Box::new(PendingEvent {
                anchor,
                ordinal,
                dynamics,
                values: vec![None; fields],
            })),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.pending.is_none()
    }

    /// Sets field `name`, checking the value against the field's declared type.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> DbugResult<Self> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(self);
        };
        let def = &pending.anchor.info.def;
        let event_type = &def.event_types()[pending.ordinal];
        let Some(index) = event_type.field_index(name) else {
            return Err(DbugError::UnknownEventField {
                event: event_type.name().to_string(),
                name: name.to_string(),
            });
        };
        let ty = &event_type.fields()[index].1;
        let value = check_value(pending.anchor.model(), def, name, ty, value.into())?;
        pending.values[index] = Some(value);
        Ok(self)
    }

    fn complete(pending: PendingEvent) -> DbugResult<(Arc<LiveAnchor>, usize, Arc<[Value]>, Vec<Value>)> {
        let event_type = &pending.anchor.info.def.event_types()[pending.ordinal];
        let missing: Vec<String> = event_type
            .fields()
            .iter()
            .zip(&pending.values)
            .filter(|(_, value)| value.is_none())
            .map(|((name, _), _)| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DbugError::MissingEventFields {
                event: event_type.name().to_string(),
                names: missing,
            });
        }
        let values = pending.values.into_iter().flatten().collect();
        Ok((pending.anchor, pending.ordinal, pending.dynamics, values))
    }

    /// Fires an instantaneous event.
    pub fn occurred(self) -> DbugResult<()> {
        let Some(pending) = self.pending else {
            return Ok(());
        };
        let (anchor, ordinal, dynamics, values) = Self::complete(*pending)?;
        anchor.fire(ordinal, dynamics, values, None);
        Ok(())
    }

    /// Starts a transactional event, ended when the returned guard is dropped.
    pub fn begin(self) -> DbugResult<EventTransaction> {
        let Some(pending) = self.pending else {
            return Ok(EventTransaction::default());
        };
        let (anchor, ordinal, dynamics, values) = Self::complete(*pending)?;
        let mut hooks = PendingHooks::new();
        let occurrence = anchor.fire(ordinal, dynamics, values, Some(&mut hooks));
        Ok(EventTransaction {
            occurrence: Some(occurrence),
            hooks,
        })
    }
}

/// A running transactional event.
#[derive(Default)]
#[must_use = "the event ends when the transaction is dropped"]
pub struct EventTransaction {
    occurrence: Option<Arc<EventOccurrence>>,
    hooks: PendingHooks,
}

impl EventTransaction {
    pub fn occurrence(&self) -> Option<&EventOccurrence> {
        self.occurrence.as_deref()
    }

    pub fn end(self) {}
}

impl Drop for EventTransaction {
    fn drop(&mut self) {
        if let Some(occurrence) = &self.occurrence {
            occurrence.finish();
        }
        run_end_hooks(std::mem::take(&mut self.hooks));
    }
}
