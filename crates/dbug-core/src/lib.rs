//! Runtime for dbug anchors.
//!
//! Applications declare [`AnchorTypeDef`]s with a [`Dbug`] runtime and build an [`Anchor`] per
//! host value. Configuration templates compiled against an anchor type decide which anchors are
//! active, which derived variables they carry and which [`Reporter`]s receive their events.
//! Dynamic field updates re-evaluate only the variables and conditions whose dependency sets
//! contain the changed field.
mod anchor;
pub mod anchor_type;
mod builder;
pub mod config;
mod error;
pub mod event;
pub mod reporter;
mod runtime;
mod source;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use crate::anchor::Anchor;
pub use crate::anchor_type::{
    AnchorTypeBuilder, AnchorTypeDef, EventType, FieldDecl, FieldLevel, Producer, ANCHOR_ACTIVE,
    VALUE_UPDATE,
};
pub use crate::builder::AnchorBuilder;
pub use crate::config::{
    CompiledConfig, CompiledVariable, ConfigChange, ConfigSet, ConfigTemplate, DbugDocument,
    Dependencies, DependencySet, EventConfig, EventConfigTemplate, EventVariableTemplate,
    ReporterDecl, VariableTemplate,
};
pub use crate::error::{
    CollectingSink, ConfigDiagnostic, DbugError, DbugResult, ErrorSink, LogSink, ReporterError,
    ReporterResult, Severity,
};
pub use crate::event::{
    AnchorInfo, ConfigEvent, ConfiguredAnchor, EventBuilder, EventOccurrence, EventTransaction,
};
pub use crate::reporter::{Compiled, EndHook, Reporter, ReporterFactory, ReporterRef};
pub use crate::runtime::{AnchorType, Dbug};
pub use crate::source::{ConfigSource, SourceWatcher};

/// Locks `mutex`, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
