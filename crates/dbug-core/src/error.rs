use dbug_expr::{EvalError, Type};
use std::fmt;
use std::sync::Mutex;

pub type DbugResult<T> = Result<T, DbugError>;
pub type ReporterResult<T> = Result<T, ReporterError>;

/// Failures surfaced to code declaring anchor types, building anchors, firing events or loading
/// configuration.
#[derive(Debug, thiserror::Error)]
pub enum DbugError {
    #[error("field name {name:?} is reserved")]
    ReservedName { name: String },

    #[error("{anchor_type}: a field is already named {name}")]
    DuplicateField { anchor_type: String, name: String },

    #[error("{anchor_type}: an event named {name} has already been declared")]
    DuplicateEvent { anchor_type: String, name: String },

    #[error("{anchor_type} has no field {name}")]
    UnknownField { anchor_type: String, name: String },

    #[error("{anchor_type}.{name} is not an externally supplied field")]
    NotExternal { anchor_type: String, name: String },

    #[error("{anchor_type}.{name} has no producer to refresh it from")]
    NoProducer { anchor_type: String, name: String },

    #[error("{anchor_type}.{name} expects a value of type {expected}, found {actual}")]
    FieldType {
        anchor_type: String,
        name: String,
        expected: Type,
        actual: Type,
    },

    #[error("{anchor_type}: missing external parameters {}", names.join(", "))]
    MissingParameters {
        anchor_type: String,
        names: Vec<String>,
    },

    #[error("{anchor_type}: host value has no identity to key its anchor by")]
    NoIdentity { anchor_type: String },

    #[error("{anchor_type}: anchor has not been built yet")]
    Unresolved { anchor_type: String },

    #[error("{anchor_type}: could not compute field {name}")]
    Producer {
        anchor_type: String,
        name: String,
        #[source]
        source: EvalError,
    },

    #[error("{anchor_type} does not define event {name}")]
    UnknownEvent { anchor_type: String, name: String },

    #[error("{anchor_type}: event {name} is synthesized by the runtime and cannot be fired")]
    ReservedEvent { anchor_type: String, name: String },

    #[error("event {event} has no field {name}")]
    UnknownEventField { event: String, name: String },

    #[error("event {event} is missing fields {}", names.join(", "))]
    MissingEventFields { event: String, names: Vec<String> },

    #[error("no reporter factory registered for kind {kind:?}")]
    UnknownReporterKind { kind: String },

    #[error("could not create reporter {name}")]
    Reporter {
        name: String,
        #[source]
        source: ReporterError,
    },

    #[error("invalid configuration document")]
    Document(#[from] serde_json::Error),

    #[error("could not read {path}")]
    ReadSource {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures raised by reporter callbacks.
#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    #[error("invalid reporter configuration: {message}")]
    Config { message: String },

    #[error("{message}")]
    Failed { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReporterError {
    pub fn config(message: impl Into<String>) -> Self {
        ReporterError::Config {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ReporterError::Failed {
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A problem found while compiling a configuration template against an anchor type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigDiagnostic {
    pub anchor_type: String,
    pub config_id: Option<String>,
    /// What the diagnostic is about: `condition`, a variable name, or `event.variable`.
    pub target: String,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for ConfigDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.anchor_type)?;
        if let Some(id) = &self.config_id {
            write!(f, " [{id}]")?;
        }
        write!(f, " {}: {}", self.target, self.message)
    }
}

/// Receives configuration diagnostics.
pub trait ErrorSink: Send + Sync {
    fn report(&self, diagnostic: ConfigDiagnostic);
}

/// Routes diagnostics to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, diagnostic: ConfigDiagnostic) {
        match diagnostic.severity {
            Severity::Warning => log::warn!("{diagnostic}"),
            Severity::Error => log::error!("{diagnostic}"),
        }
    }
}

/// Keeps every diagnostic it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<ConfigDiagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything collected so far.
    pub fn take(&self) -> Vec<ConfigDiagnostic> {
        std::mem::take(&mut *crate::lock(&self.diagnostics))
    }

    pub fn errors(&self) -> Vec<ConfigDiagnostic> {
        crate::lock(&self.diagnostics)
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .cloned()
            .collect()
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, diagnostic: ConfigDiagnostic) {
        crate::lock(&self.diagnostics).push(diagnostic);
    }
}
