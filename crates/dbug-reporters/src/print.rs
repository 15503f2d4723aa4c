//! Console reporter.
use crate::depth::ThreadDepth;
use crate::format::render_line;
use dbug_core::{Compiled, ConfigEvent, EndHook, Reporter, ReporterError, ReporterResult};
use serde::Deserialize;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PrintConfig {
    error: bool,
    indent: Option<String>,
}

#[derive(Clone)]
enum Output {
    Stdout,
    Stderr,
    Buffer(Arc<Mutex<Vec<String>>>),
}

/// Prints one line per event.
///
/// Configuration: `error` (print to stderr), `indent` (the string nested transactional events
/// are indented with, a tab by default).
pub struct PrintReporter {
    output: Output,
    indent: String,
    depth: Arc<ThreadDepth>,
}

impl Default for PrintReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PrintReporter {
    pub fn new() -> Self {
        Self {
            output: Output::Stdout,
            indent: "\t".to_string(),
            depth: Arc::default(),
        }
    }

    /// Collects lines into `buffer` instead of printing them.
    pub fn with_buffer(mut self, buffer: Arc<Mutex<Vec<String>>>) -> Self {
        self.output = Output::Buffer(buffer);
        self
    }

    pub fn with_indent(mut self, indent: &str) -> Self {
        self.indent = indent.to_string();
        self
    }

    fn print(&self, event: &ConfigEvent) -> ReporterResult<()> {
        let line = render_line(event, &self.indent, self.depth.current());
        match &self.output {
            Output::Stdout => writeln!(io::stdout().lock(), "{line}")?,
            Output::Stderr => writeln!(io::stderr().lock(), "{line}")?,
            Output::Buffer(buffer) => buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(line),
        }
        Ok(())
    }
}

impl Reporter for PrintReporter {
    fn configure(&mut self, config: &serde_json::Value) -> ReporterResult<()> {
        if config.is_null() {
            return Ok(());
        }
        let config: PrintConfig = serde_json::from_value(config.clone())
            .map_err(|err| ReporterError::config(err.to_string()))?;
        if config.error && !matches!(self.output, Output::Buffer(_)) {
            self.output = Output::Stderr;
        }
        if let Some(indent) = config.indent {
            self.indent = indent;
        }
        Ok(())
    }

    fn event_occurred(
        &self,
        event: &ConfigEvent,
        _configured: &Compiled,
        _compiled: &Compiled,
    ) -> ReporterResult<()> {
        self.print(event)
    }

    fn event_begun(
        &self,
        event: &ConfigEvent,
        _configured: &Compiled,
        _compiled: &Compiled,
    ) -> ReporterResult<Option<EndHook>> {
        self.print(event)?;
        let leave = self.depth.enter();
        Ok(Some(Box::new(move |_: &ConfigEvent| leave())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn configuration_sets_stream_and_indent() {
        let mut reporter = PrintReporter::new();
        reporter
            .configure(&json!({ "error": true, "indent": "  " }))
            .unwrap();
        assert!(matches!(reporter.output, Output::Stderr));
        assert_eq!(reporter.indent, "  ");

        let err = PrintReporter::new()
            .configure(&json!({ "indent": 4 }))
            .unwrap_err();
        assert!(matches!(err, ReporterError::Config { .. }));
    }
}
