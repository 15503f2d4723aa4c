//! Reporter routing event lines to the `log` facade.
use crate::depth::ThreadDepth;
use crate::format::render_line;
use dbug_core::{Compiled, ConfigEvent, EndHook, Reporter, ReporterError, ReporterResult};
use log::Level;
use serde::Deserialize;
use std::sync::Arc;

pub const DEFAULT_TARGET: &str = "dbug";

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LogConfig {
    level: Option<String>,
    target: Option<String>,
    indent: Option<String>,
}

/// Logs the same lines [`PrintReporter`](crate::PrintReporter) prints.
///
/// Configuration: `level` (`error` .. `trace`, `info` by default), `target` and `indent`.
pub struct LogReporter {
    level: Level,
    target: String,
    indent: String,
    depth: Arc<ThreadDepth>,
}

impl Default for LogReporter {
    fn default() -> Self {
        Self::new(Level::Info)
    }
}

impl LogReporter {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            target: DEFAULT_TARGET.to_string(),
            indent: "  ".to_string(),
            depth: Arc::default(),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn emit(&self, event: &ConfigEvent) {
        if log::log_enabled!(target: self.target.as_str(), self.level) {
            let line = render_line(event, &self.indent, self.depth.current());
            log::log!(target: self.target.as_str(), self.level, "{line}");
        }
    }
}

impl Reporter for LogReporter {
    fn configure(&mut self, config: &serde_json::Value) -> ReporterResult<()> {
        if config.is_null() {
            return Ok(());
        }
        let config: LogConfig = serde_json::from_value(config.clone())
            .map_err(|err| ReporterError::config(err.to_string()))?;
        if let Some(level) = config.level {
            self.level = level
                .parse()
                .map_err(|_| ReporterError::config(format!("unknown log level {level}")))?;
        }
        if let Some(target) = config.target {
            self.target = target;
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
        self.emit(event);
        Ok(())
    }

    fn event_begun(
        &self,
        event: &ConfigEvent,
        _configured: &Compiled,
        _compiled: &Compiled,
    ) -> ReporterResult<Option<EndHook>> {
        self.emit(event);
        let leave = self.depth.enter();
        Ok(Some(Box::new(move |_: &ConfigEvent| leave())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn level_and_target_are_configurable() {
        let mut reporter = LogReporter::default();
        reporter
            .configure(&json!({ "level": "debug", "target": "orders" }))
            .unwrap();
        assert_eq!(reporter.level(), Level::Debug);
        assert_eq!(reporter.target(), "orders");

        let err = reporter.configure(&json!({ "level": "loud" })).unwrap_err();
        assert_eq!(err.to_string(), "invalid reporter configuration: unknown log level loud");
    }
}
