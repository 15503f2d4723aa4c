//! The compile/notify protocol between the runtime and reporters.
//!
//! Each stage returns reporter-private state ([`Compiled`]) that the runtime caches per reporter
//! on the object it was compiled for:
//!
//! | stage                            | cached on          |
//! |----------------------------------|--------------------|
//! | `compile_for_config`             | [`CompiledConfig`] |
//! | `compile_for_event_config`       | [`EventConfig`]    |
//! | `compile_for_anchor`             | the anchor         |
//! | `compile_for_configured_anchor`  | the config instance|
//! | `compile_for_event`              | one event delivery |
//!
//! A stage that fails or panics is logged and the reporter is skipped for that delivery; later
//! deliveries retry it.
use crate::config::{CompiledConfig, EventConfig, ReporterDecl};
use crate::error::ReporterResult;
use crate::event::{AnchorInfo, ConfigEvent, ConfiguredAnchor, EventOccurrence};
use ahash::AHashMap;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Reporter-private state produced by a compile stage.
#[derive(Clone, Default)]
pub struct Compiled(Option<Arc<dyn Any + Send + Sync>>);

impl Compiled {
    pub fn new<T: Any + Send + Sync>(state: T) -> Self {
        Compiled(Some(Arc::new(state)))
    }

    pub fn none() -> Self {
        Compiled(None)
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|state| state.downcast_ref())
    }
}

impl fmt::Debug for Compiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Compiled(..)"),
            None => f.write_str("Compiled(None)"),
        }
    }
}

/// Runs when a transactional event ends.
pub type EndHook = Box<dyn FnOnce(&ConfigEvent) + Send>;

pub trait Reporter: Send + Sync {
    /// Receives the reporter's raw configuration before first use.
    fn configure(&mut self, _config: &serde_json::Value) -> ReporterResult<()> {
        Ok(())
    }

    fn compile_for_config(&self, _config: &CompiledConfig) -> ReporterResult<Compiled> {
        Ok(Compiled::none())
    }

    fn compile_for_event_config(
        &self,
        _config: &Compiled,
        _event_config: &EventConfig,
    ) -> ReporterResult<Compiled> {
        Ok(Compiled::none())
    }

    fn compile_for_anchor(&self, _anchor: &AnchorInfo) -> ReporterResult<Compiled> {
        Ok(Compiled::none())
    }

    fn compile_for_configured_anchor(
        &self,
        _anchor: &Compiled,
        _config: &Compiled,
        _configured: &ConfiguredAnchor,
    ) -> ReporterResult<Compiled> {
        Ok(Compiled::none())
    }

    fn compile_for_event(
        &self,
        _configured: &Compiled,
        _event_config: &Compiled,
        _occurrence: &EventOccurrence,
    ) -> ReporterResult<Compiled> {
        Ok(Compiled::none())
    }

    fn event_occurred(
        &self,
        event: &ConfigEvent,
        configured: &Compiled,
        compiled: &Compiled,
    ) -> ReporterResult<()>;

    /// Start of a transactional event. The returned hook runs when the transaction ends.
    fn event_begun(
        &self,
        event: &ConfigEvent,
        configured: &Compiled,
        compiled: &Compiled,
    ) -> ReporterResult<Option<EndHook>> {
        self.event_occurred(event, configured, compiled)?;
        Ok(None)
    }

    fn close(&self) -> ReporterResult<()> {
        Ok(())
    }
}

/// Creates reporters of one kind from their declarations.
pub trait ReporterFactory: Send + Sync {
    fn create(&self, decl: &ReporterDecl) -> ReporterResult<Box<dyn Reporter>>;
}

impl<F> ReporterFactory for F
where
    F: Fn(&ReporterDecl) -> ReporterResult<Box<dyn Reporter>> + Send + Sync,
{
    fn create(&self, decl: &ReporterDecl) -> ReporterResult<Box<dyn Reporter>> {
        self(decl)
    }
}

/// A reporter together with the name configurations refer to it by.
#[derive(Clone)]
pub struct ReporterRef {
    name: Arc<str>,
    reporter: Arc<dyn Reporter>,
}

impl ReporterRef {
    pub fn new(name: &str, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            name: Arc::from(name),
            reporter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reporter(&self) -> &dyn Reporter {
        &*self.reporter
    }

    pub(crate) fn handle(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.reporter) as *const () as usize
    }

    /// Whether both refer to the same reporter instance.
    pub fn same(&self, other: &ReporterRef) -> bool {
        self.key() == other.key()
    }

    /// Runs one protocol call, logging failures and panics instead of propagating them.
    pub(crate) fn guarded<T>(&self, stage: &str, call: impl FnOnce() -> ReporterResult<T>) -> Option<T> {
        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                log::warn!("reporter {} failed in {stage}: {err}", self.name);
                None
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("reporter {} panicked in {stage}: {message}", self.name);
                None
            }
        }
    }
}

impl fmt::Debug for ReporterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReporterRef").field(&self.name).finish()
    }
}

/// Compiled state keyed by reporter identity.
///
/// Entries hold the reporter itself so its address cannot be reused while the entry exists.
#[derive(Default)]
pub(crate) struct ReporterCache {
    entries: Mutex<AHashMap<usize, (Arc<dyn Reporter>, Compiled)>>,
}

impl ReporterCache {
    /// The cached state for `reporter`, compiling it outside the lock when missing.
    pub(crate) fn get_or_compile(
        &self,
        reporter: &ReporterRef,
        compile: impl FnOnce() -> Option<Compiled>,
    ) -> Option<Compiled> {
        let key = reporter.key();
        if let Some((_, compiled)) = crate::lock(&self.entries).get(&key) {
            return Some(compiled.clone());
        }
        let compiled = compile()?;
        let mut entries = crate::lock(&self.entries);
        let (_, cached) = entries
            .entry(key)
            .or_insert_with(|| (reporter.handle().clone(), compiled));
        Some(cached.clone())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        crate::lock(&self.entries).len()
    }
}

/// One event forwarded to the reporters of one event config.
pub(crate) struct Delivery {
    pub(crate) event: ConfigEvent,
    /// Per config instance state (C4).
    pub(crate) configured: Arc<ReporterCache>,
}

/// Hooks collected while beginning a transactional event.
pub(crate) type PendingHooks = Vec<(ConfigEvent, ReporterRef, EndHook)>;

/// Runs the protocol for every delivery. `anchor` holds the per-anchor state (C3).
///
/// With `hooks` set the events are transactional: reporters are told the event began and their
/// end hooks are collected.
pub(crate) fn deliver(
    anchor: &ReporterCache,
    deliveries: Vec<Delivery>,
    mut hooks: Option<&mut PendingHooks>,
) {
    for delivery in deliveries {
        let event = &delivery.event;
        let config = event.config();
        let event_config = event.event_config();
        for reporter in event_config.reporters() {
            let Some(c1) = config.compiled_for(reporter) else {
                continue;
            };
            let Some(c2) = event_config.compiled_for(reporter, &c1) else {
                continue;
            };
            let Some(c3) = anchor.get_or_compile(reporter, || {
                reporter.guarded("compile_for_anchor", || {
                    reporter.reporter().compile_for_anchor(event.anchor().info())
                })
            }) else {
                continue;
            };
            let Some(c4) = delivery.configured.get_or_compile(reporter, || {
                reporter.guarded("compile_for_configured_anchor", || {
                    reporter
                        .reporter()
                        .compile_for_configured_anchor(&c3, &c1, event.anchor())
                })
            }) else {
                continue;
            };
            let Some(c5) = reporter.guarded("compile_for_event", || {
                reporter.reporter().compile_for_event(&c4, &c2, event.occurrence())
            }) else {
                continue;
            };
            match hooks.as_deref_mut() {
                None => {
                    reporter.guarded("event_occurred", || {
                        reporter.reporter().event_occurred(event, &c4, &c5)
                    });
                }
                Some(pending) => {
                    let hook = reporter.guarded("event_begun", || {
                        reporter.reporter().event_begun(event, &c4, &c5)
                    });
                    if let Some(Some(hook)) = hook {
                        pending.push((event.clone(), reporter.clone(), hook));
                    }
                }
            }
        }
    }
}

/// Runs end hooks in reverse order of their events beginning.
pub(crate) fn run_end_hooks(hooks: PendingHooks) {
    for (event, reporter, hook) in hooks.into_iter().rev() {
        reporter.guarded("event_ended", || {
            hook(&event);
            Ok(())
        });
    }
}
