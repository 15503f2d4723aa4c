//! The registry tying anchor types, configuration templates and reporters together.
//!
//! Lock order: the template set, then the type list, then a type's compiled configs, then an
//! anchor's state. Compiled config lists are never held while an anchor is locked, and reporters
//! are only called after every lock is released.
use crate::anchor::{Deferred, LiveAnchor};
use crate::anchor_type::{AnchorTypeBuilder, AnchorTypeDef};
use crate::builder::AnchorBuilder;
use crate::config::compiler::compile_config;
use crate::config::{CompiledConfig, ConfigChange, ConfigSet, ConfigTemplate, DbugDocument, ReporterDecl};
use crate::error::{DbugError, DbugResult, ErrorSink, LogSink};
use crate::reporter::{Reporter, ReporterFactory, ReporterRef};
use ahash::AHashMap;
use dbug_expr::{Value, ValueModel};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

/// One declared anchor type with its compiled configs and live anchors.
pub(crate) struct TypeEntry {
    pub(crate) def: Arc<AnchorTypeDef>,
    pub(crate) model: Arc<dyn ValueModel>,
    compiled: RwLock<Vec<Arc<CompiledConfig>>>,
    /// Keyed by host value identity.
    anchors: Mutex<AHashMap<usize, Weak<LiveAnchor>>>,
}

impl TypeEntry {
    fn new(def: Arc<AnchorTypeDef>, model: Arc<dyn ValueModel>) -> Self {
        Self {
            def,
            model,
            compiled: RwLock::new(Vec::new()),
            anchors: Mutex::new(AHashMap::new()),
        }
    }

    pub(crate) fn configs(&self) -> Vec<Arc<CompiledConfig>> {
        crate::read(&self.compiled).clone()
    }

    pub(crate) fn has_configs(&self) -> bool {
        !crate::read(&self.compiled).is_empty()
    }

    fn is_installed(&self, config: &Arc<CompiledConfig>) -> bool {
        crate::read(&self.compiled).iter().any(|c| Arc::ptr_eq(c, config))
    }

    pub(crate) fn lookup(&self, key: usize) -> Option<Arc<LiveAnchor>> {
        crate::lock(&self.anchors).get(&key).and_then(Weak::upgrade)
    }

    /// Stores `created` under `key` unless another live anchor got there first, returning the
    /// anchor that ends up in the store.
    pub(crate) fn insert(&self, key: usize, created: Arc<LiveAnchor>) -> Arc<LiveAnchor> {
        let mut anchors = crate::lock(&self.anchors);
        if let Some(existing) = anchors.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        anchors.insert(key, Arc::downgrade(&created));
        created
    }

    fn live_anchors(&self) -> Vec<Arc<LiveAnchor>> {
        crate::lock(&self.anchors).values().filter_map(Weak::upgrade).collect()
    }

    /// Attaches every installed config to a newly created anchor.
    pub(crate) fn attach_installed(&self, anchor: &Arc<LiveAnchor>) {
        let mut deferred = Deferred::default();
        for config in self.configs() {
            anchor.attach(&config, &|c| self.is_installed(c), &mut deferred);
        }
        deferred.deliver();
    }

    fn install(&self, config: Arc<CompiledConfig>, deferred: &mut Deferred) {
        crate::write(&self.compiled).push(config.clone());
        for anchor in self.live_anchors() {
            anchor.attach(&config, &|c| self.is_installed(c), deferred);
        }
    }

    fn position(compiled: &[Arc<CompiledConfig>], template: &ConfigTemplate) -> Option<usize> {
        compiled.iter().position(|c| *c.template == *template)
    }

    fn uninstall(&self, template: &ConfigTemplate) {
        let removed = {
            let mut compiled = crate::write(&self.compiled);
            Self::position(&compiled, template).map(|at| compiled.remove(at))
        };
        if let Some(config) = removed {
            for anchor in self.live_anchors() {
                anchor.detach(&config);
            }
        }
    }

    /// Replaces the config compiled from `old` with `config` on every live anchor.
    fn update(&self, old: &ConfigTemplate, config: Arc<CompiledConfig>, deferred: &mut Deferred) {
        let previous = {
            let mut compiled = crate::write(&self.compiled);
            match Self::position(&compiled, old) {
                Some(at) if compiled[at].same_as(&config) => return,
                Some(at) => Some(std::mem::replace(&mut compiled[at], config.clone())),
                None => {
                    compiled.push(config.clone());
                    None
                }
            }
        };
        for anchor in self.live_anchors() {
            match &previous {
                Some(previous) => {
                    anchor.replace(previous, &config, &|c| self.is_installed(c), deferred)
                }
                None => anchor.attach(&config, &|c| self.is_installed(c), deferred),
            }
        }
    }

    fn sweep(&self) -> usize {
        let mut anchors = crate::lock(&self.anchors);
        let before = anchors.len();
        anchors.retain(|_, anchor| anchor.strong_count() > 0);
        before - anchors.len()
    }

    fn anchor_count(&self) -> usize {
        crate::lock(&self.anchors).values().filter(|a| a.strong_count() > 0).count()
    }
}

/// A declared anchor type.
#[derive(Clone)]
pub struct AnchorType {
    entry: Arc<TypeEntry>,
}

impl AnchorType {
    pub fn def(&self) -> &AnchorTypeDef {
        &self.entry.def
    }

    /// Starts building the anchor of `host`.
    pub fn debug(&self, host: impl Into<Value>) -> AnchorBuilder {
        AnchorBuilder::new(self.entry.clone(), host.into())
    }

    /// Configs currently compiled against this type.
    pub fn configs(&self) -> Vec<Arc<CompiledConfig>> {
        self.entry.configs()
    }

    /// Number of anchors of this type still alive.
    pub fn anchors(&self) -> usize {
        self.entry.anchor_count()
    }
}

impl fmt::Debug for AnchorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnchorType").field(&self.entry.def.to_string()).finish()
    }
}

struct ReporterSlot {
    /// The declaration the reporter was created from; `None` when added programmatically.
    decl: Option<ReporterDecl>,
    reporter: ReporterRef,
}

struct Inner {
    model: Arc<dyn ValueModel>,
    sink: Arc<dyn ErrorSink>,
    types: RwLock<Vec<Arc<TypeEntry>>>,
    templates: Mutex<ConfigSet>,
    reporters: RwLock<AHashMap<String, ReporterSlot>>,
    factories: RwLock<AHashMap<String, Arc<dyn ReporterFactory>>>,
}

/// The runtime: declared anchor types, installed configuration and named reporters.
#[derive(Clone)]
pub struct Dbug {
    inner: Arc<Inner>,
}

impl Dbug {
    /// A runtime whose compile diagnostics are logged.
    pub fn new(model: Arc<dyn ValueModel>) -> Self {
        Self::with_error_sink(model, Arc::new(LogSink))
    }

    pub fn with_error_sink(model: Arc<dyn ValueModel>, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                model,
                sink,
                types: RwLock::new(Vec::new()),
                templates: Mutex::new(ConfigSet::new()),
                reporters: RwLock::new(AHashMap::new()),
                factories: RwLock::new(AHashMap::new()),
            }),
        }
    }

    pub fn model(&self) -> &Arc<dyn ValueModel> {
        &self.inner.model
    }

    /// Registers an anchor type and compiles every installed template targeting it.
    ///
    /// Declaring a type with the same identity again returns the existing registration.
    pub fn declare(&self, builder: AnchorTypeBuilder) -> DbugResult<AnchorType> {
        let def = Arc::new(builder.build()?);
        let templates = crate::lock(&self.inner.templates);
        let mut types = crate::write(&self.inner.types);
        if let Some(existing) = types.iter().find(|entry| entry.def.same_identity(&def)) {
            return Ok(AnchorType {
                entry: existing.clone(),
            });
        }
        let entry = Arc::new(TypeEntry::new(def, self.inner.model.clone()));
        let mut deferred = Deferred::default();
        for template in templates.iter().filter(|t| t.applies_to(&entry.def)) {
            if let Some(config) = self.compile(&entry.def, template) {
                entry.install(config, &mut deferred);
            }
        }
        log::debug!("declared anchor type {}", entry.def);
        types.push(entry.clone());
        drop(types);
        drop(templates);
        deferred.deliver();
        Ok(AnchorType { entry })
    }

    pub fn anchor_types(&self) -> Vec<AnchorType> {
        crate::read(&self.inner.types)
            .iter()
            .map(|entry| AnchorType {
                entry: entry.clone(),
            })
            .collect()
    }

    fn compile(&self, def: &Arc<AnchorTypeDef>, template: &Arc<ConfigTemplate>) -> Option<Arc<CompiledConfig>> {
        let lookup = |name: &str| self.reporter(name);
        compile_config(def, template, self.inner.model.clone(), &lookup, &*self.inner.sink)
    }

    /// Names a reporter for templates to refer to, recompiling the templates that already do.
    pub fn add_reporter(&self, name: &str, reporter: Arc<dyn Reporter>) {
        let mut templates = crate::lock(&self.inner.templates);
        let previous = crate::write(&self.inner.reporters).insert(
            name.to_string(),
            ReporterSlot {
                decl: None,
                reporter: ReporterRef::new(name, reporter),
            },
        );
        let changes = recompile_naming(&templates, &[name.to_string()], &[]);
        let deferred = self.apply_locked(&mut templates, changes);
        drop(templates);
        deferred.deliver();
        if let Some(previous) = previous {
            close_reporter(&previous.reporter);
        }
    }

    /// Registers the factory creating reporters declared with `kind`.
    pub fn register_factory(&self, kind: &str, factory: impl ReporterFactory + 'static) {
        crate::write(&self.inner.factories).insert(kind.to_string(), Arc::new(factory));
    }

    pub fn reporter(&self, name: &str) -> Option<ReporterRef> {
        crate::read(&self.inner.reporters)
            .get(name)
            .map(|slot| slot.reporter.clone())
    }

    /// The installed templates, sorted by target type and id.
    pub fn templates(&self) -> Vec<Arc<ConfigTemplate>> {
        crate::lock(&self.inner.templates).iter().cloned().collect()
    }

    /// Replaces the installed templates, returning the changes that were applied.
    pub fn set_templates(&self, templates: Vec<ConfigTemplate>) -> Vec<ConfigChange> {
        let mut set = crate::lock(&self.inner.templates);
        let changes = set.diff(templates);
        let deferred = self.apply_locked(&mut set, changes.clone());
        drop(set);
        deferred.deliver();
        changes
    }

    /// Applies configuration changes computed elsewhere, in order.
    pub fn apply(&self, changes: Vec<ConfigChange>) {
        let mut set = crate::lock(&self.inner.templates);
        let deferred = self.apply_locked(&mut set, changes);
        drop(set);
        deferred.deliver();
    }

    /// Applies `changes` while the template set is held. Reporter calls wait in the returned
    /// [`Deferred`] for the caller to deliver once the set is released.
    #[must_use]
    fn apply_locked(&self, set: &mut ConfigSet, changes: Vec<ConfigChange>) -> Deferred {
        let mut deferred = Deferred::default();
        let types: Vec<Arc<TypeEntry>> = crate::read(&self.inner.types).clone();
        for change in changes {
            set.apply(&change);
            match &change {
                ConfigChange::Added(template) => {
                    log::debug!("installing config {}", template.label());
                    for entry in types.iter().filter(|e| template.applies_to(&e.def)) {
                        if let Some(config) = self.compile(&entry.def, template) {
                            entry.install(config, &mut deferred);
                        }
                    }
                }
                ConfigChange::Removed(template) => {
                    log::debug!("removing config {}", template.label());
                    for entry in types.iter().filter(|e| template.applies_to(&e.def)) {
                        entry.uninstall(template);
                    }
                }
                ConfigChange::Updated { old, new } => {
                    log::debug!("updating config {}", new.label());
                    for entry in &types {
                        let before = old.applies_to(&entry.def);
                        let after = new.applies_to(&entry.def);
                        match (before, after) {
                            (true, true) => match self.compile(&entry.def, new) {
                                Some(config) => entry.update(old, config, &mut deferred),
                                None => entry.uninstall(old),
                            },
                            (true, false) => entry.uninstall(old),
                            (false, true) => {
                                if let Some(config) = self.compile(&entry.def, new) {
                                    entry.install(config, &mut deferred);
                                }
                            }
                            (false, false) => {}
                        }
                    }
                }
            }
        }
        deferred
    }

    /// Installs a configuration document: its reporter declarations, then its templates.
    ///
    /// Reporters whose declaration is unchanged are kept. Nothing is changed if any new reporter
    /// fails to be created or configured.
    pub fn load_document(&self, document: DbugDocument) -> DbugResult<()> {
        let mut set = crate::lock(&self.inner.templates);
        let created = self.create_reporters(&document.reporters)?;

        let declared: HashSet<&str> = document.reporters.iter().map(|d| d.name.as_str()).collect();
        let mut changed: Vec<String> = created.iter().map(|(decl, _)| decl.name.clone()).collect();
        let mut retired = Vec::new();
        {
            let mut reporters = crate::write(&self.inner.reporters);
            let removed: Vec<String> = reporters
                .iter()
                .filter(|(name, slot)| slot.decl.is_some() && !declared.contains(name.as_str()))
                .map(|(name, _)| name.clone())
                .collect();
            for name in removed {
                if let Some(slot) = reporters.remove(&name) {
                    retired.push(slot.reporter);
                }
                changed.push(name);
            }
            for (decl, reporter) in created {
                let name = decl.name.clone();
                let slot = ReporterSlot {
                    decl: Some(decl),
                    reporter,
                };
                if let Some(previous) = reporters.insert(name, slot) {
                    retired.push(previous.reporter);
                }
            }
        }

        let mut changes = set.diff(document.configs);
        let forced = recompile_naming(&set, &changed, &changes);
        changes.extend(forced);
        let deferred = self.apply_locked(&mut set, changes);
        drop(set);
        deferred.deliver();
        for reporter in &retired {
            close_reporter(reporter);
        }
        Ok(())
    }

    /// Creates and configures the reporters whose declaration is new or changed.
    fn create_reporters(&self, decls: &[ReporterDecl]) -> DbugResult<Vec<(ReporterDecl, ReporterRef)>> {
        let factories = crate::read(&self.inner.factories);
        let current = crate::read(&self.inner.reporters);
        let mut created: Vec<(ReporterDecl, ReporterRef)> = Vec::new();
        for decl in decls {
            if current.get(&decl.name).and_then(|slot| slot.decl.as_ref()) == Some(decl) {
                continue;
            }
            match create_reporter(&factories, decl) {
                Ok(reporter) => created.push((decl.clone(), reporter)),
                Err(err) => {
                    for (_, reporter) in &created {
                        close_reporter(reporter);
                    }
                    return Err(err);
                }
            }
        }
        Ok(created)
    }

    /// Drops store entries whose anchors no longer exist, returning how many were dropped.
    pub fn sweep(&self) -> usize {
        let types: Vec<Arc<TypeEntry>> = crate::read(&self.inner.types).clone();
        types.iter().map(|entry| entry.sweep()).sum()
    }

    /// Closes every reporter.
    pub fn close(&self) {
        let reporters: Vec<ReporterRef> = crate::read(&self.inner.reporters)
            .values()
            .map(|slot| slot.reporter.clone())
            .collect();
        for reporter in &reporters {
            close_reporter(reporter);
        }
    }
}

impl fmt::Debug for Dbug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dbug")
            .field("types", &crate::read(&self.inner.types).len())
            .field("templates", &crate::lock(&self.inner.templates).len())
            .field("reporters", &crate::read(&self.inner.reporters).len())
            .finish()
    }
}

fn create_reporter(
    factories: &AHashMap<String, Arc<dyn ReporterFactory>>,
    decl: &ReporterDecl,
) -> DbugResult<ReporterRef> {
    let factory = factories
        .get(&decl.kind)
        .ok_or_else(|| DbugError::UnknownReporterKind {
            kind: decl.kind.clone(),
        })?;
    let wrap = |source| DbugError::Reporter {
        name: decl.name.clone(),
        source,
    };
    let mut reporter = factory.create(decl).map_err(wrap)?;
    reporter.configure(&decl.config).map_err(wrap)?;
    Ok(ReporterRef::new(&decl.name, Arc::from(reporter)))
}

fn close_reporter(reporter: &ReporterRef) {
    reporter.guarded("close", || reporter.reporter().close());
}

/// Forced updates for the templates naming any of `names`, skipping templates `pending`
/// already changes.
fn recompile_naming(set: &ConfigSet, names: &[String], pending: &[ConfigChange]) -> Vec<ConfigChange> {
    set.iter()
        .filter(|template| names.iter().any(|name| template.names_reporter(name)))
        .filter(|template| {
            !pending.iter().any(|change| match change {
                ConfigChange::Removed(old) | ConfigChange::Updated { old, .. } => old == *template,
                ConfigChange::Added(_) => false,
            })
        })
        .map(|template| ConfigChange::Updated {
            old: template.clone(),
            new: template.clone(),
        })
        .collect()
}
