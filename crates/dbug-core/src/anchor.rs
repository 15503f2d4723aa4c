//! Live anchors and the incremental re-evaluation of their attached configs.
//!
//! Every attached config keeps a [`ConfigInstance`]: residual expressions specialized against
//! the anchor's static values, the cached values of cacheable variables and the current state
//! of the condition. A dynamic field update only refreshes what the compiled dependency sets say
//! can have changed, and the anchor's active count always equals the number of instances whose
//! condition holds.
use crate::anchor_type::{
    check_value, AnchorTypeDef, ANCHOR_ACTIVE_ORDINAL, VALUE_UPDATE_ORDINAL,
};
use crate::config::{CompiledConfig, DependencySet, EventConfig};
use crate::error::{DbugError, DbugResult};
use crate::event::{AnchorInfo, ConfigEvent, ConfiguredAnchor, EventBuilder, EventOccurrence};
use crate::reporter::{deliver, Delivery, PendingHooks, ReporterCache};
use crate::runtime::TypeEntry;
use dbug_expr::{refresh, EvalError, EvalResult, Expression, RefKind, Scope, Type, Value, ValueModel};
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

fn unbound(kind: RefKind, index: usize) -> EvalError {
    EvalError::Unbound {
        name: format!("{kind:?}#{index}"),
    }
}

struct VariableState {
    residual: Expression,
    /// Last refreshed value of a cacheable variable; `None` for uncacheable ones.
    cached: Option<EvalResult<Value>>,
    /// A field the variable reads changed while its config was inactive.
    stale: bool,
}

impl VariableState {
    fn read(&self, scope: &InstanceScope<'_>) -> EvalResult<Value> {
        match &self.cached {
            Some(result) => result.clone(),
            None => self.residual.evaluate(scope),
        }
    }
}

/// Resolves references for one config instance.
#[derive(Clone, Copy)]
struct InstanceScope<'a> {
    info: &'a AnchorInfo,
    dynamics: &'a [Value],
    config: &'a CompiledConfig,
    variables: &'a [Option<VariableState>],
}

impl Scope for InstanceScope<'_> {
    fn reference(&self, kind: RefKind, index: usize) -> EvalResult<Value> {
        let value = match kind {
            RefKind::Host => Some(self.info.host.clone()),
            RefKind::Static => self.info.statics.get(index).cloned(),
            RefKind::Dynamic => self.dynamics.get(index).cloned(),
            RefKind::ConfigVariable => match self.variables.get(index) {
                Some(Some(state)) => return state.read(self),
                _ => None,
            },
            RefKind::Event | RefKind::EventVariable => None,
        };
        value.ok_or_else(|| unbound(kind, index))
    }

    fn fold(&self, kind: RefKind, index: usize, eval_dynamic: bool) -> Option<Value> {
        match kind {
            RefKind::Host | RefKind::Static => self.reference(kind, index).ok(),
            RefKind::Dynamic if eval_dynamic => self.reference(kind, index).ok(),
            RefKind::ConfigVariable => {
                let state = self.variables.get(index)?.as_ref()?;
                // A cached value that reads no dynamic field can never change.
                let invariant = matches!(state.cached, Some(Ok(_)))
                    && !state.stale
                    && self
                        .config
                        .variable(index)
                        .is_some_and(|v| v.deps.dynamic.is_empty());
                if eval_dynamic || invariant {
                    state.read(self).ok()
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// Resolves references while evaluating one event config for one occurrence.
struct EventScope<'a> {
    base: InstanceScope<'a>,
    values: &'a [Value],
    variables: &'a [Option<Expression>],
    computed: RefCell<Vec<Option<EvalResult<Value>>>>,
}

impl<'a> EventScope<'a> {
    fn new(base: InstanceScope<'a>, values: &'a [Value], variables: &'a [Option<Expression>]) -> Self {
        Self {
            base,
            values,
            variables,
            computed: RefCell::new(vec![None; variables.len()]),
        }
    }
}

impl Scope for EventScope<'_> {
    fn reference(&self, kind: RefKind, index: usize) -> EvalResult<Value> {
        match kind {
            RefKind::Event => self.values.get(index).cloned().ok_or_else(|| unbound(kind, index)),
            RefKind::EventVariable => {
                let known = self.computed.borrow().get(index).cloned().flatten();
                if let Some(result) = known {
                    return result;
                }
                let Some(Some(expression)) = self.variables.get(index) else {
                    return Err(unbound(kind, index));
                };
                let result = expression.evaluate(self);
                if let Some(slot) = self.computed.borrow_mut().get_mut(index) {
                    *slot = Some(result.clone());
                }
                result
            }
            _ => self.base.reference(kind, index),
        }
    }
}

/// An event config specialized for one anchor.
struct EventInstance {
    config: Arc<EventConfig>,
    variables: Vec<Option<Expression>>,
    condition: Option<Expression>,
}

impl EventInstance {
    fn new(config: &Arc<EventConfig>, scope: &InstanceScope<'_>) -> Self {
        // Event expressions may call impure members, so only references are substituted.
        let variables = config
            .variables
            .iter()
            .map(|v| v.as_ref().map(|v| v.expression.specialize(scope, false, false)))
            .collect();
        let condition = config
            .condition
            .as_ref()
            .map(|(expression, _)| expression.specialize(scope, false, false));
        Self {
            config: config.clone(),
            variables,
            condition,
        }
    }
}

/// A compiled config attached to one anchor.
struct ConfigInstance {
    config: Arc<CompiledConfig>,
    variables: Vec<Option<VariableState>>,
    condition: Expression,
    active: bool,
    /// Parallel to the config's event configs.
    events: Vec<Vec<EventInstance>>,
    reporter_state: Arc<ReporterCache>,
    error_logged: bool,
}

/// Logs the first evaluation failure of a (config, anchor) pair as a warning, later ones at trace.
fn log_eval_error(logged: &mut bool, info: &AnchorInfo, config: &CompiledConfig, target: &str, err: &EvalError) {
    if *logged {
        log::trace!("{} [{}] {target}: {err}", info.def, config.template.label());
    } else {
        *logged = true;
        log::warn!(
            "{} [{}] {target} failed to evaluate for {}: {err}",
            info.def,
            config.template.label(),
            info.host
        );
    }
}

impl ConfigInstance {
    /// Builds the instance, or `None` when the condition is false and no dynamic field can
    /// change it.
    fn attach(info: &AnchorInfo, dynamics: &[Value], config: Arc<CompiledConfig>) -> Option<Self> {
        let mut logged = false;
        let mut variables: Vec<Option<VariableState>> =
            config.variables.iter().map(|_| None).collect();
        for &index in &config.order {
            let Some(variable) = config.variable(index) else {
                continue;
            };
            let state = {
                let scope = InstanceScope {
                    info,
                    dynamics,
                    config: &config,
                    variables: &variables,
                };
                let residual = variable.expression.specialize(&scope, false, variable.cacheable);
                let cached = variable.cacheable.then(|| refresh(&residual, &scope));
                if let Some(Err(err)) = &cached {
                    log_eval_error(&mut logged, info, &config, &variable.name, err);
                }
                VariableState {
                    residual,
                    cached,
                    stale: false,
                }
            };
            variables[index] = Some(state);
        }

        let scope = InstanceScope {
            info,
            dynamics,
            config: &config,
            variables: &variables,
        };
        let condition = config.condition.specialize(&scope, false, true);
        let active = match refresh(&condition, &scope) {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(err) => {
                log_eval_error(&mut logged, info, &config, "condition", &err);
                false
            }
        };
        if !active && config.condition_deps.dynamic.is_empty() {
            log::debug!(
                "{} [{}] can never become active for {}",
                info.def,
                config.template.label(),
                info.host
            );
            return None;
        }
        let events = config
            .events
            .iter()
            .map(|list| list.iter().map(|ev| EventInstance::new(ev, &scope)).collect())
            .collect();
        Some(Self {
            config: config.clone(),
            variables,
            condition,
            active,
            events,
            reporter_state: Arc::default(),
            error_logged: logged,
        })
    }

    fn refresh_variable(&mut self, info: &AnchorInfo, dynamics: &[Value], index: usize) {
        let result = {
            let Some(Some(state)) = self.variables.get(index) else {
                return;
            };
            if state.cached.is_none() {
                return;
            }
            let scope = InstanceScope {
                info,
                dynamics,
                config: &self.config,
                variables: &self.variables,
            };
            refresh(&state.residual, &scope)
        };
        if let Err(err) = &result {
            let name = self.config.variable(index).map_or("variable", |v| &*v.name);
            log_eval_error(&mut self.error_logged, info, &self.config, name, err);
        }
        if let Some(Some(state)) = self.variables.get_mut(index) {
            state.cached = Some(result);
            state.stale = false;
        }
    }

    fn refresh_stale(&mut self, info: &AnchorInfo, dynamics: &[Value]) {
        let config = self.config.clone();
        for &index in &config.order {
            if self.is_stale(index) {
                self.refresh_variable(info, dynamics, index);
            }
        }
    }

    fn is_stale(&self, index: usize) -> bool {
        matches!(self.variables.get(index), Some(Some(state)) if state.stale)
    }

    fn evaluate_condition(&mut self, info: &AnchorInfo, dynamics: &[Value]) -> bool {
        let result = {
            let scope = InstanceScope {
                info,
                dynamics,
                config: &self.config,
                variables: &self.variables,
            };
            refresh(&self.condition, &scope)
        };
        match result {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(err) => {
                log_eval_error(&mut self.error_logged, info, &self.config, "condition", &err);
                false
            }
        }
    }

    /// Re-evaluates after dynamic field `index` changed from `old` to `new`.
    fn propagate(
        &mut self,
        info: &Arc<AnchorInfo>,
        dynamics: &[Value],
        index: usize,
        old: &Value,
        new: &Value,
        active: &AtomicUsize,
        out: &mut Vec<Delivery>,
    ) {
        let config = self.config.clone();
        let pre = self.active;
        let mut refreshed = DependencySet::new();
        if config.condition_deps.dynamic.contains(index) {
            for &var in &config.order {
                if !config.condition_deps.variables.contains(var) {
                    continue;
                }
                let reads = config.variable(var).is_some_and(|v| v.deps.dynamic.contains(index));
                if reads || self.is_stale(var) {
                    self.refresh_variable(info, dynamics, var);
                    refreshed.insert(var);
                }
            }
            self.active = self.evaluate_condition(info, dynamics);
        }
        let post = self.active;

        let mut changed = Vec::new();
        for &var in &config.order {
            let Some(variable) = config.variable(var) else {
                continue;
            };
            let reads = variable.deps.dynamic.contains(index);
            if reads {
                changed.push(Value::Str(variable.name.clone()));
            }
            if refreshed.contains(var) || !(reads || self.is_stale(var)) {
                continue;
            }
            if pre || post {
                self.refresh_variable(info, dynamics, var);
            } else if let Some(Some(state)) = self.variables.get_mut(var) {
                state.stale = state.cached.is_some();
            }
        }

        let field = Value::string(info.def.dynamic_fields()[index].name());
        if pre && post && config.subscribes(VALUE_UPDATE_ORDINAL) {
            let values = vec![field.clone(), Value::array(Type::string(), changed)];
            self.synthesize(info, dynamics, VALUE_UPDATE_ORDINAL, values, out);
        }
        if pre != post {
            if post {
                active.fetch_add(1, Ordering::SeqCst);
            } else {
                active.fetch_sub(1, Ordering::SeqCst);
            }
            if config.subscribes(ANCHOR_ACTIVE_ORDINAL) {
                let hidden = if post { old.clone() } else { new.clone() };
                let values = vec![Value::Bool(post), field, hidden];
                self.synthesize(info, dynamics, ANCHOR_ACTIVE_ORDINAL, values, out);
            }
        }
    }

    fn synthesize(
        &mut self,
        info: &Arc<AnchorInfo>,
        dynamics: &[Value],
        ordinal: usize,
        values: Vec<Value>,
        out: &mut Vec<Delivery>,
    ) {
        let occurrence = EventOccurrence::new(info.def.clone(), ordinal, Arc::from(dynamics), values, false);
        self.collect(info, &occurrence, out);
    }

    /// Evaluates the event configs subscribed to `occurrence` and queues a delivery for each
    /// whose condition holds.
    fn collect(&mut self, info: &Arc<AnchorInfo>, occurrence: &Arc<EventOccurrence>, out: &mut Vec<Delivery>) {
        let Some(events) = self.events.get(occurrence.event_type().ordinal()) else {
            return;
        };
        if events.is_empty() {
            return;
        }
        let base = InstanceScope {
            info,
            dynamics: occurrence.dynamics(),
            config: &self.config,
            variables: &self.variables,
        };
        let config_values: Arc<[Option<Value>]> = self
            .variables
            .iter()
            .map(|state| state.as_ref().and_then(|state| state.read(&base).ok()))
            .collect();
        let configured = ConfiguredAnchor {
            info: info.clone(),
            config: self.config.clone(),
            values: config_values,
        };
        for event in events {
            let scope = EventScope::new(base, occurrence.values(), &event.variables);
            let event_name = event.config.event_type.name();
            if let Some(condition) = &event.condition {
                match condition.evaluate(&scope) {
                    Ok(Value::Bool(true)) => {}
                    Ok(_) => continue,
                    Err(err) => {
                        let target = format!("{event_name}.condition");
                        log_eval_error(&mut self.error_logged, info, &self.config, &target, &err);
                        continue;
                    }
                }
            }
            let mut values = Vec::with_capacity(event.variables.len());
            for (index, variable) in event.variables.iter().enumerate() {
                let value = match variable {
                    None => None,
                    Some(_) => match scope.reference(RefKind::EventVariable, index) {
                        Ok(value) => Some(value),
                        Err(err) => {
                            let target = event.config.variables[index]
                                .as_ref()
                                .map_or_else(String::new, |v| format!("{event_name}.{}", v.name));
                            log_eval_error(&mut self.error_logged, info, &self.config, &target, &err);
                            None
                        }
                    },
                };
                values.push(value);
            }
            out.push(Delivery {
                event: ConfigEvent {
                    occurrence: occurrence.clone(),
                    anchor: configured.clone(),
                    event_config: event.config.clone(),
                    values,
                },
                configured: self.reporter_state.clone(),
            });
        }
    }
}

struct AnchorState {
    dynamics: Vec<Value>,
    instances: Vec<ConfigInstance>,
}

/// The anchor of one host value. Its configs are only touched under its own lock.
pub(crate) struct LiveAnchor {
    pub(crate) info: Arc<AnchorInfo>,
    model: Arc<dyn ValueModel>,
    state: Mutex<AnchorState>,
    active: AtomicUsize,
    reporter_state: ReporterCache,
}

impl LiveAnchor {
    pub(crate) fn new(info: AnchorInfo, model: Arc<dyn ValueModel>, dynamics: Vec<Value>) -> Self {
        Self {
            info: Arc::new(info),
            model,
            state: Mutex::new(AnchorState {
                dynamics,
                instances: Vec::new(),
            }),
            active: AtomicUsize::new(0),
            reporter_state: ReporterCache::default(),
        }
    }

    pub(crate) fn model(&self) -> &dyn ValueModel {
        &*self.model
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn attached_configs(&self) -> usize {
        crate::lock(&self.state).instances.len()
    }

    /// Attaches `config` unless it is already attached or `installed` says it was withdrawn.
    /// The resulting `ANCHOR_ACTIVE` deliveries wait in `deferred`.
    pub(crate) fn attach(
        self: &Arc<Self>,
        config: &Arc<CompiledConfig>,
        installed: &dyn Fn(&Arc<CompiledConfig>) -> bool,
        deferred: &mut Deferred,
    ) {
        let mut out = Vec::new();
        {
            let mut state = crate::lock(&self.state);
            self.attach_locked(&mut state, config, installed, &mut out);
        }
        deferred.push(self, out);
    }

    fn attach_locked(
        &self,
        state: &mut AnchorState,
        config: &Arc<CompiledConfig>,
        installed: &dyn Fn(&Arc<CompiledConfig>) -> bool,
        out: &mut Vec<Delivery>,
    ) {
        if state.instances.iter().any(|i| Arc::ptr_eq(&i.config, config)) || !installed(config) {
            return;
        }
        let Some(mut instance) = ConfigInstance::attach(&self.info, &state.dynamics, config.clone())
        else {
            return;
        };
        if instance.active {
            self.active.fetch_add(1, Ordering::SeqCst);
            if config.subscribes(ANCHOR_ACTIVE_ORDINAL) {
                let values = vec![Value::Bool(true), Value::Null, Value::Null];
                instance.synthesize(&self.info, &state.dynamics, ANCHOR_ACTIVE_ORDINAL, values, out);
            }
        }
        state.instances.push(instance);
    }

    fn detach_locked(&self, state: &mut AnchorState, config: &Arc<CompiledConfig>) {
        if let Some(at) = state.instances.iter().position(|i| Arc::ptr_eq(&i.config, config)) {
            let instance = state.instances.remove(at);
            if instance.active {
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    pub(crate) fn detach(&self, config: &Arc<CompiledConfig>) {
        let mut state = crate::lock(&self.state);
        self.detach_locked(&mut state, config);
    }

    /// Swaps `old` for `new` under one lock.
    pub(crate) fn replace(
        self: &Arc<Self>,
        old: &Arc<CompiledConfig>,
        new: &Arc<CompiledConfig>,
        installed: &dyn Fn(&Arc<CompiledConfig>) -> bool,
        deferred: &mut Deferred,
    ) {
        let mut out = Vec::new();
        {
            let mut state = crate::lock(&self.state);
            self.detach_locked(&mut state, old);
            self.attach_locked(&mut state, new, installed, &mut out);
        }
        deferred.push(self, out);
    }

    pub(crate) fn dynamic_value(&self, index: usize) -> Option<Value> {
        crate::lock(&self.state).dynamics.get(index).cloned()
    }

    pub(crate) fn dynamics_snapshot(&self) -> Arc<[Value]> {
        Arc::from(crate::lock(&self.state).dynamics.as_slice())
    }

    pub(crate) fn config_value(&self, config_id: &str, name: &str) -> Option<Value> {
        let mut state = crate::lock(&self.state);
        let AnchorState {
            dynamics,
            instances,
        } = &mut *state;
        let instance = instances
            .iter_mut()
            .find(|instance| instance.config.id() == Some(config_id))?;
        let index = instance.config.variable_index(name)?;
        instance.refresh_stale(&self.info, dynamics);
        let scope = InstanceScope {
            info: &self.info,
            dynamics,
            config: &instance.config,
            variables: &instance.variables,
        };
        instance.variables.get(index)?.as_ref()?.read(&scope).ok()
    }

    /// Replaces dynamic field `index` with `update(current)`, propagating the change to every
    /// attached config. Returns the previous value.
    pub(crate) fn update(
        &self,
        index: usize,
        update: impl FnOnce(&Value) -> DbugResult<Value>,
    ) -> DbugResult<Value> {
        let field = &self.info.def.dynamic_fields()[index];
        let mut out = Vec::new();
        let old = {
            let mut state = crate::lock(&self.state);
            let value = update(&state.dynamics[index])?;
            let value = check_value(&*self.model, &self.info.def, field.name(), field.ty(), value)?;
            let old = std::mem::replace(&mut state.dynamics[index], value.clone());
            let AnchorState {
                dynamics,
                instances,
            } = &mut *state;
            for instance in instances.iter_mut() {
                instance.propagate(&self.info, dynamics, index, &old, &value, &self.active, &mut out);
            }
            old
        };
        self.deliver(out, None);
        Ok(old)
    }

    /// Fires a user event to every attached config instance, active or not.
    pub(crate) fn fire(
        &self,
        ordinal: usize,
        dynamics: Arc<[Value]>,
        values: Vec<Value>,
        hooks: Option<&mut PendingHooks>,
    ) -> Arc<EventOccurrence> {
        let occurrence = EventOccurrence::new(self.info.def.clone(), ordinal, dynamics, values, hooks.is_some());
        let mut out = Vec::new();
        {
            let mut state = crate::lock(&self.state);
            for instance in state.instances.iter_mut() {
                instance.collect(&self.info, &occurrence, &mut out);
            }
        }
        self.deliver(out, hooks);
        occurrence
    }

    fn deliver(&self, out: Vec<Delivery>, hooks: Option<&mut PendingHooks>) {
        if !out.is_empty() {
            deliver(&self.reporter_state, out, hooks);
        }
    }
}

/// Deliveries held back until the caller has released its locks.
#[derive(Default)]
pub(crate) struct Deferred {
    pending: Vec<(Arc<LiveAnchor>, Vec<Delivery>)>,
}

impl Deferred {
    fn push(&mut self, anchor: &Arc<LiveAnchor>, out: Vec<Delivery>) {
        if !out.is_empty() {
            self.pending.push((anchor.clone(), out));
        }
    }

    pub(crate) fn deliver(self) {
        for (anchor, out) in self.pending {
            anchor.deliver(out, None);
        }
    }
}

impl fmt::Debug for LiveAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveAnchor")
            .field("anchor_type", &self.info.def.to_string())
            .field("host", &self.info.host)
            .field("active", &self.active_count())
            .finish()
    }
}

/// An anchor whose external fields were not supplied yet; it resolves once another builder
/// creates the anchor for the same host value.
pub(crate) struct Placeholder {
    pub(crate) entry: Arc<TypeEntry>,
    pub(crate) host: Value,
    pub(crate) key: usize,
    pub(crate) resolved: OnceLock<Arc<LiveAnchor>>,
}

impl Placeholder {
    fn resolve(&self) -> Option<&Arc<LiveAnchor>> {
        if let Some(anchor) = self.resolved.get() {
            return Some(anchor);
        }
        let anchor = self.entry.lookup(self.key)?;
        Some(self.resolved.get_or_init(|| anchor))
    }
}

#[derive(Clone)]
enum Repr {
    Live(Arc<LiveAnchor>),
    /// No config applied to the type when the anchor was built.
    Inert(Arc<TypeEntry>),
    Placeholder(Arc<Placeholder>),
}

/// Handle on the debug state of one host value.
#[derive(Clone)]
pub struct Anchor {
    repr: Repr,
}

impl Anchor {
    pub(crate) fn live(anchor: Arc<LiveAnchor>) -> Self {
        Self {
            repr: Repr::Live(anchor),
        }
    }

    pub(crate) fn inert(entry: Arc<TypeEntry>) -> Self {
        Self {
            repr: Repr::Inert(entry),
        }
    }

    pub(crate) fn placeholder(placeholder: Placeholder) -> Self {
        Self {
            repr: Repr::Placeholder(Arc::new(placeholder)),
        }
    }

    fn resolved(&self) -> Option<&Arc<LiveAnchor>> {
        match &self.repr {
            Repr::Live(anchor) => Some(anchor),
            Repr::Placeholder(placeholder) => placeholder.resolve(),
            Repr::Inert(_) => None,
        }
    }

    pub fn anchor_type(&self) -> &AnchorTypeDef {
        match &self.repr {
            Repr::Live(anchor) => &*anchor.info.def,
            Repr::Inert(entry) => &*entry.def,
            Repr::Placeholder(placeholder) => &*placeholder.entry.def,
        }
    }

    pub fn host(&self) -> Option<&Value> {
        match &self.repr {
            Repr::Live(anchor) => Some(&anchor.info.host),
            Repr::Inert(_) => None,
            Repr::Placeholder(placeholder) => Some(&placeholder.host),
        }
    }

    pub fn is_inert(&self) -> bool {
        matches!(self.repr, Repr::Inert(_))
    }

    /// Whether this is a placeholder whose anchor has not been built yet.
    pub fn is_placeholder(&self) -> bool {
        matches!(&self.repr, Repr::Placeholder(p) if p.resolve().is_none())
    }

    pub fn is_active(&self) -> bool {
        self.active_count() > 0
    }

    /// Number of attached configs whose condition holds.
    pub fn active_count(&self) -> usize {
        self.resolved().map_or(0, |anchor| anchor.active_count())
    }

    /// Number of attached configs, active or not.
    pub fn attached_configs(&self) -> usize {
        self.resolved().map_or(0, |anchor| anchor.attached_configs())
    }

    pub fn static_value(&self, name: &str) -> Option<Value> {
        self.resolved()?.info.static_value(name).cloned()
    }

    pub fn dynamic_value(&self, name: &str) -> Option<Value> {
        let index = self.anchor_type().dynamic_index(name)?;
        self.resolved()?.dynamic_value(index)
    }

    /// Current value of variable `name` of the attached config with id `config_id`.
    pub fn config_value(&self, config_id: &str, name: &str) -> Option<Value> {
        self.resolved()?.config_value(config_id, name)
    }

    fn dynamic_index(&self, name: &str) -> DbugResult<usize> {
        let def = self.anchor_type();
        def.dynamic_index(name).ok_or_else(|| DbugError::UnknownField {
            anchor_type: def.to_string(),
            name: name.to_string(),
        })
    }

    /// Sets dynamic field `name`, returning its previous value. Inert anchors check the value
    /// and discard it.
    pub fn set_dynamic_value(&self, name: &str, value: impl Into<Value>) -> DbugResult<Value> {
        let value = value.into();
        self.modify(name, move |_| Ok(value))
    }

    /// Replaces dynamic field `name` with `update(current)`, returning the previous value.
    pub fn modify_dynamic_value(
        &self,
        name: &str,
        update: impl FnOnce(&Value) -> Value,
    ) -> DbugResult<Value> {
        self.modify(name, move |current| Ok(update(current)))
    }

    /// Recomputes dynamic field `name` from the host value with its producer.
    pub fn refresh_dynamic(&self, name: &str) -> DbugResult<Value> {
        let index = self.dynamic_index(name)?;
        let def = self.anchor_type();
        let field = &def.dynamic_fields()[index];
        let Some(host) = self.host() else {
            return Ok(Value::Null);
        };
        let Some(produced) = field.produce(host) else {
            return Err(DbugError::NoProducer {
                anchor_type: def.to_string(),
                name: name.to_string(),
            });
        };
        let value = produced.map_err(|source| DbugError::Producer {
            anchor_type: def.to_string(),
            name: name.to_string(),
            source,
        })?;
        self.modify(name, move |_| Ok(value))
    }

    fn modify(&self, name: &str, update: impl FnOnce(&Value) -> DbugResult<Value>) -> DbugResult<Value> {
        let index = self.dynamic_index(name)?;
        match &self.repr {
            Repr::Inert(entry) => {
                let field = &entry.def.dynamic_fields()[index];
                let value = update(&Value::Null)?;
                check_value(&*entry.model, &entry.def, name, field.ty(), value)?;
                Ok(Value::Null)
            }
            _ => match self.resolved() {
                Some(anchor) => anchor.update(index, update),
                None => Err(DbugError::Unresolved {
                    anchor_type: self.anchor_type().to_string(),
                }),
            },
        }
    }

    /// Starts user event `name`. The builder is a no-op unless a config is active.
    pub fn event(&self, name: &str) -> DbugResult<EventBuilder> {
        let def = self.anchor_type();
        let Some(event_type) = def.event_type(name) else {
            return Err(DbugError::UnknownEvent {
                anchor_type: def.to_string(),
                name: name.to_string(),
            });
        };
        if event_type.is_standard() {
            return Err(DbugError::ReservedEvent {
                anchor_type: def.to_string(),
                name: name.to_string(),
            });
        }
        match self.resolved() {
            Some(anchor) if anchor.active_count() > 0 => Ok(EventBuilder::new(
                anchor.clone(),
                event_type.ordinal(),
                anchor.dynamics_snapshot(),
            )),
            _ => Ok(EventBuilder::noop()),
        }
    }
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Live(anchor) => anchor.fmt(f),
            Repr::Inert(entry) => write!(f, "Anchor({}, inert)", entry.def),
            Repr::Placeholder(placeholder) => match placeholder.resolve() {
                Some(anchor) => anchor.fmt(f),
                None => write!(f, "Anchor({}, unresolved)", placeholder.entry.def),
            },
        }
    }
}
