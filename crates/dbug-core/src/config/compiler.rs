//! Binds a [`ConfigTemplate`] to an anchor type.
//!
//! Identifiers resolve in this order: the host value, static fields, dynamic fields, config
//! variables, and inside an event config the event's fields and then its variables. Variables
//! compile lazily on first reference so each records what it transitively reads; a variable
//! reached again while it is still compiling is a circular dependency.
use super::compiled::{CompiledConfig, CompiledVariable, Dependencies, EventConfig};
use super::template::{ConfigTemplate, EventConfigTemplate};
use crate::anchor_type::{AnchorTypeDef, EventType};
use crate::error::{ConfigDiagnostic, ErrorSink, Severity};
use crate::reporter::{ReporterCache, ReporterRef};
use dbug_expr::{
    compile, Environment, Expression, RefKind, Type, TypeError, TypeResult, ValueModel,
    HOST_VALUE_NAME,
};
use std::sync::Arc;

/// Looks up a reporter by the name templates refer to it with.
pub(crate) type ReporterLookup<'a> = &'a dyn Fn(&str) -> Option<ReporterRef>;

impl ConfigTemplate {
    /// Whether the template targets anchors of `def`.
    pub fn applies_to(&self, def: &AnchorTypeDef) -> bool {
        self.target == def.type_name()
            && self.schema.as_deref().map_or(true, |schema| schema == def.schema())
    }
}

/// Compiles `template` against `def`, reporting every problem to `sink`.
///
/// Invalid variables, event variables and event configs are dropped individually. Returns `None`
/// only when the condition does not compile.
pub(crate) fn compile_config(
    def: &Arc<AnchorTypeDef>,
    template: &Arc<ConfigTemplate>,
    model: Arc<dyn ValueModel>,
    reporters: ReporterLookup<'_>,
    sink: &dyn ErrorSink,
) -> Option<Arc<CompiledConfig>> {
    let mut compiler = ConfigCompiler::new(def, template, model, sink);
    compiler.check_variable_names();
    for index in 0..template.variables.len() {
        if matches!(compiler.variables[index], Slot::Pending) {
            // Failures are reported and recorded in the slot.
            let _ = compiler.compile_variable(index);
        }
    }

    let global = compiler.reporters(&template.reporters, reporters, &[]);
    let mut events: Vec<Vec<Arc<EventConfig>>> =
        def.event_types().iter().map(|_| Vec::new()).collect();
    for event_template in &template.events {
        let Some(event_type) = def.event_type(&event_template.event) else {
            compiler.report(
                Severity::Error,
                &event_template.event,
                format!("{def} does not define event {}", event_template.event),
            );
            continue;
        };
        if let Some(config) = compiler.compile_event(event_template, event_type, reporters, &global) {
            events[event_type.ordinal()].push(Arc::new(config));
        }
    }

    let (condition, condition_deps) = match &template.condition {
        None => (Expression::boolean(true), Dependencies::default()),
        Some(text) => match compiler.compile_in_frame(None, "condition", false, text, Some(&Type::boolean())) {
            Ok(compiled) => compiled,
            Err(err) => {
                compiler.report(Severity::Error, "condition", err.to_string());
                return None;
            }
        },
    };

    let ConfigCompiler {
        variables, order, ..
    } = compiler;
    Some(Arc::new(CompiledConfig {
        template: template.clone(),
        def: def.clone(),
        variables: variables.into_iter().map(Slot::into_variable).collect(),
        order,
        condition,
        condition_deps,
        events,
        reporters: global,
        reporter_state: ReporterCache::default(),
    }))
}

enum Slot {
    Pending,
    Compiling,
    Done(CompiledVariable),
    Failed(TypeError),
}

impl Slot {
    fn into_variable(self) -> Option<CompiledVariable> {
        match self {
            Slot::Done(variable) => Some(variable),
            _ => None,
        }
    }
}

/// What the expression currently being compiled has read so far.
struct Frame {
    /// Variable name, `None` for conditions.
    name: Option<Arc<str>>,
    target: String,
    cacheable: bool,
    deps: Dependencies,
}

struct EventContext<'a> {
    event_type: EventType,
    template: &'a EventConfigTemplate,
    variables: Vec<Slot>,
    order: Vec<usize>,
}

struct ConfigCompiler<'a> {
    def: &'a AnchorTypeDef,
    template: &'a ConfigTemplate,
    model: Arc<dyn ValueModel>,
    sink: &'a dyn ErrorSink,
    variables: Vec<Slot>,
    order: Vec<usize>,
    frames: Vec<Frame>,
    event: Option<EventContext<'a>>,
}

impl<'a> ConfigCompiler<'a> {
    fn new(
        def: &'a AnchorTypeDef,
        template: &'a ConfigTemplate,
        model: Arc<dyn ValueModel>,
        sink: &'a dyn ErrorSink,
    ) -> Self {
        Self {
            def,
            template,
            model,
            sink,
            variables: template.variables.iter().map(|_| Slot::Pending).collect(),
            order: Vec::new(),
            frames: Vec::new(),
            event: None,
        }
    }

    fn report(&self, severity: Severity, target: &str, message: String) {
        self.sink.report(ConfigDiagnostic {
            anchor_type: self.def.to_string(),
            config_id: self.template.id.clone(),
            target: target.to_string(),
            severity,
            message,
        });
    }

    fn check_variable_names(&mut self) {
        let template = self.template;
        for (index, variable) in template.variables.iter().enumerate() {
            let name = variable.name.as_str();
            let problem = if self.is_anchor_name(name) {
                Some(format!("variable {name} hides an anchor field"))
            } else if self.def.is_event_field(name) {
                Some(format!("variable {name} hides an event field"))
            } else if template.variables[..index].iter().any(|v| v.name == name) {
                Some(format!("variable {name} is declared more than once"))
            } else {
                None
            };
            if let Some(message) = problem {
                self.report(Severity::Error, name, message.clone());
                self.variables[index] = Slot::Failed(TypeError::invalid(message));
            }
        }
    }

    fn is_anchor_name(&self, name: &str) -> bool {
        name == HOST_VALUE_NAME
            || self.def.static_index(name).is_some()
            || self.def.dynamic_index(name).is_some()
    }

    fn variable_index(&self, name: &str) -> Option<usize> {
        self.template.variables.iter().position(|v| v.name == name)
    }

    fn record(&mut self, update: impl FnOnce(&mut Dependencies)) {
        if let Some(frame) = self.frames.last_mut() {
            update(&mut frame.deps);
        }
    }

    fn circular(&self, name: &str) -> TypeError {
        let mut path: Vec<String> = self
            .frames
            .iter()
            .filter_map(|frame| frame.name.as_deref().map(str::to_string))
            .collect();
        if let Some(start) = path.iter().position(|entry| entry == name) {
            path.drain(..start);
        }
        path.push(name.to_string());
        TypeError::Circular { path }
    }

    /// Compiles `text` in a fresh dependency frame, returning the expression and what it reads.
    fn compile_in_frame(
        &mut self,
        name: Option<Arc<str>>,
        target: &str,
        cacheable: bool,
        text: &str,
        expected: Option<&Type>,
    ) -> TypeResult<(Expression, Dependencies)> {
        self.frames.push(Frame {
            name,
            target: target.to_string(),
            cacheable,
            deps: Dependencies::default(),
        });
        let result = compile(text, expected, self);
        let frame = self.frames.pop();
        let deps = frame.map(|frame| frame.deps).unwrap_or_default();
        result.map(|expression| (expression, deps))
    }

    fn compile_variable(&mut self, index: usize) -> TypeResult<()> {
        let template = self.template;
        let variable = &template.variables[index];
        let name: Arc<str> = Arc::from(variable.name.as_str());
        self.variables[index] = Slot::Compiling;
        match self.compile_in_frame(
            Some(name.clone()),
            &variable.name,
            variable.cacheable,
            &variable.expression,
            None,
        ) {
            Ok((expression, deps)) => {
                self.variables[index] = Slot::Done(CompiledVariable {
                    name,
                    expression,
                    cacheable: variable.cacheable,
                    deps,
                });
                self.order.push(index);
                Ok(())
            }
            Err(err) => {
                self.report(Severity::Error, &variable.name, err.to_string());
                self.variables[index] = Slot::Failed(err.clone());
                Err(err)
            }
        }
    }

    fn config_variable(&mut self, index: usize, name: &str) -> TypeResult<Expression> {
        match &self.variables[index] {
            Slot::Pending => self
                .compile_variable(index)
                .map_err(|err| dependency_error(name, &err))?,
            Slot::Compiling => return Err(self.circular(name)),
            Slot::Failed(err) => return Err(dependency_error(name, err)),
            Slot::Done(_) => {}
        }
        let Slot::Done(variable) = &self.variables[index] else {
            return Err(TypeError::invalid(format!("variable {name} is not compiled")));
        };
        if let Some(frame) = self.frames.last() {
            if frame.cacheable && !variable.cacheable {
                return Err(TypeError::invalid(format!(
                    "cacheable variable {} cannot depend on uncacheable variable {name}",
                    frame.target
                )));
            }
        }
        let reference =
            Expression::reference(variable.expression.ty().clone(), RefKind::ConfigVariable, index, name);
        let deps = variable.deps.clone();
        self.record(|frame| {
            frame.variables.insert(index);
            frame.union_with(&deps);
        });
        Ok(reference)
    }

    fn reporters(
        &self,
        names: &[String],
        lookup: ReporterLookup<'_>,
        inherited: &[ReporterRef],
    ) -> Vec<ReporterRef> {
        let mut resolved: Vec<ReporterRef> = Vec::with_capacity(names.len() + inherited.len());
        for name in names {
            match lookup(name) {
                Some(reporter) => {
                    if !resolved.iter().any(|r| r.same(&reporter)) {
                        resolved.push(reporter);
                    }
                }
                None => self.report(
                    Severity::Error,
                    "reporters",
                    format!("unknown reporter {name}"),
                ),
            }
        }
        for reporter in inherited {
            if !resolved.iter().any(|r| r.same(reporter)) {
                resolved.push(reporter.clone());
            }
        }
        resolved
    }

    fn compile_event(
        &mut self,
        template: &'a EventConfigTemplate,
        event_type: &EventType,
        lookup: ReporterLookup<'_>,
        global: &[ReporterRef],
    ) -> Option<EventConfig> {
        let event = event_type.name();
        let mut slots: Vec<Slot> = template.variables.iter().map(|_| Slot::Pending).collect();
        for (index, variable) in template.variables.iter().enumerate() {
            let name = variable.name.as_str();
            let problem = if self.is_anchor_name(name) {
                Some(format!("event variable {name} hides an anchor field"))
            } else if self.variable_index(name).is_some() {
                Some(format!("event variable {name} hides a config variable"))
            } else if event_type.field_index(name).is_some() {
                Some(format!("event variable {name} hides a field of event {event}"))
            } else if template.variables[..index].iter().any(|v| v.name == name) {
                Some(format!("event variable {name} is declared more than once"))
            } else {
                None
            };
            if let Some(message) = problem {
                self.report(Severity::Error, &format!("{event}.{name}"), message.clone());
                slots[index] = Slot::Failed(TypeError::invalid(message));
            }
        }
        self.event = Some(EventContext {
            event_type: event_type.clone(),
            template,
            variables: slots,
            order: Vec::new(),
        });

        for index in 0..template.variables.len() {
            let pending = self
                .event
                .as_ref()
                .is_some_and(|ctx| matches!(ctx.variables[index], Slot::Pending));
            if pending {
                let _ = self.compile_event_variable(index);
            }
        }

        let condition = match &template.condition {
            None => None,
            Some(text) => {
                let target = format!("{event}.condition");
                match self.compile_in_frame(None, &target, false, text, Some(&Type::boolean())) {
                    Ok(compiled) => Some(compiled),
                    Err(err) => {
                        self.report(Severity::Error, &target, err.to_string());
                        self.event = None;
                        return None;
                    }
                }
            }
        };

        let context = self.event.take()?;
        let reporters = self.reporters(&template.reporters, lookup, global);
        Some(EventConfig {
            template: template.clone(),
            event_type: event_type.clone(),
            variables: context.variables.into_iter().map(Slot::into_variable).collect(),
            order: context.order,
            condition,
            reporters,
            reporter_state: ReporterCache::default(),
        })
    }

    fn compile_event_variable(&mut self, index: usize) -> TypeResult<()> {
        let Some(context) = self.event.as_mut() else {
            return Err(TypeError::invalid("no event is being compiled"));
        };
        let template = context.template;
        let target = format!("{}.{}", context.event_type.name(), template.variables[index].name);
        context.variables[index] = Slot::Compiling;
        let variable = &template.variables[index];
        let name: Arc<str> = Arc::from(variable.name.as_str());
        let result = self.compile_in_frame(Some(name.clone()), &target, false, &variable.expression, None);
        let slot = match &result {
            Ok((expression, deps)) => Slot::Done(CompiledVariable {
                name,
                expression: expression.clone(),
                cacheable: false,
                deps: deps.clone(),
            }),
            Err(err) => {
                self.report(Severity::Error, &target, err.to_string());
                Slot::Failed(err.clone())
            }
        };
        if let Some(context) = self.event.as_mut() {
            context.variables[index] = slot;
            if result.is_ok() {
                context.order.push(index);
            }
        }
        result.map(|_| ())
    }

    fn event_variable(&mut self, index: usize, name: &str) -> TypeResult<Expression> {
        match self.event.as_ref().map(|ctx| &ctx.variables[index]) {
            Some(Slot::Pending) => self
                .compile_event_variable(index)
                .map_err(|err| dependency_error(name, &err))?,
            Some(Slot::Compiling) => return Err(self.circular(name)),
            Some(Slot::Failed(err)) => return Err(dependency_error(name, err)),
            Some(Slot::Done(_)) => {}
            None => return Err(TypeError::invalid("no event is being compiled")),
        }
        let Some(Slot::Done(variable)) = self.event.as_ref().map(|ctx| &ctx.variables[index]) else {
            return Err(TypeError::invalid(format!("event variable {name} is not compiled")));
        };
        let reference =
            Expression::reference(variable.expression.ty().clone(), RefKind::EventVariable, index, name);
        let deps = variable.deps.clone();
        self.record(|frame| {
            frame.event_variables.insert(index);
            frame.union_with(&deps);
        });
        Ok(reference)
    }
}

/// The error a reference to a variable that failed to compile resolves to.
fn dependency_error(name: &str, err: &TypeError) -> TypeError {
    match err {
        TypeError::Circular { .. } => err.clone(),
        _ => TypeError::invalid(format!("variable {name} is invalid: {err}")),
    }
}

impl Environment for ConfigCompiler<'_> {
    fn model(&self) -> Arc<dyn ValueModel> {
        self.model.clone()
    }

    fn resolve_identifier(&mut self, name: &str) -> TypeResult<Option<Expression>> {
        let def = self.def;
        if name == HOST_VALUE_NAME {
            return Ok(Some(Expression::reference(
                def.host_type().clone(),
                RefKind::Host,
                0,
                name,
            )));
        }
        if let Some(index) = def.static_index(name) {
            let ty = def.static_fields()[index].ty().clone();
            return Ok(Some(Expression::reference(ty, RefKind::Static, index, name)));
        }
        if let Some(index) = def.dynamic_index(name) {
            self.record(|frame| frame.dynamic.insert(index));
            let ty = def.dynamic_fields()[index].ty().clone();
            return Ok(Some(Expression::reference(ty, RefKind::Dynamic, index, name)));
        }
        if let Some(index) = self.variable_index(name) {
            return self.config_variable(index, name).map(Some);
        }
        let Some(context) = &self.event else {
            return Ok(None);
        };
        if let Some(index) = context.event_type.field_index(name) {
            let ty = context.event_type.fields()[index].1.clone();
            self.record(|frame| frame.events.insert(index));
            return Ok(Some(Expression::reference(ty, RefKind::Event, index, name)));
        }
        if let Some(index) = context.template.variables.iter().position(|v| v.name == name) {
            return self.event_variable(index, name).map(Some);
        }
        Ok(None)
    }

    fn warn(&mut self, message: String) {
        let target = self
            .frames
            .last()
            .map_or_else(|| "config".to_string(), |frame| frame.target.clone());
        self.report(Severity::Warning, &target, message);
    }
}
