use super::template::{ConfigTemplate, EventConfigTemplate};
use crate::anchor_type::{AnchorTypeDef, EventType};
use crate::reporter::{Compiled, ReporterCache, ReporterRef};
use dbug_expr::Expression;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// A set of small indices stored as a bitset.
#[derive(Clone, Default)]
pub struct DependencySet {
    words: SmallVec<[u64; 2]>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize) {
        let word = index / 64;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % 64);
    }

    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    pub fn union_with(&mut self, other: &DependencySet) {
        if self.words.len() < other.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (word, bits) in self.words.iter_mut().zip(&other.words) {
            *word |= bits;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            (0..64).filter(move |bit| word & (1 << bit) != 0).map(move |bit| w * 64 + bit)
        })
    }
}

impl PartialEq for DependencySet {
    fn eq(&self, other: &Self) -> bool {
        let len = self.words.len().max(other.words.len());
        (0..len).all(|w| self.words.get(w).unwrap_or(&0) == other.words.get(w).unwrap_or(&0))
    }
}

impl Eq for DependencySet {}

impl FromIterator<usize> for DependencySet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = DependencySet::new();
        for index in iter {
            set.insert(index);
        }
        set
    }
}

impl fmt::Debug for DependencySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// What an expression transitively reads, computed once when its template is compiled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dependencies {
    /// Dynamic field indices.
    pub dynamic: DependencySet,
    /// Config variable indices.
    pub variables: DependencySet,
    /// Event field indices.
    pub events: DependencySet,
    /// Event variable indices.
    pub event_variables: DependencySet,
}

impl Dependencies {
    pub(crate) fn union_with(&mut self, other: &Dependencies) {
        self.dynamic.union_with(&other.dynamic);
        self.variables.union_with(&other.variables);
        self.events.union_with(&other.events);
        self.event_variables.union_with(&other.event_variables);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledVariable {
    pub name: Arc<str>,
    pub expression: Expression,
    pub cacheable: bool,
    pub deps: Dependencies,
}

/// An event template compiled against one event type.
pub struct EventConfig {
    pub(crate) template: EventConfigTemplate,
    pub(crate) event_type: EventType,
    /// Indexed by position in the template; `None` where the variable failed to compile.
    pub(crate) variables: Vec<Option<CompiledVariable>>,
    pub(crate) order: Vec<usize>,
    pub(crate) condition: Option<(Expression, Dependencies)>,
    /// Event-specific reporters followed by the template's reporters.
    pub(crate) reporters: Vec<ReporterRef>,
    pub(crate) reporter_state: ReporterCache,
}

impl EventConfig {
    pub fn template(&self) -> &EventConfigTemplate {
        &self.template
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn variables(&self) -> impl Iterator<Item = &CompiledVariable> {
        self.variables.iter().flatten()
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables
            .iter()
            .position(|v| v.as_ref().is_some_and(|v| &*v.name == name))
    }

    pub fn condition(&self) -> Option<&Expression> {
        self.condition.as_ref().map(|(expr, _)| expr)
    }

    pub fn reporters(&self) -> &[ReporterRef] {
        &self.reporters
    }

    /// The reporter's state for this event config, compiled on first use.
    pub(crate) fn compiled_for(&self, reporter: &ReporterRef, config: &Compiled) -> Option<Compiled> {
        self.reporter_state.get_or_compile(reporter, || {
            reporter.guarded("compile_for_event_config", || {
                reporter.reporter().compile_for_event_config(config, self)
            })
        })
    }

    fn same_as(&self, other: &EventConfig) -> bool {
        self.template == other.template
            && self.event_type == other.event_type
            && self.variables == other.variables
            && self.condition == other.condition
            && same_reporters(&self.reporters, &other.reporters)
    }
}

impl fmt::Debug for EventConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventConfig")
            .field("event", &self.event_type.name())
            .field("variables", &self.variables)
            .field("condition", &self.condition)
            .field("reporters", &self.reporters)
            .finish()
    }
}

/// A [`ConfigTemplate`] compiled against one anchor type.
pub struct CompiledConfig {
    pub(crate) template: Arc<ConfigTemplate>,
    pub(crate) def: Arc<AnchorTypeDef>,
    /// Indexed by position in the template; `None` where the variable failed to compile.
    pub(crate) variables: Vec<Option<CompiledVariable>>,
    /// Compiled variables ordered so every variable follows the variables it reads.
    pub(crate) order: Vec<usize>,
    pub(crate) condition: Expression,
    pub(crate) condition_deps: Dependencies,
    /// Indexed by event type ordinal.
    pub(crate) events: Vec<Vec<Arc<EventConfig>>>,
    pub(crate) reporters: Vec<ReporterRef>,
    pub(crate) reporter_state: ReporterCache,
}

impl CompiledConfig {
    pub fn template(&self) -> &ConfigTemplate {
        &self.template
    }

    pub fn id(&self) -> Option<&str> {
        self.template.id.as_deref()
    }

    pub fn anchor_type(&self) -> &AnchorTypeDef {
        &self.def
    }

    pub fn variables(&self) -> impl Iterator<Item = &CompiledVariable> {
        self.variables.iter().flatten()
    }

    pub fn variable(&self, index: usize) -> Option<&CompiledVariable> {
        self.variables.get(index).and_then(Option::as_ref)
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables
            .iter()
            .position(|v| v.as_ref().is_some_and(|v| &*v.name == name))
    }

    pub fn condition(&self) -> &Expression {
        &self.condition
    }

    pub fn condition_dependencies(&self) -> &Dependencies {
        &self.condition_deps
    }

    /// Event configs for the event type with `ordinal`.
    pub fn event_configs(&self, ordinal: usize) -> &[Arc<EventConfig>] {
        self.events.get(ordinal).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn subscribes(&self, ordinal: usize) -> bool {
        !self.event_configs(ordinal).is_empty()
    }

    pub fn reporters(&self) -> &[ReporterRef] {
        &self.reporters
    }

    /// The reporter's state for this config, compiled on first use.
    pub(crate) fn compiled_for(&self, reporter: &ReporterRef) -> Option<Compiled> {
        self.reporter_state.get_or_compile(reporter, || {
            reporter.guarded("compile_for_config", || reporter.reporter().compile_for_config(self))
        })
    }

    /// Whether recompiling produced an equivalent config, so attached instances can be kept.
    pub(crate) fn same_as(&self, other: &CompiledConfig) -> bool {
        self.template == other.template
            && self.variables == other.variables
            && self.condition == other.condition
            && same_reporters(&self.reporters, &other.reporters)
            && self.events.len() == other.events.len()
            && self.events.iter().zip(&other.events).all(|(a, b)| {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same_as(b))
            })
    }
}

impl fmt::Debug for CompiledConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledConfig")
            .field("template", &self.template.label())
            .field("anchor_type", &self.def.to_string())
            .field("variables", &self.variables)
            .field("condition", &self.condition)
            .field("events", &self.events)
            .field("reporters", &self.reporters)
            .finish()
    }
}

fn same_reporters(a: &[ReporterRef], b: &[ReporterRef]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bitsets_grow_past_inline_words() {
        let mut set = DependencySet::new();
        assert!(set.is_empty());
        set.insert(3);
        set.insert(130);
        assert!(set.contains(130));
        assert!(!set.contains(129));
        assert!(!set.contains(1000));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 130]);

        let mut other: DependencySet = [1, 3].into_iter().collect();
        other.union_with(&set);
        assert_eq!(other.iter().collect::<Vec<_>>(), vec![1, 3, 130]);
    }
}
