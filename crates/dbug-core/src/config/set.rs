use super::template::ConfigTemplate;
use std::cmp::Ordering;
use std::sync::Arc;

/// One difference between two template sets.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigChange {
    Added(Arc<ConfigTemplate>),
    Removed(Arc<ConfigTemplate>),
    Updated {
        old: Arc<ConfigTemplate>,
        new: Arc<ConfigTemplate>,
    },
}

/// The installed templates, kept sorted by target type and id.
#[derive(Clone, Debug, Default)]
pub struct ConfigSet {
    templates: Vec<Arc<ConfigTemplate>>,
}

impl ConfigSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ConfigTemplate>> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// The messages turning this set into `templates`.
    ///
    /// Templates pair up by (target type, id); pairs that are equal produce nothing.
    pub fn diff(&self, templates: Vec<ConfigTemplate>) -> Vec<ConfigChange> {
        let mut next: Vec<Arc<ConfigTemplate>> = templates.into_iter().map(Arc::new).collect();
        next.sort_by(|a, b| a.cmp_key(b));

        let mut changes = Vec::new();
        let mut old = self.templates.iter().peekable();
        let mut new = next.into_iter().peekable();
        loop {
            let order = match (old.peek(), new.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp_key(b),
            };
            match order {
                Ordering::Less => {
                    if let Some(removed) = old.next() {
                        changes.push(ConfigChange::Removed(removed.clone()));
                    }
                }
                Ordering::Greater => {
                    if let Some(added) = new.next() {
                        changes.push(ConfigChange::Added(added));
                    }
                }
                Ordering::Equal => {
                    if let (Some(before), Some(after)) = (old.next(), new.next()) {
                        if **before != *after {
                            changes.push(ConfigChange::Updated {
                                old: before.clone(),
                                new: after,
                            });
                        }
                    }
                }
            }
        }
        changes
    }

    /// Applies one message to the set.
    pub fn apply(&mut self, change: &ConfigChange) {
        match change {
            ConfigChange::Added(template) => self.insert(template.clone()),
            ConfigChange::Removed(template) => self.remove(template),
            ConfigChange::Updated { old, new } => {
                self.remove(old);
                self.insert(new.clone());
            }
        }
    }

    fn insert(&mut self, template: Arc<ConfigTemplate>) {
        let at = self
            .templates
            .partition_point(|t| t.cmp_key(&template) != Ordering::Greater);
        self.templates.insert(at, template);
    }

    fn remove(&mut self, template: &ConfigTemplate) {
        if let Some(at) = self.templates.iter().position(|t| **t == *template) {
            self.templates.remove(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn apply_all(set: &mut ConfigSet, changes: &[ConfigChange]) {
        for change in changes {
            set.apply(change);
        }
    }

    #[test]
    fn diff_pairs_templates_by_target_and_id() {
        let mut set = ConfigSet::new();
        let first = vec![
            ConfigTemplate::new("Order").id("a").condition("true"),
            ConfigTemplate::new("Order").id("b"),
            ConfigTemplate::new("Cart"),
        ];
        let changes = set.diff(first.clone());
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|c| matches!(c, ConfigChange::Added(_))));
        apply_all(&mut set, &changes);
        let targets: Vec<_> = set.iter().map(|t| (t.target.as_str(), t.id.as_deref())).collect();
        assert_eq!(
            targets,
            vec![("Cart", None), ("Order", Some("a")), ("Order", Some("b"))]
        );

        let second = vec![
            ConfigTemplate::new("Cart"),
            ConfigTemplate::new("Order").id("a").condition("false"),
            ConfigTemplate::new("Order").id("c"),
        ];
        let changes = set.diff(second.clone());
        assert_eq!(
            changes,
            vec![
                ConfigChange::Updated {
                    old: Arc::new(first[0].clone()),
                    new: Arc::new(second[1].clone()),
                },
                ConfigChange::Removed(Arc::new(first[1].clone())),
                ConfigChange::Added(Arc::new(second[2].clone())),
            ]
        );
        apply_all(&mut set, &changes);
        assert!(set.diff(second).is_empty());
    }
}
