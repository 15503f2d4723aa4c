use crate::error::DbugResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// A named derived value computed for every anchor the template is attached to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableTemplate {
    pub name: String,
    pub expression: String,
    /// Cacheable variables are evaluated once and refreshed only when a field they read changes.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub cacheable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventVariableTemplate {
    pub name: String,
    pub expression: String,
}

/// Per-event part of a template: when the event is forwarded and what it carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConfigTemplate {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<EventVariableTemplate>,
    /// Reporters receiving this event before the template's own reporters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reporters: Vec<String>,
}

impl EventConfigTemplate {
    pub fn new(event: &str) -> Self {
        Self {
            event: event.to_string(),
            condition: None,
            variables: Vec::new(),
            reporters: Vec::new(),
        }
    }

    pub fn condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn variable(mut self, name: &str, expression: &str) -> Self {
        self.variables.push(EventVariableTemplate {
            name: name.to_string(),
            expression: expression.to_string(),
        });
        self
    }

    pub fn reporter(mut self, name: &str) -> Self {
        self.reporters.push(name.to_string());
        self
    }
}

/// An externally authored declaration of interest in anchors of one type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Restricts the template to anchor types declared under this schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Host type name of the anchor types the template applies to.
    #[serde(rename = "type")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<VariableTemplate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventConfigTemplate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reporters: Vec<String>,
}

impl ConfigTemplate {
    pub fn new(target: &str) -> Self {
        Self {
            id: None,
            schema: None,
            target: target.to_string(),
            condition: None,
            variables: Vec::new(),
            events: Vec::new(),
            reporters: Vec::new(),
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    pub fn condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn variable(self, name: &str, expression: &str) -> Self {
        self.push_variable(name, expression, true)
    }

    pub fn uncached_variable(self, name: &str, expression: &str) -> Self {
        self.push_variable(name, expression, false)
    }

    fn push_variable(mut self, name: &str, expression: &str, cacheable: bool) -> Self {
        self.variables.push(VariableTemplate {
            name: name.to_string(),
            expression: expression.to_string(),
            cacheable,
        });
        self
    }

    pub fn event(mut self, event: EventConfigTemplate) -> Self {
        self.events.push(event);
        self
    }

    pub fn reporter(mut self, name: &str) -> Self {
        self.reporters.push(name.to_string());
        self
    }

    /// Templates sort by target type, then id, with id-less templates last.
    pub fn cmp_key(&self, other: &ConfigTemplate) -> Ordering {
        self.target.cmp(&other.target).then_with(|| match (&self.id, &other.id) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
    }

    /// Whether any part of the template forwards to reporter `name`.
    pub fn names_reporter(&self, name: &str) -> bool {
        self.reporters.iter().any(|r| r == name)
            || self
                .events
                .iter()
                .any(|e| e.reporters.iter().any(|r| r == name))
    }

    pub(crate) fn label(&self) -> String {
        match &self.id {
            Some(id) => format!("{}#{id}", self.target),
            None => self.target.clone(),
        }
    }
}

/// A reporter instance declared by a configuration document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReporterDecl {
    pub name: String,
    /// Factory kind the reporter is created with, e.g. `print`.
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ReporterDecl {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// A whole configuration: reporter declarations and the templates using them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbugDocument {
    #[serde(default)]
    pub reporters: Vec<ReporterDecl>,
    #[serde(default)]
    pub configs: Vec<ConfigTemplate>,
}

impl DbugDocument {
    pub fn from_json(text: &str) -> DbugResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> DbugResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn documents_parse_with_defaults() {
        let doc = DbugDocument::from_json(
            r#"{
                "reporters": [{"name": "out", "kind": "print", "config": {"indent": "  "}}],
                "configs": [{
                    "id": "shipped",
                    "type": "Order",
                    "condition": "status == \"SHIPPED\"",
                    "variables": [
                        {"name": "total", "expression": "price * qty"},
                        {"name": "now", "expression": "System.currentTimeMillis()", "cacheable": false}
                    ],
                    "events": [{"event": "ANCHOR_ACTIVE"}],
                    "reporters": ["out"]
                }]
            }"#,
        )
        .unwrap();
        let expected = ConfigTemplate::new("Order")
            .id("shipped")
            .condition("status == \"SHIPPED\"")
            .variable("total", "price * qty")
            .uncached_variable("now", "System.currentTimeMillis()")
            .event(EventConfigTemplate::new("ANCHOR_ACTIVE"))
            .reporter("out");
        assert_eq!(doc.configs, vec![expected]);
        assert_eq!(doc.reporters[0].config["indent"], "  ");
        assert!(doc.configs[0].names_reporter("out"));
    }

    #[test]
    fn ordering_puts_missing_ids_last() {
        let a = ConfigTemplate::new("A").id("z");
        let b = ConfigTemplate::new("A");
        let c = ConfigTemplate::new("B").id("a");
        assert_eq!(a.cmp_key(&b), Ordering::Less);
        assert_eq!(b.cmp_key(&c), Ordering::Less);
        assert_eq!(b.cmp_key(&ConfigTemplate::new("A").condition("true")), Ordering::Equal);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(DbugDocument::from_json(r#"{"configs": [{"id": "x"}]}"#).is_err());
    }
}
