use crate::anchor::{Anchor, LiveAnchor, Placeholder};
use crate::anchor_type::{check_value, FieldDecl};
use crate::error::{DbugError, DbugResult};
use crate::event::AnchorInfo;
use crate::runtime::TypeEntry;
use dbug_expr::Value;
use std::sync::{Arc, OnceLock};

/// Collects externally supplied field values for the anchor of one host value.
#[must_use]
pub struct AnchorBuilder {
    entry: Arc<TypeEntry>,
    host: Value,
    statics: Vec<Option<Value>>,
    dynamics: Vec<Option<Value>>,
}

impl AnchorBuilder {
    pub(crate) fn new(entry: Arc<TypeEntry>, host: Value) -> Self {
        let statics = vec![None; entry.def.static_fields().len()];
        let dynamics = vec![None; entry.def.dynamic_fields().len()];
        Self {
            entry,
            host,
            statics,
            dynamics,
        }
    }

    /// Supplies an external static field or the initial value of a dynamic field.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> DbugResult<Self> {
        let def = &self.entry.def;
        let (decl, slot) = if let Some(index) = def.static_index(name) {
            let decl = &def.static_fields()[index];
            if !decl.is_external() {
                return Err(DbugError::NotExternal {
                    anchor_type: def.to_string(),
                    name: name.to_string(),
                });
            }
            (decl, &mut self.statics[index])
        } else if let Some(index) = def.dynamic_index(name) {
            (&def.dynamic_fields()[index], &mut self.dynamics[index])
        } else {
            return Err(DbugError::UnknownField {
                anchor_type: def.to_string(),
                name: name.to_string(),
            });
        };
        *slot = Some(check_value(&*self.entry.model, def, name, decl.ty(), value.into())?);
        Ok(self)
    }

    /// Returns the anchor of the host value, creating it if needed.
    ///
    /// Fails when an external static field was not supplied and the anchor does not exist yet.
    pub fn build(self) -> DbugResult<Anchor> {
        self.build_or(|builder, missing| {
            Err(DbugError::MissingParameters {
                anchor_type: builder.entry.def.to_string(),
                names: missing,
            })
        })
    }

    /// Like [`build`](Self::build), but returns a placeholder that resolves once the anchor is
    /// built elsewhere instead of failing on missing external fields.
    pub fn build_if_satisfied(self) -> DbugResult<Anchor> {
        self.build_or(|builder, _| {
            let key = builder.key()?;
            Ok(Anchor::placeholder(Placeholder {
                entry: builder.entry.clone(),
                host: builder.host.clone(),
                key,
                resolved: OnceLock::new(),
            }))
        })
    }

    fn key(&self) -> DbugResult<usize> {
        self.host.identity().ok_or_else(|| DbugError::NoIdentity {
            anchor_type: self.entry.def.to_string(),
        })
    }

    fn build_or(
        self,
        unsatisfied: impl FnOnce(&Self, Vec<String>) -> DbugResult<Anchor>,
    ) -> DbugResult<Anchor> {
        if !self.entry.has_configs() {
            return Ok(Anchor::inert(self.entry.clone()));
        }
        let key = self.key()?;
        if let Some(existing) = self.entry.lookup(key) {
            return Ok(Anchor::live(existing));
        }
        let missing: Vec<String> = self
            .entry
            .def
            .static_fields()
            .iter()
            .zip(&self.statics)
            .filter(|(decl, value)| decl.is_external() && value.is_none())
            .map(|(decl, _)| decl.name().to_string())
            .collect();
        if !missing.is_empty() {
            return unsatisfied(&self, missing);
        }
        self.create(key).map(Anchor::live)
    }

    fn create(self, key: usize) -> DbugResult<Arc<LiveAnchor>> {
        let def = &self.entry.def;
        let statics = resolve_fields(def.static_fields(), self.statics, &self.host, &self.entry)?;
        let dynamics = resolve_fields(def.dynamic_fields(), self.dynamics, &self.host, &self.entry)?;
        let info = AnchorInfo {
            def: def.clone(),
            host: self.host,
            statics,
        };
        let created = Arc::new(LiveAnchor::new(info, self.entry.model.clone(), dynamics));
        let anchor = self.entry.insert(key, created);
        self.entry.attach_installed(&anchor);
        Ok(anchor)
    }
}

/// Supplied values first, then producers, then the type's default.
fn resolve_fields(
    decls: &[FieldDecl],
    supplied: Vec<Option<Value>>,
    host: &Value,
    entry: &TypeEntry,
) -> DbugResult<Vec<Value>> {
    let def = &entry.def;
    decls
        .iter()
        .zip(supplied)
        .map(|(decl, value)| match value {
            Some(value) => Ok(value),
            None => match decl.produce(host) {
                Some(produced) => {
                    let value = produced.map_err(|source| DbugError::Producer {
                        anchor_type: def.to_string(),
                        name: decl.name().to_string(),
                        source,
                    })?;
                    check_value(&*entry.model, def, decl.name(), decl.ty(), value)
                }
                None => Ok(Value::default_for(decl.ty())),
            },
        })
        .collect()
}
