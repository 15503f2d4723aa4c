//! Declarations of instrumentable types: their static fields, dynamic fields and event types.
use crate::error::{DbugError, DbugResult};
use dbug_expr::assign::is_instance;
use dbug_expr::{EvalResult, Type, Value, ValueModel, HOST_VALUE_NAME};
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Runtime event fired when an attached configuration starts or stops holding.
pub const ANCHOR_ACTIVE: &str = "ANCHOR_ACTIVE";
/// Runtime event fired when a dynamic field of an active anchor changes.
pub const VALUE_UPDATE: &str = "VALUE_UPDATE";

pub(crate) const ANCHOR_ACTIVE_ORDINAL: usize = 0;
pub(crate) const VALUE_UPDATE_ORDINAL: usize = 1;

/// Computes a field from the host value.
pub type Producer = Arc<dyn Fn(&Value) -> EvalResult<Value> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldLevel {
    Static,
    Dynamic,
}

#[derive(Clone)]
pub struct FieldDecl {
    name: Arc<str>,
    ty: Type,
    level: FieldLevel,
    producer: Option<Producer>,
}

impl FieldDecl {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn level(&self) -> FieldLevel {
        self.level
    }

    /// Whether the value is supplied by the caller building the anchor.
    pub fn is_external(&self) -> bool {
        self.producer.is_none()
    }

    pub(crate) fn produce(&self, host: &Value) -> Option<EvalResult<Value>> {
        self.producer.as_ref().map(|producer| producer(host))
    }
}

impl fmt::Debug for FieldDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDecl")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("level", &self.level)
            .field("external", &self.is_external())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventType {
    name: Arc<str>,
    ordinal: usize,
    fields: Vec<(Arc<str>, Type)>,
}

impl EventType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of this event type within its anchor type.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn fields(&self) -> &[(Arc<str>, Type)] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(field, _)| &**field == name)
    }

    /// Whether the runtime synthesizes this event rather than application code firing it.
    pub fn is_standard(&self) -> bool {
        self.ordinal <= VALUE_UPDATE_ORDINAL
    }
}

/// The schema of an instrumentable type.
///
/// Identity is the schema name, the host type and the source location the declaration was made
/// from, so one host type may be instrumented by several independent declarations.
pub struct AnchorTypeDef {
    schema: Arc<str>,
    host: Type,
    site: &'static Location<'static>,
    statics: Vec<FieldDecl>,
    dynamics: Vec<FieldDecl>,
    events: Vec<EventType>,
}

impl AnchorTypeDef {
    #[track_caller]
    pub fn builder(schema: &str, host: Type) -> AnchorTypeBuilder {
        AnchorTypeBuilder::new(schema, host, Location::caller())
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn host_type(&self) -> &Type {
        &self.host
    }

    /// The name configuration templates target this type by.
    pub fn type_name(&self) -> String {
        match self.host.class_name() {
            Some(name) => name.to_string(),
            None => self.host.to_string(),
        }
    }

    pub fn declaration_site(&self) -> &'static Location<'static> {
        self.site
    }

    pub fn static_fields(&self) -> &[FieldDecl] {
        &self.statics
    }

    pub fn dynamic_fields(&self) -> &[FieldDecl] {
        &self.dynamics
    }

    pub fn event_types(&self) -> &[EventType] {
        &self.events
    }

    pub fn static_index(&self, name: &str) -> Option<usize> {
        self.statics.iter().position(|f| f.name() == name)
    }

    pub fn dynamic_index(&self, name: &str) -> Option<usize> {
        self.dynamics.iter().position(|f| f.name() == name)
    }

    pub fn event_type(&self, name: &str) -> Option<&EventType> {
        self.events.iter().find(|e| e.name() == name)
    }

    /// Whether `name` is a field of any event type.
    pub fn is_event_field(&self, name: &str) -> bool {
        self.events.iter().any(|e| e.field_index(name).is_some())
    }

    pub(crate) fn same_identity(&self, other: &AnchorTypeDef) -> bool {
        self.schema == other.schema && self.host == other.host && self.site == other.site
    }
}

impl fmt::Display for AnchorTypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.host)
    }
}

impl fmt::Debug for AnchorTypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnchorTypeDef")
            .field("schema", &self.schema)
            .field("host", &self.host)
            .field("site", &self.site)
            .field("statics", &self.statics)
            .field("dynamics", &self.dynamics)
            .field("events", &self.events)
            .finish()
    }
}

/// Declares an [`AnchorTypeDef`]. The first invalid declaration is reported by [`build`].
///
/// [`build`]: AnchorTypeBuilder::build
pub struct AnchorTypeBuilder {
    def: AnchorTypeDef,
    error: Option<DbugError>,
}

impl AnchorTypeBuilder {
    fn new(schema: &str, host: Type, site: &'static Location<'static>) -> Self {
        let mut builder = Self {
            def: AnchorTypeDef {
                schema: Arc::from(schema),
                host,
                site,
                statics: Vec::new(),
                dynamics: Vec::new(),
                events: Vec::new(),
            },
            error: None,
        };
        builder = builder.event(
            ANCHOR_ACTIVE,
            &[
                ("active", Type::boolean()),
                ("field", Type::string()),
                ("inactiveFieldValue", Type::object()),
            ],
        );
        builder.event(
            VALUE_UPDATE,
            &[
                ("field", Type::string()),
                ("variables", Type::array_of(Type::string())),
            ],
        )
    }

    /// A static field computed once from the host value.
    pub fn static_field(
        self,
        name: &str,
        ty: Type,
        producer: impl Fn(&Value) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.field(name, ty, FieldLevel::Static, Some(Arc::new(producer)))
    }

    /// A static field supplied with [`AnchorBuilder::with`](crate::AnchorBuilder::with).
    pub fn external_static(self, name: &str, ty: Type) -> Self {
        self.field(name, ty, FieldLevel::Static, None)
    }

    /// A dynamic field initialized from the host value and recomputed by
    /// [`Anchor::refresh_dynamic`](crate::Anchor::refresh_dynamic).
    pub fn dynamic_field(
        self,
        name: &str,
        ty: Type,
        producer: impl Fn(&Value) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.field(name, ty, FieldLevel::Dynamic, Some(Arc::new(producer)))
    }

    /// A dynamic field only ever written by the application.
    pub fn external_dynamic(self, name: &str, ty: Type) -> Self {
        self.field(name, ty, FieldLevel::Dynamic, None)
    }

    fn field(mut self, name: &str, ty: Type, level: FieldLevel, producer: Option<Producer>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if name == HOST_VALUE_NAME {
            self.error = Some(DbugError::ReservedName {
                name: name.to_string(),
            });
            return self;
        }
        let taken = self.def.static_index(name).is_some()
            || self.def.dynamic_index(name).is_some()
            || self.def.is_event_field(name);
        if taken {
            self.error = Some(self.duplicate(name));
            return self;
        }
        let decl = FieldDecl {
            name: Arc::from(name),
            ty,
            level,
            producer,
        };
        match level {
            FieldLevel::Static => self.def.statics.push(decl),
            FieldLevel::Dynamic => self.def.dynamics.push(decl),
        }
        self
    }

    /// An event type with the given ordered fields.
    pub fn event(mut self, name: &str, fields: &[(&str, Type)]) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.def.event_type(name).is_some() {
            self.error = Some(DbugError::DuplicateEvent {
                anchor_type: self.def.to_string(),
                name: name.to_string(),
            });
            return self;
        }
        let mut declared: Vec<(Arc<str>, Type)> = Vec::with_capacity(fields.len());
        for (field, ty) in fields {
            if *field == HOST_VALUE_NAME {
                self.error = Some(DbugError::ReservedName {
                    name: field.to_string(),
                });
                return self;
            }
            let taken = declared.iter().any(|(d, _)| &**d == *field)
                || self.def.static_index(field).is_some()
                || self.def.dynamic_index(field).is_some();
            if taken {
                self.error = Some(self.duplicate(field));
                return self;
            }
            declared.push((Arc::from(*field), ty.clone()));
        }
        let ordinal = self.def.events.len();
        self.def.events.push(EventType {
            name: Arc::from(name),
            ordinal,
            fields: declared,
        });
        self
    }

    fn duplicate(&self, name: &str) -> DbugError {
        DbugError::DuplicateField {
            anchor_type: self.def.to_string(),
            name: name.to_string(),
        }
    }

    pub fn build(self) -> DbugResult<AnchorTypeDef> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.def),
        }
    }
}

/// Checks `value` can be stored in a field of type `ty`, widening primitives as assignment would.
pub(crate) fn check_value(
    model: &dyn ValueModel,
    anchor_type: &AnchorTypeDef,
    name: &str,
    ty: &Type,
    value: Value,
) -> DbugResult<Value> {
    match ty {
        Type::Primitive(target) => {
            if let Some(actual) = value.primitive() {
                if actual == *target {
                    return Ok(value);
                }
                if actual.widens_to(*target) {
                    if let Some(widened) = value.convert_primitive(*target) {
                        return Ok(widened);
                    }
                }
            }
        }
        Type::Var(_) => return Ok(value),
        _ if value.is_null() || is_instance(model, &value, ty) => return Ok(value),
        _ => {}
    }
    Err(DbugError::FieldType {
        anchor_type: anchor_type.to_string(),
        name: name.to_string(),
        expected: ty.clone(),
        actual: value.runtime_type(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> AnchorTypeBuilder {
        AnchorTypeDef::builder("shop", Type::class("Order"))
    }

    #[test]
    fn standard_events_come_first() {
        let def = order().event("shipped", &[("carrier", Type::string())]).build().unwrap();
        let names: Vec<&str> = def.event_types().iter().map(EventType::name).collect();
        assert_eq!(names, vec![ANCHOR_ACTIVE, VALUE_UPDATE, "shipped"]);
        assert!(def.event_types()[1].is_standard());
        assert!(!def.event_types()[2].is_standard());
    }

    #[test]
    fn field_names_are_unique_across_namespaces() {
        assert!(matches!(
            order().external_dynamic("status", Type::string()).external_static("status", Type::int()).build(),
            Err(DbugError::DuplicateField { .. })
        ));
        assert!(matches!(
            order().external_dynamic("active", Type::boolean()).build(),
            Err(DbugError::DuplicateField { .. })
        ));
        assert!(matches!(
            order()
                .external_static("carrier", Type::string())
                .event("shipped", &[("carrier", Type::string())])
                .build(),
            Err(DbugError::DuplicateField { .. })
        ));
        assert!(matches!(
            order().external_static("value", Type::int()).build(),
            Err(DbugError::ReservedName { .. })
        ));
    }

    #[test]
    fn event_fields_may_repeat_across_events() {
        let def = order()
            .event("a", &[("count", Type::int())])
            .event("b", &[("count", Type::int())])
            .build()
            .unwrap();
        assert_eq!(def.event_type("b").unwrap().field_index("count"), Some(0));
    }

    #[test]
    fn values_are_checked_against_field_types() {
        let model = dbug_expr::TypeRegistry::new();
        let def = order().build().unwrap();
        assert_eq!(
            check_value(&model, &def, "n", &Type::long(), Value::Int(3)).unwrap(),
            Value::Long(3)
        );
        assert!(check_value(&model, &def, "n", &Type::int(), Value::Long(3)).is_err());
        assert!(check_value(&model, &def, "s", &Type::string(), Value::Null).is_ok());
        assert!(check_value(&model, &def, "s", &Type::string(), Value::Int(1)).is_err());
        assert!(check_value(&model, &def, "o", &Type::object(), Value::Int(1)).is_ok());
    }
}
