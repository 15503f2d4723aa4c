use crate::error::{EvalError, EvalResult};
use crate::types::{Primitive, Type};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An application object exposed to expressions.
///
/// Identity is the address of the shared allocation, so two `Value::Object`s referring to the same
/// `Arc` are the same object.
pub trait HostObject: Any + Send + Sync + fmt::Debug {
    /// Name of the registered class describing this object's members.
    fn type_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    /// Value equality as seen by `equals(...)`. Defaults to identity.
    fn equals(&self, other: &dyn HostObject) -> bool {
        std::ptr::addr_eq(self as *const Self, other as *const dyn HostObject)
    }

    fn hash_code(&self) -> i32 {
        (self as *const Self as *const () as usize) as i32
    }

    fn display(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Clone, Debug)]
pub struct ArrayValue {
    element: Type,
    items: Arc<[Value]>,
}

impl ArrayValue {
    pub fn new(element: Type, items: Vec<Value>) -> Self {
        Self {
            element,
            items: items.into(),
        }
    }

    pub fn element_type(&self) -> &Type {
        &self.element
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: i64) -> EvalResult<Value> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.items.get(i))
            .cloned()
            .ok_or(EvalError::IndexOutOfBounds {
                index,
                length: self.items.len(),
            })
    }

    fn same(&self, other: &ArrayValue) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Array(ArrayValue),
    Object(Arc<dyn HostObject>),
}

impl Value {
    pub fn object<T: HostObject>(object: T) -> Value {
        Value::Object(Arc::new(object))
    }

    pub fn string(text: impl AsRef<str>) -> Value {
        Value::Str(Arc::from(text.as_ref()))
    }

    pub fn array(element: Type, items: Vec<Value>) -> Value {
        Value::Array(ArrayValue::new(element, items))
    }

    /// Default value of a freshly allocated array slot of type `ty`.
    pub fn default_for(ty: &Type) -> Value {
        match ty {
            Type::Primitive(Primitive::Boolean) => Value::Bool(false),
            Type::Primitive(Primitive::Byte) => Value::Byte(0),
            Type::Primitive(Primitive::Short) => Value::Short(0),
            Type::Primitive(Primitive::Char) => Value::Char('\0'),
            Type::Primitive(Primitive::Int) => Value::Int(0),
            Type::Primitive(Primitive::Long) => Value::Long(0),
            Type::Primitive(Primitive::Float) => Value::Float(0.0),
            Type::Primitive(Primitive::Double) => Value::Double(0.0),
            _ => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Downcasts an object value to its concrete host type.
    pub fn as_host<T: HostObject>(&self) -> Option<&T> {
        match self {
            Value::Object(object) => object.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Integral view of any integral or `char` value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(i64::from(*v)),
            Value::Short(v) => Some(i64::from(*v)),
            Value::Char(c) => Some(i64::from(u32::from(*c))),
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Long(_) => None,
            other => other.as_i64().map(|v| v as i32),
        }
    }

    /// Floating view of any numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Double(v) => Some(*v as f32),
            other => other.as_i64().map(|v| v as f32),
        }
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            Value::Bool(_) => Some(Primitive::Boolean),
            Value::Byte(_) => Some(Primitive::Byte),
            Value::Short(_) => Some(Primitive::Short),
            Value::Char(_) => Some(Primitive::Char),
            Value::Int(_) => Some(Primitive::Int),
            Value::Long(_) => Some(Primitive::Long),
            Value::Float(_) => Some(Primitive::Float),
            Value::Double(_) => Some(Primitive::Double),
            _ => None,
        }
    }

    /// The class of the value at runtime. Primitive values report their boxed class.
    pub fn runtime_type(&self) -> Type {
        match self {
            Value::Null => Type::Null,
            Value::Str(_) => Type::string(),
            Value::Array(array) => Type::array_of(array.element.clone()),
            Value::Object(object) => Type::class(object.type_name()),
            other => match other.primitive() {
                Some(p) => Type::boxed(p),
                None => Type::object(),
            },
        }
    }

    /// Converts a numeric or `char` value to `target` with the host language's cast semantics
    /// (truncation for narrowing, rounding toward zero for float-to-integer).
    pub fn convert_primitive(&self, target: Primitive) -> Option<Value> {
        if target == Primitive::Boolean {
            return self.as_bool().map(Value::Bool);
        }
        if self.primitive().map_or(true, |p| !p.is_numeric()) {
            return None;
        }
        let floating = matches!(self, Value::Float(_) | Value::Double(_));
        let converted = match target {
            Primitive::Boolean => return None,
            Primitive::Double => Value::Double(self.as_f64()?),
            Primitive::Float => Value::Float(self.as_f32()?),
            integral => {
                let wide = if floating {
                    self.as_f64()? as i64
                } else {
                    self.as_i64()?
                };
                match integral {
                    Primitive::Byte => Value::Byte(wide as i8),
                    Primitive::Short => Value::Short(wide as i16),
                    Primitive::Char => Value::Char(char::from_u32(wide as u16 as u32)?),
                    Primitive::Int => Value::Int(wide as i32),
                    _ => Value::Long(wide),
                }
            }
        };
        Some(converted)
    }

    /// Identity comparison as performed by `==` on references.
    ///
    /// Strings compare by content; arrays and objects by allocation.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.same(b),
            (Value::Object(a), Value::Object(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (a, b) => a == b,
        }
    }

    /// Address identifying reference values, used to key anchors by host value.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(Arc::as_ptr(s) as *const () as usize),
            Value::Array(array) => Some(Arc::as_ptr(&array.items) as *const () as usize),
            Value::Object(object) => Some(Arc::as_ptr(object) as *const () as usize),
            _ => None,
        }
    }

    pub fn hash_code(&self) -> i32 {
        match self {
            Value::Null => 0,
            Value::Bool(true) => 1231,
            Value::Bool(false) => 1237,
            Value::Str(s) => s
                .encode_utf16()
                .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c))),
            Value::Long(v) => (*v ^ (*v >> 32)) as i32,
            Value::Float(v) => v.to_bits() as i32,
            Value::Double(v) => {
                let bits = v.to_bits();
                (bits ^ (bits >> 32)) as i32
            }
            Value::Object(object) => object.hash_code(),
            Value::Array(_) => self.identity().map_or(0, |addr| addr as i32),
            other => other.as_i64().map_or(0, |v| v as i32),
        }
    }
}

/// Value equality as seen by `equals(...)`: same kind and same content. Floating point values
/// compare by bit pattern, so `NaN` equals itself.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.same(b),
            (Value::Object(a), Value::Object(b)) => a.equals(b.as_ref()),
            _ => false,
        }
    }
}

fn write_floating(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e7 {
        write!(f, "{v:.1}")
    } else if v.is_nan() {
        f.write_str("NaN")
    } else if v.is_infinite() {
        f.write_str(if v > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        write!(f, "{v}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Short(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write_floating(f, f64::from(*v)),
            Value::Double(v) => write_floating(f, *v),
            Value::Str(s) => f.write_str(s),
            Value::Array(array) => {
                f.write_str("[")?;
                for (i, item) in array.items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Object(object) => object.display(f),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i8> for Value {
    fn from(value: i8) -> Self {
        Value::Byte(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Value::Short(value)
    }
}

impl From<char> for Value {
    fn from(value: char) -> Self {
        Value::Char(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
