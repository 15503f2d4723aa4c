//! Static types of expressions.
//!
//! The type model mirrors a conventional class-based language: eight primitive types, class types
//! (optionally parameterized), arrays and type variables. Boxed primitives are ordinary class types
//! (`Integer`, `Long`, ...) that the assignability rules in [`crate::assign`] know how to unbox.
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
}

impl Primitive {
    pub const ALL: [Primitive; 8] = [
        Primitive::Boolean,
        Primitive::Byte,
        Primitive::Short,
        Primitive::Char,
        Primitive::Int,
        Primitive::Long,
        Primitive::Float,
        Primitive::Double,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Boolean => "boolean",
            Primitive::Byte => "byte",
            Primitive::Short => "short",
            Primitive::Char => "char",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
        }
    }

    pub fn boxed_name(self) -> &'static str {
        match self {
            Primitive::Boolean => "Boolean",
            Primitive::Byte => "Byte",
            Primitive::Short => "Short",
            Primitive::Char => "Character",
            Primitive::Int => "Integer",
            Primitive::Long => "Long",
            Primitive::Float => "Float",
            Primitive::Double => "Double",
        }
    }

    pub fn from_name(name: &str) -> Option<Primitive> {
        Primitive::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn from_boxed_name(name: &str) -> Option<Primitive> {
        Primitive::ALL.into_iter().find(|p| p.boxed_name() == name)
    }

    pub fn is_numeric(self) -> bool {
        self != Primitive::Boolean
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Primitive::Byte | Primitive::Short | Primitive::Char | Primitive::Int | Primitive::Long
        )
    }

    /// Position in the widening order `byte < short < int < long < float < double`.
    ///
    /// `char` shares the rank of `short`; the two never widen into each other.
    pub fn numeric_rank(self) -> Option<u8> {
        match self {
            Primitive::Boolean => None,
            Primitive::Byte => Some(0),
            Primitive::Short | Primitive::Char => Some(1),
            Primitive::Int => Some(2),
            Primitive::Long => Some(3),
            Primitive::Float => Some(4),
            Primitive::Double => Some(5),
        }
    }

    /// Whether a value of this type converts to `target` without an explicit cast.
    pub fn widens_to(self, target: Primitive) -> bool {
        if self == target {
            return true;
        }
        match (self, target) {
            (Primitive::Byte | Primitive::Short, Primitive::Char)
            | (Primitive::Char, Primitive::Byte | Primitive::Short) => false,
            _ => match (self.numeric_rank(), target.numeric_rank()) {
                (Some(from), Some(to)) => from < to,
                _ => false,
            },
        }
    }

    /// Unary numeric promotion: `byte`, `short` and `char` become `int`.
    pub fn promoted(self) -> Primitive {
        match self {
            Primitive::Byte | Primitive::Short | Primitive::Char => Primitive::Int,
            other => other,
        }
    }

    /// Binary numeric promotion to the widest of `double > float > long > int`.
    pub fn binary_promotion(a: Primitive, b: Primitive) -> Primitive {
        let a = a.promoted();
        let b = b.promoted();
        for widest in [Primitive::Double, Primitive::Float, Primitive::Long] {
            if a == widest || b == widest {
                return widest;
            }
        }
        Primitive::Int
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// The type of the `null` literal; assignable to every reference type.
    Null,
    Primitive(Primitive),
    Class { name: Arc<str>, args: Vec<Type> },
    Array(Box<Type>),
    /// A type variable declared by a generic class or method.
    Var(Arc<str>),
}

pub(crate) static BOOLEAN_TYPE: Type = Type::Primitive(Primitive::Boolean);

impl Type {
    pub fn class(name: &str) -> Type {
        Type::Class {
            name: Arc::from(name),
            args: Vec::new(),
        }
    }

    pub fn generic(name: &str, args: Vec<Type>) -> Type {
        Type::Class {
            name: Arc::from(name),
            args,
        }
    }

    pub fn var(name: &str) -> Type {
        Type::Var(Arc::from(name))
    }

    pub fn array_of(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    pub fn object() -> Type {
        Type::class("Object")
    }

    pub fn string() -> Type {
        Type::class("String")
    }

    pub fn boolean() -> Type {
        Type::Primitive(Primitive::Boolean)
    }

    pub fn char() -> Type {
        Type::Primitive(Primitive::Char)
    }

    pub fn int() -> Type {
        Type::Primitive(Primitive::Int)
    }

    pub fn long() -> Type {
        Type::Primitive(Primitive::Long)
    }

    pub fn float() -> Type {
        Type::Primitive(Primitive::Float)
    }

    pub fn double() -> Type {
        Type::Primitive(Primitive::Double)
    }

    pub fn boxed(primitive: Primitive) -> Type {
        Type::class(primitive.boxed_name())
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            Type::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Primitive(_))
    }

    pub fn is_reference(&self) -> bool {
        !matches!(self, Type::Primitive(_) | Type::Void)
    }

    /// The primitive held by a value of this type, looking through boxed classes.
    pub fn unboxed(&self) -> Option<Primitive> {
        match self {
            Type::Primitive(p) => Some(*p),
            Type::Class { name, args } if args.is_empty() => Primitive::from_boxed_name(name),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.unboxed().is_some_and(Primitive::is_numeric)
    }

    pub fn is_boolean(&self) -> bool {
        self.unboxed() == Some(Primitive::Boolean)
    }

    pub fn is_string(&self) -> bool {
        self.class_name() == Some("String")
    }

    pub fn is_object(&self) -> bool {
        self.class_name() == Some("Object")
    }

    /// Boxes primitive types; every other type is returned unchanged.
    pub fn wrap(&self) -> Type {
        match self {
            Type::Primitive(p) => Type::boxed(*p),
            other => other.clone(),
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            Type::Class { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn type_args(&self) -> &[Type] {
        match self {
            Type::Class { args, .. } => args,
            _ => &[],
        }
    }

    pub fn is_parameterized(&self) -> bool {
        !self.type_args().is_empty()
    }

    pub fn component(&self) -> Option<&Type> {
        match self {
            Type::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Strips type arguments, keeping array structure.
    pub fn raw(&self) -> Type {
        match self {
            Type::Class { name, .. } => Type::Class {
                name: name.clone(),
                args: Vec::new(),
            },
            Type::Array(element) => Type::array_of(element.raw()),
            other => other.clone(),
        }
    }

    pub fn contains_vars(&self) -> bool {
        match self {
            Type::Var(_) => true,
            Type::Class { args, .. } => args.iter().any(Type::contains_vars),
            Type::Array(element) => element.contains_vars(),
            _ => false,
        }
    }

    /// Replaces type variables using `lookup`; unresolved variables are left in place.
    pub fn substitute(&self, lookup: &dyn Fn(&str) -> Option<Type>) -> Type {
        match self {
            Type::Var(name) => lookup(name).unwrap_or_else(|| self.clone()),
            Type::Class { name, args } if !args.is_empty() => Type::Class {
                name: name.clone(),
                args: args.iter().map(|arg| arg.substitute(lookup)).collect(),
            },
            Type::Array(element) => Type::array_of(element.substitute(lookup)),
            other => other.clone(),
        }
    }

    /// Replaces any remaining type variables with `Object`.
    pub fn erase_vars(&self) -> Type {
        self.substitute(&|_| Some(Type::object()))
    }
}

impl From<Primitive> for Type {
    fn from(value: Primitive) -> Self {
        Type::Primitive(value)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Null => f.write_str("null"),
            Type::Primitive(p) => write!(f, "{p}"),
            Type::Class { name, args } => {
                f.write_str(name)?;
                if !args.is_empty() {
                    f.write_str("<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    f.write_str(">")?;
                }
                Ok(())
            }
            Type::Array(element) => write!(f, "{element}[]"),
            Type::Var(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widening_follows_the_numeric_order() {
        assert!(Primitive::Int.widens_to(Primitive::Long));
        assert!(Primitive::Char.widens_to(Primitive::Int));
        assert!(Primitive::Long.widens_to(Primitive::Float));
        assert!(!Primitive::Long.widens_to(Primitive::Int));
        assert!(!Primitive::Short.widens_to(Primitive::Char));
        assert!(!Primitive::Boolean.widens_to(Primitive::Int));
    }

    #[test]
    fn binary_promotion_picks_widest() {
        assert_eq!(
            Primitive::binary_promotion(Primitive::Byte, Primitive::Char),
            Primitive::Int
        );
        assert_eq!(
            Primitive::binary_promotion(Primitive::Int, Primitive::Long),
            Primitive::Long
        );
        assert_eq!(
            Primitive::binary_promotion(Primitive::Long, Primitive::Float),
            Primitive::Float
        );
        assert_eq!(
            Primitive::binary_promotion(Primitive::Float, Primitive::Double),
            Primitive::Double
        );
    }

    #[test]
    fn display_renders_generics_and_arrays() {
        let ty = Type::array_of(Type::generic("List", vec![Type::string()]));
        assert_eq!(ty.to_string(), "List<String>[]");
    }
}
