use crate::types::Type;

pub type ParseResult<T> = Result<T, ParseError>;
pub type TypeResult<T> = Result<T, TypeError>;
pub type EvalResult<T> = Result<T, EvalError>;

/// Malformed expression text.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated {what} literal starting at offset {offset}")]
    Unterminated { what: &'static str, offset: usize },

    #[error("invalid number {text:?} at offset {offset}")]
    InvalidNumber { text: String, offset: usize },

    #[error("invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },

    #[error("expected {expected}, found {found} at offset {offset}")]
    Expected {
        expected: String,
        found: String,
        offset: usize,
    },

    #[error("assignment is not supported (offset {offset})")]
    Assignment { offset: usize },
}

/// A compile-time failure resolving an expression against its environment.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TypeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unrecognized identifier {name}")]
    UnknownIdentifier { name: String },

    #[error("unknown type {name}")]
    UnknownType { name: String },

    #[error("{expr} evaluates to type {actual}, which is not compatible with expected type {expected}")]
    Incompatible {
        expr: String,
        expected: Type,
        actual: Type,
    },

    #[error("no field {name} on type {ty}")]
    NoSuchField { ty: Type, name: String },

    #[error("field {ty}.{name} is static")]
    StaticField { ty: Type, name: String },

    #[error("field {ty}.{name} is not static")]
    InstanceField { ty: Type, name: String },

    #[error("no method {name} on type {ty}")]
    NoSuchMethod { ty: Type, name: String },

    #[error("no constructor on type {ty}")]
    NoSuchConstructor { ty: Type },

    #[error("{member} cannot be applied to ({args})")]
    NotApplicable { member: String, args: String },

    #[error("functions are not supported: {name}(...)")]
    FunctionCall { name: String },

    #[error("operator {op} cannot be applied to {left}, {right}")]
    BadOperands {
        op: &'static str,
        left: Type,
        right: Type,
    },

    #[error("operator {op} cannot be applied to {operand}")]
    BadOperand { op: &'static str, operand: Type },

    #[error("{expr} evaluates to type {actual}, which is not {expected}")]
    Expected {
        expr: String,
        expected: &'static str,
        actual: Type,
    },

    #[error("circular dependency detected: {}", path.join("->"))]
    Circular { path: Vec<String> },

    #[error("{expr} is never an instance of {ty}")]
    ImpossibleConversion { expr: String, ty: Type },

    #[error("instanceof checks cannot be performed against parameterized type {ty}")]
    ParameterizedInstanceOf { ty: Type },

    #[error("{message}")]
    Invalid { message: String },
}

impl TypeError {
    pub fn invalid(message: impl Into<String>) -> Self {
        TypeError::Invalid {
            message: message.into(),
        }
    }
}

/// A failure evaluating an expression against live values.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("null dereference in {context}")]
    NullDereference { context: String },

    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("negative array size {size}")]
    NegativeArraySize { size: i64 },

    #[error("{value} cannot be cast to {ty}")]
    ClassCast { value: String, ty: Type },

    #[error("division by zero")]
    DivisionByZero,

    #[error("{name} is not bound in this scope")]
    Unbound { name: String },

    #[error("type {ty} has no value")]
    TypeHasNoValue { ty: Type },

    #[error("expected a {expected} value, found {found}")]
    Mismatch { expected: String, found: String },

    #[error("invocation of {member} failed: {message}")]
    Invocation { member: String, message: String },

    #[error("{expr} did not reduce to a constant")]
    Residual { expr: String },
}

impl EvalError {
    pub fn invocation(member: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Invocation {
            member: member.into(),
            message: message.into(),
        }
    }

    pub fn mismatch(expected: impl Into<String>, found: impl ToString) -> Self {
        EvalError::Mismatch {
            expected: expected.into(),
            found: found.to_string(),
        }
    }
}
