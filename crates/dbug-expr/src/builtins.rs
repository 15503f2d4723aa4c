//! Builtin classes every [`TypeRegistry`] starts with.
use crate::error::{EvalError, EvalResult};
use crate::model::{ClassBuilder, TypeRegistry};
use crate::types::{Primitive, Type};
use crate::value::Value;
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

static NULL_VALUE: Value = Value::Null;

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&NULL_VALUE)
}

fn text<'a>(value: &'a Value, member: &str) -> EvalResult<&'a str> {
    match value {
        Value::Str(s) => Ok(s),
        Value::Null => Err(EvalError::NullDereference {
            context: member.to_string(),
        }),
        other => Err(EvalError::mismatch("String", other.runtime_type())),
    }
}

fn int(value: &Value) -> EvalResult<i32> {
    value
        .as_i32()
        .ok_or_else(|| EvalError::mismatch("int", value.runtime_type()))
}

fn long(value: &Value) -> EvalResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| EvalError::mismatch("long", value.runtime_type()))
}

fn double(value: &Value) -> EvalResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| EvalError::mismatch("double", value.runtime_type()))
}

fn char_index(s: &str, index: i32) -> EvalResult<usize> {
    let length = s.chars().count();
    usize::try_from(index)
        .ok()
        .filter(|i| *i <= length)
        .ok_or(EvalError::IndexOutOfBounds {
            index: i64::from(index),
            length,
        })
}

fn substring(s: &str, begin: i32, end: Option<i32>) -> EvalResult<Value> {
    let begin = char_index(s, begin)?;
    let end = match end {
        Some(end) => char_index(s, end)?,
        None => s.chars().count(),
    };
    if begin > end {
        return Err(EvalError::IndexOutOfBounds {
            index: begin as i64,
            length: end,
        });
    }
    Ok(Value::string(
        s.chars().skip(begin).take(end - begin).collect::<String>(),
    ))
}

fn ordering(order: Ordering) -> Value {
    Value::Int(match order {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    })
}

fn object_class() -> ClassBuilder {
    ClassBuilder::new("Object")
        .constructor(vec![], |_| Ok(Value::object(PlainObject)))
        .method("equals", vec![Type::object()], Type::boolean(), |this, args| {
            Ok(Value::Bool(this == arg(args, 0)))
        })
        .method("hashCode", vec![], Type::int(), |this, _| {
            Ok(Value::Int(this.hash_code()))
        })
        .method("toString", vec![], Type::string(), |this, _| {
            Ok(Value::string(this.to_string()))
        })
}

/// The object produced by `new Object()`.
#[derive(Debug)]
struct PlainObject;

impl crate::value::HostObject for PlainObject {
    fn type_name(&self) -> &str {
        "Object"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn string_class() -> ClassBuilder {
    let comparable = Type::generic("Comparable", vec![Type::string()]);
    ClassBuilder::new("String")
        .final_class()
        .implements(Type::class("CharSequence"))
        .implements(comparable)
        .constructor(vec![], |_| Ok(Value::string("")))
        .constructor(vec![Type::string()], |args| match arg(args, 0) {
            Value::Null => Err(EvalError::NullDereference {
                context: "new String".to_string(),
            }),
            value => Ok(Value::string(text(value, "new String")?)),
        })
        .method("length", vec![], Type::int(), |this, _| {
            Ok(Value::Int(text(this, "String.length")?.chars().count() as i32))
        })
        .method("isEmpty", vec![], Type::boolean(), |this, _| {
            Ok(Value::Bool(text(this, "String.isEmpty")?.is_empty()))
        })
        .method("charAt", vec![Type::int()], Type::char(), |this, args| {
            let s = text(this, "String.charAt")?;
            let index = int(arg(args, 0))?;
            usize::try_from(index)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(Value::Char)
                .ok_or(EvalError::IndexOutOfBounds {
                    index: i64::from(index),
                    length: s.chars().count(),
                })
        })
        .method("substring", vec![Type::int()], Type::string(), |this, args| {
            substring(text(this, "String.substring")?, int(arg(args, 0))?, None)
        })
        .method(
            "substring",
            vec![Type::int(), Type::int()],
            Type::string(),
            |this, args| {
                let s = text(this, "String.substring")?;
                substring(s, int(arg(args, 0))?, Some(int(arg(args, 1))?))
            },
        )
        .method("indexOf", vec![Type::string()], Type::int(), |this, args| {
            let s = text(this, "String.indexOf")?;
            let needle = text(arg(args, 0), "String.indexOf")?;
            Ok(Value::Int(match s.find(needle) {
                Some(byte) => s[..byte].chars().count() as i32,
                None => -1,
            }))
        })
        .method(
            "contains",
            vec![Type::class("CharSequence")],
            Type::boolean(),
            |this, args| {
                let s = text(this, "String.contains")?;
                Ok(Value::Bool(s.contains(text(arg(args, 0), "String.contains")?)))
            },
        )
        .method("startsWith", vec![Type::string()], Type::boolean(), |this, args| {
            let s = text(this, "String.startsWith")?;
            Ok(Value::Bool(s.starts_with(text(arg(args, 0), "String.startsWith")?)))
        })
        .method("endsWith", vec![Type::string()], Type::boolean(), |this, args| {
            let s = text(this, "String.endsWith")?;
            Ok(Value::Bool(s.ends_with(text(arg(args, 0), "String.endsWith")?)))
        })
        .method(
            "equalsIgnoreCase",
            vec![Type::string()],
            Type::boolean(),
            |this, args| {
                let s = text(this, "String.equalsIgnoreCase")?;
                Ok(Value::Bool(match arg(args, 0) {
                    Value::Str(other) => s.to_lowercase() == other.to_lowercase(),
                    _ => false,
                }))
            },
        )
        .method("concat", vec![Type::string()], Type::string(), |this, args| {
            let s = text(this, "String.concat")?;
            let other = text(arg(args, 0), "String.concat")?;
            Ok(Value::string(format!("{s}{other}")))
        })
        .method("toUpperCase", vec![], Type::string(), |this, _| {
            Ok(Value::string(text(this, "String.toUpperCase")?.to_uppercase()))
        })
        .method("toLowerCase", vec![], Type::string(), |this, _| {
            Ok(Value::string(text(this, "String.toLowerCase")?.to_lowercase()))
        })
        .method("trim", vec![], Type::string(), |this, _| {
            Ok(Value::string(text(this, "String.trim")?.trim()))
        })
        .method("compareTo", vec![Type::string()], Type::int(), |this, args| {
            let s = text(this, "String.compareTo")?;
            Ok(ordering(s.cmp(text(arg(args, 0), "String.compareTo")?)))
        })
        .static_method("valueOf", vec![Type::object()], Type::string(), |args| {
            Ok(Value::string(arg(args, 0).to_string()))
        })
}

fn number_class() -> ClassBuilder {
    ClassBuilder::new("Number")
        .method("intValue", vec![], Type::int(), |this, _| {
            this.convert_primitive(Primitive::Int)
                .ok_or_else(|| EvalError::mismatch("Number", this.runtime_type()))
        })
        .method("longValue", vec![], Type::long(), |this, _| {
            this.convert_primitive(Primitive::Long)
                .ok_or_else(|| EvalError::mismatch("Number", this.runtime_type()))
        })
        .method("floatValue", vec![], Type::float(), |this, _| {
            this.convert_primitive(Primitive::Float)
                .ok_or_else(|| EvalError::mismatch("Number", this.runtime_type()))
        })
        .method("doubleValue", vec![], Type::double(), |this, _| {
            this.convert_primitive(Primitive::Double)
                .ok_or_else(|| EvalError::mismatch("Number", this.runtime_type()))
        })
}

fn boxed_class(primitive: Primitive) -> ClassBuilder {
    let name = primitive.boxed_name();
    let own = Type::Primitive(primitive);
    let mut builder = ClassBuilder::new(name)
        .final_class()
        .implements(Type::generic("Comparable", vec![Type::class(name)]))
        .constructor(vec![own.clone()], move |args| {
            arg(args, 0)
                .convert_primitive(primitive)
                .ok_or_else(|| EvalError::mismatch(primitive.name(), arg(args, 0).runtime_type()))
        })
        .static_method("valueOf", vec![own.clone()], Type::boxed(primitive), move |args| {
            arg(args, 0)
                .convert_primitive(primitive)
                .ok_or_else(|| EvalError::mismatch(primitive.name(), arg(args, 0).runtime_type()))
        })
        .method(
            "compareTo",
            vec![Type::boxed(primitive)],
            Type::int(),
            |this, args| {
                let other = arg(args, 0);
                let order = match (this, other) {
                    (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
                    (Value::Char(a), Value::Char(b)) => a.cmp(b),
                    (a, b) if a.as_i64().is_some() && b.as_i64().is_some() => {
                        long(a)?.cmp(&long(b)?)
                    }
                    (a, b) => double(a)?.total_cmp(&double(b)?),
                };
                Ok(ordering(order))
            },
        );
    builder = match primitive {
        Primitive::Boolean => builder
            .method("booleanValue", vec![], Type::boolean(), |this, _| {
                this.as_bool()
                    .map(Value::Bool)
                    .ok_or_else(|| EvalError::mismatch("boolean", this.runtime_type()))
            })
            .static_method("parseBoolean", vec![Type::string()], Type::boolean(), |args| {
                Ok(Value::Bool(matches!(
                    arg(args, 0),
                    Value::Str(s) if s.eq_ignore_ascii_case("true")
                )))
            })
            .static_field("TRUE", Type::boxed(primitive), Value::Bool(true))
            .static_field("FALSE", Type::boxed(primitive), Value::Bool(false)),
        Primitive::Char => builder
            .method("charValue", vec![], Type::char(), |this, _| match this {
                Value::Char(c) => Ok(Value::Char(*c)),
                other => Err(EvalError::mismatch("char", other.runtime_type())),
            })
            .static_method("isDigit", vec![Type::char()], Type::boolean(), |args| {
                Ok(Value::Bool(
                    matches!(arg(args, 0), Value::Char(c) if c.is_numeric()),
                ))
            })
            .static_method("isLetter", vec![Type::char()], Type::boolean(), |args| {
                Ok(Value::Bool(
                    matches!(arg(args, 0), Value::Char(c) if c.is_alphabetic()),
                ))
            }),
        Primitive::Int => builder
            .extends(Type::class("Number"))
            .static_field("MAX_VALUE", own.clone(), Value::Int(i32::MAX))
            .static_field("MIN_VALUE", own, Value::Int(i32::MIN))
            .static_method("parseInt", vec![Type::string()], Type::int(), |args| {
                let s = text(arg(args, 0), "Integer.parseInt")?;
                s.trim()
                    .parse::<i32>()
                    .map(Value::Int)
                    .map_err(|err| EvalError::invocation("Integer.parseInt", err.to_string()))
            }),
        Primitive::Long => builder
            .extends(Type::class("Number"))
            .static_field("MAX_VALUE", own.clone(), Value::Long(i64::MAX))
            .static_field("MIN_VALUE", own, Value::Long(i64::MIN))
            .static_method("parseLong", vec![Type::string()], Type::long(), |args| {
                let s = text(arg(args, 0), "Long.parseLong")?;
                s.trim()
                    .parse::<i64>()
                    .map(Value::Long)
                    .map_err(|err| EvalError::invocation("Long.parseLong", err.to_string()))
            }),
        Primitive::Double => builder
            .extends(Type::class("Number"))
            .static_field("MAX_VALUE", own.clone(), Value::Double(f64::MAX))
            .static_field("NaN", own, Value::Double(f64::NAN))
            .static_method("parseDouble", vec![Type::string()], Type::double(), |args| {
                let s = text(arg(args, 0), "Double.parseDouble")?;
                s.trim()
                    .parse::<f64>()
                    .map(Value::Double)
                    .map_err(|err| EvalError::invocation("Double.parseDouble", err.to_string()))
            })
            .static_method("isNaN", vec![Type::double()], Type::boolean(), |args| {
                Ok(Value::Bool(double(arg(args, 0))?.is_nan()))
            }),
        Primitive::Byte | Primitive::Short | Primitive::Float => {
            builder.extends(Type::class("Number"))
        }
    };
    builder
}

fn math_class() -> ClassBuilder {
    let mut math = ClassBuilder::new("Math")
        .final_class()
        .static_field("PI", Type::double(), Value::Double(std::f64::consts::PI))
        .static_field("E", Type::double(), Value::Double(std::f64::consts::E));
    for primitive in [
        Primitive::Int,
        Primitive::Long,
        Primitive::Float,
        Primitive::Double,
    ] {
        let ty = Type::Primitive(primitive);
        math = math
            .static_method("abs", vec![ty.clone()], ty.clone(), move |args| {
                Ok(match arg(args, 0) {
                    Value::Int(v) => Value::Int(v.wrapping_abs()),
                    Value::Long(v) => Value::Long(v.wrapping_abs()),
                    Value::Float(v) => Value::Float(v.abs()),
                    other => Value::Double(double(other)?.abs()),
                })
            })
            .static_method(
                "max",
                vec![ty.clone(), ty.clone()],
                ty.clone(),
                move |args| extremum(arg(args, 0), arg(args, 1), Ordering::Greater),
            )
            .static_method("min", vec![ty.clone(), ty.clone()], ty, move |args| {
                extremum(arg(args, 0), arg(args, 1), Ordering::Less)
            });
    }
    math.static_method("floor", vec![Type::double()], Type::double(), |args| {
        Ok(Value::Double(double(arg(args, 0))?.floor()))
    })
    .static_method("ceil", vec![Type::double()], Type::double(), |args| {
        Ok(Value::Double(double(arg(args, 0))?.ceil()))
    })
    .static_method("sqrt", vec![Type::double()], Type::double(), |args| {
        Ok(Value::Double(double(arg(args, 0))?.sqrt()))
    })
    .static_method("pow", vec![Type::double(), Type::double()], Type::double(), |args| {
        Ok(Value::Double(double(arg(args, 0))?.powf(double(arg(args, 1))?)))
    })
}

fn extremum(a: &Value, b: &Value, keep: Ordering) -> EvalResult<Value> {
    let order = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Long(x), Value::Long(y)) => x.cmp(y),
        (x, y) => {
            let (x, y) = (double(x)?, double(y)?);
            if x.is_nan() || y.is_nan() {
                return Ok(if x.is_nan() { a.clone() } else { b.clone() });
            }
            x.total_cmp(&y)
        }
    };
    Ok(if order == keep || order == Ordering::Equal {
        a.clone()
    } else {
        b.clone()
    })
}

fn system_class() -> ClassBuilder {
    ClassBuilder::new("System")
        .final_class()
        .static_method("currentTimeMillis", vec![], Type::long(), |_| {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis() as i64)
                .unwrap_or_default();
            Ok(Value::Long(millis))
        })
        .static_method("nanoTime", vec![], Type::long(), |_| {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_nanos() as i64)
                .unwrap_or_default();
            Ok(Value::Long(nanos))
        })
}

pub(crate) fn register_builtins(registry: &mut TypeRegistry) {
    registry
        .register(object_class().build())
        .register(
            ClassBuilder::interface("CharSequence")
                .method("length", vec![], Type::int(), |this, _| {
                    Ok(Value::Int(text(this, "CharSequence.length")?.chars().count() as i32))
                })
                .build(),
        )
        .register(
            ClassBuilder::interface("Comparable")
                .type_params(&["T"])
                .method("compareTo", vec![Type::var("T")], Type::int(), |this, args| {
                    match (this, arg(args, 0)) {
                        (Value::Str(a), Value::Str(b)) => Ok(ordering(a.cmp(b))),
                        (a, b) => Ok(ordering(double(a)?.total_cmp(&double(b)?))),
                    }
                })
                .build(),
        )
        .register(string_class().build())
        .register(number_class().build())
        .register(math_class().build())
        .register(system_class().build());
    for primitive in Primitive::ALL {
        registry.register(boxed_class(primitive).build());
    }
}
