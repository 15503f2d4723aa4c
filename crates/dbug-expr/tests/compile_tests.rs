use dbug_expr::{
    compile, Bindings, ClassBuilder, EmptyScope, ExprKind, Names, RefKind, Type, TypeError,
    TypeRegistry, Value,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry
        .register(
            ClassBuilder::new("Calc")
                .static_method("f", vec![Type::int()], Type::string(), |_| {
                    Ok(Value::from("int"))
                })
                .static_method("f", vec![Type::long()], Type::string(), |_| {
                    Ok(Value::from("long"))
                })
                .static_method("h", vec![Type::class("Integer")], Type::string(), |_| {
                    Ok(Value::from("boxed"))
                })
                .static_method("h", vec![Type::int()], Type::string(), |_| {
                    Ok(Value::from("int"))
                })
                .static_method("g", vec![Type::double()], Type::string(), |_| {
                    Ok(Value::from("double"))
                })
                .static_method("g", vec![Type::object()], Type::string(), |_| {
                    Ok(Value::from("object"))
                })
                .static_varargs_method(
                    "sum",
                    vec![Type::array_of(Type::int())],
                    Type::int(),
                    |args| {
                        let items = args[0].as_array().map(|a| a.items().to_vec()).unwrap();
                        Ok(Value::Int(items.iter().filter_map(Value::as_i32).sum()))
                    },
                )
                .build(),
        )
        .register(
            ClassBuilder::new("Holder")
                .type_params(&["T"])
                .constructor(vec![Type::var("T")], |args| {
                    Ok(Value::array(Type::object(), vec![args[0].clone()]))
                })
                .build(),
        );
    registry
}

fn names() -> Names {
    let mut names = Names::new(Arc::new(registry()));
    names.bind("count", RefKind::Dynamic, Type::int());
    names.bind("label", RefKind::Static, Type::string());
    names.bind("ratio", RefKind::Dynamic, Type::double());
    names
}

fn eval(text: &str) -> Value {
    let expr = compile(text, None, &mut names()).unwrap();
    let bindings = Bindings {
        statics: vec![Value::from("tag")],
        dynamics: vec![Value::Int(7), Value::Double(0.5)],
        ..Bindings::default()
    };
    expr.evaluate(&bindings).unwrap()
}

fn type_of(text: &str) -> Type {
    compile(text, None, &mut names()).unwrap().ty().clone()
}

#[test]
fn exact_overload_beats_widening() {
    assert_eq!(eval("Calc.f(count)"), Value::from("int"));
    assert_eq!(eval("Calc.f(1L)"), Value::from("long"));
    assert_eq!(eval("Calc.f('a')"), Value::from("int"));
}

#[test]
fn exact_primitive_overload_beats_boxing() {
    assert_eq!(eval("Calc.h(count)"), Value::from("int"));
    assert_eq!(eval("Calc.h(7)"), Value::from("int"));
    assert_eq!(eval("Calc.h(null)"), Value::from("boxed"));
}

#[test]
fn overloads_pick_the_nearest_parameter_type() {
    assert_eq!(eval("Calc.g(1.5)"), Value::from("double"));
    assert_eq!(eval("Calc.g(\"s\")"), Value::from("object"));
}

#[test]
fn trailing_arguments_collapse_into_varargs() {
    assert_eq!(eval("Calc.sum(1, 2, count)"), Value::Int(10));
    assert_eq!(eval("Calc.sum()"), Value::Int(0));
    assert_eq!(eval("Calc.sum(new int[]{4, 5})"), Value::Int(9));
}

#[test]
fn arithmetic_follows_numeric_promotion() {
    assert_eq!(type_of("count + 1"), Type::int());
    assert_eq!(type_of("count + 1L"), Type::long());
    assert_eq!(type_of("count * ratio"), Type::double());
    assert_eq!(type_of("1.5f + 1"), Type::float());
    assert_eq!(type_of("'a' + 'b'"), Type::int());
    assert_eq!(eval("count / 2"), Value::Int(3));
    assert_eq!(eval("count % 4 + ratio"), Value::Double(3.5));
    assert_eq!(eval("-count >> 1"), Value::Int(-4));
    assert_eq!(eval("-count >>> 28"), Value::Int(15));
    assert_eq!(eval("~count"), Value::Int(-8));
}

#[test]
fn string_concatenation_renders_values() {
    assert_eq!(eval("label + \":\" + count + ratio"), Value::from("tag:70.5"));
    assert_eq!(eval("label + (count + 1)"), Value::from("tag8"));
    assert_eq!(eval("\"\" + null"), Value::from("null"));
}

#[test]
fn comparisons_and_equality() {
    assert_eq!(eval("count > 5 && ratio < 1"), Value::Bool(true));
    assert_eq!(eval("label == \"tag\""), Value::Bool(true));
    assert_eq!(eval("count == 7L"), Value::Bool(true));
    assert_eq!(eval("label.equals(\"tag\")"), Value::Bool(true));
    assert_eq!(eval("label != null"), Value::Bool(true));
}

#[test]
fn short_circuit_skips_failing_operand() {
    assert_eq!(eval("count < 0 && 1 / 0 == 0"), Value::Bool(false));
    assert_eq!(eval("count > 0 || 1 / 0 == 0"), Value::Bool(true));
}

#[test]
fn static_members_resolve_through_qualified_names() {
    assert_eq!(eval("Math.max(count, 10)"), Value::Int(10));
    assert_eq!(eval("java.lang.Math.abs(-count)"), Value::Int(7));
    assert_eq!(eval("Integer.MAX_VALUE"), Value::Int(i32::MAX));
    assert_eq!(type_of("Math.max(count, 10L)"), Type::long());
}

#[test]
fn instance_methods_on_builtin_types() {
    assert_eq!(eval("label.length() + label.substring(1).length()"), Value::Int(5));
    assert_eq!(eval("label.toUpperCase().charAt(0)"), Value::Char('T'));
    assert_eq!(eval("((Object) label).hashCode() == label.hashCode()"), Value::Bool(true));
}

#[test]
fn arrays_index_and_report_length() {
    assert_eq!(eval("new int[]{1, 2, 3}[count - 6]"), Value::Int(2));
    assert_eq!(eval("new String[count].length"), Value::Int(7));
    assert_eq!(eval("new int[2][3].length"), Value::Int(2));
    assert_eq!(eval("(new int[2][3])[1].length"), Value::Int(3));
    assert_eq!(type_of("new long[]{1, 2}"), Type::array_of(Type::long()));
}

#[test]
fn conditional_uses_the_common_type() {
    assert_eq!(type_of("count > 0 ? count : 1L"), Type::long());
    assert_eq!(eval("count > 0 ? count : 1L"), Value::Long(7));
    assert_eq!(type_of("count > 0 ? label : null"), Type::string());
}

#[test]
fn casts_convert_and_check() {
    assert_eq!(eval("(byte) 300"), Value::Byte(44));
    assert_eq!(eval("(int) ratio"), Value::Int(0));
    assert_eq!(eval("(long) count"), Value::Long(7));
    assert_eq!(eval("(String) (Object) label"), Value::from("tag"));
    let err = compile("(Integer) label", None, &mut names()).unwrap_err();
    assert_eq!(
        err,
        TypeError::ImpossibleConversion {
            expr: "label".to_string(),
            ty: Type::class("Integer"),
        }
    );
}

#[test]
fn instanceof_folds_provable_results() {
    let always = compile("label instanceof CharSequence", None, &mut names()).unwrap();
    assert!(matches!(always.kind(), ExprKind::NotNull(_)));

    let never = compile("null instanceof String", None, &mut names()).unwrap();
    assert_eq!(never.evaluate(&EmptyScope).unwrap(), Value::Bool(false));

    let runtime = compile("(Object) label instanceof String", None, &mut names()).unwrap();
    assert!(matches!(runtime.kind(), ExprKind::InstanceOf { .. }));
    assert_eq!(eval("(Object) label instanceof String"), Value::Bool(true));
    assert_eq!(eval("(Object) count instanceof Number"), Value::Bool(true));
}

#[test]
fn instanceof_rejects_parameterized_and_unrelated_types() {
    assert_eq!(
        compile("label instanceof Comparable<String>", None, &mut names()).unwrap_err(),
        TypeError::ParameterizedInstanceOf {
            ty: Type::generic("Comparable", vec![Type::string()]),
        }
    );
    assert!(matches!(
        compile("label instanceof Integer", None, &mut names()),
        Err(TypeError::ImpossibleConversion { .. })
    ));
    assert!(matches!(
        compile("count instanceof Integer", None, &mut names()),
        Err(TypeError::BadOperand { .. })
    ));
}

#[test]
fn generic_constructor_arguments_infer_from_receiver() {
    assert_eq!(
        type_of("new Holder<String>(label)"),
        Type::generic("Holder", vec![Type::string()])
    );
    assert!(matches!(
        compile("new Holder<String>(count)", None, &mut names()),
        Err(TypeError::NotApplicable { .. })
    ));
}

#[test]
fn expected_type_is_enforced() {
    assert_eq!(
        compile("count + 1", Some(&Type::boolean()), &mut names()).unwrap_err(),
        TypeError::Incompatible {
            expr: "(count + 1)".to_string(),
            expected: Type::boolean(),
            actual: Type::int(),
        }
    );
    let widened = compile("count", Some(&Type::long()), &mut names()).unwrap();
    assert_eq!(widened.ty(), &Type::long());
}

#[test]
fn resolution_errors_name_the_culprit() {
    assert_eq!(
        compile("missing + 1", None, &mut names()).unwrap_err(),
        TypeError::UnknownIdentifier {
            name: "missing".to_string()
        }
    );
    assert_eq!(
        compile("max(1, 2)", None, &mut names()).unwrap_err(),
        TypeError::FunctionCall {
            name: "max".to_string()
        }
    );
    assert!(matches!(
        compile("label.nope()", None, &mut names()),
        Err(TypeError::NoSuchMethod { .. })
    ));
    assert!(matches!(
        compile("Math.max(label, 1)", None, &mut names()),
        Err(TypeError::NotApplicable { .. })
    ));
    assert!(matches!(
        compile("label - 1", None, &mut names()),
        Err(TypeError::BadOperands { op: "-", .. })
    ));
    assert!(matches!(
        compile("Math", None, &mut names()),
        Err(TypeError::Expected { .. })
    ));
    assert!(matches!(
        compile("a = 1", None, &mut names()),
        Err(TypeError::Parse(_))
    ));
}

#[test]
fn host_value_resolves_when_bound() {
    let mut names = Names::new(Arc::new(registry())).with_host(Type::string());
    let expr = compile("value.length()", None, &mut names).unwrap();
    let bindings = Bindings {
        host: Some(Value::from("abcd")),
        ..Bindings::default()
    };
    assert_eq!(expr.evaluate(&bindings).unwrap(), Value::Int(4));
}
