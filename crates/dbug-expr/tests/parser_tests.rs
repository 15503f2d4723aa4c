use dbug_expr::ast::{BinaryOp, Literal, Node, UnaryOp};
use dbug_expr::parser::parse;
use dbug_expr::ParseError;
use pretty_assertions::assert_eq;

fn name(n: &str) -> Box<Node> {
    Box::new(Node::Name(n.to_string()))
}

fn int(v: i32) -> Box<Node> {
    Box::new(Node::Literal(Literal::Int(v)))
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    assert_eq!(
        parse("a + b * 2").unwrap(),
        Node::Binary {
            op: BinaryOp::Add,
            left: name("a"),
            right: Box::new(Node::Binary {
                op: BinaryOp::Mul,
                left: name("b"),
                right: int(2),
            }),
        }
    );
}

#[test]
fn binary_operators_are_left_associative() {
    assert_eq!(parse("a - b - c").unwrap().to_string(), "((a - b) - c)");
    assert_eq!(parse("a << 1 + 2").unwrap().to_string(), "(a << (1 + 2))");
}

#[test]
fn logical_operators_follow_c_precedence() {
    assert_eq!(
        parse("a || b && c | d ^ e & f == g").unwrap().to_string(),
        "(a || (b && (c | (d ^ (e & (f == g))))))"
    );
}

#[test]
fn ternary_is_right_associative() {
    assert_eq!(
        parse("a ? b : c ? d : e").unwrap().to_string(),
        "(a ? b : (c ? d : e))"
    );
}

#[test]
fn literals_cover_every_kind() {
    let cases = [
        ("42", Literal::Int(42)),
        ("0x1F", Literal::Int(31)),
        ("42L", Literal::Long(42)),
        ("1.5f", Literal::Float(1.5)),
        ("1.5", Literal::Double(1.5)),
        ("2e3", Literal::Double(2000.0)),
        (".5", Literal::Double(0.5)),
        ("'x'", Literal::Char('x')),
        ("'\\n'", Literal::Char('\n')),
        ("\"a\\tb\\u0041\"", Literal::Str("a\tbA".to_string())),
        ("true", Literal::Bool(true)),
        ("null", Literal::Null),
        ("-2147483648", Literal::Int(i32::MIN)),
        ("-9223372036854775808L", Literal::Long(i64::MIN)),
    ];
    for (text, expected) in cases {
        assert_eq!(parse(text).unwrap(), Node::Literal(expected), "{text}");
    }
}

#[test]
fn member_access_calls_and_indexing_chain() {
    let node = parse("order.items[0].price(1, \"x\")").unwrap();
    assert_eq!(node.to_string(), "order.items[0].price(1, \"x\")");
    assert_eq!(
        parse("java.lang.Math").unwrap().qualified_name().as_deref(),
        Some("java.lang.Math")
    );
}

#[test]
fn casts_are_told_apart_from_parentheses() {
    assert!(matches!(parse("(int) x").unwrap(), Node::Cast { .. }));
    assert!(matches!(parse("(int) -x").unwrap(), Node::Cast { .. }));
    assert!(matches!(parse("(String) null").unwrap(), Node::Cast { .. }));
    assert!(matches!(parse("(a) - b").unwrap(), Node::Binary { .. }));
    assert!(matches!(parse("(a)").unwrap(), Node::Name(_)));
    assert_eq!(parse("(a < b)").unwrap().to_string(), "(a < b)");
}

#[test]
fn unary_operators_nest() {
    assert_eq!(
        parse("!~-x").unwrap(),
        Node::Unary {
            op: UnaryOp::Not,
            expr: Box::new(Node::Unary {
                op: UnaryOp::BitNot,
                expr: Box::new(Node::Unary {
                    op: UnaryOp::Minus,
                    expr: name("x"),
                }),
            }),
        }
    );
}

#[test]
fn array_creation_forms() {
    assert_eq!(parse("new int[3][]").unwrap().to_string(), "new int[3][]");
    assert_eq!(
        parse("new String[]{\"a\", \"b\"}").unwrap().to_string(),
        "new String[]{\"a\", \"b\"}"
    );
    assert_eq!(
        parse("new int[][]{{1}, {2, 3}}").unwrap().to_string(),
        "new int[][]{{1}, {2, 3}}"
    );
}

#[test]
fn instanceof_binds_like_relational_operators() {
    assert_eq!(
        parse("x instanceof String && y").unwrap().to_string(),
        "((x instanceof String) && y)"
    );
}

#[test]
fn assignment_is_rejected() {
    assert_eq!(parse("a = 1"), Err(ParseError::Assignment { offset: 2 }));
    assert_eq!(parse("a += 1"), Err(ParseError::Assignment { offset: 2 }));
    assert_eq!(parse("a++"), Err(ParseError::Assignment { offset: 1 }));
}

#[test]
fn malformed_text_reports_offsets() {
    assert_eq!(
        parse("\"abc"),
        Err(ParseError::Unterminated {
            what: "string",
            offset: 0
        })
    );
    assert_eq!(
        parse("a # b"),
        Err(ParseError::UnexpectedChar { ch: '#', offset: 2 })
    );
    assert_eq!(
        parse("2147483648"),
        Err(ParseError::InvalidNumber {
            text: "2147483648".to_string(),
            offset: 0
        })
    );
    assert!(matches!(parse("a +"), Err(ParseError::Expected { .. })));
    assert!(matches!(parse("a b"), Err(ParseError::Expected { .. })));
}
