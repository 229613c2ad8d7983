// Tests for the seam grammar

use super::*;
use crate::ast::*;
use pretty_assertions::assert_eq;

fn parse(source: &str) -> CompilationUnit {
    parse_unit(source).unwrap()
}

fn method_body(unit: &CompilationUnit, class: &str, method: &str) -> Vec<Stmt> {
    unit.class(class)
        .unwrap()
        .methods()
        .find(|m| m.name == method)
        .unwrap()
        .body
        .clone()
}

#[test]
fn test_parse_empty_class() {
    let unit = parse("class Widget {}");
    assert_eq!(unit.classes.len(), 1);
    let class = &unit.classes[0];
    assert_eq!(class.name, "Widget");
    assert!(class.members.is_empty());
    assert_eq!(class.span, Span::new(1, 1));
}

#[test]
fn test_parse_annotations_and_superclass() {
    let unit = parse("@Instrument\npublic class Cart extends Base {}");
    let class = unit.class("Cart").unwrap();
    assert!(class.has_annotation("Instrument"));
    assert_eq!(class.superclass.as_deref(), Some("Base"));
    assert_eq!(class.modifiers.visibility, Visibility::Public);
    assert_eq!(class.span, Span::new(2, 1));
}

#[test]
fn test_parse_fields() {
    let unit = parse(
        r#"
        class Counter {
            private static int count = 0;
            String label;
            List<String> items = [];
        }
        "#,
    );
    let fields: Vec<_> = unit.class("Counter").unwrap().fields().cloned().collect();
    assert_eq!(fields.len(), 3);
    assert_eq!(fields[0].name, "count");
    assert_eq!(fields[0].ty, TypeRef::Int);
    assert!(fields[0].modifiers.is_static);
    assert_eq!(fields[0].modifiers.visibility, Visibility::Private);
    assert_eq!(fields[0].init, Some(Expr::int(0)));
    assert_eq!(fields[1].ty, TypeRef::Str);
    assert_eq!(fields[1].init, None);
    assert_eq!(fields[2].ty, TypeRef::List);
}

#[test]
fn test_parse_methods_and_constructor() {
    let unit = parse(
        r#"
        class Widget {
            private int size;
            Widget(int size) { this.size = size; }
            private int price(int qty, double rate) { return qty; }
            static void reset() {}
        }
        "#,
    );
    let class = unit.class("Widget").unwrap();
    let ctor = class.constructors().next().unwrap();
    assert_eq!(ctor.descriptor(), "<init>(int)");

    let methods: Vec<_> = class.methods().collect();
    assert_eq!(methods[0].descriptor(), "price(int,double)");
    assert_eq!(methods[0].return_type, TypeRef::Int);
    assert_eq!(methods[0].modifiers.visibility, Visibility::Private);
    assert!(methods[1].modifiers.is_static);
    assert!(methods[1].return_type.is_void());
}

#[test]
fn test_parse_array_types() {
    let unit = parse("class A { int sum(int[] values, String[][] grid) { return 0; } }");
    let method = unit.class("A").unwrap().methods().next().unwrap();
    assert_eq!(method.params[0].ty, TypeRef::array_of(TypeRef::Int));
    assert_eq!(
        method.params[1].ty,
        TypeRef::array_of(TypeRef::array_of(TypeRef::Str))
    );
    assert_eq!(method.descriptor(), "sum(int[],String[][])");
}

#[test]
fn test_parse_nested_class() {
    let unit = parse(
        r#"
        class Outer {
            static class Inner {
                int value() { return 1; }
            }
            int run() { return 2; }
        }
        "#,
    );
    let outer = unit.class("Outer").unwrap();
    let inner = outer.nested_classes().next().unwrap();
    assert_eq!(inner.name, "Inner");
    assert!(inner.modifiers.is_static);
    assert_eq!(inner.methods().count(), 1);
    assert_eq!(outer.methods().count(), 1);
}

#[test]
fn test_operator_precedence() {
    let unit = parse("class A { int f() { return 1 + 2 * 3 - 4; } }");
    let body = method_body(&unit, "A", "f");
    let Stmt::Return {
        value: Some(expr), ..
    } = &body[0]
    else {
        panic!("expected return, got {:?}", body[0]);
    };
    // (1 + (2 * 3)) - 4
    let Expr::Binary { op, left, right } = expr else {
        panic!("expected binary");
    };
    assert_eq!(*op, BinaryOp::Sub);
    assert_eq!(**right, Expr::int(4));
    let Expr::Binary { op, right, .. } = left.as_ref() else {
        panic!("expected binary");
    };
    assert_eq!(*op, BinaryOp::Add);
    assert!(matches!(
        right.as_ref(),
        Expr::Binary {
            op: BinaryOp::Mul,
            ..
        }
    ));
}

#[test]
fn test_comparison_and_logic() {
    let unit = parse("class A { boolean f(int a) { return a <= 3 && !(a == 1) || a != 2; } }");
    let body = method_body(&unit, "A", "f");
    let Stmt::Return {
        value: Some(Expr::Binary { op, left, .. }),
        ..
    } = &body[0]
    else {
        panic!("expected return of binary");
    };
    assert_eq!(*op, BinaryOp::Or);
    assert!(matches!(
        left.as_ref(),
        Expr::Binary {
            op: BinaryOp::And,
            ..
        }
    ));
}

#[test]
fn test_calls_and_postfix() {
    let unit = parse(
        r#"
        class A {
            void f() {
                helper(1, "two");
                this.other().name;
                items[0];
                Math.max(1, 2);
            }
        }
        "#,
    );
    let body = method_body(&unit, "A", "f");
    match &body[0] {
        Stmt::Expr(Expr::Call {
            receiver: None,
            method,
            args,
            ..
        }) => {
            assert_eq!(method, "helper");
            assert_eq!(args, &vec![Expr::int(1), Expr::string("two")]);
        }
        other => panic!("expected call, got {:?}", other),
    }
    match &body[1] {
        Stmt::Expr(Expr::Field { target, name, .. }) => {
            assert_eq!(name, "name");
            assert!(matches!(
                target.as_ref(),
                Expr::Call {
                    receiver: Some(_),
                    ..
                }
            ));
        }
        other => panic!("expected field access, got {:?}", other),
    }
    assert!(matches!(&body[2], Stmt::Expr(Expr::Index { .. })));
    match &body[3] {
        Stmt::Expr(Expr::Call {
            receiver: Some(receiver),
            method,
            ..
        }) => {
            assert_eq!(method, "max");
            assert!(matches!(receiver.as_ref(), Expr::Name { name, .. } if name == "Math"));
        }
        other => panic!("expected static call, got {:?}", other),
    }
}

#[test]
fn test_call_span_points_at_method_name() {
    let unit = parse("class A {\n  void f() {\n    this.g();\n  }\n  void g() {}\n}");
    let body = method_body(&unit, "A", "f");
    match &body[0] {
        Stmt::Expr(Expr::Call { span, .. }) => assert_eq!(*span, Span::new(3, 10)),
        other => panic!("expected call, got {:?}", other),
    }
}

#[test]
fn test_new_expressions() {
    let unit = parse(
        r#"
        class A {
            void f() {
                Widget w = new Widget(3);
                int[] xs = new int[] {1, 2};
                List<String> names = ["a", "b"];
            }
        }
        "#,
    );
    let body = method_body(&unit, "A", "f");
    match &body[0] {
        Stmt::Local {
            ty,
            init: Some(Expr::New { class, args, .. }),
            ..
        } => {
            assert_eq!(*ty, TypeRef::class("Widget"));
            assert_eq!(class, "Widget");
            assert_eq!(args.len(), 1);
        }
        other => panic!("expected construction, got {:?}", other),
    }
    match &body[1] {
        Stmt::Local {
            init: Some(Expr::NewArray { elem, elements }),
            ..
        } => {
            assert_eq!(*elem, TypeRef::Int);
            assert_eq!(elements.len(), 2);
        }
        other => panic!("expected array, got {:?}", other),
    }
    assert!(matches!(
        &body[2],
        Stmt::Local {
            init: Some(Expr::ListLiteral { .. }),
            ..
        }
    ));
}

#[test]
fn test_assignment_targets() {
    let unit = parse(
        r#"
        class A {
            void f() {
                x = 1;
                this.count = count + 1;
                A.total = 2;
            }
        }
        "#,
    );
    let body = method_body(&unit, "A", "f");
    assert!(matches!(
        &body[0],
        Stmt::Expr(Expr::Assign {
            target: LValue::Name { .. },
            ..
        })
    ));
    assert!(matches!(
        &body[1],
        Stmt::Expr(Expr::Assign {
            target: LValue::Field { .. },
            ..
        })
    ));
    assert!(matches!(
        &body[2],
        Stmt::Expr(Expr::Assign {
            target: LValue::Field { .. },
            ..
        })
    ));
}

#[test]
fn test_control_flow() {
    let unit = parse(
        r#"
        class A {
            int f(int n) {
                int total = 0;
                while (n > 0) {
                    total = total + n;
                    n = n - 1;
                }
                if (total > 10) return 10; else { return total; }
            }
        }
        "#,
    );
    let body = method_body(&unit, "A", "f");
    assert_eq!(body.len(), 3);
    assert!(matches!(&body[1], Stmt::While { .. }));
    match &body[2] {
        Stmt::If {
            then_branch,
            else_branch: Some(else_branch),
            ..
        } => {
            assert!(matches!(then_branch.as_ref(), Stmt::Return { .. }));
            assert!(matches!(else_branch.as_ref(), Stmt::Block(_)));
        }
        other => panic!("expected if/else, got {:?}", other),
    }
}

#[test]
fn test_try_catch_and_throw() {
    let unit = parse(
        r#"
        class A {
            int f() {
                try {
                    throw new IllegalStateException("boom");
                } catch (RuntimeException e) {
                    return 1;
                }
            }
        }
        "#,
    );
    let body = method_body(&unit, "A", "f");
    match &body[0] {
        Stmt::Try {
            body,
            catch_type,
            catch_var,
            handler,
        } => {
            assert!(matches!(&body[0], Stmt::Throw { .. }));
            assert_eq!(catch_type, "RuntimeException");
            assert_eq!(catch_var, "e");
            assert_eq!(handler.len(), 1);
        }
        other => panic!("expected try, got {:?}", other),
    }
}

#[test]
fn test_literals() {
    let unit = parse(
        r#"class A { void f() { g(-3, 2.5, true, null, "a\"b\n"); } }"#,
    );
    let body = method_body(&unit, "A", "f");
    let Stmt::Expr(Expr::Call { args, .. }) = &body[0] else {
        panic!("expected call");
    };
    assert_eq!(args[0], Expr::int(-3));
    assert_eq!(args[1], Expr::Literal(Literal::Double(2.5)));
    assert_eq!(args[2], Expr::Literal(Literal::Bool(true)));
    assert_eq!(args[3], Expr::Literal(Literal::Null));
    assert_eq!(args[4], Expr::string("a\"b\n"));
}

#[test]
fn test_comments_are_skipped() {
    let unit = parse(
        r#"
        // leading comment
        class A {
            /* block
               comment */
            int f() { return 1; } // trailing
        }
        "#,
    );
    assert_eq!(unit.class("A").unwrap().methods().count(), 1);
}

#[test]
fn test_malformed_member_is_recovered() {
    let unit = parse(
        r#"
        class A {
            int ok() { return 1; }
            int broken( { return; }
            int alsoOk() { return 2; }
            garbage garbage garbage;
        }
        "#,
    );
    let class = unit.class("A").unwrap();
    let names: Vec<_> = class.methods().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["ok", "alsoOk"]);

    let malformed: Vec<_> = class
        .members
        .iter()
        .filter_map(|m| match m {
            Member::Malformed { span, text, .. } => Some((*span, text.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(malformed.len(), 2);
    assert_eq!(malformed[0].0.line, 4);
    assert!(malformed[0].1.starts_with("int broken("));
    assert!(malformed[1].1.starts_with("garbage"));
}

#[test]
fn test_unterminated_class_is_an_error() {
    let err = parse_unit("class A {\n int f() { return 1; }\n").unwrap_err();
    assert_eq!(err.line, 3);
    assert!(err.message.contains("end of input"));
}

#[test]
fn test_garbage_at_top_level_is_an_error() {
    let err = parse_unit("class A {}\n42").unwrap_err();
    assert_eq!((err.line, err.column), (2, 1));
}

#[test]
fn test_create_parser() {
    let mut parser = create_parser("seam").unwrap();
    assert_eq!(parser.name(), "seam");
    assert!(parser.parse_unit("class A {}").is_ok());
    assert!(create_parser("lisp").is_err());
}

#[test]
fn test_deep_nesting_is_a_parse_error() {
    let source = format!(
        "class A {{\n int f() {{ return {}1{}; }}\n}}",
        "(".repeat(5000),
        ")".repeat(5000)
    );
    let err = parse_unit(&source).unwrap_err();
    assert_eq!(err.line, 2);
    assert!(err.message.contains("nesting too deep"));
}

#[test]
fn test_nesting_limit_is_configurable() {
    let source = "class A { int f() { return ((((((1)))))); } }";
    assert!(SeamParser::new().parse_unit(source).is_ok());
    let err = SeamParser::new()
        .with_max_depth(4)
        .parse_unit(source)
        .unwrap_err();
    assert!(err.message.contains("nesting too deep"));
}

#[test]
fn test_parse_let_and_guard() {
    let unit = parse(
        r#"
        class A {
            private int f(int x) { return x; }
            int g(int y) {
                return let $seam0: int = y in seam::guard<int>("A#g(int)/call:A.f(int)#0", this, [$seam0]) ?? f($seam0);
            }
        }
        "#,
    );
    let body = method_body(&unit, "A", "g");
    let Stmt::Return {
        value: Some(Expr::Let { name, ty, init, body }),
        ..
    } = &body[0]
    else {
        panic!("expected a let, got {:?}", body[0]);
    };
    assert_eq!(name, "$seam0");
    assert_eq!(ty, &Some(TypeRef::Int));
    assert!(matches!(init.as_ref(), Expr::Name { name, .. } if name == "y"));
    let Expr::Guarded(guard) = body.as_ref() else {
        panic!("expected a guard, got {body:?}");
    };
    assert_eq!(guard.site.as_str(), "A#g(int)/call:A.f(int)#0");
    assert_eq!(guard.scope, GuardScope::Instance);
    assert_eq!(guard.result, TypeRef::Int);
    assert_eq!(guard.args.len(), 1);
    assert!(matches!(guard.fallback.as_ref(), Expr::Call { method, .. } if method == "f"));
}

#[test]
fn test_temporaries_cannot_be_declared() {
    let unit = parse("class A { int f() { int $x = 1; return $x; } }");
    let class = unit.class("A").unwrap();
    assert_eq!(class.methods().count(), 0);
    assert!(matches!(class.members[0], Member::Malformed { .. }));
}
