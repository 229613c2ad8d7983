use super::*;
use crate::ast::{GuardScope, TypeRef};
use crate::parser::parse_unit;
use pretty_assertions::assert_eq;

fn instrument_with(source: &str, class: &str, opted_in: &[&str]) -> RewriteResult {
    let unit = parse_unit(source).unwrap();
    let index = UnitIndex::new(&unit).with_opted_in(opted_in.iter().copied());
    Injector::new(&index)
        .instrument_class(unit.class(class).unwrap())
        .unwrap()
}

fn instrument(source: &str, class: &str) -> RewriteResult {
    instrument_with(source, class, &[])
}

fn ids(result: &RewriteResult) -> Vec<String> {
    result
        .manifest
        .iter()
        .map(|site| site.id.to_string())
        .collect()
}

fn return_expr(class: &ClassDecl, method: &str) -> Expr {
    let method = class.methods().find(|m| m.name == method).unwrap();
    match method.body.last() {
        Some(Stmt::Return {
            value: Some(expr), ..
        }) => expr.clone(),
        other => panic!("expected a return, got {:?}", other),
    }
}

const SHOP: &str = r#"
class Shop {
    private int price(int qty) { return qty * 2; }
    int total(int n) { return price(n) + 1; }
}
"#;

#[test]
fn test_private_call_becomes_site() {
    let result = instrument(SHOP, "Shop");
    assert_eq!(ids(&result), vec!["Shop#total(int)/call:Shop.price(int)#0"]);

    let site = &result.manifest.sites[0];
    assert_eq!(site.kind, SiteKind::Call);
    assert_eq!(site.enclosing_method, "total(int)");
    assert_eq!(site.target, "Shop.price(int)");
    assert_eq!(site.result, TypeRef::Int);
    assert_eq!(site.scope, GuardScope::Instance);
    assert_eq!(result.manifest.origin, ManifestOrigin::BuildTime);
    assert!(result.class.contains_guards());
}

#[test]
fn test_rewritten_call_binds_argument_once() {
    let result = instrument(SHOP, "Shop");
    let Expr::Binary { left, .. } = return_expr(&result.class, "total") else {
        panic!("expected binary");
    };
    let Expr::Let {
        name,
        ty,
        init,
        body,
    } = *left
    else {
        panic!("expected let");
    };
    assert_eq!(name, "$seam0");
    assert_eq!(ty, Some(TypeRef::Int));
    assert!(matches!(init.as_ref(), Expr::Name { name, .. } if name == "n"));
    let Expr::Guarded(guard) = *body else {
        panic!("expected guard");
    };
    assert_eq!(guard.args, vec![Expr::name("$seam0")]);
    match guard.fallback.as_ref() {
        Expr::Call {
            receiver: None,
            method,
            args,
            ..
        } => {
            assert_eq!(method, "price");
            assert_eq!(args, &vec![Expr::name("$seam0")]);
        }
        other => panic!("unexpected fallback {:?}", other),
    }
}

#[test]
fn test_inner_sites_are_processed_first() {
    let result = instrument(
        r#"
        class C {
            private int next() { return 1; }
            private int helper(int a, int b) { return a + b; }
            int run() { return helper(next(), 3); }
        }
        "#,
        "C",
    );
    assert_eq!(
        ids(&result),
        vec![
            "C#run()/call:C.next()#0",
            "C#run()/call:C.helper(int,int)#0",
        ]
    );

    // helper's first argument is the guarded inner call, bound to a temporary;
    // the literal is passed straight through
    let Expr::Let { init, body, .. } = return_expr(&result.class, "run") else {
        panic!("expected let");
    };
    assert!(matches!(init.as_ref(), Expr::Guarded(_)));
    let Expr::Guarded(outer) = body.as_ref() else {
        panic!("expected guard");
    };
    assert_eq!(outer.args, vec![Expr::name("$seam0"), Expr::int(3)]);
}

#[test]
fn test_ordinals_count_repeated_targets() {
    let result = instrument(
        r#"
        class C {
            private int f(int x) { return x; }
            int run() { return f(1) + f(2) + f(3); }
            int other() { return f(4); }
        }
        "#,
        "C",
    );
    assert_eq!(
        ids(&result),
        vec![
            "C#run()/call:C.f(int)#0",
            "C#run()/call:C.f(int)#1",
            "C#run()/call:C.f(int)#2",
            "C#other()/call:C.f(int)#0",
        ]
    );
}

#[test]
fn test_identifiers_survive_unrelated_edits() {
    let before = instrument(SHOP, "Shop");
    let after = instrument(
        r#"
        class Shop {
            int unrelated() { return 42; }

            private int price(int qty) {
                return qty * 2;
            }

            int total(int n) {
                return price(n)
                    + 1;
            }
        }
        "#,
        "Shop",
    );
    assert_eq!(ids(&before), ids(&after));
    assert_ne!(before.manifest.sites[0].span, after.manifest.sites[0].span);
}

#[test]
fn test_identifiers_unique_within_class() {
    let result = instrument(
        r#"
        class C {
            private static int counter = 0;
            private int f() { return counter; }
            int g() { return f() + f() + counter + new C().f(); }
        }
        "#,
        "C",
    );
    let all = ids(&result);
    let unique: std::collections::HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), unique.len());
    assert_eq!(count_guards(&result.class), result.manifest.len());
}

#[test]
fn test_static_calls_are_sites() {
    let result = instrument(
        r#"
        class Calc {
            static int twice(int x) { return x * 2; }
            static int run(int a) { return Math.max(twice(a), Calc.twice(1)); }
        }
        "#,
        "Calc",
    );
    assert_eq!(
        ids(&result),
        vec![
            "Calc#run(int)/call:Calc.twice(int)#0",
            "Calc#run(int)/call:Calc.twice(int)#1",
            "Calc#run(int)/call:Math.max(int,int)#0",
        ]
    );
    assert!(result
        .manifest
        .iter()
        .all(|site| site.scope == GuardScope::Static));
}

#[test]
fn test_unresolvable_calls_are_skipped() {
    let result = instrument(
        r#"
        class Base { int inherited() { return 1; } }
        class Child extends Base {
            int run(Base other) {
                return inherited() + other.inherited() + missing(1) + Unknown.call();
            }
        }
        "#,
        "Child",
    );
    assert!(result.manifest.is_empty());
    assert!(!result.is_modified());
}

#[test]
fn test_ambiguous_overload_is_skipped() {
    let result = instrument(
        r#"
        class A {
            void f(int x) {}
            void f(String s) {}
            void g(Object o) {
                f(null);
                f(1);
            }
        }
        "#,
        "A",
    );
    assert_eq!(ids(&result), vec!["A#g(Object)/call:A.f(int)#0"]);
    assert_eq!(result.manifest.sites[0].result, TypeRef::Void);
}

#[test]
fn test_exact_overload_preferred() {
    let result = instrument(
        r#"
        class A {
            private int f(int x) { return x; }
            private double f(double x) { return x; }
            double g() { return f(1) + f(1.5); }
        }
        "#,
        "A",
    );
    assert_eq!(
        ids(&result),
        vec!["A#g()/call:A.f(int)#0", "A#g()/call:A.f(double)#0"]
    );
}

#[test]
fn test_call_on_other_instance_of_same_class() {
    let result = instrument(
        r#"
        class Shop {
            private int price(int qty) { return qty; }
            int compare(Shop other) { return other.price(1); }
        }
        "#,
        "Shop",
    );
    assert_eq!(ids(&result), vec!["Shop#compare(Shop)/call:Shop.price(int)#0"]);
    let Expr::Let { init, body, .. } = return_expr(&result.class, "compare") else {
        panic!("receiver should be bound to a temporary");
    };
    assert!(matches!(init.as_ref(), Expr::Name { name, .. } if name == "other"));
    let Expr::Guarded(guard) = body.as_ref() else {
        panic!("expected guard");
    };
    assert!(matches!(
        guard.fallback.as_ref(),
        Expr::Call { receiver: Some(r), .. } if **r == Expr::name("$seam0")
    ));
}

#[test]
fn test_constructions() {
    let source = r#"
        class Factory {
            Factory() {}
            Widget make() { return new Widget(); }
            Factory copy() { return new Factory(); }
        }
        class Widget {}
    "#;
    let plain = instrument(source, "Factory");
    assert_eq!(ids(&plain), vec!["Factory#copy()/new:Factory.<init>()#0"]);
    assert_eq!(plain.manifest.sites[0].result, TypeRef::class("Factory"));

    let opted = instrument_with(source, "Factory", &["Widget"]);
    assert_eq!(
        ids(&opted),
        vec![
            "Factory#make()/new:Widget.<init>/0#0",
            "Factory#copy()/new:Factory.<init>()#0",
        ]
    );
}

#[test]
fn test_static_field_reads_but_not_writes() {
    let result = instrument(
        r#"
        class Counter {
            private static int count = 0;
            int hits;
            int read() { return count + Counter.count + hits; }
            void bump() { count = count + 1; }
            void reset() { Counter.count = 0; }
        }
        "#,
        "Counter",
    );
    assert_eq!(
        ids(&result),
        vec![
            "Counter#read()/get:Counter.count#0",
            "Counter#read()/get:Counter.count#1",
            "Counter#bump()/get:Counter.count#0",
        ]
    );
    assert!(result
        .manifest
        .iter()
        .all(|s| s.kind == SiteKind::StaticFieldAccess));
}

#[test]
fn test_locals_shadow_static_fields() {
    let result = instrument(
        r#"
        class C {
            static int limit = 3;
            int f(int limit) { return limit; }
            int g() { int limit = 1; return limit; }
        }
        "#,
        "C",
    );
    assert!(result.manifest.is_empty());
}

#[test]
fn test_constructor_bodies_are_rewritten() {
    let result = instrument(
        r#"
        class C {
            int size;
            C(int n) { size = compute(n); }
            private int compute(int n) { return n; }
        }
        "#,
        "C",
    );
    assert_eq!(ids(&result), vec!["C#<init>(int)/call:C.compute(int)#0"]);
}

#[test]
fn test_nested_classes_are_instrumented() {
    let result = instrument(
        r#"
        class Outer {
            static class Inner {
                private int secret() { return 1; }
                int reveal() { return secret(); }
            }
            int run() { return 2; }
        }
        "#,
        "Outer",
    );
    assert_eq!(result.manifest.class, "Outer");
    assert_eq!(ids(&result), vec!["Inner#reveal()/call:Inner.secret()#0"]);
    assert_eq!(result.manifest.sites[0].class, "Inner");
}

#[test]
fn test_malformed_members_are_reported_and_left_alone() {
    let result = instrument(
        r#"
        class C {
            private int f() { return 1; }
            int broken( { }
            int g() { return f(); }
        }
        "#,
        "C",
    );
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(ids(&result), vec!["C#g()/call:C.f()#0"]);
}

#[test]
fn test_depth_limit_leaves_only_the_deep_expression() {
    let unit = parse_unit(
        r#"
        class C {
            private int g() { return 1; }
            int f() { return 1 + (2 + (3 + (4 + g()))); }
            int h() { return g(); }
        }
        "#,
    )
    .unwrap();
    let index = UnitIndex::new(&unit);
    let class = unit.class("C").unwrap();
    let result = Injector::new(&index)
        .with_max_depth(3)
        .instrument_class(class)
        .unwrap();

    assert_eq!(ids(&result), vec!["C#h()/call:C.g()#0"]);
    assert_eq!(result.skipped.len(), 1);
    assert!(result.skipped[0].reason.contains("f()"));
    assert_eq!(return_expr(&result.class, "f"), return_expr(class, "f"));
}

#[test]
fn test_long_flat_chain_is_not_nesting() {
    let mut sum = String::from("one()");
    for _ in 0..200 {
        sum.push_str(" + x");
    }
    let source = format!(
        "class Calc {{ private int one() {{ return 1; }} int sum(int x) {{ return {sum}; }} int two() {{ return one() + 1; }} }}"
    );
    let result = instrument(&source, "Calc");

    assert_eq!(
        ids(&result),
        vec![
            "Calc#sum(int)/call:Calc.one()#0",
            "Calc#two()/call:Calc.one()#0"
        ]
    );
    assert!(result.skipped.is_empty());
}

#[test]
fn test_candidates_listing_matches_manifest_order() {
    let unit = parse_unit(SHOP).unwrap();
    let index = UnitIndex::new(&unit);
    let injector = Injector::new(&index);
    let class = unit.class("Shop").unwrap();
    let candidates = injector.candidates(class);
    let manifest = injector.instrument_class(class).unwrap().manifest;
    assert_eq!(candidates.len(), manifest.len());
    assert_eq!(candidates[0].candidate.kind(), manifest.sites[0].kind);
}

#[test]
fn test_manifest_json_round_trip() {
    let result = instrument(SHOP, "Shop");
    let json = result.manifest.to_json().unwrap();
    assert!(json.contains("\"kind\": \"CALL\""));
    assert_eq!(SiteManifest::from_json(&json).unwrap(), result.manifest);
}

#[test]
fn test_select_overload_directly() {
    let index = UnitIndex::default();
    let a = crate::registry::MethodSignature::new("A", "f", vec![TypeRef::Int], TypeRef::Void);
    let b = crate::registry::MethodSignature::new("A", "f", vec![TypeRef::Double], TypeRef::Void);
    let candidates = vec![a.clone(), b.clone()];

    assert_eq!(
        select_overload(&index, &candidates, &[Some(TypeRef::Int)]),
        Resolution::Resolved(a)
    );
    assert_eq!(
        select_overload(&index, &candidates, &[Some(TypeRef::Double)]),
        Resolution::Resolved(b)
    );
    assert_eq!(
        select_overload(&index, &candidates, &[None]),
        Resolution::Ambiguous
    );
    assert_eq!(
        select_overload(&index, &candidates, &[Some(TypeRef::Str)]),
        Resolution::Unresolved
    );
}
