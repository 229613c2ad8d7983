// Tests for printing syntax trees back to source

#[cfg(test)]
mod source_tests {
    use crate::ast::*;
    use crate::parser::parse_unit;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_class_to_source() {
        let unit = parse_unit("class A { int f(int x) { return x + 1; } }").unwrap();
        assert_eq!(
            unit.to_source(),
            "class A {\n    int f(int x) {\n        return x + 1;\n    }\n}\n"
        );
    }

    #[test]
    fn test_modifiers_annotations_and_fields() {
        let unit = parse_unit(
            "@Instrument public class A extends B { private static final int N = 3; A() {} }",
        )
        .unwrap();
        assert_eq!(
            unit.to_source(),
            "@Instrument\npublic class A extends B {\n    private static final int N = 3;\n    A() {\n    }\n}\n"
        );
    }

    #[test]
    fn test_parenthesization_follows_precedence() {
        let expr = Expr::Binary {
            op: BinaryOp::Mul,
            left: Box::new(Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(Expr::int(1)),
                right: Box::new(Expr::int(2)),
            }),
            right: Box::new(Expr::int(3)),
        };
        assert_eq!(expr.to_source(), "(1 + 2) * 3");

        let right_nested = Expr::Binary {
            op: BinaryOp::Sub,
            left: Box::new(Expr::int(1)),
            right: Box::new(Expr::Binary {
                op: BinaryOp::Sub,
                left: Box::new(Expr::int(2)),
                right: Box::new(Expr::int(3)),
            }),
        };
        assert_eq!(right_nested.to_source(), "1 - (2 - 3)");
    }

    #[test]
    fn test_printed_source_parses_back() {
        let source = r#"
            class Shop {
                private int stock = 4;
                int buy(int n) {
                    if (n > stock) {
                        throw new IllegalStateException("out of stock");
                    }
                    stock = stock - n;
                    return helper(n, "x") * 2;
                }
                private int helper(int n, String tag) { return n; }
            }
        "#;
        let first = parse_unit(source).unwrap();
        let printed = first.to_source();
        let second = parse_unit(&printed).unwrap();
        assert_eq!(printed, second.to_source());
    }

    #[test]
    fn test_literals_to_source() {
        assert_eq!(Expr::Literal(Literal::Double(2.0)).to_source(), "2.0");
        assert_eq!(Expr::Literal(Literal::Double(0.5)).to_source(), "0.5");
        assert_eq!(Expr::string("say \"hi\"\n").to_source(), r#""say \"hi\"\n""#);
        assert_eq!(Expr::Literal(Literal::Null).to_source(), "null");
    }

    #[test]
    fn test_guarded_to_source() {
        let guard = Expr::Guarded(Box::new(Guard {
            site: SiteId::new("A#f()/call:A.g(int)#0"),
            scope: GuardScope::Instance,
            args: vec![Expr::name("$seam0")],
            result: TypeRef::Int,
            fallback: Box::new(Expr::Call {
                receiver: None,
                method: "g".to_string(),
                args: vec![Expr::name("$seam0")],
                span: Span::default(),
            }),
        }));
        let expr = Expr::Let {
            name: "$seam0".to_string(),
            ty: Some(TypeRef::Int),
            init: Box::new(Expr::int(1)),
            body: Box::new(guard),
        };
        assert_eq!(
            expr.to_source(),
            r#"let $seam0: int = 1 in seam::guard<int>("A#f()/call:A.g(int)#0", this, [$seam0]) ?? g($seam0)"#
        );
    }

    #[test]
    fn test_malformed_member_printed_verbatim() {
        let unit = parse_unit("class A { int broken( { return; } }").unwrap();
        assert_eq!(unit.to_source(), "class A {\n    int broken( { return; }\n}\n");
    }
}
