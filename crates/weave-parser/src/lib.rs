//! Grammar, Pratt parser, and AST builder for the Weave DSL.
//!
//! [`parse`] turns a whole source file into the root [`ast::Node`] (a
//! `Dict` of top-level items). [`parse_expr`] re-parses a standalone
//! expression, used by the runtime to evaluate `switch` condition strings
//! that are embedded as plain text in the source.

pub mod ast;
pub mod error;
mod parser;

pub use ast::{BinOpKind, Node, NodeKind, NumberLit, TypedName, UnaryOpKind};
pub use error::SyntaxError;

/// Parse a full Weave source file into its root record node.
pub fn parse(source: &str) -> Result<Node, SyntaxError> {
    parser::Parser::new(source).parse_program()
}

/// Parse a single expression, with no surrounding record structure.
///
/// Used to re-evaluate the string-valued condition expressions that
/// `switch` branches carry as keys.
pub fn parse_expr(source: &str) -> Result<Node, SyntaxError> {
    parser::Parser::new(source).parse_standalone_expr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ast::NodeKind;

    #[test]
    fn parses_typed_declaration() {
        let node = parse("int:x := 5;").unwrap();
        let NodeKind::Dict(items) = node.kind else { panic!("expected Dict") };
        assert_eq!(items.len(), 1);
        match &items[0].kind {
            NodeKind::Declaration { target, value } => {
                assert_eq!(target.declared_type(), Some("int"));
                assert_eq!(target.binding_name(), Some("x"));
                assert!(matches!(value.kind, NodeKind::Number(NumberLit::Int(5))));
            }
            other => panic!("expected Declaration, got {other:?}"),
        }
    }

    #[test]
    fn parses_untyped_declaration() {
        let node = parse("x := 5;").unwrap();
        let NodeKind::Dict(items) = node.kind else { panic!("expected Dict") };
        match &items[0].kind {
            NodeKind::Declaration { target, .. } => {
                assert_eq!(target.binding_name(), Some("x"));
                assert!(target.declared_type().is_none());
            }
            other => panic!("expected Declaration, got {other:?}"),
        }
    }

    #[test]
    fn parses_mapping_pair_with_literal_key() {
        let node = parse(r#""hello" : 1;"#).unwrap();
        let NodeKind::Dict(items) = node.kind else { panic!("expected Dict") };
        match &items[0].kind {
            NodeKind::Pair(key, _) => assert!(matches!(key.kind, NodeKind::Str(ref s) if s == "hello")),
            other => panic!("expected Pair, got {other:?}"),
        }
    }

    #[test]
    fn distinguishes_typed_key_from_typed_declaration() {
        let decl = parse("int:x := 1;").unwrap();
        let switch = parse("int:x : 1;").unwrap();

        let NodeKind::Dict(decl_items) = decl.kind else { panic!() };
        let NodeKind::Dict(switch_items) = switch.kind else { panic!() };

        assert!(matches!(decl_items[0].kind, NodeKind::Declaration { .. }));
        assert!(matches!(switch_items[0].kind, NodeKind::Pair(..)));
    }

    #[test]
    fn pipe_binds_between_comparison_and_and() {
        // `a == b |> c and d` parses as `(a == (b |> c)) and d`... but the
        // normative placement is pipe *between* comparison and and/or, so
        // comparison binds tighter than pipe: `(a == b) |> c` then `and d`.
        let node = parse_expr("a == b |> c and d").unwrap();
        match node.kind {
            NodeKind::BinOp { op: BinOpKind::And, left, right: _ } => match left.kind {
                NodeKind::Pipe(stages) => {
                    assert_eq!(stages.len(), 2);
                    assert!(matches!(stages[0].kind, NodeKind::BinOp { op: BinOpKind::Eq, .. }));
                }
                other => panic!("expected Pipe on the and's left side, got {other:?}"),
            },
            other => panic!("expected top-level And, got {other:?}"),
        }
    }

    #[test]
    fn exponent_is_right_associative() {
        let node = parse_expr("2 ^ 3 ^ 2").unwrap();
        match node.kind {
            NodeKind::BinOp { op: BinOpKind::Pow, left, right } => {
                assert!(matches!(left.kind, NodeKind::Number(NumberLit::Int(2))));
                assert!(matches!(right.kind, NodeKind::BinOp { op: BinOpKind::Pow, .. }));
            }
            other => panic!("expected Pow, got {other:?}"),
        }
    }

    #[test]
    fn parses_call_with_positional_and_keyword_args() {
        let node = parse_expr(r#"log(1, level: "info")"#).unwrap();
        match node.kind {
            NodeKind::Call { pos_args, kw_args, .. } => {
                assert_eq!(pos_args.len(), 1);
                assert_eq!(kw_args.len(), 1);
                assert_eq!(kw_args[0].0, "level");
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn parses_dotted_identifier() {
        let node = parse_expr("pkg.sub.name").unwrap();
        assert!(matches!(node.kind, NodeKind::Var(ref s) if s == "pkg.sub.name"));
    }

    #[test]
    fn parses_event_trigger_item_shape() {
        let node = parse(r#"watch_file("a.log"): log("changed");"#).unwrap();
        let NodeKind::Dict(items) = node.kind else { panic!() };
        match &items[0].kind {
            NodeKind::Pair(key, _) => assert!(matches!(key.kind, NodeKind::Call { .. })),
            other => panic!("expected Pair with Call key, got {other:?}"),
        }
    }

    #[test]
    fn parses_cron_trigger_item_shape() {
        let node = parse(r#"("*", "0", "*", "*", "*"): log("tick");"#).unwrap();
        let NodeKind::Dict(items) = node.kind else { panic!() };
        match &items[0].kind {
            NodeKind::Pair(key, _) => assert!(matches!(key.kind, NodeKind::Tuple(_))),
            other => panic!("expected Pair with Tuple key, got {other:?}"),
        }
    }

    #[test]
    fn parses_function_literal_declaration() {
        let src = "function:add := (int:a, int:b), { result := a + b; }, (int:result);";
        let node = parse(src).unwrap();
        let NodeKind::Dict(items) = node.kind else { panic!() };
        match &items[0].kind {
            NodeKind::Declaration { target, value } => {
                assert_eq!(target.binding_name(), Some("add"));
                match &value.kind {
                    NodeKind::FunctionLit { params, returns, .. } => {
                        assert_eq!(params, &vec![("a".to_string(), "int".to_string()), ("b".to_string(), "int".to_string())]);
                        assert_eq!(returns, &vec![("result".to_string(), "int".to_string())]);
                    }
                    other => panic!("expected FunctionLit, got {other:?}"),
                }
            }
            other => panic!("expected Declaration, got {other:?}"),
        }
    }

    #[test]
    fn rejects_alternate_function_literal_shape() {
        // The spec's open question is resolved in favour of the
        // params-tuple-first shape; a type-prefixed-identifier-first
        // shape must fail to parse.
        let src = "function:add := add(int:a, int:b) { result := a + b; };";
        assert!(parse(src).is_err());
    }

    #[test]
    fn parses_inline_function_literal_as_pipe_stage() {
        let src = "x |> (int:y), { z := y + 1; }, (int:z)";
        let node = parse_expr(src).unwrap();
        match node.kind {
            NodeKind::Pipe(stages) => {
                assert_eq!(stages.len(), 2);
                assert!(matches!(stages[1].kind, NodeKind::FunctionLit { .. }));
            }
            other => panic!("expected Pipe, got {other:?}"),
        }
    }

    #[test]
    fn empty_parens_is_empty_tuple() {
        let node = parse_expr("()").unwrap();
        assert!(matches!(node.kind, NodeKind::Tuple(v) if v.is_empty()));
    }

    #[test]
    fn single_paren_is_not_a_tuple() {
        let node = parse_expr("(1 + 2)").unwrap();
        assert!(matches!(node.kind, NodeKind::BinOp { op: BinOpKind::Add, .. }));
    }
}
