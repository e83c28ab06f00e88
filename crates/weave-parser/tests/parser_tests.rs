//! Parser integration tests using insta snapshots.
//!
//! Each test parses a Weave source fragment and snapshots a simplified
//! tree dump to verify precedence, associativity, and node shape. The
//! dump intentionally omits spans so the snapshots stay stable across
//! formatting-only changes to the lexer/parser's position tracking.

use insta::assert_snapshot;
use weave_parser::{parse, parse_expr, BinOpKind, Node, NodeKind, NumberLit, UnaryOpKind};

fn dump(node: &Node) -> String {
    let mut out = String::new();
    write_node(node, 0, &mut out);
    out
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_node(node: &Node, depth: usize, out: &mut String) {
    indent(depth, out);
    match &node.kind {
        NodeKind::Number(NumberLit::Int(i)) => out.push_str(&format!("Int({i})\n")),
        NodeKind::Number(NumberLit::Float(f)) => out.push_str(&format!("Float({f})\n")),
        NodeKind::Str(s) => out.push_str(&format!("Str({s:?})\n")),
        NodeKind::Bool(b) => out.push_str(&format!("Bool({b})\n")),
        NodeKind::Any => out.push_str("Any\n"),
        NodeKind::Var(name) => out.push_str(&format!("Var({name})\n")),
        NodeKind::TypedVar(name, ty) => out.push_str(&format!("TypedVar({ty}:{name})\n")),
        NodeKind::Pair(key, value) => {
            out.push_str("Pair\n");
            write_node(key, depth + 1, out);
            write_node(value, depth + 1, out);
        }
        NodeKind::Declaration { target, value } => {
            out.push_str("Declaration\n");
            write_node(target, depth + 1, out);
            write_node(value, depth + 1, out);
        }
        NodeKind::Dict(items) => {
            out.push_str("Dict\n");
            for item in items {
                write_node(item, depth + 1, out);
            }
        }
        NodeKind::List(items) => {
            out.push_str("List\n");
            for item in items {
                write_node(item, depth + 1, out);
            }
        }
        NodeKind::Tuple(items) => {
            out.push_str("Tuple\n");
            for item in items {
                write_node(item, depth + 1, out);
            }
        }
        NodeKind::Call { callee, pos_args, kw_args } => {
            out.push_str("Call\n");
            write_node(callee, depth + 1, out);
            for arg in pos_args {
                write_node(arg, depth + 1, out);
            }
            for (name, arg) in kw_args {
                indent(depth + 1, out);
                out.push_str(&format!("Kw({name})\n"));
                write_node(arg, depth + 2, out);
            }
        }
        NodeKind::BinOp { op, left, right } => {
            out.push_str(&format!("BinOp({})\n", bin_op_name(*op)));
            write_node(left, depth + 1, out);
            write_node(right, depth + 1, out);
        }
        NodeKind::UnaryOp { op, operand } => {
            out.push_str(&format!("UnaryOp({})\n", unary_op_name(*op)));
            write_node(operand, depth + 1, out);
        }
        NodeKind::Pipe(stages) => {
            out.push_str("Pipe\n");
            for stage in stages {
                write_node(stage, depth + 1, out);
            }
        }
        NodeKind::FunctionLit { params, body, returns } => {
            out.push_str(&format!("FunctionLit(params={params:?}, returns={returns:?})\n"));
            write_node(body, depth + 1, out);
        }
    }
}

fn bin_op_name(op: BinOpKind) -> &'static str {
    match op {
        BinOpKind::Or => "or",
        BinOpKind::And => "and",
        BinOpKind::Eq => "==",
        BinOpKind::NotEq => "!=",
        BinOpKind::Lt => "<",
        BinOpKind::Gt => ">",
        BinOpKind::LtEq => "<=",
        BinOpKind::GtEq => ">=",
        BinOpKind::Add => "+",
        BinOpKind::Sub => "-",
        BinOpKind::Mul => "*",
        BinOpKind::Div => "/",
        BinOpKind::Mod => "%",
        BinOpKind::Pow => "^",
    }
}

fn unary_op_name(op: UnaryOpKind) -> &'static str {
    match op {
        UnaryOpKind::Not => "not",
        UnaryOpKind::Neg => "neg",
    }
}

// ── Precedence ─────────────────────────────────────────────────────────

#[test]
fn mul_binds_tighter_than_add() {
    let node = parse_expr("a * b + c").unwrap();
    assert_snapshot!(dump(&node), @r"
    BinOp(+)
      BinOp(*)
        Var(a)
        Var(b)
      Var(c)
    ");
}

#[test]
fn exponent_is_right_associative_tree() {
    let node = parse_expr("2 ^ 3 ^ 2").unwrap();
    assert_snapshot!(dump(&node), @r"
    BinOp(^)
      Int(2)
      BinOp(^)
        Int(3)
        Int(2)
    ");
}

#[test]
fn unary_neg_binds_tighter_than_add() {
    let node = parse_expr("-x + y").unwrap();
    assert_snapshot!(dump(&node), @r"
    BinOp(+)
      UnaryOp(neg)
        Var(x)
      Var(y)
    ");
}

// ── Pipe ───────────────────────────────────────────────────────────────

#[test]
fn pipe_chain_is_flat_not_nested() {
    let node = parse_expr("x |> foo() |> bar()").unwrap();
    assert_snapshot!(dump(&node), @r"
    Pipe
      Var(x)
      Call
        Var(foo)
      Call
        Var(bar)
    ");
}

// ── Calls ──────────────────────────────────────────────────────────────

#[test]
fn call_with_positional_and_keyword_args() {
    let node = parse_expr(r#"log(1, level: "info")"#).unwrap();
    assert_snapshot!(dump(&node), @r#"
    Call
      Var(log)
      Int(1)
      Kw(level)
        Str("info")
    "#);
}

// ── Program-level declarations ─────────────────────────────────────────

#[test]
fn typed_declaration_tree() {
    let node = parse("int:x := 5;").unwrap();
    assert_snapshot!(dump(&node), @r"
    Dict
      Declaration
        TypedVar(int:x)
        Int(5)
    ");
}

#[test]
fn cron_trigger_item_tree() {
    let node = parse(r#"("*", "0", "*", "*", "*"): log("tick");"#).unwrap();
    assert_snapshot!(dump(&node), @r#"
    Dict
      Pair
        Tuple
          Str("*")
          Str("0")
          Str("*")
          Str("*")
          Str("*")
        Call
          Var(log)
          Str("tick")
    "#);
}
