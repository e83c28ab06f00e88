//! The built-in standard library (§3, §4.3 ADDED): a handful of pure
//! dict/list-shaping functions registered into every fresh [`crate::Runtime`]
//! under the same name→callable table host functions live in, grounded on
//! the `dsl_functions` table the source distribution populated for free
//! (`keys`, `values`, `items`/`entries`, `pick`/`filter`, `merge`, `concat`).
//! Lazy service proxies from that table (`messenger`, `executor`) are
//! deliberately not carried over -- see §9's design notes on replacing them
//! with upfront host registration.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::envelope::TransactionEnvelope;
use crate::registry::{HostCallable, HostFuture, HostRegistry};
use crate::scope::Scope;
use crate::value::Value;

/// Registers the standard library into `registry`. Called once from
/// `Runtime::new`; user code or a host may still shadow any of these names
/// by registering its own function under the same name afterward, or by
/// binding a same-named value in scope (scope wins over the registry per
/// the §4.3 resolution order).
pub fn install(registry: &mut HostRegistry) {
    registry.register("keys", pure(keys), false);
    registry.register("values", pure(values), false);
    registry.register("items", pure(entries), false);
    registry.register("entries", pure(entries), false);
    registry.register("merge", pure(merge), false);
    registry.register("concat", pure(concat), false);
    registry.register("pick", pure(pick), false);
    registry.register("filter_keys", pure(pick), false);
}

fn pure(f: fn(Vec<Value>, IndexMap<String, Value>) -> TransactionEnvelope) -> Rc<dyn HostCallable> {
    Rc::new(move |pos_args: Vec<Value>, kw_args: IndexMap<String, Value>, _ctx: Option<Scope>| -> HostFuture {
        let envelope = f(pos_args, kw_args);
        Box::pin(async move { envelope })
    })
}

fn arity_error(name: &str) -> TransactionEnvelope {
    TransactionEnvelope::single_failure("CallError", format!("'{name}' called with the wrong number of arguments"))
}

fn keys(pos_args: Vec<Value>, _kw: IndexMap<String, Value>) -> TransactionEnvelope {
    match pos_args.as_slice() {
        [Value::Dict(map)] => TransactionEnvelope::ok(Value::List(map.keys().cloned().map(Value::Str).collect())),
        [_] => TransactionEnvelope::ok(Value::List(Vec::new())),
        _ => arity_error("keys"),
    }
}

fn values(pos_args: Vec<Value>, _kw: IndexMap<String, Value>) -> TransactionEnvelope {
    match pos_args.as_slice() {
        [Value::Dict(map)] => TransactionEnvelope::ok(Value::List(map.values().cloned().collect())),
        [_] => TransactionEnvelope::ok(Value::List(Vec::new())),
        _ => arity_error("values"),
    }
}

fn entries(pos_args: Vec<Value>, _kw: IndexMap<String, Value>) -> TransactionEnvelope {
    match pos_args.as_slice() {
        [Value::Dict(map)] => TransactionEnvelope::ok(Value::List(
            map.iter().map(|(k, v)| Value::List(vec![Value::Str(k.clone()), v.clone()])).collect(),
        )),
        [_] => TransactionEnvelope::ok(Value::List(Vec::new())),
        _ => arity_error("entries"),
    }
}

/// Dict union (right operand wins on key collision) when both operands are
/// dicts; otherwise falls through to list concatenation, coercing scalar
/// operands to singleton lists, matching the original's `merge` semantics.
fn merge(pos_args: Vec<Value>, _kw: IndexMap<String, Value>) -> TransactionEnvelope {
    match pos_args.as_slice() {
        [Value::Dict(a), Value::Dict(b)] => {
            let mut out = a.clone();
            for (k, v) in b {
                out.insert(k.clone(), v.clone());
            }
            TransactionEnvelope::ok(Value::Dict(out))
        }
        [a, b] => TransactionEnvelope::ok(Value::List(as_list(a).into_iter().chain(as_list(b)).collect())),
        _ => arity_error("merge"),
    }
}

fn concat(pos_args: Vec<Value>, _kw: IndexMap<String, Value>) -> TransactionEnvelope {
    match pos_args.as_slice() {
        [a, b] => TransactionEnvelope::ok(Value::List(as_list(a).into_iter().chain(as_list(b)).collect())),
        _ => arity_error("concat"),
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::List(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn pick(pos_args: Vec<Value>, _kw: IndexMap<String, Value>) -> TransactionEnvelope {
    match pos_args.as_slice() {
        [Value::Dict(map), Value::List(keys)] => {
            let wanted: Vec<&str> = keys.iter().filter_map(Value::as_str).collect();
            let out = map.iter().filter(|(k, _)| wanted.contains(&k.as_str())).map(|(k, v)| (k.clone(), v.clone())).collect();
            TransactionEnvelope::ok(Value::Dict(out))
        }
        [other @ Value::Dict(_), _] => TransactionEnvelope::ok(other.clone()),
        _ => arity_error("pick"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(pairs: &[(&str, Value)]) -> Value {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        Value::Dict(map)
    }

    #[test]
    fn keys_lists_dict_keys() {
        let d = dict(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        let env = keys(vec![d], IndexMap::new());
        assert!(env.success);
        assert!(matches!(env.data, Value::List(items) if items.len() == 2));
    }

    #[test]
    fn merge_unions_dicts_right_wins() {
        let a = dict(&[("a", Value::Int(1)), ("b", Value::Int(1))]);
        let b = dict(&[("b", Value::Int(2))]);
        let env = merge(vec![a, b], IndexMap::new());
        let Value::Dict(out) = env.data else { panic!("expected dict") };
        assert_eq!(out.get("b").and_then(Value::as_int), Some(2));
    }

    #[test]
    fn concat_coerces_scalars_to_singleton_lists() {
        let env = concat(vec![Value::Int(1), Value::List(vec![Value::Int(2)])], IndexMap::new());
        let Value::List(items) = env.data else { panic!("expected list") };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn pick_restricts_to_requested_keys() {
        let d = dict(&[("a", Value::Int(1)), ("b", Value::Int(2)), ("c", Value::Int(3))]);
        let env = pick(vec![d, Value::List(vec![Value::Str("a".into()), Value::Str("c".into())])], IndexMap::new());
        let Value::Dict(out) = env.data else { panic!("expected dict") };
        assert_eq!(out.len(), 2);
        assert!(out.contains_key("a") && out.contains_key("c") && !out.contains_key("b"));
    }
}
