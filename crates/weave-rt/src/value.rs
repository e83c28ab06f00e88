//! Runtime value representation.
//!
//! `Value` is the tagged union the design notes call for in place of the
//! source repository's duck typing: the evaluator matches on it
//! exhaustively rather than probing for keys like `type` or `success`.

use std::rc::Rc;

use indexmap::IndexMap;
use weave_parser::{Node, TypedName};

use crate::envelope::TransactionEnvelope;
use crate::scope::Scope;

/// An immutable `(params, body, returns)` triple. Functions capture only
/// the lexical scope at their definition site -- they are not closures
/// over mutable state, per §3 of the data model.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<TypedName>,
    pub body: Node,
    pub returns: Vec<TypedName>,
    pub closure: Scope,
}

/// The eight-variant value sum the evaluator manipulates.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(IndexMap<String, Value>),
    Function(Rc<FunctionDef>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
        }
    }

    /// Truthiness used by `and`/`or`, `guard`, and `switch` conditions.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Dict(map) => !map.is_empty(),
            Value::Function(_) => true,
        }
    }

    /// Transparently unwraps a value shaped like a successful transaction
    /// envelope to its `data`, as the evaluator does at pipe boundaries.
    /// Any other value passes through unchanged.
    pub fn unwrap_envelope_if_success(self) -> Value {
        match TransactionEnvelope::try_from_value(&self) {
            Some(env) if env.success => env.data,
            _ => self,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Dict(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Function(def) => write!(f, "<function {}>", def.name.as_deref().unwrap_or("anonymous")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_spec_rules() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(1).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
    }
}
