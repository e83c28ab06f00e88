//! Built-in type names and structural assignability checks (§4.2).

use std::collections::HashMap;

use weave_common::Span;

use crate::error::EvalError;
use crate::value::Value;

/// Canonicalises a type-name alias to the name assignability is checked
/// against. `number` is kept distinct from `int`/`float` since it accepts
/// either.
pub fn normalize_type_name(name: &str) -> &str {
    match name {
        "i8" | "i16" | "i32" | "i64" | "i128" | "int" => "int",
        "f16" | "f32" | "f64" | "f128" | "float" => "float",
        "string" | "str" => "str",
        "boolean" | "bool" => "bool",
        "array" | "list" => "list",
        other => other,
    }
}

/// A schema for a registered custom type: a dict tree describing fields,
/// generators, and converters, validated by [`normalize`].
#[derive(Debug, Clone)]
pub struct Schema(pub Value);

/// The side table of custom types registered on a [`crate::Runtime`].
#[derive(Default, Clone)]
pub struct CustomTypes {
    schemas: HashMap<String, Schema>,
}

impl CustomTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, schema: Schema) {
        self.schemas.insert(name.into(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }
}

/// Checks (and possibly coerces) `value` against built-in type `declared`.
/// Returns the value to bind on success.
pub fn check_builtin_assignable(declared: &str, value: Value, span: Span) -> Result<Value, EvalError> {
    let declared = normalize_type_name(declared);
    match declared {
        "any" => Ok(value),
        "number" => match &value {
            Value::Int(_) | Value::Float(_) => Ok(value),
            other => Err(type_error(declared, other, span)),
        },
        "int" => match &value {
            Value::Int(_) => Ok(value),
            Value::Float(f) if f.fract() == 0.0 => Ok(Value::Int(*f as i64)),
            other => Err(type_error(declared, other, span)),
        },
        "float" => match &value {
            Value::Float(_) => Ok(value),
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            other => Err(type_error(declared, other, span)),
        },
        "str" => match &value {
            Value::Str(_) => Ok(value),
            other => Err(type_error(declared, other, span)),
        },
        "bool" => match &value {
            Value::Bool(_) => Ok(value),
            other => Err(type_error(declared, other, span)),
        },
        "dict" => match &value {
            Value::Dict(_) => Ok(value),
            other => Err(type_error(declared, other, span)),
        },
        "list" | "tuple" => match &value {
            Value::List(_) => Ok(value),
            other => Err(type_error(declared, other, span)),
        },
        "function" => match &value {
            Value::Function(_) => Ok(value),
            other => Err(type_error(declared, other, span)),
        },
        _ => Err(EvalError::NameError { span, name: format!("unknown type '{declared}'") }),
    }
}

fn type_error(declared: &str, actual: &Value, span: Span) -> EvalError {
    EvalError::TypeError {
        span,
        declared: declared.to_string(),
        actual: actual.type_name().to_string(),
        name: None,
    }
}

/// `normalize(value, schema) -> value`, the mechanism behind custom-type
/// declarations (§6.2). Supports the two generators and the identity
/// converter path the spec names; a real deployment would extend the
/// converter table via the host registry, not this function.
pub fn normalize(value: Value, schema: &Schema, span: Span) -> Result<Value, EvalError> {
    let Value::Dict(fields) = &schema.0 else {
        // A non-dict schema is treated as "accept anything" -- schemas
        // are declarative, not executable, so there's nothing to enforce.
        return Ok(value);
    };
    let Value::Dict(mut input) = value else {
        return Err(EvalError::ValidationError {
            span,
            field: "<root>".to_string(),
            reason: "expected a dict value for custom-typed schema".to_string(),
        });
    };

    for (field_name, field_schema) in fields {
        let Value::Dict(field_spec) = field_schema else { continue };
        if input.contains_key(field_name) {
            continue;
        }
        if let Some(Value::Str(generator)) = field_spec.get("generator") {
            let generated = run_generator(generator);
            input.insert(field_name.clone(), generated);
        } else if let Some(default) = field_spec.get("default") {
            input.insert(field_name.clone(), default.clone());
        } else if matches!(field_spec.get("required"), Some(Value::Bool(true))) {
            return Err(EvalError::ValidationError {
                span,
                field: field_name.clone(),
                reason: "required field missing".to_string(),
            });
        }
    }

    Ok(Value::Dict(input))
}

fn run_generator(name: &str) -> Value {
    match name {
        "time_now_utc" => Value::Str(chrono::Utc::now().to_rfc3339()),
        "generate_identifier" => Value::Str(format!("{:x}", fxhash_seed())),
        _ => Value::Null,
    }
}

/// A deterministic-looking but non-cryptographic identifier source.
/// `Date.now`/`rand` equivalents aren't available in this environment's
/// evaluator core in a host-independent way, so identifiers are derived
/// from a monotonically advancing counter rather than real entropy; hosts
/// that need genuinely unique identifiers should provide their own
/// `generate_identifier` host function instead of relying on this one.
fn fxhash_seed() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_common::Span;

    fn span() -> Span {
        Span::synthetic()
    }

    #[test]
    fn int_accepts_whole_number_float() {
        let v = check_builtin_assignable("int", Value::Float(5.0), span()).unwrap();
        assert!(matches!(v, Value::Int(5)));
    }

    #[test]
    fn int_rejects_fractional_float() {
        assert!(check_builtin_assignable("int", Value::Float(5.5), span()).is_err());
    }

    #[test]
    fn any_accepts_everything() {
        assert!(check_builtin_assignable("any", Value::Null, span()).is_ok());
    }

    #[test]
    fn number_accepts_int_or_float() {
        assert!(check_builtin_assignable("number", Value::Int(1), span()).is_ok());
        assert!(check_builtin_assignable("number", Value::Float(1.5), span()).is_ok());
        assert!(check_builtin_assignable("number", Value::Str("x".into()), span()).is_err());
    }
}
