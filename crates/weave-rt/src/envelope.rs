//! The transaction envelope: the uniform contract host functions and
//! combinators return across, replacing the source repository's mix of
//! exceptions and ad-hoc result dicts with one explicit shape.

use indexmap::IndexMap;
use weave_common::Span;

use crate::value::Value;

/// One recorded failure inside an envelope's `errors` list.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    pub span: Option<Span>,
}

impl ErrorReport {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into(), span: None }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

/// `{success, data, errors, action, identifier}`, per §3.
#[derive(Debug, Clone)]
pub struct TransactionEnvelope {
    pub success: bool,
    pub data: Value,
    pub errors: Vec<ErrorReport>,
    pub action: Option<String>,
    pub identifier: Option<String>,
}

impl TransactionEnvelope {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data, errors: Vec::new(), action: None, identifier: None }
    }

    pub fn failure(errors: Vec<ErrorReport>) -> Self {
        Self { success: false, data: Value::Null, errors, action: None, identifier: None }
    }

    pub fn single_failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::failure(vec![ErrorReport::new(kind, message)])
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Renders this envelope as the `Value::Dict` shape a Weave program
    /// observes when it receives one as an explicit function input.
    pub fn to_value(&self) -> Value {
        let mut map = IndexMap::new();
        map.insert("success".to_string(), Value::Bool(self.success));
        map.insert("data".to_string(), self.data.clone());
        map.insert(
            "errors".to_string(),
            Value::List(
                self.errors
                    .iter()
                    .map(|e| {
                        let mut em = IndexMap::new();
                        em.insert("kind".to_string(), Value::Str(e.kind.clone()));
                        em.insert("message".to_string(), Value::Str(e.message.clone()));
                        Value::Dict(em)
                    })
                    .collect(),
            ),
        );
        map.insert(
            "action".to_string(),
            self.action.clone().map(Value::Str).unwrap_or(Value::Null),
        );
        map.insert(
            "identifier".to_string(),
            self.identifier.clone().map(Value::Str).unwrap_or(Value::Null),
        );
        Value::Dict(map)
    }

    /// Recognises a `Value::Dict` that is shaped like an envelope (carries
    /// at least `success` and `data` keys), used by `Value::unwrap_envelope_if_success`.
    pub fn try_from_value(value: &Value) -> Option<TransactionEnvelope> {
        let Value::Dict(map) = value else { return None };
        let success = match map.get("success")? {
            Value::Bool(b) => *b,
            _ => return None,
        };
        let data = map.get("data")?.clone();
        let errors = match map.get("errors") {
            Some(Value::List(items)) => items
                .iter()
                .filter_map(|item| {
                    let Value::Dict(em) = item else { return None };
                    let kind = em.get("kind").and_then(Value::as_str).unwrap_or("RuntimeError").to_string();
                    let message = em.get("message").and_then(Value::as_str).unwrap_or("").to_string();
                    Some(ErrorReport::new(kind, message))
                })
                .collect(),
            _ => Vec::new(),
        };
        let action = map.get("action").and_then(Value::as_str).map(str::to_string);
        let identifier = map.get("identifier").and_then(Value::as_str).map(str::to_string);
        Some(TransactionEnvelope { success, data, errors, action, identifier })
    }
}
