//! Parse error type for the Weave parser.

use std::fmt;
use weave_common::Span;

/// A syntax error with location information and optional related span.
///
/// Carries the primary span where the problem was detected, a human
/// readable message, and an optional related span for context (e.g.
/// "opened here" for an unclosed delimiter).
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
    pub related: Option<(String, Span)>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self { message: message.into(), span, related: None }
    }

    pub fn with_related(
        message: impl Into<String>,
        span: Span,
        related_message: impl Into<String>,
        related_span: Span,
    ) -> Self {
        Self {
            message: message.into(),
            span,
            related: Some((related_message.into(), related_span)),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

impl std::error::Error for SyntaxError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_span() {
        let err = SyntaxError::new("expected expression", Span::new(1, 5, 1, 6));
        assert_eq!(err.to_string(), "expected expression at 1:5-6");
    }
}
