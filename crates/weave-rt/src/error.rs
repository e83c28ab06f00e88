//! Evaluator error kinds and the evaluation stack attached to them (§7).

use weave_common::Span;
use weave_parser::SyntaxError;

/// One frame of the evaluation stack: the kind of node being evaluated
/// and its span, recorded for error breadcrumbs.
pub type StackFrame = (String, Span);

#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("name '{name}' could not be resolved")]
    NameError { span: Span, name: String },

    #[error("type mismatch: declared {declared}, got {actual}")]
    TypeError { span: Span, declared: String, actual: String, name: Option<String> },

    #[error("arithmetic error: {message}")]
    ArithmeticError { span: Span, message: String },

    #[error("call error: {message}")]
    CallError { span: Span, message: String },

    #[error("validation failed for field '{field}': {reason}")]
    ValidationError { span: Span, field: String, reason: String },

    #[error("operation timed out")]
    TimeoutError { span: Span },

    #[error("operation was cancelled")]
    CancelledError,

    #[error("maximum evaluation depth exceeded")]
    RecursionError { span: Span },

    #[error("runtime error: {message}")]
    RuntimeError { span: Option<Span>, message: String },
}

impl EvalError {
    pub fn span(&self) -> Option<Span> {
        match self {
            EvalError::Syntax(e) => Some(e.span),
            EvalError::NameError { span, .. }
            | EvalError::TypeError { span, .. }
            | EvalError::ArithmeticError { span, .. }
            | EvalError::CallError { span, .. }
            | EvalError::ValidationError { span, .. }
            | EvalError::TimeoutError { span }
            | EvalError::RecursionError { span } => Some(*span),
            EvalError::CancelledError => None,
            EvalError::RuntimeError { span, .. } => *span,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            EvalError::Syntax(_) => "SyntaxError",
            EvalError::NameError { .. } => "NameError",
            EvalError::TypeError { .. } => "TypeError",
            EvalError::ArithmeticError { .. } => "ArithmeticError",
            EvalError::CallError { .. } => "CallError",
            EvalError::ValidationError { .. } => "ValidationError",
            EvalError::TimeoutError { .. } => "TimeoutError",
            EvalError::CancelledError => "CancelledError",
            EvalError::RecursionError { .. } => "RecursionError",
            EvalError::RuntimeError { .. } => "RuntimeError",
        }
    }
}

/// An [`EvalError`] plus the evaluation stack active when it was raised.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub error: EvalError,
    pub stack: Vec<StackFrame>,
}

impl Diagnostic {
    pub fn new(error: EvalError, stack: Vec<StackFrame>) -> Self {
        Self { error, stack }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)?;
        for (kind, span) in self.stack.iter().rev() {
            write!(f, "\n  in {kind} at {span}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}
