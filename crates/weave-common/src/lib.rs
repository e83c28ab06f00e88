//! Shared primitives used by every layer of the Weave runtime: lexer,
//! parser, evaluator, and the embedding crate.

pub mod span;

pub use span::{ByteSpan, LineIndex, Span};
