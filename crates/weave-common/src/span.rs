//! Source position tracking shared by the lexer, parser, and evaluator.
//!
//! The lexer and cursor work in byte offsets ([`ByteSpan`]); the AST and
//! diagnostics work in line/column pairs ([`Span`]). [`LineIndex`] bridges
//! the two on demand so hot-path scanning never pays for line/column math
//! it doesn't need.

use serde::Serialize;

/// Byte-offset span into source text. Start is inclusive, end is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteSpan {
    pub start: u32,
    pub end: u32,
}

impl ByteSpan {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "span start ({start}) must be <= end ({end})");
        Self { start, end }
    }

    pub fn merge(self, other: ByteSpan) -> ByteSpan {
        ByteSpan {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A source span expressed as 1-based (line, column) pairs, attached to
/// every AST node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self { start_line, start_col, end_line, end_col }
    }

    /// A span with no useful location, used for synthetic/host-injected nodes.
    pub fn synthetic() -> Self {
        Self { start_line: 0, start_col: 0, end_line: 0, end_col: 0 }
    }

    pub fn merge(self, other: Span) -> Span {
        let (start_line, start_col) = if self.start_line <= other.start_line {
            (self.start_line, self.start_col)
        } else {
            (other.start_line, other.start_col)
        };
        let (end_line, end_col) = if self.end_line >= other.end_line {
            (self.end_line, self.end_col)
        } else {
            (other.end_line, other.end_col)
        };
        Span { start_line, start_col, end_line, end_col }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start_line == self.end_line {
            write!(f, "{}:{}-{}", self.start_line, self.start_col, self.end_col)
        } else {
            write!(
                f,
                "{}:{}-{}:{}",
                self.start_line, self.start_col, self.end_line, self.end_col
            )
        }
    }
}

/// Pre-computed index of line start positions for on-demand byte-offset to
/// (line, column) conversion.
#[derive(Debug)]
pub struct LineIndex {
    line_starts: Vec<u32>,
}

impl LineIndex {
    /// Build a line index by scanning the source text for newline characters.
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push((i + 1) as u32);
            }
        }
        Self { line_starts }
    }

    /// Convert a byte offset to a 1-based (line, column) pair.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let line_idx = self.line_starts.partition_point(|&start| start <= offset);
        let line_idx = line_idx.saturating_sub(1);
        let line = (line_idx as u32) + 1;
        let col = offset - self.line_starts[line_idx] + 1;
        (line, col)
    }

    /// Convert a byte span into an AST-level [`Span`].
    pub fn span(&self, byte_span: ByteSpan) -> Span {
        let (start_line, start_col) = self.line_col(byte_span.start);
        let (end_line, end_col) = self.line_col(byte_span.end);
        Span::new(start_line, start_col, end_line, end_col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_span_merge() {
        let a = ByteSpan::new(5, 10);
        let b = ByteSpan::new(8, 15);
        assert_eq!(a.merge(b), ByteSpan::new(5, 15));
    }

    #[test]
    fn line_index_multi_line() {
        let idx = LineIndex::new("hello\nworld\nfoo");
        assert_eq!(idx.line_col(0), (1, 1));
        assert_eq!(idx.line_col(6), (2, 1));
        assert_eq!(idx.line_col(13), (3, 2));
    }

    #[test]
    fn span_merge_picks_outer_bounds() {
        let a = Span::new(1, 1, 1, 5);
        let b = Span::new(2, 1, 3, 4);
        let m = a.merge(b);
        assert_eq!(m, Span::new(1, 1, 3, 4));
    }
}
