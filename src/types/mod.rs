//! Shared value types used by every stage of the pipeline.

pub mod ast;
pub mod entity;
pub mod ty;

use std::fmt;
use std::rc::Rc;

/// A source location: file path, 1-based line, 1-based column.
///
/// Spans are attached to every token and AST node and must stay cheap to
/// clone; the file path is a shared `Rc<str>` so cloning never copies it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Span {
  /// The path of the file this location points into.
  pub file: Rc<str>,
  /// 1-based line number.
  pub line: u32,
  /// 1-based column number.
  pub col: u32,
}

impl Span {
  #[must_use] pub fn new(file: Rc<str>, line: u32, col: u32) -> Self {
    Span { file, line, col }
  }

  /// A location for nodes the compiler synthesizes itself.
  #[must_use] pub fn synthetic() -> Self {
    Span { file: "<builtin>".into(), line: 0, col: 0 }
  }
}

impl fmt::Display for Span {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.file, self.line, self.col)
  }
}
