//! An ahead-of-time compiler for the Toy language, a small statically-typed
//! imperative language, targeting x86-64 GNU assembler (Intel syntax) for
//! linking against a small C runtime.
//!
//! The pipeline is strictly linear: lex → parse → global symbols and struct
//! layout → type check → single-exit lowering → assembly text. Each stage
//! consumes the immutable artifact of the one before it; every error is
//! fatal at first occurrence, one error kind per stage.

pub mod codegen;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod symbols;
pub mod typeck;
pub mod types;

use std::collections::HashMap;
use std::rc::Rc;

use log::debug;
use thiserror::Error;

use crate::codegen::CodegenError;
use crate::lexer::{LexError, Lexer, Token, TokenKind};
use crate::parser::{ParseError, Parser};
use crate::symbols::SymbolError;
use crate::typeck::TypeCheckError;
use crate::types::Span;
use crate::types::ast::Program;
use crate::types::entity::GlobalSymbols;

/// Any fatal compilation error, one kind per pipeline stage.
#[derive(Clone, Debug, Error)]
pub enum Error {
  #[error("lex error: {0}")]
  Lex(#[from] LexError),
  #[error("parse error: {0}")]
  Parse(#[from] ParseError),
  #[error("symbol error: {0}")]
  Symbol(#[from] SymbolError),
  #[error("type error: {0}")]
  TypeCheck(#[from] TypeCheckError),
  #[error("codegen error: {0}")]
  Codegen(#[from] CodegenError),
}

pub(crate) fn opt_span(span: &Option<Span>) -> String {
  span.as_ref().map(|s| format!(" at {s}")).unwrap_or_default()
}

/// One compiler invocation: the input files and everything derived from
/// them. The source table outlives every stage so the code generator can
/// quote original lines in its output.
#[derive(Default)]
pub struct Compiler {
  /// Full text of every file fed to the lexer, keyed by path.
  sources: HashMap<Rc<str>, String>,
  tokens: Vec<Token>,
}

impl Compiler {
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Add one source file. Files are lexed immediately, each under its own
  /// path, and the token streams concatenated in the order given; this is
  /// what keeps spans honest when the stdlib preprocessor prepends files.
  pub fn add_source(&mut self, path: &str, text: String) -> Result<(), Error> {
    let file: Rc<str> = path.into();
    let mut tokens = Lexer::new(file.clone(), &text).tokenize()?;
    if matches!(self.tokens.last(), Some(tok) if tok.kind == TokenKind::Eof) {
      self.tokens.pop();
    }
    debug!("lexed {}: {} tokens", path, tokens.len());
    self.tokens.append(&mut tokens);
    self.sources.insert(file, text);
    Ok(())
  }

  #[must_use] pub fn tokens(&self) -> &[Token] { &self.tokens }

  pub fn parse(&self) -> Result<Program, Error> {
    Ok(Parser::new(self.tokens.clone()).parse_program()?)
  }

  /// Build the global symbol table and type check the program.
  pub fn analyze(&self, program: &Program) -> Result<GlobalSymbols, Error> {
    let symbols = symbols::build_symbols(program)?;
    debug!("{} structs, {} functions", symbols.structs.len(), symbols.functions.len());
    typeck::check_program(program, &symbols)?;
    Ok(symbols)
  }

  /// Run the whole back half of the pipeline and return the assembly text.
  pub fn compile(&self, program: &Program) -> Result<String, Error> {
    let symbols = self.analyze(program)?;
    let lowered = lower::lower_program(program, &symbols);
    debug!("lowered {} declarations", lowered.decls.len());
    Ok(codegen::emit_program(&lowered, &symbols, &self.sources)?)
  }
}

/// Compile a single in-memory source file to assembly text.
pub fn compile_source(path: &str, text: &str) -> Result<String, Error> {
  let mut compiler = Compiler::new();
  compiler.add_source(path, text.to_owned())?;
  let program = compiler.parse()?;
  compiler.compile(&program)
}

/// Parse and type check a single in-memory source file.
pub fn check_source(path: &str, text: &str) -> Result<(), Error> {
  let mut compiler = Compiler::new();
  compiler.add_source(path, text.to_owned())?;
  let program = compiler.parse()?;
  compiler.analyze(&program).map(|_| ())
}
