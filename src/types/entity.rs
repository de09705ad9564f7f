//! Processed global declarations: struct layouts and function signatures.

use std::collections::HashMap;

use crate::types::Span;
use crate::types::ast::{Param, TypeAst};

/// A single field of a laid out struct.
#[derive(Clone, Debug)]
pub struct FieldLayout {
  pub name: String,
  pub ty: TypeAst,
  /// Byte offset from the start of the struct; always a multiple of `align`.
  pub offset: u32,
  pub size: u32,
  pub align: u32,
}

/// The computed layout of a struct declaration.
///
/// Fields stay in declaration order; declaration order is the ABI. Padding
/// is implicit in the offsets, never materialized as fields.
#[derive(Clone, Debug)]
pub struct StructLayout {
  pub name: String,
  pub fields: Vec<FieldLayout>,
  pub size: u32,
  pub align: u32,
  index: HashMap<String, usize>,
}

impl StructLayout {
  pub(crate) fn new(name: String, fields: Vec<FieldLayout>, size: u32, align: u32) -> Self {
    let index = fields.iter().enumerate().map(|(i, f)| (f.name.clone(), i)).collect();
    StructLayout { name, fields, size, align, index }
  }

  /// Look up a field by name.
  #[must_use] pub fn field(&self, name: &str) -> Option<&FieldLayout> {
    self.index.get(name).map(|&i| &self.fields[i])
  }
}

/// A function signature, shared by `fn` and `extern fn` declarations.
#[derive(Clone, Debug)]
pub struct FnSig {
  pub name: String,
  pub params: Vec<Param>,
  pub ret: TypeAst,
  /// Whether the body is provided by the runtime at link time.
  pub is_extern: bool,
  pub span: Span,
}

/// The global symbol table. The struct and function namespaces are disjoint
/// and each rejects duplicate definitions at build time.
#[derive(Debug, Default)]
pub struct GlobalSymbols {
  pub structs: HashMap<String, StructLayout>,
  pub functions: HashMap<String, FnSig>,
}

impl GlobalSymbols {
  #[must_use] pub fn struct_layout(&self, name: &str) -> Option<&StructLayout> {
    self.structs.get(name)
  }

  #[must_use] pub fn function(&self, name: &str) -> Option<&FnSig> {
    self.functions.get(name)
  }
}
