//! Global symbol collection and the struct layout engine.
//!
//! Layouts are computed on demand with an explicit visiting stack: entering
//! a struct pushes its name, resolving a by-value struct field recurses, and
//! re-encountering a name already on the stack is the illegal-recursion
//! error. Pointer fields are always 8 bytes / 8 aligned and never recurse
//! into their pointee, which is what makes cycles through indirection legal.

use std::collections::HashMap;

use itertools::Itertools;
use thiserror::Error;

use crate::types::Span;
use crate::types::ast::{Decl, Program, StructDecl, TypeAst};
use crate::types::entity::{FieldLayout, FnSig, GlobalSymbols, StructLayout};

/// An error in global symbol resolution or struct layout.
#[derive(Clone, Debug, Error)]
#[error("{msg}{}", crate::opt_span(.span))]
pub struct SymbolError {
  pub msg: String,
  pub span: Option<Span>,
}

fn err<T>(msg: impl Into<String>, span: &Span) -> Result<T, SymbolError> {
  Err(SymbolError { msg: msg.into(), span: Some(span.clone()) })
}

/// Round `value` up to a multiple of `align`. Alignments are powers of two.
#[inline] pub(crate) fn align_up(value: u32, align: u32) -> u32 {
  if align <= 1 { value } else { (value + align - 1) & !(align - 1) }
}

/// Collect the global namespaces and compute every struct layout.
pub fn build_symbols(program: &Program) -> Result<GlobalSymbols, SymbolError> {
  let mut decls: HashMap<&str, &StructDecl> = HashMap::new();
  let mut functions: HashMap<String, FnSig> = HashMap::new();

  for decl in &program.decls {
    match decl {
      Decl::Struct(s) => {
        if decls.insert(&s.name, s).is_some() {
          return err(format!("duplicate struct: {}", s.name), &s.span);
        }
      }
      Decl::Fn(f) => {
        let sig = FnSig {
          name: f.name.clone(),
          params: f.params.clone(),
          ret: f.ret.clone(),
          is_extern: false,
          span: f.span.clone(),
        };
        if functions.insert(f.name.clone(), sig).is_some() {
          return err(format!("duplicate function: {}", f.name), &f.span);
        }
      }
      Decl::ExternFn(f) => {
        let sig = FnSig {
          name: f.name.clone(),
          params: f.params.clone(),
          ret: f.ret.clone(),
          is_extern: true,
          span: f.span.clone(),
        };
        if functions.insert(f.name.clone(), sig).is_some() {
          return err(format!("duplicate function: {}", f.name), &f.span);
        }
      }
    }
  }

  let mut layouts = HashMap::new();
  // walk in declaration order so error messages are deterministic
  for decl in &program.decls {
    if let Decl::Struct(s) = decl {
      compute_layout(&s.name, &decls, &mut layouts, &mut Vec::new())?;
    }
  }

  Ok(GlobalSymbols { structs: layouts, functions })
}

fn compute_layout(
  name: &str,
  decls: &HashMap<&str, &StructDecl>,
  layouts: &mut HashMap<String, StructLayout>,
  visiting: &mut Vec<String>,
) -> Result<(), SymbolError> {
  if layouts.contains_key(name) {
    return Ok(());
  }
  let decl = decls[name];
  if visiting.iter().any(|n| n == name) {
    let chain = visiting.iter().map(String::as_str).chain([name]).join(" -> ");
    return err(format!("illegal recursive struct: {chain}"), &decl.span);
  }

  visiting.push(name.to_owned());
  let mut offset = 0u32;
  let mut struct_align = 1u32;
  let mut fields = Vec::with_capacity(decl.fields.len());
  for field in &decl.fields {
    if fields.iter().any(|f: &FieldLayout| f.name == field.name) {
      return err(format!("duplicate field {} in struct {name}", field.name), &field.span);
    }
    let (size, align) = field_size_align(&field.ty, decls, layouts, visiting)?;
    offset = align_up(offset, align);
    fields.push(FieldLayout {
      name: field.name.clone(),
      ty: field.ty.clone(),
      offset,
      size,
      align,
    });
    offset += size;
    struct_align = struct_align.max(align);
  }
  let size = align_up(offset, struct_align);
  layouts.insert(name.to_owned(), StructLayout::new(name.to_owned(), fields, size, struct_align));
  visiting.pop();
  Ok(())
}

fn field_size_align(
  ty: &TypeAst,
  decls: &HashMap<&str, &StructDecl>,
  layouts: &mut HashMap<String, StructLayout>,
  visiting: &mut Vec<String>,
) -> Result<(u32, u32), SymbolError> {
  match ty {
    TypeAst::Ptr { .. } => Ok((8, 8)),
    TypeAst::Named { name, span } => match name.as_str() {
      "i64" | "u64" => Ok((8, 8)),
      "u8" | "bool" => Ok((1, 1)),
      "unit" => Ok((0, 1)),
      _ => {
        if !decls.contains_key(name.as_str()) {
          return err(format!("unknown type: {name}"), span);
        }
        compute_layout(name, decls, layouts, visiting)?;
        let layout = &layouts[name];
        Ok((layout.size, layout.align))
      }
    },
  }
}

/// Size and alignment of a type once every layout has been computed.
/// `None` means the named type does not exist.
#[must_use] pub fn type_size_align(ty: &TypeAst, symbols: &GlobalSymbols) -> Option<(u32, u32)> {
  match ty {
    TypeAst::Ptr { .. } => Some((8, 8)),
    TypeAst::Named { name, .. } => match name.as_str() {
      "i64" | "u64" => Some((8, 8)),
      "u8" | "bool" => Some((1, 1)),
      "unit" => Some((0, 1)),
      _ => symbols.structs.get(name).map(|l| (l.size, l.align)),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::Lexer;
  use crate::parser::Parser;

  fn symbols(src: &str) -> GlobalSymbols {
    let tokens = Lexer::new("test.toy".into(), src).tokenize().expect("lex failed");
    let program = Parser::new(tokens).parse_program().expect("parse failed");
    build_symbols(&program).expect("symbols failed")
  }

  fn symbols_err(src: &str) -> SymbolError {
    let tokens = Lexer::new("test.toy".into(), src).tokenize().expect("lex failed");
    let program = Parser::new(tokens).parse_program().expect("parse failed");
    build_symbols(&program).unwrap_err()
  }

  #[test]
  fn padding_follows_declaration_order() {
    let syms = symbols("struct P { a: bool; b: i64; c: bool; }");
    let p = syms.struct_layout("P").expect("no layout");
    assert_eq!(p.field("a").map(|f| f.offset), Some(0));
    assert_eq!(p.field("b").map(|f| f.offset), Some(8));
    assert_eq!(p.field("c").map(|f| f.offset), Some(16));
    assert_eq!((p.size, p.align), (24, 8));
  }

  #[test]
  fn offsets_and_sizes_respect_alignment() {
    let syms = symbols(
      "struct Inner { x: u8; y: u64; }\n\
       struct Outer { a: u8; b: Inner; c: bool; }",
    );
    for layout in syms.structs.values() {
      assert_eq!(layout.size % layout.align, 0);
      for field in &layout.fields {
        assert_eq!(field.offset % field.align, 0);
      }
    }
    let outer = syms.struct_layout("Outer").expect("no layout");
    assert_eq!(outer.field("b").map(|f| f.offset), Some(8));
    assert_eq!(outer.field("c").map(|f| f.offset), Some(24));
    assert_eq!(outer.size, 32);
  }

  #[test]
  fn zero_field_struct_is_empty() {
    let syms = symbols("struct Empty { }");
    let e = syms.struct_layout("Empty").expect("no layout");
    assert_eq!((e.size, e.align), (0, 1));
  }

  #[test]
  fn pointers_break_cycles() {
    let syms = symbols("struct Node { value: i64; next: *Node; }");
    let node = syms.struct_layout("Node").expect("no layout");
    assert_eq!(node.size, 16);
    assert_eq!(node.field("next").map(|f| (f.size, f.align)), Some((8, 8)));
  }

  #[test]
  fn direct_recursion_is_rejected() {
    let err = symbols_err("struct A { x: A; }");
    assert!(err.to_string().contains("illegal recursive struct: A -> A"));
  }

  #[test]
  fn mutual_recursion_reports_the_chain() {
    let err = symbols_err("struct A { b: B; }\nstruct B { a: A; }");
    assert!(err.to_string().contains("illegal recursive struct: A -> B -> A"));
  }

  #[test]
  fn duplicate_definitions_are_rejected() {
    assert!(symbols_err("struct A { }\nstruct A { }").to_string().contains("duplicate struct"));
    assert!(
      symbols_err("fn f() -> unit { }\nextern fn f() -> unit;")
        .to_string()
        .contains("duplicate function")
    );
  }

  #[test]
  fn unknown_field_type_is_rejected() {
    let err = symbols_err("struct A { x: Missing; }");
    assert!(err.to_string().contains("unknown type: Missing"));
  }
}
