//! The type checker.
//!
//! Checking is a single deterministic pass over the AST that produces
//! nothing on success and stops at the first violation. Integer literals
//! carry their mathematical value through the pass as [`Ty::IntLit`] and are
//! only forced to a concrete width when a use site demands one.

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::types::Span;
use crate::types::ast::{
  BinOp, BinaryExpr, Block, CallExpr, Decl, Expr, FnDecl, Param, Program, Stmt, StructLitExpr,
  TypeAst, UnOp, UnaryExpr,
};
use crate::types::entity::GlobalSymbols;
use crate::types::ty::{Ty, is_assignable};

/// A type error. Locations are best effort, taken from the failing node.
#[derive(Clone, Debug, Error)]
#[error("{msg}{}", crate::opt_span(.span))]
pub struct TypeCheckError {
  pub msg: String,
  pub span: Option<Span>,
}

fn err<T>(msg: impl Into<String>, span: &Span) -> Result<T, TypeCheckError> {
  Err(TypeCheckError { msg: msg.into(), span: Some(span.clone()) })
}

/// Resolve type syntax against the global symbol table.
pub(crate) fn resolve_type(ty: &TypeAst, symbols: &GlobalSymbols) -> Result<Ty, TypeCheckError> {
  match ty {
    TypeAst::Ptr { inner, .. } => Ok(Ty::Ptr(Rc::new(resolve_type(inner, symbols)?))),
    TypeAst::Named { name, span } => match name.as_str() {
      "i64" => Ok(Ty::I64),
      "u64" => Ok(Ty::U64),
      "u8" => Ok(Ty::U8),
      "bool" => Ok(Ty::Bool),
      "unit" => Ok(Ty::Unit),
      _ if symbols.structs.contains_key(name) => Ok(Ty::Struct(name.as_str().into())),
      _ => err(format!("unknown type: {name}"), span),
    },
  }
}

/// The lexically scoped name environment.
#[derive(Default)]
struct TypeEnv {
  scopes: Vec<HashMap<String, Ty>>,
}

impl TypeEnv {
  fn push(&mut self) { self.scopes.push(HashMap::new()) }

  fn pop(&mut self) { self.scopes.pop(); }

  /// Shadowing across scopes is allowed; a duplicate in one scope is not.
  fn define(&mut self, name: &str, ty: Ty, span: &Span) -> Result<(), TypeCheckError> {
    let scope = self.scopes.last_mut().expect("no active scope");
    if scope.contains_key(name) {
      return err(format!("duplicate local symbol: {name}"), span);
    }
    scope.insert(name.to_owned(), ty);
    Ok(())
  }

  fn lookup(&self, name: &str) -> Option<&Ty> {
    self.scopes.iter().rev().find_map(|s| s.get(name))
  }
}

/// Check a whole program. Produces nothing on success.
pub fn check_program(program: &Program, symbols: &GlobalSymbols) -> Result<(), TypeCheckError> {
  for decl in &program.decls {
    match decl {
      Decl::Fn(f) => check_signature(&f.params, &f.ret, symbols)?,
      Decl::ExternFn(f) => check_signature(&f.params, &f.ret, symbols)?,
      Decl::Struct(_) => {}
    }
  }
  for decl in &program.decls {
    if let Decl::Fn(f) = decl {
      Checker::new(f, symbols)?.check_fn(f)?;
    }
  }
  Ok(())
}

/// Functions pass everything by value in a register, so struct-typed
/// parameters and returns are rejected here rather than discovered in the
/// generator.
fn check_signature(
  params: &[Param], ret: &TypeAst, symbols: &GlobalSymbols,
) -> Result<(), TypeCheckError> {
  for param in params {
    if let Ty::Struct(name) = resolve_type(&param.ty, symbols)? {
      return err(
        format!("struct parameters are not supported: pass *{name} instead"),
        &param.span,
      );
    }
  }
  if let Ty::Struct(name) = resolve_type(ret, symbols)? {
    return err(format!("struct return types are not supported: return *{name} instead"),
      ret.span());
  }
  Ok(())
}

struct Checker<'a> {
  symbols: &'a GlobalSymbols,
  env: TypeEnv,
  ret_ty: Ty,
}

impl<'a> Checker<'a> {
  fn new(f: &FnDecl, symbols: &'a GlobalSymbols) -> Result<Self, TypeCheckError> {
    let ret_ty = resolve_type(&f.ret, symbols)?;
    Ok(Checker { symbols, env: TypeEnv::default(), ret_ty })
  }

  fn check_fn(&mut self, f: &FnDecl) -> Result<(), TypeCheckError> {
    self.env.push();
    for param in &f.params {
      let ty = resolve_type(&param.ty, self.symbols)?;
      self.env.define(&param.name, ty, &param.span)?;
    }
    self.check_block(&f.body)?;
    self.env.pop();
    Ok(())
  }

  fn check_block(&mut self, block: &Block) -> Result<(), TypeCheckError> {
    self.env.push();
    for stmt in &block.stmts {
      self.check_stmt(stmt)?;
    }
    self.env.pop();
    Ok(())
  }

  fn check_stmt(&mut self, stmt: &Stmt) -> Result<(), TypeCheckError> {
    match stmt {
      Stmt::Block(b) => self.check_block(b),
      Stmt::Var(v) => {
        let var_ty = resolve_type(&v.ty, self.symbols)?;
        if let Some(init) = &v.init {
          let init_ty = self.check_expr(init)?;
          if !is_assignable(&var_ty, &init_ty) {
            return err(
              format!("type mismatch in variable initializer: {var_ty} = {init_ty}"),
              init.span(),
            );
          }
        }
        self.env.define(&v.name, var_ty, &v.span)
      }
      Stmt::Defer(d) => {
        let call_ty = self.check_call(&d.call)?;
        if call_ty != Ty::Unit {
          return err("defer call must return unit", &d.span);
        }
        Ok(())
      }
      Stmt::If(i) => {
        let cond_ty = self.check_expr(&i.cond)?;
        if !cond_ty.is_bool() {
          return err(format!("if condition must be bool, got {cond_ty}"), i.cond.span());
        }
        self.check_block(&i.then_block)?;
        if let Some(else_block) = &i.else_block {
          self.check_block(else_block)?;
        }
        Ok(())
      }
      Stmt::While(w) => {
        let cond_ty = self.check_expr(&w.cond)?;
        if !cond_ty.is_bool() {
          return err(format!("while condition must be bool, got {cond_ty}"), w.cond.span());
        }
        self.check_block(&w.body)
      }
      Stmt::Return(r) => match &r.value {
        None => {
          if self.ret_ty != Ty::Unit {
            return err("return value required", &r.span);
          }
          Ok(())
        }
        Some(value) => {
          let value_ty = self.check_expr(value)?;
          if !is_assignable(&self.ret_ty, &value_ty) {
            return err(
              format!("return type mismatch: expected {}, got {value_ty}", self.ret_ty),
              value.span(),
            );
          }
          Ok(())
        }
      },
      Stmt::Expr(e) => self.check_expr(&e.expr).map(|_| ()),
      Stmt::Goto(_) => Ok(()),
      Stmt::Labeled(l) => self.check_block(&l.block),
    }
  }

  fn check_expr(&mut self, expr: &Expr) -> Result<Ty, TypeCheckError> {
    match expr {
      Expr::Int(lit) => Ok(Ty::IntLit(lit.value)),
      Expr::Bool(_) => Ok(Ty::Bool),
      Expr::Null(_) => Ok(Ty::Null),
      Expr::Var(v) => match self.env.lookup(&v.name) {
        Some(ty) => Ok(ty.clone()),
        None => err(format!("unknown variable: {}", v.name), &v.span),
      },
      Expr::Unary(u) => self.check_unary(u),
      Expr::Binary(b) => self.check_binary(b),
      Expr::Call(c) => self.check_call(c),
      Expr::Field(f) => {
        let base_ty = self.check_expr(&f.base)?;
        let Ty::Struct(name) = &base_ty else {
          return err(format!("field access requires a struct, got {base_ty}"), f.base.span());
        };
        let layout = self
          .symbols
          .struct_layout(name)
          .unwrap_or_else(|| unreachable!("struct {name} resolved without a layout"));
        match layout.field(&f.name) {
          Some(field) => resolve_type(&field.ty, self.symbols),
          None => err(format!("unknown field {} on {name}", f.name), &f.span),
        }
      }
      Expr::Index(i) => {
        let base_ty = self.check_expr(&i.base)?;
        let Ty::Ptr(inner) = &base_ty else {
          return err(format!("indexing requires a pointer base, got {base_ty}"), i.base.span());
        };
        let idx_ty = self.check_expr(&i.index)?;
        if !idx_ty.is_int() {
          return err(format!("indexing requires an integer index, got {idx_ty}"), i.index.span());
        }
        Ok((**inner).clone())
      }
      Expr::StructLit(lit) => self.check_struct_lit(lit),
      Expr::Assign(a) => {
        if !a.target.is_lvalue() {
          return err("invalid assignment target", a.target.span());
        }
        let target_ty = self.check_expr(&a.target)?;
        let value_ty = self.check_expr(&a.value)?;
        if !is_assignable(&target_ty, &value_ty) {
          return err(format!("assignment mismatch: {target_ty} = {value_ty}"), &a.span);
        }
        Ok(target_ty)
      }
    }
  }

  fn check_unary(&mut self, u: &UnaryExpr) -> Result<Ty, TypeCheckError> {
    let inner = self.check_expr(&u.expr)?;
    match u.op {
      UnOp::Neg => {
        if !inner.is_int() {
          return err(format!("unary '-' expects an integer, got {inner}"), &u.span);
        }
        match inner {
          Ty::IntLit(v) => match v.checked_neg() {
            Some(n) => Ok(Ty::IntLit(n)),
            None => err("integer literal arithmetic overflow", &u.span),
          },
          other => Ok(other),
        }
      }
      UnOp::Not => {
        if !inner.is_bool() {
          return err(format!("unary '!' expects bool, got {inner}"), &u.span);
        }
        Ok(Ty::Bool)
      }
      UnOp::Deref => match inner {
        Ty::Ptr(pointee) => Ok((*pointee).clone()),
        other => err(format!("unary '*' expects a pointer, got {other}"), &u.span),
      },
      UnOp::AddrOf => {
        if !u.expr.is_lvalue() {
          return err("address-of requires an lvalue", &u.span);
        }
        Ok(Ty::Ptr(Rc::new(inner)))
      }
    }
  }

  fn check_binary(&mut self, b: &BinaryExpr) -> Result<Ty, TypeCheckError> {
    let left = self.check_expr(&b.left)?;
    let right = self.check_expr(&b.right)?;
    match b.op {
      BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
        int_bin_result(b.op, &left, &right, &b.span)
      }
      BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
        if !left.is_int() || !right.is_int() {
          return err("relational operators require integer operands", &b.span);
        }
        Ok(Ty::Bool)
      }
      BinOp::Eq | BinOp::Ne => {
        if is_assignable(&left, &right) || is_assignable(&right, &left) {
          Ok(Ty::Bool)
        } else {
          err(format!("equality operators require compatible types, got {left} and {right}"),
            &b.span)
        }
      }
      BinOp::And | BinOp::Or => {
        if !left.is_bool() || !right.is_bool() {
          return err("logical operators require bool operands", &b.span);
        }
        Ok(Ty::Bool)
      }
    }
  }

  fn check_call(&mut self, call: &CallExpr) -> Result<Ty, TypeCheckError> {
    if self.env.lookup(&call.callee).is_some() {
      return err(format!("cannot call non-function value: {}", call.callee), &call.span);
    }
    let Some(sig) = self.symbols.function(&call.callee) else {
      return err(format!("unknown function: {}", call.callee), &call.span);
    };
    if call.args.len() != sig.params.len() {
      return err(
        format!(
          "argument count mismatch for {}: expected {}, got {}",
          sig.name,
          sig.params.len(),
          call.args.len()
        ),
        &call.span,
      );
    }
    let ret = resolve_type(&sig.ret, self.symbols)?;
    let params = sig.params.clone();
    for (arg, param) in call.args.iter().zip(&params) {
      let arg_ty = self.check_expr(arg)?;
      let param_ty = resolve_type(&param.ty, self.symbols)?;
      if !is_assignable(&param_ty, &arg_ty) {
        return err(
          format!(
            "argument type mismatch for {}: expected {param_ty}, got {arg_ty}",
            call.callee
          ),
          arg.span(),
        );
      }
    }
    Ok(ret)
  }

  fn check_struct_lit(&mut self, lit: &StructLitExpr) -> Result<Ty, TypeCheckError> {
    let Some(layout) = self.symbols.struct_layout(&lit.name) else {
      return err(format!("unknown struct: {}", lit.name), &lit.span);
    };
    let declared: Vec<(String, TypeAst)> =
      layout.fields.iter().map(|f| (f.name.clone(), f.ty.clone())).collect();

    let mut seen: Vec<&str> = Vec::with_capacity(lit.fields.len());
    for init in &lit.fields {
      if seen.contains(&init.name.as_str()) {
        return err(
          format!("duplicate field {} in struct literal {}", init.name, lit.name),
          &init.span,
        );
      }
      seen.push(&init.name);
      let Some((_, field_ty)) = declared.iter().find(|(name, _)| *name == init.name) else {
        return err(
          format!("unknown field {} in struct literal {}", init.name, lit.name),
          &init.span,
        );
      };
      let field_ty = resolve_type(field_ty, self.symbols)?;
      let value_ty = self.check_expr(&init.value)?;
      if !is_assignable(&field_ty, &value_ty) {
        return err(
          format!(
            "field type mismatch for {}.{}: expected {field_ty}, got {value_ty}",
            lit.name, init.name
          ),
          init.value.span(),
        );
      }
    }
    for (name, _) in &declared {
      if !seen.contains(&name.as_str()) {
        return err(format!("missing field {name} in struct literal {}", lit.name), &lit.span);
      }
    }
    Ok(Ty::Struct(lit.name.as_str().into()))
  }
}

/// The result type of arithmetic. Two literals fold; a literal adopts the
/// concrete side; two concrete operands must match exactly.
fn int_bin_result(op: BinOp, left: &Ty, right: &Ty, span: &Span)
  -> Result<Ty, TypeCheckError>
{
  if let (Ty::IntLit(a), Ty::IntLit(b)) = (left, right) {
    if matches!(op, BinOp::Div | BinOp::Rem) && *b == 0 {
      // Folding a division by zero would hide the trap. Resolve the
      // operands at the default integer width and leave it to runtime.
      for v in [*a, *b] {
        if !Ty::I64.fits_literal(v) {
          return err(format!("literal does not fit i64 in unfoldable '{}'", op.symbol()), span);
        }
      }
      return Ok(Ty::I64);
    }
    return Ok(Ty::IntLit(eval_int_bin(op, *a, *b, span)?));
  }
  match (left, right) {
    (Ty::IntLit(_), r) if r.is_int() => Ok(r.clone()),
    (l, Ty::IntLit(_)) if l.is_int() => Ok(l.clone()),
    (l, r) if l.is_int() && r.is_int() && l == r => Ok(l.clone()),
    _ => err("arithmetic operators require matching integer types", span),
  }
}

/// Fold two literal values. Division truncates toward zero and the
/// remainder takes the dividend's sign, matching the `idiv` the generator
/// emits. Divisors are known nonzero here.
fn eval_int_bin(op: BinOp, a: i128, b: i128, span: &Span) -> Result<i128, TypeCheckError> {
  let folded = match op {
    BinOp::Add => a.checked_add(b),
    BinOp::Sub => a.checked_sub(b),
    BinOp::Mul => a.checked_mul(b),
    BinOp::Div => a.checked_div(b),
    BinOp::Rem => a.checked_rem(b),
    _ => unreachable!("non-arithmetic operator {op:?} in literal fold"),
  };
  folded.ok_or_else(|| TypeCheckError {
    msg: "integer literal arithmetic overflow".into(),
    span: Some(span.clone()),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::Lexer;
  use crate::parser::Parser;
  use crate::symbols::build_symbols;

  fn check(src: &str) -> Result<(), TypeCheckError> {
    let tokens = Lexer::new("test.toy".into(), src).tokenize().expect("lex failed");
    let program = Parser::new(tokens).parse_program().expect("parse failed");
    let symbols = build_symbols(&program).expect("symbols failed");
    check_program(&program, &symbols)
  }

  fn check_err(src: &str) -> String {
    check(src).unwrap_err().to_string()
  }

  #[test]
  fn literal_folding_reaches_the_use_site() {
    // 1 + 2 * 3 folds to 7, which fits u8
    assert!(check("fn f() -> unit { var x: u8 = 1 + 2 * 3; }").is_ok());
    // 250 + 10 folds to 260, which does not
    assert!(check_err("fn f() -> unit { var x: u8 = 250 + 10; }").contains("type mismatch"));
  }

  #[test]
  fn division_truncates_toward_zero() {
    assert!(check("fn f() -> unit { var x: u64 = 0 - -7 / 2 - 3; }").is_ok());
    // -7 / 2 = -3 (not -4); 0 - -3 - 3 = 0, which fits u64
  }

  #[test]
  fn literal_division_by_zero_is_not_folded() {
    // the unfolded division resolves at i64, which is not assignable to u8
    assert!(check_err("fn f() -> unit { var x: u8 = 1 / 0; }").contains("type mismatch"));
    assert!(check("fn f() -> unit { var x: i64 = 1 / 0; }").is_ok());
    assert!(check("fn f() -> unit { var x: i64 = 1 % 0; }").is_ok());
  }

  #[test]
  fn mixed_literal_arithmetic_adopts_the_concrete_type() {
    assert!(check("fn f(x: u64) -> u64 { return x + 1; }").is_ok());
    assert!(check_err("fn f(x: u64, y: i64) -> u64 { return x + y; }")
      .contains("matching integer types"));
  }

  #[test]
  fn literal_fit_is_checked_per_target() {
    assert!(check("fn f() -> unit { var x: u8 = 255; }").is_ok());
    assert!(check_err("fn f() -> unit { var x: u8 = 256; }").contains("type mismatch"));
    assert!(check_err("fn f() -> unit { var x: u64 = -1; }").contains("type mismatch"));
    assert!(check("fn f() -> unit { var x: i64 = -9223372036854775808; }").is_ok());
  }

  #[test]
  fn null_needs_a_pointer_position() {
    assert!(check("fn f() -> unit { var p: *i64 = null; p = null; }").is_ok());
    assert!(check_err("fn f() -> unit { var x: i64 = null; }").contains("type mismatch"));
    assert!(check("fn f(p: *u8) -> bool { return p == null; }").is_ok());
  }

  #[test]
  fn conditions_must_be_bool() {
    assert!(check_err("fn f() -> unit { if 1 { } }").contains("must be bool"));
    assert!(check_err("fn f() -> unit { while 0 { } }").contains("must be bool"));
  }

  #[test]
  fn shadowing_rules() {
    assert!(check("fn f() -> unit { var x: i64 = 0; { var x: bool = true; } }").is_ok());
    assert!(check_err("fn f() -> unit { var x: i64 = 0; var x: bool = true; }")
      .contains("duplicate local symbol"));
  }

  #[test]
  fn calls_check_arity_and_argument_types() {
    let src = "extern fn print_int(x: i64) -> unit;\n";
    assert!(check(&format!("{src}fn f() -> unit {{ print_int(1); }}")).is_ok());
    assert!(check_err(&format!("{src}fn f() -> unit {{ print_int(); }}"))
      .contains("argument count mismatch"));
    assert!(check_err(&format!("{src}fn f() -> unit {{ print_int(true); }}"))
      .contains("argument type mismatch"));
    assert!(check_err("fn f() -> unit { g(); }").contains("unknown function"));
    assert!(check_err("fn f(g: i64) -> unit { g(); }").contains("cannot call non-function"));
  }

  #[test]
  fn defer_requires_unit_result() {
    let src = "extern fn id(x: i64) -> i64;\nfn f() -> unit { defer id(1); }";
    assert!(check_err(src).contains("defer call must return unit"));
  }

  #[test]
  fn struct_literals_require_every_field_once() {
    let s = "struct P { a: i64; b: bool; }\n";
    assert!(check(&format!("{s}fn f() -> unit {{ var p: P = P {{ a: 1, b: true }}; }}")).is_ok());
    assert!(check_err(&format!("{s}fn f() -> unit {{ var p: P = P {{ a: 1 }}; }}"))
      .contains("missing field b"));
    assert!(
      check_err(&format!("{s}fn f() -> unit {{ var p: P = P {{ a: 1, a: 2, b: true }}; }}"))
        .contains("duplicate field a")
    );
    assert!(check_err(&format!("{s}fn f() -> unit {{ var p: P = P {{ a: 1, b: true, c: 0 }}; }}"))
      .contains("unknown field c"));
    assert!(check_err(&format!("{s}fn f() -> unit {{ var p: P = P {{ a: true, b: true }}; }}"))
      .contains("field type mismatch"));
  }

  #[test]
  fn address_of_requires_an_lvalue() {
    assert!(check("fn f() -> unit { var x: i64 = 0; var p: *i64 = &x; }").is_ok());
    assert!(check_err("fn f() -> unit { var p: *i64 = &1; }").contains("requires an lvalue"));
  }

  #[test]
  fn deref_and_index_types() {
    assert!(check("fn f(p: *i64) -> i64 { return *p; }").is_ok());
    assert!(check("fn f(p: *i64) -> i64 { return p[2]; }").is_ok());
    assert!(check("fn f(p: *i64, i: u64) -> i64 { return p[i]; }").is_ok());
    assert!(check_err("fn f(x: i64) -> i64 { return *x; }").contains("expects a pointer"));
    assert!(check_err("fn f(p: *i64) -> i64 { return p[true]; }").contains("integer index"));
  }

  #[test]
  fn struct_signatures_are_rejected() {
    let s = "struct P { a: i64; }\n";
    assert!(check_err(&format!("{s}fn f() -> P {{ var p: P; return p; }}"))
      .contains("struct return types are not supported"));
    assert!(check_err(&format!("{s}fn f(p: P) -> unit {{ }}"))
      .contains("struct parameters are not supported"));
    assert!(check_err(&format!("{s}extern fn f(p: P) -> unit;"))
      .contains("struct parameters are not supported"));
    assert!(check(&format!("{s}fn f(p: *P) -> unit {{ }}")).is_ok());
  }

  #[test]
  fn returns_match_the_declared_type() {
    assert!(check_err("fn f() -> i64 { return; }").contains("return value required"));
    assert!(check_err("fn f() -> unit { return 1; }").contains("return type mismatch"));
    assert!(check("fn f() -> *u8 { return null; }").is_ok());
  }

  #[test]
  fn checking_is_pure() {
    let src = "struct P { a: i64; }\nfn f(x: i64) -> i64 { return x + 1; }";
    let tokens = Lexer::new("test.toy".into(), src).tokenize().expect("lex failed");
    let program = Parser::new(tokens).parse_program().expect("parse failed");
    let symbols = build_symbols(&program).expect("symbols failed");
    assert!(check_program(&program, &symbols).is_ok());
    assert!(check_program(&program, &symbols).is_ok());
  }
}
