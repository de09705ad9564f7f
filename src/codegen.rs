//! x86-64 code generation: Intel-syntax GNU assembler text from the lowered
//! program.
//!
//! The generator is purely syntactic. It consults the symbol table for sizes
//! and offsets and resolves just enough types to address lvalue chains, but
//! performs no inference of its own; everything else was settled by the
//! checker and the lowering pass. Every expression leaves its result in
//! `rax`, zero-extended for sub-word loads. Deferred calls are replayed at
//! emission time from a stack of per-block registration lists: a normal
//! block exit drains one level in reverse, a `goto` drains every level from
//! innermost to outermost before jumping.

use std::collections::HashMap;
use std::rc::Rc;

use arrayvec::ArrayVec;
use if_chain::if_chain;
use smallvec::SmallVec;
use thiserror::Error;

use crate::symbols::{align_up, type_size_align};
use crate::types::Span;
use crate::types::ast::{
  AssignExpr, BinOp, Block, CallExpr, Decl, Expr, FnDecl, Program, Stmt, StructLitExpr, TypeAst,
  UnOp,
};
use crate::types::entity::GlobalSymbols;

/// System V integer argument registers, in parameter order, with their
/// 32-bit and 8-bit aliases for width-correct stores.
const ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
const ARG_REGS32: [&str; 6] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];
const ARG_REGS8: [&str; 6] = ["dil", "sil", "dl", "cl", "r8b", "r9b"];

/// A code generation error. Locations are best effort.
#[derive(Clone, Debug, Error)]
#[error("{msg}{}", crate::opt_span(.span))]
pub struct CodegenError {
  pub msg: String,
  pub span: Option<Span>,
}

fn err<T>(msg: impl Into<String>, span: &Span) -> Result<T, CodegenError> {
  Err(CodegenError { msg: msg.into(), span: Some(span.clone()) })
}

/// Emit assembly for a lowered program. `sources` maps file paths to their
/// full text for the per-statement source annotations; missing files
/// degrade to bare location comments.
pub fn emit_program(
  program: &Program,
  symbols: &GlobalSymbols,
  sources: &HashMap<Rc<str>, String>,
) -> Result<String, CodegenError> {
  let mut ctx = Codegen {
    symbols,
    sources,
    out: String::new(),
    label_id: 0,
    defer_stack: Vec::new(),
    last_loc: None,
  };
  ctx.line(".intel_syntax noprefix");
  ctx.line(".text");
  ctx.line(".section .note.GNU-stack,\"\",@progbits");
  ctx.line(".text");
  for decl in &program.decls {
    if let Decl::Fn(f) = decl {
      ctx.emit_fn(f)?;
    }
  }
  Ok(ctx.out)
}

#[derive(Clone, Debug)]
struct LocalInfo {
  ty: TypeAst,
  /// Positive byte distance below `rbp`; the slot is `[rbp - offset]`.
  offset: u32,
}

/// Scoped name-to-slot map. Offsets grow monotonically; sibling scopes do
/// not reuse slots, exactly as the frame sizer counts them.
struct LocalEnv<'a> {
  symbols: &'a GlobalSymbols,
  scopes: Vec<HashMap<String, LocalInfo>>,
  offset: u32,
}

impl<'a> LocalEnv<'a> {
  fn new(symbols: &'a GlobalSymbols) -> Self {
    LocalEnv { symbols, scopes: Vec::new(), offset: 0 }
  }

  fn push(&mut self) { self.scopes.push(HashMap::new()) }

  fn pop(&mut self) { self.scopes.pop(); }

  fn define(&mut self, name: &str, ty: &TypeAst, span: &Span) -> Result<LocalInfo, CodegenError> {
    let (size, align) = size_align(ty, self.symbols, span)?;
    self.offset = align_up(self.offset + size, align);
    let info = LocalInfo { ty: ty.clone(), offset: self.offset };
    self.scopes.last_mut().expect("no active scope").insert(name.to_owned(), info.clone());
    Ok(info)
  }

  fn lookup(&self, name: &str, span: &Span) -> Result<&LocalInfo, CodegenError> {
    for scope in self.scopes.iter().rev() {
      if let Some(info) = scope.get(name) {
        return Ok(info);
      }
    }
    err(format!("unknown local: {name}"), span)
  }
}

fn size_align(
  ty: &TypeAst, symbols: &GlobalSymbols, span: &Span,
) -> Result<(u32, u32), CodegenError> {
  type_size_align(ty, symbols).ok_or_else(|| CodegenError {
    msg: "type has no layout".into(),
    span: Some(span.clone()),
  })
}

/// Walks a function to total the frame bytes of its parameters and every
/// `var` declaration, nested blocks included. Lowering has already turned
/// defer captures and the result slot into ordinary `var`s, so this walk
/// sees everything the emitter will define, in the same order.
struct FrameSizer<'a> {
  symbols: &'a GlobalSymbols,
  cursor: u32,
}

impl<'a> FrameSizer<'a> {
  fn frame_size(f: &FnDecl, symbols: &'a GlobalSymbols) -> Result<u32, CodegenError> {
    let mut sizer = FrameSizer { symbols, cursor: 0 };
    for param in &f.params {
      sizer.allocate(&param.ty, &param.span)?;
    }
    sizer.visit_block(&f.body)?;
    Ok(align_up(sizer.cursor, 16))
  }

  fn allocate(&mut self, ty: &TypeAst, span: &Span) -> Result<(), CodegenError> {
    let (size, align) = size_align(ty, self.symbols, span)?;
    self.cursor = align_up(self.cursor + size, align);
    Ok(())
  }

  fn visit_block(&mut self, block: &Block) -> Result<(), CodegenError> {
    block.stmts.iter().try_for_each(|stmt| self.visit_stmt(stmt))
  }

  fn visit_stmt(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
    match stmt {
      Stmt::Block(b) => self.visit_block(b),
      Stmt::Var(v) => self.allocate(&v.ty, &v.span),
      Stmt::If(i) => {
        self.visit_block(&i.then_block)?;
        i.else_block.as_ref().map_or(Ok(()), |b| self.visit_block(b))
      }
      Stmt::While(w) => self.visit_block(&w.body),
      Stmt::Labeled(l) => self.visit_block(&l.block),
      Stmt::Defer(_) | Stmt::Return(_) | Stmt::Expr(_) | Stmt::Goto(_) => Ok(()),
    }
  }
}

struct Codegen<'a> {
  symbols: &'a GlobalSymbols,
  sources: &'a HashMap<Rc<str>, String>,
  out: String,
  label_id: u32,
  /// One registration list per open block, innermost last.
  defer_stack: Vec<SmallVec<[&'a CallExpr; 2]>>,
  last_loc: Option<(Rc<str>, u32)>,
}

impl<'a> Codegen<'a> {
  fn line(&mut self, s: impl AsRef<str>) {
    self.out.push_str(s.as_ref());
    self.out.push('\n');
  }

  fn new_label(&mut self, prefix: &str) -> String {
    let label = format!(".L{prefix}_{}", self.label_id);
    self.label_id += 1;
    label
  }

  fn emit_fn(&mut self, f: &'a FnDecl) -> Result<(), CodegenError> {
    let frame = FrameSizer::frame_size(f, self.symbols)?;
    self.line("");
    self.line(format!(".globl {}", f.name));
    self.line(format!("{}:", f.name));
    self.line("  push rbp");
    self.line("  mov rbp, rsp");
    if frame > 0 {
      self.line(format!("  sub rsp, {frame}"));
    }

    let mut env = LocalEnv::new(self.symbols);
    env.push();
    self.defer_stack.clear();
    self.defer_stack.push(SmallVec::new());

    if f.params.len() > ARG_REGS.len() {
      return err(
        format!("more than {} parameters are not supported", ARG_REGS.len()),
        &f.span,
      );
    }
    for (i, param) in f.params.iter().enumerate() {
      let info = env.define(&param.name, &param.ty, &param.span)?;
      self.store_param(i, &info, &param.span)?;
    }

    self.emit_block(&f.body, &mut env)?;

    self.defer_stack.pop();
    env.pop();
    Ok(())
  }

  /// Spill one parameter from its System V register with a width-correct
  /// move: 1-byte types through the 8-bit alias, 4-byte through the 32-bit
  /// alias, everything else through the full register.
  fn store_param(&mut self, i: usize, info: &LocalInfo, span: &Span) -> Result<(), CodegenError> {
    let (size, _) = size_align(&info.ty, self.symbols, span)?;
    let offset = info.offset;
    match size {
      0 => {}
      1 => self.line(format!("  mov byte ptr [rbp - {offset}], {}", ARG_REGS8[i])),
      4 => self.line(format!("  mov dword ptr [rbp - {offset}], {}", ARG_REGS32[i])),
      _ => self.line(format!("  mov qword ptr [rbp - {offset}], {}", ARG_REGS[i])),
    }
    Ok(())
  }

  /// Emit one block. Returns whether its last statement already transferred
  /// control, in which case the dead normal-exit defer replay is skipped.
  fn emit_block(&mut self, block: &'a Block, env: &mut LocalEnv<'a>) -> Result<bool, CodegenError> {
    env.push();
    self.defer_stack.push(SmallVec::new());
    let mut terminated = false;
    for stmt in &block.stmts {
      terminated = self.emit_stmt(stmt, env)?;
    }
    if !terminated {
      let pending: SmallVec<[&'a CallExpr; 2]> = self
        .defer_stack
        .last()
        .map(|scope| scope.iter().rev().copied().collect())
        .unwrap_or_default();
      for call in pending {
        self.emit_call(call, env)?;
      }
    }
    self.defer_stack.pop();
    env.pop();
    Ok(terminated)
  }

  fn emit_stmt(&mut self, stmt: &'a Stmt, env: &mut LocalEnv<'a>) -> Result<bool, CodegenError> {
    match stmt {
      Stmt::Block(b) => self.emit_block(b, env),
      Stmt::Var(v) => {
        self.emit_loc(&v.span);
        let info = env.define(&v.name, &v.ty, &v.span)?;
        if let Some(init) = &v.init {
          let (size, _) = size_align(&v.ty, self.symbols, &v.span)?;
          if let Expr::StructLit(lit) = init {
            self.line(format!("  lea rax, [rbp - {}]", info.offset));
            self.emit_struct_lit(lit, env)?;
          } else if self.is_struct(&v.ty) {
            self.emit_addr(init, env)?;
            self.line(format!("  lea rcx, [rbp - {}]", info.offset));
            self.emit_memcpy(size);
          } else {
            self.emit_expr(init, env)?;
            let addr = format!("rbp - {}", info.offset);
            self.emit_store(&addr, size);
          }
        }
        Ok(false)
      }
      Stmt::Defer(d) => {
        self.emit_loc(&d.span);
        self.defer_stack.last_mut().expect("no defer scope").push(&d.call);
        Ok(false)
      }
      Stmt::If(i) => {
        self.emit_loc(&i.span);
        let else_label = self.new_label("else");
        let end_label = self.new_label("endif");
        self.emit_expr(&i.cond, env)?;
        self.line("  cmp rax, 0");
        self.line(format!("  je {else_label}"));
        self.emit_block(&i.then_block, env)?;
        self.line(format!("  jmp {end_label}"));
        self.line(format!("{else_label}:"));
        if let Some(else_block) = &i.else_block {
          self.emit_block(else_block, env)?;
        }
        self.line(format!("{end_label}:"));
        Ok(false)
      }
      Stmt::While(w) => {
        self.emit_loc(&w.span);
        let start_label = self.new_label("while");
        let end_label = self.new_label("endwhile");
        self.line(format!("{start_label}:"));
        self.emit_expr(&w.cond, env)?;
        self.line("  cmp rax, 0");
        self.line(format!("  je {end_label}"));
        self.emit_block(&w.body, env)?;
        self.line(format!("  jmp {start_label}"));
        self.line(format!("{end_label}:"));
        Ok(false)
      }
      Stmt::Expr(e) => {
        self.emit_loc(&e.span);
        self.emit_expr(&e.expr, env)?;
        Ok(false)
      }
      Stmt::Goto(g) => {
        self.emit_loc(&g.span);
        // non-local exit: drain every open scope, innermost first, without
        // popping; the enclosing normal exits still own the pops
        let pending: Vec<&'a CallExpr> =
          self.defer_stack.iter().rev().flat_map(|scope| scope.iter().rev().copied()).collect();
        for call in pending {
          self.emit_call(call, env)?;
        }
        self.line(format!("  jmp {}", g.label));
        Ok(true)
      }
      Stmt::Labeled(l) => {
        self.emit_loc(&l.span);
        self.line(format!("{}:", l.label));
        self.emit_block(&l.block, env)
      }
      Stmt::Return(r) => {
        self.emit_loc(&r.span);
        if let Some(value) = &r.value {
          self.emit_expr(value, env)?;
        }
        self.line("  mov rsp, rbp");
        self.line("  pop rbp");
        self.line("  ret");
        Ok(true)
      }
    }
  }

  fn emit_expr(&mut self, expr: &Expr, env: &LocalEnv) -> Result<(), CodegenError> {
    match expr {
      Expr::Int(lit) => self.line(format!("  mov rax, {}", lit.value)),
      Expr::Bool(lit) => self.line(format!("  mov rax, {}", i32::from(lit.value))),
      Expr::Null(_) => self.line("  xor rax, rax"),
      Expr::Var(v) => {
        let info = env.lookup(&v.name, &v.span)?.clone();
        let (size, _) = size_align(&info.ty, self.symbols, &v.span)?;
        let addr = format!("rbp - {}", info.offset);
        self.emit_load(&addr, size);
      }
      Expr::Unary(u) => match u.op {
        UnOp::Neg => {
          self.emit_expr(&u.expr, env)?;
          self.line("  neg rax");
        }
        UnOp::Not => {
          self.emit_expr(&u.expr, env)?;
          self.line("  cmp rax, 0");
          self.line("  sete al");
          self.line("  movzx rax, al");
        }
        UnOp::Deref => {
          self.emit_expr(&u.expr, env)?;
          let width = self.lvalue_width(expr, env);
          self.emit_load("rax", width);
        }
        UnOp::AddrOf => self.emit_addr(&u.expr, env)?,
      },
      Expr::Binary(b) => match b.op {
        BinOp::And | BinOp::Or => self.emit_short_circuit(b.op, &b.left, &b.right, env)?,
        _ => {
          self.emit_expr(&b.left, env)?;
          self.line("  push rax");
          self.emit_expr(&b.right, env)?;
          self.line("  pop rcx");
          self.emit_binop(b.op, &b.span)?;
        }
      },
      Expr::Call(c) => self.emit_call(c, env)?,
      Expr::Field(_) | Expr::Index(_) => {
        let width = self.lvalue_width(expr, env);
        self.emit_addr(expr, env)?;
        self.emit_load("rax", width);
      }
      Expr::StructLit(lit) => {
        return err("struct literal requires a variable or field destination", &lit.span);
      }
      Expr::Assign(a) => self.emit_assign(a, env)?,
    }
    Ok(())
  }

  /// Left operand in `rcx`, right in `rax`; result back in `rax`.
  fn emit_binop(&mut self, op: BinOp, span: &Span) -> Result<(), CodegenError> {
    match op {
      BinOp::Add => {
        self.line("  add rcx, rax");
        self.line("  mov rax, rcx");
      }
      BinOp::Sub => {
        self.line("  sub rcx, rax");
        self.line("  mov rax, rcx");
      }
      BinOp::Mul => {
        self.line("  imul rcx, rax");
        self.line("  mov rax, rcx");
      }
      BinOp::Div | BinOp::Rem => {
        self.line("  mov r8, rax");
        self.line("  mov rax, rcx");
        self.line("  cqo");
        self.line("  idiv r8");
        if op == BinOp::Rem {
          self.line("  mov rax, rdx");
        }
      }
      BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
        let cc = match op {
          BinOp::Eq => "e",
          BinOp::Ne => "ne",
          BinOp::Lt => "l",
          BinOp::Le => "le",
          BinOp::Gt => "g",
          _ => "ge",
        };
        self.line("  cmp rcx, rax");
        self.line(format!("  set{cc} al"));
        self.line("  movzx rax, al");
      }
      BinOp::And | BinOp::Or => return err("short-circuit operator in plain binop", span),
    }
    Ok(())
  }

  /// `&&`/`||` with fresh sink labels; the right operand is canonicalized
  /// to 0/1 so the whole expression always yields exactly 0 or 1.
  fn emit_short_circuit(
    &mut self, op: BinOp, left: &Expr, right: &Expr, env: &LocalEnv,
  ) -> Result<(), CodegenError> {
    if op == BinOp::And {
      let false_label = self.new_label("and_false");
      let end_label = self.new_label("and_end");
      self.emit_expr(left, env)?;
      self.line("  cmp rax, 0");
      self.line(format!("  je {false_label}"));
      self.emit_expr(right, env)?;
      self.line("  cmp rax, 0");
      self.line("  setne al");
      self.line("  movzx rax, al");
      self.line(format!("  jmp {end_label}"));
      self.line(format!("{false_label}:"));
      self.line("  xor rax, rax");
      self.line(format!("{end_label}:"));
    } else {
      let true_label = self.new_label("or_true");
      let end_label = self.new_label("or_end");
      self.emit_expr(left, env)?;
      self.line("  cmp rax, 0");
      self.line(format!("  jne {true_label}"));
      self.emit_expr(right, env)?;
      self.line("  cmp rax, 0");
      self.line("  setne al");
      self.line("  movzx rax, al");
      self.line(format!("  jmp {end_label}"));
      self.line(format!("{true_label}:"));
      self.line("  mov rax, 1");
      self.line(format!("{end_label}:"));
    }
    Ok(())
  }

  /// Arguments are evaluated left to right and pushed; once all are on the
  /// stack they pop into the System V registers in reverse. The result is
  /// whatever the callee left in `rax`.
  fn emit_call(&mut self, call: &CallExpr, env: &LocalEnv) -> Result<(), CodegenError> {
    let mut regs = ArrayVec::<&'static str, 6>::new();
    for _ in &call.args {
      let Some(&reg) = ARG_REGS.get(regs.len()) else {
        return err(
          format!("more than {} arguments are not supported", ARG_REGS.len()),
          &call.span,
        );
      };
      regs.push(reg);
    }
    for arg in &call.args {
      self.emit_expr(arg, env)?;
      self.line("  push rax");
    }
    for &reg in regs.iter().rev() {
      self.line(format!("  pop {reg}"));
    }
    self.line(format!("  call {}", call.callee));
    Ok(())
  }

  fn emit_assign(&mut self, a: &AssignExpr, env: &LocalEnv) -> Result<(), CodegenError> {
    let target_ty = self.lvalue_type(&a.target, env)?;
    let (size, _) = size_align(&target_ty, self.symbols, &a.span)?;

    if let Expr::StructLit(lit) = &*a.value {
      self.emit_addr(&a.target, env)?;
      return self.emit_struct_lit(lit, env);
    }
    if self.is_struct(&target_ty) {
      self.emit_addr(&a.target, env)?;
      self.line("  push rax");
      self.emit_addr(&a.value, env)?;
      self.line("  pop rcx");
      self.emit_memcpy(size);
      return Ok(());
    }
    self.emit_addr(&a.target, env)?;
    self.line("  push rax");
    self.emit_expr(&a.value, env)?;
    self.line("  pop rcx");
    self.emit_store("rcx", size);
    Ok(())
  }

  /// Emit the byte address of an lvalue into `rax`.
  fn emit_addr(&mut self, expr: &Expr, env: &LocalEnv) -> Result<(), CodegenError> {
    match expr {
      Expr::Var(v) => {
        let offset = env.lookup(&v.name, &v.span)?.offset;
        self.line(format!("  lea rax, [rbp - {offset}]"));
        Ok(())
      }
      Expr::Unary(u) if u.op == UnOp::Deref => self.emit_expr(&u.expr, env),
      Expr::Field(f) => {
        let name = self.base_struct_name(&f.base, env)?;
        let layout = self
          .symbols
          .struct_layout(&name)
          .unwrap_or_else(|| unreachable!("struct {name} has no layout"));
        let Some(field) = layout.field(&f.name) else {
          return err(format!("unknown field {} on {name}", f.name), &f.span);
        };
        let offset = field.offset;
        self.emit_addr(&f.base, env)?;
        if offset != 0 {
          self.line(format!("  add rax, {offset}"));
        }
        Ok(())
      }
      Expr::Index(i) => {
        let elem_ty = self.lvalue_type(expr, env)?;
        let (elem_size, _) = size_align(&elem_ty, self.symbols, &i.span)?;
        self.emit_expr(&i.base, env)?;
        self.line("  push rax");
        self.emit_expr(&i.index, env)?;
        self.line("  pop rcx");
        if elem_size != 1 {
          self.line(format!("  imul rax, {elem_size}"));
        }
        self.line("  add rax, rcx");
        Ok(())
      }
      _ => err("expression is not addressable", expr.span()),
    }
  }

  /// Store every field of a struct literal through the destination address
  /// currently in `rax`. The address is kept on the stack across field
  /// evaluations because they may clobber any register.
  fn emit_struct_lit(&mut self, lit: &StructLitExpr, env: &LocalEnv) -> Result<(), CodegenError> {
    let Some(layout) = self.symbols.struct_layout(&lit.name) else {
      return err(format!("unknown struct: {}", lit.name), &lit.span);
    };
    let mut plan = Vec::with_capacity(lit.fields.len());
    for init in &lit.fields {
      let Some(field) = layout.field(&init.name) else {
        return err(
          format!("unknown field {} in struct literal {}", init.name, lit.name),
          &init.span,
        );
      };
      plan.push((init, field.offset, field.size, field.ty.clone()));
    }

    self.line("  push rax");
    for (init, offset, size, field_ty) in plan {
      if let Expr::StructLit(inner) = &init.value {
        self.line("  pop rcx");
        self.line("  push rcx");
        self.line(format!("  lea rax, [rcx + {offset}]"));
        self.emit_struct_lit(inner, env)?;
      } else if self.is_struct(&field_ty) {
        self.emit_addr(&init.value, env)?;
        self.line("  pop rcx");
        self.line("  push rcx");
        self.line(format!("  add rcx, {offset}"));
        self.emit_memcpy(size);
      } else {
        self.emit_expr(&init.value, env)?;
        self.line("  pop rcx");
        self.line("  push rcx");
        let addr = format!("rcx + {offset}");
        self.emit_store(&addr, size);
      }
    }
    self.line("  pop rcx");
    Ok(())
  }

  /// Copy `size` bytes from `[rax]` to `[rcx]` in 8/4/1-byte chunks.
  fn emit_memcpy(&mut self, size: u32) {
    let mut off = 0;
    while off + 8 <= size {
      self.line(format!("  mov rdx, qword ptr [rax + {off}]"));
      self.line(format!("  mov qword ptr [rcx + {off}], rdx"));
      off += 8;
    }
    while off + 4 <= size {
      self.line(format!("  mov edx, dword ptr [rax + {off}]"));
      self.line(format!("  mov dword ptr [rcx + {off}], edx"));
      off += 4;
    }
    while off < size {
      self.line(format!("  mov dl, byte ptr [rax + {off}]"));
      self.line(format!("  mov byte ptr [rcx + {off}], dl"));
      off += 1;
    }
  }

  fn emit_load(&mut self, addr: &str, width: u32) {
    match width {
      0 => {}
      1 => self.line(format!("  movzx rax, byte ptr [{addr}]")),
      4 => self.line(format!("  mov eax, dword ptr [{addr}]")),
      _ => self.line(format!("  mov rax, qword ptr [{addr}]")),
    }
  }

  /// Store `rax` (or a sub-register of it) to `[addr]` with the given width.
  fn emit_store(&mut self, addr: &str, width: u32) {
    match width {
      0 => {}
      1 => self.line(format!("  mov byte ptr [{addr}], al")),
      4 => self.line(format!("  mov dword ptr [{addr}], eax")),
      _ => self.line(format!("  mov qword ptr [{addr}], rax")),
    }
  }

  fn is_struct(&self, ty: &TypeAst) -> bool {
    matches!(ty, TypeAst::Named { name, .. } if self.symbols.structs.contains_key(name))
  }

  /// The load width of an lvalue chain, defaulting to a full word when the
  /// chain cannot be resolved syntactically.
  fn lvalue_width(&self, expr: &Expr, env: &LocalEnv) -> u32 {
    self
      .lvalue_type(expr, env)
      .ok()
      .and_then(|ty| type_size_align(&ty, self.symbols))
      .map_or(8, |(size, _)| size)
  }

  /// The declared type of an lvalue, resolved through variable lookups and
  /// field/index/deref chains.
  fn lvalue_type(&self, expr: &Expr, env: &LocalEnv) -> Result<TypeAst, CodegenError> {
    match expr {
      Expr::Var(v) => Ok(env.lookup(&v.name, &v.span)?.ty.clone()),
      Expr::Field(f) => {
        let name = self.base_struct_name(&f.base, env)?;
        let layout = self
          .symbols
          .struct_layout(&name)
          .unwrap_or_else(|| unreachable!("struct {name} has no layout"));
        match layout.field(&f.name) {
          Some(field) => Ok(field.ty.clone()),
          None => err(format!("unknown field {} on {name}", f.name), &f.span),
        }
      }
      Expr::Index(i) => match self.expr_type(&i.base, env)? {
        TypeAst::Ptr { inner, .. } => Ok(*inner),
        _ => err("indexing requires a pointer base", i.base.span()),
      },
      Expr::Unary(u) if u.op == UnOp::Deref => match self.expr_type(&u.expr, env)? {
        TypeAst::Ptr { inner, .. } => Ok(*inner),
        _ => err("dereference requires a pointer", u.expr.span()),
      },
      _ => err("cannot determine lvalue type", expr.span()),
    }
  }

  /// Expression typing is limited to the chains the generator must address;
  /// anything else is unavailable by design.
  fn expr_type(&self, expr: &Expr, env: &LocalEnv) -> Result<TypeAst, CodegenError> {
    match expr {
      Expr::Var(v) => Ok(env.lookup(&v.name, &v.span)?.ty.clone()),
      Expr::Field(_) | Expr::Index(_) => self.lvalue_type(expr, env),
      Expr::Unary(u) if u.op == UnOp::Deref => self.lvalue_type(expr, env),
      _ => err("expression type unavailable", expr.span()),
    }
  }

  fn base_struct_name(&self, base: &Expr, env: &LocalEnv) -> Result<String, CodegenError> {
    let ty = self.expr_type(base, env)?;
    if_chain! {
      if let TypeAst::Named { name, .. } = &ty;
      if self.symbols.structs.contains_key(name);
      then { return Ok(name.clone()) }
    }
    err("struct base must resolve to a struct type", base.span())
  }

  /// Emit a source comment when the (file, line) of this statement differs
  /// from the previous one. Unavailable source text degrades silently to
  /// the bare location.
  fn emit_loc(&mut self, span: &Span) {
    if self.last_loc.as_ref().is_some_and(|(f, l)| *f == span.file && *l == span.line) {
      return;
    }
    self.last_loc = Some((span.file.clone(), span.line));
    match self.source_line(&span.file, span.line) {
      Some(text) => {
        let text = text.trim_end().to_owned();
        self.line(format!("  # {}:{}:{} | {text}", span.file, span.line, span.col));
      }
      None => self.line(format!("  # {}:{}:{}", span.file, span.line, span.col)),
    }
  }

  fn source_line(&self, file: &str, line: u32) -> Option<&str> {
    let text = self.sources.get(file)?;
    let idx = line.checked_sub(1)?;
    text.lines().nth(idx as usize)
  }
}
