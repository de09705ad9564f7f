//! Lowering to single-exit form with explicit defer argument capture.
//!
//! After this pass every function body ends in a unique labeled block that
//! performs the function's only `return`; every other `return` has become an
//! assignment to a synthesized result slot plus a `goto` to that label, and
//! the normal fall-off path reaches the label through a `goto` of its own so
//! all exits drain defer scopes the same way. Deferred calls have their
//! arguments captured into fresh locals at the registration point, which
//! pins the values regardless of later mutation.
//!
//! The pass is a fixpoint: a function whose body already ends in its own
//! exit label is returned untouched.

use crate::types::ast::{
  AssignExpr, Block, BoolLit, CallExpr, Decl, DeferCall, Expr, ExprStmt, FnDecl, GotoStmt, IfStmt,
  IntLit, LabeledBlock, NullLit, Program, ReturnStmt, Stmt, TypeAst, VarDecl, VarExpr, WhileStmt,
};
use crate::types::entity::GlobalSymbols;

/// Lower every function in the program. Struct and extern declarations pass
/// through unchanged. Runs only after a successful typecheck.
#[must_use] pub fn lower_program(program: &Program, symbols: &GlobalSymbols) -> Program {
  let decls = program
    .decls
    .iter()
    .map(|decl| match decl {
      Decl::Fn(f) => Decl::Fn(lower_fn(f, symbols)),
      other => other.clone(),
    })
    .collect();
  Program { decls }
}

fn exit_label(f: &FnDecl) -> String { format!("__fn_exit_{}", f.name) }

fn already_lowered(f: &FnDecl) -> bool {
  matches!(f.body.stmts.last(), Some(Stmt::Labeled(l)) if l.label == exit_label(f))
}

fn lower_fn(f: &FnDecl, symbols: &GlobalSymbols) -> FnDecl {
  if already_lowered(f) {
    return f.clone();
  }
  let exit = exit_label(f);
  let ret_var = (!is_unit_type(&f.ret)).then(|| format!("__ret_{}", f.name));

  let mut ctx = LowerCtx {
    symbols,
    ret_var: ret_var.clone(),
    exit: exit.clone(),
    next_defer: 0,
  };

  let mut stmts = Vec::new();
  if let Some(ret_var) = &ret_var {
    stmts.push(Stmt::Var(VarDecl {
      name: ret_var.clone(),
      ty: f.ret.clone(),
      init: Some(default_value(&f.ret)),
      span: f.span.clone(),
    }));
  }
  stmts.extend(ctx.lower_block(&f.body).stmts);
  stmts.push(Stmt::Goto(GotoStmt { label: exit.clone(), span: f.span.clone() }));

  let ret_value = ret_var.map(|name| Expr::Var(VarExpr { name, span: f.span.clone() }));
  stmts.push(Stmt::Labeled(LabeledBlock {
    label: exit,
    block: Block {
      stmts: vec![Stmt::Return(ReturnStmt { value: ret_value, span: f.span.clone() })],
      span: f.span.clone(),
    },
    span: f.span.clone(),
  }));

  FnDecl {
    name: f.name.clone(),
    params: f.params.clone(),
    ret: f.ret.clone(),
    body: Block { stmts, span: f.body.span.clone() },
    span: f.span.clone(),
  }
}

struct LowerCtx<'a> {
  symbols: &'a GlobalSymbols,
  ret_var: Option<String>,
  exit: String,
  next_defer: u32,
}

impl LowerCtx<'_> {
  fn lower_block(&mut self, block: &Block) -> Block {
    let mut stmts = Vec::with_capacity(block.stmts.len());
    for stmt in &block.stmts {
      stmts.extend(self.lower_stmt(stmt));
    }
    Block { stmts, span: block.span.clone() }
  }

  fn lower_stmt(&mut self, stmt: &Stmt) -> Vec<Stmt> {
    match stmt {
      Stmt::Block(b) => vec![Stmt::Block(self.lower_block(b))],
      Stmt::Var(_) | Stmt::Expr(_) | Stmt::Goto(_) => vec![stmt.clone()],
      Stmt::Defer(d) => self.lower_defer(d),
      Stmt::If(i) => vec![Stmt::If(IfStmt {
        cond: i.cond.clone(),
        then_block: self.lower_block(&i.then_block),
        else_block: i.else_block.as_ref().map(|b| self.lower_block(b)),
        span: i.span.clone(),
      })],
      Stmt::While(w) => vec![Stmt::While(WhileStmt {
        cond: w.cond.clone(),
        body: self.lower_block(&w.body),
        span: w.span.clone(),
      })],
      Stmt::Return(r) => {
        let mut out = Vec::with_capacity(2);
        if let Some(value) = &r.value {
          let ret_var = self.ret_var.clone()
            .unwrap_or_else(|| unreachable!("return value in unit function after typecheck"));
          out.push(Stmt::Expr(ExprStmt {
            expr: Expr::Assign(AssignExpr {
              target: Box::new(Expr::Var(VarExpr { name: ret_var, span: r.span.clone() })),
              value: Box::new(value.clone()),
              span: r.span.clone(),
            }),
            span: r.span.clone(),
          }));
        }
        out.push(Stmt::Goto(GotoStmt { label: self.exit.clone(), span: r.span.clone() }));
        out
      }
      Stmt::Labeled(l) => vec![Stmt::Labeled(LabeledBlock {
        label: l.label.clone(),
        block: self.lower_block(&l.block),
        span: l.span.clone(),
      })],
    }
  }

  /// Capture each deferred argument by value into a fresh local declared at
  /// the registration point, then defer the call on the captured locals.
  fn lower_defer(&mut self, d: &DeferCall) -> Vec<Stmt> {
    if d.call.args.is_empty() {
      return vec![Stmt::Defer(d.clone())];
    }
    let sig = self.symbols.function(&d.call.callee)
      .unwrap_or_else(|| unreachable!("deferred call to unknown function after typecheck"));
    let k = self.next_defer;
    self.next_defer += 1;

    let mut out = Vec::with_capacity(d.call.args.len() + 1);
    let mut args = Vec::with_capacity(d.call.args.len());
    for (i, (arg, param)) in d.call.args.iter().zip(&sig.params).enumerate() {
      let name = format!("__defer{k}_arg{i}");
      out.push(Stmt::Var(VarDecl {
        name: name.clone(),
        ty: param.ty.clone(),
        init: Some(arg.clone()),
        span: arg.span().clone(),
      }));
      args.push(Expr::Var(VarExpr { name, span: arg.span().clone() }));
    }
    out.push(Stmt::Defer(DeferCall {
      call: CallExpr { callee: d.call.callee.clone(), args, span: d.call.span.clone() },
      span: d.span.clone(),
    }));
    out
  }
}

/// The default value a synthesized return slot starts from: zero for
/// integers, `false` for bool, `null` for pointers. Struct returns never
/// reach lowering; the checker rejects them.
fn default_value(ty: &TypeAst) -> Expr {
  let span = ty.span().clone();
  match ty {
    TypeAst::Ptr { .. } => Expr::Null(NullLit { span }),
    TypeAst::Named { name, .. } => match name.as_str() {
      "i64" | "u64" | "u8" => Expr::Int(IntLit { value: 0, span }),
      "bool" => Expr::Bool(BoolLit { value: false, span }),
      _ => unreachable!("no default value for return type {name}"),
    },
  }
}

fn is_unit_type(ty: &TypeAst) -> bool {
  matches!(ty, TypeAst::Named { name, .. } if name == "unit")
}
