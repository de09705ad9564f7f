//! The abstract syntax tree produced by the parser.
//!
//! Everything here is a closed sum carrying a [`Span`]. The lowering pass
//! reuses the same dialect and only ever adds the [`Stmt::Goto`] and
//! [`Stmt::Labeled`] statement kinds, which the parser never produces.

use crate::types::Span;

/// A parsed compilation unit: the top level declarations in source order.
#[derive(Clone, Debug)]
pub struct Program {
  pub decls: Vec<Decl>,
}

/// A top level declaration.
#[derive(Clone, Debug)]
pub enum Decl {
  /// `struct NAME { field: TYPE; ... }`
  Struct(StructDecl),
  /// `fn NAME(params) -> TYPE { ... }`
  Fn(FnDecl),
  /// `extern fn NAME(params) -> TYPE;`
  ExternFn(ExternFnDecl),
}

#[derive(Clone, Debug)]
pub struct StructDecl {
  pub name: String,
  pub fields: Vec<StructField>,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct StructField {
  pub name: String,
  pub ty: TypeAst,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Param {
  pub name: String,
  pub ty: TypeAst,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct FnDecl {
  pub name: String,
  pub params: Vec<Param>,
  pub ret: TypeAst,
  pub body: Block,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ExternFnDecl {
  pub name: String,
  pub params: Vec<Param>,
  pub ret: TypeAst,
  pub span: Span,
}

/// Type syntax: a bare name or a pointer to another type.
#[derive(Clone, Debug)]
pub enum TypeAst {
  Named { name: String, span: Span },
  Ptr { inner: Box<TypeAst>, span: Span },
}

impl TypeAst {
  #[must_use] pub fn span(&self) -> &Span {
    match self {
      TypeAst::Named { span, .. } | TypeAst::Ptr { span, .. } => span,
    }
  }
}

/// A brace-delimited statement sequence with its own lexical scope.
#[derive(Clone, Debug)]
pub struct Block {
  pub stmts: Vec<Stmt>,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub enum Stmt {
  Block(Block),
  Var(VarDecl),
  Defer(DeferCall),
  If(IfStmt),
  While(WhileStmt),
  Return(ReturnStmt),
  Expr(ExprStmt),
  /// Jump to a function-level label. Produced only by lowering.
  Goto(GotoStmt),
  /// A labeled block. Produced only by lowering.
  Labeled(LabeledBlock),
}

/// `var NAME: TYPE [= EXPR];` where a missing initializer leaves the slot
/// uninitialized.
#[derive(Clone, Debug)]
pub struct VarDecl {
  pub name: String,
  pub ty: TypeAst,
  pub init: Option<Expr>,
  pub span: Span,
}

/// `defer CALL;`: the call runs when the enclosing block exits.
#[derive(Clone, Debug)]
pub struct DeferCall {
  pub call: CallExpr,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct IfStmt {
  pub cond: Expr,
  pub then_block: Block,
  pub else_block: Option<Block>,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct WhileStmt {
  pub cond: Expr,
  pub body: Block,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ReturnStmt {
  pub value: Option<Expr>,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ExprStmt {
  pub expr: Expr,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct GotoStmt {
  pub label: String,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct LabeledBlock {
  pub label: String,
  pub block: Block,
  pub span: Span,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
  /// `-e`
  Neg,
  /// `!e`
  Not,
  /// `*e`
  Deref,
  /// `&e`
  AddrOf,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
  And,
  Or,
}

impl BinOp {
  /// The surface syntax of the operator, for diagnostics.
  #[must_use] pub fn symbol(self) -> &'static str {
    match self {
      BinOp::Add => "+",
      BinOp::Sub => "-",
      BinOp::Mul => "*",
      BinOp::Div => "/",
      BinOp::Rem => "%",
      BinOp::Eq => "==",
      BinOp::Ne => "!=",
      BinOp::Lt => "<",
      BinOp::Le => "<=",
      BinOp::Gt => ">",
      BinOp::Ge => ">=",
      BinOp::And => "&&",
      BinOp::Or => "||",
    }
  }
}

#[derive(Clone, Debug)]
pub enum Expr {
  Int(IntLit),
  Bool(BoolLit),
  Null(NullLit),
  Var(VarExpr),
  Unary(UnaryExpr),
  Binary(BinaryExpr),
  Call(CallExpr),
  Field(FieldExpr),
  Index(IndexExpr),
  StructLit(StructLitExpr),
  Assign(AssignExpr),
}

/// A decimal integer literal. The value is kept as an `i128` so the
/// mathematical value survives constant folding in the checker; source
/// literals themselves are never negative.
#[derive(Clone, Debug)]
pub struct IntLit {
  pub value: i128,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct BoolLit {
  pub value: bool,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct NullLit {
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct VarExpr {
  pub name: String,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct UnaryExpr {
  pub op: UnOp,
  pub expr: Box<Expr>,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct BinaryExpr {
  pub op: BinOp,
  pub left: Box<Expr>,
  pub right: Box<Expr>,
  pub span: Span,
}

/// A call. Callees are always bare function names; the parser rejects
/// anything else since functions are not values in this language.
#[derive(Clone, Debug)]
pub struct CallExpr {
  pub callee: String,
  pub args: Vec<Expr>,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct FieldExpr {
  pub base: Box<Expr>,
  pub name: String,
  pub span: Span,
}

/// `base[index]` where `base` is a pointer; equivalent to
/// `*(base + index * sizeof(pointee))`.
#[derive(Clone, Debug)]
pub struct IndexExpr {
  pub base: Box<Expr>,
  pub index: Box<Expr>,
  pub span: Span,
}

/// `Name { field: value, ... }`
#[derive(Clone, Debug)]
pub struct StructLitExpr {
  pub name: String,
  pub fields: Vec<FieldInit>,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct FieldInit {
  pub name: String,
  pub value: Expr,
  pub span: Span,
}

#[derive(Clone, Debug)]
pub struct AssignExpr {
  pub target: Box<Expr>,
  pub value: Box<Expr>,
  pub span: Span,
}

impl Expr {
  #[must_use] pub fn span(&self) -> &Span {
    match self {
      Expr::Int(e) => &e.span,
      Expr::Bool(e) => &e.span,
      Expr::Null(e) => &e.span,
      Expr::Var(e) => &e.span,
      Expr::Unary(e) => &e.span,
      Expr::Binary(e) => &e.span,
      Expr::Call(e) => &e.span,
      Expr::Field(e) => &e.span,
      Expr::Index(e) => &e.span,
      Expr::StructLit(e) => &e.span,
      Expr::Assign(e) => &e.span,
    }
  }

  /// Whether this expression designates a storage location: a variable, a
  /// field access, an index, or a pointer dereference.
  #[must_use] pub fn is_lvalue(&self) -> bool {
    match self {
      Expr::Var(_) | Expr::Field(_) | Expr::Index(_) => true,
      Expr::Unary(u) => u.op == UnOp::Deref,
      _ => false,
    }
  }
}

impl Stmt {
  #[must_use] pub fn span(&self) -> &Span {
    match self {
      Stmt::Block(b) => &b.span,
      Stmt::Var(s) => &s.span,
      Stmt::Defer(s) => &s.span,
      Stmt::If(s) => &s.span,
      Stmt::While(s) => &s.span,
      Stmt::Return(s) => &s.span,
      Stmt::Expr(s) => &s.span,
      Stmt::Goto(s) => &s.span,
      Stmt::Labeled(s) => &s.span,
    }
  }
}
