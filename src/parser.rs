//! The recursive-descent parser.
//!
//! Precedence, low to high: assignment (right associative) → `||` → `&&` →
//! equality → relational → additive → multiplicative → unary → postfix.
//! Struct literals `Name { .. }` are forbidden directly in `if`/`while`
//! condition position so that `if x {` keeps parsing as a condition followed
//! by a block; parenthesizing restores them.

use std::mem;

use thiserror::Error;

use crate::lexer::{Token, TokenKind};
use crate::types::Span;
use crate::types::ast::{
  AssignExpr, BinOp, BinaryExpr, Block, BoolLit, CallExpr, Decl, DeferCall, Expr, ExprStmt,
  ExternFnDecl, FieldExpr, FieldInit, FnDecl, IfStmt, IndexExpr, IntLit, NullLit, Param, Program,
  ReturnStmt, Stmt, StructDecl, StructField, StructLitExpr, TypeAst, UnOp, UnaryExpr, VarDecl,
  VarExpr, WhileStmt,
};

/// A parse error. Locations are always present at this stage.
#[derive(Clone, Debug, Error)]
#[error("{msg} at {span}")]
pub struct ParseError {
  pub msg: String,
  pub span: Span,
}

pub struct Parser {
  tokens: Vec<Token>,
  index: usize,
  /// When nonzero, an identifier followed by `{` is not a struct literal.
  no_struct_lit: u32,
}

impl Parser {
  #[must_use] pub fn new(tokens: Vec<Token>) -> Self {
    let mut tokens = tokens;
    if tokens.is_empty() {
      tokens.push(Token { kind: TokenKind::Eof, lexeme: String::new(), span: Span::synthetic() });
    }
    Parser { tokens, index: 0, no_struct_lit: 0 }
  }

  pub fn parse_program(mut self) -> Result<Program, ParseError> {
    let mut decls = Vec::new();
    while !self.at(TokenKind::Eof) {
      decls.push(self.parse_decl()?);
    }
    Ok(Program { decls })
  }

  fn parse_decl(&mut self) -> Result<Decl, ParseError> {
    if let Some(tok) = self.eat(TokenKind::KwStruct) {
      return Ok(Decl::Struct(self.parse_struct_decl(tok.span)?));
    }
    if let Some(tok) = self.eat(TokenKind::KwExtern) {
      self.consume(TokenKind::KwFn, "expected 'fn' after 'extern'")?;
      return Ok(Decl::ExternFn(self.parse_extern_fn_decl(tok.span)?));
    }
    if let Some(tok) = self.eat(TokenKind::KwFn) {
      return Ok(Decl::Fn(self.parse_fn_decl(tok.span)?));
    }
    Err(self.error_here("expected declaration"))
  }

  fn parse_struct_decl(&mut self, span: Span) -> Result<StructDecl, ParseError> {
    let name = self.consume_ident("expected struct name")?;
    self.consume(TokenKind::LBrace, "expected '{' after struct name")?;
    let mut fields = Vec::new();
    while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
      let field_span = self.peek().span.clone();
      let field_name = self.consume_ident("expected field name")?;
      self.consume(TokenKind::Colon, "expected ':' after field name")?;
      let field_ty = self.parse_type()?;
      self.consume(TokenKind::Semi, "expected ';' after field")?;
      fields.push(StructField { name: field_name, ty: field_ty, span: field_span });
    }
    self.consume(TokenKind::RBrace, "expected '}' after struct fields")?;
    Ok(StructDecl { name, fields, span })
  }

  fn parse_extern_fn_decl(&mut self, span: Span) -> Result<ExternFnDecl, ParseError> {
    let name = self.consume_ident("expected function name")?;
    let params = self.parse_param_list()?;
    self.consume(TokenKind::Arrow, "expected '->' before return type")?;
    let ret = self.parse_type()?;
    self.consume(TokenKind::Semi, "expected ';' after extern declaration")?;
    Ok(ExternFnDecl { name, params, ret, span })
  }

  fn parse_fn_decl(&mut self, span: Span) -> Result<FnDecl, ParseError> {
    let name = self.consume_ident("expected function name")?;
    let params = self.parse_param_list()?;
    self.consume(TokenKind::Arrow, "expected '->' before return type")?;
    let ret = self.parse_type()?;
    let body = self.parse_block()?;
    Ok(FnDecl { name, params, ret, body, span })
  }

  fn parse_param_list(&mut self) -> Result<Vec<Param>, ParseError> {
    self.consume(TokenKind::LParen, "expected '(' before parameter list")?;
    let mut params = Vec::new();
    if !self.at(TokenKind::RParen) {
      loop {
        let span = self.peek().span.clone();
        let name = self.consume_ident("expected parameter name")?;
        self.consume(TokenKind::Colon, "expected ':' after parameter name")?;
        let ty = self.parse_type()?;
        params.push(Param { name, ty, span });
        if self.eat(TokenKind::Comma).is_none() {
          break;
        }
      }
    }
    self.consume(TokenKind::RParen, "expected ')' after parameter list")?;
    Ok(params)
  }

  fn parse_type(&mut self) -> Result<TypeAst, ParseError> {
    if let Some(tok) = self.eat(TokenKind::Star) {
      let inner = self.parse_type()?;
      return Ok(TypeAst::Ptr { inner: Box::new(inner), span: tok.span });
    }
    let span = self.peek().span.clone();
    let name = self.consume_ident("expected type name")?;
    Ok(TypeAst::Named { name, span })
  }

  fn parse_block(&mut self) -> Result<Block, ParseError> {
    let span = self.peek().span.clone();
    self.consume(TokenKind::LBrace, "expected '{' to start block")?;
    let mut stmts = Vec::new();
    while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
      stmts.push(self.parse_stmt()?);
    }
    self.consume(TokenKind::RBrace, "expected '}' to end block")?;
    Ok(Block { stmts, span })
  }

  fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
    if self.at(TokenKind::LBrace) {
      return Ok(Stmt::Block(self.parse_block()?));
    }
    if let Some(tok) = self.eat(TokenKind::KwVar) {
      return self.parse_var_decl(tok.span);
    }
    if let Some(tok) = self.eat(TokenKind::KwDefer) {
      let call = self.parse_defer_call()?;
      self.consume(TokenKind::Semi, "expected ';' after defer call")?;
      return Ok(Stmt::Defer(DeferCall { call, span: tok.span }));
    }
    if let Some(tok) = self.eat(TokenKind::KwIf) {
      return self.parse_if(tok.span);
    }
    if let Some(tok) = self.eat(TokenKind::KwWhile) {
      return self.parse_while(tok.span);
    }
    if let Some(tok) = self.eat(TokenKind::KwReturn) {
      return self.parse_return(tok.span);
    }
    let span = self.peek().span.clone();
    let expr = self.parse_expression()?;
    self.consume(TokenKind::Semi, "expected ';' after expression")?;
    Ok(Stmt::Expr(ExprStmt { expr, span }))
  }

  fn parse_var_decl(&mut self, span: Span) -> Result<Stmt, ParseError> {
    let name = self.consume_ident("expected variable name")?;
    self.consume(TokenKind::Colon, "expected ':' after variable name")?;
    let ty = self.parse_type()?;
    let init = if self.eat(TokenKind::Eq).is_some() {
      Some(self.parse_expression()?)
    } else {
      None
    };
    self.consume(TokenKind::Semi, "expected ';' after variable declaration")?;
    Ok(Stmt::Var(VarDecl { name, ty, init, span }))
  }

  fn parse_if(&mut self, span: Span) -> Result<Stmt, ParseError> {
    let cond = self.without_struct_lits(Self::parse_expression)?;
    let then_block = self.parse_block()?;
    let else_block = if self.eat(TokenKind::KwElse).is_some() {
      Some(self.parse_block()?)
    } else {
      None
    };
    Ok(Stmt::If(IfStmt { cond, then_block, else_block, span }))
  }

  fn parse_while(&mut self, span: Span) -> Result<Stmt, ParseError> {
    let cond = self.without_struct_lits(Self::parse_expression)?;
    let body = self.parse_block()?;
    Ok(Stmt::While(WhileStmt { cond, body, span }))
  }

  fn parse_return(&mut self, span: Span) -> Result<Stmt, ParseError> {
    if self.eat(TokenKind::Semi).is_some() {
      return Ok(Stmt::Return(ReturnStmt { value: None, span }));
    }
    let value = self.parse_expression()?;
    self.consume(TokenKind::Semi, "expected ';' after return value")?;
    Ok(Stmt::Return(ReturnStmt { value: Some(value), span }))
  }

  fn parse_defer_call(&mut self) -> Result<CallExpr, ParseError> {
    let span = self.peek().span.clone();
    match self.parse_expression()? {
      Expr::Call(call) => Ok(call),
      _ => Err(ParseError { msg: "defer requires a call expression".into(), span }),
    }
  }

  fn parse_expression(&mut self) -> Result<Expr, ParseError> {
    self.parse_assignment()
  }

  fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
    let expr = self.parse_logic_or()?;
    if let Some(tok) = self.eat(TokenKind::Eq) {
      let value = self.parse_assignment()?;
      if !expr.is_lvalue() {
        return Err(ParseError { msg: "invalid assignment target".into(), span: tok.span });
      }
      return Ok(Expr::Assign(AssignExpr {
        target: Box::new(expr),
        value: Box::new(value),
        span: tok.span,
      }));
    }
    Ok(expr)
  }

  fn parse_logic_or(&mut self) -> Result<Expr, ParseError> {
    let mut expr = self.parse_logic_and()?;
    while let Some(tok) = self.eat(TokenKind::OrOr) {
      let right = self.parse_logic_and()?;
      expr = binary(BinOp::Or, expr, right, tok.span);
    }
    Ok(expr)
  }

  fn parse_logic_and(&mut self) -> Result<Expr, ParseError> {
    let mut expr = self.parse_equality()?;
    while let Some(tok) = self.eat(TokenKind::AndAnd) {
      let right = self.parse_equality()?;
      expr = binary(BinOp::And, expr, right, tok.span);
    }
    Ok(expr)
  }

  fn parse_equality(&mut self) -> Result<Expr, ParseError> {
    let mut expr = self.parse_relational()?;
    loop {
      let op = if let Some(tok) = self.eat(TokenKind::EqEq) {
        (BinOp::Eq, tok.span)
      } else if let Some(tok) = self.eat(TokenKind::BangEq) {
        (BinOp::Ne, tok.span)
      } else {
        return Ok(expr);
      };
      let right = self.parse_relational()?;
      expr = binary(op.0, expr, right, op.1);
    }
  }

  fn parse_relational(&mut self) -> Result<Expr, ParseError> {
    let mut expr = self.parse_additive()?;
    loop {
      let op = if let Some(tok) = self.eat(TokenKind::Lt) {
        (BinOp::Lt, tok.span)
      } else if let Some(tok) = self.eat(TokenKind::Le) {
        (BinOp::Le, tok.span)
      } else if let Some(tok) = self.eat(TokenKind::Gt) {
        (BinOp::Gt, tok.span)
      } else if let Some(tok) = self.eat(TokenKind::Ge) {
        (BinOp::Ge, tok.span)
      } else {
        return Ok(expr);
      };
      let right = self.parse_additive()?;
      expr = binary(op.0, expr, right, op.1);
    }
  }

  fn parse_additive(&mut self) -> Result<Expr, ParseError> {
    let mut expr = self.parse_multiplicative()?;
    loop {
      let op = if let Some(tok) = self.eat(TokenKind::Plus) {
        (BinOp::Add, tok.span)
      } else if let Some(tok) = self.eat(TokenKind::Minus) {
        (BinOp::Sub, tok.span)
      } else {
        return Ok(expr);
      };
      let right = self.parse_multiplicative()?;
      expr = binary(op.0, expr, right, op.1);
    }
  }

  fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
    let mut expr = self.parse_unary()?;
    loop {
      let op = if let Some(tok) = self.eat(TokenKind::Star) {
        (BinOp::Mul, tok.span)
      } else if let Some(tok) = self.eat(TokenKind::Slash) {
        (BinOp::Div, tok.span)
      } else if let Some(tok) = self.eat(TokenKind::Percent) {
        (BinOp::Rem, tok.span)
      } else {
        return Ok(expr);
      };
      let right = self.parse_unary()?;
      expr = binary(op.0, expr, right, op.1);
    }
  }

  fn parse_unary(&mut self) -> Result<Expr, ParseError> {
    let op = if let Some(tok) = self.eat(TokenKind::Minus) {
      (UnOp::Neg, tok.span)
    } else if let Some(tok) = self.eat(TokenKind::Bang) {
      (UnOp::Not, tok.span)
    } else if let Some(tok) = self.eat(TokenKind::Star) {
      (UnOp::Deref, tok.span)
    } else if let Some(tok) = self.eat(TokenKind::Amp) {
      (UnOp::AddrOf, tok.span)
    } else {
      return self.parse_postfix();
    };
    let expr = self.parse_unary()?;
    Ok(Expr::Unary(UnaryExpr { op: op.0, expr: Box::new(expr), span: op.1 }))
  }

  fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
    let mut expr = self.parse_primary()?;
    loop {
      if let Some(tok) = self.eat(TokenKind::LParen) {
        let args = self.with_struct_lits(|p| {
          let mut args = Vec::new();
          if !p.at(TokenKind::RParen) {
            loop {
              args.push(p.parse_expression()?);
              if p.eat(TokenKind::Comma).is_none() {
                break;
              }
            }
          }
          Ok(args)
        })?;
        self.consume(TokenKind::RParen, "expected ')' after arguments")?;
        let callee = match expr {
          Expr::Var(v) => v.name,
          _ => {
            return Err(ParseError {
              msg: "call target must be a function name".into(),
              span: tok.span,
            });
          }
        };
        expr = Expr::Call(CallExpr { callee, args, span: tok.span });
        continue;
      }
      if let Some(tok) = self.eat(TokenKind::Dot) {
        let name = self.consume_ident("expected field name after '.'")?;
        expr = Expr::Field(FieldExpr { base: Box::new(expr), name, span: tok.span });
        continue;
      }
      if let Some(tok) = self.eat(TokenKind::LBracket) {
        let index = self.with_struct_lits(Self::parse_expression)?;
        self.consume(TokenKind::RBracket, "expected ']' after index")?;
        expr = Expr::Index(IndexExpr {
          base: Box::new(expr),
          index: Box::new(index),
          span: tok.span,
        });
        continue;
      }
      return Ok(expr);
    }
  }

  fn parse_primary(&mut self) -> Result<Expr, ParseError> {
    if let Some(tok) = self.eat(TokenKind::Int) {
      let value = tok.lexeme.parse::<i128>().map_err(|_| ParseError {
        msg: format!("integer literal out of range: {}", tok.lexeme),
        span: tok.span.clone(),
      })?;
      return Ok(Expr::Int(IntLit { value, span: tok.span }));
    }
    if let Some(tok) = self.eat(TokenKind::KwTrue) {
      return Ok(Expr::Bool(BoolLit { value: true, span: tok.span }));
    }
    if let Some(tok) = self.eat(TokenKind::KwFalse) {
      return Ok(Expr::Bool(BoolLit { value: false, span: tok.span }));
    }
    if let Some(tok) = self.eat(TokenKind::KwNull) {
      return Ok(Expr::Null(NullLit { span: tok.span }));
    }
    if let Some(tok) = self.eat(TokenKind::Ident) {
      if self.at(TokenKind::LBrace) && self.no_struct_lit == 0 {
        return self.parse_struct_lit(tok.lexeme, tok.span);
      }
      return Ok(Expr::Var(VarExpr { name: tok.lexeme, span: tok.span }));
    }
    if self.eat(TokenKind::LParen).is_some() {
      let expr = self.with_struct_lits(Self::parse_expression)?;
      self.consume(TokenKind::RParen, "expected ')' after expression")?;
      return Ok(expr);
    }
    Err(self.error_here("unexpected token"))
  }

  fn parse_struct_lit(&mut self, name: String, span: Span) -> Result<Expr, ParseError> {
    self.consume(TokenKind::LBrace, "expected '{' to start struct literal")?;
    let mut fields = Vec::new();
    while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
      let field_span = self.peek().span.clone();
      let field_name = self.consume_ident("expected field name in struct literal")?;
      self.consume(TokenKind::Colon, "expected ':' after field name")?;
      let value = self.with_struct_lits(Self::parse_expression)?;
      fields.push(FieldInit { name: field_name, value, span: field_span });
      if self.eat(TokenKind::Comma).is_none() {
        break;
      }
    }
    self.consume(TokenKind::RBrace, "expected '}' after struct literal")?;
    Ok(Expr::StructLit(StructLitExpr { name, fields, span }))
  }

  /// Run `f` with struct literals forbidden at the top level of the
  /// expression being parsed.
  fn without_struct_lits<T>(
    &mut self, f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
  ) -> Result<T, ParseError> {
    self.no_struct_lit += 1;
    let result = f(self);
    self.no_struct_lit -= 1;
    result
  }

  /// Run `f` with struct literals allowed again; used when entering a
  /// bracketed subexpression of a restricted position.
  fn with_struct_lits<T>(
    &mut self, f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
  ) -> Result<T, ParseError> {
    let saved = mem::take(&mut self.no_struct_lit);
    let result = f(self);
    self.no_struct_lit = saved;
    result
  }

  fn peek(&self) -> &Token { &self.tokens[self.index] }

  fn at(&self, kind: TokenKind) -> bool { self.peek().kind == kind }

  fn advance(&mut self) -> Token {
    let tok = self.tokens[self.index].clone();
    if tok.kind != TokenKind::Eof {
      self.index += 1;
    }
    tok
  }

  fn eat(&mut self, kind: TokenKind) -> Option<Token> {
    if self.at(kind) { Some(self.advance()) } else { None }
  }

  fn consume(&mut self, kind: TokenKind, msg: &str) -> Result<Token, ParseError> {
    if self.at(kind) { Ok(self.advance()) } else { Err(self.error_here(msg)) }
  }

  fn consume_ident(&mut self, msg: &str) -> Result<String, ParseError> {
    Ok(self.consume(TokenKind::Ident, msg)?.lexeme)
  }

  fn error_here(&self, msg: &str) -> ParseError {
    ParseError { msg: msg.into(), span: self.peek().span.clone() }
  }
}

fn binary(op: BinOp, left: Expr, right: Expr, span: Span) -> Expr {
  Expr::Binary(BinaryExpr { op, left: Box::new(left), right: Box::new(right), span })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lexer::Lexer;

  fn parse(src: &str) -> Program {
    let tokens = Lexer::new("test.toy".into(), src).tokenize().expect("lex failed");
    Parser::new(tokens).parse_program().expect("parse failed")
  }

  fn parse_err(src: &str) -> ParseError {
    let tokens = Lexer::new("test.toy".into(), src).tokenize().expect("lex failed");
    Parser::new(tokens).parse_program().unwrap_err()
  }

  fn first_fn(program: &Program) -> &FnDecl {
    program
      .decls
      .iter()
      .find_map(|d| if let Decl::Fn(f) = d { Some(f) } else { None })
      .expect("no fn")
  }

  #[test]
  fn declarations() {
    let p = parse(
      "struct P { x: i64; next: *P; }\n\
       extern fn print_int(x: i64) -> unit;\n\
       fn main() -> i64 { return 0; }\n",
    );
    assert_eq!(p.decls.len(), 3);
    assert!(matches!(&p.decls[0], Decl::Struct(s) if s.fields.len() == 2));
    assert!(matches!(&p.decls[1], Decl::ExternFn(f) if f.name == "print_int"));
    assert!(matches!(&p.decls[2], Decl::Fn(f) if f.name == "main"));
  }

  #[test]
  fn multiplication_binds_tighter_than_addition() {
    let p = parse("fn f() -> i64 { return 1 + 2 * 3; }");
    let f = first_fn(&p);
    let Stmt::Return(ret) = &f.body.stmts[0] else { panic!("expected return") };
    let Some(Expr::Binary(add)) = &ret.value else { panic!("expected binary") };
    assert_eq!(add.op, BinOp::Add);
    let Expr::Binary(mul) = &*add.right else { panic!("expected nested binary") };
    assert_eq!(mul.op, BinOp::Mul);
  }

  #[test]
  fn assignment_is_right_associative() {
    let p = parse("fn f() -> unit { var a: i64 = 0; var b: i64 = 0; a = b = 1; }");
    let f = first_fn(&p);
    let Stmt::Expr(stmt) = &f.body.stmts[2] else { panic!("expected expr stmt") };
    let Expr::Assign(outer) = &stmt.expr else { panic!("expected assign") };
    assert!(matches!(&*outer.value, Expr::Assign(_)));
  }

  #[test]
  fn struct_literal_is_not_a_condition() {
    // `if x {` must parse as a condition and a block, not a struct literal.
    let p = parse("fn f(x: bool) -> unit { if x { return; } }");
    let f = first_fn(&p);
    assert!(matches!(&f.body.stmts[0], Stmt::If(i) if matches!(i.cond, Expr::Var(_))));

    // Parenthesized, the literal comes back.
    let p = parse("fn g() -> unit { if (P { a: 1 }).ok { return; } }");
    let f = first_fn(&p);
    let Stmt::If(i) = &f.body.stmts[0] else { panic!("expected if") };
    assert!(matches!(&i.cond, Expr::Field(fld) if matches!(&*fld.base, Expr::StructLit(_))));
  }

  #[test]
  fn var_initializer_is_optional() {
    let p = parse("fn f() -> unit { var p: P; }");
    let f = first_fn(&p);
    assert!(matches!(&f.body.stmts[0], Stmt::Var(v) if v.init.is_none()));
  }

  #[test]
  fn postfix_chains() {
    let p = parse("fn f(p: *P) -> i64 { return p[0].x; }");
    let f = first_fn(&p);
    let Stmt::Return(ret) = &f.body.stmts[0] else { panic!("expected return") };
    let Some(Expr::Field(fld)) = &ret.value else { panic!("expected field") };
    assert!(matches!(&*fld.base, Expr::Index(_)));
  }

  #[test]
  fn invalid_assignment_target() {
    let err = parse_err("fn f() -> unit { 1 = 2; }");
    assert!(err.to_string().contains("invalid assignment target"));
  }

  #[test]
  fn defer_requires_a_call() {
    let err = parse_err("fn f() -> unit { defer 1 + 2; }");
    assert!(err.to_string().contains("defer requires a call expression"));
  }

  #[test]
  fn call_target_must_be_a_name() {
    let err = parse_err("fn f() -> unit { (1 + 2)(); }");
    assert!(err.to_string().contains("call target must be a function name"));
  }
}
