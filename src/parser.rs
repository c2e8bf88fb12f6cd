//! Recursive-descent parser: token stream to CST, no lowering
//! (`spec.md` §4.4).

use crate::context::Context;
use crate::cst::{
  AssignOp, BinaryOp, Block, Decl, DeclId, Expr, MemberDecl, Param, Path, Stmt, SwitchArm, TypeExpr, UnaryOp,
};
use crate::diag::{Diagnostics, Location, Result};
use crate::intern::Symbol;
use crate::lexer::{IntSuffix, Keyword, Lexer, Sigil, Token, TokenKind};

pub struct Parser<'a> {
  tokens: Vec<Token>,
  pos: usize,
  ctx: &'a mut Context,
  /// Directory of the module being parsed, for `embed("path")` resolution.
  module_dir: std::path::PathBuf,
}

impl<'a> Parser<'a> {
  pub fn parse_module(
    ctx: &'a mut Context,
    path: Symbol,
    source: &str,
    module_dir: std::path::PathBuf,
    diags: &mut Diagnostics,
  ) -> Result<Vec<DeclId>> {
    let tokens = Lexer::new(path, source).lex_all(&mut ctx.interner, diags)?;
    let mut parser = Self { tokens, pos: 0, ctx, module_dir };
    parser.parse_decls(diags)
  }

  fn peek(&self) -> &TokenKind { &self.tokens[self.pos].kind }
  fn loc(&self) -> Location { self.tokens[self.pos].location }

  fn bump(&mut self) -> Token {
    let tok = self.tokens[self.pos].clone();
    if self.pos + 1 < self.tokens.len() { self.pos += 1; }
    tok
  }

  fn at_sigil(&self, s: Sigil) -> bool { matches!(self.peek(), TokenKind::Sigil(k) if *k == s) }
  fn at_keyword(&self, k: Keyword) -> bool { matches!(self.peek(), TokenKind::Keyword(kw) if *kw == k) }
  fn at_eof(&self) -> bool { matches!(self.peek(), TokenKind::Eof) }

  fn eat_sigil(&mut self, s: Sigil, diags: &mut Diagnostics) -> Result<Location> {
    if self.at_sigil(s) { let loc = self.loc(); self.bump(); Ok(loc) }
    else { self.unexpected(diags, &format!("{s:?}")) }
  }

  fn eat_keyword(&mut self, k: Keyword, diags: &mut Diagnostics) -> Result<Location> {
    if self.at_keyword(k) { let loc = self.loc(); self.bump(); Ok(loc) }
    else { self.unexpected(diags, &format!("{k:?}")) }
  }

  fn eat_identifier(&mut self, diags: &mut Diagnostics) -> Result<(Symbol, Location)> {
    let loc = self.loc();
    if let TokenKind::Identifier(sym) = self.peek() {
      let sym = *sym;
      self.bump();
      Ok((sym, loc))
    } else {
      self.unexpected(diags, "identifier")
    }
  }

  fn unexpected<T>(&mut self, diags: &mut Diagnostics, expected: &str) -> Result<T> {
    let loc = self.loc();
    let found = format!("{:?}", self.peek());
    diags.fatal(Some(loc), format!("expected {expected}, found {found}"))
  }

  // ---- declarations ----------------------------------------------------

  fn parse_decls(&mut self, diags: &mut Diagnostics) -> Result<Vec<DeclId>> {
    let mut decls = Vec::new();
    while !self.at_eof() {
      decls.push(self.parse_decl(diags)?);
    }
    Ok(decls)
  }

  fn parse_template_params(&mut self, diags: &mut Diagnostics) -> Result<Vec<Symbol>> {
    if !self.at_sigil(Sigil::LBracket2) { return Ok(Vec::new()); }
    self.bump();
    let mut params = Vec::new();
    loop {
      let (name, _) = self.eat_identifier(diags)?;
      params.push(name);
      if self.at_sigil(Sigil::Comma) { self.bump(); continue; }
      break;
    }
    self.eat_sigil(Sigil::RBracket2, diags)?;
    if params.is_empty() {
      return diags.fatal(Some(self.loc()), "template parameter list must not be empty");
    }
    Ok(params)
  }

  fn parse_decl(&mut self, diags: &mut Diagnostics) -> Result<DeclId> {
    match self.peek().clone() {
      TokenKind::Keyword(Keyword::Namespace) => self.parse_namespace(diags),
      TokenKind::Keyword(Keyword::Import) => self.parse_import(diags),
      TokenKind::Keyword(Keyword::Let) => self.parse_variable_decl(diags, true),
      TokenKind::Keyword(Keyword::Var) => self.parse_variable_decl(diags, false),
      TokenKind::Keyword(Keyword::Const) => self.parse_const_decl(diags),
      TokenKind::Keyword(Keyword::Func) => self.parse_func_decl(diags),
      TokenKind::Keyword(Keyword::Struct) => self.parse_struct_decl(diags),
      TokenKind::Keyword(Keyword::Union) => self.parse_union_decl(diags),
      TokenKind::Keyword(Keyword::Enum) => self.parse_enum_decl(diags),
      TokenKind::Keyword(Keyword::Extend) => self.parse_extend_decl(diags),
      TokenKind::Keyword(Keyword::Alias) => self.parse_alias_decl(diags),
      TokenKind::Keyword(Keyword::Extern) => self.parse_extern_decl(diags),
      _ => self.unexpected(diags, "declaration"),
    }
  }

  fn parse_namespace(&mut self, diags: &mut Diagnostics) -> Result<DeclId> {
    let location = self.eat_keyword(Keyword::Namespace, diags)?;
    let mut path = vec![self.eat_identifier(diags)?.0];
    while self.at_sigil(Sigil::ColonColon) {
      self.bump();
      path.push(self.eat_identifier(diags)?.0);
    }
    self.eat_sigil(Sigil::Semicolon, diags)?;
    Ok(self.ctx.cst.push(Decl::Namespace { path, location }))
  }

  fn parse_import(&mut self, diags: &mut Diagnostics) -> Result<DeclId> {
    let location = self.eat_keyword(Keyword::Import, diags)?;
    let path = self.expect_byte_string(diags)?;
    self.eat_sigil(Sigil::Semicolon, diags)?;
    Ok(self.ctx.cst.push(Decl::Import { path, location }))
  }

  fn expect_byte_string(&mut self, diags: &mut Diagnostics) -> Result<Vec<u8>> {
    let loc = self.loc();
    if let TokenKind::ByteString(bytes) = self.peek().clone() {
      self.bump();
      Ok(bytes)
    } else {
      diags.fatal(Some(loc), "expected string literal")
    }
  }

  fn parse_variable_decl(&mut self, diags: &mut Diagnostics, _is_let: bool) -> Result<DeclId> {
    let location = self.loc();
    self.bump(); // `let` / `var`
    let (name, _) = self.eat_identifier(diags)?;
    let template_params = self.parse_template_params(diags)?;
    let ty = self.parse_optional_type_annotation(diags)?;
    self.eat_sigil(Sigil::Eq, diags)?;
    let initializer = self.parse_expr(diags)?;
    self.eat_sigil(Sigil::Semicolon, diags)?;
    Ok(self.ctx.cst.push(Decl::Variable { name, ty, initializer, template_params, location }))
  }

  fn parse_const_decl(&mut self, diags: &mut Diagnostics) -> Result<DeclId> {
    let location = self.eat_keyword(Keyword::Const, diags)?;
    let (name, _) = self.eat_identifier(diags)?;
    let template_params = self.parse_template_params(diags)?;
    let ty = self.parse_optional_type_annotation(diags)?;
    self.eat_sigil(Sigil::Eq, diags)?;
    let initializer = self.parse_expr(diags)?;
    self.eat_sigil(Sigil::Semicolon, diags)?;
    Ok(self.ctx.cst.push(Decl::Constant { name, ty, initializer, template_params, location }))
  }

  fn parse_optional_type_annotation(&mut self, diags: &mut Diagnostics) -> Result<Option<TypeExpr>> {
    if self.at_sigil(Sigil::Colon) {
      self.bump();
      Ok(Some(self.parse_type(diags)?))
    } else {
      Ok(None)
    }
  }

  fn parse_params(&mut self, diags: &mut Diagnostics) -> Result<Vec<Param>> {
    self.eat_sigil(Sigil::LParen, diags)?;
    let mut params = Vec::new();
    while !self.at_sigil(Sigil::RParen) {
      let location = self.loc();
      let (name, _) = self.eat_identifier(diags)?;
      self.eat_sigil(Sigil::Colon, diags)?;
      let ty = self.parse_type(diags)?;
      params.push(Param { name, ty, location });
      if self.at_sigil(Sigil::Comma) { self.bump(); } else { break; }
    }
    self.eat_sigil(Sigil::RParen, diags)?;
    Ok(params)
  }

  fn parse_func_decl(&mut self, diags: &mut Diagnostics) -> Result<DeclId> {
    let location = self.eat_keyword(Keyword::Func, diags)?;
    let (name, _) = self.eat_identifier(diags)?;
    let template_params = self.parse_template_params(diags)?;
    let params = self.parse_params(diags)?;
    let ret = if self.at_sigil(Sigil::LBrace) {
      TypeExpr::Path(Path { segments: vec![self.ctx.interner.intern("void")], template_args: vec![] }, location)
    } else {
      self.parse_type(diags)?
    };
    let body = self.parse_block(diags)?;
    Ok(self.ctx.cst.push(Decl::Function { name, params, ret, body, template_params, location }))
  }

  fn parse_struct_decl(&mut self, diags: &mut Diagnostics) -> Result<DeclId> {
    let location = self.eat_keyword(Keyword::Struct, diags)?;
    let (name, _) = self.eat_identifier(diags)?;
    let template_params = self.parse_template_params(diags)?;
    let (members, nested) = self.parse_aggregate_body(diags)?;
    Ok(self.ctx.cst.push(Decl::Struct { name, members, nested, template_params, location }))
  }

  fn parse_union_decl(&mut self, diags: &mut Diagnostics) -> Result<DeclId> {
    let location = self.eat_keyword(Keyword::Union, diags)?;
    let (name, _) = self.eat_identifier(diags)?;
    let template_params = self.parse_template_params(diags)?;
    let (members, nested) = self.parse_aggregate_body(diags)?;
    Ok(self.ctx.cst.push(Decl::Union { name, members, nested, template_params, location }))
  }

  /// Parses the `{ var name: type; ... ; nested-decl* }` body shared by
  /// `struct`/`union`: member-variable declarations use `var`, anything
  /// else nested (member constants/functions) is an ordinary declaration
  /// attached to the type's own symbol table by the resolver.
  fn parse_aggregate_body(&mut self, diags: &mut Diagnostics) -> Result<(Vec<MemberDecl>, Vec<DeclId>)> {
    self.eat_sigil(Sigil::LBrace, diags)?;
    let mut members = Vec::new();
    let mut nested = Vec::new();
    while !self.at_sigil(Sigil::RBrace) {
      if self.at_keyword(Keyword::Var) {
        let location = self.loc();
        self.bump();
        let (name, _) = self.eat_identifier(diags)?;
        self.eat_sigil(Sigil::Colon, diags)?;
        let ty = self.parse_type(diags)?;
        self.eat_sigil(Sigil::Semicolon, diags)?;
        members.push(MemberDecl { name, ty, location });
      } else {
        nested.push(self.parse_decl(diags)?);
      }
    }
    self.eat_sigil(Sigil::RBrace, diags)?;
    Ok((members, nested))
  }

  fn parse_enum_decl(&mut self, diags: &mut Diagnostics) -> Result<DeclId> {
    let location = self.eat_keyword(Keyword::Enum, diags)?;
    let (name, _) = self.eat_identifier(diags)?;
    let underlying = if self.at_sigil(Sigil::Colon) {
      self.bump();
      Some(self.parse_type(diags)?)
    } else {
      None
    };
    self.eat_sigil(Sigil::LBrace, diags)?;
    let mut values = Vec::new();
    let mut nested = Vec::new();
    while !self.at_sigil(Sigil::RBrace) {
      if let TokenKind::Identifier(_) = self.peek() {
        let (vname, _) = self.eat_identifier(diags)?;
        let init = if self.at_sigil(Sigil::Eq) { self.bump(); Some(self.parse_expr(diags)?) } else { None };
        self.eat_sigil(Sigil::Semicolon, diags)?;
        values.push((vname, init));
      } else {
        nested.push(self.parse_decl(diags)?);
      }
    }
    self.eat_sigil(Sigil::RBrace, diags)?;
    Ok(self.ctx.cst.push(Decl::Enum { name, underlying, values, nested, location }))
  }

  fn parse_extend_decl(&mut self, diags: &mut Diagnostics) -> Result<DeclId> {
    let location = self.eat_keyword(Keyword::Extend, diags)?;
    let target = self.parse_path(diags)?;
    self.eat_sigil(Sigil::LBrace, diags)?;
    let mut nested = Vec::new();
    while !self.at_sigil(Sigil::RBrace) {
      nested.push(self.parse_decl(diags)?);
    }
    self.eat_sigil(Sigil::RBrace, diags)?;
    Ok(self.ctx.cst.push(Decl::Extend { target, nested, location }))
  }

  fn parse_alias_decl(&mut self, diags: &mut Diagnostics) -> Result<DeclId> {
    let location = self.eat_keyword(Keyword::Alias, diags)?;
    let (name, _) = self.eat_identifier(diags)?;
    self.eat_sigil(Sigil::Eq, diags)?;
    let target = self.parse_type(diags)?;
    self.eat_sigil(Sigil::Semicolon, diags)?;
    Ok(self.ctx.cst.push(Decl::Alias { name, target, location }))
  }

  fn parse_extern_decl(&mut self, diags: &mut Diagnostics) -> Result<DeclId> {
    let location = self.eat_keyword(Keyword::Extern, diags)?;
    if self.at_keyword(Keyword::Var) {
      self.bump();
      let (name, _) = self.eat_identifier(diags)?;
      self.eat_sigil(Sigil::Colon, diags)?;
      let ty = self.parse_type(diags)?;
      let link_name = if self.at_sigil(Sigil::Eq) { self.bump(); Some(self.expect_byte_string(diags)?) } else { None };
      self.eat_sigil(Sigil::Semicolon, diags)?;
      return Ok(self.ctx.cst.push(Decl::ExternVariable { name, ty, link_name, location }));
    }
    self.eat_keyword(Keyword::Func, diags)?;
    let (name, _) = self.eat_identifier(diags)?;
    let params = self.parse_params(diags)?;
    let ret = self.parse_type(diags)?;
    let link_name = if self.at_sigil(Sigil::Eq) { self.bump(); Some(self.expect_byte_string(diags)?) } else { None };
    self.eat_sigil(Sigil::Semicolon, diags)?;
    Ok(self.ctx.cst.push(Decl::ExternFunction { name, params, ret, link_name, location }))
  }

  // ---- types -------------------------------------------------------

  fn parse_type(&mut self, diags: &mut Diagnostics) -> Result<TypeExpr> {
    let location = self.loc();
    match self.peek().clone() {
      TokenKind::Sigil(Sigil::Star) => { self.bump(); Ok(TypeExpr::Pointer(Box::new(self.parse_type(diags)?), location)) }
      TokenKind::Sigil(Sigil::LBracket) => {
        self.bump();
        if self.at_sigil(Sigil::RBracket) {
          self.bump();
          Ok(TypeExpr::Slice(Box::new(self.parse_type(diags)?), location))
        } else {
          let count = self.parse_expr(diags)?;
          self.eat_sigil(Sigil::RBracket, diags)?;
          Ok(TypeExpr::Array { count: Box::new(count), base: Box::new(self.parse_type(diags)?), location })
        }
      }
      TokenKind::Keyword(Keyword::Func) => {
        self.bump();
        self.eat_sigil(Sigil::LParen, diags)?;
        let mut params = Vec::new();
        while !self.at_sigil(Sigil::RParen) {
          params.push(self.parse_type(diags)?);
          if self.at_sigil(Sigil::Comma) { self.bump(); } else { break; }
        }
        self.eat_sigil(Sigil::RParen, diags)?;
        let ret = Box::new(self.parse_type(diags)?);
        Ok(TypeExpr::Func { params, ret, location })
      }
      TokenKind::Keyword(Keyword::Struct) => {
        self.bump();
        let (members, _) = self.parse_aggregate_body(diags)?;
        Ok(TypeExpr::Struct(members, location))
      }
      TokenKind::Keyword(Keyword::Union) => {
        self.bump();
        let (members, _) = self.parse_aggregate_body(diags)?;
        Ok(TypeExpr::Union(members, location))
      }
      TokenKind::Keyword(Keyword::Typeof) => {
        self.bump();
        self.eat_sigil(Sigil::LParen, diags)?;
        let e = self.parse_expr(diags)?;
        self.eat_sigil(Sigil::RParen, diags)?;
        Ok(TypeExpr::Typeof(Box::new(e), location))
      }
      TokenKind::Identifier(_) => Ok(TypeExpr::Path(self.parse_path(diags)?, location)),
      _ => self.unexpected(diags, "type"),
    }
  }

  fn parse_path(&mut self, diags: &mut Diagnostics) -> Result<Path> {
    let mut segments = vec![self.eat_identifier(diags)?.0];
    while self.at_sigil(Sigil::ColonColon) {
      self.bump();
      segments.push(self.eat_identifier(diags)?.0);
    }
    let template_args = if self.at_sigil(Sigil::LBracket2) {
      self.bump();
      let mut args = Vec::new();
      loop {
        args.push(self.parse_type(diags)?);
        if self.at_sigil(Sigil::Comma) { self.bump(); continue; }
        break;
      }
      self.eat_sigil(Sigil::RBracket2, diags)?;
      if args.is_empty() {
        return diags.fatal(Some(self.loc()), "template argument list must not be empty");
      }
      args
    } else {
      Vec::new()
    };
    Ok(Path { segments, template_args })
  }

  // ---- statements ----------------------------------------------------

  fn parse_block(&mut self, diags: &mut Diagnostics) -> Result<Block> {
    let location = self.eat_sigil(Sigil::LBrace, diags)?;
    let mut statements = Vec::new();
    while !self.at_sigil(Sigil::RBrace) {
      statements.push(self.parse_stmt(diags)?);
    }
    self.eat_sigil(Sigil::RBrace, diags)?;
    Ok(Block { statements, location })
  }

  fn parse_stmt(&mut self, diags: &mut Diagnostics) -> Result<Stmt> {
    match self.peek().clone() {
      TokenKind::Keyword(Keyword::Let) => {
        let location = self.loc();
        self.bump();
        let (name, _) = self.eat_identifier(diags)?;
        let ty = self.parse_optional_type_annotation(diags)?;
        self.eat_sigil(Sigil::Eq, diags)?;
        let initializer = self.parse_expr(diags)?;
        self.eat_sigil(Sigil::Semicolon, diags)?;
        Ok(Stmt::Let { name, ty, initializer, location })
      }
      TokenKind::Keyword(Keyword::Var) => {
        let location = self.loc();
        self.bump();
        let (name, _) = self.eat_identifier(diags)?;
        let ty = self.parse_optional_type_annotation(diags)?;
        let initializer = if self.at_sigil(Sigil::Eq) { self.bump(); Some(self.parse_expr(diags)?) } else { None };
        self.eat_sigil(Sigil::Semicolon, diags)?;
        Ok(Stmt::Var { name, ty, initializer, location })
      }
      TokenKind::Keyword(Keyword::Const) => {
        let location = self.loc();
        self.bump();
        let (name, _) = self.eat_identifier(diags)?;
        let ty = self.parse_optional_type_annotation(diags)?;
        self.eat_sigil(Sigil::Eq, diags)?;
        let initializer = self.parse_expr(diags)?;
        self.eat_sigil(Sigil::Semicolon, diags)?;
        Ok(Stmt::Const { name, ty, initializer, location })
      }
      TokenKind::Keyword(Keyword::Defer) => {
        let location = self.loc();
        self.bump();
        if self.at_sigil(Sigil::LBrace) {
          Ok(Stmt::Defer(self.parse_block(diags)?, location))
        } else {
          let e = self.parse_expr(diags)?;
          self.eat_sigil(Sigil::Semicolon, diags)?;
          Ok(Stmt::Defer(Block { statements: vec![Stmt::ExprStatement(e)], location }, location))
        }
      }
      TokenKind::Keyword(Keyword::If) => self.parse_if(diags),
      TokenKind::Keyword(Keyword::When) => self.parse_when(diags),
      TokenKind::Keyword(Keyword::For) => self.parse_for(diags),
      TokenKind::Keyword(Keyword::Break) => { let l = self.loc(); self.bump(); self.eat_sigil(Sigil::Semicolon, diags)?; Ok(Stmt::Break(l)) }
      TokenKind::Keyword(Keyword::Continue) => { let l = self.loc(); self.bump(); self.eat_sigil(Sigil::Semicolon, diags)?; Ok(Stmt::Continue(l)) }
      TokenKind::Keyword(Keyword::Switch) => self.parse_switch(diags),
      TokenKind::Keyword(Keyword::Return) => {
        let location = self.loc();
        self.bump();
        let value = if self.at_sigil(Sigil::Semicolon) { None } else { Some(self.parse_expr(diags)?) };
        self.eat_sigil(Sigil::Semicolon, diags)?;
        Ok(Stmt::Return { value, location })
      }
      TokenKind::Keyword(Keyword::Assert) => {
        let location = self.loc();
        self.bump();
        let condition = self.parse_expr(diags)?;
        self.eat_sigil(Sigil::Semicolon, diags)?;
        Ok(Stmt::Assert { condition, line_text: String::new(), location })
      }
      TokenKind::Sigil(Sigil::LBrace) => Ok(Stmt::Block(self.parse_block(diags)?)),
      _ => self.parse_assign_or_expr_stmt(diags),
    }
  }

  fn parse_if(&mut self, diags: &mut Diagnostics) -> Result<Stmt> {
    let location = self.eat_keyword(Keyword::If, diags)?;
    let mut arms = Vec::new();
    let cond = self.parse_expr(diags)?;
    let body = self.parse_block(diags)?;
    arms.push((cond, body));
    let mut else_block = None;
    loop {
      if self.at_keyword(Keyword::Elif) {
        self.bump();
        let cond = self.parse_expr(diags)?;
        let body = self.parse_block(diags)?;
        arms.push((cond, body));
      } else if self.at_keyword(Keyword::Else) {
        self.bump();
        else_block = Some(self.parse_block(diags)?);
        break;
      } else {
        break;
      }
    }
    Ok(Stmt::If { arms, else_block, location })
  }

  fn parse_when(&mut self, diags: &mut Diagnostics) -> Result<Stmt> {
    let location = self.eat_keyword(Keyword::When, diags)?;
    let mut arms = Vec::new();
    let cond = self.parse_expr(diags)?;
    let body = self.parse_block(diags)?;
    arms.push((cond, body));
    let mut else_block = None;
    loop {
      if self.at_keyword(Keyword::Elwhen) {
        self.bump();
        let cond = self.parse_expr(diags)?;
        let body = self.parse_block(diags)?;
        arms.push((cond, body));
      } else if self.at_keyword(Keyword::Else) {
        self.bump();
        else_block = Some(self.parse_block(diags)?);
        break;
      } else {
        break;
      }
    }
    Ok(Stmt::When { arms, else_block, location })
  }

  fn parse_for(&mut self, diags: &mut Diagnostics) -> Result<Stmt> {
    let location = self.eat_keyword(Keyword::For, diags)?;
    // `for ident in begin..end { ... }` vs `for cond { ... }`.
    if let TokenKind::Identifier(_) = self.peek() {
      let save = self.pos;
      let (name, _) = self.eat_identifier(diags)?;
      if self.at_keyword(Keyword::In) {
        self.bump();
        let begin = self.parse_expr(diags)?;
        self.eat_sigil(Sigil::DotDot, diags)?;
        let end = self.parse_expr(diags)?;
        let body = self.parse_block(diags)?;
        return Ok(Stmt::ForRange { binding: name, begin, end, body, location });
      }
      self.pos = save;
    }
    if self.at_sigil(Sigil::LBrace) {
      let body = self.parse_block(diags)?;
      return Ok(Stmt::ForExpr { condition: None, body, location });
    }
    let condition = Some(self.parse_expr(diags)?);
    let body = self.parse_block(diags)?;
    Ok(Stmt::ForExpr { condition, body, location })
  }

  fn parse_switch(&mut self, diags: &mut Diagnostics) -> Result<Stmt> {
    let location = self.eat_keyword(Keyword::Switch, diags)?;
    let scrutinee = self.parse_expr(diags)?;
    self.eat_sigil(Sigil::LBrace, diags)?;
    let mut arms = Vec::new();
    while !self.at_sigil(Sigil::RBrace) {
      let arm_loc = self.loc();
      if self.at_keyword(Keyword::Else) {
        self.bump();
        self.eat_sigil(Sigil::Colon, diags)?;
        let body = self.parse_block(diags)?;
        arms.push(SwitchArm { case: None, body, location: arm_loc });
      } else {
        let (name, _) = self.eat_identifier(diags)?;
        self.eat_sigil(Sigil::Colon, diags)?;
        let body = self.parse_block(diags)?;
        arms.push(SwitchArm { case: Some(name), body, location: arm_loc });
      }
    }
    self.eat_sigil(Sigil::RBrace, diags)?;
    Ok(Stmt::Switch { scrutinee, arms, location })
  }

  fn parse_assign_or_expr_stmt(&mut self, diags: &mut Diagnostics) -> Result<Stmt> {
    let location = self.loc();
    let lhs = self.parse_expr(diags)?;
    let op = match self.peek() {
      TokenKind::Sigil(Sigil::Eq) => Some(AssignOp::Plain),
      _ => None,
    };
    if let Some(op) = op {
      self.bump();
      let rhs = self.parse_expr(diags)?;
      self.eat_sigil(Sigil::Semicolon, diags)?;
      return Ok(Stmt::Assign { op, target: lhs, value: rhs, location });
    }
    self.eat_sigil(Sigil::Semicolon, diags)?;
    Ok(Stmt::ExprStatement(lhs))
  }

  // ---- expressions: precedence climbing -----------------------------

  fn parse_expr(&mut self, diags: &mut Diagnostics) -> Result<Expr> { self.parse_or(diags) }

  fn parse_or(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let mut lhs = self.parse_and(diags)?;
    while self.at_keyword(Keyword::Or) {
      let location = self.loc();
      self.bump();
      let rhs = self.parse_and(diags)?;
      lhs = Expr::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
    }
    Ok(lhs)
  }

  fn parse_and(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let mut lhs = self.parse_equality(diags)?;
    while self.at_keyword(Keyword::And) {
      let location = self.loc();
      self.bump();
      let rhs = self.parse_equality(diags)?;
      lhs = Expr::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
    }
    Ok(lhs)
  }

  fn parse_equality(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let mut lhs = self.parse_relational(diags)?;
    loop {
      let op = match self.peek() {
        TokenKind::Sigil(Sigil::EqEq) => BinaryOp::Eq,
        TokenKind::Sigil(Sigil::BangEq) => BinaryOp::Ne,
        _ => break,
      };
      let location = self.loc();
      self.bump();
      let rhs = self.parse_relational(diags)?;
      lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
    }
    Ok(lhs)
  }

  fn parse_relational(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let mut lhs = self.parse_shift(diags)?;
    loop {
      let op = match self.peek() {
        TokenKind::Sigil(Sigil::LtEq) => BinaryOp::Le,
        TokenKind::Sigil(Sigil::Lt) => BinaryOp::Lt,
        TokenKind::Sigil(Sigil::GtEq) => BinaryOp::Ge,
        TokenKind::Sigil(Sigil::Gt) => BinaryOp::Gt,
        _ => break,
      };
      let location = self.loc();
      self.bump();
      let rhs = self.parse_shift(diags)?;
      lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
    }
    Ok(lhs)
  }

  fn parse_shift(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let mut lhs = self.parse_bitor(diags)?;
    loop {
      let op = match self.peek() {
        TokenKind::Sigil(Sigil::Shl) => BinaryOp::Shl,
        TokenKind::Sigil(Sigil::Shr) => BinaryOp::Shr,
        _ => break,
      };
      let location = self.loc();
      self.bump();
      let rhs = self.parse_bitor(diags)?;
      lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
    }
    Ok(lhs)
  }

  fn parse_bitor(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let mut lhs = self.parse_bitxor(diags)?;
    while self.at_sigil(Sigil::Pipe) {
      let location = self.loc();
      self.bump();
      let rhs = self.parse_bitxor(diags)?;
      lhs = Expr::Binary { op: BinaryOp::BitOr, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
    }
    Ok(lhs)
  }

  fn parse_bitxor(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let mut lhs = self.parse_bitand(diags)?;
    while self.at_sigil(Sigil::Caret) {
      let location = self.loc();
      self.bump();
      let rhs = self.parse_bitand(diags)?;
      lhs = Expr::Binary { op: BinaryOp::BitXor, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
    }
    Ok(lhs)
  }

  fn parse_bitand(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let mut lhs = self.parse_additive(diags)?;
    while self.at_sigil(Sigil::Amp) {
      let location = self.loc();
      self.bump();
      let rhs = self.parse_additive(diags)?;
      lhs = Expr::Binary { op: BinaryOp::BitAnd, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
    }
    Ok(lhs)
  }

  fn parse_additive(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let mut lhs = self.parse_multiplicative(diags)?;
    loop {
      let op = match self.peek() {
        TokenKind::Sigil(Sigil::Plus) => BinaryOp::Add,
        TokenKind::Sigil(Sigil::Minus) => BinaryOp::Sub,
        TokenKind::Sigil(Sigil::PlusPercent) => BinaryOp::WrappingAdd,
        TokenKind::Sigil(Sigil::MinusPercent) => BinaryOp::WrappingSub,
        _ => break,
      };
      let location = self.loc();
      self.bump();
      let rhs = self.parse_multiplicative(diags)?;
      lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
    }
    Ok(lhs)
  }

  fn parse_multiplicative(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let mut lhs = self.parse_unary(diags)?;
    loop {
      let op = match self.peek() {
        TokenKind::Sigil(Sigil::Star) => BinaryOp::Mul,
        TokenKind::Sigil(Sigil::Slash) => BinaryOp::Div,
        TokenKind::Sigil(Sigil::Percent) => BinaryOp::Rem,
        TokenKind::Sigil(Sigil::StarPercent) => BinaryOp::WrappingMul,
        _ => break,
      };
      let location = self.loc();
      self.bump();
      let rhs = self.parse_unary(diags)?;
      lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), location };
    }
    Ok(lhs)
  }

  fn parse_unary(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let location = self.loc();
    let op = match self.peek() {
      TokenKind::Keyword(Keyword::Not) => Some(UnaryOp::Not),
      TokenKind::Sigil(Sigil::Plus) => Some(UnaryOp::Plus),
      TokenKind::Sigil(Sigil::Minus) => Some(UnaryOp::Minus),
      TokenKind::Sigil(Sigil::MinusPercent) => Some(UnaryOp::WrappingNeg),
      TokenKind::Sigil(Sigil::Tilde) => Some(UnaryOp::BitNot),
      TokenKind::Sigil(Sigil::Star) => Some(UnaryOp::Deref),
      TokenKind::Sigil(Sigil::Amp) => Some(UnaryOp::AddressOf),
      TokenKind::Keyword(Keyword::Startof) => Some(UnaryOp::Startof),
      TokenKind::Keyword(Keyword::Countof) => Some(UnaryOp::Countof),
      _ => None,
    };
    if let Some(op) = op {
      self.bump();
      let operand = self.parse_unary(diags)?;
      return Ok(Expr::Unary { op, operand: Box::new(operand), location });
    }
    self.parse_postfix(diags)
  }

  fn parse_postfix(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let mut e = self.parse_primary(diags)?;
    loop {
      let location = self.loc();
      if self.at_sigil(Sigil::LParen) {
        self.bump();
        let mut args = Vec::new();
        while !self.at_sigil(Sigil::RParen) {
          args.push(self.parse_expr(diags)?);
          if self.at_sigil(Sigil::Comma) { self.bump(); } else { break; }
        }
        self.eat_sigil(Sigil::RParen, diags)?;
        e = Expr::Call { callee: Box::new(e), args, location };
      } else if self.at_sigil(Sigil::LBracket) {
        self.bump();
        if self.at_sigil(Sigil::Colon) {
          self.bump();
          let end = if self.at_sigil(Sigil::RBracket) { None } else { Some(Box::new(self.parse_expr(diags)?)) };
          self.eat_sigil(Sigil::RBracket, diags)?;
          e = Expr::Slice { base: Box::new(e), start: None, end, location };
        } else {
          let first = self.parse_expr(diags)?;
          if self.at_sigil(Sigil::Colon) {
            self.bump();
            let end = if self.at_sigil(Sigil::RBracket) { None } else { Some(Box::new(self.parse_expr(diags)?)) };
            self.eat_sigil(Sigil::RBracket, diags)?;
            e = Expr::Slice { base: Box::new(e), start: Some(Box::new(first)), end, location };
          } else {
            self.eat_sigil(Sigil::RBracket, diags)?;
            e = Expr::Index { base: Box::new(e), index: Box::new(first), location };
          }
        }
      } else if self.at_sigil(Sigil::Dot) {
        self.bump();
        let (name, _) = self.eat_identifier(diags)?;
        e = Expr::Member { base: Box::new(e), name, location };
      } else if self.at_sigil(Sigil::DotStar) {
        self.bump();
        e = Expr::Unary { op: UnaryOp::Deref, operand: Box::new(e), location };
      } else if self.at_sigil(Sigil::Colon) {
        // explicit cast `expr : type`
        self.bump();
        let ty = self.parse_type(diags)?;
        e = Expr::Cast { operand: Box::new(e), ty: Box::new(ty), location };
      } else {
        break;
      }
    }
    Ok(e)
  }

  fn parse_primary(&mut self, diags: &mut Diagnostics) -> Result<Expr> {
    let location = self.loc();
    match self.peek().clone() {
      TokenKind::Integer { text, suffix } => { self.bump(); Ok(Expr::Integer { text, suffix, location }) }
      TokenKind::Float { value, is_f32, is_f64 } => { self.bump(); Ok(Expr::Float { value, is_f32, is_f64, location }) }
      TokenKind::Character(c) => { self.bump(); Ok(Expr::Character(c, location)) }
      TokenKind::ByteString(bytes) => { self.bump(); Ok(Expr::ByteString(bytes, location)) }
      TokenKind::Keyword(Keyword::True) => { self.bump(); Ok(Expr::Boolean(true, location)) }
      TokenKind::Keyword(Keyword::False) => { self.bump(); Ok(Expr::Boolean(false, location)) }
      TokenKind::Keyword(Keyword::Sizeof) => {
        self.bump();
        self.eat_sigil(Sigil::LParen, diags)?;
        let ty = self.parse_type(diags)?;
        self.eat_sigil(Sigil::RParen, diags)?;
        Ok(Expr::Sizeof(Box::new(ty), location))
      }
      TokenKind::Keyword(Keyword::Alignof) => {
        self.bump();
        self.eat_sigil(Sigil::LParen, diags)?;
        let ty = self.parse_type(diags)?;
        self.eat_sigil(Sigil::RParen, diags)?;
        Ok(Expr::Alignof(Box::new(ty), location))
      }
      TokenKind::Keyword(Keyword::Defined) => {
        self.bump();
        self.eat_sigil(Sigil::LParen, diags)?;
        let path = self.parse_path(diags)?;
        self.eat_sigil(Sigil::RParen, diags)?;
        Ok(Expr::Defined(path, location))
      }
      TokenKind::Keyword(Keyword::Fileof) => {
        self.bump();
        self.eat_sigil(Sigil::LParen, diags)?;
        self.eat_sigil(Sigil::RParen, diags)?;
        Ok(Expr::Fileof(location))
      }
      TokenKind::Keyword(Keyword::Lineof) => {
        self.bump();
        self.eat_sigil(Sigil::LParen, diags)?;
        self.eat_sigil(Sigil::RParen, diags)?;
        Ok(Expr::Lineof(location))
      }
      TokenKind::Keyword(Keyword::Embed) => {
        self.bump();
        self.eat_sigil(Sigil::LParen, diags)?;
        let path = self.expect_byte_string(diags)?;
        self.eat_sigil(Sigil::RParen, diags)?;
        let path_str = String::from_utf8_lossy(&path).into_owned();
        let full = self.module_dir.join(&path_str);
        let contents = match std::fs::read(&full) {
          Ok(bytes) => bytes,
          Err(e) => return diags.fatal(Some(location), format!("cannot embed `{path_str}`: {e}")),
        };
        Ok(Expr::Embed { path, contents, location })
      }
      TokenKind::Keyword(Keyword::Syscall) => {
        self.bump();
        self.eat_sigil(Sigil::LParen, diags)?;
        let mut args = Vec::new();
        while !self.at_sigil(Sigil::RParen) {
          args.push(self.parse_expr(diags)?);
          if self.at_sigil(Sigil::Comma) { self.bump(); } else { break; }
        }
        self.eat_sigil(Sigil::RParen, diags)?;
        if args.len() > 6 {
          return diags.fatal(Some(location), "syscall accepts at most 6 arguments");
        }
        Ok(Expr::Syscall { args, location })
      }
      TokenKind::Sigil(Sigil::LParen) => {
        self.bump();
        let e = self.parse_expr(diags)?;
        self.eat_sigil(Sigil::RParen, diags)?;
        Ok(e)
      }
      TokenKind::Sigil(Sigil::LBracket) => {
        self.bump();
        let mut elements = Vec::new();
        let mut ellipsis = None;
        while !self.at_sigil(Sigil::RBracket) {
          let e = self.parse_expr(diags)?;
          if self.at_sigil(Sigil::Ellipsis) {
            self.bump();
            ellipsis = Some(Box::new(e));
            break;
          }
          elements.push(e);
          if self.at_sigil(Sigil::Comma) { self.bump(); } else { break; }
        }
        self.eat_sigil(Sigil::RBracket, diags)?;
        Ok(Expr::ArrayLiteral { elements, ellipsis, location })
      }
      TokenKind::Identifier(_) => {
        let path = self.parse_path(diags)?;
        if self.at_sigil(Sigil::LBrace) {
          self.bump();
          let mut members = Vec::new();
          while !self.at_sigil(Sigil::RBrace) {
            let (name, _) = self.eat_identifier(diags)?;
            self.eat_sigil(Sigil::Eq, diags)?;
            let value = self.parse_expr(diags)?;
            members.push((name, value));
            if self.at_sigil(Sigil::Comma) { self.bump(); } else { break; }
          }
          self.eat_sigil(Sigil::RBrace, diags)?;
          let ty = TypeExpr::Path(path, location);
          return Ok(Expr::StructLiteral { ty: Box::new(ty), members, location });
        }
        Ok(Expr::Identifier(path, location))
      }
      _ => self.unexpected(diags, "expression"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;

  fn parse(src: &str) -> (Context, Vec<DeclId>) {
    let mut ctx = Context::new(Config::default());
    let mut diags = Diagnostics::new();
    let path = ctx.interner.intern("t.sunder");
    let decls = Parser::parse_module(&mut ctx, path, src, std::path::PathBuf::from("."), &mut diags)
      .unwrap_or_else(|e| panic!("parse failed: {e}"));
    (ctx, decls)
  }

  #[test]
  fn parses_constant_declaration() {
    let (ctx, decls) = parse("let x: s32 = 1 + 2 * 3;");
    assert_eq!(decls.len(), 1);
    let Decl::Variable { name, .. } = ctx.cst.get(decls[0]) else { panic!() };
    assert_eq!(ctx.interner.resolve(*name), "x");
  }

  #[test]
  fn parses_struct_with_members() {
    let (ctx, decls) = parse("struct s { var a: u16; var b: u8; var c: u64; }");
    let Decl::Struct { members, .. } = ctx.cst.get(decls[0]) else { panic!() };
    assert_eq!(members.len(), 3);
  }

  #[test]
  fn parses_function_with_body() {
    let (ctx, decls) = parse("func add(a: s32, b: s32) s32 { return a + b; }");
    let Decl::Function { params, body, .. } = ctx.cst.get(decls[0]) else { panic!() };
    assert_eq!(params.len(), 2);
    assert_eq!(body.statements.len(), 1);
  }

  #[test]
  fn parses_template_struct() {
    let (ctx, decls) = parse("struct vec[[T]] { var data: *T; }");
    let Decl::Struct { template_params, .. } = ctx.cst.get(decls[0]) else { panic!() };
    assert_eq!(template_params.len(), 1);
  }

  #[test]
  fn rejects_empty_template_parameter_list() {
    let mut ctx = Context::new(Config::default());
    let mut diags = Diagnostics::new();
    let path = ctx.interner.intern("t.sunder");
    let err = Parser::parse_module(&mut ctx, path, "struct vec[[]] { }", std::path::PathBuf::from("."), &mut diags);
    assert!(err.is_err());
  }

  #[test]
  fn parses_mutually_recursive_structs() {
    let (ctx, decls) = parse("struct a { var p: *b; } struct b { var p: *a; }");
    assert_eq!(decls.len(), 2);
  }

  #[test]
  fn parses_if_elif_else() {
    let (_ctx, decls) = parse("func f() void { if true { } elif false { } else { } }");
    let Decl::Function { body, .. } = _ctx.cst.get(decls[0]) else { panic!() };
    let Stmt::If { arms, else_block, .. } = &body.statements[0] else { panic!() };
    assert_eq!(arms.len(), 2);
    assert!(else_block.is_some());
  }

  #[test]
  fn parses_precedence_correctly() {
    let (ctx, decls) = parse("let x: s32 = 1 + 2 * 3;");
    let Decl::Variable { initializer, .. } = ctx.cst.get(decls[0]) else { panic!() };
    let Expr::Binary { op: BinaryOp::Add, rhs, .. } = initializer else { panic!("expected top-level +") };
    assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
  }
}
