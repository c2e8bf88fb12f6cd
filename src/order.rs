//! Topological sort of top-level CST declarations (`spec.md` §4.5).

use hashbrown::HashMap;

use crate::context::Context;
use crate::cst::{Decl, DeclId, Expr, Path, TypeExpr};
use crate::diag::{Diagnostics, Result};
use crate::intern::Symbol;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mark { InProgress, Done }

/// Computes a dependency graph over `decls` (name references in type
/// annotations and constant-initializer expressions) and returns them in
/// topological order. Cycles mediated only by pointer/slice members or by
/// function bodies are permitted (those edges are simply not recorded, per
/// `spec.md` §4.5 — "size-opaque at the point of use" and "resolved after
/// declaration heads").
pub fn order_declarations(ctx: &Context, decls: &[DeclId], diags: &mut Diagnostics) -> Result<Vec<DeclId>> {
  let by_name = index_by_name(ctx, decls);
  let mut out = Vec::with_capacity(decls.len());
  let mut marks: HashMap<DeclId, Mark> = HashMap::new();

  for &id in decls {
    visit(ctx, id, &by_name, &mut marks, &mut out, diags)?;
  }
  Ok(out)
}

fn index_by_name(ctx: &Context, decls: &[DeclId]) -> HashMap<Symbol, DeclId> {
  let mut map = HashMap::new();
  for &id in decls {
    if let Some(name) = ctx.cst.get(id).name() {
      map.insert(name, id);
    }
  }
  map
}

fn visit(
  ctx: &Context,
  id: DeclId,
  by_name: &HashMap<Symbol, DeclId>,
  marks: &mut HashMap<DeclId, Mark>,
  out: &mut Vec<DeclId>,
  diags: &mut Diagnostics,
) -> Result<()> {
  match marks.get(&id) {
    Some(Mark::Done) => return Ok(()),
    Some(Mark::InProgress) => {
      return diags.fatal(Some(ctx.cst.get(id).location()), "circular declaration dependency");
    }
    None => {}
  }
  marks.insert(id, Mark::InProgress);

  for dep_name in hard_dependencies(ctx.cst.get(id)) {
    if let Some(&dep_id) = by_name.get(&dep_name) {
      if dep_id != id {
        visit(ctx, dep_id, by_name, marks, out, diags)?;
      }
    }
  }

  marks.insert(id, Mark::Done);
  out.push(id);
  Ok(())
}

/// Names a declaration references in ways that must be resolved before it
/// can be processed: type annotations of variables/constants, array counts,
/// and initializer expressions — but *not* struct/union member types
/// reached only through a pointer or slice (those are size-opaque, so they
/// don't force ordering) and not function bodies (resolved after every
/// top-level declaration's head, per `spec.md` §4.7).
fn hard_dependencies(decl: &Decl) -> Vec<Symbol> {
  let mut names = Vec::new();
  match decl {
    Decl::Variable { ty, initializer, .. } | Decl::Constant { ty, initializer, .. } => {
      if let Some(ty) = ty { type_deps(ty, &mut names); }
      expr_deps(initializer, &mut names);
    }
    Decl::Function { params, ret, .. } => {
      // Only the signature participates in hard ordering; the body is
      // resolved in a later pass and never forces a topological edge.
      for p in params { type_deps(&p.ty, &mut names); }
      type_deps(ret, &mut names);
    }
    Decl::Struct { members, .. } | Decl::Union { members, .. } => {
      for m in members {
        struct_member_type_deps(&m.ty, &mut names);
      }
    }
    Decl::Enum { underlying, values, .. } => {
      if let Some(u) = underlying { type_deps(u, &mut names); }
      for (_, init) in values {
        if let Some(e) = init { expr_deps(e, &mut names); }
      }
    }
    Decl::Alias { target, .. } => type_deps(target, &mut names),
    Decl::ExternVariable { ty, .. } => type_deps(ty, &mut names),
    Decl::ExternFunction { params, ret, .. } => {
      for p in params { type_deps(&p.ty, &mut names); }
      type_deps(ret, &mut names);
    }
    Decl::Extend { .. } | Decl::Namespace { .. } | Decl::Import { .. } => {}
  }
  names
}

/// Struct/union member types force an edge *unless* the member is a
/// pointer or slice (which only need the base type's name, not its size,
/// at the point of use).
fn struct_member_type_deps(ty: &TypeExpr, out: &mut Vec<Symbol>) {
  match ty {
    TypeExpr::Pointer(_, _) | TypeExpr::Slice(_, _) => {}
    other => type_deps(other, out),
  }
}

fn type_deps(ty: &TypeExpr, out: &mut Vec<Symbol>) {
  match ty {
    TypeExpr::Path(path, _) => path_deps(path, out),
    TypeExpr::Func { params, ret, .. } => {
      for p in params { type_deps(p, out); }
      type_deps(ret, out);
    }
    TypeExpr::Pointer(base, _) | TypeExpr::Slice(base, _) => type_deps(base, out),
    TypeExpr::Array { count, base, .. } => {
      expr_deps(count, out);
      type_deps(base, out);
    }
    TypeExpr::Struct(members, _) | TypeExpr::Union(members, _) => {
      for m in members { struct_member_type_deps(&m.ty, out); }
    }
    TypeExpr::Enum { underlying, values, .. } => {
      if let Some(u) = underlying { type_deps(u, out); }
      for (_, init) in values {
        if let Some(e) = init { expr_deps(e, out); }
      }
    }
    TypeExpr::Typeof(e, _) => expr_deps(e, out),
  }
}

fn path_deps(path: &Path, out: &mut Vec<Symbol>) {
  if let Some(&first) = path.segments.first() {
    out.push(first);
  }
  for arg in &path.template_args { type_deps(arg, out); }
}

fn expr_deps(expr: &Expr, out: &mut Vec<Symbol>) {
  match expr {
    Expr::Identifier(path, _) => path_deps(path, out),
    Expr::Unary { operand, .. } => expr_deps(operand, out),
    Expr::Binary { lhs, rhs, .. } => { expr_deps(lhs, out); expr_deps(rhs, out); }
    Expr::Call { callee, args, .. } => {
      expr_deps(callee, out);
      for a in args { expr_deps(a, out); }
    }
    Expr::Index { base, index, .. } => { expr_deps(base, out); expr_deps(index, out); }
    Expr::Slice { base, start, end, .. } => {
      expr_deps(base, out);
      if let Some(s) = start { expr_deps(s, out); }
      if let Some(e) = end { expr_deps(e, out); }
    }
    Expr::Member { base, .. } => expr_deps(base, out),
    Expr::Cast { operand, ty, .. } => { expr_deps(operand, out); type_deps(ty, out); }
    Expr::ArrayLiteral { elements, ellipsis, .. } => {
      for e in elements { expr_deps(e, out); }
      if let Some(e) = ellipsis { expr_deps(e, out); }
    }
    Expr::StructLiteral { ty, members, .. } => {
      type_deps(ty, out);
      for (_, e) in members { expr_deps(e, out); }
    }
    Expr::Sizeof(ty, _) | Expr::Alignof(ty, _) => type_deps(ty, out),
    Expr::Defined(path, _) => path_deps(path, out),
    Expr::Syscall { args, .. } => { for a in args { expr_deps(a, out); } }
    Expr::Integer { .. } | Expr::Float { .. } | Expr::Character(..) | Expr::ByteString(..)
    | Expr::Boolean(..) | Expr::Fileof(_) | Expr::Lineof(_) | Expr::Embed { .. } => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::diag::Location;

  fn decl_var(ctx: &mut Context, name: &str, ty_name: Option<&str>, init: crate::cst::Expr) -> crate::cst::DeclId {
    let name = ctx.interner.intern(name);
    let ty = ty_name.map(|t| {
      let sym = ctx.interner.intern(t);
      TypeExpr::Path(Path { segments: vec![sym], template_args: vec![] }, Location::builtin())
    });
    ctx.cst.push(Decl::Constant { name, ty, initializer: init, template_params: vec![], location: Location::builtin() })
  }

  fn ident(ctx: &mut Context, name: &str) -> crate::cst::Expr {
    let sym = ctx.interner.intern(name);
    Expr::Identifier(Path { segments: vec![sym], template_args: vec![] }, Location::builtin())
  }

  fn int_lit(ctx: &mut Context) -> crate::cst::Expr {
    let text = ctx.interner.intern("0");
    Expr::Integer { text, suffix: crate::lexer::IntSuffix::None, location: Location::builtin() }
  }

  #[test]
  fn independent_decls_keep_relative_order() {
    let mut ctx = Context::new(Config::default());
    let a = decl_var(&mut ctx, "a", None, int_lit(&mut ctx));
    let b = decl_var(&mut ctx, "b", None, int_lit(&mut ctx));
    let mut diags = Diagnostics::new();
    let ordered = order_declarations(&ctx, &[a, b], &mut diags).unwrap();
    assert_eq!(ordered, vec![a, b]);
  }

  #[test]
  fn dependency_is_ordered_before_dependent() {
    let mut ctx = Context::new(Config::default());
    let a = decl_var(&mut ctx, "a", None, int_lit(&mut ctx));
    let b_init = ident(&mut ctx, "a");
    let b = decl_var(&mut ctx, "b", None, b_init);
    let mut diags = Diagnostics::new();
    let ordered = order_declarations(&ctx, &[b, a], &mut diags).unwrap();
    assert_eq!(ordered, vec![a, b]);
  }

  #[test]
  fn direct_value_cycle_is_fatal() {
    let mut ctx = Context::new(Config::default());
    let a_name = ctx.interner.intern("a");
    let b_name = ctx.interner.intern("b");
    let a_init = ident(&mut ctx, "b");
    let b_init = ident(&mut ctx, "a");
    let a = ctx.cst.push(Decl::Constant { name: a_name, ty: None, initializer: a_init, template_params: vec![], location: Location::builtin() });
    let b = ctx.cst.push(Decl::Constant { name: b_name, ty: None, initializer: b_init, template_params: vec![], location: Location::builtin() });
    let mut diags = Diagnostics::new();
    let err = order_declarations(&ctx, &[a, b], &mut diags);
    assert!(err.is_err());
  }

  #[test]
  fn pointer_mediated_struct_cycle_is_permitted() {
    let mut ctx = Context::new(Config::default());
    let a_name = ctx.interner.intern("a");
    let b_name = ctx.interner.intern("b");
    let p_field = ctx.interner.intern("p");
    let b_path = Path { segments: vec![b_name], template_args: vec![] };
    let a_path = Path { segments: vec![a_name], template_args: vec![] };
    let a = ctx.cst.push(Decl::Struct {
      name: a_name,
      members: vec![crate::cst::MemberDecl {
        name: p_field,
        ty: TypeExpr::Pointer(Box::new(TypeExpr::Path(b_path, Location::builtin())), Location::builtin()),
        location: Location::builtin(),
      }],
      nested: vec![],
      template_params: vec![],
      location: Location::builtin(),
    });
    let b = ctx.cst.push(Decl::Struct {
      name: b_name,
      members: vec![crate::cst::MemberDecl {
        name: p_field,
        ty: TypeExpr::Pointer(Box::new(TypeExpr::Path(a_path, Location::builtin())), Location::builtin()),
        location: Location::builtin(),
      }],
      nested: vec![],
      template_params: vec![],
      location: Location::builtin(),
    });
    let mut diags = Diagnostics::new();
    let ordered = order_declarations(&ctx, &[a, b], &mut diags).unwrap();
    assert_eq!(ordered.len(), 2);
  }
}
