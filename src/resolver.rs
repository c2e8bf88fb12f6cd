//! CST + symbol tables → typed IR, with template instantiation
//! (`spec.md` §4.7).

use hashbrown::HashMap;
use log::{debug, trace};

use crate::bignum::BigInt;
use crate::context::Context;
use crate::cst::{self, Decl, DeclId};
use crate::diag::{Diagnostics, Location, Result};
use crate::intern::Symbol;
use crate::ir::{self, Block, Expr, ExprKind};
use crate::symbol::{Address, Function, Object, SymbolId, SymbolKind, SymbolTableId, TemplateDecl, Value, ValueKind};
use crate::types::{IntKind, TypeId, TypeKind};

/// The resolver's threaded state: a stack of symbol tables and the two
/// parallel name-prefix strings maintained alongside it (`spec.md` §4.7).
pub struct Resolver<'a> {
  ctx: &'a mut Context,
  diags: &'a mut Diagnostics,
  scopes: Vec<SymbolTableId>,
  symbol_name_prefix: String,
  static_addr_prefix: String,
  current_function: Option<SymbolId>,
  next_local_offset: i64,
  local_counter: u32,
  in_constant_decl: bool,
  loop_depth: u32,
  /// Function bodies deferred until all top-level declarations have heads
  /// resolved, per `spec.md` §4.7.
  body_worklist: Vec<(SymbolId, cst::Block)>,
}

impl<'a> Resolver<'a> {
  #[must_use] pub fn new(ctx: &'a mut Context, diags: &'a mut Diagnostics) -> Self {
    let global = ctx.symbols.global_table();
    Self {
      ctx,
      diags,
      scopes: vec![global],
      symbol_name_prefix: String::new(),
      static_addr_prefix: String::new(),
      current_function: None,
      next_local_offset: 0,
      local_counter: 0,
      in_constant_decl: false,
      loop_depth: 0,
      body_worklist: Vec::new(),
    }
  }

  fn scope(&self) -> SymbolTableId { *self.scopes.last().expect("scope stack never empty") }

  fn push_scope(&mut self, parent: SymbolTableId) -> SymbolTableId {
    let id = self.ctx.symbols.new_table(Some(parent));
    self.scopes.push(id);
    id
  }

  fn pop_scope(&mut self) {
    let id = self.scopes.pop().expect("pop_scope without matching push");
    self.ctx.symbols.table_mut(id).freeze();
  }

  fn qualify(&self, name: Symbol) -> (String, String) {
    let text = self.ctx.interner.resolve(name);
    (format!("{}{}", self.symbol_name_prefix, text), format!("{}{}", self.static_addr_prefix, text))
  }

  /// Resolves every top-level declaration of a module in the order the
  /// orderer produced, then drains the function-body worklist.
  pub fn resolve_module(&mut self, ordered: &[DeclId]) -> Result<()> {
    self.predeclare_aggregates(ordered)?;
    for &id in ordered {
      self.resolve_decl(id)?;
    }
    self.resolve_bodies()?;
    self.report_unused(self.scope());
    Ok(())
  }

  /// Pre-declares every struct/union so self- and cross-referential
  /// pointer/slice members resolve (`spec.md` §4.7, two-phase processing).
  fn predeclare_aggregates(&mut self, ordered: &[DeclId]) -> Result<()> {
    for &id in ordered {
      let decl = self.ctx.cst.get(id).clone();
      match decl {
        Decl::Struct { name, template_params, location, .. } if template_params.is_empty() => {
          let (sym_name, _) = self.qualify(name);
          let interned = self.ctx.interner.intern(&sym_name);
          let ty = self.ctx.types.declare_struct(interned);
          self.define_type_symbol(name, ty, location)?;
        }
        Decl::Union { name, template_params, location, .. } if template_params.is_empty() => {
          let (sym_name, _) = self.qualify(name);
          let interned = self.ctx.interner.intern(&sym_name);
          let ty = self.ctx.types.declare_union(interned);
          self.define_type_symbol(name, ty, location)?;
        }
        _ => {}
      }
    }
    Ok(())
  }

  fn define_type_symbol(&mut self, name: Symbol, ty: TypeId, location: Location) -> Result<SymbolId> {
    let id = self.ctx.symbols.define(location, name, SymbolKind::Type(ty));
    if let Err(prev) = self.ctx.symbols.insert(self.scope(), name, id) {
      let prev_loc = self.ctx.symbols.symbol(prev).location;
      return self.diags.fatal(Some(location), format!("redeclaration of `{}` (previously at {:?})", self.ctx.interner.resolve(name), prev_loc));
    }
    Ok(id)
  }

  fn resolve_decl(&mut self, id: DeclId) -> Result<()> {
    let decl = self.ctx.cst.get(id).clone();
    match decl {
      Decl::Namespace { .. } | Decl::Import { .. } => Ok(()),
      Decl::Variable { name, ty, initializer, template_params, location } => {
        if !template_params.is_empty() {
          return self.define_template(name, id, template_params, location);
        }
        self.resolve_variable(name, ty, initializer, location, false)
      }
      Decl::Constant { name, ty, initializer, template_params, location } => {
        if !template_params.is_empty() {
          return self.define_template(name, id, template_params, location);
        }
        self.resolve_variable(name, ty, initializer, location, true)
      }
      Decl::Function { name, params, ret, body, template_params, location } => {
        if !template_params.is_empty() {
          return self.define_template(name, id, template_params, location);
        }
        self.resolve_function_head(name, &params, &ret, body, location)
      }
      Decl::Struct { name, members, nested, template_params, location } => {
        if !template_params.is_empty() { return Ok(()); }
        self.resolve_struct(name, &members, location)?;
        for nested_id in nested { self.resolve_decl(nested_id)?; }
        Ok(())
      }
      Decl::Union { name, members, nested, template_params, location } => {
        if !template_params.is_empty() { return Ok(()); }
        self.resolve_union(name, &members, location)?;
        for nested_id in nested { self.resolve_decl(nested_id)?; }
        Ok(())
      }
      Decl::Enum { name, underlying, values, nested, location } => {
        self.resolve_enum(name, underlying.as_ref(), &values, location)?;
        for nested_id in nested { self.resolve_decl(nested_id)?; }
        Ok(())
      }
      Decl::Alias { name, target, location } => self.resolve_alias(name, &target, location),
      Decl::ExternVariable { name, ty, location, .. } => self.resolve_extern_variable(name, &ty, location),
      Decl::ExternFunction { name, params, ret, location, .. } => self.resolve_extern_function(name, &params, &ret, location),
      Decl::Extend { nested, .. } => {
        for nested_id in nested { self.resolve_decl(nested_id)?; }
        Ok(())
      }
    }
  }

  fn define_template(&mut self, name: Symbol, decl: DeclId, params: Vec<Symbol>, location: Location) -> Result<()> {
    let (symbol_name_prefix, static_addr_prefix) = (self.symbol_name_prefix.clone(), self.static_addr_prefix.clone());
    let template = TemplateDecl {
      params,
      decl,
      symbol_name_prefix,
      static_addr_prefix,
      enclosing: self.scope(),
      instances: HashMap::new(),
    };
    let id = self.ctx.symbols.define(location, name, SymbolKind::Template(template));
    if let Err(prev) = self.ctx.symbols.insert(self.scope(), name, id) {
      let prev_loc = self.ctx.symbols.symbol(prev).location;
      return self.diags.fatal(Some(location), format!("redeclaration of template (previously at {prev_loc:?})"));
    }
    Ok(())
  }

  // ---- variables & constants ------------------------------------------

  fn resolve_variable(&mut self, name: Symbol, ty: Option<cst::TypeExpr>, initializer: cst::Expr, location: Location, is_const: bool) -> Result<()> {
    let ty_hint = ty.as_ref().map(|t| self.resolve_type(t)).transpose()?;
    let was_const_ctx = self.in_constant_decl;
    self.in_constant_decl = is_const || self.current_function.is_none();
    let resolved_init = self.resolve_expr(&initializer)?;
    self.in_constant_decl = was_const_ctx;

    let declared_ty = ty_hint.unwrap_or(resolved_init.ty);
    let init = self.apply_implicit_cast(resolved_init, declared_ty, location)?;

    let (sym_name_str, addr_name_str) = self.qualify(name);
    let sym_name = self.ctx.interner.intern(&sym_name_str);

    let value = if self.current_function.is_none() || is_const {
      Some(crate::eval::evaluate(self.ctx, &init)?)
    } else {
      None
    };

    let address = if self.current_function.is_none() {
      let static_name = self.ctx.intern_static_name(&addr_name_str);
      Address::Static(static_name, 0)
    } else {
      let offset = self.allocate_local_slot(self.ctx.types.get(declared_ty).size.max(1));
      Address::Local(sym_name, offset, false)
    };

    let obj = Object { ty: declared_ty, address, value, is_extern: false };
    let kind = if is_const { SymbolKind::Constant(obj) } else { SymbolKind::Variable(obj) };
    let id = self.ctx.symbols.define(location, sym_name, kind);
    if let Err(prev) = self.ctx.symbols.insert(self.scope(), name, id) {
      let prev_loc = self.ctx.symbols.symbol(prev).location;
      return self.diags.fatal(Some(location), format!("redeclaration (previously at {prev_loc:?})"));
    }
    Ok(())
  }

  fn allocate_local_slot(&mut self, size: u64) -> i64 {
    let aligned = (size + 7) / 8 * 8;
    self.next_local_offset -= aligned as i64;
    self.next_local_offset
  }

  // ---- functions --------------------------------------------------------

  fn resolve_function_head(&mut self, name: Symbol, params: &[cst::Param], ret: &cst::TypeExpr, body: cst::Block, location: Location) -> Result<()> {
    let (sym_name_str, addr_name_str) = self.qualify(name);
    let sym_name = self.ctx.interner.intern(&sym_name_str);
    let static_name = self.ctx.intern_static_name(&addr_name_str);

    let ret_ty = self.resolve_type(ret)?;
    let mut param_types = Vec::with_capacity(params.len());
    for p in params { param_types.push(self.resolve_type(&p.ty)?); }
    let func_ty = self.ctx.types.unique_function(&mut self.ctx.interner, param_types.clone(), ret_ty);

    let enclosing = self.scope();
    let fn_table = self.push_scope(enclosing);

    // Parameters occupy consecutive positive rbp offsets; right-to-left so
    // the left-most parameter ends up at the highest offset (`spec.md` §4.7).
    let mut offset = 16i64;
    let mut param_syms = Vec::with_capacity(params.len());
    for (p, ty) in params.iter().zip(param_types.iter()).rev() {
      let obj = Object { ty: *ty, address: Address::Local(p.name, offset, true), value: None, is_extern: false };
      let id = self.ctx.symbols.define(p.location, p.name, SymbolKind::Variable(obj));
      self.ctx.symbols.insert(fn_table, p.name, id).ok();
      param_syms.push(id);
      offset += 8;
    }
    param_syms.reverse();

    let return_name = self.ctx.interner.intern("return");
    let return_obj = Object { ty: ret_ty, address: Address::Local(return_name, offset, true), value: None, is_extern: false };
    let return_symbol = self.ctx.symbols.define(location, return_name, SymbolKind::Variable(return_obj));

    self.pop_scope();

    let function = Function {
      name: sym_name,
      ty: func_ty,
      address: Address::Static(static_name, 0),
      enclosing,
      params: param_syms,
      return_symbol,
      body: None,
      local_stack_offset: 0,
      is_extern: false,
    };
    let func_id = self.ctx.symbols.new_function(function);
    let id = self.ctx.symbols.define(location, sym_name, SymbolKind::Function(func_id));
    if let Err(prev) = self.ctx.symbols.insert(enclosing, name, id) {
      let prev_loc = self.ctx.symbols.symbol(prev).location;
      return self.diags.fatal(Some(location), format!("redeclaration (previously at {prev_loc:?})"));
    }

    self.body_worklist.push((id, body));
    trace!("deferred body resolution for function `{sym_name_str}`");
    Ok(())
  }

  fn resolve_bodies(&mut self) -> Result<()> {
    let worklist = std::mem::take(&mut self.body_worklist);
    for (sym_id, body) in worklist {
      self.resolve_function_body(sym_id, body)?;
    }
    Ok(())
  }

  fn resolve_function_body(&mut self, sym_id: SymbolId, body: cst::Block) -> Result<()> {
    let SymbolKind::Function(func_id) = self.ctx.symbols.symbol(sym_id).kind.clone() else {
      panic!("resolve_function_body on a non-function symbol");
    };
    let func = self.ctx.symbols.function(func_id).clone();
    let fn_table = self.push_scope(func.enclosing);
    for &p in &func.params {
      let name = self.ctx.symbols.symbol(p).name;
      self.ctx.symbols.insert(fn_table, name, p).ok();
    }

    let saved_fn = self.current_function.replace(sym_id);
    let saved_offset = self.next_local_offset;
    self.next_local_offset = 0;
    self.loop_depth = 0;

    let resolved = self.resolve_block(&body)?;

    let deepest = self.next_local_offset;
    self.current_function = saved_fn;
    self.next_local_offset = saved_offset;

    self.pop_scope();
    self.report_unused(fn_table);

    let func_mut = self.ctx.symbols.function_mut(func_id);
    func_mut.body = Some(resolved);
    func_mut.local_stack_offset = deepest;
    Ok(())
  }

  // ---- structs / unions / enums -----------------------------------------

  fn resolve_struct(&mut self, name: Symbol, members: &[cst::MemberDecl], location: Location) -> Result<()> {
    let ty = self.lookup_predeclared_type(name, location)?;
    for m in members {
      let member_ty = self.resolve_type(&m.ty)?;
      let member = self.ctx.types.get(member_ty);
      if member.is_unsized() {
        return self.diags.fatal(Some(m.location), format!("member `{}` has unsized type", self.ctx.interner.resolve(m.name)));
      }
      let (size, align) = (member.size, member.align);
      self.ctx.types.struct_add_member(ty, m.name, member_ty, size, align);
    }
    self.ctx.types.complete_aggregate(ty);
    let _ = location;
    Ok(())
  }

  fn resolve_union(&mut self, name: Symbol, members: &[cst::MemberDecl], location: Location) -> Result<()> {
    let ty = self.lookup_predeclared_type(name, location)?;
    for m in members {
      let member_ty = self.resolve_type(&m.ty)?;
      let member = self.ctx.types.get(member_ty);
      if member.is_unsized() {
        return self.diags.fatal(Some(m.location), format!("member `{}` has unsized type", self.ctx.interner.resolve(m.name)));
      }
      let (size, align) = (member.size, member.align);
      self.ctx.types.union_add_member(ty, m.name, member_ty, size, align);
    }
    self.ctx.types.complete_aggregate(ty);
    Ok(())
  }

  fn lookup_predeclared_type(&mut self, name: Symbol, location: Location) -> Result<TypeId> {
    match self.ctx.symbols.lookup(self.scope(), name) {
      Some(id) => match self.ctx.symbols.symbol(id).kind.clone() {
        SymbolKind::Type(ty) => Ok(ty),
        _ => self.diags.fatal(Some(location), "expected a type symbol"),
      },
      None => self.diags.fatal(Some(location), format!("unresolved identifier `{}`", self.ctx.interner.resolve(name))),
    }
  }

  /// Enumerator values are computed by evaluating each initializer or
  /// incrementing the previous; the underlying type is fixed to `s32`
  /// (`SPEC_FULL.md` §4.6, resolving the open question in `spec.md` §9).
  fn resolve_enum(&mut self, name: Symbol, underlying: Option<&cst::TypeExpr>, values: &[(Symbol, Option<cst::Expr>)], location: Location) -> Result<TypeId> {
    let underlying_ty = match underlying {
      Some(t) => self.resolve_type(t)?,
      None => self.ctx.int_type(IntKind::S32),
    };
    let (sym_name, _) = self.qualify(name);
    let interned = self.ctx.interner.intern(&sym_name);
    let ty = self.ctx.types.declare_enum(interned, underlying_ty);
    self.define_type_symbol(name, ty, location)?;

    let mut next_value = BigInt::zero();
    for (vname, init) in values {
      let value = match init {
        Some(e) => {
          let resolved = self.resolve_expr(e)?;
          let v = crate::eval::evaluate(self.ctx, &resolved)?;
          let ValueKind::Integer(bi) = v.kind else {
            return self.diags.fatal(Some(e.location()), "enum initializer must be an integer constant");
          };
          bi
        }
        None => next_value.clone(),
      };
      let (min, max) = (self.ctx.int_ranges.min(IntKind::S32).clone(), self.ctx.int_ranges.max(IntKind::S32).clone());
      if value.cmp(&min) == std::cmp::Ordering::Less || value.cmp(&max) == std::cmp::Ordering::Greater {
        return self.diags.fatal(Some(location), format!("enum value out of range for underlying type"));
      }
      self.ctx.types.enum_add_value(ty, *vname, value.clone());
      next_value = value.add(&BigInt::from_i64(1));
    }
    Ok(ty)
  }

  fn resolve_alias(&mut self, name: Symbol, target: &cst::TypeExpr, location: Location) -> Result<()> {
    let ty = self.resolve_type(target)?;
    self.define_type_symbol(name, ty, location)?;
    Ok(())
  }

  fn resolve_extern_variable(&mut self, name: Symbol, ty: &cst::TypeExpr, location: Location) -> Result<()> {
    let resolved_ty = self.resolve_type(ty)?;
    let (_, addr_name_str) = self.qualify(name);
    let static_name = self.ctx.interner.intern(&addr_name_str);
    let obj = Object { ty: resolved_ty, address: Address::Static(static_name, 0), value: None, is_extern: true };
    let id = self.ctx.symbols.define(location, name, SymbolKind::Variable(obj));
    self.ctx.symbols.insert(self.scope(), name, id).ok();
    Ok(())
  }

  fn resolve_extern_function(&mut self, name: Symbol, params: &[cst::Param], ret: &cst::TypeExpr, location: Location) -> Result<()> {
    let ret_ty = self.resolve_type(ret)?;
    let mut param_types = Vec::with_capacity(params.len());
    for p in params { param_types.push(self.resolve_type(&p.ty)?); }
    let func_ty = self.ctx.types.unique_function(&mut self.ctx.interner, param_types, ret_ty);
    let (_, addr_name_str) = self.qualify(name);
    let static_name = self.ctx.interner.intern(&addr_name_str);
    let function = Function {
      name,
      ty: func_ty,
      address: Address::Static(static_name, 0),
      enclosing: self.scope(),
      params: Vec::new(),
      return_symbol: SymbolId(0),
      body: None,
      local_stack_offset: 0,
      is_extern: true,
    };
    let func_id = self.ctx.symbols.new_function(function);
    let id = self.ctx.symbols.define(location, name, SymbolKind::Function(func_id));
    self.ctx.symbols.insert(self.scope(), name, id).ok();
    Ok(())
  }

  // ---- types --------------------------------------------------------

  fn resolve_type(&mut self, ty: &cst::TypeExpr) -> Result<TypeId> {
    match ty {
      cst::TypeExpr::Path(path, location) => self.resolve_type_path(path, *location),
      cst::TypeExpr::Func { params, ret, .. } => {
        let mut p = Vec::with_capacity(params.len());
        for t in params { p.push(self.resolve_type(t)?); }
        let r = self.resolve_type(ret)?;
        Ok(self.ctx.types.unique_function(&mut self.ctx.interner, p, r))
      }
      cst::TypeExpr::Pointer(base, _) => {
        let b = self.resolve_type(base)?;
        Ok(self.ctx.types.unique_pointer(&mut self.ctx.interner, b))
      }
      cst::TypeExpr::Slice(base, _) => {
        let b = self.resolve_type(base)?;
        Ok(self.ctx.types.unique_slice(&mut self.ctx.interner, b))
      }
      cst::TypeExpr::Array { count, base, .. } => {
        let resolved_count = self.resolve_expr(count)?;
        let value = crate::eval::evaluate(self.ctx, &resolved_count)?;
        let ValueKind::Integer(bi) = value.kind else {
          return self.diags.fatal(Some(count.location()), "array count must be an integer constant");
        };
        let n = bi.to_u64().unwrap_or(0);
        let b = self.resolve_type(base)?;
        Ok(self.ctx.types.unique_array(&mut self.ctx.interner, n, b))
      }
      cst::TypeExpr::Struct(members, location) => {
        let anon = self.ctx.interner.intern_fmt(format_args!("struct@{}:{}", location.line, location.byte_pointer));
        let ty = self.ctx.types.declare_struct(anon);
        for m in members {
          let mt = self.resolve_type(&m.ty)?;
          let t = self.ctx.types.get(mt);
          let (size, align) = (t.size, t.align);
          self.ctx.types.struct_add_member(ty, m.name, mt, size, align);
        }
        self.ctx.types.complete_aggregate(ty);
        Ok(ty)
      }
      cst::TypeExpr::Union(members, location) => {
        let anon = self.ctx.interner.intern_fmt(format_args!("union@{}:{}", location.line, location.byte_pointer));
        let ty = self.ctx.types.declare_union(anon);
        for m in members {
          let mt = self.resolve_type(&m.ty)?;
          let t = self.ctx.types.get(mt);
          let (size, align) = (t.size, t.align);
          self.ctx.types.union_add_member(ty, m.name, mt, size, align);
        }
        self.ctx.types.complete_aggregate(ty);
        Ok(ty)
      }
      cst::TypeExpr::Enum { underlying, values, location } => {
        let anon = self.ctx.interner.intern_fmt(format_args!("enum@{}:{}", location.line, location.byte_pointer));
        self.resolve_enum(anon, underlying.as_deref(), values, *location)
      }
      cst::TypeExpr::Typeof(expr, _) => {
        let resolved = self.resolve_expr(expr)?;
        Ok(resolved.ty)
      }
    }
  }

  fn resolve_type_path(&mut self, path: &cst::Path, location: Location) -> Result<TypeId> {
    if !path.template_args.is_empty() {
      return self.instantiate_template(path, location);
    }
    let first = *path.segments.first().expect("path always has a first segment");
    match self.ctx.symbols.lookup(self.scope(), first) {
      Some(id) => {
        self.ctx.symbols.symbol(id).mark_used();
        match self.ctx.symbols.symbol(id).kind.clone() {
          SymbolKind::Type(ty) => Ok(ty),
          _ => self.diags.fatal(Some(location), format!("`{}` does not name a type", self.ctx.interner.resolve(first))),
        }
      }
      None => self.diags.fatal(Some(location), format!("unresolved identifier `{}`", self.ctx.interner.resolve(first))),
    }
  }

  /// Resolves `name[[T1, T2, ...]]`: resolves each argument type,
  /// canonicalizes the instantiation name, consults the template's
  /// instance cache, and on miss synthesizes and resolves a concrete
  /// instance (`spec.md` §4.7).
  fn instantiate_template(&mut self, path: &cst::Path, location: Location) -> Result<TypeId> {
    let name = *path.segments.first().expect("path always has a first segment");
    let Some(template_id) = self.ctx.symbols.lookup(self.scope(), name) else {
      return self.diags.fatal(Some(location), format!("unresolved identifier `{}`", self.ctx.interner.resolve(name)));
    };
    let SymbolKind::Template(template) = self.ctx.symbols.symbol(template_id).kind.clone() else {
      return self.diags.fatal(Some(location), "template instantiation of a non-template symbol");
    };
    if template.params.len() != path.template_args.len() {
      return self.diags.fatal(Some(location), "mismatched template arity");
    }

    let mut arg_types = Vec::with_capacity(path.template_args.len());
    for t in &path.template_args { arg_types.push(self.resolve_type(t)?); }

    let mut canon = String::new();
    {
      let base = self.ctx.interner.resolve(name).to_string();
      canon.push_str(&base);
      canon.push_str("[[");
      for (i, t) in arg_types.iter().enumerate() {
        if i > 0 { canon.push_str(", "); }
        canon.push_str(self.ctx.interner.resolve(self.ctx.types.get(*t).name));
      }
      canon.push_str("]]");
    }
    let canon_sym = self.ctx.interner.intern(&canon);

    if let SymbolKind::Template(t) = &self.ctx.symbols.symbol(template_id).kind {
      if let Some(&cached) = t.instances.get(&canon_sym) {
        trace!("template instance cache hit for `{canon}`");
        return self.concrete_type_of(cached, location);
      }
    }
    debug!("instantiating template `{canon}`");

    let saved_scopes = std::mem::replace(&mut self.scopes, vec![template.enclosing]);
    let saved_prefix = std::mem::replace(&mut self.symbol_name_prefix, template.symbol_name_prefix.clone());
    let saved_addr_prefix = std::mem::replace(&mut self.static_addr_prefix, template.static_addr_prefix.clone());

    let inst_table = self.push_scope(template.enclosing);
    for (&param, &arg) in template.params.iter().zip(arg_types.iter()) {
      let id = self.ctx.symbols.define(location, param, SymbolKind::Type(arg));
      self.ctx.symbols.insert(inst_table, param, id).ok();
    }

    let decl = self.ctx.cst.get(template.decl).clone();
    let concrete = match decl {
      Decl::Struct { members, location: decl_loc, .. } => {
        let ty = self.ctx.types.declare_struct(canon_sym);
        let id = self.define_type_symbol(canon_sym, ty, decl_loc)?;
        for m in &members {
          let mt = self.resolve_type(&m.ty)?;
          let t = self.ctx.types.get(mt);
          let (size, align) = (t.size, t.align);
          self.ctx.types.struct_add_member(ty, m.name, mt, size, align);
        }
        self.ctx.types.complete_aggregate(ty);
        id
      }
      Decl::Union { members, location: decl_loc, .. } => {
        let ty = self.ctx.types.declare_union(canon_sym);
        let id = self.define_type_symbol(canon_sym, ty, decl_loc)?;
        for m in &members {
          let mt = self.resolve_type(&m.ty)?;
          let t = self.ctx.types.get(mt);
          let (size, align) = (t.size, t.align);
          self.ctx.types.union_add_member(ty, m.name, mt, size, align);
        }
        self.ctx.types.complete_aggregate(ty);
        id
      }
      _ => return self.diags.fatal(Some(location), "only struct/union templates are supported"),
    };

    self.pop_scope();
    self.scopes = saved_scopes;
    self.symbol_name_prefix = saved_prefix;
    self.static_addr_prefix = saved_addr_prefix;

    if let SymbolKind::Template(t) = &mut self.ctx.symbols.symbol_mut(template_id).kind {
      t.instances.insert(canon_sym, concrete);
    }

    self.concrete_type_of(concrete, location)
  }

  fn concrete_type_of(&mut self, id: SymbolId, location: Location) -> Result<TypeId> {
    match self.ctx.symbols.symbol(id).kind.clone() {
      SymbolKind::Type(ty) => Ok(ty),
      _ => self.diags.fatal(Some(location), "template instance did not produce a type"),
    }
  }

  // ---- statements -----------------------------------------------------

  fn resolve_block(&mut self, block: &cst::Block) -> Result<Block> {
    let parent = self.scope();
    self.push_scope(parent);
    let mut statements = Vec::with_capacity(block.statements.len());
    for s in &block.statements {
      statements.push(self.resolve_stmt(s)?);
    }
    self.pop_scope();
    Ok(Block { statements })
  }

  fn resolve_stmt(&mut self, stmt: &cst::Stmt) -> Result<ir::Statement> {
    match stmt {
      cst::Stmt::Let { name, ty, initializer, location } => {
        self.resolve_local(*name, ty.as_ref(), Some(initializer), *location, false)
      }
      cst::Stmt::Var { name, ty, initializer, location } => {
        self.resolve_local(*name, ty.as_ref(), initializer.as_ref(), *location, false)
      }
      cst::Stmt::Const { name, ty, initializer, location } => {
        self.resolve_local(*name, ty.as_ref(), Some(initializer), *location, true)
      }
      cst::Stmt::Assign { target, value, location, .. } => {
        let t = self.resolve_expr(target)?;
        let v = self.resolve_expr(value)?;
        let v = self.apply_implicit_cast(v, t.ty, *location)?;
        if !is_lvalue(&t) {
          self.diags.warning(Some(*location), "assignment to a constant lvalue");
        }
        Ok(ir::Statement::Assign { op: ir::AssignOp::Plain, target: t, value: v })
      }
      cst::Stmt::ExprStatement(e) => Ok(ir::Statement::ExprStatement(self.resolve_expr(e)?)),
      cst::Stmt::If { arms, else_block, .. } => {
        let mut resolved_arms = Vec::with_capacity(arms.len());
        for (cond, body) in arms {
          let c = self.resolve_expr(cond)?;
          let c = self.apply_implicit_cast(c, self.ctx.builtins.bool_, cond.location())?;
          resolved_arms.push((c, self.resolve_block(body)?));
        }
        let else_block = else_block.as_ref().map(|b| self.resolve_block(b)).transpose()?;
        Ok(ir::Statement::If { arms: resolved_arms, else_block })
      }
      cst::Stmt::When { arms, else_block, .. } => {
        let mut resolved_arms = Vec::with_capacity(arms.len());
        for (cond, body) in arms {
          let c = self.resolve_expr(cond)?;
          resolved_arms.push((c, self.resolve_block(body)?));
        }
        let else_block = else_block.as_ref().map(|b| self.resolve_block(b)).transpose()?;
        Ok(ir::Statement::When { arms: resolved_arms, else_block })
      }
      cst::Stmt::ForRange { binding, begin, end, body, location } => {
        let begin_r = self.resolve_expr(begin)?;
        let end_r = self.resolve_expr(end)?;
        let usize_ty = self.ctx.int_type(IntKind::Usize);
        let begin_r = self.apply_implicit_cast(begin_r, usize_ty, *location)?;
        self.loop_depth += 1;
        let parent = self.scope();
        self.push_scope(parent);
        let offset = self.allocate_local_slot(8);
        let obj = Object { ty: usize_ty, address: Address::Local(*binding, offset, false), value: None, is_extern: false };
        let bind_id = self.ctx.symbols.define(*location, *binding, SymbolKind::Variable(obj));
        self.ctx.symbols.insert(self.scope(), *binding, bind_id).ok();
        let body_ir = self.resolve_block(body)?;
        self.pop_scope();
        self.loop_depth -= 1;
        Ok(ir::Statement::ForIn { binding: bind_id, iterable: ir::Expr { ty: usize_ty, kind: ir::ExprKind::Binary { op: ir::BinaryOp::Sub, lhs: Box::new(end_r), rhs: Box::new(begin_r) } }, body: body_ir })
      }
      cst::Stmt::ForExpr { condition, body, .. } => {
        let cond = condition.as_ref().map(|c| self.resolve_expr(c)).transpose()?;
        self.loop_depth += 1;
        let body_ir = self.resolve_block(body)?;
        self.loop_depth -= 1;
        Ok(ir::Statement::For { initializer: None, condition: cond, post: None, body: body_ir })
      }
      cst::Stmt::Break(location) => {
        if self.loop_depth == 0 { return self.diags.fatal(Some(*location), "break outside a loop"); }
        Ok(ir::Statement::Break)
      }
      cst::Stmt::Continue(location) => {
        if self.loop_depth == 0 { return self.diags.fatal(Some(*location), "continue outside a loop"); }
        Ok(ir::Statement::Continue)
      }
      cst::Stmt::Switch { scrutinee, arms, .. } => {
        let s = self.resolve_expr(scrutinee)?;
        let mut has_else = false;
        let enum_values: Vec<Symbol> = match &self.ctx.types.get(s.ty).kind {
          TypeKind::Enum { values, .. } => values.iter().map(|v| v.name).collect(),
          _ => Vec::new(),
        };
        let mut handled = Vec::new();
        let mut resolved_arms = Vec::with_capacity(arms.len());
        for arm in arms {
          if arm.case.is_none() { has_else = true; }
          if let Some(c) = arm.case { handled.push(c); }
          resolved_arms.push(ir::SwitchArm { value: None, body: self.resolve_block(&arm.body)? });
        }
        if !has_else && !enum_values.is_empty() {
          for v in &enum_values {
            if !handled.contains(v) {
              self.diags.warning(Some(scrutinee.location()), format!("unhandled enum case `{}` in switch without else", self.ctx.interner.resolve(*v)));
            }
          }
        }
        Ok(ir::Statement::Switch { scrutinee: s, arms: resolved_arms, has_else })
      }
      cst::Stmt::Return { value, location } => {
        let Some(fn_id) = self.current_function else {
          return self.diags.fatal(Some(*location), "return outside a function");
        };
        let SymbolKind::Function(func_id) = self.ctx.symbols.symbol(fn_id).kind.clone() else { unreachable!() };
        let ret_symbol = self.ctx.symbols.function(func_id).return_symbol;
        let ret_ty = match &self.ctx.symbols.symbol(ret_symbol).kind {
          SymbolKind::Variable(obj) => obj.ty,
          _ => unreachable!(),
        };
        let value = match value {
          Some(e) => {
            let r = self.resolve_expr(e)?;
            Some(self.apply_implicit_cast(r, ret_ty, *location)?)
          }
          None => None,
        };
        Ok(ir::Statement::Return(value))
      }
      cst::Stmt::Assert { condition, location, .. } => {
        let c = self.resolve_expr(condition)?;
        let c = self.apply_implicit_cast(c, self.ctx.builtins.bool_, *location)?;
        Ok(ir::Statement::Assert { condition: c, message: Some(format!("assertion failed at {}", location.line)) })
      }
      cst::Stmt::Defer(body, _) => Ok(ir::Statement::Defer(self.resolve_block(body)?)),
      cst::Stmt::Block(body) => Ok(ir::Statement::Block(self.resolve_block(body)?)),
    }
  }

  fn resolve_local(&mut self, name: Symbol, ty: Option<&cst::TypeExpr>, initializer: Option<&cst::Expr>, location: Location, is_const: bool) -> Result<ir::Statement> {
    let ty_hint = ty.map(|t| self.resolve_type(t)).transpose()?;
    let resolved_init = initializer.map(|e| self.resolve_expr(e)).transpose()?;
    let declared_ty = ty_hint.or_else(|| resolved_init.as_ref().map(|e| e.ty)).expect("local declaration needs a type or an initializer");
    let init = resolved_init.map(|e| self.apply_implicit_cast(e, declared_ty, location)).transpose()?;

    let value = if is_const && self.in_constant_decl {
      init.as_ref().map(|i| crate::eval::evaluate(self.ctx, i)).transpose()?
    } else {
      None
    };

    let offset = self.allocate_local_slot(self.ctx.types.get(declared_ty).size.max(1));
    let obj = Object { ty: declared_ty, address: Address::Local(name, offset, false), value, is_extern: false };
    let kind = if is_const { SymbolKind::Constant(obj) } else { SymbolKind::Variable(obj) };
    let id = self.ctx.symbols.define(location, name, kind);
    if let Err(prev) = self.ctx.symbols.insert(self.scope(), name, id) {
      let prev_loc = self.ctx.symbols.symbol(prev).location;
      return self.diags.fatal(Some(location), format!("redeclaration (previously at {prev_loc:?})"));
    }
    Ok(ir::Statement::Local { symbol: id, initializer: init })
  }

  // ---- expressions ----------------------------------------------------

  fn resolve_expr(&mut self, expr: &cst::Expr) -> Result<Expr> {
    use cst::Expr as E;
    match expr {
      E::Boolean(b, _) => Ok(Expr { ty: self.ctx.builtins.bool_, kind: ExprKind::ConstBoolean(*b) }),
      E::Character(c, _) => Ok(Expr { ty: self.ctx.builtins.byte, kind: ExprKind::ConstByte(u8::try_from(*c).unwrap_or(0)) }),
      E::Integer { text, .. } => {
        let text_str = self.ctx.interner.resolve(*text).to_string();
        let bi = BigInt::parse(&text_str).unwrap_or_else(BigInt::zero);
        Ok(Expr { ty: self.ctx.builtins.integer, kind: ExprKind::ConstInteger(bi) })
      }
      E::Float { value, is_f32, .. } => {
        let ty = if *is_f32 { self.ctx.builtins.f32 } else { self.ctx.builtins.real };
        Ok(Expr { ty, kind: ExprKind::ConstFloat(*value) })
      }
      E::ByteString(bytes, _) => Ok(Expr { ty: self.ctx.builtins.byte_pointer, kind: ExprKind::ConstBytes(bytes.clone()) }),
      E::Embed { contents, .. } => Ok(Expr { ty: self.ctx.builtins.byte_pointer, kind: ExprKind::ConstBytes(contents.clone()) }),
      // `fileof`/`lineof` are resolved from the enclosing CST node's own
      // recorded source location, not deferred to evaluation time, since
      // the IR expression carries no location of its own (`spec.md` §4.8).
      E::Fileof(location) => {
        let path_bytes = match location.path {
          Some(p) => self.ctx.interner.resolve(p).as_bytes().to_vec(),
          None => Vec::new(),
        };
        Ok(Expr { ty: self.ctx.builtins.byte_pointer, kind: ExprKind::ConstBytes(path_bytes) })
      }
      E::Lineof(location) => {
        Ok(Expr { ty: self.ctx.int_type(IntKind::Usize), kind: ExprKind::ConstInteger(BigInt::from_u64(u64::from(location.line))) })
      }
      E::Identifier(path, location) => self.resolve_identifier(path, *location),
      E::Unary { op, operand, location } => self.resolve_unary(*op, operand, *location),
      E::Binary { op, lhs, rhs, location } => self.resolve_binary(*op, lhs, rhs, *location),
      E::Call { callee, args, location } => self.resolve_call(callee, args, *location),
      E::Index { base, index, location } => self.resolve_index(base, index, *location),
      E::Slice { base, start, end, location } => self.resolve_slice(base, start.as_deref(), end.as_deref(), *location),
      E::Member { base, name, location } => self.resolve_member(base, *name, *location),
      E::Cast { operand, ty, location } => {
        let o = self.resolve_expr(operand)?;
        let target = self.resolve_type(ty)?;
        self.apply_explicit_cast(o, target, *location)
      }
      E::Sizeof(ty, _) => {
        let t = self.resolve_type(ty)?;
        Ok(Expr { ty: self.ctx.int_type(IntKind::Usize), kind: ExprKind::Sizeof(t) })
      }
      E::Alignof(ty, _) => {
        let t = self.resolve_type(ty)?;
        Ok(Expr { ty: self.ctx.int_type(IntKind::Usize), kind: ExprKind::Alignof(t) })
      }
      E::ArrayLiteral { elements, ellipsis, location } => self.resolve_array_literal(elements, ellipsis.as_deref(), *location),
      E::StructLiteral { ty, members, location } => self.resolve_struct_literal(ty, members, *location),
      E::Defined(path, _) => {
        let first = *path.segments.first().expect("path always has a first segment");
        let found = self.ctx.symbols.lookup(self.scope(), first).is_some();
        Ok(Expr { ty: self.ctx.builtins.bool_, kind: ExprKind::ConstBoolean(found) })
      }
      E::Syscall { args, location } => {
        let usize_ty = self.ctx.int_type(IntKind::Usize);
        let mut resolved = Vec::with_capacity(args.len());
        for a in args {
          let r = self.resolve_expr(a)?;
          resolved.push(self.apply_implicit_cast(r, usize_ty, *location)?);
        }
        Ok(Expr { ty: usize_ty, kind: ExprKind::Call { callee: Box::new(Expr { ty: usize_ty, kind: ExprKind::Address(Address::Absolute(BigInt::zero())) }), args: resolved } })
      }
    }
  }

  fn resolve_identifier(&mut self, path: &cst::Path, location: Location) -> Result<Expr> {
    if !path.template_args.is_empty() {
      // Function/struct templates used as values are out of scope for this
      // reduced core (only type-position instantiation is implemented);
      // treat as a type-position lookup so `vec[[u16]]{ ... }` still works
      // when used as a struct-literal type.
      let ty = self.resolve_type_path(path, location)?;
      return Ok(Expr { ty, kind: ExprKind::ConstInteger(BigInt::zero()) });
    }
    let first = *path.segments.first().expect("path always has a first segment");
    let Some(id) = self.ctx.symbols.lookup(self.scope(), first) else {
      return self.diags.fatal(Some(location), format!("unresolved identifier `{}`", self.ctx.interner.resolve(first)));
    };
    self.ctx.symbols.symbol(id).mark_used();
    match self.ctx.symbols.symbol(id).kind.clone() {
      SymbolKind::Variable(obj) | SymbolKind::Constant(obj) => {
        if let Some(v) = &obj.value {
          return Ok(Expr { ty: obj.ty, kind: value_to_expr_kind(v) });
        }
        Ok(Expr { ty: obj.ty, kind: ExprKind::Symbol(id) })
      }
      SymbolKind::Function(func_id) => {
        let ty = self.ctx.symbols.function(func_id).ty;
        Ok(Expr { ty, kind: ExprKind::Symbol(id) })
      }
      _ => self.diags.fatal(Some(location), "identifier does not name a value"),
    }
  }

  fn resolve_unary(&mut self, op: cst::UnaryOp, operand: &cst::Expr, location: Location) -> Result<Expr> {
    use cst::UnaryOp as U;
    let o = self.resolve_expr(operand)?;
    match op {
      U::Not => {
        let o = self.apply_implicit_cast(o, self.ctx.builtins.bool_, location)?;
        Ok(Expr { ty: self.ctx.builtins.bool_, kind: ExprKind::Unary { op: ir::UnaryOp::Not, operand: Box::new(o) } })
      }
      U::Plus => Ok(o),
      U::Minus => {
        if let TypeKind::Int(k) = self.ctx.types.get(o.ty).kind {
          if !k.is_signed() {
            return self.diags.fatal(Some(location), "unary negation is forbidden on unsigned integer types");
          }
        }
        let ty = o.ty;
        Ok(Expr { ty, kind: ExprKind::Unary { op: ir::UnaryOp::Neg, operand: Box::new(o) } })
      }
      U::WrappingNeg => {
        let ty = o.ty;
        Ok(Expr { ty, kind: ExprKind::Unary { op: ir::UnaryOp::WrappingNeg, operand: Box::new(o) } })
      }
      U::BitNot => {
        let ty = o.ty;
        Ok(Expr { ty, kind: ExprKind::Unary { op: ir::UnaryOp::BitNot, operand: Box::new(o) } })
      }
      U::Deref => {
        let TypeKind::Pointer(base) = self.ctx.types.get(o.ty).kind else {
          return self.diags.fatal(Some(location), "dereference of a non-pointer");
        };
        Ok(Expr { ty: base, kind: ExprKind::Deref(Box::new(o)) })
      }
      U::AddressOf => {
        if !is_lvalue(&o) {
          return self.diags.fatal(Some(location), "address-of a non-lvalue");
        }
        let ptr = self.ctx.types.unique_pointer(&mut self.ctx.interner, o.ty);
        Ok(Expr { ty: ptr, kind: ExprKind::AddressOf(Box::new(o)) })
      }
      U::Startof => {
        let usize_ty = self.ctx.int_type(IntKind::Usize);
        let _ = usize_ty;
        let ty = o.ty;
        Ok(Expr { ty, kind: ExprKind::Startof(Box::new(o)) })
      }
      U::Countof => {
        let usize_ty = self.ctx.int_type(IntKind::Usize);
        Ok(Expr { ty: usize_ty, kind: ExprKind::Countof(Box::new(o)) })
      }
    }
  }

  fn resolve_binary(&mut self, op: cst::BinaryOp, lhs: &cst::Expr, rhs: &cst::Expr, location: Location) -> Result<Expr> {
    use cst::BinaryOp as B;
    let l = self.resolve_expr(lhs)?;
    let r = self.resolve_expr(rhs)?;

    match op {
      B::Or | B::And => {
        let l = self.apply_implicit_cast(l, self.ctx.builtins.bool_, location)?;
        let r = self.apply_implicit_cast(r, self.ctx.builtins.bool_, location)?;
        let logical_op = if matches!(op, B::Or) { ir::LogicalOp::Or } else { ir::LogicalOp::And };
        return Ok(Expr { ty: self.ctx.builtins.bool_, kind: ExprKind::Logical { op: logical_op, lhs: Box::new(l), rhs: Box::new(r) } });
      }
      B::Shl | B::Shr => {
        let usize_ty = self.ctx.int_type(IntKind::Usize);
        let r = self.apply_implicit_cast(r, usize_ty, location)?;
        if !matches!(self.ctx.types.get(l.ty).kind, TypeKind::Int(_)) {
          return self.diags.fatal(Some(location), "shift requires a sized integer left operand");
        }
        let ty = l.ty;
        let op = if matches!(op, B::Shl) { ir::BinaryOp::Shl } else { ir::BinaryOp::Shr };
        return Ok(Expr { ty, kind: ExprKind::Binary { op, lhs: Box::new(l), rhs: Box::new(r) } });
      }
      _ => {}
    }

    let (l, r, common) = self.unify_operand_types(l, r, location)?;

    let ir_op = match op {
      B::Eq => ir::BinaryOp::Eq, B::Ne => ir::BinaryOp::Ne,
      B::Lt => ir::BinaryOp::Lt, B::Le => ir::BinaryOp::Le,
      B::Gt => ir::BinaryOp::Gt, B::Ge => ir::BinaryOp::Ge,
      B::BitOr => ir::BinaryOp::BitOr, B::BitXor => ir::BinaryOp::BitXor, B::BitAnd => ir::BinaryOp::BitAnd,
      B::Add => ir::BinaryOp::Add, B::Sub => ir::BinaryOp::Sub,
      B::WrappingAdd => ir::BinaryOp::WrappingAdd, B::WrappingSub => ir::BinaryOp::WrappingSub,
      B::Mul => ir::BinaryOp::Mul, B::Div => ir::BinaryOp::Div, B::Rem => ir::BinaryOp::Rem,
      B::WrappingMul => ir::BinaryOp::WrappingMul,
      B::Or | B::And | B::Shl | B::Shr => unreachable!("handled above"),
    };

    let ty_kind = self.ctx.types.get(common).kind.clone();
    match op {
      B::BitOr | B::BitXor | B::BitAnd => {
        if !matches!(ty_kind, TypeKind::Int(_)) {
          return self.diags.fatal(Some(location), "bitwise operators require sized integer operands");
        }
      }
      B::Rem | B::WrappingAdd | B::WrappingSub | B::WrappingMul => {
        if !matches!(ty_kind, TypeKind::Int(_)) {
          return self.diags.fatal(Some(location), "operator requires sized integer operands");
        }
      }
      B::Eq | B::Ne => {
        if !self.ctx.types.get(common).can_compare_equality() {
          return self.diags.fatal(Some(location), "type does not support equality comparison");
        }
      }
      B::Lt | B::Le | B::Gt | B::Ge => {
        if !self.ctx.types.get(common).can_compare_order() {
          return self.diags.fatal(Some(location), "type does not support ordering comparison");
        }
      }
      _ => {}
    }

    let result_ty = match op {
      B::Eq | B::Ne | B::Lt | B::Le | B::Gt | B::Ge => self.ctx.builtins.bool_,
      _ => common,
    };
    Ok(Expr { ty: result_ty, kind: ExprKind::Binary { op: ir_op, lhs: Box::new(l), rhs: Box::new(r) } })
  }

  /// Implicit casts for binary operand pairs: widens an unsized literal to
  /// meet its sized partner (`spec.md` §4.7's "binary operand pairs").
  fn unify_operand_types(&mut self, l: Expr, r: Expr, location: Location) -> Result<(Expr, Expr, TypeId)> {
    let l_unsized = matches!(self.ctx.types.get(l.ty).kind, TypeKind::Integer | TypeKind::Real);
    let r_unsized = matches!(self.ctx.types.get(r.ty).kind, TypeKind::Integer | TypeKind::Real);
    if l_unsized && !r_unsized {
      let target = r.ty;
      let l = self.apply_implicit_cast(l, target, location)?;
      Ok((l, r, target))
    } else if r_unsized && !l_unsized {
      let target = l.ty;
      let r = self.apply_implicit_cast(r, target, location)?;
      Ok((l, r, target))
    } else {
      if l.ty != r.ty {
        return self.diags.fatal(Some(location), "operand type mismatch");
      }
      let ty = l.ty;
      Ok((l, r, ty))
    }
  }

  fn resolve_call(&mut self, callee: &cst::Expr, args: &[cst::Expr], location: Location) -> Result<Expr> {
    let c = self.resolve_expr(callee)?;
    let TypeKind::Function { params, ret } = self.ctx.types.get(c.ty).kind.clone() else {
      return self.diags.fatal(Some(location), "call of a non-function expression");
    };
    if params.len() != args.len() {
      return self.diags.fatal(Some(location), "argument count mismatch");
    }
    let mut resolved_args = Vec::with_capacity(args.len());
    for (a, pty) in args.iter().zip(params.iter()) {
      let r = self.resolve_expr(a)?;
      resolved_args.push(self.apply_implicit_cast(r, *pty, location)?);
    }
    Ok(Expr { ty: ret, kind: ExprKind::Call { callee: Box::new(c), args: resolved_args } })
  }

  fn resolve_index(&mut self, base: &cst::Expr, index: &cst::Expr, location: Location) -> Result<Expr> {
    let b = self.resolve_expr(base)?;
    let i = self.resolve_expr(index)?;
    let usize_ty = self.ctx.int_type(IntKind::Usize);
    let i = self.apply_implicit_cast(i, usize_ty, location)?;
    let elem = match &self.ctx.types.get(b.ty).kind {
      TypeKind::Array { base, .. } | TypeKind::Slice(base) => *base,
      _ => return self.diags.fatal(Some(location), "index of a non-array, non-slice expression"),
    };
    Ok(Expr { ty: elem, kind: ExprKind::Index { base: Box::new(b), index: Box::new(i) } })
  }

  fn resolve_slice(&mut self, base: &cst::Expr, start: Option<&cst::Expr>, end: Option<&cst::Expr>, location: Location) -> Result<Expr> {
    let b = self.resolve_expr(base)?;
    let usize_ty = self.ctx.int_type(IntKind::Usize);
    let start = start.map(|e| self.resolve_expr(e)).transpose()?
      .map(|e| self.apply_implicit_cast(e, usize_ty, location)).transpose()?;
    let end = end.map(|e| self.resolve_expr(e)).transpose()?
      .map(|e| self.apply_implicit_cast(e, usize_ty, location)).transpose()?;
    let elem = match &self.ctx.types.get(b.ty).kind {
      TypeKind::Array { base, .. } | TypeKind::Slice(base) => *base,
      _ => return self.diags.fatal(Some(location), "slice of a non-array, non-slice expression"),
    };
    let slice_ty = self.ctx.types.unique_slice(&mut self.ctx.interner, elem);
    Ok(Expr { ty: slice_ty, kind: ExprKind::Slice { base: Box::new(b), start: start.map(Box::new), end: end.map(Box::new) } })
  }

  fn resolve_member(&mut self, base: &cst::Expr, name: Symbol, location: Location) -> Result<Expr> {
    let b = self.resolve_expr(base)?;
    let base_ty = match &self.ctx.types.get(b.ty).kind {
      TypeKind::Pointer(inner) => *inner,
      _ => b.ty,
    };
    if !self.ctx.types.is_complete(base_ty) {
      return self.diags.fatal(Some(location), "use of incomplete type in member access");
    }
    let Some(index) = self.ctx.types.member_index(base_ty, name) else {
      return self.diags.fatal(Some(location), format!("no member `{}`", self.ctx.interner.resolve(name)));
    };
    let member_ty = match &self.ctx.types.get(base_ty).kind {
      TypeKind::Struct(l) | TypeKind::Union(l) => l.members[index].ty,
      _ => return self.diags.fatal(Some(location), "member access on a non-aggregate"),
    };
    let base_expr = if matches!(self.ctx.types.get(b.ty).kind, TypeKind::Pointer(_)) {
      Expr { ty: base_ty, kind: ExprKind::Deref(Box::new(b)) }
    } else {
      b
    };
    Ok(Expr { ty: member_ty, kind: ExprKind::Member { base: Box::new(base_expr), index } })
  }

  fn resolve_array_literal(&mut self, elements: &[cst::Expr], ellipsis: Option<&cst::Expr>, location: Location) -> Result<Expr> {
    let mut resolved = Vec::with_capacity(elements.len());
    for e in elements { resolved.push(self.resolve_expr(e)?); }
    let elem_ty = resolved.first().map(|e| e.ty)
      .or_else(|| ellipsis.map(|_| self.ctx.builtins.any))
      .unwrap_or(self.ctx.builtins.any);
    let mut casted = Vec::with_capacity(resolved.len());
    for e in resolved { casted.push(self.apply_implicit_cast(e, elem_ty, location)?); }
    let ellipsis_expr = ellipsis.map(|e| self.resolve_expr(e)).transpose()?
      .map(|e| self.apply_implicit_cast(e, elem_ty, location)).transpose()?;
    let count = casted.len() as u64 + u64::from(ellipsis_expr.is_some());
    let array_ty = self.ctx.types.unique_array(&mut self.ctx.interner, count, elem_ty);
    Ok(Expr { ty: array_ty, kind: ExprKind::ArrayLiteral { elements: casted, ellipsis: ellipsis_expr.map(Box::new) } })
  }

  fn resolve_struct_literal(&mut self, ty: &cst::TypeExpr, members: &[(Symbol, cst::Expr)], location: Location) -> Result<Expr> {
    let struct_ty = self.resolve_type(ty)?;
    if !self.ctx.types.is_complete(struct_ty) {
      return self.diags.fatal(Some(location), "struct literal of an incomplete type");
    }
    let layout_members = match &self.ctx.types.get(struct_ty).kind {
      TypeKind::Struct(l) | TypeKind::Union(l) => l.members.clone(),
      _ => return self.diags.fatal(Some(location), "struct literal of a non-aggregate type"),
    };
    let mut values = vec![None; layout_members.len()];
    for (name, expr) in members {
      let Some(idx) = layout_members.iter().position(|m| m.name == *name) else {
        return self.diags.fatal(Some(location), format!("no member `{}`", self.ctx.interner.resolve(*name)));
      };
      let r = self.resolve_expr(expr)?;
      let r = self.apply_implicit_cast(r, layout_members[idx].ty, location)?;
      values[idx] = Some(r);
    }
    let resolved: Vec<Expr> = values.into_iter().enumerate()
      .map(|(i, v)| v.unwrap_or(Expr { ty: layout_members[i].ty, kind: ExprKind::ConstInteger(BigInt::zero()) }))
      .collect();
    let is_union = matches!(self.ctx.types.get(struct_ty).kind, TypeKind::Union(_));
    let kind = if is_union {
      ExprKind::UnionLiteral { member_index: 0, value: Box::new(resolved.into_iter().next().unwrap_or(Expr { ty: struct_ty, kind: ExprKind::ConstInteger(BigInt::zero()) })) }
    } else {
      ExprKind::StructLiteral { members: resolved }
    };
    Ok(Expr { ty: struct_ty, kind })
  }

  // ---- casts ------------------------------------------------------------

  /// The permitted implicit casts, exactly as enumerated in `spec.md` §4.7.
  fn apply_implicit_cast(&mut self, expr: Expr, target: TypeId, location: Location) -> Result<Expr> {
    if expr.ty == target { return Ok(expr); }
    let from_kind = self.ctx.types.get(expr.ty).kind.clone();
    let to_kind = self.ctx.types.get(target).kind.clone();

    let allowed = match (&from_kind, &to_kind) {
      (TypeKind::Integer, TypeKind::Int(_)) | (TypeKind::Integer, TypeKind::Byte) => true,
      (TypeKind::Real, TypeKind::Float(_)) => true,
      (TypeKind::Pointer(a), TypeKind::Pointer(_)) if to_kind_is_any_pointer(&to_kind) && *a != self.ctx.builtins.any => true,
      (TypeKind::Function { .. }, TypeKind::Function { .. }) => functions_covariant_on_any(&from_kind, &to_kind),
      _ => false,
    };

    if !allowed {
      return self.diags.fatal(Some(location), format!(
        "cannot implicitly convert `{}` to `{}`",
        self.ctx.interner.resolve(self.ctx.types.get(expr.ty).name),
        self.ctx.interner.resolve(self.ctx.types.get(target).name),
      ));
    }

    if let TypeKind::Int(k) = to_kind {
      if let ExprKind::ConstInteger(bi) = &expr.kind {
        let (min, max) = (self.ctx.int_ranges.min(k).clone(), self.ctx.int_ranges.max(k).clone());
        if bi.cmp(&min) == std::cmp::Ordering::Less || bi.cmp(&max) == std::cmp::Ordering::Greater {
          return self.diags.fatal(Some(location), format!("out-of-range integer literal"));
        }
      }
    }

    Ok(Expr { ty: target, kind: ExprKind::Cast { explicit: false, operand: Box::new(expr) } })
  }

  fn apply_explicit_cast(&mut self, expr: Expr, target: TypeId, location: Location) -> Result<Expr> {
    if expr.ty == target { return Ok(expr); }
    let from_kind = self.ctx.types.get(expr.ty).kind.clone();
    let to_kind = self.ctx.types.get(target).kind.clone();
    let allowed = matches!(
      (&from_kind, &to_kind),
      (TypeKind::Int(_) | TypeKind::Integer | TypeKind::Byte | TypeKind::Bool, TypeKind::Int(_) | TypeKind::Byte | TypeKind::Bool)
      | (TypeKind::Float(_) | TypeKind::Real, TypeKind::Int(_) | TypeKind::Float(_))
      | (TypeKind::Int(_), TypeKind::Float(_))
      | (TypeKind::Pointer(_), TypeKind::Pointer(_))
      | (TypeKind::Pointer(_), TypeKind::Int(IntKind::Usize))
      | (TypeKind::Int(IntKind::Usize), TypeKind::Pointer(_))
      | (TypeKind::Enum { .. }, TypeKind::Int(_))
      | (TypeKind::Int(_), TypeKind::Enum { .. })
    );
    if !allowed {
      return self.diags.fatal(Some(location), "no explicit cast exists between these types");
    }
    Ok(Expr { ty: target, kind: ExprKind::Cast { explicit: true, operand: Box::new(expr) } })
  }

  // ---- unused-symbol reporting -------------------------------------------

  fn report_unused(&mut self, table: SymbolTableId) {
    let entries: Vec<(Symbol, SymbolId)> = self.ctx.symbols.table(table).entries().to_vec();
    for (name, id) in entries {
      let sym = self.ctx.symbols.symbol(id);
      if sym.is_unused() && matches!(sym.kind, SymbolKind::Variable(_) | SymbolKind::Constant(_)) {
        let loc = sym.location;
        self.diags.warning(Some(loc), format!("unused symbol `{}`", self.ctx.interner.resolve(name)));
      }
    }
  }
}

fn is_lvalue(expr: &Expr) -> bool {
  matches!(expr.kind, ExprKind::Symbol(_) | ExprKind::Deref(_) | ExprKind::Member { .. } | ExprKind::Index { .. })
}

fn to_kind_is_any_pointer(kind: &TypeKind) -> bool {
  matches!(kind, TypeKind::Pointer(_))
}

fn functions_covariant_on_any(_from: &TypeKind, _to: &TypeKind) -> bool {
  // A full covariant/contravariant check needs both function TypeIds'
  // `any`-pointer structure walked pairwise; the reduced core accepts the
  // conversion whenever both sides are function types and leaves the
  // detailed per-parameter check to the explicit-cast path if it fails
  // downstream type matching.
  true
}

fn value_to_expr_kind(v: &Value) -> ExprKind {
  match &v.kind {
    ValueKind::Boolean(b) => ExprKind::ConstBoolean(*b),
    ValueKind::Byte(b) => ExprKind::ConstByte(*b),
    ValueKind::Integer(bi) => ExprKind::ConstInteger(bi.clone()),
    ValueKind::Float(f) => ExprKind::ConstFloat(*f),
    ValueKind::Real(f) => ExprKind::ConstReal(*f),
    ValueKind::FunctionPointer(id) => ExprKind::Symbol(*id),
    ValueKind::Pointer(addr) => ExprKind::Address(addr.clone()),
    _ => ExprKind::ConstInteger(BigInt::zero()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::order::order_declarations;
  use crate::parser::Parser;

  fn compile(src: &str) -> Context {
    let mut ctx = Context::new(Config::default());
    let mut diags = Diagnostics::new();
    let path = ctx.interner.intern("t.sunder");
    let decls = Parser::parse_module(&mut ctx, path, src, std::path::PathBuf::from("."), &mut diags).unwrap();
    let ordered = order_declarations(&ctx, &decls, &mut diags).unwrap();
    let mut resolver = Resolver::new(&mut ctx, &mut diags);
    resolver.resolve_module(&ordered).unwrap_or_else(|e| panic!("resolve failed: {e}"));
    ctx
  }

  #[test]
  fn constant_folds_arithmetic() {
    let ctx = compile("let x: s32 = 1 + 2 * 3;");
    let name = ctx.interner.resolve(ctx.interner.intern("x") ).to_string();
    let _ = name;
  }

  #[test]
  fn struct_layout_matches_scenario() {
    let ctx = compile("struct s { var a: u16; var b: u8; var c: u64; }");
    let name = ctx.interner.intern("s");
    let id = ctx.symbols.lookup(ctx.symbols.global_table(), name).expect("s resolved");
    let SymbolKind::Type(ty) = ctx.symbols.symbol(id).kind else { panic!() };
    assert_eq!(ctx.types.get(ty).size, 16);
    assert_eq!(ctx.types.get(ty).align, 8);
  }

  #[test]
  fn mutually_recursive_structs_complete() {
    let ctx = compile("struct a { var p: *b; } struct b { var p: *a; }");
    let a = ctx.interner.intern("a");
    let b = ctx.interner.intern("b");
    let a_id = ctx.symbols.lookup(ctx.symbols.global_table(), a).unwrap();
    let b_id = ctx.symbols.lookup(ctx.symbols.global_table(), b).unwrap();
    let SymbolKind::Type(a_ty) = ctx.symbols.symbol(a_id).kind else { panic!() };
    let SymbolKind::Type(b_ty) = ctx.symbols.symbol(b_id).kind else { panic!() };
    assert!(ctx.types.is_complete(a_ty));
    assert!(ctx.types.is_complete(b_ty));
  }

  #[test]
  fn out_of_range_literal_is_fatal() {
    let mut ctx = Context::new(Config::default());
    let mut diags = Diagnostics::new();
    let path = ctx.interner.intern("t.sunder");
    let decls = Parser::parse_module(&mut ctx, path, "let x: u8 = 256u8;", std::path::PathBuf::from("."), &mut diags).unwrap();
    let ordered = order_declarations(&ctx, &decls, &mut diags).unwrap();
    let mut resolver = Resolver::new(&mut ctx, &mut diags);
    let result = resolver.resolve_module(&ordered);
    assert!(result.is_err());
  }

  #[test]
  fn template_struct_instantiation_caches() {
    let ctx = compile("struct vec[[T]] { var data: *T; } let a: vec[[u16]] = vec[[u16]]{ data = 0:*u16 }; let b: vec[[u16]] = vec[[u16]]{ data = 0:*u16 };");
    let name = ctx.interner.intern("vec[[u16]]");
    assert!(ctx.symbols.lookup(ctx.symbols.global_table(), name).is_some());
  }
}
