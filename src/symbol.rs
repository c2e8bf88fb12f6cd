//! Symbol tables, the address model, and object/value bindings
//! (`spec.md` §3, §4.6).

use std::cell::Cell;

use hashbrown::HashMap;

use crate::diag::Location;
use crate::intern::Symbol as Name;
use crate::types::TypeId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SymbolId(pub(crate) u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SymbolTableId(pub(crate) u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FunctionId(pub(crate) u32);

/// Abstract storage location.
#[derive(Clone, Debug, PartialEq)]
pub enum Address {
  Absolute(crate::bignum::BigInt),
  /// Globally-unique, assembler-safe static name plus a byte offset (used
  /// when taking the address of a member of a static aggregate).
  Static(Name, u64),
  /// rbp-relative local: owning function's normalized name (for
  /// diagnostics only), the signed byte offset, and whether this is a
  /// caller-pushed parameter (positive offsets) versus a callee-owned local
  /// (negative offsets).
  Local(Name, i64, bool),
}

/// A typed compile-time constant. Trees, not graphs: no `Value` ever
/// contains a cycle, so ordinary ownership (`Box`/`Vec`) is sufficient and
/// no arena indirection is needed. Once built, a `Value` is never mutated
/// in place (the "frozen" invariant in `spec.md` §3 is therefore enforced
/// structurally: there is no `&mut` API on `Value` after construction).
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
  pub ty: TypeId,
  pub kind: ValueKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
  Boolean(bool),
  Byte(u8),
  Integer(crate::bignum::BigInt),
  Float(f64),
  Real(f64),
  FunctionPointer(SymbolId),
  /// Compile-time pointer constant; only `Address::Absolute`/`Address::Static`
  /// ever appear here (address-of a local is not constant-foldable, per
  /// `spec.md` §4.8).
  Pointer(Address),
  Array { elements: Vec<Value>, ellipsis: Option<Box<Value>> },
  Slice { pointer: Box<Value>, count: Box<Value> },
  Struct { members: Vec<Value> },
  Union { member_index: usize, value: Box<Value> },
}

/// A storage location: type, address, optional known compile-time value,
/// and whether the declaration was `extern`.
#[derive(Clone, Debug)]
pub struct Object {
  pub ty: TypeId,
  pub address: Address,
  pub value: Option<Value>,
  pub is_extern: bool,
}

/// A function: signature, address, enclosing scope, parameter/return
/// symbols, body, and the local-stack bookkeeping the resolver accumulates
/// while resolving the body. `body` is `None` until the resolver's
/// function-body worklist reaches this function (bodies are resolved after
/// every top-level declaration, per `spec.md` §4.7).
#[derive(Clone, Debug)]
pub struct Function {
  pub name: Name,
  pub ty: TypeId,
  pub address: Address,
  pub enclosing: SymbolTableId,
  pub params: Vec<SymbolId>,
  pub return_symbol: SymbolId,
  pub body: Option<crate::ir::Block>,
  pub local_stack_offset: i64,
  pub is_extern: bool,
}

/// A template declaration awaiting instantiation.
#[derive(Clone, Debug)]
pub struct TemplateDecl {
  pub params: Vec<Name>,
  pub decl: crate::cst::DeclId,
  /// Prefixes saved from the point of template declaration, restored
  /// during instantiation so the instance resolves as if written at the
  /// template's own scope (`spec.md` §4.7).
  pub symbol_name_prefix: String,
  pub static_addr_prefix: String,
  pub enclosing: SymbolTableId,
  /// Cache from canonicalized instantiation name (e.g. `vec[[u16]]`) to the
  /// concrete symbol produced for that argument list.
  pub instances: HashMap<Name, SymbolId>,
}

#[derive(Clone, Debug)]
pub enum SymbolKind {
  Type(TypeId),
  Variable(Object),
  Constant(Object),
  Function(FunctionId),
  Template(TemplateDecl),
  Namespace(SymbolTableId),
}

/// A declaration binding: location, qualified interned name, a use counter
/// for unused-symbol warnings, and kind-specific payload.
#[derive(Clone, Debug)]
pub struct Symbol {
  pub location: Location,
  pub name: Name,
  pub use_count: Cell<u32>,
  pub kind: SymbolKind,
}

impl Symbol {
  pub fn mark_used(&self) { self.use_count.set(self.use_count.get() + 1); }
  #[must_use] pub fn is_unused(&self) -> bool { self.use_count.get() == 0 }
}

/// Insertion-ordered name -> symbol map with a parent pointer. Local lookup
/// checks only this table; `lookup` walks the parent chain.
pub struct SymbolTable {
  pub parent: Option<SymbolTableId>,
  order: Vec<(Name, SymbolId)>,
  index: HashMap<Name, SymbolId>,
  frozen: bool,
}

impl SymbolTable {
  #[must_use] fn new(parent: Option<SymbolTableId>) -> Self {
    Self { parent, order: Vec::new(), index: HashMap::new(), frozen: false }
  }

  #[must_use] pub fn lookup_local(&self, name: Name) -> Option<SymbolId> { self.index.get(&name).copied() }

  #[must_use] pub fn entries(&self) -> &[(Name, SymbolId)] { &self.order }

  #[must_use] pub fn is_frozen(&self) -> bool { self.frozen }

  pub fn freeze(&mut self) { self.frozen = true; }

  /// Inserts `name -> id`, returning the prior binding if `name` was
  /// already declared in this table (the resolver reports redeclaration
  /// with both locations when this returns `Some`).
  fn insert(&mut self, name: Name, id: SymbolId) -> Option<SymbolId> {
    assert!(!self.frozen, "insertion into a frozen symbol table");
    if let Some(&prev) = self.index.get(&name) { return Some(prev); }
    self.index.insert(name, id);
    self.order.push((name, id));
    None
  }
}

/// Owns every `Symbol`, `SymbolTable`, and `Function` for the whole
/// compilation (process-wide, per `spec.md` §5).
pub struct SymbolArena {
  symbols: Vec<Symbol>,
  tables: Vec<SymbolTable>,
  functions: Vec<Function>,
}

impl SymbolArena {
  #[must_use] pub fn new() -> Self {
    let mut this = Self { symbols: Vec::new(), tables: Vec::new(), functions: Vec::new() };
    this.new_table(None);
    this
  }

  #[must_use] pub fn global_table(&self) -> SymbolTableId { SymbolTableId(0) }

  pub fn new_table(&mut self, parent: Option<SymbolTableId>) -> SymbolTableId {
    let id = SymbolTableId(u32::try_from(self.tables.len()).expect("symbol table overflow"));
    self.tables.push(SymbolTable::new(parent));
    id
  }

  #[must_use] pub fn table(&self, id: SymbolTableId) -> &SymbolTable { &self.tables[id.0 as usize] }
  pub fn table_mut(&mut self, id: SymbolTableId) -> &mut SymbolTable { &mut self.tables[id.0 as usize] }

  /// Walks `id`'s parent chain looking for `name`.
  #[must_use] pub fn lookup(&self, id: SymbolTableId, name: Name) -> Option<SymbolId> {
    let mut cur = Some(id);
    while let Some(t) = cur {
      let table = self.table(t);
      if let Some(found) = table.lookup_local(name) { return Some(found); }
      cur = table.parent;
    }
    None
  }

  pub fn define(&mut self, location: Location, name: Name, kind: SymbolKind) -> SymbolId {
    let id = SymbolId(u32::try_from(self.symbols.len()).expect("symbol arena overflow"));
    self.symbols.push(Symbol { location, name, use_count: Cell::new(0), kind });
    id
  }

  /// Inserts `id` (already constructed via `define`) into `table`, under
  /// `name`. Returns the existing symbol's id and location on redeclaration
  /// conflict, per `spec.md` §4.6 ("any conflict aborts with both
  /// locations").
  pub fn insert(&mut self, table: SymbolTableId, name: Name, id: SymbolId) -> Result<(), SymbolId> {
    match self.table_mut(table).insert(name, id) {
      None => Ok(()),
      Some(prev) => Err(prev),
    }
  }

  #[must_use] pub fn symbol(&self, id: SymbolId) -> &Symbol { &self.symbols[id.0 as usize] }
  pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol { &mut self.symbols[id.0 as usize] }

  pub fn new_function(&mut self, f: Function) -> FunctionId {
    let id = FunctionId(u32::try_from(self.functions.len()).expect("function arena overflow"));
    self.functions.push(f);
    id
  }

  #[must_use] pub fn function(&self, id: FunctionId) -> &Function { &self.functions[id.0 as usize] }
  pub fn function_mut(&mut self, id: FunctionId) -> &mut Function { &mut self.functions[id.0 as usize] }
}

impl Default for SymbolArena {
  fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern::Interner;
  use crate::types::TypeId;

  fn dummy_type() -> TypeId { TypeId(0) }

  #[test]
  fn local_lookup_does_not_walk_parent() {
    let mut arena = SymbolArena::new();
    let mut interner = Interner::new();
    let parent = arena.global_table();
    let child = arena.new_table(Some(parent));
    let name = interner.intern("x");
    let obj = Object { ty: dummy_type(), address: Address::Local(name, -8, false), value: None, is_extern: false };
    let sym = arena.define(Location::builtin(), name, SymbolKind::Variable(obj));
    arena.insert(parent, name, sym).unwrap();
    assert!(arena.table(child).lookup_local(name).is_none());
    assert_eq!(arena.lookup(child, name), Some(sym));
  }

  #[test]
  fn redeclaration_reports_previous_symbol() {
    let mut arena = SymbolArena::new();
    let mut interner = Interner::new();
    let table = arena.global_table();
    let name = interner.intern("x");
    let obj = Object { ty: dummy_type(), address: Address::Static(name, 0), value: None, is_extern: false };
    let first = arena.define(Location::builtin(), name, SymbolKind::Constant(obj.clone()));
    arena.insert(table, name, first).unwrap();
    let second = arena.define(Location::builtin(), name, SymbolKind::Constant(obj));
    let err = arena.insert(table, name, second).unwrap_err();
    assert_eq!(err, first);
  }

  #[test]
  fn use_counter_tracks_references() {
    let mut arena = SymbolArena::new();
    let mut interner = Interner::new();
    let name = interner.intern("x");
    let obj = Object { ty: dummy_type(), address: Address::Static(name, 0), value: None, is_extern: false };
    let id = arena.define(Location::builtin(), name, SymbolKind::Constant(obj));
    assert!(arena.symbol(id).is_unused());
    arena.symbol(id).mark_used();
    assert!(!arena.symbol(id).is_unused());
  }

  #[test]
  #[should_panic(expected = "insertion into a frozen symbol table")]
  fn frozen_table_rejects_insert() {
    let mut arena = SymbolArena::new();
    let mut interner = Interner::new();
    let table = arena.global_table();
    arena.table_mut(table).freeze();
    let name = interner.intern("x");
    let obj = Object { ty: dummy_type(), address: Address::Static(name, 0), value: None, is_extern: false };
    let id = arena.define(Location::builtin(), name, SymbolKind::Constant(obj));
    let _ = arena.insert(table, name, id);
  }
}
