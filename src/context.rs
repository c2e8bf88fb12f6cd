//! The process-wide singleton: interner, type/symbol arenas, module cache,
//! builtin constants, and environment strings (`spec.md` §4.2, §5).

use hashbrown::HashMap;

use crate::bignum::BigInt;
use crate::config::Config;
use crate::cst::CstArena;
use crate::diag::Diagnostics;
use crate::intern::{Interner, Symbol};
use crate::module::Module;
use crate::symbol::SymbolArena;
use crate::types::{FloatKind, IntKind, TypeId, TypeKind, TypeStore};

/// Builtin type handles installed at context construction, per `spec.md`
/// §4.2 ("Initialization installs all builtin types... into both the type
/// list and the global symbol table; also eagerly constructs `*byte` and
/// `[]byte`").
pub struct Builtins {
  pub any: TypeId,
  pub void: TypeId,
  pub bool_: TypeId,
  pub byte: TypeId,
  pub integer: TypeId,
  pub real: TypeId,
  pub f32: TypeId,
  pub f64: TypeId,
  pub ints: HashMap<IntKind, TypeId>,
  pub byte_pointer: TypeId,
  pub byte_slice: TypeId,
}

/// Min/max bignum constants for each sized integer kind, precomputed once
/// so range checks never recompute `2^n - 1`.
pub struct IntRanges {
  ranges: HashMap<IntKind, (BigInt, BigInt)>,
}

impl IntRanges {
  fn build() -> Self {
    let mut ranges = HashMap::new();
    for kind in IntKind::ALL {
      let (min, max) = kind.range();
      let min = i64::try_from(min).expect("signed range minimum always fits i64");
      ranges.insert(kind, (BigInt::from_i64(min), bigint_from_i128_max(max)));
    }
    Self { ranges }
  }

  #[must_use] pub fn min(&self, kind: IntKind) -> &BigInt { &self.ranges[&kind].0 }
  #[must_use] pub fn max(&self, kind: IntKind) -> &BigInt { &self.ranges[&kind].1 }
}

/// `u64::MAX` (the widest unsigned range) does not fit in an `i64`, so the
/// upper bound is built from its `u64` half when the kind is unsigned-64.
fn bigint_from_i128_max(max: i128) -> BigInt {
  if let Ok(v) = i64::try_from(max) {
    BigInt::from_i64(v)
  } else {
    BigInt::from_u64(u64::try_from(max).expect("range max exceeds u64"))
  }
}

/// Owns every long-lived allocation for a single compilation session:
/// interned strings, the structural type store, the symbol/function arena,
/// the loaded-module cache, builtin handles, and environment configuration.
/// There is exactly one `Context` per compilation and it is threaded as
/// `&mut Context` through every pass (load, lex, parse, order, resolve,
/// evaluate) — the single-threaded, lock-free model of `spec.md` §5
/// expressed as "only one mutable path exists," checked by the borrow
/// checker rather than at runtime.
pub struct Context {
  pub interner: Interner,
  pub types: TypeStore,
  pub symbols: SymbolArena,
  pub cst: CstArena,
  pub diagnostics: Diagnostics,
  pub config: Config,
  pub builtins: Builtins,
  pub int_ranges: IntRanges,
  modules: HashMap<std::path::PathBuf, Module>,
  module_order: Vec<std::path::PathBuf>,
  static_names: hashbrown::HashSet<Symbol>,
}

impl Context {
  #[must_use] pub fn new(config: Config) -> Self {
    let mut interner = Interner::new();
    let mut types = TypeStore::new();
    let symbols = SymbolArena::new();

    let any = types.unique_scalar(&mut interner, TypeKind::Any, "any", crate::types::SIZEOF_UNSIZED, 1);
    let void = types.unique_scalar(&mut interner, TypeKind::Void, "void", 0, 1);
    let bool_ = types.unique_scalar(&mut interner, TypeKind::Bool, "bool", 1, 1);
    let byte = types.unique_scalar(&mut interner, TypeKind::Byte, "byte", 1, 1);
    let integer = types.unique_scalar(&mut interner, TypeKind::Integer, "integer", crate::types::SIZEOF_UNSIZED, 1);
    let real = types.unique_scalar(&mut interner, TypeKind::Real, "real", crate::types::SIZEOF_UNSIZED, 1);
    let f32 = types.unique_scalar(&mut interner, TypeKind::Float(FloatKind::F32), "f32", 4, 4);
    let f64 = types.unique_scalar(&mut interner, TypeKind::Float(FloatKind::F64), "f64", 8, 8);

    let mut ints = HashMap::new();
    for kind in IntKind::ALL {
      let id = types.unique_scalar(&mut interner, TypeKind::Int(kind), kind.name(), kind.size(), kind.size());
      ints.insert(kind, id);
    }

    let byte_pointer = types.unique_pointer(&mut interner, byte);
    let byte_slice = types.unique_slice(&mut interner, byte);

    let builtins = Builtins { any, void, bool_, byte, integer, real, f32, f64, ints, byte_pointer, byte_slice };
    let int_ranges = IntRanges::build();

    Self {
      interner,
      types,
      symbols,
      cst: CstArena::new(),
      diagnostics: Diagnostics::new(),
      config,
      builtins,
      int_ranges,
      modules: HashMap::new(),
      module_order: Vec::new(),
      static_names: hashbrown::HashSet::new(),
    }
  }

  #[must_use] pub fn int_type(&self, kind: IntKind) -> TypeId { self.builtins.ints[&kind] }

  #[must_use] pub fn module(&self, path: &std::path::Path) -> Option<&Module> { self.modules.get(path) }
  pub fn module_mut(&mut self, path: &std::path::Path) -> Option<&mut Module> { self.modules.get_mut(path) }

  #[must_use] pub fn is_module_cached(&self, path: &std::path::Path) -> bool { self.modules.contains_key(path) }

  pub fn insert_module(&mut self, path: std::path::PathBuf, module: Module) {
    self.module_order.push(path.clone());
    self.modules.insert(path, module);
  }

  /// Modules in load-completion order, for emission (`spec.md` §5's
  /// deterministic depth-first load order).
  pub fn modules_in_load_order(&self) -> impl Iterator<Item = &Module> {
    self.module_order.iter().map(move |p| &self.modules[p])
  }

  pub fn intern_static_name(&mut self, preferred: &str) -> Symbol {
    // Static names must be globally unique (`spec.md` §3); on collision
    // append a numeric suffix, matching the original's normalization rule.
    let sym = self.interner.intern(preferred);
    if !self.static_name_taken(sym) {
      self.static_names.insert(sym);
      return sym;
    }
    let mut n = 1u32;
    loop {
      let candidate = self.interner.intern_fmt(format_args!("{preferred}.{n}"));
      if !self.static_name_taken(candidate) {
        self.static_names.insert(candidate);
        return candidate;
      }
      n += 1;
    }
  }

  fn static_name_taken(&self, sym: Symbol) -> bool { self.static_names.contains(&sym) }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ctx() -> Context { Context::new(Config::default()) }

  #[test]
  fn byte_pointer_and_slice_are_eagerly_constructed() {
    let c = ctx();
    assert_eq!(c.types.get(c.builtins.byte_pointer).size, 8);
    assert_eq!(c.types.get(c.builtins.byte_slice).size, 16);
  }

  #[test]
  fn int_ranges_cover_every_sized_kind() {
    let c = ctx();
    assert_eq!(c.int_ranges.min(IntKind::U8).to_i64(), Some(0));
    assert_eq!(c.int_ranges.max(IntKind::U8).to_i64(), Some(255));
    assert_eq!(c.int_ranges.min(IntKind::S8).to_i64(), Some(-128));
  }

  #[test]
  fn static_name_collision_appends_numeric_suffix() {
    let mut c = ctx();
    let a = c.intern_static_name("foo");
    let b = c.intern_static_name("foo");
    assert_ne!(a, b);
    assert_eq!(c.interner.resolve(b), "foo.1");
  }
}
