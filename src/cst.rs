//! Concrete syntax tree produced by the parser, with no lowering
//! (`spec.md` §4.4). Declarations are stored in a flat arena and referenced
//! by `DeclId` so the orderer can reorder them and the resolver's template
//! cache can hold a stable handle to a template's CST across instantiations.

use crate::diag::Location;
use crate::intern::Symbol;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DeclId(pub(crate) u32);

/// A possibly-qualified, possibly-templated name as written in source, e.g.
/// `ns::vec[[u16]]`.
#[derive(Clone, Debug)]
pub struct Path {
  pub segments: Vec<Symbol>,
  pub template_args: Vec<TypeExpr>,
}

/// A type annotation as written in source, before resolution.
#[derive(Clone, Debug)]
pub enum TypeExpr {
  Path(Path, Location),
  Func { params: Vec<TypeExpr>, ret: Box<TypeExpr>, location: Location },
  Pointer(Box<TypeExpr>, Location),
  Array { count: Box<Expr>, base: Box<TypeExpr>, location: Location },
  Slice(Box<TypeExpr>, Location),
  Struct(Vec<MemberDecl>, Location),
  Union(Vec<MemberDecl>, Location),
  Enum { underlying: Option<Box<TypeExpr>>, values: Vec<(Symbol, Option<Expr>)>, location: Location },
  Typeof(Box<Expr>, Location),
}

impl TypeExpr {
  #[must_use] pub fn location(&self) -> Location {
    match self {
      TypeExpr::Path(_, l) | TypeExpr::Func { location: l, .. } | TypeExpr::Pointer(_, l)
      | TypeExpr::Array { location: l, .. } | TypeExpr::Slice(_, l) | TypeExpr::Struct(_, l)
      | TypeExpr::Union(_, l) | TypeExpr::Enum { location: l, .. } | TypeExpr::Typeof(_, l) => *l,
    }
  }
}

#[derive(Clone, Debug)]
pub struct MemberDecl {
  pub name: Symbol,
  pub ty: TypeExpr,
  pub location: Location,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp { Not, Plus, Minus, WrappingNeg, BitNot, Deref, AddressOf, Startof, Countof }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
  Or, And,
  Eq, Ne, Le, Lt, Ge, Gt,
  Shl, Shr, BitOr, BitXor, BitAnd,
  Add, Sub, WrappingAdd, WrappingSub,
  Mul, Div, Rem, WrappingMul,
}

#[derive(Clone, Debug)]
pub enum Expr {
  Identifier(Path, Location),
  Integer { text: Symbol, suffix: crate::lexer::IntSuffix, location: Location },
  Float { value: f64, is_f32: bool, is_f64: bool, location: Location },
  Character(u32, Location),
  ByteString(Vec<u8>, Location),
  Boolean(bool, Location),
  Unary { op: UnaryOp, operand: Box<Expr>, location: Location },
  Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr>, location: Location },
  Call { callee: Box<Expr>, args: Vec<Expr>, location: Location },
  Index { base: Box<Expr>, index: Box<Expr>, location: Location },
  Slice { base: Box<Expr>, start: Option<Box<Expr>>, end: Option<Box<Expr>>, location: Location },
  Member { base: Box<Expr>, name: Symbol, location: Location },
  Cast { operand: Box<Expr>, ty: Box<TypeExpr>, location: Location },
  ArrayLiteral { elements: Vec<Expr>, ellipsis: Option<Box<Expr>>, location: Location },
  StructLiteral { ty: Box<TypeExpr>, members: Vec<(Symbol, Expr)>, location: Location },
  Sizeof(Box<TypeExpr>, Location),
  Alignof(Box<TypeExpr>, Location),
  Defined(Path, Location),
  Fileof(Location),
  Lineof(Location),
  Embed { path: Vec<u8>, contents: Vec<u8>, location: Location },
  Syscall { args: Vec<Expr>, location: Location },
}

impl Expr {
  #[must_use] pub fn location(&self) -> Location {
    match self {
      Expr::Identifier(_, l) | Expr::Integer { location: l, .. } | Expr::Float { location: l, .. }
      | Expr::Character(_, l) | Expr::ByteString(_, l) | Expr::Boolean(_, l)
      | Expr::Unary { location: l, .. } | Expr::Binary { location: l, .. }
      | Expr::Call { location: l, .. } | Expr::Index { location: l, .. }
      | Expr::Slice { location: l, .. } | Expr::Member { location: l, .. }
      | Expr::Cast { location: l, .. } | Expr::ArrayLiteral { location: l, .. }
      | Expr::StructLiteral { location: l, .. } | Expr::Sizeof(_, l) | Expr::Alignof(_, l)
      | Expr::Defined(_, l) | Expr::Fileof(l) | Expr::Lineof(l)
      | Expr::Embed { location: l, .. } | Expr::Syscall { location: l, .. } => *l,
    }
  }
}

/// The grammar (`spec.md` §4.4) has only plain `=` assignment; no
/// compound-assignment sigils exist in the lexer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AssignOp { Plain }

#[derive(Clone, Debug)]
pub enum Stmt {
  Let { name: Symbol, ty: Option<TypeExpr>, initializer: Expr, location: Location },
  Var { name: Symbol, ty: Option<TypeExpr>, initializer: Option<Expr>, location: Location },
  Const { name: Symbol, ty: Option<TypeExpr>, initializer: Expr, location: Location },
  Assign { op: AssignOp, target: Expr, value: Expr, location: Location },
  ExprStatement(Expr),
  If { arms: Vec<(Expr, Block)>, else_block: Option<Block>, location: Location },
  When { arms: Vec<(Expr, Block)>, else_block: Option<Block>, location: Location },
  ForRange { binding: Symbol, begin: Expr, end: Expr, body: Block, location: Location },
  ForExpr { condition: Option<Expr>, body: Block, location: Location },
  Break(Location),
  Continue(Location),
  Switch { scrutinee: Expr, arms: Vec<SwitchArm>, location: Location },
  Return { value: Option<Expr>, location: Location },
  Assert { condition: Expr, line_text: String, location: Location },
  Defer(Block, Location),
  Block(Block),
}

impl Stmt {
  #[must_use] pub fn location(&self) -> Location {
    match self {
      Stmt::Let { location: l, .. } | Stmt::Var { location: l, .. } | Stmt::Const { location: l, .. }
      | Stmt::Assign { location: l, .. } | Stmt::If { location: l, .. } | Stmt::When { location: l, .. }
      | Stmt::ForRange { location: l, .. } | Stmt::ForExpr { location: l, .. }
      | Stmt::Break(l) | Stmt::Continue(l) | Stmt::Switch { location: l, .. }
      | Stmt::Return { location: l, .. } | Stmt::Assert { location: l, .. } | Stmt::Defer(_, l) => *l,
      Stmt::ExprStatement(e) => e.location(),
      Stmt::Block(b) => b.location,
    }
  }
}

#[derive(Clone, Debug)]
pub struct SwitchArm {
  /// `None` denotes the catch-all `else:` arm.
  pub case: Option<Symbol>,
  pub body: Block,
  pub location: Location,
}

#[derive(Clone, Debug)]
pub struct Block {
  pub statements: Vec<Stmt>,
  pub location: Location,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Visibility { Public, Private }

#[derive(Clone, Debug)]
pub struct Param {
  pub name: Symbol,
  pub ty: TypeExpr,
  pub location: Location,
}

#[derive(Clone, Debug)]
pub enum Decl {
  Variable {
    name: Symbol,
    ty: Option<TypeExpr>,
    initializer: Expr,
    template_params: Vec<Symbol>,
    location: Location,
  },
  Constant {
    name: Symbol,
    ty: Option<TypeExpr>,
    initializer: Expr,
    template_params: Vec<Symbol>,
    location: Location,
  },
  Function {
    name: Symbol,
    params: Vec<Param>,
    ret: TypeExpr,
    body: Block,
    template_params: Vec<Symbol>,
    location: Location,
  },
  Struct {
    name: Symbol,
    members: Vec<MemberDecl>,
    nested: Vec<DeclId>,
    template_params: Vec<Symbol>,
    location: Location,
  },
  Union {
    name: Symbol,
    members: Vec<MemberDecl>,
    nested: Vec<DeclId>,
    template_params: Vec<Symbol>,
    location: Location,
  },
  Enum {
    name: Symbol,
    underlying: Option<TypeExpr>,
    values: Vec<(Symbol, Option<Expr>)>,
    nested: Vec<DeclId>,
    location: Location,
  },
  Extend {
    target: Path,
    nested: Vec<DeclId>,
    location: Location,
  },
  Alias {
    name: Symbol,
    target: TypeExpr,
    location: Location,
  },
  ExternVariable {
    name: Symbol,
    ty: TypeExpr,
    link_name: Option<Vec<u8>>,
    location: Location,
  },
  ExternFunction {
    name: Symbol,
    params: Vec<Param>,
    ret: TypeExpr,
    link_name: Option<Vec<u8>>,
    location: Location,
  },
  Namespace {
    path: Vec<Symbol>,
    location: Location,
  },
  Import {
    path: Vec<u8>,
    location: Location,
  },
}

impl Decl {
  #[must_use] pub fn location(&self) -> Location {
    match self {
      Decl::Variable { location: l, .. } | Decl::Constant { location: l, .. }
      | Decl::Function { location: l, .. } | Decl::Struct { location: l, .. }
      | Decl::Union { location: l, .. } | Decl::Enum { location: l, .. }
      | Decl::Extend { location: l, .. } | Decl::Alias { location: l, .. }
      | Decl::ExternVariable { location: l, .. } | Decl::ExternFunction { location: l, .. }
      | Decl::Namespace { location: l, .. } | Decl::Import { location: l, .. } => *l,
    }
  }

  #[must_use] pub fn name(&self) -> Option<Symbol> {
    match self {
      Decl::Variable { name, .. } | Decl::Constant { name, .. } | Decl::Function { name, .. }
      | Decl::Struct { name, .. } | Decl::Union { name, .. } | Decl::Enum { name, .. }
      | Decl::Alias { name, .. } | Decl::ExternVariable { name, .. }
      | Decl::ExternFunction { name, .. } => Some(*name),
      Decl::Extend { .. } | Decl::Namespace { .. } | Decl::Import { .. } => None,
    }
  }

  #[must_use] pub fn template_params(&self) -> &[Symbol] {
    match self {
      Decl::Variable { template_params, .. } | Decl::Constant { template_params, .. }
      | Decl::Function { template_params, .. } | Decl::Struct { template_params, .. }
      | Decl::Union { template_params, .. } => template_params,
      _ => &[],
    }
  }
}

/// Owns every top-level declaration CST node, addressed by `DeclId`.
/// Declarations nested inside `struct`/`union`/`enum`/`extend` bodies are
/// also stored here (their ids collected into the parent's `nested` list)
/// so the resolver can walk them uniformly.
#[derive(Default)]
pub struct CstArena {
  decls: Vec<Decl>,
}

impl CstArena {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn push(&mut self, decl: Decl) -> DeclId {
    let id = DeclId(u32::try_from(self.decls.len()).expect("CST arena overflow"));
    self.decls.push(decl);
    id
  }

  #[must_use] pub fn get(&self, id: DeclId) -> &Decl { &self.decls[id.0 as usize] }
  pub fn get_mut(&mut self, id: DeclId) -> &mut Decl { &mut self.decls[id.0 as usize] }

  #[must_use] pub fn len(&self) -> usize { self.decls.len() }
  #[must_use] pub fn is_empty(&self) -> bool { self.decls.is_empty() }

  pub fn ids(&self) -> impl Iterator<Item = DeclId> {
    (0..self.decls.len()).map(|i| DeclId(u32::try_from(i).expect("CST arena overflow")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern::Interner;

  #[test]
  fn arena_round_trips_declarations() {
    let mut interner = Interner::new();
    let mut arena = CstArena::new();
    let name = interner.intern("x");
    let loc = Location::builtin();
    let id = arena.push(Decl::Alias {
      name,
      target: TypeExpr::Path(Path { segments: vec![name], template_args: vec![] }, loc),
      location: loc,
    });
    assert_eq!(arena.get(id).name(), Some(name));
  }

  #[test]
  fn ids_enumerate_in_push_order() {
    let mut arena = CstArena::new();
    let loc = Location::builtin();
    for _ in 0..3 {
      arena.push(Decl::Namespace { path: vec![], location: loc });
    }
    let ids: Vec<_> = arena.ids().collect();
    assert_eq!(ids, vec![DeclId(0), DeclId(1), DeclId(2)]);
  }
}
