//! Resolved intermediate representation: typed statements and expressions
//! produced by the resolver from a CST function body (`spec.md` §3, §4.7).

use crate::bignum::BigInt;
use crate::symbol::{Address, SymbolId};
use crate::types::TypeId;

/// A braced sequence of statements plus the set of symbols declared directly
/// in its scope, in declaration order (used to emit `defer` unwinds and
/// drop-in-reverse semantics at block exit).
#[derive(Clone, Debug, Default)]
pub struct Block {
  pub statements: Vec<Statement>,
}

#[derive(Clone, Debug)]
pub enum Statement {
  /// `let`/`var`/`const` local declaration; the symbol's `Object` (address,
  /// type, optional constant value) already lives in the `SymbolArena`, so
  /// this variant only needs the id and the initializer expression.
  Local { symbol: SymbolId, initializer: Option<Expr> },
  Assign { op: AssignOp, target: Expr, value: Expr },
  ExprStatement(Expr),
  If { arms: Vec<(Expr, Block)>, else_block: Option<Block> },
  When { arms: Vec<(Expr, Block)>, else_block: Option<Block> },
  For {
    initializer: Option<Box<Statement>>,
    condition: Option<Expr>,
    post: Option<Box<Statement>>,
    body: Block,
  },
  ForIn { binding: SymbolId, iterable: Expr, body: Block },
  Break,
  Continue,
  Return(Option<Expr>),
  Defer(Block),
  Switch { scrutinee: Expr, arms: Vec<SwitchArm>, has_else: bool },
  Assert { condition: Expr, message: Option<String> },
  Block(Block),
}

/// Mirrors `cst::AssignOp`: the grammar has only plain `=` assignment.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AssignOp { Plain }

#[derive(Clone, Debug)]
pub struct SwitchArm {
  /// `None` denotes the catch-all `else` arm.
  pub value: Option<Expr>,
  pub body: Block,
}

/// A typed expression node. Every variant carries its result `TypeId`
/// directly rather than through a side table, mirroring how `symbol::Value`
/// carries its own `TypeId`.
#[derive(Clone, Debug)]
pub struct Expr {
  pub ty: TypeId,
  pub kind: ExprKind,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
  ConstBoolean(bool),
  ConstInteger(BigInt),
  ConstFloat(f64),
  ConstReal(f64),
  ConstByte(u8),
  ConstBytes(Vec<u8>),
  /// Reference to a resolved `Object`/`Function`/`Constant` symbol.
  Symbol(SymbolId),
  Cast { explicit: bool, operand: Box<Expr> },
  Unary { op: UnaryOp, operand: Box<Expr> },
  Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
  Logical { op: LogicalOp, lhs: Box<Expr>, rhs: Box<Expr> },
  Call { callee: Box<Expr>, args: Vec<Expr> },
  Index { base: Box<Expr>, index: Box<Expr> },
  Slice { base: Box<Expr>, start: Option<Box<Expr>>, end: Option<Box<Expr>> },
  Member { base: Box<Expr>, index: usize },
  /// `.*`: dereference a pointer lvalue.
  Deref(Box<Expr>),
  /// `@`: address-of an lvalue.
  AddressOf(Box<Expr>),
  ArrayLiteral { elements: Vec<Expr>, ellipsis: Option<Box<Expr>> },
  SliceLiteral { pointer: Box<Expr>, count: Box<Expr> },
  StructLiteral { members: Vec<Expr> },
  UnionLiteral { member_index: usize, value: Box<Expr> },
  Sizeof(TypeId),
  Alignof(TypeId),
  Countof(Box<Expr>),
  Startof(Box<Expr>),
  /// Address of a static/absolute location, produced directly by the
  /// resolver for `embed`/`fileof` results and similar builtins.
  Address(Address),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp { Neg, BitNot, Not, WrappingNeg }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
  Add, Sub, Mul, Div, Rem,
  WrappingAdd, WrappingSub, WrappingMul,
  BitAnd, BitOr, BitXor, Shl, Shr,
  Eq, Ne, Lt, Le, Gt, Ge,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LogicalOp { And, Or }

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::TypeId;

  fn dummy_type() -> TypeId { TypeId(0) }

  #[test]
  fn block_default_is_empty() {
    let b = Block::default();
    assert!(b.statements.is_empty());
  }

  #[test]
  fn expr_carries_its_own_type() {
    let e = Expr { ty: dummy_type(), kind: ExprKind::ConstBoolean(true) };
    assert!(matches!(e.kind, ExprKind::ConstBoolean(true)));
    assert_eq!(e.ty, dummy_type());
  }
}
