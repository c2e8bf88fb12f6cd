//! Compile-time constant folding and evaluation (`spec.md` §4.8).
//!
//! The resolver calls [`evaluate`] whenever a context requires a compile-time
//! constant: global/local `const` initializers, enum member values, and
//! array type counts. Evaluation never touches the filesystem or performs
//! I/O; it is pure function of the already-resolved `ir::Expr` tree plus the
//! symbol/type tables already built by the resolver.

use std::cmp::Ordering;

use crate::bignum::BigInt;
use crate::context::Context;
use crate::diag::{Location, Result};
use crate::ir::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};
use crate::symbol::{Address, Object, SymbolKind, Value, ValueKind};
use crate::types::{IntKind, TypeId, TypeKind};

/// Folds `expr` to a constant `Value`, or reports a `fatal` diagnostic (via
/// `ctx.diagnostics`) and returns `Err` when `expr` is not constant-foldable.
/// Per `spec.md` §4.8: address-of a local, ordering compares on pointers,
/// dereference of a non-literal pointer, and calls are never foldable.
pub fn evaluate(ctx: &mut Context, expr: &Expr) -> Result<Value> {
  match &expr.kind {
    ExprKind::ConstBoolean(b) => Ok(Value { ty: expr.ty, kind: ValueKind::Boolean(*b) }),
    ExprKind::ConstByte(b) => Ok(Value { ty: expr.ty, kind: ValueKind::Byte(*b) }),
    ExprKind::ConstInteger(bi) => Ok(Value { ty: expr.ty, kind: ValueKind::Integer(bi.clone()) }),
    ExprKind::ConstFloat(f) => Ok(Value { ty: expr.ty, kind: ValueKind::Float(*f) }),
    ExprKind::ConstReal(f) => Ok(Value { ty: expr.ty, kind: ValueKind::Real(*f) }),
    ExprKind::ConstBytes(bytes) => eval_bytes(ctx, expr.ty, bytes),
    ExprKind::Address(addr) => Ok(Value { ty: expr.ty, kind: ValueKind::Pointer(addr.clone()) }),

    ExprKind::Symbol(id) => eval_symbol(ctx, *id),

    ExprKind::Cast { explicit, operand } => {
      let v = evaluate(ctx, operand)?;
      cast_value(ctx, *explicit, v, expr.ty)
    }

    ExprKind::Unary { op, operand } => {
      let v = evaluate(ctx, operand)?;
      eval_unary(ctx, *op, v, expr.ty)
    }

    ExprKind::Binary { op, lhs, rhs } => {
      let l = evaluate(ctx, lhs)?;
      let r = evaluate(ctx, rhs)?;
      eval_binary(ctx, *op, l, r, expr.ty)
    }

    ExprKind::Logical { op, lhs, rhs } => eval_logical(ctx, *op, lhs, rhs, expr.ty),

    ExprKind::Call { .. } => ctx.diagnostics.fatal(None, "function call is not a constant expression"),

    ExprKind::Index { base, index } => {
      let b = evaluate(ctx, base)?;
      let i = evaluate(ctx, index)?;
      eval_index(ctx, b, i)
    }

    ExprKind::Slice { base, start, end } => eval_slice(ctx, expr.ty, base, start.as_deref(), end.as_deref()),

    ExprKind::Member { base, index } => {
      let b = evaluate(ctx, base)?;
      eval_member(ctx, b, *index)
    }

    ExprKind::Deref(_) => ctx.diagnostics.fatal(None, "pointer dereference is not a constant expression"),

    ExprKind::AddressOf(inner) => {
      let addr = evaluate_address(ctx, inner)?;
      Ok(Value { ty: expr.ty, kind: ValueKind::Pointer(addr) })
    }

    ExprKind::ArrayLiteral { elements, ellipsis } => {
      let mut vs = Vec::with_capacity(elements.len());
      for e in elements { vs.push(evaluate(ctx, e)?); }
      let ell = match ellipsis {
        Some(e) => Some(Box::new(evaluate(ctx, e)?)),
        None => None,
      };
      Ok(Value { ty: expr.ty, kind: ValueKind::Array { elements: vs, ellipsis: ell } })
    }

    ExprKind::SliceLiteral { pointer, count } => {
      let p = evaluate(ctx, pointer)?;
      let c = evaluate(ctx, count)?;
      Ok(Value { ty: expr.ty, kind: ValueKind::Slice { pointer: Box::new(p), count: Box::new(c) } })
    }

    ExprKind::StructLiteral { members } => {
      let mut vs = Vec::with_capacity(members.len());
      for m in members { vs.push(evaluate(ctx, m)?); }
      Ok(Value { ty: expr.ty, kind: ValueKind::Struct { members: vs } })
    }

    ExprKind::UnionLiteral { member_index, value } => {
      let v = evaluate(ctx, value)?;
      Ok(Value { ty: expr.ty, kind: ValueKind::Union { member_index: *member_index, value: Box::new(v) } })
    }

    ExprKind::Sizeof(ty) => eval_sizeof(ctx, expr.ty, *ty),
    ExprKind::Alignof(ty) => Ok(Value { ty: expr.ty, kind: ValueKind::Integer(BigInt::from_u64(ctx.types.get(*ty).align)) }),
    ExprKind::Countof(base) => eval_countof(ctx, expr.ty, base),
    ExprKind::Startof(base) => eval_startof(ctx, expr.ty, base),
  }
}

fn eval_symbol(ctx: &mut Context, id: crate::symbol::SymbolId) -> Result<Value> {
  match ctx.symbols.symbol(id).kind.clone() {
    SymbolKind::Function(fid) => {
      let ty = ctx.symbols.function(fid).ty;
      Ok(Value { ty, kind: ValueKind::FunctionPointer(id) })
    }
    SymbolKind::Variable(obj) | SymbolKind::Constant(obj) => match obj.value {
      Some(v) => Ok(v),
      None => ctx.diagnostics.fatal(None, "expression is not a compile-time constant"),
    },
    _ => ctx.diagnostics.fatal(None, "symbol does not name a constant value"),
  }
}

fn eval_bytes(ctx: &mut Context, pointer_ty: TypeId, bytes: &[u8]) -> Result<Value> {
  // Synthesizes a static array-of-byte constant backing this byte-string
  // literal and returns a pointer to it, mirroring how `embed`/string
  // literals are lowered to an anonymous static symbol (`spec.md` §4.8's
  // "address-of a static symbol" constant-fold case). The trailing NUL byte
  // every byte-string constant carries past its declared length is an
  // emission-time detail for the backend, not part of the typed `Value`.
  let byte_ty = ctx.builtins.byte;
  let elements: Vec<Value> = bytes.iter().map(|&b| Value { ty: byte_ty, kind: ValueKind::Byte(b) }).collect();
  let array_ty = ctx.types.unique_array(&mut ctx.interner, bytes.len() as u64, byte_ty);
  let array_value = Value { ty: array_ty, kind: ValueKind::Array { elements, ellipsis: None } };
  let name = ctx.intern_static_name("str");
  let obj = Object { ty: array_ty, address: Address::Static(name, 0), value: Some(array_value), is_extern: false };
  let table = ctx.symbols.global_table();
  let id = ctx.symbols.define(Location::builtin(), name, SymbolKind::Constant(obj));
  let _ = ctx.symbols.insert(table, name, id);
  Ok(Value { ty: pointer_ty, kind: ValueKind::Pointer(Address::Static(name, 0)) })
}

// --- casts -------------------------------------------------------------

fn cast_value(ctx: &mut Context, explicit: bool, v: Value, target: TypeId) -> Result<Value> {
  if v.ty == target { return Ok(v); }
  let to_kind = ctx.types.get(target).kind.clone();
  match (v.kind, to_kind) {
    (ValueKind::Boolean(b), TypeKind::Int(_) | TypeKind::Byte) => int_or_byte(target, BigInt::from_u64(u64::from(b))),
    (ValueKind::Boolean(b), TypeKind::Enum { .. }) => Ok(Value { ty: target, kind: ValueKind::Integer(BigInt::from_u64(u64::from(b))) }),

    (ValueKind::Byte(b), TypeKind::Bool) => Ok(Value { ty: target, kind: ValueKind::Boolean(b != 0) }),
    (ValueKind::Byte(b), TypeKind::Int(k)) => {
      let raw = BigInt::from_u64(u64::from(b));
      Ok(Value { ty: target, kind: ValueKind::Integer(wrap_to_width(&raw, (k.size() * 8) as usize, k.is_signed())) })
    }
    (ValueKind::Byte(b), TypeKind::Enum { underlying, .. }) => {
      let (w, s) = width_and_signed(ctx, underlying).unwrap_or((32, true));
      Ok(Value { ty: target, kind: ValueKind::Integer(wrap_to_width(&BigInt::from_u64(u64::from(b)), w, s)) })
    }

    (ValueKind::Integer(bi), TypeKind::Bool) => Ok(Value { ty: target, kind: ValueKind::Boolean(!bi.is_zero()) }),
    (ValueKind::Integer(bi), TypeKind::Byte) => {
      if explicit {
        Ok(Value { ty: target, kind: ValueKind::Integer(wrap_to_width(&bi, 8, false)) })
      } else {
        checked_range_value(ctx, bi, target)
      }
    }
    (ValueKind::Integer(bi), TypeKind::Int(k)) => {
      if explicit {
        Ok(Value { ty: target, kind: ValueKind::Integer(wrap_to_width(&bi, (k.size() * 8) as usize, k.is_signed())) })
      } else {
        checked_range_value(ctx, bi, target)
      }
    }
    (ValueKind::Integer(bi), TypeKind::Enum { .. }) => Ok(Value { ty: target, kind: ValueKind::Integer(bi) }),
    (ValueKind::Integer(bi), TypeKind::Float(_)) => Ok(Value { ty: target, kind: ValueKind::Float(bigint_to_f64(&bi)) }),
    (ValueKind::Integer(bi), TypeKind::Real) => Ok(Value { ty: target, kind: ValueKind::Real(bigint_to_f64(&bi)) }),
    (ValueKind::Integer(bi), TypeKind::Pointer(_)) => Ok(Value { ty: target, kind: ValueKind::Pointer(Address::Absolute(bi)) }),

    (ValueKind::Float(f), TypeKind::Float(_)) => Ok(Value { ty: target, kind: ValueKind::Float(f) }),
    (ValueKind::Float(f), TypeKind::Int(k)) => {
      let raw = bigint_from_f64(f);
      Ok(Value { ty: target, kind: ValueKind::Integer(wrap_to_width(&raw, (k.size() * 8) as usize, k.is_signed())) })
    }
    (ValueKind::Float(f), TypeKind::Byte) => Ok(Value { ty: target, kind: ValueKind::Integer(wrap_to_width(&bigint_from_f64(f), 8, false)) }),
    (ValueKind::Real(f), TypeKind::Float(_)) => Ok(Value { ty: target, kind: ValueKind::Float(f) }),
    (ValueKind::Real(f), TypeKind::Int(k)) => {
      let raw = bigint_from_f64(f);
      Ok(Value { ty: target, kind: ValueKind::Integer(wrap_to_width(&raw, (k.size() * 8) as usize, k.is_signed())) })
    }

    (ValueKind::Pointer(addr), TypeKind::Pointer(_)) => Ok(Value { ty: target, kind: ValueKind::Pointer(addr) }),
    (ValueKind::Pointer(Address::Absolute(n)), TypeKind::Int(IntKind::Usize)) => Ok(Value { ty: target, kind: ValueKind::Integer(n) }),
    (ValueKind::Pointer(_), TypeKind::Int(IntKind::Usize)) => {
      ctx.diagnostics.fatal(None, "pointer is not constant-foldable to an integer")
    }

    (ValueKind::FunctionPointer(id), TypeKind::Function { .. }) => Ok(Value { ty: target, kind: ValueKind::FunctionPointer(id) }),

    _ => ctx.diagnostics.fatal(None, "cast is not constant-foldable"),
  }
}

fn int_or_byte(target: TypeId, bi: BigInt) -> Result<Value> {
  Ok(Value { ty: target, kind: ValueKind::Integer(bi) })
}

fn checked_range_value(ctx: &mut Context, raw: BigInt, ty: TypeId) -> Result<Value> {
  if let TypeKind::Int(k) = ctx.types.get(ty).kind {
    let min = ctx.int_ranges.min(k).clone();
    let max = ctx.int_ranges.max(k).clone();
    if raw.cmp(&min) == Ordering::Less || raw.cmp(&max) == Ordering::Greater {
      return ctx.diagnostics.fatal(None, "constant does not fit in the target integer type");
    }
  }
  Ok(Value { ty, kind: ValueKind::Integer(raw) })
}

fn bigint_to_f64(bi: &BigInt) -> f64 {
  if let Some(i) = bi.to_i64() { i as f64 } else if let Some(u) = bi.to_u64() { u as f64 }
  else if bi.sign() < 0 { f64::NEG_INFINITY } else { f64::INFINITY }
}

fn bigint_from_f64(f: f64) -> BigInt {
  let t = f.trunc();
  if t.is_nan() { return BigInt::zero(); }
  if (i64::MIN as f64..=i64::MAX as f64).contains(&t) {
    BigInt::from_i64(t as i64)
  } else if t > 0.0 {
    BigInt::from_u64(u64::MAX)
  } else {
    BigInt::from_i64(i64::MIN)
  }
}

// --- bit-width helpers ---------------------------------------------------

fn width_and_signed(ctx: &Context, ty: TypeId) -> Option<(usize, bool)> {
  match &ctx.types.get(ty).kind {
    TypeKind::Int(k) => Some(((k.size() * 8) as usize, k.is_signed())),
    TypeKind::Byte => Some((8, false)),
    TypeKind::Enum { underlying, .. } => width_and_signed(ctx, *underlying),
    _ => None,
  }
}

/// Two's complement bit pattern of `bi` truncated to `width` bits, as a
/// plain `Vec<bool>` (little-endian, bit 0 first). Reimplements the same
/// complement-then-increment step as `BitArr::twos_complement_neg` since
/// that helper is private to `bignum`.
fn twos_complement_bits(bi: &BigInt, width: usize) -> Vec<bool> {
  let mut bits: Vec<bool> = (0..width).map(|i| bi.magnitude_bit_get(i)).collect();
  if bi.sign() < 0 {
    for b in bits.iter_mut() { *b = !*b; }
    let mut carry = true;
    for b in bits.iter_mut() {
      if !carry { break; }
      let old = *b;
      *b = !old;
      carry = old;
    }
  }
  bits
}

fn bigint_from_bits(bits: &[bool], signed: bool) -> BigInt {
  let mut arr = crate::bignum::BitArr::new(bits.len());
  for (i, &b) in bits.iter().enumerate() { arr.set(i, b); }
  BigInt::from_bitarr(&arr, signed)
}

fn wrap_to_width(bi: &BigInt, width: usize, signed: bool) -> BigInt {
  bigint_from_bits(&twos_complement_bits(bi, width), signed)
}

// --- unary/binary arithmetic ---------------------------------------------

fn eval_unary(ctx: &mut Context, op: UnaryOp, v: Value, result_ty: TypeId) -> Result<Value> {
  match (op, v.kind) {
    (UnaryOp::Not, ValueKind::Boolean(b)) => Ok(Value { ty: result_ty, kind: ValueKind::Boolean(!b) }),
    (UnaryOp::Neg, ValueKind::Integer(bi)) => checked_range_value(ctx, bi.neg(), result_ty),
    (UnaryOp::Neg, ValueKind::Float(f)) => Ok(Value { ty: result_ty, kind: ValueKind::Float(-f) }),
    (UnaryOp::Neg, ValueKind::Real(f)) => Ok(Value { ty: result_ty, kind: ValueKind::Real(-f) }),
    (UnaryOp::WrappingNeg, ValueKind::Integer(bi)) => {
      let (w, s) = width_and_signed(ctx, result_ty).unwrap_or((64, true));
      Ok(Value { ty: result_ty, kind: ValueKind::Integer(wrap_to_width(&bi.neg(), w, s)) })
    }
    (UnaryOp::BitNot, ValueKind::Integer(bi)) => {
      let (w, s) = width_and_signed(ctx, result_ty).expect("bitnot on a non-integer constant");
      let bits: Vec<bool> = twos_complement_bits(&bi, w).into_iter().map(|b| !b).collect();
      Ok(Value { ty: result_ty, kind: ValueKind::Integer(bigint_from_bits(&bits, s)) })
    }
    (UnaryOp::BitNot, ValueKind::Byte(b)) => Ok(Value { ty: result_ty, kind: ValueKind::Byte(!b) }),
    _ => ctx.diagnostics.fatal(None, "operand is not constant-foldable for this unary operator"),
  }
}

fn eval_logical(ctx: &mut Context, op: LogicalOp, lhs: &Expr, rhs: &Expr, result_ty: TypeId) -> Result<Value> {
  let l = evaluate(ctx, lhs)?;
  let ValueKind::Boolean(lb) = l.kind else {
    return ctx.diagnostics.fatal(None, "logical operand is not a boolean constant");
  };
  match op {
    LogicalOp::And if !lb => Ok(Value { ty: result_ty, kind: ValueKind::Boolean(false) }),
    LogicalOp::Or if lb => Ok(Value { ty: result_ty, kind: ValueKind::Boolean(true) }),
    _ => {
      let r = evaluate(ctx, rhs)?;
      let ValueKind::Boolean(rb) = r.kind else {
        return ctx.diagnostics.fatal(None, "logical operand is not a boolean constant");
      };
      Ok(Value { ty: result_ty, kind: ValueKind::Boolean(rb) })
    }
  }
}

fn eval_binary(ctx: &mut Context, op: BinaryOp, l: Value, r: Value, result_ty: TypeId) -> Result<Value> {
  let operand_ty = l.ty;
  match (l.kind, r.kind) {
    (ValueKind::Integer(a), ValueKind::Integer(b)) => eval_int_binary(ctx, op, &a, &b, operand_ty, result_ty),
    (ValueKind::Byte(a), ValueKind::Byte(b)) => {
      eval_int_binary(ctx, op, &BigInt::from_u64(u64::from(a)), &BigInt::from_u64(u64::from(b)), operand_ty, result_ty)
    }
    (ValueKind::Boolean(a), ValueKind::Boolean(b)) => eval_bool_binary(ctx, op, a, b, result_ty),
    (ValueKind::Float(a), ValueKind::Float(b)) => eval_float_binary(ctx, op, a, b, result_ty, false),
    (ValueKind::Real(a), ValueKind::Real(b)) => eval_float_binary(ctx, op, a, b, result_ty, true),
    (ValueKind::Pointer(a), ValueKind::Pointer(b)) => eval_pointer_binary(ctx, op, &a, &b, result_ty),
    _ => ctx.diagnostics.fatal(None, "operands are not constant-foldable for this binary operator"),
  }
}

fn eval_bool_binary(ctx: &mut Context, op: BinaryOp, a: bool, b: bool, result_ty: TypeId) -> Result<Value> {
  match op {
    BinaryOp::Eq => Ok(Value { ty: result_ty, kind: ValueKind::Boolean(a == b) }),
    BinaryOp::Ne => Ok(Value { ty: result_ty, kind: ValueKind::Boolean(a != b) }),
    _ => ctx.diagnostics.fatal(None, "operator is not valid on boolean constants"),
  }
}

fn eval_int_binary(ctx: &mut Context, op: BinaryOp, a: &BigInt, b: &BigInt, operand_ty: TypeId, result_ty: TypeId) -> Result<Value> {
  use BinaryOp::{Add, BitAnd, BitOr, BitXor, Div, Eq, Ge, Gt, Le, Lt, Mul, Ne, Rem, Shl, Shr, Sub, WrappingAdd, WrappingMul, WrappingSub};
  let bool_val = |b: bool| Value { ty: result_ty, kind: ValueKind::Boolean(b) };
  match op {
    Eq => Ok(bool_val(a.cmp(b) == Ordering::Equal)),
    Ne => Ok(bool_val(a.cmp(b) != Ordering::Equal)),
    Lt => Ok(bool_val(a.cmp(b) == Ordering::Less)),
    Le => Ok(bool_val(a.cmp(b) != Ordering::Greater)),
    Gt => Ok(bool_val(a.cmp(b) == Ordering::Greater)),
    Ge => Ok(bool_val(a.cmp(b) != Ordering::Less)),
    Add | Sub | Mul | Div | Rem => {
      let raw = match op {
        Add => a.add(b),
        Sub => a.sub(b),
        Mul => a.mul(b),
        Div => {
          if b.is_zero() { return ctx.diagnostics.fatal(None, "division by zero in constant expression"); }
          a.divrem(b).0
        }
        Rem => {
          if b.is_zero() { return ctx.diagnostics.fatal(None, "division by zero in constant expression"); }
          a.divrem(b).1
        }
        _ => unreachable!(),
      };
      checked_range_value(ctx, raw, result_ty)
    }
    WrappingAdd | WrappingSub | WrappingMul => {
      let raw = match op {
        WrappingAdd => a.add(b),
        WrappingSub => a.sub(b),
        WrappingMul => a.mul(b),
        _ => unreachable!(),
      };
      let (w, s) = width_and_signed(ctx, result_ty).expect("wrapping arithmetic requires a sized integer type");
      Ok(Value { ty: result_ty, kind: ValueKind::Integer(wrap_to_width(&raw, w, s)) })
    }
    BitAnd | BitOr | BitXor => {
      let (w, s) = width_and_signed(ctx, operand_ty).expect("bitwise operator requires a sized integer type");
      let abits = twos_complement_bits(a, w);
      let bbits = twos_complement_bits(b, w);
      let rbits: Vec<bool> = abits.iter().zip(bbits.iter()).map(|(&x, &y)| match op {
        BitAnd => x && y,
        BitOr => x || y,
        BitXor => x ^ y,
        _ => unreachable!(),
      }).collect();
      Ok(Value { ty: result_ty, kind: ValueKind::Integer(bigint_from_bits(&rbits, s)) })
    }
    Shl => {
      let (w, s) = width_and_signed(ctx, operand_ty).expect("shift requires a sized integer type");
      let shift = b.to_u64().unwrap_or(0) as usize;
      let abits = twos_complement_bits(a, w);
      let mut rbits = vec![false; w];
      for i in 0..w {
        if i >= shift { rbits[i] = abits[i - shift]; }
      }
      Ok(Value { ty: result_ty, kind: ValueKind::Integer(bigint_from_bits(&rbits, s)) })
    }
    Shr => {
      let (w, s) = width_and_signed(ctx, operand_ty).expect("shift requires a sized integer type");
      let shift = b.to_u64().unwrap_or(0) as usize;
      let abits = twos_complement_bits(a, w);
      let fill = s && abits[w - 1];
      let mut rbits = vec![fill; w];
      for i in 0..w {
        let src = i + shift;
        if src < w { rbits[i] = abits[src]; }
      }
      Ok(Value { ty: result_ty, kind: ValueKind::Integer(bigint_from_bits(&rbits, s)) })
    }
  }
}

fn eval_float_binary(ctx: &mut Context, op: BinaryOp, a: f64, b: f64, result_ty: TypeId, is_real: bool) -> Result<Value> {
  use BinaryOp::{Add, Div, Eq, Ge, Gt, Le, Lt, Mul, Ne, Sub};
  let make = |v: f64| Value { ty: result_ty, kind: if is_real { ValueKind::Real(v) } else { ValueKind::Float(v) } };
  let bool_val = |b: bool| Value { ty: result_ty, kind: ValueKind::Boolean(b) };
  match op {
    Eq => Ok(bool_val(a == b)),
    Ne => Ok(bool_val(a != b)),
    Lt => Ok(bool_val(a < b)),
    Le => Ok(bool_val(a <= b)),
    Gt => Ok(bool_val(a > b)),
    Ge => Ok(bool_val(a >= b)),
    Add => Ok(make(a + b)),
    Sub => Ok(make(a - b)),
    Mul => Ok(make(a * b)),
    Div => Ok(make(a / b)),
    _ => ctx.diagnostics.fatal(None, "operator is not valid on floating-point constants"),
  }
}

fn eval_pointer_binary(ctx: &mut Context, op: BinaryOp, a: &Address, b: &Address, result_ty: TypeId) -> Result<Value> {
  match op {
    BinaryOp::Eq => Ok(Value { ty: result_ty, kind: ValueKind::Boolean(addresses_equal(a, b)) }),
    BinaryOp::Ne => Ok(Value { ty: result_ty, kind: ValueKind::Boolean(!addresses_equal(a, b)) }),
    _ => ctx.diagnostics.fatal(None, "pointer ordering/arithmetic is not constant-foldable"),
  }
}

fn addresses_equal(a: &Address, b: &Address) -> bool {
  match (a, b) {
    (Address::Absolute(x), Address::Absolute(y)) => x.cmp(y) == Ordering::Equal,
    (Address::Static(n1, o1), Address::Static(n2, o2)) => n1 == n2 && o1 == o2,
    _ => false,
  }
}

// --- aggregates, sizeof/alignof/countof/startof --------------------------

fn as_u64(v: &Value) -> Option<u64> {
  match &v.kind {
    ValueKind::Integer(bi) => bi.to_u64(),
    ValueKind::Byte(b) => Some(u64::from(*b)),
    _ => None,
  }
}

fn eval_index(ctx: &mut Context, base: Value, index: Value) -> Result<Value> {
  let Some(idx) = as_u64(&index) else {
    return ctx.diagnostics.fatal(None, "index is not a constant integer");
  };
  let idx = idx as usize;
  match base.kind {
    ValueKind::Array { elements, ellipsis } => {
      if let Some(e) = elements.get(idx) { return Ok(e.clone()); }
      if let Some(fill) = ellipsis { return Ok(*fill); }
      ctx.diagnostics.fatal(None, "constant array index out of bounds")
    }
    ValueKind::Slice { .. } => ctx.diagnostics.fatal(None, "indexing a slice constant requires a runtime pointer load and is not foldable"),
    _ => ctx.diagnostics.fatal(None, "index of a non-aggregate constant"),
  }
}

fn eval_member(ctx: &mut Context, base: Value, index: usize) -> Result<Value> {
  match base.kind {
    ValueKind::Struct { members } => match members.into_iter().nth(index) {
      Some(v) => Ok(v),
      None => ctx.diagnostics.fatal(None, "constant struct member index out of bounds"),
    },
    ValueKind::Union { member_index, value } if member_index == index => Ok(*value),
    ValueKind::Union { .. } => ctx.diagnostics.fatal(None, "union member is not the active constant member"),
    _ => ctx.diagnostics.fatal(None, "member access on a non-aggregate constant"),
  }
}

fn eval_sizeof(ctx: &mut Context, result_ty: TypeId, of: TypeId) -> Result<Value> {
  let size = ctx.types.get(of).size;
  if size == crate::types::SIZEOF_UNSIZED {
    return ctx.diagnostics.fatal(None, "sizeof of an unsized type");
  }
  Ok(Value { ty: result_ty, kind: ValueKind::Integer(BigInt::from_u64(size)) })
}

fn eval_countof(ctx: &mut Context, result_ty: TypeId, base: &Expr) -> Result<Value> {
  match ctx.types.get(base.ty).kind.clone() {
    TypeKind::Array { count, .. } => Ok(Value { ty: result_ty, kind: ValueKind::Integer(BigInt::from_u64(count)) }),
    TypeKind::Slice(_) => {
      let v = evaluate(ctx, base)?;
      match v.kind {
        ValueKind::Slice { count, .. } => Ok(*count),
        _ => ctx.diagnostics.fatal(None, "slice count is not a constant"),
      }
    }
    _ => ctx.diagnostics.fatal(None, "countof of a non-array, non-slice type"),
  }
}

fn eval_startof(ctx: &mut Context, result_ty: TypeId, base: &Expr) -> Result<Value> {
  match ctx.types.get(base.ty).kind.clone() {
    TypeKind::Slice(_) => {
      let v = evaluate(ctx, base)?;
      match v.kind {
        ValueKind::Slice { pointer, .. } => Ok(Value { ty: result_ty, kind: pointer.kind }),
        _ => ctx.diagnostics.fatal(None, "slice start is not a constant"),
      }
    }
    TypeKind::Array { .. } => {
      let addr = evaluate_address(ctx, base)?;
      Ok(Value { ty: result_ty, kind: ValueKind::Pointer(addr) })
    }
    _ => ctx.diagnostics.fatal(None, "startof of a non-array, non-slice type"),
  }
}

/// Computes the compile-time address of an lvalue expression, per the
/// constant-foldable address forms in `spec.md` §4.8: a static symbol, a
/// member offset chained from a foldable address, or a literal-index array
/// element. Any path through a local variable or a non-literal index fails.
fn evaluate_address(ctx: &mut Context, expr: &Expr) -> Result<Address> {
  match &expr.kind {
    ExprKind::Symbol(id) => match ctx.symbols.symbol(*id).kind.clone() {
      SymbolKind::Variable(obj) | SymbolKind::Constant(obj) => match obj.address {
        Address::Static(n, o) => Ok(Address::Static(n, o)),
        Address::Absolute(n) => Ok(Address::Absolute(n)),
        Address::Local(..) => ctx.diagnostics.fatal(None, "address-of a local is not constant-foldable"),
      },
      _ => ctx.diagnostics.fatal(None, "address-of a non-object symbol"),
    },
    ExprKind::Member { base, index } => {
      let base_addr = evaluate_address(ctx, base)?;
      let offset = member_offset_of(ctx, base.ty, *index)?;
      Ok(offset_address(base_addr, offset))
    }
    ExprKind::Index { base, index } => {
      let idx_val = evaluate(ctx, index)?;
      let Some(idx) = as_u64(&idx_val) else {
        return ctx.diagnostics.fatal(None, "address-of a non-literal index is not constant-foldable");
      };
      let elem_ty = match &ctx.types.get(base.ty).kind {
        TypeKind::Array { base, .. } => *base,
        _ => return ctx.diagnostics.fatal(None, "address-of an index of a non-array is not constant-foldable"),
      };
      let elem_size = ctx.types.get(elem_ty).size;
      let base_addr = evaluate_address(ctx, base)?;
      Ok(offset_address(base_addr, idx * elem_size))
    }
    _ => ctx.diagnostics.fatal(None, "expression does not have a constant address"),
  }
}

fn member_offset_of(ctx: &mut Context, base_ty: TypeId, index: usize) -> Result<u64> {
  match &ctx.types.get(base_ty).kind {
    TypeKind::Struct(l) | TypeKind::Union(l) => Ok(l.members[index].offset),
    _ => ctx.diagnostics.fatal(None, "member access on a non-aggregate address"),
  }
}

fn offset_address(addr: Address, extra: u64) -> Address {
  match addr {
    Address::Static(n, o) => Address::Static(n, o + extra),
    Address::Absolute(n) => Address::Absolute(n.add(&BigInt::from_u64(extra))),
    Address::Local(n, o, is_param) => Address::Local(n, o + extra as i64, is_param),
  }
}

fn eval_slice(ctx: &mut Context, result_ty: TypeId, base: &Expr, start: Option<&Expr>, end: Option<&Expr>) -> Result<Value> {
  let elem_ty = match &ctx.types.get(result_ty).kind {
    TypeKind::Slice(b) => *b,
    _ => return ctx.diagnostics.fatal(None, "slice expression has a non-slice result type"),
  };
  let base_len = match &ctx.types.get(base.ty).kind {
    TypeKind::Array { count, .. } => *count,
    _ => return ctx.diagnostics.fatal(None, "slicing a non-array constant is not foldable"),
  };
  let start_idx = match start {
    Some(s) => {
      let v = evaluate(ctx, s)?;
      as_u64(&v).unwrap_or(0)
    }
    None => 0,
  };
  let end_idx = match end {
    Some(e) => {
      let v = evaluate(ctx, e)?;
      as_u64(&v).unwrap_or(base_len)
    }
    None => base_len,
  };
  let elem_size = ctx.types.get(elem_ty).size;
  let base_addr = evaluate_address(ctx, base)?;
  let ptr_addr = offset_address(base_addr, start_idx * elem_size);
  let ptr_ty = ctx.types.unique_pointer(&mut ctx.interner, elem_ty);
  let count_ty = ctx.int_type(IntKind::Usize);
  Ok(Value {
    ty: result_ty,
    kind: ValueKind::Slice {
      pointer: Box::new(Value { ty: ptr_ty, kind: ValueKind::Pointer(ptr_addr) }),
      count: Box::new(Value { ty: count_ty, kind: ValueKind::Integer(BigInt::from_u64(end_idx.saturating_sub(start_idx))) }),
    },
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;

  fn ctx() -> Context { Context::new(Config::default()) }

  fn int_expr(ty: TypeId, n: i64) -> Expr {
    Expr { ty, kind: ExprKind::ConstInteger(BigInt::from_i64(n)) }
  }

  #[test]
  fn folds_literal_integer() {
    let mut c = ctx();
    let ty = c.int_type(IntKind::S32);
    let e = int_expr(ty, 42);
    let v = evaluate(&mut c, &e).unwrap();
    assert_eq!(v.kind, ValueKind::Integer(BigInt::from_i64(42)));
  }

  #[test]
  fn folds_addition_with_range_check() {
    let mut c = ctx();
    let ty = c.int_type(IntKind::U8);
    let e = Expr {
      ty,
      kind: ExprKind::Binary {
        op: BinaryOp::Add,
        lhs: Box::new(int_expr(ty, 200)),
        rhs: Box::new(int_expr(ty, 100)),
      },
    };
    let err = evaluate(&mut c, &e);
    assert!(err.is_err(), "200 + 100 should overflow a u8 constant");
  }

  #[test]
  fn wrapping_add_truncates_instead_of_failing() {
    let mut c = ctx();
    let ty = c.int_type(IntKind::U8);
    let e = Expr {
      ty,
      kind: ExprKind::Binary {
        op: BinaryOp::WrappingAdd,
        lhs: Box::new(int_expr(ty, 200)),
        rhs: Box::new(int_expr(ty, 100)),
      },
    };
    let v = evaluate(&mut c, &e).unwrap();
    assert_eq!(v.kind, ValueKind::Integer(BigInt::from_i64(44)));
  }

  #[test]
  fn division_by_zero_is_fatal() {
    let mut c = ctx();
    let ty = c.int_type(IntKind::S32);
    let e = Expr {
      ty,
      kind: ExprKind::Binary {
        op: BinaryOp::Div,
        lhs: Box::new(int_expr(ty, 1)),
        rhs: Box::new(int_expr(ty, 0)),
      },
    };
    assert!(evaluate(&mut c, &e).is_err());
  }

  #[test]
  fn bitwise_and_matches_two_width() {
    let mut c = ctx();
    let ty = c.int_type(IntKind::U8);
    let e = Expr {
      ty,
      kind: ExprKind::Binary {
        op: BinaryOp::BitAnd,
        lhs: Box::new(int_expr(ty, 0b1100)),
        rhs: Box::new(int_expr(ty, 0b1010)),
      },
    };
    let v = evaluate(&mut c, &e).unwrap();
    assert_eq!(v.kind, ValueKind::Integer(BigInt::from_i64(0b1000)));
  }

  #[test]
  fn arithmetic_shift_right_sign_extends() {
    let mut c = ctx();
    let ty = c.int_type(IntKind::S8);
    let usize_ty = c.int_type(IntKind::Usize);
    let e = Expr {
      ty,
      kind: ExprKind::Binary {
        op: BinaryOp::Shr,
        lhs: Box::new(int_expr(ty, -8)),
        rhs: Box::new(int_expr(usize_ty, 1)),
      },
    };
    let v = evaluate(&mut c, &e).unwrap();
    assert_eq!(v.kind, ValueKind::Integer(BigInt::from_i64(-4)));
  }

  #[test]
  fn explicit_narrowing_cast_wraps() {
    let mut c = ctx();
    let s32 = c.int_type(IntKind::S32);
    let u8_ty = c.int_type(IntKind::U8);
    let e = Expr { ty: u8_ty, kind: ExprKind::Cast { explicit: true, operand: Box::new(int_expr(s32, 300)) } };
    let v = evaluate(&mut c, &e).unwrap();
    assert_eq!(v.kind, ValueKind::Integer(BigInt::from_i64(44)));
  }

  #[test]
  fn implicit_widen_out_of_range_is_fatal() {
    let mut c = ctx();
    let integer_ty = c.builtins.integer;
    let u8_ty = c.int_type(IntKind::U8);
    let e = Expr { ty: u8_ty, kind: ExprKind::Cast { explicit: false, operand: Box::new(int_expr(integer_ty, 300)) } };
    assert!(evaluate(&mut c, &e).is_err());
  }

  #[test]
  fn sizeof_yields_type_size() {
    let mut c = ctx();
    let u64_ty = c.int_type(IntKind::U64);
    let usize_ty = c.int_type(IntKind::Usize);
    let e = Expr { ty: usize_ty, kind: ExprKind::Sizeof(u64_ty) };
    let v = evaluate(&mut c, &e).unwrap();
    assert_eq!(v.kind, ValueKind::Integer(BigInt::from_u64(8)));
  }

  #[test]
  fn call_is_never_foldable() {
    let mut c = ctx();
    let ty = c.builtins.void;
    let e = Expr { ty, kind: ExprKind::Call { callee: Box::new(int_expr(ty, 0)), args: vec![] } };
    assert!(evaluate(&mut c, &e).is_err());
  }

  #[test]
  fn byte_string_constant_folds_to_a_static_pointer() {
    let mut c = ctx();
    let ptr_ty = c.builtins.byte_pointer;
    let e = Expr { ty: ptr_ty, kind: ExprKind::ConstBytes(b"hi".to_vec()) };
    let v = evaluate(&mut c, &e).unwrap();
    assert!(matches!(v.kind, ValueKind::Pointer(Address::Static(..))));
  }
}
