//! Arbitrary-precision signed integers backed by byte limbs.
//!
//! The algorithms here mirror the original `autil_bigint`/`bigint` kernel
//! bit for bit: schoolbook long multiplication, bit-at-a-time binary long
//! division, and two's-complement bridging to fixed-width bit arrays. None
//! of this delegates to a host integer type for the arithmetic itself,
//! since host division has implementation-defined rounding for negative
//! operands and the specification requires C99 truncating division exactly.

use std::cmp::Ordering;
use std::fmt;

use smallvec::SmallVec;

/// Little-endian byte limbs. Most integers that appear in source programs
/// fit in a machine word, so the inline capacity avoids heap traffic for the
/// common case.
type Limbs = SmallVec<[u8; 8]>;

/// An arbitrary-precision signed integer.
///
/// Invariant: `sign == 0` if and only if `magnitude` is empty (zero is the
/// unique value with sign 0 and no limbs); otherwise the most significant
/// limb is nonzero.
#[derive(Clone, Debug, Eq)]
pub struct BigInt {
  sign: i8,
  magnitude: Limbs,
}

/// Signed fixed-width bit array, used to bridge bignums to the two's
/// complement representations a backend must emit.
#[derive(Clone, Debug)]
pub struct BitArr {
  bits: Vec<bool>,
}

impl BitArr {
  #[must_use] pub fn new(count: usize) -> Self { Self { bits: vec![false; count] } }
  #[must_use] pub fn count(&self) -> usize { self.bits.len() }
  pub fn get(&self, n: usize) -> bool { self.bits[n] }
  pub fn set(&mut self, n: usize, value: bool) { self.bits[n] = value; }

  /// In-place two's complement negation: complement every bit, then add one.
  fn twos_complement_neg(&mut self) {
    for b in &mut self.bits { *b = !*b; }
    let mut carry = true;
    for b in &mut self.bits {
      if !carry { break; }
      let (sum, new_carry) = (!*b, *b);
      *b = sum;
      carry = new_carry;
    }
  }
}

impl BigInt {
  /// The unique zero value.
  #[must_use] pub fn zero() -> Self { Self { sign: 0, magnitude: Limbs::new() } }

  #[must_use] pub fn sign(&self) -> i8 { self.sign }
  #[must_use] pub fn is_zero(&self) -> bool { self.sign == 0 }

  fn from_parts(sign: i8, magnitude: Limbs) -> Self {
    let mut v = Self { sign, magnitude };
    v.normalize();
    v
  }

  /// Trim trailing (most-significant) zero limbs; force sign to 0 when the
  /// magnitude becomes empty.
  fn normalize(&mut self) {
    while self.magnitude.last() == Some(&0) { self.magnitude.pop(); }
    if self.magnitude.is_empty() { self.sign = 0; }
  }

  #[must_use] pub fn from_i64(v: i64) -> Self {
    if v == 0 { return Self::zero(); }
    let sign = if v < 0 { -1 } else { 1 };
    let mut mag = v.unsigned_abs();
    let mut limbs = Limbs::new();
    while mag != 0 {
      limbs.push((mag & 0xff) as u8);
      mag >>= 8;
    }
    Self::from_parts(sign, limbs)
  }

  #[must_use] pub fn from_u64(v: u64) -> Self {
    if v == 0 { return Self::zero(); }
    let mut mag = v;
    let mut limbs = Limbs::new();
    while mag != 0 {
      limbs.push((mag & 0xff) as u8);
      mag >>= 8;
    }
    Self::from_parts(1, limbs)
  }

  #[must_use] pub fn neg(&self) -> Self {
    Self { sign: -self.sign, magnitude: self.magnitude.clone() }
  }

  #[must_use] pub fn abs(&self) -> Self {
    Self { sign: self.sign.abs(), magnitude: self.magnitude.clone() }
  }

  /// Magnitude-only comparison.
  fn cmp_magnitude(&self, other: &Self) -> Ordering {
    if self.magnitude.len() != other.magnitude.len() {
      return self.magnitude.len().cmp(&other.magnitude.len());
    }
    for i in (0..self.magnitude.len()).rev() {
      if self.magnitude[i] != other.magnitude[i] {
        return self.magnitude[i].cmp(&other.magnitude[i]);
      }
    }
    Ordering::Equal
  }

  #[must_use] pub fn cmp(&self, other: &Self) -> Ordering {
    match self.sign.cmp(&other.sign) {
      Ordering::Equal => {
        if self.sign >= 0 { self.cmp_magnitude(other) } else { other.cmp_magnitude(self) }
      }
      ord => ord,
    }
  }

  #[must_use] pub fn add(&self, rhs: &Self) -> Self {
    if self.sign == 0 { return rhs.clone(); }
    if rhs.sign == 0 { return self.clone(); }
    if self.sign == rhs.sign {
      let mag = add_magnitude(&self.magnitude, &rhs.magnitude);
      return Self::from_parts(self.sign, mag);
    }
    // Opposite signs: dispatch through subtraction of magnitudes.
    if self.sign > 0 { self.sub(&rhs.neg()) } else { rhs.sub(&self.neg()) }
  }

  #[must_use] pub fn sub(&self, rhs: &Self) -> Self {
    if rhs.sign == 0 { return self.clone(); }
    if self.sign == 0 { return rhs.neg(); }
    if self.sign != rhs.sign {
      let mag = add_magnitude(&self.magnitude, &rhs.magnitude);
      return Self::from_parts(self.sign, mag);
    }
    // Same sign: subtract magnitudes, swapping operands (and flipping the
    // result sign) if lhs's magnitude is smaller than rhs's, exactly as the
    // original `autil_bigint_sub` does.
    match self.cmp_magnitude(rhs) {
      Ordering::Equal => Self::zero(),
      Ordering::Greater => Self::from_parts(self.sign, sub_magnitude(&self.magnitude, &rhs.magnitude)),
      Ordering::Less => Self::from_parts(-self.sign, sub_magnitude(&rhs.magnitude, &self.magnitude)),
    }
  }

  #[must_use] pub fn mul(&self, rhs: &Self) -> Self {
    if self.sign == 0 || rhs.sign == 0 { return Self::zero(); }
    let mag = mul_magnitude(&self.magnitude, &rhs.magnitude);
    Self::from_parts(self.sign * rhs.sign, mag)
  }

  /// Truncating (C99) division with remainder: `(a/b)*b + a%b == a`, with
  /// the remainder's sign matching the dividend's sign (or zero).
  ///
  /// # Panics
  /// Panics on division by zero; the specification treats this as fatal at
  /// the call site, which in this crate is the evaluator/resolver layer
  /// (they check for zero before calling and emit a proper diagnostic).
  #[must_use] pub fn divrem(&self, rhs: &Self) -> (Self, Self) {
    assert!(rhs.sign != 0, "division by zero");
    if self.sign == 0 { return (Self::zero(), Self::zero()); }

    let n = self.abs();
    let d = rhs.abs();
    let nbits = n.magnitude_bit_count();
    let mut quotient = Self::zero();
    let mut remainder = Self::zero();
    for i in (0..nbits).rev() {
      remainder.magnitude_shiftl(1);
      remainder.magnitude_bit_set(0, n.magnitude_bit_get(i));
      if remainder.cmp_magnitude(&d) != Ordering::Less {
        remainder = remainder.sub(&d);
        quotient.magnitude_bit_set(i, true);
      }
    }
    quotient.sign = if quotient.magnitude.is_empty() { 0 } else { self.sign * rhs.sign };
    remainder.sign = if remainder.magnitude.is_empty() { 0 } else { self.sign };
    (quotient, remainder)
  }

  /// Number of bits required to represent the magnitude (0 for zero).
  #[must_use] pub fn magnitude_bit_count(&self) -> usize {
    match self.magnitude.last() {
      None => 0,
      Some(&top) => (self.magnitude.len() - 1) * 8 + (8 - top.leading_zeros() as usize),
    }
  }

  #[must_use] pub fn magnitude_bit_get(&self, n: usize) -> bool {
    let limb = n / 8;
    if limb >= self.magnitude.len() { return false; }
    (self.magnitude[limb] >> (n % 8)) & 1 != 0
  }

  /// Sets bit `n` of the magnitude. Setting a bit to 0 on an index past the
  /// current magnitude is a no-op; setting a bit to 1 grows the magnitude
  /// and, if the value was zero, promotes the sign to +1.
  pub fn magnitude_bit_set(&mut self, n: usize, value: bool) {
    let limb = n / 8;
    if limb >= self.magnitude.len() {
      if !value { return; }
      self.magnitude.resize(limb + 1, 0);
    }
    let mask = 1u8 << (n % 8);
    if value {
      self.magnitude[limb] |= mask;
      if self.sign == 0 { self.sign = 1; }
    } else {
      self.magnitude[limb] &= !mask;
    }
    self.normalize();
  }

  pub fn magnitude_shiftl(&mut self, nbits: usize) {
    if nbits == 0 || self.sign == 0 { return; }
    let nlimbs = nbits / 8;
    let nbits_rem = nbits % 8;
    if nlimbs > 0 {
      let mut shifted = Limbs::new();
      shifted.resize(nlimbs, 0);
      shifted.extend_from_slice(&self.magnitude);
      self.magnitude = shifted;
    }
    if nbits_rem > 0 {
      let mut carry = 0u16;
      for limb in &mut self.magnitude {
        let v = (u16::from(*limb) << nbits_rem) | carry;
        *limb = (v & 0xff) as u8;
        carry = v >> 8;
      }
      if carry != 0 { self.magnitude.push(carry as u8); }
    }
    self.normalize();
  }

  pub fn magnitude_shiftr(&mut self, nbits: usize) {
    if nbits == 0 || self.sign == 0 { return; }
    let nlimbs = nbits / 8;
    if nlimbs >= self.magnitude.len() {
      self.magnitude.clear();
      self.sign = 0;
      return;
    }
    self.magnitude.drain(0..nlimbs);
    let nbits_rem = nbits % 8;
    if nbits_rem > 0 {
      let mut carry = 0u8;
      for limb in self.magnitude.iter_mut().rev() {
        let v = *limb;
        *limb = (v >> nbits_rem) | (carry << (8 - nbits_rem));
        carry = v & ((1 << nbits_rem) - 1);
      }
    }
    self.normalize();
  }

  /// Parses an optionally-signed, optionally radix-prefixed integer literal:
  /// `[+-]?(0b|0o|0x)?digits`. No whitespace or digit separators. Returns
  /// `None` on malformed or empty input, matching the sentinel-failure
  /// contract in `spec.md` §4.1.
  #[must_use] pub fn parse(text: &str) -> Option<Self> {
    let mut bytes = text.as_bytes();
    if bytes.is_empty() { return None; }
    let mut sign: i8 = 1;
    match bytes[0] {
      b'+' => bytes = &bytes[1..],
      b'-' => { sign = -1; bytes = &bytes[1..]; }
      _ => {}
    }
    if bytes.is_empty() { return None; }
    let mut radix = 10u32;
    if bytes.len() >= 2 && bytes[0] == b'0' {
      match bytes[1] {
        b'b' | b'B' => { radix = 2; bytes = &bytes[2..]; }
        b'o' | b'O' => { radix = 8; bytes = &bytes[2..]; }
        b'x' | b'X' => { radix = 16; bytes = &bytes[2..]; }
        _ => {}
      }
    }
    if bytes.is_empty() { return None; }
    let mut value = Self::zero();
    let radix_big = Self::from_u64(u64::from(radix));
    for &b in bytes {
      let digit = match b {
        b'0'..=b'9' => u32::from(b - b'0'),
        b'a'..=b'z' => u32::from(b - b'a') + 10,
        b'A'..=b'Z' => u32::from(b - b'A') + 10,
        _ => return None,
      };
      if digit >= radix { return None; }
      value = value.mul(&radix_big).add(&Self::from_u64(u64::from(digit)));
    }
    if sign < 0 { value = value.neg(); }
    Some(value)
  }

  /// Formats in the given radix (2, 8, 10, or 16), sign-prefixed, with the
  /// conventional `0b`/`0o`/`0x` prefix for non-decimal radices.
  #[must_use] pub fn to_radix_string(&self, radix: u32) -> String {
    if self.sign == 0 { return "0".to_string(); }
    let prefix = match radix { 2 => "0b", 8 => "0o", 16 => "0x", _ => "" };
    let digits = "0123456789abcdefghijklmnopqrstuvwxyz".as_bytes();
    let mut n = self.abs();
    let radix_big = Self::from_u64(u64::from(radix));
    let mut out = Vec::new();
    while !n.is_zero() {
      let (q, r) = n.divrem(&radix_big);
      let d = r.to_u64().unwrap_or(0) as usize;
      out.push(digits[d]);
      n = q;
    }
    if out.is_empty() { out.push(b'0'); }
    out.reverse();
    let mut s = String::new();
    if self.sign < 0 { s.push('-'); }
    s.push_str(prefix);
    s.push_str(std::str::from_utf8(&out).expect("ascii digits"));
    s
  }

  #[must_use] pub fn to_u64(&self) -> Option<u64> {
    if self.sign < 0 { return None; }
    if self.magnitude.len() > 8 { return None; }
    let mut v: u64 = 0;
    for (i, &limb) in self.magnitude.iter().enumerate() {
      v |= u64::from(limb) << (8 * i);
    }
    Some(v)
  }

  #[must_use] pub fn to_i64(&self) -> Option<i64> {
    if self.sign >= 0 {
      let u = self.to_u64()?;
      i64::try_from(u).ok()
    } else {
      let u = self.abs().to_u64()?;
      if u > i64::MAX as u64 + 1 { return None; }
      if u == i64::MAX as u64 + 1 { Some(i64::MIN) } else { Some(-(u as i64)) }
    }
  }

  /// Converts to a fixed-width two's-complement bit array. Fails (returns
  /// `None`) if the value's two's-complement representation does not fit
  /// in `width` bits.
  #[must_use] pub fn to_bitarr(&self, width: usize) -> Option<BitArr> {
    if self.magnitude_bit_count() > width { return None; }
    let mut res = BitArr::new(width);
    for i in 0..width { res.set(i, self.magnitude_bit_get(i)); }
    if self.sign < 0 { res.twos_complement_neg(); }
    Some(res)
  }

  /// Inverts `to_bitarr`: interprets `bits` as two's complement if
  /// `is_signed` and the top bit is set, otherwise as a plain magnitude.
  #[must_use] pub fn from_bitarr(bits: &BitArr, is_signed: bool) -> Self {
    let n = bits.count();
    let is_neg = is_signed && n > 0 && bits.get(n - 1);
    let mut mag_bits = bits.clone();
    if is_neg { mag_bits.twos_complement_neg(); }
    let mut res = Self::zero();
    for i in 0..n { res.magnitude_bit_set(i, mag_bits.get(i)); }
    if is_neg { res = res.neg(); }
    res
  }
}

fn add_magnitude(a: &[u8], b: &[u8]) -> Limbs {
  let mut out = Limbs::new();
  let mut carry: u16 = 0;
  for i in 0..a.len().max(b.len()) {
    let av = u16::from(*a.get(i).unwrap_or(&0));
    let bv = u16::from(*b.get(i).unwrap_or(&0));
    let sum = av + bv + carry;
    out.push((sum & 0xff) as u8);
    carry = sum >> 8;
  }
  if carry != 0 { out.push(carry as u8); }
  out
}

/// Subtracts `b` from `a`, assuming `a >= b` in magnitude.
fn sub_magnitude(a: &[u8], b: &[u8]) -> Limbs {
  let mut out = Limbs::new();
  let mut borrow: i16 = 0;
  for i in 0..a.len() {
    let av = i16::from(a[i]);
    let bv = i16::from(*b.get(i).unwrap_or(&0));
    let mut diff = av - bv - borrow;
    if diff < 0 { diff += 256; borrow = 1; } else { borrow = 0; }
    out.push(diff as u8);
  }
  out
}

fn mul_magnitude(a: &[u8], b: &[u8]) -> Limbs {
  let mut w = Limbs::new();
  w.resize(a.len() + b.len(), 0);
  for (j, &vj) in b.iter().enumerate() {
    if vj == 0 { continue; }
    let mut k: u32 = 0;
    for (i, &ui) in a.iter().enumerate() {
      let t = u32::from(ui) * u32::from(vj) + u32::from(w[i + j]) + k;
      w[i + j] = (t & 0xff) as u8;
      k = t >> 8;
    }
    w[j + a.len()] = k as u8;
  }
  w
}

impl PartialEq for BigInt {
  fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl PartialOrd for BigInt {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}
impl Ord for BigInt {
  fn cmp(&self, other: &Self) -> Ordering { BigInt::cmp(self, other) }
}

impl fmt::Display for BigInt {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_radix_string(10))
  }
}

impl Default for BigInt {
  fn default() -> Self { Self::zero() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_is_canonical() {
    let a = BigInt::from_i64(5).sub(&BigInt::from_i64(5));
    assert!(a.is_zero());
    assert_eq!(a.sign(), 0);
  }

  #[test]
  fn add_sub_roundtrip() {
    let a = BigInt::from_i64(123_456);
    let b = BigInt::from_i64(-98_765);
    let sum = a.add(&b);
    assert_eq!(sum.to_i64(), Some(123_456 - 98_765));
    let back = sum.sub(&b);
    assert_eq!(back, a);
  }

  #[test]
  fn mul_large() {
    let a = BigInt::from_u64(u64::MAX);
    let b = BigInt::from_u64(2);
    let p = a.mul(&b);
    assert_eq!(p.to_radix_string(10), "36893488147419103230");
  }

  #[test]
  fn divrem_matches_c99_truncation() {
    let cases: &[(i64, i64)] = &[(7, 3), (7, -3), (-7, 3), (-7, -3)];
    for &(a, b) in cases {
      let (q, r) = BigInt::from_i64(a).divrem(&BigInt::from_i64(b));
      assert_eq!(q.to_i64(), Some(a / b), "quotient for {a}/{b}");
      assert_eq!(r.to_i64(), Some(a % b), "remainder for {a}/{b}");
      // (a/b)*b + a%b == a
      let check = q.mul(&BigInt::from_i64(b)).add(&r);
      assert_eq!(check.to_i64(), Some(a));
    }
  }

  #[test]
  fn divrem_remainder_sign_matches_dividend() {
    let (_, r) = BigInt::from_i64(-7).divrem(&BigInt::from_i64(3));
    assert!(r.sign() <= 0);
    let (_, r) = BigInt::from_i64(7).divrem(&BigInt::from_i64(-3));
    assert!(r.sign() >= 0);
  }

  #[test]
  #[should_panic(expected = "division by zero")]
  fn division_by_zero_panics() {
    let _ = BigInt::from_i64(1).divrem(&BigInt::zero());
  }

  #[test]
  fn parse_radixes() {
    assert_eq!(BigInt::parse("0x1F").unwrap().to_i64(), Some(31));
    assert_eq!(BigInt::parse("0b101").unwrap().to_i64(), Some(5));
    assert_eq!(BigInt::parse("0o17").unwrap().to_i64(), Some(15));
    assert_eq!(BigInt::parse("-42").unwrap().to_i64(), Some(-42));
    assert_eq!(BigInt::parse("").is_none(), true);
    assert_eq!(BigInt::parse("0x").is_none(), true);
    assert_eq!(BigInt::parse("12a").is_none(), true);
  }

  #[test]
  fn bitarr_roundtrip_signed() {
    for v in [-128i64, -1, 0, 1, 127] {
      let b = BigInt::from_i64(v);
      let arr = b.to_bitarr(8).unwrap();
      let back = BigInt::from_bitarr(&arr, true);
      assert_eq!(back.to_i64(), Some(v));
    }
  }

  #[test]
  fn bitarr_roundtrip_unsigned() {
    for v in [0u64, 1, 255] {
      let b = BigInt::from_u64(v);
      let arr = b.to_bitarr(8).unwrap();
      let back = BigInt::from_bitarr(&arr, false);
      assert_eq!(back.to_u64(), Some(v));
    }
  }

  #[test]
  fn magnitude_bit_set_promotes_zero_sign() {
    let mut z = BigInt::zero();
    z.magnitude_bit_set(3, true);
    assert_eq!(z.sign(), 1);
    assert_eq!(z.to_i64(), Some(8));
  }

  #[test]
  fn magnitude_bit_set_no_op_on_zero_value() {
    let mut z = BigInt::zero();
    z.magnitude_bit_set(40, false);
    assert!(z.is_zero());
  }

  #[test]
  fn shift_right_beyond_width_yields_zero() {
    let mut v = BigInt::from_u64(0xff);
    v.magnitude_shiftr(64);
    assert!(v.is_zero());
  }
}
