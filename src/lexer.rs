//! Byte stream to token stream, with source locations (`spec.md` §4.3).

use crate::diag::{Diagnostics, Location, Result};
use crate::intern::{Interner, Symbol};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Keyword {
  Namespace, Import, Let, Var, Const, Func, Struct, Union, Enum, Extend, Extern,
  Alias, Typeof, Defer, If, Elif, Else, When, Elwhen, For, In, Break, Continue,
  Switch, Return, Assert, Not, And, Or, Defined, Sizeof, Alignof, Fileof, Lineof,
  Embed, Syscall, Intrinsic, Startof, Countof, True, False,
}

impl Keyword {
  #[must_use] pub fn from_str(s: &str) -> Option<Self> {
    use Keyword::*;
    Some(match s {
      "namespace" => Namespace, "import" => Import, "let" => Let, "var" => Var,
      "const" => Const, "func" => Func, "struct" => Struct, "union" => Union,
      "enum" => Enum, "extend" => Extend, "extern" => Extern, "alias" => Alias,
      "typeof" => Typeof, "defer" => Defer, "if" => If, "elif" => Elif,
      "else" => Else, "when" => When, "elwhen" => Elwhen, "for" => For,
      "in" => In, "break" => Break, "continue" => Continue, "switch" => Switch,
      "return" => Return, "assert" => Assert, "not" => Not, "and" => And,
      "or" => Or, "defined" => Defined, "sizeof" => Sizeof, "alignof" => Alignof,
      "fileof" => Fileof, "lineof" => Lineof, "embed" => Embed, "syscall" => Syscall,
      "intrinsic" => Intrinsic, "startof" => Startof, "countof" => Countof,
      "true" => True, "false" => False,
      _ => return None,
    })
  }
}

/// Multi-character operator sigils, longest-match-first.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Sigil {
  LParen, RParen, LBrace, RBrace, LBracket, RBracket,
  Colon, ColonColon, Semicolon, Comma, Dot, DotStar, DotDot, Ellipsis,
  Eq, EqEq, Bang, BangEq, Lt, LtEq, Gt, GtEq, Shl, Shr,
  Plus, PlusPercent, Minus, MinusPercent, Star, StarPercent, Slash, Percent,
  Amp, Pipe, Caret, Tilde, At, Arrow, LBracket2, RBracket2,
}

pub const SIGILS: &[(&str, Sigil)] = &[
  ("[[", Sigil::LBracket2), ("]]", Sigil::RBracket2),
  ("::", Sigil::ColonColon), ("...", Sigil::Ellipsis), ("..", Sigil::DotDot),
  ("==", Sigil::EqEq), ("!=", Sigil::BangEq), ("<=", Sigil::LtEq), (">=", Sigil::GtEq),
  ("<<", Sigil::Shl), (">>", Sigil::Shr),
  ("+%", Sigil::PlusPercent), ("-%", Sigil::MinusPercent), ("*%", Sigil::StarPercent),
  ("->", Sigil::Arrow), (".*", Sigil::DotStar),
  ("(", Sigil::LParen), (")", Sigil::RParen), ("{", Sigil::LBrace), ("}", Sigil::RBrace),
  ("[", Sigil::LBracket), ("]", Sigil::RBracket),
  (":", Sigil::Colon), (";", Sigil::Semicolon), (",", Sigil::Comma), (".", Sigil::Dot),
  ("=", Sigil::Eq), ("!", Sigil::Bang), ("<", Sigil::Lt), (">", Sigil::Gt),
  ("+", Sigil::Plus), ("-", Sigil::Minus), ("*", Sigil::Star), ("/", Sigil::Slash),
  ("%", Sigil::Percent), ("&", Sigil::Amp), ("|", Sigil::Pipe), ("^", Sigil::Caret),
  ("~", Sigil::Tilde), ("@", Sigil::At),
];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntSuffix { None, U8, S8, U16, S16, U32, S32, U64, S64, Usize, Ssize, U, S, Y }

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
  Keyword(Keyword),
  Sigil(Sigil),
  Identifier(Symbol),
  Integer { text: Symbol, suffix: IntSuffix },
  /// Float literal; `is_f32`/`is_f64` distinguish a suffixed literal from an
  /// unsuffixed `real` literal (neither flag set).
  Float { value: f64, is_f32: bool, is_f64: bool },
  Character(u32),
  ByteString(Vec<u8>),
  Eof,
}

#[derive(Clone, Debug)]
pub struct Token {
  pub kind: TokenKind,
  pub location: Location,
}

pub struct Lexer<'src> {
  path: Symbol,
  src: &'src [u8],
  pos: usize,
  line: u32,
}

impl<'src> Lexer<'src> {
  #[must_use] pub fn new(path: Symbol, src: &'src str) -> Self {
    Self { path, src: src.as_bytes(), pos: 0, line: 1 }
  }

  fn loc(&self) -> Location { Location::new(self.path, self.line, self.pos) }

  fn peek(&self) -> Option<u8> { self.src.get(self.pos).copied() }
  fn peek_at(&self, off: usize) -> Option<u8> { self.src.get(self.pos + off).copied() }

  fn advance(&mut self) -> Option<u8> {
    let b = self.peek()?;
    self.pos += 1;
    if b == b'\n' { self.line += 1; }
    Some(b)
  }

  fn skip_trivia(&mut self) {
    loop {
      match self.peek() {
        Some(b' ' | b'\t' | b'\r' | b'\n') => { self.advance(); }
        Some(b'#') => {
          while let Some(b) = self.peek() {
            if b == b'\n' { break; }
            self.advance();
          }
        }
        _ => break,
      }
    }
  }

  /// Lexes the entire source into a token stream, ending with `Eof`.
  /// Fails fatally on the first illegal byte or malformed literal, per
  /// `spec.md` §4.3/§7's lexer propagation policy.
  pub fn lex_all(mut self, interner: &mut Interner, diags: &mut Diagnostics) -> Result<Vec<Token>> {
    let mut out = Vec::new();
    loop {
      let tok = self.next_token(interner, diags)?;
      let is_eof = matches!(tok.kind, TokenKind::Eof);
      out.push(tok);
      if is_eof { break; }
    }
    Ok(out)
  }

  fn next_token(&mut self, interner: &mut Interner, diags: &mut Diagnostics) -> Result<Token> {
    self.skip_trivia();
    let loc = self.loc();
    let Some(b) = self.peek() else { return Ok(Token { kind: TokenKind::Eof, location: loc }); };

    if !(0x20..=0x7e).contains(&b) && b != b'\t' {
      return diags.fatal(Some(loc), format!("illegal byte 0x{b:02x} in source"));
    }

    if b == b'"' { return self.lex_byte_string(interner, diags); }
    if b == b'\'' { return self.lex_character(diags); }
    if b.is_ascii_digit() { return self.lex_number(interner, diags); }
    if b.is_ascii_alphabetic() || b == b'_' { return self.lex_identifier(interner); }

    for (text, sigil) in SIGILS {
      if self.src[self.pos..].starts_with(text.as_bytes()) {
        for _ in 0..text.len() { self.advance(); }
        return Ok(Token { kind: TokenKind::Sigil(*sigil), location: loc });
      }
    }

    diags.fatal(Some(loc), format!("illegal character `{}`", b as char))
  }

  fn lex_identifier(&mut self, interner: &mut Interner) -> Result<Token> {
    let loc = self.loc();
    let start = self.pos;
    while let Some(b) = self.peek() {
      if b.is_ascii_alphanumeric() || b == b'_' { self.advance(); } else { break; }
    }
    let text = std::str::from_utf8(&self.src[start..self.pos]).expect("ascii checked above");
    let kind = match Keyword::from_str(text) {
      Some(kw) => TokenKind::Keyword(kw),
      None => TokenKind::Identifier(interner.intern(text)),
    };
    Ok(Token { kind, location: loc })
  }

  fn lex_number(&mut self, interner: &mut Interner, diags: &mut Diagnostics) -> Result<Token> {
    let loc = self.loc();
    let start = self.pos;
    let mut is_float = false;

    if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'b' | b'o' | b'x')) {
      self.advance();
      self.advance();
      while let Some(b) = self.peek() {
        if b.is_ascii_alphanumeric() { self.advance(); } else { break; }
      }
    } else {
      while matches!(self.peek(), Some(b) if b.is_ascii_digit()) { self.advance(); }
      if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b) if b.is_ascii_digit()) {
        is_float = true;
        self.advance();
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) { self.advance(); }
      }
    }

    let digits_end = self.pos;
    let digits_text = std::str::from_utf8(&self.src[start..digits_end]).expect("ascii checked above");

    if is_float {
      let mut is_f32 = false;
      let mut is_f64 = false;
      if self.src[self.pos..].starts_with(b"f32") { is_f32 = true; for _ in 0..3 { self.advance(); } }
      else if self.src[self.pos..].starts_with(b"f64") { is_f64 = true; for _ in 0..3 { self.advance(); } }
      let value: f64 = digits_text.parse().map_err(|_| ())
        .unwrap_or_else(|()| f64::NAN);
      if value.is_nan() {
        return diags.fatal(Some(loc), format!("malformed floating point literal `{digits_text}`"));
      }
      return Ok(Token { kind: TokenKind::Float { value, is_f32, is_f64 }, location: loc });
    }

    let suffix = self.lex_int_suffix();
    let sym = interner.intern(digits_text);
    Ok(Token { kind: TokenKind::Integer { text: sym, suffix }, location: loc })
  }

  fn lex_int_suffix(&mut self) -> IntSuffix {
    macro_rules! try_suffix {
      ($lit:expr, $kind:expr) => {
        if self.src[self.pos..].starts_with($lit.as_bytes()) {
          for _ in 0..$lit.len() { self.advance(); }
          return $kind;
        }
      };
    }
    try_suffix!("usize", IntSuffix::Usize);
    try_suffix!("ssize", IntSuffix::Ssize);
    try_suffix!("u8", IntSuffix::U8); try_suffix!("s8", IntSuffix::S8);
    try_suffix!("u16", IntSuffix::U16); try_suffix!("s16", IntSuffix::S16);
    try_suffix!("u32", IntSuffix::U32); try_suffix!("s32", IntSuffix::S32);
    try_suffix!("u64", IntSuffix::U64); try_suffix!("s64", IntSuffix::S64);
    try_suffix!("u", IntSuffix::U); try_suffix!("s", IntSuffix::S); try_suffix!("y", IntSuffix::Y);
    IntSuffix::None
  }

  fn lex_character(&mut self, diags: &mut Diagnostics) -> Result<Token> {
    let loc = self.loc();
    self.advance(); // opening quote
    let value = match self.advance() {
      Some(b'\\') => self.lex_escape(diags)?,
      Some(b) => u32::from(b),
      None => return diags.fatal(Some(loc), "unterminated character literal"),
    };
    if self.advance() != Some(b'\'') {
      return diags.fatal(Some(loc), "character literal must contain exactly one character");
    }
    Ok(Token { kind: TokenKind::Character(value), location: loc })
  }

  fn lex_byte_string(&mut self, interner: &mut Interner, diags: &mut Diagnostics) -> Result<Token> {
    let loc = self.loc();
    self.advance(); // opening quote
    let mut bytes = Vec::new();
    loop {
      match self.advance() {
        Some(b'"') => break,
        Some(b'\\') => bytes.push(self.lex_escape(diags)? as u8),
        Some(b) => bytes.push(b),
        None => return diags.fatal(Some(loc), "unterminated string literal"),
      }
    }
    let _ = interner; // byte-string contents are stored verbatim, not interned as identifiers
    Ok(Token { kind: TokenKind::ByteString(bytes), location: loc })
  }

  fn lex_escape(&mut self, diags: &mut Diagnostics) -> Result<u32> {
    let loc = self.loc();
    Ok(match self.advance() {
      Some(b'n') => u32::from(b'\n'),
      Some(b't') => u32::from(b'\t'),
      Some(b'r') => u32::from(b'\r'),
      Some(b'0') => 0,
      Some(b'\\') => u32::from(b'\\'),
      Some(b'\'') => u32::from(b'\''),
      Some(b'"') => u32::from(b'"'),
      Some(b'x') => {
        let hi = self.advance().and_then(|b| (b as char).to_digit(16));
        let lo = self.advance().and_then(|b| (b as char).to_digit(16));
        match (hi, lo) {
          (Some(hi), Some(lo)) => hi * 16 + lo,
          _ => return diags.fatal(Some(loc), "malformed \\x escape sequence"),
        }
      }
      _ => return diags.fatal(Some(loc), "unrecognized escape sequence"),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lex(src: &str) -> (Vec<Token>, Interner) {
    let mut interner = Interner::new();
    let mut diags = Diagnostics::new();
    let path = interner.intern("test.sunder");
    let toks = Lexer::new(path, src).lex_all(&mut interner, &mut diags).expect("lex ok");
    (toks, interner)
  }

  #[test]
  fn lexes_keywords_and_identifiers() {
    let (toks, interner) = lex("let x = foo;");
    assert!(matches!(toks[0].kind, TokenKind::Keyword(Keyword::Let)));
    let TokenKind::Identifier(sym) = toks[1].kind else { panic!() };
    assert_eq!(interner.resolve(sym), "x");
  }

  #[test]
  fn lexes_multi_char_sigils_longest_match() {
    let (toks, _) = lex("a <<= b");
    // `<<` then `=`, never a spurious 3-char match, and never split as `<` `<`.
    assert!(matches!(toks[1].kind, TokenKind::Sigil(Sigil::Shl)));
    assert!(matches!(toks[2].kind, TokenKind::Sigil(Sigil::Eq)));
  }

  #[test]
  fn lexes_wrapping_operators() {
    let (toks, _) = lex("+% -% *%");
    assert!(matches!(toks[0].kind, TokenKind::Sigil(Sigil::PlusPercent)));
    assert!(matches!(toks[1].kind, TokenKind::Sigil(Sigil::MinusPercent)));
    assert!(matches!(toks[2].kind, TokenKind::Sigil(Sigil::StarPercent)));
  }

  #[test]
  fn lexes_integer_suffixes() {
    let (toks, _) = lex("256u8 10 0x1F");
    assert!(matches!(toks[0].kind, TokenKind::Integer { suffix: IntSuffix::U8, .. }));
    assert!(matches!(toks[1].kind, TokenKind::Integer { suffix: IntSuffix::None, .. }));
    assert!(matches!(toks[2].kind, TokenKind::Integer { suffix: IntSuffix::None, .. }));
  }

  #[test]
  fn lexes_float_suffixes() {
    let (toks, _) = lex("1.0f32 2.5f64 3.0");
    assert!(matches!(toks[0].kind, TokenKind::Float { is_f32: true, .. }));
    assert!(matches!(toks[1].kind, TokenKind::Float { is_f64: true, .. }));
    assert!(matches!(toks[2].kind, TokenKind::Float { is_f32: false, is_f64: false, .. }));
  }

  #[test]
  fn skips_line_comments() {
    let (toks, _) = lex("# comment\nlet");
    assert!(matches!(toks[0].kind, TokenKind::Keyword(Keyword::Let)));
  }

  #[test]
  fn character_literal_computes_to_integer() {
    let (toks, _) = lex("'a'");
    assert!(matches!(toks[0].kind, TokenKind::Character(97)));
  }

  #[test]
  fn rejects_illegal_byte() {
    let mut interner = Interner::new();
    let mut diags = Diagnostics::new();
    let path = interner.intern("t.sunder");
    let err = Lexer::new(path, "let x = \x01;").lex_all(&mut interner, &mut diags);
    assert!(err.is_err());
  }

  #[test]
  fn byte_string_literal_raw_bytes() {
    let (toks, _) = lex("\"ab\\ncd\"");
    let TokenKind::ByteString(bytes) = &toks[0].kind else { panic!() };
    assert_eq!(bytes, b"ab\ncd");
  }
}
