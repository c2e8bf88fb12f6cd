//! Source locations and the four-tier diagnostic taxonomy (`spec.md` §7).

use std::fmt;

use crate::intern::Symbol;

/// Sentinel line number for built-in declarations with no source location.
pub const NO_LINE: u32 = 0;

/// A source location: an interned path, a 1-based line number, and a byte
/// pointer into the module's source text (used to reconstruct the offending
/// line for diagnostic underlining). `NO_PATH`/`NO_LINE` sentinels denote
/// built-ins; a location with `path == NO_PATH` is never rendered with a
/// `[path:line]` prefix.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Location {
  pub path: Option<Symbol>,
  pub line: u32,
  pub byte_pointer: usize,
}

impl Location {
  #[must_use] pub fn builtin() -> Self { Self { path: None, line: NO_LINE, byte_pointer: 0 } }

  #[must_use] pub fn new(path: Symbol, line: u32, byte_pointer: usize) -> Self {
    Self { path: Some(path), line, byte_pointer }
  }

  #[must_use] pub fn is_builtin(&self) -> bool { self.path.is_none() }
}

/// Severity tier. Ordered so that `Severity::Fatal` compares greatest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Severity {
  Info,
  Warning,
  Error,
  Fatal,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Severity::Info => "info",
      Severity::Warning => "warning",
      Severity::Error => "error",
      Severity::Fatal => "fatal",
    })
  }
}

/// A single diagnostic message, optionally anchored to a source location
/// and optionally carrying the reconstructed offending line for
/// caret-underlining.
#[derive(Clone, Debug)]
pub struct Diagnostic {
  pub severity: Severity,
  pub location: Option<Location>,
  pub message: String,
  pub line_text: Option<String>,
}

impl Diagnostic {
  #[must_use] pub fn new(severity: Severity, location: Option<Location>, message: impl Into<String>) -> Self {
    Self { severity, location, message: message.into(), line_text: None }
  }

  #[must_use] pub fn with_line_text(mut self, line_text: impl Into<String>) -> Self {
    self.line_text = Some(line_text.into());
    self
  }
}

impl Diagnostic {
  /// Renders with the `[path:line]` prefix resolved against `interner`;
  /// builtin locations (no path) omit the prefix entirely, per `spec.md` §7.
  #[must_use] pub fn render(&self, interner: &crate::intern::Interner) -> String {
    let mut out = String::new();
    if let Some(loc) = &self.location {
      if let Some(path) = loc.path {
        out.push_str(&format!("[{}:{}] ", interner.resolve(path), loc.line));
      }
    }
    out.push_str(&format!("{}: {}", self.severity, self.message));
    if let Some(line) = &self.line_text {
      out.push('\n');
      out.push_str(line);
      out.push('\n');
    }
    out
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.severity, self.message)?;
    if let Some(line) = &self.line_text {
      write!(f, "\n{line}\n")?;
    }
    Ok(())
  }
}

/// Raised when a `fatal` diagnostic terminates compilation; carries the
/// diagnostic that caused the unwind so callers at any level can report it.
#[derive(Clone, Debug)]
pub struct Fatal(pub Diagnostic);

impl fmt::Display for Fatal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}
impl std::error::Error for Fatal {}

pub type Result<T> = std::result::Result<T, Fatal>;

/// Accumulates non-fatal diagnostics (info/warning/error) for a compilation
/// and renders the source path prefix using the owning `Interner`.
#[derive(Default)]
pub struct Diagnostics {
  entries: Vec<Diagnostic>,
}

impl Diagnostics {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn info(&mut self, location: Option<Location>, message: impl Into<String>) {
    self.entries.push(Diagnostic::new(Severity::Info, location, message));
  }

  pub fn warning(&mut self, location: Option<Location>, message: impl Into<String>) {
    self.entries.push(Diagnostic::new(Severity::Warning, location, message));
  }

  pub fn error(&mut self, location: Option<Location>, message: impl Into<String>) {
    self.entries.push(Diagnostic::new(Severity::Error, location, message));
  }

  /// Records a `fatal` diagnostic and returns the `Fatal` error that the
  /// caller should immediately propagate with `?`. This does not unwind by
  /// itself (Rust has no non-local control flow without `?`/panics); every
  /// fallible compiler entry point returns `diag::Result<T>` precisely so
  /// that a fatal diagnostic here becomes an early return there.
  pub fn fatal<T>(&mut self, location: Option<Location>, message: impl Into<String>) -> Result<T> {
    let d = Diagnostic::new(Severity::Fatal, location, message);
    self.entries.push(d.clone());
    Err(Fatal(d))
  }

  #[must_use] pub fn entries(&self) -> &[Diagnostic] { &self.entries }

  #[must_use] pub fn has_errors(&self) -> bool {
    self.entries.iter().any(|d| d.severity >= Severity::Error)
  }

  pub fn print_to_stderr(&self, interner: &crate::intern::Interner) {
    for d in &self.entries {
      eprintln!("{}", d.render(interner));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fatal_returns_err() {
    let mut diags = Diagnostics::new();
    let r: Result<()> = diags.fatal(None, "boom");
    assert!(r.is_err());
    assert_eq!(diags.entries().len(), 1);
    assert_eq!(diags.entries()[0].severity, Severity::Fatal);
  }

  #[test]
  fn has_errors_ignores_info_and_warning() {
    let mut diags = Diagnostics::new();
    diags.info(None, "note");
    diags.warning(None, "careful");
    assert!(!diags.has_errors());
    diags.error(None, "bad");
    assert!(diags.has_errors());
  }

  #[test]
  fn builtin_location_has_no_path() {
    let loc = Location::builtin();
    assert!(loc.is_builtin());
    assert_eq!(loc.line, NO_LINE);
  }
}
