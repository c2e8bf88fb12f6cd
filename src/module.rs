//! Module loader and import resolution (`spec.md` §4.4 data flow, §5
//! ordering guarantees, §6 "Module import resolution").

use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use crate::context::Context;
use crate::cst::DeclId;
use crate::diag::{Diagnostics, Location, Result};
use crate::intern::Symbol;
use crate::symbol::SymbolTableId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LoadState {
  /// Currently being loaded; re-entering via a transitive import is a
  /// circular-dependency error.
  InProgress,
  Loaded,
}

/// A single loaded source file: its canonical path, source text, CST
/// top-level declarations (in parse order; the orderer later produces a
/// separate topological order), and the two symbol tables the resolver
/// populates.
pub struct Module {
  pub name: Symbol,
  pub canonical_path: PathBuf,
  pub source: String,
  pub decls: Vec<DeclId>,
  /// Filled in by the orderer; empty until then.
  pub ordered_decls: Vec<DeclId>,
  pub local_table: SymbolTableId,
  pub export_table: SymbolTableId,
  pub state: LoadState,
}

/// Owns the canonical-path → load-state map used for circular-import
/// detection, separately from `Context::modules` (which only holds
/// fully-constructed `Module`s once loading completes).
#[derive(Default)]
pub struct Loader {
  in_progress: HashMap<PathBuf, ()>,
}

impl Loader {
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Resolves `import_path` relative to `importing_dir`, following
  /// `spec.md` §6's search order: (1) `dir(P)/S`, then (2) each
  /// `SUNDER_SEARCH_PATH` entry.
  pub fn resolve_import_path(
    &self,
    ctx: &Context,
    importing_dir: &Path,
    import_path: &str,
    location: Location,
    diags: &mut Diagnostics,
  ) -> Result<PathBuf> {
    let direct = importing_dir.join(import_path);
    if direct.exists() {
      return canonicalize(&direct, location, diags);
    }
    for dir in &ctx.config.search_path {
      let candidate = dir.join(import_path);
      if candidate.exists() {
        return canonicalize(&candidate, location, diags);
      }
    }
    diags.fatal(Some(location), format!("cannot find import `{import_path}`"))
  }

  /// Expands a resolved import target into the concrete list of `.sunder`
  /// files to load: a single file imports itself (subject to
  /// platform-suffix selection); a directory imports every eligible file
  /// transitively, per `spec.md` §6.
  pub fn expand_import_target(&self, ctx: &Context, resolved: &Path) -> std::io::Result<Vec<PathBuf>> {
    if resolved.is_dir() {
      let mut files = Vec::new();
      collect_directory_imports(ctx, resolved, &mut files)?;
      files.sort();
      return Ok(files);
    }
    if should_skip_plain_file(ctx, resolved) {
      return Ok(Vec::new());
    }
    Ok(vec![resolved.to_path_buf()])
  }

  pub fn begin_load(&mut self, path: &Path, location: Location, diags: &mut Diagnostics) -> Result<()> {
    if self.in_progress.contains_key(path) {
      return diags.fatal(Some(location), format!("circular module import: `{}`", path.display()));
    }
    self.in_progress.insert(path.to_path_buf(), ());
    Ok(())
  }

  pub fn finish_load(&mut self, path: &Path) {
    self.in_progress.remove(path);
  }
}

fn canonicalize(path: &Path, location: Location, diags: &mut Diagnostics) -> Result<PathBuf> {
  match path.canonicalize() {
    Ok(p) => Ok(p),
    Err(e) => diags.fatal(Some(location), format!("cannot resolve path `{}`: {e}", path.display())),
  }
}

/// Directory imports skip `.test.sunder` files and anything not ending in
/// `.sunder`; non-directory entries recurse into subdirectories.
fn collect_directory_imports(ctx: &Context, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
  for entry in std::fs::read_dir(dir)? {
    let entry = entry?;
    let path = entry.path();
    if path.is_dir() {
      collect_directory_imports(ctx, &path, out)?;
      continue;
    }
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if !name.ends_with(".sunder") || name.ends_with(".test.sunder") {
      continue;
    }
    if should_skip_plain_file(ctx, &path) {
      continue;
    }
    out.push(path);
  }
  Ok(())
}

/// Platform-suffixed selection (`spec.md` §6): a plain `foo.sunder` is
/// skipped when a more specific `foo.<arch>-<host>.sunder`,
/// `foo.<arch>.sunder`, or `foo.<host>.sunder` sibling exists; conversely a
/// platform-suffixed file itself is only loaded when its suffix matches the
/// current target.
fn should_skip_plain_file(ctx: &Context, path: &Path) -> bool {
  let Some(stem_and_suffix) = split_platform_suffix(path) else { return false };
  if let Some(suffix) = stem_and_suffix.1 {
    // This file itself carries a platform suffix: load only on exact match
    // against arch, host, or the combined arch-host suffix.
    let matches = ctx.config.suffix_matches(&suffix) || ctx.config.arch_host_suffix().as_deref() == Some(suffix.as_str());
    return !matches;
  }
  // Plain file: skip if any more-specific sibling exists.
  let dir = path.parent().unwrap_or_else(|| Path::new("."));
  let base = stem_and_suffix.0;
  let mut candidates = Vec::new();
  if let Some(suffix) = ctx.config.arch_host_suffix() { candidates.push(format!("{base}.{suffix}.sunder")); }
  if let Some(arch) = &ctx.config.arch { candidates.push(format!("{base}.{arch}.sunder")); }
  if let Some(host) = &ctx.config.host { candidates.push(format!("{base}.{host}.sunder")); }
  candidates.iter().any(|c| dir.join(c).exists())
}

/// Splits `foo.sunder` → `("foo", None)` or `foo.x86_64-linux.sunder` →
/// `("foo", Some("x86_64-linux"))`. Returns `None` for non-`.sunder` paths.
fn split_platform_suffix(path: &Path) -> Option<(String, Option<String>)> {
  let name = path.file_name()?.to_str()?;
  let name = name.strip_suffix(".sunder")?;
  match name.split_once('.') {
    Some((base, suffix)) => Some((base.to_string(), Some(suffix.to_string()))),
    None => Some((name.to_string(), None)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use std::fs;
  use tempfile::TempDir;

  fn ctx_with(config: Config) -> Context { Context::new(config) }

  #[test]
  fn resolves_direct_sibling_import() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.sunder"), "").unwrap();
    fs::write(dir.path().join("b.sunder"), "").unwrap();
    let ctx = ctx_with(Config::default());
    let loader = Loader::new();
    let mut diags = Diagnostics::new();
    let resolved = loader
      .resolve_import_path(&ctx, dir.path(), "b.sunder", Location::builtin(), &mut diags)
      .unwrap();
    assert_eq!(resolved.file_name().unwrap(), "b.sunder");
  }

  #[test]
  fn falls_back_to_search_path() {
    let importing = TempDir::new().unwrap();
    let libdir = TempDir::new().unwrap();
    fs::write(libdir.path().join("lib.sunder"), "").unwrap();
    let mut config = Config::default();
    config.search_path.push(libdir.path().to_path_buf());
    let ctx = ctx_with(config);
    let loader = Loader::new();
    let mut diags = Diagnostics::new();
    let resolved = loader
      .resolve_import_path(&ctx, importing.path(), "lib.sunder", Location::builtin(), &mut diags)
      .unwrap();
    assert_eq!(resolved.file_name().unwrap(), "lib.sunder");
  }

  #[test]
  fn unresolvable_import_is_fatal() {
    let importing = TempDir::new().unwrap();
    let ctx = ctx_with(Config::default());
    let loader = Loader::new();
    let mut diags = Diagnostics::new();
    let err = loader.resolve_import_path(&ctx, importing.path(), "missing.sunder", Location::builtin(), &mut diags);
    assert!(err.is_err());
  }

  #[test]
  fn directory_import_skips_test_and_non_sunder_files() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.sunder"), "").unwrap();
    fs::write(dir.path().join("a.test.sunder"), "").unwrap();
    fs::write(dir.path().join("notes.txt"), "").unwrap();
    let ctx = ctx_with(Config::default());
    let loader = Loader::new();
    let files = loader.expand_import_target(&ctx, dir.path()).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name().unwrap(), "a.sunder");
  }

  #[test]
  fn platform_suffixed_sibling_shadows_plain_file() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("io.sunder"), "").unwrap();
    fs::write(dir.path().join("io.linux.sunder"), "").unwrap();
    let mut config = Config::default();
    config.host = Some("linux".to_string());
    let ctx = ctx_with(config);
    let loader = Loader::new();
    let files = loader.expand_import_target(&ctx, &dir.path().join("io.sunder")).unwrap();
    assert!(files.is_empty(), "plain file should be shadowed by io.linux.sunder");
    let files = loader.expand_import_target(&ctx, &dir.path().join("io.linux.sunder")).unwrap();
    assert_eq!(files.len(), 1);
  }

  #[test]
  fn circular_import_is_detected() {
    let mut loader = Loader::new();
    let mut diags = Diagnostics::new();
    let p = PathBuf::from("/tmp/a.sunder");
    loader.begin_load(&p, Location::builtin(), &mut diags).unwrap();
    let err = loader.begin_load(&p, Location::builtin(), &mut diags);
    assert!(err.is_err());
  }
}
