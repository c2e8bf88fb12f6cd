//! Whole-program compile pipeline: load, parse, order, resolve
//! (`spec.md` §6's "IR output" contract; driven by `src/bin/sunderc.rs`).
//!
//! This is the one entry point a caller needs to go from a root `.sunder`
//! path to a fully resolved `Context`. It performs no code generation: per
//! `spec.md` §1's scope note, a backend is explicitly out of scope, so
//! [`compile`] stops at producing the resolved IR and reports, via its
//! returned `backend_pending` flag, that a backend would be invoked next
//! rather than inventing one.

use std::path::Path;

use crate::config::Config;
use crate::context::Context;
use crate::cst::{Decl, DeclId};
use crate::diag::{Location, Result};
use crate::module::{LoadState, Loader, Module};
use crate::order;
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::types::TypeKind;

/// Compilation request: the root source file and whether code generation
/// was requested (`-c` disables the "requires `main`" check of `spec.md`
/// §6, since compile-only output has no entry point requirement).
pub struct CompileRequest<'p> {
  pub root: &'p Path,
  pub compile_only: bool,
}

/// Loads `request.root` and every module it transitively imports, orders
/// their combined declarations, and resolves them into typed IR.
///
/// Always returns the `Context` it built (so the caller can print
/// accumulated diagnostics regardless of outcome); the `Result<bool>`
/// carries either `Ok(backend_pending)` — whether a backend would run next
/// — or the `Fatal` diagnostic that ended compilation early.
pub fn compile(config: Config, request: &CompileRequest<'_>) -> (Context, Result<bool>) {
  let mut ctx = Context::new(config);
  let result = run(&mut ctx, request);
  (ctx, result)
}

fn run(ctx: &mut Context, request: &CompileRequest<'_>) -> Result<bool> {
  let mut loader = Loader::new();
  let mut all_decls = Vec::new();

  let root = request.root.canonicalize().unwrap_or_else(|_| request.root.to_path_buf());
  load_module_tree(ctx, &mut loader, &root, Location::builtin(), &mut all_decls)?;

  let mut diags = std::mem::take(&mut ctx.diagnostics);
  let ordered = order::order_declarations(ctx, &all_decls, &mut diags);
  ctx.diagnostics = diags;
  let ordered = ordered?;

  let mut diags = std::mem::take(&mut ctx.diagnostics);
  let resolved = Resolver::new(ctx, &mut diags).resolve_module(&ordered);
  ctx.diagnostics = diags;
  resolved?;

  if request.compile_only { Ok(false) } else { check_main(ctx) }
}

/// Recursively loads `path` and every module it imports (depth-first, per
/// `spec.md` §5's deterministic load order), pushing each module's
/// top-level `DeclId`s onto `out` in load-completion order.
fn load_module_tree(
  ctx: &mut Context,
  loader: &mut Loader,
  path: &Path,
  location: Location,
  out: &mut Vec<DeclId>,
) -> Result<()> {
  if ctx.is_module_cached(path) {
    return Ok(());
  }

  let mut diags = std::mem::take(&mut ctx.diagnostics);
  let begun = loader.begin_load(path, location, &mut diags);
  ctx.diagnostics = diags;
  begun?;

  let source = match std::fs::read_to_string(path) {
    Ok(s) => s,
    Err(e) => {
      let mut diags = std::mem::take(&mut ctx.diagnostics);
      let r = diags.fatal(Some(location), format!("cannot read `{}`: {e}", path.display()));
      ctx.diagnostics = diags;
      return r;
    }
  };

  let module_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
  let module_name = ctx.interner.intern(&path.to_string_lossy());

  let mut diags = std::mem::take(&mut ctx.diagnostics);
  let decls = Parser::parse_module(ctx, module_name, &source, module_dir.clone(), &mut diags);
  ctx.diagnostics = diags;
  let decls = decls?;

  // Walk this module's own declarations for `import` statements before
  // recursing, so a module's imports are fully loaded (and their decls
  // appended) ahead of the module's own decls, matching the original's
  // depth-first "imported modules compile before their importer" order.
  for &id in &decls {
    let Decl::Import { path: import_bytes, location: import_loc } = ctx.cst.get(id) else { continue };
    let import_str = String::from_utf8_lossy(import_bytes).into_owned();
    let import_loc = *import_loc;

    let mut diags = std::mem::take(&mut ctx.diagnostics);
    let resolved = loader.resolve_import_path(ctx, &module_dir, &import_str, import_loc, &mut diags);
    ctx.diagnostics = diags;
    let resolved = resolved?;

    let targets = match loader.expand_import_target(ctx, &resolved) {
      Ok(t) => t,
      Err(e) => {
        let mut diags = std::mem::take(&mut ctx.diagnostics);
        let r = diags.fatal(Some(import_loc), format!("cannot expand import `{import_str}`: {e}"));
        ctx.diagnostics = diags;
        return r;
      }
    };

    for target in targets {
      load_module_tree(ctx, loader, &target, import_loc, out)?;
    }
  }

  out.extend(decls.iter().copied());

  let local_table = ctx.symbols.new_table(Some(ctx.symbols.global_table()));
  let export_table = ctx.symbols.new_table(Some(ctx.symbols.global_table()));
  let module = Module {
    name: module_name,
    canonical_path: path.to_path_buf(),
    source,
    decls,
    // The orderer runs once over the whole program's combined declarations
    // (see `run`), not per module, so there is no per-module order to
    // record here.
    ordered_decls: Vec::new(),
    local_table,
    export_table,
    state: LoadState::Loaded,
  };
  ctx.insert_module(path.to_path_buf(), module);
  loader.finish_load(path);
  Ok(())
}

/// Enforces `spec.md` §6's "the `main` function is required by the
/// non-`-c` path to be a static symbol named `main` with type
/// `func() void`". Returns `true` (a backend would run next) on success.
fn check_main(ctx: &mut Context) -> Result<bool> {
  let main_name = ctx.interner.intern("main");
  let global = ctx.symbols.global_table();
  let Some(id) = ctx.symbols.lookup(global, main_name) else {
    return ctx.diagnostics.fatal(None, "`main` function not found");
  };
  let crate::symbol::SymbolKind::Function(fid) = ctx.symbols.symbol(id).kind.clone() else {
    return ctx.diagnostics.fatal(None, "`main` is not a function");
  };
  let ty = ctx.symbols.function(fid).ty;
  let want_void = ctx.builtins.void;
  match ctx.types.get(ty).kind.clone() {
    TypeKind::Function { params, ret } if params.is_empty() && ret == want_void => Ok(true),
    _ => ctx.diagnostics.fatal(None, "`main` must have type `func() void`"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use std::path::PathBuf;
  use tempfile::TempDir;

  fn write_src(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
  }

  #[test]
  fn empty_module_compiles_clean_when_compile_only() {
    let dir = TempDir::new().unwrap();
    let root = write_src(&dir, "empty.sunder", "");
    let request = CompileRequest { root: &root, compile_only: true };
    let (_ctx, result) = compile(Config::default(), &request);
    assert_eq!(result.unwrap(), false);
  }

  #[test]
  fn missing_main_is_fatal_when_linking() {
    let dir = TempDir::new().unwrap();
    let root = write_src(&dir, "empty.sunder", "");
    let request = CompileRequest { root: &root, compile_only: false };
    let (_ctx, result) = compile(Config::default(), &request);
    assert!(result.is_err());
  }

  #[test]
  fn unreadable_root_is_fatal() {
    let request = CompileRequest { root: Path::new("/nonexistent/does-not-exist.sunder"), compile_only: true };
    let (_ctx, result) = compile(Config::default(), &request);
    assert!(result.is_err());
  }
}
