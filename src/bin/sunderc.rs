//! Thin CLI wire-up for the Sunder compiler core (`spec.md` §6 "CLI").
//!
//! Argument parsing, environment probing, and invocation of an external
//! backend are explicitly out of scope for the core (`spec.md` §1); this
//! binary only adapts `clap`'s parsed flags into a [`sunderc::config::Config`]
//! and a [`sunderc::driver::CompileRequest`], then reports whatever
//! diagnostics the core accumulated.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;

use sunderc::config::Config;
use sunderc::driver::{self, CompileRequest};

/// The Sunder compiler.
#[derive(ClapParser, Debug)]
#[command(name = "sunderc", version, about = "The Sunder compiler")]
struct Cli {
  /// Source path to compile.
  source: Option<PathBuf>,

  /// Pass-through object/archive/C files forwarded to the linker.
  #[arg(value_name = "FILE")]
  extra: Vec<PathBuf>,

  /// Compile only; do not invoke a backend or linker.
  #[arg(short = 'c')]
  compile_only: bool,

  /// Print the resolved environment and exit.
  #[arg(short = 'e')]
  print_env: bool,

  /// Request debug info from the backend.
  #[arg(short = 'g')]
  debug_info: bool,

  /// Keep intermediate files produced by the backend.
  #[arg(short = 'k')]
  keep_intermediates: bool,

  /// Add a linker search path.
  #[arg(short = 'L', value_name = "DIR")]
  link_path: Vec<PathBuf>,

  /// Pass an option through to the linker.
  #[arg(short = 'l', value_name = "OPT")]
  link_opt: Vec<String>,

  /// Output path.
  #[arg(short = 'o', value_name = "OUT", default_value = "a.out")]
  output: PathBuf,
}

fn main() -> ExitCode {
  env_logger::init();
  let cli = Cli::parse();
  let config = Config::from_env();

  if cli.print_env {
    print_env(&config);
    return ExitCode::SUCCESS;
  }

  let Some(source) = &cli.source else {
    eprintln!("sunderc: no source file given");
    return ExitCode::FAILURE;
  };

  let request = CompileRequest { root: source, compile_only: cli.compile_only };
  let (ctx, result) = driver::compile(config, &request);
  ctx.diagnostics.print_to_stderr(&ctx.interner);

  match result {
    Ok(backend_pending) => {
      if backend_pending {
        log::info!(
          "resolved IR ready for backend emission to `{}` (no backend wired into this core)",
          cli.output.display()
        );
      }
      ExitCode::SUCCESS
    }
    Err(_fatal) => ExitCode::FAILURE,
  }
}

fn print_env(config: &Config) {
  println!("SUNDER_HOME={}", config.home.as_deref().map_or(String::new(), |p| p.display().to_string()));
  println!("SUNDER_ARCH={}", config.arch.as_deref().unwrap_or(""));
  println!("SUNDER_HOST={}", config.host.as_deref().unwrap_or(""));
  println!("SUNDER_BACKEND={}", config.backend.as_deref().unwrap_or(""));
  println!(
    "SUNDER_SEARCH_PATH={}",
    config.search_path.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(":")
  );
}
