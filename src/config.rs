//! Environment-derived configuration (`spec.md` §6 "Environment").
//!
//! The specification defines no configuration file, only environment
//! variables consumed at startup; this module is a plain struct rather than
//! a config-file parser for that reason.

use std::path::PathBuf;

/// Target selectors used for platform-suffixed module file selection
/// (`spec.md` §6, "Platform-suffixed selection").
#[derive(Clone, Debug, Default)]
pub struct Config {
  pub home: Option<PathBuf>,
  pub arch: Option<String>,
  pub host: Option<String>,
  pub backend: Option<String>,
  pub search_path: Vec<PathBuf>,
  pub sysasm_path: Option<PathBuf>,
  pub cc: Option<String>,
  pub cflags: Vec<String>,
}

impl Config {
  /// Reads `SUNDER_HOME`, `SUNDER_ARCH`, `SUNDER_HOST`, `SUNDER_BACKEND`,
  /// `SUNDER_SEARCH_PATH` (colon-separated), `SUNDER_SYSASM_PATH`,
  /// `SUNDER_CC`, and `SUNDER_CFLAGS` (whitespace-separated) from the
  /// process environment. Unset variables leave the corresponding field at
  /// its default (`None`/empty).
  #[must_use] pub fn from_env() -> Self {
    Self {
      home: std::env::var_os("SUNDER_HOME").map(PathBuf::from),
      arch: std::env::var("SUNDER_ARCH").ok(),
      host: std::env::var("SUNDER_HOST").ok(),
      backend: std::env::var("SUNDER_BACKEND").ok(),
      search_path: std::env::var("SUNDER_SEARCH_PATH")
        .ok()
        .map(|s| std::env::split_paths(&s).collect())
        .unwrap_or_default(),
      sysasm_path: std::env::var_os("SUNDER_SYSASM_PATH").map(PathBuf::from),
      cc: std::env::var("SUNDER_CC").ok(),
      cflags: std::env::var("SUNDER_CFLAGS")
        .ok()
        .map(|s| s.split_whitespace().map(String::from).collect())
        .unwrap_or_default(),
    }
  }

  /// The `lib/sys/` directory implied by `SUNDER_HOME`, if set.
  #[must_use] pub fn sys_lib_dir(&self) -> Option<PathBuf> {
    self.home.as_ref().map(|h| h.join("lib").join("sys"))
  }

  /// `true` when a plain `foo.sunder` should be skipped in favor of a file
  /// with a platform suffix that matches the current `arch`/`host`, per
  /// `spec.md` §6.
  #[must_use] pub fn suffix_matches(&self, arch_or_host: &str) -> bool {
    self.arch.as_deref() == Some(arch_or_host) || self.host.as_deref() == Some(arch_or_host)
  }

  #[must_use] pub fn arch_host_suffix(&self) -> Option<String> {
    match (&self.arch, &self.host) {
      (Some(a), Some(h)) => Some(format!("{a}-{h}")),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_has_no_search_path() {
    let c = Config::default();
    assert!(c.search_path.is_empty());
    assert!(c.home.is_none());
  }

  #[test]
  fn arch_host_suffix_requires_both() {
    let mut c = Config::default();
    assert!(c.arch_host_suffix().is_none());
    c.arch = Some("x86_64".into());
    assert!(c.arch_host_suffix().is_none());
    c.host = Some("linux".into());
    assert_eq!(c.arch_host_suffix().as_deref(), Some("x86_64-linux"));
  }

  #[test]
  fn sys_lib_dir_joins_home() {
    let mut c = Config::default();
    c.home = Some(PathBuf::from("/opt/sunder"));
    assert_eq!(c.sys_lib_dir(), Some(PathBuf::from("/opt/sunder/lib/sys")));
  }
}
