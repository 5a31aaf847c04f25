//! Configuration management
//!
//! Paths to the knowledge-base sources and the schema bootstrap script
//! default to locations next to the installer. They can be overridden by an
//! optional YAML file and, on top of that, by command-line options.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Installer settings. Every field is optional; unset fields fall back to
/// the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory with the knowledge-base notes
    pub kb_dir: Option<PathBuf>,

    /// SQL script that creates the schema
    pub bootstrap_script: Option<PathBuf>,

    /// Users granted admin privileges
    pub privileged_users: Option<Vec<String>>,
}

impl Config {
    /// Load a config file. Relative paths inside it are resolved against
    /// the directory containing the file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.relative_to(base))
    }

    /// Parse settings from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_saphyr::from_str(text).map_err(|e| anyhow::anyhow!("{e}"))
    }

    fn relative_to(self, base: &Path) -> Self {
        let resolve = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        Self {
            kb_dir: self.kb_dir.map(resolve),
            bootstrap_script: self.bootstrap_script.map(resolve),
            privileged_users: self.privileged_users,
        }
    }

    /// Layer `overrides` on top of `self`. Set fields in `overrides` win.
    pub fn merge(self, overrides: Config) -> Self {
        Self {
            kb_dir: overrides.kb_dir.or(self.kb_dir),
            bootstrap_script: overrides.bootstrap_script.or(self.bootstrap_script),
            privileged_users: overrides.privileged_users.or(self.privileged_users),
        }
    }

    /// Knowledge-base source directory to import
    pub fn kb_dir(&self) -> PathBuf {
        self.kb_dir.clone().unwrap_or_else(default_kb_dir)
    }

    /// Schema bootstrap script to run
    pub fn bootstrap_script(&self) -> PathBuf {
        self.bootstrap_script
            .clone()
            .unwrap_or_else(default_bootstrap_script)
    }

    /// Users to grant admin privileges to, in order
    pub fn privileged_users(&self) -> &[String] {
        self.privileged_users.as_deref().unwrap_or_default()
    }
}

/// Root of the installer's own distribution: the nearest ancestor of the
/// running executable that carries `sql/bootstrap.sql`, or the source
/// checkout the binary was built from.
fn install_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| find_install_root(&exe))
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
}

/// Walks up from `start` looking for a directory with `sql/bootstrap.sql`.
fn find_install_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .skip(1)
        .find(|dir| dir.join("sql").join("bootstrap.sql").is_file())
        .map(Path::to_path_buf)
}

/// The `kb/` directory shipped next to the installer
pub fn default_kb_dir() -> PathBuf {
    install_root().join("kb")
}

/// The `sql/bootstrap.sql` script shipped next to the installer
pub fn default_bootstrap_script() -> PathBuf {
    install_root().join("sql").join("bootstrap.sql")
}
