//! Configuration for the Marionette host.
//!
//! Loaded from `~/.marionette/config.toml`:
//!
//! ```toml
//! [watchdog]
//! resolution_ms = 50
//!
//! [budgets]
//! init_ms = 5000
//! tick_ms = 50
//! render_ms = 20
//! callback_ms = 10
//!
//! [runtime]
//! creation_threads = 2
//!
//! [memory]
//! max_bytes_per_avatar = 16777216
//!
//! [avatars]
//! dir = "${HOME}/avatars"
//! ```
//!
//! Every section and every key is optional.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct MarionetteConfig {
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub budgets: BudgetsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub avatars: AvatarsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// How often the watchdog looks for expired tasks.
    pub resolution_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { resolution_ms: 50 }
    }
}

impl WatchdogConfig {
    #[must_use]
    pub fn resolution(&self) -> Duration {
        Duration::from_millis(self.resolution_ms.max(1))
    }
}

/// Wall-clock budgets, one per kind of script work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BudgetsConfig {
    pub init_ms: u64,
    pub tick_ms: u64,
    pub render_ms: u64,
    pub callback_ms: u64,
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        Self {
            init_ms: 5000,
            tick_ms: 50,
            render_ms: 20,
            callback_ms: 10,
        }
    }
}

impl BudgetsConfig {
    #[must_use]
    pub fn init(&self) -> Duration {
        Duration::from_millis(self.init_ms)
    }

    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    #[must_use]
    pub fn render(&self) -> Duration {
        Duration::from_millis(self.render_ms)
    }

    #[must_use]
    pub fn callback(&self) -> Duration {
        Duration::from_millis(self.callback_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Blocking threads available to avatar creation.
    pub creation_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            creation_threads: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_bytes_per_avatar: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_avatar: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AvatarsConfig {
    /// Directory scanned for `*.rhai` files. `${VAR}` references are expanded.
    pub dir: Option<String>,
}

impl AvatarsConfig {
    #[must_use]
    pub fn dir(&self) -> Option<PathBuf> {
        self.dir
            .as_deref()
            .map(expand_env_vars)
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
    }
}

/// Replace `${VAR}` with the value of `VAR`, or nothing if it is unset.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + len];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 3 + len..];
    }

    out.push_str(rest);
    out
}

impl MarionetteConfig {
    /// Load the default config file.
    ///
    /// `Ok(None)` when there is no home directory or no file. Read and parse
    /// failures are logged and returned; callers usually fall back to
    /// `MarionetteConfig::default()`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = Self::path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        match Self::load_from(&path) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!(path = %err.path().display(), error = %err, "Ignoring config");
                Err(err)
            }
        }
    }

    /// The default file, or defaults if it is missing or broken.
    #[must_use]
    pub fn load_or_default() -> Self {
        Self::load().ok().flatten().unwrap_or_default()
    }

    /// Load `path` strictly: a missing file is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".marionette").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> MarionetteConfig {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("");
        assert_eq!(config.watchdog.resolution(), Duration::from_millis(50));
        assert_eq!(config.budgets, BudgetsConfig::default());
        assert_eq!(config.runtime.creation_threads, 2);
        assert_eq!(config.memory.max_bytes_per_avatar, 16 * 1024 * 1024);
        assert_eq!(config.avatars.dir(), None);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = parse(
            r"
            [budgets]
            tick_ms = 5
            ",
        );
        assert_eq!(config.budgets.tick(), Duration::from_millis(5));
        assert_eq!(config.budgets.init(), Duration::from_millis(5000));
        assert_eq!(config.budgets.render(), Duration::from_millis(20));
        assert_eq!(config.budgets.callback(), Duration::from_millis(10));
    }

    #[test]
    fn full_file() {
        let config = parse(
            r#"
            [watchdog]
            resolution_ms = 10

            [runtime]
            creation_threads = 4

            [memory]
            max_bytes_per_avatar = 1024

            [avatars]
            dir = "/srv/avatars"
            "#,
        );
        assert_eq!(config.watchdog.resolution(), Duration::from_millis(10));
        assert_eq!(config.runtime.creation_threads, 4);
        assert_eq!(config.memory.max_bytes_per_avatar, 1024);
        assert_eq!(config.avatars.dir(), Some(PathBuf::from("/srv/avatars")));
    }

    #[test]
    fn zero_resolution_is_clamped() {
        let config = parse("[watchdog]\nresolution_ms = 0\n");
        assert_eq!(config.watchdog.resolution(), Duration::from_millis(1));
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[runtime]\ncreation_threads = 8\n").unwrap();

        let config = MarionetteConfig::load_from(&path).unwrap();
        assert_eq!(config.runtime.creation_threads, 8);
    }

    #[test]
    fn load_from_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let err = MarionetteConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert_eq!(err.path(), path);
    }

    #[test]
    fn load_from_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[budgets]\ntick_ms = \"fast\"\n").unwrap();

        let err = MarionetteConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn expand_env_vars_without_vars() {
        assert_eq!(expand_env_vars("plain/path"), "plain/path");
        assert_eq!(expand_env_vars("${unterminated"), "${unterminated");
        assert_eq!(expand_env_vars("${}x"), "x");
    }

    #[test]
    fn expand_env_vars_substitutes() {
        // SAFETY: only this test touches this variable.
        unsafe {
            env::set_var("MARIONETTE_TEST_AVATAR_ROOT", "/tmp/avatars");
        }
        assert_eq!(
            expand_env_vars("${MARIONETTE_TEST_AVATAR_ROOT}/mine"),
            "/tmp/avatars/mine"
        );
        unsafe {
            env::remove_var("MARIONETTE_TEST_AVATAR_ROOT");
        }
        assert_eq!(expand_env_vars("${MARIONETTE_TEST_AVATAR_ROOT}/mine"), "/mine");
    }
}
