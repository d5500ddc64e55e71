//! Configuration management.
//!
//! This module provides functions for locating the psync directory,
//! resolving the database path and the acting user, and loading the
//! JSON configuration file.
//!
//! # Layout
//!
//! - **Config**: `~/.psync/config.json`
//! - **Database**: `~/.psync/data/psync.db` (SQLite backend default)
//! - **Test database**: `~/.psync/test/psync.db` when `PSYNC_TEST_DB` is set

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::Department;
use crate::session::{Identity, Role};
use crate::sync::DEFAULT_MAX_ATTEMPTS;

/// Which authoritative store to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Local SQLite file; `None` falls back to [`resolve_db_path`].
    Sqlite {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    /// PostgREST-compatible HTTP endpoint.
    Rest {
        url: String,
        api_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Sqlite { path: None }
    }
}

/// Contents of `config.json`. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,

    /// Acting user; overridden by `--user` and `PSYNC_USER`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub role: Role,

    /// Scopes content visibility for teachers and admins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<Department>,

    /// Schema-adaptive write bound
    pub write_attempts: usize,

    pub celebration_dismiss_secs: u64,

    /// REST backend polling period
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            user_id: None,
            role: Role::Teacher,
            department: None,
            write_attempts: DEFAULT_MAX_ATTEMPTS,
            celebration_dismiss_secs: 5,
            poll_interval_ms: 2000,
        }
    }
}

impl Config {
    #[must_use]
    pub fn celebration_dismiss_after(&self) -> Duration {
        Duration::from_secs(self.celebration_dismiss_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Load from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file exists but cannot be parsed,
    /// or `Error::Io` if it cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        if config.write_attempts == 0 {
            return Err(Error::Config(format!(
                "{}: write_attempts must be at least 1",
                path.display()
            )));
        }
        Ok(config)
    }

    /// Write to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Get the global psync directory (`~/.psync/`).
#[must_use]
pub fn global_psync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".psync"))
}

/// Resolve the config file location.
///
/// `PSYNC_CONFIG` overrides the global `~/.psync/config.json`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = non_empty_env("PSYNC_CONFIG") {
        return Some(PathBuf::from(path));
    }
    global_psync_dir().map(|dir| dir.join("config.json"))
}

/// Load the resolved config file, or defaults when there is none.
///
/// # Errors
///
/// See [`Config::load`].
pub fn load_config() -> Result<Config> {
    match config_path() {
        Some(path) => Config::load(&path),
        None => Ok(Config::default()),
    }
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `PSYNC_TEST_DB=1` (or any non-empty
/// value other than `0`/`false`). It redirects the database to an
/// isolated test file.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("PSYNC_TEST_DB").is_ok_and(|v| is_truthy(&v))
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Get the test database path (`~/.psync/test/psync.db`).
#[must_use]
pub fn test_db_path() -> Option<PathBuf> {
    global_psync_dir().map(|dir| dir.join("test").join("psync.db"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `PSYNC_TEST_DB` environment variable → uses test database
/// 3. `PSYNC_DB` environment variable
/// 4. Global location: `~/.psync/data/psync.db`
///
/// A path set in the config's SQLite backend is applied by the caller
/// between steps 3 and 4.
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if is_test_mode() {
        return test_db_path();
    }

    if let Some(db_path) = non_empty_env("PSYNC_DB") {
        return Some(PathBuf::from(db_path));
    }

    global_psync_dir().map(|dir| dir.join("data").join("psync.db"))
}

/// Resolve the database path, consulting the config backend before the
/// global default.
#[must_use]
pub fn resolve_db_path_with(explicit_path: Option<&Path>, config: &Config) -> Option<PathBuf> {
    if explicit_path.is_none() && !is_test_mode() && non_empty_env("PSYNC_DB").is_none() {
        if let BackendConfig::Sqlite { path: Some(path) } = &config.backend {
            return Some(path.clone());
        }
    }
    resolve_db_path(explicit_path)
}

/// Resolve the acting user id.
///
/// Priority:
/// 1. Explicit `--user` flag
/// 2. `PSYNC_USER` environment variable
/// 3. `user_id` from the config file
/// 4. `None`
#[must_use]
pub fn resolve_user(explicit_user: Option<&str>, config: &Config) -> Option<String> {
    if let Some(user) = explicit_user.filter(|u| !u.trim().is_empty()) {
        return Some(user.to_string());
    }
    non_empty_env("PSYNC_USER").or_else(|| config.user_id.clone())
}

/// Build the session identity from flags, environment and config.
///
/// Without any user id the CLI acts as `local-admin`, so a fresh
/// database is usable before configuration.
#[must_use]
pub fn resolve_identity(explicit_user: Option<&str>, config: &Config) -> Identity {
    match resolve_user(explicit_user, config) {
        Some(user_id) => Identity {
            user_id,
            role: config.role,
            department: config.department,
        },
        None => Identity {
            user_id: "local-admin".to_string(),
            role: Role::Admin,
            department: config.department,
        },
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
