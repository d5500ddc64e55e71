//! Command implementations.
//!
//! Every command resolves its backend from flags, environment and the
//! config file, starts a [`SyncSession`] for the acting user, runs one
//! operation and ends the session.

pub mod completions;
pub mod init;
pub mod notification;
pub mod progress;
pub mod rewards;
pub mod student;
pub mod submission;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::{BackendConfig, Config, load_config, resolve_db_path_with, resolve_identity};
use crate::error::{Error, Result};
use crate::gateway::AnyGateway;
use crate::gateway::rest::RestGateway;
use crate::session::SyncSession;
use crate::storage::SqliteGateway;

/// Flags shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct Globals<'a> {
    pub db: Option<&'a Path>,
    pub user: Option<&'a str>,
    pub json: bool,
}

/// A fresh multi-threaded runtime for one command.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to start async runtime: {e}")))
}

/// Open the configured backend.
///
/// # Errors
///
/// Returns `Error::NotInitialized` when the SQLite file does not exist.
pub(crate) fn open_gateway(globals: &Globals<'_>, config: &Config) -> Result<AnyGateway> {
    match (&config.backend, globals.db) {
        (BackendConfig::Rest { url, api_key, access_token }, None) => {
            let mut gateway = RestGateway::new(url, api_key).with_poll_interval(config.poll_interval());
            if let Some(token) = access_token {
                gateway = gateway.with_access_token(token);
            }
            debug!(url = %url, "Using REST backend");
            Ok(gateway.into())
        }
        _ => {
            let path = resolve_db_path_with(globals.db, config).ok_or(Error::NotInitialized)?;
            if !path.exists() {
                return Err(Error::NotInitialized);
            }
            debug!(path = %path.display(), "Using SQLite backend");
            Ok(SqliteGateway::open(&path)?.into())
        }
    }
}

/// Start a session for the acting user.
pub(crate) async fn open_session(globals: &Globals<'_>) -> Result<SyncSession<AnyGateway>> {
    let config = load_config()?;
    let gateway = open_gateway(globals, &config)?;
    let identity = resolve_identity(globals.user, &config);
    SyncSession::start(Arc::new(gateway), identity, &config).await
}

/// Run `f` against a session, ending it afterwards.
pub(crate) fn with_session<T, F>(globals: &Globals<'_>, f: F) -> Result<T>
where
    F: AsyncFnOnce(&SyncSession<AnyGateway>) -> Result<T>,
{
    let rt = runtime()?;
    rt.block_on(async {
        let session = open_session(globals).await?;
        let result = f(&session).await;
        session.end();
        result
    })
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Truncate a one-line display value.
pub(crate) fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() > max {
        let cut: String = value.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer line", 10), "a much ...");
    }

    #[test]
    fn test_missing_database_is_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("absent.db");
        let globals = Globals {
            db: Some(&db),
            user: None,
            json: true,
        };
        let err = open_gateway(&globals, &Config::default()).unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }
}
