//! Create the local database and optionally load a content catalog.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Globals, print_json, runtime};
use crate::config::{load_config, resolve_db_path_with};
use crate::error::{Error, Result};
use crate::gateway::RemoteGateway;
use crate::model::{Achievement, Badge, ContentItem, Course, Module, Project, Stage, Task};
use crate::storage::SqliteGateway;
use crate::sync::RemoteRecord;

/// Authored content loaded by `psync init --seed`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub courses: Vec<Course>,
    pub stages: Vec<Stage>,
    pub modules: Vec<Module>,
    pub content_items: Vec<ContentItem>,
    pub projects: Vec<Project>,
    pub tasks: Vec<Task>,
    pub achievements: Vec<Achievement>,
    pub badges: Vec<Badge>,
}

impl Catalog {
    /// # Errors
    ///
    /// Returns an I/O or JSON error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Insert everything, parents before children.
    ///
    /// # Errors
    ///
    /// Returns the first failed insert.
    pub async fn install(&self, gateway: &SqliteGateway) -> Result<usize> {
        let mut count = 0;
        count += insert_all(gateway, &self.courses).await?;
        count += insert_all(gateway, &self.stages).await?;
        count += insert_all(gateway, &self.modules).await?;
        count += insert_all(gateway, &self.content_items).await?;
        count += insert_all(gateway, &self.projects).await?;
        count += insert_all(gateway, &self.tasks).await?;
        count += insert_all(gateway, &self.achievements).await?;
        count += insert_all(gateway, &self.badges).await?;
        Ok(count)
    }
}

async fn insert_all<T: RemoteRecord>(gateway: &SqliteGateway, items: &[T]) -> Result<usize> {
    for item in items {
        gateway.insert(T::table(), &item.to_row()).await?;
    }
    Ok(items.len())
}

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    seeded: usize,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns `Error::AlreadyInitialized` when the database exists and
/// `force` is not set.
pub fn execute(globals: &Globals<'_>, force: bool, seed: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let path = resolve_db_path_with(globals.db, &config)
        .ok_or_else(|| Error::Config("Could not determine a database path".to_string()))?;

    if path.exists() {
        if !force {
            return Err(Error::AlreadyInitialized { path });
        }
        fs::remove_file(&path)?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let catalog = seed.map(Catalog::load).transpose()?;
    let gateway = SqliteGateway::open(&path)?;
    let seeded = match catalog {
        Some(catalog) => runtime()?.block_on(catalog.install(&gateway))?,
        None => 0,
    };
    info!(path = %path.display(), seeded, "Database initialized");

    if globals.json {
        print_json(&InitOutput {
            database: path,
            seeded,
        })
    } else {
        println!("Initialized database at {}", path.display());
        if seeded > 0 {
            println!("  Loaded {seeded} catalog entries");
        }
        Ok(())
    }
}
