//! SQLite storage layer for progress-sync.
//!
//! The SQLite database plays the authoritative remote store: it
//! implements [`crate::gateway::RemoteGateway`] with:
//! - WAL mode for concurrent reads
//! - Generic row-level SQL with `RETURNING *`
//! - Error classification into the gateway taxonomy
//! - A broadcast change feed for push subscriptions
//!
//! # Submodules
//!
//! - [`events`] - Change feed
//! - [`migrations`] - Column additions after the base schema
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Gateway implementation

pub mod events;
pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use events::ChangeFeed;
pub use sqlite::SqliteGateway;
