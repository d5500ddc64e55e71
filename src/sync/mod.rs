//! Optimistic write-through synchronization.
//!
//! - **Writer**: schema-adaptive writes that drop columns the remote lacks
//! - **Mutation**: optimistic create/update/upsert/delete with rollback
//! - **Bridge**: merges pushed remote changes into the entity store
//! - **Rows**: the mapping between remote rows and entities
//! - **Hashing**: SHA256 content hashing for change detection
//!
//! # Flow
//!
//! 1. A mutation applies to the store immediately
//! 2. The writer persists it through the gateway
//! 3. On success the store takes the authoritative row; on failure the
//!    change is rolled back, or the kind reloaded
//! 4. Independently, the bridge merges pushed changes by primary id
//!
//! # Example
//!
//! ```ignore
//! use psync::sync::Mutator;
//!
//! let mutator = Mutator::new(store, gateway, alerts);
//! let student = mutator.create(Student::invite("Ada", cohort, dept)).await?;
//! mutator.update::<Student, _>(&student.id, |s| s.xp += 10).await?;
//! ```

mod bridge;
mod hash;
mod mutation;
mod rows;
mod scope;
#[cfg(test)]
pub(crate) mod testing;
mod types;
mod writer;

pub use bridge::{BridgeHandle, RealtimeBridge, apply_change};
pub use hash::{content_hash, has_changed, row_hash};
pub use mutation::Mutator;
pub use rows::{RemoteRecord, changed_columns, map_rows, map_rows_lenient};
pub use scope::Scope;
pub use types::{MergeOutcome, MergeStats, WriteOutcome};
pub use writer::{DEFAULT_MAX_ATTEMPTS, SchemaAdaptiveWriter, WriteOp};
