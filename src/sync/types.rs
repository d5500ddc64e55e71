//! Statistics and outcomes reported by the sync layer.

use serde::Serialize;

/// Per-table statistics for realtime merges.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Rows that were new to the store.
    pub inserted: usize,
    /// Rows that replaced a different local copy.
    pub updated: usize,
    /// Rows removed on delete events.
    pub removed: usize,
    /// Echoes of state the store already held.
    pub unchanged: usize,
    /// Rows that could not be mapped to an entity.
    pub skipped: usize,
    /// Full reloads after the subscription lagged.
    pub reloads: usize,
}

impl MergeStats {
    /// Total events processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.removed + self.unchanged + self.skipped
    }
}

/// How a realtime event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Removed,
    Unchanged,
    Skipped,
}

impl MergeStats {
    pub(crate) fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Updated => self.updated += 1,
            MergeOutcome::Removed => self.removed += 1,
            MergeOutcome::Unchanged => self.unchanged += 1,
            MergeOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Result of a successful schema-adaptive write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    /// Rows as the remote store now holds them.
    pub rows: Vec<crate::gateway::Row>,
    /// Columns removed from the payload to get the write accepted.
    pub dropped_columns: Vec<String>,
    /// Attempts made, including the successful one.
    pub attempts: usize,
}

impl WriteOutcome {
    /// Whether the store accepted the full payload.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.dropped_columns.is_empty()
    }

    /// First returned row, if any.
    #[must_use]
    pub fn first_row(&self) -> Option<&crate::gateway::Row> {
        self.rows.first()
    }
}
