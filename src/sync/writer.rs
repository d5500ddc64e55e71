//! Schema-adaptive writes.
//!
//! The remote schema can lag the client: a column the client writes may
//! not have been migrated yet. When the store rejects a write with
//! [`RemoteErrorKind::UnknownColumn`] naming a column present in the
//! payload, the column is dropped and the write retried immediately.
//! Every drop is logged at `warn`. Dropped columns are tracked only for
//! the duration of one call; the next call starts from its full payload.

use tracing::warn;

use crate::error::{Error, Result};
use crate::gateway::{Filter, RemoteGateway, RemoteErrorKind, Row};
use crate::sync::types::WriteOutcome;

/// Attempts per write before giving up on schema drift.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// The kind of write to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert,
    /// Update rows matching the filter.
    Update(Filter),
    /// Upsert on the given conflict keys.
    Upsert(Vec<String>),
}

impl WriteOp {
    #[must_use]
    pub fn upsert(conflict_keys: &[&str]) -> Self {
        Self::Upsert(conflict_keys.iter().map(ToString::to_string).collect())
    }

    const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update(_) => "update",
            Self::Upsert(_) => "upsert",
        }
    }
}

/// Retries writes that fail on columns the remote schema lacks.
#[derive(Debug, Clone, Copy)]
pub struct SchemaAdaptiveWriter {
    max_attempts: usize,
}

impl Default for SchemaAdaptiveWriter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl SchemaAdaptiveWriter {
    /// A writer making at most `max_attempts` attempts (minimum 1).
    #[must_use]
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Write `payload` to `table`, dropping unknown columns as needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] for any failure other than a droppable
    /// unknown column, and [`Error::SchemaDriftExhausted`] when the
    /// attempt bound is reached.
    pub async fn write<G: RemoteGateway>(
        &self,
        gateway: &G,
        table: &str,
        op: &WriteOp,
        payload: &Row,
    ) -> Result<WriteOutcome> {
        let mut payload = payload.clone();
        let mut dropped: Vec<String> = Vec::new();

        for attempt in 1..=self.max_attempts {
            let result = match op {
                WriteOp::Insert => gateway.insert(table, &payload).await,
                WriteOp::Update(filter) => gateway.update(table, &payload, filter).await,
                WriteOp::Upsert(keys) => {
                    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                    gateway.upsert(table, &payload, &keys).await
                }
            };

            let err = match result {
                Ok(rows) => {
                    return Ok(WriteOutcome {
                        rows,
                        dropped_columns: dropped,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            match &err.kind {
                RemoteErrorKind::UnknownColumn(column) if payload.contains_key(column) => {
                    warn!(
                        table,
                        op = op.as_str(),
                        column = %column,
                        attempt,
                        "Remote schema lacks column; dropping it from the write"
                    );
                    payload.remove(column);
                    dropped.push(column.clone());
                }
                _ => return Err(Error::Remote(err)),
            }
        }

        warn!(
            table,
            op = op.as_str(),
            attempts = self.max_attempts,
            dropped = %dropped.join(","),
            "Giving up on write after repeated schema drift"
        );
        Err(Error::SchemaDriftExhausted {
            table: table.to_string(),
            attempts: self.max_attempts,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RemoteError;
    use crate::sync::testing::FaultyGateway;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_drops_unknown_column_and_succeeds() {
        let gateway = FaultyGateway::memory();
        gateway.reject_column("c");
        let writer = SchemaAdaptiveWriter::default();

        let outcome = writer
            .write(
                &gateway,
                "scratch",
                &WriteOp::Insert,
                &payload(json!({"a": 1, "b": 2, "c": 3})),
            )
            .await
            .unwrap();

        assert_eq!(outcome.dropped_columns, vec!["c".to_string()]);
        assert_eq!(outcome.attempts, 2);
        let persisted = gateway.last_payload("scratch").unwrap();
        assert_eq!(persisted, payload(json!({"a": 1, "b": 2})));
    }

    #[tokio::test]
    async fn test_every_call_starts_from_full_payload() {
        let gateway = FaultyGateway::memory();
        gateway.reject_column("c");
        let writer = SchemaAdaptiveWriter::default();
        let full = payload(json!({"a": 1, "c": 3}));

        writer.write(&gateway, "scratch", &WriteOp::Insert, &full).await.unwrap();
        writer.write(&gateway, "scratch", &WriteOp::Insert, &full).await.unwrap();

        // Each call tried `c` again before dropping it.
        assert_eq!(gateway.attempted_columns("scratch", "c"), 2);
    }

    #[tokio::test]
    async fn test_unknown_column_not_in_payload_propagates() {
        let gateway = FaultyGateway::memory();
        gateway.fail_next(RemoteError::unknown_column("zzz"));
        let writer = SchemaAdaptiveWriter::default();

        let err = writer
            .write(&gateway, "scratch", &WriteOp::Insert, &payload(json!({"a": 1})))
            .await
            .unwrap_err();
        assert!(matches!(
            err.remote_kind(),
            Some(RemoteErrorKind::UnknownColumn(c)) if c == "zzz"
        ));
        assert_eq!(gateway.write_count(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let gateway = FaultyGateway::memory();
        gateway.fail_next(RemoteError::unavailable("down"));
        let writer = SchemaAdaptiveWriter::default();

        let err = writer
            .write(&gateway, "scratch", &WriteOp::Insert, &payload(json!({"a": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.remote_kind(), Some(&RemoteErrorKind::Unavailable));
        assert_eq!(gateway.write_count(), 1);
    }

    #[tokio::test]
    async fn test_bound_is_five_attempts() {
        let gateway = FaultyGateway::memory();
        for column in ["c1", "c2", "c3", "c4", "c5", "c6"] {
            gateway.reject_column(column);
        }
        let writer = SchemaAdaptiveWriter::default();

        let err = writer
            .write(
                &gateway,
                "scratch",
                &WriteOp::Insert,
                &payload(json!({"a": 1, "c1": 1, "c2": 1, "c3": 1, "c4": 1, "c5": 1, "c6": 1})),
            )
            .await
            .unwrap_err();

        match err {
            Error::SchemaDriftExhausted {
                attempts, dropped, ..
            } => {
                assert_eq!(attempts, 5);
                assert_eq!(dropped.len(), 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(gateway.write_count(), 5);
    }
}
