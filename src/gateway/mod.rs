//! Remote gateway contract.
//!
//! The gateway is a thin seam over the authoritative relational store:
//! row-level select/insert/update/upsert/delete plus a push channel of
//! row changes per table. Every call returns a tagged [`RemoteResult`];
//! the [`RemoteErrorKind`] classification is what the schema-adaptive
//! writer matches on.
//!
//! # Backends
//!
//! - [`crate::storage::SqliteGateway`] - SQLite database (CLI, tests)
//! - [`rest::RestGateway`] - PostgREST-compatible HTTP API
//! - [`AnyGateway`] - runtime selection between the two

mod any;
mod filter;
pub mod rest;

pub use any::AnyGateway;
pub use filter::{Filter, values_match};

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// One remote row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Result of a gateway call.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Machine-checkable classification of a remote failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The remote schema has no column with this name.
    UnknownColumn(String),
    /// A server-side policy rejected the operation.
    PermissionDenied,
    /// Unique or conflict-key violation.
    Conflict,
    /// The store could not be reached or was busy.
    Unavailable,
    /// Anything else.
    Unknown,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownColumn(name) => write!(f, "unknown column '{name}'"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::Conflict => write!(f, "conflict"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A classified failure reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// Column the store blamed, when it said (conflicts, unknown columns).
    pub column: Option<String>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        let column = match &kind {
            RemoteErrorKind::UnknownColumn(name) => Some(name.clone()),
            _ => None,
        };
        Self {
            kind,
            message: message.into(),
            column,
        }
    }

    #[must_use]
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn unknown_column(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            RemoteErrorKind::UnknownColumn(name.clone()),
            format!("column '{name}' does not exist"),
        )
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::PermissionDenied, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Conflict, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unavailable, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unknown, message)
    }
}

/// Kind of row change carried on the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A pushed row change. For deletes, `row` is the row as it was.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOp,
    pub row: Row,
}

/// What a subscription yields.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionItem {
    Change(ChangeEvent),
    /// The consumer fell behind and `n` events were lost; it must reload.
    Lagged(u64),
}

/// A push stream of changes for one table, filtered by a predicate.
///
/// Dropping the subscription stops delivery and aborts any backing
/// poll task.
pub struct Subscription {
    table: String,
    filter: Filter,
    rx: broadcast::Receiver<ChangeEvent>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    #[must_use]
    pub fn new(table: &str, filter: Filter, rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self {
            table: table.to_string(),
            filter,
            rx,
            task: None,
        }
    }

    /// Tie a producer task to this subscription's lifetime.
    #[must_use]
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Wait for the next matching change.
    ///
    /// An update whose new row no longer matches the filter has left the
    /// subscriber's scope and is delivered as a delete of that row.
    ///
    /// Returns `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        loop {
            match self.rx.recv().await {
                Ok(mut event) => {
                    if event.table != self.table {
                        continue;
                    }
                    if self.filter.matches(&event.row) {
                        return Some(SubscriptionItem::Change(event));
                    }
                    if event.op == ChangeOp::Update {
                        event.op = ChangeOp::Delete;
                        return Some(SubscriptionItem::Change(event));
                    }
                }
                Err(RecvError::Lagged(n)) => return Some(SubscriptionItem::Lagged(n)),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("table", &self.table)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// Capacity of every push channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Contract to the authoritative relational store.
///
/// Writes return the affected rows as the store now holds them, so
/// callers can pick up authoritative ids and defaults.
pub trait RemoteGateway: Send + Sync {
    /// Rows of `table` matching `filter`.
    fn select(
        &self,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = RemoteResult<Vec<Row>>> + Send;

    /// Insert one row.
    fn insert(
        &self,
        table: &str,
        payload: &Row,
    ) -> impl Future<Output = RemoteResult<Vec<Row>>> + Send;

    /// Update every row matching `filter` with the columns in `payload`.
    fn update(
        &self,
        table: &str,
        payload: &Row,
        filter: &Filter,
    ) -> impl Future<Output = RemoteResult<Vec<Row>>> + Send;

    /// Insert, or update the row that collides on `conflict_keys`.
    fn upsert(
        &self,
        table: &str,
        payload: &Row,
        conflict_keys: &[&str],
    ) -> impl Future<Output = RemoteResult<Vec<Row>>> + Send;

    /// Delete every row matching `filter`.
    fn delete(
        &self,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = RemoteResult<Vec<Row>>> + Send;

    /// Open a push stream of changes to `table` whose rows match `filter`.
    fn subscribe(&self, table: &str, filter: Filter) -> RemoteResult<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_subscription_filters_table_and_predicate() {
        let (tx, rx) = broadcast::channel(8);
        let mut sub = Subscription::new("notifications", Filter::new().eq("user_id", "u1"), rx);

        tx.send(ChangeEvent {
            table: "students".into(),
            op: ChangeOp::Insert,
            row: row(json!({"id": "s1", "user_id": "u1"})),
        })
        .unwrap();
        tx.send(ChangeEvent {
            table: "notifications".into(),
            op: ChangeOp::Insert,
            row: row(json!({"id": "n1", "user_id": "u2"})),
        })
        .unwrap();
        tx.send(ChangeEvent {
            table: "notifications".into(),
            op: ChangeOp::Insert,
            row: row(json!({"id": "n2", "user_id": "u1"})),
        })
        .unwrap();
        drop(tx);

        match sub.next().await {
            Some(SubscriptionItem::Change(ev)) => assert_eq!(ev.row["id"], "n2"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_update_out_of_scope_arrives_as_delete() {
        let (tx, rx) = broadcast::channel(8);
        let mut sub = Subscription::new("students", Filter::new().eq("department", "creative"), rx);

        tx.send(ChangeEvent {
            table: "students".into(),
            op: ChangeOp::Update,
            row: row(json!({"id": "s1", "department": "engineering"})),
        })
        .unwrap();
        tx.send(ChangeEvent {
            table: "students".into(),
            op: ChangeOp::Insert,
            row: row(json!({"id": "s2", "department": "engineering"})),
        })
        .unwrap();
        drop(tx);

        match sub.next().await {
            Some(SubscriptionItem::Change(ev)) => {
                assert_eq!(ev.op, ChangeOp::Delete);
                assert_eq!(ev.row["id"], "s1");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_subscription_reports_lag() {
        let (tx, rx) = broadcast::channel(2);
        let mut sub = Subscription::new("students", Filter::all(), rx);
        for i in 0..5 {
            tx.send(ChangeEvent {
                table: "students".into(),
                op: ChangeOp::Update,
                row: row(json!({ "id": format!("s{i}") })),
            })
            .unwrap();
        }
        assert_eq!(sub.next().await, Some(SubscriptionItem::Lagged(3)));
    }

    #[test]
    fn test_unknown_column_carries_name() {
        let err = RemoteError::unknown_column("predicted_grade");
        assert_eq!(err.column.as_deref(), Some("predicted_grade"));
        assert_eq!(
            err.kind,
            RemoteErrorKind::UnknownColumn("predicted_grade".to_string())
        );
    }
}
