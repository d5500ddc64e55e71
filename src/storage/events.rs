//! Change feed for the SQLite gateway.
//!
//! Every committed write is fanned out to push subscribers as
//! [`ChangeEvent`]s, in commit order.

use tokio::sync::broadcast;
use tracing::trace;

use crate::gateway::{
    CHANGE_CHANNEL_CAPACITY, ChangeEvent, ChangeOp, Filter, Row, Subscription,
};

/// Broadcast hub shared by all subscriptions of one database.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish one event per affected row.
    pub fn publish(&self, table: &str, op: ChangeOp, rows: &[Row]) {
        for row in rows {
            trace!(table, op = op.as_str(), "Publishing change");
            // No receivers is not an error: nobody is listening yet.
            let _ = self.tx.send(ChangeEvent {
                table: table.to_string(),
                op,
                row: row.clone(),
            });
        }
    }

    /// Open a filtered subscription on `table`.
    #[must_use]
    pub fn subscribe(&self, table: &str, filter: Filter) -> Subscription {
        Subscription::new(table, filter, self.tx.subscribe())
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
