//! Realtime merge bridge.
//!
//! One task per table consumes the gateway's push stream and merges
//! each change into the [`EntityStore`] by primary id: inserts and
//! updates overwrite, deletes remove. Events apply in arrival order, so
//! the last one wins. An echo of an optimistic write the store already
//! holds leaves it unchanged. A lagged subscription reloads the kind
//! from the remote.
//!
//! Tasks live as long as the returned [`BridgeHandle`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::gateway::{ChangeEvent, ChangeOp, Filter, RemoteGateway, SubscriptionItem};
use crate::model::{
    Achievement, Badge, BadgeAttachment, ContentItem, Course, Module, Notification,
    ProgressRecord, Project, ProjectAssessment, Stage, Student, StudentAchievement, StudentBadge,
    Submission, Task,
};
use crate::store::{EntityKind, EntityStore};
use crate::sync::rows::{RemoteRecord, map_rows_lenient};
use crate::sync::scope::Scope;
use crate::sync::types::{MergeOutcome, MergeStats};

type SharedStats = Arc<Mutex<HashMap<EntityKind, MergeStats>>>;

/// Merge one pushed change into the store.
pub fn apply_change<T: RemoteRecord>(store: &EntityStore, event: &ChangeEvent) -> MergeOutcome {
    match event.op {
        ChangeOp::Insert | ChangeOp::Update => match T::from_row(&event.row) {
            Ok(entity) => match store.get::<T>(entity.id()) {
                Some(current) if current == entity => MergeOutcome::Unchanged,
                Some(_) => {
                    store.upsert_by_id(entity);
                    MergeOutcome::Updated
                }
                None => {
                    store.upsert_by_id(entity);
                    MergeOutcome::Inserted
                }
            },
            Err(e) => {
                warn!(table = %event.table, error = %e, "Ignoring unmappable change");
                MergeOutcome::Skipped
            }
        },
        ChangeOp::Delete => {
            let Some(id) = event.row.get("id").and_then(|v| v.as_str()) else {
                warn!(table = %event.table, "Ignoring delete without id");
                return MergeOutcome::Skipped;
            };
            if store.remove_one::<T>(id).is_some() {
                MergeOutcome::Removed
            } else {
                MergeOutcome::Unchanged
            }
        }
    }
}

/// Owns the merge tasks of one session.
///
/// Dropping the handle aborts every task.
#[derive(Debug, Default)]
pub struct BridgeHandle {
    tasks: Vec<(EntityKind, JoinHandle<()>)>,
    stats: SharedStats,
}

impl BridgeHandle {
    /// Kinds with a live merge task.
    #[must_use]
    pub fn kinds(&self) -> Vec<EntityKind> {
        self.tasks
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(kind, _)| *kind)
            .collect()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|(_, task)| !task.is_finished())
    }

    /// Merge statistics for `kind` so far.
    #[must_use]
    pub fn stats(&self, kind: EntityKind) -> MergeStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Abort every task. Safe to call more than once.
    pub fn shutdown(&mut self) {
        for (kind, task) in self.tasks.drain(..) {
            task.abort();
            debug!(kind = %kind, "Realtime subscription closed");
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Wires gateway subscriptions to the store.
#[derive(Debug)]
pub struct RealtimeBridge<G> {
    store: Arc<EntityStore>,
    gateway: Arc<G>,
    scope: Scope,
}

impl<G: RemoteGateway + 'static> RealtimeBridge<G> {
    #[must_use]
    pub fn new(store: Arc<EntityStore>, gateway: Arc<G>, scope: Scope) -> Self {
        Self {
            store,
            gateway,
            scope,
        }
    }

    /// Start merging changes to `T` into the store.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the subscription cannot be opened.
    pub fn attach<T: RemoteRecord>(&self, handle: &mut BridgeHandle) -> Result<()> {
        let filter = self.scope.filter(T::KIND);
        let subscription = self.gateway.subscribe(T::table(), filter.clone())?;
        let task = tokio::spawn(merge_loop::<T, G>(
            subscription,
            Arc::clone(&self.store),
            Arc::clone(&self.gateway),
            filter,
            Arc::clone(&handle.stats),
        ));
        handle.tasks.push((T::KIND, task));
        debug!(kind = %T::KIND, "Realtime subscription opened");
        Ok(())
    }

    /// Start merging every entity kind.
    ///
    /// # Errors
    ///
    /// Returns the first subscription error; already-started tasks are
    /// aborted when the partial handle drops.
    pub fn attach_all(&self) -> Result<BridgeHandle> {
        let mut handle = BridgeHandle::default();
        self.attach::<Course>(&mut handle)?;
        self.attach::<Stage>(&mut handle)?;
        self.attach::<Module>(&mut handle)?;
        self.attach::<ContentItem>(&mut handle)?;
        self.attach::<Project>(&mut handle)?;
        self.attach::<Task>(&mut handle)?;
        self.attach::<Achievement>(&mut handle)?;
        self.attach::<Badge>(&mut handle)?;
        self.attach::<BadgeAttachment>(&mut handle)?;
        self.attach::<Student>(&mut handle)?;
        self.attach::<Submission>(&mut handle)?;
        self.attach::<ProjectAssessment>(&mut handle)?;
        self.attach::<ProgressRecord>(&mut handle)?;
        self.attach::<StudentAchievement>(&mut handle)?;
        self.attach::<StudentBadge>(&mut handle)?;
        self.attach::<Notification>(&mut handle)?;
        Ok(handle)
    }
}

async fn merge_loop<T: RemoteRecord, G: RemoteGateway>(
    mut subscription: crate::gateway::Subscription,
    store: Arc<EntityStore>,
    gateway: Arc<G>,
    filter: Filter,
    stats: SharedStats,
) {
    while let Some(item) = subscription.next().await {
        match item {
            SubscriptionItem::Change(event) => {
                let outcome = apply_change::<T>(&store, &event);
                debug!(
                    kind = %T::KIND,
                    op = event.op.as_str(),
                    outcome = ?outcome,
                    "Merged realtime change"
                );
                record(&stats, T::KIND, |s| s.record(outcome));
            }
            SubscriptionItem::Lagged(missed) => {
                warn!(kind = %T::KIND, missed, "Realtime subscription lagged; reloading");
                match gateway.select(T::table(), &filter).await {
                    Ok(rows) => {
                        store.replace_all(map_rows_lenient::<T>(&rows));
                        record(&stats, T::KIND, |s| s.reloads += 1);
                    }
                    Err(e) => warn!(kind = %T::KIND, error = %e, "Reload after lag failed"),
                }
            }
        }
    }
    debug!(kind = %T::KIND, "Realtime stream ended");
}

fn record(stats: &SharedStats, kind: EntityKind, f: impl FnOnce(&mut MergeStats)) {
    let mut guard = stats.lock().unwrap_or_else(PoisonError::into_inner);
    f(guard.entry(kind).or_default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Row;
    use crate::model::{NotificationKind, Cohort, Department};
    use crate::storage::SqliteGateway;
    use serde_json::json;
    use std::time::Duration;

    fn event(op: ChangeOp, row: serde_json::Value) -> ChangeEvent {
        ChangeEvent {
            table: "notifications".into(),
            op,
            row: row.as_object().cloned().unwrap(),
        }
    }

    fn notification_row(id: &str, title: &str) -> serde_json::Value {
        json!({
            "id": id, "user_id": "u1", "title": title, "message": "m",
            "kind": "info", "is_read": 0, "created_at": 1,
        })
    }

    #[test]
    fn test_apply_change_is_idempotent() {
        let store = EntityStore::new();
        let insert = event(ChangeOp::Insert, notification_row("n1", "Hi"));

        assert_eq!(apply_change::<Notification>(&store, &insert), MergeOutcome::Inserted);
        assert_eq!(apply_change::<Notification>(&store, &insert), MergeOutcome::Unchanged);
        assert_eq!(store.snapshot::<Notification>().len(), 1);

        let update = event(ChangeOp::Update, notification_row("n1", "Hello"));
        assert_eq!(apply_change::<Notification>(&store, &update), MergeOutcome::Updated);
        assert_eq!(store.get::<Notification>("n1").unwrap().title, "Hello");

        let delete = event(ChangeOp::Delete, notification_row("n1", "Hello"));
        assert_eq!(apply_change::<Notification>(&store, &delete), MergeOutcome::Removed);
        assert_eq!(apply_change::<Notification>(&store, &delete), MergeOutcome::Unchanged);
    }

    #[test]
    fn test_unmappable_change_is_skipped() {
        let store = EntityStore::new();
        let bad = event(ChangeOp::Insert, json!({"title": "no id"}));
        assert_eq!(apply_change::<Notification>(&store, &bad), MergeOutcome::Skipped);
        assert!(store.snapshot::<Notification>().is_empty());
    }

    #[tokio::test]
    async fn test_bridge_merges_remote_writes_in_scope() {
        let gateway = Arc::new(SqliteGateway::open_memory().unwrap());
        let store = Arc::new(EntityStore::new());
        let scope = Scope::all().with(EntityKind::Notification, Filter::new().eq("user_id", "u1"));
        let bridge = RealtimeBridge::new(Arc::clone(&store), Arc::clone(&gateway), scope);

        let mut handle = BridgeHandle::default();
        bridge.attach::<Notification>(&mut handle).unwrap();
        let mut revisions = store.subscribe();

        let other = Notification::new("u2", "Not yours", "m", NotificationKind::Info);
        gateway.insert("notifications", &other.to_row()).await.unwrap();
        let mine = Notification::new("u1", "Yours", "m", NotificationKind::Grade);
        gateway.insert("notifications", &mine.to_row()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), revisions.changed())
            .await
            .unwrap()
            .unwrap();
        let local = store.snapshot::<Notification>();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, mine.id);
        assert_eq!(handle.stats(EntityKind::Notification).inserted, 1);
    }

    #[tokio::test]
    async fn test_row_leaving_scope_is_removed() {
        let gateway = Arc::new(SqliteGateway::open_memory().unwrap());
        let store = Arc::new(EntityStore::new());
        let mut student = Student::invite("Ada", Cohort::Foundation, Department::Creative);
        student.id = "s1".into();
        gateway.insert("students", &student.to_row()).await.unwrap();
        store.replace_all(vec![student]);

        let scope = Scope::all().with(
            EntityKind::Student,
            Filter::new().eq("department", Department::Creative.as_str()),
        );
        let bridge = RealtimeBridge::new(Arc::clone(&store), Arc::clone(&gateway), scope);
        let mut handle = BridgeHandle::default();
        bridge.attach::<Student>(&mut handle).unwrap();
        let mut revisions = store.subscribe();

        let mut patch = Row::new();
        patch.insert("department".into(), json!(Department::Engineering.as_str()));
        gateway
            .update("students", &patch, &Filter::new().eq("id", "s1"))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), revisions.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(store.snapshot::<Student>().is_empty());
        assert_eq!(handle.stats(EntityKind::Student).removed, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_merging() {
        let gateway = Arc::new(SqliteGateway::open_memory().unwrap());
        let store = Arc::new(EntityStore::new());
        let bridge = RealtimeBridge::new(Arc::clone(&store), Arc::clone(&gateway), Scope::all());

        let mut handle = bridge.attach_all().unwrap();
        assert_eq!(handle.kinds().len(), EntityKind::ALL.len());
        handle.shutdown();
        tokio::task::yield_now().await;
        assert!(!handle.is_running());

        let student = Student::invite("Ada", Cohort::Foundation, Department::Engineering);
        let mut row: Row = student.insert_payload();
        row.insert("id".into(), json!("s1"));
        gateway.insert("students", &row).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.snapshot::<Student>().is_empty());
        assert_eq!(gateway.feed().subscriber_count(), 0);
    }
}
