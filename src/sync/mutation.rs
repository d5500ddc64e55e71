//! Optimistic mutations.
//!
//! Every mutation applies to the [`EntityStore`] first, then writes
//! through the [`SchemaAdaptiveWriter`]. On success the store takes the
//! row the remote returned (authoritative ids, defaults). On failure the
//! store is put back:
//!
//! 1. If nothing else touched the collection since the optimistic apply,
//!    the pre-mutation snapshot is restored as-is.
//! 2. Otherwise, if the entity still holds our optimistic value, only that
//!    entity is reverted.
//! 3. Otherwise the whole kind is reloaded from the remote.
//!
//! Side effects (rewards, celebrations, notifications) belong to the
//! caller and run only after a call here returns `Ok`.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::alerts::Alerts;
use crate::error::{Error, Result};
use crate::gateway::{Filter, RemoteGateway, Row};
use crate::store::{EntityKind, EntityStore, Stored};
use crate::sync::rows::{RemoteRecord, changed_columns, map_rows_lenient};
use crate::sync::scope::Scope;
use crate::sync::types::WriteOutcome;
use crate::sync::writer::{SchemaAdaptiveWriter, WriteOp};

/// Runs optimistic mutations against a store and a gateway.
#[derive(Debug)]
pub struct Mutator<G> {
    store: Arc<EntityStore>,
    gateway: Arc<G>,
    writer: SchemaAdaptiveWriter,
    scope: Scope,
    alerts: Alerts,
}

impl<G: RemoteGateway> Mutator<G> {
    #[must_use]
    pub fn new(store: Arc<EntityStore>, gateway: Arc<G>, alerts: Alerts) -> Self {
        Self {
            store,
            gateway,
            writer: SchemaAdaptiveWriter::default(),
            scope: Scope::all(),
            alerts,
        }
    }

    #[must_use]
    pub fn with_writer(mut self, writer: SchemaAdaptiveWriter) -> Self {
        self.writer = writer;
        self
    }

    /// Filters used when a kind has to be reloaded.
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    #[must_use]
    pub fn alerts(&self) -> &Alerts {
        &self.alerts
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Insert a new entity.
    ///
    /// The entity shows up in the store immediately under its local id,
    /// which is swapped for the authoritative id once the remote confirms.
    ///
    /// # Errors
    ///
    /// Returns the write error after removing the optimistic entry.
    pub async fn create<T: RemoteRecord>(&self, item: T) -> Result<T> {
        let local_id = item.id().to_string();
        let (snapshot, _) = self.store.snapshot_with_revision::<T>();
        self.store.upsert_by_id(item.clone());
        let applied = self.store.revision_of::<T>();

        let payload = item.insert_payload();
        let outcome = self
            .writer
            .write(self.gateway.as_ref(), T::table(), &WriteOp::Insert, &payload)
            .await;

        match outcome {
            Ok(outcome) => {
                let entity = self.confirm::<T>(&outcome, &payload, item).await?;
                let id = entity.id().to_string();
                self.store
                    .upsert_one(entity.clone(), |e: &T| e.id() == local_id || e.id() == id);
                debug!(kind = %T::KIND, local_id = %local_id, id = %id, "Create confirmed");
                Ok(entity)
            }
            Err(err) => {
                self.roll_back(snapshot, applied, Some(&item), None).await;
                self.surface(&err, T::KIND, "create");
                Err(err)
            }
        }
    }

    /// Insert or replace the entity matching a business key.
    ///
    /// `matches` finds the local copy; `conflict_keys` are the matching
    /// remote columns. An existing remote row keeps its primary id.
    ///
    /// # Errors
    ///
    /// Returns the write error after restoring the previous local copy.
    pub async fn upsert_by<T, F>(&self, item: T, matches: F, conflict_keys: &[&str]) -> Result<T>
    where
        T: RemoteRecord,
        F: Fn(&T) -> bool + Send,
    {
        let (snapshot, _) = self.store.snapshot_with_revision::<T>();
        let before = snapshot.iter().find(|e| matches(e)).cloned();
        self.store.upsert_one(item.clone(), &matches);
        let applied = self.store.revision_of::<T>();

        let payload = item.to_row();
        let outcome = self
            .writer
            .write(
                self.gateway.as_ref(),
                T::table(),
                &WriteOp::upsert(conflict_keys),
                &payload,
            )
            .await;

        match outcome {
            Ok(outcome) => {
                let local_id = item.id().to_string();
                let entity = self.confirm::<T>(&outcome, &payload, item).await?;
                let id = entity.id().to_string();
                self.store.upsert_one(entity.clone(), |e: &T| {
                    matches(e) || e.id() == id || e.id() == local_id
                });
                debug!(kind = %T::KIND, id = %id, "Upsert confirmed");
                Ok(entity)
            }
            Err(err) => {
                self.roll_back(snapshot, applied, Some(&item), before.as_ref())
                    .await;
                self.surface(&err, T::KIND, "upsert");
                Err(err)
            }
        }
    }

    /// Patch the entity with `id` in place.
    ///
    /// Only the columns `apply` changed are sent. A patch that changes
    /// nothing is not sent at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the entity is not in the store or no
    /// longer exists remotely, or the write error after rolling back.
    pub async fn update<T, F>(&self, id: &str, apply: F) -> Result<T>
    where
        T: RemoteRecord,
        F: FnOnce(&mut T),
    {
        let (snapshot, _) = self.store.snapshot_with_revision::<T>();
        let before = snapshot
            .iter()
            .find(|e| e.id() == id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            })?;

        let mut after = before.clone();
        apply(&mut after);
        if after == before {
            return Ok(before);
        }

        let patch = changed_columns(&before.to_row(), &after.to_row());
        self.store.upsert_by_id(after.clone());
        let applied = self.store.revision_of::<T>();

        let op = WriteOp::Update(Filter::new().eq("id", id));
        let outcome = self
            .writer
            .write(self.gateway.as_ref(), T::table(), &op, &patch)
            .await;

        match outcome {
            Ok(outcome) if outcome.rows.is_empty() => {
                warn!(kind = %T::KIND, id = %id, "Update matched no remote row; reloading");
                self.reload_or_log::<T>().await;
                Err(Error::NotFound {
                    kind: T::KIND,
                    id: id.to_string(),
                })
            }
            Ok(outcome) => {
                let entity = self.confirm::<T>(&outcome, &patch, after).await?;
                self.store.upsert_by_id(entity.clone());
                debug!(kind = %T::KIND, id = %id, columns = patch.len(), "Update confirmed");
                Ok(entity)
            }
            Err(err) => {
                self.roll_back(snapshot, applied, Some(&after), Some(&before))
                    .await;
                self.surface(&err, T::KIND, "update");
                Err(err)
            }
        }
    }

    /// Remove the entity with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if it is not in the store, or the
    /// remote error after putting it back.
    pub async fn delete<T: RemoteRecord>(&self, id: &str) -> Result<T> {
        let (snapshot, _) = self.store.snapshot_with_revision::<T>();
        let before = snapshot
            .iter()
            .find(|e| e.id() == id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            })?;
        self.store.remove_one::<T>(id);
        let applied = self.store.revision_of::<T>();

        match self
            .gateway
            .delete(T::table(), &Filter::new().eq("id", id))
            .await
        {
            Ok(_) => {
                debug!(kind = %T::KIND, id = %id, "Delete confirmed");
                Ok(before)
            }
            Err(e) => {
                let err = Error::Remote(e);
                self.roll_back(snapshot, applied, None, Some(&before)).await;
                self.surface(&err, T::KIND, "delete");
                Err(err)
            }
        }
    }

    /// Replace the local collection for `T` with the remote rows in scope.
    ///
    /// # Errors
    ///
    /// Returns the remote error; the store is left untouched in that case.
    pub async fn reload<T: RemoteRecord>(&self) -> Result<usize> {
        let rows = self
            .gateway
            .select(T::table(), &self.scope.filter(T::KIND))
            .await?;
        let items = map_rows_lenient::<T>(&rows);
        let count = items.len();
        self.store.replace_all(items);
        info!(kind = %T::KIND, rows = count, "Reloaded from remote");
        Ok(count)
    }

    /// Remote rows of `T` matching `filter`, without touching the store.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn fetch<T: RemoteRecord>(&self, filter: &Filter) -> Result<Vec<T>> {
        let rows = self.gateway.select(T::table(), filter).await?;
        Ok(map_rows_lenient(&rows))
    }

    /// Build the confirmed entity from the first returned row.
    ///
    /// Columns the remote dropped keep their intended local values. When
    /// the remote returned nothing usable the kind is reloaded.
    async fn confirm<T: RemoteRecord>(
        &self,
        outcome: &WriteOutcome,
        intended: &Row,
        fallback: T,
    ) -> Result<T> {
        let Some(row) = outcome.first_row() else {
            warn!(kind = %T::KIND, "Write returned no row; reloading");
            self.reload_or_log::<T>().await;
            return Ok(fallback);
        };
        let mut row = row.clone();
        for column in &outcome.dropped_columns {
            if let Some(value) = intended.get(column) {
                row.insert(column.clone(), value.clone());
            }
        }
        match T::from_row(&row) {
            Ok(entity) => Ok(entity),
            Err(e) => {
                warn!(kind = %T::KIND, error = %e, "Confirmed row is unmappable; reloading");
                self.reload_or_log::<T>().await;
                Err(e)
            }
        }
    }

    /// Undo an optimistic apply.
    ///
    /// `optimistic` is what we put in the store (`None` for deletes) and
    /// `before` what it replaced (`None` for creates).
    async fn roll_back<T: RemoteRecord>(
        &self,
        snapshot: Arc<Vec<T>>,
        applied: u64,
        optimistic: Option<&T>,
        before: Option<&T>,
    ) {
        if self.store.revision_of::<T>() == applied {
            self.store.restore(snapshot);
            warn!(kind = %T::KIND, "Rolled back optimistic change");
            return;
        }
        if revert_entity(&self.store, optimistic, before) {
            warn!(kind = %T::KIND, "Reverted optimistic entity");
            return;
        }
        warn!(kind = %T::KIND, "No clean snapshot to restore; reloading");
        self.reload_or_log::<T>().await;
    }

    async fn reload_or_log<T: RemoteRecord>(&self) {
        if let Err(e) = self.reload::<T>().await {
            error!(kind = %T::KIND, error = %e, "Reload failed");
        }
    }

    fn surface(&self, err: &Error, kind: EntityKind, action: &str) {
        if err.is_blocking() {
            error!(kind = %kind, action, error = %err, "Write rejected by server policy");
        } else {
            warn!(kind = %kind, action, error = %err, "Write failed");
        }
        self.alerts.raise(err);
    }
}

/// Revert a single entity when the rest of the collection moved on.
///
/// Returns `false` when the entity no longer holds our optimistic value.
fn revert_entity<T: Stored>(store: &EntityStore, optimistic: Option<&T>, before: Option<&T>) -> bool {
    match (optimistic, before) {
        (Some(optimistic), before) => {
            let local_id = optimistic.id().to_string();
            match store.get::<T>(&local_id) {
                Some(current) if current == *optimistic => {
                    match before {
                        Some(before) => {
                            let before_id = before.id().to_string();
                            store.upsert_one(before.clone(), |e: &T| {
                                e.id() == local_id || e.id() == before_id
                            });
                        }
                        None => {
                            store.remove_one::<T>(&local_id);
                        }
                    }
                    true
                }
                None => before.is_none(),
                Some(_) => false,
            }
        }
        (None, Some(before)) => {
            if store.get::<T>(before.id()).is_none() {
                store.upsert_by_id(before.clone());
            }
            true
        }
        (None, None) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::Severity;
    use crate::gateway::RemoteError;
    use crate::model::{Cohort, Department, Student, StudentBadge, StudentStatus};
    use crate::storage::SqliteGateway;
    use crate::sync::testing::FaultyGateway;

    fn mutator(gateway: FaultyGateway) -> Mutator<FaultyGateway> {
        Mutator::new(Arc::new(EntityStore::new()), Arc::new(gateway), Alerts::new())
    }

    fn faulty() -> FaultyGateway {
        FaultyGateway::wrap(SqliteGateway::open_memory().unwrap())
    }

    async fn seeded() -> (Mutator<FaultyGateway>, Student) {
        let m = mutator(faulty());
        let student = m
            .create(Student::invite("Ada", Cohort::Foundation, Department::Engineering))
            .await
            .unwrap();
        (m, student)
    }

    #[tokio::test]
    async fn test_create_swaps_temp_id_for_authoritative_id() {
        let (m, student) = seeded().await;
        assert!(!student.has_temp_id());

        let local = m.store().snapshot::<Student>();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, student.id);
    }

    #[tokio::test]
    async fn test_create_failure_removes_optimistic_entry() {
        let m = mutator(faulty());
        m.gateway().fail_next(RemoteError::unavailable("offline"));

        let result = m
            .create(Student::invite("Ada", Cohort::Foundation, Department::Engineering))
            .await;

        assert!(result.is_err());
        assert!(m.store().snapshot::<Student>().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_update_restores_exact_snapshot() {
        let (m, student) = seeded().await;
        let before = m.store().snapshot::<Student>();

        m.gateway().fail_next(RemoteError::unknown("constraint"));
        let result = m
            .update::<Student, _>(&student.id, |s| {
                s.xp = 500;
                s.status = StudentStatus::Active;
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*m.store().snapshot::<Student>(), *before);
    }

    #[tokio::test]
    async fn test_rollback_keeps_concurrent_changes() {
        let (m, student) = seeded().await;
        let other = m
            .create(Student::invite("Grace", Cohort::Advanced, Department::Creative))
            .await
            .unwrap();

        // Another flow updates Grace while our write is in flight.
        let store = Arc::clone(m.store());
        let mut renamed = other.clone();
        renamed.display_name = "Grace H".to_string();
        let concurrent = renamed.clone();
        m.gateway().before_next_write(move || {
            store.upsert_by_id(concurrent);
        });
        m.gateway().fail_next(RemoteError::unknown("rejected"));

        let result = m.update::<Student, _>(&student.id, |s| s.xp = 99).await;
        assert!(result.is_err());

        assert_eq!(m.store().get::<Student>(&student.id), Some(student));
        assert_eq!(m.store().get::<Student>(&other.id), Some(renamed));
    }

    #[tokio::test]
    async fn test_permission_denied_raises_blocking_alert() {
        let (m, student) = seeded().await;
        m.gateway()
            .fail_next(RemoteError::permission_denied("row-level security"));

        let err = m
            .update::<Student, _>(&student.id, |s| s.balance = 10)
            .await
            .unwrap_err();

        assert!(err.is_blocking());
        let alert = m.alerts().head().unwrap();
        assert_eq!(alert.severity, Severity::Blocking);
    }

    #[tokio::test]
    async fn test_update_survives_schema_drift() {
        let gateway = FaultyGateway::wrap(SqliteGateway::open_memory_at_version(0).unwrap());
        let m = mutator(gateway);
        let student = m
            .create(Student::invite("Ada", Cohort::Foundation, Department::Engineering))
            .await
            .unwrap();

        let updated = m
            .update::<Student, _>(&student.id, |s| {
                s.predicted_grade = Some("Merit".to_string());
                s.xp = 10;
            })
            .await
            .unwrap();

        assert_eq!(updated.xp, 10);
        // Kept locally even though the remote dropped it.
        assert_eq!(updated.predicted_grade.as_deref(), Some("Merit"));
        let remote = m.fetch::<Student>(&Filter::new().eq("id", student.id.as_str())).await.unwrap();
        assert_eq!(remote[0].xp, 10);
        assert!(remote[0].predicted_grade.is_none());
    }

    #[tokio::test]
    async fn test_noop_update_is_not_sent() {
        let (m, student) = seeded().await;
        let writes = m.gateway().write_count();
        m.update::<Student, _>(&student.id, |_| {}).await.unwrap();
        assert_eq!(m.gateway().write_count(), writes);
    }

    #[tokio::test]
    async fn test_failed_delete_restores_entity() {
        let (m, student) = seeded().await;
        m.gateway().fail_next(RemoteError::unavailable("offline"));

        assert!(m.delete::<Student>(&student.id).await.is_err());
        assert_eq!(m.store().get::<Student>(&student.id), Some(student));
    }

    #[tokio::test]
    async fn test_upsert_by_business_key_keeps_one_row() {
        let m = mutator(faulty());
        let first = StudentBadge::awarded("s1", "b1");
        let second = StudentBadge::awarded("s1", "b1");
        let key = |b: &StudentBadge| b.student_id == "s1" && b.badge_id == "b1";

        let a = m
            .upsert_by(first, key, &["student_id", "badge_id"])
            .await
            .unwrap();
        let b = m
            .upsert_by(second, key, &["student_id", "badge_id"])
            .await
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(m.store().snapshot::<StudentBadge>().len(), 1);
        let remote = m.fetch::<StudentBadge>(&Filter::all()).await.unwrap();
        assert_eq!(remote.len(), 1);
    }

    #[tokio::test]
    async fn test_update_of_unknown_entity_is_not_found() {
        let m = mutator(faulty());
        let err = m.update::<Student, _>("nope", |s| s.xp = 1).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: EntityKind::Student, .. }));
    }
}
