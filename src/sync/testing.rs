//! Gateway wrapper that injects failures, for unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::gateway::{Filter, RemoteError, RemoteGateway, RemoteResult, Row, Subscription};
use crate::storage::SqliteGateway;

pub(crate) struct FaultyGateway {
    inner: SqliteGateway,
    faults: Mutex<VecDeque<RemoteError>>,
    rejected: Mutex<HashSet<String>>,
    attempts: Mutex<Vec<(String, Row)>>,
    hooks: Mutex<VecDeque<Hook>>,
}

type Hook = Box<dyn FnOnce() + Send>;

impl FaultyGateway {
    /// In-memory store with an extra `scratch(id, a, b, c)` table.
    pub(crate) fn memory() -> Self {
        let inner = SqliteGateway::open_memory().unwrap();
        inner
            .execute_batch(
                "CREATE TABLE scratch (
                    id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(8)))),
                    a INTEGER, b INTEGER, c INTEGER
                );",
            )
            .unwrap();
        Self::wrap(inner)
    }

    pub(crate) fn wrap(inner: SqliteGateway) -> Self {
        Self {
            inner,
            faults: Mutex::new(VecDeque::new()),
            rejected: Mutex::new(HashSet::new()),
            attempts: Mutex::new(Vec::new()),
            hooks: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn inner(&self) -> &SqliteGateway {
        &self.inner
    }

    /// Pretend the remote schema has no column `name`.
    pub(crate) fn reject_column(&self, name: &str) {
        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    /// Fail the next write with `err`.
    pub(crate) fn fail_next(&self, err: RemoteError) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(err);
    }

    /// Run `hook` when the next write arrives, before it is processed.
    pub(crate) fn before_next_write(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Box::new(hook));
    }

    pub(crate) fn write_count(&self) -> usize {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn last_payload(&self, table: &str) -> Option<Row> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|(t, _)| t == table)
            .map(|(_, row)| row.clone())
    }

    pub(crate) fn attempted_columns(&self, table: &str, column: &str) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(t, row)| t == table && row.contains_key(column))
            .count()
    }

    fn check(&self, table: &str, payload: &Row) -> RemoteResult<()> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((table.to_string(), payload.clone()));
        let hook = self.hooks.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        if let Some(hook) = hook {
            hook();
        }
        if let Some(err) = self.faults.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            return Err(err);
        }
        let rejected = self.rejected.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(column) = payload.keys().find(|c| rejected.contains(*c)) {
            return Err(RemoteError::unknown_column(column.clone()));
        }
        Ok(())
    }
}

impl RemoteGateway for FaultyGateway {
    async fn select(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Row>> {
        self.inner.select(table, filter).await
    }

    async fn insert(&self, table: &str, payload: &Row) -> RemoteResult<Vec<Row>> {
        self.check(table, payload)?;
        self.inner.insert(table, payload).await
    }

    async fn update(&self, table: &str, payload: &Row, filter: &Filter) -> RemoteResult<Vec<Row>> {
        self.check(table, payload)?;
        self.inner.update(table, payload, filter).await
    }

    async fn upsert(
        &self,
        table: &str,
        payload: &Row,
        conflict_keys: &[&str],
    ) -> RemoteResult<Vec<Row>> {
        self.check(table, payload)?;
        self.inner.upsert(table, payload, conflict_keys).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Row>> {
        self.check(table, &Row::new())?;
        self.inner.delete(table, filter).await
    }

    fn subscribe(&self, table: &str, filter: Filter) -> RemoteResult<Subscription> {
        self.inner.subscribe(table, filter)
    }
}
