//! Runtime backend selection.
//!
//! [`RemoteGateway`] returns `impl Future`, so it is not object-safe.
//! The CLI picks a backend from configuration at startup; dispatching
//! through an enum keeps the contexts generic over one concrete type.

use super::rest::RestGateway;
use super::{Filter, RemoteGateway, RemoteResult, Row, Subscription};
use crate::storage::SqliteGateway;

/// Either supported backend.
#[derive(Debug)]
pub enum AnyGateway {
    Sqlite(SqliteGateway),
    Rest(RestGateway),
}

impl AnyGateway {
    /// Short backend name for logs and status output.
    #[must_use]
    pub const fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Rest(_) => "rest",
        }
    }
}

impl From<SqliteGateway> for AnyGateway {
    fn from(gateway: SqliteGateway) -> Self {
        Self::Sqlite(gateway)
    }
}

impl From<RestGateway> for AnyGateway {
    fn from(gateway: RestGateway) -> Self {
        Self::Rest(gateway)
    }
}

impl RemoteGateway for AnyGateway {
    async fn select(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Row>> {
        match self {
            Self::Sqlite(g) => g.select(table, filter).await,
            Self::Rest(g) => g.select(table, filter).await,
        }
    }

    async fn insert(&self, table: &str, payload: &Row) -> RemoteResult<Vec<Row>> {
        match self {
            Self::Sqlite(g) => g.insert(table, payload).await,
            Self::Rest(g) => g.insert(table, payload).await,
        }
    }

    async fn update(&self, table: &str, payload: &Row, filter: &Filter) -> RemoteResult<Vec<Row>> {
        match self {
            Self::Sqlite(g) => g.update(table, payload, filter).await,
            Self::Rest(g) => g.update(table, payload, filter).await,
        }
    }

    async fn upsert(
        &self,
        table: &str,
        payload: &Row,
        conflict_keys: &[&str],
    ) -> RemoteResult<Vec<Row>> {
        match self {
            Self::Sqlite(g) => g.upsert(table, payload, conflict_keys).await,
            Self::Rest(g) => g.upsert(table, payload, conflict_keys).await,
        }
    }

    async fn delete(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Row>> {
        match self {
            Self::Sqlite(g) => g.delete(table, filter).await,
            Self::Rest(g) => g.delete(table, filter).await,
        }
    }

    fn subscribe(&self, table: &str, filter: Filter) -> RemoteResult<Subscription> {
        match self {
            Self::Sqlite(g) => g.subscribe(table, filter),
            Self::Rest(g) => g.subscribe(table, filter),
        }
    }
}
