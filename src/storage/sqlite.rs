//! SQLite implementation of the remote gateway.
//!
//! Rows travel as JSON objects and are bound to generic SQL built per
//! call. Writes use `RETURNING *` so the caller sees authoritative ids
//! and defaults, and every committed write is published on the
//! [`ChangeFeed`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode as SqliteCode, params_from_iter};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::gateway::{
    ChangeOp, Filter, RemoteError, RemoteGateway, RemoteResult, Row, Subscription,
};
use crate::storage::events::ChangeFeed;
use crate::storage::schema::{apply_schema, apply_schema_through};

/// SQLite-backed authoritative store.
#[derive(Debug)]
pub struct SqliteGateway {
    conn: Mutex<Connection>,
    feed: ChangeFeed,
}

impl SqliteGateway {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Open a database with only the first `migrations` migrations applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_at_version(path: &Path, migrations: usize) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_schema_through(&conn, Some(migrations))?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// In-memory database lagging behind the latest migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory_at_version(migrations: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema_through(&conn, Some(migrations))?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            feed: ChangeFeed::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run raw SQL (seeding content, installing policies).
    ///
    /// Bypasses the change feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL fails.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock().execute_batch(sql)?;
        Ok(())
    }

    /// The push channel hub for this database.
    #[must_use]
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn select_rows(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Row>> {
        let table = ident(table)?;
        let (where_sql, params) = where_clause(filter)?;
        let mut sql = format!("SELECT * FROM {table}{where_sql}");
        if let Some((column, ascending)) = filter.order() {
            let column = ident(column)?;
            let direction = if ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(" ORDER BY {column} {direction}"));
        }
        let conn = self.lock();
        query_rows(&conn, &sql, params).map_err(classify)
    }

    fn write_rows(
        &self,
        table: &str,
        op: ChangeOp,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> RemoteResult<Vec<Row>> {
        let rows = {
            let conn = self.lock();
            query_rows(&conn, sql, params).map_err(classify)?
        };
        debug!(table, op = op.as_str(), rows = rows.len(), "Write committed");
        self.feed.publish(table, op, &rows);
        Ok(rows)
    }
}

/// Validate a table or column name before it is spliced into SQL.
fn ident(name: &str) -> RemoteResult<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(RemoteError::unknown_column(name))
    }
}

fn where_clause(filter: &Filter) -> RemoteResult<(String, Vec<SqlValue>)> {
    if filter.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut parts = Vec::new();
    let mut params = Vec::new();
    for (column, value) in filter.conditions() {
        let column = ident(column)?;
        if value.is_null() {
            parts.push(format!("{column} IS NULL"));
        } else {
            parts.push(format!("{column} = ?"));
            params.push(to_sql(value));
        }
    }
    Ok((format!(" WHERE {}", parts.join(" AND ")), params))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map_or_else(|| SqlValue::Real(n.as_f64().unwrap_or_default()), SqlValue::Integer),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            Value::String(String::from_utf8_lossy(t).into_owned())
        }
    }
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: Vec<SqlValue>,
) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
    let mut rows = stmt.query(params_from_iter(params))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Row::new();
        for (i, name) in names.iter().enumerate() {
            map.insert(name.clone(), from_sql(row.get_ref(i)?));
        }
        out.push(map);
    }
    Ok(out)
}

/// Column name after `marker`, stripped of any table qualifier.
fn column_after(message: &str, marker: &str) -> Option<String> {
    let rest = &message[message.find(marker)? + marker.len()..];
    let token = rest.split_whitespace().next()?;
    let column = token.rsplit('.').next().unwrap_or(token);
    Some(column.trim_matches(|c: char| c == '"' || c == '\'' || c == ',').to_string())
}

/// Classify a SQLite failure into the gateway taxonomy.
pub(crate) fn classify(err: rusqlite::Error) -> RemoteError {
    let message = err.to_string();

    if let Some(column) = column_after(&message, "has no column named ") {
        return RemoteError::unknown_column(column);
    }
    if let Some(column) = column_after(&message, "no such column: ") {
        return RemoteError::unknown_column(column);
    }
    if let Some(rest) = message.split("UNIQUE constraint failed: ").nth(1) {
        let columns: Vec<&str> = rest
            .split(',')
            .map(|c| c.trim().rsplit('.').next().unwrap_or(c).trim())
            .collect();
        return RemoteError::conflict(message.clone()).with_column(columns.join(", "));
    }
    if message.to_lowercase().contains("permission denied") {
        return RemoteError::permission_denied(message);
    }
    if let rusqlite::Error::SqliteFailure(e, _) = &err {
        if matches!(e.code, SqliteCode::DatabaseBusy | SqliteCode::DatabaseLocked) {
            return RemoteError::unavailable(message);
        }
    }
    RemoteError::unknown(message)
}

impl RemoteGateway for SqliteGateway {
    async fn select(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Row>> {
        self.select_rows(table, filter)
    }

    async fn insert(&self, table: &str, payload: &Row) -> RemoteResult<Vec<Row>> {
        let table = ident(table)?;
        if payload.is_empty() {
            let sql = format!("INSERT INTO {table} DEFAULT VALUES RETURNING *");
            return self.write_rows(table, ChangeOp::Insert, &sql, Vec::new());
        }
        let mut columns = Vec::with_capacity(payload.len());
        for column in payload.keys() {
            columns.push(ident(column)?);
        }
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) RETURNING *",
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );
        let params = payload.values().map(to_sql).collect();
        self.write_rows(table, ChangeOp::Insert, &sql, params)
    }

    async fn update(&self, table: &str, payload: &Row, filter: &Filter) -> RemoteResult<Vec<Row>> {
        let table = ident(table)?;
        if payload.is_empty() {
            return self.select_rows(table, filter);
        }
        let mut assignments = Vec::with_capacity(payload.len());
        for column in payload.keys() {
            assignments.push(format!("{} = ?", ident(column)?));
        }
        let (where_sql, where_params) = where_clause(filter)?;
        let sql = format!(
            "UPDATE {table} SET {}{where_sql} RETURNING *",
            assignments.join(", ")
        );
        let mut params: Vec<SqlValue> = payload.values().map(to_sql).collect();
        params.extend(where_params);
        self.write_rows(table, ChangeOp::Update, &sql, params)
    }

    async fn upsert(
        &self,
        table: &str,
        payload: &Row,
        conflict_keys: &[&str],
    ) -> RemoteResult<Vec<Row>> {
        let table = ident(table)?;
        if conflict_keys.is_empty() {
            return Err(RemoteError::unknown("upsert requires conflict keys"));
        }

        let mut existing = Filter::new();
        for key in conflict_keys {
            let value = payload
                .get(*key)
                .ok_or_else(|| RemoteError::unknown(format!("upsert payload lacks conflict key '{key}'")))?;
            existing = existing.eq(ident(key)?, value.clone());
        }
        let op = if self.select_rows(table, &existing)?.is_empty() {
            ChangeOp::Insert
        } else {
            ChangeOp::Update
        };

        let mut columns = Vec::with_capacity(payload.len());
        for column in payload.keys() {
            columns.push(ident(column)?);
        }
        // The existing row keeps its primary id.
        let mut updates: Vec<String> = columns
            .iter()
            .filter(|c| **c != "id" && !conflict_keys.contains(*c))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        if updates.is_empty() {
            updates.push(format!("{0} = excluded.{0}", conflict_keys[0]));
        }
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {} RETURNING *",
            columns.join(", "),
            vec!["?"; columns.len()].join(", "),
            conflict_keys.join(", "),
            updates.join(", ")
        );
        let params = payload.values().map(to_sql).collect();
        self.write_rows(table, op, &sql, params)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Row>> {
        let table = ident(table)?;
        let (where_sql, params) = where_clause(filter)?;
        let sql = format!("DELETE FROM {table}{where_sql} RETURNING *");
        self.write_rows(table, ChangeOp::Delete, &sql, params)
    }

    fn subscribe(&self, table: &str, filter: Filter) -> RemoteResult<Subscription> {
        ident(table)?;
        Ok(self.feed.subscribe(table, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{RemoteErrorKind, SubscriptionItem};
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_returns_authoritative_id() {
        let gw = SqliteGateway::open_memory().unwrap();
        let rows = gw
            .insert(
                "students",
                &row(json!({"display_name": "Ada", "cohort": "foundation", "department": "engineering"})),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"].as_str().unwrap().len(), 32);
        assert_eq!(rows[0]["xp"], 0);
    }

    #[tokio::test]
    async fn test_unknown_column_is_classified() {
        let gw = SqliteGateway::open_memory_at_version(0).unwrap();
        let err = gw
            .insert(
                "students",
                &row(json!({"display_name": "Ada", "cohort": "foundation", "department": "engineering", "predicted_grade": "A"})),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.kind,
            RemoteErrorKind::UnknownColumn("predicted_grade".to_string())
        );

        let err = gw
            .update(
                "students",
                &row(json!({"predicted_grade": "B"})),
                &Filter::new().eq("id", "x"),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.kind,
            RemoteErrorKind::UnknownColumn("predicted_grade".to_string())
        );
    }

    #[tokio::test]
    async fn test_unique_violation_is_conflict() {
        let gw = SqliteGateway::open_memory().unwrap();
        let payload = row(json!({"display_name": "Ada", "username": "ada", "cohort": "foundation", "department": "engineering"}));
        gw.insert("students", &payload).await.unwrap();
        let err = gw.insert("students", &payload).await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Conflict);
        assert_eq!(err.column.as_deref(), Some("username"));
    }

    #[tokio::test]
    async fn test_trigger_policy_is_permission_denied() {
        let gw = SqliteGateway::open_memory().unwrap();
        gw.execute_batch(
            "CREATE TRIGGER deny_badges BEFORE INSERT ON badges
             BEGIN SELECT RAISE(ABORT, 'permission denied for table badges'); END;",
        )
        .unwrap();
        let err = gw
            .insert("badges", &row(json!({"id": "b1", "name": "Star"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_upsert_keeps_existing_id() {
        let gw = SqliteGateway::open_memory().unwrap();
        let first = row(json!({
            "id": "sub_1", "task_id": "t1", "project_id": "p1", "student_id": "s1",
            "status": "pending_mark", "submitted_at": 1, "updated_at": 1
        }));
        gw.upsert("submissions", &first, &["task_id", "student_id"]).await.unwrap();

        let second = row(json!({
            "id": "sub_2", "task_id": "t1", "project_id": "p1", "student_id": "s1",
            "status": "pending_mark", "submitted_at": 2, "updated_at": 2
        }));
        let rows = gw
            .upsert("submissions", &second, &["task_id", "student_id"])
            .await
            .unwrap();
        assert_eq!(rows[0]["id"], "sub_1");
        assert_eq!(rows[0]["submitted_at"], 2);

        let all = gw.select("submissions", &Filter::all()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_writes_publish_changes() {
        let gw = SqliteGateway::open_memory().unwrap();
        let mut sub = gw
            .subscribe("notifications", Filter::new().eq("user_id", "u1"))
            .unwrap();

        gw.insert(
            "notifications",
            &row(json!({"id": "n1", "user_id": "u1", "title": "Hi", "message": "m", "created_at": 1})),
        )
        .await
        .unwrap();
        gw.update(
            "notifications",
            &row(json!({"is_read": true})),
            &Filter::new().eq("id", "n1"),
        )
        .await
        .unwrap();
        gw.delete("notifications", &Filter::new().eq("id", "n1"))
            .await
            .unwrap();

        let mut ops = Vec::new();
        for _ in 0..3 {
            match sub.next().await {
                Some(SubscriptionItem::Change(ev)) => ops.push(ev.op),
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert_eq!(ops, vec![ChangeOp::Insert, ChangeOp::Update, ChangeOp::Delete]);
    }

    #[tokio::test]
    async fn test_select_orders_and_filters() {
        let gw = SqliteGateway::open_memory().unwrap();
        for (id, at) in [("n1", 1), ("n2", 3), ("n3", 2)] {
            gw.insert(
                "notifications",
                &row(json!({"id": id, "user_id": "u1", "title": "t", "message": "m", "created_at": at})),
            )
            .await
            .unwrap();
        }
        let rows = gw
            .select(
                "notifications",
                &Filter::new().eq("user_id", "u1").order_by("created_at", false),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["n2", "n3", "n1"]);
    }

    #[test]
    fn test_ident_rejects_injection() {
        assert!(ident("students").is_ok());
        assert!(ident("students; DROP TABLE x").is_err());
        assert!(ident("1abc").is_err());
    }
}
