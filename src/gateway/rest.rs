//! PostgREST-compatible HTTP gateway.
//!
//! Speaks the `/rest/v1/{table}` dialect: equality filters as
//! `col=eq.value`, upserts through `on_conflict` with
//! `Prefer: resolution=merge-duplicates`, and returned representations on
//! every write. The HTTP API has no push channel, so [`RestGateway::subscribe`]
//! polls and diffs snapshots.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{
    CHANGE_CHANNEL_CAPACITY, ChangeEvent, ChangeOp, Filter, RemoteError, RemoteErrorKind,
    RemoteGateway, RemoteResult, Row, Subscription,
};
use crate::sync::{has_changed, row_hash};

/// Default interval between subscription polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// HTTP gateway to a PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct RestGateway {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    poll_interval: Duration,
}

/// Error body returned by PostgREST.
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

impl RestGateway {
    /// Create a gateway for `base_url` authenticated with `api_key`.
    #[must_use]
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Send requests as the signed-in user instead of the anonymous key.
    #[must_use]
    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {bearer}"))
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Vec<Row>> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_response(status, &body));
        }
        parse_rows(&body)
    }
}

/// Render a filter as PostgREST query parameters.
fn filter_params(filter: &Filter) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = filter
        .conditions()
        .iter()
        .map(|(column, value)| {
            let rendered = match value {
                Value::Null => "is.null".to_string(),
                Value::String(s) => format!("eq.{s}"),
                other => format!("eq.{other}"),
            };
            (column.clone(), rendered)
        })
        .collect();

    if let Some((column, ascending)) = filter.order() {
        let direction = if ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{column}.{direction}")));
    }
    params
}

fn parse_rows(body: &str) -> RemoteResult<Vec<Row>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|e| RemoteError::unknown(format!("invalid response body: {e}")))?;
    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect()),
        Value::Object(row) => Ok(vec![row]),
        _ => Err(RemoteError::unknown("response body is not a row set")),
    }
}

/// Text between the first pair of `open`/`close` delimiters after `from`.
fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let len = text[start..].find(close)?;
    Some(&text[start..start + len])
}

/// Column named by an undefined-column message.
///
/// PostgREST: `Could not find the 'x' column of 't' in the schema cache`.
/// Postgres: `column "x" of relation "t" does not exist` or
/// `column t.x does not exist`.
fn unknown_column_name(message: &str) -> Option<String> {
    if let Some(name) = between(message, "the '", "' column") {
        return Some(name.to_string());
    }
    if let Some(name) = between(message, "column \"", "\"") {
        return Some(name.to_string());
    }
    between(message, "column ", " does not exist")
        .map(|qualified| qualified.rsplit('.').next().unwrap_or(qualified).to_string())
}

/// Classify a non-success response.
pub(crate) fn classify_response(status: StatusCode, body: &str) -> RemoteError {
    let parsed: PostgrestError = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    match parsed.code.as_deref() {
        Some("PGRST204" | "42703") => {
            if let Some(column) = unknown_column_name(&message) {
                return RemoteError::new(RemoteErrorKind::UnknownColumn(column), message);
            }
        }
        Some("42501") => return RemoteError::permission_denied(message),
        Some("23505") => {
            let err = RemoteError::conflict(message);
            return match parsed.details.as_deref().and_then(|d| between(d, "Key (", ")")) {
                Some(column) => err.with_column(column),
                None => err,
            };
        }
        _ => {}
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::permission_denied(message),
        StatusCode::CONFLICT => RemoteError::conflict(message),
        s if s.is_server_error() => RemoteError::unavailable(message),
        _ => RemoteError::unknown(message),
    }
}

impl RemoteGateway for RestGateway {
    async fn select(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Row>> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "*")])
            .query(&filter_params(filter));
        self.send(request).await
    }

    async fn insert(&self, table: &str, payload: &Row) -> RemoteResult<Vec<Row>> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(payload);
        self.send(request).await
    }

    async fn update(&self, table: &str, payload: &Row, filter: &Filter) -> RemoteResult<Vec<Row>> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&filter_params(filter))
            .header("Prefer", "return=representation")
            .json(payload);
        self.send(request).await
    }

    async fn upsert(
        &self,
        table: &str,
        payload: &Row,
        conflict_keys: &[&str],
    ) -> RemoteResult<Vec<Row>> {
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", conflict_keys.join(","))])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(payload);
        self.send(request).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> RemoteResult<Vec<Row>> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&filter_params(filter))
            .header("Prefer", "return=representation");
        self.send(request).await
    }

    fn subscribe(&self, table: &str, filter: Filter) -> RemoteResult<Subscription> {
        let (tx, rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let gateway = self.clone();
        let table_name = table.to_string();
        let poll_filter = filter.clone();

        let task = tokio::spawn(async move {
            let mut known: Option<HashMap<String, (String, Row)>> = None;
            let mut ticker = tokio::time::interval(gateway.poll_interval);
            loop {
                ticker.tick().await;
                let rows = match gateway.select(&table_name, &poll_filter).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!(table = %table_name, error = %e, "Subscription poll failed");
                        continue;
                    }
                };
                let current = index_rows(rows);
                if let Some(previous) = known.as_ref() {
                    for event in diff_snapshots(&table_name, previous, &current) {
                        if tx.send(event).is_err() {
                            debug!(table = %table_name, "Subscription closed, stopping poll");
                            return;
                        }
                    }
                }
                known = Some(current);
            }
        });

        Ok(Subscription::new(table, filter, rx).with_task(task))
    }
}

fn index_rows(rows: Vec<Row>) -> HashMap<String, (String, Row)> {
    rows.into_iter()
        .filter_map(|row| {
            let id = match row.get("id")? {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((id, (row_hash(&row), row)))
        })
        .collect()
}

fn diff_snapshots(
    table: &str,
    previous: &HashMap<String, (String, Row)>,
    current: &HashMap<String, (String, Row)>,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for (id, (hash, row)) in current {
        let old_hash = previous.get(id).map(|(h, _)| h.as_str());
        if !has_changed(hash, old_hash) {
            continue;
        }
        let op = if old_hash.is_some() {
            ChangeOp::Update
        } else {
            ChangeOp::Insert
        };
        events.push(ChangeEvent {
            table: table.to_string(),
            op,
            row: row.clone(),
        });
    }
    for (id, (_, row)) in previous {
        if !current.contains_key(id) {
            events.push(ChangeEvent {
                table: table.to_string(),
                op: ChangeOp::Delete,
                row: row.clone(),
            });
        }
    }
    events
}
