//! Rowset stores the engine loads from and saves to.
//!
//! A transport performs exactly two requests: fetch a snapshot for a
//! [`LoadTicket`] and submit a [`SaveRequest`]. [`HttpTransport`] talks to a
//! rowset server; [`MemoryTransport`] keeps the rows in process.

use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use horizon_grid::changeset::OLD_SUFFIX;
use horizon_grid::{
    ChangeRow, ChangeType, LoadTicket, ResultRow, RowData, Rowset, SaveRequest, SaveResult, Value,
};
use horizon_grid_core::logging::targets;
use parking_lot::Mutex;
use url::Url;

use crate::client::HttpClient;
use crate::error::{Result, TransportError};

/// A store rowsets are loaded from and saved to.
pub trait RowsetTransport: Send + Sync {
    /// Fetch the snapshot described by `ticket`.
    fn load<'a>(&'a self, ticket: &'a LoadTicket) -> BoxFuture<'a, Result<Rowset>>;

    /// Submit a changeset to the rowset at `url`.
    fn save<'a>(&'a self, url: &'a str, request: &'a SaveRequest) -> BoxFuture<'a, Result<SaveResult>>;
}

// -----------------------------------------------------------------------------
// HTTP
// -----------------------------------------------------------------------------

/// JSON-over-HTTP transport.
///
/// Loads are `GET <url>?filter=<token>`, saves are `POST <url>` with the
/// save request as the JSON body.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: HttpClient,
}

impl HttpTransport {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// The URL a load ticket is fetched from.
    pub fn load_url(ticket: &LoadTicket) -> Result<Url> {
        let mut url = Url::parse(&ticket.url)?;
        if let Some(filter) = &ticket.filter {
            url.query_pairs_mut().append_pair("filter", filter);
        }
        Ok(url)
    }

    async fn fetch(&self, ticket: &LoadTicket) -> Result<Rowset> {
        let url = Self::load_url(ticket)?;
        tracing::debug!(target: targets::TRANSPORT, %url, "GET rowset");
        let response = self.client.reqwest_client().get(url).send().await?;
        let body = ok_body(response).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn submit(&self, url: &str, request: &SaveRequest) -> Result<SaveResult> {
        let url = Url::parse(url)?;
        tracing::debug!(
            target: targets::TRANSPORT,
            %url,
            rows = request.changes.len(),
            update_id = %request.update_id,
            "POST changeset"
        );
        let response = self.client.reqwest_client().post(url).json(request).send().await?;
        let body = ok_body(response).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// The body of a successful response, or the HTTP error it carries.
async fn ok_body(response: reqwest::Response) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(target: targets::TRANSPORT, status = status.as_u16(), "request failed");
        return Err(TransportError::Http {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        });
    }
    Ok(response.bytes().await?.to_vec())
}

impl RowsetTransport for HttpTransport {
    fn load<'a>(&'a self, ticket: &'a LoadTicket) -> BoxFuture<'a, Result<Rowset>> {
        self.fetch(ticket).boxed()
    }

    fn save<'a>(&'a self, url: &'a str, request: &'a SaveRequest) -> BoxFuture<'a, Result<SaveResult>> {
        self.submit(url, request).boxed()
    }
}

// -----------------------------------------------------------------------------
// In memory
// -----------------------------------------------------------------------------

struct MemoryStore {
    /// Schema and flags; its `rows` stay empty.
    schema: Rowset,
    rows: Vec<Vec<Value>>,
    pk: Vec<usize>,
}

impl MemoryStore {
    fn field_index(&self, col: &str) -> Option<usize> {
        self.schema
            .fields
            .iter()
            .position(|f| f.name.as_deref() == Some(col))
    }

    fn positional(&self, data: RowData) -> Vec<Value> {
        match data {
            RowData::Values(mut vals) => {
                vals.resize(self.schema.fields.len(), Value::Null);
                vals
            }
            RowData::Named(named) => self
                .schema
                .fields
                .iter()
                .map(|f| {
                    f.name
                        .as_ref()
                        .and_then(|n| named.get(n).cloned())
                        .unwrap_or_default()
                })
                .collect(),
        }
    }

    /// Position of the row whose key equals the `"<pk>:old"` values of a change.
    fn find(&self, change: &ChangeRow) -> Option<usize> {
        if self.pk.is_empty() {
            return None;
        }
        let key: Vec<Value> = self
            .pk
            .iter()
            .map(|&fi| {
                let name = self.schema.fields[fi].name.clone().unwrap_or_default();
                change
                    .values
                    .get(&format!("{name}{OLD_SUFFIX}"))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect();
        self.rows
            .iter()
            .position(|row| self.pk.iter().zip(&key).all(|(&fi, k)| &row[fi] == k))
    }

    fn write(&self, row: &mut [Value], change: &ChangeRow) {
        for (col, val) in &change.values {
            if col.ends_with(OLD_SUFFIX) {
                continue;
            }
            if let Some(fi) = self.field_index(col) {
                row[fi] = val.clone();
            }
        }
    }

    fn apply(&mut self, change: &ChangeRow) -> ResultRow {
        match change.change_type {
            ChangeType::New => {
                let mut row = vec![Value::Null; self.schema.fields.len()];
                self.write(&mut row, change);
                self.rows.push(row.clone());
                ResultRow {
                    values: Some(row),
                    ..Default::default()
                }
            }
            ChangeType::Update => match self.find(change) {
                Some(i) => {
                    let mut row = self.rows[i].clone();
                    self.write(&mut row, change);
                    self.rows[i] = row.clone();
                    ResultRow {
                        values: Some(row),
                        ..Default::default()
                    }
                }
                None => not_found(),
            },
            ChangeType::Remove => match self.find(change) {
                Some(i) => {
                    self.rows.remove(i);
                    ResultRow {
                        remove: true,
                        ..Default::default()
                    }
                }
                None => not_found(),
            },
        }
    }
}

fn not_found() -> ResultRow {
    ResultRow {
        error: Some("Row not found".to_string()),
        ..Default::default()
    }
}

/// An in-process rowset store.
///
/// Loads return the whole rowset (the filter token is not interpreted).
/// Saves apply the changeset by primary key and answer with the stored
/// values of every new or updated row.
pub struct MemoryTransport {
    store: Mutex<MemoryStore>,
    latency: Option<Duration>,
    fail_next: Mutex<Option<TransportError>>,
}

impl MemoryTransport {
    pub fn new(mut rowset: Rowset) -> Self {
        let rows = std::mem::take(&mut rowset.rows);
        let mut store = MemoryStore {
            schema: rowset,
            rows: Vec::new(),
            pk: Vec::new(),
        };
        store.pk = store
            .schema
            .pk
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .filter_map(|col| store.field_index(col))
            .collect();
        let rows: Vec<Vec<Value>> = rows.into_iter().map(|r| store.positional(r)).collect();
        store.rows = rows;
        Self {
            store: Mutex::new(store),
            latency: None,
            fail_next: Mutex::new(None),
        }
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next request fail with `err`.
    pub fn fail_next(&self, err: TransportError) {
        *self.fail_next.lock() = Some(err);
    }

    /// Current stored rows, positional.
    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.store.lock().rows.clone()
    }

    /// Replace the stored rows, as another client would.
    pub fn set_rows(&self, rows: Vec<RowData>) {
        let mut store = self.store.lock();
        let rows: Vec<Vec<Value>> = rows.into_iter().map(|r| store.positional(r)).collect();
        store.rows = rows;
    }

    async fn begin(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.fail_next.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn snapshot(&self) -> Result<Rowset> {
        self.begin().await?;
        let store = self.store.lock();
        Ok(Rowset {
            rows: store.rows.iter().cloned().map(RowData::Values).collect(),
            ..store.schema.clone()
        })
    }

    async fn apply(&self, request: &SaveRequest) -> Result<SaveResult> {
        self.begin().await?;
        let mut store = self.store.lock();
        let rows = request.changes.rows.iter().map(|c| store.apply(c)).collect();
        tracing::debug!(target: targets::TRANSPORT, update_id = %request.update_id, "changeset applied in memory");
        Ok(SaveResult { rows })
    }
}

impl RowsetTransport for MemoryTransport {
    fn load<'a>(&'a self, _ticket: &'a LoadTicket) -> BoxFuture<'a, Result<Rowset>> {
        self.snapshot().boxed()
    }

    fn save<'a>(&'a self, _url: &'a str, request: &'a SaveRequest) -> BoxFuture<'a, Result<SaveResult>> {
        self.apply(request).boxed()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("rows", &self.store.lock().rows.len())
            .field("latency", &self.latency)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use horizon_grid::{Changeset, FieldAttrs, RowVals};

    use super::*;

    fn transport() -> MemoryTransport {
        MemoryTransport::new(Rowset {
            fields: vec![FieldAttrs::named("id"), FieldAttrs::named("v")],
            rows: vec![
                RowData::Values(vec![1.into(), "a".into()]),
                RowData::Values(vec![2.into(), "b".into()]),
            ],
            pk: Some("id".into()),
            ..Default::default()
        })
    }

    fn change(change_type: ChangeType, vals: &[(&str, Value)]) -> ChangeRow {
        ChangeRow {
            change_type,
            values: vals.iter().map(|(k, v)| (k.to_string(), v.clone())).collect::<RowVals>(),
        }
    }

    #[test]
    fn test_load_url_carries_filter() {
        let ticket = LoadTicket {
            id: 1,
            url: "https://example.com/rowsets/items".into(),
            filter: Some("[1,2]".into()),
            allow_diff_merge: false,
        };
        let url = HttpTransport::load_url(&ticket).unwrap();
        assert_eq!(url.query_pairs().next().unwrap(), ("filter".into(), "[1,2]".into()));

        let bad = LoadTicket {
            url: "not a url".into(),
            ..ticket
        };
        assert!(matches!(HttpTransport::load_url(&bad), Err(TransportError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_memory_store_applies_changeset() {
        let t = transport();
        let request = SaveRequest::new(
            Changeset {
                rows: vec![
                    change(ChangeType::Update, &[("v", "a2".into()), ("id:old", 1.into())]),
                    change(ChangeType::Remove, &[("id:old", 2.into())]),
                    change(ChangeType::New, &[("id", 3.into()), ("v", "c".into())]),
                    change(ChangeType::Update, &[("v", "x".into()), ("id:old", 9.into())]),
                ],
            },
            "u1",
        );
        let result = t.save("mem://items", &request).await.unwrap();
        assert_eq!(result.rows[0].values, Some(vec![1.into(), "a2".into()]));
        assert!(result.rows[1].remove);
        assert_eq!(result.rows[2].values, Some(vec![3.into(), "c".into()]));
        assert_eq!(result.rows[3].error.as_deref(), Some("Row not found"));
        assert_eq!(
            t.rows(),
            [vec![Value::Int(1), "a2".into()], vec![Value::Int(3), "c".into()]]
        );
    }

    #[tokio::test]
    async fn test_memory_failure_injection() {
        let t = transport();
        t.fail_next(TransportError::Timeout);
        let ticket = LoadTicket {
            id: 1,
            url: "mem://items".into(),
            filter: None,
            allow_diff_merge: false,
        };
        assert_eq!(t.load(&ticket).await.unwrap_err(), TransportError::Timeout);
        assert_eq!(t.load(&ticket).await.unwrap().rows.len(), 2);
    }
}
