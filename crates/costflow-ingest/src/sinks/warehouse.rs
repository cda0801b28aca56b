//! BigQuery warehouse sink over the REST API
//!
//! Tables are day-partitioned on `date`. Before streaming a batch the ids
//! already present in the batch's date window are loaded, so rows seen on a
//! previous run are skipped; each streamed row also carries `insertId = id`.

use crate::domain::{AccountCost, Record, Utilization};
use crate::error::{IngestError, Result};
use crate::identity::RecordStore;
use async_trait::async_trait;
use chrono::NaiveDate;
use costflow_common::calendar::DATE_FORMAT;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

pub const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

/// Rows per insertAll request
const INSERT_BATCH_SIZE: usize = 500;

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableField {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub field_type: &'static str,
    pub mode: &'static str,
}

const fn required(name: &'static str, field_type: &'static str) -> TableField {
    TableField {
        name,
        field_type,
        mode: "REQUIRED",
    }
}

/// A record kind with a per-period warehouse table
pub trait WarehouseRecord: Record + 'static {
    /// Table name suffix, e.g. `account_cost` for `1d_account_cost`
    const TABLE_SUFFIX: &'static str;

    fn schema() -> Vec<TableField>;

    /// Partition date
    fn date(&self) -> NaiveDate;

    fn table_name(period_label: &str) -> String {
        format!("{}_{}", period_label, Self::TABLE_SUFFIX)
    }
}

impl WarehouseRecord for AccountCost {
    const TABLE_SUFFIX: &'static str = "account_cost";

    fn schema() -> Vec<TableField> {
        vec![
            required("id", "STRING"),
            required("account_id", "STRING"),
            required("description", "STRING"),
            required("date", "DATE"),
            required("service", "STRING"),
            required("record_type", "STRING"),
            required("unblended_amount", "FLOAT"),
            required("unblended_unit", "STRING"),
            required("blended_amount", "FLOAT"),
            required("blended_unit", "STRING"),
            required("amortized_amount", "FLOAT"),
            required("amortized_unit", "STRING"),
            required("net_amortized_amount", "FLOAT"),
            required("net_amortized_unit", "STRING"),
            required("net_unblended_amount", "FLOAT"),
            required("net_unblended_unit", "STRING"),
            required("inserted_at", "TIMESTAMP"),
        ]
    }

    fn date(&self) -> NaiveDate {
        self.date
    }
}

impl WarehouseRecord for Utilization {
    const TABLE_SUFFIX: &'static str = "utilization";

    fn schema() -> Vec<TableField> {
        vec![
            required("id", "STRING"),
            required("account_id", "STRING"),
            required("description", "STRING"),
            required("region", "STRING"),
            required("instance_type", "STRING"),
            required("platform", "STRING"),
            required("cache_engine", "STRING"),
            required("database_engine", "STRING"),
            required("deployment_option", "STRING"),
            required("tenancy", "STRING"),
            required("date", "DATE"),
            required("hours", "FLOAT"),
            required("num", "FLOAT"),
            required("utilization_rate", "FLOAT"),
            required("covering_cost", "FLOAT"),
            required("percentage", "FLOAT"),
            required("inserted_at", "TIMESTAMP"),
        ]
    }

    fn date(&self) -> NaiveDate {
        self.date
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
enum TokenSource {
    Provider(Arc<dyn TokenProvider>),
    Static(SecretString),
}

/// Authenticated BigQuery REST client bound to one project
#[derive(Clone)]
pub struct WarehouseClient {
    http: Client,
    base_url: String,
    project_id: String,
    token: TokenSource,
}

impl std::fmt::Debug for WarehouseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseClient")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<QueryRow>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    f: Vec<QueryCell>,
}

#[derive(Debug, Deserialize)]
struct QueryCell {
    v: Value,
}

impl WarehouseClient {
    /// Authenticate with a service-account JSON file; the project comes from the file
    pub async fn from_credential_file(path: &Path, base_url: impl Into<String>) -> Result<Self> {
        let account = CustomServiceAccount::from_file(path).map_err(|e| {
            IngestError::config(format!("invalid credential file {}: {}", path.display(), e))
        })?;
        let project_id = TokenProvider::project_id(&account)
            .await
            .map_err(|e| IngestError::config(format!("credential has no project id: {}", e)))?;

        Ok(Self {
            http: Client::new(),
            base_url: base_url.into(),
            project_id: project_id.to_string(),
            token: TokenSource::Provider(Arc::new(account)),
        })
    }

    /// Client with a fixed bearer token, for emulators and tests
    pub fn with_static_token(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        token: SecretString,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            project_id: project_id.into(),
            token: TokenSource::Static(token),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.project_id,
            path
        )
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = match &self.token {
            TokenSource::Provider(provider) => provider
                .token(&[BIGQUERY_SCOPE])
                .await
                .map_err(|e| IngestError::warehouse(format!("failed to get access token: {}", e)))?
                .as_str()
                .to_string(),
            TokenSource::Static(token) => token.expose_secret().to_string(),
        };

        Ok(self.http.request(method, self.url(path)).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| IngestError::warehouse(format!("{}: {}", what, e)))?;
        Ok(response)
    }

    async fn ensure_ok(response: reqwest::Response, what: &str) -> Result<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IngestError::warehouse(format!("{}: {}", what, e)))?;

        if !status.is_success() {
            return Err(IngestError::warehouse(format!("{} returned {}: {}", what, status, body)));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Create `dataset` unless it already exists
    #[instrument(skip(self))]
    pub async fn ensure_dataset(&self, dataset: &str) -> Result<()> {
        let path = format!("datasets/{}", dataset);
        let response = self.send(self.request(Method::GET, &path).await?, "get dataset").await?;
        if response.status() != StatusCode::NOT_FOUND {
            Self::ensure_ok(response, "get dataset").await?;
            return Ok(());
        }

        let body = json!({
            "datasetReference": { "projectId": self.project_id, "datasetId": dataset }
        });
        let response = self
            .send(self.request(Method::POST, "datasets").await?.json(&body), "create dataset")
            .await?;
        Self::ensure_ok(response, "create dataset").await?;

        info!(dataset = %dataset, "Created dataset");
        Ok(())
    }

    /// Create a day-partitioned table unless it already exists
    #[instrument(skip(self, schema))]
    pub async fn ensure_table(&self, dataset: &str, table: &str, schema: &[TableField]) -> Result<()> {
        let path = format!("datasets/{}/tables/{}", dataset, table);
        let response = self.send(self.request(Method::GET, &path).await?, "get table").await?;
        if response.status() != StatusCode::NOT_FOUND {
            Self::ensure_ok(response, "get table").await?;
            return Ok(());
        }

        let body = json!({
            "tableReference": {
                "projectId": self.project_id,
                "datasetId": dataset,
                "tableId": table,
            },
            "schema": { "fields": schema },
            "timePartitioning": { "type": "DAY", "field": "date" },
        });
        let path = format!("datasets/{}/tables", dataset);
        let response = self
            .send(self.request(Method::POST, &path).await?.json(&body), "create table")
            .await?;
        Self::ensure_ok(response, "create table").await?;

        info!(dataset = %dataset, table = %table, "Created table");
        Ok(())
    }

    /// Ids stored in `table` with `start <= date <= end`
    #[instrument(skip(self))]
    pub async fn existing_ids(
        &self,
        dataset: &str,
        table: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashSet<String>> {
        let query = format!(
            "SELECT id FROM `{}.{}.{}` WHERE date BETWEEN @start AND @end",
            self.project_id, dataset, table
        );
        let body = json!({
            "query": query,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "timeoutMs": 60000,
            "queryParameters": [
                date_parameter("start", start),
                date_parameter("end", end),
            ],
        });

        let response = self
            .send(self.request(Method::POST, "queries").await?.json(&body), "query ids")
            .await?;
        let mut page: QueryResponse =
            serde_json::from_value(Self::ensure_ok(response, "query ids").await?)?;

        let mut ids = HashSet::new();
        loop {
            if !page.job_complete {
                return Err(IngestError::warehouse(format!(
                    "id query on {} did not complete in time",
                    table
                )));
            }

            ids.extend(page.rows.iter().filter_map(|row| {
                row.f.first().and_then(|cell| cell.v.as_str()).map(str::to_string)
            }));

            let (Some(token), Some(job)) = (page.page_token.take(), page.job_reference.as_ref())
            else {
                break;
            };

            let path = format!("queries/{}", job.job_id);
            let mut query = vec![("pageToken", token)];
            if let Some(location) = &job.location {
                query.push(("location", location.clone()));
            }
            let response = self
                .send(self.request(Method::GET, &path).await?.query(&query), "query ids page")
                .await?;
            page = serde_json::from_value(Self::ensure_ok(response, "query ids page").await?)?;
        }

        debug!(table = %table, count = ids.len(), "Loaded existing ids");
        Ok(ids)
    }

    /// Stream `rows` (`(insert_id, json)`) into `table`
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn insert_rows(&self, dataset: &str, table: &str, rows: &[(String, Value)]) -> Result<()> {
        let path = format!("datasets/{}/tables/{}/insertAll", dataset, table);

        for chunk in rows.chunks(INSERT_BATCH_SIZE) {
            let body = json!({
                "rows": chunk
                    .iter()
                    .map(|(id, row)| json!({ "insertId": id, "json": row }))
                    .collect::<Vec<_>>(),
            });

            let response = self
                .send(self.request(Method::POST, &path).await?.json(&body), "insert rows")
                .await?;
            let result = Self::ensure_ok(response, "insert rows").await?;

            if let Some(errors) = result.get("insertErrors").and_then(Value::as_array) {
                if !errors.is_empty() {
                    return Err(IngestError::warehouse(format!(
                        "{} rows rejected by {}: {}",
                        errors.len(),
                        table,
                        Value::Array(errors.clone())
                    )));
                }
            }
        }

        Ok(())
    }
}

fn date_parameter(name: &str, date: NaiveDate) -> Value {
    json!({
        "name": name,
        "parameterType": { "type": "DATE" },
        "parameterValue": { "value": date.format(DATE_FORMAT).to_string() },
    })
}

// ============================================================================
// Table store
// ============================================================================

/// [`RecordStore`] over one warehouse table.
///
/// Existing ids for the window are loaded when the table is opened; saved
/// records are buffered and streamed by [`WarehouseTable::flush`].
pub struct WarehouseTable<R> {
    client: WarehouseClient,
    dataset: String,
    table: String,
    known: Mutex<HashSet<String>>,
    pending: Mutex<Vec<(String, Value)>>,
    _record: PhantomData<fn() -> R>,
}

impl<R: WarehouseRecord> WarehouseTable<R> {
    /// Load the ids dated `start..=end` from an existing table
    pub async fn open(
        client: WarehouseClient,
        dataset: &str,
        period_label: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self> {
        let table = R::table_name(period_label);
        let known = client.existing_ids(dataset, &table, start, end).await?;

        Ok(Self {
            client,
            dataset: dataset.to_string(),
            table,
            known: Mutex::new(known),
            pending: Mutex::new(Vec::new()),
            _record: PhantomData,
        })
    }

    /// Stream buffered rows; returns how many were sent
    pub async fn flush(&self) -> Result<usize> {
        let rows = std::mem::take(&mut *lock(&self.pending)?);
        if rows.is_empty() {
            return Ok(0);
        }

        self.client.insert_rows(&self.dataset, &self.table, &rows).await?;
        info!(table = %self.table, rows = rows.len(), "Streamed rows");
        Ok(rows.len())
    }
}

#[async_trait]
impl<R: WarehouseRecord> RecordStore<R> for WarehouseTable<R> {
    fn table(&self) -> &str {
        &self.table
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(lock(&self.known)?.contains(id))
    }

    async fn save(&self, record: &R) -> Result<()> {
        let row = serde_json::to_value(record)?;
        lock(&self.known)?.insert(record.id().to_string());
        lock(&self.pending)?.push((record.id().to_string(), row));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| IngestError::warehouse("table state lock poisoned"))
}
