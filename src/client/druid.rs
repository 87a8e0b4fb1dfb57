use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::retry::{is_retryable_status, RetryPolicy};
use super::schema_cache::SchemaCache;
use crate::druid::native::Interval;
use crate::druid::{NativeQuery, ResultLayout};
use crate::query::parser::ShowStatement;
use crate::query::schema::{ColumnType, DatasourceSchema};

/// Raw response body of a broker call
pub type RawResult = JsonValue;

/// Tables the SQL layer reports next to the datasources
const SYSTEM_TABLES: [&str; 3] = ["COLUMNS", "SCHEMATA", "TABLES"];
const SCHEMAS: [&str; 2] = ["druid", "information_schema"];

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port`, optionally with a scheme
    pub host: String,
    /// Per-request ceiling; the caller's deadline still bounds every attempt
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8082".to_string(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Client for a Druid broker
#[derive(Debug)]
pub struct DruidClient {
    http_client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    schema_cache: SchemaCache,
}

impl DruidClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::network(e.to_string(), false))?;

        Ok(Self {
            http_client,
            base_url: base_url(&config.host),
            retry: config.retry.clone(),
            schema_cache: SchemaCache::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    /// Execute a native query
    pub async fn execute(&self, query: &NativeQuery, deadline: Instant) -> Result<RawResult, ClientError> {
        debug!(
            query_type = query.query_type(),
            query_id = query.query_id().unwrap_or_default(),
            "Executing native query"
        );
        let body = serde_json::to_value(query).map_err(|e| ClientError::Decode(e.to_string()))?;
        let url = format!("{}/druid/v2/", self.base_url);
        self.request(Method::POST, &url, Some(&body), deadline).await
    }

    /// Answer a SHOW statement through the metadata endpoints
    pub async fn introspect(
        &self,
        show: &ShowStatement,
        deadline: Instant,
    ) -> Result<(RawResult, ResultLayout), ClientError> {
        match show {
            ShowStatement::Tables => {
                let mut names = self.datasources(deadline).await?;
                names.extend(SYSTEM_TABLES.iter().map(|t| t.to_string()));
                names.sort();
                let rows = names
                    .into_iter()
                    .map(|name| json!({ "Tables_in_database": name }))
                    .collect();
                Ok((
                    JsonValue::Array(rows),
                    ResultLayout::rows(&["Tables_in_database"]),
                ))
            }
            ShowStatement::Schemas => {
                let rows = SCHEMAS.iter().map(|s| json!({ "Database": s })).collect();
                Ok((JsonValue::Array(rows), ResultLayout::rows(&["Database"])))
            }
            ShowStatement::Columns { table } => {
                let schema = self
                    .datasource_schema(table, deadline)
                    .await?
                    .ok_or_else(|| ClientError::Execution {
                        status: None,
                        message: format!("Table '{}' does not exist", table),
                    })?;
                let rows = schema
                    .columns
                    .iter()
                    .map(|c| json!({ "Field": c.name, "Type": c.column_type.label() }))
                    .collect();
                Ok((JsonValue::Array(rows), ResultLayout::rows(&["Field", "Type"])))
            }
        }
    }

    /// Names of the queryable datasources
    pub async fn datasources(&self, deadline: Instant) -> Result<Vec<String>, ClientError> {
        let url = format!("{}/druid/v2/datasources", self.base_url);
        let raw = self.request(Method::GET, &url, None, deadline).await?;
        serde_json::from_value(raw).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Columns and types of `table`, or `None` when no such datasource exists.
    ///
    /// Checks the datasource list first, then runs a segment metadata query.
    pub async fn datasource_schema(
        &self,
        table: &str,
        deadline: Instant,
    ) -> Result<Option<DatasourceSchema>, ClientError> {
        if let Some(schema) = self.schema_cache.get(table) {
            return Ok(Some(schema));
        }

        let datasources = self.datasources(deadline).await?;
        if !datasources.iter().any(|d| d == table) {
            return Ok(None);
        }

        let schema = self.segment_metadata(table, deadline).await?;
        self.schema_cache.put(schema.clone());
        Ok(Some(schema))
    }

    async fn segment_metadata(&self, table: &str, deadline: Instant) -> Result<DatasourceSchema, ClientError> {
        let body = json!({
            "queryType": "segmentMetadata",
            "dataSource": table,
            "intervals": [Interval::eternity()],
            "merge": true,
            "analysisTypes": [],
            "lenientAggregatorMerge": true,
        });
        let url = format!("{}/druid/v2/", self.base_url);
        let raw = self.request(Method::POST, &url, Some(&body), deadline).await?;

        let analyses: Vec<SegmentAnalysis> =
            serde_json::from_value(raw).map_err(|e| ClientError::Decode(e.to_string()))?;

        let mut schema = DatasourceSchema::new(table);
        if let Some(analysis) = analyses.into_iter().next() {
            for (name, column) in analysis.columns {
                schema = schema.with_column(name, ColumnType::from_druid(&column.column_type));
            }
        }
        Ok(schema)
    }

    /// Issue a request, retrying transient failures until the deadline
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
        deadline: Instant,
    ) -> Result<RawResult, ClientError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=max_attempts {
            match self.request_once(method.clone(), url, body, deadline).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let wake = Instant::now() + self.retry.backoff(attempt);
                    if wake >= deadline {
                        return Err(e);
                    }
                    warn!(attempt, url, error = %e, "Retrying broker request");
                    tokio::time::sleep_until(wake).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(ClientError::Timeout))
    }

    async fn request_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
        deadline: Instant,
    ) -> Result<RawResult, ClientError> {
        let mut request = self.http_client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let call = async {
            let response = request.send().await.map_err(ClientError::from_reqwest)?;
            let status = response.status();
            let text = response.text().await.map_err(ClientError::from_reqwest)?;

            if !status.is_success() {
                return Err(ClientError::from_response(status, &text));
            }
            serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))
        };

        match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

#[derive(Debug, Deserialize)]
struct SegmentAnalysis {
    columns: BTreeMap<String, ColumnAnalysis>,
}

#[derive(Debug, Deserialize)]
struct ColumnAnalysis {
    #[serde(rename = "type")]
    column_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Network error: {message}")]
    Network { message: String, connect: bool },

    #[error("Query timed out")]
    Timeout,

    #[error("Execution error: {message}")]
    Execution { status: Option<u16>, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl ClientError {
    fn network(message: String, connect: bool) -> Self {
        ClientError::Network { message, connect }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::network(err.to_string(), err.is_connect())
        }
    }

    /// Error body of a failed call: the store's message when it sent one
    fn from_response(status: StatusCode, body: &str) -> Self {
        if status == StatusCode::GATEWAY_TIMEOUT {
            return ClientError::Timeout;
        }
        let parsed: Option<JsonValue> = serde_json::from_str(body).ok();
        let field = |key: &str| {
            parsed
                .as_ref()
                .and_then(|v| v.get(key))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let message = field("errorMessage")
            .or_else(|| field("error"))
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| format!("HTTP {}", status));

        ClientError::Execution {
            status: Some(status.as_u16()),
            message,
        }
    }

    /// Connection failures and gateway errors may succeed on another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network { connect, .. } => *connect,
            ClientError::Execution {
                status: Some(status),
                ..
            } => is_retryable_status(*status),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::druid::native::{DataSource, Granularity, QueryContext, TimeseriesQuery};
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    fn client(host: String, retry: RetryPolicy) -> DruidClient {
        DruidClient::new(&ClientConfig {
            host,
            timeout: Duration::from_secs(5),
            retry,
        })
        .unwrap()
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn timeseries() -> NativeQuery {
        NativeQuery::Timeseries(TimeseriesQuery {
            data_source: DataSource::Table("wikipedia".into()),
            intervals: vec![Interval::eternity()],
            granularity: Granularity::All,
            filter: None,
            aggregations: vec![],
            post_aggregations: vec![],
            context: QueryContext::new(),
        })
    }

    fn metadata_router() -> Router {
        Router::new()
            .route(
                "/druid/v2/datasources",
                get(|| async { Json(json!(["wikipedia", "logs"])) }),
            )
            .route(
                "/druid/v2/",
                post(|Json(body): Json<JsonValue>| async move {
                    assert_eq!(body["queryType"], "segmentMetadata");
                    Json(json!([{
                        "id": "merged",
                        "columns": {
                            "__time": {"type": "LONG"},
                            "page": {"type": "STRING"},
                            "added": {"type": "DOUBLE"},
                            "count": {"type": "LONG"}
                        }
                    }]))
                }),
            )
    }

    #[tokio::test]
    async fn test_execute_posts_native_query() {
        let router = Router::new().route(
            "/druid/v2/",
            post(|Json(body): Json<JsonValue>| async move {
                Json(json!([{
                    "timestamp": "2015-09-12T00:00:00.000Z",
                    "result": {"queryType": body["queryType"].clone()}
                }]))
            }),
        );
        let client = client(spawn(router).await, RetryPolicy::no_retry());

        let raw = client.execute(&timeseries(), deadline()).await.unwrap();
        assert_eq!(raw[0]["result"]["queryType"], "timeseries");
    }

    #[tokio::test]
    async fn test_execution_error_inlines_message_without_retry() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/druid/v2/",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        AxumStatus::INTERNAL_SERVER_ERROR,
                        Json(json!({
                            "error": "Unknown exception",
                            "errorMessage": "Column 'nope' not found"
                        })),
                    )
                }
            }),
        );
        let client = client(spawn(router).await, fast_retry(3));

        let err = client.execute(&timeseries(), deadline()).await.unwrap_err();
        match err {
            ClientError::Execution { status, message } => {
                assert_eq!(status, Some(500));
                assert_eq!(message, "Column 'nope' not found");
            }
            other => panic!("Expected execution error, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gateway_error_is_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/druid/v2/",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (AxumStatus::SERVICE_UNAVAILABLE, "busy").into_response()
                    } else {
                        Json(json!([])).into_response()
                    }
                }
            }),
        );
        let client = client(spawn(router).await, fast_retry(3));

        let raw = client.execute(&timeseries(), deadline()).await.unwrap();
        assert_eq!(raw, json!([]));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_query_timeout_status_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/druid/v2/",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        AxumStatus::GATEWAY_TIMEOUT,
                        Json(json!({
                            "error": "Query timeout",
                            "errorClass": "org.apache.druid.query.QueryTimeoutException"
                        })),
                    )
                }
            }),
        );
        let client = client(spawn(router).await, fast_retry(3));

        let err = client.execute(&timeseries(), deadline()).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        assert!(!err.is_transient());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_timeout() {
        let router = Router::new().route(
            "/druid/v2/",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!([]))
            }),
        );
        let client = client(spawn(router).await, fast_retry(3));

        let err = client
            .execute(&timeseries(), Instant::now() + Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = client(host, fast_retry(2));
        let err = client.execute(&timeseries(), deadline()).await.unwrap_err();
        assert!(matches!(err, ClientError::Network { connect: true, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_show_tables_adds_system_tables() {
        let client = client(spawn(metadata_router()).await, RetryPolicy::no_retry());

        let (raw, layout) = client.introspect(&ShowStatement::Tables, deadline()).await.unwrap();
        assert_eq!(layout.column_names(), vec!["Tables_in_database"]);
        let names: Vec<&str> = raw
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["Tables_in_database"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["COLUMNS", "SCHEMATA", "TABLES", "logs", "wikipedia"]);
    }

    #[tokio::test]
    async fn test_show_schemas_needs_no_broker() {
        // Nothing listens here
        let client = client("127.0.0.1:1".to_string(), RetryPolicy::no_retry());

        let (raw, layout) = client.introspect(&ShowStatement::Schemas, deadline()).await.unwrap();
        assert_eq!(layout.column_names(), vec!["Database"]);
        assert_eq!(
            raw,
            json!([{"Database": "druid"}, {"Database": "information_schema"}])
        );
    }

    #[tokio::test]
    async fn test_show_columns_time_first() {
        let client = client(spawn(metadata_router()).await, RetryPolicy::no_retry());

        let show = ShowStatement::Columns {
            table: "wikipedia".into(),
        };
        let (raw, layout) = client.introspect(&show, deadline()).await.unwrap();
        assert_eq!(layout.column_names(), vec!["Field", "Type"]);
        assert_eq!(
            raw,
            json!([
                {"Field": "__time", "Type": "TIME"},
                {"Field": "added", "Type": "DOUBLE"},
                {"Field": "count", "Type": "LONG"},
                {"Field": "page", "Type": "STRING"}
            ])
        );
    }

    #[tokio::test]
    async fn test_show_columns_unknown_table() {
        let client = client(spawn(metadata_router()).await, RetryPolicy::no_retry());

        let show = ShowStatement::Columns {
            table: "missing".into(),
        };
        let err = client.introspect(&show, deadline()).await.unwrap_err();
        assert!(matches!(err, ClientError::Execution { status: None, .. }));
    }

    #[tokio::test]
    async fn test_datasource_schema_is_cached() {
        let client = client(spawn(metadata_router()).await, RetryPolicy::no_retry());

        let schema = client
            .datasource_schema("wikipedia", deadline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(schema.column("count").unwrap().column_type, ColumnType::Long);

        let _ = client.datasource_schema("wikipedia", deadline()).await.unwrap();
        assert_eq!(client.schema_cache().stats().hits, 1);
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("localhost:8082"), "http://localhost:8082");
        assert_eq!(base_url("https://broker:8282/"), "https://broker:8282");
    }
}
