pub mod parser;
pub mod planner;
pub mod schema;

pub use parser::{parse_statement, ParseError, SelectQuery, ShowStatement, Statement, TableRef};
pub use planner::{plan_query, LogicalPlan, PlanError};
pub use schema::{ColumnType, DatasourceSchema, Schema};

use chrono_tz::Tz;
use tokio::time::Instant;
use tracing::debug;

use crate::client::{ClientError, DruidClient};
use crate::config::ConfigError;
use crate::druid::{compile, CompileError, CompileOptions, CompiledQuery};
use crate::output::{format, FormatError, OutputMode};

/// Per-invocation settings for [`run_query`]
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timezone: Tz,
    pub compile: CompileOptions,
    pub output: OutputMode,
    /// Resolve tables and columns against the broker before planning.
    /// When off, any name is accepted and typed as unknown.
    pub introspect: bool,
    pub deadline: Instant,
}

/// A statement ready to send
#[derive(Debug, Clone)]
pub enum PreparedQuery {
    Show(ShowStatement),
    Native(CompiledQuery),
}

impl PreparedQuery {
    pub fn compiled(&self) -> Option<&CompiledQuery> {
        match self {
            PreparedQuery::Native(compiled) => Some(compiled),
            PreparedQuery::Show(_) => None,
        }
    }
}

/// Parse, plan and compile one statement.
///
/// With introspection on, the queried table's schema is fetched (and cached)
/// before planning, so unknown names fail here and sketch columns get their
/// native aggregators.
pub async fn prepare_query(
    client: &DruidClient,
    sql: &str,
    options: &RunOptions,
) -> Result<PreparedQuery, QueryError> {
    match parse_statement(sql)? {
        Statement::Show(show) => Ok(PreparedQuery::Show(show)),
        Statement::Select(query) => {
            let schema = if options.introspect {
                introspected_schema(client, &query, options.deadline).await?
            } else {
                Schema::permissive()
            };
            let plan = plan_query(query, &schema, options.timezone)?;
            let compiled = compile(&plan, &options.compile)?;
            Ok(PreparedQuery::Native(compiled))
        }
    }
}

/// Send a prepared statement and render its results
pub async fn execute_prepared(
    client: &DruidClient,
    prepared: &PreparedQuery,
    options: &RunOptions,
) -> Result<String, QueryError> {
    let (raw, layout) = match prepared {
        PreparedQuery::Show(show) => client.introspect(show, options.deadline).await?,
        PreparedQuery::Native(compiled) => {
            let raw = client.execute(&compiled.native, options.deadline).await?;
            (raw, compiled.layout.clone())
        }
    };
    Ok(format(&raw, &layout, options.output)?)
}

/// Convenience function to prepare, execute and render a statement
pub async fn run_query(
    client: &DruidClient,
    sql: &str,
    options: &RunOptions,
) -> Result<String, QueryError> {
    let prepared = prepare_query(client, sql, options).await?;
    execute_prepared(client, &prepared, options).await
}

async fn introspected_schema(
    client: &DruidClient,
    query: &SelectQuery,
    deadline: Instant,
) -> Result<Schema, QueryError> {
    let Some(TableRef::Named(table)) = &query.from else {
        return Ok(Schema::permissive());
    };
    let schema = match client.datasource_schema(table, deadline).await? {
        Some(datasource) => Schema::strict().with_datasource(datasource),
        None => Schema::strict(),
    };
    debug!(table = %table, "Introspected datasource schema");
    Ok(schema)
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("{0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, RetryPolicy};
    use crate::config::{parse_args, CliCommand};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value as JsonValue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    fn client(host: String) -> DruidClient {
        DruidClient::new(&ClientConfig {
            host,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::no_retry(),
        })
        .unwrap()
    }

    /// Options without the schema lookup, for mocks that only answer queries
    fn options(output: OutputMode) -> RunOptions {
        RunOptions {
            timezone: Tz::UTC,
            compile: CompileOptions::default(),
            output,
            introspect: false,
            deadline: Instant::now() + Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_default_run_resolves_sketch_columns() {
        let sent = Arc::new(Mutex::new(None::<JsonValue>));
        let captured = sent.clone();
        let router = Router::new()
            .route("/druid/v2/datasources", get(|| async { Json(json!(["wikipedia"])) }))
            .route(
                "/druid/v2/",
                post(move |Json(body): Json<JsonValue>| {
                    let captured = captured.clone();
                    async move {
                        if body["queryType"] == "segmentMetadata" {
                            return Json(json!([{
                                "id": "merged",
                                "columns": {
                                    "__time": {"type": "LONG"},
                                    "page": {"type": "STRING"},
                                    "user_theta": {"type": "thetaSketch"}
                                }
                            }]));
                        }
                        *captured.lock().unwrap() = Some(body);
                        Json(json!([{
                            "timestamp": "2015-09-12T00:00:00.000Z",
                            "result": {"COUNT(DISTINCT user_theta)": 38164.49404386297}
                        }]))
                    }
                }),
            );
        let host = spawn(router).await;

        let args: Vec<String> = [
            "-h", host.as_str(),
            "--druid-context", r#"{"lol":1}"#,
            "-q", "SELECT COUNT(DISTINCT user_theta) FROM wikipedia",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let CliCommand::Run(config) = parse_args(&args, |_| None).unwrap() else {
            panic!("Expected run");
        };
        let client = DruidClient::new(&config.client_config()).unwrap();

        let text = run_query(&client, &config.query, &config.run_options())
            .await
            .unwrap();
        assert!(text.contains("38164.49404386297"));

        let body = sent.lock().unwrap().take().unwrap();
        assert_eq!(body["queryType"], "timeseries");
        assert_eq!(body["aggregations"][0]["type"], "thetaSketch");
        assert_eq!(body["aggregations"][0]["fieldName"], "user_theta");
        assert_eq!(body["postAggregations"][0]["type"], "thetaSketchEstimate");
        assert_eq!(body["postAggregations"][0]["name"], "COUNT(DISTINCT user_theta)");
        assert_eq!(body["context"]["lol"], 1);

        // Unknown columns fail before any query is sent
        let err = run_query(&client, "SELECT no_such_col FROM wikipedia", &config.run_options())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Plan(PlanError::UnknownColumn(_))));
        assert!(sent.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_constant_select_renders_box() {
        let router = Router::new().route(
            "/druid/v2/",
            post(|Json(body): Json<JsonValue>| async move {
                assert_eq!(body["dataSource"]["type"], "inline");
                Json(json!([{"timestamp": "1000-01-01T00:00:00.000Z", "result": {}}]))
            }),
        );
        let client = client(spawn(router).await);

        let text = run_query(&client, "SELECT 1+1", &options(OutputMode::Table))
            .await
            .unwrap();
        assert_eq!(text, "┌─────┐\n│ 1+1 │\n├─────┤\n│ 2   │\n└─────┘");
    }

    #[tokio::test]
    async fn test_topn_end_to_end() {
        let router = Router::new().route(
            "/druid/v2/",
            post(|Json(body): Json<JsonValue>| async move {
                assert_eq!(body["queryType"], "topN");
                assert_eq!(body["threshold"], 2);
                Json(json!([{
                    "timestamp": "2015-09-12T00:00:00.000Z",
                    "result": [
                        {"page": "User:Cyde", "Count": 255},
                        {"page": "Jeremy Corbyn", "Count": 241}
                    ]
                }]))
            }),
        );
        let client = client(spawn(router).await);

        let text = run_query(
            &client,
            "SELECT page, SUM(count) AS Count FROM wikipedia GROUP BY page ORDER BY Count DESC LIMIT 2",
            &options(OutputMode::Json),
        )
        .await
        .unwrap();
        let parsed: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(
            parsed,
            json!([
                {"page": "User:Cyde", "Count": 255},
                {"page": "Jeremy Corbyn", "Count": 241}
            ])
        );
    }

    #[tokio::test]
    async fn test_show_tables_json() {
        let router = Router::new().route(
            "/druid/v2/datasources",
            get(|| async { Json(json!(["wikipedia"])) }),
        );
        let client = client(spawn(router).await);

        let text = run_query(&client, "SHOW TABLES", &options(OutputMode::Json))
            .await
            .unwrap();
        let parsed: JsonValue = serde_json::from_str(&text).unwrap();
        let names: Vec<&str> = parsed
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["Tables_in_database"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["COLUMNS", "SCHEMATA", "TABLES", "wikipedia"]);
    }

    #[tokio::test]
    async fn test_empty_result_renders_nothing() {
        let router = Router::new().route("/druid/v2/", post(|| async { Json(json!([])) }));
        let client = client(spawn(router).await);

        let text = run_query(
            &client,
            "SELECT page, COUNT(*) FROM wikipedia WHERE page = 'nope' GROUP BY page",
            &options(OutputMode::Table),
        )
        .await
        .unwrap();
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn test_parse_error_makes_no_request() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().fallback(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Json(json!([]))
            }
        });
        let client = client(spawn(router).await);

        let err = run_query(&client, "SELEC oops", &options(OutputMode::Table))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Parse(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_introspection_rejects_unknown_column() {
        let router = Router::new()
            .route("/druid/v2/datasources", get(|| async { Json(json!(["wikipedia"])) }))
            .route(
                "/druid/v2/",
                post(|Json(body): Json<JsonValue>| async move {
                    assert_eq!(body["queryType"], "segmentMetadata");
                    Json(json!([{"id": "merged", "columns": {"page": {"type": "STRING"}}}]))
                }),
            );
        let client = client(spawn(router).await);
        let mut opts = options(OutputMode::Table);
        opts.introspect = true;

        let err = prepare_query(&client, "SELECT nope FROM wikipedia", &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Plan(PlanError::UnknownColumn(_))));

        let err = prepare_query(&client, "SELECT page FROM missing", &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Plan(PlanError::UnknownTable(_))));
    }

    #[tokio::test]
    async fn test_prepared_query_carries_context_overrides() {
        let client = client("127.0.0.1:1".into());
        let mut opts = options(OutputMode::Table);
        opts.compile.context_overrides = json!({"lol": 1}).as_object().unwrap().clone();

        let prepared = prepare_query(&client, "SELECT COUNT(*) FROM wikipedia", &opts)
            .await
            .unwrap();
        let native = &prepared.compiled().unwrap().native;
        assert!(native.to_pretty_json().unwrap().contains("\"lol\": 1"));
    }
}
