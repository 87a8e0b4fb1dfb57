//! druidql: SQL for Apache Druid brokers
//!
//! Compiles a read-only SQL subset into Druid native JSON queries, runs them
//! against a broker and prints the results as a box table or JSON.
//!
//! # Pipeline
//!
//! - **Parser**: SQL text to a [`query::Statement`]
//! - **Planner**: resolves names and types into a [`query::LogicalPlan`]
//! - **Compiler**: picks Scan, Timeseries, TopN or GroupBy and builds the native query
//! - **Client**: sends it to the broker with a deadline and bounded retries
//! - **Output**: normalizes every response shape into one ordered table
//!
//! # Example
//!
//! ```no_run
//! use druidql::client::{ClientConfig, DruidClient};
//! use druidql::druid::CompileOptions;
//! use druidql::output::OutputMode;
//! use druidql::query::{run_query, RunOptions};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), druidql::query::QueryError> {
//! let client = DruidClient::new(&ClientConfig::default())?;
//! let options = RunOptions {
//!     timezone: chrono_tz::Tz::UTC,
//!     compile: CompileOptions::default(),
//!     output: OutputMode::Table,
//!     introspect: true,
//!     deadline: tokio::time::Instant::now() + Duration::from_secs(60),
//! };
//! let text = run_query(&client, "SELECT page, COUNT(*) FROM wikipedia GROUP BY page", &options).await?;
//! println!("{}", text);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod data;
pub mod druid;
pub mod output;
pub mod query;

// Re-export commonly used types
pub use data::{ResultTable, Value};
pub use query::{run_query, QueryError, RunOptions};
