//! druidql command line
//!
//! Run with: druidql -q "SELECT page, COUNT(*) FROM wikipedia GROUP BY page"
//!
//! Environment variables:
//! - DRUIDQL_HOST: Broker address (default: localhost:8082)
//! - DRUIDQL_TIMEZONE: Timezone for time literals and buckets (default: UTC)
//! - DRUIDQL_TIMEOUT_MS: Query deadline (default: 60000)
//! - RUST_LOG: Log level, written to stderr (default: druidql=warn)

use std::process::ExitCode;

use druidql::client::DruidClient;
use druidql::config::{CliCommand, CliConfig, USAGE};
use druidql::output::FormatError;
use druidql::query::{execute_prepared, prepare_query, QueryError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout carries only results
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "druidql=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match CliConfig::from_env() {
        Ok(CliCommand::Run(config)) => config,
        Ok(CliCommand::Help) => {
            println!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &CliConfig) -> Result<(), QueryError> {
    let client = DruidClient::new(&config.client_config())?;
    let options = config.run_options();
    tracing::debug!(host = %config.host, timezone = %config.timezone, "Running query");

    let prepared = prepare_query(&client, &config.query, &options).await?;
    if config.verbose {
        if let Some(compiled) = prepared.compiled() {
            let native = compiled.native.to_pretty_json().map_err(FormatError::from)?;
            println!("{}", native);
        }
    }

    let rendered = execute_prepared(&client, &prepared, &options).await?;
    println!("{}", rendered);
    Ok(())
}
