//! Command-line configuration.
//!
//! Flags win over environment variables:
//! - DRUIDQL_HOST: broker `host:port` (default: localhost:8082)
//! - DRUIDQL_TIMEZONE: IANA zone for time literals and buckets (default: UTC)
//! - DRUIDQL_TIMEOUT_MS: query deadline in milliseconds (default: 60000)

use chrono_tz::Tz;
use std::time::Duration;
use tokio::time::Instant;

use crate::client::{ClientConfig, RetryPolicy};
use crate::druid::context::{DEFAULT_CHUNK_PERIOD, DEFAULT_TIMEOUT_MS};
use crate::druid::{CompileOptions, QueryContext};
use crate::output::OutputMode;
use crate::query::RunOptions;

pub const USAGE: &str = "\
Usage: druidql -q <SQL> [options]

Options:
  -h, --host <host:port>      Broker to query (env DRUIDQL_HOST, default localhost:8082)
  -q, --query <SQL>           Query to run
  -o, --output <json|table>   Output format (default table)
  -Z, --timezone <zone>       IANA timezone (env DRUIDQL_TIMEZONE, default UTC)
  -v, --verbose               Print the native query before the results
      --druid-context <JSON>  Extra context entries, a JSON object
      --timeout <ms>          Query deadline (env DRUIDQL_TIMEOUT_MS, default 60000)
      --retries <n>           Retries for transient broker failures (default 2)
      --no-introspect         Skip the schema lookup; accept any table and column
      --exact-count-distinct  Compute COUNT(DISTINCT) exactly
      --help                  Show this message";

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub host: String,
    pub query: String,
    pub output: OutputMode,
    pub timezone: Tz,
    pub verbose: bool,
    pub context: QueryContext,
    pub timeout_ms: u64,
    pub retries: u32,
    pub introspect: bool,
    pub exact_count_distinct: bool,
}

/// What the command line asks for
#[derive(Debug, Clone)]
pub enum CliCommand {
    Run(CliConfig),
    Help,
}

impl CliConfig {
    /// Parse the process arguments and environment
    pub fn from_env() -> Result<CliCommand, ConfigError> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        parse_args(&args, |key| std::env::var(key).ok())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            retry: RetryPolicy::with_retries(self.retries),
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            chunk_period: DEFAULT_CHUNK_PERIOD.to_string(),
            timeout_ms: self.timeout_ms,
            context_overrides: self.context.clone(),
            exact_count_distinct: self.exact_count_distinct,
        }
    }

    /// Options for one run; the deadline starts now
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            timezone: self.timezone,
            compile: self.compile_options(),
            output: self.output,
            introspect: self.introspect,
            deadline: Instant::now() + Duration::from_millis(self.timeout_ms),
        }
    }
}

/// Parse arguments (without the program name), reading fallbacks through `env`
pub fn parse_args<F>(args: &[String], env: F) -> Result<CliCommand, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut host = env("DRUIDQL_HOST").unwrap_or_else(|| "localhost:8082".to_string());
    let mut query = None;
    let mut output = OutputMode::Table;
    let mut timezone = match env("DRUIDQL_TIMEZONE") {
        Some(zone) => parse_timezone("DRUIDQL_TIMEZONE", &zone)?,
        None => Tz::UTC,
    };
    let mut verbose = false;
    let mut context = QueryContext::new();
    let mut timeout_ms = match env("DRUIDQL_TIMEOUT_MS") {
        Some(ms) => parse_number("DRUIDQL_TIMEOUT_MS", &ms)?,
        None => DEFAULT_TIMEOUT_MS,
    };
    let mut retries: u32 = 2;
    let mut introspect = true;
    let mut exact_count_distinct = false;

    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
        };
        match flag {
            "-h" | "--host" => host = value()?,
            "-q" | "--query" => query = Some(value()?),
            "-o" | "--output" => {
                output = value()?
                    .parse()
                    .map_err(|message| ConfigError::InvalidValue {
                        flag: flag.to_string(),
                        message,
                    })?
            }
            "-Z" | "--timezone" => timezone = parse_timezone(flag, &value()?)?,
            "-v" | "--verbose" => verbose = true,
            "--druid-context" => context = parse_context(&value()?)?,
            "--timeout" => timeout_ms = parse_number(flag, &value()?)?,
            "--retries" => retries = parse_number(flag, &value()?)?,
            "--introspect" => introspect = true,
            "--no-introspect" => introspect = false,
            "--exact-count-distinct" => exact_count_distinct = true,
            "--help" => return Ok(CliCommand::Help),
            other => return Err(ConfigError::UnknownArgument(other.to_string())),
        }
        i += 1;
    }

    let query = query
        .filter(|q| !q.trim().is_empty())
        .ok_or(ConfigError::MissingQuery)?;

    Ok(CliCommand::Run(CliConfig {
        host,
        query,
        output,
        timezone,
        verbose,
        context,
        timeout_ms,
        retries,
        introspect,
        exact_count_distinct,
    }))
}

fn parse_timezone(flag: &str, zone: &str) -> Result<Tz, ConfigError> {
    zone.parse::<Tz>().map_err(|e| ConfigError::InvalidValue {
        flag: flag.to_string(),
        message: e.to_string(),
    })
}

fn parse_number<T: std::str::FromStr>(flag: &str, text: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    text.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        flag: flag.to_string(),
        message: e.to_string(),
    })
}

/// Context overrides must be a JSON object
pub fn parse_context(text: &str) -> Result<QueryContext, ConfigError> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(ConfigError::InvalidContext("expected a JSON object".into())),
        Err(e) => Err(ConfigError::InvalidContext(e.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing value for {0}")]
    MissingValue(String),

    #[error("Unknown argument: {0}")]
    UnknownArgument(String),

    #[error("Invalid value for {flag}: {message}")]
    InvalidValue { flag: String, message: String },

    #[error("No query given, use -q <SQL>")]
    MissingQuery,

    #[error("Invalid --druid-context: {0}")]
    InvalidContext(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn parse(list: &[&str]) -> Result<CliCommand, ConfigError> {
        parse_args(&args(list), |_| None)
    }

    fn run_config(list: &[&str]) -> CliConfig {
        match parse(list).unwrap() {
            CliCommand::Run(config) => config,
            CliCommand::Help => panic!("Expected run"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = run_config(&["-q", "SELECT 1+1"]);
        assert_eq!(config.host, "localhost:8082");
        assert_eq!(config.output, OutputMode::Table);
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.timeout_ms, 60_000);
        assert_eq!(config.retries, 2);
        assert!(!config.verbose);
        assert!(config.context.is_empty());
        assert!(config.introspect);
        assert!(config.run_options().introspect);
    }

    #[test]
    fn test_no_introspect_opts_out() {
        let config = run_config(&["-q", "SELECT 1", "--no-introspect"]);
        assert!(!config.introspect);
    }

    #[test]
    fn test_all_flags() {
        let config = run_config(&[
            "-h", "broker:8082", "-o", "JSON", "-Z", "America/Los_Angeles", "-v",
            "--druid-context", r#"{"lol":1}"#, "--timeout", "500", "--retries", "0",
            "--introspect", "--exact-count-distinct", "--query", "SHOW TABLES",
        ]);
        assert_eq!(config.host, "broker:8082");
        assert_eq!(config.output, OutputMode::Json);
        assert_eq!(config.timezone, chrono_tz::America::Los_Angeles);
        assert!(config.verbose);
        assert_eq!(config.context["lol"], json!(1));
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.client_config().retry.max_attempts, 1);
        assert!(config.introspect);
        assert!(config.compile_options().exact_count_distinct);
        assert_eq!(config.query, "SHOW TABLES");
    }

    #[test]
    fn test_environment_fallbacks() {
        let env: HashMap<&str, &str> = [
            ("DRUIDQL_HOST", "envhost:9000"),
            ("DRUIDQL_TIMEZONE", "Europe/Berlin"),
            ("DRUIDQL_TIMEOUT_MS", "1234"),
        ]
        .into_iter()
        .collect();
        let command = parse_args(&args(&["-q", "SELECT 1"]), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();
        let CliCommand::Run(config) = command else {
            panic!("Expected run");
        };
        assert_eq!(config.host, "envhost:9000");
        assert_eq!(config.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(config.timeout_ms, 1234);

        // Flags win over the environment
        let command = parse_args(&args(&["-q", "SELECT 1", "-h", "flaghost:1"]), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();
        let CliCommand::Run(config) = command else {
            panic!("Expected run");
        };
        assert_eq!(config.host, "flaghost:1");
    }

    #[test]
    fn test_context_must_be_object() {
        assert!(matches!(
            parse(&["-q", "SELECT 1", "--druid-context", "[1,2]"]),
            Err(ConfigError::InvalidContext(_))
        ));
        assert!(matches!(
            parse(&["-q", "SELECT 1", "--druid-context", "{nope"]),
            Err(ConfigError::InvalidContext(_))
        ));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse(&[]), Err(ConfigError::MissingQuery)));
        assert!(matches!(parse(&["-q"]), Err(ConfigError::MissingValue(f)) if f == "-q"));
        assert!(matches!(
            parse(&["-q", "SELECT 1", "--bogus"]),
            Err(ConfigError::UnknownArgument(_))
        ));
        assert!(matches!(
            parse(&["-q", "SELECT 1", "-Z", "Mars/Olympus"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse(&["-q", "SELECT 1", "-o", "csv"]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_help() {
        assert!(matches!(parse(&["--help"]), Ok(CliCommand::Help)));
    }
}
