//! Result formatting: response normalization and rendering.

pub mod normalize;
pub mod render;

pub use normalize::normalize;
pub use render::{render, render_json, render_table};

use crate::druid::ResultLayout;

/// Rendering target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(OutputMode::Table),
            "json" => Ok(OutputMode::Json),
            other => Err(format!("unknown output format '{}', expected json or table", other)),
        }
    }
}

/// Normalize a raw response and render it
pub fn format(
    raw: &serde_json::Value,
    layout: &ResultLayout,
    mode: OutputMode,
) -> Result<String, FormatError> {
    let table = normalize(raw, layout)?;
    render(&table, mode)
}

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::druid::{ColumnSource, LayoutColumn, ResponseShape};
    use serde_json::json;

    #[test]
    fn test_output_mode_case_insensitive() {
        assert_eq!("JSON".parse::<OutputMode>().unwrap(), OutputMode::Json);
        assert_eq!("Table".parse::<OutputMode>().unwrap(), OutputMode::Table);
        assert!("csv".parse::<OutputMode>().is_err());
    }

    #[test]
    fn test_format_timestamp_constant_as_json() {
        let raw = json!([{"timestamp": "1000-01-01T00:00:00.000Z", "result": {}}]);
        let layout = ResultLayout::new(
            ResponseShape::Timeseries,
            vec![LayoutColumn::new(
                "T",
                ColumnSource::Constant(Value::Timestamp(1459756923000)),
            )],
        );
        let text = format(&raw, &layout, OutputMode::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            parsed,
            json!([{"T": {"type": "TIME", "value": "2016-04-04T08:02:03.000Z"}}])
        );
    }
}
