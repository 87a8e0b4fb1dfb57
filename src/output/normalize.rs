//! Reads every response envelope back into one ordered table.

use serde_json::{Map, Value as JsonValue};

use super::FormatError;
use crate::data::{ResultTable, Value};
use crate::druid::{ColumnSource, LayoutColumn, ResponseShape, ResultLayout};
use crate::query::schema::TIME_COLUMN;

/// One result row and the bucket it belongs to
struct RawRow<'a> {
    bucket: Option<&'a JsonValue>,
    fields: &'a Map<String, JsonValue>,
}

pub fn normalize(raw: &JsonValue, layout: &ResultLayout) -> Result<ResultTable, FormatError> {
    let entries = raw
        .as_array()
        .ok_or_else(|| FormatError::UnexpectedShape("expected a JSON array".into()))?;

    let rows = collect_rows(entries, layout.shape)?;
    let columns = expand_columns(&layout.columns, entries, layout.shape, &rows);

    let mut table = ResultTable::new(columns.iter().map(|c| c.name.clone()).collect());
    for row in &rows {
        table.rows.push(
            columns
                .iter()
                .map(|column| read_value(&column.source, row))
                .collect(),
        );
    }

    if !layout.sort.is_empty() {
        table.sort_by_columns(&layout.sort);
    }
    if let Some(limit) = layout.limit {
        table.truncate(limit);
    }
    Ok(table)
}

fn collect_rows(entries: &[JsonValue], shape: ResponseShape) -> Result<Vec<RawRow<'_>>, FormatError> {
    let mut rows = Vec::new();
    for entry in entries {
        let entry = as_object(entry, "result entry")?;
        let bucket = entry.get("timestamp");
        match shape {
            ResponseShape::Scan => {
                let events = entry
                    .get("events")
                    .and_then(|e| e.as_array())
                    .ok_or_else(|| FormatError::UnexpectedShape("scan entry without events".into()))?;
                for event in events {
                    rows.push(RawRow {
                        bucket: None,
                        fields: as_object(event, "scan event")?,
                    });
                }
            }
            ResponseShape::Timeseries => rows.push(RawRow {
                bucket,
                fields: as_object(field(entry, "result")?, "timeseries result")?,
            }),
            ResponseShape::TopN => {
                let results = field(entry, "result")?
                    .as_array()
                    .ok_or_else(|| FormatError::UnexpectedShape("topN result is not an array".into()))?;
                for result in results {
                    rows.push(RawRow {
                        bucket,
                        fields: as_object(result, "topN row")?,
                    });
                }
            }
            ResponseShape::GroupBy => rows.push(RawRow {
                bucket,
                fields: as_object(field(entry, "event")?, "groupBy event")?,
            }),
            ResponseShape::Rows => rows.push(RawRow {
                bucket: None,
                fields: entry,
            }),
        }
    }
    Ok(rows)
}

/// Replace `*` with the columns the store reported
fn expand_columns(
    columns: &[LayoutColumn],
    entries: &[JsonValue],
    shape: ResponseShape,
    rows: &[RawRow<'_>],
) -> Vec<LayoutColumn> {
    if !columns.iter().any(|c| c.source == ColumnSource::Wildcard) {
        return columns.to_vec();
    }

    let reported: Vec<String> = entries
        .first()
        .filter(|_| shape == ResponseShape::Scan)
        .and_then(|e| e.get("columns"))
        .and_then(|c| c.as_array())
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()
        })
        .or_else(|| rows.first().map(|r| r.fields.keys().cloned().collect()))
        .unwrap_or_default();

    let mut expanded = Vec::new();
    for column in columns {
        if column.source != ColumnSource::Wildcard {
            expanded.push(column.clone());
            continue;
        }
        for name in &reported {
            let source = if name == TIME_COLUMN {
                ColumnSource::TimeField(name.clone())
            } else {
                ColumnSource::Field(name.clone())
            };
            expanded.push(LayoutColumn::new(name, source));
        }
    }
    expanded
}

fn read_value(source: &ColumnSource, row: &RawRow<'_>) -> Value {
    match source {
        ColumnSource::Field(name) => row.fields.get(name).map(Value::from_json).unwrap_or_default(),
        ColumnSource::TimeField(name) => row
            .fields
            .get(name)
            .map(Value::time_from_json)
            .unwrap_or_default(),
        ColumnSource::BucketTimestamp => row.bucket.map(Value::time_from_json).unwrap_or_default(),
        ColumnSource::Constant(value) => value.clone(),
        ColumnSource::Wildcard => Value::Null,
    }
}

fn field<'a>(entry: &'a Map<String, JsonValue>, key: &str) -> Result<&'a JsonValue, FormatError> {
    entry
        .get(key)
        .ok_or_else(|| FormatError::UnexpectedShape(format!("entry without {}", key)))
}

fn as_object<'a>(value: &'a JsonValue, what: &str) -> Result<&'a Map<String, JsonValue>, FormatError> {
    value
        .as_object()
        .ok_or_else(|| FormatError::UnexpectedShape(format!("{} is not an object", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SortColumn;
    use serde_json::json;

    fn layout(shape: ResponseShape, columns: Vec<LayoutColumn>) -> ResultLayout {
        ResultLayout::new(shape, columns)
    }

    #[test]
    fn test_topn_rows_in_select_order() {
        let raw = json!([{
            "timestamp": "2015-09-12T00:00:00.000Z",
            "result": [
                {"Count": 255, "page": "User:Cyde"},
                {"Count": 241, "page": "Jeremy Corbyn"}
            ]
        }]);
        let layout = layout(
            ResponseShape::TopN,
            vec![LayoutColumn::field("page", "page"), LayoutColumn::field("Count", "Count")],
        );
        let table = normalize(&raw, &layout).unwrap();
        assert_eq!(table.columns, vec!["page", "Count"]);
        assert_eq!(table.rows[0], vec![Value::String("User:Cyde".into()), Value::Int64(255)]);
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_constant_timeseries() {
        let raw = json!([{"timestamp": "1000-01-01T00:00:00.000Z", "result": {}}]);
        let layout = layout(
            ResponseShape::Timeseries,
            vec![LayoutColumn::new("1+1", ColumnSource::Constant(Value::Int64(2)))],
        );
        let table = normalize(&raw, &layout).unwrap();
        assert_eq!(table.rows, vec![vec![Value::Int64(2)]]);
    }

    #[test]
    fn test_groupby_bucket_and_client_sort() {
        let raw = json!([
            {"timestamp": "2015-09-12T00:00:00.000Z", "event": {"n": 5}},
            {"timestamp": "2015-09-12T01:00:00.000Z", "event": {"n": 9}},
            {"timestamp": "2015-09-12T02:00:00.000Z", "event": {"n": 1}}
        ]);
        let layout = layout(
            ResponseShape::GroupBy,
            vec![
                LayoutColumn::new("hour", ColumnSource::BucketTimestamp),
                LayoutColumn::field("n", "n"),
            ],
        )
        .with_sort(
            vec![SortColumn {
                column: "hour".into(),
                descending: true,
            }],
            Some(2),
        );
        let table = normalize(&raw, &layout).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.get(0, "n"), Some(&Value::Int64(1)));
        assert!(matches!(table.get(0, "hour"), Some(Value::Timestamp(_))));
    }

    #[test]
    fn test_scan_wildcard_uses_reported_columns() {
        let raw = json!([{
            "segmentId": "wikipedia_2015",
            "columns": ["__time", "page", "added"],
            "events": [{"__time": 1442016000000i64, "page": "Main", "added": 3}]
        }]);
        let layout = layout(
            ResponseShape::Scan,
            vec![LayoutColumn::new("*", ColumnSource::Wildcard)],
        );
        let table = normalize(&raw, &layout).unwrap();
        assert_eq!(table.columns, vec!["__time", "page", "added"]);
        assert_eq!(table.rows[0][0], Value::Timestamp(1442016000000));
    }

    #[test]
    fn test_empty_response() {
        let layout = layout(ResponseShape::GroupBy, vec![LayoutColumn::field("page", "page")]);
        let table = normalize(&json!([]), &layout).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns, vec!["page"]);
    }

    #[test]
    fn test_missing_field_is_null() {
        let raw = json!([{"timestamp": "2015-09-12T00:00:00.000Z", "event": {"page": "Main"}}]);
        let layout = layout(
            ResponseShape::GroupBy,
            vec![LayoutColumn::field("page", "page"), LayoutColumn::field("user", "user")],
        );
        let table = normalize(&raw, &layout).unwrap();
        assert_eq!(table.rows[0][1], Value::Null);
    }

    #[test]
    fn test_unexpected_shape() {
        let layout = layout(ResponseShape::Timeseries, vec![]);
        assert!(matches!(
            normalize(&json!({"error": "x"}), &layout),
            Err(FormatError::UnexpectedShape(_))
        ));
        assert!(normalize(&json!([{"timestamp": "x"}]), &layout).is_err());
    }
}
