//! Druid native query model.
//!
//! Every type here serializes to the exact JSON the broker expects on
//! `POST /druid/v2/`.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::data::format_iso_millis;

/// Per-query context map, emitted verbatim
pub type QueryContext = serde_json::Map<String, serde_json::Value>;

/// Start of the all-time interval
pub const ETERNITY_START_MS: i64 = -30_610_224_000_000; // 1000-01-01T00:00:00Z
/// End of the all-time interval
pub const ETERNITY_END_MS: i64 = 32_503_680_000_000; // 3000-01-01T00:00:00Z

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "queryType", rename_all = "camelCase")]
pub enum NativeQuery {
    Scan(ScanQuery),
    Timeseries(TimeseriesQuery),
    #[serde(rename = "topN")]
    TopN(TopNQuery),
    GroupBy(GroupByQuery),
}

impl NativeQuery {
    pub fn query_type(&self) -> &'static str {
        match self {
            NativeQuery::Scan(_) => "scan",
            NativeQuery::Timeseries(_) => "timeseries",
            NativeQuery::TopN(_) => "topN",
            NativeQuery::GroupBy(_) => "groupBy",
        }
    }

    pub fn data_source(&self) -> &DataSource {
        match self {
            NativeQuery::Scan(q) => &q.data_source,
            NativeQuery::Timeseries(q) => &q.data_source,
            NativeQuery::TopN(q) => &q.data_source,
            NativeQuery::GroupBy(q) => &q.data_source,
        }
    }

    pub fn context(&self) -> &QueryContext {
        match self {
            NativeQuery::Scan(q) => &q.context,
            NativeQuery::Timeseries(q) => &q.context,
            NativeQuery::TopN(q) => &q.context,
            NativeQuery::GroupBy(q) => &q.context,
        }
    }

    /// Query id from the context, if set
    pub fn query_id(&self) -> Option<&str> {
        self.context().get("queryId").and_then(|v| v.as_str())
    }

    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanQuery {
    pub data_source: DataSource,
    pub intervals: Vec<Interval>,
    pub filter: Option<Filter>,
    /// Empty means every column
    pub columns: Vec<String>,
    pub result_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<ScanOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub context: QueryContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesQuery {
    pub data_source: DataSource,
    pub intervals: Vec<Interval>,
    pub granularity: Granularity,
    pub filter: Option<Filter>,
    pub aggregations: Vec<Aggregation>,
    pub post_aggregations: Vec<PostAggregation>,
    pub context: QueryContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopNQuery {
    pub data_source: DataSource,
    pub intervals: Vec<Interval>,
    pub granularity: Granularity,
    pub filter: Option<Filter>,
    pub dimension: DimensionSpec,
    pub metric: TopNMetric,
    pub threshold: usize,
    pub aggregations: Vec<Aggregation>,
    pub post_aggregations: Vec<PostAggregation>,
    pub context: QueryContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupByQuery {
    pub data_source: DataSource,
    pub intervals: Vec<Interval>,
    pub granularity: Granularity,
    pub filter: Option<Filter>,
    pub dimensions: Vec<DimensionSpec>,
    pub aggregations: Vec<Aggregation>,
    pub post_aggregations: Vec<PostAggregation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub having: Option<HavingSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_spec: Option<LimitSpec>,
    pub context: QueryContext,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    Table(String),
    /// Rows supplied with the query itself
    Inline {
        column_names: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    },
    /// Result of another native query
    Query(Box<NativeQuery>),
}

impl Serialize for DataSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DataSource::Table(name) => serializer.serialize_str(name),
            DataSource::Inline { column_names, rows } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "inline")?;
                map.serialize_entry("columnNames", column_names)?;
                map.serialize_entry("rows", rows)?;
                map.end()
            }
            DataSource::Query(query) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "query")?;
                map.serialize_entry("query", query)?;
                map.end()
            }
        }
    }
}

/// Half-open `[start, end)` interval in epoch millis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Interval {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn eternity() -> Self {
        Self::new(ETERNITY_START_MS, ETERNITY_END_MS)
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}",
            format_iso_millis(self.start_ms),
            format_iso_millis(self.end_ms)
        )
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Granularity {
    All,
    Period { period: String, time_zone: String },
}

impl Serialize for Granularity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Granularity::All => serializer.serialize_str("all"),
            Granularity::Period { period, time_zone } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "period")?;
                map.serialize_entry("period", period)?;
                map.serialize_entry("timeZone", time_zone)?;
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionSpec {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub dimension: String,
    pub output_name: String,
}

impl DimensionSpec {
    pub fn new(dimension: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            kind: "default",
            dimension: dimension.into(),
            output_name: output_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopNMetric {
    /// Highest values first
    Numeric(String),
    /// Lowest values first
    Inverted(String),
}

impl Serialize for TopNMetric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TopNMetric::Numeric(name) => serializer.serialize_str(name),
            TopNMetric::Inverted(name) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "inverted")?;
                map.serialize_entry("metric", name)?;
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Aggregation {
    Count {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    LongSum { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    DoubleSum { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    LongMin { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    DoubleMin { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    LongMax { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    DoubleMax { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    HyperUnique { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    ThetaSketch { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    Cardinality {
        name: String,
        fields: Vec<String>,
        by_row: bool,
    },
    /// Aggregate only rows matching `filter`
    Filtered {
        filter: Filter,
        aggregator: Box<Aggregation>,
    },
}

impl Aggregation {
    pub fn name(&self) -> &str {
        match self {
            Aggregation::Count { name }
            | Aggregation::LongSum { name, .. }
            | Aggregation::DoubleSum { name, .. }
            | Aggregation::LongMin { name, .. }
            | Aggregation::DoubleMin { name, .. }
            | Aggregation::LongMax { name, .. }
            | Aggregation::DoubleMax { name, .. }
            | Aggregation::HyperUnique { name, .. }
            | Aggregation::ThetaSketch { name, .. }
            | Aggregation::Cardinality { name, .. } => name,
            Aggregation::Filtered { aggregator, .. } => aggregator.name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PostAggregation {
    Arithmetic {
        name: String,
        #[serde(rename = "fn")]
        function: String,
        fields: Vec<PostAggregation>,
    },
    #[serde(rename_all = "camelCase")]
    FieldAccess { name: String, field_name: String },
    Constant {
        name: String,
        value: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    HyperUniqueCardinality { name: String, field_name: String },
    ThetaSketchEstimate {
        name: String,
        field: Box<PostAggregation>,
    },
}

impl PostAggregation {
    pub fn field_access(field_name: impl Into<String>) -> Self {
        let field_name = field_name.into();
        PostAggregation::FieldAccess {
            name: field_name.clone(),
            field_name,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PostAggregation::Arithmetic { name, .. }
            | PostAggregation::FieldAccess { name, .. }
            | PostAggregation::Constant { name, .. }
            | PostAggregation::HyperUniqueCardinality { name, .. }
            | PostAggregation::ThetaSketchEstimate { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Filter {
    /// `value: null` matches missing values
    Selector {
        dimension: String,
        value: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Bound {
        dimension: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        lower: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        upper: Option<String>,
        lower_strict: bool,
        upper_strict: bool,
        ordering: BoundOrdering,
    },
    In {
        dimension: String,
        values: Vec<Option<String>>,
    },
    Like {
        dimension: String,
        pattern: String,
    },
    And {
        fields: Vec<Filter>,
    },
    Or {
        fields: Vec<Filter>,
    },
    Not {
        field: Box<Filter>,
    },
}

impl Filter {
    pub fn selector(dimension: impl Into<String>, value: Option<String>) -> Self {
        Filter::Selector {
            dimension: dimension.into(),
            value,
        }
    }

    pub fn not(field: Filter) -> Self {
        Filter::Not {
            field: Box::new(field),
        }
    }

    /// Matches rows where `dimension` has a value
    pub fn not_null(dimension: impl Into<String>) -> Self {
        Filter::not(Filter::selector(dimension, None))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundOrdering {
    Numeric,
    Lexicographic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HavingSpec {
    Filter { filter: Filter },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitSpec {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub columns: Vec<OrderByColumnSpec>,
}

impl LimitSpec {
    pub fn new(limit: Option<usize>, columns: Vec<OrderByColumnSpec>) -> Self {
        Self {
            kind: "default",
            limit,
            columns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByColumnSpec {
    pub dimension: String,
    pub direction: &'static str,
    pub dimension_order: BoundOrdering,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eternity_interval() {
        assert_eq!(
            Interval::eternity().to_string(),
            "1000-01-01T00:00:00.000Z/3000-01-01T00:00:00.000Z"
        );
    }

    #[test]
    fn test_topn_serialization() {
        let query = NativeQuery::TopN(TopNQuery {
            data_source: DataSource::Table("wikipedia".into()),
            intervals: vec![Interval::new(0, 1000)],
            granularity: Granularity::All,
            filter: None,
            dimension: DimensionSpec::new("page", "page"),
            metric: TopNMetric::Inverted("Count".into()),
            threshold: 3,
            aggregations: vec![Aggregation::LongSum {
                name: "Count".into(),
                field_name: "count".into(),
            }],
            post_aggregations: vec![],
            context: QueryContext::new(),
        });
        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({
                "queryType": "topN",
                "dataSource": "wikipedia",
                "intervals": ["1970-01-01T00:00:00.000Z/1970-01-01T00:00:01.000Z"],
                "granularity": "all",
                "filter": null,
                "dimension": {"type": "default", "dimension": "page", "outputName": "page"},
                "metric": {"type": "inverted", "metric": "Count"},
                "threshold": 3,
                "aggregations": [{"type": "longSum", "name": "Count", "fieldName": "count"}],
                "postAggregations": [],
                "context": {}
            })
        );
    }

    #[test]
    fn test_filter_serialization() {
        let filter = Filter::And {
            fields: vec![
                Filter::not_null("user"),
                Filter::Bound {
                    dimension: "added".into(),
                    lower: Some("10".into()),
                    upper: None,
                    lower_strict: true,
                    upper_strict: false,
                    ordering: BoundOrdering::Numeric,
                },
            ],
        };
        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            json!({
                "type": "and",
                "fields": [
                    {"type": "not", "field": {"type": "selector", "dimension": "user", "value": null}},
                    {"type": "bound", "dimension": "added", "lower": "10",
                     "lowerStrict": true, "upperStrict": false, "ordering": "numeric"}
                ]
            })
        );
    }

    #[test]
    fn test_post_aggregation_serialization() {
        let post = PostAggregation::Arithmetic {
            name: "avg".into(),
            function: "/".into(),
            fields: vec![
                PostAggregation::field_access("avg:sum"),
                PostAggregation::HyperUniqueCardinality {
                    name: "u".into(),
                    field_name: "u:sketch".into(),
                },
            ],
        };
        assert_eq!(
            serde_json::to_value(&post).unwrap(),
            json!({
                "type": "arithmetic",
                "name": "avg",
                "fn": "/",
                "fields": [
                    {"type": "fieldAccess", "name": "avg:sum", "fieldName": "avg:sum"},
                    {"type": "hyperUniqueCardinality", "name": "u", "fieldName": "u:sketch"}
                ]
            })
        );
    }

    #[test]
    fn test_nested_query_datasource() {
        let inner = NativeQuery::Scan(ScanQuery {
            data_source: DataSource::Inline {
                column_names: vec!["ZERO".into()],
                rows: vec![vec![json!(0)]],
            },
            intervals: vec![Interval::eternity()],
            filter: None,
            columns: vec![],
            result_format: "list",
            order: None,
            limit: None,
            context: QueryContext::new(),
        });
        let ds = DataSource::Query(Box::new(inner));
        let json = serde_json::to_value(&ds).unwrap();
        assert_eq!(json["type"], "query");
        assert_eq!(json["query"]["queryType"], "scan");
        assert_eq!(json["query"]["dataSource"]["type"], "inline");
        assert_eq!(json["query"]["dataSource"]["columnNames"], json!(["ZERO"]));
    }

    #[test]
    fn test_period_granularity() {
        let g = Granularity::Period {
            period: "PT1H".into(),
            time_zone: "America/Los_Angeles".into(),
        };
        assert_eq!(
            serde_json::to_value(&g).unwrap(),
            json!({"type": "period", "period": "PT1H", "timeZone": "America/Los_Angeles"})
        );
    }
}
