//! Native query compilation.
//!
//! Variant selection, first match wins:
//! 1. no aggregation: Scan
//! 2. aggregation without grouping dimensions: Timeseries
//! 3. one dimension, no time bucket, no HAVING, a limit and a single sort
//!    key on an aggregate: TopN
//! 4. anything else: GroupBy

use chrono_tz::Tz;
use tracing::debug;

use super::context::{build_context, DEFAULT_CHUNK_PERIOD, DEFAULT_TIMEOUT_MS};
use super::filter::{compile_filter, compile_where};
use super::layout::{ColumnSource, LayoutColumn, ResponseShape, ResultLayout};
use super::native::{
    Aggregation, BoundOrdering, DataSource, DimensionSpec, Filter, GroupByQuery, Granularity,
    HavingSpec, Interval, LimitSpec, NativeQuery, OrderByColumnSpec, PostAggregation,
    QueryContext, ScanOrder, ScanQuery, TimeseriesQuery, TopNMetric, TopNQuery,
};
use crate::data::{SortColumn, Value};
use crate::query::parser::AggregateFunction;
use crate::query::planner::{
    AggregateCall, AggregateStage, GroupKey, LogicalPlan, Measure, MeasureExpr, OutputKind,
    SortTarget, Source,
};
use crate::query::schema::ColumnType;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
const WEEK_MS: i64 = 7 * DAY_MS;

/// Compilation settings
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Default `chunkPeriod` context entry
    pub chunk_period: String,
    /// Default `timeout` context entry
    pub timeout_ms: u64,
    /// Caller context entries; each wins over the default of the same key
    pub context_overrides: QueryContext,
    /// Compile COUNT(DISTINCT) to a nested exact query
    pub exact_count_distinct: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            chunk_period: DEFAULT_CHUNK_PERIOD.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            context_overrides: QueryContext::new(),
            exact_count_distinct: false,
        }
    }
}

/// A native query plus how to read its response
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub native: NativeQuery,
    pub layout: ResultLayout,
}

/// Parts shared by every variant
struct QueryBase {
    data_source: DataSource,
    intervals: Vec<Interval>,
    filter: Option<Filter>,
    context: QueryContext,
}

pub fn compile(plan: &LogicalPlan, options: &CompileOptions) -> Result<CompiledQuery, CompileError> {
    reject_unsupported(plan)?;

    let data_source = match &plan.source {
        Source::Table(name) => DataSource::Table(name.clone()),
        Source::Constant => single_row(),
        Source::Unsupported(construct) => return Err(CompileError::Unsupported(construct.to_string())),
    };
    let compiled_where = compile_where(plan.filter.as_ref())?;
    let base = QueryBase {
        data_source,
        intervals: vec![compiled_where.interval],
        filter: compiled_where.filter,
        context: build_context(&options.chunk_period, options.timeout_ms, &options.context_overrides),
    };

    let compiled = match &plan.aggregate {
        None if plan.source == Source::Constant => compile_constant(plan, base),
        None => compile_scan(plan, base),
        Some(stage) if options.exact_count_distinct && has_count_distinct(stage) => {
            compile_exact_distinct(plan, stage, base)?
        }
        Some(stage) => compile_aggregate(plan, stage, base)?,
    };

    debug!(
        query_type = compiled.native.query_type(),
        query_id = compiled.native.query_id().unwrap_or_default(),
        "Compiled native query"
    );
    Ok(compiled)
}

fn reject_unsupported(plan: &LogicalPlan) -> Result<(), CompileError> {
    if let Source::Unsupported(construct) = &plan.source {
        return Err(CompileError::Unsupported(construct.to_string()));
    }
    for column in &plan.columns {
        if let OutputKind::Unsupported(construct) = &column.kind {
            return Err(CompileError::Unsupported(construct.to_string()));
        }
    }
    if let Some(stage) = &plan.aggregate {
        for measure in &stage.measures {
            check_measure(&measure.expr)?;
        }
    }
    Ok(())
}

fn check_measure(expr: &MeasureExpr) -> Result<(), CompileError> {
    match expr {
        MeasureExpr::Unsupported(construct) => Err(CompileError::Unsupported(construct.to_string())),
        MeasureExpr::Arithmetic { left, right, .. } => {
            check_measure(left)?;
            check_measure(right)
        }
        MeasureExpr::Aggregate(_) | MeasureExpr::Constant(_) => Ok(()),
    }
}

/// One-row inline datasource backing selects without FROM
fn single_row() -> DataSource {
    DataSource::Inline {
        column_names: vec!["ZERO".to_string()],
        rows: vec![vec![serde_json::Value::from(0)]],
    }
}

fn compile_constant(plan: &LogicalPlan, base: QueryBase) -> CompiledQuery {
    let columns = plan
        .columns
        .iter()
        .map(|c| match &c.kind {
            OutputKind::Constant(value) => LayoutColumn::new(&c.name, ColumnSource::Constant(value.clone())),
            _ => LayoutColumn::new(&c.name, ColumnSource::Constant(Value::Null)),
        })
        .collect();

    let native = NativeQuery::Timeseries(TimeseriesQuery {
        data_source: base.data_source,
        intervals: base.intervals,
        granularity: Granularity::All,
        filter: base.filter,
        aggregations: Vec::new(),
        post_aggregations: Vec::new(),
        context: base.context,
    });
    CompiledQuery {
        native,
        layout: ResultLayout::new(ResponseShape::Timeseries, columns)
            .with_sort(sort_columns(plan), plan.limit),
    }
}

fn compile_scan(plan: &LogicalPlan, base: QueryBase) -> CompiledQuery {
    let wildcard = plan
        .columns
        .iter()
        .any(|c| matches!(c.kind, OutputKind::Wildcard));

    let mut columns: Vec<String> = Vec::new();
    let mut layout_columns = Vec::with_capacity(plan.columns.len());
    for column in &plan.columns {
        let source = match &column.kind {
            OutputKind::Column(col) => {
                if !columns.contains(&col.name) {
                    columns.push(col.name.clone());
                }
                if col.is_time() {
                    ColumnSource::TimeField(col.name.clone())
                } else {
                    ColumnSource::Field(col.name.clone())
                }
            }
            OutputKind::Constant(value) => ColumnSource::Constant(value.clone()),
            _ => ColumnSource::Wildcard,
        };
        layout_columns.push(LayoutColumn::new(&column.name, source));
    }
    if wildcard {
        columns.clear();
    }

    // Scans order natively by time only
    let (order, limit, layout) = match plan.sort.as_slice() {
        [] => (
            None,
            plan.limit,
            ResultLayout::new(ResponseShape::Scan, layout_columns),
        ),
        [key] if key.target == SortTarget::Time => (
            Some(if key.descending {
                ScanOrder::Descending
            } else {
                ScanOrder::Ascending
            }),
            plan.limit,
            ResultLayout::new(ResponseShape::Scan, layout_columns),
        ),
        _ => (
            None,
            None,
            ResultLayout::new(ResponseShape::Scan, layout_columns)
                .with_sort(sort_columns(plan), plan.limit),
        ),
    };

    let native = NativeQuery::Scan(ScanQuery {
        data_source: base.data_source,
        intervals: base.intervals,
        filter: base.filter,
        columns,
        result_format: "list",
        order,
        limit,
        context: base.context,
    });
    CompiledQuery { native, layout }
}

fn compile_aggregate(
    plan: &LogicalPlan,
    stage: &AggregateStage,
    base: QueryBase,
) -> Result<CompiledQuery, CompileError> {
    let mut measures = MeasureCompiler::default();
    for measure in &stage.measures {
        measures.add(measure)?;
    }
    let granularity = granularity(stage.time_bucket(), plan.timezone)?;
    let layout_columns = aggregate_layout(plan, stage);
    let dimensions = stage.dimensions();

    if dimensions.is_empty() && stage.having.is_none() {
        let native = NativeQuery::Timeseries(TimeseriesQuery {
            data_source: base.data_source,
            intervals: base.intervals,
            granularity,
            filter: base.filter,
            aggregations: measures.aggregations,
            post_aggregations: measures.post_aggregations,
            context: base.context,
        });
        return Ok(CompiledQuery {
            native,
            layout: ResultLayout::new(ResponseShape::Timeseries, layout_columns)
                .with_sort(sort_columns(plan), plan.limit),
        });
    }

    if let (Some(threshold), true) = (plan.limit, is_topn(plan, stage)) {
        let (column, output_name) = dimensions[0];
        let key = &plan.sort[0];
        let metric_name = druid_field(plan, stage, &key.column).unwrap_or_else(|| key.column.clone());
        let metric = if key.descending {
            TopNMetric::Numeric(metric_name)
        } else {
            TopNMetric::Inverted(metric_name)
        };
        let native = NativeQuery::TopN(TopNQuery {
            data_source: base.data_source,
            intervals: base.intervals,
            granularity,
            filter: base.filter,
            dimension: DimensionSpec::new(&column.name, output_name),
            metric,
            threshold,
            aggregations: measures.aggregations,
            post_aggregations: measures.post_aggregations,
            context: base.context,
        });
        return Ok(CompiledQuery {
            native,
            layout: ResultLayout::new(ResponseShape::TopN, layout_columns),
        });
    }

    let dimension_specs = dimensions
        .iter()
        .map(|(column, output_name)| DimensionSpec::new(&column.name, *output_name))
        .collect();
    group_by(
        plan,
        stage,
        base,
        granularity,
        dimension_specs,
        measures,
        layout_columns,
    )
}

fn is_topn(plan: &LogicalPlan, stage: &AggregateStage) -> bool {
    stage.dimensions().len() == 1
        && stage.time_bucket().is_none()
        && stage.having.is_none()
        && plan.limit.is_some()
        && plan.sort.len() == 1
        && plan.sort[0].target == SortTarget::Measure
}

fn group_by(
    plan: &LogicalPlan,
    stage: &AggregateStage,
    base: QueryBase,
    granularity: Granularity,
    dimensions: Vec<DimensionSpec>,
    measures: MeasureCompiler,
    layout_columns: Vec<LayoutColumn>,
) -> Result<CompiledQuery, CompileError> {
    let having = stage
        .having
        .as_ref()
        .map(compile_filter)
        .transpose()?
        .map(|filter| HavingSpec::Filter { filter });

    let native_sort = plan
        .sort
        .iter()
        .all(|k| matches!(k.target, SortTarget::Measure | SortTarget::Dimension));

    let mut layout = ResultLayout::new(ResponseShape::GroupBy, layout_columns);
    let limit_spec = if !native_sort {
        layout = layout.with_sort(sort_columns(plan), plan.limit);
        None
    } else if plan.sort.is_empty() && plan.limit.is_none() {
        None
    } else {
        let columns = plan
            .sort
            .iter()
            .map(|key| OrderByColumnSpec {
                dimension: druid_field(plan, stage, &key.column).unwrap_or_else(|| key.column.clone()),
                direction: if key.descending { "descending" } else { "ascending" },
                dimension_order: sort_ordering(plan, stage, &key.column),
            })
            .collect();
        Some(LimitSpec::new(plan.limit, columns))
    };

    let native = NativeQuery::GroupBy(GroupByQuery {
        data_source: base.data_source,
        intervals: base.intervals,
        granularity,
        filter: base.filter,
        dimensions,
        aggregations: measures.aggregations,
        post_aggregations: measures.post_aggregations,
        having,
        limit_spec,
        context: base.context,
    });
    Ok(CompiledQuery { native, layout })
}

/// Exact distinct count: group on the grouping columns plus the counted
/// column, then count the groups.
fn compile_exact_distinct(
    plan: &LogicalPlan,
    stage: &AggregateStage,
    base: QueryBase,
) -> Result<CompiledQuery, CompileError> {
    let [Measure {
        name,
        expr:
            MeasureExpr::Aggregate(AggregateCall {
                function: AggregateFunction::CountDistinct,
                column: Some(counted),
            }),
    }] = stage.measures.as_slice()
    else {
        return Err(CompileError::ExactDistinctWithOtherAggregates);
    };

    let granularity = granularity(stage.time_bucket(), plan.timezone)?;
    let dimensions = stage.dimensions();

    let mut inner_dimensions: Vec<DimensionSpec> = dimensions
        .iter()
        .map(|(column, output_name)| DimensionSpec::new(&column.name, *output_name))
        .collect();
    inner_dimensions.push(DimensionSpec::new(&counted.name, &counted.name));

    let not_null = Filter::not_null(&counted.name);
    let inner_filter = match base.filter {
        Some(Filter::And { mut fields }) => {
            fields.push(not_null);
            Filter::And { fields }
        }
        Some(other) => Filter::And {
            fields: vec![other, not_null],
        },
        None => not_null,
    };

    let inner = NativeQuery::GroupBy(GroupByQuery {
        data_source: base.data_source,
        intervals: base.intervals.clone(),
        granularity: granularity.clone(),
        filter: Some(inner_filter),
        dimensions: inner_dimensions,
        aggregations: Vec::new(),
        post_aggregations: Vec::new(),
        having: None,
        limit_spec: None,
        context: base.context.clone(),
    });

    let outer = QueryBase {
        data_source: DataSource::Query(Box::new(inner)),
        intervals: base.intervals,
        filter: None,
        context: base.context,
    };
    let measures = MeasureCompiler {
        aggregations: vec![Aggregation::Count { name: name.clone() }],
        post_aggregations: Vec::new(),
    };
    let layout_columns = aggregate_layout(plan, stage);

    if dimensions.is_empty() && stage.having.is_none() {
        let native = NativeQuery::Timeseries(TimeseriesQuery {
            data_source: outer.data_source,
            intervals: outer.intervals,
            granularity,
            filter: None,
            aggregations: measures.aggregations,
            post_aggregations: measures.post_aggregations,
            context: outer.context,
        });
        return Ok(CompiledQuery {
            native,
            layout: ResultLayout::new(ResponseShape::Timeseries, layout_columns)
                .with_sort(sort_columns(plan), plan.limit),
        });
    }

    // The outer query groups on the inner query's output names
    let outer_dimensions = dimensions
        .iter()
        .map(|(_, output_name)| DimensionSpec::new(*output_name, *output_name))
        .collect();
    group_by(
        plan,
        stage,
        outer,
        granularity,
        outer_dimensions,
        measures,
        layout_columns,
    )
}

fn has_count_distinct(stage: &AggregateStage) -> bool {
    fn walk(expr: &MeasureExpr) -> bool {
        match expr {
            MeasureExpr::Aggregate(call) => call.function == AggregateFunction::CountDistinct,
            MeasureExpr::Arithmetic { left, right, .. } => walk(left) || walk(right),
            _ => false,
        }
    }
    stage.measures.iter().any(|m| walk(&m.expr))
}

fn aggregate_layout(plan: &LogicalPlan, stage: &AggregateStage) -> Vec<LayoutColumn> {
    plan.columns
        .iter()
        .map(|column| {
            let source = match &column.kind {
                OutputKind::GroupKey(idx) => match &stage.group_by[*idx] {
                    GroupKey::Dimension {
                        column,
                        output_name,
                    } if column.is_time() => ColumnSource::TimeField(output_name.clone()),
                    GroupKey::Dimension { output_name, .. } => ColumnSource::Field(output_name.clone()),
                    GroupKey::TimeBucket { .. } => ColumnSource::BucketTimestamp,
                },
                OutputKind::Measure(idx) => ColumnSource::Field(stage.measures[*idx].name.clone()),
                OutputKind::Constant(value) => ColumnSource::Constant(value.clone()),
                _ => ColumnSource::Field(column.name.clone()),
            };
            LayoutColumn::new(&column.name, source)
        })
        .collect()
}

/// Name the store uses in its response for an output column
fn druid_field(plan: &LogicalPlan, stage: &AggregateStage, output: &str) -> Option<String> {
    let column = plan.columns.iter().find(|c| c.name == output)?;
    match &column.kind {
        OutputKind::GroupKey(idx) => Some(stage.group_by[*idx].output_name().to_string()),
        OutputKind::Measure(idx) => Some(stage.measures[*idx].name.clone()),
        _ => None,
    }
}

fn sort_ordering(plan: &LogicalPlan, stage: &AggregateStage, output: &str) -> BoundOrdering {
    let kind = plan.columns.iter().find(|c| c.name == output).map(|c| &c.kind);
    match kind {
        Some(OutputKind::GroupKey(idx)) => match &stage.group_by[*idx] {
            GroupKey::Dimension { column, .. }
                if matches!(column.column_type, ColumnType::Long | ColumnType::Double) =>
            {
                BoundOrdering::Numeric
            }
            GroupKey::Dimension { .. } => BoundOrdering::Lexicographic,
            GroupKey::TimeBucket { .. } => BoundOrdering::Numeric,
        },
        _ => BoundOrdering::Numeric,
    }
}

fn sort_columns(plan: &LogicalPlan) -> Vec<SortColumn> {
    plan.sort
        .iter()
        .map(|key| SortColumn {
            column: key.column.clone(),
            descending: key.descending,
        })
        .collect()
}

fn granularity(bucket: Option<i64>, timezone: Tz) -> Result<Granularity, CompileError> {
    let Some(interval_ms) = bucket else {
        return Ok(Granularity::All);
    };
    let period = if interval_ms % WEEK_MS == 0 {
        format!("P{}W", interval_ms / WEEK_MS)
    } else if interval_ms % DAY_MS == 0 {
        format!("P{}D", interval_ms / DAY_MS)
    } else if interval_ms % HOUR_MS == 0 {
        format!("PT{}H", interval_ms / HOUR_MS)
    } else if interval_ms % MINUTE_MS == 0 {
        format!("PT{}M", interval_ms / MINUTE_MS)
    } else if interval_ms % SECOND_MS == 0 {
        format!("PT{}S", interval_ms / SECOND_MS)
    } else {
        return Err(CompileError::UnsupportedBucket(interval_ms));
    };
    Ok(Granularity::Period {
        period,
        time_zone: timezone.name().to_string(),
    })
}

/// Reference to an aggregate's value from a post-aggregation
enum Term {
    /// A plain aggregator of this name
    Aggregator(String),
    /// A finalizing post-aggregation
    Post(PostAggregation),
}

#[derive(Default)]
struct MeasureCompiler {
    aggregations: Vec<Aggregation>,
    post_aggregations: Vec<PostAggregation>,
}

impl MeasureCompiler {
    fn add(&mut self, measure: &Measure) -> Result<(), CompileError> {
        match &measure.expr {
            MeasureExpr::Aggregate(call) => {
                if let Term::Post(post) = self.aggregate(call, &measure.name)? {
                    self.post_aggregations.push(post);
                }
            }
            expr => {
                let mut next = 0;
                let post = self.post_term(expr, &measure.name, measure.name.clone(), &mut next)?;
                self.post_aggregations.push(post);
            }
        }
        Ok(())
    }

    fn post_term(
        &mut self,
        expr: &MeasureExpr,
        root: &str,
        name: String,
        next: &mut usize,
    ) -> Result<PostAggregation, CompileError> {
        match expr {
            MeasureExpr::Aggregate(call) => match self.aggregate(call, &name)? {
                Term::Aggregator(field) => Ok(PostAggregation::field_access(field)),
                Term::Post(post) => Ok(post),
            },
            MeasureExpr::Constant(value) => Ok(PostAggregation::Constant {
                name,
                value: match value {
                    Value::Int64(i) => serde_json::Value::from(*i),
                    other => other
                        .as_f64()
                        .and_then(serde_json::Number::from_f64)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null),
                },
            }),
            MeasureExpr::Arithmetic { op, left, right } => {
                let left_name = hidden_name(root, next);
                let left = self.post_term(left, root, left_name, next)?;
                let right_name = hidden_name(root, next);
                let right = self.post_term(right, root, right_name, next)?;
                Ok(PostAggregation::Arithmetic {
                    name,
                    function: op.symbol().to_string(),
                    fields: vec![left, right],
                })
            }
            MeasureExpr::Unsupported(construct) => Err(CompileError::Unsupported(construct.to_string())),
        }
    }

    fn aggregate(&mut self, call: &AggregateCall, name: &str) -> Result<Term, CompileError> {
        let Some(column) = &call.column else {
            return match call.function {
                AggregateFunction::Count => {
                    self.aggregations.push(Aggregation::Count { name: name.to_string() });
                    Ok(Term::Aggregator(name.to_string()))
                }
                other => Err(CompileError::Unsupported(format!("{}(*)", other.name()))),
            };
        };

        let field_name = column.name.clone();
        let name = name.to_string();
        let integral = matches!(column.column_type, ColumnType::Long | ColumnType::Time);

        let aggregation = match call.function {
            AggregateFunction::Count => Aggregation::Filtered {
                filter: Filter::not_null(&field_name),
                aggregator: Box::new(Aggregation::Count { name: name.clone() }),
            },
            AggregateFunction::Sum if integral => Aggregation::LongSum { name: name.clone(), field_name },
            AggregateFunction::Sum => Aggregation::DoubleSum { name: name.clone(), field_name },
            AggregateFunction::Min if integral => Aggregation::LongMin { name: name.clone(), field_name },
            AggregateFunction::Min => Aggregation::DoubleMin { name: name.clone(), field_name },
            AggregateFunction::Max if integral => Aggregation::LongMax { name: name.clone(), field_name },
            AggregateFunction::Max => Aggregation::DoubleMax { name: name.clone(), field_name },
            AggregateFunction::Avg => {
                let sum_name = format!("{}:sum", name);
                let count_name = format!("{}:count", name);
                self.aggregations.push(if integral {
                    Aggregation::LongSum {
                        name: sum_name.clone(),
                        field_name: field_name.clone(),
                    }
                } else {
                    Aggregation::DoubleSum {
                        name: sum_name.clone(),
                        field_name: field_name.clone(),
                    }
                });
                self.aggregations.push(Aggregation::Filtered {
                    filter: Filter::not_null(&field_name),
                    aggregator: Box::new(Aggregation::Count {
                        name: count_name.clone(),
                    }),
                });
                return Ok(Term::Post(PostAggregation::Arithmetic {
                    name,
                    function: "/".to_string(),
                    fields: vec![
                        PostAggregation::field_access(sum_name),
                        PostAggregation::field_access(count_name),
                    ],
                }));
            }
            AggregateFunction::CountDistinct => {
                let sketch_name = format!("{}:distinct", name);
                let post = match column.column_type {
                    ColumnType::ThetaSketch => {
                        self.aggregations.push(Aggregation::ThetaSketch {
                            name: sketch_name.clone(),
                            field_name,
                        });
                        PostAggregation::ThetaSketchEstimate {
                            name,
                            field: Box::new(PostAggregation::field_access(sketch_name)),
                        }
                    }
                    ColumnType::HyperUnique => {
                        self.aggregations.push(Aggregation::HyperUnique {
                            name: sketch_name.clone(),
                            field_name,
                        });
                        PostAggregation::HyperUniqueCardinality {
                            name,
                            field_name: sketch_name,
                        }
                    }
                    _ => {
                        self.aggregations.push(Aggregation::Cardinality {
                            name: sketch_name.clone(),
                            fields: vec![field_name],
                            by_row: false,
                        });
                        PostAggregation::HyperUniqueCardinality {
                            name,
                            field_name: sketch_name,
                        }
                    }
                };
                return Ok(Term::Post(post));
            }
        };
        self.aggregations.push(aggregation);
        Ok(Term::Aggregator(name))
    }
}

fn hidden_name(root: &str, next: &mut usize) -> String {
    *next += 1;
    format!("{}:{}", root, next)
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    #[error("Exact COUNT(DISTINCT) cannot be combined with other aggregates")]
    ExactDistinctWithOtherAggregates,

    #[error("Time bucket of {0} ms has no period equivalent")]
    UnsupportedBucket(i64),

    #[error("Time bound {0} is out of range")]
    TimeOutOfRange(i64),
}
