use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::parser::{
    AggregateFunction, ArithmeticOp, CompareOp, Construct, FilterExpr, GroupByItem,
    ProjectionExpr, SelectItem, SelectQuery, TableRef,
};
use super::schema::{ColumnType, Schema, TIME_COLUMN};
use crate::data::Value;

/// Logical plan: a linear pipeline of source, filter, aggregate, sort, limit
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalPlan {
    /// Datasource to read
    pub source: Source,
    /// Row filter over resolved columns
    pub filter: Option<FilterNode>,
    /// Grouping and measures
    pub aggregate: Option<AggregateStage>,
    /// Output columns in select-list order
    pub columns: Vec<OutputColumn>,
    /// Sort keys, each an output column
    pub sort: Vec<SortKey>,
    /// Result limit
    pub limit: Option<usize>,
    /// Zone used for time literals and time buckets
    pub timezone: Tz,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Table(String),
    /// No FROM clause: every output is a constant
    Constant,
    Unsupported(Construct),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnRef {
    pub fn is_time(&self) -> bool {
        self.column_type == ColumnType::Time
    }
}

/// Filter tree with leaf predicates normalized to (column, operator, value)
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    And(Box<FilterNode>, Box<FilterNode>),
    Or(Box<FilterNode>, Box<FilterNode>),
    Not(Box<FilterNode>),
    Predicate(Predicate),
    Unsupported(Construct),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: ColumnRef,
    pub op: PredicateOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateOp {
    Compare(CompareOp, Value),
    In(Vec<Value>),
    /// Inclusive on both ends
    Between(Value, Value),
    Like(String),
    IsNull,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStage {
    pub group_by: Vec<GroupKey>,
    pub measures: Vec<Measure>,
    /// Post-aggregation filter over group keys and measures
    pub having: Option<FilterNode>,
}

impl AggregateStage {
    /// Grouping dimensions, excluding the time bucket
    pub fn dimensions(&self) -> Vec<(&ColumnRef, &str)> {
        self.group_by
            .iter()
            .filter_map(|key| match key {
                GroupKey::Dimension {
                    column,
                    output_name,
                } => Some((column, output_name.as_str())),
                GroupKey::TimeBucket { .. } => None,
            })
            .collect()
    }

    pub fn time_bucket(&self) -> Option<i64> {
        self.group_by.iter().find_map(|key| match key {
            GroupKey::TimeBucket { interval_ms, .. } => Some(*interval_ms),
            GroupKey::Dimension { .. } => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    Dimension {
        column: ColumnRef,
        output_name: String,
    },
    TimeBucket {
        interval_ms: i64,
        output_name: String,
    },
}

impl GroupKey {
    pub fn output_name(&self) -> &str {
        match self {
            GroupKey::Dimension { output_name, .. } | GroupKey::TimeBucket { output_name, .. } => {
                output_name
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    pub name: String,
    pub expr: MeasureExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeasureExpr {
    Aggregate(AggregateCall),
    Constant(Value),
    Arithmetic {
        op: ArithmeticOp,
        left: Box<MeasureExpr>,
        right: Box<MeasureExpr>,
    },
    Unsupported(Construct),
}

impl MeasureExpr {
    pub fn is_aggregate(&self) -> bool {
        matches!(self, MeasureExpr::Aggregate(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub function: AggregateFunction,
    /// `None` for COUNT(*)
    pub column: Option<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub kind: OutputKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputKind {
    /// Raw column of a non-aggregating query
    Column(ColumnRef),
    /// Index into `AggregateStage::group_by`
    GroupKey(usize),
    /// Index into `AggregateStage::measures`
    Measure(usize),
    Constant(Value),
    /// `SELECT *`
    Wildcard,
    Unsupported(Construct),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    /// Output column name
    pub column: String,
    pub descending: bool,
    pub target: SortTarget,
}

/// What a sort key points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortTarget {
    Time,
    Column,
    Dimension,
    TimeBucket,
    Measure,
    Constant,
}

/// Create a logical plan from a parsed query
pub fn plan_query(query: SelectQuery, schema: &Schema, timezone: Tz) -> Result<LogicalPlan, PlanError> {
    let source = match &query.from {
        Some(TableRef::Named(table)) => {
            schema.resolve_table(table)?;
            Source::Table(table.clone())
        }
        Some(TableRef::Unsupported(construct)) => Source::Unsupported(construct.clone()),
        None => Source::Constant,
    };

    let resolver = Resolver {
        schema,
        table: match &source {
            Source::Table(t) => Some(t.as_str()),
            _ => None,
        },
        opaque: matches!(source, Source::Unsupported(_)),
        timezone,
    };

    let filter = query
        .filter
        .as_ref()
        .map(|f| resolver.filter(f))
        .transpose()?;

    let aggregating =
        !query.group_by.is_empty() || query.projections.iter().any(|p| contains_aggregate(&p.expr));

    let (columns, aggregate) = if aggregating {
        let (columns, mut stage) = resolver.aggregate(&query)?;
        if let Some(having) = &query.having {
            stage.having = Some(resolve_having(having, &query.projections, &columns, &stage)?);
        }
        (columns, Some(stage))
    } else {
        if query.having.is_some() {
            return Err(PlanError::HavingWithoutAggregation);
        }
        (resolver.scan_columns(&query.projections)?, None)
    };

    let sort = query
        .order_by
        .iter()
        .map(|ob| {
            let idx = resolve_reference(&ob.key, &query.projections)
                .ok_or_else(|| PlanError::UnknownAlias(ob.key.clone()))?;
            Ok(SortKey {
                column: columns[idx].name.clone(),
                descending: ob.descending,
                target: sort_target(&columns[idx].kind, aggregate.as_ref()),
            })
        })
        .collect::<Result<Vec<_>, PlanError>>()?;

    Ok(LogicalPlan {
        source,
        filter,
        aggregate,
        columns,
        sort,
        limit: query.limit,
        timezone,
    })
}

struct Resolver<'a> {
    schema: &'a Schema,
    table: Option<&'a str>,
    /// Source is a join or subquery; its columns cannot be checked
    opaque: bool,
    timezone: Tz,
}

impl Resolver<'_> {
    fn column(&self, name: &str) -> Result<ColumnRef, PlanError> {
        if self.opaque {
            let column_type = if name == TIME_COLUMN {
                ColumnType::Time
            } else {
                ColumnType::Unknown
            };
            return Ok(ColumnRef {
                name: name.to_string(),
                column_type,
            });
        }
        let table = self
            .table
            .ok_or_else(|| PlanError::UnknownColumn(name.to_string()))?;
        let column_type = self.schema.resolve_column(table, name)?;
        Ok(ColumnRef {
            name: name.to_string(),
            column_type,
        })
    }

    fn filter(&self, expr: &FilterExpr) -> Result<FilterNode, PlanError> {
        let node = match expr {
            FilterExpr::And(l, r) => {
                FilterNode::And(Box::new(self.filter(l)?), Box::new(self.filter(r)?))
            }
            FilterExpr::Or(l, r) => {
                FilterNode::Or(Box::new(self.filter(l)?), Box::new(self.filter(r)?))
            }
            FilterExpr::Not(inner) => FilterNode::Not(Box::new(self.filter(inner)?)),
            FilterExpr::Compare { column, op, value } => {
                let column = self.column(column)?;
                let value = self.literal(&column, value)?;
                FilterNode::Predicate(Predicate {
                    column,
                    op: PredicateOp::Compare(*op, value),
                })
            }
            FilterExpr::In {
                column,
                values,
                negated,
            } => {
                let column = self.column(column)?;
                let values = values
                    .iter()
                    .map(|v| self.literal(&column, v))
                    .collect::<Result<Vec<_>, _>>()?;
                negate(
                    FilterNode::Predicate(Predicate {
                        column,
                        op: PredicateOp::In(values),
                    }),
                    *negated,
                )
            }
            FilterExpr::Between {
                column,
                low,
                high,
                negated,
            } => {
                let column = self.column(column)?;
                let low = self.literal(&column, low)?;
                let high = self.literal(&column, high)?;
                negate(
                    FilterNode::Predicate(Predicate {
                        column,
                        op: PredicateOp::Between(low, high),
                    }),
                    *negated,
                )
            }
            FilterExpr::Like {
                column,
                pattern,
                negated,
            } => negate(
                FilterNode::Predicate(Predicate {
                    column: self.column(column)?,
                    op: PredicateOp::Like(pattern.clone()),
                }),
                *negated,
            ),
            FilterExpr::IsNull { column, negated } => negate(
                FilterNode::Predicate(Predicate {
                    column: self.column(column)?,
                    op: PredicateOp::IsNull,
                }),
                *negated,
            ),
            FilterExpr::Unsupported(construct) => FilterNode::Unsupported(construct.clone()),
        };
        Ok(node)
    }

    /// Literals compared against the time column become UTC instants
    fn literal(&self, column: &ColumnRef, value: &Value) -> Result<Value, PlanError> {
        if !column.is_time() {
            return Ok(value.clone());
        }
        match value {
            Value::String(text) => resolve_time_literal(text, self.timezone).map(Value::Timestamp),
            Value::Int64(ms) | Value::Timestamp(ms) => match DateTime::<Utc>::from_timestamp_millis(*ms) {
                Some(_) => Ok(Value::Timestamp(*ms)),
                None => Err(PlanError::InvalidTimestamp(ms.to_string())),
            },
            Value::Null => Ok(Value::Null),
            other => Err(PlanError::InvalidTimestamp(other.to_string())),
        }
    }

    fn scan_columns(&self, items: &[SelectItem]) -> Result<Vec<OutputColumn>, PlanError> {
        items
            .iter()
            .map(|item| {
                let kind = match &item.expr {
                    ProjectionExpr::Column(name) => OutputKind::Column(self.column(name)?),
                    ProjectionExpr::Wildcard => {
                        if self.table.is_none() && !self.opaque {
                            return Err(PlanError::InvalidExpression(
                                "SELECT * requires a FROM clause".into(),
                            ));
                        }
                        OutputKind::Wildcard
                    }
                    ProjectionExpr::Unsupported(construct) => OutputKind::Unsupported(construct.clone()),
                    other => match self.constant(other)? {
                        Some(value) => OutputKind::Constant(value),
                        None => OutputKind::Unsupported(Construct::Expression(item.text.clone())),
                    },
                };
                Ok(OutputColumn {
                    name: item.output_name().to_string(),
                    kind,
                })
            })
            .collect()
    }

    fn aggregate(&self, query: &SelectQuery) -> Result<(Vec<OutputColumn>, AggregateStage), PlanError> {
        let mut group_by = Vec::new();
        for item in &query.group_by {
            let key = match item {
                GroupByItem::Column(name) => {
                    let column = self.column(name)?;
                    // Prefer the select-list name so the key can be read back by it
                    let output_name = query
                        .projections
                        .iter()
                        .find(|p| matches!(&p.expr, ProjectionExpr::Column(c) if c == name))
                        .map(|p| p.output_name().to_string())
                        .unwrap_or_else(|| name.clone());
                    GroupKey::Dimension {
                        column,
                        output_name,
                    }
                }
                GroupByItem::TimeBucket { interval_ms, column } => {
                    if !self.column(column)?.is_time() {
                        return Err(PlanError::InvalidExpression(format!(
                            "TIME_BUCKET over non-time column {}",
                            column
                        )));
                    }
                    let output_name = query
                        .projections
                        .iter()
                        .find(|p| {
                            matches!(&p.expr, ProjectionExpr::TimeBucket { interval_ms: i, .. } if i == interval_ms)
                        })
                        .map(|p| p.output_name().to_string())
                        .unwrap_or_else(|| "timestamp".to_string());
                    GroupKey::TimeBucket {
                        interval_ms: *interval_ms,
                        output_name,
                    }
                }
            };
            group_by.push(key);
        }

        let mut measures = Vec::new();
        let mut columns = Vec::new();

        for item in &query.projections {
            let name = item.output_name().to_string();
            let kind = match &item.expr {
                ProjectionExpr::Column(col) => {
                    let idx = group_by
                        .iter()
                        .position(|k| matches!(k, GroupKey::Dimension { column, .. } if &column.name == col))
                        .ok_or_else(|| PlanError::NotGrouped(col.clone()))?;
                    OutputKind::GroupKey(idx)
                }
                ProjectionExpr::TimeBucket { interval_ms, .. } => {
                    let idx = group_by
                        .iter()
                        .position(|k| matches!(k, GroupKey::TimeBucket { interval_ms: i, .. } if i == interval_ms))
                        .ok_or_else(|| PlanError::NotGrouped(item.text.clone()))?;
                    OutputKind::GroupKey(idx)
                }
                ProjectionExpr::Wildcard => {
                    return Err(PlanError::InvalidExpression(
                        "SELECT * cannot be combined with aggregation".into(),
                    ))
                }
                ProjectionExpr::Unsupported(construct) => OutputKind::Unsupported(construct.clone()),
                expr if contains_aggregate(expr) => {
                    measures.push(Measure {
                        name: name.clone(),
                        expr: self.measure(expr, &item.text)?,
                    });
                    OutputKind::Measure(measures.len() - 1)
                }
                expr => match self.constant(expr)? {
                    Some(value) => OutputKind::Constant(value),
                    None => OutputKind::Unsupported(Construct::Expression(item.text.clone())),
                },
            };
            columns.push(OutputColumn { name, kind });
        }

        Ok((
            columns,
            AggregateStage {
                group_by,
                measures,
                having: None,
            },
        ))
    }

    fn measure(&self, expr: &ProjectionExpr, text: &str) -> Result<MeasureExpr, PlanError> {
        match expr {
            ProjectionExpr::Aggregate { function, argument } => {
                let column = match argument.as_deref() {
                    None if *function == AggregateFunction::Count => None,
                    None => {
                        return Err(PlanError::InvalidExpression(format!(
                            "{}(*) is not supported",
                            function.name()
                        )))
                    }
                    Some(ProjectionExpr::Column(name)) => Some(self.column(name)?),
                    // COUNT(1) counts rows
                    Some(ProjectionExpr::Literal(v))
                        if *function == AggregateFunction::Count && !v.is_null() =>
                    {
                        None
                    }
                    Some(inner) if contains_aggregate(inner) => {
                        return Err(PlanError::NestedAggregate(text.to_string()))
                    }
                    Some(_) => {
                        return Ok(MeasureExpr::Unsupported(Construct::Expression(text.to_string())))
                    }
                };
                Ok(MeasureExpr::Aggregate(AggregateCall {
                    function: *function,
                    column,
                }))
            }
            ProjectionExpr::Arithmetic { op, left, right } => Ok(MeasureExpr::Arithmetic {
                op: *op,
                left: Box::new(self.measure(left, text)?),
                right: Box::new(self.measure(right, text)?),
            }),
            ProjectionExpr::Unsupported(construct) => Ok(MeasureExpr::Unsupported(construct.clone())),
            ProjectionExpr::Column(name) => Err(PlanError::NotGrouped(name.clone())),
            other => match self.constant(other)? {
                Some(value) if value.is_numeric() => Ok(MeasureExpr::Constant(value)),
                _ => Ok(MeasureExpr::Unsupported(Construct::Expression(text.to_string()))),
            },
        }
    }

    /// Fold a constant expression; `None` when it references columns
    fn constant(&self, expr: &ProjectionExpr) -> Result<Option<Value>, PlanError> {
        match expr {
            ProjectionExpr::Literal(value) => Ok(Some(value.clone())),
            ProjectionExpr::Timestamp(text) => {
                resolve_time_literal(text, self.timezone).map(|ms| Some(Value::Timestamp(ms)))
            }
            ProjectionExpr::Arithmetic { op, left, right } => {
                match (self.constant(left)?, self.constant(right)?) {
                    (Some(l), Some(r)) => fold_arithmetic(*op, &l, &r).map(Some),
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }
}

fn negate(node: FilterNode, negated: bool) -> FilterNode {
    if negated {
        FilterNode::Not(Box::new(node))
    } else {
        node
    }
}

fn contains_aggregate(expr: &ProjectionExpr) -> bool {
    match expr {
        ProjectionExpr::Aggregate { .. } => true,
        ProjectionExpr::Arithmetic { left, right, .. } => {
            contains_aggregate(left) || contains_aggregate(right)
        }
        _ => false,
    }
}

fn fold_arithmetic(op: ArithmeticOp, left: &Value, right: &Value) -> Result<Value, PlanError> {
    if let (Value::Int64(l), Value::Int64(r)) = (left, right) {
        let exact = match op {
            ArithmeticOp::Add => l.checked_add(*r),
            ArithmeticOp::Subtract => l.checked_sub(*r),
            ArithmeticOp::Multiply => l.checked_mul(*r),
            ArithmeticOp::Divide if *r != 0 && l % r == 0 => l.checked_div(*r),
            ArithmeticOp::Divide => None,
        };
        if let Some(v) = exact {
            return Ok(Value::Int64(v));
        }
    }

    let (Some(l), Some(r)) = (numeric(left), numeric(right)) else {
        return Err(PlanError::InvalidExpression(format!(
            "cannot apply {} to {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )));
    };
    let result = match op {
        ArithmeticOp::Add => l + r,
        ArithmeticOp::Subtract => l - r,
        ArithmeticOp::Multiply => l * r,
        ArithmeticOp::Divide if r == 0.0 => {
            return Err(PlanError::InvalidExpression("division by zero".into()))
        }
        ArithmeticOp::Divide => l / r,
    };
    Ok(Value::Float64(result))
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int64(_) | Value::Float64(_) => value.as_f64(),
        _ => None,
    }
}

/// Find the select item a reference names: alias, item text or selected column
fn resolve_reference(key: &str, items: &[SelectItem]) -> Option<usize> {
    let squash = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase()
    };

    items
        .iter()
        .position(|item| item.output_name() == key)
        .or_else(|| {
            items
                .iter()
                .position(|item| item.output_name().eq_ignore_ascii_case(key))
        })
        .or_else(|| {
            let wanted = squash(key);
            items.iter().position(|item| squash(&item.text) == wanted)
        })
        .or_else(|| {
            items
                .iter()
                .position(|item| matches!(&item.expr, ProjectionExpr::Column(c) if c == key))
        })
}

fn sort_target(kind: &OutputKind, aggregate: Option<&AggregateStage>) -> SortTarget {
    match kind {
        OutputKind::Column(column) if column.is_time() => SortTarget::Time,
        OutputKind::Column(_) | OutputKind::Wildcard | OutputKind::Unsupported(_) => SortTarget::Column,
        OutputKind::GroupKey(idx) => match aggregate.and_then(|a| a.group_by.get(*idx)) {
            Some(GroupKey::TimeBucket { .. }) => SortTarget::TimeBucket,
            _ => SortTarget::Dimension,
        },
        OutputKind::Measure(_) => SortTarget::Measure,
        OutputKind::Constant(_) => SortTarget::Constant,
    }
}

/// HAVING leaves name select outputs; they resolve to the field the store
/// reports for that output.
fn resolve_having(
    expr: &FilterExpr,
    items: &[SelectItem],
    columns: &[OutputColumn],
    stage: &AggregateStage,
) -> Result<FilterNode, PlanError> {
    let field = |key: &str| -> Result<ColumnRef, PlanError> {
        let idx = resolve_reference(key, items).ok_or_else(|| PlanError::UnknownAlias(key.to_string()))?;
        let name = match &columns[idx].kind {
            OutputKind::Measure(m) => stage.measures[*m].name.clone(),
            OutputKind::GroupKey(k) => stage.group_by[*k].output_name().to_string(),
            _ => return Err(PlanError::UnknownAlias(key.to_string())),
        };
        Ok(ColumnRef {
            name,
            column_type: ColumnType::Unknown,
        })
    };
    let recurse = |e: &FilterExpr| resolve_having(e, items, columns, stage);

    let node = match expr {
        FilterExpr::And(l, r) => FilterNode::And(Box::new(recurse(l)?), Box::new(recurse(r)?)),
        FilterExpr::Or(l, r) => FilterNode::Or(Box::new(recurse(l)?), Box::new(recurse(r)?)),
        FilterExpr::Not(inner) => FilterNode::Not(Box::new(recurse(inner)?)),
        FilterExpr::Compare { column, op, value } => FilterNode::Predicate(Predicate {
            column: field(column)?,
            op: PredicateOp::Compare(*op, value.clone()),
        }),
        FilterExpr::In {
            column,
            values,
            negated,
        } => negate(
            FilterNode::Predicate(Predicate {
                column: field(column)?,
                op: PredicateOp::In(values.clone()),
            }),
            *negated,
        ),
        FilterExpr::Between {
            column,
            low,
            high,
            negated,
        } => negate(
            FilterNode::Predicate(Predicate {
                column: field(column)?,
                op: PredicateOp::Between(low.clone(), high.clone()),
            }),
            *negated,
        ),
        FilterExpr::Like {
            column,
            pattern,
            negated,
        } => negate(
            FilterNode::Predicate(Predicate {
                column: field(column)?,
                op: PredicateOp::Like(pattern.clone()),
            }),
            *negated,
        ),
        FilterExpr::IsNull { column, negated } => negate(
            FilterNode::Predicate(Predicate {
                column: field(column)?,
                op: PredicateOp::IsNull,
            }),
            *negated,
        ),
        FilterExpr::Unsupported(construct) => FilterNode::Unsupported(construct.clone()),
    };
    Ok(node)
}

/// Resolve a time literal to UTC epoch millis.
///
/// Literals carrying an offset (`Z`, `+02:00`) are absolute; anything else is
/// wall-clock time in `timezone`.
pub fn resolve_time_literal(text: &str, timezone: Tz) -> Result<i64, PlanError> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }

    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    let naive = FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| PlanError::InvalidTimestamp(text.to_string()))?;

    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .ok_or_else(|| {
            PlanError::InvalidTimestamp(format!("{} does not exist in {}", text, timezone))
        })
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Unknown column or alias: {0}")]
    UnknownAlias(String),

    #[error("Aggregate nested inside another aggregate: {0}")]
    NestedAggregate(String),

    #[error("Column {0} must appear in GROUP BY or inside an aggregate")]
    NotGrouped(String),

    #[error("HAVING requires an aggregating query")]
    HavingWithoutAggregation,

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::{parse_statement, Statement};
    use crate::query::schema::DatasourceSchema;

    fn plan_with(sql: &str, schema: &Schema, tz: Tz) -> Result<LogicalPlan, PlanError> {
        match parse_statement(sql).unwrap() {
            Statement::Select(query) => plan_query(query, schema, tz),
            other => panic!("Expected select, got {:?}", other),
        }
    }

    fn plan(sql: &str) -> LogicalPlan {
        plan_with(sql, &Schema::permissive(), Tz::UTC).unwrap()
    }

    #[test]
    fn test_constant_folding() {
        let plan = plan("SELECT 1+1");
        assert_eq!(plan.source, Source::Constant);
        assert_eq!(plan.columns[0].name, "1+1");
        assert_eq!(plan.columns[0].kind, OutputKind::Constant(Value::Int64(2)));

        let plan = self::plan("SELECT 1/2 AS half");
        assert_eq!(plan.columns[0].kind, OutputKind::Constant(Value::Float64(0.5)));
    }

    #[test]
    fn test_timestamp_literal_uses_timezone() {
        let plan = plan_with(
            r#"SELECT TIMESTAMP("2016-04-04T01:02:03") AS T"#,
            &Schema::permissive(),
            chrono_tz::America::Los_Angeles,
        )
        .unwrap();
        // 2016-04-04T08:02:03.000Z
        assert_eq!(
            plan.columns[0].kind,
            OutputKind::Constant(Value::Timestamp(1459756923000))
        );
    }

    #[test]
    fn test_time_filter_literals_resolved() {
        let plan = plan_with(
            "SELECT page FROM wikipedia WHERE __time >= '2016-01-01' AND __time < '2016-01-02T00:00:00Z'",
            &Schema::permissive(),
            chrono_tz::Europe::Berlin,
        )
        .unwrap();
        match plan.filter.unwrap() {
            FilterNode::And(left, right) => {
                assert!(matches!(*left, FilterNode::Predicate(Predicate {
                    op: PredicateOp::Compare(CompareOp::GtEq, Value::Timestamp(ms)), ..
                }) if ms == 1451602800000));
                assert!(matches!(*right, FilterNode::Predicate(Predicate {
                    op: PredicateOp::Compare(CompareOp::Lt, Value::Timestamp(ms)), ..
                }) if ms == 1451692800000));
            }
            other => panic!("Expected AND, got {:?}", other),
        }
    }

    #[test]
    fn test_unrepresentable_time_literal_rejected() {
        let err = plan_with(
            "SELECT page FROM wikipedia WHERE __time <= 9223372036854775807",
            &Schema::permissive(),
            Tz::UTC,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidTimestamp(_)));
    }

    #[test]
    fn test_order_by_alias_resolves_to_measure() {
        let plan = plan(
            "SELECT page, SUM(count) AS Count FROM wikipedia GROUP BY page ORDER BY Count DESC LIMIT 3",
        );
        let stage = plan.aggregate.as_ref().unwrap();
        assert_eq!(stage.dimensions().len(), 1);
        assert_eq!(stage.measures[0].name, "Count");
        assert_eq!(
            plan.sort,
            vec![SortKey {
                column: "Count".into(),
                descending: true,
                target: SortTarget::Measure,
            }]
        );
        assert_eq!(plan.limit, Some(3));
    }

    #[test]
    fn test_order_by_unaliased_aggregate_text() {
        let plan = plan("SELECT page, SUM(count) FROM wikipedia GROUP BY page ORDER BY SUM( count )");
        assert_eq!(plan.sort[0].column, "SUM(count)");
        assert_eq!(plan.sort[0].target, SortTarget::Measure);
    }

    #[test]
    fn test_unknown_column_with_known_schema() {
        let schema = Schema::strict().with_datasource(
            DatasourceSchema::new("wikipedia").with_column("page", ColumnType::String),
        );
        let err = plan_with("SELECT nope FROM wikipedia", &schema, Tz::UTC).unwrap_err();
        assert!(matches!(err, PlanError::UnknownColumn(c) if c == "nope"));

        let err = plan_with("SELECT page FROM logs", &schema, Tz::UTC).unwrap_err();
        assert!(matches!(err, PlanError::UnknownTable(t) if t == "logs"));
    }

    #[test]
    fn test_unknown_order_alias() {
        let err = plan_with(
            "SELECT page FROM wikipedia ORDER BY missing",
            &Schema::permissive(),
            Tz::UTC,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::UnknownAlias(a) if a == "missing"));
    }

    #[test]
    fn test_nested_aggregate_rejected() {
        let err = plan_with("SELECT SUM(MAX(x)) FROM wikipedia", &Schema::permissive(), Tz::UTC)
            .unwrap_err();
        assert!(matches!(err, PlanError::NestedAggregate(_)));
    }

    #[test]
    fn test_ungrouped_column_rejected() {
        let err = plan_with("SELECT page, COUNT(*) FROM wikipedia", &Schema::permissive(), Tz::UTC)
            .unwrap_err();
        assert!(matches!(err, PlanError::NotGrouped(c) if c == "page"));
    }

    #[test]
    fn test_having_resolves_to_measure_name() {
        let plan = plan(
            "SELECT page, COUNT(*) AS edits FROM wikipedia GROUP BY page HAVING COUNT(*) > 10",
        );
        let having = plan.aggregate.unwrap().having.unwrap();
        assert!(matches!(having, FilterNode::Predicate(Predicate { ref column, .. }) if column.name == "edits"));
    }

    #[test]
    fn test_negated_predicates_wrap_in_not() {
        let plan = plan("SELECT page FROM wikipedia WHERE channel NOT IN ('en', 'fr')");
        assert!(matches!(plan.filter, Some(FilterNode::Not(_))));
    }

    #[test]
    fn test_arithmetic_measure() {
        let plan = plan("SELECT SUM(added) / COUNT(*) AS avg_added FROM wikipedia");
        let stage = plan.aggregate.unwrap();
        assert!(matches!(
            stage.measures[0].expr,
            MeasureExpr::Arithmetic { op: ArithmeticOp::Divide, .. }
        ));
    }

    #[test]
    fn test_resolve_time_literal_formats() {
        assert_eq!(resolve_time_literal("2016-04-04", Tz::UTC).unwrap(), 1459728000000);
        assert_eq!(
            resolve_time_literal("2016-04-04 01:02:03", Tz::UTC).unwrap(),
            1459731723000
        );
        assert!(resolve_time_literal("yesterday", Tz::UTC).is_err());
    }
}
