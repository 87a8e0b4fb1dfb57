//! Filter compilation: resolved filter trees become native filters, and
//! top-level conditions on `__time` become the query interval.

use super::compiler::CompileError;
use super::native::{BoundOrdering, Filter, Interval};
use crate::data::Value;
use crate::query::parser::CompareOp;
use crate::query::planner::{FilterNode, Predicate, PredicateOp};

/// WHERE clause split into query interval and residual filter
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledWhere {
    pub interval: Interval,
    pub filter: Option<Filter>,
}

/// Time range being narrowed by top-level conjuncts
#[derive(Debug, Clone, Copy, Default)]
struct TimeRange {
    start: Option<i64>,
    end: Option<i64>,
}

impl TimeRange {
    fn raise_start(&mut self, start: i64) {
        self.start = Some(self.start.map_or(start, |s| s.max(start)));
    }

    fn lower_end(&mut self, end: i64) {
        self.end = Some(self.end.map_or(end, |e| e.min(end)));
    }

    fn interval(&self) -> Interval {
        let eternity = Interval::eternity();
        let start = self.start.unwrap_or(eternity.start_ms);
        let end = self.end.unwrap_or(eternity.end_ms);
        // Contradictory bounds collapse to an empty interval
        Interval::new(start, end.max(start))
    }
}

pub fn compile_where(node: Option<&FilterNode>) -> Result<CompiledWhere, CompileError> {
    let Some(node) = node else {
        return Ok(CompiledWhere {
            interval: Interval::eternity(),
            filter: None,
        });
    };

    let mut conjuncts = Vec::new();
    flatten_and(node, &mut conjuncts);

    let mut range = TimeRange::default();
    let mut residual = Vec::new();
    for conjunct in conjuncts {
        if !narrow_time_range(&mut range, conjunct)? {
            residual.push(compile_filter(conjunct)?);
        }
    }

    let filter = match residual.len() {
        0 => None,
        1 => residual.pop(),
        _ => Some(Filter::And { fields: residual }),
    };

    Ok(CompiledWhere {
        interval: range.interval(),
        filter,
    })
}

fn flatten_and<'a>(node: &'a FilterNode, out: &mut Vec<&'a FilterNode>) {
    match node {
        FilterNode::And(l, r) => {
            flatten_and(l, out);
            flatten_and(r, out);
        }
        other => out.push(other),
    }
}

fn flatten_or<'a>(node: &'a FilterNode, out: &mut Vec<&'a FilterNode>) {
    match node {
        FilterNode::Or(l, r) => {
            flatten_or(l, out);
            flatten_or(r, out);
        }
        other => out.push(other),
    }
}

/// Apply a time predicate to the range. Returns false when the node is not
/// one the interval can express.
fn narrow_time_range(range: &mut TimeRange, node: &FilterNode) -> Result<bool, CompileError> {
    let FilterNode::Predicate(Predicate { column, op }) = node else {
        return Ok(false);
    };
    if !column.is_time() {
        return Ok(false);
    }

    match op {
        PredicateOp::Compare(cmp, Value::Timestamp(ts)) => {
            let ts = *ts;
            match cmp {
                CompareOp::Gt => range.raise_start(after(ts)?),
                CompareOp::GtEq => range.raise_start(ts),
                CompareOp::Lt => range.lower_end(ts),
                CompareOp::LtEq => range.lower_end(after(ts)?),
                CompareOp::Eq => {
                    range.raise_start(ts);
                    range.lower_end(after(ts)?);
                }
                CompareOp::NotEq => return Ok(false),
            }
            Ok(true)
        }
        PredicateOp::Between(Value::Timestamp(low), Value::Timestamp(high)) => {
            range.raise_start(*low);
            range.lower_end(after(*high)?);
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Exclusive end for an inclusive bound
fn after(ts: i64) -> Result<i64, CompileError> {
    ts.checked_add(1).ok_or(CompileError::TimeOutOfRange(ts))
}

/// Compile a filter tree without interval extraction
pub fn compile_filter(node: &FilterNode) -> Result<Filter, CompileError> {
    match node {
        FilterNode::And(..) => {
            let mut children = Vec::new();
            flatten_and(node, &mut children);
            Ok(Filter::And {
                fields: children.into_iter().map(compile_filter).collect::<Result<_, _>>()?,
            })
        }
        FilterNode::Or(..) => {
            let mut children = Vec::new();
            flatten_or(node, &mut children);
            Ok(Filter::Or {
                fields: children.into_iter().map(compile_filter).collect::<Result<_, _>>()?,
            })
        }
        FilterNode::Not(inner) => Ok(Filter::not(compile_filter(inner)?)),
        FilterNode::Predicate(predicate) => Ok(compile_predicate(predicate)),
        FilterNode::Unsupported(construct) => Err(CompileError::Unsupported(construct.to_string())),
    }
}

fn compile_predicate(predicate: &Predicate) -> Filter {
    let dimension = predicate.column.name.clone();
    match &predicate.op {
        PredicateOp::Compare(op, value) => compile_comparison(dimension, *op, value),
        PredicateOp::In(values) => Filter::In {
            dimension,
            values: values.iter().map(filter_value).collect(),
        },
        PredicateOp::Between(low, high) => Filter::Bound {
            dimension,
            lower: filter_value(low),
            upper: filter_value(high),
            lower_strict: false,
            upper_strict: false,
            ordering: ordering_for(low),
        },
        PredicateOp::Like(pattern) => Filter::Like {
            dimension,
            pattern: pattern.clone(),
        },
        PredicateOp::IsNull => Filter::selector(dimension, None),
    }
}

fn compile_comparison(dimension: String, op: CompareOp, value: &Value) -> Filter {
    let bound = |lower: Option<String>, upper: Option<String>, lower_strict, upper_strict| Filter::Bound {
        dimension: dimension.clone(),
        lower,
        upper,
        lower_strict,
        upper_strict,
        ordering: ordering_for(value),
    };
    let text = filter_value(value);

    match op {
        // Time equality is a numeric range; a selector would compare strings
        CompareOp::Eq if matches!(value, Value::Timestamp(_)) => {
            bound(text.clone(), text, false, false)
        }
        CompareOp::Eq => Filter::selector(dimension.clone(), text),
        CompareOp::NotEq if matches!(value, Value::Timestamp(_)) => {
            Filter::not(bound(text.clone(), text, false, false))
        }
        CompareOp::NotEq => Filter::not(Filter::selector(dimension.clone(), text)),
        CompareOp::Lt => bound(None, text, false, true),
        CompareOp::LtEq => bound(None, text, false, false),
        CompareOp::Gt => bound(text, None, true, false),
        CompareOp::GtEq => bound(text, None, false, false),
    }
}

/// Druid filters compare against string forms; time uses epoch millis
fn filter_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Timestamp(ms) => Some(ms.to_string()),
        other => Some(other.to_string()),
    }
}

fn ordering_for(value: &Value) -> BoundOrdering {
    match value {
        Value::Int64(_) | Value::Float64(_) | Value::Timestamp(_) => BoundOrdering::Numeric,
        _ => BoundOrdering::Lexicographic,
    }
}
