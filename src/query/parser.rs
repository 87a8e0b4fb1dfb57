use regex::Regex;
use sqlparser::ast::{
    BinaryOperator, DataType, Distinct, Expr, FunctionArg, FunctionArgExpr, GroupByExpr,
    ObjectName, OrderByExpr, SelectItem as SqlSelectItem, SetExpr, Statement as SqlStatement,
    TableFactor, TableWithJoins, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, Tokenizer};
use std::sync::OnceLock;

use crate::data::Value;

/// A parsed statement: either a query or a metadata request
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectQuery),
    Show(ShowStatement),
}

/// `SHOW ...` statements answered by the metadata surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowStatement {
    Tables,
    Schemas,
    Columns { table: String },
}

/// Parsed SELECT representation
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    /// Select list in declaration order
    pub projections: Vec<SelectItem>,
    /// FROM table; `None` for constant selects such as `SELECT 1+1`
    pub from: Option<TableRef>,
    /// WHERE tree
    pub filter: Option<FilterExpr>,
    /// GROUP BY items
    pub group_by: Vec<GroupByItem>,
    /// HAVING tree over select outputs
    pub having: Option<FilterExpr>,
    /// ORDER BY clauses
    pub order_by: Vec<OrderBy>,
    /// LIMIT
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    Named(String),
    Unsupported(Construct),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: ProjectionExpr,
    pub alias: Option<String>,
    /// Source text of the item, whitespace collapsed
    pub text: String,
}

impl SelectItem {
    /// Name of the output column
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionExpr {
    /// Simple column reference: SELECT col
    Column(String),
    /// All columns: SELECT *
    Wildcard,
    /// Number, string, boolean or NULL literal
    Literal(Value),
    /// TIMESTAMP('...') cast of a literal
    Timestamp(String),
    /// Aggregation: SELECT COUNT(*), SUM(col), etc.
    Aggregate {
        function: AggregateFunction,
        /// `None` for COUNT(*)
        argument: Option<Box<ProjectionExpr>>,
    },
    /// TIME_BUCKET('1 hour', __time)
    TimeBucket { interval_ms: i64, column: String },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<ProjectionExpr>,
        right: Box<ProjectionExpr>,
    },
    Unsupported(Construct),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    CountDistinct,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count | AggregateFunction::CountDistinct => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Avg => "AVG",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
        }
    }
}

/// SQL the parser recognises but no native query can express
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Construct {
    WindowFunction(String),
    Subquery,
    Join,
    Function(String),
    Expression(String),
}

impl std::fmt::Display for Construct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Construct::WindowFunction(name) => write!(f, "window function {}", name),
            Construct::Subquery => write!(f, "subquery"),
            Construct::Join => write!(f, "join"),
            Construct::Function(name) => write!(f, "function {}", name),
            Construct::Expression(text) => write!(f, "expression {}", text),
        }
    }
}

/// WHERE / HAVING tree; connectives keep their source structure
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
        negated: bool,
    },
    Like {
        column: String,
        pattern: String,
        negated: bool,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    Unsupported(Construct),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// Operator with sides swapped: `5 < x` becomes `x > 5`
    fn flipped(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupByItem {
    Column(String),
    TimeBucket { interval_ms: i64, column: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Alias, select-item text or column name
    pub key: String,
    pub descending: bool,
}

/// Parse a SQL statement string
pub fn parse_statement(sql: &str) -> Result<Statement, ParseError> {
    let dialect = GenericDialect {};
    let statements = Parser::parse_sql(&dialect, sql).map_err(syntax_error)?;

    if statements.is_empty() {
        return Err(ParseError::EmptyQuery);
    }

    if statements.len() > 1 {
        return Err(ParseError::MultipleStatements);
    }

    match &statements[0] {
        SqlStatement::Query(query) => {
            let texts = select_item_texts(sql);
            parse_select(query, texts).map(Statement::Select)
        }
        SqlStatement::ShowTables { .. } => Ok(Statement::Show(ShowStatement::Tables)),
        SqlStatement::ShowColumns { table_name, .. } => Ok(Statement::Show(ShowStatement::Columns {
            table: object_name_to_string(table_name),
        })),
        SqlStatement::ShowVariable { variable } => {
            let name = variable
                .iter()
                .map(|i| i.value.to_uppercase())
                .collect::<Vec<_>>()
                .join(" ");
            match name.as_str() {
                "SCHEMAS" | "DATABASES" => Ok(Statement::Show(ShowStatement::Schemas)),
                _ => Err(ParseError::UnsupportedStatement(format!("SHOW {}", name))),
            }
        }
        other => Err(ParseError::UnsupportedStatement(statement_kind(other))),
    }
}

fn statement_kind(statement: &SqlStatement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

fn syntax_error(err: ParserError) -> ParseError {
    let raw = match err {
        ParserError::TokenizerError(msg) | ParserError::ParserError(msg) => msg,
        ParserError::RecursionLimitExceeded => {
            return ParseError::Syntax {
                message: "expression nested too deeply".into(),
                token: None,
                line: 0,
                column: 0,
            }
        }
    };

    static LOCATION: OnceLock<Regex> = OnceLock::new();
    static FOUND: OnceLock<Regex> = OnceLock::new();
    let location = LOCATION.get_or_init(|| {
        Regex::new(r"\s*at Line: (\d+), Column:? (\d+)").expect("valid location regex")
    });
    let found = FOUND.get_or_init(|| Regex::new(r"found: (.*)$").expect("valid token regex"));

    let (message, line, column) = match location.captures(&raw) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let line = caps[1].parse().unwrap_or(0);
            let column = caps[2].parse().unwrap_or(0);
            let mut message = raw.clone();
            message.replace_range(whole, "");
            (message, line, column)
        }
        None => (raw.clone(), 0, 0),
    };
    let token = found
        .captures(&message)
        .map(|caps| caps[1].trim().to_string());

    ParseError::Syntax {
        message,
        token,
        line,
        column,
    }
}

fn parse_select(
    query: &sqlparser::ast::Query,
    texts: Option<Vec<String>>,
) -> Result<SelectQuery, ParseError> {
    if query.with.is_some() {
        return Err(ParseError::UnsupportedQuery("WITH clauses".into()));
    }
    if query.offset.is_some() {
        return Err(ParseError::UnsupportedQuery("OFFSET".into()));
    }

    let select = match &*query.body {
        SetExpr::Select(select) => select,
        _ => return Err(ParseError::UnsupportedQuery("Only SELECT queries supported".into())),
    };

    let from = parse_table(&select.from)?;
    let projections = parse_projections(&select.projection, texts)?;
    let filter = select.selection.as_ref().map(parse_filter_expr);
    let mut group_by = parse_group_by(&select.group_by)?;
    let having = select.having.as_ref().map(parse_filter_expr);
    let order_by = parse_order_by(&query.order_by)?;
    let limit = parse_limit(&query.limit)?;

    // SELECT DISTINCT a, b is a grouping on the selected columns
    if matches!(select.distinct, Some(Distinct::Distinct)) && group_by.is_empty() {
        for item in &projections {
            match &item.expr {
                ProjectionExpr::Column(name) => group_by.push(GroupByItem::Column(name.clone())),
                _ => {
                    return Err(ParseError::UnsupportedQuery(
                        "SELECT DISTINCT over non-column items".into(),
                    ))
                }
            }
        }
    } else if select.distinct.is_some() && !group_by.is_empty() {
        return Err(ParseError::UnsupportedQuery("SELECT DISTINCT with GROUP BY".into()));
    }

    Ok(SelectQuery {
        projections,
        from,
        filter,
        group_by,
        having,
        order_by,
        limit,
    })
}

fn parse_table(from: &[TableWithJoins]) -> Result<Option<TableRef>, ParseError> {
    if from.is_empty() {
        return Ok(None);
    }

    if from.len() > 1 {
        return Ok(Some(TableRef::Unsupported(Construct::Join)));
    }

    let table = &from[0];
    if !table.joins.is_empty() {
        return Ok(Some(TableRef::Unsupported(Construct::Join)));
    }

    match &table.relation {
        TableFactor::Table { name, .. } => Ok(Some(TableRef::Named(object_name_to_string(name)))),
        TableFactor::Derived { .. } => Ok(Some(TableRef::Unsupported(Construct::Subquery))),
        _ => Err(ParseError::UnsupportedTableExpression),
    }
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".")
}

fn parse_projections(
    items: &[SqlSelectItem],
    texts: Option<Vec<String>>,
) -> Result<Vec<SelectItem>, ParseError> {
    // Source texts only line up when the token split found every item
    let texts = texts.filter(|t| t.len() == items.len());
    let mut projections = Vec::new();

    for (idx, item) in items.iter().enumerate() {
        let source_text = texts.as_ref().map(|t| t[idx].clone());
        match item {
            SqlSelectItem::UnnamedExpr(expr) => {
                projections.push(SelectItem {
                    expr: parse_projection_expr(expr),
                    alias: None,
                    text: source_text.unwrap_or_else(|| expr.to_string()),
                });
            }
            SqlSelectItem::ExprWithAlias { expr, alias } => {
                projections.push(SelectItem {
                    expr: parse_projection_expr(expr),
                    alias: Some(alias.value.clone()),
                    text: expr.to_string(),
                });
            }
            SqlSelectItem::Wildcard(_) => {
                projections.push(SelectItem {
                    expr: ProjectionExpr::Wildcard,
                    alias: None,
                    text: "*".to_string(),
                });
            }
            _ => return Err(ParseError::UnsupportedProjection),
        }
    }

    Ok(projections)
}

fn parse_projection_expr(expr: &Expr) -> ProjectionExpr {
    match expr {
        Expr::Identifier(ident) => ProjectionExpr::Column(ident.value.clone()),

        Expr::CompoundIdentifier(idents) => {
            let col_name = idents.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".");
            ProjectionExpr::Column(col_name)
        }

        Expr::Value(_) | Expr::UnaryOp { .. } => match extract_value(expr) {
            Ok(value) => ProjectionExpr::Literal(value),
            Err(_) => ProjectionExpr::Unsupported(Construct::Expression(expr.to_string())),
        },

        Expr::Nested(inner) => parse_projection_expr(inner),

        Expr::TypedString {
            data_type: DataType::Timestamp(..),
            value,
        } => ProjectionExpr::Timestamp(value.clone()),

        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::Plus => ArithmeticOp::Add,
                BinaryOperator::Minus => ArithmeticOp::Subtract,
                BinaryOperator::Multiply => ArithmeticOp::Multiply,
                BinaryOperator::Divide => ArithmeticOp::Divide,
                _ => return ProjectionExpr::Unsupported(Construct::Expression(expr.to_string())),
            };
            ProjectionExpr::Arithmetic {
                op,
                left: Box::new(parse_projection_expr(left)),
                right: Box::new(parse_projection_expr(right)),
            }
        }

        Expr::Subquery(_) | Expr::Exists { .. } | Expr::InSubquery { .. } => {
            ProjectionExpr::Unsupported(Construct::Subquery)
        }

        Expr::Function(func) => {
            let func_name = func.name.to_string().to_uppercase();

            if func.over.is_some() {
                return ProjectionExpr::Unsupported(Construct::WindowFunction(func_name));
            }

            match func_name.as_str() {
                "COUNT" | "SUM" | "MIN" | "MAX" | "AVG" => {
                    let function = match func_name.as_str() {
                        "COUNT" if func.distinct => AggregateFunction::CountDistinct,
                        "COUNT" => AggregateFunction::Count,
                        "SUM" => AggregateFunction::Sum,
                        "MIN" => AggregateFunction::Min,
                        "MAX" => AggregateFunction::Max,
                        "AVG" => AggregateFunction::Avg,
                        _ => unreachable!(),
                    };
                    if func.distinct && function != AggregateFunction::CountDistinct {
                        return ProjectionExpr::Unsupported(Construct::Expression(expr.to_string()));
                    }
                    match parse_function_argument(&func.args) {
                        Ok(argument) => ProjectionExpr::Aggregate {
                            function,
                            argument: argument.map(Box::new),
                        },
                        Err(_) => ProjectionExpr::Unsupported(Construct::Expression(expr.to_string())),
                    }
                }
                "TIMESTAMP" => match single_literal_argument(&func.args) {
                    Some(text) => ProjectionExpr::Timestamp(text),
                    None => ProjectionExpr::Unsupported(Construct::Expression(expr.to_string())),
                },
                "TIME_BUCKET" => match parse_time_bucket_args(&func.args) {
                    Ok((interval_ms, column)) => ProjectionExpr::TimeBucket { interval_ms, column },
                    Err(_) => ProjectionExpr::Unsupported(Construct::Expression(expr.to_string())),
                },
                _ => ProjectionExpr::Unsupported(Construct::Function(func_name)),
            }
        }

        _ => ProjectionExpr::Unsupported(Construct::Expression(expr.to_string())),
    }
}

/// Argument of an aggregate call; `None` for `*`
fn parse_function_argument(args: &[FunctionArg]) -> Result<Option<ProjectionExpr>, ParseError> {
    if args.is_empty() {
        return Ok(None);
    }
    if args.len() > 1 {
        return Err(ParseError::UnsupportedExpression("multiple aggregate arguments".into()));
    }

    match &args[0] {
        FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => Ok(None),
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Ok(Some(parse_projection_expr(expr))),
        FunctionArg::Named { arg: FunctionArgExpr::Expr(expr), .. } => {
            Ok(Some(parse_projection_expr(expr)))
        }
        _ => Err(ParseError::UnsupportedExpression("Complex function argument".into())),
    }
}

/// The string inside `TIMESTAMP('...')` or `TIMESTAMP("...")`
fn single_literal_argument(args: &[FunctionArg]) -> Option<String> {
    if args.len() != 1 {
        return None;
    }
    match &args[0] {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => match extract_value(expr).ok()? {
            Value::String(s) => Some(s),
            Value::Int64(i) => Some(i.to_string()),
            _ => None,
        },
        _ => None,
    }
}

fn parse_time_bucket_args(args: &[FunctionArg]) -> Result<(i64, String), ParseError> {
    if args.len() < 2 {
        return Err(ParseError::InvalidTimeBucket);
    }

    // First arg: interval string like '5 minutes'
    let interval_ms = match &args[0] {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => match extract_value(expr) {
            Ok(Value::String(s)) => parse_interval(&s)?,
            _ => return Err(ParseError::InvalidTimeBucket),
        },
        _ => return Err(ParseError::InvalidTimeBucket),
    };

    // Second arg: column name
    let column = match &args[1] {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(Expr::Identifier(ident))) => ident.value.clone(),
        FunctionArg::Unnamed(FunctionArgExpr::Expr(Expr::CompoundIdentifier(idents))) => {
            idents.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".")
        }
        _ => return Err(ParseError::InvalidTimeBucket),
    };

    Ok((interval_ms, column))
}

/// Parse `'<n> <unit>'` into milliseconds
pub fn parse_interval(s: &str) -> Result<i64, ParseError> {
    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(ParseError::InvalidInterval(s.to_string()));
    }

    let value: i64 = parts[0]
        .parse()
        .map_err(|_| ParseError::InvalidInterval(s.to_string()))?;
    if value <= 0 {
        return Err(ParseError::InvalidInterval(s.to_string()));
    }

    let unit = parts[1].to_lowercase();
    let multiplier = match unit.as_str() {
        "s" | "second" | "seconds" => 1000,
        "m" | "minute" | "minutes" => 60 * 1000,
        "h" | "hour" | "hours" => 3600 * 1000,
        "d" | "day" | "days" => 86400 * 1000,
        "w" | "week" | "weeks" => 7 * 86400 * 1000,
        _ => return Err(ParseError::InvalidInterval(s.to_string())),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| ParseError::InvalidInterval(s.to_string()))
}

fn parse_filter_expr(expr: &Expr) -> FilterExpr {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => FilterExpr::And(
                Box::new(parse_filter_expr(left)),
                Box::new(parse_filter_expr(right)),
            ),
            BinaryOperator::Or => FilterExpr::Or(
                Box::new(parse_filter_expr(left)),
                Box::new(parse_filter_expr(right)),
            ),
            BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq => {
                let op = match op {
                    BinaryOperator::Eq => CompareOp::Eq,
                    BinaryOperator::NotEq => CompareOp::NotEq,
                    BinaryOperator::Lt => CompareOp::Lt,
                    BinaryOperator::LtEq => CompareOp::LtEq,
                    BinaryOperator::Gt => CompareOp::Gt,
                    BinaryOperator::GtEq => CompareOp::GtEq,
                    _ => unreachable!(),
                };
                parse_comparison(expr, left, op, right)
            }
            _ => FilterExpr::Unsupported(Construct::Expression(expr.to_string())),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: inner,
        } => FilterExpr::Not(Box::new(parse_filter_expr(inner))),
        Expr::Nested(inner) => parse_filter_expr(inner),
        Expr::InList {
            expr: target,
            list,
            negated,
        } => {
            let values: Result<Vec<Value>, ParseError> = list.iter().map(extract_value).collect();
            match (extract_column_name(target), values) {
                (Ok(column), Ok(values)) => FilterExpr::In {
                    column,
                    values,
                    negated: *negated,
                },
                _ => FilterExpr::Unsupported(Construct::Expression(expr.to_string())),
            }
        }
        Expr::Between {
            expr: target,
            negated,
            low,
            high,
        } => match (extract_column_name(target), extract_value(low), extract_value(high)) {
            (Ok(column), Ok(low), Ok(high)) => FilterExpr::Between {
                column,
                low,
                high,
                negated: *negated,
            },
            _ => FilterExpr::Unsupported(Construct::Expression(expr.to_string())),
        },
        Expr::Like {
            negated,
            expr: target,
            pattern,
            ..
        } => match (extract_column_name(target), extract_value(pattern)) {
            (Ok(column), Ok(Value::String(pattern))) => FilterExpr::Like {
                column,
                pattern,
                negated: *negated,
            },
            _ => FilterExpr::Unsupported(Construct::Expression(expr.to_string())),
        },
        Expr::IsNull(target) => match extract_column_name(target) {
            Ok(column) => FilterExpr::IsNull {
                column,
                negated: false,
            },
            Err(_) => FilterExpr::Unsupported(Construct::Expression(expr.to_string())),
        },
        Expr::IsNotNull(target) => match extract_column_name(target) {
            Ok(column) => FilterExpr::IsNull {
                column,
                negated: true,
            },
            Err(_) => FilterExpr::Unsupported(Construct::Expression(expr.to_string())),
        },
        Expr::Subquery(_) | Expr::Exists { .. } | Expr::InSubquery { .. } => {
            FilterExpr::Unsupported(Construct::Subquery)
        }
        Expr::Function(func) if func.over.is_some() => FilterExpr::Unsupported(
            Construct::WindowFunction(func.name.to_string().to_uppercase()),
        ),
        _ => FilterExpr::Unsupported(Construct::Expression(expr.to_string())),
    }
}

fn parse_comparison(whole: &Expr, left: &Expr, op: CompareOp, right: &Expr) -> FilterExpr {
    if let (Ok(column), Ok(value)) = (extract_column_name(left), extract_value(right)) {
        return FilterExpr::Compare { column, op, value };
    }
    // Literal on the left: 5 < x
    if let (Ok(value), Ok(column)) = (extract_value(left), extract_column_name(right)) {
        return FilterExpr::Compare {
            column,
            op: op.flipped(),
            value,
        };
    }
    FilterExpr::Unsupported(Construct::Expression(whole.to_string()))
}

/// Column side of a predicate. Aggregate calls are kept as their text so that
/// HAVING can refer to select items without an alias.
fn extract_column_name(expr: &Expr) -> Result<String, ParseError> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::CompoundIdentifier(idents) => {
            Ok(idents.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join("."))
        }
        Expr::Nested(inner) => extract_column_name(inner),
        Expr::Function(func) if func.over.is_none() => Ok(expr.to_string()),
        _ => Err(ParseError::ExpectedColumnName),
    }
}

/// Literal side of a predicate. Double-quoted tokens are strings here.
fn extract_value(expr: &Expr) -> Result<Value, ParseError> {
    match expr {
        Expr::Value(v) => sql_value_to_value(v),
        Expr::Identifier(ident) if ident.quote_style == Some('"') => {
            Ok(Value::String(ident.value.clone()))
        }
        Expr::Nested(inner) => extract_value(inner),
        Expr::TypedString {
            data_type: DataType::Timestamp(..),
            value,
        } => Ok(Value::String(value.clone())),
        Expr::Function(func)
            if func.over.is_none() && func.name.to_string().eq_ignore_ascii_case("TIMESTAMP") =>
        {
            single_literal_argument(&func.args)
                .map(Value::String)
                .ok_or(ParseError::ExpectedValue)
        }
        Expr::UnaryOp { op, expr } => {
            // Handle signed numbers
            let sign = match op {
                UnaryOperator::Minus => -1,
                UnaryOperator::Plus => 1,
                _ => return Err(ParseError::ExpectedValue),
            };
            match extract_value(expr)? {
                Value::Int64(i) => Ok(Value::Int64(sign * i)),
                Value::Float64(f) => Ok(Value::Float64(sign as f64 * f)),
                _ => Err(ParseError::ExpectedValue),
            }
        }
        _ => Err(ParseError::ExpectedValue),
    }
}

fn sql_value_to_value(v: &SqlValue) -> Result<Value, ParseError> {
    match v {
        SqlValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::Int64(i))
            } else if let Ok(f) = n.parse::<f64>() {
                Ok(Value::Float64(f))
            } else {
                Err(ParseError::InvalidNumber(n.clone()))
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
            Ok(Value::String(s.clone()))
        }
        SqlValue::Boolean(b) => Ok(Value::Bool(*b)),
        SqlValue::Null => Ok(Value::Null),
        _ => Err(ParseError::UnsupportedValue),
    }
}

fn parse_group_by(group_by: &GroupByExpr) -> Result<Vec<GroupByItem>, ParseError> {
    let exprs = match group_by {
        GroupByExpr::All => return Err(ParseError::UnsupportedExpression("GROUP BY ALL".into())),
        GroupByExpr::Expressions(exprs) => exprs,
    };

    let mut result = Vec::new();

    for expr in exprs {
        match expr {
            Expr::Identifier(ident) => {
                result.push(GroupByItem::Column(ident.value.clone()));
            }
            Expr::CompoundIdentifier(idents) => {
                let col_name = idents.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".");
                result.push(GroupByItem::Column(col_name));
            }
            Expr::Function(func) => {
                let func_name = func.name.to_string().to_uppercase();
                if func_name == "TIME_BUCKET" {
                    let (interval_ms, column) = parse_time_bucket_args(&func.args)?;
                    result.push(GroupByItem::TimeBucket { interval_ms, column });
                } else {
                    return Err(ParseError::UnsupportedGroupByExpression);
                }
            }
            _ => return Err(ParseError::UnsupportedGroupByExpression),
        }
    }

    Ok(result)
}

fn parse_order_by(order_by: &[OrderByExpr]) -> Result<Vec<OrderBy>, ParseError> {
    let mut result = Vec::new();

    for expr in order_by {
        let key = match &expr.expr {
            Expr::Identifier(ident) => ident.value.clone(),
            Expr::CompoundIdentifier(idents) => {
                idents.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".")
            }
            Expr::Function(func) if func.over.is_none() => expr.expr.to_string(),
            _ => return Err(ParseError::UnsupportedOrderByExpression),
        };

        let descending = expr.asc.map(|asc| !asc).unwrap_or(false);

        result.push(OrderBy { key, descending });
    }

    Ok(result)
}

fn parse_limit(limit: &Option<Expr>) -> Result<Option<usize>, ParseError> {
    let Some(expr) = limit else {
        return Ok(None);
    };

    match expr {
        Expr::Value(SqlValue::Number(n, _)) => {
            let limit: usize = n.parse().map_err(|_| ParseError::InvalidLimit)?;
            Ok(Some(limit))
        }
        _ => Err(ParseError::InvalidLimit),
    }
}

/// Source text of each top-level select item, whitespace collapsed.
///
/// `sqlparser` prints expressions in its own canonical spacing (`1 + 1`);
/// output column names follow what the user typed (`1+1`).
fn select_item_texts(sql: &str) -> Option<Vec<String>> {
    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, sql).tokenize().ok()?;

    let start = tokens
        .iter()
        .position(|t| matches!(t, Token::Word(w) if w.keyword == Keyword::SELECT))?;

    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for token in &tokens[start + 1..] {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Comma if depth == 0 => {
                items.push(collapse_whitespace(&current));
                current.clear();
                continue;
            }
            Token::SemiColon if depth == 0 => break,
            Token::Word(w)
                if depth == 0
                    && matches!(
                        w.keyword,
                        Keyword::FROM
                            | Keyword::WHERE
                            | Keyword::GROUP
                            | Keyword::HAVING
                            | Keyword::ORDER
                            | Keyword::LIMIT
                            | Keyword::UNION
                    ) =>
            {
                break
            }
            Token::Word(w) if depth == 0 && items.is_empty() && current.trim().is_empty() => {
                // SELECT DISTINCT / ALL prefix is not part of the first item
                if matches!(w.keyword, Keyword::DISTINCT | Keyword::ALL) {
                    continue;
                }
            }
            _ => {}
        }
        current.push_str(&token.to_string());
    }
    items.push(collapse_whitespace(&current));

    Some(items)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Syntax error: {message}{}", position_suffix(.line, .column))]
    Syntax {
        message: String,
        /// Offending token as reported by the tokenizer
        token: Option<String>,
        line: u64,
        column: u64,
    },

    #[error("Empty query")]
    EmptyQuery,

    #[error("Multiple statements not supported")]
    MultipleStatements,

    #[error("Unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("Unsupported table expression")]
    UnsupportedTableExpression,

    #[error("Unsupported projection")]
    UnsupportedProjection,

    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("Expected column name")]
    ExpectedColumnName,

    #[error("Expected value")]
    ExpectedValue,

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unsupported value type")]
    UnsupportedValue,

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid TIME_BUCKET arguments")]
    InvalidTimeBucket,

    #[error("Unsupported GROUP BY expression")]
    UnsupportedGroupByExpression,

    #[error("Unsupported ORDER BY expression")]
    UnsupportedOrderByExpression,

    #[error("Invalid LIMIT value")]
    InvalidLimit,
}

fn position_suffix(line: &u64, column: &u64) -> String {
    if *line == 0 {
        String::new()
    } else {
        format!(" (line {}, column {})", line, column)
    }
}
