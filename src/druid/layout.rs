use crate::data::{SortColumn, Value};

/// How the response to a compiled query is read back into select-list order
#[derive(Debug, Clone, PartialEq)]
pub struct ResultLayout {
    pub shape: ResponseShape,
    pub columns: Vec<LayoutColumn>,
    /// Sort applied after normalization
    pub sort: Vec<SortColumn>,
    /// Limit applied after normalization
    pub limit: Option<usize>,
}

/// Envelope of the store's response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `[{"columns": [...], "events": [{...}]}]`
    Scan,
    /// `[{"timestamp": ..., "result": {...}}]`
    Timeseries,
    /// `[{"timestamp": ..., "result": [{...}]}]`
    TopN,
    /// `[{"timestamp": ..., "event": {...}}]`
    GroupBy,
    /// `[{...}]`
    Rows,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutColumn {
    pub name: String,
    pub source: ColumnSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    /// Field of the row object
    Field(String),
    /// Field holding time, coerced to a timestamp
    TimeField(String),
    /// Bucket start of the enclosing result entry
    BucketTimestamp,
    Constant(Value),
    /// Every field of the row, in response order
    Wildcard,
}

impl ResultLayout {
    pub fn new(shape: ResponseShape, columns: Vec<LayoutColumn>) -> Self {
        Self {
            shape,
            columns,
            sort: Vec::new(),
            limit: None,
        }
    }

    /// Flat rows keyed by the given column names
    pub fn rows(names: &[&str]) -> Self {
        Self::new(
            ResponseShape::Rows,
            names
                .iter()
                .map(|n| LayoutColumn::field(*n, *n))
                .collect(),
        )
    }

    pub fn with_sort(mut self, sort: Vec<SortColumn>, limit: Option<usize>) -> Self {
        self.sort = sort;
        self.limit = limit;
        self
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

impl LayoutColumn {
    pub fn new(name: impl Into<String>, source: ColumnSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    pub fn field(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(name, ColumnSource::Field(field.into()))
    }
}
