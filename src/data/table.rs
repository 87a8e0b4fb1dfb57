use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::value::Value;

/// Ordered result table: column names in select-list order and rows aligned
/// to those columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    /// Column names
    pub columns: Vec<String>,
    /// Result rows, one value per column
    pub rows: Vec<Vec<Value>>,
}

/// One key of a client-side sort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortColumn {
    pub column: String,
    pub descending: bool,
}

impl ResultTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of `column` in row `row`
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Stable sort by the given keys; unknown columns are ignored.
    pub fn sort_by_columns(&mut self, order_by: &[SortColumn]) {
        let col_indices: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let keys: Vec<(usize, bool)> = order_by
            .iter()
            .filter_map(|ob| col_indices.get(ob.column.as_str()).map(|&i| (i, ob.descending)))
            .collect();

        self.rows.sort_by(|a, b| {
            for &(idx, descending) in &keys {
                let cmp = a[idx].cmp(&b[idx]);
                if cmp != Ordering::Equal {
                    return if descending { cmp.reverse() } else { cmp };
                }
            }
            Ordering::Equal
        });
    }

    pub fn truncate(&mut self, limit: usize) {
        self.rows.truncate(limit);
    }
}

/// Rows serialize as a sequence of objects whose keys follow column order.
impl Serialize for ResultTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&RowRef {
                columns: &self.columns,
                values: row,
            })?;
        }
        seq.end()
    }
}

struct RowRef<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl Serialize for RowRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultTable {
        ResultTable {
            columns: vec!["page".into(), "Count".into()],
            rows: vec![
                vec![Value::String("b".into()), Value::Int64(3)],
                vec![Value::String("a".into()), Value::Int64(7)],
                vec![Value::String("c".into()), Value::Int64(3)],
            ],
        }
    }

    #[test]
    fn test_sort_descending_is_stable() {
        let mut table = sample();
        table.sort_by_columns(&[SortColumn {
            column: "Count".into(),
            descending: true,
        }]);
        let pages: Vec<_> = (0..3).map(|i| table.get(i, "page").unwrap().to_string()).collect();
        assert_eq!(pages, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_serialize_keeps_column_order() {
        let table = ResultTable {
            columns: vec!["z".into(), "a".into()],
            rows: vec![vec![Value::Int64(1), Value::Int64(2)]],
        };
        let text = serde_json::to_string(&table).unwrap();
        assert_eq!(text, r#"[{"z":1,"a":2}]"#);
    }

    #[test]
    fn test_truncate() {
        let mut table = sample();
        table.truncate(1);
        assert_eq!(table.row_count(), 1);
    }
}
