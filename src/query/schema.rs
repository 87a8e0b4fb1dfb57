//! Explicit schema knowledge handed to the plan builder.
//!
//! Nothing here is global: the caller builds a [`Schema`], either permissive
//! (any column of any table is accepted) or populated from introspection, and
//! threads it through [`plan_query`](super::planner::plan_query).

use std::collections::HashMap;

use super::planner::PlanError;

/// Name of the store's primary time column
pub const TIME_COLUMN: &str = "__time";

/// Column type as reported by the store's segment metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Time,
    String,
    Long,
    Double,
    HyperUnique,
    ThetaSketch,
    Complex(String),
    /// Column accepted without introspection
    Unknown,
}

impl ColumnType {
    pub fn from_druid(type_name: &str) -> Self {
        // Newer brokers wrap complex types as COMPLEX<name>
        let type_name = type_name
            .strip_prefix("COMPLEX<")
            .and_then(|t| t.strip_suffix('>'))
            .unwrap_or(type_name);
        match type_name {
            "STRING" => ColumnType::String,
            "LONG" => ColumnType::Long,
            "FLOAT" | "DOUBLE" => ColumnType::Double,
            "hyperUnique" => ColumnType::HyperUnique,
            "thetaSketch" => ColumnType::ThetaSketch,
            other => ColumnType::Complex(other.to_string()),
        }
    }

    /// Type label shown by `SHOW COLUMNS`
    pub fn label(&self) -> &str {
        match self {
            ColumnType::Time => "TIME",
            ColumnType::String => "STRING",
            ColumnType::Long => "LONG",
            ColumnType::Double => "DOUBLE",
            ColumnType::HyperUnique => "hyperUnique",
            ColumnType::ThetaSketch => "thetaSketch",
            ColumnType::Complex(name) => name,
            ColumnType::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
}

/// Known columns of one datasource, `__time` first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasourceSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl DatasourceSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: vec![ColumnInfo {
                name: TIME_COLUMN.to_string(),
                column_type: ColumnType::Time,
            }],
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        if name != TIME_COLUMN {
            self.columns.push(ColumnInfo { name, column_type });
        }
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Schema context for planning
#[derive(Debug, Clone, Default)]
pub struct Schema {
    datasources: HashMap<String, DatasourceSchema>,
    permissive: bool,
}

impl Schema {
    /// Accepts any table and column not described by a registered datasource
    pub fn permissive() -> Self {
        Self {
            datasources: HashMap::new(),
            permissive: true,
        }
    }

    /// Only registered datasources resolve
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn with_datasource(mut self, datasource: DatasourceSchema) -> Self {
        self.add_datasource(datasource);
        self
    }

    pub fn add_datasource(&mut self, datasource: DatasourceSchema) {
        self.datasources.insert(datasource.name.clone(), datasource);
    }

    pub fn datasource(&self, name: &str) -> Option<&DatasourceSchema> {
        self.datasources.get(name)
    }

    pub fn is_permissive(&self) -> bool {
        self.permissive
    }

    pub fn resolve_table(&self, table: &str) -> Result<(), PlanError> {
        if self.permissive || self.datasources.contains_key(table) {
            Ok(())
        } else {
            Err(PlanError::UnknownTable(table.to_string()))
        }
    }

    /// Resolve a column of `table` to its type
    pub fn resolve_column(&self, table: &str, column: &str) -> Result<ColumnType, PlanError> {
        if column == TIME_COLUMN {
            return Ok(ColumnType::Time);
        }
        match self.datasources.get(table) {
            Some(ds) => ds
                .column(column)
                .map(|c| c.column_type.clone())
                .ok_or_else(|| PlanError::UnknownColumn(column.to_string())),
            None if self.permissive => Ok(ColumnType::Unknown),
            None => Err(PlanError::UnknownTable(table.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wikipedia() -> DatasourceSchema {
        DatasourceSchema::new("wikipedia")
            .with_column("page", ColumnType::String)
            .with_column("count", ColumnType::Long)
            .with_column("user_theta", ColumnType::ThetaSketch)
    }

    #[test]
    fn test_permissive_accepts_anything() {
        let schema = Schema::permissive();
        assert!(schema.resolve_table("anything").is_ok());
        assert_eq!(schema.resolve_column("anything", "x").unwrap(), ColumnType::Unknown);
        assert_eq!(schema.resolve_column("anything", "__time").unwrap(), ColumnType::Time);
    }

    #[test]
    fn test_registered_datasource_is_strict_even_when_permissive() {
        let schema = Schema::permissive().with_datasource(wikipedia());
        assert_eq!(schema.resolve_column("wikipedia", "count").unwrap(), ColumnType::Long);
        assert!(matches!(
            schema.resolve_column("wikipedia", "nope"),
            Err(PlanError::UnknownColumn(c)) if c == "nope"
        ));
    }

    #[test]
    fn test_strict_rejects_unknown_table() {
        let schema = Schema::strict().with_datasource(wikipedia());
        assert!(matches!(
            schema.resolve_table("logs"),
            Err(PlanError::UnknownTable(t)) if t == "logs"
        ));
    }

    #[test]
    fn test_druid_type_mapping() {
        assert_eq!(ColumnType::from_druid("FLOAT"), ColumnType::Double);
        assert_eq!(ColumnType::from_druid("thetaSketch"), ColumnType::ThetaSketch);
        assert_eq!(
            ColumnType::from_druid("approxHistogram").label(),
            "approxHistogram"
        );
    }
}
