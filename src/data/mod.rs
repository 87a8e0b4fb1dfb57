pub mod table;
pub mod value;

pub use table::{ResultTable, SortColumn};
pub use value::{format_iso_millis, parse_iso_millis, Value};
