use comfy_table::{ContentArrangement, Table};

use super::{FormatError, OutputMode};
use crate::data::ResultTable;

/// Full box borders with a single rule under the header
const BOX_STYLE: &str = "││──├─┼┤│    ┬┴┌┐└┘";

pub fn render(table: &ResultTable, mode: OutputMode) -> Result<String, FormatError> {
    match mode {
        OutputMode::Table => Ok(render_table(table)),
        OutputMode::Json => render_json(table),
    }
}

/// Box-drawn table; an empty row set renders as nothing at all
pub fn render_table(table: &ResultTable) -> String {
    if table.is_empty() {
        return String::new();
    }

    let mut rendered = Table::new();
    rendered
        .load_preset(BOX_STYLE)
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(table.columns.iter().map(String::as_str));

    for row in &table.rows {
        rendered.add_row(row.iter().map(|v| v.to_string()));
    }
    rendered.to_string()
}

/// Array of row objects, keys in column order, 2-space indentation
pub fn render_json(table: &ResultTable) -> Result<String, FormatError> {
    Ok(serde_json::to_string_pretty(table)?)
}
