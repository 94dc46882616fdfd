//! Table builder wrapper around comfy-table for consistent list display.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};

/// Create a standard list table with the given headers.
///
/// Uses the NOTHING preset (no borders). Respects `NO_COLOR` via comfy-table.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Render the table under a count line; a placeholder when empty.
pub fn render_list(entity_name: &str, table: &Table, total: usize) -> String {
    if total == 0 {
        return format!("No {entity_name}s found.");
    }
    let noun = if total == 1 {
        entity_name.to_string()
    } else {
        format!("{entity_name}s")
    };
    format!("{total} {noun}:\n{table}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_list() {
        let mut table = list_table(&["pair", "similarity"]);
        table.add_row(vec!["0-1", "96%"]);
        let rendered = render_list("candidate pair", &table, 1);
        assert!(rendered.starts_with("1 candidate pair:"));
        assert!(rendered.contains("PAIR"));
        assert!(rendered.contains("0-1"));

        assert_eq!(
            render_list("candidate pair", &list_table(&["pair"]), 0),
            "No candidate pairs found."
        );
    }
}
