/// Render one table row as numbered "`column`: value" lines.
///
/// Empty cells and ignored columns are skipped; numbering only counts the
/// cells that are rendered.
pub fn render_row<'a, I>(cells: I, ignored_columns: &[String]) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    cells
        .into_iter()
        .filter(|(column, _)| !ignored_columns.iter().any(|c| c == column))
        .filter(|(_, value)| !value.trim().is_empty())
        .enumerate()
        .map(|(i, (column, value))| format!("{}. `{}`: {}", i + 1, column, value.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Flatten a JSON value to the text placed after the column name.
pub(crate) fn json_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
