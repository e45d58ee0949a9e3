// src/output.rs

//! Terminal rendering for command results.
//!
//! Commands print either a plain-text table (default) or raw JSON
//! (`--json`). Logs always go to stderr, so stdout stays parseable.

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::IsTerminal;

/// A rendered table: headers plus stringified rows.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub title: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            title: None,
            headers,
            rows: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Render with padded columns. Headers are bold when colour is enabled.
    pub fn render(&self, use_color: bool) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let mut out = String::new();
        if let Some(title) = &self.title {
            out.push_str(&paint(title, "1", use_color));
            out.push('\n');
        }

        let header_line = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| paint(&pad(h, widths[i]), "1", use_color))
            .collect::<Vec<_>>()
            .join("  ");
        out.push_str(header_line.trim_end());
        out.push('\n');

        let rule = widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  ");
        out.push_str(&rule);
        out.push('\n');

        for row in &self.rows {
            let line = row
                .iter()
                .enumerate()
                .map(|(i, cell)| pad(cell, widths.get(i).copied().unwrap_or(0)))
                .collect::<Vec<_>>()
                .join("  ");
            out.push_str(line.trim_end());
            out.push('\n');
        }

        out.trim_end().to_string()
    }
}

fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        text.to_string()
    } else {
        format!("{}{}", text, " ".repeat(width - len))
    }
}

/// Build a table from a list of API objects.
///
/// Column order follows the first item: `id` and `name` first, then the
/// remaining keys as they appear. Returns `None` for an empty list.
pub fn api_list_to_table(items: &[Value]) -> Option<Table> {
    let first = items.first()?.as_object()?;

    let mut columns: Vec<String> = Vec::new();
    for key in ["id", "name"] {
        if first.contains_key(key) {
            columns.push(key.to_string());
        }
    }
    for key in first.keys() {
        if key != "id" && key != "name" {
            columns.push(key.clone());
        }
    }

    let mut table = Table::new(columns.clone());
    for item in items {
        let row = columns
            .iter()
            .map(|c| item.get(c).map(cell_text).unwrap_or_default())
            .collect();
        table.add_row(row);
    }
    Some(table)
}

/// Display form of a JSON value inside a table cell.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

/// Print a list of API objects as a table, or as JSON when requested.
pub fn print_list(items: &[Value], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(items).context("Failed to format output as JSON")?
        );
        return Ok(());
    }

    if let Some(table) = api_list_to_table(items) {
        println!("{}", table.render(should_use_color()));
    }
    Ok(())
}

/// Print a single API object as pretty JSON.
pub fn print_object(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to format output as JSON")?
    );
    Ok(())
}

pub fn should_use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::io::stdout().is_terminal()
}

pub fn stderr_use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::io::stderr().is_terminal()
}

pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("\x1b[{}m{}\x1b[0m", color, text)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_and_name_lead_the_columns() {
        let items = vec![json!({"status": "queued", "name": "Nightly", "id": "j1"})];
        let table = api_list_to_table(&items).unwrap();
        assert_eq!(table.headers, vec!["id", "name", "status"]);
        assert_eq!(table.rows[0], vec!["j1", "Nightly", "queued"]);
    }

    #[test]
    fn empty_list_has_no_table() {
        assert!(api_list_to_table(&[]).is_none());
    }

    #[test]
    fn nested_values_render_as_json() {
        let items = vec![json!({"id": "r1", "org": {"name": "acme"}, "private": null})];
        let table = api_list_to_table(&items).unwrap();
        assert_eq!(table.rows[0][1], r#"{"name":"acme"}"#);
        assert_eq!(table.rows[0][2], "None");
    }

    #[test]
    fn render_pads_columns_without_color() {
        let mut table = Table::new(vec!["id".into(), "status".into()]).with_title("Jobs");
        table.add_row(vec!["abc".into(), "ok".into()]);
        let rendered = table.render(false);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "Jobs");
        assert_eq!(lines[1], "id   status");
        assert_eq!(lines[2], "---  ------");
        assert_eq!(lines[3], "abc  ok");
    }
}
