use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use invoicer_core::{InvoiceStatus, Record, utils::truncate};
use owo_colors::OwoColorize;
use serde_json::Value;

/// Widest cell rendered in record tables
const MAX_CELL: usize = 40;

/// Standard output formatting for the CLI
pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    /// Print a system/status message (indented)
    pub fn status(&self, message: &str) {
        println!("  {}", message.dimmed());
    }

    /// Print an info message (indented)
    pub fn info(&self, label: &str, value: &str) {
        println!("  {} {}", label.bright_blue(), value);
    }

    /// Print a success message (indented)
    pub fn success(&self, message: &str) {
        println!("  {} {}", "✓".bright_green(), message);
    }

    /// Print a warning message (indented)
    pub fn warning(&self, message: &str) {
        println!("  {} {}", "⚠".yellow(), message);
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        println!();
        println!("{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(40).dimmed());
    }

    /// Print a key-value pair (indented)
    pub fn kv(&self, key: &str, value: &str) {
        println!("  {} {}", format!("{}:", key).dimmed(), value);
    }

    /// Print a record as aligned key-value pairs, id first
    pub fn record(&self, record: &Record) {
        self.kv("id", &record.id().bright_yellow().to_string());
        for (key, value) in record.fields() {
            self.kv(key, &format_value(key, value));
        }
    }

    /// Print records as a table with one column per field seen
    pub fn records(&self, records: &[Record]) {
        let mut columns: Vec<&str> = vec!["id"];
        for record in records {
            for key in record.fields().keys() {
                if !columns.contains(&key.as_str()) {
                    columns.push(key);
                }
            }
        }

        let mut table = new_table();
        table.set_header(columns.iter().map(|c| Cell::new(c)));
        for record in records {
            table.add_row(columns.iter().map(|column| match *column {
                "id" => Cell::new(record.id()),
                field => Cell::new(
                    record
                        .get(field)
                        .map(|value| truncate(&plain_value(value), MAX_CELL))
                        .unwrap_or_default(),
                ),
            }));
        }
        println!("{table}");
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

/// Table with the CLI's shared look
pub fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Render a field value without JSON quoting
pub fn plain_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_value(key: &str, value: &Value) -> String {
    match (key, value) {
        ("status", Value::String(status)) => format_status_str(status),
        _ => plain_value(value),
    }
}

fn format_status_str(status: &str) -> String {
    match status {
        "paid" => format_status(InvoiceStatus::Paid),
        "sent" => format_status(InvoiceStatus::Sent),
        "overdue" => format_status(InvoiceStatus::Overdue),
        "draft" => format_status(InvoiceStatus::Draft),
        other => other.to_string(),
    }
}

/// Format an invoice status for display
pub fn format_status(status: InvoiceStatus) -> String {
    match status {
        InvoiceStatus::Paid => "paid".bright_green().to_string(),
        InvoiceStatus::Sent => "sent".bright_blue().to_string(),
        InvoiceStatus::Overdue => "overdue".bright_red().to_string(),
        InvoiceStatus::Draft => "draft".dimmed().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn plain_values_drop_quotes() {
        assert_eq!(plain_value(&json!("INV-001")), "INV-001");
        assert_eq!(plain_value(&json!(12.5)), "12.5");
        assert_eq!(plain_value(&Value::Null), "");
    }

    #[test]
    fn unknown_statuses_pass_through() {
        assert_eq!(format_status_str("archived"), "archived");
    }
}
