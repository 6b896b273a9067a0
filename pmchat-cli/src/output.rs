//! Output formatting.

use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use pmchat::{Contact, DisplayMessage};
use serde::Serialize;

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table format
    Table,
    /// JSON format
    Json,
    /// Plain text format
    #[default]
    Plain,
}

/// Trait for plain text output.
pub trait PlainPrint {
    /// Print as plain text with formatting.
    fn plain_print(&self);
}

/// Trait for table row generation.
pub trait TableRow {
    /// Get table headers.
    fn headers() -> Vec<&'static str>;
    /// Get row data as strings.
    fn row(&self) -> Vec<String>;
}

/// Print items in plain text format.
pub fn print_plain<T: PlainPrint>(items: &[T]) {
    if items.is_empty() {
        println!("No results");
        return;
    }
    for item in items {
        item.plain_print();
    }
}

/// Format a timestamp in local time.
pub fn format_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Print a table of items with proper formatting for each output mode.
pub fn print_table<T: TableRow + Serialize + PlainPrint>(items: Vec<T>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items).unwrap_or_default());
        }
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No results");
                return;
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(T::headers());
            for item in &items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
        OutputFormat::Plain => {
            print_plain(&items);
        }
    }
}

/// Print one value as a single JSON line.
pub fn print_json_line<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string(value).unwrap_or_default());
}

/// Wrap the byte ranges of `text` in highlight color.
pub fn highlight(text: &str, ranges: &[std::ops::Range<usize>]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for range in ranges {
        let (Some(before), Some(matched)) = (text.get(cursor..range.start), text.get(range.clone()))
        else {
            continue;
        };
        out.push_str(before);
        out.push_str(&matched.black().on_yellow().to_string());
        cursor = range.end;
    }
    out.push_str(text.get(cursor..).unwrap_or_default());
    out
}

// ============================================================================
// Display implementations for models
// ============================================================================

/// Row for conversation list display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactRow {
    pub chat_id: String,
    pub receiver_id: String,
    pub name: String,
    pub last_message: String,
    pub unread: u32,
}

impl From<&Contact> for ContactRow {
    fn from(c: &Contact) -> Self {
        Self {
            chat_id: c.chat_id.to_string(),
            receiver_id: c.receiver_id.to_string(),
            name: c.name.clone(),
            last_message: c.last_message.clone(),
            unread: c.unread_count,
        }
    }
}

impl TableRow for ContactRow {
    fn headers() -> Vec<&'static str> {
        vec!["Chat", "With", "Last message", "Unread"]
    }
    fn row(&self) -> Vec<String> {
        vec![
            self.chat_id.clone(),
            self.name.clone(),
            self.last_message.clone(),
            if self.unread > 0 {
                self.unread.to_string()
            } else {
                String::new()
            },
        ]
    }
}

impl PlainPrint for ContactRow {
    fn plain_print(&self) {
        let unread = if self.unread > 0 {
            format!(" ({})", self.unread).red().bold().to_string()
        } else {
            String::new()
        };
        println!("[{}] {}{}", self.chat_id.cyan(), self.name.bold(), unread);
        println!("   {}", self.last_message.dimmed());
    }
}

/// Row for a message in a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub id: String,
    pub from: String,
    pub text: String,
    pub time: String,
    pub created_at: DateTime<Utc>,
    pub pending: bool,
    #[serde(skip)]
    pub is_outgoing: bool,
    #[serde(skip)]
    pub highlights: Vec<std::ops::Range<usize>>,
}

impl MessageRow {
    pub fn new(message: &DisplayMessage, counterpart: &str) -> Self {
        Self {
            id: message.id.clone(),
            from: if message.is_outgoing {
                "You".to_owned()
            } else {
                counterpart.to_owned()
            },
            text: message.text.clone(),
            time: message.timestamp.clone(),
            created_at: message.created_at,
            pending: message.pending,
            is_outgoing: message.is_outgoing,
            highlights: message.highlights.clone(),
        }
    }
}

impl TableRow for MessageRow {
    fn headers() -> Vec<&'static str> {
        vec!["From", "Message", "Time"]
    }
    fn row(&self) -> Vec<String> {
        vec![self.from.clone(), self.text.clone(), format_time(self.created_at)]
    }
}

impl PlainPrint for MessageRow {
    fn plain_print(&self) {
        let from = if self.is_outgoing {
            self.from.green().to_string()
        } else {
            self.from.cyan().to_string()
        };
        let status = if self.pending {
            " sending...".dimmed().to_string()
        } else {
            String::new()
        };
        println!(
            "{} {}{}",
            from,
            self.time.dimmed(),
            status
        );
        for line in highlight(&self.text, &self.highlights).lines() {
            println!("   {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highlight_without_ranges() {
        assert_eq!(highlight("plain text", &[]), "plain text");
    }

    #[test]
    fn test_highlight_keeps_surrounding_text() {
        colored::control::set_override(false);
        assert_eq!(highlight("see the invoice here", &[8..15]), "see the invoice here");
        assert_eq!(highlight("abc", &[5..9]), "abc");
    }

    #[test]
    fn test_contact_row() {
        let contact = Contact {
            chat_id: "c1".into(),
            receiver_id: "u2".into(),
            name: "Ola".to_owned(),
            avatar: None,
            last_message: "hei".to_owned(),
            unread_count: 0,
        };
        let row = ContactRow::from(&contact);
        assert_eq!(row.row(), vec!["c1", "Ola", "hei", ""]);
    }
}
