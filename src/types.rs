use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A priority definition configured per board: stable id, the emoji glyph
/// used to mark it in task lines, and a human-facing label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityDef {
    pub id: String,
    pub emoji: String,
    pub label: String,
}

impl PriorityDef {
    pub fn new(id: &str, emoji: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            emoji: emoji.to_string(),
            label: label.to_string(),
        }
    }
}

/// Board configuration. Owned by the configuration layer, read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: String,
    pub name: String,
    /// Path of the board's markdown file, relative to the vault root.
    pub file_path: String,
    /// Ordered column names. The first column receives new unfinished cards.
    pub columns: Vec<String>,
    /// Priority definitions in detection order.
    pub priorities: Vec<PriorityDef>,
    /// Columns whose cards count as done. Empty means "last column".
    #[serde(default)]
    pub done_columns: Vec<String>,
}

impl Board {
    /// Column that newly added unfinished cards land in.
    pub fn backlog_column(&self) -> &str {
        self.columns.first().map(String::as_str).unwrap_or("Backlog")
    }

    /// Column that newly added done cards land in.
    pub fn primary_done_column(&self) -> &str {
        self.done_columns
            .first()
            .or_else(|| self.columns.last())
            .map(String::as_str)
            .unwrap_or("Done")
    }

    pub fn is_done_column(&self, column: &str) -> bool {
        if self.done_columns.is_empty() {
            self.columns.last().map(String::as_str) == Some(column)
        } else {
            self.done_columns.iter().any(|c| c == column)
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn priority(&self, id: &str) -> Option<&PriorityDef> {
        self.priorities.iter().find(|p| p.id == id)
    }
}

/// One task line as parsed out of a board file. Ephemeral: recomputed from
/// the file text on every pass, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedTask {
    /// Display title with the identity marker and priority emoji stripped.
    pub title: String,
    /// The full original line, byte for byte.
    pub raw_line: String,
    /// 1-based line number in the file.
    pub line_number: usize,
    pub done: bool,
    /// Detected priority id, if any configured emoji appears in the title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// URLs in appearance order: markdown-link targets first, then bare URLs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// Trimmed text of indented lines following the task line.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_items: Vec<String>,
    /// Stable ID from an embedded `kb:id=` marker, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker_id: Option<String>,
    /// Column name from an embedded `kb:col=` hint, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_hint: Option<String>,
}

/// Persistent sidecar record for one task line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    /// Stable 8-hex-char identity, unique across all boards.
    pub id: String,
    pub board_id: String,
    pub column: String,
    /// Position within the column, maintained by the application.
    pub position: usize,
    pub title: String,
    /// Cached copy of the task line as last seen on disk.
    pub raw_line: String,
    /// Cached 1-based line number as last seen on disk.
    pub line_number: usize,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_items: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// SHA-256 of the raw line, used to detect unrelated-field drift.
    pub fingerprint: String,
    /// Per-board monotonic sequence number.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
