use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a transcript message, classified from the record's `type`/`role` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
    ToolResult,
    Thinking,
    Unknown,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
            MessageRole::ToolResult => "tool_result",
            MessageRole::Thinking => "thinking",
            MessageRole::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = std::convert::Infallible;

    /// Never fails: anything unrecognised is `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "user" | "human" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            "system" => MessageRole::System,
            "tool" | "tool_use" | "tool_call" => MessageRole::Tool,
            "tool_result" => MessageRole::ToolResult,
            "thinking" => MessageRole::Thinking,
            _ => MessageRole::Unknown,
        })
    }
}

/// A single visible message extracted from a transcript line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub token_count: u64,
}

/// Token counts split by billing component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_write_tokens)
            .saturating_add(self.cache_read_tokens)
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_write_tokens = self.cache_write_tokens.saturating_add(other.cache_write_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(other.cache_read_tokens);
    }
}

/// One tool invocation correlated with the usage of the record that issued it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedToolUsageEntry {
    pub tool_name: String,
    /// Tool input serialized as JSON.
    pub tool_input: String,
    pub tool_result_preview: Option<String>,
    pub success: bool,
    pub tokens: TokenUsage,
    pub cost_usd: f64,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
    pub entry_hash: String,
    /// Position of the tool call among the originating message's content blocks.
    pub tool_index: usize,
    pub model: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Invocation counts keyed by resolved tool name.
pub type ToolUsageCounts = BTreeMap<String, u64>;

/// A transcript file found by the directory scanner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionFile {
    pub path: PathBuf,
    /// Last-modified time in milliseconds since the Unix epoch.
    pub modified_time: i64,
}

/// Lifecycle status shown to UI collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Idle,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Archived => "archived",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "idle" => Ok(SessionStatus::Idle),
            "archived" => Ok(SessionStatus::Archived),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// A persisted session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub project_name: String,
    pub file_path: PathBuf,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub tokens: TokenUsage,
    /// Always `tokens.total()`.
    pub token_count: u64,
    pub cost_usd: f64,
    pub model: Option<String>,
    pub status: SessionStatus,
    pub file_modified_time: i64,
}

impl Session {
    /// A previous parse produced messages but no usage.
    pub fn needs_recovery(&self) -> bool {
        self.token_count == 0 && self.message_count > 0
    }
}

/// The fields the engine owns when writing a session.
///
/// `status` is only applied when the row is first inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpsert {
    pub id: String,
    pub project_name: String,
    pub file_path: PathBuf,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub tokens: TokenUsage,
    pub cost_usd: f64,
    pub model: Option<String>,
    pub status: SessionStatus,
    pub file_modified_time: i64,
}

/// Filter parameters for listing sessions.
#[derive(Debug, Default, Clone)]
pub struct SessionFilter {
    pub project: Option<String>,
    pub model: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    /// Substring match on project name or session id.
    pub search: Option<String>,
    /// Only sessions with messages but zero tokens.
    pub needs_recovery: bool,
    pub limit: Option<usize>,
}
