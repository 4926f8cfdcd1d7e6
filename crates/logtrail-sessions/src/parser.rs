use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::content::{truncate_chars, Content, ContentBlock};
use crate::tools::resolve_tool_names;
use crate::types::{DetailedToolUsageEntry, Message, MessageRole, TokenUsage, ToolUsageCounts};

/// Default number of characters kept from a tool result.
pub const DEFAULT_PREVIEW_CHARS: usize = 200;

/// Everything extracted from one transcript file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTranscript {
    pub messages: Vec<Message>,
    /// Deduplicated token totals.
    pub tokens: TokenUsage,
    /// Deduplicated sum of explicitly logged costs.
    pub cost_usd: f64,
    pub model: Option<String>,
    pub tool_usage_counts: ToolUsageCounts,
    pub detailed_tool_usage: Vec<DetailedToolUsageEntry>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Lines that were not valid records.
    pub skipped_lines: usize,
    /// Size of the input that was parsed.
    pub bytes_read: u64,
}

impl ParsedTranscript {
    pub fn message_count(&self) -> u64 {
        self.messages.len() as u64
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

impl From<RawUsage> for TokenUsage {
    fn from(raw: RawUsage) -> Self {
        TokenUsage {
            input_tokens: raw.input_tokens,
            output_tokens: raw.output_tokens,
            cache_write_tokens: raw.cache_creation_input_tokens,
            cache_read_tokens: raw.cache_read_input_tokens,
        }
    }
}

/// Usage logged by one record, before deduplication.
#[derive(Debug, Clone)]
struct UsageEntry {
    entry_hash: String,
    correlated: bool,
    tokens: TokenUsage,
    cost_usd: f64,
    model: Option<String>,
}

/// Line-delimited transcript parser.
#[derive(Debug, Clone, Copy)]
pub struct TranscriptParser {
    preview_chars: usize,
}

impl Default for TranscriptParser {
    fn default() -> Self {
        Self {
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

impl TranscriptParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars;
        self
    }

    /// Read and parse a transcript file. A read failure is logged and
    /// yields an empty result.
    pub fn parse_file(&self, path: &Path) -> ParsedTranscript {
        match std::fs::read(path) {
            Ok(bytes) => {
                let mut parsed = self.parse(&String::from_utf8_lossy(&bytes));
                parsed.bytes_read = bytes.len() as u64;
                parsed
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read transcript");
                ParsedTranscript::default()
            }
        }
    }

    /// Parse transcript contents. Records are processed in file order.
    pub fn parse(&self, contents: &str) -> ParsedTranscript {
        let mut parsed = ParsedTranscript {
            bytes_read: contents.len() as u64,
            ..Default::default()
        };
        let mut usage_entries: Vec<UsageEntry> = Vec::new();
        // tool_use id -> index into parsed.detailed_tool_usage, for results
        // that arrive in a later record
        let mut pending_results: HashMap<String, usize> = HashMap::new();
        let mut record_model: Option<String> = None;

        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let record: Value = match serde_json::from_str(line) {
                Ok(value @ Value::Object(_)) => value,
                Ok(_) => {
                    tracing::debug!(line = line_no + 1, "Skipping non-object transcript line");
                    parsed.skipped_lines += 1;
                    continue;
                }
                Err(e) => {
                    tracing::debug!(line = line_no + 1, error = %e, "Skipping malformed transcript line");
                    parsed.skipped_lines += 1;
                    continue;
                }
            };

            let nested = record.get("message").filter(|m| m.is_object());
            let timestamp = record.get("timestamp").and_then(parse_timestamp);
            let model = string_field(&record, nested, "model");
            let message_id = nested
                .and_then(|m| m.get("id"))
                .or_else(|| record.get("id"))
                .or_else(|| record.get("uuid"))
                .and_then(|v| v.as_str())
                .map(String::from);
            let request_id = record
                .get("requestId")
                .or_else(|| record.get("request_id"))
                .and_then(|v| v.as_str())
                .map(String::from);
            let entry_hash = entry_hash(message_id.as_deref(), request_id.as_deref());

            if record_model.is_none() {
                record_model = model.clone();
            }

            let usage = record
                .get("usage")
                .or_else(|| nested.and_then(|m| m.get("usage")))
                .and_then(|u| serde_json::from_value::<RawUsage>(u.clone()).ok())
                .map(TokenUsage::from);
            let cost_usd = record
                .get("costUSD")
                .or_else(|| record.get("cost_usd"))
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);

            if let Some(tokens) = usage {
                usage_entries.push(UsageEntry {
                    // Records without correlation ids are never merged.
                    entry_hash: if message_id.is_some() || request_id.is_some() {
                        entry_hash.clone()
                    } else {
                        format!("{}#{}", entry_hash, line_no)
                    },
                    correlated: message_id.is_some() || request_id.is_some(),
                    tokens,
                    cost_usd,
                    model: model.clone(),
                });
            }

            let content = record
                .get("message")
                .or_else(|| record.get("content"))
                .map(Content::from)
                .unwrap_or(Content::Empty);

            let line_tokens = usage.unwrap_or_default();
            let blocks = content.blocks();
            let mut tool_calls: Vec<&str> = Vec::new();
            for (tool_index, block) in blocks.iter().enumerate() {
                match block {
                    ContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(name);
                        for resolved in resolve_tool_names(name, input) {
                            *parsed.tool_usage_counts.entry(resolved).or_insert(0) += 1;
                        }

                        let (preview, success) = match id
                            .as_deref()
                            .and_then(|id| find_result(&blocks[tool_index + 1..], id))
                        {
                            Some((content, is_error)) => {
                                (Some(truncate_chars(&content.text(), self.preview_chars)), !is_error)
                            }
                            None => (None, true),
                        };

                        let entry = DetailedToolUsageEntry {
                            tool_name: name.clone(),
                            tool_input: serde_json::to_string(input).unwrap_or_default(),
                            tool_result_preview: preview,
                            success,
                            tokens: line_tokens,
                            cost_usd,
                            message_id: message_id.clone(),
                            request_id: request_id.clone(),
                            entry_hash: entry_hash.clone(),
                            tool_index,
                            model: model.clone(),
                            timestamp,
                        };

                        if entry.tool_result_preview.is_none() {
                            if let Some(id) = id {
                                pending_results.insert(id.clone(), parsed.detailed_tool_usage.len());
                            }
                        }
                        parsed.detailed_tool_usage.push(entry);
                    }
                    ContentBlock::ToolResult {
                        tool_use_id: Some(tool_use_id),
                        content,
                        is_error,
                    } => {
                        if let Some(idx) = pending_results.remove(tool_use_id) {
                            let entry = &mut parsed.detailed_tool_usage[idx];
                            entry.tool_result_preview =
                                Some(truncate_chars(&content.text(), self.preview_chars));
                            entry.success = !is_error;
                        }
                    }
                    _ => {}
                }
            }

            // A record that only issues tool calls is kept as a tool message
            // naming the calls; otherwise empty records are dropped.
            let text = content.text();
            let (role, text) = if !text.is_empty() {
                let role = match classify_role(&record, nested) {
                    MessageRole::Unknown if !tool_calls.is_empty() => MessageRole::Tool,
                    role => role,
                };
                (role, text)
            } else if !tool_calls.is_empty() {
                (MessageRole::Tool, tool_calls.join(", "))
            } else {
                continue;
            };

            parsed.messages.push(Message {
                role,
                content: text,
                timestamp,
                token_count: line_tokens.total(),
            });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for entry in &usage_entries {
            if entry.correlated && !seen.insert(entry.entry_hash.as_str()) {
                continue;
            }
            parsed.tokens.add(&entry.tokens);
            parsed.cost_usd += entry.cost_usd;
        }

        parsed.model = usage_entries
            .iter()
            .find_map(|e| e.model.clone())
            .or(record_model);
        parsed.start_time = parsed.messages.iter().filter_map(|m| m.timestamp).min();
        parsed.end_time = parsed.messages.iter().filter_map(|m| m.timestamp).max();

        parsed
    }
}

/// Parse transcript contents with default options.
pub fn parse_transcript(contents: &str) -> ParsedTranscript {
    TranscriptParser::default().parse(contents)
}

/// Read and parse a transcript file with default options.
pub fn parse_transcript_file(path: &Path) -> ParsedTranscript {
    TranscriptParser::default().parse_file(path)
}

/// Deterministic key for deduplicating usage records that describe the
/// same API response.
pub fn entry_hash(message_id: Option<&str>, request_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message_id.unwrap_or_default().as_bytes());
    hasher.update(b":");
    hasher.update(request_id.unwrap_or_default().as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

fn classify_role(record: &Value, nested: Option<&Value>) -> MessageRole {
    record
        .get("type")
        .or_else(|| record.get("role"))
        .or_else(|| nested.and_then(|m| m.get("role")))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(MessageRole::Unknown)
}

fn string_field(record: &Value, nested: Option<&Value>, key: &str) -> Option<String> {
    record
        .get(key)
        .or_else(|| nested.and_then(|m| m.get(key)))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn find_result<'a>(blocks: &'a [ContentBlock], tool_use_id: &str) -> Option<(&'a Content, bool)> {
    blocks.iter().find_map(|b| match b {
        ContentBlock::ToolResult {
            tool_use_id: Some(id),
            content,
            is_error,
        } if id == tool_use_id => Some((content, *is_error)),
        _ => None,
    })
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
