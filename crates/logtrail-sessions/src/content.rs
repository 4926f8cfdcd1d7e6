//! Message content as written by the transcript producer.
//!
//! A record's content is either a plain string, an array of typed blocks,
//! or an object whose own `content` field follows the same rule. Only
//! `text` blocks contribute visible text.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Nested(Box<Content>),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse {
        id: Option<String>,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: Option<String>,
        content: Content,
        is_error: bool,
    },
    Thinking(String),
    Other,
}

impl From<&Value> for Content {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => Content::Text(s.clone()),
            Value::Array(items) => Content::Blocks(items.iter().map(ContentBlock::from).collect()),
            Value::Object(map) => match map.get("content") {
                Some(inner) => Content::Nested(Box::new(Content::from(inner))),
                None => Content::Empty,
            },
            _ => Content::Empty,
        }
    }
}

impl From<&Value> for ContentBlock {
    fn from(value: &Value) -> Self {
        let Some(kind) = value.get("type").and_then(|t| t.as_str()) else {
            // Bare strings inside an array are treated as text.
            return match value.as_str() {
                Some(s) => ContentBlock::Text(s.to_string()),
                None => ContentBlock::Other,
            };
        };

        match kind {
            "text" => match value.get("text").and_then(|t| t.as_str()) {
                Some(text) => ContentBlock::Text(text.to_string()),
                None => ContentBlock::Other,
            },
            "tool_use" => match value.get("name").and_then(|n| n.as_str()) {
                Some(name) => ContentBlock::ToolUse {
                    id: value.get("id").and_then(|v| v.as_str()).map(String::from),
                    name: name.to_string(),
                    input: value.get("input").cloned().unwrap_or(Value::Null),
                },
                None => ContentBlock::Other,
            },
            "tool_result" => ContentBlock::ToolResult {
                tool_use_id: value
                    .get("tool_use_id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                content: value.get("content").map(Content::from).unwrap_or(Content::Empty),
                is_error: value
                    .get("is_error")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            },
            "thinking" => ContentBlock::Thinking(
                value
                    .get("thinking")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ => ContentBlock::Other,
        }
    }
}

impl Content {
    /// Resolve the visible text, descending through nested objects.
    pub fn text(&self) -> String {
        match self {
            Content::Text(s) => s.trim().to_string(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text(t) if !t.trim().is_empty() => Some(t.trim()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Content::Nested(inner) => inner.text(),
            Content::Empty => String::new(),
        }
    }

    /// The typed block list, if this content (or the content it nests) is one.
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            Content::Blocks(blocks) => blocks,
            Content::Nested(inner) => inner.blocks(),
            _ => &[],
        }
    }
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_content() {
        let content = Content::from(&json!("  hello  "));
        assert_eq!(content.text(), "hello");
    }

    #[test]
    fn test_only_text_blocks_are_visible() {
        let content = Content::from(&json!([
            {"type": "text", "text": "first"},
            {"type": "tool_use", "id": "t1", "name": "Read", "input": {}},
            {"type": "thinking", "thinking": "hmm"},
            {"type": "text", "text": "second"}
        ]));
        assert_eq!(content.text(), "first\nsecond");
        assert_eq!(content.blocks().len(), 4);
    }

    #[test]
    fn test_nested_object_recurses() {
        let content = Content::from(&json!({"role": "user", "content": {"content": "deep"}}));
        assert_eq!(content.text(), "deep");
    }

    #[test]
    fn test_object_without_content_is_empty() {
        let content = Content::from(&json!({"role": "user"}));
        assert_eq!(content, Content::Empty);
        assert!(content.text().is_empty());
    }

    #[test]
    fn test_tool_use_without_name_is_other() {
        let block = ContentBlock::from(&json!({"type": "tool_use", "id": "x"}));
        assert_eq!(block, ContentBlock::Other);
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
