//! Transcript line models
//!
//! One JSONL line of a session transcript decodes into a
//! [`ConversationRecord`]. The `content` field arrives on the wire either as
//! a bare string or as an ordered sequence of tagged items; both forms decode
//! and normalize to a sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminant of a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Message,
    Assistant,
    User,
    System,
    #[serde(other)]
    #[default]
    Other,
}

/// Token counters as reported in `message.usage`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }

    /// Per-kind maximum, used to reconcile streaming partials of one request.
    pub fn max_by_kind(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.max(other.input_tokens),
            output_tokens: self.output_tokens.max(other.output_tokens),
            cache_creation_input_tokens: self
                .cache_creation_input_tokens
                .max(other.cache_creation_input_tokens),
            cache_read_input_tokens: self
                .cache_read_input_tokens
                .max(other.cache_read_input_tokens),
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

/// One tagged content item of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Option<MessageContent>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Other,
}

/// String-or-sequence content payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Items(Vec<ContentItem>),
}

impl MessageContent {
    /// Normalize to a sequence: a bare string becomes one text item.
    pub fn items(&self) -> Vec<ContentItem> {
        match self {
            MessageContent::Text(s) => vec![ContentItem::Text { text: s.clone() }],
            MessageContent::Items(items) => items.clone(),
        }
    }

    /// Flatten every directly text-bearing fragment, joined with spaces.
    ///
    /// Descends into tool_result payloads, which are themselves
    /// string-or-sequence.
    pub fn flat_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        self.collect_text(&mut parts);
        parts.join(" ")
    }

    fn collect_text(&self, out: &mut Vec<String>) {
        match self {
            MessageContent::Text(s) => out.push(s.clone()),
            MessageContent::Items(items) => {
                for item in items {
                    match item {
                        ContentItem::Text { text } => out.push(text.clone()),
                        ContentItem::ToolResult {
                            content: Some(inner),
                            ..
                        } => inner.collect_text(out),
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Inner `message` object of user/assistant/message lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

/// One line of a transcript.
///
/// Unknown fields are ignored; missing fields default so schema drift in the
/// source data never fails a whole file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type", default)]
    pub kind: RecordKind,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<MessagePayload>,
    /// Top-level content, present on `system` lines.
    #[serde(default)]
    pub content: Option<MessageContent>,
}

impl ConversationRecord {
    /// Unix timestamp, if the line carried a parseable one.
    pub fn unix(&self) -> Option<i64> {
        self.timestamp.map(|t| t.timestamp())
    }

    /// Model name, `"unknown"` when absent or empty.
    pub fn model_or_unknown(&self) -> &str {
        match self.message.as_ref().and_then(|m| m.model.as_deref()) {
            Some(m) if !m.is_empty() => m,
            _ => "unknown",
        }
    }

    pub fn usage(&self) -> Option<&TokenUsage> {
        self.message.as_ref().and_then(|m| m.usage.as_ref())
    }

    /// True for kinds that carry billable usage.
    pub fn is_usage_bearing(&self) -> bool {
        matches!(self.kind, RecordKind::Message | RecordKind::Assistant)
    }
}
