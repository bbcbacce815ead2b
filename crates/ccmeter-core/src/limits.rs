//! Rate-limit marker detection
//!
//! A priority-ordered registry of strategies scans free-text content for
//! rate-limit events. The highest-priority strategy whose `can_parse`
//! matches and whose `parse` yields a result wins. New markers are added by
//! appending a strategy value, not by subclassing.

use crate::models::{CachedLimitInfo, ContentItem, ConversationRecord, RecordKind};
use once_cell::sync::Lazy;
use regex::Regex;

/// One detected rate-limit marker.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitResult {
    pub kind: String,
    /// Unix seconds of the log line carrying the marker.
    pub timestamp: i64,
    /// Unix seconds at which the provider said the window resets.
    pub reset_time: Option<i64>,
    pub content: String,
    pub model: Option<String>,
    pub confidence: f64,
}

impl LimitResult {
    pub fn to_cached(&self) -> CachedLimitInfo {
        CachedLimitInfo {
            kind: self.kind.clone(),
            timestamp: self.timestamp,
            reset_time: self.reset_time,
            content: self.content.clone(),
            model: self.model.clone(),
        }
    }
}

/// A single detection rule.
pub trait LimitStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u8;
    fn can_parse(&self, content: &str) -> bool;
    fn parse(&self, content: &str, ts: i64, model: Option<&str>) -> Option<LimitResult>;
}

static RESET_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"limit reached\|(\d+)").expect("valid reset marker regex"));

static WAIT_MINUTES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"wait (\d+) minutes").expect("valid wait regex"));

/// Millisecond timestamps are larger than any plausible second count.
fn normalize_epoch(raw: i64) -> i64 {
    if raw > 1_000_000_000_000 {
        raw / 1_000
    } else {
        raw
    }
}

/// `limit reached|<epoch>` markers carrying an explicit reset timestamp.
struct ResetTimestampStrategy;

impl LimitStrategy for ResetTimestampStrategy {
    fn name(&self) -> &'static str {
        "reset_timestamp"
    }

    fn priority(&self) -> u8 {
        15
    }

    fn can_parse(&self, content: &str) -> bool {
        RESET_MARKER_RE.is_match(content)
    }

    fn parse(&self, content: &str, ts: i64, model: Option<&str>) -> Option<LimitResult> {
        let caps = RESET_MARKER_RE.captures(content)?;
        let raw: i64 = caps.get(1)?.as_str().parse().ok()?;
        Some(LimitResult {
            kind: "limit_reached".to_string(),
            timestamp: ts,
            reset_time: Some(normalize_epoch(raw)),
            content: content.to_string(),
            model: model.map(str::to_string),
            confidence: 1.0,
        })
    }
}

/// Opus-specific limits, optionally with a `wait N minutes` hint.
struct OpusLimitStrategy;

const LIMIT_PHRASES: [&str; 4] = ["rate limit", "limit exceeded", "limit reached", "limit hit"];

impl LimitStrategy for OpusLimitStrategy {
    fn name(&self) -> &'static str {
        "opus_limit"
    }

    fn priority(&self) -> u8 {
        10
    }

    fn can_parse(&self, content: &str) -> bool {
        let lowered = content.to_ascii_lowercase();
        lowered.contains("opus") && LIMIT_PHRASES.iter().any(|p| lowered.contains(p))
    }

    fn parse(&self, content: &str, ts: i64, model: Option<&str>) -> Option<LimitResult> {
        let lowered = content.to_ascii_lowercase();
        let reset_time = WAIT_MINUTES_RE
            .captures(&lowered)
            .and_then(|c| c.get(1)?.as_str().parse::<i64>().ok())
            .map(|minutes| ts + minutes * 60);

        Some(LimitResult {
            kind: "opus_limit".to_string(),
            timestamp: ts,
            reset_time,
            content: content.to_string(),
            model: model.map(str::to_string),
            confidence: if reset_time.is_some() { 1.0 } else { 0.9 },
        })
    }
}

/// The Claude AI web-app limit banner; delegates to the reset-timestamp
/// parser when a machine-readable marker rides along.
struct ClaudeAiStrategy;

impl LimitStrategy for ClaudeAiStrategy {
    fn name(&self) -> &'static str {
        "claude_ai"
    }

    fn priority(&self) -> u8 {
        8
    }

    fn can_parse(&self, content: &str) -> bool {
        content
            .to_ascii_lowercase()
            .contains("claude ai usage limit reached")
    }

    fn parse(&self, content: &str, ts: i64, model: Option<&str>) -> Option<LimitResult> {
        let delegate = ResetTimestampStrategy;
        if delegate.can_parse(content) {
            return delegate.parse(content, ts, model);
        }
        Some(LimitResult {
            kind: "api_error_limit".to_string(),
            timestamp: ts,
            reset_time: None,
            content: content.to_string(),
            model: model.map(str::to_string),
            confidence: 0.8,
        })
    }
}

/// Catch-all phrasing without structure.
struct GeneralLimitStrategy;

const GENERAL_PHRASES: [&str; 4] = [
    "rate limit",
    "limit exceeded",
    "you've reached",
    "quota exceeded",
];

impl LimitStrategy for GeneralLimitStrategy {
    fn name(&self) -> &'static str {
        "general"
    }

    fn priority(&self) -> u8 {
        5
    }

    fn can_parse(&self, content: &str) -> bool {
        let lowered = content.to_ascii_lowercase();
        GENERAL_PHRASES.iter().any(|p| lowered.contains(p))
    }

    fn parse(&self, content: &str, ts: i64, model: Option<&str>) -> Option<LimitResult> {
        Some(LimitResult {
            kind: "system_limit".to_string(),
            timestamp: ts,
            reset_time: None,
            content: content.to_string(),
            model: model.map(str::to_string),
            confidence: 0.6,
        })
    }
}

/// Priority-ordered strategy registry.
pub struct LimitRegistry {
    strategies: Vec<Box<dyn LimitStrategy>>,
}

impl Default for LimitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LimitRegistry {
    pub fn new() -> Self {
        let mut strategies: Vec<Box<dyn LimitStrategy>> = vec![
            Box::new(ResetTimestampStrategy),
            Box::new(OpusLimitStrategy),
            Box::new(ClaudeAiStrategy),
            Box::new(GeneralLimitStrategy),
        ];
        strategies.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self { strategies }
    }

    /// Run the registry against one text fragment.
    pub fn detect(&self, content: &str, ts: i64, model: Option<&str>) -> Option<LimitResult> {
        for strategy in &self.strategies {
            if strategy.can_parse(content) {
                if let Some(result) = strategy.parse(content, ts, model) {
                    return Some(result);
                }
            }
        }
        None
    }

    /// Scan a record's content for limit markers.
    ///
    /// `system` lines are scanned through their top-level content;
    /// `user`/`assistant` lines through each text item and each tool_result
    /// payload of their message content.
    pub fn scan_record(&self, record: &ConversationRecord) -> Vec<LimitResult> {
        let Some(ts) = record.unix() else {
            return Vec::new();
        };
        let model = record
            .message
            .as_ref()
            .and_then(|m| m.model.as_deref())
            .filter(|m| !m.is_empty());

        let mut results = Vec::new();
        match record.kind {
            RecordKind::System => {
                if let Some(content) = &record.content {
                    let text = content.flat_text();
                    if let Some(result) = self.detect(&text, ts, model) {
                        results.push(result);
                    }
                }
            }
            RecordKind::User | RecordKind::Assistant => {
                let Some(content) = record.message.as_ref().and_then(|m| m.content.as_ref())
                else {
                    return results;
                };
                for item in content.items() {
                    let fragment = match item {
                        ContentItem::Text { text } => text,
                        ContentItem::ToolResult {
                            content: Some(inner),
                            ..
                        } => inner.flat_text(),
                        _ => continue,
                    };
                    if let Some(result) = self.detect(&fragment, ts, model) {
                        results.push(result);
                    }
                }
            }
            _ => {}
        }
        results
    }

    /// Scan a whole transcript, ascending by timestamp.
    pub fn scan_records(&self, records: &[ConversationRecord]) -> Vec<LimitResult> {
        let mut results: Vec<LimitResult> = records
            .iter()
            .flat_map(|r| self.scan_record(r))
            .collect();
        results.sort_by_key(|r| r.timestamp);
        results
    }
}
