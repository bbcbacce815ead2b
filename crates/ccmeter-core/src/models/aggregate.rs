//! Aggregation cell and per-file cache document models
//!
//! These structs are the on-disk cache schema: one pretty-printed JSON
//! document per session id, `hourlyStats` ordered by hour ascending and
//! `limitMessages` by timestamp ascending.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Schema version stamped into every cached document. Bump when the
/// aggregation semantics change; old documents then decode-fail and reparse.
pub const CACHE_SCHEMA_VERSION: u32 = 2;

/// One aggregation cell keyed by (hour, model, project).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyData {
    /// Unix seconds truncated to the hour (UTC).
    pub hour: i64,
    pub model: String,
    pub project_name: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub total_tokens: u64,
    pub message_count: u64,
    /// First observed entry within `[hour, hour+3600)`, Unix seconds.
    pub first_entry_time: i64,
    /// Last observed entry within `[hour, hour+3600)`, Unix seconds.
    pub last_entry_time: i64,
}

/// File identity signals captured when the cache document was written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    /// Modification time, Unix seconds.
    pub last_modified: i64,
    pub file_size: u64,
    pub inode: u64,
    /// CRC32 of the file tail, 8 lowercase hex chars; empty when unknown.
    #[serde(default)]
    pub content_fingerprint: String,
}

/// A rate-limit marker extracted from the transcript, cached alongside the
/// hourly rollup so re-detection does not need the raw logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedLimitInfo {
    #[serde(rename = "type")]
    pub kind: String,
    /// Unix seconds of the log line carrying the marker.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<i64>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Per-transcript aggregation result; the unit of the file cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedData {
    pub version: u32,
    /// Equals the transcript filename stem.
    pub session_id: String,
    pub file_path: PathBuf,
    pub project_name: String,
    pub hourly_stats: Vec<HourlyData>,
    pub file_meta: FileMeta,
    pub limit_messages: Vec<CachedLimitInfo>,
}

impl AggregatedData {
    pub fn total_tokens(&self) -> u64 {
        self.hourly_stats.iter().map(|h| h.total_tokens).sum()
    }

    pub fn message_count(&self) -> u64 {
        self.hourly_stats.iter().map(|h| h.message_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_document_round_trips_camel_case() {
        let data = AggregatedData {
            version: CACHE_SCHEMA_VERSION,
            session_id: "abc".into(),
            file_path: PathBuf::from("/tmp/abc.jsonl"),
            project_name: "proj".into(),
            hourly_stats: vec![HourlyData {
                hour: 1_700_000_400 / 3600 * 3600,
                model: "claude-sonnet-4-5".into(),
                project_name: "proj".into(),
                input_tokens: 10,
                output_tokens: 20,
                cache_creation_tokens: 0,
                cache_read_tokens: 5,
                total_tokens: 35,
                message_count: 1,
                first_entry_time: 1_700_000_400,
                last_entry_time: 1_700_000_500,
            }],
            file_meta: FileMeta {
                last_modified: 1_700_000_500,
                file_size: 1234,
                inode: 99,
                content_fingerprint: "deadbeef".into(),
            },
            limit_messages: vec![],
        };

        let json = serde_json::to_string_pretty(&data).unwrap();
        assert!(json.contains("\"sessionId\""));
        assert!(json.contains("\"hourlyStats\""));
        assert!(json.contains("\"contentFingerprint\""));

        let back: AggregatedData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_tokens(), 35);
        assert_eq!(back.hourly_stats, data.hourly_stats);
    }
}
