//! Hourly usage aggregation
//!
//! Rolls one transcript up into `(hour, model)` cells with request-level
//! deduplication. Transcripts may carry several streaming partials for the
//! same request; the final accounting takes, for each token kind, the
//! maximum the request attains, charged to the hour of first sight.
//! Cost is never stored in a cell; it is computed on read from pricing.

use crate::models::{ConversationRecord, HourlyData, TokenUsage};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

const HOUR: i64 = 3_600;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid uuid regex")
});

/// Per-request accumulator for pass 2.
struct RequestCell {
    hour: i64,
    model: String,
    usage: TokenUsage,
    first_entry: i64,
    last_entry: i64,
}

/// Aggregate one transcript's records into hour cells, ascending by hour.
pub fn aggregate_records(records: &[ConversationRecord], project_name: &str) -> Vec<HourlyData> {
    // Pass 1: first-seen hour per requestId, in file order.
    let mut first_hour: HashMap<&str, i64> = HashMap::new();
    for record in records {
        if !qualifies(record) {
            continue;
        }
        let Some(ts) = record.unix() else { continue };
        let request_id = record.request_id.as_deref().unwrap_or_default();
        first_hour.entry(request_id).or_insert(ts / HOUR * HOUR);
    }

    // Pass 2: per-(hour, model, request) maxima and entry bounds.
    let mut requests: HashMap<(i64, String, String), RequestCell> = HashMap::new();
    for record in records {
        if !qualifies(record) {
            continue;
        }
        let Some(ts) = record.unix() else { continue };
        let request_id = record.request_id.as_deref().unwrap_or_default();
        let hour = first_hour[request_id];
        let model = record.model_or_unknown().to_string();
        let usage = record.usage().copied().unwrap_or_default();

        let cell = requests
            .entry((hour, model.clone(), request_id.to_string()))
            .or_insert(RequestCell {
                hour,
                model,
                usage: TokenUsage::default(),
                first_entry: ts,
                last_entry: ts,
            });
        cell.usage = cell.usage.max_by_kind(&usage);
        cell.first_entry = cell.first_entry.min(ts);
        cell.last_entry = cell.last_entry.max(ts);
    }

    // Pass 3: sum request maxima into (hour, model) cells.
    let mut cells: HashMap<(i64, String), HourlyData> = HashMap::new();
    for request in requests.into_values() {
        let entry = cells
            .entry((request.hour, request.model.clone()))
            .or_insert_with(|| HourlyData {
                hour: request.hour,
                model: request.model.clone(),
                project_name: project_name.to_string(),
                input_tokens: 0,
                output_tokens: 0,
                cache_creation_tokens: 0,
                cache_read_tokens: 0,
                total_tokens: 0,
                message_count: 0,
                first_entry_time: i64::MAX,
                last_entry_time: 0,
            });

        entry.input_tokens += request.usage.input_tokens;
        entry.output_tokens += request.usage.output_tokens;
        entry.cache_creation_tokens += request.usage.cache_creation_input_tokens;
        entry.cache_read_tokens += request.usage.cache_read_input_tokens;
        entry.total_tokens += request.usage.total();
        entry.message_count += 1;
        // entry bounds stay inside the cell's hour
        entry.first_entry_time = entry.first_entry_time.min(request.first_entry.max(request.hour));
        entry.last_entry_time = entry
            .last_entry_time
            .max(request.last_entry.min(request.hour + HOUR - 1));
    }

    let mut out: Vec<HourlyData> = cells.into_values().collect();
    out.sort_by(|a, b| a.hour.cmp(&b.hour).then_with(|| a.model.cmp(&b.model)));
    out
}

fn qualifies(record: &ConversationRecord) -> bool {
    record.is_usage_bearing()
        && record.request_id.as_deref().is_some_and(|r| !r.is_empty())
        && record
            .message
            .as_ref()
            .and_then(|m| m.id.as_deref())
            .is_some_and(|id| !id.is_empty())
}

/// Project name of a transcript path.
///
/// The immediate parent directory names the project. A UUID parent (per-run
/// subdirectories) is qualified by its grandparent, except under the
/// `projects` root.
pub fn extract_project_name(path: &Path) -> String {
    let parent = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if !UUID_RE.is_match(parent) {
        return parent.to_string();
    }

    let grandparent = path
        .parent()
        .and_then(|p| p.parent())
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if grandparent.is_empty() || grandparent == "projects" || grandparent == "." {
        parent.to_string()
    } else {
        format!("{grandparent}/{parent}")
    }
}
