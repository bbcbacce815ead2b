//! In-memory live-data cache
//!
//! Holds the working set the detector reads from, keyed by session id, with
//! dirty tracking for the persistence loop and a double-buffered clear so
//! the UI can reload into a shadow buffer while the displayed one stays
//! intact.

use crate::clock::Clock;
use crate::models::{
    AggregatedData, CachedLimitInfo, ConversationRecord, TimelineEntry, TokenUsage,
    WindowDetectionInfo,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// One cached session.
#[derive(Debug, Clone)]
pub struct MemoryCacheEntry {
    pub aggregated: Arc<AggregatedData>,
    /// Raw records, present for sessions parsed since process start.
    pub raw_logs: Option<Arc<Vec<ConversationRecord>>>,
    pub last_accessed: i64,
    pub dirty: bool,
}

#[derive(Default)]
struct Inner {
    active: HashMap<String, MemoryCacheEntry>,
    /// Shadow buffer while a clear is pending; writes land here.
    shadow: Option<HashMap<String, MemoryCacheEntry>>,
    window_info: HashMap<String, WindowDetectionInfo>,
}

impl Inner {
    fn live_mut(&mut self) -> &mut HashMap<String, MemoryCacheEntry> {
        self.shadow.as_mut().unwrap_or(&mut self.active)
    }
}

/// Session-keyed live cache. All mutations hold the writer lock; reads hold
/// the reader lock and return defensive copies.
pub struct MemoryCache {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Fetch an entry, refreshing its access time. During a pending clear
    /// the shadow buffer is consulted first so a reload sees its own writes.
    pub fn get(&self, session_id: &str) -> Option<MemoryCacheEntry> {
        let now = self.clock.now_unix();
        let mut inner = self.inner.write();

        if let Some(shadow) = inner.shadow.as_mut() {
            if let Some(entry) = shadow.get_mut(session_id) {
                entry.last_accessed = now;
                return Some(entry.clone());
            }
        }
        inner.active.get_mut(session_id).map(|entry| {
            entry.last_accessed = now;
            entry.clone()
        })
    }

    /// Insert or replace an entry; it starts dirty until persisted.
    pub fn set(
        &self,
        session_id: &str,
        aggregated: Arc<AggregatedData>,
        raw_logs: Option<Arc<Vec<ConversationRecord>>>,
    ) {
        let entry = MemoryCacheEntry {
            aggregated,
            raw_logs,
            last_accessed: self.clock.now_unix(),
            dirty: true,
        };
        self.inner.write().live_mut().insert(session_id.to_string(), entry);
    }

    /// Insert an already-persisted entry (cache hydration); not dirty.
    pub fn set_clean(&self, session_id: &str, aggregated: Arc<AggregatedData>) {
        let entry = MemoryCacheEntry {
            aggregated,
            raw_logs: None,
            last_accessed: self.clock.now_unix(),
            dirty: false,
        };
        self.inner.write().live_mut().insert(session_id.to_string(), entry);
    }

    pub fn delete(&self, session_id: &str) {
        let mut inner = self.inner.write();
        inner.active.remove(session_id);
        if let Some(shadow) = inner.shadow.as_mut() {
            shadow.remove(session_id);
        }
        inner.window_info.remove(session_id);
    }

    pub fn contains(&self, session_id: &str) -> bool {
        let inner = self.inner.read();
        inner.active.contains_key(session_id)
            || inner
                .shadow
                .as_ref()
                .is_some_and(|s| s.contains_key(session_id))
    }

    pub fn is_dirty(&self, session_id: &str) -> bool {
        let inner = self.inner.read();
        inner
            .shadow
            .as_ref()
            .and_then(|s| s.get(session_id))
            .or_else(|| inner.active.get(session_id))
            .map(|e| e.dirty)
            .unwrap_or(false)
    }

    /// Entries inserted or updated since the last persist, across both
    /// buffers.
    pub fn dirty_entries(&self) -> Vec<(String, Arc<AggregatedData>)> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for (id, entry) in inner
            .active
            .iter()
            .chain(inner.shadow.iter().flatten())
        {
            if entry.dirty {
                out.push((id.clone(), Arc::clone(&entry.aggregated)));
            }
        }
        out
    }

    /// Clear dirty flags after a successful persist.
    pub fn mark_persisted(&self, session_ids: &[String]) {
        let mut inner = self.inner.write();
        for id in session_ids {
            if let Some(entry) = inner.active.get_mut(id) {
                entry.dirty = false;
            }
            if let Some(entry) = inner.shadow.as_mut().and_then(|s| s.get_mut(id)) {
                entry.dirty = false;
            }
        }
    }

    /// Raw records of one session, when retained.
    pub fn logs_for_file(&self, session_id: &str) -> Option<Arc<Vec<ConversationRecord>>> {
        let inner = self.inner.read();
        inner
            .shadow
            .as_ref()
            .and_then(|s| s.get(session_id))
            .or_else(|| inner.active.get(session_id))
            .and_then(|e| e.raw_logs.as_ref().map(Arc::clone))
    }

    /// Merged timestamp-sorted activity across all sessions in the displayed
    /// buffer. `seconds_back == 0` means unbounded.
    ///
    /// Sessions with raw records contribute one entry per record; hydrated
    /// sessions contribute entries synthesized from each hourly cell's entry
    /// bounds, carrying the cell's (pre-deduplicated) totals on the leading
    /// entry.
    pub fn global_timeline(&self, seconds_back: i64) -> Vec<TimelineEntry> {
        let cutoff = if seconds_back > 0 {
            Some(self.clock.now_unix() - seconds_back)
        } else {
            None
        };

        let inner = self.inner.read();
        let mut timeline = Vec::new();

        for (session_id, entry) in &inner.active {
            let project = entry.aggregated.project_name.clone();
            match &entry.raw_logs {
                Some(logs) => {
                    for record in logs.iter() {
                        let Some(ts) = record.unix() else { continue };
                        if cutoff.is_some_and(|c| ts < c) {
                            continue;
                        }
                        timeline.push(TimelineEntry {
                            timestamp: ts,
                            project_name: project.clone(),
                            session_id: session_id.clone(),
                            model: record.model_or_unknown().to_string(),
                            usage: record.usage().copied().unwrap_or_default(),
                            message_count: u64::from(record.is_usage_bearing()),
                            request_id: record.request_id.clone().filter(|r| !r.is_empty()),
                            record: Some(Arc::new(record.clone())),
                        });
                    }
                }
                None => {
                    for cell in &entry.aggregated.hourly_stats {
                        if cutoff.is_some_and(|c| cell.last_entry_time < c) {
                            continue;
                        }
                        timeline.push(TimelineEntry {
                            timestamp: cell.first_entry_time,
                            project_name: project.clone(),
                            session_id: session_id.clone(),
                            model: cell.model.clone(),
                            usage: TokenUsage {
                                input_tokens: cell.input_tokens,
                                output_tokens: cell.output_tokens,
                                cache_creation_input_tokens: cell.cache_creation_tokens,
                                cache_read_input_tokens: cell.cache_read_tokens,
                            },
                            message_count: cell.message_count,
                            request_id: None,
                            record: None,
                        });
                        if cell.last_entry_time > cell.first_entry_time {
                            timeline.push(TimelineEntry {
                                timestamp: cell.last_entry_time,
                                project_name: project.clone(),
                                session_id: session_id.clone(),
                                model: cell.model.clone(),
                                usage: TokenUsage::default(),
                                message_count: 0,
                                request_id: None,
                                record: None,
                            });
                        }
                    }
                }
            }
        }

        timeline.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        timeline
    }

    /// Every cached limit marker across the displayed buffer, ascending by
    /// timestamp.
    pub fn all_limit_messages(&self) -> Vec<CachedLimitInfo> {
        let inner = self.inner.read();
        let mut limits: Vec<CachedLimitInfo> = inner
            .active
            .values()
            .flat_map(|e| e.aggregated.limit_messages.iter().cloned())
            .collect();
        limits.sort_by_key(|l| l.timestamp);
        limits
    }

    /// Store a prior window-detection outcome for one session.
    pub fn update_window_info(&self, session_id: &str, info: WindowDetectionInfo) {
        self.inner
            .write()
            .window_info
            .insert(session_id.to_string(), info);
    }

    /// All cached window-detection outcomes.
    pub fn cached_window_info(&self) -> HashMap<String, WindowDetectionInfo> {
        self.inner.read().window_info.clone()
    }

    /// Begin a double-buffered clear: keep the displayed buffer, route new
    /// writes into an empty shadow.
    pub fn clear(&self) {
        self.inner.write().shadow = Some(HashMap::new());
    }

    /// Swap the shadow in, discarding the previous buffer.
    pub fn commit_clear(&self) {
        let mut inner = self.inner.write();
        if let Some(shadow) = inner.shadow.take() {
            inner.active = shadow;
        }
    }

    /// Abort a pending clear, dropping the shadow buffer.
    pub fn cancel_clear(&self) {
        self.inner.write().shadow = None;
    }

    pub fn len(&self) -> usize {
        self.inner.read().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.inner.read().active.keys().cloned().collect()
    }

    /// Aggregated documents of every displayed session (the reporter's
    /// input).
    pub fn all_aggregated(&self) -> Vec<Arc<AggregatedData>> {
        self.inner
            .read()
            .active
            .values()
            .map(|e| Arc::clone(&e.aggregated))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{FileMeta, HourlyData, CACHE_SCHEMA_VERSION};

    fn aggregated(session_id: &str, hours: Vec<HourlyData>) -> Arc<AggregatedData> {
        Arc::new(AggregatedData {
            version: CACHE_SCHEMA_VERSION,
            session_id: session_id.to_string(),
            file_path: format!("/data/proj/{session_id}.jsonl").into(),
            project_name: "proj".to_string(),
            hourly_stats: hours,
            file_meta: FileMeta::default(),
            limit_messages: vec![],
        })
    }

    fn hour_cell(hour: i64, first: i64, last: i64, tokens: u64) -> HourlyData {
        HourlyData {
            hour,
            model: "claude-sonnet-4-5".to_string(),
            project_name: "proj".to_string(),
            input_tokens: tokens,
            output_tokens: 0,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            total_tokens: tokens,
            message_count: 1,
            first_entry_time: first,
            last_entry_time: last,
        }
    }

    #[test]
    fn test_set_get_dirty_cycle() {
        let cache = MemoryCache::new(FixedClock::at(1_000));
        cache.set("s1", aggregated("s1", vec![]), None);

        assert!(cache.contains("s1"));
        assert!(cache.is_dirty("s1"));
        assert_eq!(cache.dirty_entries().len(), 1);

        cache.mark_persisted(&["s1".to_string()]);
        assert!(!cache.is_dirty("s1"));
        assert!(cache.dirty_entries().is_empty());

        cache.delete("s1");
        assert!(!cache.contains("s1"));
    }

    #[test]
    fn test_hydrated_entries_start_clean() {
        let cache = MemoryCache::new(FixedClock::at(1_000));
        cache.set_clean("s1", aggregated("s1", vec![]));
        assert!(!cache.is_dirty("s1"));
    }

    #[test]
    fn test_timeline_synthesized_from_hour_cells() {
        let cache = MemoryCache::new(FixedClock::at(10_000));
        cache.set_clean(
            "s1",
            aggregated("s1", vec![hour_cell(3_600, 3_700, 4_500, 42)]),
        );

        let timeline = cache.global_timeline(0);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].timestamp, 3_700);
        assert_eq!(timeline[0].usage.input_tokens, 42);
        assert_eq!(timeline[0].message_count, 1);
        assert_eq!(timeline[1].timestamp, 4_500);
        assert_eq!(timeline[1].usage.total(), 0);
    }

    #[test]
    fn test_timeline_from_raw_logs_sorted_across_sessions() {
        let cache = MemoryCache::new(FixedClock::at(10_000));
        let rec = |ts: &str| ConversationRecord {
            timestamp: Some(ts.parse().unwrap()),
            ..Default::default()
        };
        cache.set(
            "b",
            aggregated("b", vec![]),
            Some(Arc::new(vec![rec("2024-01-15T10:30:00Z")])),
        );
        cache.set(
            "a",
            aggregated("a", vec![]),
            Some(Arc::new(vec![
                rec("2024-01-15T10:00:00Z"),
                rec("2024-01-15T11:00:00Z"),
            ])),
        );

        let timeline = cache.global_timeline(0);
        let order: Vec<_> = timeline.iter().map(|e| e.session_id.as_str()).collect();
        assert_eq!(order, ["a", "b", "a"]);
    }

    #[test]
    fn test_timeline_seconds_back_bounds() {
        let now = 100_000;
        let cache = MemoryCache::new(FixedClock::at(now));
        cache.set_clean(
            "s1",
            aggregated(
                "s1",
                vec![
                    hour_cell(0, 10, 20, 1),
                    hour_cell(97_200, 97_300, 97_400, 2),
                ],
            ),
        );

        assert_eq!(cache.global_timeline(0).len(), 4);
        // only the recent cell survives a 1-hour lookback
        assert_eq!(cache.global_timeline(3_600).len(), 2);
    }

    #[test]
    fn test_double_buffered_clear() {
        let cache = MemoryCache::new(FixedClock::at(1_000));
        cache.set("old", aggregated("old", vec![]), None);

        cache.clear();
        // displayed buffer still intact
        assert!(cache.contains("old"));
        assert_eq!(cache.len(), 1);

        // reload lands in the shadow
        cache.set("new", aggregated("new", vec![]), None);
        assert!(cache.contains("new"));
        assert_eq!(cache.len(), 1, "shadow writes must not grow the display");

        cache.commit_clear();
        assert!(!cache.contains("old"));
        assert!(cache.contains("new"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cancel_clear_keeps_display() {
        let cache = MemoryCache::new(FixedClock::at(1_000));
        cache.set("old", aggregated("old", vec![]), None);

        cache.clear();
        cache.set("new", aggregated("new", vec![]), None);
        cache.cancel_clear();

        assert!(cache.contains("old"));
        assert!(!cache.contains("new"));
    }

    #[test]
    fn test_window_info_round_trip() {
        let cache = MemoryCache::new(FixedClock::at(1_000));
        cache.update_window_info(
            "s1",
            WindowDetectionInfo {
                window_start_time: 7_200,
                source: crate::models::WindowSource::Gap,
                detected_at: 1_000,
                first_entry_time: Some(7_300),
            },
        );
        let info = cache.cached_window_info();
        assert_eq!(info["s1"].window_start_time, 7_200);
    }
}
