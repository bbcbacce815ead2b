//! On-disk aggregation cache
//!
//! One pretty-printed JSON document per session id under the cache base
//! directory, fronted by an in-memory tier. Validation is multi-signal:
//! stat identity first, then the content fingerprint, with a staleness
//! shortcut for files that have not been touched in 48 hours.

use crate::clock::Clock;
use crate::error::CoreError;
use crate::fingerprint::{content_fingerprint, FileInfo};
use crate::models::{AggregatedData, CACHE_SCHEMA_VERSION};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Files untouched for this long validate without a fingerprint check.
const STALE_SKIP_SECS: i64 = 48 * 3_600;

/// Why a lookup missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissReason {
    None,
    Error,
    Inode,
    Size,
    ModTime,
    Fingerprint,
    NoFingerprint,
    NotFound,
}

/// Per-id validation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub miss_reason: MissReason,
}

impl ValidationOutcome {
    fn valid() -> Self {
        Self {
            valid: true,
            miss_reason: MissReason::None,
        }
    }

    fn miss(reason: MissReason) -> Self {
        Self {
            valid: false,
            miss_reason: reason,
        }
    }
}

/// Result of [`FileCache::get`].
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub data: Option<Arc<AggregatedData>>,
    pub found: bool,
    pub miss_reason: MissReason,
}

/// Two-tier content-addressed cache keyed by session id.
pub struct FileCache {
    base_dir: PathBuf,
    memory: DashMap<String, Arc<AggregatedData>>,
    clock: Arc<dyn Clock>,
    concurrency: usize,
}

impl FileCache {
    pub fn new(base_dir: PathBuf, clock: Arc<dyn Clock>, concurrency: usize) -> Self {
        Self {
            base_dir,
            memory: DashMap::new(),
            clock,
            concurrency: concurrency.max(1),
        }
    }

    fn document_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.json"))
    }

    /// Validate a cached document against its source transcript.
    ///
    /// Ordered: stat, then inode/size/mtime, then the 48-hour staleness
    /// shortcut, then the tail fingerprint. The first failing signal is the
    /// miss reason.
    pub fn validate(&self, data: &AggregatedData) -> ValidationOutcome {
        let info = match FileInfo::stat(&data.file_path) {
            Ok(info) => info,
            Err(_) => return ValidationOutcome::miss(MissReason::Error),
        };

        let meta = &data.file_meta;
        if info.inode != meta.inode {
            return ValidationOutcome::miss(MissReason::Inode);
        }
        if info.size != meta.file_size {
            return ValidationOutcome::miss(MissReason::Size);
        }
        if info.mod_time != meta.last_modified {
            return ValidationOutcome::miss(MissReason::ModTime);
        }

        // Stale files are immutable in practice.
        if self.clock.now_unix() - info.mod_time > STALE_SKIP_SECS {
            return ValidationOutcome::valid();
        }

        if meta.content_fingerprint.is_empty() {
            return ValidationOutcome::miss(MissReason::NoFingerprint);
        }

        match content_fingerprint(&data.file_path) {
            Ok(current) if current == meta.content_fingerprint => ValidationOutcome::valid(),
            Ok(_) => ValidationOutcome::miss(MissReason::Fingerprint),
            Err(_) => ValidationOutcome::miss(MissReason::Error),
        }
    }

    /// Memory tier first; on validation failure evict and fall through to
    /// disk, revalidating and repopulating memory on a disk hit.
    pub async fn get(&self, session_id: &str) -> CacheLookup {
        if let Some(entry) = self.memory.get(session_id).map(|e| Arc::clone(&e)) {
            let outcome = self.validate(&entry);
            if outcome.valid {
                return CacheLookup {
                    data: Some(entry),
                    found: true,
                    miss_reason: MissReason::None,
                };
            }
            self.memory.remove(session_id);
        }

        match self.read_document(session_id).await {
            Ok(Some(data)) => {
                let outcome = self.validate(&data);
                if outcome.valid {
                    let data = Arc::new(data);
                    self.memory
                        .insert(session_id.to_string(), Arc::clone(&data));
                    CacheLookup {
                        data: Some(data),
                        found: true,
                        miss_reason: MissReason::None,
                    }
                } else {
                    CacheLookup {
                        data: None,
                        found: false,
                        miss_reason: outcome.miss_reason,
                    }
                }
            }
            Ok(None) => CacheLookup {
                data: None,
                found: false,
                miss_reason: MissReason::NotFound,
            },
            Err(_) => CacheLookup {
                data: None,
                found: false,
                miss_reason: MissReason::Error,
            },
        }
    }

    /// Recompute the source file's identity, stamp it into `data`, persist,
    /// then publish to the memory tier. Partial writes are acceptable; the
    /// next read rejects them during decode.
    pub async fn set(&self, session_id: &str, mut data: AggregatedData) -> Result<Arc<AggregatedData>, CoreError> {
        match FileInfo::capture(&data.file_path) {
            Ok(meta) => data.file_meta = meta,
            Err(e) => {
                // file vanished between parse and persist: keep the stale
                // stamp, validation will reject it next round
                debug!(session_id, error = %e, "Could not re-stat source before cache write");
            }
        }
        data.version = CACHE_SCHEMA_VERSION;

        let path = self.document_path(session_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::FileWrite {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let json = serde_json::to_string_pretty(&data).map_err(|e| CoreError::JsonParse {
            path: path.clone(),
            message: "serialize cache document".to_string(),
            source: e,
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| CoreError::FileWrite {
                path: path.clone(),
                source: e,
            })?;

        let data = Arc::new(data);
        self.memory
            .insert(session_id.to_string(), Arc::clone(&data));
        Ok(data)
    }

    /// Drop the memory tier and remove every `*.json` document.
    pub async fn clear(&self) -> Result<(), CoreError> {
        self.memory.clear();

        let mut dir = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(CoreError::FileRead {
                    path: self.base_dir.clone(),
                    source: e,
                })
            }
        };

        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove cache document");
                }
            }
        }
        Ok(())
    }

    /// Concurrently decode and validate every document in the cache dir,
    /// inserting the valid ones into the memory tier. Invalid documents are
    /// left on disk; the next `set` overwrites them. Returns the number of
    /// entries loaded.
    pub async fn preload(self: Arc<Self>) -> usize {
        let mut dir = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(_) => return 0,
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::new();

        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if !path.extension().map(|e| e == "json").unwrap_or(false) {
                continue;
            }
            let Some(session_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
            else {
                continue;
            };

            let cache = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                match cache.read_document(&session_id).await {
                    Ok(Some(data)) if cache.validate(&data).valid => {
                        cache.memory.insert(session_id, Arc::new(data));
                        1usize
                    }
                    _ => 0usize,
                }
            }));
        }

        let mut loaded = 0;
        for handle in handles {
            loaded += handle.await.unwrap_or(0);
        }
        debug!(loaded, "Preloaded cache documents");
        loaded
    }

    /// Validate a batch of session ids: the loader's hot path.
    pub async fn batch_validate(
        &self,
        session_ids: &[String],
    ) -> HashMap<String, ValidationOutcome> {
        let mut outcomes = HashMap::with_capacity(session_ids.len());
        for session_id in session_ids {
            let outcome = if let Some(entry) = self.memory.get(session_id) {
                self.validate(&entry)
            } else {
                match self.read_document(session_id).await {
                    Ok(Some(data)) => {
                        let outcome = self.validate(&data);
                        if outcome.valid {
                            self.memory.insert(session_id.clone(), Arc::new(data));
                        }
                        outcome
                    }
                    Ok(None) => ValidationOutcome::miss(MissReason::NotFound),
                    Err(_) => ValidationOutcome::miss(MissReason::Error),
                }
            };
            outcomes.insert(session_id.clone(), outcome);
        }
        outcomes
    }

    /// Number of entries in the memory tier.
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    async fn read_document(&self, session_id: &str) -> Result<Option<AggregatedData>, CoreError> {
        let path = self.document_path(session_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CoreError::from_read(&path, e)),
        };

        match serde_json::from_str::<AggregatedData>(&content) {
            Ok(data) if data.version == CACHE_SCHEMA_VERSION => Ok(Some(data)),
            Ok(data) => {
                debug!(
                    session_id,
                    version = data.version,
                    "Cache document schema version mismatch"
                );
                Err(CoreError::CacheDecode {
                    session_id: session_id.to_string(),
                    message: format!("schema version {} != {}", data.version, CACHE_SCHEMA_VERSION),
                })
            }
            Err(e) => Err(CoreError::CacheDecode {
                session_id: session_id.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::FileMeta;

    fn aggregated_for(path: &Path, session_id: &str) -> AggregatedData {
        AggregatedData {
            version: CACHE_SCHEMA_VERSION,
            session_id: session_id.to_string(),
            file_path: path.to_path_buf(),
            project_name: "proj".to_string(),
            hourly_stats: vec![],
            file_meta: FileMeta::default(),
            limit_messages: vec![],
        }
    }

    fn cache_at(dir: &Path, now: i64) -> Arc<FileCache> {
        Arc::new(FileCache::new(dir.to_path_buf(), FixedClock::at(now), 4))
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let data_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let transcript = data_dir.path().join("s1.jsonl");
        std::fs::write(&transcript, "{\"type\":\"user\"}\n").unwrap();

        let now = FileInfo::stat(&transcript).unwrap().mod_time + 60;
        let cache = cache_at(cache_dir.path(), now);

        cache
            .set("s1", aggregated_for(&transcript, "s1"))
            .await
            .unwrap();

        let lookup = cache.get("s1").await;
        assert!(lookup.found);
        assert_eq!(lookup.miss_reason, MissReason::None);
        let data = lookup.data.unwrap();
        assert!(!data.file_meta.content_fingerprint.is_empty());

        // the document is pretty-printed JSON on disk
        let raw = std::fs::read_to_string(cache_dir.path().join("s1.json")).unwrap();
        assert!(raw.contains("\n  \"sessionId\""));
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_is_detected() {
        let data_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let transcript = data_dir.path().join("s1.jsonl");
        std::fs::write(&transcript, vec![b'a'; 512]).unwrap();

        let now = FileInfo::stat(&transcript).unwrap().mod_time + 60;
        let cache = cache_at(cache_dir.path(), now);
        let stored = cache
            .set("s1", aggregated_for(&transcript, "s1"))
            .await
            .unwrap();

        // same size, content byte flipped near the tail; restore mtime
        let mut content = vec![b'a'; 512];
        content[400] = b'b';
        std::fs::write(&transcript, &content).unwrap();
        let mtime = filetime_of(stored.file_meta.last_modified);
        set_mtime(&transcript, mtime);

        let outcome = cache.validate(&stored);
        // inode may change across rewrite on some filesystems; accept either
        // signal, but a same-identity rewrite must be caught by the tail CRC
        assert!(!outcome.valid);
        if outcome.miss_reason != MissReason::Inode {
            assert_eq!(outcome.miss_reason, MissReason::Fingerprint);
        }
    }

    #[tokio::test]
    async fn test_stale_file_skips_fingerprint() {
        let data_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let transcript = data_dir.path().join("s1.jsonl");
        std::fs::write(&transcript, "{}\n").unwrap();

        let info = FileInfo::stat(&transcript).unwrap();
        // clock 10 days past mtime; cached meta matches stat but has no
        // fingerprint: the staleness shortcut accepts it anyway
        let cache = cache_at(cache_dir.path(), info.mod_time + 10 * 86_400);

        let mut data = aggregated_for(&transcript, "s1");
        data.file_meta = FileMeta {
            last_modified: info.mod_time,
            file_size: info.size,
            inode: info.inode,
            content_fingerprint: String::new(),
        };

        let outcome = cache.validate(&data);
        assert!(outcome.valid);
        assert_eq!(outcome.miss_reason, MissReason::None);
    }

    #[tokio::test]
    async fn test_fresh_file_without_fingerprint_misses() {
        let data_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let transcript = data_dir.path().join("s1.jsonl");
        std::fs::write(&transcript, "{}\n").unwrap();

        let info = FileInfo::stat(&transcript).unwrap();
        let cache = cache_at(cache_dir.path(), info.mod_time + 60);

        let mut data = aggregated_for(&transcript, "s1");
        data.file_meta = FileMeta {
            last_modified: info.mod_time,
            file_size: info.size,
            inode: info.inode,
            content_fingerprint: String::new(),
        };

        let outcome = cache.validate(&data);
        assert_eq!(outcome.miss_reason, MissReason::NoFingerprint);
    }

    #[tokio::test]
    async fn test_batch_validate_reports_not_found_and_size() {
        let data_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let transcript = data_dir.path().join("s1.jsonl");
        std::fs::write(&transcript, "{}\n").unwrap();

        let now = FileInfo::stat(&transcript).unwrap().mod_time + 60;
        let cache = cache_at(cache_dir.path(), now);
        cache
            .set("s1", aggregated_for(&transcript, "s1"))
            .await
            .unwrap();

        // append, growing the file
        std::fs::write(&transcript, "{}\n{}\n").unwrap();

        let outcomes = cache
            .batch_validate(&["s1".to_string(), "ghost".to_string()])
            .await;
        assert!(!outcomes["s1"].valid);
        assert!(matches!(
            outcomes["s1"].miss_reason,
            MissReason::Size | MissReason::ModTime | MissReason::Inode
        ));
        assert_eq!(outcomes["ghost"].miss_reason, MissReason::NotFound);
    }

    #[tokio::test]
    async fn test_vanished_source_is_error_miss() {
        let data_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let transcript = data_dir.path().join("s1.jsonl");
        std::fs::write(&transcript, "{}\n").unwrap();

        let now = FileInfo::stat(&transcript).unwrap().mod_time + 60;
        let cache = cache_at(cache_dir.path(), now);
        cache
            .set("s1", aggregated_for(&transcript, "s1"))
            .await
            .unwrap();

        std::fs::remove_file(&transcript).unwrap();

        let lookup = cache.get("s1").await;
        assert!(!lookup.found);
        assert_eq!(lookup.miss_reason, MissReason::Error);
    }

    #[tokio::test]
    async fn test_preload_loads_only_valid_documents() {
        let data_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let t1 = data_dir.path().join("s1.jsonl");
        let t2 = data_dir.path().join("s2.jsonl");
        std::fs::write(&t1, "{}\n").unwrap();
        std::fs::write(&t2, "{}\n").unwrap();

        let now = FileInfo::stat(&t1).unwrap().mod_time + 60;
        let cache = cache_at(cache_dir.path(), now);
        cache.set("s1", aggregated_for(&t1, "s1")).await.unwrap();
        cache.set("s2", aggregated_for(&t2, "s2")).await.unwrap();

        // invalidate s2 by growing its source, and plant a corrupt document
        std::fs::write(&t2, "{}\n{}\n").unwrap();
        std::fs::write(cache_dir.path().join("junk.json"), "not json").unwrap();

        let fresh = cache_at(cache_dir.path(), now);
        let loaded = Arc::clone(&fresh).preload().await;
        assert_eq!(loaded, 1);
        assert_eq!(fresh.memory_len(), 1);
    }

    #[tokio::test]
    async fn test_clear_removes_documents() {
        let data_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let transcript = data_dir.path().join("s1.jsonl");
        std::fs::write(&transcript, "{}\n").unwrap();

        let now = FileInfo::stat(&transcript).unwrap().mod_time + 60;
        let cache = cache_at(cache_dir.path(), now);
        cache
            .set("s1", aggregated_for(&transcript, "s1"))
            .await
            .unwrap();

        cache.clear().await.unwrap();
        assert_eq!(cache.memory_len(), 0);
        assert!(!cache_dir.path().join("s1.json").exists());
    }

    fn filetime_of(unix: i64) -> std::time::SystemTime {
        std::time::UNIX_EPOCH + std::time::Duration::from_secs(unix as u64)
    }

    fn set_mtime(path: &Path, mtime: std::time::SystemTime) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(mtime).unwrap();
    }
}
