//! Concurrent transcript parser
//!
//! Decodes JSONL transcripts line by line into typed records. Malformed
//! lines are counted and skipped; a whole-file read failure only fails that
//! file. Parses are memoized per `(path, mtime, size)` so an unchanged file
//! is decoded once per process.

use crate::error::CoreError;
use crate::fingerprint::FileInfo;
use crate::models::ConversationRecord;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

/// Maximum line size in bytes (10 MiB) - OOM protection
const MAX_LINE_SIZE: usize = 10 * 1024 * 1024;

/// Memoized parse results retained per process
const MEMO_CAPACITY: u64 = 512;

/// One completed batch item, streamed in completion order.
#[derive(Debug)]
pub struct ParsedFile {
    pub path: PathBuf,
    pub records: Result<Arc<Vec<ConversationRecord>>, CoreError>,
}

/// Transcript parser with per-file memoization.
pub struct Parser {
    memo: moka::sync::Cache<(PathBuf, i64, u64), Arc<Vec<ConversationRecord>>>,
    concurrency: usize,
}

impl Parser {
    pub fn new(concurrency: usize) -> Self {
        Self {
            memo: moka::sync::Cache::new(MEMO_CAPACITY),
            concurrency: concurrency.max(1),
        }
    }

    /// Parse one transcript, memoized against the file's current identity.
    pub async fn parse_file(
        &self,
        path: &Path,
    ) -> Result<Arc<Vec<ConversationRecord>>, CoreError> {
        let info = FileInfo::stat(path)?;
        let key = (path.to_path_buf(), info.mod_time, info.size);

        if let Some(cached) = self.memo.get(&key) {
            return Ok(cached);
        }

        let records = Arc::new(parse_lines(path).await?);
        self.memo.insert(key, Arc::clone(&records));
        Ok(records)
    }

    /// Parse a batch in parallel, yielding results as each file completes.
    ///
    /// At most `concurrency` files are in flight at once. The receiver closes
    /// once every file has been reported.
    pub fn parse_files(self: Arc<Self>, paths: Vec<PathBuf>) -> mpsc::Receiver<ParsedFile> {
        let (tx, rx) = mpsc::channel(paths.len().max(1));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        for path in paths {
            let parser = Arc::clone(&self);
            let tx = tx.clone();
            let semaphore = Arc::clone(&semaphore);

            tokio::spawn(async move {
                // closed semaphore is unreachable: we hold an Arc to it
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let records = parser.parse_file(&path).await;
                let _ = tx.send(ParsedFile { path, records }).await;
            });
        }

        rx
    }

    /// Drop memoized results (used by tests and full cache clears).
    pub fn clear_memo(&self) {
        self.memo.invalidate_all();
    }
}

/// Line loop shared by all parse paths.
async fn parse_lines(path: &Path) -> Result<Vec<ConversationRecord>, CoreError> {
    let file = File::open(path)
        .await
        .map_err(|e| CoreError::from_read(path, e))?;

    let reader = BufReader::with_capacity(64 * 1024, file);
    let mut lines = reader.lines();
    let mut records = Vec::new();
    let mut line_num = 0usize;
    let mut skipped = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| CoreError::from_read(path, e))?
    {
        line_num += 1;

        // OOM protection: skip oversized lines
        if line.len() > MAX_LINE_SIZE {
            warn!(
                path = %path.display(),
                line_num,
                size = line.len(),
                "Skipping oversized line (>10MB)"
            );
            skipped += 1;
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ConversationRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                debug!(
                    path = %path.display(),
                    line_num,
                    error = %e,
                    "Failed to parse transcript line, skipping"
                );
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        debug!(path = %path.display(), skipped, parsed = records.len(), "Parsed with skips");
    }

    Ok(records)
}
