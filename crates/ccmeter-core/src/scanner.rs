//! Transcript discovery
//!
//! Recursively enumerates regular files ending in `.jsonl` (case-insensitive)
//! under a root directory. Permission errors on individual entries are
//! skipped; symlinks are followed.

use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Enumerate every transcript file under `root`.
pub fn scan_transcripts(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                trace!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        if has_jsonl_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }

    debug!(root = %root.display(), count = files.len(), "Scanned transcript files");
    files
}

/// Session id of a transcript: the filename stem.
pub fn session_id_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn has_jsonl_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jsonl"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_finds_nested_jsonl_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("proj-a").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("top.jsonl"), "{}").unwrap();
        std::fs::write(nested.join("upper.JSONL"), "{}").unwrap();
        std::fs::write(nested.join("not-a-log.json"), "{}").unwrap();
        std::fs::write(nested.join("plain.txt"), "x").unwrap();

        let mut found = scan_transcripts(dir.path());
        found.sort();
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|p| p.ends_with("top.jsonl")));
        assert!(found.iter().any(|p| p.ends_with("upper.JSONL")));
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let found = scan_transcripts(Path::new("/nonexistent/ccmeter-test"));
        assert!(found.is_empty());
    }

    #[test]
    fn test_session_id_is_file_stem() {
        assert_eq!(
            session_id_of(Path::new("/data/proj/abc-123.jsonl")),
            "abc-123"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_follows_symlinks() {
        let real = tempfile::tempdir().unwrap();
        let linked = tempfile::tempdir().unwrap();
        std::fs::write(real.path().join("s1.jsonl"), "{}").unwrap();
        std::os::unix::fs::symlink(real.path(), linked.path().join("alias")).unwrap();

        let found = scan_transcripts(linked.path());
        assert_eq!(found.len(), 1);
    }
}
