//! File identity signals
//!
//! A file is identified by `(inode, size, mtime)` plus a CRC32 over its last
//! 2 KiB. Appends land at the tail of a transcript, so the tail checksum
//! catches edits that preserve size/mtime/inode.

use crate::error::CoreError;
use crate::models::FileMeta;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Tail length covered by the content fingerprint.
pub const FINGERPRINT_TAIL_BYTES: u64 = 2_048;

/// Stat-level identity of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub inode: u64,
    pub size: u64,
    /// Modification time, Unix seconds.
    pub mod_time: i64,
}

impl FileInfo {
    /// Stat `path` without reading its content.
    pub fn stat(path: &Path) -> Result<Self, CoreError> {
        let meta = std::fs::metadata(path).map_err(|e| CoreError::from_read(path, e))?;
        let mod_time = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Ok(Self {
            inode: inode_of(&meta),
            size: meta.len(),
            mod_time,
        })
    }

    /// Stat plus tail fingerprint, as stamped into cache documents.
    pub fn capture(path: &Path) -> Result<FileMeta, CoreError> {
        let info = Self::stat(path)?;
        let fingerprint = content_fingerprint(path)?;
        Ok(FileMeta {
            last_modified: info.mod_time,
            file_size: info.size,
            inode: info.inode,
            content_fingerprint: fingerprint,
        })
    }
}

#[cfg(unix)]
fn inode_of(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &std::fs::Metadata) -> u64 {
    // No stable file index exposed by std on this platform; the remaining
    // signals (size, mtime, fingerprint) carry validation.
    0
}

/// CRC32 (IEEE) over the last up-to-2048 bytes of `path`, as 8 lowercase
/// hex characters.
pub fn content_fingerprint(path: &Path) -> Result<String, CoreError> {
    let mut file = File::open(path).map_err(|e| CoreError::from_read(path, e))?;
    let len = file
        .metadata()
        .map_err(|e| CoreError::from_read(path, e))?
        .len();

    let offset = len.saturating_sub(FINGERPRINT_TAIL_BYTES);
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| CoreError::from_read(path, e))?;

    let mut tail = Vec::with_capacity(FINGERPRINT_TAIL_BYTES as usize);
    file.read_to_end(&mut tail)
        .map_err(|e| CoreError::from_read(path, e))?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&tail);
    Ok(format!("{:08x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fingerprint_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        let b = dir.path().join("b.jsonl");
        std::fs::write(&a, b"same content\n").unwrap();
        std::fs::write(&b, b"same content\n").unwrap();

        let fa = content_fingerprint(&a).unwrap();
        let fb = content_fingerprint(&b).unwrap();
        assert_eq!(fa, fb);
        assert_eq!(fa.len(), 8);
        assert!(fa.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_sees_tail_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");

        // 4 KiB file: only the last 2 KiB participate
        let mut content = vec![b'x'; 4_096];
        std::fs::write(&path, &content).unwrap();
        let before = content_fingerprint(&path).unwrap();

        // flip a byte within the covered tail
        content[4_000] = b'y';
        std::fs::write(&path, &content).unwrap();
        let after = content_fingerprint(&path).unwrap();
        assert_ne!(before, after);

        // a byte before the tail is invisible to the fingerprint
        content[4_000] = b'x';
        content[100] = b'z';
        std::fs::write(&path, &content).unwrap();
        let outside = content_fingerprint(&path).unwrap();
        assert_eq!(before, outside);
    }

    #[test]
    fn test_fingerprint_small_file_covers_whole_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.jsonl");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"tiny").unwrap();
        drop(f);

        let before = content_fingerprint(&path).unwrap();
        std::fs::write(&path, b"tinz").unwrap();
        assert_ne!(before, content_fingerprint(&path).unwrap());
    }

    #[test]
    fn test_stat_missing_file() {
        let err = FileInfo::stat(Path::new("/nonexistent/nope.jsonl")).unwrap_err();
        assert!(matches!(err, CoreError::FileNotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_includes_inode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jsonl");
        std::fs::write(&path, b"{}").unwrap();
        let meta = FileInfo::capture(&path).unwrap();
        assert!(meta.inode > 0);
        assert_eq!(meta.file_size, 2);
        assert!(!meta.content_fingerprint.is_empty());
    }
}
