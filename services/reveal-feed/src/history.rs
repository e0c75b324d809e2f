//! History Store: bounded, durable log of past results
//!
//! Append-only, ordered by `minuteStart` ascending, capped at `N_max` with
//! FIFO eviction. The full log is written to disk after every append so a
//! restart recovers both the history and the last generated minute.
//!
//! On-disk layout (JSON):
//!
//! ```text
//! { "version": 1, "checksum": "<sha256 of results>", "results": [ ... ] }
//! ```
//!
//! Writes go to a temp file that is synced and renamed over the target,
//! outside the lock readers take. Loading never fails: a missing file starts
//! empty, a corrupt one is moved aside and also starts empty, and an
//! unreadable one is left alone while the store runs in memory only.
//!
//! Results are appended ahead of their reveal. Read views meant for clients
//! go through [`HistoryStore::revealed`], which hides minutes not yet reached.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use types::ids::MinuteStart;
use types::result::MinuteResult;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("Unsupported history version: {0}")]
    UnsupportedVersion(u32),

    #[error("Result for minute {0} already recorded")]
    DuplicateMinute(MinuteStart),

    #[error("Out-of-order append: newest is {newest}, got {minute}")]
    OutOfOrder {
        newest: MinuteStart,
        minute: MinuteStart,
    },
}

impl HistoryError {
    /// The file was read but its content cannot be trusted.
    fn is_corruption(&self) -> bool {
        matches!(
            self,
            HistoryError::Serialization(_)
                | HistoryError::IntegrityFailure { .. }
                | HistoryError::UnsupportedVersion(_)
        )
    }
}

// ── File format ─────────────────────────────────────────────────────

/// Current history file format version.
pub const HISTORY_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    checksum: String,
    results: Vec<MinuteResult>,
}

fn compute_checksum(results: &[MinuteResult]) -> Result<String, HistoryError> {
    let bytes = serde_json::to_vec(results)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Read and verify a history file.
fn read_file(path: &Path) -> Result<Vec<MinuteResult>, HistoryError> {
    let bytes = fs::read(path)?;
    let file: HistoryFile = serde_json::from_slice(&bytes)?;

    if file.version != HISTORY_VERSION {
        return Err(HistoryError::UnsupportedVersion(file.version));
    }

    let actual = compute_checksum(&file.results)?;
    if actual != file.checksum {
        return Err(HistoryError::IntegrityFailure {
            expected: file.checksum,
            actual,
        });
    }

    Ok(file.results)
}

/// Encode the full log in the on-disk format.
fn encode_file<'a>(
    results: impl Iterator<Item = &'a MinuteResult>,
) -> Result<Vec<u8>, HistoryError> {
    let results: Vec<MinuteResult> = results.cloned().collect();
    let file = HistoryFile {
        version: HISTORY_VERSION,
        checksum: compute_checksum(&results)?,
        results,
    };
    Ok(serde_json::to_vec_pretty(&file)?)
}

/// Write `data` atomically: temp file → fsync → rename.
fn write_file(path: &Path, data: &[u8]) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = sibling_path(path, "tmp");
    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(data)?;
    tmp.sync_all()?;
    drop(tmp);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// `history.json` → `history.json.<suffix>`
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Sort, drop duplicate minutes (first wins) and keep the newest `max`.
fn normalize(mut results: Vec<MinuteResult>, max: usize) -> VecDeque<MinuteResult> {
    results.sort_by_key(|r| r.minute_start);
    results.dedup_by_key(|r| r.minute_start);
    let excess = results.len().saturating_sub(max);
    results.into_iter().skip(excess).collect()
}

// ── Store ───────────────────────────────────────────────────────────

/// Whether an accepted append reached durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Written to memory and disk.
    Persisted,
    /// Kept in memory only: no backing file, or the write failed.
    MemoryOnly,
}

/// Bounded, ordered, durable log of minute results.
pub struct HistoryStore {
    entries: Mutex<VecDeque<MinuteResult>>,
    /// Serialises file writes; taken before `entries` is released so
    /// snapshots reach disk in append order.
    writer: Mutex<()>,
    max_len: usize,
    path: Option<PathBuf>,
}

impl HistoryStore {
    /// Store with no durable backing.
    pub fn in_memory(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_len)),
            writer: Mutex::new(()),
            max_len,
            path: None,
        }
    }

    /// Open a store backed by `path`, failing on unreadable or corrupt data.
    pub fn open(path: impl Into<PathBuf>, max_len: usize) -> Result<Self, HistoryError> {
        let path = path.into();
        let max_len = max_len.max(1);

        let entries = match read_file(&path) {
            Ok(results) => normalize(results, max_len),
            Err(HistoryError::Io(e)) if e.kind() == io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            entries: Mutex::new(entries),
            writer: Mutex::new(()),
            max_len,
            path: Some(path),
        })
    }

    /// Startup load: like [`open`](Self::open) but degrades to an empty log.
    ///
    /// A corrupt file is renamed to `<file>.corrupt` so the next append does
    /// not silently overwrite it. A file that cannot be read at all is left
    /// in place and the store keeps results in memory only.
    pub fn load_or_empty(path: impl Into<PathBuf>, max_len: usize) -> Self {
        let path = path.into();
        match Self::open(&path, max_len) {
            Ok(store) => {
                info!(
                    path = %path.display(),
                    entries = store.len(),
                    latest = ?store.latest().map(|r| r.minute_start.to_string()),
                    "History loaded"
                );
                store
            }
            Err(e) if e.is_corruption() => {
                warn!(path = %path.display(), error = %e, "History corrupt, starting empty");
                let quarantine = sibling_path(&path, "corrupt");
                if let Err(rename_err) = fs::rename(&path, &quarantine) {
                    warn!(error = %rename_err, "Failed to move corrupt history aside");
                }
                let mut store = Self::in_memory(max_len);
                store.path = Some(path);
                store
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "History unreadable, leaving file untouched and keeping results in memory only"
                );
                Self::in_memory(max_len)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<MinuteResult>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a result, evicting the oldest beyond capacity, then persist.
    ///
    /// A persistence failure is logged and does not undo the in-memory
    /// append. Readers are not blocked while the file is written.
    pub fn append(&self, result: MinuteResult) -> Result<AppendOutcome, HistoryError> {
        let mut entries = self.lock();

        if let Some(newest) = entries.back() {
            if newest.minute_start == result.minute_start {
                return Err(HistoryError::DuplicateMinute(result.minute_start));
            }
            if newest.minute_start > result.minute_start {
                return Err(HistoryError::OutOfOrder {
                    newest: newest.minute_start,
                    minute: result.minute_start,
                });
            }
        }

        entries.push_back(result);
        while entries.len() > self.max_len {
            if let Some(evicted) = entries.pop_front() {
                debug!(minute = %evicted.minute_start, "Evicted oldest history entry");
            }
        }

        let Some(path) = &self.path else {
            return Ok(AppendOutcome::MemoryOnly);
        };

        let encoded = encode_file(entries.iter());
        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(entries);
        let written = encoded.and_then(|data| write_file(path, &data));

        match written {
            Ok(()) => Ok(AppendOutcome::Persisted),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "History persistence failed, keeping in-memory state");
                Ok(AppendOutcome::MemoryOnly)
            }
        }
    }

    /// Owned ascending copy; with `limit`, only the most recent entries.
    pub fn snapshot(&self, limit: Option<usize>) -> Vec<MinuteResult> {
        let entries = self.lock();
        let take = limit.unwrap_or(entries.len()).min(entries.len());
        entries.iter().skip(entries.len() - take).cloned().collect()
    }

    /// Up to `limit` entries whose minute has been reached by `now`,
    /// newest first.
    pub fn revealed(&self, now: DateTime<Utc>, limit: usize) -> Vec<MinuteResult> {
        let entries = self.lock();
        let end = entries.partition_point(|r| r.minute_start.as_datetime() <= now);
        entries.range(..end).rev().take(limit).cloned().collect()
    }

    pub fn latest(&self) -> Option<MinuteResult> {
        self.lock().back().cloned()
    }

    pub fn get(&self, minute: MinuteStart) -> Option<MinuteResult> {
        let entries = self.lock();
        entries
            .binary_search_by_key(&minute, |r| r.minute_start)
            .ok()
            .and_then(|idx| entries.get(idx).cloned())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Configured `N_max`.
    pub fn capacity(&self) -> usize {
        self.max_len
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use tempfile::TempDir;
    use types::result::Digit;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn make_result(minute_offset: i64, number: u8) -> MinuteResult {
        let minute = MinuteStart::containing(base()).offset(minute_offset);
        MinuteResult::new(
            minute,
            Digit::new(number).unwrap(),
            minute.as_datetime() - Duration::seconds(35),
        )
    }

    #[test]
    fn test_append_and_snapshot_order() {
        let store = HistoryStore::in_memory(10);
        for i in 0..3 {
            assert_eq!(store.append(make_result(i, i as u8)).unwrap(), AppendOutcome::MemoryOnly);
        }

        let snap = store.snapshot(None);
        assert_eq!(snap.len(), 3);
        assert!(snap.windows(2).all(|w| w[0].minute_start < w[1].minute_start));

        let newest_first = store.revealed(base() + Duration::hours(1), 2);
        assert_eq!(newest_first[0].minute_start, make_result(2, 0).minute_start);
        assert_eq!(newest_first[1].minute_start, make_result(1, 0).minute_start);
    }

    #[test]
    fn test_revealed_hides_minutes_not_yet_reached() {
        let store = HistoryStore::in_memory(10);
        for i in 0..3 {
            store.append(make_result(i, i as u8)).unwrap();
        }
        // Entry for base+2min is generated but its boundary is still ahead.
        let now = base() + Duration::seconds(90);

        let visible = store.revealed(now, 10);
        let minutes: Vec<MinuteStart> = visible.iter().map(|r| r.minute_start).collect();
        assert_eq!(
            minutes,
            vec![make_result(1, 0).minute_start, make_result(0, 0).minute_start]
        );
        assert_eq!(store.revealed(now, 1).len(), 1);

        // Exactly at the boundary the result counts as revealed.
        let at_boundary = make_result(2, 0).minute_start.as_datetime();
        assert_eq!(store.revealed(at_boundary, 10).len(), 3);
        assert!(store.revealed(base() - Duration::seconds(1), 10).is_empty());
    }

    #[test]
    fn test_eviction_is_fifo() {
        let store = HistoryStore::in_memory(3);
        for i in 0..5 {
            store.append(make_result(i, 1)).unwrap();
        }
        let snap = store.snapshot(None);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].minute_start, make_result(2, 1).minute_start);
        assert_eq!(store.latest().unwrap().minute_start, make_result(4, 1).minute_start);
    }

    #[test]
    fn test_duplicate_minute_rejected() {
        let store = HistoryStore::in_memory(10);
        store.append(make_result(0, 4)).unwrap();
        let err = store.append(make_result(0, 5)).unwrap_err();
        assert!(matches!(err, HistoryError::DuplicateMinute(_)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.latest().unwrap().number.value(), 4);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let store = HistoryStore::in_memory(10);
        store.append(make_result(5, 4)).unwrap();
        let err = store.append(make_result(3, 1)).unwrap_err();
        assert!(matches!(err, HistoryError::OutOfOrder { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_snapshot_limit() {
        let store = HistoryStore::in_memory(10);
        for i in 0..6 {
            store.append(make_result(i, 0)).unwrap();
        }
        let snap = store.snapshot(Some(2));
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[1].minute_start, make_result(5, 0).minute_start);
        assert_eq!(store.snapshot(Some(100)).len(), 6);
        assert!(store.snapshot(Some(0)).is_empty());
    }

    #[test]
    fn test_get_by_minute() {
        let store = HistoryStore::in_memory(10);
        for i in 0..4 {
            store.append(make_result(i, i as u8)).unwrap();
        }
        let found = store.get(make_result(2, 0).minute_start).unwrap();
        assert_eq!(found.number.value(), 2);
        assert!(store.get(make_result(9, 0).minute_start).is_none());
    }

    #[test]
    fn test_persist_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let store = HistoryStore::open(&path, 4).unwrap();
        for i in 0..6 {
            assert_eq!(store.append(make_result(i, (i % 10) as u8)).unwrap(), AppendOutcome::Persisted);
        }
        let before = store.snapshot(None);
        drop(store);

        let reloaded = HistoryStore::open(&path, 4).unwrap();
        assert_eq!(reloaded.snapshot(None), before);
        assert_eq!(reloaded.len(), 4);
    }

    #[test]
    fn test_reload_truncates_to_smaller_cap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");

        let store = HistoryStore::open(&path, 10).unwrap();
        for i in 0..8 {
            store.append(make_result(i, 3)).unwrap();
        }
        drop(store);

        let reloaded = HistoryStore::open(&path, 3).unwrap();
        let snap = reloaded.snapshot(None);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].minute_start, make_result(5, 3).minute_start);
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::load_or_empty(dir.path().join("absent.json"), 10);
        assert!(store.is_empty());
        assert!(store.latest().is_none());
    }

    #[test]
    fn test_corrupt_file_starts_empty_and_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, b"{ not json").unwrap();

        assert!(HistoryStore::open(&path, 10).is_err());

        let store = HistoryStore::load_or_empty(&path, 10);
        assert!(store.is_empty());
        assert!(!path.exists());
        assert!(dir.path().join("history.json.corrupt").exists());

        // The store stays usable and writes a fresh file.
        assert_eq!(store.append(make_result(0, 1)).unwrap(), AppendOutcome::Persisted);
        assert!(path.exists());
    }

    #[test]
    fn test_unreadable_file_is_left_in_place() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be read as a file: an IO fault, not corruption.
        let path = dir.path().join("history.json");
        fs::create_dir(&path).unwrap();

        let err = HistoryStore::open(&path, 10).err().unwrap();
        assert!(matches!(err, HistoryError::Io(_)));

        let store = HistoryStore::load_or_empty(&path, 10);
        assert!(store.is_empty());
        assert!(store.path().is_none());
        assert!(path.is_dir());
        assert!(!dir.path().join("history.json.corrupt").exists());

        assert_eq!(store.append(make_result(0, 2)).unwrap(), AppendOutcome::MemoryOnly);
        assert!(path.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_readers_not_blocked_during_file_write() {
        use std::sync::Arc;
        use std::time::{Duration as StdDuration, Instant};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let store = Arc::new(HistoryStore::open(&path, 10).unwrap());

        // Opening a FIFO for writing blocks until a reader shows up, which
        // holds the append inside its file write.
        let fifo = sibling_path(&path, "tmp");
        let status = std::process::Command::new("mkfifo").arg(&fifo).status().unwrap();
        assert!(status.success());

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.append(make_result(0, 7)))
        };

        let deadline = Instant::now() + StdDuration::from_secs(5);
        let mut visible = false;
        while Instant::now() < deadline {
            if let Ok(entries) = store.entries.try_lock() {
                if entries.len() == 1 {
                    visible = true;
                    break;
                }
            }
            std::thread::sleep(StdDuration::from_millis(10));
        }

        // Release the blocked write before asserting so the thread finishes.
        let mut drained = Vec::new();
        io::Read::read_to_end(&mut File::open(&fifo).unwrap(), &mut drained).unwrap();
        let outcome = writer.join().unwrap();

        assert!(visible, "entries stayed locked while the file was written");
        assert!(outcome.is_ok());
        assert_eq!(store.latest().unwrap().number.value(), 7);
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");

        let store = HistoryStore::open(&path, 10).unwrap();
        store.append(make_result(0, 1)).unwrap();
        drop(store);

        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("\"number\": 1", "\"number\": 2");
        fs::write(&path, tampered).unwrap();

        let err = HistoryStore::open(&path, 10).err().unwrap();
        assert!(matches!(err, HistoryError::IntegrityFailure { .. }));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let checksum = compute_checksum(&[]).unwrap();
        let body = format!(r#"{{"version":9,"checksum":"{checksum}","results":[]}}"#);
        fs::write(&path, body).unwrap();

        let err = HistoryStore::open(&path, 10).err().unwrap();
        assert!(matches!(err, HistoryError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_persistence_failure_keeps_memory() {
        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("data");
        let path = parent.join("history.json");
        let store = HistoryStore::load_or_empty(&path, 10);
        assert_eq!(store.path(), Some(path.as_path()));

        // A regular file now sits where the parent directory should be.
        fs::write(&parent, b"").unwrap();
        let outcome = store.append(make_result(0, 6)).unwrap();
        assert_eq!(outcome, AppendOutcome::MemoryOnly);
        assert_eq!(store.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_unique_minutes_and_bounded(
            offsets in proptest::collection::vec(0i64..50, 0..120),
            max_len in 1usize..20,
        ) {
            let store = HistoryStore::in_memory(max_len);
            for offset in offsets {
                let _ = store.append(make_result(offset, (offset % 10) as u8));
                prop_assert!(store.len() <= max_len);
            }
            let snap = store.snapshot(None);
            prop_assert!(snap.windows(2).all(|w| w[0].minute_start < w[1].minute_start));
        }
    }
}
