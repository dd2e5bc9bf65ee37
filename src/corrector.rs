//! Correction-tracking persistence and annotator memoization (spec §4.4,
//! §6 "Correction-tracking entries", §9 "Annotator memoization").
//!
//! `CorrectionTracker` is `UserDict` (`userdict.rs`) ported near-verbatim:
//! the same `redb` table-keyed-by-string-keyed-by-u64-count shape, with the
//! key encoded as `original\0final` the way the teacher encodes bigram keys
//! in `encode_bigram_key`/`decode_bigram_key`. `AnnotationMemo` is the
//! "copy-on-write snapshot read by workers" design note made concrete: an
//! `Arc<HashMap<..>>` swapped atomically on each annotator commit, so
//! workers that captured a reference at task start never observe a
//! half-updated table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::CorrectOcrError;

const TABLE: TableDefinition<'static, &'static str, u64> = TableDefinition::new("correction_tracking");

fn encode_key(original: &str, finalized: &str) -> String {
    format!("{original}\0{finalized}")
}

fn decode_key(key: &str) -> Option<(String, String)> {
    let mut parts = key.splitn(2, '\0');
    let original = parts.next()?;
    let finalized = parts.next()?;
    Some((original.to_string(), finalized.to_string()))
}

/// A `redb`-backed counter of `(original, final)` correction decisions
/// (spec §6: "Correction-tracking entries: per (original, final) pair,
/// incremented counts"), with an in-memory fallback so tests and ad-hoc
/// callers don't need a filesystem.
#[derive(Clone)]
pub enum CorrectionTracker {
    Redb {
        db: Arc<Database>,
        #[allow(dead_code)]
        path: PathBuf,
    },
    InMemory(Arc<RwLock<HashMap<(String, String), u64>>>),
}

impl std::fmt::Debug for CorrectionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrectionTracker::Redb { path, .. } => f.debug_struct("CorrectionTracker::Redb").field("path", path).finish(),
            CorrectionTracker::InMemory(_) => f.debug_struct("CorrectionTracker::InMemory").finish(),
        }
    }
}

impl CorrectionTracker {
    /// Open (or create) a `redb`-backed tracker at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CorrectOcrError> {
        if let Some(dir) = path.as_ref().parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let db = Database::create(path.as_ref()).map_err(|e| CorrectOcrError::Persistence(e.into()))?;
        Ok(CorrectionTracker::Redb {
            db: Arc::new(db),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// An in-memory tracker, for tests and short-lived sessions that don't
    /// need durability.
    pub fn in_memory() -> Self {
        CorrectionTracker::InMemory(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Record one (original, final) decision, incrementing its count by 1.
    pub fn record(&self, original: &str, finalized: &str) -> Result<(), CorrectOcrError> {
        self.record_with_count(original, finalized, 1)
    }

    pub fn record_with_count(&self, original: &str, finalized: &str, delta: u64) -> Result<(), CorrectOcrError> {
        match self {
            CorrectionTracker::Redb { db, .. } => {
                let key = encode_key(original, finalized);
                let current = {
                    let read = db.begin_read().map_err(|e| CorrectOcrError::Persistence(e.into()))?;
                    match read.open_table(TABLE) {
                        Ok(table) => table
                            .get(key.as_str())
                            .map_err(|e| CorrectOcrError::Persistence(e.into()))?
                            .map(|v| v.value())
                            .unwrap_or(0),
                        Err(redb::TableError::TableDoesNotExist(_)) => 0,
                        Err(e) => return Err(CorrectOcrError::Persistence(e.into())),
                    }
                };
                let write = db.begin_write().map_err(|e| CorrectOcrError::Persistence(e.into()))?;
                {
                    let mut table = write.open_table(TABLE).map_err(|e| CorrectOcrError::Persistence(e.into()))?;
                    table
                        .insert(key.as_str(), &current.saturating_add(delta))
                        .map_err(|e| CorrectOcrError::Persistence(e.into()))?;
                }
                write.commit().map_err(|e| CorrectOcrError::Persistence(e.into()))?;
                Ok(())
            }
            CorrectionTracker::InMemory(map) => {
                let mut map = map.write().expect("correction tracker lock poisoned");
                *map.entry((original.to_string(), finalized.to_string())).or_insert(0) += delta;
                Ok(())
            }
        }
    }

    pub fn count(&self, original: &str, finalized: &str) -> u64 {
        match self {
            CorrectionTracker::Redb { db, .. } => {
                let key = encode_key(original, finalized);
                let read = match db.begin_read() {
                    Ok(r) => r,
                    Err(_) => return 0,
                };
                match read.open_table(TABLE) {
                    Ok(table) => table.get(key.as_str()).ok().flatten().map(|v| v.value()).unwrap_or(0),
                    Err(_) => 0,
                }
            }
            CorrectionTracker::InMemory(map) => {
                let map = map.read().expect("correction tracker lock poisoned");
                map.get(&(original.to_string(), finalized.to_string())).copied().unwrap_or(0)
            }
        }
    }

    /// Snapshot all recorded (original, final) counts.
    pub fn snapshot(&self) -> HashMap<(String, String), u64> {
        match self {
            CorrectionTracker::Redb { db, .. } => {
                let mut out = HashMap::new();
                let read = match db.begin_read() {
                    Ok(r) => r,
                    Err(_) => return out,
                };
                if let Ok(table) = read.open_table(TABLE) {
                    if let Ok(iter) = table.iter() {
                        for item in iter.flatten() {
                            let (k, v) = item;
                            if let Some(pair) = decode_key(k.value()) {
                                out.insert(pair, v.value());
                            }
                        }
                    }
                }
                out
            }
            CorrectionTracker::InMemory(map) => map.read().expect("correction tracker lock poisoned").clone(),
        }
    }
}

/// Immutable snapshot of annotator decisions, keyed by original string
/// (optionally scoped to a file by prefixing the key — spec §4.4:
/// "optionally scoped to the current file"). Workers capture an `Arc`
/// clone at task start; the annotator thread is the sole writer, rebuilding
/// the whole snapshot on each commit rather than mutating shared state
/// (spec §9, §5).
#[derive(Debug, Clone, Default)]
pub struct AnnotationMemo {
    entries: HashMap<String, String>,
}

impl AnnotationMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.entries.get(original).map(String::as_str)
    }

    fn with_entry(&self, original: String, finalized: String) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(original, finalized);
        Self { entries }
    }
}

/// Single-writer front end over an `AnnotationMemo`: `commit` rebuilds and
/// atomically swaps the published snapshot; `snapshot` is what workers
/// call at task start (spec §5, §9).
#[derive(Debug, Default)]
pub struct AnnotationSession {
    published: RwLock<Arc<AnnotationMemo>>,
    commits: AtomicUsize,
}

impl AnnotationSession {
    pub fn new() -> Self {
        Self {
            published: RwLock::new(Arc::new(AnnotationMemo::new())),
            commits: AtomicUsize::new(0),
        }
    }

    pub fn seeded(memo: AnnotationMemo) -> Self {
        Self {
            published: RwLock::new(Arc::new(memo)),
            commits: AtomicUsize::new(0),
        }
    }

    /// Take a reference to the currently-published snapshot. Safe to hold
    /// across a whole per-token decode — later commits never mutate it.
    pub fn snapshot(&self) -> Arc<AnnotationMemo> {
        Arc::clone(&self.published.read().expect("annotation session lock poisoned"))
    }

    /// Record an annotator decision, publishing a freshly-built snapshot
    /// that future `snapshot()` calls observe.
    pub fn commit(&self, original: impl Into<String>, finalized: impl Into<String>) {
        let mut guard = self.published.write().expect("annotation session lock poisoned");
        let next = guard.with_entry(original.into(), finalized.into());
        *guard = Arc::new(next);
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_tracker_records_and_counts() {
        let tracker = CorrectionTracker::in_memory();
        tracker.record("teh", "the").unwrap();
        tracker.record("teh", "the").unwrap();
        assert_eq!(tracker.count("teh", "the"), 2);
        assert_eq!(tracker.count("teh", "teh"), 0);
    }

    #[test]
    fn redb_tracker_roundtrips_through_tempfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking.redb");
        let tracker = CorrectionTracker::open(&path).unwrap();
        tracker.record_with_count("Wagor", "Wagon", 3).unwrap();
        assert_eq!(tracker.count("Wagor", "Wagon"), 3);
        let snap = tracker.snapshot();
        assert_eq!(snap.get(&("Wagor".to_string(), "Wagon".to_string())), Some(&3));
    }

    #[test]
    fn annotation_session_snapshot_isolated_from_later_commits() {
        let session = AnnotationSession::new();
        session.commit("foo", "bar");
        let snap = session.snapshot();
        assert_eq!(snap.get("foo"), Some("bar"));

        session.commit("baz", "qux");
        // The earlier snapshot is unaffected by the later commit.
        assert_eq!(snap.get("baz"), None);
        let latest = session.snapshot();
        assert_eq!(latest.get("baz"), Some("qux"));
        assert_eq!(session.commit_count(), 2);
    }
}
