//! Persisted Playback State
//!
//! Durable snapshots of the playback queues and the blacklists. Every
//! mutation of those structures is followed by a full snapshot write, and the
//! snapshots are read back once at startup.

use crate::error::{AppError, Result};
use crate::models::{BlacklistCategory, BlacklistEntry, MediaKind, QueueRow};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Storage port for queue and blacklist snapshots
pub trait StateStore: Send + Sync {
    /// Rows in queue order. A store that never saw this queue returns no rows.
    fn load_queue(&self, kind: MediaKind) -> Result<Vec<QueueRow>>;
    fn save_queue(&self, kind: MediaKind, rows: &[QueueRow]) -> Result<()>;

    /// Slots oldest first
    fn load_blacklist(&self, category: BlacklistCategory) -> Result<Vec<BlacklistEntry>>;
    fn save_blacklist(&self, category: BlacklistCategory, entries: &[BlacklistEntry]) -> Result<()>;
}

/// One JSON file per table inside the state directory
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn queue_file(&self, kind: MediaKind) -> PathBuf {
        match kind {
            MediaKind::Audio => self.dir.join("songqueue.json"),
            MediaKind::Video => self.dir.join("videoqueue.json"),
        }
    }

    fn blacklist_file(&self, category: BlacklistCategory) -> PathBuf {
        self.dir.join(format!("blacklist-{}.json", category.as_str()))
    }

    fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&raw).map_err(|e| {
            AppError::CorruptPersistedState(format!("{}: {}", path.display(), e))
        })
    }

    /// Write through a temporary file so a crash never leaves half a table behind
    fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(rows)?)?;
        fs::rename(&tmp, path)?;
        debug!("Saved {} rows to {}", rows.len(), path.display());
        Ok(())
    }
}

impl StateStore for JsonStateStore {
    fn load_queue(&self, kind: MediaKind) -> Result<Vec<QueueRow>> {
        Self::read_table(&self.queue_file(kind))
    }

    fn save_queue(&self, kind: MediaKind, rows: &[QueueRow]) -> Result<()> {
        Self::write_table(&self.queue_file(kind), rows)
    }

    fn load_blacklist(&self, category: BlacklistCategory) -> Result<Vec<BlacklistEntry>> {
        Self::read_table(&self.blacklist_file(category))
    }

    fn save_blacklist(&self, category: BlacklistCategory, entries: &[BlacklistEntry]) -> Result<()> {
        Self::write_table(&self.blacklist_file(category), entries)
    }
}

/// Keeps snapshots in memory; used by tests and when persistence is not wanted
#[derive(Default)]
pub struct MemoryStateStore {
    queues: Mutex<HashMap<MediaKind, Vec<QueueRow>>>,
    blacklists: Mutex<HashMap<BlacklistCategory, Vec<BlacklistEntry>>>,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful save calls, across all tables
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl StateStore for MemoryStateStore {
    fn load_queue(&self, kind: MediaKind) -> Result<Vec<QueueRow>> {
        Ok(self.queues.lock().get(&kind).cloned().unwrap_or_default())
    }

    fn save_queue(&self, kind: MediaKind, rows: &[QueueRow]) -> Result<()> {
        self.queues.lock().insert(kind, rows.to_vec());
        *self.saves.lock() += 1;
        Ok(())
    }

    fn load_blacklist(&self, category: BlacklistCategory) -> Result<Vec<BlacklistEntry>> {
        Ok(self
            .blacklists
            .lock()
            .get(&category)
            .cloned()
            .unwrap_or_default())
    }

    fn save_blacklist(&self, category: BlacklistCategory, entries: &[BlacklistEntry]) -> Result<()> {
        self.blacklists.lock().insert(category, entries.to_vec());
        *self.saves.lock() += 1;
        Ok(())
    }
}
