//! Flat snapshot ledger of processed clips.
//!
//! The whole ledger is one JSON document carrying a `revision`. `save` is a
//! compare-and-swap: it re-reads the revision on disk under a file lock and refuses to
//! overwrite a snapshot that another writer advanced since this one was loaded.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use atomic_write_file::AtomicWriteFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackDbError};
use crate::lock::{FileLock, LockGuard};
use crate::types::Attributes;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub stats: Attributes,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Snapshot {
    revision: u64,
    clips: BTreeMap<String, LedgerEntry>,
}

#[derive(Debug)]
pub struct ClipLedger {
    path: PathBuf,
    snapshot: Snapshot,
}

impl ClipLedger {
    /// Load the ledger at `path`. A missing file is an empty ledger at revision 0.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = read_snapshot(&path)?.unwrap_or_default();
        tracing::debug!(
            path = %path.display(),
            revision = snapshot.revision,
            clips = snapshot.clips.len(),
            "loaded clip ledger"
        );
        Ok(Self { path, snapshot })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Revision this handle was loaded at, or last saved as.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.snapshot.revision
    }

    #[must_use]
    pub fn has_clip(&self, clip_id: &str) -> bool {
        self.snapshot.clips.contains_key(clip_id)
    }

    #[must_use]
    pub fn clip(&self, clip_id: &str) -> Option<&LedgerEntry> {
        self.snapshot.clips.get(clip_id)
    }

    pub fn clip_ids(&self) -> impl Iterator<Item = &str> {
        self.snapshot.clips.keys().map(String::as_str)
    }

    /// Record a clip in memory, replacing any previous entry. Nothing is written until
    /// [`Self::save`].
    pub fn add_clip(&mut self, clip_id: impl Into<String>, stats: Attributes) {
        self.snapshot.clips.insert(
            clip_id.into(),
            LedgerEntry {
                stats,
                recorded_at: Utc::now(),
            },
        );
    }

    pub fn remove_clip(&mut self, clip_id: &str) -> bool {
        self.snapshot.clips.remove(clip_id).is_some()
    }

    /// Write the snapshot if the file is still at the loaded revision.
    ///
    /// Fails with [`TrackDbError::ConcurrencyConflict`] otherwise; the caller reloads and
    /// reapplies its changes.
    pub fn save(&mut self) -> Result<()> {
        let _guard = LockGuard::acquire(Arc::new(FileLock::beside(&self.path)))?;
        let found = read_snapshot(&self.path)?.map_or(0, |snapshot| snapshot.revision);
        if found != self.snapshot.revision {
            tracing::warn!(
                path = %self.path.display(),
                expected = self.snapshot.revision,
                found,
                "ledger changed since load"
            );
            return Err(TrackDbError::ConcurrencyConflict {
                expected: self.snapshot.revision,
                found,
            });
        }

        let mut next = self.snapshot.clone();
        next.revision += 1;
        let bytes = serde_json::to_vec_pretty(&next)?;
        let mut file = AtomicWriteFile::options().open(&self.path)?;
        file.write_all(&bytes)?;
        file.commit()?;

        self.snapshot = next;
        tracing::debug!(
            path = %self.path.display(),
            revision = self.snapshot.revision,
            "saved clip ledger"
        );
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
