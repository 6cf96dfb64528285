//! Core `TrackDatabase` type: clip/track storage on top of scoped, exclusive sessions.

pub mod lifecycle;
pub mod maintenance;
pub mod projection;
pub(crate) mod session;
pub mod tracks;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, TrackDbError};
use crate::lock::{StoreLock, process_lock};
use crate::types::DatabaseOptions;
use session::{Session, SessionMode};

/// Handle to a track database file.
///
/// The handle itself holds no open file. Every operation opens the file inside its own
/// session while holding the store lock, so handles are cheap to clone and share
/// between threads.
#[derive(Clone)]
pub struct TrackDatabase {
    path: PathBuf,
    options: DatabaseOptions,
    lock: Arc<dyn StoreLock>,
}

impl fmt::Debug for TrackDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackDatabase")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TrackDatabase {
    /// Open the database at `path`, creating an empty one if it does not exist.
    /// Sessions are serialized by the process-wide lock.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, DatabaseOptions::default(), process_lock())
    }

    /// Open with explicit options and an injected lock, e.g. a [`crate::FileLock`]
    /// shared by a pool of worker processes.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        options: DatabaseOptions,
        lock: Arc<dyn StoreLock>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let needs_init = match std::fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => return Err(err.into()),
        };
        if needs_init {
            if !options.create_if_missing {
                return Err(TrackDbError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("database {} does not exist", path.display()),
                )));
            }
            Session::initialise(&path, lock.clone(), options.sync_writes)?;
        }
        let db = Self {
            path,
            options,
            lock,
        };
        // Validate the header and catalog up front so a foreign file fails here.
        db.session(SessionMode::Read)?;
        Ok(db)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    #[must_use]
    pub fn lock(&self) -> &Arc<dyn StoreLock> {
        &self.lock
    }

    pub(crate) fn session(&self, mode: SessionMode) -> Result<Session> {
        Session::open(&self.path, mode, self.lock.clone(), self.options.sync_writes)
    }

    /// Run `op` inside a read session.
    pub(crate) fn read<T>(&self, op: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let mut session = self.session(SessionMode::Read)?;
        op(&mut session)
    }

    /// Run `op` inside a write session and commit if it succeeds. On error the session
    /// is dropped uncommitted and the previous state stays in place.
    ///
    /// Once the commit holds, superseded bytes past the `auto_compact_bytes` floor are
    /// reclaimed before the lock is released.
    pub(crate) fn write<T>(&self, op: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let mut session = self.session(SessionMode::Write)?;
        let value = op(&mut session)?;
        session.flush()?;

        let Some(floor) = self.options.auto_compact_bytes else {
            return Ok(value);
        };
        let garbage = session.garbage_bytes();
        let in_use = session.file_len()?.saturating_sub(garbage);
        if garbage > floor.max(in_use) {
            tracing::debug!(
                path = %self.path.display(),
                bytes.garbage = garbage,
                bytes.in_use = in_use,
                "compacting after write"
            );
            // The write is already committed; a failed rewrite only postpones reclaiming.
            if let Err(err) = maintenance::rewrite_live(session) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "automatic compaction failed"
                );
            }
        }
        Ok(value)
    }
}

/// Clip and track ids become path components of the layout and must be non-empty and
/// free of `/` and NUL.
pub(crate) fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.contains('\0') {
        return Err(TrackDbError::invalid_argument(format!(
            "{kind} id {id:?} must be non-empty and contain neither '/' nor NUL"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LocalLock;

    #[test]
    fn open_creates_missing_database() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("new.tdb");
        let db = TrackDatabase::open(&path).expect("open");
        assert!(path.exists());
        assert_eq!(db.path(), path.as_path());
    }

    #[test]
    fn open_initialises_zero_length_file() {
        let file = tempfile::NamedTempFile::new().expect("tmp");
        TrackDatabase::open(file.path()).expect("open");
        assert!(std::fs::metadata(file.path()).expect("meta").len() > 0);
    }

    #[test]
    fn missing_database_without_create_fails() {
        let dir = tempfile::tempdir().expect("tmp");
        let options = DatabaseOptions {
            create_if_missing: false,
            ..DatabaseOptions::default()
        };
        let err = TrackDatabase::open_with(
            dir.path().join("absent.tdb"),
            options,
            Arc::new(LocalLock::new()),
        )
        .expect_err("missing");
        assert!(err.is_storage_failure());
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("clip.cptv");
        std::fs::write(&path, vec![7u8; 512]).expect("write");
        let err = TrackDatabase::open(&path).expect_err("foreign");
        assert!(matches!(err, TrackDbError::InvalidHeader { .. }));
    }

    #[test]
    fn ids_are_validated() {
        assert!(validate_id("clip", "20171101-150843-akaroa03").is_ok());
        assert!(validate_id("clip", "").is_err());
        assert!(validate_id("track", "a/b").is_err());
    }
}
