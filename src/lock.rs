//! Locking gateway: exclusive access to the backing file, one session at a time.
//!
//! Every session acquires the database's [`StoreLock`] before opening the file and
//! releases it after closing. By default all databases in a process share
//! [`process_lock`]; worker pools spanning several processes inject a [`FileLock`]
//! instead.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use fs2::FileExt;
use once_cell::sync::Lazy;

use crate::error::{Result, TrackDbError};

/// Mutual exclusion around open sessions. Callers block in `acquire` without a timeout.
pub trait StoreLock: Send + Sync + fmt::Debug {
    fn acquire(&self) -> Result<()>;
    fn release(&self) -> Result<()>;
}

/// In-process lock: a flag guarded by a mutex, with waiters parked on a condvar.
#[derive(Debug, Default)]
pub struct LocalLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl LocalLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreLock for LocalLock {
    fn acquire(&self) -> Result<()> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !*held {
            return Err(TrackDbError::Lock("release without acquire".into()));
        }
        *held = false;
        drop(held);
        self.released.notify_one();
        Ok(())
    }
}

static PROCESS_LOCK: Lazy<Arc<LocalLock>> = Lazy::new(|| Arc::new(LocalLock::new()));

/// The lock shared by every database opened without an explicit lock.
#[must_use]
pub fn process_lock() -> Arc<dyn StoreLock> {
    Arc::clone(&PROCESS_LOCK) as Arc<dyn StoreLock>
}

/// Cross-process lock backed by an OS advisory lock on a dedicated lock file.
///
/// Threads inside one process are serialized by an inner [`LocalLock`] first, so the
/// advisory lock is only ever requested once per process at a time.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    local: LocalLock,
    handle: Mutex<Option<File>>,
}

impl FileLock {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            local: LocalLock::new(),
            handle: Mutex::new(None),
        }
    }

    /// `<database>.lock` next to the database file.
    pub fn beside(database: impl AsRef<Path>) -> Self {
        let mut name = database.as_ref().as_os_str().to_owned();
        name.push(".lock");
        Self::new(PathBuf::from(name))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive().map_err(|err| {
            TrackDbError::Lock(format!("{}: {err}", self.path.display()))
        })?;
        Ok(file)
    }
}

impl StoreLock for FileLock {
    fn acquire(&self) -> Result<()> {
        self.local.acquire()?;
        match self.lock_file() {
            Ok(file) => {
                *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
                Ok(())
            }
            Err(err) => {
                self.local.release()?;
                Err(err)
            }
        }
    }

    fn release(&self) -> Result<()> {
        let file = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let unlocked = match file {
            Some(file) => FileExt::unlock(&file).map_err(|err| {
                TrackDbError::Lock(format!("{}: {err}", self.path.display()))
            }),
            None => Err(TrackDbError::Lock("release without acquire".into())),
        };
        self.local.release()?;
        unlocked
    }
}

/// Holds a [`StoreLock`] until dropped, on every exit path.
#[derive(Debug)]
pub struct LockGuard {
    lock: Arc<dyn StoreLock>,
}

impl LockGuard {
    pub fn acquire(lock: Arc<dyn StoreLock>) -> Result<Self> {
        lock.acquire()?;
        Ok(Self { lock })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release() {
            tracing::warn!(error = %err, "failed to release store lock");
        }
    }
}
