//! Scoped sessions: lock → open → operate → commit → close → unlock.
//!
//! A session holds the store lock for its whole lifetime. Writers append chunk bytes
//! after the last commit and publish them by appending a new TOC and footer in
//! [`Session::flush`]. Dropping a session without flushing abandons everything it
//! appended; the next writer truncates those bytes.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::constants::{FOOTER_SIZE, FORMAT_VERSION, HEADER_SIZE, MAGIC};
use crate::error::{Result, TrackDbError};
use crate::footer::{CommitFooter, find_last_valid_footer};
use crate::io::chunk::EncodedChunk;
use crate::io::header::HeaderCodec;
use crate::lock::{LockGuard, StoreLock};
use crate::types::{ChunkRef, Header, Toc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionMode {
    Read,
    Write,
}

/// Points where tests can simulate a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaultPoint {
    /// Chunks are appended but the catalog referencing them is not committed.
    BeforeCommit,
    /// Data is committed but the finished marker has not been written.
    BeforeSeal,
}

#[cfg(test)]
pub(crate) mod fault {
    use std::cell::Cell;

    use super::FaultPoint;

    thread_local! {
        static ARMED: Cell<Option<FaultPoint>> = const { Cell::new(None) };
    }

    /// Fail the next time `point` is reached on this thread.
    pub(crate) fn arm(point: FaultPoint) {
        ARMED.with(|armed| armed.set(Some(point)));
    }

    pub(crate) fn disarm() {
        ARMED.with(|armed| armed.set(None));
    }

    pub(super) fn take(point: FaultPoint) -> bool {
        ARMED.with(|armed| {
            if armed.get() == Some(point) {
                armed.set(None);
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
pub(crate) fn inject(point: FaultPoint) -> Result<()> {
    if fault::take(point) {
        return Err(TrackDbError::Io(std::io::Error::other(format!(
            "injected fault at {point:?}"
        ))));
    }
    Ok(())
}

#[cfg(not(test))]
#[inline]
pub(crate) fn inject(_point: FaultPoint) -> Result<()> {
    Ok(())
}

pub(crate) struct Session {
    // Field order matters: the file is closed before the lock is released.
    file: File,
    path: PathBuf,
    mode: SessionMode,
    toc: Toc,
    committed_end: u64,
    catalog_len: u64,
    append_at: u64,
    unsynced_data: bool,
    dirty: bool,
    sync_writes: bool,
    _guard: LockGuard,
}

impl Session {
    pub(crate) fn open(
        path: &Path,
        mode: SessionMode,
        lock: Arc<dyn StoreLock>,
        sync_writes: bool,
    ) -> Result<Self> {
        let guard = LockGuard::acquire(lock)?;
        let mut file = match mode {
            SessionMode::Read => OpenOptions::new().read(true).open(path)?,
            SessionMode::Write => OpenOptions::new().read(true).write(true).open(path)?,
        };
        HeaderCodec::read(&mut file)?;
        let (toc, committed_end, catalog_len) = load_committed(&file, path)?;

        if mode == SessionMode::Write {
            let len = file.metadata()?.len();
            if len > committed_end {
                tracing::warn!(
                    path = %path.display(),
                    file.len = len,
                    commit.end = committed_end,
                    "discarding bytes from an interrupted session"
                );
                file.set_len(committed_end)?;
                file.sync_all()?;
            }
        }
        tracing::debug!(
            path = %path.display(),
            ?mode,
            commit.generation = toc.generation,
            "session opened"
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode,
            toc,
            committed_end,
            catalog_len,
            append_at: committed_end,
            unsynced_data: false,
            dirty: false,
            sync_writes,
            _guard: guard,
        })
    }

    /// Create an empty database at `path` if it is missing or zero-length.
    ///
    /// Returns `false` when another writer got there first.
    pub(crate) fn initialise(
        path: &Path,
        lock: Arc<dyn StoreLock>,
        sync_writes: bool,
    ) -> Result<bool> {
        let guard = LockGuard::acquire(lock)?;
        let mut file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                if file.metadata()?.len() > 0 {
                    return Ok(false);
                }
                file
            }
            Err(err) => return Err(err.into()),
        };
        tracing::info!(path = %path.display(), "creating new track database");

        let header = Header {
            magic: MAGIC,
            version: FORMAT_VERSION,
            created_at: chrono::Utc::now().timestamp(),
        };
        HeaderCodec::write(&mut file, &header)?;
        let mut session = Self {
            file,
            path: path.to_path_buf(),
            mode: SessionMode::Write,
            toc: Toc::default(),
            committed_end: HEADER_SIZE as u64,
            catalog_len: 0,
            append_at: HEADER_SIZE as u64,
            unsynced_data: true,
            dirty: true,
            sync_writes,
            _guard: guard,
        };
        session.flush()?;
        Ok(true)
    }

    #[must_use]
    pub(crate) fn toc(&self) -> &Toc {
        &self.toc
    }

    /// Mutable catalog access; marks the session dirty.
    pub(crate) fn toc_mut(&mut self) -> Result<&mut Toc> {
        self.ensure_writable()?;
        self.dirty = true;
        Ok(&mut self.toc)
    }

    pub(crate) fn header(&mut self) -> Result<Header> {
        HeaderCodec::read(&mut self.file)
    }

    #[must_use]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Length of the newest committed `[TOC][footer]`.
    #[must_use]
    pub(crate) fn catalog_len(&self) -> u64 {
        self.catalog_len
    }

    /// Committed bytes that neither the header, the live chunks nor the newest catalog
    /// account for.
    #[must_use]
    pub(crate) fn garbage_bytes(&self) -> u64 {
        self.committed_end
            .saturating_sub(HEADER_SIZE as u64 + self.toc.live_bytes() + self.catalog_len)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode == SessionMode::Read {
            return Err(TrackDbError::ReadOnly);
        }
        Ok(())
    }

    /// Append an encoded chunk after the current end of data.
    pub(crate) fn append_chunk(&mut self, chunk: &EncodedChunk) -> Result<ChunkRef> {
        self.ensure_writable()?;
        let offset = self.append_at;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&chunk.bytes)?;
        self.append_at += chunk.bytes.len() as u64;
        self.unsynced_data = true;
        Ok(ChunkRef {
            offset,
            stored_len: chunk.bytes.len() as u64,
            raw_len: chunk.raw_len,
            checksum: chunk.checksum,
        })
    }

    /// Read the stored bytes of a chunk without verifying them.
    pub(crate) fn read_chunk(&mut self, chunk: &ChunkRef) -> Result<Vec<u8>> {
        let end = chunk
            .offset
            .checked_add(chunk.stored_len)
            .filter(|end| chunk.offset >= HEADER_SIZE as u64 && *end <= self.append_at)
            .ok_or_else(|| TrackDbError::InvalidToc {
                reason: format!(
                    "chunk at {}+{} lies outside the data region",
                    chunk.offset, chunk.stored_len
                ),
            })?;
        let len = usize::try_from(end - chunk.offset).map_err(|_| TrackDbError::InvalidToc {
            reason: "chunk too large for this platform".into(),
        })?;
        let mut bytes = vec![0u8; len];
        self.file.seek(SeekFrom::Start(chunk.offset))?;
        self.file.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Publish pending catalog changes: sync chunk data, then append TOC and footer.
    pub(crate) fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.ensure_writable()?;
        if self.unsynced_data && self.sync_writes {
            self.file.sync_data()?;
        }
        inject(FaultPoint::BeforeCommit)?;

        self.toc.generation += 1;
        let tail = commit_tail(&self.toc)?;

        self.file.seek(SeekFrom::Start(self.append_at))?;
        self.file.write_all(&tail)?;
        if self.sync_writes {
            self.file.sync_all()?;
        }
        self.append_at += tail.len() as u64;
        self.committed_end = self.append_at;
        self.catalog_len = tail.len() as u64;
        self.unsynced_data = false;
        self.dirty = false;
        tracing::debug!(
            path = %self.path.display(),
            commit.generation = self.toc.generation,
            commit.tail_len = tail.len(),
            commit.end = self.committed_end,
            "committed catalog"
        );
        Ok(())
    }
}

/// `[TOC][footer]` bytes that commit `toc` at its current generation.
pub(crate) fn commit_tail(toc: &Toc) -> Result<Vec<u8>> {
    let toc_bytes = toc.encode()?;
    let footer = CommitFooter {
        toc_len: toc_bytes.len() as u64,
        toc_hash: *blake3::hash(&toc_bytes).as_bytes(),
        generation: toc.generation,
    };
    let mut tail = Vec::with_capacity(toc_bytes.len() + FOOTER_SIZE);
    tail.extend_from_slice(&toc_bytes);
    tail.extend_from_slice(&footer.encode());
    Ok(tail)
}

/// Decode the newest committed catalog. Returns it with the end offset and the length
/// of that commit's `[TOC][footer]`.
fn load_committed(file: &File, path: &Path) -> Result<(Toc, u64, u64)> {
    // Safety: writers only touch the file while holding the store lock, which this
    // session owns, so the mapped bytes are stable for the mapping's lifetime.
    let mmap = unsafe { Mmap::map(file)? };
    let slice = find_last_valid_footer(&mmap).ok_or_else(|| TrackDbError::NoValidCommit {
        path: path.to_path_buf(),
    })?;
    if slice.end < mmap.len() as u64 {
        tracing::info!(
            path = %path.display(),
            commit.generation = slice.footer.generation,
            commit.end = slice.end,
            file.len = mmap.len(),
            "recovered last valid commit; trailing bytes ignored"
        );
    }
    let toc = Toc::decode(slice.toc_bytes)?;
    if toc.generation != slice.footer.generation {
        return Err(TrackDbError::InvalidToc {
            reason: format!(
                "catalog generation {} does not match footer generation {}",
                toc.generation, slice.footer.generation
            ),
        });
    }
    Ok((toc, slice.end, slice.end - slice.toc_offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LocalLock;
    use crate::types::{ClipNode, StorageOptions};

    fn fresh() -> (tempfile::TempDir, PathBuf, Arc<dyn StoreLock>) {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("tracks.tdb");
        let lock: Arc<dyn StoreLock> = Arc::new(LocalLock::new());
        assert!(Session::initialise(&path, lock.clone(), true).expect("init"));
        (dir, path, lock)
    }

    #[test]
    fn initialise_writes_an_empty_catalog() {
        let (_dir, path, lock) = fresh();
        assert!(!Session::initialise(&path, lock.clone(), true).expect("second init"));
        let session = Session::open(&path, SessionMode::Read, lock, true).expect("open");
        assert_eq!(session.toc().generation, 1);
        assert!(session.toc().clips.is_empty());
    }

    #[test]
    fn read_sessions_refuse_mutation() {
        let (_dir, path, lock) = fresh();
        let mut session = Session::open(&path, SessionMode::Read, lock, true).expect("open");
        assert!(matches!(session.toc_mut(), Err(TrackDbError::ReadOnly)));
    }

    #[test]
    fn unflushed_session_leaves_previous_commit() {
        let (_dir, path, lock) = fresh();
        {
            let mut session =
                Session::open(&path, SessionMode::Write, lock.clone(), true).expect("open");
            let chunk = crate::io::chunk::encode(&[1, 2, 3], &StorageOptions::default())
                .expect("encode");
            session.append_chunk(&chunk).expect("append");
            session.toc_mut().expect("toc").clips.push(ClipNode::new("lost"));
        }
        let before = std::fs::metadata(&path).expect("meta").len();
        let session = Session::open(&path, SessionMode::Write, lock, true).expect("reopen");
        assert!(session.toc().clip("lost").is_none());
        assert_eq!(session.toc().generation, 1);
        assert!(session.file_len().expect("len") < before);
    }

    #[test]
    fn fault_before_commit_keeps_old_catalog() {
        let (_dir, path, lock) = fresh();
        let mut session =
            Session::open(&path, SessionMode::Write, lock.clone(), true).expect("open");
        session.toc_mut().expect("toc").clips.push(ClipNode::new("c"));
        fault::arm(FaultPoint::BeforeCommit);
        assert!(session.flush().is_err());
        drop(session);
        let session = Session::open(&path, SessionMode::Read, lock, true).expect("reopen");
        assert!(session.toc().clips.is_empty());
    }
}
