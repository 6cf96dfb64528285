//! Sessions from many threads and handles never overlap.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use ndarray::Array4;
use tempfile::TempDir;

use trackdb::{
    DatabaseOptions, FileLock, FrameSlice, LocalLock, Result, StoreLock, TrackDatabase,
};

/// Wraps a lock and records how many holders it ever had at once.
#[derive(Debug, Default)]
struct CountingLock {
    inner: LocalLock,
    active: AtomicUsize,
    peak: AtomicUsize,
    sessions: AtomicUsize,
}

impl StoreLock for CountingLock {
    fn acquire(&self) -> Result<()> {
        self.inner.acquire()?;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> Result<()> {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.release()
    }
}

fn frames(seed: i16) -> Array4<i16> {
    Array4::from_shape_fn((11, 2, 6, 6), |(f, c, y, x)| {
        seed.wrapping_mul(100) + (f * 72 + c * 36 + y * 6 + x) as i16
    })
}

#[test]
fn at_most_one_session_is_open() {
    let dir = TempDir::new().unwrap();
    let lock = Arc::new(CountingLock::default());
    let db = TrackDatabase::open_with(
        dir.path().join("shared.tdb"),
        DatabaseOptions::default(),
        lock.clone(),
    )
    .unwrap();

    let workers: Vec<_> = (0..8i16)
        .map(|worker| {
            let db = db.clone();
            thread::spawn(move || {
                let clip_id = format!("clip-{worker}");
                db.create_clip(&clip_id, None).unwrap();
                for track in 0..3 {
                    db.add_track(&clip_id, &track.to_string(), &frames(worker), None, None)
                        .unwrap();
                    assert!(db.has_clip(&clip_id).unwrap());
                }
                db.list_all_tracks().unwrap().len()
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(lock.peak.load(Ordering::SeqCst), 1);
    assert_eq!(lock.active.load(Ordering::SeqCst), 0);
    assert!(lock.sessions.load(Ordering::SeqCst) >= 8 * 8);

    let tracks = db.list_all_tracks().unwrap();
    assert_eq!(tracks.len(), 24);
    for worker in 0..8i16 {
        let clip_id = format!("clip-{worker}");
        assert!(db.has_clip(&clip_id).unwrap());
        assert_eq!(
            db.get_track(&clip_id, "2", FrameSlice::all()).unwrap(),
            frames(worker)
        );
    }
    assert!(db.verify().unwrap().is_clean());
}

#[test]
fn separate_handles_share_a_file_lock() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pool.tdb");
    let lock_path = FileLock::beside(&path).path().to_path_buf();

    let workers: Vec<_> = (0..4i16)
        .map(|worker| {
            let path = path.clone();
            let lock_path = lock_path.clone();
            thread::spawn(move || {
                // Each worker stands in for a separate process with its own handle.
                let db = TrackDatabase::open_with(
                    &path,
                    DatabaseOptions::default(),
                    Arc::new(FileLock::new(&lock_path)),
                )
                .unwrap();
                let clip_id = format!("c{worker}");
                db.create_clip(&clip_id, None).unwrap();
                db.add_track(&clip_id, "1", &frames(worker), None, None)
                    .unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let db = TrackDatabase::open_with(
        &path,
        DatabaseOptions::default(),
        Arc::new(FileLock::new(&lock_path)),
    )
    .unwrap();
    let mut clips = db.list_clips().unwrap();
    clips.sort();
    assert_eq!(clips, vec!["c0", "c1", "c2", "c3"]);
    assert_eq!(db.list_all_tracks().unwrap().len(), 4);
}

#[test]
fn readers_see_committed_writes() {
    let dir = TempDir::new().unwrap();
    let lock: Arc<dyn StoreLock> = Arc::new(LocalLock::new());
    let path = dir.path().join("rw.tdb");
    let writer = TrackDatabase::open_with(&path, DatabaseOptions::default(), lock.clone()).unwrap();
    let reader = TrackDatabase::open_with(&path, DatabaseOptions::default(), lock).unwrap();

    writer.create_clip("c1", None).unwrap();
    assert!(reader.has_clip("c1").unwrap());
    writer.add_track("c1", "1", &frames(1), None, None).unwrap();
    assert_eq!(reader.list_all_tracks().unwrap().len(), 1);
}
