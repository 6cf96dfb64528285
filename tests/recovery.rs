//! Torn commits, trailing garbage and corrupted chunks.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use ndarray::Array4;
use tempfile::TempDir;

use trackdb::{
    ClipState, DatabaseOptions, FrameSlice, HEADER_SIZE, IssueKind, LocalLock, StorageOptions,
    TrackDatabase, TrackDbError, VerificationStatus,
};

fn open(path: &Path) -> TrackDatabase {
    TrackDatabase::open_with(path, DatabaseOptions::default(), Arc::new(LocalLock::new())).unwrap()
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}

fn sample() -> Array4<i16> {
    Array4::from_shape_fn((9, 1, 8, 8), |(f, _, y, x)| (f * 100 + y * 8 + x) as i16)
}

#[test]
fn trailing_garbage_is_ignored_and_truncated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.tdb");
    let db = open(&path);
    db.create_clip("c1", None).unwrap();
    db.add_track("c1", "1", &sample(), None, None).unwrap();
    let committed = file_len(&path);

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xAB; 333]).unwrap();
    drop(file);

    let db = open(&path);
    assert!(db.has_clip("c1").unwrap());
    assert_eq!(db.get_track("c1", "1", FrameSlice::all()).unwrap(), sample());

    db.create_clip("c2", None).unwrap();
    assert!(db.has_clip("c2").unwrap());
    assert!(db.stats().unwrap().file_bytes > committed);
    assert!(db.verify().unwrap().is_clean());
}

#[test]
fn torn_seal_leaves_clip_in_progress() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.tdb");
    let db = open(&path);
    db.create_clip("c1", None).unwrap();
    db.create_clip("c2", None).unwrap();

    // Tear the footer of the last commit: the one that set c2's finished marker.
    let len = file_len(&path);
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len - 10)
        .unwrap();

    let db = open(&path);
    assert!(db.has_clip("c1").unwrap());
    assert!(!db.has_clip("c2").unwrap());
    assert_eq!(db.clip_state("c2").unwrap(), ClipState::InProgress);
    assert_eq!(
        db.verify().unwrap().status,
        VerificationStatus::NeedsRepair
    );

    // Re-running the step repairs the clip.
    db.create_clip("c2", None).unwrap();
    assert!(db.has_clip("c2").unwrap());
    assert_eq!(db.list_clips().unwrap(), vec!["c1", "c2"]);
}

#[test]
fn corrupted_chunk_is_detected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.tdb");
    let db = open(&path);
    db.create_clip("c1", None).unwrap();
    let chunk_offset = file_len(&path);
    db.add_track("c1", "1", &sample(), None, Some(StorageOptions::uncompressed()))
        .unwrap();

    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(chunk_offset + 7)).unwrap();
    file.write_all(&[0x5A]).unwrap();
    drop(file);

    let err = db.get_track("c1", "1", FrameSlice::all()).unwrap_err();
    assert!(matches!(err, TrackDbError::ChunkCorruption { index: 0, .. }));
    assert!(err.is_storage_failure());

    let report = db.verify().unwrap();
    assert_eq!(report.status, VerificationStatus::Failed);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].kind, IssueKind::ChunkChecksum);

    assert!(matches!(
        db.compact(),
        Err(TrackDbError::ChunkCorruption { .. })
    ));
    // The failed compaction leaves the original file in place.
    assert!(db.has_clip("c1").unwrap());
}

#[test]
fn partial_reads_touch_only_overlapping_chunks() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.tdb");
    let db = open(&path);
    db.create_clip("c1", None).unwrap();
    let data = Array4::from_shape_fn((27, 1, 8, 8), |(f, _, y, x)| (f * 100 + y * 8 + x) as i16);
    let chunk_offset = file_len(&path);
    db.add_track("c1", "1", &data, None, Some(StorageOptions::uncompressed()))
        .unwrap();

    // Damage the first of three chunks; frames 0..9 live there.
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(chunk_offset + 3)).unwrap();
    file.write_all(&[0xC3]).unwrap();
    drop(file);

    let window = db.get_track("c1", "1", FrameSlice::range(9, 20)).unwrap();
    assert_eq!(window, data.slice(ndarray::s![9..20, .., .., ..]));
    let channel = db
        .get_track_channel("c1", "1", 0, FrameSlice::from_frame(-5))
        .unwrap();
    assert_eq!(channel, data.slice(ndarray::s![22..27, 0, .., ..]));

    let err = db.get_track("c1", "1", FrameSlice::range(8, 10)).unwrap_err();
    assert!(matches!(err, TrackDbError::ChunkCorruption { index: 0, .. }));
}

#[test]
fn damaged_header_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.tdb");
    open(&path).create_clip("c1", None).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[9] ^= 0xFF;
    fs::write(&path, bytes).unwrap();
    let err = TrackDatabase::open(&path).unwrap_err();
    assert!(matches!(err, TrackDbError::InvalidHeader { .. }));
}

#[test]
fn file_without_commit_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.tdb");
    open(&path);
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(HEADER_SIZE as u64 + 12)
        .unwrap();

    let err = TrackDatabase::open_with(&path, DatabaseOptions::default(), Arc::new(LocalLock::new()))
        .unwrap_err();
    assert!(matches!(err, TrackDbError::NoValidCommit { .. }));
}

#[test]
fn compaction_keeps_live_data_readable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.tdb");
    let db = open(&path);
    for clip in ["a", "b"] {
        db.create_clip(clip, None).unwrap();
        db.add_track(clip, "1", &sample(), None, None).unwrap();
    }
    // Overwriting moves "a" behind "b" and orphans its first track.
    db.create_clip("a", None).unwrap();
    db.add_track("a", "2", &sample(), None, None).unwrap();

    let before = file_len(&path);
    let report = db.compact().unwrap();
    assert_eq!(report.bytes_before, before);
    assert_eq!(file_len(&path), report.bytes_after);
    assert!(report.bytes_after < before);

    let db = open(&path);
    assert_eq!(
        db.list_all_tracks().unwrap(),
        vec![
            ("b".to_string(), "1".to_string()),
            ("a".to_string(), "2".to_string())
        ]
    );
    assert_eq!(db.get_track("a", "2", FrameSlice::all()).unwrap(), sample());
    assert!(db.verify().unwrap().is_clean());
}
