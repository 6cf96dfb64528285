//! Chunked, crash-safe single-file store for labeled track segments of thermal video.
//!
//! A database holds one `clips` collection. Each clip carries summary attributes and a
//! finished marker; each track inside a clip is an `i16` array of shape
//! (frames, channels, height, width) stored in compressed chunks of nine frames.
//! Every operation runs inside an exclusive session guarded by a [`StoreLock`].

#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(
        clippy::cast_possible_truncation,
        clippy::float_cmp,
        clippy::cast_precision_loss
    )
)]
#![allow(clippy::module_name_repetitions)]
//
// Docs: public entry points are documented; error and panic sections are not required.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Casts between offsets, lengths and frame counts are bounded by the file format.
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_truncation)]
//
#![allow(clippy::too_many_lines)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::similar_names)] // clip_id / track_id
#![allow(clippy::needless_pass_by_value)] // option structs are passed by value
#![allow(clippy::return_self_not_must_use)] // builders
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::unnecessary_wraps)]

/// The trackdb-core crate version (matches `Cargo.toml`).
pub const TRACKDB_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod constants;
pub mod database;
pub mod error;
pub mod footer;
pub mod io;
pub mod ledger;
mod lock;
pub mod types;

pub use constants::*;
pub use database::TrackDatabase;
pub use database::projection::{RESERVED_TRACK_ATTRS, clip_attributes, track_attributes};
pub use error::{Result, TrackDbError};
pub use footer::{CommitFooter, find_last_valid_footer};
pub use ledger::{ClipLedger, LedgerEntry};
pub use lock::{FileLock, LocalLock, LockGuard, StoreLock, process_lock};
pub use types::{
    ArrayData, AttrValue, Attributes, Bounds, ClipSeal, ClipSource, ClipState, Compression,
    CompactionReport, CreateClipOptions, DatabaseOptions, DatabaseStats, FrameSlice, IssueKind,
    NumericArray, SourceStats, StorageOptions, TrackInfo, TrackRecord, TrackSource,
    TrackerSummary, VerificationIssue, VerificationReport, VerificationStatus,
};

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
use std::sync::Mutex;

use bincode::config::{self, Config};

#[cfg(test)]
#[allow(clippy::non_std_lazy_statics)]
static SERIAL_TEST_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serialize tests that hold the process-wide store lock directly.
#[cfg(test)]
pub(crate) fn run_serial_test<T>(f: impl FnOnce() -> T) -> T {
    let _guard = SERIAL_TEST_MUTEX
        .lock()
        .expect("trackdb-core serial test mutex poisoned");
    f()
}

/// Encoding of the on-disk catalog.
pub(crate) fn catalog_config() -> impl Config {
    config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn default_handles_share_the_process_lock() {
        run_serial_test(|| {
            let dir = tempfile::tempdir().expect("tmp");
            let path = dir.path().join("shared.tdb");
            TrackDatabase::open(&path).expect("open");

            let held = LockGuard::acquire(process_lock()).expect("lock");
            let done = Arc::new(AtomicBool::new(false));
            let worker = {
                let done = Arc::clone(&done);
                let path = path.clone();
                std::thread::spawn(move || {
                    let db = TrackDatabase::open(&path).expect("open");
                    let found = db.has_clip("c1").expect("has");
                    done.store(true, Ordering::SeqCst);
                    found
                })
            };
            std::thread::sleep(Duration::from_millis(50));
            assert!(!done.load(Ordering::SeqCst));
            drop(held);
            assert!(!worker.join().expect("join"));
            assert!(done.load(Ordering::SeqCst));
        });
    }
}
