//! Option structs for opening databases, creating clips and storing track datasets.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_AUTO_COMPACT_BYTES, DEFAULT_CHUNK_FRAMES, DEFAULT_ZSTD_LEVEL};

fn default_true() -> bool {
    true
}

#[allow(clippy::unnecessary_wraps)]
fn default_auto_compact() -> Option<u64> {
    Some(DEFAULT_AUTO_COMPACT_BYTES)
}

fn default_chunk_frames() -> usize {
    DEFAULT_CHUNK_FRAMES
}

/// Lossless codec applied to each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    /// Fast, moderate ratio. The default.
    #[default]
    Lz4,
    /// Slower, better ratio.
    Zstd { level: i32 },
}

impl Compression {
    #[must_use]
    pub fn zstd() -> Self {
        Self::Zstd {
            level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

/// Backend knobs for one track dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOptions {
    #[serde(default)]
    pub compression: Compression,
    /// Byte-shuffle each chunk before compressing it.
    #[serde(default)]
    pub shuffle: bool,
    /// Frames per chunk along the frame axis. Channels are always chunked one at a time.
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            shuffle: false,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
        }
    }
}

impl StorageOptions {
    /// Store chunks without compression.
    #[must_use]
    pub fn uncompressed() -> Self {
        Self {
            compression: Compression::None,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    #[must_use]
    pub fn chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = frames;
        self
    }
}

/// Settings applied to every session of a [`crate::TrackDatabase`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseOptions {
    /// Create an empty database when the file does not exist yet.
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
    /// `fsync` after every commit. Turning this off trades durability for speed.
    #[serde(default = "default_true")]
    pub sync_writes: bool,
    /// Storage used by `add_track` when the caller passes no options.
    #[serde(default)]
    pub default_storage: StorageOptions,
    /// After a write, compact once superseded bytes exceed both this floor and the
    /// bytes still in use. `None` leaves compaction to explicit `compact` calls.
    #[serde(default = "default_auto_compact")]
    pub auto_compact_bytes: Option<u64>,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_writes: true,
            default_storage: StorageOptions::default(),
            auto_compact_bytes: default_auto_compact(),
        }
    }
}

/// When a freshly created clip receives its finished marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipSeal {
    /// Mark the clip finished as soon as its own attributes are durable.
    #[default]
    OnCreate,
    /// Leave the clip unfinished, across any number of `add_track` calls, until
    /// `finish_clip`.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateClipOptions {
    /// Replace an existing clip with the same id. When false an existing clip is kept.
    #[serde(default = "default_true")]
    pub overwrite: bool,
    #[serde(default)]
    pub seal: ClipSeal,
}

impl Default for CreateClipOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            seal: ClipSeal::OnCreate,
        }
    }
}

impl CreateClipOptions {
    #[must_use]
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn seal(mut self, seal: ClipSeal) -> Self {
        self.seal = seal;
        self
    }
}

/// Frame range requested from `get_track`.
///
/// Bounds follow slice semantics: `None` means the start or end of the track, negative
/// values count back from the end, and out-of-range bounds clamp instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameSlice {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl FrameSlice {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn range(start: i64, end: i64) -> Self {
        Self::new(Some(start), Some(end))
    }

    #[must_use]
    pub fn from_frame(start: i64) -> Self {
        Self::new(Some(start), None)
    }

    #[must_use]
    pub fn to_frame(end: i64) -> Self {
        Self::new(None, Some(end))
    }

    /// Concrete frame range for a track of `frames` frames. Always within `0..frames`.
    #[must_use]
    pub fn resolve(&self, frames: usize) -> Range<usize> {
        let len = i64::try_from(frames).unwrap_or(i64::MAX);
        let clamp = |bound: i64| -> usize {
            let absolute = if bound < 0 { bound + len } else { bound };
            absolute.clamp(0, len) as usize
        };
        let start = self.start.map_or(0, clamp);
        let end = self.end.map_or(frames, clamp);
        if start >= end { start..start } else { start..end }
    }
}

impl From<Range<i64>> for FrameSlice {
    fn from(range: Range<i64>) -> Self {
        Self::range(range.start, range.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_accepts_negative_and_open_bounds() {
        assert_eq!(FrameSlice::all().resolve(10), 0..10);
        assert_eq!(FrameSlice::range(2, 5).resolve(10), 2..5);
        assert_eq!(FrameSlice::to_frame(3).resolve(10), 0..3);
        assert_eq!(FrameSlice::from_frame(7).resolve(10), 7..10);
        assert_eq!(FrameSlice::range(-3, -1).resolve(10), 7..9);
        assert_eq!(FrameSlice::range(-30, 4).resolve(10), 0..4);
        assert!(FrameSlice::range(100, 200).resolve(10).is_empty());
        assert!(FrameSlice::range(6, 2).resolve(10).is_empty());
    }

    #[test]
    fn storage_defaults() {
        let opts = StorageOptions::default();
        assert_eq!(opts.compression, Compression::Lz4);
        assert!(!opts.shuffle);
        assert_eq!(opts.chunk_frames, 9);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: DatabaseOptions =
            serde_json::from_str(r#"{"default_storage":{"compression":{"zstd":{"level":7}}}}"#)
                .expect("parse");
        assert!(opts.create_if_missing);
        assert!(opts.sync_writes);
        assert_eq!(opts.default_storage.compression, Compression::Zstd { level: 7 });
        assert_eq!(opts.default_storage.chunk_frames, 9);
        assert_eq!(opts.auto_compact_bytes, Some(DEFAULT_AUTO_COMPACT_BYTES));
    }
}
