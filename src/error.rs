use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TrackDbError>;

#[derive(Debug, Error)]
pub enum TrackDbError {
    #[error("clip '{clip_id}' not found")]
    ClipNotFound { clip_id: String },

    #[error("track '{track_id}' not found in clip '{clip_id}'")]
    TrackNotFound { clip_id: String, track_id: String },

    #[error("track arrays must have 4 dimensions (frames, channels, height, width), got {ndim}")]
    InvalidShape { ndim: usize },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("invalid attribute '{name}': {reason}")]
    InvalidAttribute { name: String, reason: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid table of contents: {reason}")]
    InvalidToc { reason: String },

    #[error("no valid commit found in {path}")]
    NoValidCommit { path: PathBuf },

    #[error("chunk {index} of {clip_id}/{track_id} is corrupt: {reason}")]
    ChunkCorruption {
        clip_id: String,
        track_id: String,
        index: usize,
        reason: String,
    },

    #[error("compression error: {0}")]
    Compression(String),

    #[error("database modified by another writer (expected revision {expected}, found {found})")]
    ConcurrencyConflict { expected: u64, found: u64 },

    #[error("lock error: {0}")]
    Lock(String),

    #[error("session is read-only")]
    ReadOnly,

    #[error("failed to encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackDbError {
    pub(crate) fn clip_not_found(clip_id: &str) -> Self {
        Self::ClipNotFound {
            clip_id: clip_id.to_string(),
        }
    }

    pub(crate) fn track_not_found(clip_id: &str, track_id: &str) -> Self {
        Self::TrackNotFound {
            clip_id: clip_id.to_string(),
            track_id: track_id.to_string(),
        }
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// True for the not-found family (`ClipNotFound`, `TrackNotFound`).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ClipNotFound { .. } | Self::TrackNotFound { .. })
    }

    /// True when the error came from the storage medium or a corrupt file.
    #[must_use]
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::InvalidHeader { .. }
                | Self::InvalidToc { .. }
                | Self::NoValidCommit { .. }
                | Self::ChunkCorruption { .. }
                | Self::Decode(_)
        )
    }
}
