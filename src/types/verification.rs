//! Reports returned by the inspection and maintenance operations.

use serde::{Deserialize, Serialize};

use super::options::StorageOptions;
use crate::constants::HEADER_SIZE;

/// Lifecycle state of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipState {
    Absent,
    /// The node exists but has no finished marker; queries treat it as missing.
    InProgress,
    Finished,
}

/// Dataset description read from the catalog without touching the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub clip_id: String,
    pub track_id: String,
    pub shape: [usize; 4],
    pub chunk_shape: [usize; 4],
    pub storage: StorageOptions,
    pub stored_bytes: u64,
}

impl TrackInfo {
    #[must_use]
    pub fn frames(&self) -> usize {
        self.shape[0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub generation: u64,
    pub clips: usize,
    pub finished_clips: usize,
    pub tracks: usize,
    pub chunks: usize,
    /// Bytes referenced by the current catalog.
    pub live_bytes: u64,
    /// Size of the newest committed TOC and footer.
    pub catalog_bytes: u64,
    pub file_bytes: u64,
}

impl DatabaseStats {
    /// Bytes held by superseded catalogs and dropped chunks; `compact` reclaims them.
    #[must_use]
    pub fn garbage_bytes(&self) -> u64 {
        self.file_bytes
            .saturating_sub(HEADER_SIZE as u64 + self.live_bytes + self.catalog_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    ChunkChecksum,
    ChunkSize,
    ChunkCount,
    HistoryLength,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationIssue {
    pub clip_id: String,
    pub track_id: String,
    pub kind: IssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Passed,
    /// Data is intact but some clips still need `create_clip`/`add_track` to be re-run.
    NeedsRepair,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub status: VerificationStatus,
    pub generation: u64,
    pub clips_checked: usize,
    pub tracks_checked: usize,
    pub chunks_checked: usize,
    pub unfinished_clips: Vec<String>,
    pub issues: Vec<VerificationIssue>,
}

impl VerificationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.status == VerificationStatus::Passed
    }
}

/// Outcome of [`crate::TrackDatabase::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub chunks_copied: usize,
}

impl CompactionReport {
    #[must_use]
    pub fn reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}
