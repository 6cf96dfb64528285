//! Serialized catalog structures: header, table of contents, clip nodes and datasets.

use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::{Deserialize, Serialize};

use super::attribute::Attributes;
use super::options::StorageOptions;
use crate::constants::FINISHED_ATTR;
use crate::error::{Result, TrackDbError};

/// Fixed-size file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u16,
    /// Unix seconds at creation.
    pub created_at: i64,
}

/// Table of contents written at every commit.
///
/// `clips` is the single top-level collection. Clips and tracks keep insertion order so
/// that enumeration is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Toc {
    pub generation: u64,
    pub clips: Vec<ClipNode>,
}

impl Toc {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(encode_to_vec(self, crate::catalog_config())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (toc, read): (Self, usize) = decode_from_slice(bytes, crate::catalog_config())?;
        if read != bytes.len() {
            return Err(TrackDbError::InvalidToc {
                reason: format!("{} trailing bytes after catalog", bytes.len() - read),
            });
        }
        Ok(toc)
    }

    #[must_use]
    pub fn clip(&self, clip_id: &str) -> Option<&ClipNode> {
        self.clips.iter().find(|clip| clip.id == clip_id)
    }

    pub fn clip_mut(&mut self, clip_id: &str) -> Option<&mut ClipNode> {
        self.clips.iter_mut().find(|clip| clip.id == clip_id)
    }

    /// Detach a clip together with every dataset it owns.
    pub fn remove_clip(&mut self, clip_id: &str) -> Option<ClipNode> {
        let position = self.clips.iter().position(|clip| clip.id == clip_id)?;
        Some(self.clips.remove(position))
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.clips.iter().map(|clip| clip.tracks.len()).sum()
    }

    /// Stored bytes of every chunk the catalog references.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.clips
            .iter()
            .flat_map(|clip| clip.tracks.iter())
            .flat_map(|dataset| dataset.chunks.iter())
            .map(|chunk| chunk.stored_len)
            .sum()
    }
}

/// `clips/<clip_id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipNode {
    pub id: String,
    pub attributes: Attributes,
    pub tracks: Vec<TrackDataset>,
    /// Set for clips created with `ClipSeal::Deferred`; `add_track` then leaves the
    /// finished marker alone until `finish_clip`.
    pub deferred_seal: bool,
}

impl ClipNode {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
            tracks: Vec::new(),
            deferred_seal: false,
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.attributes.get_bool(FINISHED_ATTR) == Some(true)
    }

    #[must_use]
    pub fn track(&self, track_id: &str) -> Option<&TrackDataset> {
        self.tracks.iter().find(|track| track.id == track_id)
    }

    /// Insert a dataset, replacing any dataset with the same id in place.
    pub fn upsert_track(&mut self, dataset: TrackDataset) {
        match self.tracks.iter_mut().find(|track| track.id == dataset.id) {
            Some(slot) => *slot = dataset,
            None => self.tracks.push(dataset),
        }
    }
}

/// `clips/<clip_id>/<track_id>`: a chunked `i16` array of shape (frames, channels, height, width).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDataset {
    pub id: String,
    pub shape: [usize; 4],
    pub storage: StorageOptions,
    /// Chunks ordered by frame block, then channel.
    pub chunks: Vec<ChunkRef>,
    pub attributes: Attributes,
}

impl TrackDataset {
    #[must_use]
    pub fn frames(&self) -> usize {
        self.shape[0]
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.shape[1]
    }

    /// Elements in one frame of one channel.
    #[must_use]
    pub fn plane_len(&self) -> usize {
        self.shape[2] * self.shape[3]
    }

    #[must_use]
    pub fn chunk_shape(&self) -> [usize; 4] {
        [
            self.storage.chunk_frames.min(self.frames()).max(1),
            1,
            self.shape[2],
            self.shape[3],
        ]
    }

    /// Number of frame blocks along the frame axis.
    #[must_use]
    pub fn frame_blocks(&self) -> usize {
        self.frames().div_ceil(self.storage.chunk_frames.max(1))
    }

    /// Frames covered by `block`.
    #[must_use]
    pub fn block_frames(&self, block: usize) -> std::ops::Range<usize> {
        let step = self.storage.chunk_frames.max(1);
        let start = block * step;
        start..(start + step).min(self.frames())
    }

    #[must_use]
    pub fn chunk_index(&self, block: usize, channel: usize) -> usize {
        block * self.channels() + channel
    }

    #[must_use]
    pub fn expected_chunks(&self) -> usize {
        self.frame_blocks() * self.channels()
    }
}

/// Location and checksum of one encoded chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub offset: u64,
    pub stored_len: u64,
    pub raw_len: u64,
    pub checksum: [u8; 32],
}
