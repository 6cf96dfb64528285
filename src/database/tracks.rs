//! Track datasets: chunked writes and partial-range reads.

use ndarray::{Array3, Array4, ArrayBase, ArrayView4, Axis, Data, Dimension, Ix4, s};
use tracing::instrument;

use super::TrackDatabase;
use super::lifecycle::mark_finished;
use super::projection::track_attributes;
use super::session::{FaultPoint, Session, inject};
use super::validate_id;
use crate::constants::MAX_CHUNK_BYTES;
use crate::error::{Result, TrackDbError};
use crate::io::chunk::{self, EncodedChunk};
use crate::types::{
    Attributes, FrameSlice, StorageOptions, TrackDataset, TrackInfo, TrackSource,
};

impl TrackDatabase {
    /// Store `data` as track `track_id` of an existing clip.
    ///
    /// `data` must be 4-dimensional (frames, channels, height, width). An existing track
    /// with the same id is replaced. A clip still in progress receives its finished
    /// marker in a second commit after the dataset, unless it was created with a
    /// deferred seal.
    #[instrument(skip(self, data, track, storage), fields(clip.id = %clip_id, track.id = %track_id))]
    pub fn add_track<S, D>(
        &self,
        clip_id: &str,
        track_id: &str,
        data: &ArrayBase<S, D>,
        track: Option<&dyn TrackSource>,
        storage: Option<StorageOptions>,
    ) -> Result<()>
    where
        S: Data<Elem = i16>,
        D: Dimension,
    {
        validate_id("track", track_id)?;
        let view: ArrayView4<'_, i16> = data
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|_| TrackDbError::InvalidShape { ndim: data.ndim() })?;
        let mut storage = storage.unwrap_or_else(|| self.options().default_storage);
        if storage.chunk_frames == 0 {
            return Err(TrackDbError::invalid_argument("chunk_frames must be at least 1"));
        }
        let (frames, channels, height, width) = view.dim();
        let fit = chunk::max_chunk_frames(height * width);
        if fit == 0 {
            return Err(TrackDbError::invalid_argument(format!(
                "a {height}x{width} frame exceeds the {MAX_CHUNK_BYTES}-byte chunk limit"
            )));
        }
        if storage.chunk_frames > fit {
            tracing::debug!(
                requested = storage.chunk_frames,
                chunk_frames = fit,
                "shrinking chunks to the size limit"
            );
            storage.chunk_frames = fit;
        }
        let attributes = match track {
            Some(track) => track_attributes(track, frames)?,
            None => Attributes::new(),
        };

        let mut dataset = TrackDataset {
            id: track_id.to_string(),
            shape: [frames, channels, height, width],
            storage,
            chunks: Vec::new(),
            attributes,
        };
        // Compress outside the lock; only the append happens inside the session.
        let encoded = encode_chunks(&dataset, &view)?;

        self.write(|session| {
            if session.toc().clip(clip_id).is_none() {
                return Err(TrackDbError::clip_not_found(clip_id));
            }
            dataset.chunks = encoded
                .iter()
                .map(|chunk| session.append_chunk(chunk))
                .collect::<Result<_>>()?;
            tracing::debug!(
                clip.id = %clip_id,
                track.id = %track_id,
                chunks = dataset.chunks.len(),
                "appended track chunks"
            );

            let clip = session
                .toc_mut()?
                .clip_mut(clip_id)
                .ok_or_else(|| TrackDbError::clip_not_found(clip_id))?;
            let seal = !clip.deferred_seal && !clip.is_finished();
            clip.upsert_track(dataset);
            session.flush()?;

            if seal {
                inject(FaultPoint::BeforeSeal)?;
                mark_finished(session, clip_id)?;
            }
            Ok(())
        })
    }

    /// Frames `slice` of a track as a (frames, channels, height, width) array.
    #[instrument(skip(self), fields(clip.id = %clip_id, track.id = %track_id))]
    pub fn get_track(
        &self,
        clip_id: &str,
        track_id: &str,
        slice: FrameSlice,
    ) -> Result<Array4<i16>> {
        self.read(|session| {
            let dataset = find_track(session, clip_id, track_id)?.clone();
            let frames = slice.resolve(dataset.frames());
            let [_, channels, height, width] = dataset.shape;
            let mut out = Array4::<i16>::zeros((frames.len(), channels, height, width));
            for channel in 0..channels {
                let mut plane = out.index_axis_mut(Axis(1), channel);
                read_channel(session, clip_id, &dataset, channel, &frames, |frame, samples| {
                    fill(plane.index_axis_mut(Axis(0), frame).iter_mut(), samples);
                })?;
            }
            Ok(out)
        })
    }

    /// Frames `slice` of one channel as a (frames, height, width) array. Only that
    /// channel's chunks are read.
    #[instrument(skip(self), fields(clip.id = %clip_id, track.id = %track_id))]
    pub fn get_track_channel(
        &self,
        clip_id: &str,
        track_id: &str,
        channel: usize,
        slice: FrameSlice,
    ) -> Result<Array3<i16>> {
        self.read(|session| {
            let dataset = find_track(session, clip_id, track_id)?.clone();
            if channel >= dataset.channels() {
                return Err(TrackDbError::invalid_argument(format!(
                    "channel {channel} out of range for {} channels",
                    dataset.channels()
                )));
            }
            let frames = slice.resolve(dataset.frames());
            let [_, _, height, width] = dataset.shape;
            let mut out = Array3::<i16>::zeros((frames.len(), height, width));
            read_channel(session, clip_id, &dataset, channel, &frames, |frame, samples| {
                fill(out.index_axis_mut(Axis(0), frame).iter_mut(), samples);
            })?;
            Ok(out)
        })
    }

    #[instrument(skip(self), fields(clip.id = %clip_id, track.id = %track_id))]
    pub fn get_track_metadata(&self, clip_id: &str, track_id: &str) -> Result<Attributes> {
        self.read(|session| Ok(find_track(session, clip_id, track_id)?.attributes.clone()))
    }

    /// Shape and storage layout of a track, read from the catalog only.
    pub fn track_info(&self, clip_id: &str, track_id: &str) -> Result<TrackInfo> {
        self.read(|session| {
            let dataset = find_track(session, clip_id, track_id)?;
            Ok(TrackInfo {
                clip_id: clip_id.to_string(),
                track_id: track_id.to_string(),
                shape: dataset.shape,
                chunk_shape: dataset.chunk_shape(),
                storage: dataset.storage,
                stored_bytes: dataset.chunks.iter().map(|chunk| chunk.stored_len).sum(),
            })
        })
    }

    /// Every `(clip_id, track_id)` pair in insertion order, including tracks of clips
    /// that are not finished yet.
    pub fn list_all_tracks(&self) -> Result<Vec<(String, String)>> {
        self.read(|session| {
            Ok(session
                .toc()
                .clips
                .iter()
                .flat_map(|clip| {
                    clip.tracks
                        .iter()
                        .map(|track| (clip.id.clone(), track.id.clone()))
                })
                .collect())
        })
    }
}

fn find_track<'a>(
    session: &'a Session,
    clip_id: &str,
    track_id: &str,
) -> Result<&'a TrackDataset> {
    session
        .toc()
        .clip(clip_id)
        .ok_or_else(|| TrackDbError::clip_not_found(clip_id))?
        .track(track_id)
        .ok_or_else(|| TrackDbError::track_not_found(clip_id, track_id))
}

/// Encode `view` into chunks ordered by frame block, then channel.
fn encode_chunks(dataset: &TrackDataset, view: &ArrayView4<'_, i16>) -> Result<Vec<EncodedChunk>> {
    let mut chunks = Vec::with_capacity(dataset.expected_chunks());
    for block in 0..dataset.frame_blocks() {
        let frames = dataset.block_frames(block);
        for channel in 0..dataset.channels() {
            let samples: Vec<i16> = view
                .slice(s![frames.clone(), channel, .., ..])
                .iter()
                .copied()
                .collect();
            chunks.push(chunk::encode(&samples, &dataset.storage)?);
        }
    }
    Ok(chunks)
}

/// Decode the chunks of `channel` that overlap `frames` and hand every requested frame
/// to `sink` as `(index relative to frames.start, samples)`.
fn read_channel(
    session: &mut Session,
    clip_id: &str,
    dataset: &TrackDataset,
    channel: usize,
    frames: &std::ops::Range<usize>,
    mut sink: impl FnMut(usize, &[i16]),
) -> Result<()> {
    if frames.is_empty() {
        return Ok(());
    }
    let step = dataset.storage.chunk_frames.max(1);
    let plane = dataset.plane_len();
    for block in frames.start / step..=(frames.end - 1) / step {
        let samples = load_chunk(session, clip_id, dataset, dataset.chunk_index(block, channel))?;
        let block_frames = dataset.block_frames(block);
        let first = block_frames.start.max(frames.start);
        let last = block_frames.end.min(frames.end);
        for frame in first..last {
            let at = (frame - block_frames.start) * plane;
            sink(frame - frames.start, &samples[at..at + plane]);
        }
    }
    Ok(())
}

/// Read, verify and decode one chunk.
fn load_chunk(
    session: &mut Session,
    clip_id: &str,
    dataset: &TrackDataset,
    index: usize,
) -> Result<Vec<i16>> {
    let corruption = |reason: String| TrackDbError::ChunkCorruption {
        clip_id: clip_id.to_string(),
        track_id: dataset.id.clone(),
        index,
        reason,
    };
    let chunk_ref = dataset
        .chunks
        .get(index)
        .ok_or_else(|| corruption(format!("catalog lists {} chunks", dataset.chunks.len())))?;
    let bytes = session.read_chunk(chunk_ref)?;
    if !chunk::checksum_matches(&bytes, &chunk_ref.checksum) {
        return Err(corruption("checksum mismatch".into()));
    }
    let samples = chunk::decode(&bytes, chunk_ref.raw_len, &dataset.storage)
        .map_err(|err| corruption(err.to_string()))?;

    let block = index / dataset.channels().max(1);
    let expected = dataset.block_frames(block).len() * dataset.plane_len();
    if samples.len() != expected {
        return Err(corruption(format!(
            "decoded {} samples, expected {expected}",
            samples.len()
        )));
    }
    Ok(samples)
}

fn fill<'a>(dst: impl Iterator<Item = &'a mut i16>, src: &[i16]) {
    for (out, sample) in dst.zip(src) {
        *out = *sample;
    }
}
