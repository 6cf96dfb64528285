//! Chunk codec: little-endian `i16` samples → optional byte shuffle → compression.

use std::io::Cursor;

use crate::constants::MAX_CHUNK_BYTES;
use crate::error::{Result, TrackDbError};
use crate::types::{Compression, StorageOptions};

const SAMPLE_BYTES: usize = std::mem::size_of::<i16>();

/// An encoded chunk ready to be appended to the data region.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub bytes: Vec<u8>,
    pub raw_len: u64,
    pub checksum: [u8; 32],
}

/// Most frames of `plane_len` samples that fit in one chunk; 0 when a single frame is
/// already over the limit.
#[must_use]
pub fn max_chunk_frames(plane_len: usize) -> usize {
    let frame_bytes = (plane_len * SAMPLE_BYTES) as u64;
    if frame_bytes == 0 {
        return usize::MAX;
    }
    usize::try_from(MAX_CHUNK_BYTES / frame_bytes).unwrap_or(usize::MAX)
}

pub fn encode(samples: &[i16], storage: &StorageOptions) -> Result<EncodedChunk> {
    if (samples.len() * SAMPLE_BYTES) as u64 > MAX_CHUNK_BYTES {
        return Err(TrackDbError::invalid_argument(format!(
            "chunk of {} samples exceeds the {MAX_CHUNK_BYTES}-byte chunk limit",
            samples.len()
        )));
    }
    let mut raw = Vec::with_capacity(samples.len() * SAMPLE_BYTES);
    for sample in samples {
        raw.extend_from_slice(&sample.to_le_bytes());
    }
    if storage.shuffle {
        raw = shuffle(&raw);
    }
    let raw_len = raw.len() as u64;
    let bytes = match storage.compression {
        Compression::None => raw,
        Compression::Lz4 => lz4_flex::block::compress(&raw),
        Compression::Zstd { level } => zstd::encode_all(Cursor::new(raw), level)
            .map_err(|err| TrackDbError::Compression(err.to_string()))?,
    };
    let checksum = *blake3::hash(&bytes).as_bytes();
    Ok(EncodedChunk {
        bytes,
        raw_len,
        checksum,
    })
}

pub fn decode(bytes: &[u8], raw_len: u64, storage: &StorageOptions) -> Result<Vec<i16>> {
    if raw_len > MAX_CHUNK_BYTES || raw_len % SAMPLE_BYTES as u64 != 0 {
        return Err(TrackDbError::Compression(format!(
            "implausible decoded chunk length {raw_len}"
        )));
    }
    // Safe: bounded by MAX_CHUNK_BYTES above
    #[allow(clippy::cast_possible_truncation)]
    let raw_len = raw_len as usize;
    let mut raw = match storage.compression {
        Compression::None => bytes.to_vec(),
        Compression::Lz4 => lz4_flex::block::decompress(bytes, raw_len)
            .map_err(|err| TrackDbError::Compression(err.to_string()))?,
        Compression::Zstd { .. } => zstd::decode_all(Cursor::new(bytes))
            .map_err(|err| TrackDbError::Compression(err.to_string()))?,
    };
    if raw.len() != raw_len {
        return Err(TrackDbError::Compression(format!(
            "decoded {} bytes, expected {raw_len}",
            raw.len()
        )));
    }
    if storage.shuffle {
        raw = unshuffle(&raw);
    }
    Ok(raw
        .chunks_exact(SAMPLE_BYTES)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

#[must_use]
pub fn checksum_matches(bytes: &[u8], expected: &[u8; 32]) -> bool {
    blake3::hash(bytes).as_bytes() == expected
}

/// Group byte 0 of every sample, then byte 1.
fn shuffle(raw: &[u8]) -> Vec<u8> {
    let count = raw.len() / SAMPLE_BYTES;
    let mut out = vec![0u8; raw.len()];
    for (index, sample) in raw.chunks_exact(SAMPLE_BYTES).enumerate() {
        for (lane, byte) in sample.iter().enumerate() {
            out[lane * count + index] = *byte;
        }
    }
    out
}

fn unshuffle(shuffled: &[u8]) -> Vec<u8> {
    let count = shuffled.len() / SAMPLE_BYTES;
    let mut out = vec![0u8; shuffled.len()];
    for index in 0..count {
        for lane in 0..SAMPLE_BYTES {
            out[index * SAMPLE_BYTES + lane] = shuffled[lane * count + index];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<i16> {
        (0..900).map(|i| ((i * 37) % 4000 - 2000) as i16).collect()
    }

    #[test]
    fn every_codec_restores_samples() {
        let input = samples();
        for storage in [
            StorageOptions::uncompressed(),
            StorageOptions::default(),
            StorageOptions::default().compression(Compression::zstd()),
            StorageOptions::default().shuffle(true),
            StorageOptions::uncompressed().shuffle(true),
        ] {
            let chunk = encode(&input, &storage).expect("encode");
            assert_eq!(chunk.raw_len, 1800);
            assert!(checksum_matches(&chunk.bytes, &chunk.checksum));
            let output = decode(&chunk.bytes, chunk.raw_len, &storage).expect("decode");
            assert_eq!(output, input, "storage {storage:?}");
        }
    }

    #[test]
    fn chunk_frames_are_capped_by_frame_size() {
        assert_eq!(max_chunk_frames(2048 * 2048), 8);
        assert_eq!(max_chunk_frames(4096 * 8192), 1);
        assert_eq!(max_chunk_frames(4097 * 8192), 0);
        assert_eq!(max_chunk_frames(0), usize::MAX);
    }

    #[test]
    fn shuffle_groups_low_bytes_first() {
        let raw = [0x01, 0xA1, 0x02, 0xA2, 0x03, 0xA3];
        assert_eq!(shuffle(&raw), vec![0x01, 0x02, 0x03, 0xA1, 0xA2, 0xA3]);
        assert_eq!(unshuffle(&shuffle(&raw)), raw.to_vec());
    }

    #[test]
    fn truncated_lz4_chunk_is_rejected() {
        let storage = StorageOptions::default();
        let chunk = encode(&samples(), &storage).expect("encode");
        let cut = &chunk.bytes[..chunk.bytes.len() / 2];
        assert!(decode(cut, chunk.raw_len, &storage).is_err());
    }
}
