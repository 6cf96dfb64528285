//! On-disk format constants shared by the header, chunk and footer codecs.

/// Magic bytes at the start of every track database file.
pub const MAGIC: [u8; 4] = *b"TDB1";

/// Current container format version.
pub const FORMAT_VERSION: u16 = 0x0103;

/// Fixed size of the file header; chunk data starts right after it.
pub const HEADER_SIZE: usize = 64;

/// Magic bytes that open every commit footer.
pub const FOOTER_MAGIC: [u8; 8] = *b"TDBFOOT\0";

/// `[magic: 8][toc_len: u64][toc_hash: 32][generation: u64]`
pub const FOOTER_SIZE: usize = 56;

/// Frames per chunk. Nine frames is about one second of thermal video.
pub const DEFAULT_CHUNK_FRAMES: usize = 9;

/// Default zstd level when zstd is selected without an explicit level.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Upper bound on a serialized TOC; anything larger is treated as corruption.
pub const MAX_TOC_BYTES: u64 = 256 * 1024 * 1024;

/// Upper bound on a single decoded chunk.
pub const MAX_CHUNK_BYTES: u64 = 64 * 1024 * 1024;

/// Default garbage floor before a write session compacts the file.
pub const DEFAULT_AUTO_COMPACT_BYTES: u64 = 16 * 1024 * 1024;

/// Clip attribute holding the finished marker.
pub const FINISHED_ATTR: &str = "finished";

/// Track attribute holding per-frame mass.
pub const MASS_HISTORY_ATTR: &str = "mass_history";

/// Track attribute holding per-frame bounding boxes.
pub const BOUNDS_HISTORY_ATTR: &str = "bounds_history";
