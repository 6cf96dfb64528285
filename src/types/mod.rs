//! Public types exposed by the `trackdb-core` crate.

pub mod attribute;
pub mod manifest;
pub mod options;
pub mod source;
pub mod verification;

pub use attribute::{ArrayData, AttrValue, Attributes, NumericArray};
pub use manifest::{ChunkRef, ClipNode, Header, Toc, TrackDataset};
pub use options::{
    ClipSeal, Compression, CreateClipOptions, DatabaseOptions, FrameSlice, StorageOptions,
};
pub use source::{
    Bounds, ClipSource, SourceStats, TrackRecord, TrackSource, TrackerSummary, iso8601,
};
pub use verification::{
    ClipState, CompactionReport, DatabaseStats, IssueKind, TrackInfo, VerificationIssue,
    VerificationReport, VerificationStatus,
};
