//! Interfaces of the tracker and track objects that feed the database.
//!
//! The tracking pipeline itself lives outside this crate. It only has to expose the
//! handful of fields below; [`TrackerSummary`] and [`TrackRecord`] are plain
//! implementations for callers that do not want to implement the traits themselves.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::attribute::Attributes;

/// Optional per-clip statistics gathered by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub confidence: Option<f64>,
    pub trap: Option<String>,
    pub event: Option<String>,
    pub average_background_delta: Option<f64>,
    pub mean_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub min_temp: Option<f64>,
}

/// What `create_clip` needs to know about the recording a clip came from.
pub trait ClipSource {
    fn source_file(&self) -> &str;
    fn video_start_time(&self) -> DateTime<Utc>;
    fn threshold(&self) -> f64;
    fn stats(&self) -> &SourceStats;
}

/// Owned [`ClipSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSummary {
    pub source_file: String,
    pub video_start_time: DateTime<Utc>,
    pub threshold: f64,
    #[serde(default)]
    pub stats: SourceStats,
}

impl ClipSource for TrackerSummary {
    fn source_file(&self) -> &str {
        &self.source_file
    }

    fn video_start_time(&self) -> DateTime<Utc> {
        self.video_start_time
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn stats(&self) -> &SourceStats {
        &self.stats
    }
}

/// Tracked region in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    /// Pixel mass (or intensity sum) of the region.
    pub mass: i64,
}

impl Bounds {
    #[must_use]
    pub fn new(left: i32, top: i32, right: i32, bottom: i32, mass: i64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
            mass,
        }
    }
}

/// What `add_track` needs to know about the track an array was cut from.
pub trait TrackSource {
    fn id(&self) -> String;
    fn tag(&self) -> &str;
    fn start_time(&self) -> DateTime<Utc>;
    fn end_time(&self) -> DateTime<Utc>;
    /// Named summary statistics, copied verbatim into the track's attributes.
    fn stats(&self) -> Attributes;
    /// One entry per frame of the stored array.
    fn bounds_history(&self) -> &[Bounds];
}

/// Owned [`TrackSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    pub tag: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub stats: Attributes,
    #[serde(default)]
    pub bounds_history: Vec<Bounds>,
}

impl TrackSource for TrackRecord {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    fn stats(&self) -> Attributes {
        self.stats.clone()
    }

    fn bounds_history(&self) -> &[Bounds] {
        &self.bounds_history
    }
}

/// ISO-8601 rendering used for every persisted timestamp.
#[must_use]
pub fn iso8601(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}
