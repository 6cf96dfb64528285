//! Flattening of tracker and track records into persisted attributes.

use crate::constants::{BOUNDS_HISTORY_ATTR, MASS_HISTORY_ATTR};
use crate::error::{Result, TrackDbError};
use crate::types::{ArrayData, Attributes, ClipSource, NumericArray, TrackSource, iso8601};

/// Track attribute names owned by the projection; statistics may not reuse them.
pub const RESERVED_TRACK_ATTRS: [&str; 6] = [
    "id",
    "tag",
    "start_time",
    "end_time",
    MASS_HISTORY_ATTR,
    BOUNDS_HISTORY_ATTR,
];

/// Clip summary attributes. Optional statistics default to `0` / `""`, never to a
/// missing value; source fields are only written when a source is given.
pub fn clip_attributes(source: Option<&dyn ClipSource>) -> Result<Attributes> {
    let mut attrs = Attributes::new();
    let stats = source
        .map(|source| source.stats().clone())
        .unwrap_or_default();

    if let Some(source) = source {
        attrs.set("filename", source.source_file())?;
        attrs.set("start_time", iso8601(source.video_start_time()))?;
        attrs.set("threshold", source.threshold())?;
    }
    attrs.set("confidence", stats.confidence.unwrap_or(0.0))?;
    attrs.set("trap", stats.trap.unwrap_or_default())?;
    attrs.set("event", stats.event.unwrap_or_default())?;
    attrs.set(
        "average_background_delta",
        stats.average_background_delta.unwrap_or(0.0),
    )?;
    attrs.set("mean_temp", stats.mean_temp.unwrap_or(0.0))?;
    attrs.set("max_temp", stats.max_temp.unwrap_or(0.0))?;
    attrs.set("min_temp", stats.min_temp.unwrap_or(0.0))?;
    Ok(attrs)
}

/// Track attributes for an array of `frames` frames: identity and timing, every named
/// statistic, and the per-frame mass and bounds histories.
pub fn track_attributes(track: &dyn TrackSource, frames: usize) -> Result<Attributes> {
    let history = track.bounds_history();
    if history.len() != frames {
        return Err(TrackDbError::invalid_argument(format!(
            "track {} has {} bounds for {frames} frames",
            track.id(),
            history.len()
        )));
    }

    let mut attrs = Attributes::new();
    attrs.set("id", track.id())?;
    attrs.set("tag", track.tag())?;
    attrs.set("start_time", iso8601(track.start_time()))?;
    attrs.set("end_time", iso8601(track.end_time()))?;

    for (name, value) in &track.stats() {
        if RESERVED_TRACK_ATTRS.contains(&name.as_str()) {
            return Err(TrackDbError::InvalidAttribute {
                name: name.clone(),
                reason: format!("reserved for track metadata ({} given)", value.describe()),
            });
        }
        attrs.set(name.clone(), value.clone())?;
    }

    let mut mass = Vec::with_capacity(frames);
    let mut bounds = Vec::with_capacity(frames);
    for (frame, entry) in history.iter().enumerate() {
        mass.push(narrow::<i32>(entry.mass, MASS_HISTORY_ATTR, frame)?);
        bounds.push([
            narrow::<i16>(i64::from(entry.left), BOUNDS_HISTORY_ATTR, frame)?,
            narrow::<i16>(i64::from(entry.top), BOUNDS_HISTORY_ATTR, frame)?,
            narrow::<i16>(i64::from(entry.right), BOUNDS_HISTORY_ATTR, frame)?,
            narrow::<i16>(i64::from(entry.bottom), BOUNDS_HISTORY_ATTR, frame)?,
        ]);
    }
    attrs.set(
        MASS_HISTORY_ATTR,
        NumericArray::vector(ArrayData::I32(mass)),
    )?;
    attrs.set(BOUNDS_HISTORY_ATTR, NumericArray::rows_i16(&bounds))?;
    Ok(attrs)
}

/// Frame counts recorded by the two history attributes, if present.
#[must_use]
pub fn history_lengths(attrs: &Attributes) -> (Option<usize>, Option<usize>) {
    (
        attrs.get_array(MASS_HISTORY_ATTR).map(NumericArray::len),
        attrs.get_array(BOUNDS_HISTORY_ATTR).map(NumericArray::len),
    )
}

fn narrow<T: TryFrom<i64>>(value: i64, name: &str, frame: usize) -> Result<T> {
    T::try_from(value).map_err(|_| TrackDbError::InvalidAttribute {
        name: name.to_string(),
        reason: format!(
            "value {value} at frame {frame} does not fit {}",
            std::any::type_name::<T>()
        ),
    })
}
