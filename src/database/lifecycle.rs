//! Clip lifecycle: `Absent → InProgress → Finished`.
//!
//! A clip node is committed first and only then receives its finished marker, so a
//! crash in between leaves a node that `has_clip` reports as missing. Re-running
//! `create_clip` with `overwrite` replaces such a node wholesale; there is no partial
//! update path.

use tracing::instrument;

use super::TrackDatabase;
use super::projection::clip_attributes;
use super::session::{FaultPoint, Session, inject};
use super::validate_id;
use crate::constants::FINISHED_ATTR;
use crate::error::{Result, TrackDbError};
use crate::types::{
    Attributes, ClipNode, ClipSeal, ClipSource, ClipState, CreateClipOptions,
};

impl TrackDatabase {
    /// True iff the clip exists and carries the finished marker.
    #[instrument(skip(self), fields(clip.id = %clip_id))]
    pub fn has_clip(&self, clip_id: &str) -> Result<bool> {
        Ok(self.clip_state(clip_id)? == ClipState::Finished)
    }

    #[instrument(skip(self), fields(clip.id = %clip_id))]
    pub fn clip_state(&self, clip_id: &str) -> Result<ClipState> {
        self.read(|session| {
            Ok(match session.toc().clip(clip_id) {
                None => ClipState::Absent,
                Some(clip) if clip.is_finished() => ClipState::Finished,
                Some(_) => ClipState::InProgress,
            })
        })
    }

    /// Create a clip, replacing any existing clip with the same id, and mark it finished.
    pub fn create_clip(&self, clip_id: &str, source: Option<&dyn ClipSource>) -> Result<()> {
        self.create_clip_with(clip_id, source, CreateClipOptions::default())
    }

    /// Create a clip with explicit overwrite and sealing behaviour.
    ///
    /// With `overwrite` unset an existing clip is left untouched. With
    /// [`ClipSeal::Deferred`] the clip stays in progress until [`Self::finish_clip`].
    #[instrument(skip(self, source), fields(clip.id = %clip_id))]
    pub fn create_clip_with(
        &self,
        clip_id: &str,
        source: Option<&dyn ClipSource>,
        options: CreateClipOptions,
    ) -> Result<()> {
        validate_id("clip", clip_id)?;
        let attributes = clip_attributes(source)?;

        self.write(|session| {
            if session.toc().clip(clip_id).is_some() {
                if !options.overwrite {
                    tracing::debug!(clip.id = %clip_id, "clip exists; keeping previous data");
                    return Ok(());
                }
                tracing::info!(clip.id = %clip_id, "overwriting existing clip");
                session.toc_mut()?.remove_clip(clip_id);
            }

            let mut node = ClipNode::new(clip_id);
            node.attributes = attributes;
            node.deferred_seal = options.seal == ClipSeal::Deferred;
            session.toc_mut()?.clips.push(node);
            session.flush()?;

            if options.seal == ClipSeal::OnCreate {
                inject(FaultPoint::BeforeSeal)?;
                mark_finished(session, clip_id)?;
            }
            Ok(())
        })
    }

    /// Seal a clip that was created with [`ClipSeal::Deferred`].
    #[instrument(skip(self), fields(clip.id = %clip_id))]
    pub fn finish_clip(&self, clip_id: &str) -> Result<()> {
        self.write(|session| {
            let clip = session
                .toc_mut()?
                .clip_mut(clip_id)
                .ok_or_else(|| TrackDbError::clip_not_found(clip_id))?;
            clip.deferred_seal = false;
            mark_finished(session, clip_id)
        })
    }

    /// Remove a clip and every track it owns. Returns whether anything was removed.
    #[instrument(skip(self), fields(clip.id = %clip_id))]
    pub fn delete_clip(&self, clip_id: &str) -> Result<bool> {
        self.write(|session| {
            if session.toc().clip(clip_id).is_none() {
                return Ok(false);
            }
            session.toc_mut()?.remove_clip(clip_id);
            tracing::info!(clip.id = %clip_id, "deleted clip");
            Ok(true)
        })
    }

    /// Every clip id, finished or not, in insertion order.
    pub fn list_clips(&self) -> Result<Vec<String>> {
        self.read(|session| {
            Ok(session
                .toc()
                .clips
                .iter()
                .map(|clip| clip.id.clone())
                .collect())
        })
    }

    /// All attributes of a clip node, including the finished marker when set.
    #[instrument(skip(self), fields(clip.id = %clip_id))]
    pub fn get_clip_metadata(&self, clip_id: &str) -> Result<Attributes> {
        self.read(|session| {
            session
                .toc()
                .clip(clip_id)
                .map(|clip| clip.attributes.clone())
                .ok_or_else(|| TrackDbError::clip_not_found(clip_id))
        })
    }
}

/// Set the finished marker on a clip. The caller commits. A clip that already carries
/// the marker leaves the session clean.
pub(crate) fn mark_finished(session: &mut Session, clip_id: &str) -> Result<()> {
    match session.toc().clip(clip_id) {
        None => return Err(TrackDbError::clip_not_found(clip_id)),
        Some(clip) if clip.is_finished() => return Ok(()),
        Some(_) => {}
    }
    let clip = session
        .toc_mut()?
        .clip_mut(clip_id)
        .ok_or_else(|| TrackDbError::clip_not_found(clip_id))?;
    clip.attributes.set(FINISHED_ATTR, true)?;
    tracing::debug!(clip.id = %clip_id, "clip marked finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::session::fault;
    use crate::lock::LocalLock;
    use crate::types::{DatabaseOptions, SourceStats, TrackerSummary};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn database() -> (tempfile::TempDir, TrackDatabase) {
        let dir = tempfile::tempdir().expect("tmp");
        let db = TrackDatabase::open_with(
            dir.path().join("tracks.tdb"),
            DatabaseOptions::default(),
            Arc::new(LocalLock::new()),
        )
        .expect("open");
        (dir, db)
    }

    fn summary() -> TrackerSummary {
        TrackerSummary {
            source_file: "20171101-150843-akaroa03.cptv".into(),
            video_start_time: Utc.with_ymd_and_hms(2017, 11, 1, 15, 8, 43).unwrap(),
            threshold: 50.0,
            stats: SourceStats {
                event: Some("false-positive".into()),
                ..SourceStats::default()
            },
        }
    }

    #[test]
    fn unknown_clip_is_absent() {
        let (_dir, db) = database();
        assert!(!db.has_clip("nope").expect("has"));
        assert_eq!(db.clip_state("nope").expect("state"), ClipState::Absent);
        assert!(db.get_clip_metadata("nope").expect_err("missing").is_not_found());
    }

    #[test]
    fn create_marks_clip_finished() {
        let (_dir, db) = database();
        db.create_clip("c1", Some(&summary() as &dyn ClipSource))
            .expect("create");
        assert!(db.has_clip("c1").expect("has"));
        let meta = db.get_clip_metadata("c1").expect("meta");
        assert_eq!(meta.get_bool(FINISHED_ATTR), Some(true));
        assert_eq!(meta.get_str("event"), Some("false-positive"));
        assert_eq!(meta.get_f64("threshold"), Some(50.0));
    }

    #[test]
    fn keep_existing_when_not_overwriting() {
        let (_dir, db) = database();
        db.create_clip("c1", Some(&summary() as &dyn ClipSource))
            .expect("create");
        db.create_clip_with("c1", None, CreateClipOptions::default().overwrite(false))
            .expect("second create");
        let meta = db.get_clip_metadata("c1").expect("meta");
        assert_eq!(meta.get_str("filename"), Some("20171101-150843-akaroa03.cptv"));
    }

    #[test]
    fn deferred_clip_waits_for_finish() {
        let (_dir, db) = database();
        db.create_clip_with(
            "c1",
            None,
            CreateClipOptions::default().seal(ClipSeal::Deferred),
        )
        .expect("create");
        assert_eq!(db.clip_state("c1").expect("state"), ClipState::InProgress);
        assert!(!db.has_clip("c1").expect("has"));
        db.finish_clip("c1").expect("finish");
        assert!(db.has_clip("c1").expect("has"));
        assert!(db.finish_clip("other").expect_err("missing").is_not_found());
    }

    #[test]
    fn crash_before_seal_leaves_clip_in_progress() {
        let (_dir, db) = database();
        fault::arm(FaultPoint::BeforeSeal);
        assert!(db.create_clip("c1", None).is_err());
        fault::disarm();
        assert_eq!(db.clip_state("c1").expect("state"), ClipState::InProgress);
        assert!(!db.has_clip("c1").expect("has"));

        db.create_clip("c1", None).expect("retry");
        assert!(db.has_clip("c1").expect("has"));
        assert_eq!(db.list_clips().expect("list"), vec!["c1".to_string()]);
    }

    #[test]
    fn delete_removes_clip() {
        let (_dir, db) = database();
        db.create_clip("c1", None).expect("create");
        db.create_clip("c2", None).expect("create");
        assert!(db.delete_clip("c1").expect("delete"));
        assert!(!db.delete_clip("c1").expect("delete again"));
        assert_eq!(db.list_clips().expect("list"), vec!["c2".to_string()]);
    }

    #[test]
    fn invalid_clip_id_is_rejected() {
        let (_dir, db) = database();
        let err = db.create_clip("a/b", None).expect_err("invalid");
        assert!(matches!(err, TrackDbError::InvalidArgument { .. }));
    }
}
