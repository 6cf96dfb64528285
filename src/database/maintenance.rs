//! Integrity checks, compaction and statistics.

use std::io::{Seek, SeekFrom, Write};

use atomic_write_file::AtomicWriteFile;
use tracing::instrument;

use super::TrackDatabase;
use super::projection::history_lengths;
use super::session::{Session, SessionMode, commit_tail};
use crate::constants::{BOUNDS_HISTORY_ATTR, HEADER_SIZE, MASS_HISTORY_ATTR};
use crate::error::{Result, TrackDbError};
use crate::io::chunk;
use crate::io::header::HeaderCodec;
use crate::types::{
    CompactionReport, DatabaseStats, IssueKind, TrackDataset, VerificationIssue,
    VerificationReport, VerificationStatus,
};

impl TrackDatabase {
    /// Re-read every chunk of every track and check it against the catalog.
    ///
    /// Corruption is reported, not raised; only I/O failures on the catalog itself
    /// return an error. Clips without a finished marker are listed for repair.
    #[instrument(skip(self))]
    pub fn verify(&self) -> Result<VerificationReport> {
        self.read(|session| {
            let toc = session.toc().clone();
            let mut report = VerificationReport {
                status: VerificationStatus::Passed,
                generation: toc.generation,
                clips_checked: 0,
                tracks_checked: 0,
                chunks_checked: 0,
                unfinished_clips: Vec::new(),
                issues: Vec::new(),
            };

            for clip in &toc.clips {
                report.clips_checked += 1;
                if !clip.is_finished() {
                    report.unfinished_clips.push(clip.id.clone());
                }
                for dataset in &clip.tracks {
                    report.tracks_checked += 1;
                    let mut issue = |kind: IssueKind, detail: String| {
                        report.issues.push(VerificationIssue {
                            clip_id: clip.id.clone(),
                            track_id: dataset.id.clone(),
                            kind,
                            detail,
                        });
                    };

                    if dataset.chunks.len() != dataset.expected_chunks() {
                        issue(
                            IssueKind::ChunkCount,
                            format!(
                                "{} chunks stored, {} expected",
                                dataset.chunks.len(),
                                dataset.expected_chunks()
                            ),
                        );
                    }
                    let (mass, bounds) = history_lengths(&dataset.attributes);
                    for (name, len) in [(MASS_HISTORY_ATTR, mass), (BOUNDS_HISTORY_ATTR, bounds)] {
                        if let Some(len) = len.filter(|len| *len != dataset.frames()) {
                            issue(
                                IssueKind::HistoryLength,
                                format!("{name} has {len} entries for {} frames", dataset.frames()),
                            );
                        }
                    }
                    for index in 0..dataset.chunks.len() {
                        report.chunks_checked += 1;
                        if let Some((kind, detail)) = check_chunk(session, dataset, index)? {
                            issue(kind, format!("chunk {index}: {detail}"));
                        }
                    }
                }
            }

            report.status = if !report.issues.is_empty() {
                VerificationStatus::Failed
            } else if !report.unfinished_clips.is_empty() {
                VerificationStatus::NeedsRepair
            } else {
                VerificationStatus::Passed
            };
            tracing::info!(
                status = ?report.status,
                clips = report.clips_checked,
                chunks = report.chunks_checked,
                issues = report.issues.len(),
                "verification finished"
            );
            Ok(report)
        })
    }

    /// Rewrite the file with only the data referenced by the current catalog and swap it
    /// in atomically. Superseded catalogs and replaced or deleted tracks are dropped.
    #[instrument(skip(self))]
    pub fn compact(&self) -> Result<CompactionReport> {
        rewrite_live(self.session(SessionMode::Write)?)
    }

    /// Catalog counts and sizes.
    pub fn stats(&self) -> Result<DatabaseStats> {
        self.read(|session| {
            let toc = session.toc();
            let datasets = || toc.clips.iter().flat_map(|clip| clip.tracks.iter());
            Ok(DatabaseStats {
                generation: toc.generation,
                clips: toc.clips.len(),
                finished_clips: toc.clips.iter().filter(|clip| clip.is_finished()).count(),
                tracks: toc.track_count(),
                chunks: datasets().map(|dataset| dataset.chunks.len()).sum(),
                live_bytes: toc.live_bytes(),
                catalog_bytes: session.catalog_len(),
                file_bytes: session.file_len()?,
            })
        })
    }
}

/// Copy the live chunks of `session`'s catalog into a fresh file that replaces the
/// database when complete. Consumes the session: its file handle is stale afterwards.
pub(crate) fn rewrite_live(mut session: Session) -> Result<CompactionReport> {
    let bytes_before = session.file_len()?;
    let header = session.header()?;
    let mut toc = session.toc().clone();

    let mut options = AtomicWriteFile::options();
    options.read(true);
    let mut atomic = options.open(session.path())?;
    let writer = atomic.as_file_mut();
    writer.set_len(0)?;
    HeaderCodec::write(writer, &header)?;
    writer.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

    let mut cursor = HEADER_SIZE as u64;
    let mut chunks_copied = 0usize;
    for clip in &mut toc.clips {
        for dataset in &mut clip.tracks {
            for (index, chunk_ref) in dataset.chunks.iter_mut().enumerate() {
                let bytes = session.read_chunk(chunk_ref)?;
                if !chunk::checksum_matches(&bytes, &chunk_ref.checksum) {
                    return Err(TrackDbError::ChunkCorruption {
                        clip_id: clip.id.clone(),
                        track_id: dataset.id.clone(),
                        index,
                        reason: "checksum mismatch; refusing to compact".into(),
                    });
                }
                writer.write_all(&bytes)?;
                chunk_ref.offset = cursor;
                cursor += bytes.len() as u64;
                chunks_copied += 1;
            }
        }
    }

    toc.generation += 1;
    let tail = commit_tail(&toc)?;
    writer.write_all(&tail)?;
    writer.flush()?;
    writer.sync_all()?;
    let bytes_after = cursor + tail.len() as u64;
    atomic.commit()?;
    let path = session.path().to_path_buf();
    drop(session);

    let report = CompactionReport {
        bytes_before,
        bytes_after,
        chunks_copied,
    };
    tracing::info!(
        path = %path.display(),
        commit.generation = toc.generation,
        bytes.before = report.bytes_before,
        bytes.after = report.bytes_after,
        "compacted database"
    );
    Ok(report)
}

/// Check one chunk: readable, checksum, decoded size.
fn check_chunk(
    session: &mut Session,
    dataset: &TrackDataset,
    index: usize,
) -> Result<Option<(IssueKind, String)>> {
    let chunk_ref = &dataset.chunks[index];
    let bytes = match session.read_chunk(chunk_ref) {
        Ok(bytes) => bytes,
        Err(TrackDbError::InvalidToc { reason }) => return Ok(Some((IssueKind::ChunkSize, reason))),
        Err(TrackDbError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(Some((IssueKind::ChunkSize, "truncated".into())));
        }
        Err(err) => return Err(err),
    };
    if !chunk::checksum_matches(&bytes, &chunk_ref.checksum) {
        return Ok(Some((IssueKind::ChunkChecksum, "checksum mismatch".into())));
    }
    let samples = match chunk::decode(&bytes, chunk_ref.raw_len, &dataset.storage) {
        Ok(samples) => samples,
        Err(err) => return Ok(Some((IssueKind::ChunkSize, err.to_string()))),
    };
    let block = index / dataset.channels().max(1);
    let expected = dataset.block_frames(block).len() * dataset.plane_len();
    if samples.len() != expected {
        return Ok(Some((
            IssueKind::ChunkSize,
            format!("decoded {} samples, expected {expected}", samples.len()),
        )));
    }
    Ok(None)
}
