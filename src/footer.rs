//! Commit footers and tail recovery.
//!
//! Every commit appends `[TOC][footer]`. The last footer whose TOC hash verifies marks the
//! committed state; torn or half-written commits after it are ignored.

use crate::constants::{FOOTER_MAGIC, FOOTER_SIZE, HEADER_SIZE, MAX_TOC_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitFooter {
    pub toc_len: u64,
    pub toc_hash: [u8; 32],
    pub generation: u64,
}

impl CommitFooter {
    #[must_use]
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut bytes = [0u8; FOOTER_SIZE];
        bytes[..8].copy_from_slice(&FOOTER_MAGIC);
        bytes[8..16].copy_from_slice(&self.toc_len.to_le_bytes());
        bytes[16..48].copy_from_slice(&self.toc_hash);
        bytes[48..56].copy_from_slice(&self.generation.to_le_bytes());
        bytes
    }

    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != FOOTER_SIZE || bytes[..8] != FOOTER_MAGIC {
            return None;
        }
        let toc_len = u64::from_le_bytes(bytes[8..16].try_into().ok()?);
        let mut toc_hash = [0u8; 32];
        toc_hash.copy_from_slice(&bytes[16..48]);
        let generation = u64::from_le_bytes(bytes[48..56].try_into().ok()?);
        Some(Self {
            toc_len,
            toc_hash,
            generation,
        })
    }
}

/// A verified footer and the TOC bytes it covers.
#[derive(Debug, Clone, Copy)]
pub struct FooterSlice<'a> {
    pub footer: CommitFooter,
    pub toc_offset: u64,
    pub toc_bytes: &'a [u8],
    /// Offset one past the footer: the end of committed data.
    pub end: u64,
}

/// Check for a valid footer ending exactly at `end`.
#[must_use]
pub fn footer_ending_at(bytes: &[u8], end: usize) -> Option<FooterSlice<'_>> {
    if end > bytes.len() || end < HEADER_SIZE + FOOTER_SIZE {
        return None;
    }
    let footer_start = end - FOOTER_SIZE;
    let footer = CommitFooter::decode(&bytes[footer_start..end])?;
    if footer.toc_len == 0 || footer.toc_len > MAX_TOC_BYTES {
        return None;
    }
    let toc_len = usize::try_from(footer.toc_len).ok()?;
    let toc_start = footer_start.checked_sub(toc_len)?;
    if toc_start < HEADER_SIZE {
        return None;
    }
    let toc_bytes = &bytes[toc_start..footer_start];
    if blake3::hash(toc_bytes).as_bytes() != &footer.toc_hash {
        return None;
    }
    Some(FooterSlice {
        footer,
        toc_offset: toc_start as u64,
        toc_bytes,
        end: end as u64,
    })
}

/// Find the newest valid commit, checking the tail first and then scanning backwards.
#[must_use]
pub fn find_last_valid_footer(bytes: &[u8]) -> Option<FooterSlice<'_>> {
    if let Some(slice) = footer_ending_at(bytes, bytes.len()) {
        return Some(slice);
    }
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return None;
    }
    let mut cursor = bytes.len() - FOOTER_SIZE;
    loop {
        let window = &bytes[HEADER_SIZE..cursor];
        let Some(found) = window
            .windows(FOOTER_MAGIC.len())
            .rposition(|candidate| candidate == FOOTER_MAGIC)
        else {
            return None;
        };
        let magic_at = HEADER_SIZE + found;
        if let Some(slice) = footer_ending_at(bytes, magic_at + FOOTER_SIZE) {
            return Some(slice);
        }
        cursor = magic_at;
        if cursor <= HEADER_SIZE {
            return None;
        }
    }
}
