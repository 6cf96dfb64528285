use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::constants::{FORMAT_VERSION, HEADER_SIZE, MAGIC};
use crate::error::{Result, TrackDbError};
use crate::types::Header;

// Layout: [magic: 4][version: u16][reserved: 2][created_at: i64][checksum: 32][zero: 16]
const CHECKSUM_RANGE: std::ops::Range<usize> = 16..48;

/// Encodes and decodes the fixed header at offset 0.
pub struct HeaderCodec;

impl HeaderCodec {
    #[must_use]
    pub fn encode(header: &Header) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..4].copy_from_slice(&header.magic);
        bytes[4..6].copy_from_slice(&header.version.to_le_bytes());
        bytes[8..16].copy_from_slice(&header.created_at.to_le_bytes());
        let digest = blake3::hash(&bytes[..16]);
        bytes[CHECKSUM_RANGE].copy_from_slice(digest.as_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Header> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        if magic != MAGIC {
            return Err(TrackDbError::InvalidHeader {
                reason: "magic mismatch; not a track database".into(),
            });
        }
        let digest = blake3::hash(&bytes[..16]);
        if digest.as_bytes()[..] != bytes[CHECKSUM_RANGE] {
            return Err(TrackDbError::InvalidHeader {
                reason: "header checksum mismatch".into(),
            });
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version > FORMAT_VERSION {
            return Err(TrackDbError::InvalidHeader {
                reason: format!("unsupported format version {version:#06x}"),
            });
        }
        let mut created = [0u8; 8];
        created.copy_from_slice(&bytes[8..16]);
        Ok(Header {
            magic,
            version,
            created_at: i64::from_le_bytes(created),
        })
    }

    pub fn read(file: &mut File) -> Result<Header> {
        let mut bytes = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut bytes).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                TrackDbError::InvalidHeader {
                    reason: "file shorter than header".into(),
                }
            } else {
                TrackDbError::Io(err)
            }
        })?;
        Self::decode(&bytes)
    }

    pub fn write(file: &mut File, header: &Header) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&Self::encode(header))?;
        Ok(())
    }
}
