//! Palm database header: the 78-byte preamble in front of the record directory.
//!
//! All fields are big-endian. Layout:
//!
//! | Offset | Size | Field                  |
//! |--------|------|------------------------|
//! | 0x00   | 32   | name (NUL padded)      |
//! | 0x20   | 2    | attributes             |
//! | 0x22   | 2    | version                |
//! | 0x24   | 4    | creation time          |
//! | 0x28   | 4    | modification time      |
//! | 0x2C   | 4    | last backup time       |
//! | 0x30   | 4    | modification number    |
//! | 0x34   | 4    | app info id            |
//! | 0x38   | 4    | sort info id           |
//! | 0x3C   | 8    | type + creator         |
//! | 0x44   | 4    | unique id seed         |
//! | 0x48   | 4    | next record list id    |
//! | 0x4C   | 2    | record count           |

use byteorder::{BigEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::io::Read;

use crate::error::FormatError;

pub const HEADER_SIZE: usize = 78;
pub const DIRECTORY_ENTRY_SIZE: usize = 8;
pub const MOBI_MAGIC: &[u8; 8] = b"BOOKMOBI";
pub const PALMDOC_MAGIC: &[u8; 8] = b"TEXtREAd";

/// Seconds between the Palm epoch (1904-01-01) and the Unix epoch.
const PALM_EPOCH_DELTA: i64 = 2_082_844_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatabaseKind {
    /// `BOOKMOBI`: PalmDOC header followed by a MOBI header and optional EXTH.
    Mobi,
    /// `TEXtREAd`: bare PalmDOC.
    PalmDoc,
}

#[derive(Debug, Clone)]
pub struct DatabaseHeader {
    pub name:                [u8; 32],
    pub attributes:          u16,
    pub version:             u16,
    pub created:             u32,
    pub modified:            u32,
    pub backed_up:           u32,
    pub modification_number: u32,
    pub app_info_id:         u32,
    pub sort_info_id:        u32,
    pub type_creator:        [u8; 8],
    pub unique_id_seed:      u32,
    pub next_record_list_id: u32,
    pub record_count:        u16,
    pub kind:                DatabaseKind,
}

impl DatabaseHeader {
    pub fn read<R: Read>(mut reader: R) -> Result<Self, FormatError> {
        let mut name = [0u8; 32];
        reader.read_exact(&mut name)?;
        let attributes          = reader.read_u16::<BigEndian>()?;
        let version             = reader.read_u16::<BigEndian>()?;
        let created             = reader.read_u32::<BigEndian>()?;
        let modified            = reader.read_u32::<BigEndian>()?;
        let backed_up           = reader.read_u32::<BigEndian>()?;
        let modification_number = reader.read_u32::<BigEndian>()?;
        let app_info_id         = reader.read_u32::<BigEndian>()?;
        let sort_info_id        = reader.read_u32::<BigEndian>()?;
        let mut type_creator = [0u8; 8];
        reader.read_exact(&mut type_creator)?;
        let kind = match &type_creator {
            t if t == MOBI_MAGIC    => DatabaseKind::Mobi,
            t if t == PALMDOC_MAGIC => DatabaseKind::PalmDoc,
            other => {
                return Err(FormatError::BadMagic {
                    found: String::from_utf8_lossy(other).into_owned(),
                })
            }
        };
        let unique_id_seed      = reader.read_u32::<BigEndian>()?;
        let next_record_list_id = reader.read_u32::<BigEndian>()?;
        let record_count        = reader.read_u16::<BigEndian>()?;
        Ok(Self {
            name,
            attributes,
            version,
            created,
            modified,
            backed_up,
            modification_number,
            app_info_id,
            sort_info_id,
            type_creator,
            unique_id_seed,
            next_record_list_id,
            record_count,
            kind,
        })
    }

    /// Database name up to the first NUL.
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        palm_time(self.created)
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        palm_time(self.modified)
    }
}

/// Palm timestamps with the high bit set count from 1904; others are Unix seconds.
pub fn palm_time(raw: u32) -> Option<DateTime<Utc>> {
    if raw == 0 {
        return None;
    }
    let secs = if raw & 0x8000_0000 != 0 {
        raw as i64 - PALM_EPOCH_DELTA
    } else {
        raw as i64
    };
    Utc.timestamp_opt(secs, 0).single()
}
