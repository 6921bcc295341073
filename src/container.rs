//! Zero-copy view over a Mobipocket container: header, record directory and
//! per-record byte ranges.
//!
//! Record `i` spans from its directory offset to the next record's offset;
//! the last record runs to the end of the buffer.

use byteorder::{BigEndian, ByteOrder};
use std::ops::Range;
use tracing::debug;

use crate::database::{DatabaseHeader, DatabaseKind, DIRECTORY_ENTRY_SIZE, HEADER_SIZE};
use crate::error::FormatError;
use crate::metadata::FormatMetadata;

/// One directory entry, resolved to an absolute byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub index:      usize,
    pub offset:     usize,
    pub len:        usize,
    pub attributes: u8,
    pub unique_id:  u32,
}

impl Record {
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

/// What a record holds, as determined by the record-0 layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind<'a> {
    /// Record 0: PalmDOC + MOBI + EXTH headers and the DRM block.
    Header(&'a [u8]),
    /// Compressed (and possibly encrypted) book text.
    Text(&'a [u8]),
    /// HUFF code tables.
    Huffman(&'a [u8]),
    /// CDIC phrase dictionary.
    Cdic(&'a [u8]),
    /// Images, indexes, trailing resources; never encrypted.
    Resource(&'a [u8]),
}

impl<'a> RecordKind<'a> {
    pub fn bytes(&self) -> &'a [u8] {
        match *self {
            RecordKind::Header(b)
            | RecordKind::Text(b)
            | RecordKind::Huffman(b)
            | RecordKind::Cdic(b)
            | RecordKind::Resource(b) => b,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Container<'a> {
    data:        &'a [u8],
    pub header:  DatabaseHeader,
    pub records: Vec<Record>,
}

impl<'a> Container<'a> {
    /// Parse the database header and record directory.
    pub fn parse(data: &'a [u8]) -> Result<Self, FormatError> {
        if data.len() < HEADER_SIZE {
            return Err(FormatError::Truncated { needed: HEADER_SIZE, available: data.len() });
        }
        let header = DatabaseHeader::read(&data[..HEADER_SIZE])?;

        let declared = header.record_count as usize;
        if declared == 0 {
            return Err(FormatError::NoRecords);
        }
        let directory_end = HEADER_SIZE + declared * DIRECTORY_ENTRY_SIZE;
        if directory_end > data.len() {
            return Err(FormatError::DirectoryOverflow {
                declared,
                available: (data.len() - HEADER_SIZE) / DIRECTORY_ENTRY_SIZE,
            });
        }

        let mut offsets = Vec::with_capacity(declared);
        for (index, entry) in data[HEADER_SIZE..directory_end]
            .chunks_exact(DIRECTORY_ENTRY_SIZE)
            .enumerate()
        {
            let offset = BigEndian::read_u32(&entry[0..4]) as usize;
            let attributes = entry[4];
            let unique_id = BigEndian::read_u24(&entry[5..8]);

            if offset < directory_end {
                return Err(FormatError::RecordInsideDirectory { index, offset });
            }
            if let Some(&(previous, _, _)) = offsets.last() {
                if offset <= previous {
                    return Err(FormatError::OffsetsNotIncreasing { index, offset, previous });
                }
            }
            if offset > data.len() {
                return Err(FormatError::RecordOutOfBounds { index, offset, len: data.len() });
            }
            offsets.push((offset, attributes, unique_id));
        }

        let records = offsets
            .iter()
            .enumerate()
            .map(|(index, &(offset, attributes, unique_id))| {
                let end = offsets.get(index + 1).map_or(data.len(), |next| next.0);
                Record { index, offset, len: end - offset, attributes, unique_id }
            })
            .collect();

        debug!(
            kind = ?header.kind,
            records = declared,
            bytes = data.len(),
            "parsed container directory"
        );
        Ok(Self { data, header, records })
    }

    /// The full input buffer.
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn kind(&self) -> DatabaseKind {
        self.header.kind
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, index: usize) -> Result<&Record, FormatError> {
        self.records.get(index).ok_or(FormatError::MissingRecord(index))
    }

    pub fn record_data(&self, index: usize) -> Result<&'a [u8], FormatError> {
        let range = self.record(index)?.range();
        Ok(&self.data[range])
    }

    /// Classify record `index` against the layout described by `meta`.
    pub fn view(&self, index: usize, meta: &FormatMetadata) -> Result<RecordKind<'a>, FormatError> {
        let bytes = self.record_data(index)?;
        if index == 0 {
            return Ok(RecordKind::Header(bytes));
        }
        if index <= meta.text_record_count as usize {
            return Ok(RecordKind::Text(bytes));
        }
        if let Some(huff) = meta.huffman_records() {
            if index == huff.start {
                return Ok(RecordKind::Huffman(bytes));
            }
            if huff.contains(&index) {
                return Ok(RecordKind::Cdic(bytes));
            }
        }
        Ok(RecordKind::Resource(bytes))
    }
}
