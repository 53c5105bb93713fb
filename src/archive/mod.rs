//! Three-stream binary archive format.
//!
//! An archive is a file set sharing one base name:
//!
//! ```text
//! <base>.data    label frame, then one data frame per tick
//! <base>.meta    label frame, then descriptor / instance-domain frames
//! <base>.index   raw 16-byte entries: timestamp i64 LE + data offset u64 LE
//! ```
//!
//! Every frame in the data and metadata streams is:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ payload_len: u32 LE                          │
//! │ type_tag:    u8   (0=label 1=desc 2=indom    │
//! │                    3=data)                   │
//! │ payload:     postcard-serialized record      │
//! │ crc32:       u32 LE over the payload         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A data frame whose snapshot has zero value sets is a mark (recording gap).

pub mod reader;
pub mod writer;

use std::io;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::catalog::MetricDesc;
use crate::model::{DomainId, MetricId};

pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;

/// Current archive format version.
pub const FORMAT_VERSION: u16 = 1;

pub(crate) const TAG_LABEL: u8 = 0;
pub(crate) const TAG_DESC: u8 = 1;
pub(crate) const TAG_INDOM: u8 = 2;
pub(crate) const TAG_DATA: u8 = 3;

pub(crate) const INDEX_ENTRY_SIZE: usize = 16;

/// Archive identity, written first to both the data and metadata streams.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveLabel {
    pub version: u16,
    pub start: i64,
    pub hostname: String,
    pub timezone: String,
}

/// Descriptor metadata record: one per catalog metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DescRecord {
    pub id: MetricId,
    pub name: String,
    pub desc: MetricDesc,
}

/// Instance-domain metadata record: full ordered membership at emission time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndomRecord {
    pub domain: DomainId,
    pub instances: Vec<(u32, String)>,
}

/// A metadata-stream record in stream order.
#[derive(Clone, Debug, PartialEq)]
pub enum MetaRecord {
    Desc(DescRecord),
    Indom(IndomRecord),
}

/// One index-stream entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp: i64,
    pub offset: u64,
}

pub(crate) fn encode_payload<T: Serialize>(record: &T) -> io::Result<Vec<u8>> {
    postcard::to_allocvec(record).map_err(io::Error::other)
}

pub(crate) fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> io::Result<T> {
    postcard::from_bytes(payload).map_err(io::Error::other)
}

/// Encodes one frame: length header, type tag, payload, payload CRC.
pub(crate) fn encode_frame(tag: u8, payload: &[u8]) -> io::Result<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::other("record payload too large"))?;
    let mut frame = Vec::with_capacity(payload.len() + 9);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.push(tag);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    Ok(frame)
}

/// Sequential frame parser over an in-memory stream image.
pub(crate) struct FrameCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameCursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Byte offset of the next frame, as recorded in the index stream.
    pub(crate) fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Returns the next `(tag, payload)`, `None` at a clean end of stream.
    pub(crate) fn next(&mut self) -> io::Result<Option<(u8, &'a [u8])>> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        if self.data.len() - self.pos < 5 {
            return Err(io::Error::other("truncated frame header"));
        }
        let len = u32::from_le_bytes(
            self.data[self.pos..self.pos + 4].try_into().unwrap(),
        ) as usize;
        let tag = self.data[self.pos + 4];
        let payload_start = self.pos + 5;
        let crc_start = payload_start + len;
        let frame_end = crc_start + 4;
        if frame_end > self.data.len() {
            return Err(io::Error::other("frame extends past end of stream"));
        }
        let payload = &self.data[payload_start..crc_start];
        let crc = u32::from_le_bytes(self.data[crc_start..frame_end].try_into().unwrap());
        if crc != crc32fast::hash(payload) {
            return Err(io::Error::other(format!(
                "CRC mismatch in frame at offset {}",
                self.pos
            )));
        }
        self.pos = frame_end;
        Ok(Some((tag, payload)))
    }
}

/// Appends the stream suffix to the archive base name.
pub(crate) fn stream_path(base: &std::path::Path, suffix: &str) -> std::path::PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    std::path::PathBuf::from(name)
}
