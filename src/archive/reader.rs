//! Reader for the three-stream archive format.
//!
//! Reads each stream fully into memory and validates framing and CRCs up
//! front, so the accessors are infallible slices. Archives are small after
//! reduction; the input side streams through the `source` module instead of
//! holding decoded snapshots here longer than the caller needs them.

use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;

use crate::model::Snapshot;

use super::{
    ArchiveLabel, DescRecord, FORMAT_VERSION, FrameCursor, INDEX_ENTRY_SIZE, IndexEntry,
    IndomRecord, MetaRecord, TAG_DATA, TAG_DESC, TAG_INDOM, TAG_LABEL, decode_payload,
    stream_path,
};

pub struct ArchiveReader {
    label: ArchiveLabel,
    metadata: Vec<MetaRecord>,
    snapshots: Vec<Snapshot>,
    index: Vec<IndexEntry>,
}

impl ArchiveReader {
    /// Opens and fully validates an archive file set.
    pub fn open(base: &Path) -> io::Result<Self> {
        let data_raw = fs::read(stream_path(base, "data"))?;
        let meta_raw = fs::read(stream_path(base, "meta"))?;
        let index_raw = fs::read(stream_path(base, "index"))?;

        let (label, snapshots) = parse_data(&data_raw)?;
        let (meta_label, metadata) = parse_meta(&meta_raw)?;
        if meta_label != label {
            return Err(io::Error::other(
                "data and metadata stream labels disagree",
            ));
        }
        let index = parse_index(&index_raw)?;

        Ok(Self {
            label,
            metadata,
            snapshots,
            index,
        })
    }

    pub fn label(&self) -> &ArchiveLabel {
        &self.label
    }

    /// Metadata records in stream order.
    pub fn metadata(&self) -> &[MetaRecord] {
        &self.metadata
    }

    /// Descriptor records in stream order.
    pub fn descriptors(&self) -> impl Iterator<Item = &DescRecord> {
        self.metadata.iter().filter_map(|m| match m {
            MetaRecord::Desc(d) => Some(d),
            MetaRecord::Indom(_) => None,
        })
    }

    /// Instance-domain records in stream order.
    pub fn indoms(&self) -> impl Iterator<Item = &IndomRecord> {
        self.metadata.iter().filter_map(|m| match m {
            MetaRecord::Indom(r) => Some(r),
            MetaRecord::Desc(_) => None,
        })
    }

    /// Data records in stream order (marks included, as empty snapshots).
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }
}

fn read_label(cursor: &mut FrameCursor<'_>, stream: &str) -> io::Result<ArchiveLabel> {
    let Some((tag, payload)) = cursor.next()? else {
        return Err(io::Error::other(format!("{} stream is empty", stream)));
    };
    if tag != TAG_LABEL {
        return Err(io::Error::other(format!(
            "{} stream does not start with a label record",
            stream
        )));
    }
    let label: ArchiveLabel = decode_payload(payload)?;
    if label.version != FORMAT_VERSION {
        return Err(io::Error::other(format!(
            "unsupported archive version {}",
            label.version
        )));
    }
    Ok(label)
}

fn parse_data(raw: &[u8]) -> io::Result<(ArchiveLabel, Vec<Snapshot>)> {
    let mut cursor = FrameCursor::new(raw);
    let label = read_label(&mut cursor, "data")?;
    let mut snapshots = Vec::new();
    while let Some((tag, payload)) = cursor.next()? {
        if tag != TAG_DATA {
            return Err(io::Error::other(format!(
                "unexpected record type {} in data stream",
                tag
            )));
        }
        snapshots.push(decode_payload(payload)?);
    }
    Ok((label, snapshots))
}

fn parse_meta(raw: &[u8]) -> io::Result<(ArchiveLabel, Vec<MetaRecord>)> {
    let mut cursor = FrameCursor::new(raw);
    let label = read_label(&mut cursor, "metadata")?;
    let mut records = Vec::new();
    while let Some((tag, payload)) = cursor.next()? {
        match tag {
            TAG_DESC => records.push(MetaRecord::Desc(decode_payload(payload)?)),
            TAG_INDOM => records.push(MetaRecord::Indom(decode_payload(payload)?)),
            other => {
                return Err(io::Error::other(format!(
                    "unexpected record type {} in metadata stream",
                    other
                )));
            }
        }
    }
    Ok((label, records))
}

fn parse_index(raw: &[u8]) -> io::Result<Vec<IndexEntry>> {
    if !raw.len().is_multiple_of(INDEX_ENTRY_SIZE) {
        warn!(len = raw.len(), "index stream length not entry-aligned");
        return Err(io::Error::other("index stream is truncated"));
    }
    Ok(raw
        .chunks_exact(INDEX_ENTRY_SIZE)
        .map(|c| IndexEntry {
            timestamp: i64::from_le_bytes(c[0..8].try_into().unwrap()),
            offset: u64::from_le_bytes(c[8..16].try_into().unwrap()),
        })
        .collect())
}
