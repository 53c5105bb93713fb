//! Append-only writer for the three archive streams.
//!
//! Stream ordering is load-bearing: metadata referenced by a data record is
//! made durable in the metadata stream before the data record is appended.
//! `commit_tick` enforces that ordering internally; callers only hand it the
//! tick's pending metadata and the output snapshot.
//!
//! A run either closes cleanly (flush + final index entry) or aborts, in
//! which case all three stream files are deleted so no partially-written
//! archive is left behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::model::Snapshot;

use super::{
    ArchiveLabel, DescRecord, IndexEntry, IndomRecord, TAG_DATA, TAG_DESC, TAG_INDOM,
    TAG_LABEL, encode_frame, encode_payload, stream_path,
};

#[derive(Debug)]
pub struct ArchiveWriter {
    base: PathBuf,
    data: File,
    meta: File,
    index: File,
    /// Bytes appended to the data stream so far.
    data_pos: u64,
    records_written: u64,
    last_record: Option<IndexEntry>,
}

impl ArchiveWriter {
    /// Creates the three stream files and writes the label to the data and
    /// metadata streams. Fails without touching anything if any of the
    /// files already exists.
    pub fn open(base: &Path, label: &ArchiveLabel) -> io::Result<Self> {
        let paths = [
            stream_path(base, "data"),
            stream_path(base, "meta"),
            stream_path(base, "index"),
        ];
        for p in &paths {
            if p.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("output file {} already exists", p.display()),
                ));
            }
        }

        let create = |p: &Path| OpenOptions::new().write(true).create_new(true).open(p);
        let data = create(&paths[0])?;
        let meta = create(&paths[1]);
        let index = create(&paths[2]);
        // Roll back the already-created files if a later create failed.
        let (meta, index) = match (meta, index) {
            (Ok(m), Ok(i)) => (m, i),
            (m, i) => {
                drop(data);
                drop(m);
                drop(i);
                remove_streams(base);
                return Err(io::Error::other("cannot create output archive"));
            }
        };

        let mut writer = Self {
            base: base.to_path_buf(),
            data,
            meta,
            index,
            data_pos: 0,
            records_written: 0,
            last_record: None,
        };

        let frame = encode_frame(TAG_LABEL, &encode_payload(label)?)?;
        writer.data.write_all(&frame)?;
        writer.data_pos = frame.len() as u64;
        writer.meta.write_all(&frame)?;

        debug!(base = %base.display(), "output archive created");
        Ok(writer)
    }

    /// Appends one descriptor record to the metadata stream.
    pub fn put_desc(&mut self, record: &DescRecord) -> io::Result<()> {
        let frame = encode_frame(TAG_DESC, &encode_payload(record)?)?;
        self.meta.write_all(&frame)
    }

    /// Commits one tick: pending instance-domain metadata first, then the
    /// snapshot, then the first-record index entry if due.
    pub fn commit_tick(
        &mut self,
        indoms: &[IndomRecord],
        snapshot: &Snapshot,
    ) -> io::Result<()> {
        debug_assert!(
            self.last_record
                .is_none_or(|e| snapshot.timestamp > e.timestamp),
            "output timestamps must be strictly increasing"
        );

        for record in indoms {
            let frame = encode_frame(TAG_INDOM, &encode_payload(record)?)?;
            self.meta.write_all(&frame)?;
        }
        if !indoms.is_empty() {
            // Data records reference these instances; the metadata must hit
            // the platter first.
            self.meta.sync_data()?;
        }

        let offset = self.data_pos;
        let frame = encode_frame(TAG_DATA, &encode_payload(snapshot)?)?;
        self.data.write_all(&frame)?;
        self.data_pos += frame.len() as u64;

        let entry = IndexEntry {
            timestamp: snapshot.timestamp,
            offset,
        };
        self.records_written += 1;
        if self.records_written == 1 {
            self.put_index(entry)?;
        }
        self.last_record = Some(entry);
        Ok(())
    }

    fn put_index(&mut self, entry: IndexEntry) -> io::Result<()> {
        self.index.write_all(&entry.timestamp.to_le_bytes())?;
        self.index.write_all(&entry.offset.to_le_bytes())
    }

    /// Data records committed so far.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flushes all three streams and appends the final index entry.
    pub fn close(mut self) -> io::Result<()> {
        if let Some(entry) = self.last_record {
            self.put_index(entry)?;
        }
        self.data.sync_all()?;
        self.meta.sync_all()?;
        self.index.sync_all()?;
        info!(
            base = %self.base.display(),
            records = self.records_written,
            "archive closed"
        );
        Ok(())
    }

    /// Deletes all three stream files. Invoked on any fatal condition so a
    /// half-written archive never survives the run.
    pub fn abort(self) {
        let base = self.base.clone();
        drop(self);
        warn!(base = %base.display(), "aborting, removing partial archive");
        remove_streams(&base);
    }
}

/// Best-effort removal of the archive file set.
pub(crate) fn remove_streams(base: &Path) {
    for suffix in ["data", "meta", "index"] {
        let p = stream_path(base, suffix);
        if let Err(e) = fs::remove_file(&p)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %p.display(), error = %e, "could not remove stream file");
        }
    }
}
