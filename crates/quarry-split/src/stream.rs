//! Split streams: one metadata frame, any number of batch frames, one end frame.

use std::io::{BufReader, BufWriter, Read, Write};

use quarry_core::prelude::{Metadata, Value};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SplitError};
use crate::frame::{read_frame, write_frame, FrameKind};
use crate::split::Split;

#[derive(Serialize)]
struct BatchRef<'a> {
    columns: &'a [Vec<Value>],
    keys: &'a [Vec<Value>],
    key_flags: &'a [Vec<bool>],
}

#[derive(Deserialize)]
struct BatchOwned {
    columns: Vec<Vec<Value>>,
    keys: Vec<Vec<Value>>,
    key_flags: Vec<Vec<bool>>,
}

/// Producer side of a split stream.
///
/// Dropping the writer without calling [`SplitWriter::finish`] leaves the
/// stream without an end frame, which the reader reports as `Truncated`.
pub struct SplitWriter<W: Write> {
    inner: BufWriter<W>,
    metadata: Option<Metadata>,
    batch_rows: usize,
    rows_written: u64,
}

impl<W: Write> SplitWriter<W> {
    pub fn new(inner: W, batch_rows: usize) -> Self {
        Self {
            inner: BufWriter::new(inner),
            metadata: None,
            batch_rows: batch_rows.max(1),
            rows_written: 0,
        }
    }

    /// Send the schema. Must precede every batch.
    pub fn write_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        if self.metadata.is_some() {
            return Err(SplitError::Protocol("metadata already written".into()));
        }
        let payload = bincode::serialize(metadata)?;
        write_frame(&mut self.inner, FrameKind::Metadata, &payload)?;
        self.inner.flush()?;
        self.metadata = Some(metadata.clone());
        Ok(())
    }

    /// Send `split` as one or more batch frames of at most `batch_rows` rows.
    pub fn write_split(&mut self, split: &Split) -> Result<()> {
        let md = self
            .metadata
            .as_ref()
            .ok_or_else(|| SplitError::Protocol("batch before metadata".into()))?;
        if split.columns.len() != md.column_count() || split.keys.len() != md.key_count() {
            return Err(SplitError::Schema(format!(
                "split has {}+{} arrays, stream metadata has {}+{}",
                split.columns.len(),
                split.keys.len(),
                md.column_count(),
                md.key_count()
            )));
        }

        let mut start = 0;
        while start < split.num_rows() {
            let end = (start + self.batch_rows).min(split.num_rows());
            let chunk;
            let part = if start == 0 && end == split.num_rows() {
                split
            } else {
                chunk = split.slice(start, end);
                &chunk
            };
            let payload = bincode::serialize(&BatchRef {
                columns: &part.columns,
                keys: &part.keys,
                key_flags: &part.key_flags,
            })?;
            write_frame(&mut self.inner, FrameKind::Batch, &payload)?;
            start = end;
        }
        self.rows_written += split.num_rows() as u64;
        self.inner.flush()?;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Write the end frame and flush. Consumes the writer.
    pub fn finish(mut self) -> Result<W> {
        if self.metadata.is_none() {
            return Err(SplitError::Protocol("stream finished before metadata".into()));
        }
        write_frame(&mut self.inner, FrameKind::End, &[])?;
        self.inner
            .into_inner()
            .map_err(|e| SplitError::Io(e.into_error()))
    }
}

/// Consumer side of a split stream. Blocks until a full frame is available.
pub struct SplitReader<R: Read> {
    inner: BufReader<R>,
    metadata: Option<Metadata>,
    done: bool,
}

impl<R: Read> SplitReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            metadata: None,
            done: false,
        }
    }

    /// Receive the schema. Must be called once, before `read_split`.
    pub fn read_metadata(&mut self) -> Result<Metadata> {
        if let Some(md) = &self.metadata {
            return Ok(md.clone());
        }
        match read_frame(&mut self.inner)? {
            Some((FrameKind::Metadata, payload)) => {
                let md: Metadata = bincode::deserialize(&payload)?;
                self.metadata = Some(md.clone());
                Ok(md)
            }
            Some((kind, _)) => Err(SplitError::Protocol(format!(
                "expected metadata frame, got {}",
                kind.name()
            ))),
            None => Err(SplitError::Truncated),
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Next batch, or `Ok(None)` at end of stream.
    pub fn read_split(&mut self) -> Result<Option<Split>> {
        if self.done {
            return Ok(None);
        }
        let md = match &self.metadata {
            Some(md) => md.clone(),
            None => self.read_metadata()?,
        };
        match read_frame(&mut self.inner)? {
            Some((FrameKind::Batch, payload)) => {
                let batch: BatchOwned = bincode::deserialize(&payload)?;
                Split::from_parts(md, batch.columns, batch.keys, batch.key_flags).map(Some)
            }
            Some((FrameKind::End, _)) => {
                self.done = true;
                Ok(None)
            }
            Some((FrameKind::Metadata, _)) => {
                Err(SplitError::Protocol("metadata frame after stream start".into()))
            }
            None => Err(SplitError::Truncated),
        }
    }

    /// Drain the rest of the stream into one split.
    pub fn read_all(&mut self) -> Result<Split> {
        let md = self.read_metadata()?;
        let mut all = Split::new(md);
        while let Some(split) = self.read_split()? {
            all.append(&split)?;
        }
        Ok(all)
    }
}
