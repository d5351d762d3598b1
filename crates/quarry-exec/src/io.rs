//! Split sources and sinks as operators see them.
//!
//! Operators never touch sockets directly: they read from a [`SplitSource`]
//! and write to a [`SplitSink`]. Network streams, in-memory buffers, the
//! multi-input [`Fanin`] and the partitioning [`OutputRouter`] all plug in
//! behind these two traits.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::mpsc;
use std::thread;

use quarry_core::prelude::Metadata;
use quarry_plan::Partitioning;
use quarry_split::{hash_partition, Split, SplitReader, SplitWriter};
use tracing::debug;

use crate::error::OpError;

pub trait SplitSource: Send {
    /// Schema handshake. Must be called before `read_split`.
    fn read_metadata(&mut self) -> Result<Metadata, OpError>;

    /// Next split, or `Ok(None)` at end of stream.
    fn read_split(&mut self) -> Result<Option<Split>, OpError>;
}

pub trait SplitSink: Send {
    fn write_metadata(&mut self, metadata: &Metadata) -> Result<(), OpError>;

    fn write_split(&mut self, split: &Split) -> Result<(), OpError>;

    /// Signal end of stream downstream.
    fn finish(&mut self) -> Result<(), OpError>;
}

impl<R: Read + Send> SplitSource for SplitReader<R> {
    fn read_metadata(&mut self) -> Result<Metadata, OpError> {
        Ok(SplitReader::read_metadata(self)?)
    }

    fn read_split(&mut self) -> Result<Option<Split>, OpError> {
        Ok(SplitReader::read_split(self)?)
    }
}

/// Source over splits already in memory.
pub struct MemorySource {
    metadata: Metadata,
    splits: VecDeque<Split>,
}

impl MemorySource {
    pub fn new(metadata: Metadata, splits: Vec<Split>) -> Self {
        Self {
            metadata,
            splits: splits.into(),
        }
    }
}

impl SplitSource for MemorySource {
    fn read_metadata(&mut self) -> Result<Metadata, OpError> {
        Ok(self.metadata.clone())
    }

    fn read_split(&mut self) -> Result<Option<Split>, OpError> {
        Ok(self.splits.pop_front())
    }
}

/// Sink that keeps everything in one split. Used for the root node's result.
#[derive(Default)]
pub struct CollectSink {
    result: Option<Split>,
    finished: bool,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_split(self) -> Option<Split> {
        self.result
    }
}

impl SplitSink for CollectSink {
    fn write_metadata(&mut self, metadata: &Metadata) -> Result<(), OpError> {
        self.result = Some(Split::new(metadata.clone()));
        Ok(())
    }

    fn write_split(&mut self, split: &Split) -> Result<(), OpError> {
        let acc = self
            .result
            .as_mut()
            .ok_or_else(|| OpError::Exec("rows before metadata".into()))?;
        acc.append(split)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), OpError> {
        self.finished = true;
        Ok(())
    }
}

/// Merges several inputs into one source. Each input is drained by its own
/// thread so that no upstream stalls on a full socket while another input is
/// being read. Split order across inputs is arrival order.
pub struct Fanin {
    metadata: Metadata,
    rx: mpsc::Receiver<Result<Split, OpError>>,
}

impl Fanin {
    /// Read metadata from every input (they must agree), then start draining.
    pub fn start(mut inputs: Vec<Box<dyn SplitSource>>) -> Result<Fanin, OpError> {
        let mut metadata: Option<Metadata> = None;
        for input in inputs.iter_mut() {
            let md = input.read_metadata()?;
            match &metadata {
                Some(first) if *first != md => {
                    return Err(OpError::Schema(format!(
                        "inputs disagree on schema: {first:?} vs {md:?}"
                    )))
                }
                Some(_) => {}
                None => metadata = Some(md),
            }
        }
        let metadata =
            metadata.ok_or_else(|| OpError::Exec("operator needs at least one input".into()))?;

        let (tx, rx) = mpsc::channel();
        for (i, mut input) in inputs.into_iter().enumerate() {
            let tx = tx.clone();
            thread::Builder::new()
                .name(format!("quarry-input-{i}"))
                .spawn(move || loop {
                    match input.read_split() {
                        Ok(Some(split)) => {
                            if tx.send(Ok(split)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => return,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            return;
                        }
                    }
                })
                .map_err(|e| OpError::Exec(format!("spawn input reader: {e}")))?;
        }
        Ok(Fanin { metadata, rx })
    }
}

impl SplitSource for Fanin {
    fn read_metadata(&mut self) -> Result<Metadata, OpError> {
        Ok(self.metadata.clone())
    }

    fn read_split(&mut self) -> Result<Option<Split>, OpError> {
        match self.rx.recv() {
            Ok(res) => res.map(Some),
            // every reader thread finished
            Err(mpsc::RecvError) => Ok(None),
        }
    }
}

/// Writes a node's output to its downstream peers according to its
/// `Partitioning`.
pub struct OutputRouter<W: Write + Send> {
    writers: Vec<Option<SplitWriter<W>>>,
    partitioning: Partitioning,
    hash_columns: Vec<usize>,
    next: usize,
}

impl<W: Write + Send> OutputRouter<W> {
    pub fn new(streams: Vec<W>, partitioning: Partitioning, batch_rows: usize) -> Self {
        Self {
            writers: streams
                .into_iter()
                .map(|s| Some(SplitWriter::new(s, batch_rows)))
                .collect(),
            partitioning,
            hash_columns: Vec::new(),
            next: 0,
        }
    }

    fn writer(&mut self, i: usize) -> Result<&mut SplitWriter<W>, OpError> {
        self.writers
            .get_mut(i)
            .and_then(Option::as_mut)
            .ok_or_else(|| OpError::Exec(format!("output {i} already finished")))
    }

    fn write_to(&mut self, i: usize, split: &Split) -> Result<(), OpError> {
        self.writer(i)?.write_split(split)?;
        Ok(())
    }
}

impl<W: Write + Send> SplitSink for OutputRouter<W> {
    fn write_metadata(&mut self, metadata: &Metadata) -> Result<(), OpError> {
        if let Partitioning::Hash(keys) = &self.partitioning {
            self.hash_columns = keys
                .iter()
                .map(|k| {
                    metadata
                        .index_of(k)
                        .ok_or_else(|| OpError::Schema(format!("partition key '{k}' not in output")))
                })
                .collect::<Result<_, _>>()?;
        }
        for i in 0..self.writers.len() {
            self.writer(i)?.write_metadata(metadata)?;
        }
        Ok(())
    }

    fn write_split(&mut self, split: &Split) -> Result<(), OpError> {
        if split.is_empty() || self.writers.is_empty() {
            return Ok(());
        }
        match self.partitioning.clone() {
            Partitioning::Single | Partitioning::OneToOne => self.write_to(0, split),
            Partitioning::RoundRobin => {
                let i = self.next;
                self.next = (self.next + 1) % self.writers.len();
                self.write_to(i, split)
            }
            Partitioning::Hash(_) => {
                let n = self.writers.len();
                let mut buckets: Vec<Split> = (0..n)
                    .map(|_| Split::new(split.metadata.clone()).with_orders(split.orders.clone()))
                    .collect();
                for r in 0..split.num_rows() {
                    let key: Vec<_> = self
                        .hash_columns
                        .iter()
                        .map(|&c| split.columns[c][r].clone())
                        .collect();
                    let (keys, flags) = split.key_row(r);
                    let keys = keys
                        .into_iter()
                        .zip(flags)
                        .map(|(k, present)| present.then_some(k))
                        .collect();
                    buckets[hash_partition(&key, n)].append_row_with_keys(split.row(r), keys)?;
                }
                for (i, bucket) in buckets.iter().enumerate() {
                    if !bucket.is_empty() {
                        self.write_to(i, bucket)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn finish(&mut self) -> Result<(), OpError> {
        let mut rows = 0;
        for slot in self.writers.iter_mut() {
            if let Some(w) = slot.take() {
                rows += w.rows_written();
                w.finish()?;
            }
        }
        debug!(outputs = self.writers.len(), rows, "closed outputs");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Write;
    use std::sync::Arc;

    use parking_lot::Mutex;

    /// Cloneable in-memory byte sink for router tests.
    #[derive(Clone, Default)]
    pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub fn bytes(&self) -> Vec<u8> {
            self.0.lock().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
