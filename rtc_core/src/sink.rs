//! Per-dataset write target shared between a dataset and the jobs it submits.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::directory::{BlockDirectory, BlockLocation, LocationTable};
use crate::error::{Error, Result};
use crate::raw_writer::RawBlockWriter;

/// Result a compression worker hands back for one block.
pub type JobOutcome = std::result::Result<Vec<u8>, anyhow::Error>;

/// Handle a [`CompressionJobPool`](crate::CompressionJobPool) job keeps to
/// its owning dataset. Pointer identity doubles as dataset identity.
pub type SharedSink = Arc<Mutex<BlockSink>>;

/// Sticky write failure. Set once, cleared only by building a new dataset.
#[derive(Debug, Default)]
struct WriteErrorFlag(Option<String>);

/// Raw writer guarded by the dataset's poisoned state.
///
/// Every write path goes through [`BlockSink::check`] first, so a dataset
/// that failed once never issues further I/O.
pub struct BlockSink {
    writer: RawBlockWriter,
    error: WriteErrorFlag,
    label: String,
}

impl BlockSink {
    pub fn new(writer: RawBlockWriter, label: impl Into<String>) -> Self {
        Self {
            writer,
            error: WriteErrorFlag::default(),
            label: label.into(),
        }
    }

    pub fn shared(self) -> SharedSink {
        Arc::new(Mutex::new(self))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Fail fast once the dataset is poisoned.
    pub fn check(&self) -> Result<()> {
        match &self.error.0 {
            Some(msg) => Err(Error::Poisoned(msg.clone())),
            None => Ok(()),
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.error.0.is_some()
    }

    pub(crate) fn poison(&mut self, err: &Error) {
        if self.error.0.is_none() {
            error!(dataset = %self.label, error = %err, "write failed; dataset poisoned");
            self.error.0 = Some(err.to_string());
        }
    }

    /// Write an encoded block through the raw writer.
    pub fn write(&mut self, id: u64, encoded: &[u8]) -> Result<()> {
        self.check()?;
        let result = self.writer.write(id, encoded);
        if let Err(err) = &result {
            self.poison(err);
        }
        result
    }

    /// Materialize block `id` as `size` zero bytes by growing the file.
    pub fn write_zeroed(&mut self, id: u64, size: u64, checksum: u64) -> Result<()> {
        self.check()?;
        let result = self.writer.write_zeroed(id, size, checksum);
        if let Err(err) = &result {
            self.poison(err);
        }
        result
    }

    /// Hand a finished encoding to the writer. A failed or empty encoding
    /// poisons the dataset without touching the file.
    pub fn commit(&mut self, id: u64, outcome: JobOutcome) -> Result<()> {
        self.check()?;
        let source = match outcome {
            Ok(encoded) if !encoded.is_empty() => return self.write(id, &encoded),
            Ok(_) => anyhow::anyhow!("codec produced no output"),
            Err(source) => source,
        };
        let err = Error::Codec { block: id, source };
        self.poison(&err);
        Err(err)
    }

    pub fn read_block(&mut self, id: u64) -> Result<Option<Vec<u8>>> {
        self.writer.store_mut().read_block(id)
    }

    pub fn location(&self, id: u64) -> BlockLocation {
        self.writer.directory().get_block_location(id)
    }

    pub fn directory(&self) -> &LocationTable {
        self.writer.directory()
    }

    pub fn writer_mut(&mut self) -> &mut RawBlockWriter {
        &mut self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BlockStore;

    #[test]
    fn io_failure_poisons_and_later_writes_skip_io() {
        let path = std::env::temp_dir().join("rtc_sink_read_only.rtc");
        drop(BlockStore::create(&path, 2).unwrap());
        let store = BlockStore::open_read_only(&path, 2).unwrap();
        let mut sink = BlockSink::new(RawBlockWriter::new(store, false, false), "read-only");

        assert!(matches!(sink.write(0, b"block"), Err(Error::Io(_))));
        assert!(sink.is_poisoned());
        assert!(!sink.location(0).is_materialized());

        // Poisoned before any I/O: the error is the sticky flag, not a new I/O error.
        assert!(matches!(sink.write(1, b"block"), Err(Error::Poisoned(_))));
        assert!(matches!(sink.write_zeroed(1, 16, 0), Err(Error::Poisoned(_))));
        assert!(matches!(sink.commit(1, Ok(b"block".to_vec())), Err(Error::Poisoned(_))));
        assert!(matches!(sink.check(), Err(Error::Poisoned(msg)) if msg.contains("I/O")));
    }
}
