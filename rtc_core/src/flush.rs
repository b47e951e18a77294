use tracing::debug;

use crate::error::Result;
use crate::pool::CompressionJobPool;
use crate::sink::SharedSink;

/// Drains outstanding compression jobs at the points where the file must be
/// externally consistent: explicit flush, close, index rewrite, and before a
/// synchronous read of a block that may still be in flight.
#[derive(Clone, Default)]
pub struct FlushCoordinator {
    pool: Option<CompressionJobPool>,
}

impl FlushCoordinator {
    pub fn new(pool: Option<CompressionJobPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> Option<&CompressionJobPool> {
        self.pool.as_ref()
    }

    /// Write back every queued job in FIFO order, whichever dataset owns it.
    pub fn drain_all(&self) -> usize {
        let drained = self.pool.as_ref().map_or(0, CompressionJobPool::drain_all);
        if drained > 0 {
            debug!(drained, "drained compression queue");
        }
        drained
    }

    /// Make sure block `id` of `sink` is no longer in flight.
    pub fn drain_block(&self, sink: &SharedSink, id: u64) -> usize {
        self.pool
            .as_ref()
            .map_or(0, |pool| pool.wait_for_block(sink, id))
    }

    /// Whether block `id` of `sink` has been submitted but not yet written.
    pub fn is_in_flight(&self, sink: &SharedSink, id: u64) -> bool {
        self.pool
            .as_ref()
            .is_some_and(|pool| pool.is_queued(sink, id))
    }

    /// Drain everything, then surface any failure recorded for `sink`.
    pub fn settle(&self, sink: &SharedSink) -> Result<()> {
        self.drain_all();
        sink.lock().check()
    }
}
