//! The single resident block and its load / modify / flush cycle.

use std::sync::Arc;

use tracing::debug;

use crate::codec::{Codec, CodecParams};
use crate::error::{Error, Result};
use crate::flush::FlushCoordinator;
use crate::layout::RasterLayout;
use crate::padding::{pad_edges, BlockShape, PadPolicy};
use crate::pool::{CompressionJobPool, CompressionRequest};
use crate::reader::decode_payload;
use crate::sink::SharedSink;
use crate::sparse::{fill_background, SparseBlockPolicy};

/// Owns one fixed-capacity block buffer tagged with the id it currently
/// holds. `load` and `flush` are the only operations that change the tag.
pub struct BlockCache {
    layout: RasterLayout,
    codec: Arc<dyn Codec>,
    params: CodecParams,
    shape: BlockShape,
    pad: PadPolicy,
    sparse: SparseBlockPolicy,
    sink: SharedSink,
    flusher: FlushCoordinator,
    /// Whether flushed blocks go to the pool rather than being encoded inline.
    offload: bool,
    buffer: Vec<u8>,
    resident: Option<u64>,
    dirty: bool,
}

impl BlockCache {
    pub fn new(
        layout: RasterLayout,
        codec: Arc<dyn Codec>,
        params: CodecParams,
        sparse: SparseBlockPolicy,
        sink: SharedSink,
        flusher: FlushCoordinator,
        layout_claims: bool,
    ) -> Self {
        let offload =
            flusher.pool().is_some() && CompressionJobPool::accepts(codec.as_ref(), layout_claims);
        let pad = PadPolicy::for_codec(codec.as_ref(), &layout);
        debug!(?pad, offload, codec = codec.name(), "block cache ready");
        Self {
            shape: BlockShape::of(&layout),
            buffer: vec![0u8; layout.block_bytes()],
            layout,
            codec,
            params,
            pad,
            sparse,
            sink,
            flusher,
            offload,
            resident: None,
            dirty: false,
        }
    }

    pub fn resident(&self) -> Option<u64> {
        self.resident
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn pad_policy(&self) -> PadPolicy {
        self.pad
    }

    pub fn sparse_policy(&self) -> &SparseBlockPolicy {
        &self.sparse
    }

    /// Make block `id` resident and return its buffer.
    ///
    /// A different dirty block is flushed first. With `read_from_store`
    /// unset the previous content is not fetched, for callers about to
    /// overwrite the whole block.
    pub fn load(&mut self, id: u64, read_from_store: bool) -> Result<&mut [u8]> {
        self.layout.check_id(id)?;
        if self.resident != Some(id) {
            if self.dirty {
                self.flush()?;
            }
            let mut buffer = std::mem::take(&mut self.buffer);
            let fetched = if read_from_store {
                self.fetch_into(id, &mut buffer)
            } else {
                fill_background(&mut buffer, self.layout.sample_type, self.sparse.background());
                Ok(())
            };
            self.buffer = buffer;
            fetched?;
            self.resident = Some(id);
        }
        Ok(&mut self.buffer)
    }

    pub fn mark_dirty(&mut self) {
        if self.resident.is_some() {
            self.dirty = true;
        }
    }

    /// Buffer of the resident block, if any.
    pub fn buffer_mut(&mut self) -> Option<&mut [u8]> {
        self.resident?;
        Some(&mut self.buffer)
    }

    /// Write the resident block if it is dirty, then release it.
    ///
    /// May block while the pool has no free slot.
    pub fn flush(&mut self) -> Result<()> {
        let Some(id) = self.resident else {
            return Ok(());
        };
        if !self.dirty {
            self.resident = None;
            return Ok(());
        }
        self.sink.lock().check()?;

        let geometry = self.layout.geometry(id)?;
        pad_edges(
            &mut self.buffer,
            self.shape,
            geometry.valid_width,
            geometry.valid_height,
            self.pad,
        )?;

        // A pending job for this block will materialize it.
        self.flusher.drain_block(&self.sink, id);
        let materialized = self.sink.lock().location(id).is_materialized();
        if self.sparse.should_skip(
            &self.buffer,
            geometry.valid_width,
            geometry.valid_height,
            self.shape.components,
            materialized,
        ) {
            debug!(block = id, "skipping empty block");
        } else if !self.submit_compression_job(id, geometry.encoded_rows)? {
            let raw = &self.buffer[..geometry.encoded_rows as usize * self.layout.row_bytes()];
            let outcome = self
                .codec
                .encode_block(raw, &self.params.with_rows(geometry.encoded_rows));
            self.sink.lock().commit(id, outcome)?;
        }

        self.dirty = false;
        self.resident = None;
        Ok(())
    }

    /// Hand the resident buffer to the pool. `Ok(false)` means the caller
    /// must encode synchronously.
    pub fn submit_compression_job(&mut self, id: u64, rows: u32) -> Result<bool> {
        if !self.offload {
            return Ok(false);
        }
        let Some(pool) = self.flusher.pool() else {
            return Ok(false);
        };
        let raw_len = rows as usize * self.layout.row_bytes();
        let raw = self.buffer.get(..raw_len).ok_or(Error::BufferSize {
            expected: raw_len,
            got: self.buffer.len(),
        })?;
        pool.submit(CompressionRequest {
            sink: &self.sink,
            codec: &self.codec,
            params: self.params.with_rows(rows),
            block_id: id,
            raw,
        });
        Ok(true)
    }

    /// Decoded copy of block `id`. The resident block is returned as it
    /// currently stands, unflushed edits included.
    pub fn read_block(&self, id: u64) -> Result<Vec<u8>> {
        self.layout.check_id(id)?;
        let mut block = vec![0u8; self.layout.block_bytes()];
        if self.resident == Some(id) {
            block.copy_from_slice(&self.buffer);
        } else {
            self.fetch_into(id, &mut block)?;
        }
        Ok(block)
    }

    /// Fill `dst` with the stored content of block `id`, or with background
    /// if it was never written.
    fn fetch_into(&self, id: u64, dst: &mut [u8]) -> Result<()> {
        self.flusher.drain_block(&self.sink, id);
        let encoded = self.sink.lock().read_block(id)?;
        match encoded {
            Some(encoded) => decode_payload(
                self.codec.as_ref(),
                &self.layout,
                &self.params,
                id,
                &encoded,
                self.sparse.background(),
                dst,
            ),
            None => {
                fill_background(dst, self.layout.sample_type, self.sparse.background());
                Ok(())
            }
        }
    }
}
