use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::cache::BlockCache;
use crate::codec::{Codec, CodecClass, CodecParams};
use crate::directory::{BlockDirectory, BlockLocation, LayoutGuarantee};
use crate::error::{Error, Result};
use crate::flush::FlushCoordinator;
use crate::format::{
    Rtc1Header, FLAG_BLOCK_LEADER_TRAILER, FLAG_BLOCK_ORDER_ROW_MAJOR, FLAG_HAS_BACKGROUND,
    FLAG_KNOWN_INCOMPATIBLE_EDITION, VERSION,
};
use crate::layout::RasterLayout;
use crate::options::WriterOptions;
use crate::pool::CompressionJobPool;
use crate::raw_writer::RawBlockWriter;
use crate::reader::Reader;
use crate::sink::{BlockSink, SharedSink};
use crate::sparse::{materialize_all_pending_sparse, SparseBlockPolicy};
use crate::store::BlockStore;

/// Block-oriented writer for RTC1 files.
///
/// # Write contract
/// Blocks are edited through a single resident buffer ([`block_mut`] or
/// [`write_block`]). Touching another block flushes the previous one, which
/// encodes it inline or hands it to the compression pool. Encoded blocks
/// reach the file in the order they were flushed.
///
/// Call [`close`] to drain the pool, fill any blocks that were never written
/// (unless `SPARSE_OK` is set), append the block index, and write back the
/// final header. Dropping an unclosed writer does the same on a best-effort
/// basis, unless the dataset is poisoned.
///
/// # Format layout written
/// ```text
/// [HEADER: 64 bytes placeholder]
/// [BLOCK a] [BLOCK b] ...                  ← in flush order, optionally framed
/// [BLOCK INDEX: 24 bytes × block_count]
/// ← seek back to 0, overwrite header with real values
/// ```
///
/// [`block_mut`]: RasterWriter::block_mut
/// [`write_block`]: RasterWriter::write_block
/// [`close`]: RasterWriter::close
pub struct RasterWriter {
    header: Rtc1Header,
    codec: Arc<dyn Codec>,
    params: CodecParams,
    cache: BlockCache,
    sink: SharedSink,
    flusher: FlushCoordinator,
    sparse_ok: bool,
    closed: bool,
}

/// What [`RasterWriter::close`] left on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseSummary {
    pub block_count: u64,
    /// Blocks written only because they were still empty at close.
    pub filled_at_close: u64,
    /// Blocks left as holes in the index.
    pub holes: u64,
    pub layout_downgraded: bool,
    pub file_size: u64,
}

impl RasterWriter {
    /// Create a new RTC1 file at `path`, overwriting any existing file.
    ///
    /// A compression pool is started when `NUM_THREADS` is non-zero.
    pub fn create(
        path: impl AsRef<Path>,
        layout: RasterLayout,
        codec: Arc<dyn Codec>,
        options: &WriterOptions,
    ) -> Result<Self> {
        let pool = CompressionJobPool::from_options(options)?;
        Self::create_with_pool(path, layout, codec, options, pool)
    }

    /// Like [`create`](Self::create) with an explicit pool handle, so that
    /// sibling datasets (an image and its mask) share one job queue.
    pub fn create_with_pool(
        path: impl AsRef<Path>,
        layout: RasterLayout,
        codec: Arc<dyn Codec>,
        options: &WriterOptions,
        pool: Option<CompressionJobPool>,
    ) -> Result<Self> {
        layout.validate()?;
        let path = path.as_ref();
        let store = BlockStore::create(path, layout.block_count())?;

        let mut flags = 0;
        if options.block_order_row_major {
            flags |= FLAG_BLOCK_ORDER_ROW_MAJOR;
        }
        if options.block_framing {
            flags |= FLAG_BLOCK_LEADER_TRAILER;
        }
        if options.background.is_some() {
            flags |= FLAG_HAS_BACKGROUND;
        }
        let header = Rtc1Header {
            version: VERSION,
            codec_id: codec.id(),
            layout,
            predictor: options.predictor,
            flags,
            background: options.background.unwrap_or(0.0),
            index_offset: 0,
        };
        let writer = RawBlockWriter::new(store, options.block_order_row_major, options.block_framing);
        info!(
            path = %path.display(),
            codec = codec.name(),
            blocks = header.layout.block_count(),
            threads = options.num_threads,
            "creating raster"
        );
        Ok(Self::assemble(header, codec, options, writer, path, pool))
    }

    /// Open an existing RTC1 file for update.
    ///
    /// Layout claims and the background value come from the file. Blocks
    /// written from now on are appended after the existing data or, where
    /// the row-major claim allows it, rewritten in place.
    pub fn open(
        path: impl AsRef<Path>,
        codec: Arc<dyn Codec>,
        options: &WriterOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        // Check before the store cuts the index off the file.
        let codec_id = Reader::peek_header(path)?.codec_id;
        if codec_id != codec.id() {
            return Err(Error::format(format!(
                "codec mismatch: file uses codec {} but provided codec has id {}",
                codec_id,
                codec.id()
            )));
        }
        let (store, header) = BlockStore::open(path)?;
        if header.has_flag(FLAG_KNOWN_INCOMPATIBLE_EDITION) {
            warn!(
                path = %path.display(),
                "file was updated after creation; its advertised block layout no longer holds"
            );
        }
        let row_major = header.has_flag(FLAG_BLOCK_ORDER_ROW_MAJOR);
        let framing = header.has_flag(FLAG_BLOCK_LEADER_TRAILER);
        let writer = RawBlockWriter::new(store, row_major, framing);

        let mut options = options.clone();
        options.block_order_row_major = row_major;
        options.block_framing = framing;
        options.predictor = header.predictor;
        options.background = header.background();
        let pool = CompressionJobPool::from_options(&options)?;
        info!(
            path = %path.display(),
            materialized = writer.directory().materialized_count(),
            "opened raster for update"
        );
        Ok(Self::assemble(header, codec, &options, writer, path, pool))
    }

    fn assemble(
        header: Rtc1Header,
        codec: Arc<dyn Codec>,
        options: &WriterOptions,
        writer: RawBlockWriter,
        path: &Path,
        pool: Option<CompressionJobPool>,
    ) -> Self {
        let layout = header.layout.clone();
        let params = CodecParams::for_layout(&layout, header.predictor);
        let store_codec = codec.class() == CodecClass::Store;
        let sparse = SparseBlockPolicy::new(
            &layout,
            options.skip_empty_blocks(store_codec),
            options.background,
        );
        let sink = BlockSink::new(writer, path.display().to_string()).shared();
        let flusher = FlushCoordinator::new(pool);
        let layout_claims = options.block_order_row_major || options.block_framing;
        let cache = BlockCache::new(
            layout,
            Arc::clone(&codec),
            params.clone(),
            sparse,
            Arc::clone(&sink),
            flusher.clone(),
            layout_claims,
        );
        Self {
            header,
            codec,
            params,
            cache,
            sink,
            flusher,
            sparse_ok: options.sparse_ok,
            closed: false,
        }
    }

    pub fn layout(&self) -> &RasterLayout {
        &self.header.layout
    }

    pub fn block_count(&self) -> u64 {
        self.header.layout.block_count()
    }

    /// Pool handle, for creating a sibling that shares it.
    pub fn pool(&self) -> Option<&CompressionJobPool> {
        self.flusher.pool()
    }

    /// Load block `id` for editing and mark it dirty.
    pub fn block_mut(&mut self, id: u64) -> Result<&mut [u8]> {
        self.sink.lock().check()?;
        self.cache.load(id, true)?;
        self.cache.mark_dirty();
        self.cache
            .buffer_mut()
            .ok_or_else(|| Error::format(format!("block {id} is not resident")))
    }

    /// Replace the whole content of block `id`. `data` must be exactly one
    /// block buffer long.
    pub fn write_block(&mut self, id: u64, data: &[u8]) -> Result<()> {
        self.sink.lock().check()?;
        let expected = self.header.layout.block_bytes();
        if data.len() != expected {
            return Err(Error::BufferSize {
                expected,
                got: data.len(),
            });
        }
        self.cache.load(id, false)?.copy_from_slice(data);
        self.cache.mark_dirty();
        Ok(())
    }

    /// Current content of block `id`, background-filled if never written.
    pub fn read_block(&self, id: u64) -> Result<Vec<u8>> {
        self.cache.read_block(id)
    }

    /// Whether block `id` holds data: written, queued, or being edited.
    pub fn is_block_available(&self, id: u64) -> Result<bool> {
        self.header.layout.check_id(id)?;
        if self.cache.resident() == Some(id) && self.cache.is_dirty() {
            return Ok(true);
        }
        if self.flusher.is_in_flight(&self.sink, id) {
            return Ok(true);
        }
        Ok(self.sink.lock().location(id).is_materialized())
    }

    /// On-disk location of block `id` after draining any job for it.
    pub fn location(&self, id: u64) -> Result<BlockLocation> {
        self.header.layout.check_id(id)?;
        self.flusher.drain_block(&self.sink, id);
        Ok(self.sink.lock().location(id))
    }

    /// Write the resident block and wait for every queued job.
    pub fn flush(&mut self) -> Result<()> {
        self.cache.flush()?;
        self.flusher.settle(&self.sink)?;
        self.sink.lock().writer_mut().store_mut().sync()
    }

    /// A layout claim was made and later broken.
    pub fn layout_downgraded(&self) -> bool {
        self.sink.lock().directory().layout_downgraded()
    }

    pub fn is_poisoned(&self) -> bool {
        self.sink.lock().is_poisoned()
    }

    /// Flush, fill remaining holes unless sparse files are allowed, then
    /// write the index and final header.
    pub fn close(mut self) -> Result<CloseSummary> {
        self.closed = true;
        self.finalize()
    }

    fn finalize(&mut self) -> Result<CloseSummary> {
        self.cache.flush()?;
        self.flusher.settle(&self.sink)?;

        let mut sink = self.sink.lock();
        let filled_at_close = if self.sparse_ok {
            0
        } else {
            materialize_all_pending_sparse(
                &mut sink,
                &self.header.layout,
                self.codec.as_ref(),
                &self.params,
                self.cache.sparse_policy(),
            )?
        };

        let dir = sink.directory();
        let mut flags = self.header.flags & !(FLAG_BLOCK_ORDER_ROW_MAJOR | FLAG_BLOCK_LEADER_TRAILER);
        if dir.holds(LayoutGuarantee::RowMajorBlockOrder) {
            flags |= FLAG_BLOCK_ORDER_ROW_MAJOR;
        }
        if dir.holds(LayoutGuarantee::BlockFraming) {
            flags |= FLAG_BLOCK_LEADER_TRAILER;
        }
        let holes = dir.holes().len() as u64;
        let layout_downgraded = dir.layout_downgraded();
        self.header.flags = flags;

        let store = sink.writer_mut().store_mut();
        store.write_index_and_header(&mut self.header)?;
        let summary = CloseSummary {
            block_count: self.header.layout.block_count(),
            filled_at_close,
            holes,
            layout_downgraded,
            file_size: store.end_of_file(),
        };
        info!(
            dataset = %sink.label(),
            blocks = summary.block_count,
            filled = summary.filled_at_close,
            holes = summary.holes,
            downgraded = summary.layout_downgraded,
            "closed raster"
        );
        Ok(summary)
    }
}

impl Drop for RasterWriter {
    fn drop(&mut self) {
        if self.closed || self.is_poisoned() {
            return;
        }
        self.closed = true;
        if let Err(err) = self.finalize() {
            error!(
                dataset = %self.sink.lock().label(),
                error = %err,
                "failed to finalize raster on drop"
            );
        }
    }
}
