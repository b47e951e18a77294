use crate::layout::{RasterLayout, SampleType};

/// Broad behaviour of a codec, as far as padding and pooling care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecClass {
    /// Bytes are stored verbatim.
    Store,
    /// General-purpose lossless compressor.
    Lossless,
    /// Lossy transform over fixed-size blocks; sharp edges in padding cost
    /// quality in the valid region.
    FixedBlockLossy,
    /// Float-aware codec that is sensitive to non-finite samples.
    FloatSensitive,
}

/// Parameters snapshotted into every compression job.
///
/// `predictor` and `extra_channels` are not interpreted by the engine; they
/// are forwarded to the codec untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParams {
    pub sample_type: SampleType,
    /// Samples per pixel inside the block buffer.
    pub components: usize,
    /// Pixels per row.
    pub width: u32,
    /// Rows present in the raw buffer.
    pub rows: u32,
    pub predictor: u16,
    pub extra_channels: Vec<u16>,
}

impl CodecParams {
    pub fn for_layout(layout: &RasterLayout, predictor: u16) -> Self {
        Self {
            sample_type: layout.sample_type,
            components: layout.components_per_block(),
            width: layout.block_width,
            rows: layout.block_height,
            predictor,
            extra_channels: Vec::new(),
        }
    }

    /// Copy with the row count of one particular block.
    pub fn with_rows(&self, rows: u32) -> Self {
        Self {
            rows,
            ..self.clone()
        }
    }

    /// Raw byte length implied by these parameters.
    pub fn raw_len(&self) -> usize {
        self.width as usize * self.rows as usize * self.components * self.sample_type.size()
    }
}

/// Core compression abstraction.
///
/// Each `Codec` implementation:
/// - Is identified by a stable numeric `id()` stored in the RTC1 header.
/// - Must encode/decode blocks independently, with no cross-block state, so
///   it can run on any worker thread.
pub trait Codec: Send + Sync {
    /// Stable codec ID stored in the RTC1 file header.
    fn id(&self) -> u16;

    /// Human-readable codec name for CLI display.
    fn name(&self) -> &'static str;

    fn class(&self) -> CodecClass {
        CodecClass::Lossless
    }

    /// Whether blocks may be encoded on a worker and written later.
    fn supports_async(&self) -> bool {
        true
    }

    /// Legacy editions of some float codecs reject non-finite samples when
    /// several channels are interleaved in one block.
    fn rejects_non_finite_interleaved(&self) -> bool {
        false
    }

    /// Encode one block. An empty result is treated as a failure.
    fn encode_block(&self, raw: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>>;

    /// Decode one block back to `params.raw_len()` bytes.
    fn decode_block(&self, encoded: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>>;
}
