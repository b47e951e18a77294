use rtc_core::codec::{Codec, CodecParams};
use rtc_core::format::CODEC_ZSTD;

/// Zstandard block codec.
///
/// Each block is compressed independently at the configured level
/// (default: 3), so any block decodes without its neighbours.
pub struct ZstdCodec {
    /// Compression level (1 = fast / larger, 22 = slow / smallest).
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Codec for ZstdCodec {
    fn id(&self) -> u16 {
        CODEC_ZSTD
    }

    fn name(&self) -> &'static str {
        "zstd"
    }

    fn encode_block(&self, raw: &[u8], _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        Ok(zstd::bulk::compress(raw, self.level)?)
    }

    fn decode_block(&self, encoded: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        Ok(zstd::bulk::decompress(encoded, params.raw_len())?)
    }
}
