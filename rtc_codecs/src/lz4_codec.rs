use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use rtc_core::codec::{Codec, CodecParams};
use rtc_core::format::CODEC_LZ4;

/// LZ4 block codec. Fastest to decode of the bundled codecs; the block size
/// is prepended to every payload.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn id(&self) -> u16 {
        CODEC_LZ4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn encode_block(&self, raw: &[u8], _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        Ok(compress_prepend_size(raw))
    }

    fn decode_block(&self, encoded: &[u8], _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        decompress_size_prepended(encoded).map_err(|e| anyhow::anyhow!("lz4 decompress error: {}", e))
    }
}
