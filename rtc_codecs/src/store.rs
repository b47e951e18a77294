use rtc_core::codec::{Codec, CodecClass, CodecParams};
use rtc_core::format::CODEC_STORE;

/// No-op codec: stores blocks verbatim.
///
/// Blocks written with it are never sent to a compression pool unless a
/// layout claim needs them to go through the same queue as compressed ones,
/// and empty blocks at close are filled by growing the file.
pub struct StoreCodec;

impl Codec for StoreCodec {
    fn id(&self) -> u16 {
        CODEC_STORE
    }

    fn name(&self) -> &'static str {
        "store"
    }

    fn class(&self) -> CodecClass {
        CodecClass::Store
    }

    fn encode_block(&self, raw: &[u8], _params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        Ok(raw.to_vec())
    }

    fn decode_block(&self, encoded: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(
            encoded.len() == params.raw_len(),
            "stored block is {} bytes, expected {}",
            encoded.len(),
            params.raw_len()
        );
        Ok(encoded.to_vec())
    }
}
