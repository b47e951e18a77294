use rtc_core::codec::{Codec, CodecClass, CodecParams};
use rtc_core::format::CODEC_QUANTIZE;

/// Lossy codec over whole fixed-size blocks: clears the low `bits` of every
/// sample, then compresses with zstd.
///
/// Because it always sees full blocks, edge blocks are padded by repeating
/// their last valid row and column so that the margin compresses well and
/// does not bleed into the valid region.
pub struct QuantizeCodec {
    pub bits: u32,
    pub level: i32,
}

impl Default for QuantizeCodec {
    fn default() -> Self {
        Self { bits: 2, level: 3 }
    }
}

impl Codec for QuantizeCodec {
    fn id(&self) -> u16 {
        CODEC_QUANTIZE
    }

    fn name(&self) -> &'static str {
        "quantize"
    }

    fn class(&self) -> CodecClass {
        CodecClass::FixedBlockLossy
    }

    fn encode_block(&self, raw: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        let size = params.sample_type.size();
        anyhow::ensure!(
            self.bits < size as u32 * 8,
            "cannot drop {} bits from {}-byte samples",
            self.bits,
            size
        );
        let keep = !((1u64 << self.bits) - 1);
        let mut quantized = raw.to_vec();
        for sample in quantized.chunks_exact_mut(size) {
            let mut b = [0u8; 8];
            b[..size].copy_from_slice(sample);
            let value = u64::from_le_bytes(b) & keep;
            sample.copy_from_slice(&value.to_le_bytes()[..size]);
        }
        Ok(zstd::bulk::compress(&quantized, self.level)?)
    }

    fn decode_block(&self, encoded: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        Ok(zstd::bulk::decompress(encoded, params.raw_len())?)
    }
}
