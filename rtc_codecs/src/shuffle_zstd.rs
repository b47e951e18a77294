use rtc_core::codec::{Codec, CodecClass, CodecParams};
use rtc_core::format::CODEC_SHUFFLE_ZSTD;
use rtc_core::SampleType;

/// Float-oriented codec: groups the bytes of every sample by significance
/// (byte shuffle), then compresses with zstd.
///
/// The `legacy` edition refuses blocks that interleave several channels and
/// contain NaN or infinity, so edge padding for it must stay finite.
#[derive(Default)]
pub struct ShuffleZstdCodec {
    pub legacy: bool,
}

impl ShuffleZstdCodec {
    pub fn legacy() -> Self {
        Self { legacy: true }
    }
}

fn has_non_finite(raw: &[u8], sample_type: SampleType) -> bool {
    match sample_type {
        SampleType::F32 => raw
            .chunks_exact(4)
            .any(|s| !f32::from_le_bytes([s[0], s[1], s[2], s[3]]).is_finite()),
        SampleType::F64 => raw.chunks_exact(8).any(|s| {
            let mut b = [0u8; 8];
            b.copy_from_slice(s);
            !f64::from_le_bytes(b).is_finite()
        }),
        _ => false,
    }
}

fn shuffle(raw: &[u8], size: usize) -> Vec<u8> {
    let count = raw.len() / size;
    let mut out = vec![0u8; raw.len()];
    for (i, sample) in raw.chunks_exact(size).enumerate() {
        for (b, &byte) in sample.iter().enumerate() {
            out[b * count + i] = byte;
        }
    }
    out
}

fn unshuffle(shuffled: &[u8], size: usize) -> Vec<u8> {
    let count = shuffled.len() / size;
    let mut out = vec![0u8; shuffled.len()];
    for (i, sample) in out.chunks_exact_mut(size).enumerate() {
        for (b, byte) in sample.iter_mut().enumerate() {
            *byte = shuffled[b * count + i];
        }
    }
    out
}

impl Codec for ShuffleZstdCodec {
    fn id(&self) -> u16 {
        CODEC_SHUFFLE_ZSTD
    }

    fn name(&self) -> &'static str {
        if self.legacy {
            "shuffle-zstd-legacy"
        } else {
            "shuffle-zstd"
        }
    }

    fn class(&self) -> CodecClass {
        CodecClass::FloatSensitive
    }

    fn rejects_non_finite_interleaved(&self) -> bool {
        self.legacy
    }

    fn encode_block(&self, raw: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        if self.legacy && params.components > 1 && has_non_finite(raw, params.sample_type) {
            anyhow::bail!("non-finite samples are not supported in interleaved multi-channel blocks");
        }
        let size = params.sample_type.size();
        anyhow::ensure!(raw.len() % size == 0, "block length {} is not a whole number of samples", raw.len());
        Ok(zstd::bulk::compress(&shuffle(raw, size), 3)?)
    }

    fn decode_block(&self, encoded: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        let shuffled = zstd::bulk::decompress(encoded, params.raw_len())?;
        Ok(unshuffle(&shuffled, params.sample_type.size()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffle_groups_bytes_by_significance() {
        let raw = [1, 2, 3, 4, 5, 6];
        assert_eq!(shuffle(&raw, 2), vec![1, 3, 5, 2, 4, 6]);
        assert_eq!(unshuffle(&shuffle(&raw, 2), 2), raw);
    }
}
