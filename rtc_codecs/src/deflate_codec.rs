use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rtc_core::codec::{Codec, CodecParams};
use rtc_core::format::CODEC_DEFLATE;

use crate::predictor::{self, PREDICTOR_HORIZONTAL};

/// zlib-wrapped deflate, with optional horizontal differencing before
/// compression when the block parameters ask for predictor 2.
pub struct DeflateCodec {
    pub level: u32,
}

impl Default for DeflateCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl Codec for DeflateCodec {
    fn id(&self) -> u16 {
        CODEC_DEFLATE
    }

    fn name(&self) -> &'static str {
        "deflate"
    }

    fn encode_block(&self, raw: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        if params.predictor == PREDICTOR_HORIZONTAL {
            let mut diffed = raw.to_vec();
            predictor::encode(&mut diffed, params);
            encoder.write_all(&diffed)?;
        } else {
            encoder.write_all(raw)?;
        }
        Ok(encoder.finish()?)
    }

    fn decode_block(&self, encoded: &[u8], params: &CodecParams) -> anyhow::Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(params.raw_len());
        ZlibDecoder::new(encoded).read_to_end(&mut raw)?;
        if params.predictor == PREDICTOR_HORIZONTAL {
            predictor::decode(&mut raw, params);
        }
        Ok(raw)
    }
}
