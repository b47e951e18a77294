mod deflate_codec;
mod lz4_codec;
pub mod predictor;
mod quantize;
mod shuffle_zstd;
mod store;
mod zstd_codec;

pub use deflate_codec::DeflateCodec;
pub use lz4_codec::Lz4Codec;
pub use quantize::QuantizeCodec;
pub use shuffle_zstd::ShuffleZstdCodec;
pub use store::StoreCodec;
pub use zstd_codec::ZstdCodec;

use rtc_core::format::{
    CODEC_DEFLATE, CODEC_LZ4, CODEC_QUANTIZE, CODEC_SHUFFLE_ZSTD, CODEC_STORE, CODEC_ZSTD,
};
use rtc_core::Codec;
use std::sync::Arc;

/// Names accepted by [`codec_by_name`].
pub const CODEC_NAMES: &[&str] = &[
    "store",
    "zstd",
    "lz4",
    "deflate",
    "quantize",
    "shuffle-zstd",
    "shuffle-zstd-legacy",
];

/// Resolve a codec from its on-disk `codec_id`.
///
/// Called by the CLI when opening an existing RTC1 file, so the reader and
/// updater can be initialized with the right codec automatically.
pub fn codec_by_id(id: u16) -> anyhow::Result<Arc<dyn Codec>> {
    match id {
        CODEC_STORE => Ok(Arc::new(StoreCodec)),
        CODEC_ZSTD => Ok(Arc::new(ZstdCodec::default())),
        CODEC_LZ4 => Ok(Arc::new(Lz4Codec)),
        CODEC_DEFLATE => Ok(Arc::new(DeflateCodec::default())),
        CODEC_QUANTIZE => Ok(Arc::new(QuantizeCodec::default())),
        CODEC_SHUFFLE_ZSTD => Ok(Arc::new(ShuffleZstdCodec::default())),
        _ => anyhow::bail!("unknown codec id {}; supported ids are 0..=5", id),
    }
}

/// Resolve a codec from its CLI name.
pub fn codec_by_name(name: &str) -> anyhow::Result<Arc<dyn Codec>> {
    match name {
        "store" => Ok(Arc::new(StoreCodec)),
        "zstd" => Ok(Arc::new(ZstdCodec::default())),
        "lz4" => Ok(Arc::new(Lz4Codec)),
        "deflate" => Ok(Arc::new(DeflateCodec::default())),
        "quantize" => Ok(Arc::new(QuantizeCodec::default())),
        "shuffle-zstd" => Ok(Arc::new(ShuffleZstdCodec::default())),
        "shuffle-zstd-legacy" => Ok(Arc::new(ShuffleZstdCodec::legacy())),
        _ => anyhow::bail!("unknown codec '{}'; choose one of {}", name, CODEC_NAMES.join(", ")),
    }
}
