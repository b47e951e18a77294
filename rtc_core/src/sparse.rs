//! Deciding when an all-background block may stay a hole, and filling the
//! remaining holes at close.

use std::collections::HashMap;

use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

use crate::codec::{Codec, CodecClass, CodecParams};
use crate::error::Result;
use crate::layout::{RasterLayout, SampleType};
use crate::sink::BlockSink;

/// Background comparison for one dataset.
#[derive(Debug, Clone)]
pub struct SparseBlockPolicy {
    enabled: bool,
    sample_type: SampleType,
    block_width: u32,
    background: Option<f64>,
    /// Encoded background sample.
    pattern: Vec<u8>,
}

impl SparseBlockPolicy {
    pub fn new(layout: &RasterLayout, enabled: bool, background: Option<f64>) -> Self {
        Self {
            enabled,
            sample_type: layout.sample_type,
            block_width: layout.block_width,
            background,
            pattern: layout.sample_type.encode_value(background.unwrap_or(0.0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn background(&self) -> Option<f64> {
        self.background
    }

    /// Whether a zero-filled region reads back as background.
    pub fn background_is_zero(&self) -> bool {
        self.pattern.iter().all(|&b| b == 0)
    }

    /// Exact compare for integers; floats compare numerically with NaN
    /// matching NaN.
    fn sample_matches(&self, sample: &[u8]) -> bool {
        if self.sample_type.is_float() {
            let value = self.sample_type.decode_float(sample);
            let bg = self.background.unwrap_or(0.0);
            if bg.is_nan() {
                value.is_nan()
            } else {
                value == bg
            }
        } else {
            sample == self.pattern.as_slice()
        }
    }

    /// True when every sample of the valid region equals the background.
    pub fn is_background(
        &self,
        buffer: &[u8],
        valid_width: u32,
        valid_height: u32,
        component_count: usize,
    ) -> bool {
        let sample = self.sample_type.size();
        let pixel = sample * component_count;
        let row_bytes = self.block_width as usize * pixel;
        let valid_bytes = valid_width as usize * pixel;

        match buffer.get(..sample) {
            Some(first) if self.sample_matches(first) => {}
            _ => return false,
        }
        (0..valid_height as usize).all(|row| {
            let start = row * row_bytes;
            match buffer.get(start..start + valid_bytes) {
                Some(valid) => valid.chunks_exact(sample).all(|s| self.sample_matches(s)),
                None => false,
            }
        })
    }

    /// True only if skipping is on, the block has never been materialized,
    /// and its valid region is entirely background.
    pub fn should_skip(
        &self,
        buffer: &[u8],
        valid_width: u32,
        valid_height: u32,
        component_count: usize,
        materialized: bool,
    ) -> bool {
        self.enabled
            && !materialized
            && self.is_background(buffer, valid_width, valid_height, component_count)
    }

    pub fn blank_block(&self, len: usize) -> Vec<u8> {
        let mut block = vec![0u8; len];
        fill_background(&mut block, self.sample_type, self.background);
        block
    }
}

/// Fill `dst` with the background value encoded as `sample_type`.
pub fn fill_background(dst: &mut [u8], sample_type: SampleType, background: Option<f64>) {
    let pattern = sample_type.encode_value(background.unwrap_or(0.0));
    if pattern.iter().all(|&b| b == 0) {
        dst.fill(0);
        return;
    }
    for chunk in dst.chunks_exact_mut(pattern.len()) {
        chunk.copy_from_slice(&pattern);
    }
}

/// Write every still-unmaterialized block in ascending id order.
///
/// Blank blocks are encoded once per distinct raw length and reused. With the
/// store codec and a zero background, only the first hole is written; the
/// rest are materialized by growing the file.
///
/// Returns the number of blocks materialized.
pub fn materialize_all_pending_sparse(
    sink: &mut BlockSink,
    layout: &RasterLayout,
    codec: &dyn Codec,
    params: &CodecParams,
    policy: &SparseBlockPolicy,
) -> Result<u64> {
    let holes = sink.directory().holes();
    if holes.is_empty() {
        return Ok(0);
    }
    let zero_extend = codec.class() == CodecClass::Store && policy.background_is_zero();
    debug!(
        dataset = %sink.label(),
        holes = holes.len(),
        zero_extend,
        "materializing sparse blocks"
    );

    let mut encoded_by_len: HashMap<usize, Vec<u8>> = HashMap::new();
    let mut zero_checksums: HashMap<usize, u64> = HashMap::new();
    for (n, &id) in holes.iter().enumerate() {
        let geometry = layout.geometry(id)?;
        let raw_len = geometry.encoded_rows as usize * layout.row_bytes();

        if zero_extend && n > 0 {
            let checksum = *zero_checksums
                .entry(raw_len)
                .or_insert_with(|| xxh3_64(&vec![0u8; raw_len]));
            sink.write_zeroed(id, raw_len as u64, checksum)?;
            continue;
        }

        if !encoded_by_len.contains_key(&raw_len) {
            let blank = policy.blank_block(raw_len);
            match codec.encode_block(&blank, &params.with_rows(geometry.encoded_rows)) {
                Ok(encoded) => {
                    encoded_by_len.insert(raw_len, encoded);
                }
                // The sink poisons the dataset and reports the codec error.
                Err(source) => return sink.commit(id, Err(source)).map(|()| 0),
            }
        }
        if let Some(encoded) = encoded_by_len.get(&raw_len) {
            sink.commit(id, Ok(encoded.clone()))?;
        }
    }
    info!(dataset = %sink.label(), blocks = holes.len(), "filled empty blocks");
    Ok(holes.len() as u64)
}
