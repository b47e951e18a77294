//! Edge padding for blocks clipped by the raster boundary.

use crate::codec::{Codec, CodecClass};
use crate::error::{Error, Result};
use crate::layout::{RasterLayout, SampleType};

/// What goes into the margin beyond the valid region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadPolicy {
    Zero,
    /// Repeat the last valid column rightwards and the last valid row downwards.
    Replicate,
    /// Not-a-number samples; integer types fall back to zero.
    Nan,
}

impl PadPolicy {
    pub fn for_codec(codec: &dyn Codec, layout: &RasterLayout) -> Self {
        match codec.class() {
            CodecClass::FixedBlockLossy => PadPolicy::Replicate,
            CodecClass::FloatSensitive if layout.sample_type.is_float() => {
                if codec.rejects_non_finite_interleaved() && layout.components_per_block() > 1 {
                    PadPolicy::Zero
                } else {
                    PadPolicy::Nan
                }
            }
            _ => PadPolicy::Zero,
        }
    }
}

/// Fixed dimensions of one block buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockShape {
    pub width: u32,
    pub height: u32,
    pub components: usize,
    pub sample_type: SampleType,
}

impl BlockShape {
    pub fn of(layout: &RasterLayout) -> Self {
        Self {
            width: layout.block_width,
            height: layout.block_height,
            components: layout.components_per_block(),
            sample_type: layout.sample_type,
        }
    }

    fn pixel_bytes(&self) -> usize {
        self.components * self.sample_type.size()
    }

    fn row_bytes(&self) -> usize {
        self.width as usize * self.pixel_bytes()
    }
}

/// Fill everything outside `valid_width × valid_height` in `buffer`.
///
/// Only bytes of the single block buffer are touched; the valid region is
/// read but never modified.
pub fn pad_edges(
    buffer: &mut [u8],
    shape: BlockShape,
    valid_width: u32,
    valid_height: u32,
    policy: PadPolicy,
) -> Result<()> {
    let row_bytes = shape.row_bytes();
    let expected = row_bytes * shape.height as usize;
    if buffer.len() != expected {
        return Err(Error::BufferSize {
            expected,
            got: buffer.len(),
        });
    }
    let valid_width = valid_width.min(shape.width) as usize;
    let valid_height = valid_height.min(shape.height) as usize;
    if valid_width == shape.width as usize && valid_height == shape.height as usize {
        return Ok(());
    }

    let pixel = shape.pixel_bytes();
    let valid_row_bytes = valid_width * pixel;
    let fill = fill_pattern(shape, policy);

    for row in buffer.chunks_exact_mut(row_bytes).take(valid_height) {
        let (valid, margin) = row.split_at_mut(valid_row_bytes);
        match policy {
            PadPolicy::Replicate if valid_width > 0 => {
                let last = &valid[valid_row_bytes - pixel..];
                for px in margin.chunks_exact_mut(pixel) {
                    px.copy_from_slice(last);
                }
            }
            _ => fill_with(margin, &fill),
        }
    }

    let (valid_rows, below) = buffer.split_at_mut(valid_height * row_bytes);
    match policy {
        PadPolicy::Replicate if valid_height > 0 => {
            let last = &valid_rows[(valid_height - 1) * row_bytes..];
            for row in below.chunks_exact_mut(row_bytes) {
                row.copy_from_slice(last);
            }
        }
        _ => fill_with(below, &fill),
    }
    Ok(())
}

/// Bytes of one sample used for non-replicating policies.
fn fill_pattern(shape: BlockShape, policy: PadPolicy) -> Vec<u8> {
    match (policy, shape.sample_type) {
        (PadPolicy::Nan, SampleType::F32) => f32::NAN.to_le_bytes().to_vec(),
        (PadPolicy::Nan, SampleType::F64) => f64::NAN.to_le_bytes().to_vec(),
        _ => vec![0u8; shape.sample_type.size()],
    }
}

fn fill_with(dst: &mut [u8], pattern: &[u8]) {
    for chunk in dst.chunks_exact_mut(pattern.len()) {
        chunk.copy_from_slice(pattern);
    }
}
