//! Horizontal differencing (predictor 2) over little-endian samples.
//!
//! Each sample is replaced by its difference to the same component of the
//! previous pixel in the row, with wrapping arithmetic at the sample width.

use rtc_core::codec::CodecParams;

pub const PREDICTOR_HORIZONTAL: u16 = 2;

fn read(bytes: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(b)
}

fn write(bytes: &mut [u8], value: u64) {
    let n = bytes.len();
    bytes.copy_from_slice(&value.to_le_bytes()[..n]);
}

fn mask(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

fn rows<'a>(data: &'a mut [u8], params: &CodecParams) -> impl Iterator<Item = &'a mut [u8]> {
    let row_bytes = params.width as usize * params.components * params.sample_type.size();
    data.chunks_exact_mut(row_bytes.max(1))
}

/// Replace samples with horizontal differences, in place.
pub fn encode(data: &mut [u8], params: &CodecParams) {
    let size = params.sample_type.size();
    let stride = params.components * size;
    let m = mask(size);
    for row in rows(data, params) {
        // Walk backwards so every difference uses the original left neighbour.
        let mut at = row.len();
        while at >= stride + size {
            at -= size;
            let left = read(&row[at - stride..at - stride + size]);
            let here = read(&row[at..at + size]);
            write(&mut row[at..at + size], here.wrapping_sub(left) & m);
        }
    }
}

/// Undo [`encode`], in place.
pub fn decode(data: &mut [u8], params: &CodecParams) {
    let size = params.sample_type.size();
    let stride = params.components * size;
    let m = mask(size);
    for row in rows(data, params) {
        let mut at = stride;
        while at + size <= row.len() {
            let left = read(&row[at - stride..at - stride + size]);
            let here = read(&row[at..at + size]);
            write(&mut row[at..at + size], here.wrapping_add(left) & m);
            at += size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtc_core::{RasterLayout, SampleType};

    #[test]
    fn differencing_is_reversible_and_flattens_ramps() {
        let layout = RasterLayout::tiled(4, 2, 4, 2)
            .with_bands(2)
            .with_sample_type(SampleType::U16);
        let params = CodecParams::for_layout(&layout, PREDICTOR_HORIZONTAL);
        let samples: [u16; 16] = [10, 500, 11, 400, 12, 300, 13, 200, 0, 0, 65535, 1, 0, 2, 1, 3];
        let original: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let mut data = original.clone();
        encode(&mut data, &params);
        let diffs: Vec<u16> = data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(&diffs[..8], &[10, 500, 1, 65436, 1, 65436, 1, 65436]);

        decode(&mut data, &params);
        assert_eq!(data, original);
    }
}
