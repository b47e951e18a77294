/// Integration tests: write rasters through `RasterWriter`, read them back
/// with `Reader`, and check what ended up on disk.
///
/// Covered:
///  - round trips of tiles and strips, synchronous and pooled
///  - edge padding per codec class
///  - sparse holes and their materialization at close
///  - update in place vs. at end of file, and the layout downgrade it causes
///  - leader/trailer framing
///  - a pool shared by an image and its mask
///  - poisoning after a codec failure
///  - finalizing a writer that is dropped without close
use std::sync::Arc;

use rtc_codecs::{QuantizeCodec, ShuffleZstdCodec, StoreCodec, ZstdCodec};
use rtc_core::{
    Codec, CodecParams, CompressionJobPool, Error, RasterLayout, RasterWriter, Reader,
    SampleType, WriterOptions,
};

/// Generate `len` deterministic bytes using a simple LCG.
fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

// ── helpers ───────────────────────────────────────────────────────────────

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("rtc_test_{}.rtc", name))
}

fn options(pairs: &[(&str, &str)]) -> WriterOptions {
    WriterOptions::from_pairs(pairs.iter().copied()).unwrap()
}

fn zstd() -> Arc<dyn Codec> {
    Arc::new(ZstdCodec::default())
}

/// Copy the valid region of block `id` out of a pixel-interleaved raster.
fn fill_from_raster(raster: &[u8], layout: &RasterLayout, id: u64, dst: &mut [u8]) {
    let g = layout.geometry(id).unwrap();
    let pixel = layout.pixel_bytes();
    let raster_row = layout.width as usize * pixel;
    let x0 = (g.col * layout.block_width) as usize * pixel;
    let y0 = (g.row * layout.block_height) as usize;
    let n = g.valid_width as usize * pixel;
    for r in 0..g.valid_height as usize {
        let src = (y0 + r) * raster_row + x0;
        dst[r * layout.row_bytes()..][..n].copy_from_slice(&raster[src..src + n]);
    }
}

fn assert_valid_region_eq(raster: &[u8], layout: &RasterLayout, id: u64, block: &[u8]) {
    let mut expected = vec![0u8; layout.block_bytes()];
    fill_from_raster(raster, layout, id, &mut expected);
    let g = layout.geometry(id).unwrap();
    let n = g.valid_width as usize * layout.pixel_bytes();
    for r in 0..g.valid_height as usize {
        let at = r * layout.row_bytes();
        assert_eq!(&block[at..at + n], &expected[at..at + n], "block {id} row {r}");
    }
}

fn write_raster(
    name: &str,
    layout: &RasterLayout,
    codec: Arc<dyn Codec>,
    opts: &WriterOptions,
) -> (std::path::PathBuf, Vec<u8>) {
    let path = temp_path(name);
    let raster_len = layout.width as usize * layout.height as usize * layout.pixel_bytes();
    let raster = pseudo_random_bytes(raster_len, 0xDEAD_BEEF);
    let mut w = RasterWriter::create(&path, layout.clone(), codec, opts).unwrap();
    for id in 0..layout.block_count() {
        fill_from_raster(&raster, layout, id, w.block_mut(id).unwrap());
    }
    let summary = w.close().unwrap();
    assert_eq!(summary.block_count, layout.block_count());
    (path, raster)
}

/// Fails on any block whose first byte is 0xEE.
struct PickyCodec;

impl Codec for PickyCodec {
    fn id(&self) -> u16 {
        77
    }
    fn name(&self) -> &'static str {
        "picky"
    }
    fn encode_block(&self, raw: &[u8], _: &CodecParams) -> anyhow::Result<Vec<u8>> {
        if raw.first() == Some(&0xEE) {
            anyhow::bail!("picky codec refuses this block");
        }
        Ok(raw.to_vec())
    }
    fn decode_block(&self, enc: &[u8], _: &CodecParams) -> anyhow::Result<Vec<u8>> {
        Ok(enc.to_vec())
    }
}

// ── round trips ────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_tiles_synchronous_and_pooled() {
    let layout = RasterLayout::tiled(100, 70, 32, 32)
        .with_bands(3)
        .with_sample_type(SampleType::U16);
    for (name, threads) in [("tiles_sync", "0"), ("tiles_pooled", "3")] {
        let opts = options(&[("NUM_THREADS", threads), ("JOB_SLOTS", "2")]);
        let (path, raster) = write_raster(name, &layout, zstd(), &opts);

        let mut r = Reader::open(&path, zstd()).unwrap();
        assert_eq!(r.block_count(), 12);
        assert_eq!(r.hole_count(), 0);
        for id in 0..r.block_count() {
            let block = r.read_block(id).unwrap();
            assert_eq!(block.len(), layout.block_bytes());
            assert_valid_region_eq(&raster, &layout, id, &block);
        }
    }
}

#[test]
fn test_last_strip_encodes_only_valid_rows() {
    let layout = RasterLayout::striped(10, 7, 3);
    let (path, raster) = write_raster("strips", &layout, Arc::new(StoreCodec), &WriterOptions::default());

    let mut r = Reader::open(&path, Arc::new(StoreCodec)).unwrap();
    assert_eq!(r.entries()[2].size, 10, "final strip holds one row");
    assert_eq!(r.raw_size(), 70);
    let last = r.read_block(2).unwrap();
    assert_eq!(&last[..10], &raster[60..70]);
    assert_eq!(&last[10..], &[0u8; 20]);
}

#[test]
fn test_pooled_writes_keep_row_major_order() {
    let layout = RasterLayout::tiled(128, 128, 16, 16);
    let opts = options(&[("COG", "YES"), ("NUM_THREADS", "4")]);
    let path = temp_path("pooled_order");
    let mut w = RasterWriter::create(&path, layout.clone(), zstd(), &opts).unwrap();
    for id in 0..layout.block_count() {
        let data = pseudo_random_bytes(layout.block_bytes(), id);
        w.write_block(id, &data).unwrap();
    }
    w.flush().unwrap();
    assert!(!w.layout_downgraded());
    let summary = w.close().unwrap();
    assert!(!summary.layout_downgraded);

    let mut r = Reader::open(&path, zstd()).unwrap();
    let offsets: Vec<u64> = r.entries().iter().map(|e| e.offset).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]), "blocks out of order");
    assert!(r.verify_framing().unwrap().is_empty());
    assert!(!r.is_known_incompatible());
}

#[test]
fn test_cog_store_writes_empty_blocks_in_order() {
    let layout = RasterLayout::tiled(8, 4, 4, 4);
    for threads in ["0", "2"] {
        let path = temp_path(&format!("cog_store_empty_{threads}"));
        let opts = options(&[("COG", "YES"), ("NUM_THREADS", threads)]);
        let mut w = RasterWriter::create(&path, layout.clone(), Arc::new(StoreCodec), &opts).unwrap();
        w.write_block(0, &[0u8; 16]).unwrap();
        w.write_block(1, &[7u8; 16]).unwrap();
        let summary = w.close().unwrap();
        assert_eq!(summary.filled_at_close, 0, "threads {threads}");
        assert!(!summary.layout_downgraded, "threads {threads}");

        let mut r = Reader::open(&path, Arc::new(StoreCodec)).unwrap();
        assert!(r.entries()[0].offset < r.entries()[1].offset, "threads {threads}");
        assert!(!r.is_known_incompatible());
        assert!(r.verify_framing().unwrap().is_empty());
        assert_eq!(r.read_block(0).unwrap(), vec![0u8; 16]);
        assert_eq!(r.read_block(1).unwrap(), vec![7u8; 16]);
    }
}

#[test]
fn test_resident_block_is_visible_before_flush() {
    let layout = RasterLayout::tiled(8, 8, 4, 4);
    let mut w = RasterWriter::create(temp_path("resident"), layout, zstd(), &WriterOptions::default()).unwrap();
    w.block_mut(0).unwrap().fill(5);
    assert_eq!(w.read_block(0).unwrap(), vec![5u8; 16]);
    assert!(w.is_block_available(0).unwrap());
    assert!(!w.is_block_available(1).unwrap());
    assert!(!w.location(0).unwrap().is_materialized());

    w.flush().unwrap();
    assert!(w.location(0).unwrap().is_materialized());
    assert_eq!(w.read_block(0).unwrap(), vec![5u8; 16]);
    assert!(matches!(w.read_block(4), Err(Error::BlockOutOfRange { id: 4, count: 4 })));
}

// ── padding ────────────────────────────────────────────────────────────────

#[test]
fn test_lossy_codec_replicates_edges() {
    let layout = RasterLayout::tiled(6, 6, 4, 4);
    let codec: Arc<dyn Codec> = Arc::new(QuantizeCodec::default());
    let path = temp_path("replicate");
    let mut w = RasterWriter::create(&path, layout, codec.clone(), &WriterOptions::default()).unwrap();
    // Block 3 keeps a 2x2 valid corner.
    let block = w.block_mut(3).unwrap();
    block[..2].copy_from_slice(&[100, 104]);
    block[4..6].copy_from_slice(&[108, 112]);
    w.close().unwrap();

    let mut r = Reader::open(&path, codec).unwrap();
    #[rustfmt::skip]
    let expected = vec![
        100, 104, 104, 104,
        108, 112, 112, 112,
        108, 112, 112, 112,
        108, 112, 112, 112,
    ];
    assert_eq!(r.read_block(3).unwrap(), expected);
}

fn float_margin(name: &str, codec: ShuffleZstdCodec, bands: u16) -> Vec<f32> {
    let layout = RasterLayout::tiled(3, 3, 2, 2)
        .with_bands(bands)
        .with_sample_type(SampleType::F32);
    let codec: Arc<dyn Codec> = Arc::new(codec);
    let path = temp_path(name);
    let mut w = RasterWriter::create(&path, layout, codec.clone(), &WriterOptions::default()).unwrap();
    for s in w.block_mut(3).unwrap().chunks_exact_mut(4) {
        s.copy_from_slice(&1.5f32.to_le_bytes());
    }
    w.close().unwrap();

    let mut r = Reader::open(&path, codec).unwrap();
    r.read_block(3)
        .unwrap()
        .chunks_exact(4)
        .map(|s| f32::from_le_bytes([s[0], s[1], s[2], s[3]]))
        .collect()
}

#[test]
fn test_float_codec_pads_with_nan_unless_legacy_interleaved() {
    let single = float_margin("nan_single", ShuffleZstdCodec::default(), 1);
    assert_eq!(single[0], 1.5);
    assert!(single[1..].iter().all(|v| v.is_nan()));

    let interleaved = float_margin("nan_interleaved", ShuffleZstdCodec::default(), 2);
    assert_eq!(&interleaved[..2], &[1.5, 1.5]);
    assert!(interleaved[2..].iter().all(|v| v.is_nan()));

    let legacy = float_margin("zero_legacy", ShuffleZstdCodec::legacy(), 2);
    assert_eq!(&legacy[..2], &[1.5, 1.5]);
    assert!(legacy[2..].iter().all(|&v| v == 0.0));
}

// ── sparse blocks ──────────────────────────────────────────────────────────

#[test]
fn test_sparse_ok_keeps_background_blocks_as_holes() {
    let layout = RasterLayout::tiled(8, 8, 4, 4);
    let path = temp_path("sparse_ok");
    let opts = options(&[("SPARSE_OK", "YES")]);
    let mut w = RasterWriter::create(&path, layout, zstd(), &opts).unwrap();
    w.write_block(0, &[9u8; 16]).unwrap();
    w.write_block(1, &[0u8; 16]).unwrap();
    w.block_mut(2).unwrap();
    w.flush().unwrap();
    assert_eq!(w.location(1).unwrap().size, 0);
    assert_eq!(w.location(2).unwrap().size, 0);

    // A materialized block overwritten with background is still written.
    w.write_block(0, &[0u8; 16]).unwrap();
    w.flush().unwrap();
    assert!(w.location(0).unwrap().is_materialized());

    let summary = w.close().unwrap();
    assert_eq!(summary.holes, 3);
    assert_eq!(summary.filled_at_close, 0);

    let mut r = Reader::open(&path, zstd()).unwrap();
    assert_eq!(r.hole_count(), 3);
    assert_eq!(r.read_block(0).unwrap(), vec![0u8; 16]);
    assert_eq!(r.read_block(3).unwrap(), vec![0u8; 16]);
}

#[test]
fn test_close_fills_holes_once_without_moving_neighbours() {
    let layout = RasterLayout::tiled(8, 8, 4, 4);
    let path = temp_path("materialize");
    let mut w = RasterWriter::create(&path, layout, zstd(), &WriterOptions::default()).unwrap();
    w.write_block(1, &[3u8; 16]).unwrap();
    w.write_block(2, &[4u8; 16]).unwrap();
    w.flush().unwrap();
    let before = [w.location(1).unwrap(), w.location(2).unwrap()];

    let summary = w.close().unwrap();
    assert_eq!(summary.filled_at_close, 2);
    assert_eq!(summary.holes, 0);

    let mut r = Reader::open(&path, zstd()).unwrap();
    assert_eq!(r.entries()[1].offset, before[0].offset);
    assert_eq!(r.entries()[2].offset, before[1].offset);
    assert!(r.entries()[0].offset > before[1].offset);
    assert!(r.entries()[3].offset > r.entries()[0].offset);
    assert_eq!(r.read_block(1).unwrap(), vec![3u8; 16]);
    assert_eq!(r.read_block(3).unwrap(), vec![0u8; 16]);
}

#[test]
fn test_store_codec_zero_extends_holes_and_keeps_framing() {
    let layout = RasterLayout::tiled(16, 4, 4, 4);
    let path = temp_path("zero_extend");
    let opts = options(&[("BLOCK_FRAMING", "YES")]);
    let mut w = RasterWriter::create(&path, layout, Arc::new(StoreCodec), &opts).unwrap();
    w.write_block(1, &[0xAB; 16]).unwrap();
    // All zero: skipped while writing, even without SPARSE_OK.
    w.write_block(2, &[0u8; 16]).unwrap();
    w.flush().unwrap();
    assert_eq!(w.location(2).unwrap().size, 0);
    let summary = w.close().unwrap();
    assert_eq!(summary.filled_at_close, 3);

    let mut r = Reader::open(&path, Arc::new(StoreCodec)).unwrap();
    assert_eq!(r.hole_count(), 0);
    assert!(r.verify_framing().unwrap().is_empty());
    for id in [0, 2, 3] {
        assert_eq!(r.read_block(id).unwrap(), vec![0u8; 16]);
    }
    assert_eq!(r.read_block(1).unwrap(), vec![0xAB; 16]);
}

#[test]
fn test_nodata_background_fills_unwritten_blocks() {
    let layout = RasterLayout::tiled(4, 4, 2, 2).with_sample_type(SampleType::I16);
    let path = temp_path("nodata");
    let opts = options(&[("NODATA", "-9999"), ("SPARSE_OK", "YES")]);
    let mut w = RasterWriter::create(&path, layout, zstd(), &opts).unwrap();
    let fresh = w.block_mut(0).unwrap();
    assert!(fresh.chunks_exact(2).all(|s| i16::from_le_bytes([s[0], s[1]]) == -9999));
    w.close().unwrap();

    let mut r = Reader::open(&path, zstd()).unwrap();
    assert_eq!(r.header.background(), Some(-9999.0));
    assert_eq!(r.hole_count(), 4);
    let block = r.read_block(3).unwrap();
    assert!(block.chunks_exact(2).all(|s| i16::from_le_bytes([s[0], s[1]]) == -9999));
}

// ── updates ────────────────────────────────────────────────────────────────

#[test]
fn test_growing_rewrite_moves_to_end_and_downgrades() {
    let layout = RasterLayout::tiled(64, 64, 32, 32);
    let path = temp_path("update_grow");
    let opts = options(&[("COG", "YES")]);
    let mut w = RasterWriter::create(&path, layout.clone(), zstd(), &opts).unwrap();
    for id in 0..layout.block_count() {
        w.write_block(id, &vec![7u8; layout.block_bytes()]).unwrap();
    }
    w.close().unwrap();
    let old_eof = Reader::peek_header(&path).unwrap().index_offset;

    let noisy = pseudo_random_bytes(layout.block_bytes(), 99);
    let mut w = RasterWriter::open(&path, zstd(), &WriterOptions::default()).unwrap();
    let old = w.location(0).unwrap();
    w.write_block(0, &noisy).unwrap();
    w.flush().unwrap();
    let new = w.location(0).unwrap();
    assert!(new.offset >= old_eof, "{new:?} should be past {old_eof}");
    assert!(new.size > old.size);
    assert!(w.layout_downgraded());
    assert!(w.close().unwrap().layout_downgraded);

    let mut r = Reader::open(&path, zstd()).unwrap();
    assert!(r.is_known_incompatible());
    assert_eq!(r.read_block(0).unwrap(), noisy);
    assert_eq!(r.read_block(1).unwrap(), vec![7u8; layout.block_bytes()]);
    assert!(r.verify_framing().unwrap().is_empty());
}

#[test]
fn test_fitting_rewrite_stays_in_place() {
    let layout = RasterLayout::tiled(64, 32, 32, 32);
    let path = temp_path("update_fit");
    let opts = options(&[("COG", "YES")]);
    let mut w = RasterWriter::create(&path, layout.clone(), zstd(), &opts).unwrap();
    for id in 0..layout.block_count() {
        w.write_block(id, &pseudo_random_bytes(layout.block_bytes(), id + 1)).unwrap();
    }
    w.close().unwrap();

    let mut w = RasterWriter::open(&path, zstd(), &WriterOptions::default()).unwrap();
    let before = w.location(0).unwrap();
    w.write_block(0, &vec![1u8; layout.block_bytes()]).unwrap();
    w.flush().unwrap();
    let after = w.location(0).unwrap();
    assert_eq!(after.offset, before.offset);
    assert!(after.size < before.size);
    assert!(!w.close().unwrap().layout_downgraded);

    let mut r = Reader::open(&path, zstd()).unwrap();
    assert!(!r.is_known_incompatible());
    assert!(r.verify_framing().unwrap().is_empty());
    assert_eq!(r.read_block(0).unwrap(), vec![1u8; layout.block_bytes()]);
}

#[test]
fn test_reopen_then_drop_keeps_file_readable() {
    let layout = RasterLayout::tiled(8, 4, 4, 4);
    let (path, raster) = write_raster("reopen_drop", &layout, zstd(), &WriterOptions::default());
    let closed_len = std::fs::metadata(&path).unwrap().len();

    drop(RasterWriter::open(&path, zstd(), &WriterOptions::default()).unwrap());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), closed_len);
    let mut r = Reader::open(&path, zstd()).unwrap();
    assert_valid_region_eq(&raster, &layout, 0, &r.read_block(0).unwrap());
    assert_valid_region_eq(&raster, &layout, 1, &r.read_block(1).unwrap());
}

#[test]
fn test_dropped_writer_finalizes_pending_update() {
    let layout = RasterLayout::tiled(8, 4, 4, 4);
    let (path, raster) = write_raster("update_drop", &layout, zstd(), &WriterOptions::default());

    let mut w = RasterWriter::open(&path, zstd(), &options(&[("NUM_THREADS", "2")])).unwrap();
    w.write_block(1, &[9u8; 16]).unwrap();
    drop(w);

    let mut r = Reader::open(&path, zstd()).unwrap();
    assert_valid_region_eq(&raster, &layout, 0, &r.read_block(0).unwrap());
    assert_eq!(r.read_block(1).unwrap(), vec![9u8; 16]);
}

#[test]
fn test_open_rejects_wrong_codec() {
    let layout = RasterLayout::tiled(8, 8, 8, 8);
    let (path, _) = write_raster("codec_mismatch", &layout, zstd(), &WriterOptions::default());
    let err = RasterWriter::open(&path, Arc::new(StoreCodec), &WriterOptions::default()).err();
    assert!(matches!(err, Some(Error::Format(msg)) if msg.contains("codec mismatch")));
    assert!(Reader::open(&path, Arc::new(StoreCodec)).is_err());
}

// ── shared pool ────────────────────────────────────────────────────────────

#[test]
fn test_image_and_mask_share_one_pool() {
    let pool = CompressionJobPool::new(2, 3).unwrap();
    let image_layout = RasterLayout::tiled(64, 64, 16, 16).with_bands(3);
    let mask_layout = RasterLayout::tiled(64, 64, 16, 16);
    let opts = WriterOptions::default();

    let image_path = temp_path("shared_image");
    let mask_path = temp_path("shared_mask");
    let mut image =
        RasterWriter::create_with_pool(&image_path, image_layout.clone(), zstd(), &opts, Some(pool.clone()))
            .unwrap();
    let mut mask =
        RasterWriter::create_with_pool(&mask_path, mask_layout.clone(), zstd(), &opts, Some(pool.clone()))
            .unwrap();

    for id in 0..image_layout.block_count() {
        image
            .write_block(id, &pseudo_random_bytes(image_layout.block_bytes(), id))
            .unwrap();
        mask.write_block(id, &vec![(id % 2) as u8 * 255; mask_layout.block_bytes()])
            .unwrap();
        assert!(pool.in_flight() <= pool.slot_count());
    }
    image.close().unwrap();
    mask.close().unwrap();
    assert_eq!(pool.in_flight(), 0);

    let mut r = Reader::open(&image_path, zstd()).unwrap();
    let mut m = Reader::open(&mask_path, zstd()).unwrap();
    for id in 0..image_layout.block_count() {
        assert_eq!(r.read_block(id).unwrap(), pseudo_random_bytes(image_layout.block_bytes(), id));
        assert_eq!(m.read_block(id).unwrap()[0], (id % 2) as u8 * 255);
    }
}

// ── failures ───────────────────────────────────────────────────────────────

#[test]
fn test_codec_failure_poisons_synchronous_writer() {
    let layout = RasterLayout::tiled(8, 8, 4, 4);
    let mut w = RasterWriter::create(temp_path("poison_sync"), layout, Arc::new(PickyCodec), &WriterOptions::default())
        .unwrap();
    w.write_block(0, &[0xEE; 16]).unwrap();
    let err = w.write_block(1, &[1; 16]).unwrap_err();
    assert!(matches!(err, Error::Codec { block: 0, .. }));
    assert!(w.is_poisoned());
    assert!(!w.location(0).unwrap().is_materialized());

    assert!(matches!(w.write_block(2, &[1; 16]), Err(Error::Poisoned(_))));
    assert!(matches!(w.flush(), Err(Error::Poisoned(_))));
    assert!(w.close().is_err());
}

#[test]
fn test_codec_failure_in_pool_surfaces_at_flush() {
    let layout = RasterLayout::tiled(8, 8, 4, 4);
    let opts = options(&[("NUM_THREADS", "2")]);
    let mut w = RasterWriter::create(temp_path("poison_pool"), layout, Arc::new(PickyCodec), &opts).unwrap();
    w.write_block(0, &[0xEE; 16]).unwrap();
    w.write_block(1, &[1; 16]).unwrap();
    assert!(matches!(w.flush(), Err(Error::Poisoned(_))));
    assert!(w.is_poisoned());
    assert!(!w.location(0).unwrap().is_materialized());
    assert!(!w.location(1).unwrap().is_materialized());
}
