use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rtc_codecs::{codec_by_id, codec_by_name};
use rtc_core::{
    fill_background, OptionPair, PlanarConfig, RasterLayout, RasterWriter, Reader, SampleType,
    WriterOptions,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "rtc",
    about = "Tiled raster container: create, inspect, and update RTC1 files block by block",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a raw pixel-interleaved sample file into an RTC1 container
    Create {
        /// Raw samples, row-major, bands interleaved per pixel
        input: PathBuf,
        /// Destination RTC1 file
        output: PathBuf,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        #[arg(long, default_value_t = 1)]
        bands: u16,
        /// u8 | i8 | u16 | i16 | u32 | i32 | f32 | f64
        #[arg(long, default_value = "u8", value_parser = parse_sample_type)]
        sample_type: SampleType,
        /// Tile width and height
        #[arg(long, default_value_t = 256)]
        tile: u32,
        /// Write strips of this many rows instead of tiles
        #[arg(long)]
        strip_rows: Option<u32>,
        /// Store each band in its own blocks
        #[arg(long)]
        separate: bool,
        /// store | zstd | lz4 | deflate | quantize | shuffle-zstd | shuffle-zstd-legacy
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        /// Creation option, repeatable: NUM_THREADS, JOB_SLOTS, SPARSE_OK, COG,
        /// BLOCK_ORDER, BLOCK_FRAMING, NODATA, PREDICTOR
        #[arg(long = "co", value_name = "KEY=VALUE")]
        options: Vec<OptionPair>,
    },
    /// Print header metadata and block index statistics
    Inspect {
        /// RTC1 file to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
        /// Check the leader and trailer around every block
        #[arg(long)]
        verify_framing: bool,
    },
    /// Decode a single block by id
    ReadBlock {
        /// RTC1 file
        file: PathBuf,
        /// Block id to read
        #[arg(short, long)]
        index: u64,
        /// Write raw bytes to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace one block of an existing file in place or at end of file
    RewriteBlock {
        /// RTC1 file to update
        file: PathBuf,
        /// Block id to replace
        #[arg(short, long)]
        index: u64,
        /// Raw block buffer to write (exactly one block long)
        #[arg(long, conflicts_with = "fill")]
        input: Option<PathBuf>,
        /// Fill the block with this sample value
        #[arg(long)]
        fill: Option<f64>,
        /// Update option, repeatable (NUM_THREADS, JOB_SLOTS, SPARSE_OK)
        #[arg(long = "co", value_name = "KEY=VALUE")]
        options: Vec<OptionPair>,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn parse_sample_type(s: &str) -> Result<SampleType, String> {
    Ok(match s.to_ascii_lowercase().as_str() {
        "u8" | "byte" => SampleType::U8,
        "i8" => SampleType::I8,
        "u16" => SampleType::U16,
        "i16" => SampleType::I16,
        "u32" => SampleType::U32,
        "i32" => SampleType::I32,
        "f32" | "float32" => SampleType::F32,
        "f64" | "float64" => SampleType::F64,
        other => return Err(format!("unknown sample type '{other}'")),
    })
}

fn writer_options(pairs: &[OptionPair]) -> anyhow::Result<WriterOptions> {
    Ok(WriterOptions::from_pairs(
        pairs.iter().map(|p| (p.key.as_str(), p.value.as_str())),
    )?)
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn open_reader(file: &PathBuf) -> anyhow::Result<Reader> {
    let header = Reader::peek_header(file).with_context(|| format!("reading header of {:?}", file))?;
    let codec = codec_by_id(header.codec_id)?;
    Ok(Reader::open(file, codec)?)
}

/// Copy the valid region of block `id` out of a full pixel-interleaved raster.
fn copy_block(raster: &[u8], layout: &RasterLayout, id: u64, dst: &mut [u8]) -> anyhow::Result<()> {
    let g = layout.geometry(id)?;
    let size = layout.sample_type.size();
    let bands = layout.bands as usize;
    let x0 = (g.col * layout.block_width) as usize;
    let y0 = (g.row * layout.block_height) as usize;
    let raster_row = layout.width as usize * bands * size;
    let block_row = layout.row_bytes();

    for r in 0..g.valid_height as usize {
        let src_row = &raster[(y0 + r) * raster_row..(y0 + r + 1) * raster_row];
        let dst_row = &mut dst[r * block_row..(r + 1) * block_row];
        match layout.planar {
            PlanarConfig::Interleaved => {
                let n = g.valid_width as usize * bands * size;
                let start = x0 * bands * size;
                dst_row[..n].copy_from_slice(&src_row[start..start + n]);
            }
            PlanarConfig::Separate => {
                for x in 0..g.valid_width as usize {
                    let src = ((x0 + x) * bands + g.band as usize) * size;
                    dst_row[x * size..(x + 1) * size].copy_from_slice(&src_row[src..src + size]);
                }
            }
        }
    }
    Ok(())
}

// ── Subcommand implementations ─────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_create(
    input: PathBuf,
    output: PathBuf,
    width: u32,
    height: u32,
    bands: u16,
    sample_type: SampleType,
    tile: u32,
    strip_rows: Option<u32>,
    separate: bool,
    codec_name: &str,
    options: &[OptionPair],
) -> anyhow::Result<()> {
    let codec = codec_by_name(codec_name)?;
    let options = writer_options(options)?;
    let layout = match strip_rows {
        Some(rows) => RasterLayout::striped(width, height, rows),
        None => RasterLayout::tiled(width, height, tile, tile),
    }
    .with_bands(bands)
    .with_sample_type(sample_type)
    .with_planar(if separate {
        PlanarConfig::Separate
    } else {
        PlanarConfig::Interleaved
    });

    let raster = std::fs::read(&input).with_context(|| format!("opening input file {:?}", input))?;
    let expected = width as usize * height as usize * bands as usize * sample_type.size();
    if raster.len() != expected {
        anyhow::bail!(
            "input is {} bytes but a {}x{}x{} {:?} raster needs {}",
            raster.len(),
            width,
            height,
            bands,
            sample_type,
            expected
        );
    }

    let t0 = Instant::now();
    let mut writer = RasterWriter::create(&output, layout.clone(), codec.clone(), &options)
        .with_context(|| format!("creating output file {:?}", output))?;
    for id in 0..layout.block_count() {
        let block = writer.block_mut(id)?;
        copy_block(&raster, &layout, id, block)?;
    }
    let summary = writer.close()?;
    let elapsed = t0.elapsed();

    eprintln!("  codec       : {}", codec.name());
    eprintln!("  blocks      : {}", summary.block_count);
    eprintln!("  holes       : {}", summary.holes);
    eprintln!("  filled      : {}", summary.filled_at_close);
    eprintln!("  raw size    : {}", human_bytes(expected as u64));
    eprintln!("  file size   : {}", human_bytes(summary.file_size));
    eprintln!(
        "  ratio       : {:.2}x",
        expected as f64 / summary.file_size.max(1) as f64
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf, show_blocks: bool, verify_framing: bool) -> anyhow::Result<()> {
    let mut reader = open_reader(&file)?;
    let file_size = std::fs::metadata(&file)?.len();
    let layout = reader.layout().clone();

    println!("=== RTC1 File: {:?} ===", file);
    println!();
    println!("  format version : {}", reader.header.version);
    println!("  codec          : {} (id={})", reader.codec().name(), reader.header.codec_id);
    println!(
        "  raster         : {}x{}, {} band(s) of {:?}, {:?}",
        layout.width, layout.height, layout.bands, layout.sample_type, layout.planar
    );
    println!(
        "  blocks         : {} of {}x{} ({})",
        reader.block_count(),
        layout.block_width,
        layout.block_height,
        if layout.is_strip() { "strips" } else { "tiles" }
    );
    println!("  holes          : {}", reader.hole_count());
    println!("  raw size       : {}", human_bytes(reader.raw_size()));
    println!("  compressed     : {}", human_bytes(reader.compressed_size()));
    println!("  file on disk   : {}", human_bytes(file_size));
    println!("  ratio          : {:.2}x", reader.ratio());
    println!("  flags          : 0x{:016x}", reader.header.flags);
    if let Some(bg) = reader.header.background() {
        println!("  nodata         : {}", bg);
    }
    if reader.is_known_incompatible() {
        println!("  layout         : KNOWN INCOMPATIBLE EDITION (claims broken by an update)");
    }

    if show_blocks {
        println!();
        println!(
            "  {:>8}  {:>14}  {:>12}  {:>16}",
            "block", "file offset", "size", "checksum"
        );
        println!("  {}", "-".repeat(56));
        for (i, e) in reader.entries().iter().enumerate() {
            if e.size == 0 {
                println!("  {:>8}  {:>14}  {:>12}  {:>16}", i, "-", "hole", "-");
            } else {
                println!(
                    "  {:>8}  {:>14}  {:>12}  {:016x}",
                    i,
                    e.offset,
                    human_bytes(e.size),
                    e.checksum
                );
            }
        }
    }

    if verify_framing {
        let broken = reader.verify_framing()?;
        println!();
        if broken.is_empty() {
            println!("  framing        : ok");
        } else {
            println!("  framing        : {} block(s) inconsistent: {:?}", broken.len(), broken);
        }
    }

    Ok(())
}

fn run_read_block(file: PathBuf, index: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut reader = open_reader(&file)?;
    let entry = *reader
        .entries()
        .get(index as usize)
        .with_context(|| format!("block {} out of range (total {})", index, reader.block_count()))?;
    if entry.size == 0 {
        eprintln!("block {} is a hole; returning background", index);
    } else {
        eprintln!(
            "seeking to block {} (offset {} bytes from file start)...",
            index, entry.offset
        );
    }

    let t0 = Instant::now();
    let raw = reader.read_block(index)?;
    let elapsed = t0.elapsed();
    eprintln!(
        "  decoded {} in {:.3}ms",
        human_bytes(raw.len() as u64),
        elapsed.as_secs_f64() * 1000.0
    );

    match output {
        Some(path) => {
            std::fs::write(&path, &raw)?;
            eprintln!("  written to {:?}", path);
        }
        None => {
            let preview = &raw[..raw.len().min(256)];
            println!("--- block {} ({} bytes, first {} shown) ---", index, raw.len(), preview.len());
            for (i, chunk) in preview.chunks(16).enumerate() {
                print!("  {:04x}  ", i * 16);
                for b in chunk {
                    print!("{:02x} ", b);
                }
                println!();
            }
            if raw.len() > 256 {
                println!("  ... ({} bytes remaining not shown)", raw.len() - 256);
            }
        }
    }
    Ok(())
}

fn run_rewrite_block(
    file: PathBuf,
    index: u64,
    input: Option<PathBuf>,
    fill: Option<f64>,
    options: &[OptionPair],
) -> anyhow::Result<()> {
    let header = Reader::peek_header(&file).with_context(|| format!("reading header of {:?}", file))?;
    let codec = codec_by_id(header.codec_id)?;
    let options = writer_options(options)?;
    let mut writer = RasterWriter::open(&file, codec, &options)
        .with_context(|| format!("opening {:?} for update", file))?;

    let before = writer.location(index)?;
    let data = match (input, fill) {
        (Some(path), _) => std::fs::read(&path).with_context(|| format!("reading block data {:?}", path))?,
        (None, Some(value)) => {
            let mut block = vec![0u8; writer.layout().block_bytes()];
            fill_background(&mut block, writer.layout().sample_type, Some(value));
            block
        }
        (None, None) => anyhow::bail!("either --input or --fill is required"),
    };
    writer.write_block(index, &data)?;
    writer.flush()?;
    let after = writer.location(index)?;
    let summary = writer.close()?;

    eprintln!("  block       : {}", index);
    eprintln!("  before      : offset {} size {}", before.offset, before.size);
    eprintln!("  after       : offset {} size {}", after.offset, after.size);
    eprintln!(
        "  placement   : {}",
        if before.is_materialized() && before.offset == after.offset {
            "in place"
        } else {
            "end of file"
        }
    );
    eprintln!("  downgraded  : {}", summary.layout_downgraded);
    eprintln!("  file size   : {}", human_bytes(summary.file_size));
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Create {
            input,
            output,
            width,
            height,
            bands,
            sample_type,
            tile,
            strip_rows,
            separate,
            codec,
            options,
        } => run_create(
            input,
            output,
            width,
            height,
            bands,
            sample_type,
            tile,
            strip_rows,
            separate,
            &codec,
            &options,
        ),
        Commands::Inspect {
            file,
            blocks,
            verify_framing,
        } => run_inspect(file, blocks, verify_framing),
        Commands::ReadBlock {
            file,
            index,
            output,
        } => run_read_block(file, index, output),
        Commands::RewriteBlock {
            file,
            index,
            input,
            fill,
            options,
        } => run_rewrite_block(file, index, input, fill, &options),
    }
}
