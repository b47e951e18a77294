use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use crate::codec::{Codec, CodecParams};
use crate::error::{Error, Result};
use crate::format::{
    trailer_of, IndexEntry, Rtc1Header, FLAG_BLOCK_LEADER_TRAILER, FLAG_HAS_CHECKSUM,
    FLAG_KNOWN_INCOMPATIBLE_EDITION, HEADER_SIZE, LEADER_SIZE,
};
use crate::layout::RasterLayout;
use crate::sparse::fill_background;
use crate::store::{read_header, read_index, verify_checksum};

/// Random-access reader for closed RTC1 files.
///
/// # Open sequence
/// 1. Read the 64-byte header (magic, version, codec id, raster layout).
/// 2. Seek to `index_offset` and load the whole block index into RAM.
///
/// # Access pattern
/// [`read_block`](Reader::read_block) seeks straight to one block's payload
/// and decodes only that block. Holes decode to a background-filled block
/// without touching the file.
pub struct Reader {
    file: File,
    pub header: Rtc1Header,
    entries: Vec<IndexEntry>,
    codec: Arc<dyn Codec>,
}

/// What the bytes around one block say about its framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingReport {
    /// Value of the 4-byte leader before the payload.
    pub leader: u32,
    pub leader_matches: bool,
    /// Whether the bytes after the payload repeat its last 4 bytes.
    pub trailer_matches: bool,
}

impl FramingReport {
    pub fn is_consistent(&self) -> bool {
        self.leader_matches && self.trailer_matches
    }
}

impl Reader {
    /// Open an RTC1 file. `codec` must match the codec id in the header; use
    /// `rtc_codecs::codec_by_id(Reader::peek_header(path)?.codec_id)` when
    /// it is not known up front.
    pub fn open(path: impl AsRef<Path>, codec: Arc<dyn Codec>) -> Result<Self> {
        let mut file = File::open(path)?;
        let header = read_header(&mut file)?;
        if header.codec_id != codec.id() {
            return Err(Error::format(format!(
                "codec mismatch: file uses codec {} but provided codec has id {}",
                header.codec_id,
                codec.id()
            )));
        }
        let entries = read_index(&mut file, &header)?;
        Ok(Self {
            file,
            header,
            entries,
            codec,
        })
    }

    /// Read just the header, e.g. to pick a codec.
    pub fn peek_header(path: impl AsRef<Path>) -> Result<Rtc1Header> {
        let mut file = File::open(path)?;
        read_header(&mut file)
    }

    pub fn layout(&self) -> &RasterLayout {
        &self.header.layout
    }

    #[inline]
    pub fn block_count(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    /// A layout guarantee was claimed at creation and later broken by an update.
    pub fn is_known_incompatible(&self) -> bool {
        self.header.has_flag(FLAG_KNOWN_INCOMPATIBLE_EDITION)
    }

    pub fn hole_count(&self) -> u64 {
        self.entries.iter().filter(|e| e.size == 0).count() as u64
    }

    /// Uncompressed bytes of all materialized blocks.
    pub fn raw_size(&self) -> u64 {
        let layout = &self.header.layout;
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.size != 0)
            .map(|(id, _)| layout.encoded_len(id as u64).unwrap_or(0) as u64)
            .sum()
    }

    /// Encoded bytes of all materialized blocks (excluding framing, index, header).
    pub fn compressed_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Compression ratio (raw / compressed).
    pub fn ratio(&self) -> f64 {
        let compressed = self.compressed_size();
        if compressed == 0 {
            return 1.0;
        }
        self.raw_size() as f64 / compressed as f64
    }

    fn entry(&self, id: u64) -> Result<IndexEntry> {
        self.entries
            .get(id as usize)
            .copied()
            .ok_or(Error::BlockOutOfRange {
                id,
                count: self.block_count(),
            })
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Encoded payload of block `id`, checksum-verified, or `None` for a hole.
    pub fn read_encoded(&mut self, id: u64) -> Result<Option<Vec<u8>>> {
        let entry = self.entry(id)?;
        if entry.size == 0 {
            return Ok(None);
        }
        let mut encoded = vec![0u8; entry.size as usize];
        self.read_at(entry.offset, &mut encoded)?;
        if self.header.has_flag(FLAG_HAS_CHECKSUM) {
            verify_checksum(id, &encoded, entry.checksum)?;
        }
        Ok(Some(encoded))
    }

    /// Decode block `id` into a full block buffer.
    pub fn read_block(&mut self, id: u64) -> Result<Vec<u8>> {
        let layout = self.header.layout.clone();
        let mut block = vec![0u8; layout.block_bytes()];
        let background = self.header.background();
        match self.read_encoded(id)? {
            Some(encoded) => {
                let params = CodecParams::for_layout(&layout, self.header.predictor);
                decode_payload(
                    self.codec.as_ref(),
                    &layout,
                    &params,
                    id,
                    &encoded,
                    background,
                    &mut block,
                )?;
            }
            None => fill_background(&mut block, layout.sample_type, background),
        }
        Ok(block)
    }

    /// Inspect the leader and trailer around block `id`. `None` for holes.
    pub fn block_framing(&mut self, id: u64) -> Result<Option<FramingReport>> {
        let entry = self.entry(id)?;
        if entry.size == 0 || entry.offset < HEADER_SIZE + LEADER_SIZE {
            return Ok(None);
        }
        let mut leader = [0u8; LEADER_SIZE as usize];
        self.read_at(entry.offset - LEADER_SIZE, &mut leader)?;
        let leader = u32::from_le_bytes(leader);

        let mut payload = vec![0u8; entry.size as usize];
        self.read_at(entry.offset, &mut payload)?;
        let expected = trailer_of(&payload);
        let mut trailer = vec![0u8; expected.len()];
        let trailer_matches = match self.read_at(entry.offset + entry.size, &mut trailer) {
            Ok(()) => trailer == expected,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(e),
        };
        Ok(Some(FramingReport {
            leader,
            leader_matches: leader as u64 == entry.size,
            trailer_matches,
        }))
    }

    /// Ids of materialized blocks whose framing is inconsistent. Empty when
    /// the file never claimed framing.
    pub fn verify_framing(&mut self) -> Result<Vec<u64>> {
        if !self.header.has_flag(FLAG_BLOCK_LEADER_TRAILER) {
            return Ok(Vec::new());
        }
        let mut broken = Vec::new();
        for id in 0..self.block_count() {
            if let Some(report) = self.block_framing(id)? {
                if !report.is_consistent() {
                    broken.push(id);
                }
            }
        }
        Ok(broken)
    }
}

/// Decode one stored block into `block`, a full-size block buffer.
///
/// Rows past the encoded height (the tail of a short final strip) are filled
/// with the background value.
pub(crate) fn decode_payload(
    codec: &dyn Codec,
    layout: &RasterLayout,
    params: &CodecParams,
    id: u64,
    encoded: &[u8],
    background: Option<f64>,
    block: &mut [u8],
) -> Result<()> {
    let geometry = layout.geometry(id)?;
    let raw = codec
        .decode_block(encoded, &params.with_rows(geometry.encoded_rows))
        .map_err(|source| Error::Codec { block: id, source })?;
    let expected = geometry.encoded_rows as usize * layout.row_bytes();
    if raw.len() != expected {
        return Err(Error::format(format!(
            "block {id} decoded to {} bytes but {expected} were expected",
            raw.len()
        )));
    }
    if block.len() < expected {
        return Err(Error::BufferSize {
            expected,
            got: block.len(),
        });
    }
    let (head, tail) = block.split_at_mut(expected);
    head.copy_from_slice(&raw);
    fill_background(tail, layout.sample_type, background);
    Ok(())
}
