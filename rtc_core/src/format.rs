use crate::error::{Error, Result};
use crate::layout::{PlanarConfig, RasterLayout, SampleType};

/// Magic bytes for RTC version 1 files: "RTC1\n" followed by 3 null bytes.
pub const MAGIC: &[u8; 8] = b"RTC1\n\x00\x00\x00";

pub const VERSION: u16 = 1;

/// Fixed size of the RTC1 file header in bytes.
///   magic[8] + version:u16 + codec_id:u16 + sample_type:u8 + planar:u8
///   + bands:u16 + width:u32 + height:u32 + block_width:u32 + block_height:u32
///   + predictor:u16 + reserved:u16 + flags:u64 + background:f64
///   + index_offset:u64 + pad[4]
///   = 8 + 2 + 2 + 1 + 1 + 2 + 16 + 2 + 2 + 8 + 8 + 8 + 4 = 64
pub const HEADER_SIZE: u64 = 64;

/// Size of each entry in the block location index.
///   offset:u64 + size:u64 + checksum:u64 = 24
pub const INDEX_ENTRY_SIZE: u64 = 24;

/// Length of the optional block leader and trailer.
pub const LEADER_SIZE: u64 = 4;
pub const TRAILER_SIZE: u64 = 4;

// ── Flags ──────────────────────────────────────────────────────────────────

/// Each index entry carries an xxhash3-64 of the encoded block.
pub const FLAG_HAS_CHECKSUM: u64 = 1 << 0;

/// Blocks were laid out in ascending id order.
pub const FLAG_BLOCK_ORDER_ROW_MAJOR: u64 = 1 << 1;

/// Every block is framed by a u32 LE size leader and a 4-byte repeated trailer.
pub const FLAG_BLOCK_LEADER_TRAILER: u64 = 1 << 2;

/// A layout guarantee above was claimed but later invalidated by an update.
pub const FLAG_KNOWN_INCOMPATIBLE_EDITION: u64 = 1 << 3;

/// `background` holds a no-data value rather than the implicit zero.
pub const FLAG_HAS_BACKGROUND: u64 = 1 << 4;

// ── Codec IDs ──────────────────────────────────────────────────────────────

pub const CODEC_STORE: u16 = 0;
pub const CODEC_ZSTD: u16 = 1;
pub const CODEC_LZ4: u16 = 2;
pub const CODEC_DEFLATE: u16 = 3;
pub const CODEC_QUANTIZE: u16 = 4;
pub const CODEC_SHUFFLE_ZSTD: u16 = 5;

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 64-byte RTC1 file header.
#[derive(Debug, Clone, PartialEq)]
pub struct Rtc1Header {
    pub version: u16,
    pub codec_id: u16,
    pub layout: RasterLayout,
    pub predictor: u16,
    pub flags: u64,
    pub background: f64,
    /// Start of the block location index; zero while the file is being written.
    pub index_offset: u64,
}

impl Rtc1Header {
    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..8].copy_from_slice(MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.codec_id.to_le_bytes());
        buf[12] = self.layout.sample_type.code();
        buf[13] = self.layout.planar.code();
        buf[14..16].copy_from_slice(&self.layout.bands.to_le_bytes());
        buf[16..20].copy_from_slice(&self.layout.width.to_le_bytes());
        buf[20..24].copy_from_slice(&self.layout.height.to_le_bytes());
        buf[24..28].copy_from_slice(&self.layout.block_width.to_le_bytes());
        buf[28..32].copy_from_slice(&self.layout.block_height.to_le_bytes());
        buf[32..34].copy_from_slice(&self.predictor.to_le_bytes());
        // buf[34..36] reserved
        buf[36..44].copy_from_slice(&self.flags.to_le_bytes());
        buf[44..52].copy_from_slice(&self.background.to_le_bytes());
        buf[52..60].copy_from_slice(&self.index_offset.to_le_bytes());
        buf
    }

    /// Deserialize from `HEADER_SIZE` bytes, checking the magic.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        if &buf[..8] != MAGIC {
            return Err(Error::format("invalid RTC magic bytes, not an RTC1 file"));
        }
        let u16_at = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(b)
        };
        let layout = RasterLayout {
            width: u32_at(16),
            height: u32_at(20),
            block_width: u32_at(24),
            block_height: u32_at(28),
            bands: u16_at(14),
            sample_type: SampleType::from_code(buf[12])?,
            planar: PlanarConfig::from_code(buf[13])?,
        };
        layout.validate()?;
        Ok(Self {
            version: u16_at(8),
            codec_id: u16_at(10),
            layout,
            predictor: u16_at(32),
            flags: u64_at(36),
            background: f64::from_bits(u64_at(44)),
            index_offset: u64_at(52),
        })
    }

    pub fn has_flag(&self, flag: u64) -> bool {
        self.flags & flag != 0
    }

    /// Background value, or `None` when the file relies on implicit zero.
    pub fn background(&self) -> Option<f64> {
        self.has_flag(FLAG_HAS_BACKGROUND).then_some(self.background)
    }
}

// ── Block index entry ───────────────────────────────────────────────────────

/// One entry of the location index, persisted at close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte offset of the encoded payload (after any leader).
    pub offset: u64,
    /// Encoded payload length; zero for a sparse hole.
    pub size: u64,
    /// xxhash3-64 of the encoded payload.
    pub checksum: u64,
}

impl IndexEntry {
    pub fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE as usize] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE as usize];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; INDEX_ENTRY_SIZE as usize]) -> Self {
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(b)
        };
        Self {
            offset: u64_at(0),
            size: u64_at(8),
            checksum: u64_at(16),
        }
    }
}

/// Trailer bytes repeated after a framed block: the last 4 bytes of the
/// payload, or the whole payload when it is shorter.
pub fn trailer_of(encoded: &[u8]) -> &[u8] {
    &encoded[encoded.len().saturating_sub(TRAILER_SIZE as usize)..]
}
