use crate::error::{Error, Result};

/// Storage type of one raster sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl SampleType {
    /// Bytes per sample.
    pub fn size(self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
            SampleType::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleType::F32 | SampleType::F64)
    }

    /// Stable code stored in the RTC1 header.
    pub fn code(self) -> u8 {
        match self {
            SampleType::U8 => 0,
            SampleType::I8 => 1,
            SampleType::U16 => 2,
            SampleType::I16 => 3,
            SampleType::U32 => 4,
            SampleType::I32 => 5,
            SampleType::F32 => 6,
            SampleType::F64 => 7,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => SampleType::U8,
            1 => SampleType::I8,
            2 => SampleType::U16,
            3 => SampleType::I16,
            4 => SampleType::U32,
            5 => SampleType::I32,
            6 => SampleType::F32,
            7 => SampleType::F64,
            other => return Err(Error::format(format!("unknown sample type code {other}"))),
        })
    }

    /// Little-endian encoding of `value` cast to this sample type.
    ///
    /// Integer casts saturate, matching how a no-data value outside the
    /// type's range is clamped.
    pub fn encode_value(self, value: f64) -> Vec<u8> {
        match self {
            SampleType::U8 => vec![value as u8],
            SampleType::I8 => (value as i8).to_le_bytes().to_vec(),
            SampleType::U16 => (value as u16).to_le_bytes().to_vec(),
            SampleType::I16 => (value as i16).to_le_bytes().to_vec(),
            SampleType::U32 => (value as u32).to_le_bytes().to_vec(),
            SampleType::I32 => (value as i32).to_le_bytes().to_vec(),
            SampleType::F32 => (value as f32).to_le_bytes().to_vec(),
            SampleType::F64 => value.to_le_bytes().to_vec(),
        }
    }

    /// Decode one little-endian float sample. Only meaningful for float types.
    pub(crate) fn decode_float(self, bytes: &[u8]) -> f64 {
        match self {
            SampleType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            SampleType::F64 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(b)
            }
            _ => f64::NAN,
        }
    }
}

/// How bands are arranged inside blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanarConfig {
    /// One block holds every band, pixel-interleaved.
    Interleaved,
    /// One block per band; block ids are offset by `band * blocks_per_band`.
    Separate,
}

impl PlanarConfig {
    pub fn code(self) -> u8 {
        match self {
            PlanarConfig::Interleaved => 0,
            PlanarConfig::Separate => 1,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(PlanarConfig::Interleaved),
            1 => Ok(PlanarConfig::Separate),
            other => Err(Error::format(format!("unknown planar configuration {other}"))),
        }
    }
}

/// Geometry of a raster and its block grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterLayout {
    pub width: u32,
    pub height: u32,
    pub block_width: u32,
    pub block_height: u32,
    pub bands: u16,
    pub sample_type: SampleType,
    pub planar: PlanarConfig,
}

/// Where one block sits in the grid and how much of it is inside the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGeometry {
    pub id: u64,
    pub band: u16,
    pub col: u32,
    pub row: u32,
    pub valid_width: u32,
    pub valid_height: u32,
    /// Rows handed to the codec: `valid_height` for strips, `block_height` for tiles.
    pub encoded_rows: u32,
}

impl BlockGeometry {
    /// True when the block is clipped by the right or bottom raster edge.
    pub fn is_partial(&self, layout: &RasterLayout) -> bool {
        self.valid_width < layout.block_width || self.valid_height < layout.block_height
    }
}

impl RasterLayout {
    /// Tiled layout, single band of `U8` until configured otherwise.
    pub fn tiled(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Self {
        Self {
            width,
            height,
            block_width: tile_width,
            block_height: tile_height,
            bands: 1,
            sample_type: SampleType::U8,
            planar: PlanarConfig::Interleaved,
        }
    }

    /// Striped layout: each block spans the full raster width.
    pub fn striped(width: u32, height: u32, rows_per_strip: u32) -> Self {
        Self::tiled(width, height, width, rows_per_strip)
    }

    pub fn with_bands(mut self, bands: u16) -> Self {
        self.bands = bands;
        self
    }

    pub fn with_sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub fn with_planar(mut self, planar: PlanarConfig) -> Self {
        self.planar = planar;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::format("raster dimensions must be non-zero"));
        }
        if self.block_width == 0 || self.block_height == 0 {
            return Err(Error::format("block dimensions must be non-zero"));
        }
        if self.bands == 0 {
            return Err(Error::format("raster must have at least one band"));
        }
        if self.is_strip() && self.block_height > self.height {
            // Legal, but a strip taller than the raster is always partial.
            tracing::debug!(
                rows_per_strip = self.block_height,
                height = self.height,
                "strip height exceeds raster height"
            );
        }
        Ok(())
    }

    /// Strips span the whole raster width; everything else is a tile.
    pub fn is_strip(&self) -> bool {
        self.block_width == self.width
    }

    pub fn blocks_per_row(&self) -> u32 {
        self.width.div_ceil(self.block_width)
    }

    pub fn blocks_per_column(&self) -> u32 {
        self.height.div_ceil(self.block_height)
    }

    pub fn blocks_per_band(&self) -> u64 {
        self.blocks_per_row() as u64 * self.blocks_per_column() as u64
    }

    pub fn block_count(&self) -> u64 {
        match self.planar {
            PlanarConfig::Interleaved => self.blocks_per_band(),
            PlanarConfig::Separate => self.blocks_per_band() * self.bands as u64,
        }
    }

    /// Samples per pixel inside one block buffer.
    pub fn components_per_block(&self) -> usize {
        match self.planar {
            PlanarConfig::Interleaved => self.bands as usize,
            PlanarConfig::Separate => 1,
        }
    }

    pub fn pixel_bytes(&self) -> usize {
        self.components_per_block() * self.sample_type.size()
    }

    pub fn row_bytes(&self) -> usize {
        self.block_width as usize * self.pixel_bytes()
    }

    /// Size of the fixed-capacity block buffer.
    pub fn block_bytes(&self) -> usize {
        self.row_bytes() * self.block_height as usize
    }

    pub fn block_id(&self, band: u16, col: u32, row: u32) -> u64 {
        let in_band = row as u64 * self.blocks_per_row() as u64 + col as u64;
        match self.planar {
            PlanarConfig::Interleaved => in_band,
            PlanarConfig::Separate => band as u64 * self.blocks_per_band() + in_band,
        }
    }

    pub fn check_id(&self, id: u64) -> Result<()> {
        let count = self.block_count();
        if id >= count {
            return Err(Error::BlockOutOfRange { id, count });
        }
        Ok(())
    }

    pub fn geometry(&self, id: u64) -> Result<BlockGeometry> {
        self.check_id(id)?;
        let per_band = self.blocks_per_band();
        let band = (id / per_band) as u16;
        let in_band = id % per_band;
        let col = (in_band % self.blocks_per_row() as u64) as u32;
        let row = (in_band / self.blocks_per_row() as u64) as u32;
        let valid_width = (self.width - col * self.block_width).min(self.block_width);
        let valid_height = (self.height - row * self.block_height).min(self.block_height);
        let encoded_rows = if self.is_strip() {
            valid_height
        } else {
            self.block_height
        };
        Ok(BlockGeometry {
            id,
            band,
            col,
            row,
            valid_width,
            valid_height,
            encoded_rows,
        })
    }

    /// Raw bytes handed to the codec for block `id`.
    pub fn encoded_len(&self, id: u64) -> Result<usize> {
        Ok(self.geometry(id)?.encoded_rows as usize * self.row_bytes())
    }
}
