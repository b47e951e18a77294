use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use xxhash_rust::xxh3::xxh3_64;

use crate::directory::{BlockDirectory, LocationTable};
use crate::error::{Error, Result};
use crate::format::{
    IndexEntry, Rtc1Header, FLAG_HAS_CHECKSUM, FLAG_KNOWN_INCOMPATIBLE_EDITION, HEADER_SIZE,
    INDEX_ENTRY_SIZE,
};

/// Random-access backing file plus the block location table.
///
/// # Layout written
/// ```text
/// [HEADER: 64 bytes placeholder]
/// [BLOCK a] [BLOCK b] ...        ← appended or rewritten in place
/// [INDEX: 24 bytes × block_count]
/// ← seek back to 0, overwrite header with real values
/// ```
/// `end` mirrors the logical end of file; appends always land there.
pub struct BlockStore {
    file: File,
    table: LocationTable,
    end: u64,
}

impl BlockStore {
    /// Create a new store at `path`, overwriting any existing file.
    pub fn create(path: impl AsRef<Path>, block_count: u64) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        // Placeholder header, overwritten in write_index_and_header()
        file.write_all(&[0u8; HEADER_SIZE as usize])?;
        Ok(Self {
            file,
            table: LocationTable::new(block_count),
            end: HEADER_SIZE,
        })
    }

    /// Open an existing store for update.
    ///
    /// New blocks append directly after the existing block data, over the
    /// persisted index. The file is left untouched until the first write, so
    /// an update that never writes keeps a readable file.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Rtc1Header)> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let header = read_header(&mut file)?;
        let entries = read_index(&mut file, &header)?;
        let table = LocationTable::from_entries(
            entries,
            header.has_flag(FLAG_KNOWN_INCOMPATIBLE_EDITION),
        );
        Ok((
            Self {
                file,
                table,
                end: header.index_offset,
            },
            header,
        ))
    }

    pub fn directory(&self) -> &LocationTable {
        &self.table
    }

    pub fn directory_mut(&mut self) -> &mut LocationTable {
        &mut self.table
    }

    pub fn end_of_file(&self) -> u64 {
        self.end
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.end = self.end.max(offset + bytes.len() as u64);
        Ok(())
    }

    /// Append `bytes` at the end of file and return where they start.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let at = self.end;
        self.write_at(at, bytes)?;
        Ok(at)
    }

    /// Grow the file by `len` zero bytes without writing them.
    pub fn extend_zeroed(&mut self, len: u64) -> Result<u64> {
        let at = self.end;
        // Drop stale bytes past the logical end (an old index) before growing.
        self.file.set_len(at)?;
        self.file.set_len(at + len)?;
        self.end = at + len;
        Ok(at)
    }

    /// Encoded payload of block `id`, or `None` for a sparse hole.
    pub fn read_block(&mut self, id: u64) -> Result<Option<Vec<u8>>> {
        let loc = self.table.get_block_location(id);
        if !loc.is_materialized() {
            return Ok(None);
        }
        let mut encoded = vec![0u8; loc.size as usize];
        self.read_at(loc.offset, &mut encoded)?;
        verify_checksum(id, &encoded, self.table.checksum(id))?;
        Ok(Some(encoded))
    }

    /// Append the location index and write the final header at offset 0.
    pub fn write_index_and_header(&mut self, header: &mut Rtc1Header) -> Result<()> {
        let mut index = Vec::with_capacity(self.table.entries().len() * INDEX_ENTRY_SIZE as usize);
        for entry in self.table.entries() {
            index.extend_from_slice(&entry.to_bytes());
        }
        header.index_offset = self.append(&index)?;
        self.file.set_len(self.end)?;
        header.flags |= FLAG_HAS_CHECKSUM;
        if self.table.layout_downgraded() {
            header.flags |= FLAG_KNOWN_INCOMPATIBLE_EDITION;
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.sync()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
impl BlockStore {
    /// Store over an existing file opened without write access.
    pub(crate) fn open_read_only(path: impl AsRef<Path>, block_count: u64) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            table: LocationTable::new(block_count),
            end: HEADER_SIZE,
        })
    }
}

pub(crate) fn verify_checksum(id: u64, encoded: &[u8], expected: u64) -> Result<()> {
    let actual = xxh3_64(encoded);
    if actual != expected {
        return Err(Error::Checksum {
            block: id,
            expected,
            actual,
        });
    }
    Ok(())
}

pub(crate) fn read_header(file: &mut File) -> Result<Rtc1Header> {
    let mut buf = [0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf)?;
    let header = Rtc1Header::from_bytes(&buf)?;
    if header.version != 1 {
        return Err(Error::format(format!(
            "unsupported RTC version {} (only version 1 is supported)",
            header.version
        )));
    }
    if header.index_offset < HEADER_SIZE {
        return Err(Error::format("file was never closed: no block index"));
    }
    Ok(header)
}

pub(crate) fn read_index(file: &mut File, header: &Rtc1Header) -> Result<Vec<IndexEntry>> {
    let count = header.layout.block_count();
    file.seek(SeekFrom::Start(header.index_offset))?;
    let mut entries = Vec::with_capacity(count as usize);
    let mut buf = [0u8; INDEX_ENTRY_SIZE as usize];
    for _ in 0..count {
        file.read_exact(&mut buf)?;
        entries.push(IndexEntry::from_bytes(&buf));
    }
    Ok(entries)
}
