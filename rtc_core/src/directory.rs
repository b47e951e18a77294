//! Block location table and the layout guarantees it advertises.

use crate::format::IndexEntry;

/// Where a block's encoded payload lives. `size == 0` marks a sparse hole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockLocation {
    pub offset: u64,
    pub size: u64,
}

impl BlockLocation {
    pub fn is_materialized(&self) -> bool {
        self.size != 0
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Optimization claims a store can make to downstream readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutGuarantee {
    /// Block bytes appear in the file in ascending id order.
    RowMajorBlockOrder,
    /// Blocks carry a size leader and a repeated trailer.
    BlockFraming,
}

/// The directory collaborator the raw writer talks to.
pub trait BlockDirectory {
    fn block_count(&self) -> u64;

    fn get_block_location(&self, id: u64) -> BlockLocation;

    fn set_block_location(&mut self, id: u64, offset: u64, size: u64, checksum: u64);

    fn reserve_layout_guarantee(&mut self, kind: LayoutGuarantee);

    /// Retract a claim. Returns `true` only the first time any claim is
    /// retracted, so callers can report the downgrade once.
    fn invalidate_layout_guarantee(&mut self, kind: LayoutGuarantee) -> bool;

    fn holds(&self, kind: LayoutGuarantee) -> bool;

    fn layout_downgraded(&self) -> bool;
}

/// In-memory location table, persisted as the RTC1 block index.
#[derive(Debug, Clone)]
pub struct LocationTable {
    entries: Vec<IndexEntry>,
    row_major: bool,
    framing: bool,
    downgraded: bool,
}

impl LocationTable {
    pub fn new(block_count: u64) -> Self {
        Self {
            entries: vec![IndexEntry::default(); block_count as usize],
            row_major: false,
            framing: false,
            downgraded: false,
        }
    }

    /// Rebuild from a persisted index. `downgraded` carries a known
    /// incompatible edition forward.
    pub fn from_entries(entries: Vec<IndexEntry>, downgraded: bool) -> Self {
        Self {
            entries,
            row_major: false,
            framing: false,
            downgraded,
        }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn checksum(&self, id: u64) -> u64 {
        self.entries[id as usize].checksum
    }

    /// Ids that were never materialized, ascending.
    pub fn holes(&self) -> Vec<u64> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.size == 0)
            .map(|(i, _)| i as u64)
            .collect()
    }

    pub fn materialized_count(&self) -> u64 {
        self.entries.iter().filter(|e| e.size != 0).count() as u64
    }
}

impl BlockDirectory for LocationTable {
    fn block_count(&self) -> u64 {
        self.entries.len() as u64
    }

    fn get_block_location(&self, id: u64) -> BlockLocation {
        let e = &self.entries[id as usize];
        BlockLocation {
            offset: e.offset,
            size: e.size,
        }
    }

    fn set_block_location(&mut self, id: u64, offset: u64, size: u64, checksum: u64) {
        self.entries[id as usize] = IndexEntry {
            offset,
            size,
            checksum,
        };
    }

    fn reserve_layout_guarantee(&mut self, kind: LayoutGuarantee) {
        match kind {
            LayoutGuarantee::RowMajorBlockOrder => self.row_major = true,
            LayoutGuarantee::BlockFraming => self.framing = true,
        }
    }

    fn invalidate_layout_guarantee(&mut self, kind: LayoutGuarantee) -> bool {
        if !self.holds(kind) {
            return false;
        }
        let first = !self.downgraded;
        self.downgraded = true;
        first
    }

    /// A claim keeps shaping how blocks are written after a downgrade; only
    /// the advertised optimization is lost.
    fn holds(&self, kind: LayoutGuarantee) -> bool {
        match kind {
            LayoutGuarantee::RowMajorBlockOrder => self.row_major,
            LayoutGuarantee::BlockFraming => self.framing,
        }
    }

    fn layout_downgraded(&self) -> bool {
        self.downgraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrade_is_one_way_and_reported_once() {
        let mut table = LocationTable::new(4);
        table.reserve_layout_guarantee(LayoutGuarantee::RowMajorBlockOrder);
        table.reserve_layout_guarantee(LayoutGuarantee::BlockFraming);
        assert!(!table.layout_downgraded());

        assert!(table.invalidate_layout_guarantee(LayoutGuarantee::RowMajorBlockOrder));
        assert!(!table.invalidate_layout_guarantee(LayoutGuarantee::BlockFraming));
        assert!(table.layout_downgraded());
        assert!(table.holds(LayoutGuarantee::BlockFraming));
    }

    #[test]
    fn invalidating_an_unclaimed_guarantee_is_a_no_op() {
        let mut table = LocationTable::new(1);
        assert!(!table.invalidate_layout_guarantee(LayoutGuarantee::BlockFraming));
        assert!(!table.layout_downgraded());
    }

    #[test]
    fn holes_lists_unmaterialized_blocks() {
        let mut table = LocationTable::new(4);
        table.set_block_location(1, 64, 10, 0);
        table.set_block_location(3, 74, 5, 0);
        assert_eq!(table.holes(), vec![0, 2]);
        assert_eq!(table.materialized_count(), 2);
        assert_eq!(table.get_block_location(3).end(), 79);
    }
}
