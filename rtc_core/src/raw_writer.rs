use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::directory::{BlockDirectory, BlockLocation, LayoutGuarantee, LocationTable};
use crate::error::Result;
use crate::format::{trailer_of, HEADER_SIZE, LEADER_SIZE, TRAILER_SIZE};
use crate::store::BlockStore;

/// Writes encoded blocks to a [`BlockStore`] while upholding the layout
/// claims made in its directory.
///
/// # Placement
/// - A block that already has bytes on disk is rewritten in place when the
///   store claims row-major order and the new payload fits the old one.
/// - Everything else is appended at end of file. A rewrite that has to move
///   invalidates the claims, as does a fresh block appended behind a higher id.
///
/// # Framing
/// With framing claimed, each payload is written as
/// `[len: u32 LE][payload][last 4 bytes of payload]`.
pub struct RawBlockWriter {
    store: BlockStore,
    /// Highest id appended so far, for detecting out-of-order appends.
    max_appended: Option<u64>,
}

impl RawBlockWriter {
    pub fn new(mut store: BlockStore, row_major: bool, framing: bool) -> Self {
        let dir = store.directory_mut();
        if row_major {
            dir.reserve_layout_guarantee(LayoutGuarantee::RowMajorBlockOrder);
        }
        if framing {
            dir.reserve_layout_guarantee(LayoutGuarantee::BlockFraming);
        }
        let max_appended = dir
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.size != 0)
            .max_by_key(|(_, e)| e.offset)
            .map(|(id, _)| id as u64);
        Self {
            store,
            max_appended,
        }
    }

    pub fn directory(&self) -> &LocationTable {
        self.store.directory()
    }

    pub fn store_mut(&mut self) -> &mut BlockStore {
        &mut self.store
    }

    fn framing(&self) -> bool {
        self.directory().holds(LayoutGuarantee::BlockFraming)
    }

    fn row_major(&self) -> bool {
        self.directory().holds(LayoutGuarantee::RowMajorBlockOrder)
    }

    /// Persist `encoded` as the new content of block `id`.
    pub fn write(&mut self, id: u64, encoded: &[u8]) -> Result<()> {
        let len = encoded.len() as u64;
        let checksum = xxh3_64(encoded);
        let prior = self.directory().get_block_location(id);

        if prior.is_materialized() {
            if self.row_major() && len <= prior.size {
                return self.rewrite_in_place(id, prior, encoded, checksum);
            }
            let reason = format!(
                "block {id} cannot be rewritten in place ({len} bytes > {} reserved)",
                prior.size
            );
            if self.row_major() {
                self.downgrade(LayoutGuarantee::RowMajorBlockOrder, &reason);
            }
            if self.framing() {
                self.downgrade(LayoutGuarantee::BlockFraming, &reason);
            }
        } else if self.row_major() {
            if let Some(max) = self.max_appended.filter(|&max| id < max) {
                self.downgrade(
                    LayoutGuarantee::RowMajorBlockOrder,
                    &format!("block {id} appended after block {max}"),
                );
            }
        }

        self.append(id, encoded, checksum)
    }

    fn append(&mut self, id: u64, encoded: &[u8], checksum: u64) -> Result<()> {
        let len = encoded.len() as u64;
        let framed = self.framing() && len <= u32::MAX as u64;
        if self.framing() && !framed {
            self.downgrade(
                LayoutGuarantee::BlockFraming,
                &format!("block {id} is too large for a 4-byte leader"),
            );
        }

        if framed {
            self.store.append(&(len as u32).to_le_bytes())?;
        }
        let offset = self.store.append(encoded)?;
        if framed {
            self.store.append(trailer_of(encoded))?;
        }
        self.store
            .directory_mut()
            .set_block_location(id, offset, len, checksum);
        self.max_appended = Some(self.max_appended.map_or(id, |max| max.max(id)));
        debug!(block = id, offset, size = len, "appended block");
        Ok(())
    }

    fn rewrite_in_place(
        &mut self,
        id: u64,
        prior: BlockLocation,
        encoded: &[u8],
        checksum: u64,
    ) -> Result<()> {
        let len = encoded.len() as u64;
        let mut framed = self.framing();
        if framed {
            // Only trust the old leader if it still describes the old payload;
            // otherwise the bytes around the block may belong to something else.
            let leader_ok = prior.offset >= HEADER_SIZE + LEADER_SIZE && {
                let mut leader = [0u8; LEADER_SIZE as usize];
                self.store.read_at(prior.offset - LEADER_SIZE, &mut leader)?;
                u32::from_le_bytes(leader) as u64 == prior.size
            };
            if !leader_ok {
                framed = false;
                self.downgrade(
                    LayoutGuarantee::BlockFraming,
                    &format!("block {id} rewritten in place without a valid leader"),
                );
            }
        }

        if framed {
            self.store
                .write_at(prior.offset - LEADER_SIZE, &(len as u32).to_le_bytes())?;
        }
        self.store.write_at(prior.offset, encoded)?;
        if framed {
            self.store.write_at(prior.offset + len, trailer_of(encoded))?;
        }
        self.store
            .directory_mut()
            .set_block_location(id, prior.offset, len, checksum);
        debug!(block = id, offset = prior.offset, size = len, "rewrote block in place");
        Ok(())
    }

    /// Materialize block `id` as `size` zero bytes by growing the file rather
    /// than writing. Framing is kept intact: the leader is written explicitly
    /// and the trailer of an all-zero payload is itself zero.
    pub fn write_zeroed(&mut self, id: u64, size: u64, checksum: u64) -> Result<()> {
        let framed = self.framing() && size <= u32::MAX as u64;
        if self.row_major() {
            if let Some(max) = self.max_appended.filter(|&max| id < max) {
                self.downgrade(
                    LayoutGuarantee::RowMajorBlockOrder,
                    &format!("block {id} appended after block {max}"),
                );
            }
        }
        if framed {
            self.store.append(&(size as u32).to_le_bytes())?;
        }
        let trailer = if framed { size.min(TRAILER_SIZE) } else { 0 };
        let offset = self.store.extend_zeroed(size + trailer)?;
        self.store
            .directory_mut()
            .set_block_location(id, offset, size, checksum);
        self.max_appended = Some(self.max_appended.map_or(id, |max| max.max(id)));
        Ok(())
    }

    fn downgrade(&mut self, kind: LayoutGuarantee, reason: &str) {
        if self.store.directory_mut().invalidate_layout_guarantee(kind) {
            warn!(
                guarantee = ?kind,
                "{reason}; this invalidates the layout optimization advertised to readers"
            );
        } else {
            debug!(guarantee = ?kind, "{reason}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("rtc_raw_writer_{}.rtc", name))
    }

    fn writer(name: &str, blocks: u64, row_major: bool, framing: bool) -> RawBlockWriter {
        let store = BlockStore::create(temp_path(name), blocks).unwrap();
        RawBlockWriter::new(store, row_major, framing)
    }

    fn bytes_at(w: &mut RawBlockWriter, offset: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        w.store_mut().read_at(offset, &mut buf).unwrap();
        buf
    }

    #[test]
    fn framed_append_writes_leader_and_trailer() {
        let mut w = writer("framed", 2, false, true);
        w.write(0, b"0123456789").unwrap();
        let loc = w.directory().get_block_location(0);
        assert_eq!(loc, BlockLocation { offset: HEADER_SIZE + 4, size: 10 });
        assert_eq!(bytes_at(&mut w, loc.offset - 4, 4), 10u32.to_le_bytes());
        assert_eq!(bytes_at(&mut w, loc.end(), 4), b"6789");
        assert_eq!(w.store_mut().end_of_file(), loc.end() + 4);
    }

    #[test]
    fn short_payload_trailer_repeats_whole_payload() {
        let mut w = writer("short_trailer", 1, false, true);
        w.write(0, b"ab").unwrap();
        let loc = w.directory().get_block_location(0);
        assert_eq!(bytes_at(&mut w, loc.end(), 2), b"ab");
        assert_eq!(w.store_mut().end_of_file(), loc.end() + 2);
    }

    #[test]
    fn growing_rewrite_moves_block_and_downgrades() {
        let mut w = writer("grow", 2, true, false);
        w.write(0, &[1u8; 50]).unwrap();
        w.write(1, &[2u8; 20]).unwrap();
        let old = w.directory().get_block_location(0);
        let old_eof = w.store_mut().end_of_file();

        w.write(0, &[3u8; 51]).unwrap();
        let new = w.directory().get_block_location(0);
        assert!(new.offset >= old_eof);
        assert_eq!(new.size, 51);
        assert!(w.directory().layout_downgraded());
        // The neighbour and the stale copy are untouched.
        assert_eq!(bytes_at(&mut w, old.offset, 50), vec![1u8; 50]);
    }

    #[test]
    fn fitting_rewrite_stays_in_place_under_row_major() {
        let mut w = writer("in_place", 2, true, true);
        w.write(0, &[1u8; 40]).unwrap();
        w.write(1, &[2u8; 40]).unwrap();
        let before = w.directory().get_block_location(0);
        let eof = w.store_mut().end_of_file();

        w.write(0, &[9u8; 40]).unwrap();
        assert_eq!(w.directory().get_block_location(0), before);
        assert_eq!(w.store_mut().end_of_file(), eof);
        assert!(!w.directory().layout_downgraded());
        assert_eq!(bytes_at(&mut w, before.offset, 40), vec![9u8; 40]);

        w.write(0, &[7u8; 30]).unwrap();
        let shrunk = w.directory().get_block_location(0);
        assert_eq!((shrunk.offset, shrunk.size), (before.offset, 30));
        assert_eq!(bytes_at(&mut w, shrunk.offset - 4, 4), 30u32.to_le_bytes());
        assert_eq!(bytes_at(&mut w, shrunk.end(), 4), vec![7u8; 4]);
    }

    #[test]
    fn rewrite_without_row_major_appends_without_downgrade() {
        let mut w = writer("no_claims", 1, false, false);
        w.write(0, &[1u8; 10]).unwrap();
        let first = w.directory().get_block_location(0);
        w.write(0, &[2u8; 5]).unwrap();
        let second = w.directory().get_block_location(0);
        assert!(second.offset > first.offset);
        assert!(!w.directory().layout_downgraded());
    }

    #[test]
    fn corrupted_leader_skips_framing_on_in_place_rewrite() {
        let mut w = writer("bad_leader", 1, true, true);
        w.write(0, &[5u8; 16]).unwrap();
        let loc = w.directory().get_block_location(0);
        w.store_mut().write_at(loc.offset - 4, &99u32.to_le_bytes()).unwrap();

        w.write(0, &[6u8; 16]).unwrap();
        assert!(w.directory().layout_downgraded());
        assert_eq!(bytes_at(&mut w, loc.offset - 4, 4), 99u32.to_le_bytes());
        assert_eq!(bytes_at(&mut w, loc.offset, 16), vec![6u8; 16]);
    }

    #[test]
    fn out_of_order_append_breaks_row_major() {
        let mut w = writer("order", 3, true, false);
        w.write(2, b"late").unwrap();
        assert!(!w.directory().layout_downgraded());
        w.write(0, b"early").unwrap();
        assert!(w.directory().layout_downgraded());
    }

    #[test]
    fn zeroed_block_keeps_framing_consistent() {
        let mut w = writer("zeroed", 2, false, true);
        w.write(0, &[1u8; 8]).unwrap();
        w.write_zeroed(1, 12, 0).unwrap();
        let loc = w.directory().get_block_location(1);
        assert_eq!(loc.size, 12);
        assert_eq!(bytes_at(&mut w, loc.offset - 4, 4), 12u32.to_le_bytes());
        assert_eq!(bytes_at(&mut w, loc.offset, 16), vec![0u8; 16]);
        assert_eq!(w.store_mut().end_of_file(), loc.end() + 4);
    }
}
