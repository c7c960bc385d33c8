//! The on-disk name list and the sorted name lookup table.
//!
//! Names live in fixed 64-byte slots in insertion order; a name's slot
//! number is its id for the lifetime of the file. Lookups go through an
//! id array kept sorted by name over the committed prefix. Names appended
//! since the last frame boundary sit unsorted at the tail and stay
//! invisible to lookup until committed, which is safe because a name may
//! appear at most once per frame.

use std::cmp::Ordering;

use gsd_common::{GsdError, Result};

use crate::constants::{MAX_NAME_LEN, NAMELIST_ENTRY_SIZE};

/// Compares a query against a stored slot with the semantics of
/// `strncmp(query, stored, strlen(query))`: only the first `query.len()`
/// bytes of the slot participate, so a query that is a prefix of a stored
/// name compares equal.
fn cmp_name(query: &[u8], slot: &[u8]) -> Ordering {
    let n = query.len().min(slot.len());
    match query[..n].cmp(&slot[..n]) {
        Ordering::Equal if query.len() > slot.len() => Ordering::Greater,
        ord => ord,
    }
}

/// The name table of an open handle.
#[derive(Debug)]
pub(crate) struct NameTable {
    /// Raw image of the name-list block, `allocated * 64` bytes.
    data: Vec<u8>,
    /// Names in memory, committed plus uncommitted.
    num_entries: u64,
    /// Names durably written to disk.
    written_entries: u64,
    /// Ids ordered by name over the committed prefix; ids of uncommitted
    /// names follow unsorted.
    sorted: Vec<u16>,
}

impl NameTable {
    /// Builds the table from the raw name-list block read from disk.
    ///
    /// The committed count is the index of the first empty slot, or the
    /// full allocation when no slot is empty.
    pub(crate) fn from_image(data: Vec<u8>, allocated: u64) -> Self {
        let mut num_entries = allocated;
        for i in 0..allocated {
            if data[i as usize * NAMELIST_ENTRY_SIZE] == 0 {
                num_entries = i;
                break;
            }
        }
        // ids are 16 bit with the maximum reserved as the not-found
        // sentinel; a block cannot hold more names than the id space
        let num_entries = num_entries.min(u16::MAX as u64);

        let mut table = Self {
            data,
            num_entries,
            written_entries: num_entries,
            sorted: (0..num_entries as u16).collect(),
        };
        table.sort_committed();
        table
    }

    /// Returns the 64-byte slot for an id.
    fn slot(&self, id: u16) -> &[u8] {
        let start = id as usize * NAMELIST_ENTRY_SIZE;
        &self.data[start..start + NAMELIST_ENTRY_SIZE]
    }

    /// Returns the name bytes for an id, up to the terminating NUL.
    pub(crate) fn name_bytes(&self, id: u16) -> &[u8] {
        crate::header::unpack_name(self.slot(id))
    }

    /// Total names in memory, committed plus uncommitted.
    pub(crate) fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Names durably written to disk.
    pub(crate) fn written_entries(&self) -> u64 {
        self.written_entries
    }

    /// Finds the position of a name in the sorted committed prefix.
    fn find_pos(&self, name: &str) -> Option<usize> {
        if self.written_entries == 0 {
            return None;
        }
        let query = name.as_bytes();

        let mut l = 0usize;
        let mut r = self.written_entries as usize;

        match cmp_name(query, self.slot(self.sorted[l])) {
            Ordering::Less => return None,
            Ordering::Equal => return Some(l),
            Ordering::Greater => {}
        }

        while r - l > 1 {
            let m = (l + r) / 2;
            match cmp_name(query, self.slot(self.sorted[m])) {
                Ordering::Less => r = m,
                Ordering::Equal => return Some(m),
                Ordering::Greater => l = m,
            }
        }

        None
    }

    /// Returns the id assigned to a committed name, if any.
    pub(crate) fn find(&self, name: &str) -> Option<u16> {
        self.find_pos(name).map(|pos| self.sorted[pos])
    }

    /// Appends a new name, truncated to 63 bytes, and returns its id.
    ///
    /// The name becomes visible to lookup only after the next commit.
    pub(crate) fn append(&mut self, name: &str, allocated: u64) -> Result<u16> {
        if self.num_entries == allocated {
            return Err(GsdError::NamelistFull);
        }

        let id = self.num_entries as u16;
        let start = id as usize * NAMELIST_ENTRY_SIZE;
        let slot = &mut self.data[start..start + NAMELIST_ENTRY_SIZE];
        slot.fill(0);
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_NAME_LEN);
        slot[..len].copy_from_slice(&bytes[..len]);

        self.sorted
            .try_reserve(1)
            .map_err(|_| GsdError::MemoryAllocationFailed)?;
        self.sorted.push(id);
        self.num_entries += 1;

        Ok(id)
    }

    /// Returns the uncommitted suffix of the name-list image as
    /// (first slot number, slot bytes), or `None` when everything is
    /// committed.
    pub(crate) fn unwritten(&self) -> Option<(u64, &[u8])> {
        if self.num_entries == self.written_entries {
            return None;
        }
        let start = self.written_entries as usize * NAMELIST_ENTRY_SIZE;
        let end = self.num_entries as usize * NAMELIST_ENTRY_SIZE;
        Some((self.written_entries, &self.data[start..end]))
    }

    /// Marks all names committed and merges them into the sorted prefix.
    pub(crate) fn mark_committed(&mut self) {
        self.written_entries = self.num_entries;
        self.sort_committed();
    }

    fn sort_committed(&mut self) {
        let n = self.written_entries as usize;
        let data = &self.data;
        self.sorted[..n].sort_unstable_by(|&a, &b| {
            let slot = |id: u16| {
                let start = id as usize * NAMELIST_ENTRY_SIZE;
                &data[start..start + NAMELIST_ENTRY_SIZE]
            };
            slot(a).cmp(slot(b))
        });
    }

    /// Enumerates committed names beginning with `prefix` in sorted order.
    ///
    /// `prev` is the name returned by the previous call, or `None` to start
    /// from the beginning.
    pub(crate) fn matching(&self, prefix: &str, prev: Option<&str>) -> Option<&str> {
        if self.written_entries == 0 {
            return None;
        }

        let start = match prev {
            None => 0,
            Some(p) => self.find_pos(p)? + 1,
        };

        let pat = prefix.as_bytes();
        for pos in start..self.written_entries as usize {
            let name = self.name_bytes(self.sorted[pos]);
            if name.len() >= pat.len() && &name[..pat.len()] == pat {
                if let Ok(name) = std::str::from_utf8(name) {
                    return Some(name);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_table(allocated: u64) -> NameTable {
        NameTable::from_image(vec![0u8; allocated as usize * NAMELIST_ENTRY_SIZE], allocated)
    }

    /// Appends and commits a set of names.
    fn committed_table(names: &[&str], allocated: u64) -> NameTable {
        let mut table = empty_table(allocated);
        for name in names {
            table.append(name, allocated).unwrap();
        }
        table.mark_committed();
        table
    }

    #[test]
    fn test_empty_table() {
        let table = empty_table(16);
        assert_eq!(table.num_entries(), 0);
        assert_eq!(table.written_entries(), 0);
        assert!(table.find("anything").is_none());
    }

    #[test]
    fn test_ids_assigned_in_append_order() {
        let mut table = empty_table(16);
        assert_eq!(table.append("zebra", 16).unwrap(), 0);
        assert_eq!(table.append("apple", 16).unwrap(), 1);
        assert_eq!(table.append("mango", 16).unwrap(), 2);
        assert_eq!(table.num_entries(), 3);
    }

    #[test]
    fn test_uncommitted_names_invisible_to_lookup() {
        let mut table = empty_table(16);
        table.append("box", 16).unwrap();
        assert!(table.find("box").is_none());

        table.mark_committed();
        assert_eq!(table.find("box"), Some(0));
    }

    #[test]
    fn test_find_after_sort_keeps_ids() {
        let table = committed_table(&["zebra", "apple", "mango"], 16);

        // sorted by name, ids unchanged
        assert_eq!(table.find("zebra"), Some(0));
        assert_eq!(table.find("apple"), Some(1));
        assert_eq!(table.find("mango"), Some(2));
        assert!(table.find("banana").is_none());
    }

    #[test]
    fn test_find_uses_query_length_prefix() {
        let table = committed_table(&["particles/position"], 16);

        // the stored name extends past the query, which still matches
        assert_eq!(table.find("particles/"), Some(0));
        // a query longer than the stored name does not
        assert!(table.find("particles/positions").is_none());
    }

    #[test]
    fn test_append_truncates_long_names() {
        let long = "n".repeat(100);
        let mut table = empty_table(16);
        table.append(&long, 16).unwrap();
        table.mark_committed();

        assert_eq!(table.name_bytes(0), "n".repeat(63).as_bytes());
        assert_eq!(table.find(&"n".repeat(63)), Some(0));
    }

    #[test]
    fn test_namelist_full() {
        let mut table = empty_table(2);
        table.append("a", 2).unwrap();
        table.append("b", 2).unwrap();
        assert!(matches!(
            table.append("c", 2),
            Err(GsdError::NamelistFull)
        ));
    }

    #[test]
    fn test_from_image_counts_to_first_empty_slot() {
        let mut data = vec![0u8; 8 * NAMELIST_ENTRY_SIZE];
        data[0] = b'a';
        data[NAMELIST_ENTRY_SIZE] = b'b';
        let table = NameTable::from_image(data, 8);

        assert_eq!(table.num_entries(), 2);
        assert_eq!(table.written_entries(), 2);
        assert_eq!(table.find("a"), Some(0));
        assert_eq!(table.find("b"), Some(1));
    }

    #[test]
    fn test_from_image_full_block() {
        let mut data = vec![0u8; 4 * NAMELIST_ENTRY_SIZE];
        for i in 0..4 {
            data[i * NAMELIST_ENTRY_SIZE] = b'a' + i as u8;
        }
        let table = NameTable::from_image(data, 4);
        assert_eq!(table.num_entries(), 4);
    }

    #[test]
    fn test_unwritten_suffix() {
        let mut table = committed_table(&["a"], 16);
        assert!(table.unwritten().is_none());

        table.append("b", 16).unwrap();
        table.append("c", 16).unwrap();
        let (first, bytes) = table.unwritten().unwrap();
        assert_eq!(first, 1);
        assert_eq!(bytes.len(), 2 * NAMELIST_ENTRY_SIZE);
        assert_eq!(bytes[0], b'b');
        assert_eq!(bytes[NAMELIST_ENTRY_SIZE], b'c');

        table.mark_committed();
        assert!(table.unwritten().is_none());
    }

    #[test]
    fn test_matching_walks_sorted_names() {
        let table = committed_table(
            &["particles/velocity", "box", "particles/position"],
            16,
        );

        let first = table.matching("particles/", None).unwrap();
        assert_eq!(first, "particles/position");
        let second = table.matching("particles/", Some(first)).unwrap();
        assert_eq!(second, "particles/velocity");
        assert!(table.matching("particles/", Some(second)).is_none());
    }

    #[test]
    fn test_matching_empty_prefix_enumerates_all() {
        let table = committed_table(&["b", "a", "c"], 16);

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        while let Some(name) = table.matching("", cursor.as_deref()) {
            seen.push(name.to_string());
            cursor = Some(name.to_string());
        }
        assert_eq!(seen, ["a", "b", "c"]);
    }

    #[test]
    fn test_matching_unknown_cursor() {
        let table = committed_table(&["a", "b"], 16);
        assert!(table.matching("", Some("nope")).is_none());
    }
}
