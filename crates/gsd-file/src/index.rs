//! Index entries and the in-memory index representations.
//!
//! The on-disk index is a growable array of fixed-size entries, one per
//! (frame, name) written. Used entries occupy a contiguous prefix; the
//! first slot with `location == 0` terminates the prefix.

use bytes::{Buf, BufMut, BytesMut};
use gsd_common::{sizeof_type, GsdError, Result};
use memmap2::Mmap;

/// A single index entry mapping (frame, id) to a chunk payload.
///
/// Layout (32 bytes):
/// - frame: 8 bytes
/// - n: 8 bytes
/// - location: 8 bytes (0 marks an unused slot)
/// - m: 4 bytes
/// - id: 2 bytes
/// - type_code: 1 byte
/// - flags: 1 byte (must be 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexEntry {
    /// Frame the chunk was written in.
    pub frame: u64,
    /// Number of rows in the chunk.
    pub n: u64,
    /// Byte offset of the chunk payload.
    pub location: u64,
    /// Number of columns in the chunk.
    pub m: u32,
    /// Id of the chunk name.
    pub id: u16,
    /// On-disk element type code.
    pub type_code: u8,
    /// Entry flags.
    pub flags: u8,
}

impl IndexEntry {
    /// Size of one entry on disk in bytes.
    pub const SIZE: usize = 32;

    /// Serializes this entry to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        let mut buf = &mut data[..];

        buf.put_u64_le(self.frame);
        buf.put_u64_le(self.n);
        buf.put_u64_le(self.location);
        buf.put_u32_le(self.m);
        buf.put_u16_le(self.id);
        buf.put_u8(self.type_code);
        buf.put_u8(self.flags);

        data
    }

    /// Deserializes an entry from the first 32 bytes of `data`.
    pub fn from_bytes(mut data: &[u8]) -> Self {
        Self {
            frame: data.get_u64_le(),
            n: data.get_u64_le(),
            location: data.get_u64_le(),
            m: data.get_u32_le(),
            id: data.get_u16_le(),
            type_code: data.get_u8(),
            flags: data.get_u8(),
        }
    }

    /// Returns the payload size in bytes, or `None` if it overflows.
    ///
    /// An unknown type code yields `Some(0)`.
    pub fn data_size(&self) -> Option<u64> {
        self.n
            .checked_mul(self.m as u64)?
            .checked_mul(sizeof_type(self.type_code) as u64)
    }

    /// Returns true if this slot holds a written entry.
    pub fn is_used(&self) -> bool {
        self.location != 0
    }

    /// Checks the structural validity of a committed entry: known type,
    /// payload inside the file, frame below the index allocation, id below
    /// the committed name count, flags zero.
    pub(crate) fn is_valid(&self, allocated: u64, file_size: u64, committed_names: u64) -> bool {
        if sizeof_type(self.type_code) == 0 {
            return false;
        }

        let Some(size) = self.data_size() else {
            return false;
        };
        let Some(end) = self.location.checked_add(size) else {
            return false;
        };
        if end > file_size {
            return false;
        }

        if self.frame >= allocated {
            return false;
        }
        if self.id as u64 >= committed_names {
            return false;
        }
        self.flags == 0
    }
}

/// Serializes a run of entries into one contiguous buffer.
pub(crate) fn entries_to_bytes(entries: &[IndexEntry]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(entries.len() * IndexEntry::SIZE);
    for entry in entries {
        buf.put_slice(&entry.to_bytes());
    }
    buf
}

/// In-memory representation of the index block, varying by open mode.
#[derive(Debug)]
pub(crate) enum IndexImage {
    /// Read-only shared mapping of the on-disk block (read-only handles).
    Mapped(Mmap),
    /// Full copy of the block (read/write handles).
    Owned(Vec<IndexEntry>),
    /// Only the entries created since the last commit (append handles).
    Tail(Vec<IndexEntry>),
}

impl IndexImage {
    /// Returns the committed-block entry at `i`.
    ///
    /// `None` when `i` is outside the block, or for append images, which
    /// hold no committed entries.
    pub(crate) fn entry(&self, i: u64) -> Option<IndexEntry> {
        match self {
            IndexImage::Mapped(map) => {
                let start = (i as usize).checked_mul(IndexEntry::SIZE)?;
                let end = start.checked_add(IndexEntry::SIZE)?;
                map.get(start..end).map(IndexEntry::from_bytes)
            }
            IndexImage::Owned(entries) => entries.get(i as usize).copied(),
            IndexImage::Tail(_) => None,
        }
    }
}

/// The index engine state of an open handle.
#[derive(Debug)]
pub(crate) struct IndexState {
    /// Entries in memory plus written to disk.
    pub image: IndexImage,
    /// Total entries, in memory plus written.
    pub num_entries: u64,
    /// Entries durably written to disk.
    pub written_entries: u64,
}

impl IndexState {
    /// Finds the committed entry for (frame, id), if any.
    ///
    /// Binary-searches for the rightmost entry with the requested frame,
    /// then scans left through that frame's run looking for the id.
    pub(crate) fn find(&self, frame: u64, id: u16) -> Option<IndexEntry> {
        if self.num_entries == 0 {
            return None;
        }

        let mut l = 0u64;
        let mut r = self.num_entries;
        while r - l > 1 {
            let m = (l + r) / 2;
            if frame < self.image.entry(m)?.frame {
                r = m;
            } else {
                l = m;
            }
        }

        loop {
            let entry = self.image.entry(l)?;
            if entry.frame != frame {
                return None;
            }
            if entry.id == id {
                return Some(entry);
            }
            if l == 0 {
                return None;
            }
            l -= 1;
        }
    }
}

/// Determines the committed prefix of an index block at open time.
///
/// Validates the first entry and every binary-search pivot on the way to
/// the terminator, checking structural validity and frame monotonicity.
/// Returns `(entry_count, current_frame)`.
pub(crate) fn validate_committed(
    image: &IndexImage,
    allocated: u64,
    file_size: u64,
    committed_names: u64,
) -> Result<(u64, u64)> {
    let entry = |i: u64| image.entry(i).unwrap_or_default();

    let first = entry(0);
    if first.is_used() && !first.is_valid(allocated, file_size, committed_names) {
        return Err(GsdError::FileCorrupt(
            "first index entry is invalid".to_string(),
        ));
    }

    let num_entries = if !first.is_used() {
        0
    } else {
        let mut l = 0u64;
        let mut r = allocated;
        while r - l > 1 {
            let m = (l + r) / 2;
            let e = entry(m);

            if e.is_used()
                && (!e.is_valid(allocated, file_size, committed_names)
                    || e.frame < entry(l).frame)
            {
                return Err(GsdError::FileCorrupt(format!(
                    "index entry {m} is invalid or out of frame order"
                )));
            }

            if e.is_used() {
                l = m;
            } else {
                r = m;
            }
        }
        r
    };

    let cur_frame = if num_entries == 0 {
        0
    } else {
        entry(num_entries - 1).frame + 1
    };

    Ok((num_entries, cur_frame))
}
