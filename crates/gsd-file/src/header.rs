//! Fixed header at the beginning of every GSD file.

use bytes::{Buf, BufMut};
use gsd_common::{GsdError, Result};

use crate::constants::{INITIAL_INDEX_ENTRIES, INITIAL_NAMELIST_ENTRIES, MAGIC, MAX_NAME_LEN};
use crate::index::IndexEntry;

/// Packs a major/minor version pair into a single version word.
pub const fn make_version(major: u32, minor: u32) -> u32 {
    (major << 16) | minor
}

/// Version written to newly created files.
pub const CURRENT_VERSION: u32 = make_version(1, 0);

/// Legacy version still accepted for reading; the field layout is the same.
pub const LEGACY_VERSION: u32 = make_version(0, 3);

/// Header at the beginning of a GSD file.
///
/// Layout (256 bytes):
/// - magic: 8 bytes
/// - gsd_version: 4 bytes
/// - application: 64 bytes (NUL terminated, zero padded)
/// - schema: 64 bytes (NUL terminated, zero padded)
/// - schema_version: 4 bytes
/// - index_location: 8 bytes
/// - index_allocated_entries: 8 bytes
/// - namelist_location: 8 bytes
/// - namelist_allocated_entries: 8 bytes
/// - reserved: 80 bytes (zero)
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    /// Magic value identifying a GSD file.
    pub magic: u64,
    /// File format version, packed with [`make_version`].
    pub gsd_version: u32,
    /// Name of the generating application.
    pub application: [u8; 64],
    /// Name of the data schema.
    pub schema: [u8; 64],
    /// Schema version, packed with [`make_version`].
    pub schema_version: u32,
    /// Byte offset of the index block.
    pub index_location: u64,
    /// Number of entries allocated to the index block.
    pub index_allocated_entries: u64,
    /// Byte offset of the name-list block.
    pub namelist_location: u64,
    /// Number of slots allocated to the name-list block.
    pub namelist_allocated_entries: u64,
}

/// Copies a string into a fixed name field, truncating to 63 bytes + NUL.
pub(crate) fn pack_name(name: &str) -> [u8; 64] {
    let mut field = [0u8; 64];
    let bytes = name.as_bytes();
    let len = bytes.len().min(MAX_NAME_LEN);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

/// Returns the NUL-terminated prefix of a fixed name field.
pub(crate) fn unpack_name(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

impl FileHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 256;

    /// Creates a header describing the initial layout of a fresh file:
    /// the index block directly after the header, the name list directly
    /// after the index block.
    pub fn new(application: &[u8; 64], schema: &[u8; 64], schema_version: u32) -> Self {
        let index_location = Self::SIZE as u64;
        let namelist_location =
            index_location + INITIAL_INDEX_ENTRIES * IndexEntry::SIZE as u64;

        Self {
            magic: MAGIC,
            gsd_version: CURRENT_VERSION,
            application: *application,
            schema: *schema,
            schema_version,
            index_location,
            index_allocated_entries: INITIAL_INDEX_ENTRIES,
            namelist_location,
            namelist_allocated_entries: INITIAL_NAMELIST_ENTRIES,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        let mut buf = &mut data[..];

        buf.put_u64_le(self.magic);
        buf.put_u32_le(self.gsd_version);
        buf.put_slice(&self.application);
        buf.put_slice(&self.schema);
        buf.put_u32_le(self.schema_version);
        buf.put_u64_le(self.index_location);
        buf.put_u64_le(self.index_allocated_entries);
        buf.put_u64_le(self.namelist_location);
        buf.put_u64_le(self.namelist_allocated_entries);
        // bytes 176..256 are reserved (already zero)

        data
    }

    /// Deserializes the header from bytes.
    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut buf = &data[..];

        let magic = buf.get_u64_le();
        let gsd_version = buf.get_u32_le();

        let mut application = [0u8; 64];
        buf.copy_to_slice(&mut application);
        let mut schema = [0u8; 64];
        buf.copy_to_slice(&mut schema);

        Self {
            magic,
            gsd_version,
            application,
            schema,
            schema_version: buf.get_u32_le(),
            index_location: buf.get_u64_le(),
            index_allocated_entries: buf.get_u64_le(),
            namelist_location: buf.get_u64_le(),
            namelist_allocated_entries: buf.get_u64_le(),
        }
    }

    /// Validates the magic value and file format version.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(GsdError::NotAGsdFile);
        }
        if self.gsd_version < make_version(1, 0) && self.gsd_version != LEGACY_VERSION {
            return Err(GsdError::InvalidVersion(self.gsd_version));
        }
        if self.gsd_version >= make_version(2, 0) {
            return Err(GsdError::InvalidVersion(self.gsd_version));
        }
        Ok(())
    }

    /// Returns the application string.
    pub fn application(&self) -> &str {
        std::str::from_utf8(unpack_name(&self.application)).unwrap_or_default()
    }

    /// Returns the schema string.
    pub fn schema(&self) -> &str {
        std::str::from_utf8(unpack_name(&self.schema)).unwrap_or_default()
    }
}
