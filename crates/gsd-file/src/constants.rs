//! On-disk format constants.

/// Magic value identifying a GSD file.
pub const MAGIC: u64 = 0x65DF_65DF_65DF_65DF;

/// Entries allocated to the index block of a newly created file.
pub const INITIAL_INDEX_ENTRIES: u64 = 128;

/// Name slots allocated to the name list of a newly created file.
pub const INITIAL_NAMELIST_ENTRIES: u64 = 65535;

/// Bounded buffer used when relocating the index block in append mode.
pub const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Longest stored name in bytes; longer names are truncated.
pub const MAX_NAME_LEN: usize = 63;

/// Size of one name slot on disk.
pub const NAMELIST_ENTRY_SIZE: usize = 64;
