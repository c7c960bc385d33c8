//! Element types and open modes for GSD files.

/// Numeric element types storable in a chunk.
///
/// The discriminant is the on-disk type code. Code 0 and codes above 10 are
/// not valid and mark an index entry as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementType {
    /// Unsigned 8-bit integer.
    U8 = 1,
    /// Unsigned 16-bit integer.
    U16 = 2,
    /// Unsigned 32-bit integer.
    U32 = 3,
    /// Unsigned 64-bit integer.
    U64 = 4,
    /// Signed 8-bit integer.
    I8 = 5,
    /// Signed 16-bit integer.
    I16 = 6,
    /// Signed 32-bit integer.
    I32 = 7,
    /// Signed 64-bit integer.
    I64 = 8,
    /// 32-bit float.
    F32 = 9,
    /// 64-bit float.
    F64 = 10,
}

impl ElementType {
    /// Returns the element type for an on-disk type code, if valid.
    pub fn from_u8(code: u8) -> Option<ElementType> {
        match code {
            1 => Some(ElementType::U8),
            2 => Some(ElementType::U16),
            3 => Some(ElementType::U32),
            4 => Some(ElementType::U64),
            5 => Some(ElementType::I8),
            6 => Some(ElementType::I16),
            7 => Some(ElementType::I32),
            8 => Some(ElementType::I64),
            9 => Some(ElementType::F32),
            10 => Some(ElementType::F64),
            _ => None,
        }
    }

    /// Returns the size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            ElementType::U8 | ElementType::I8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::U32 | ElementType::I32 | ElementType::F32 => 4,
            ElementType::U64 | ElementType::I64 | ElementType::F64 => 8,
        }
    }
}

/// Returns the element size in bytes for a raw type code, or 0 if the code
/// is unknown.
pub fn sizeof_type(code: u8) -> usize {
    ElementType::from_u8(code).map(|t| t.size()).unwrap_or(0)
}

/// Open modes for a GSD file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// No mutation; the index is memory mapped read-only.
    ReadOnly,
    /// Full read and write access; the whole index is held in memory.
    ReadWrite,
    /// Write-only appends; only uncommitted index entries are held in
    /// memory, and chunk reads are rejected.
    Append,
}
