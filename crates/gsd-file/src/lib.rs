//! GSD storage engine.
//!
//! A GSD file records a time series of frames, each contributing zero or
//! more named, typed, rectangular data chunks (particle positions, box
//! dimensions, topology, and the like). The format supports random-access
//! reads by (frame, name), durable appends committed one frame at a time,
//! and structural validation when a file is opened.
//!
//! Chunk payloads are appended to the end of the file as they are written;
//! the index entries that make them reachable are flushed and fsynced only
//! at frame boundaries, so a crash mid-frame leaves the file consistent
//! against its last completed frame.

pub mod constants;
pub mod file;
pub mod header;
pub mod index;
pub mod io;
pub mod namelist;

pub use file::GsdFile;
pub use header::{make_version, FileHeader};
pub use index::IndexEntry;

pub use gsd_common::{sizeof_type, ElementType, GsdError, OpenMode, Result};
