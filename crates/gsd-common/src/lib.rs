//! GSD common types and errors.
//!
//! This crate provides the definitions shared between the GSD storage
//! engine and its consumers.

pub mod error;
pub mod types;

pub use error::{GsdError, Result};
pub use types::{sizeof_type, ElementType, OpenMode};
