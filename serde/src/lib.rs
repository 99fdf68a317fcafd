//! # Rudp Serde
//! Byte-level wire codec shared by the rudp transport crates.
//!
//! Everything on the wire is big-endian. Reads are bounds-checked against the
//! remaining buffer and fail with a [`SerdeError`] instead of reading out of
//! bounds; malformed remote input must never be able to panic this crate.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod error;
mod reader;
mod serde;
mod vector;
mod writer;

pub use error::SerdeError;
pub use reader::ByteReader;
pub use serde::Serde;
pub use vector::{V2F32, V2I16, V3F32, V3I16, V3I32};
pub use writer::ByteWriter;
