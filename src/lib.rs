//! Sparse firmware memory image model.
//!
//! A [`SparseImage`] is an ordered collection of non-overlapping [`Segment`]s,
//! each a contiguous run of bytes at a 32-bit address. Images are built from
//! Intel-HEX record files ([`parse_hex`], [`SparseImage::open`]) or from
//! incremental writes, queried for contiguous covered ranges to hand off to a
//! flashing layer, and serialized back to records ([`write_hex`],
//! [`SparseImage::save`]).

pub mod error;
pub mod image;
pub mod io;
pub mod segment;

pub use error::Error;
pub use image::{ImageError, NAND_ERASE_VALUE, NOR_ERASE_VALUE, OverlapError, SparseImage};
pub use io::{ParseError, parse_hex, write_hex};
pub use segment::{Segment, SegmentError};
