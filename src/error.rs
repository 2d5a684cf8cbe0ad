use std::path::PathBuf;

use thiserror::Error;

use crate::image::ImageError;
use crate::io::ParseError;
use crate::segment::SegmentError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error(transparent)]
    Image(#[from] ImageError),
}
