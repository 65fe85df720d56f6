use std::fmt::{Display, Formatter};
use std::io;

use thiserror::Error;

/// One of the three regions of a reconstructed image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Segment {
    Header,
    Kernel,
    Ramdisk,
}

impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Segment::Header => "header",
            Segment::Kernel => "kernel",
            Segment::Ramdisk => "ramdisk",
        })
    }
}

/// Coarse failure classes surfaced to the operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    NotPatchedImage,
    CorruptImage,
    IoWriteError,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Input file is NOT a Loki image")]
    NotPatchedImage,
    #[error("Input is too short for a boot header: {0} bytes")]
    TruncatedHeader(usize),
    #[error("Invalid page size: {0}")]
    InvalidPageSize(u32),
    #[error("Aligned {0} size overflows: {1:#x}")]
    SizeOverflow(Segment, u32),
    #[error("{segment} segment out of bounds: offset {offset:#x} size {size:#x}, input is {len:#x} bytes")]
    SegmentOutOfBounds {
        segment: Segment,
        offset: u64,
        size: u64,
        len: usize,
    },
    #[error("Failed to write {0} to output file")]
    Write(Segment, #[source] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotPatchedImage => ErrorKind::NotPatchedImage,
            Error::TruncatedHeader(_)
            | Error::InvalidPageSize(_)
            | Error::SizeOverflow(..)
            | Error::SegmentOutOfBounds { .. } => ErrorKind::CorruptImage,
            Error::Write(..) => ErrorKind::IoWriteError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
