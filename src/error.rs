//! Errors of the file level operations
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::encoder::EncodingError;
use crate::reader::DecodingError;

/// Error returned by [`crate::decode`], [`crate::encode`] and their variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The GIF could not be read.
    #[error("failed to decode {}: {source}", path.display())]
    Decoding {
        /// The GIF file.
        path: PathBuf,
        /// Cause, with the byte offset where known.
        #[source]
        source: DecodingError,
    },
    /// The GIF could not be written.
    #[error("failed to encode {}: {source}", path.display())]
    Encoding {
        /// The GIF file.
        path: PathBuf,
        /// Cause, with the frame index where known.
        #[source]
        source: EncodingError,
    },
    /// A file could not be opened, read or written.
    #[error("{}{}: {source}", path.display(), frame.map(|i| format!(" (frame {i})")).unwrap_or_default())]
    ExternalIo {
        /// The file.
        path: PathBuf,
        /// Frame the file belongs to.
        frame: Option<usize>,
        /// Cause.
        #[source]
        source: io::Error,
    },
    /// A frame artifact is not a usable PNG.
    #[error("{} (frame {frame}): {reason}", path.display())]
    Artifact {
        /// The artifact, inline data elided.
        path: PathBuf,
        /// Frame index.
        frame: usize,
        /// What is wrong with it.
        reason: String,
    },
    /// The frame list was rejected.
    #[error("invalid metadata: {0}")]
    Metadata(String),
}

/// Error categories.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Not a GIF signature or version.
    InvalidHeader,
    /// Unknown block introducer or extension label.
    UnknownBlock,
    /// The stream ended early.
    TruncatedStream,
    /// Bad LZW data.
    LzwCorruption,
    /// A color table of unsupported size.
    UnsupportedColorDepth,
    /// A frame outside of the logical screen.
    FrameBounds,
    /// Reading or writing a file failed.
    ExternalIo,
    /// Structurally invalid data not covered by the other kinds.
    Malformed,
    /// A parameter or metadata value out of range.
    InvalidArgument,
}

impl Error {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Decoding { source, .. } => match source {
                DecodingError::InvalidHeader { .. } => ErrorKind::InvalidHeader,
                DecodingError::UnknownBlock { .. } => ErrorKind::UnknownBlock,
                DecodingError::Truncated { .. } | DecodingError::MissingEndCode { .. } => {
                    ErrorKind::TruncatedStream
                }
                DecodingError::LzwCorruption { .. } | DecodingError::InvalidMinCodeSize { .. } => {
                    ErrorKind::LzwCorruption
                }
                DecodingError::FrameBounds { .. } => ErrorKind::FrameBounds,
                DecodingError::Io(_) => ErrorKind::ExternalIo,
                _ => ErrorKind::Malformed,
            },
            Error::Encoding { source, .. } => match source {
                EncodingError::UnsupportedColorDepth { .. } => ErrorKind::UnsupportedColorDepth,
                EncodingError::FrameBounds { .. } => ErrorKind::FrameBounds,
                EncodingError::InvalidSpeed(_) | EncodingError::InvalidDelay { .. } => {
                    ErrorKind::InvalidArgument
                }
                EncodingError::Io(_) => ErrorKind::ExternalIo,
                _ => ErrorKind::Malformed,
            },
            Error::ExternalIo { .. } | Error::Artifact { .. } => ErrorKind::ExternalIo,
            Error::Metadata(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Byte offset in the GIF where decoding failed.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Error::Decoding { source, .. } => source.offset(),
            _ => None,
        }
    }

    /// Index of the frame the error refers to.
    pub fn frame(&self) -> Option<usize> {
        match self {
            Error::Encoding { source, .. } => source.frame(),
            Error::ExternalIo { frame, .. } => *frame,
            Error::Artifact { frame, .. } => Some(*frame),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinds_and_context() {
        let err = Error::Decoding {
            path: "a.gif".into(),
            source: DecodingError::Truncated { offset: 42 },
        };
        assert_eq!(err.kind(), ErrorKind::TruncatedStream);
        assert_eq!(err.offset(), Some(42));
        assert_eq!(err.frame(), None);

        let err = Error::Encoding {
            path: "b.gif".into(),
            source: EncodingError::FrameBounds {
                frame: 3,
                left: 9,
                top: 0,
                width: 2,
                height: 2,
                screen_width: 10,
                screen_height: 10,
            },
        };
        assert_eq!(err.kind(), ErrorKind::FrameBounds);
        assert_eq!(err.frame(), Some(3));

        let err = Error::ExternalIo {
            path: "c.png".into(),
            frame: Some(1),
            source: io::ErrorKind::NotFound.into(),
        };
        assert_eq!(err.kind(), ErrorKind::ExternalIo);
        assert!(err.to_string().starts_with("c.png (frame 1): "));

        assert_eq!(Error::Metadata("x".into()).kind(), ErrorKind::InvalidArgument);
    }
}
