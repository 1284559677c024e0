//! Error types for the codec layer.
//!
//! - [`FramingError`]: wire-level issues in frame structure.
//! - [`EofError`]: premature end-of-stream inside a frame. A close at a frame
//!   boundary is not an error and decodes as end-of-stream.
//! - [`CodecError`]: top-level enum wrapping both plus payload and I/O errors.

use std::io;

use thiserror::Error;

/// Framing-level errors occurring during frame boundary detection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// Frame length prefix indicates size exceeding configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Actual frame size indicated by the length prefix.
        size: usize,
        /// Maximum allowed frame size.
        max: usize,
    },
}

/// Where in a frame the peer closed the stream.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EofError {
    /// The peer closed the connection while a frame body was being read.
    #[error("premature EOF: {bytes_received} bytes of {expected} byte frame received")]
    MidFrame {
        /// Bytes received before EOF.
        bytes_received: usize,
        /// Declared frame body size.
        expected: usize,
    },

    /// The peer closed the connection while the length prefix was being read.
    #[error("premature EOF during header: {bytes_received} of {header_size} header bytes")]
    MidHeader {
        /// Header bytes received before EOF.
        bytes_received: usize,
        /// Expected header size.
        header_size: usize,
    },
}

/// Top-level codec error taxonomy.
///
/// # Examples
///
/// ```
/// use wirelink::codec::{CodecError, EofError, FramingError};
///
/// let err = CodecError::Framing(FramingError::OversizedFrame {
///     size: 2000,
///     max: 1024,
/// });
/// assert!(err.is_malformed());
/// assert!(
///     CodecError::Eof(EofError::MidHeader {
///         bytes_received: 1,
///         header_size: 4,
///     })
///     .is_malformed()
/// );
/// ```
#[derive(Debug, Error)]
pub enum CodecError {
    /// Framing layer error (wire-level frame boundary issues).
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The frame body could not be (de)serialized.
    #[error("payload error: {0}")]
    Payload(String),

    /// Transport layer I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// End-of-stream handling.
    #[error("EOF: {0}")]
    Eof(#[from] EofError),
}

impl CodecError {
    /// Returns true if the peer sent bytes that violate the framing contract.
    ///
    /// Transport failures are not protocol violations.
    #[must_use]
    pub fn is_malformed(&self) -> bool { !matches!(self, Self::Io(_)) }

    /// Returns the error category as a string for logging and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Framing(_) => "framing",
            Self::Payload(_) => "payload",
            Self::Io(_) => "io",
            Self::Eof(_) => "eof",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CodecError::Framing(FramingError::OversizedFrame { size: 2, max: 1 }), true)]
    #[case(CodecError::Payload("bad".into()), true)]
    #[case(CodecError::Eof(EofError::MidHeader { bytes_received: 1, header_size: 4 }), true)]
    #[case(CodecError::Eof(EofError::MidFrame { bytes_received: 1, expected: 9 }), true)]
    #[case(CodecError::Io(io::Error::other("reset")), false)]
    fn malformed_classification(#[case] err: CodecError, #[case] malformed: bool) {
        assert_eq!(err.is_malformed(), malformed);
    }

    #[test]
    fn error_type_names_category() {
        assert_eq!(CodecError::Payload(String::new()).error_type(), "payload");
        let eof = EofError::MidFrame {
            bytes_received: 0,
            expected: 1,
        };
        assert_eq!(CodecError::Eof(eof).error_type(), "eof");
    }
}
