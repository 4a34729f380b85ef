//! Error types for frame parsing and multipart planning.
//!
//! Parser errors carry their protocol-visible reason text: the connection
//! layer forwards `to_string()` directly as the `reason` of an `error`
//! frame, so the messages here are part of the wire contract.

use thiserror::Error;

/// Errors raised while parsing or serializing frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParserError {
    /// Not enough bytes for a complete frame. Not a protocol error: the
    /// buffer simply holds more bytes until the terminator arrives.
    #[error("Incomplete frame")]
    Incomplete,

    /// A frame of the wrong size: the length prefix exceeds [`MAXFRAME`],
    /// or the declared length does not match the actual length.
    ///
    /// [`MAXFRAME`]: crate::MAXFRAME
    #[error("{0}")]
    Size(&'static str),

    /// A key carried the same value twice within one frame.
    #[error("Duplicate value not allowed")]
    Value,

    /// A structurally invalid frame.
    #[error("{0}")]
    Invalid(&'static str),
}

impl ParserError {
    /// Whether the error must terminate the connection.
    ///
    /// Size violations on the wire are fatal; everything else yields a
    /// non-fatal `error` frame and parsing continues with the next frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Size(_))
    }
}

/// Errors raised by the multipart planner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultipartError {
    /// `multipart` and `transfer-size` are reserved and may not be named
    /// as multipart keys.
    #[error("Bad multipart keys")]
    Key,

    /// The payload cannot be split into frames that fit on the wire: even
    /// a stub frame (or a single indivisible value) exceeds the frame
    /// size.
    #[error("Multipart payload cannot fit on the wire")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_errors_are_fatal() {
        assert!(ParserError::Size("Frame is too large for the wire").is_fatal());
        assert!(!ParserError::Incomplete.is_fatal());
        assert!(!ParserError::Value.is_fatal());
        assert!(!ParserError::Invalid("Bad frame header").is_fatal());
    }

    #[test]
    fn duplicate_value_reason_text() {
        assert_eq!(ParserError::Value.to_string(), "Duplicate value not allowed");
    }
}
