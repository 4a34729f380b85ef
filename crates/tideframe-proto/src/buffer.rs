//! Ingress byte accumulation and frame splitting.
//!
//! Bytes arriving from the transport append to a [`FrameBuffer`]; the
//! buffer is split on the codec's terminator and each fully-formed frame
//! is parsed. A residual partial frame is retained across calls, so a
//! stream chunked at arbitrary byte boundaries yields the same frame
//! sequence as the unchunked stream.

use bytes::BytesMut;

use crate::{Frame, codec::FrameCodec, errors::ParserError};

/// Accumulates ingress bytes and yields parsed frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes from the transport.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes currently held without a terminator.
    pub fn residual_len(&self) -> usize {
        self.buf.len()
    }

    /// Split out and parse every complete frame currently buffered.
    ///
    /// Results are returned in wire order; a parse failure does not stop
    /// the remaining complete frames from being yielded (the caller
    /// decides whether the error is fatal).
    pub fn drain(&mut self, codec: &dyn FrameCodec) -> Vec<Result<Frame, ParserError>> {
        let term = codec.terminator();
        let mut out = Vec::new();

        while let Some(pos) = find(&self.buf, term) {
            let chunk = self.buf.split_to(pos + term.len());
            out.push(codec.parse(&chunk));
        }

        out
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryCodec, JsonCodec, kval};

    fn frame(n: usize) -> Frame {
        Frame::new("alice", "bob", "message", kval! { "body" => [format!("hello {n}")] })
    }

    #[test]
    fn concatenated_frames_yield_every_dispatch() {
        let codec = BinaryCodec;
        let mut wire = Vec::new();
        for n in 0..4 {
            wire.extend_from_slice(&codec.serialize(&frame(n)).unwrap());
        }

        let mut buf = FrameBuffer::new();
        buf.extend(&wire);
        let frames = buf.drain(&codec);
        assert_eq!(frames.len(), 4);
        for (n, parsed) in frames.into_iter().enumerate() {
            assert_eq!(parsed.unwrap(), frame(n));
        }
        assert_eq!(buf.residual_len(), 0);
    }

    #[test]
    fn arbitrary_chunking_is_equivalent() {
        let codec = JsonCodec;
        let mut wire = Vec::new();
        for n in 0..3 {
            wire.extend_from_slice(&codec.serialize(&frame(n)).unwrap());
        }

        for chunk_size in [1, 2, 7, 64] {
            let mut buf = FrameBuffer::new();
            let mut parsed = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                buf.extend(chunk);
                parsed.extend(buf.drain(&codec));
            }

            assert_eq!(parsed.len(), 3);
            for (n, result) in parsed.into_iter().enumerate() {
                assert_eq!(result.unwrap(), frame(n));
            }
            assert_eq!(buf.residual_len(), 0);
        }
    }

    #[test]
    fn partial_frame_is_retained() {
        let codec = BinaryCodec;
        let wire = codec.serialize(&frame(0)).unwrap();

        let mut buf = FrameBuffer::new();
        buf.extend(&wire[..wire.len() - 3]);
        assert!(buf.drain(&codec).is_empty());
        assert!(buf.residual_len() > 0);

        buf.extend(&wire[wire.len() - 3..]);
        let frames = buf.drain(&codec);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &frame(0));
    }

    #[test]
    fn parse_error_does_not_consume_following_frames() {
        let codec = BinaryCodec;
        // A frame with a duplicate (key, value) pair, then a good frame.
        let payload = "alice\0bob\0message\0body\0hi\0body\0hi";
        let total = 2 + 1 + payload.len() + 2;
        let mut wire = Vec::new();
        wire.extend_from_slice(&(total as u16).to_be_bytes());
        wire.push(0);
        wire.extend_from_slice(payload.as_bytes());
        wire.extend_from_slice(b"\0\0");
        wire.extend_from_slice(&codec.serialize(&frame(1)).unwrap());

        let mut buf = FrameBuffer::new();
        buf.extend(&wire);
        let frames = buf.drain(&codec);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Err(ParserError::Value));
        assert_eq!(frames[1].as_ref().unwrap(), &frame(1));
    }
}
