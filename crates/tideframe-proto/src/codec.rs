//! The two wire encodings.
//!
//! Both codecs produce and consume [`Frame`] values with identical
//! semantics; only the byte layout differs. A codec also predicts the
//! on-wire size of a frame without serializing it ([`FrameCodec::projected_len`]),
//! which the multipart planner uses to prove that every chunk fits.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{Frame, Kval, MAXFRAME, errors::ParserError};

/// A wire encoding for [`Frame`] values.
pub trait FrameCodec: Send + Sync {
    /// Frame terminator byte sequence.
    fn terminator(&self) -> &'static [u8];

    /// Parse one terminated frame from `input`.
    ///
    /// `input` is exactly one frame as split out of the ingress buffer,
    /// terminator included (a missing terminator is `Incomplete`).
    fn parse(&self, input: &[u8]) -> Result<Frame, ParserError>;

    /// Serialize a frame, terminator included.
    fn serialize(&self, frame: &Frame) -> Result<Vec<u8>, ParserError>;

    /// Exact on-wire size of a frame with these parts, without building it.
    fn projected_len(&self, source: &str, target: &str, command: &str, kval: &Kval) -> usize;
}

fn lowercase_kval(raw: impl IntoIterator<Item = (String, Vec<String>)>) -> Result<Kval, ParserError> {
    let mut kval = Kval::new();
    for (key, values) in raw {
        let entry = kval.entry(key.to_lowercase()).or_insert_with(Vec::new);
        for value in values {
            if entry.contains(&value) {
                return Err(ParserError::Value);
            }
            entry.push(value);
        }
    }
    Ok(kval)
}

/// The binary-framed encoding.
///
/// Layout: big-endian `u16` length (covering the prefix, the delimiter NUL
/// and the payload), one NUL, then NUL-separated UTF-8 tokens
/// `source, target, command, k1, v1, k2, v2, …` closed by a double NUL.
/// A trailing key without a value takes the synthesized value `*`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl FrameCodec for BinaryCodec {
    fn terminator(&self) -> &'static [u8] {
        b"\0\0"
    }

    fn parse(&self, input: &[u8]) -> Result<Frame, ParserError> {
        if input.len() < 10 {
            return Err(ParserError::Incomplete);
        }

        let body = input.strip_suffix(b"\0\0").unwrap_or(input);

        let declared = usize::from(u16::from_be_bytes([input[0], input[1]]));
        if declared > MAXFRAME {
            return Err(ParserError::Size("Frame is too large for the wire"));
        }

        // The declared length covers the prefix, delimiter and terminator.
        if declared != body.len() + 2 {
            return Err(ParserError::Size("Junk size received"));
        }

        let tokens = body
            .get(3..)
            .ok_or(ParserError::Invalid("Invalid opening header"))?;
        let text = String::from_utf8_lossy(tokens);
        let mut tokens = text.split('\0');

        let source = tokens.next().ok_or(ParserError::Invalid("Invalid opening header"))?;
        let target = tokens.next().ok_or(ParserError::Invalid("Invalid opening header"))?;
        let command = tokens.next().ok_or(ParserError::Invalid("Invalid opening header"))?;

        let rest: Vec<&str> = tokens.collect();
        let mut pairs = Vec::with_capacity(rest.len() / 2 + 1);
        for chunk in rest.chunks(2) {
            let key = chunk[0];
            let value = chunk.get(1).copied().unwrap_or("*");
            pairs.push((key.to_string(), vec![value.to_string()]));
        }

        Ok(Frame {
            source: source.to_string(),
            target: target.to_string(),
            command: command.to_lowercase(),
            kval: lowercase_kval(pairs)?,
        })
    }

    fn serialize(&self, frame: &Frame) -> Result<Vec<u8>, ParserError> {
        // An empty token would embed the terminator sequence inside the
        // payload and desynchronize framing; the null marker stands in.
        fn tok(s: &str) -> &str {
            if s.is_empty() { "*" } else { s }
        }

        let mut tokens: Vec<&str> =
            vec![tok(&frame.source), tok(&frame.target), tok(&frame.command)];
        for (key, values) in &frame.kval {
            for value in values {
                tokens.push(tok(key));
                tokens.push(tok(value));
            }
        }

        let payload = tokens.join("\0");
        let total = 2 + 1 + payload.len() + 2;
        if total > MAXFRAME {
            return Err(ParserError::Size("Frame is too large for the wire"));
        }

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u16).to_be_bytes());
        out.push(0);
        out.extend_from_slice(payload.as_bytes());
        out.extend_from_slice(b"\0\0");
        Ok(out)
    }

    fn projected_len(&self, source: &str, target: &str, command: &str, kval: &Kval) -> usize {
        // Prefix (2) + delimiter (1) + two separators + terminator (2),
        // then one separator + key + separator + value per pair. Empty
        // tokens go out as the one-byte null marker.
        fn width(s: &str) -> usize {
            s.len().max(1)
        }

        let pairs: usize = kval
            .iter()
            .map(|(k, vs)| vs.iter().map(|v| 2 + width(k) + width(v)).sum::<usize>())
            .sum();
        7 + width(source) + width(target) + width(command) + pairs
    }
}

#[derive(Deserialize)]
struct JsonHeader {
    source: String,
    target: String,
    command: String,
}

/// The JSON-framed encoding.
///
/// Layout: `[{"source":…,"target":…,"command":…}, {key: [values…], …}]`
/// followed by a single NUL terminator.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl FrameCodec for JsonCodec {
    fn terminator(&self) -> &'static [u8] {
        b"\0"
    }

    fn parse(&self, input: &[u8]) -> Result<Frame, ParserError> {
        if input.len() < 10 || !input.ends_with(b"\0") {
            return Err(ParserError::Incomplete);
        }
        if input.len() < 20 {
            return Err(ParserError::Size("Frame is too small"));
        }
        if input.len() > MAXFRAME {
            return Err(ParserError::Size("Frame is too large"));
        }

        let text = String::from_utf8_lossy(&input[..input.len() - 1]).into_owned();
        let load: serde_json::Value =
            serde_json::from_str(&text).map_err(|_| ParserError::Invalid("Bad JSON frame"))?;

        let items = load
            .as_array()
            .ok_or(ParserError::Invalid("Bad JSON frame"))?;
        let header: JsonHeader = items
            .first()
            .and_then(|h| serde_json::from_value(h.clone()).ok())
            .ok_or(ParserError::Invalid("Bad JSON frame header"))?;

        let mut raw = Vec::new();
        if let Some(body) = items.get(1) {
            let map = body
                .as_object()
                .ok_or(ParserError::Invalid("Bad JSON frame key/values"))?;
            for (key, values) in map {
                let values = values
                    .as_array()
                    .ok_or(ParserError::Invalid("Value not a list"))?;
                let mut list = Vec::with_capacity(values.len());
                for value in values {
                    let value = value
                        .as_str()
                        .ok_or(ParserError::Invalid("Value in list not a str"))?;
                    list.push(value.to_string());
                }
                raw.push((key.clone(), list));
            }
        }

        Ok(Frame {
            source: header.source,
            target: header.target,
            command: header.command.to_lowercase(),
            kval: lowercase_kval(raw)?,
        })
    }

    fn serialize(&self, frame: &Frame) -> Result<Vec<u8>, ParserError> {
        let header = serde_json::json!({
            "source": frame.source,
            "target": frame.target,
            "command": frame.command,
        });
        let body: BTreeMap<&String, &Vec<String>> = frame.kval.iter().collect();
        let dump = serde_json::json!([header, body]);

        let mut out = dump.to_string().into_bytes();
        out.push(0);
        if out.len() > MAXFRAME {
            return Err(ParserError::Size("Frame is too big for the wire"));
        }
        Ok(out)
    }

    fn projected_len(&self, source: &str, target: &str, command: &str, kval: &Kval) -> usize {
        // 44 is the length of the frame skeleton (brackets, field names,
        // quotes and the terminator) without any keys or values.
        let mut len = 44 + source.len() + target.len() + command.len();
        if !kval.is_empty() {
            for (key, values) in kval {
                len += 6 + key.len();
                for value in values {
                    len += 3 + value.len();
                }
                len -= 1;
            }
            len -= 1;
        }
        len
    }
}
