//! Multipart payload planning.
//!
//! When a `kval` payload would not fit in [`MAXFRAME`] bytes, it is split
//! across several frames: the first frame carries every key *not* named as
//! multipart (plus, when requested, the `multipart` key list and the
//! `transfer-size` total), and the following frames carry chunks of the
//! multipart keys' values. The sender closes the stream with an empty
//! frame carrying `multipart: *`.
//!
//! Chunk sizing is derived from the codec's [`projected_len`] predicate,
//! so every planned frame fits by construction.
//!
//! [`projected_len`]: crate::FrameCodec::projected_len

use crate::{Kval, MAXFRAME, codec::FrameCodec, errors::MultipartError};

/// Reserved key announcing the multipart key list, and closing the stream
/// with the value `*`.
pub const MULTIPART_KEY: &str = "multipart";

/// Reserved key announcing the total multipart byte count.
pub const TRANSFER_SIZE_KEY: &str = "transfer-size";

/// A planned multipart transmission: the first frame's kval and the kvals
/// of every following chunk frame. The closing `multipart: *` sentinel is
/// emitted by the sender, not the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPlan {
    /// Payload of the first frame.
    pub first: Kval,
    /// Payloads of the chunk frames, in order.
    pub chunks: Vec<Kval>,
}

/// Plan a multipart transmission of `kval` from `source` to `target`.
///
/// Keys named in `keys` are chunked across the following frames; all other
/// keys ride on the first frame. An empty `keys` means every key of `kval`
/// is multipart. With `use_size`, the first frame announces the key list
/// and total byte count, and values may be re-split at arbitrary
/// boundaries; without it, value boundaries are preserved.
///
/// # Errors
///
/// - [`MultipartError::Key`] when `keys` names a reserved key.
/// - [`MultipartError::Overflow`] when no split can fit: a stub frame
///   alone exceeds [`MAXFRAME`], the first frame is oversize, or (without
///   `use_size`) a single value cannot fit in any frame.
pub fn plan(
    codec: &dyn FrameCodec,
    source: &str,
    target: &str,
    command: &str,
    keys: &[String],
    kval: &Kval,
    use_size: bool,
) -> Result<MultipartPlan, MultipartError> {
    if keys.iter().any(|k| k == MULTIPART_KEY || k == TRANSFER_SIZE_KEY) {
        return Err(MultipartError::Key);
    }

    let keys: Vec<String> = if keys.is_empty() {
        kval.keys().cloned().collect()
    } else {
        keys.to_vec()
    };

    let mut first = Kval::new();
    let mut parts = Kval::new();
    for (key, values) in kval {
        if keys.contains(key) {
            parts.insert(key.clone(), values.clone());
        } else {
            first.insert(key.clone(), values.clone());
        }
    }

    // A frame holding one stub value per multipart key is the smallest
    // useful chunk; if even that cannot fit, no split ever will.
    let stub: Kval = keys.iter().map(|k| (k.clone(), vec!["*".to_string()])).collect();
    let stub_len = codec.projected_len(source, target, command, &stub);
    if stub_len >= MAXFRAME {
        return Err(MultipartError::Overflow);
    }

    let total: usize = parts.values().flatten().map(String::len).sum();

    if use_size {
        first.insert(MULTIPART_KEY.to_string(), keys.clone());
        first.insert(TRANSFER_SIZE_KEY.to_string(), vec![total.to_string()]);

        // Coalesce each key's values and re-split into pieces small enough
        // that one piece always fits alongside the other keys' stubs.
        let budget = MAXFRAME - stub_len;
        for values in parts.values_mut() {
            let joined: String = values.concat();
            *values = split_at_char_boundaries(&joined, budget);
        }
    }

    if codec.projected_len(source, target, command, &first) > MAXFRAME {
        return Err(MultipartError::Overflow);
    }

    let mut chunks = Vec::new();
    let mut cur = Kval::new();
    for key in &keys {
        let Some(values) = parts.get(key) else { continue };
        for value in values {
            let mut cand = cur.clone();
            cand.entry(key.clone()).or_default().push(value.clone());

            if codec.projected_len(source, target, command, &cand) > MAXFRAME {
                if cur.is_empty() {
                    // A single value alone does not fit.
                    return Err(MultipartError::Overflow);
                }
                chunks.push(std::mem::take(&mut cur));

                cand = Kval::new();
                cand.insert(key.clone(), vec![value.clone()]);
                if codec.projected_len(source, target, command, &cand) > MAXFRAME {
                    return Err(MultipartError::Overflow);
                }
            }
            cur = cand;
        }
    }
    if !cur.is_empty() {
        chunks.push(cur);
    }

    Ok(MultipartPlan { first, chunks })
}

/// The closing sentinel payload, `multipart: *`.
pub fn sentinel() -> Kval {
    let mut kval = Kval::new();
    kval.insert(MULTIPART_KEY.to_string(), vec!["*".to_string()]);
    kval
}

/// Receiving side of a multipart stream.
///
/// Accumulates the chunked keys' values until the `multipart: *`
/// sentinel arrives. When the stream was announced with `use_size`, the
/// declared `transfer-size` bounds how much a peer may send; excess data
/// is an overflow.
#[derive(Debug, Clone)]
pub struct Assembler {
    keys: Vec<String>,
    expected: Option<usize>,
    received: usize,
    data: Kval,
    done: bool,
}

impl Assembler {
    /// An assembler for a stream whose multipart keys are known out of
    /// band (streams sent without `use_size`).
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            expected: None,
            received: 0,
            data: Kval::new(),
            done: false,
        }
    }

    /// An assembler built from an announcing first frame: its
    /// `multipart` key names the chunked keys and `transfer-size` the
    /// total byte count. Returns `None` when the frame announces
    /// nothing.
    pub fn from_announcement(kval: &Kval) -> Option<Self> {
        let keys = kval.get(MULTIPART_KEY)?;
        if keys.iter().any(|k| k == "*") {
            return None;
        }

        let expected = kval
            .get(TRANSFER_SIZE_KEY)
            .and_then(|v| v.first())
            .and_then(|v| v.parse::<usize>().ok());

        let mut assembler = Self::new(keys.iter().cloned());
        assembler.expected = expected;
        Some(assembler)
    }

    /// Absorb one follow-up frame's kval. Returns `true` once the
    /// closing sentinel has been seen.
    pub fn absorb(&mut self, kval: &Kval) -> Result<bool, MultipartError> {
        if self.done {
            return Ok(true);
        }

        if kval.get(MULTIPART_KEY).is_some_and(|v| v.iter().any(|k| k == "*")) {
            self.done = true;
            return Ok(true);
        }

        for key in &self.keys {
            let Some(values) = kval.get(key) else { continue };
            self.received += values.iter().map(String::len).sum::<usize>();
            if self.expected.is_some_and(|max| self.received > max) {
                return Err(MultipartError::Overflow);
            }
            self.data.entry(key.clone()).or_default().extend(values.iter().cloned());
        }
        Ok(false)
    }

    /// Whether the sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Total bytes absorbed so far.
    pub fn received(&self) -> usize {
        self.received
    }

    /// The reassembled values.
    pub fn into_data(self) -> Kval {
        self.data
    }
}

fn split_at_char_boundaries(s: &str, max: usize) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }

    let mut pieces = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let mut end = rest.len().min(max);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // A single character wider than the budget; take it whole
            // rather than looping forever.
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        pieces.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryCodec, JsonCodec, kval};

    #[test]
    fn reserved_keys_are_rejected() {
        let kval = kval! { "multipart" => ["x"] };
        let keys = vec!["multipart".to_string()];
        assert_eq!(
            plan(&JsonCodec, "=server", "alice", "motd", &keys, &kval, false).unwrap_err(),
            MultipartError::Key
        );
    }

    #[test]
    fn transfer_size_equals_total_value_bytes() {
        let text = "x".repeat(5000);
        let kval = kval! { "text" => [text.clone()] };
        let keys = vec!["text".to_string()];

        let plan = plan(&JsonCodec, "=server", "alice", "motd", &keys, &kval, true).unwrap();
        assert_eq!(
            plan.first.get("transfer-size").map(Vec::as_slice),
            Some(&["5000".to_string()][..])
        );
        assert_eq!(plan.first.get("multipart").map(Vec::as_slice), Some(&keys[..]));

        let rejoined: String = plan
            .chunks
            .iter()
            .flat_map(|c| c.get("text").into_iter().flatten())
            .cloned()
            .collect();
        assert_eq!(rejoined, text);
    }

    #[test]
    fn every_planned_chunk_fits_on_the_wire() {
        let codec = BinaryCodec;
        let users: Vec<String> = (0..200).map(|n| format!("user{n:04}")).collect();
        let mut kval = Kval::new();
        kval.insert("users".to_string(), users.clone());
        let keys = vec!["users".to_string()];

        let plan = plan(&codec, "#room", "alice", "group-names", &keys, &kval, false).unwrap();
        assert!(plan.chunks.len() > 1);

        let mut rejoined = Vec::new();
        for chunk in &plan.chunks {
            assert!(codec.projected_len("#room", "alice", "group-names", chunk) <= MAXFRAME);
            rejoined.extend(chunk.get("users").into_iter().flatten().cloned());
        }
        assert_eq!(rejoined, users);
    }

    #[test]
    fn non_multipart_keys_ride_the_first_frame() {
        let kval = kval! {
            "target" => ["#room"],
            "acl" => ["op", "voice"],
        };
        let keys = vec!["acl".to_string()];

        let plan = plan(&JsonCodec, "=server", "alice", "acl-list", &keys, &kval, false).unwrap();
        assert_eq!(plan.first.get("target").map(Vec::as_slice), Some(&["#room".to_string()][..]));
        assert!(plan.first.get("acl").is_none());
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0]["acl"], ["op", "voice"]);
    }

    #[test]
    fn indivisible_value_overflows_without_use_size() {
        let kval = kval! { "text" => ["x".repeat(5000)] };
        let keys = vec!["text".to_string()];
        assert_eq!(
            plan(&JsonCodec, "=server", "alice", "motd", &keys, &kval, false).unwrap_err(),
            MultipartError::Overflow
        );
    }

    #[test]
    fn sentinel_payload() {
        assert_eq!(sentinel().get("multipart").map(Vec::as_slice), Some(&["*".to_string()][..]));
    }

    #[test]
    fn assembler_round_trips_a_planned_stream() {
        let text = "z".repeat(4500);
        let kval = kval! { "text" => [text.clone()] };
        let keys = vec!["text".to_string()];

        let plan = plan(&JsonCodec, "=server", "alice", "motd", &keys, &kval, true).unwrap();
        let mut assembler = Assembler::from_announcement(&plan.first).expect("announced");

        for chunk in &plan.chunks {
            assert!(!assembler.absorb(chunk).unwrap());
        }
        assert!(assembler.absorb(&sentinel()).unwrap());
        assert!(assembler.is_done());
        assert_eq!(assembler.received(), 4500);

        let data = assembler.into_data();
        assert_eq!(data.get("text").map(Vec::as_slice).map(|v| v.concat()), Some(text));
    }

    #[test]
    fn assembler_rejects_excess_data() {
        let mut announced = kval! { "text" => [] };
        announced.insert("multipart".to_string(), vec!["text".to_string()]);
        announced.insert("transfer-size".to_string(), vec!["4".to_string()]);

        let mut assembler = Assembler::from_announcement(&announced).unwrap();
        assert!(!assembler.absorb(&kval! { "text" => ["toot"] }).unwrap());
        assert_eq!(
            assembler.absorb(&kval! { "text" => ["excess"] }).unwrap_err(),
            MultipartError::Overflow
        );
    }

    #[test]
    fn sentinel_is_not_an_announcement() {
        assert!(Assembler::from_announcement(&sentinel()).is_none());
        assert!(Assembler::from_announcement(&Kval::new()).is_none());
    }

    #[test]
    fn split_respects_char_boundaries() {
        let s = "héllo wörld".repeat(40);
        let pieces = split_at_char_boundaries(&s, 13);
        assert!(pieces.iter().all(|p| p.len() <= 13));
        assert_eq!(pieces.concat(), s);
    }
}
