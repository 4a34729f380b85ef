//! Property tests for the frame codecs and multipart planner.

use proptest::prelude::*;
use tideframe_proto::{
    BinaryCodec, Frame, FrameBuffer, FrameCodec, JsonCodec, Kval, MAXFRAME, multipart,
};

fn token() -> impl Strategy<Value = String> {
    "[a-z0-9#=&*-]{1,12}"
}

fn small_kval() -> impl Strategy<Value = Kval> {
    proptest::collection::btree_map(
        "[a-z][a-z0-9-]{0,8}",
        // Non-empty values: an empty token would embed the binary
        // terminator sequence inside the payload.
        proptest::collection::vec("[a-zA-Z0-9 .!-]{1,24}", 1..4)
            .prop_map(|vs| {
                // Duplicate values under one key are rejected on parse, so
                // generated frames must not contain them.
                let mut seen = Vec::new();
                for v in vs {
                    if !seen.contains(&v) {
                        seen.push(v);
                    }
                }
                seen
            }),
        0..5,
    )
}

fn arb_frame() -> impl Strategy<Value = Frame> {
    (token(), token(), "[a-z-]{1,16}", small_kval())
        .prop_map(|(source, target, command, kval)| Frame::new(source, target, command, kval))
}

proptest! {
    #[test]
    fn binary_round_trip(frame in arb_frame()) {
        let codec = BinaryCodec;
        if let Ok(wire) = codec.serialize(&frame) {
            prop_assert!(wire.len() <= MAXFRAME);
            let parsed = codec.parse(&wire).expect("should parse");
            prop_assert_eq!(parsed, frame);
        }
    }

    #[test]
    fn json_round_trip(frame in arb_frame()) {
        let codec = JsonCodec;
        if let Ok(wire) = codec.serialize(&frame) {
            prop_assert!(wire.len() <= MAXFRAME);
            let parsed = codec.parse(&wire).expect("should parse");
            prop_assert_eq!(parsed, frame);
        }
    }

    #[test]
    fn projected_len_matches_serialized_len(frame in arb_frame()) {
        for codec in [&BinaryCodec as &dyn FrameCodec, &JsonCodec] {
            if let Ok(wire) = codec.serialize(&frame) {
                prop_assert_eq!(
                    codec.projected_len(&frame.source, &frame.target, &frame.command, &frame.kval),
                    wire.len()
                );
            }
        }
    }

    #[test]
    fn chunked_stream_yields_identical_dispatches(
        frames in proptest::collection::vec(arb_frame(), 1..6),
        chunk in 1usize..40,
    ) {
        let codec = BinaryCodec;
        let mut wire = Vec::new();
        let mut expected = Vec::new();
        for frame in &frames {
            if let Ok(bytes) = codec.serialize(frame) {
                wire.extend_from_slice(&bytes);
                expected.push(frame.clone());
            }
        }

        let mut buf = FrameBuffer::new();
        let mut got = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend(piece);
            for result in buf.drain(&codec) {
                got.push(result.expect("valid stream"));
            }
        }

        prop_assert_eq!(got, expected);
        prop_assert_eq!(buf.residual_len(), 0);
    }

    #[test]
    fn multipart_chunks_rejoin_to_original(
        text in "[a-zA-Z0-9 ]{0,6000}",
    ) {
        let codec = JsonCodec;
        let mut kval = Kval::new();
        kval.insert("text".to_string(), vec![text.clone()]);
        let keys = vec!["text".to_string()];

        let plan = multipart::plan(&codec, "=server", "alice", "motd", &keys, &kval, true)
            .expect("plannable");

        // transfer-size equals the total multipart byte count.
        let expected_transfer_size = text.len().to_string();
        prop_assert_eq!(
            plan.first.get("transfer-size").and_then(|v| v.first()).map(String::as_str),
            Some(expected_transfer_size.as_str())
        );

        // Every chunk frame fits, and the chunks rejoin to the original.
        let mut rejoined = String::new();
        for chunk in &plan.chunks {
            prop_assert!(codec.projected_len("=server", "alice", "motd", chunk) <= MAXFRAME);
            for piece in chunk.get("text").into_iter().flatten() {
                rejoined.push_str(piece);
            }
        }
        prop_assert_eq!(rejoined, text);
    }
}
