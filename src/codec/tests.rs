//! Unit tests for the message codec.
//!
//! Covers round-tripping, partial reads, oversized frame rejection, and EOF
//! classification.

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};
use futures::StreamExt;
use proptest::prelude::*;
use rstest::rstest;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::FramedRead;

use super::*;
use crate::message::MESSAGE_ID;

fn encode(codec: &mut MessageCodec, message: Message) -> BytesMut {
    let mut buf = BytesMut::new();
    codec.encode(message, &mut buf).expect("encode should succeed");
    buf
}

#[test]
fn codec_clamps_max_frame_length() {
    assert_eq!(MessageCodec::new(1).max_frame_length(), MIN_FRAME_LENGTH);
    assert_eq!(
        MessageCodec::new(MAX_FRAME_LENGTH.saturating_add(1)).max_frame_length(),
        MAX_FRAME_LENGTH
    );
}

#[test]
fn round_trips_empty_payload_and_headers() {
    let mut codec = MessageCodec::default();
    let message = Message::new("Ping", "");
    let mut buf = encode(&mut codec, message.clone());

    let decoded = codec
        .decode(&mut buf)
        .expect("decode should succeed")
        .expect("expected a message");
    assert_eq!(decoded, message);
    assert!(buf.is_empty());
}

#[test]
fn frame_is_length_prefixed() {
    let mut codec = MessageCodec::default();
    let message = Message::new("Text", "42");
    let body = encode_message(&message).expect("encode body");
    let buf = encode(&mut codec, message);

    assert_eq!(buf.len(), LENGTH_HEADER_SIZE + body.len());
    assert_eq!(declared_length(&buf), Some(body.len()));
}

#[test]
fn partial_frame_waits_for_more_bytes() {
    let mut codec = MessageCodec::default();
    let full = encode(&mut codec, Message::new("Text", "hello"));

    let mut buf = BytesMut::from(&full[..full.len() - 2]);
    assert!(codec.decode(&mut buf).expect("decode").is_none());

    buf.put_slice(&full[full.len() - 2..]);
    let decoded = codec.decode(&mut buf).expect("decode").expect("message");
    assert_eq!(decoded.payload(), "hello");
}

#[test]
fn decodes_back_to_back_frames_in_order() {
    let mut codec = MessageCodec::default();
    let mut buf = encode(&mut codec, Message::new("A", "1"));
    buf.extend_from_slice(&encode(&mut codec, Message::new("B", "2")));

    let first = codec.decode(&mut buf).expect("decode").expect("first");
    let second = codec.decode(&mut buf).expect("decode").expect("second");
    assert_eq!(first.message_type(), "A");
    assert_eq!(second.message_type(), "B");
}

#[test]
fn rejects_oversized_length_prefix() {
    let mut codec = MessageCodec::new(MIN_FRAME_LENGTH);
    let mut buf = BytesMut::new();
    buf.put_u32(u32::try_from(MIN_FRAME_LENGTH + 1).expect("fits in u32"));

    let err = codec
        .decode(&mut buf)
        .expect_err("oversized frame must be rejected");
    assert!(err.is_malformed());
    assert!(matches!(
        err,
        CodecError::Framing(FramingError::OversizedFrame { size, max })
            if size == MIN_FRAME_LENGTH + 1 && max == MIN_FRAME_LENGTH
    ));
}

#[test]
fn refuses_to_encode_oversized_message() {
    let mut codec = MessageCodec::new(MIN_FRAME_LENGTH);
    let message = Message::new("Text", "x".repeat(MIN_FRAME_LENGTH * 2));
    let mut buf = BytesMut::new();

    let err = codec
        .encode(message, &mut buf)
        .expect_err("encode should fail for oversized message");
    assert!(matches!(err, CodecError::Framing(_)));
    assert!(buf.is_empty());
}

#[test]
fn garbage_body_is_a_payload_error() {
    let mut codec = MessageCodec::default();
    let mut buf = BytesMut::new();
    buf.put_u32(3);
    buf.put_slice(&[0xff, 0xff, 0xff]);

    let err = codec.decode(&mut buf).expect_err("garbage must not decode");
    assert!(matches!(err, CodecError::Payload(_)));
}

#[rstest]
#[case::message_type(&[253, 0, 0, 0, 0, 0, 1, 0, 0])]
#[case::payload(&[0, 253, 0, 0, 0, 0, 0, 1, 0, 0])]
#[case::header_count(&[0, 0, 253, 0, 0, 0, 0, 0, 1, 0, 0])]
fn huge_claimed_length_is_rejected_before_allocating(#[case] body: &[u8]) {
    let err = decode_message(body).expect_err("claimed length exceeds limit");
    assert!(matches!(err, CodecError::Payload(_)));

    let mut codec = MessageCodec::default();
    let mut buf = BytesMut::new();
    buf.put_u32(u32::try_from(body.len()).expect("fits in u32"));
    buf.put_slice(body);
    let err = codec.decode(&mut buf).expect_err("hostile frame");
    assert!(err.is_malformed());
}

#[test]
fn decode_eof_with_empty_buffer_is_clean() {
    let mut codec = MessageCodec::default();
    let mut buf = BytesMut::new();
    assert!(matches!(codec.decode_eof(&mut buf), Ok(None)));
}

#[test]
fn decode_eof_mid_header_is_malformed() {
    let mut codec = MessageCodec::default();
    let mut buf = BytesMut::from(&[0_u8, 0][..]);

    let err = codec.decode_eof(&mut buf).expect_err("truncated header");
    assert!(matches!(
        err,
        CodecError::Eof(EofError::MidHeader {
            bytes_received: 2,
            header_size: LENGTH_HEADER_SIZE,
        })
    ));
}

#[test]
fn decode_eof_mid_frame_reports_progress() {
    let mut codec = MessageCodec::default();
    let full = encode(&mut codec, Message::new("Text", "truncated"));
    let mut buf = BytesMut::from(&full[..LENGTH_HEADER_SIZE + 3]);

    let err = codec.decode_eof(&mut buf).expect_err("truncated body");
    match err {
        CodecError::Eof(EofError::MidFrame {
            bytes_received,
            expected,
        }) => {
            assert_eq!(bytes_received, 3);
            assert_eq!(expected, full.len() - LENGTH_HEADER_SIZE);
        }
        other => panic!("expected MidFrame, got {other:?}"),
    }
}

#[tokio::test]
async fn framed_read_yields_messages_then_ends_cleanly() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    let mut codec = MessageCodec::default();
    let bytes = encode(
        &mut codec,
        Message::new("Text", "first").with_header(MESSAGE_ID, "1"),
    );
    tx.write_all(&bytes).await.expect("write frame");
    drop(tx);

    let mut reader = FramedRead::new(rx, MessageCodec::default());
    let first = reader
        .next()
        .await
        .expect("one frame")
        .expect("decodes");
    assert_eq!(first.message_id(), Some("1"));
    assert!(reader.next().await.is_none());
}

#[tokio::test]
async fn framed_read_flags_truncated_stream() {
    let (mut tx, rx) = tokio::io::duplex(1024);
    let mut codec = MessageCodec::default();
    let bytes = encode(&mut codec, Message::new("Text", "cut short"));
    tx.write_all(&bytes[..bytes.len() - 1])
        .await
        .expect("write partial frame");
    drop(tx);

    let mut reader = FramedRead::new(rx, MessageCodec::default());
    let err = reader
        .next()
        .await
        .expect("an item")
        .expect_err("truncated frame");
    assert!(err.is_malformed());
}

fn arb_message() -> impl Strategy<Value = Message> {
    (
        ".*",
        ".*",
        proptest::collection::btree_map(".*", ".*", 0..4),
    )
        .prop_map(|(message_type, payload, headers): (String, String, BTreeMap<_, _>)| {
            headers
                .into_iter()
                .fold(Message::new(message_type, payload), |msg, (k, v)| {
                    msg.with_header(k, v)
                })
        })
}

proptest! {
    #[test]
    fn any_message_survives_the_wire(message in arb_message()) {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(message.clone(), &mut buf).expect("encode");
        let decoded = codec.decode(&mut buf).expect("decode").expect("message");
        prop_assert_eq!(decoded, message);
        prop_assert!(buf.is_empty());
    }
}
