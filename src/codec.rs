//! Wire framing for [`Message`] values.
//!
//! Every frame is a 4-byte big-endian length prefix followed by the
//! bincode-encoded message body. [`MessageCodec`] plugs into
//! `tokio_util::codec::{FramedRead, FramedWrite}` and turns a byte stream into
//! a stream of messages.
//!
//! # Error Handling
//!
//! A peer closing the stream at a frame boundary decodes as end-of-stream
//! (`Ok(None)`), never as an error. Closing mid-frame, an oversized length
//! prefix, or an undecodable body surface as a [`CodecError`] for which
//! [`CodecError::is_malformed`] returns `true`.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::message::Message;

pub mod error;

pub use error::{CodecError, EofError, FramingError};

/// Minimum frame length in bytes.
///
/// Frame lengths passed to [`MessageCodec::new`] are clamped to at least this
/// value.
pub const MIN_FRAME_LENGTH: usize = 64;

/// Maximum frame length in bytes (16 MiB).
///
/// Frame lengths passed to [`MessageCodec::new`] are clamped to at most this
/// value to prevent unbounded allocation driven by a hostile length prefix.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Frame length used when none is configured (1 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Length prefix header size (4 bytes for big-endian u32).
pub const LENGTH_HEADER_SIZE: usize = 4;

pub(crate) fn clamp_frame_length(value: usize) -> usize {
    value.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH)
}

/// Bincode settings for message bodies.
///
/// The limit caps the lengths a body may claim, so a hostile length inside a
/// small frame fails to decode instead of driving a huge allocation.
fn body_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_FRAME_LENGTH>()
}

/// Serialize a message body without the length prefix.
///
/// # Errors
///
/// Returns [`CodecError::Payload`] if bincode rejects the value.
pub fn encode_message(message: &Message) -> Result<Bytes, CodecError> {
    bincode::encode_to_vec(message, body_config())
        .map(Bytes::from)
        .map_err(|e| CodecError::Payload(e.to_string()))
}

/// Deserialize a message body produced by [`encode_message`].
///
/// # Errors
///
/// Returns [`CodecError::Payload`] if the bytes are not a valid message,
/// claim a field longer than [`MAX_FRAME_LENGTH`], or contain trailing data.
pub fn decode_message(bytes: &[u8]) -> Result<Message, CodecError> {
    let (message, consumed): (Message, usize) = bincode::decode_from_slice(bytes, body_config())
        .map_err(|e| CodecError::Payload(e.to_string()))?;
    if consumed != bytes.len() {
        return Err(CodecError::Payload(format!(
            "{} trailing bytes after message body",
            bytes.len() - consumed
        )));
    }
    Ok(message)
}

/// Length-prefixed message codec.
///
/// Wraps `tokio_util`'s [`LengthDelimitedCodec`] and layers message
/// (de)serialization plus structured EOF reporting on top.
#[derive(Debug)]
pub struct MessageCodec {
    inner: LengthDelimitedCodec,
    max_frame_length: usize,
}

impl MessageCodec {
    /// Construct a codec accepting frames up to `max_frame_length` bytes.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        let max_frame_length = clamp_frame_length(max_frame_length);
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_length)
                .new_codec(),
            max_frame_length,
        }
    }

    /// Return the maximum frame length accepted by this codec.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Default for MessageCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_FRAME_LENGTH) }
}

impl Clone for MessageCodec {
    fn clone(&self) -> Self { Self::new(self.max_frame_length) }
}

fn declared_length(src: &BytesMut) -> Option<usize> {
    src.get(..LENGTH_HEADER_SIZE)
        .and_then(|slice| <[u8; LENGTH_HEADER_SIZE]>::try_from(slice).ok())
        .map(|bytes| u32::from_be_bytes(bytes) as usize)
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(expected) = declared_length(src) else {
            return Ok(None);
        };
        if expected > self.max_frame_length {
            return Err(FramingError::OversizedFrame {
                size: expected,
                max: self.max_frame_length,
            }
            .into());
        }
        let frame_len = LENGTH_HEADER_SIZE + expected;
        if src.len() < frame_len {
            // Only hand complete frames to the inner codec so it never keeps
            // a half-read header between calls.
            src.reserve(frame_len - src.len());
            return Ok(None);
        }
        match self.inner.decode(src)? {
            Some(body) => decode_message(&body).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Clean close: no data remaining at frame boundary
        if src.is_empty() {
            return Ok(None);
        }
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() => Ok(None),
            None => {
                let err = build_eof_error(src);
                tracing::debug!(
                    buffered = src.len(),
                    error = %err,
                    "stream closed inside a frame"
                );
                Err(err)
            }
        }
    }
}

/// Build the appropriate EOF error based on remaining buffer state.
///
/// - [`EofError::MidHeader`]: fewer than 4 bytes received.
/// - [`EofError::MidFrame`]: header complete but body truncated.
fn build_eof_error(src: &BytesMut) -> CodecError {
    let bytes_received = src.len();
    match declared_length(src) {
        Some(expected) => CodecError::Eof(EofError::MidFrame {
            bytes_received: bytes_received.saturating_sub(LENGTH_HEADER_SIZE),
            expected,
        }),
        None => CodecError::Eof(EofError::MidHeader {
            bytes_received,
            header_size: LENGTH_HEADER_SIZE,
        }),
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = encode_message(&item)?;
        if body.len() > self.max_frame_length {
            return Err(FramingError::OversizedFrame {
                size: body.len(),
                max: self.max_frame_length,
            }
            .into());
        }
        self.inner.encode(body, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
