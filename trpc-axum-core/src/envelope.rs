//! Length-prefixed envelope framing.
//!
//! Each frame carries one message:
//!
//! ```text
//! [flags:1][length:4][payload:length]
//! ```
//!
//! The length is big-endian. [`EnvelopeCodec`] plugs this framing into the
//! codec registry.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::Codec;
use crate::compression::compress_type;
use crate::error::CodecError;
use crate::msg::Msg;

/// Envelope flags.
pub mod envelope_flags {
    /// Regular message (uncompressed).
    pub const MESSAGE: u8 = 0x00;
    /// Compressed message.
    pub const COMPRESSED: u8 = 0x01;
    /// End of stream.
    pub const END_STREAM: u8 = 0x02;
}

/// Envelope header size (flags + length).
pub const ENVELOPE_HEADER_SIZE: usize = 5;

/// Decoded envelope header, stored as the message's frame head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHead {
    pub flags: u8,
    pub length: u32,
}

impl FrameHead {
    pub fn is_compressed(&self) -> bool {
        self.flags & envelope_flags::COMPRESSED != 0
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & envelope_flags::END_STREAM != 0
    }
}

/// Wrap payload in an envelope.
pub fn wrap_envelope(payload: &[u8], flags: u8) -> Bytes {
    let mut frame = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + payload.len());
    frame.put_u8(flags);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame.freeze()
}

/// Parse an envelope header.
///
/// # Errors
/// Returns an error if there aren't enough bytes for the header or the
/// flags carry unknown bits.
pub fn parse_envelope_header(data: &[u8]) -> Result<FrameHead, CodecError> {
    let Some(header) = data.get(..ENVELOPE_HEADER_SIZE) else {
        return Err(CodecError::IncompleteHeader {
            expected: ENVELOPE_HEADER_SIZE,
            actual: data.len(),
        });
    };

    let flags = header[0];
    if flags & !(envelope_flags::COMPRESSED | envelope_flags::END_STREAM) != 0 {
        return Err(CodecError::InvalidFlags(flags));
    }
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);

    Ok(FrameHead { flags, length })
}

/// Frame codec for length-prefixed envelopes.
///
/// `decode` stores the parsed [`FrameHead`] in [`Msg::frame_head`] and
/// returns the payload. `encode` sets the compressed flag when the message
/// carries a compress type, and the end-of-stream flag when the message's
/// frame head says so.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec;

impl Codec for EnvelopeCodec {
    fn encode(&self, msg: &mut Msg, body: Bytes) -> Result<Bytes, CodecError> {
        let mut flags = envelope_flags::MESSAGE;
        if msg.compress_type() != compress_type::NOOP {
            flags |= envelope_flags::COMPRESSED;
        }
        let end_stream = msg
            .frame_head()
            .and_then(|h| h.downcast_ref::<FrameHead>())
            .is_some_and(FrameHead::is_end_stream);
        if end_stream {
            flags |= envelope_flags::END_STREAM;
        }
        Ok(wrap_envelope(&body, flags))
    }

    fn decode(&self, msg: &mut Msg, frame: Bytes) -> Result<Bytes, CodecError> {
        let head = parse_envelope_header(&frame)?;
        let actual = frame.len() - ENVELOPE_HEADER_SIZE;
        if head.length as usize != actual {
            return Err(CodecError::LengthMismatch {
                declared: head.length as usize,
                actual,
            });
        }
        msg.set_frame_head(Arc::new(head));
        Ok(frame.slice(ENVELOPE_HEADER_SIZE..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_envelope_uncompressed() {
        let frame = wrap_envelope(b"hello", envelope_flags::MESSAGE);

        assert_eq!(frame[0], envelope_flags::MESSAGE);
        assert_eq!(
            u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]),
            5
        );
        assert_eq!(&frame[5..], b"hello");
    }

    #[test]
    fn test_parse_envelope_header() {
        let data = [0x01, 0x00, 0x00, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let head = parse_envelope_header(&data).unwrap();

        assert!(head.is_compressed());
        assert!(!head.is_end_stream());
        assert_eq!(head.length, 5);
    }

    #[test]
    fn test_parse_envelope_header_incomplete() {
        let data = [0x00, 0x00, 0x00];
        assert_eq!(
            parse_envelope_header(&data),
            Err(CodecError::IncompleteHeader {
                expected: 5,
                actual: 3
            })
        );
    }

    #[test]
    fn test_parse_envelope_header_invalid_flags() {
        let data = [0xFF, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(
            parse_envelope_header(&data),
            Err(CodecError::InvalidFlags(0xFF))
        );
    }

    #[test]
    fn test_codec_decode_records_frame_head() {
        let mut msg = Msg::default();
        let frame = wrap_envelope(b"hello", envelope_flags::END_STREAM);
        let payload = EnvelopeCodec.decode(&mut msg, frame).unwrap();

        assert_eq!(payload, Bytes::from_static(b"hello"));
        let head = msg
            .frame_head()
            .and_then(|h| h.downcast_ref::<FrameHead>())
            .copied();
        assert_eq!(
            head,
            Some(FrameHead {
                flags: envelope_flags::END_STREAM,
                length: 5
            })
        );
    }

    #[test]
    fn test_codec_decode_length_mismatch() {
        let mut msg = Msg::default();
        let mut frame = wrap_envelope(b"hello", envelope_flags::MESSAGE).to_vec();
        frame.pop();
        let err = EnvelopeCodec.decode(&mut msg, frame.into()).unwrap_err();
        assert_eq!(
            err,
            CodecError::LengthMismatch {
                declared: 5,
                actual: 4
            }
        );
    }

    #[test]
    fn test_codec_encode_flags_follow_message() {
        let mut msg = Msg::default();
        msg.set_compress_type(compress_type::GZIP);
        msg.set_frame_head(Arc::new(FrameHead {
            flags: envelope_flags::END_STREAM,
            length: 0,
        }));
        let frame = EnvelopeCodec
            .encode(&mut msg, Bytes::from_static(b"x"))
            .unwrap();
        assert_eq!(
            frame[0],
            envelope_flags::COMPRESSED | envelope_flags::END_STREAM
        );
        assert_eq!(&frame[5..], b"x");
    }
}
