// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ParseError;
use crate::message::Message;

/// Byte separating a frame's routing name from its encoded body.
///
/// Topic names are expected not to contain this byte, letting a publish
/// endpoint prefix-match subscriptions against raw bytes without touching
/// the body.
pub const SEP: u8 = b'|';

/// Encodes a message into `name || SEP || body`.
///
/// `body` is this crate's own opaque field encoding; it makes no attempt to
/// be compatible with any other serialization and only needs to round-trip
/// through [`decode`].
pub fn encode(message: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(
        message.name.len() + 1 + 4 + 8 + 4 + message.checksum.len() + 4 + message.payload.len(),
    );
    buf.put_slice(&message.name);
    buf.put_u8(SEP);
    buf.put_u32(message.ack);
    buf.put_u64(message.timestamp);
    buf.put_u32(message.checksum.len() as u32);
    buf.put_slice(&message.checksum);
    buf.put_u32(message.payload.len() as u32);
    buf.put_slice(&message.payload);
    buf.freeze()
}

/// Decodes a frame produced by [`encode`].
///
/// The returned message's `name` is exactly the bytes preceding the first
/// [`SEP`] in `frame`, which is also what transports use for prefix-match
/// subscription filtering, so routing and decoding always agree.
pub fn decode(frame: &[u8]) -> Result<Message, ParseError> {
    let sep_at = frame
        .iter()
        .position(|&b| b == SEP)
        .ok_or(ParseError::MissingSeparator)?;
    let name = frame[..sep_at].to_vec();
    let mut body = &frame[sep_at + 1..];

    let ack = take_u32(&mut body, "ack")?;
    let timestamp = take_u64(&mut body, "timestamp")?;

    let checksum_len = take_u32(&mut body, "checksum_len")? as usize;
    if body.remaining() < checksum_len {
        return Err(ParseError::BadLength {
            field: "checksum",
            declared: checksum_len,
            remaining: body.remaining(),
        });
    }
    let checksum = body[..checksum_len].to_vec();
    body.advance(checksum_len);

    let payload_len = take_u32(&mut body, "payload_len")? as usize;
    if body.remaining() < payload_len {
        return Err(ParseError::BadLength {
            field: "payload",
            declared: payload_len,
            remaining: body.remaining(),
        });
    }
    let payload = body[..payload_len].to_vec();
    body.advance(payload_len);

    Ok(Message { name, payload, ack, timestamp, checksum })
}

fn take_u32(buf: &mut &[u8], _field: &'static str) -> Result<u32, ParseError> {
    if buf.remaining() < 4 {
        return Err(ParseError::UnexpectedEof);
    }
    Ok(buf.get_u32())
}

fn take_u64(buf: &mut &[u8], _field: &'static str) -> Result<u64, ParseError> {
    if buf.remaining() < 8 {
        return Err(ParseError::UnexpectedEof);
    }
    Ok(buf.get_u64())
}

/// Returns the bytes up to (but not including) the first [`SEP`] in `frame`,
/// without decoding the body. Used by the broker's publish endpoint to
/// perform prefix-match filtering without paying for a full decode.
pub fn peek_name(frame: &[u8]) -> Option<&[u8]> {
    let sep_at = frame.iter().position(|&b| b == SEP)?;
    Some(&frame[..sep_at])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_semantic_fields() {
        let m = Message::new(b"topic".to_vec(), b"hello".to_vec(), 1, 42);
        let frame = encode(&m);
        let decoded = decode(&frame).expect("valid frame");
        assert_eq!(decoded.name, m.name);
        assert_eq!(decoded.payload, m.payload);
        assert_eq!(decoded.ack, m.ack);
        assert_eq!(decoded.timestamp, m.timestamp);
        assert_eq!(decoded.checksum, m.checksum);
    }

    #[test]
    fn round_trips_empty_payload() {
        let m = Message::now(b"t".to_vec(), Vec::new(), 0);
        let frame = encode(&m);
        assert_eq!(decode(&frame).unwrap(), m);
    }

    #[test]
    fn missing_separator_is_rejected() {
        assert!(matches!(decode(b"no-separator-here"), Err(ParseError::MissingSeparator)));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let mut frame = encode(&Message::now(b"t".to_vec(), b"payload".to_vec(), 0)).to_vec();
        frame.truncate(frame.len() - 2);
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn peek_name_matches_decoded_name() {
        let m = Message::now(b"topic".to_vec(), b"x".to_vec(), 0);
        let frame = encode(&m);
        assert_eq!(peek_name(&frame), Some(m.name.as_slice()));
    }
}
