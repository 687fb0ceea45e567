// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Length-prefixed framing over an async byte stream.
//!
//! Every frame on the wire is a `u32` big-endian length followed by that many
//! bytes produced by [`crate::codec::encode`]. This plays the role ZeroMQ's
//! own framing plays in the transport this protocol was originally carried
//! over: one logical message in, one logical message out, with no partial
//! reads visible to callers.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ParseError;

/// Frames larger than this are rejected before an allocation is attempted,
/// so a corrupt or adversarial length prefix cannot force an unbounded
/// allocation.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Reads one length-prefixed frame from `stream`.
///
/// Returns `Ok(None)` on a clean EOF before any bytes of a new frame have
/// been read (the peer closed the connection between frames, not mid-frame).
pub async fn read_frame<R>(stream: &mut R) -> Result<Option<Vec<u8>>, ParseError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match read_exact_or_eof(stream, &mut len_buf).await? {
        false => return Ok(None),
        true => {}
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(ParseError::BadLength {
            field: "frame",
            declared: len as usize,
            remaining: MAX_FRAME_LEN as usize,
        });
    }

    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Writes one length-prefixed frame to `stream` and flushes it.
pub async fn write_frame<W>(stream: &mut W, frame: &[u8]) -> Result<(), ParseError>
where
    W: AsyncWrite + Unpin,
{
    if frame.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(ParseError::BadLength {
            field: "frame",
            declared: frame.len(),
            remaining: MAX_FRAME_LEN as usize,
        });
    }
    stream.write_all(&(frame.len() as u32).to_be_bytes()).await?;
    stream.write_all(frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Like `read_exact`, but returns `Ok(false)` instead of erroring when the
/// stream is at EOF before any byte of `buf` has been filled.
async fn read_exact_or_eof<R>(stream: &mut R, buf: &mut [u8]) -> Result<bool, ParseError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(ParseError::UnexpectedEof);
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let (mut a, mut b) = duplex(1024);
        write_frame(&mut a, b"hello").await.unwrap();
        let got = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn clean_eof_between_frames_yields_none() {
        let (a, mut b) = duplex(1024);
        drop(a);
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut a, mut b) = duplex(1024);
        a.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes()).await.unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }
}
