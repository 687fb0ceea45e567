// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Bounded-retry send over the request/reply socket.
//!
//! Each retry cycle *resends* the request on the freshly reconnected socket
//! rather than only polling an empty one.

use std::io;
use std::time::Duration;

use mezzenger_proto::framing::{read_frame, write_frame};
use tokio::net::TcpStream;

use crate::error::ClientError;

const OK: &[u8] = b"OK";

/// Sends `frame` on `stream`, retrying up to `retries` additional
/// reconnect-and-resend cycles after the initial attempt.
///
/// `stream` is replaced in place on every reconnect, so callers holding the
/// guard that owns it always see the live socket.
pub(crate) async fn send_with_retry(
    stream: &mut TcpStream,
    addr: std::net::SocketAddr,
    frame: &[u8],
    timeout: Duration,
    retries: u32,
) -> Result<(), ClientError> {
    if let Some(reply) = attempt(stream, frame, timeout).await {
        return finish(reply);
    }

    for cycle in 1..=retries {
        log::debug!("send timed out, reconnecting for retry cycle {cycle}/{retries}");
        if let Err(err) = reconnect(stream, addr).await {
            // A dead broker refuses the reconnect instantly; without this
            // wait the whole retry budget would burn through in well under
            // a millisecond instead of pacing out to ~retries*timeout.
            log::warn!("reconnect failed during retry cycle {cycle}: {err}");
            tokio::time::sleep(timeout).await;
            continue;
        }
        if let Some(reply) = attempt(stream, frame, timeout).await {
            return finish(reply);
        }
    }

    if let Err(err) = reconnect(stream, addr).await {
        log::warn!("final reconnect after exhausted retries failed: {err}");
    }
    Err(ClientError::Unreachable)
}

fn finish(reply: Vec<u8>) -> Result<(), ClientError> {
    if reply != OK {
        log::debug!("reply was not the literal OK token: {reply:?}");
    }
    Ok(())
}

/// Writes `frame` and waits up to `timeout` for a reply. Returns `None` on
/// timeout, write failure, or a connection closed mid-wait — all of which
/// the caller treats identically by reconnecting and retrying.
pub(crate) async fn attempt(stream: &mut TcpStream, frame: &[u8], timeout: Duration) -> Option<Vec<u8>> {
    if let Err(err) = write_frame(stream, frame).await {
        log::debug!("send failed: {err}");
        return None;
    }
    match tokio::time::timeout(timeout, read_frame(stream)).await {
        Ok(Ok(Some(reply))) => Some(reply),
        Ok(Ok(None)) => {
            log::debug!("broker closed the request connection");
            None
        }
        Ok(Err(err)) => {
            log::debug!("failed reading reply: {err}");
            None
        }
        Err(_elapsed) => None,
    }
}

/// Closes `stream` with zero linger and replaces it with a fresh connection
/// to `addr`.
async fn reconnect(stream: &mut TcpStream, addr: std::net::SocketAddr) -> io::Result<()> {
    let fresh = TcpStream::connect(addr).await?;
    let old = std::mem::replace(stream, fresh);
    if let Ok(std_stream) = old.into_std() {
        let _ = std_stream.set_linger(Some(Duration::ZERO));
    }
    Ok(())
}
