// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Reserved topic name used for the liveness handshake.
///
/// Never fanned out; the broker replies `OK` and drops it.
pub const PING: &[u8] = b"ping";

/// Reserved topic name used to acknowledge a previously retained message.
///
/// The payload carries the [`Message::checksum`] being acknowledged.
pub const ACK: &[u8] = b"ack";

/// Reserved topic name for a subscription-endpoint control frame asking the
/// broker to start forwarding messages whose name starts with `payload`.
///
/// Not a `Message` exchanged over the inbound request/reply endpoint; this
/// only ever flows over the outbound subscription connection, replacing the
/// `SUBSCRIBE` control ZeroMQ's `SUB` socket sends transparently.
pub const SUB: &[u8] = b"__sub__";

/// Reserved topic name for the `SUB` counterpart that stops forwarding.
pub const UNSUB: &[u8] = b"__unsub__";

/// A single named message flowing between a client and the broker.
///
/// `name` doubles as the routing key and the subscription filter prefix: the
/// framed wire form always starts with `name` unencoded, so a subscriber can
/// be matched without decoding the body (see [`crate::framing`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub name: Vec<u8>,
    pub payload: Vec<u8>,
    /// `0` means fire-and-forget; `> 0` requests retention and retransmission
    /// until an `ack` referencing this message's checksum is received.
    pub ack: u32,
    /// Milliseconds since the Unix epoch, assigned once at construction.
    pub timestamp: u64,
    /// Content-derived identity, stable across the wire. Empty only when
    /// `ack == 0` and no peer needs to address this message by identity.
    pub checksum: Vec<u8>,
}

impl Message {
    /// Builds a message and computes its checksum now, using the current
    /// wall-clock time as the timestamp.
    ///
    /// This is the constructor application code should use; [`Message::new`]
    /// below exists for codec round-trips and tests where the timestamp is
    /// already known.
    pub fn now(name: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>, ack: u32) -> Self {
        let timestamp = current_millis();
        Self::new(name, payload, ack, timestamp)
    }

    /// Builds a message with an explicit timestamp, computing its checksum.
    pub fn new(name: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>, ack: u32, timestamp: u64) -> Self {
        let name = name.into();
        let payload = payload.into();
        let checksum = checksum_of(&name, &payload, timestamp);
        Self { name, payload, ack, timestamp, checksum }
    }

    /// A ping handshake message; never carries an ack.
    pub fn ping() -> Self {
        Self::now(PING, Vec::new(), 0)
    }

    /// An ack control message referencing `checksum`.
    pub fn ack(checksum: Vec<u8>) -> Self {
        Self::now(ACK, checksum, 0)
    }

    pub fn is_ping(&self) -> bool {
        self.name == PING
    }

    pub fn is_ack(&self) -> bool {
        self.name == ACK
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message(name={}, {} byte payload, ack={}, ts={})",
            String::from_utf8_lossy(&self.name),
            self.payload.len(),
            self.ack,
            self.timestamp
        )
    }
}

/// Collision-resistant-within-a-window, non-cryptographic identity for a
/// message. Only needs to be stable across peers, not secure.
pub fn checksum_of(name: &[u8], payload: &[u8], timestamp: u64) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(name);
    hasher.update(payload);
    hasher.update(&timestamp.to_be_bytes());
    hasher.finalize().to_be_bytes().to_vec()
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        let a = checksum_of(b"topic", b"payload", 1234);
        let b = checksum_of(b"topic", b"payload", 1234);
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_differs_on_timestamp() {
        let a = checksum_of(b"topic", b"payload", 1234);
        let b = checksum_of(b"topic", b"payload", 1235);
        assert_ne!(a, b);
    }

    #[test]
    fn ping_and_ack_are_recognized() {
        assert!(Message::ping().is_ping());
        assert!(Message::ack(vec![1, 2, 3]).is_ack());
    }
}
