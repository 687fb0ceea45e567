// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Wire codec and framing shared by the mezzenger broker and client.
//!
//! This crate only knows about bytes: it has no notion of sockets, retention,
//! or subscriptions. [`Message`] is the value type both sides exchange,
//! [`codec`] turns it into and out of the `name || SEP || body` frame the
//! protocol uses on every transport, and [`framing`] carries one such frame
//! at a time over any `AsyncRead`/`AsyncWrite` stream.

pub mod codec;
pub mod error;
pub mod framing;
mod message;

pub use codec::{decode, encode, peek_name, SEP};
pub use error::ParseError;
pub use message::{checksum_of, Message, ACK, PING, SUB, UNSUB};
