// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::{fmt, io};

/// Errors a [`crate::ClientHandle`] can surface to its caller.
#[derive(Debug)]
pub enum ClientError {
    /// The constructor's `ping` handshake did not yield an `OK` reply.
    Connect(io::Error),

    /// `send` exhausted its configured retries without a reply.
    Unreachable,

    /// `unsubscribe` was called for a name with no active subscription.
    NotSubscribed,

    /// `subscribe` or `send` was called after [`crate::ClientHandle::stop`].
    NotRunning,
}

impl std::error::Error for ClientError {}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(err) => write!(f, "connect error: handshake failed: {err}"),
            Self::Unreachable => write!(f, "unreachable: send exhausted its retries"),
            Self::NotSubscribed => write!(f, "not subscribed to that name"),
            Self::NotRunning => write!(f, "client has been stopped"),
        }
    }
}
