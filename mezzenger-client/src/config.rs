// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::IpAddr;
use std::time::Duration;

/// Configuration for [`crate::connect`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Address of the broker's two endpoints.
    pub server: IpAddr,
    /// Port of the broker's inbound request/reply endpoint.
    pub send_port: u16,
    /// Port of the broker's outbound fan-out endpoint.
    pub sub_port: u16,
    /// How long `send` waits for a reply before reconnecting and retrying.
    pub send_timeout: Duration,
    /// How many reconnect-and-resend cycles `send` attempts after the
    /// initial one before giving up with `Unreachable`.
    pub retries: u32,
    /// Raises per-message trace logging from `trace!` to `debug!`, mirroring
    /// the source's `verbose` flag.
    pub verbose: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".parse().expect("valid default address"),
            send_port: 7202,
            sub_port: 7201,
            send_timeout: Duration::from_millis(2000),
            retries: 5,
            verbose: false,
        }
    }
}

/// Cadence at which the receive worker polls the subscription socket.
pub const RECEIVE_POLL: Duration = Duration::from_secs(2);
