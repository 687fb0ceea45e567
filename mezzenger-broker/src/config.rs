// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::BrokerRunner`], mirroring the broker binary's
/// CLI flags one for one.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Address both endpoints bind to.
    pub bind: IpAddr,
    /// Port the fan-out publish endpoint listens on.
    pub pub_port: u16,
    /// Port the request/reply inbound endpoint listens on.
    pub recv_port: u16,
    /// Optional whole-table snapshot file. `None` keeps the retention table
    /// purely in memory.
    pub persist_file: Option<PathBuf>,
    /// Raises the log level emitted for per-message traces from `trace!` to
    /// `debug!`, mirroring the source's `verbose` flag.
    pub verbose: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".parse().expect("valid default address"),
            pub_port: 7201,
            recv_port: 7202,
            persist_file: None,
            verbose: false,
        }
    }
}

/// How long a retained message is left unacknowledged before the retransmit
/// loop republishes it.
pub const RESEND_INTERVAL: Duration = Duration::from_secs(10);

/// Cadence at which the retransmit loop checks retained entries against
/// [`RESEND_INTERVAL`].
pub const RETRANSMIT_TICK: Duration = Duration::from_secs(1);
