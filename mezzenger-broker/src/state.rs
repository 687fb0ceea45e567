// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;

/// Lifecycle of a running broker: bind both endpoints, serve traffic, drain
/// on shutdown, write a final snapshot, stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerState {
    /// Constructed but neither endpoint has bound yet.
    Initializing,
    /// Both endpoints are bound; the serving loops have not started yet.
    Bound,
    /// Normal operation: inbound requests are answered and the retransmit
    /// loop is running.
    Serving,
    /// Shutdown has been requested; inbound polling has stopped, the
    /// outbound endpoint is closing, and a final snapshot is being written.
    Draining,
    /// Fully shut down. Terminal.
    Stopped,
}

impl fmt::Display for BrokerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Bound => "bound",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
