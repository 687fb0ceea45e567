// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Broker process for the mezzenger topic-based publish/subscribe bus.
//!
//! A [`BrokerRunner`] owns everything: the retention table (via
//! [`retention::RetentionRunner`], its own task), the inbound request/reply
//! endpoint, and the outbound fan-out endpoint. [`new`] returns it paired
//! with a [`BrokerHandle`] applications use to request a shutdown and
//! observe the broker's [`BrokerState`].

pub mod config;
pub mod error;
mod inbound;
mod outbound;
mod retention;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use mezzenger_persist::Persistence;
use tokio::sync::watch;

pub use config::BrokerConfig;
pub use error::BrokerError;
pub use state::BrokerState;

use inbound::InboundEndpoint;
use outbound::OutboundEndpoint;

/// How many in-flight publishes a slow subscriber may fall behind by before
/// it starts missing broadcast frames (observed as a `Lagged` warning, not a
/// connection error — this broker does not implement subscriber-side flow
/// control).
const PUBLISH_CHANNEL_CAPACITY: usize = 1024;

/// Handle to a running [`BrokerRunner`]. Cheaply cloneable.
#[derive(Clone)]
pub struct BrokerHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<BrokerState>,
}

impl BrokerHandle {
    /// Requests a graceful shutdown. The runner observes this at its next
    /// poll cycle.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Current point in the broker's `Initializing → Bound → Serving →
    /// Draining → Stopped` lifecycle.
    pub fn state(&self) -> BrokerState {
        *self.state_rx.borrow()
    }

    /// Resolves once the broker's state changes, for tests and callers that
    /// want to wait for a specific transition without polling.
    pub async fn changed(&mut self) -> BrokerState {
        let _ = self.state_rx.changed().await;
        self.state()
    }
}

/// The long-running task that drives both transport endpoints and the
/// retention table. Construct with [`new`]; run with [`BrokerRunner::run`].
pub struct BrokerRunner {
    config: BrokerConfig,
    persistence: Option<Arc<dyn Persistence>>,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<BrokerState>,
}

/// Creates a broker and its handle. `persistence` is the optional
/// pluggable snapshotter over the retention table; `None` keeps the table
/// purely in memory.
pub fn new(config: BrokerConfig, persistence: Option<Arc<dyn Persistence>>) -> (BrokerHandle, BrokerRunner) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(BrokerState::Initializing);
    (
        BrokerHandle { stop_tx, state_rx },
        BrokerRunner { config, persistence, stop_rx, state_tx },
    )
}

impl BrokerRunner {
    /// Runs the broker to completion: loads persisted state, binds both
    /// endpoints, serves until a shutdown is requested (via
    /// [`BrokerHandle::stop`] or SIGINT), then drains and writes a final
    /// snapshot before returning.
    pub async fn run(self) -> Result<(), BrokerError> {
        let initial = match &self.persistence {
            Some(persistence) => persistence.load().await?,
            None => Vec::new(),
        };
        log::info!("restored {} retained message(s) from persistence", initial.len());

        let (publish_tx, _keep_alive) = tokio::sync::broadcast::channel::<Bytes>(PUBLISH_CHANNEL_CAPACITY);
        let (retention_handle, retention_runner) =
            retention::new(initial, publish_tx.clone(), self.persistence.clone(), self.config.verbose);
        let retention_task = tokio::spawn(retention_runner.run());

        let inbound_addr = SocketAddr::new(self.config.bind, self.config.recv_port);
        let outbound_addr = SocketAddr::new(self.config.bind, self.config.pub_port);

        let inbound =
            InboundEndpoint::bind(inbound_addr, retention_handle.clone(), publish_tx.clone(), self.config.verbose)
                .await?;
        let outbound = OutboundEndpoint::bind(outbound_addr, publish_tx.clone()).await?;
        let _ = self.state_tx.send(BrokerState::Bound);
        log::info!(
            "broker bound: inbound={}, outbound={}",
            inbound.local_addr().map_err(|source| BrokerError::Bind { endpoint: "inbound", source })?,
            outbound.local_addr().map_err(|source| BrokerError::Bind { endpoint: "outbound", source })?,
        );

        let (drain_tx, drain_rx) = watch::channel(false);
        let inbound_task = tokio::spawn({
            let drain_rx = drain_rx.clone();
            async move { inbound.serve(drain_rx).await }
        });
        let outbound_task = tokio::spawn({
            let drain_rx = drain_rx.clone();
            async move { outbound.serve(drain_rx).await }
        });

        let _ = self.state_tx.send(BrokerState::Serving);
        log::info!("broker serving");

        let mut external_stop = self.stop_rx.clone();
        tokio::select! {
            biased;
            _ = external_stop.changed() => {
                log::info!("stop requested");
            }
            signal = tokio::signal::ctrl_c() => {
                if signal.is_err() {
                    log::warn!("failed to install SIGINT handler, shutting down anyway");
                }
                log::info!("received SIGINT");
            }
        }

        let _ = self.state_tx.send(BrokerState::Draining);
        let _ = drain_tx.send(true);
        let _ = inbound_task.await;
        let _ = outbound_task.await;

        retention_handle.quit();
        let _ = retention_task.await;

        let _ = self.state_tx.send(BrokerState::Stopped);
        log::info!("broker stopped");
        Ok(())
    }
}
