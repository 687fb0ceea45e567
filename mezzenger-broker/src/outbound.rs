// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Fan-out publish endpoint.
//!
//! Plays the role of a ZeroMQ `PUB` socket: every accepted connection is one
//! subscriber. Subscribers advertise interest with small control frames
//! (`__sub__`/`__unsub__`, payload = the prefix they want), which the
//! connection's own task keeps as a set of byte prefixes, and only frames
//! whose `name` starts with one of those prefixes are written back to it —
//! prefix-match filtering performed here instead of inside a vendor socket
//! implementation.

use std::collections::HashSet;
use std::net::SocketAddr;

use bytes::Bytes;
use mezzenger_proto::{SUB, UNSUB};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::error::BrokerError;

/// Accepts subscriber connections and fans out `publish` traffic to whichever
/// ones asked for it.
pub struct OutboundEndpoint {
    listener: TcpListener,
    publish_tx: broadcast::Sender<Bytes>,
}

impl OutboundEndpoint {
    pub async fn bind(addr: SocketAddr, publish_tx: broadcast::Sender<Bytes>) -> Result<Self, BrokerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BrokerError::Bind { endpoint: "outbound", source })?;
        Ok(Self { listener, publish_tx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `stop` resolves, serving each on its own
    /// task. On drain, every still-open subscriber connection is aborted.
    pub async fn serve(&self, mut stop: tokio::sync::watch::Receiver<bool>) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            log::info!("subscriber connected from {peer}");
                            let rx = self.publish_tx.subscribe();
                            connections.spawn(serve_subscriber(stream, rx));
                        }
                        Err(err) => {
                            log::warn!("outbound accept failed: {err}");
                        }
                    }
                }
            }
        }
        connections.shutdown().await;
        log::info!("outbound endpoint draining");
    }
}

async fn serve_subscriber(mut stream: TcpStream, mut publish_rx: broadcast::Receiver<Bytes>) {
    let mut filters: HashSet<Vec<u8>> = HashSet::new();

    loop {
        tokio::select! {
            frame = mezzenger_proto::framing::read_frame(&mut stream) => {
                match frame {
                    Ok(Some(bytes)) => {
                        if !apply_control_frame(&bytes, &mut filters) {
                            log::debug!("ignoring malformed subscription control frame");
                        }
                    }
                    Ok(None) => {
                        log::debug!("subscriber closed its connection");
                        return;
                    }
                    Err(err) => {
                        log::debug!("subscriber control frame read failed: {err}");
                        return;
                    }
                }
            }
            published = publish_rx.recv() => {
                match published {
                    Ok(frame) => {
                        if matches_any_filter(&frame, &filters) {
                            if let Err(err) = mezzenger_proto::framing::write_frame(&mut stream, &frame).await {
                                log::debug!("failed writing to subscriber: {err}");
                                return;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("subscriber lagged, skipped {skipped} published frame(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

/// Applies a `__sub__`/`__unsub__` control frame to `filters`. Returns
/// `false` if `frame` was not a recognized control frame (which the caller
/// treats as a no-op, not a connection error).
fn apply_control_frame(frame: &[u8], filters: &mut HashSet<Vec<u8>>) -> bool {
    let Some(name) = mezzenger_proto::peek_name(frame) else { return false };
    let Ok(message) = mezzenger_proto::decode(frame) else { return false };

    if name == SUB {
        filters.insert(message.payload);
        true
    } else if name == UNSUB {
        filters.remove(&message.payload);
        true
    } else {
        false
    }
}

fn matches_any_filter(frame: &[u8], filters: &HashSet<Vec<u8>>) -> bool {
    let Some(name) = mezzenger_proto::peek_name(frame) else { return false };
    filters.iter().any(|prefix| name.starts_with(prefix.as_slice()))
}
