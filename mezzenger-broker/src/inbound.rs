// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Request/reply inbound endpoint.
//!
//! Stands in for a ZeroMQ `ROUTER` socket multiplexing many peers with an
//! identity frame per request. A plain `TcpListener` already hands each
//! client its own connection, so every accepted connection here *is* one
//! client's identity; the request/reply exchange happens directly on it
//! with no identity frame on the wire.

use std::net::SocketAddr;

use bytes::Bytes;
use mezzenger_proto::framing::{read_frame, write_frame};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::error::BrokerError;
use crate::retention::RetentionHandle;

const OK: &[u8] = b"OK";

/// Accepts client connections for the request/reply inbound endpoint.
pub struct InboundEndpoint {
    listener: TcpListener,
    retention: RetentionHandle,
    publish_tx: broadcast::Sender<Bytes>,
    /// Raises per-message publish logging from `trace!` to `debug!`.
    verbose: bool,
}

impl InboundEndpoint {
    pub async fn bind(
        addr: SocketAddr,
        retention: RetentionHandle,
        publish_tx: broadcast::Sender<Bytes>,
        verbose: bool,
    ) -> Result<Self, BrokerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BrokerError::Bind { endpoint: "inbound", source })?;
        Ok(Self { listener, retention, publish_tx, verbose })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `stop` resolves, serving each on its own
    /// task. On drain, every still-open client connection is aborted rather
    /// than left to linger, so a stopped broker actually stops answering.
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
                            log::debug!("inbound connection from {peer}");
                            let retention = self.retention.clone();
                            let publish_tx = self.publish_tx.clone();
                            connections.spawn(serve_client(stream, retention, publish_tx, self.verbose));
                        }
                        Err(err) => {
                            log::warn!("inbound accept failed: {err}");
                        }
                    }
                }
            }
        }
        connections.shutdown().await;
        log::info!("inbound endpoint draining");
    }
}

/// Services one client connection for as long as it stays open.
///
/// A retention mutation (insert on an ack-requested message, or removal on
/// an `ack` control message) is awaited to completion — including its
/// snapshot, if persistence is enabled — before the `OK` reply is written,
/// so a reply never reaches the client ahead of the table state it implies.
/// The outbound publish still happens after that reply, keeping the
/// request/reply round-trip itself bounded.
async fn serve_client(
    mut stream: TcpStream,
    retention: RetentionHandle,
    publish_tx: broadcast::Sender<Bytes>,
    verbose: bool,
) {
    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(err) => {
                log::debug!("inbound connection read failed: {err}");
                return;
            }
        };

        let message = match mezzenger_proto::decode(&frame) {
            Ok(message) => message,
            Err(err) => {
                // Dropped without a reply: the client will time out and
                // retry rather than receive an error token here.
                log::warn!("dropping unparseable inbound frame: {err}");
                continue;
            }
        };

        if message.is_ack() {
            retention.ack(message.payload).await;
            if write_frame(&mut stream, OK).await.is_err() {
                return;
            }
        } else if message.is_ping() {
            if write_frame(&mut stream, OK).await.is_err() {
                return;
            }
        } else {
            if verbose {
                log::debug!("publishing {message}");
            } else {
                log::trace!("publishing {message}");
            }
            if message.ack > 0 {
                retention.insert(message).await;
            }
            if write_frame(&mut stream, OK).await.is_err() {
                return;
            }
            // Re-decode is avoided: the inbound frame already carries the
            // wire form `publish` fans out verbatim.
            let _ = publish_tx.send(Bytes::copy_from_slice(&frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mezzenger_proto::Message;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn ping_replies_ok_and_does_not_publish() {
        let (mut client, server) = connected_pair().await;
        let (tx, mut rx) = broadcast::channel(4);
        let (handle, runner) = crate::retention::new(Vec::new(), tx.clone(), None, false);
        tokio::spawn(runner.run());
        tokio::spawn(serve_client(server, handle.clone(), tx, false));

        let frame = mezzenger_proto::encode(&Message::ping());
        write_frame(&mut client, &frame).await.unwrap();
        let reply = read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(reply, OK);

        assert!(rx.try_recv().is_err());
        handle.quit();
    }

    #[tokio::test]
    async fn ack_gt_zero_message_is_retained_then_published() {
        let (mut client, server) = connected_pair().await;
        let (tx, mut rx) = broadcast::channel(4);
        let (handle, runner) = crate::retention::new(Vec::new(), tx.clone(), None, false);
        tokio::spawn(runner.run());
        tokio::spawn(serve_client(server, handle.clone(), tx, false));

        let message = Message::now(b"T".to_vec(), b"x".to_vec(), 1);
        let frame = mezzenger_proto::encode(&message);
        write_frame(&mut client, &frame).await.unwrap();
        let reply = read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(reply, OK);

        let published = rx.recv().await.unwrap();
        assert_eq!(published.as_ref(), frame.as_ref());
        handle.quit();
    }

    #[tokio::test]
    async fn ack_control_message_removes_retention_without_publish() {
        let (mut client, server) = connected_pair().await;
        let (tx, mut rx) = broadcast::channel(4);
        let (handle, runner) = crate::retention::new(Vec::new(), tx.clone(), None, false);
        tokio::spawn(runner.run());
        tokio::spawn(serve_client(server, handle.clone(), tx, false));

        let ack = Message::ack(vec![1, 2, 3]);
        let frame = mezzenger_proto::encode(&ack);
        write_frame(&mut client, &frame).await.unwrap();
        let reply = read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(reply, OK);

        assert!(rx.try_recv().is_err());
        handle.quit();
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_without_reply() {
        let (mut client, server) = connected_pair().await;
        let (tx, _rx) = broadcast::channel(4);
        let (handle, runner) = crate::retention::new(Vec::new(), tx.clone(), None, false);
        tokio::spawn(runner.run());
        tokio::spawn(serve_client(server, handle.clone(), tx, false));

        write_frame(&mut client, b"no-separator").await.unwrap();
        let good = mezzenger_proto::encode(&Message::ping());
        write_frame(&mut client, &good).await.unwrap();
        let reply = read_frame(&mut client).await.unwrap().unwrap();
        assert_eq!(reply, OK);

        handle.quit();
    }
}
