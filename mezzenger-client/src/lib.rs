// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Client library for the mezzenger topic-based publish/subscribe bus.
//!
//! [`connect`] opens both sockets, performs the `ping` handshake, and starts
//! a background receive worker, returning a cheaply cloneable [`ClientHandle`]
//! wrapping an `Arc<ClientInner>`.

pub mod config;
pub mod error;
mod recv;
mod send;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mezzenger_proto::{Message, ACK, PING, SUB, UNSUB};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

pub use config::ClientConfig;
pub use error::ClientError;

/// A subscription callback: consumes the message's payload and the full
/// decoded [`Message`].
pub type Handler = Arc<dyn Fn(Vec<u8>, Message) + Send + Sync>;

type Subscriptions = HashMap<Vec<u8>, Handler>;

struct ClientInner {
    config: ClientConfig,
    send_addr: SocketAddr,
    send_stream: AsyncMutex<TcpStream>,
    sub_write: AsyncMutex<OwnedWriteHalf>,
    subscriptions: Arc<Mutex<Subscriptions>>,
    running: Arc<AtomicBool>,
}

/// Cheaply cloneable handle to a running client. All public operations are
/// methods on this type; there is nothing else applications construct.
#[derive(Clone)]
pub struct ClientHandle(Arc<ClientInner>);

/// Opens both sockets to `config.server`, verifies round-trip liveness with
/// a `ping` handshake, and starts the background receive worker.
///
/// Fails with [`ClientError::Connect`] if either socket cannot be opened or
/// the handshake does not yield `OK`.
pub async fn connect(config: ClientConfig) -> Result<ClientHandle, ClientError> {
    let send_addr = SocketAddr::new(config.server, config.send_port);
    let sub_addr = SocketAddr::new(config.server, config.sub_port);

    let send_stream = TcpStream::connect(send_addr).await.map_err(ClientError::Connect)?;
    let sub_stream = TcpStream::connect(sub_addr).await.map_err(ClientError::Connect)?;
    let (sub_read, sub_write) = sub_stream.into_split();

    let subscriptions = Arc::new(Mutex::new(Subscriptions::new()));
    let running = Arc::new(AtomicBool::new(true));
    let verbose = config.verbose;

    let inner = Arc::new(ClientInner {
        config,
        send_addr,
        send_stream: AsyncMutex::new(send_stream),
        sub_write: AsyncMutex::new(sub_write),
        subscriptions: subscriptions.clone(),
        running: running.clone(),
    });

    let acker = {
        let inner = inner.clone();
        move |checksum: Vec<u8>| {
            let inner = inner.clone();
            tokio::spawn(async move {
                let _ = send_control(&inner, Message::ack(checksum)).await;
            });
        }
    };
    tokio::spawn(recv::run(sub_read, subscriptions, running, acker, verbose));

    handshake(&inner).await?;

    log::info!("client connected to {send_addr} (send) / {sub_addr} (sub)");
    Ok(ClientHandle(inner))
}

/// Sends a single `ping` and requires `OK` without the bounded-retry
/// behavior `send` uses for steady-state traffic: a handshake failure
/// should surface immediately as [`ClientError::Connect`], not after
/// `retries` reconnect cycles.
async fn handshake(inner: &ClientInner) -> Result<(), ClientError> {
    let ping = Message::ping();
    let frame = mezzenger_proto::encode(&ping);
    let mut stream = inner.send_stream.lock().await;
    match send::attempt(&mut stream, &frame, inner.config.send_timeout).await {
        Some(_reply) => Ok(()),
        None => Err(ClientError::Connect(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "ping handshake did not receive a reply",
        ))),
    }
}

impl ClientHandle {
    /// Installs `name → handler`. Replacing an existing handler for the same
    /// name is idempotent and does not re-register the transport filter.
    pub async fn subscribe(&self, name: impl Into<Vec<u8>>, handler: Handler) -> Result<(), ClientError> {
        if !self.0.running.load(Ordering::Acquire) {
            return Err(ClientError::NotRunning);
        }
        let name = name.into();
        let first_time = {
            let mut subs = self.0.subscriptions.lock().unwrap();
            let first_time = !subs.contains_key(&name);
            subs.insert(name.clone(), handler);
            first_time
        };
        if first_time {
            send_control(&self.0, Message::now(SUB, name, 0)).await;
        }
        Ok(())
    }

    /// Removes the mapping for `name` and clears its transport filter.
    ///
    /// Fails with [`ClientError::NotSubscribed`] if `name` has no active
    /// subscription.
    pub async fn unsubscribe(&self, name: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        let name = name.into();
        let removed = self.0.subscriptions.lock().unwrap().remove(&name).is_some();
        if !removed {
            return Err(ClientError::NotSubscribed);
        }
        send_control(&self.0, Message::now(UNSUB, name, 0)).await;
        Ok(())
    }

    /// Synchronous send: returns once the broker replies `OK`, retrying
    /// with reconnects up to the configured `retries` on timeout.
    ///
    /// Fails with [`ClientError::Unreachable`] once every retry cycle has
    /// timed out.
    pub async fn send(&self, name: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>, ack: u32) -> Result<(), ClientError> {
        if !self.0.running.load(Ordering::Acquire) {
            return Err(ClientError::NotRunning);
        }
        let message = Message::now(name, payload, ack);
        let frame = mezzenger_proto::encode(&message);
        let mut stream = self.0.send_stream.lock().await;
        send::send_with_retry(&mut stream, self.0.send_addr, &frame, self.0.config.send_timeout, self.0.config.retries).await
    }

    /// Signals shutdown. The receive worker observes this at its next 2s
    /// poll tick; subsequent `subscribe` calls fail with
    /// [`ClientError::NotRunning`].
    pub fn stop(&self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// Fire-and-forget write of a control message (`ping`/`ack`/`__sub__`/`__unsub__`)
/// directly on its owning socket, bypassing `send`'s retry/reconnect path
/// since these are one-way and the caller does not wait on a reply here.
async fn send_control(inner: &ClientInner, message: Message) {
    let frame = mezzenger_proto::encode(&message);
    if message.name == PING || message.name == ACK {
        let mut stream = inner.send_stream.lock().await;
        if let Err(err) = mezzenger_proto::framing::write_frame(&mut *stream, &frame).await {
            log::warn!("failed to write control frame {message}: {err}");
        }
    } else {
        let mut write_half = inner.sub_write.lock().await;
        if let Err(err) = mezzenger_proto::framing::write_frame(&mut *write_half, &frame).await {
            log::warn!("failed to write control frame {message}: {err}");
        }
    }
}
