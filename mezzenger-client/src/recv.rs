// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Background receive worker for the subscription socket.
//!
//! Polls with a 2s timeout, invokes the matching handler from the
//! subscription table, and auto-acks messages that request it. A decode
//! failure on a successfully-read frame is logged and the loop continues;
//! only a failure reading the frame itself (the socket closing or erroring)
//! stops the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mezzenger_proto::framing::read_frame;
use mezzenger_proto::Message;
use tokio::net::tcp::OwnedReadHalf;

use crate::config::RECEIVE_POLL;
use crate::{Handler, Subscriptions};

/// Runs until `running` is cleared (observed at the top of each 2s poll
/// cycle) or the subscription socket closes or errors.
pub(crate) async fn run(
    mut sub_read: OwnedReadHalf,
    subscriptions: Arc<Mutex<Subscriptions>>,
    running: Arc<AtomicBool>,
    acker: impl Fn(Vec<u8>) + Send + Sync + 'static,
    verbose: bool,
) {
    while running.load(Ordering::Acquire) {
        match tokio::time::timeout(RECEIVE_POLL, read_frame(&mut sub_read)).await {
            Ok(Ok(Some(frame))) => handle_frame(&frame, &subscriptions, &acker, verbose),
            Ok(Ok(None)) => {
                log::info!("subscription socket closed by broker");
                break;
            }
            Ok(Err(err)) => {
                log::error!("subscription socket read failed: {err}");
                break;
            }
            Err(_elapsed) => continue,
        }
    }
    log::debug!("receive worker stopped");
}

fn handle_frame(
    frame: &[u8],
    subscriptions: &Arc<Mutex<Subscriptions>>,
    acker: &(impl Fn(Vec<u8>) + Send + Sync),
    verbose: bool,
) {
    let message: Message = match mezzenger_proto::decode(frame) {
        Ok(message) => message,
        Err(err) => {
            log::warn!("dropping unparseable published frame: {err}");
            return;
        }
    };

    let handler: Option<Handler> = subscriptions.lock().unwrap().get(&message.name).cloned();
    if let Some(handler) = handler {
        if verbose {
            log::debug!("dispatching {message}");
        } else {
            log::trace!("dispatching {message}");
        }
        handler(message.payload.clone(), message.clone());
    } else if verbose {
        log::debug!("no subscriber for {message}, dropping");
    } else {
        log::trace!("no subscriber for {message}, dropping");
    }

    if message.ack > 0 {
        acker(message.checksum.clone());
    }
}
