// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Owns the broker's ack-tracked retention table behind a single task:
//! callers hold a cheaply cloneable [`RetentionHandle`] and talk to the one
//! [`RetentionRunner`] task that actually owns the table, so the table is
//! never touched from two tasks at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use mezzenger_persist::Persistence;
use mezzenger_proto::Message;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::{RESEND_INTERVAL, RETRANSMIT_TICK};

enum Request {
    Insert(Message, oneshot::Sender<()>),
    Ack(Vec<u8>, oneshot::Sender<()>),
    Quit,
}

/// Cheaply cloneable handle to the running [`RetentionRunner`].
#[derive(Clone)]
pub struct RetentionHandle(mpsc::UnboundedSender<Request>);

impl RetentionHandle {
    /// Retains `message` for retransmission until an ack for its checksum
    /// arrives. Resolves only once the runner has applied the mutation and
    /// finished its snapshot, so a caller replying `OK` right after this
    /// returns never races the retention table it just wrote to.
    pub async fn insert(&self, message: Message) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.0.send(Request::Insert(message, reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Removes a retained entry by checksum. A checksum not present in the
    /// table is a no-op, matching the ack idempotence property. Resolves
    /// only once the runner has applied the removal (and snapshot, if it
    /// removed anything).
    pub async fn ack(&self, checksum: Vec<u8>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.0.send(Request::Ack(checksum, reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Signals the runner to persist, stop its retransmit loop and exit.
    pub fn quit(&self) {
        let _ = self.0.send(Request::Quit);
    }
}

/// The single task that owns the retention table.
///
/// Spawn [`RetentionRunner::run`] once; everything else talks to it through
/// a [`RetentionHandle`].
pub struct RetentionRunner {
    table: HashMap<Vec<u8>, (u64, Message)>,
    request_rx: mpsc::UnboundedReceiver<Request>,
    outbound: broadcast::Sender<Bytes>,
    persistence: Option<Arc<dyn Persistence>>,
    /// Raises per-message retransmit logging from `trace!` to `debug!`.
    verbose: bool,
}

/// Creates a new retention runner and its handle.
///
/// `initial` seeds the table from a prior [`Persistence::load`], letting the
/// broker restore retained messages across restarts.
pub fn new(
    initial: Vec<(u64, Message)>,
    outbound: broadcast::Sender<Bytes>,
    persistence: Option<Arc<dyn Persistence>>,
    verbose: bool,
) -> (RetentionHandle, RetentionRunner) {
    let (tx, rx) = mpsc::unbounded_channel();
    let table = initial
        .into_iter()
        .map(|(last_resent_at, message)| (message.checksum.clone(), (last_resent_at, message)))
        .collect();
    (
        RetentionHandle(tx),
        RetentionRunner { table, request_rx: rx, outbound, persistence, verbose },
    )
}

impl RetentionRunner {
    /// Runs until [`RetentionHandle::quit`] is called or every handle is
    /// dropped, servicing retention mutations and the retransmit tick.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(RETRANSMIT_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                request = self.request_rx.recv() => {
                    match request {
                        Some(Request::Insert(message, reply_tx)) => {
                            self.handle_insert(message).await;
                            let _ = reply_tx.send(());
                        }
                        Some(Request::Ack(checksum, reply_tx)) => {
                            self.handle_ack(checksum).await;
                            let _ = reply_tx.send(());
                        }
                        Some(Request::Quit) | None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.retransmit_due_entries().await;
                }
            }
        }

        self.snapshot().await;
        log::info!("retention runner stopping with {} retained message(s)", self.table.len());
    }

    async fn handle_insert(&mut self, message: Message) {
        let checksum = message.checksum.clone();
        self.table.insert(checksum, (now_millis(), message));
        self.snapshot().await;
    }

    async fn handle_ack(&mut self, checksum: Vec<u8>) {
        if self.table.remove(&checksum).is_some() {
            self.snapshot().await;
        }
    }

    async fn retransmit_due_entries(&mut self) {
        let due: Vec<Vec<u8>> = self
            .table
            .iter()
            .filter(|(_, (last_resent_at, _))| is_due(*last_resent_at))
            .map(|(checksum, _)| checksum.clone())
            .collect();

        if due.is_empty() {
            return;
        }

        let now = now_millis();
        for checksum in due {
            if let Some((last_resent_at, message)) = self.table.get_mut(&checksum) {
                let frame = mezzenger_proto::encode(message);
                let _ = self.outbound.send(frame);
                *last_resent_at = now;
                if self.verbose {
                    log::debug!("retransmitted {message}");
                } else {
                    log::trace!("retransmitted {message}");
                }
            }
        }
        self.snapshot().await;
    }

    async fn snapshot(&self) {
        let Some(persistence) = &self.persistence else { return };
        let entries: Vec<_> = self.table.values().cloned().collect();
        if let Err(err) = persistence.save(&entries).await {
            log::warn!("failed to persist retention table: {err}");
        }
    }
}

fn is_due(last_resent_at: u64) -> bool {
    now_millis().saturating_sub(last_resent_at) >= RESEND_INTERVAL.as_millis() as u64
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_removes_retained_message() {
        let (outbound_tx, _outbound_rx) = broadcast::channel(16);
        let (handle, runner) = new(Vec::new(), outbound_tx, None, false);
        let runner_task = tokio::spawn(runner.run());

        let message = Message::now(b"t".to_vec(), b"x".to_vec(), 1);
        let checksum = message.checksum.clone();
        handle.insert(message).await;
        handle.ack(checksum).await;
        handle.quit();

        runner_task.await.unwrap();
    }

    #[tokio::test]
    async fn ack_for_unknown_checksum_is_a_no_op() {
        let (outbound_tx, _outbound_rx) = broadcast::channel(16);
        let (handle, runner) = new(Vec::new(), outbound_tx, None, false);
        let runner_task = tokio::spawn(runner.run());

        handle.ack(vec![1, 2, 3, 4]).await;
        handle.quit();

        runner_task.await.unwrap();
    }

    #[tokio::test]
    async fn retransmit_due_entries_republishes_only_expired_entries() {
        let (outbound_tx, mut outbound_rx) = broadcast::channel(16);
        let (_handle, mut runner) = new(Vec::new(), outbound_tx, None, false);

        let fresh = Message::now(b"fresh".to_vec(), b"x".to_vec(), 1);
        let stale = Message::now(b"stale".to_vec(), b"y".to_vec(), 1);
        let now = now_millis();
        runner.table.insert(fresh.checksum.clone(), (now, fresh));
        let stale_checksum = stale.checksum.clone();
        runner
            .table
            .insert(stale_checksum.clone(), (now.saturating_sub(RESEND_INTERVAL.as_millis() as u64 + 1), stale));

        runner.retransmit_due_entries().await;

        let published = outbound_rx.try_recv().expect("stale entry should have been retransmitted");
        let decoded = mezzenger_proto::decode(&published).unwrap();
        assert_eq!(decoded.checksum, stale_checksum);
        assert!(outbound_rx.try_recv().is_err(), "fresh entry should not have been retransmitted yet");
    }
}
