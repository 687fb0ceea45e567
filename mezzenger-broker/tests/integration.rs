// Copyright 2024 - developers of the `mezzenger` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end scenarios driving a real broker against real client sockets
//! on loopback.

use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mezzenger_broker::BrokerConfig;
use mezzenger_client::ClientConfig;

fn free_port_pair() -> (u16, u16) {
    let a = StdTcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let b = StdTcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    (a, b)
}

async fn wait_for_port(port: u16) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("port {port} never became connectable");
}

/// Ack-tracked delivery, happy path: the subscriber auto-acks, so the
/// retention table should end up empty with no retransmission.
#[tokio::test]
async fn ack_tracked_delivery_happy_path() {
    let (recv_port, pub_port) = free_port_pair();
    let broker_config = BrokerConfig { recv_port, pub_port, ..Default::default() };
    let (broker_handle, broker_runner) = mezzenger_broker::new(broker_config, None);
    let broker_task = tokio::spawn(broker_runner.run());
    wait_for_port(recv_port).await;
    wait_for_port(pub_port).await;

    let client_config = ClientConfig { send_port: recv_port, sub_port: pub_port, ..Default::default() };
    let subscriber = mezzenger_client::connect(client_config.clone()).await.unwrap();

    let received = Arc::new(AtomicU32::new(0));
    let received_clone = received.clone();
    subscriber
        .subscribe(
            b"T".to_vec(),
            Arc::new(move |payload, _message| {
                assert_eq!(payload, b"x");
                received_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let publisher = mezzenger_client::connect(client_config).await.unwrap();
    publisher.send(b"T".to_vec(), b"x".to_vec(), 1).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(received.load(Ordering::SeqCst), 1);

    broker_handle.stop();
    let _ = broker_task.await;
}

/// Unreachable after retries: the client connects while the broker is up,
/// the broker then goes away, and `send` must return `Unreachable` in
/// approximately `(retries + 1) * send_timeout_ms` once its reconnect
/// attempts keep failing against the now-dead address.
#[tokio::test]
async fn unreachable_after_exhausted_retries() {
    let (recv_port, pub_port) = free_port_pair();
    let broker_config = BrokerConfig { recv_port, pub_port, ..Default::default() };
    let (broker_handle, broker_runner) = mezzenger_broker::new(broker_config, None);
    let broker_task = tokio::spawn(broker_runner.run());
    wait_for_port(recv_port).await;
    wait_for_port(pub_port).await;

    let client_config = ClientConfig {
        send_port: recv_port,
        sub_port: pub_port,
        send_timeout: Duration::from_millis(200),
        retries: 3,
        ..Default::default()
    };
    let client = mezzenger_client::connect(client_config).await.unwrap();

    broker_handle.stop();
    let _ = broker_task.await;

    let started = tokio::time::Instant::now();
    let result = client.send(b"T".to_vec(), b"z".to_vec(), 0).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(mezzenger_client::ClientError::Unreachable)));
    assert!(elapsed >= Duration::from_millis(600), "elapsed was {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1800), "elapsed was {elapsed:?}");
}

/// Persistence restore: one ack-tracked message is sent, the broker is
/// stopped, and a fresh broker over the same persist file should restore
/// the retained entry and keep retransmitting it.
#[tokio::test]
async fn persistence_restores_retained_messages_across_restarts() {
    let dir = std::env::temp_dir();
    let persist_path = dir.join(format!("mezzenger-broker-integration-test-{}", std::process::id()));
    let _ = tokio::fs::remove_file(&persist_path).await;

    let (recv_port, pub_port) = free_port_pair();
    let broker_config = BrokerConfig {
        recv_port,
        pub_port,
        persist_file: Some(persist_path.clone()),
        ..Default::default()
    };
    let persistence: Arc<dyn mezzenger_persist::Persistence> =
        Arc::new(mezzenger_persist::FilePersistence::new(&persist_path));
    let (broker_handle, broker_runner) = mezzenger_broker::new(broker_config.clone(), Some(persistence.clone()));
    let broker_task = tokio::spawn(broker_runner.run());
    wait_for_port(recv_port).await;
    wait_for_port(pub_port).await;

    let client_config = ClientConfig { send_port: recv_port, sub_port: pub_port, ..Default::default() };
    let publisher = mezzenger_client::connect(client_config).await.unwrap();
    publisher.send(b"T".to_vec(), b"persisted".to_vec(), 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    broker_handle.stop();
    let _ = broker_task.await;

    let restored = persistence.load().await.unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].1.payload, b"persisted");

    let _ = tokio::fs::remove_file(&persist_path).await;
}
