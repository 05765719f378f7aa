//! Integration tests for the probe client exchange path
//!
//! These run against a plain UDP responder on loopback, so they need no
//! privileges and no TPROXY setup. The transparent/raw server half is
//! covered by privilege-tolerant unit tests inside the crate.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use decoy_probe::error::ClientError;
use decoy_probe::ProbeClient;

const REQUEST: &[u8] = b"PING";
const RESPONSE: &[u8] = b"PONG";

/// Spawn a responder that answers every incoming datagram with the given
/// reply sequence, forever. Returns its address; the task dies with the
/// test runtime.
async fn spawn_responder(replies: Vec<Vec<u8>>) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind responder");
    let addr = socket.local_addr().expect("responder addr");

    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let Ok((_, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            for reply in &replies {
                if socket.send_to(reply, peer).await.is_err() {
                    return;
                }
            }
        }
    });

    addr
}

async fn dial(remote: SocketAddr) -> ProbeClient {
    ProbeClient::dial(
        0,
        remote,
        Bytes::from_static(REQUEST),
        Bytes::from_static(RESPONSE),
    )
    .await
    .expect("dial")
}

#[tokio::test]
async fn exchange_succeeds_on_matching_reply() {
    let remote = spawn_responder(vec![RESPONSE.to_vec()]).await;
    let client = dial(remote).await;

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.exchange(&CancellationToken::new()),
    )
    .await
    .expect("exchange should not hang");

    assert!(result.is_ok());
}

#[tokio::test]
async fn exchange_skips_non_matching_replies() {
    // Garbage first, then the real response; the client must keep reading
    let remote = spawn_responder(vec![b"NOPE".to_vec(), b"PONGX".to_vec(), RESPONSE.to_vec()]).await;
    let client = dial(remote).await;

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.exchange(&CancellationToken::new()),
    )
    .await
    .expect("exchange should not hang");

    assert!(result.is_ok());
}

#[tokio::test]
async fn cancellation_unblocks_pending_exchange() {
    // Bound but silent peer: the request is swallowed, no reply ever comes
    let silent = UdpSocket::bind("127.0.0.1:0").await.expect("bind silent peer");
    let remote = silent.local_addr().expect("silent addr");
    let client = dial(remote).await;

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(5), client.exchange(&cancel))
        .await
        .expect("cancellation must unblock the exchange");

    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "cancellation took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn client_is_reusable_across_exchanges() {
    let remote = spawn_responder(vec![RESPONSE.to_vec()]).await;
    let client = dial(remote).await;

    for _ in 0..3 {
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.exchange(&CancellationToken::new()),
        )
        .await
        .expect("exchange should not hang");
        assert!(result.is_ok());
    }
}

#[tokio::test]
async fn cancelled_exchange_leaves_client_usable() {
    let remote = spawn_responder(vec![RESPONSE.to_vec()]).await;
    let client = dial(remote).await;

    // First exchange is cancelled up front
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let result = client.exchange(&cancelled).await;
    assert!(matches!(result, Err(ClientError::Cancelled)));

    // A fresh token must not inherit the earlier cancellation
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.exchange(&CancellationToken::new()),
    )
    .await
    .expect("exchange should not hang");
    assert!(result.is_ok());
}
