//! Pairing, authentication, busy rejection, and the jail.

use crate::*;
use ferry_core::limits::JAIL_THRESHOLD;
use ferry_core::wire::{AuthStatus, Message};

#[tokio::test(flavor = "multi_thread")]
async fn nodes_pair_with_the_right_password() {
    let port = free_port();
    let host = start_host(port, "hunter2", "pair-host").await;
    assert!(!host.connected().await);

    let peer = start_peer(port, "hunter2", "pair-peer").await;
    wait_for("host and peer to pair", 10, || async {
        host.connected().await && peer.connected().await
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_password_gets_a_failed_response() {
    let port = free_port();
    let _host = start_host(port, "right", "authfail").await;

    let reply = raw_handshake(port, "wrong").await.unwrap();
    assert_eq!(
        reply,
        Message::AuthResponse {
            status: AuthStatus::Failed
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn busy_host_sends_a_busy_notification() {
    let port = free_port();
    let host = start_host(port, "pw", "busy-host").await;
    let peer = start_peer(port, "pw", "busy-peer").await;
    wait_for("pairing", 10, || async {
        host.connected().await && peer.connected().await
    })
    .await;

    // A third party never even gets to authenticate.
    let reply = raw_handshake(port, "pw").await.unwrap();
    match reply {
        Message::Notification { busy, .. } => assert!(busy),
        other => panic!("expected busy notification, got {other:?}"),
    }

    // The established pair is unaffected.
    assert!(host.connected().await);
    assert!(peer.connected().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_failures_jail_the_source() {
    let port = free_port();
    let _host = start_host(port, "correct", "jail").await;

    for _ in 0..JAIL_THRESHOLD {
        let reply = raw_handshake(port, "nope").await.unwrap();
        assert_eq!(
            reply,
            Message::AuthResponse {
                status: AuthStatus::Failed
            }
        );
    }

    // Jailed now: connections are dropped without any reply, even with
    // the correct password.
    assert!(raw_handshake(port, "correct").await.is_err());
}
