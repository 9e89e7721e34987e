// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Client id takeover: a new connection with an existing id displaces
//! the old connection and inherits its subscriptions.

use std::sync::Arc;

use mqtt0::{Broker, BrokerConfig, ClientConfig};

mod common;
use common::{connect_client, init_logger};

#[tokio::test]
async fn test_takeover_disconnects_old_connection() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut old = connect_client(&broker, ClientConfig::new("dup")).await;
    old.client.subscribe(&["t/1"]).await.unwrap();

    // Second connection with the same client id.
    let mut new = connect_client(&broker, ClientConfig::new("dup")).await;

    // The old connection's transport was shut down; its next read fails.
    let polled = tokio::time::timeout(std::time::Duration::from_secs(2), old.client.poll()).await;
    assert!(polled.expect("old connection still readable").is_err());

    // The handle and its subscriptions survived the takeover: the new
    // connection receives messages for the old subscription.
    let mut publisher = connect_client(&broker, ClientConfig::new("pub")).await;
    publisher.client.publish("t/1", b"after").await.unwrap();

    let msg = new.recv().await.expect("taken-over client got no message");
    assert_eq!(msg.topic, "t/1");
    assert_eq!(msg.payload.as_ref(), b"after");

    // Exactly one copy: one handle, not two.
    new.expect_silence().await;
}

#[tokio::test]
async fn test_takeover_cleanup_does_not_remove_subscriptions() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut old = connect_client(&broker, ClientConfig::new("dup2")).await;
    old.client.subscribe(&["keep/me"]).await.unwrap();

    let mut new = connect_client(&broker, ClientConfig::new("dup2")).await;

    // Drive the old connection until it observes the takeover, then drop
    // it so its server-side loop runs cleanup with a stale generation.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), old.client.poll()).await;
    drop(old);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let mut publisher = connect_client(&broker, ClientConfig::new("pub")).await;
    publisher.client.publish("keep/me", b"still here").await.unwrap();

    let msg = new.recv().await.expect("subscription was lost in takeover");
    assert_eq!(msg.payload.as_ref(), b"still here");
}
