// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `$SYS` lifecycle events and the `$`-namespace publish restriction.

use std::sync::Arc;
use std::time::Duration;

use mqtt0::{Broker, BrokerConfig, ClientConfig};

mod common;
use common::{connect_client, init_logger};

fn sys_broker() -> Arc<Broker> {
    let config = BrokerConfig {
        sys_events: true,
        ..BrokerConfig::default()
    };
    Arc::new(Broker::new(config))
}

#[tokio::test]
async fn test_sys_connected_event() {
    init_logger();
    let broker = sys_broker();

    let mut observer = connect_client(&broker, ClientConfig::new("observer")).await;
    observer.client.subscribe(&["$SYS/#"]).await.unwrap();

    let _watched = connect_client(&broker, ClientConfig::new("watched").v5()).await;

    let msg = observer.recv().await.expect("no connected event");
    assert_eq!(msg.topic, "$SYS/brokers/watched/connected");

    let event: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(event["clientid"], "watched");
    assert_eq!(event["proto_ver"], 5);
    assert_eq!(event["ipaddress"], "");
    assert!(event["connected_at"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_sys_disconnected_event() {
    init_logger();
    let broker = sys_broker();

    let mut observer = connect_client(&broker, ClientConfig::new("observer")).await;
    observer.client.subscribe(&["$SYS/#"]).await.unwrap();

    let watched = connect_client(&broker, ClientConfig::new("watched")).await;
    let msg = observer.recv().await.expect("no connected event");
    assert_eq!(msg.topic, "$SYS/brokers/watched/connected");

    // Closing the transport terminates the connection's read loop.
    drop(watched);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let msg = observer.recv().await.expect("no disconnected event");
    assert_eq!(msg.topic, "$SYS/brokers/watched/disconnected");
    let event: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(event["clientid"], "watched");
    assert_eq!(event["reason"], "normal");
}

#[tokio::test]
async fn test_sys_topic_sanitizes_client_id() {
    init_logger();
    let broker = sys_broker();

    let mut observer = connect_client(&broker, ClientConfig::new("observer")).await;
    observer.client.subscribe(&["$SYS/#"]).await.unwrap();

    let _watched = connect_client(&broker, ClientConfig::new("weird/id+1")).await;

    let msg = observer.recv().await.expect("no connected event");
    assert_eq!(msg.topic, "$SYS/brokers/weird_id_1/connected");
}

#[tokio::test]
async fn test_clients_cannot_publish_dollar_topics() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut observer = connect_client(&broker, ClientConfig::new("observer")).await;
    observer.client.subscribe(&["$SYS/#"]).await.unwrap();

    let mut publisher = connect_client(&broker, ClientConfig::new("intruder")).await;
    publisher.client.publish("$SYS/fake", b"x").await.unwrap();

    // The publish is dropped silently: no delivery, no error, and the
    // publisher's connection stays usable.
    observer.expect_silence().await;

    observer.client.subscribe(&["real/+"]).await.unwrap();
    publisher.client.publish("real/topic", b"ok").await.unwrap();
    let msg = observer.recv().await.expect("connection no longer works");
    assert_eq!(msg.topic, "real/topic");
}

#[tokio::test]
async fn test_wildcards_do_not_match_sys() {
    init_logger();
    let broker = sys_broker();

    // A `#` subscription at the root does not receive `$SYS` events.
    let mut observer = connect_client(&broker, ClientConfig::new("observer")).await;
    observer.client.subscribe(&["#"]).await.unwrap();

    let _watched = connect_client(&broker, ClientConfig::new("watched")).await;
    observer.expect_silence().await;
}
