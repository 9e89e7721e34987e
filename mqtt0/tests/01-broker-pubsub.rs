// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Basic publish/subscribe over MQTT 3.1.1.

use std::sync::Arc;

use mqtt0::{Broker, BrokerConfig, ClientConfig};

mod common;
use common::{connect_client, init_logger};

#[tokio::test]
async fn test_basic_pubsub_v3() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut subscriber = connect_client(&broker, ClientConfig::new("a")).await;
    subscriber.client.subscribe(&["room/+/temp"]).await.unwrap();

    let mut publisher = connect_client(&broker, ClientConfig::new("b")).await;
    publisher
        .client
        .publish("room/living/temp", b"22")
        .await
        .unwrap();

    let msg = subscriber.recv().await.expect("subscriber got no message");
    assert_eq!(msg.topic, "room/living/temp");
    assert_eq!(msg.payload.as_ref(), b"22");

    // The publisher has no subscription and receives nothing.
    publisher.expect_silence().await;
}

#[tokio::test]
async fn test_publisher_does_not_hear_itself() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut client = connect_client(&broker, ClientConfig::new("echo")).await;
    client.client.subscribe(&["loop/back"]).await.unwrap();
    client.client.publish("loop/back", b"ping").await.unwrap();

    client.expect_silence().await;
}

#[tokio::test]
async fn test_subscribe_replaces_existing() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut subscriber = connect_client(&broker, ClientConfig::new("dedup")).await;
    subscriber.client.subscribe(&["a/+"]).await.unwrap();
    subscriber.client.subscribe(&["a/+"]).await.unwrap();

    let mut publisher = connect_client(&broker, ClientConfig::new("pub")).await;
    publisher.client.publish("a/x", b"1").await.unwrap();

    // The duplicate subscription did not create a second delivery.
    let msg = subscriber.recv().await.expect("no message delivered");
    assert_eq!(msg.topic, "a/x");
    subscriber.expect_silence().await;

    // One unsubscribe removes the subscription entirely. Consuming the
    // UNSUBACK guarantees the broker processed it before the publish.
    subscriber.client.unsubscribe(&["a/+"]).await.unwrap();
    subscriber.client.poll().await.unwrap();
    publisher.client.publish("a/x", b"2").await.unwrap();
    subscriber.expect_silence().await;
}

#[tokio::test]
async fn test_unsubscribe_keeps_other_client() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut first = connect_client(&broker, ClientConfig::new("first")).await;
    first.client.subscribe(&["shared/topic/+"]).await.unwrap();
    let mut second = connect_client(&broker, ClientConfig::new("second")).await;
    second.client.subscribe(&["shared/topic/+"]).await.unwrap();

    // First client leaving must not disturb the second's subscription.
    first.client.unsubscribe(&["shared/topic/+"]).await.unwrap();
    first.client.poll().await.unwrap();

    let mut publisher = connect_client(&broker, ClientConfig::new("pub")).await;
    publisher.client.publish("shared/topic/x", b"hi").await.unwrap();

    let msg = second.recv().await.expect("second client got no message");
    assert_eq!(msg.topic, "shared/topic/x");
    first.expect_silence().await;
}

#[tokio::test]
async fn test_basic_pubsub_v5() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut subscriber = connect_client(&broker, ClientConfig::new("v5-sub").v5()).await;
    subscriber.client.subscribe(&["metrics/#"]).await.unwrap();

    let mut publisher = connect_client(&broker, ClientConfig::new("v5-pub").v5()).await;
    publisher
        .client
        .publish("metrics/cpu/0", b"0.93")
        .await
        .unwrap();

    let msg = subscriber.recv().await.expect("subscriber got no message");
    assert_eq!(msg.topic, "metrics/cpu/0");
    assert_eq!(msg.payload.as_ref(), b"0.93");
}

#[tokio::test]
async fn test_cross_version_delivery() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    // A v3 subscriber receives messages published by a v5 client.
    let mut subscriber = connect_client(&broker, ClientConfig::new("v3-sub")).await;
    subscriber.client.subscribe(&["mixed/+"]).await.unwrap();

    let mut publisher = connect_client(&broker, ClientConfig::new("v5-pub").v5()).await;
    publisher.client.publish("mixed/one", b"x").await.unwrap();

    let msg = subscriber.recv().await.expect("subscriber got no message");
    assert_eq!(msg.topic, "mixed/one");
}
