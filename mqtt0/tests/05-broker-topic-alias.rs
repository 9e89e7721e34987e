// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! MQTT 5.0 topic alias handling on the client-to-broker path.

use std::sync::Arc;

use codec::v5;
use codec::{ByteArray, DecodePacket};
use mqtt0::{stream, Broker, BrokerConfig, ClientConfig};

mod common;
use common::{connect_client, init_logger, open_conn};

const MAX_PACKET_SIZE: usize = 2 * 1024 * 1024;

/// Connect a raw v5 publisher: write CONNECT, consume CONNACK, return the
/// open pipe for hand-crafted packets.
async fn raw_v5_publisher(broker: &Arc<Broker>, client_id: &str) -> tokio::io::DuplexStream {
    let mut conn = open_conn(broker);
    let connect = v5::ConnectPacket::new(client_id).unwrap();
    stream::write_packet(&mut conn, &connect).await.unwrap();

    let mut buf = Vec::new();
    stream::read_packet(&mut conn, &mut buf, MAX_PACKET_SIZE)
        .await
        .unwrap();
    let ack = v5::ConnectAckPacket::decode(&mut ByteArray::new(&buf)).unwrap();
    assert_eq!(ack.reason_code(), v5::ReasonCode::Success);
    conn
}

#[tokio::test]
async fn test_topic_alias_binding_and_reuse() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut subscriber = connect_client(&broker, ClientConfig::new("sub")).await;
    subscriber.client.subscribe(&["sensor/temp"]).await.unwrap();

    let mut conn = raw_v5_publisher(&broker, "alias-pub").await;

    // First publish binds alias 7 to the topic.
    let publish = v5::PublishPacket::with_topic_alias("sensor/temp", 7, b"21.5").unwrap();
    stream::write_packet(&mut conn, &publish).await.unwrap();

    // Second publish carries only the alias.
    let publish = v5::PublishPacket::with_topic_alias("", 7, b"21.7").unwrap();
    stream::write_packet(&mut conn, &publish).await.unwrap();

    let first = subscriber.recv().await.expect("first delivery missing");
    assert_eq!(first.topic, "sensor/temp");
    assert_eq!(first.payload.as_ref(), b"21.5");

    let second = subscriber.recv().await.expect("second delivery missing");
    assert_eq!(second.topic, "sensor/temp");
    assert_eq!(second.payload.as_ref(), b"21.7");
}

#[tokio::test]
async fn test_topic_alias_rebinding() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut subscriber = connect_client(&broker, ClientConfig::new("sub")).await;
    subscriber
        .client
        .subscribe(&["sensor/temp", "sensor/hum"])
        .await
        .unwrap();

    let mut conn = raw_v5_publisher(&broker, "alias-pub").await;

    let publish = v5::PublishPacket::with_topic_alias("sensor/temp", 3, b"a").unwrap();
    stream::write_packet(&mut conn, &publish).await.unwrap();

    // Re-binding the alias frees the previous mapping.
    let publish = v5::PublishPacket::with_topic_alias("sensor/hum", 3, b"b").unwrap();
    stream::write_packet(&mut conn, &publish).await.unwrap();

    let publish = v5::PublishPacket::with_topic_alias("", 3, b"c").unwrap();
    stream::write_packet(&mut conn, &publish).await.unwrap();

    assert_eq!(subscriber.recv().await.unwrap().topic, "sensor/temp");
    assert_eq!(subscriber.recv().await.unwrap().topic, "sensor/hum");
    let third = subscriber.recv().await.expect("rebound alias not resolved");
    assert_eq!(third.topic, "sensor/hum");
    assert_eq!(third.payload.as_ref(), b"c");
}

#[tokio::test]
async fn test_unknown_and_invalid_aliases_are_skipped() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut subscriber = connect_client(&broker, ClientConfig::new("sub")).await;
    subscriber.client.subscribe(&["sensor/#"]).await.unwrap();

    let mut conn = raw_v5_publisher(&broker, "alias-pub").await;

    // Unknown alias with an empty topic: nothing to resolve, skipped.
    let publish = v5::PublishPacket::with_topic_alias("", 9, b"lost").unwrap();
    stream::write_packet(&mut conn, &publish).await.unwrap();

    // Alias 0 is invalid, skipped.
    let publish = v5::PublishPacket::with_topic_alias("sensor/temp", 0, b"zero").unwrap();
    stream::write_packet(&mut conn, &publish).await.unwrap();

    subscriber.expect_silence().await;

    // The connection is still healthy: a plain publish goes through.
    let publish = v5::PublishPacket::new("sensor/temp", b"fine").unwrap();
    stream::write_packet(&mut conn, &publish).await.unwrap();
    let msg = subscriber.recv().await.expect("plain publish lost");
    assert_eq!(msg.payload.as_ref(), b"fine");
}

#[tokio::test]
async fn test_alias_map_dies_with_connection() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut subscriber = connect_client(&broker, ClientConfig::new("sub")).await;
    subscriber.client.subscribe(&["sensor/#"]).await.unwrap();

    let mut conn = raw_v5_publisher(&broker, "alias-pub").await;
    let publish = v5::PublishPacket::with_topic_alias("sensor/temp", 5, b"bound").unwrap();
    stream::write_packet(&mut conn, &publish).await.unwrap();
    assert_eq!(subscriber.recv().await.unwrap().payload.as_ref(), b"bound");

    // Reconnect with the same client id: the alias table starts empty.
    drop(conn);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let mut conn = raw_v5_publisher(&broker, "alias-pub").await;

    let publish = v5::PublishPacket::with_topic_alias("", 5, b"stale").unwrap();
    stream::write_packet(&mut conn, &publish).await.unwrap();
    subscriber.expect_silence().await;
}
