// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Authentication, ACL enforcement and per-client limits.

use std::sync::Arc;

use mqtt0::{
    Authenticator, Broker, BrokerConfig, Client, ClientConfig, ErrorKind, Mux,
};

mod common;
use common::{connect_client, init_logger, open_conn};

/// Accepts only clients presenting the password `sesame`; denies any
/// operation on `vault/#` topics.
struct VaultKeeper;

impl Authenticator for VaultKeeper {
    fn authenticate(&self, _client_id: &str, _username: &str, password: &[u8]) -> bool {
        password == b"sesame"
    }

    fn acl(&self, _client_id: &str, topic: &str, _write: bool) -> bool {
        !topic.starts_with("vault/")
    }
}

fn vault_broker() -> Arc<Broker> {
    Arc::new(
        Broker::builder(BrokerConfig::default())
            .authenticator(VaultKeeper)
            .build(),
    )
}

#[tokio::test]
async fn test_authentication_rejected() {
    init_logger();
    let broker = vault_broker();

    let transport = open_conn(&broker);
    let config = ClientConfig::new("thief").credentials("thief", b"guess");
    let err = Client::connect(transport, Arc::new(Mux::new()), config)
        .await
        .err()
        .expect("connect unexpectedly succeeded");
    assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
}

#[tokio::test]
async fn test_authentication_accepted() {
    init_logger();
    let broker = vault_broker();

    let transport = open_conn(&broker);
    let config = ClientConfig::new("keeper").credentials("keeper", b"sesame");
    let client = Client::connect(transport, Arc::new(Mux::new()), config).await;
    assert!(client.is_ok());
}

#[tokio::test]
async fn test_acl_denies_subscribe() {
    init_logger();
    let broker = vault_broker();

    let transport = open_conn(&broker);
    let config = ClientConfig::new("keeper").credentials("keeper", b"sesame");
    let mut client = Client::connect(transport, Arc::new(Mux::new()), config)
        .await
        .unwrap();

    let err = client.subscribe(&["vault/secrets"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SubscribeFailed);

    // Allowed filters still work on the same connection.
    client.subscribe(&["public/news"]).await.unwrap();
}

#[tokio::test]
async fn test_acl_drops_publish_silently() {
    init_logger();
    let broker = vault_broker();

    let transport = open_conn(&broker);
    let config = ClientConfig::new("sub").credentials("sub", b"sesame");
    let mut subscriber = Client::connect(transport, Arc::new(Mux::new()), config)
        .await
        .unwrap();
    // ACL check applies to publishes, not to this subscription.
    subscriber.subscribe(&["#"]).await.unwrap();

    let transport = open_conn(&broker);
    let config = ClientConfig::new("pub").credentials("pub", b"sesame");
    let publisher = Client::connect(transport, Arc::new(Mux::new()), config)
        .await
        .unwrap();

    // Denied publish: no error for the publisher, nothing delivered.
    publisher.publish("vault/secrets", b"x").await.unwrap();
    let polled =
        tokio::time::timeout(std::time::Duration::from_millis(200), subscriber.poll()).await;
    assert!(polled.is_err());
}

#[tokio::test]
async fn test_subscription_limit() {
    init_logger();
    let config = BrokerConfig {
        max_subscriptions_per_client: 2,
        ..BrokerConfig::default()
    };
    let broker = Arc::new(Broker::new(config));

    let mut client = connect_client(&broker, ClientConfig::new("greedy")).await;
    client.client.subscribe(&["t/1"]).await.unwrap();
    client.client.subscribe(&["t/2"]).await.unwrap();

    let err = client.client.subscribe(&["t/3"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SubscribeFailed);

    // A duplicate of an existing filter does not count against the limit.
    client.client.subscribe(&["t/1"]).await.unwrap();
}

#[tokio::test]
async fn test_topic_length_limit() {
    init_logger();
    let config = BrokerConfig {
        max_topic_length: 16,
        ..BrokerConfig::default()
    };
    let broker = Arc::new(Broker::new(config));

    let mut subscriber = connect_client(&broker, ClientConfig::new("sub")).await;
    let err = subscriber
        .client
        .subscribe(&["a/very/long/topic/filter/over/the/limit"])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SubscribeFailed);

    subscriber.client.subscribe(&["short/+"]).await.unwrap();

    // An over-long publish topic is dropped without feedback, even when
    // it would match a subscription.
    let mut publisher = connect_client(&broker, ClientConfig::new("pub")).await;
    publisher
        .client
        .publish("short/waytoolongtopicname", b"x")
        .await
        .unwrap();
    subscriber.expect_silence().await;

    publisher.client.publish("short/ok", b"y").await.unwrap();
    let msg = subscriber.recv().await.expect("in-limit publish lost");
    assert_eq!(msg.topic, "short/ok");
}
