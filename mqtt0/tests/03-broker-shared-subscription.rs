// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Shared subscriptions: `$share/<group>/<filter>` members collectively
//! receive each matching message round-robin.

use std::collections::BTreeSet;
use std::sync::Arc;

use mqtt0::{Broker, BrokerConfig, ClientConfig};

mod common;
use common::{connect_client, init_logger};

#[tokio::test]
async fn test_shared_round_robin() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut workers = Vec::new();
    for index in 0..3 {
        let id = format!("worker-{index}");
        let mut worker = connect_client(&broker, ClientConfig::new(id)).await;
        worker
            .client
            .subscribe(&["$share/workers/jobs/+"])
            .await
            .unwrap();
        workers.push(worker);
    }

    let publisher = connect_client(&broker, ClientConfig::new("producer")).await;
    for job in ["jobs/1", "jobs/2", "jobs/3"] {
        publisher.client.publish(job, job.as_bytes()).await.unwrap();
    }

    // Every worker receives exactly one message, and together they saw
    // exactly the three published jobs.
    let mut seen = BTreeSet::new();
    for worker in &mut workers {
        let msg = worker.recv().await.expect("worker got no message");
        seen.insert(msg.topic.clone());
        worker.expect_silence().await;
    }
    assert_eq!(
        seen,
        BTreeSet::from([
            "jobs/1".to_string(),
            "jobs/2".to_string(),
            "jobs/3".to_string()
        ])
    );
}

#[tokio::test]
async fn test_shared_and_normal_subscribers() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    // One normal subscriber and a two-member group: each message goes to
    // the normal subscriber and to exactly one group member.
    let mut observer = connect_client(&broker, ClientConfig::new("observer")).await;
    observer.client.subscribe(&["events/#"]).await.unwrap();

    let mut member_a = connect_client(&broker, ClientConfig::new("member-a")).await;
    member_a
        .client
        .subscribe(&["$share/audit/events/#"])
        .await
        .unwrap();
    let mut member_b = connect_client(&broker, ClientConfig::new("member-b")).await;
    member_b
        .client
        .subscribe(&["$share/audit/events/#"])
        .await
        .unwrap();

    let publisher = connect_client(&broker, ClientConfig::new("producer")).await;
    publisher.client.publish("events/a", b"1").await.unwrap();
    publisher.client.publish("events/b", b"2").await.unwrap();

    assert_eq!(observer.recv().await.unwrap().topic, "events/a");
    assert_eq!(observer.recv().await.unwrap().topic, "events/b");

    let first = member_a.recv().await.expect("member-a got no message");
    let second = member_b.recv().await.expect("member-b got no message");
    let mut topics = vec![first.topic, second.topic];
    topics.sort();
    assert_eq!(topics, vec!["events/a".to_string(), "events/b".to_string()]);
    member_a.expect_silence().await;
    member_b.expect_silence().await;
}

#[tokio::test]
async fn test_shared_member_leaves() {
    init_logger();
    let broker = Arc::new(Broker::new(BrokerConfig::default()));

    let mut member_a = connect_client(&broker, ClientConfig::new("a")).await;
    member_a
        .client
        .subscribe(&["$share/g/tasks/+"])
        .await
        .unwrap();
    let mut member_b = connect_client(&broker, ClientConfig::new("b")).await;
    member_b
        .client
        .subscribe(&["$share/g/tasks/+"])
        .await
        .unwrap();

    // Member a leaves the group; everything goes to b afterwards.
    member_a
        .client
        .unsubscribe(&["$share/g/tasks/+"])
        .await
        .unwrap();
    member_a.client.poll().await.unwrap();

    let publisher = connect_client(&broker, ClientConfig::new("producer")).await;
    publisher.client.publish("tasks/1", b"x").await.unwrap();
    publisher.client.publish("tasks/2", b"y").await.unwrap();

    assert_eq!(member_b.recv().await.unwrap().topic, "tasks/1");
    assert_eq!(member_b.recv().await.unwrap().topic, "tasks/2");
    member_a.expect_silence().await;
}
