// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Helpers for broker integration tests.
//!
//! Connections are in-memory duplex pipes; a broker task serves one end
//! while the test drives the other through the public client or raw
//! codec packets.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use mqtt0::{Broker, Client, ClientConfig, Message, Mux};

pub const PIPE_SIZE: usize = 4096;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Open a connection to `broker`, serving the far end in a spawned task.
pub fn open_conn(broker: &Arc<Broker>) -> DuplexStream {
    let (client_side, server_side) = tokio::io::duplex(PIPE_SIZE);
    let broker = Arc::clone(broker);
    tokio::spawn(async move {
        if let Err(err) = broker.serve_conn(server_side).await {
            log::debug!("test broker conn ended: {err}");
        }
    });
    client_side
}

/// A connected client whose received messages queue in `rx`.
pub struct TestClient {
    pub client: Client,
    pub rx: mpsc::UnboundedReceiver<Message>,
}

impl TestClient {
    /// Poll the client until a message arrives or the deadline passes.
    pub async fn recv(&mut self) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match self.rx.try_recv() {
                    Ok(msg) => return Some(msg),
                    Err(_empty) => {
                        if self.client.poll().await.is_err() {
                            return None;
                        }
                    }
                }
            }
        })
        .await
        .unwrap_or(None)
    }

    /// Assert that nothing is delivered within a short window.
    pub async fn expect_silence(&mut self) {
        let polled = tokio::time::timeout(Duration::from_millis(200), self.client.poll()).await;
        assert!(polled.is_err(), "expected no packet, but one arrived");
        assert!(self.rx.try_recv().is_err(), "expected no queued message");
    }
}

/// Connect a client collecting every delivered message, `$SYS` included.
pub async fn connect_client(broker: &Arc<Broker>, config: ClientConfig) -> TestClient {
    let transport = open_conn(broker);
    let (tx, rx) = mpsc::unbounded_channel();

    let mux = Arc::new(Mux::new());
    let collector_tx = tx.clone();
    mux.handle_fn("#", move |_client_id, msg| {
        let _ = collector_tx.send(msg.clone());
        Ok(())
    })
    .unwrap();
    // Root wildcards skip `$`-topics, so $SYS needs its own pattern.
    mux.handle_fn("$SYS/#", move |_client_id, msg| {
        let _ = tx.send(msg.clone());
        Ok(())
    })
    .unwrap();

    let client = Client::connect(transport, mux, config).await.unwrap();
    TestClient { client, rx }
}
