// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! `$SYS` lifecycle events, payload-compatible with EMQX.

use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use codec::ProtocolLevel;

use super::{Broker, ClientHandle};
use crate::types::Message;

/// Payload of `$SYS/brokers/<client-id>/connected`.
#[derive(Debug, Serialize)]
struct ConnectedEvent<'a> {
    clientid: &'a str,
    username: &'a str,
    ipaddress: &'a str,
    proto_ver: u8,
    keepalive: u16,
    connected_at: u64,
}

/// Payload of `$SYS/brokers/<client-id>/disconnected`.
#[derive(Debug, Serialize)]
struct DisconnectedEvent<'a> {
    clientid: &'a str,
    username: &'a str,
    reason: &'a str,
    disconnected_at: u64,
}

/// Replace topic-significant characters in a client id so it is safe to
/// embed as one topic level.
fn sanitize_client_id(client_id: &str) -> String {
    client_id
        .chars()
        .map(|c| match c {
            '/' | '+' | '#' => '_',
            c => c,
        })
        .collect()
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

impl Broker {
    /// Publish the connected event for `handle`.
    ///
    /// The event passes through the broker handler and the subscriber
    /// fan-out like any other server-originated message; clients
    /// subscribed to `$SYS/#` receive it.
    pub(crate) async fn emit_sys_connected(
        &self,
        handle: &Arc<ClientHandle>,
        level: ProtocolLevel,
        keep_alive: u16,
    ) {
        let event = ConnectedEvent {
            clientid: handle.client_id(),
            username: handle.username(),
            ipaddress: "",
            proto_ver: level as u8,
            keepalive: keep_alive,
            connected_at: unix_seconds(),
        };
        let topic = format!(
            "$SYS/brokers/{}/connected",
            sanitize_client_id(handle.client_id())
        );
        self.emit_sys_event(handle.client_id(), &topic, &event).await;
    }

    /// Publish the disconnected event for `handle`.
    pub(crate) async fn emit_sys_disconnected(&self, handle: &Arc<ClientHandle>) {
        let event = DisconnectedEvent {
            clientid: handle.client_id(),
            username: handle.username(),
            reason: "normal",
            disconnected_at: unix_seconds(),
        };
        let topic = format!(
            "$SYS/brokers/{}/disconnected",
            sanitize_client_id(handle.client_id())
        );
        self.emit_sys_event(handle.client_id(), &topic, &event).await;
    }

    async fn emit_sys_event<E: Serialize>(&self, client_id: &str, topic: &str, event: &E) {
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(err) => {
                log::error!("broker: Failed to serialize $SYS event: {err}");
                return;
            }
        };

        let msg = Message::new(topic.to_string(), Bytes::from(payload));
        if let Some(handler) = &self.handler {
            if let Err(err) = handler.handle(client_id, &msg) {
                log::error!("broker: Handler failed for {topic}: {err}");
            }
        }
        self.route_message(&msg, None).await;
    }
}
