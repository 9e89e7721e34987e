// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-connection serving: CONNECT handling and the client read loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use codec::{
    detect_protocol_level, utils::random_client_id, v3, v5, ByteArray, DecodePacket, FixedHeader,
    PacketType, ProtocolLevel,
};

use super::{Broker, ClientHandle, WriterSlot};
use crate::error::{Error, ErrorKind};
use crate::stream::{self, READ_BUFFER_SIZE};
use crate::transport::{self, Transport, TransportReader};

/// The keep-alive grace factor: a client is disconnected after
/// 1.5 x keep_alive seconds of silence [MQTT-3.1.2-22].
fn keep_alive_timeout(keep_alive: u16) -> Option<Duration> {
    if keep_alive == 0 {
        None
    } else {
        Some(Duration::from_secs(u64::from(keep_alive) * 3 / 2))
    }
}

impl Broker {
    /// Serve one accepted connection until it terminates.
    ///
    /// The host calls this once per connection, usually in a spawned
    /// task. The first packet must be a CONNECT; its protocol level
    /// selects the 3.1.1 or 5.0 session path.
    ///
    /// # Errors
    ///
    /// Returns error when the connection ends abnormally: transport
    /// failure, malformed packet, authentication failure, or keep-alive
    /// timeout. A clean DISCONNECT returns `Ok`.
    pub async fn serve_conn<T>(&self, transport: T) -> Result<(), Error>
    where
        T: Transport + 'static,
    {
        let (mut reader, writer) = transport::split(Box::new(transport));
        let mut buf = Vec::with_capacity(READ_BUFFER_SIZE);

        stream::read_packet(&mut reader, &mut buf, self.config.max_packet_size).await?;
        let level = detect_protocol_level(&buf)?;
        log::debug!("broker: Detected protocol {level}");

        match level {
            ProtocolLevel::V311 => self.serve_v3(reader, writer, &buf).await,
            ProtocolLevel::V5 => self.serve_v5(reader, writer, &buf).await,
        }
    }

    async fn serve_v3(
        &self,
        reader: TransportReader,
        mut writer: crate::transport::TransportWriter,
        connect_buf: &[u8],
    ) -> Result<(), Error> {
        let connect = v3::ConnectPacket::decode(&mut ByteArray::new(connect_buf))?;
        let client_id = if connect.client_id().is_empty() {
            random_client_id()
        } else {
            connect.client_id().to_string()
        };

        if !self
            .authenticator
            .authenticate(&client_id, connect.username(), connect.password())
        {
            log::warn!("broker: Authentication failed for {client_id} (v3)");
            let ack = v3::ConnectAckPacket::new(false, v3::ConnectReturnCode::NotAuthorized);
            stream::write_packet(&mut writer, &ack).await?;
            return Err(Error::new(
                ErrorKind::AuthenticationFailed,
                "Authentication failed",
            ));
        }

        let ack = v3::ConnectAckPacket::new(false, v3::ConnectReturnCode::Accepted);
        stream::write_packet(&mut writer, &ack).await?;

        let slot = WriterSlot {
            writer,
            level: ProtocolLevel::V311,
        };
        let (handle, generation) = self
            .register_client(&client_id, connect.username(), slot)
            .await;

        if let Some(on_connect) = &self.on_connect {
            on_connect(&client_id);
        }
        if self.config.sys_events {
            self.emit_sys_connected(&handle, ProtocolLevel::V311, connect.keep_alive())
                .await;
        }
        log::info!("broker: Client {client_id} connected (MQTT 3.1.1)");

        let result = self
            .client_loop_v3(&handle, generation, connect.keep_alive(), reader)
            .await;

        self.cleanup_client(&handle, generation).await;
        if let Some(on_disconnect) = &self.on_disconnect {
            on_disconnect(&client_id);
        }
        log::info!("broker: Client {client_id} disconnected");
        result
    }

    async fn serve_v5(
        &self,
        reader: TransportReader,
        mut writer: crate::transport::TransportWriter,
        connect_buf: &[u8],
    ) -> Result<(), Error> {
        let connect = v5::ConnectPacket::decode(&mut ByteArray::new(connect_buf))?;
        let client_id = if connect.client_id().is_empty() {
            random_client_id()
        } else {
            connect.client_id().to_string()
        };

        if let Some(session_expiry) = connect.properties().session_expiry_interval() {
            log::debug!("broker: Client {client_id} requested session_expiry={session_expiry}s");
        }

        if !self
            .authenticator
            .authenticate(&client_id, connect.username(), connect.password())
        {
            log::warn!("broker: Authentication failed for {client_id} (v5)");
            let ack = v5::ConnectAckPacket::new(false, v5::ReasonCode::NotAuthorized);
            stream::write_packet(&mut writer, &ack).await?;
            return Err(Error::new(
                ErrorKind::AuthenticationFailed,
                "Authentication failed",
            ));
        }

        let mut ack = v5::ConnectAckPacket::new(false, v5::ReasonCode::Success);
        ack.properties_mut().set(v5::Property::TopicAliasMaximum(
            codec::U16Data::new(self.config.max_topic_alias),
        ));
        stream::write_packet(&mut writer, &ack).await?;

        let slot = WriterSlot {
            writer,
            level: ProtocolLevel::V5,
        };
        let (handle, generation) = self
            .register_client(&client_id, connect.username(), slot)
            .await;

        if let Some(on_connect) = &self.on_connect {
            on_connect(&client_id);
        }
        if self.config.sys_events {
            self.emit_sys_connected(&handle, ProtocolLevel::V5, connect.keep_alive())
                .await;
        }
        log::info!("broker: Client {client_id} connected (MQTT 5.0)");

        let result = self
            .client_loop_v5(&handle, generation, connect.keep_alive(), reader)
            .await;

        self.cleanup_client(&handle, generation).await;
        if let Some(on_disconnect) = &self.on_disconnect {
            on_disconnect(&client_id);
        }
        log::info!("broker: Client {client_id} disconnected");
        result
    }

    /// Read one packet, honoring the keep-alive deadline.
    async fn read_with_keep_alive(
        &self,
        reader: &mut TransportReader,
        buf: &mut Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        let read = stream::read_packet(reader, buf, self.config.max_packet_size);
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, read).await {
                Ok(result) => result,
                Err(_elapsed) => Err(Error::new(ErrorKind::Timeout, "Keep-alive timeout")),
            },
            None => read.await,
        }
    }

    async fn client_loop_v3(
        &self,
        handle: &Arc<ClientHandle>,
        generation: u64,
        keep_alive: u16,
        mut reader: TransportReader,
    ) -> Result<(), Error> {
        let timeout = keep_alive_timeout(keep_alive);
        let mut buf = Vec::with_capacity(READ_BUFFER_SIZE);

        loop {
            if !handle.is_active() || handle.generation() != generation {
                return Ok(());
            }

            self.read_with_keep_alive(&mut reader, &mut buf, timeout).await?;

            let fixed_header = FixedHeader::decode(&mut ByteArray::new(&buf))?;
            match fixed_header.packet_type() {
                PacketType::Publish { .. } => {
                    let publish = v3::PublishPacket::decode(&mut ByteArray::new(&buf))?;
                    self.handle_publish(handle, publish.topic(), publish.message(), publish.retain())
                        .await;
                }
                PacketType::Subscribe => {
                    let subscribe = v3::SubscribePacket::decode(&mut ByteArray::new(&buf))?;
                    let mut acks = Vec::with_capacity(subscribe.topics().len());
                    for topic in subscribe.topics() {
                        let accepted = self.handle_subscribe(handle, topic.topic()).await;
                        acks.push(if accepted {
                            v3::SubscribeAck::QoS(codec::QoS::AtMostOnce)
                        } else {
                            v3::SubscribeAck::Failed
                        });
                    }
                    let ack = v3::SubscribeAckPacket::with_vec(subscribe.packet_id(), acks);
                    handle.send_packet(&ack).await?;
                }
                PacketType::Unsubscribe => {
                    let unsubscribe = v3::UnsubscribePacket::decode(&mut ByteArray::new(&buf))?;
                    for topic in unsubscribe.topics() {
                        self.handle_unsubscribe(handle, topic.as_ref()).await;
                    }
                    let ack = v3::UnsubscribeAckPacket::new(unsubscribe.packet_id());
                    handle.send_packet(&ack).await?;
                }
                PacketType::PingRequest => {
                    handle.send_packet(&v3::PingResponsePacket::new()).await?;
                }
                PacketType::Disconnect => {
                    return Ok(());
                }
                packet_type => {
                    log::trace!(
                        "broker: Ignoring packet from {}: {packet_type:?}",
                        handle.client_id()
                    );
                }
            }
        }
    }

    async fn client_loop_v5(
        &self,
        handle: &Arc<ClientHandle>,
        generation: u64,
        keep_alive: u16,
        mut reader: TransportReader,
    ) -> Result<(), Error> {
        let timeout = keep_alive_timeout(keep_alive);
        let mut buf = Vec::with_capacity(READ_BUFFER_SIZE);

        // Topic alias mappings live with the connection, not the client
        // identity; the map dies with this loop.
        let mut aliases: HashMap<u16, String> = HashMap::new();

        loop {
            if !handle.is_active() || handle.generation() != generation {
                return Ok(());
            }

            self.read_with_keep_alive(&mut reader, &mut buf, timeout).await?;

            let fixed_header = FixedHeader::decode(&mut ByteArray::new(&buf))?;
            match fixed_header.packet_type() {
                PacketType::Publish { .. } => {
                    let publish = v5::PublishPacket::decode(&mut ByteArray::new(&buf))?;
                    if let Some(topic) = self.resolve_topic_alias(handle, &publish, &mut aliases) {
                        self.handle_publish(handle, &topic, publish.message(), publish.retain())
                            .await;
                    }
                }
                PacketType::Subscribe => {
                    let subscribe = v5::SubscribePacket::decode(&mut ByteArray::new(&buf))?;
                    let mut reasons = Vec::with_capacity(subscribe.topics().len());
                    for topic in subscribe.topics() {
                        let accepted = self.handle_subscribe(handle, topic.topic()).await;
                        reasons.push(if accepted {
                            v5::ReasonCode::Success
                        } else {
                            v5::ReasonCode::NotAuthorized
                        });
                    }
                    let ack = v5::SubscribeAckPacket::with_vec(subscribe.packet_id(), reasons);
                    handle.send_packet(&ack).await?;
                }
                PacketType::Unsubscribe => {
                    let unsubscribe = v5::UnsubscribePacket::decode(&mut ByteArray::new(&buf))?;
                    let mut reasons = Vec::with_capacity(unsubscribe.topics().len());
                    for topic in unsubscribe.topics() {
                        self.handle_unsubscribe(handle, topic.as_ref()).await;
                        reasons.push(v5::ReasonCode::Success);
                    }
                    let ack = v5::UnsubscribeAckPacket::with_vec(unsubscribe.packet_id(), reasons);
                    handle.send_packet(&ack).await?;
                }
                PacketType::PingRequest => {
                    handle.send_packet(&v5::PingResponsePacket::new()).await?;
                }
                PacketType::Disconnect => {
                    return Ok(());
                }
                packet_type => {
                    log::trace!(
                        "broker: Ignoring packet from {}: {packet_type:?}",
                        handle.client_id()
                    );
                }
            }
        }
    }

    /// Apply the per-connection topic alias rules to a v5 PUBLISH.
    ///
    /// Returns the effective topic, or `None` when the packet must be
    /// skipped: unknown alias, alias out of range, or no topic at all.
    fn resolve_topic_alias(
        &self,
        handle: &Arc<ClientHandle>,
        publish: &v5::PublishPacket,
        aliases: &mut HashMap<u16, String>,
    ) -> Option<String> {
        let topic = publish.topic();
        match publish.topic_alias() {
            Some(alias) => {
                if alias == 0 || alias > self.config.max_topic_alias {
                    log::debug!(
                        "broker: Invalid topic alias {alias} from {}",
                        handle.client_id()
                    );
                    return None;
                }
                if topic.is_empty() {
                    let resolved = aliases.get(&alias).cloned();
                    if resolved.is_none() {
                        log::debug!(
                            "broker: Unknown topic alias {alias} from {}",
                            handle.client_id()
                        );
                    }
                    resolved
                } else {
                    // A non-empty topic with an alias (re)binds the alias.
                    aliases.insert(alias, topic.to_string());
                    Some(topic.to_string())
                }
            }
            None => {
                if topic.is_empty() {
                    None
                } else {
                    Some(topic.to_string())
                }
            }
        }
    }
}
