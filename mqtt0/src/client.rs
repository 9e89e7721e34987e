// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! A QoS-0 MQTT client driving one transport.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Mutex;

use codec::v5::Property;
use codec::{
    v3, v5, ByteArray, DecodePacket, EncodePacket, FixedHeader, PacketId, PacketType,
    ProtocolLevel, QoS, U32Data,
};

use crate::config::{ClientConfig, DEFAULT_MAX_PACKET_SIZE};
use crate::error::{Error, ErrorKind};
use crate::mux::Mux;
use crate::stream::{self, READ_BUFFER_SIZE};
use crate::transport::{self, Transport, TransportReader, TransportWriter};
use crate::types::Message;

/// Serialize a QoS-0 PUBLISH packet for `level`.
fn encode_publish(
    level: ProtocolLevel,
    topic: &str,
    payload: &[u8],
    retain: bool,
) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::with_capacity(READ_BUFFER_SIZE);
    match level {
        ProtocolLevel::V311 => {
            let mut packet = v3::PublishPacket::new(topic, payload)?;
            packet.set_retain(retain);
            packet.encode(&mut buf)?;
        }
        ProtocolLevel::V5 => {
            let mut packet = v5::PublishPacket::new(topic, payload)?;
            packet.set_retain(retain);
            packet.encode(&mut buf)?;
        }
    }
    Ok(buf)
}

/// A cheap handle for publishing through a [`Client`] from other tasks.
///
/// All writes go through the client's write mutex, so any number of
/// producer tasks may hold publishers while the owning task runs the
/// read loop.
#[derive(Clone)]
pub struct Publisher {
    writer: Arc<Mutex<TransportWriter>>,
    level: ProtocolLevel,
}

impl Publisher {
    /// Publish a QoS-0 message.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or the transport is broken.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        let data = encode_publish(self.level, topic, payload, false)?;
        let mut writer = self.writer.lock().await;
        use tokio::io::AsyncWriteExt;
        writer.write_all(&data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send a PINGREQ packet.
    ///
    /// # Errors
    ///
    /// Returns error if the transport is broken.
    pub async fn ping(&self) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        match self.level {
            ProtocolLevel::V311 => {
                stream::write_packet(&mut *writer, &v3::PingRequestPacket::new()).await
            }
            ProtocolLevel::V5 => {
                stream::write_packet(&mut *writer, &v5::PingRequestPacket::new()).await
            }
        }
    }
}

/// A QoS-0 MQTT client for one session over one transport.
///
/// Received PUBLISH packets are dispatched to the session's [`Mux`] with
/// this client's id as context. Reading is single-threaded: the owner of
/// the `Client` drives [`Client::poll`] or [`Client::read_loop`], while
/// concurrent producers publish through [`Client::publisher`].
pub struct Client {
    config: ClientConfig,
    reader: TransportReader,
    writer: Arc<Mutex<TransportWriter>>,
    mux: Arc<Mux>,
    read_buf: Vec<u8>,
    next_packet_id: u16,
    connected: bool,
}

impl Client {
    /// Connect over `transport`: send CONNECT and wait for CONNACK.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails, the CONNACK is malformed, or
    /// the broker refuses the connection.
    pub async fn connect<T>(
        transport: T,
        mux: Arc<Mux>,
        config: ClientConfig,
    ) -> Result<Self, Error>
    where
        T: Transport + 'static,
    {
        let (mut reader, mut writer) = transport::split(Box::new(transport));
        let mut read_buf = Vec::with_capacity(READ_BUFFER_SIZE);

        match config.protocol_level {
            ProtocolLevel::V311 => {
                let mut packet = v3::ConnectPacket::new(&config.client_id)?;
                packet.set_keep_alive(config.keep_alive);
                packet.set_clean_session(config.clean_session);
                packet.set_username(config.username.as_deref())?;
                packet.set_password(config.password.as_deref())?;
                stream::write_packet(&mut writer, &packet).await?;

                stream::read_packet(&mut reader, &mut read_buf, DEFAULT_MAX_PACKET_SIZE).await?;
                let ack = v3::ConnectAckPacket::decode(&mut ByteArray::new(&read_buf))?;
                if ack.return_code() != v3::ConnectReturnCode::Accepted {
                    return Err(Error::from_string(
                        ErrorKind::ConnectionRefused,
                        format!("Connection refused: {:?}", ack.return_code()),
                    ));
                }
            }
            ProtocolLevel::V5 => {
                let mut packet = v5::ConnectPacket::new(&config.client_id)?;
                packet.set_keep_alive(config.keep_alive);
                packet.set_clean_start(config.clean_session);
                packet.set_username(config.username.as_deref())?;
                packet.set_password(config.password.as_deref())?;
                if let Some(session_expiry) = config.session_expiry {
                    packet
                        .properties_mut()
                        .set(Property::SessionExpiryInterval(U32Data::new(session_expiry)));
                }
                stream::write_packet(&mut writer, &packet).await?;

                stream::read_packet(&mut reader, &mut read_buf, DEFAULT_MAX_PACKET_SIZE).await?;
                let ack = v5::ConnectAckPacket::decode(&mut ByteArray::new(&read_buf))?;
                if ack.reason_code() != v5::ReasonCode::Success {
                    return Err(Error::from_string(
                        ErrorKind::ConnectionRefused,
                        format!("Connection refused: {:?}", ack.reason_code()),
                    ));
                }
            }
        }

        log::info!("client: {} connected ({})", config.client_id, config.protocol_level);

        Ok(Self {
            config,
            reader,
            writer: Arc::new(Mutex::new(writer)),
            mux,
            read_buf,
            next_packet_id: 0,
            connected: true,
        })
    }

    /// Get this client's id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Returns false once a DISCONNECT was received.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Get a publish handle usable from other tasks.
    #[must_use]
    pub fn publisher(&self) -> Publisher {
        Publisher {
            writer: Arc::clone(&self.writer),
            level: self.config.protocol_level,
        }
    }

    /// Next packet id; monotonically increasing, skipping 0 on wrap.
    fn next_packet_id(&mut self) -> PacketId {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        PacketId::new(self.next_packet_id)
    }

    /// Subscribe to `topics` and wait for the SUBACK.
    ///
    /// PUBLISH packets arriving before the SUBACK are dispatched to the
    /// mux as usual.
    ///
    /// # Errors
    ///
    /// Returns error if a topic filter is invalid, the transport fails,
    /// the SUBACK does not match the request, or the broker rejected any
    /// of the topics.
    pub async fn subscribe(&mut self, topics: &[&str]) -> Result<(), Error> {
        let packet_id = self.next_packet_id();

        match self.config.protocol_level {
            ProtocolLevel::V311 => {
                let packet = v3::SubscribePacket::with_topics(topics, QoS::AtMostOnce, packet_id)?;
                let mut writer = self.writer.lock().await;
                stream::write_packet(&mut *writer, &packet).await?;
            }
            ProtocolLevel::V5 => {
                let packet = v5::SubscribePacket::with_topics(topics, QoS::AtMostOnce, packet_id)?;
                let mut writer = self.writer.lock().await;
                stream::write_packet(&mut *writer, &packet).await?;
            }
        }

        loop {
            stream::read_packet(&mut self.reader, &mut self.read_buf, DEFAULT_MAX_PACKET_SIZE)
                .await?;
            let fixed_header = FixedHeader::decode(&mut ByteArray::new(&self.read_buf))?;
            match fixed_header.packet_type() {
                PacketType::SubscribeAck => break,
                _ => self.dispatch_packet()?,
            }
        }

        match self.config.protocol_level {
            ProtocolLevel::V311 => {
                let ack = v3::SubscribeAckPacket::decode(&mut ByteArray::new(&self.read_buf))?;
                if ack.packet_id() != packet_id {
                    return Err(Error::new(
                        ErrorKind::ProtocolError,
                        "SubAck packet id mismatch",
                    ));
                }
                if ack.acks().iter().any(|ack| *ack == v3::SubscribeAck::Failed) {
                    return Err(Error::new(ErrorKind::SubscribeFailed, "Subscription rejected"));
                }
            }
            ProtocolLevel::V5 => {
                let ack = v5::SubscribeAckPacket::decode(&mut ByteArray::new(&self.read_buf))?;
                if ack.packet_id() != packet_id {
                    return Err(Error::new(
                        ErrorKind::ProtocolError,
                        "SubAck packet id mismatch",
                    ));
                }
                if ack.reasons().iter().any(codec::v5::ReasonCode::is_error) {
                    return Err(Error::new(ErrorKind::SubscribeFailed, "Subscription rejected"));
                }
            }
        }

        Ok(())
    }

    /// Send an UNSUBSCRIBE packet.
    ///
    /// The UNSUBACK is not awaited; it is consumed by a later
    /// [`Client::poll`].
    ///
    /// # Errors
    ///
    /// Returns error if the transport is broken.
    pub async fn unsubscribe(&mut self, topics: &[&str]) -> Result<(), Error> {
        let packet_id = self.next_packet_id();
        match self.config.protocol_level {
            ProtocolLevel::V311 => {
                let packet = v3::UnsubscribePacket::with_topics(topics, packet_id)?;
                let mut writer = self.writer.lock().await;
                stream::write_packet(&mut *writer, &packet).await
            }
            ProtocolLevel::V5 => {
                let packet = v5::UnsubscribePacket::with_topics(topics, packet_id)?;
                let mut writer = self.writer.lock().await;
                stream::write_packet(&mut *writer, &packet).await
            }
        }
    }

    /// Publish a QoS-0 message.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or the transport is broken.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        let data = encode_publish(self.config.protocol_level, topic, payload, false)?;
        let mut writer = self.writer.lock().await;
        use tokio::io::AsyncWriteExt;
        writer.write_all(&data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send a PINGREQ packet.
    ///
    /// # Errors
    ///
    /// Returns error if the transport is broken.
    pub async fn ping(&self) -> Result<(), Error> {
        self.publisher().ping().await
    }

    /// Read and process one packet.
    ///
    /// PUBLISH packets are dispatched to the mux; PINGRESP and
    /// acknowledgements are consumed; DISCONNECT marks the client
    /// disconnected. Everything else is ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or a packet is malformed.
    pub async fn poll(&mut self) -> Result<(), Error> {
        stream::read_packet(&mut self.reader, &mut self.read_buf, DEFAULT_MAX_PACKET_SIZE).await?;
        self.dispatch_packet()
    }

    /// Poll until disconnected.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or a packet is malformed.
    pub async fn read_loop(&mut self) -> Result<(), Error> {
        while self.connected {
            self.poll().await?;
        }
        Ok(())
    }

    /// Process the packet currently in `read_buf`.
    fn dispatch_packet(&mut self) -> Result<(), Error> {
        let fixed_header = FixedHeader::decode(&mut ByteArray::new(&self.read_buf))?;
        match fixed_header.packet_type() {
            PacketType::Publish { .. } => {
                let (topic, payload, retain) = match self.config.protocol_level {
                    ProtocolLevel::V311 => {
                        let packet =
                            v3::PublishPacket::decode(&mut ByteArray::new(&self.read_buf))?;
                        (
                            packet.topic().to_string(),
                            Bytes::copy_from_slice(packet.message()),
                            packet.retain(),
                        )
                    }
                    ProtocolLevel::V5 => {
                        let packet =
                            v5::PublishPacket::decode(&mut ByteArray::new(&self.read_buf))?;
                        (
                            packet.topic().to_string(),
                            Bytes::copy_from_slice(packet.message()),
                            packet.retain(),
                        )
                    }
                };
                let msg = Message::new(topic, payload).with_retain(retain);
                self.mux.handle_message(&self.config.client_id, &msg)
            }
            PacketType::Disconnect => {
                log::info!("client: {} received DISCONNECT", self.config.client_id);
                self.connected = false;
                Ok(())
            }
            PacketType::PingResponse
            | PacketType::SubscribeAck
            | PacketType::UnsubscribeAck => Ok(()),
            packet_type => {
                log::trace!("client: Ignoring packet: {packet_type:?}");
                Ok(())
            }
        }
    }
}
