// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::Bytes;
use std::io::Write;

use super::property::check_property_type_list;
use super::{Properties, Property, PropertyType};
use crate::{
    validate_pub_topic, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket,
    FixedHeader, Packet, PacketId, PacketType, QoS, StringData, U16Data, VarIntError,
};

/// Properties available in PUBLISH packet.
pub const PUBLISH_PROPERTIES: &[PropertyType] = &[
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::TopicAlias,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
    PropertyType::ContentType,
];

/// `PublishPacket` is used to transport application messages from the Client
/// to the Server, or from the Server to the Client.
///
/// Basic structure of the packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Topic name length     |
/// |                       |
/// +-----------------------+
/// | Topic name ...        |
/// +-----------------------+
/// | Packet Identifier     |
/// |                       |
/// +-----------------------+
/// | Properties ...        |
/// +-----------------------+
/// | Msg payload ...       |
/// +-----------------------+
/// ```
///
/// Note that `packet_id` only appears in QoS 1 and QoS 2 packets.
///
/// An empty topic name is accepted by the decoder because a sender may
/// identify the topic by the Topic Alias property alone [MQTT-3.3.2-6].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublishPacket {
    /// If false, this is the first delivery attempt of this packet.
    /// It must be false if QoS is 0 [MQTT-3.3.1-2].
    dup: bool,

    /// The level of assurance for delivery of this packet.
    qos: QoS,

    /// Whether the Server shall keep this message for future subscribers.
    retain: bool,

    topic: StringData,

    /// Only present when QoS is 1 or 2.
    packet_id: PacketId,

    properties: Properties,

    msg: Bytes,
}

impl PublishPacket {
    /// Create a new QoS 0 publish packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is empty, too long or contains wildcards.
    pub fn new(topic: &str, msg: &[u8]) -> Result<Self, EncodeError> {
        validate_pub_topic(topic)?;
        let topic = StringData::from(topic)?;
        Ok(Self {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic,
            packet_id: PacketId::new(0),
            properties: Properties::new(),
            msg: Bytes::copy_from_slice(msg),
        })
    }

    /// Create a publish packet carrying a Topic Alias property.
    ///
    /// An empty `topic` is valid here; the receiver resolves it through its
    /// alias table.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is too long or contains wildcards.
    pub fn with_topic_alias(topic: &str, alias: u16, msg: &[u8]) -> Result<Self, EncodeError> {
        if !topic.is_empty() {
            validate_pub_topic(topic)?;
        }
        let topic = StringData::from(topic)?;
        let mut properties = Properties::new();
        properties.set(Property::TopicAlias(U16Data::new(alias)));
        Ok(Self {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic,
            packet_id: PacketId::new(0),
            properties,
            msg: Bytes::copy_from_slice(msg),
        })
    }

    /// Update `retain` flag.
    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    /// Get current `retain` flag.
    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// Get current `dup` flag.
    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    /// Get current QoS level.
    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    /// Get current packet id; meaningless when QoS is 0.
    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Get current topic. May be empty when a topic alias is used.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    /// Get topic alias property value, if set.
    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        self.properties.topic_alias()
    }

    /// Get a mutable reference to property list.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Get a reference to property list.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get message payload.
    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.msg
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut remaining_length = self.topic.bytes() + self.properties.bytes() + self.msg.len();
        if self.qos != QoS::AtMostOnce {
            remaining_length += PacketId::bytes();
        }

        let packet_type = PacketType::Publish {
            dup: self.dup,
            retain: self.retain,
            qos: self.qos,
        };
        FixedHeader::new(packet_type, remaining_length)
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;

        let (dup, qos, retain) =
            if let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() {
                (dup, qos, retain)
            } else {
                return Err(DecodeError::InvalidPacketType);
            };

        let header_end = ba.offset();
        let topic = StringData::decode(ba)?;

        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            if packet_id.value() == 0 {
                // PUBLISH (in cases where QoS > 0) Control Packets MUST contain
                // a non-zero 16-bit Packet Identifier [MQTT-2.3.1-1].
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        let properties = Properties::decode(ba)?;
        if let Err(property_type) = check_property_type_list(properties.props(), PUBLISH_PROPERTIES)
        {
            log::error!("v5/PublishPacket: Invalid property type {property_type:?}");
            return Err(DecodeError::InvalidPropertyType);
        }

        let consumed = ba.offset() - header_end;
        let msg_len = fixed_header
            .remaining_length()
            .checked_sub(consumed)
            .ok_or(DecodeError::InvalidRemainingLength)?;

        let msg = Bytes::copy_from_slice(ba.read_bytes(msg_len)?);
        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            msg,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(v)?;

        // Write variable header
        self.topic.encode(v)?;
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(v)?;
        }
        self.properties.encode(v)?;

        // Write payload
        v.write_all(&self.msg)?;

        Ok(v.len() - old_len)
    }
}

impl Packet for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish {
            dup: self.dup,
            retain: self.retain,
            qos: self.qos,
        }
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = self.get_fixed_header()?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let packet = PublishPacket::new("sensor/temp", b"21.5").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.topic(), "sensor/temp");
        assert_eq!(decoded.message(), b"21.5");
        assert_eq!(decoded.topic_alias(), None);
    }

    #[test]
    fn test_round_trip_topic_alias() {
        let packet = PublishPacket::with_topic_alias("sensor/temp", 7, b"21.5").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.topic(), "sensor/temp");
        assert_eq!(decoded.topic_alias(), Some(7));

        // Follow-up packet omits the topic and keeps the alias.
        let packet = PublishPacket::with_topic_alias("", 7, b"21.7").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.topic(), "");
        assert_eq!(decoded.topic_alias(), Some(7));
        assert_eq!(decoded.message(), b"21.7");
    }
}
