// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use super::property::check_property_type_list;
use super::{Properties, PropertyType};
use crate::{
    validate_sub_topic, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket,
    FixedHeader, Packet, PacketId, PacketType, QoS, StringData, VarIntError,
};

/// Properties available in SUBSCRIBE packet.
pub const SUBSCRIBE_PROPERTIES: &[PropertyType] = &[
    PropertyType::SubscriptionIdentifier,
    PropertyType::UserProperty,
];

/// Retain Handling option in subscription options.
///
/// This option specifies whether retained messages are sent when the
/// subscription is established.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetainHandling {
    /// Send retained messages at the time of the subscribe.
    #[default]
    Send = 0,

    /// Send retained messages at subscribe only if the subscription does
    /// not currently exist.
    SendFirst = 1,

    /// Do not send retained messages at the time of the subscribe.
    NoSend = 2,
}

impl TryFrom<u8> for RetainHandling {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Send),
            1 => Ok(Self::SendFirst),
            2 => Ok(Self::NoSend),
            _ => Err(DecodeError::OtherErrors),
        }
    }
}

/// Topic filter and subscription options pair in SUBSCRIBE packet payload.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribeTopic {
    topic: StringData,

    /// Bits 0 and 1 of the Subscription Options represent the Maximum QoS
    /// field. It is a Protocol Error if the Maximum QoS field has the
    /// value 3.
    qos: QoS,

    /// Bit 2 of the Subscription Options represents the No Local option.
    ///
    /// If the value is 1, Application Messages MUST NOT be forwarded to a
    /// connection with a ClientID equal to the ClientID of the publishing
    /// connection [MQTT-3.8.3-3].
    no_local: bool,

    /// Bit 3 of the Subscription Options represents the Retain As
    /// Published option.
    retain_as_published: bool,

    /// Bits 4 and 5 of the Subscription Options represent the Retain
    /// Handling option. It is a Protocol Error to send a Retain Handling
    /// value of 3.
    retain_handling: RetainHandling,
}

impl SubscribeTopic {
    /// Create a new subscribe topic.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` violates filter rules.
    pub fn new(topic: &str, qos: QoS) -> Result<Self, EncodeError> {
        validate_sub_topic(topic)?;
        let topic = StringData::from(topic)?;
        Ok(Self {
            topic,
            qos,
            ..Self::default()
        })
    }

    /// Get current topic filter.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    /// Get current QoS.
    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    /// Get `no_local` flag.
    #[must_use]
    pub const fn no_local(&self) -> bool {
        self.no_local
    }

    /// Get `retain_as_published` flag.
    #[must_use]
    pub const fn retain_as_published(&self) -> bool {
        self.retain_as_published
    }

    /// Get `retain_handling` option.
    #[must_use]
    pub const fn retain_handling(&self) -> RetainHandling {
        self.retain_handling
    }

    /// Get byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.topic.bytes() + 1
    }
}

impl EncodePacket for SubscribeTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.topic.encode(buf)?;

        let mut flag: u8 = self.qos as u8;
        if self.no_local {
            flag |= 0b0000_0100;
        }
        if self.retain_as_published {
            flag |= 0b0000_1000;
        }
        flag |= (self.retain_handling as u8) << 4;
        buf.push(flag);

        Ok(self.bytes())
    }
}

impl DecodePacket for SubscribeTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let topic = StringData::decode(ba)?;

        let flag = ba.read_byte()?;
        let qos = QoS::try_from(flag & 0b0000_0011)?;
        let no_local = (flag & 0b0000_0100) == 0b0000_0100;
        let retain_as_published = (flag & 0b0000_1000) == 0b0000_1000;
        let retain_handling = RetainHandling::try_from((flag & 0b0011_0000) >> 4)?;

        // The upper two bits are reserved [MQTT-3.8.3-5].
        if flag & 0b1100_0000 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }

        Ok(Self {
            topic,
            qos,
            no_local,
            retain_as_published,
            retain_handling,
        })
    }
}

/// `SubscribePacket` is sent from the Client to the Server to create one or
/// more subscriptions.
///
/// Basic structure of the packet:
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Packet id             |
/// |                       |
/// +-----------------------+
/// | Properties ...        |
/// +-----------------------+
/// | Topic 0 length        |
/// |                       |
/// +-----------------------+
/// | Topic 0 ...           |
/// +-----------------------+
/// | Topic 0 options       |
/// +-----------------------+
/// | ...                   |
/// +-----------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribePacket {
    /// Used by the Server to reply a SubscribeAckPacket to the client.
    packet_id: PacketId,

    properties: Properties,

    topics: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    /// Create a new subscribe packet with `topic` pattern.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` violates filter rules.
    pub fn new(topic: &str, qos: QoS, packet_id: PacketId) -> Result<Self, EncodeError> {
        let topic = SubscribeTopic::new(topic, qos)?;
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics: vec![topic],
        })
    }

    /// Create a new subscribe packet with a list of `topics`.
    ///
    /// # Errors
    ///
    /// Returns error if any topic violates filter rules.
    pub fn with_topics(topics: &[&str], qos: QoS, packet_id: PacketId) -> Result<Self, EncodeError> {
        let topics = topics
            .iter()
            .map(|topic| SubscribeTopic::new(topic, qos))
            .collect::<Result<Vec<_>, EncodeError>>()?;
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics,
        })
    }

    /// Get current packet id.
    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Get a reference to property list.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get a reference to topic list.
    #[must_use]
    pub fn topics(&self) -> &[SubscribeTopic] {
        &self.topics
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let remaining_length = PacketId::bytes()
            + self.properties.bytes()
            + self
                .topics
                .iter()
                .map(SubscribeTopic::bytes)
                .sum::<usize>();
        FixedHeader::new(PacketType::Subscribe, remaining_length)
    }
}

impl EncodePacket for SubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        self.properties.encode(buf)?;

        for topic in &self.topics {
            topic.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for SubscribePacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Subscribe {
            return Err(DecodeError::InvalidPacketType);
        }

        let variable_header_start = ba.offset();

        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            // SUBSCRIBE packets MUST contain a non-zero Packet Identifier [MQTT-2.3.1-1].
            return Err(DecodeError::InvalidPacketId);
        }

        let properties = Properties::decode(ba)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), SUBSCRIBE_PROPERTIES)
        {
            log::error!("v5/SubscribePacket: Invalid property type {property_type:?}");
            return Err(DecodeError::InvalidPropertyType);
        }

        let end = variable_header_start + fixed_header.remaining_length();
        let mut topics = Vec::new();
        while ba.offset() < end {
            topics.push(SubscribeTopic::decode(ba)?);
        }

        // The payload MUST contain at least one Topic Filter and
        // Subscription Options pair [MQTT-3.8.3-2].
        if topics.is_empty() {
            return Err(DecodeError::EmptyTopic);
        }

        Ok(Self {
            packet_id,
            properties,
            topics,
        })
    }
}

impl Packet for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
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
        let packet =
            SubscribePacket::new("$share/workers/jobs/+", QoS::AtMostOnce, PacketId::new(11))
                .unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x82);

        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribePacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.packet_id().value(), 11);
        assert_eq!(decoded.topics().len(), 1);
        assert_eq!(decoded.topics()[0].topic(), "$share/workers/jobs/+");
        assert_eq!(decoded.topics()[0].qos(), QoS::AtMostOnce);
    }
}
