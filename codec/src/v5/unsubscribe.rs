// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use super::property::check_property_type_list;
use super::{Properties, PropertyType};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, StringData, VarIntError,
};

/// Properties available in UNSUBSCRIBE packet.
pub const UNSUBSCRIBE_PROPERTIES: &[PropertyType] = &[PropertyType::UserProperty];

/// `UnsubscribePacket` is sent from the Client to the Server to cancel
/// subscriptions.
///
/// The Topic Filters in an UNSUBSCRIBE packet MUST be compared
/// character-by-character with the current set of Topic Filters; only exact
/// matches are removed [MQTT-3.10.4-1].
///
/// Basic structure of the packet:
/// ```txt
///  7                      0
/// +------------------------+
/// | Fixed header           |
/// |                        |
/// +------------------------+
/// | Packet id              |
/// |                        |
/// +------------------------+
/// | Properties ...         |
/// +------------------------+
/// | Topic 0 length         |
/// |                        |
/// +------------------------+
/// | Topic 0 ...            |
/// +------------------------+
/// | ...                    |
/// +------------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsubscribePacket {
    /// Used by the Server to reply an UnsubscribeAckPacket to the client.
    packet_id: PacketId,

    properties: Properties,

    topics: Vec<StringData>,
}

impl UnsubscribePacket {
    /// Create a new unsubscribe packet with one `topic` pattern.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is too long.
    pub fn new(topic: &str, packet_id: PacketId) -> Result<Self, EncodeError> {
        let topic = StringData::from(topic)?;
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics: vec![topic],
        })
    }

    /// Create a new unsubscribe packet with a list of `topics`.
    ///
    /// # Errors
    ///
    /// Returns error if any topic is too long.
    pub fn with_topics(topics: &[&str], packet_id: PacketId) -> Result<Self, EncodeError> {
        let topics = topics
            .iter()
            .map(|topic| StringData::from(topic))
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
    pub fn topics(&self) -> &[StringData] {
        &self.topics
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let remaining_length = PacketId::bytes()
            + self.properties.bytes()
            + self.topics.iter().map(StringData::bytes).sum::<usize>();
        FixedHeader::new(PacketType::Unsubscribe, remaining_length)
    }
}

impl EncodePacket for UnsubscribePacket {
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

impl DecodePacket for UnsubscribePacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Unsubscribe {
            return Err(DecodeError::InvalidPacketType);
        }

        let variable_header_start = ba.offset();

        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            // UNSUBSCRIBE packets MUST contain a non-zero Packet Identifier [MQTT-2.3.1-1].
            return Err(DecodeError::InvalidPacketId);
        }

        let properties = Properties::decode(ba)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), UNSUBSCRIBE_PROPERTIES)
        {
            log::error!("v5/UnsubscribePacket: Invalid property type {property_type:?}");
            return Err(DecodeError::InvalidPropertyType);
        }

        let end = variable_header_start + fixed_header.remaining_length();
        let mut topics = Vec::new();
        while ba.offset() < end {
            topics.push(StringData::decode(ba)?);
        }

        // The payload of an UNSUBSCRIBE packet MUST contain at least
        // one Topic Filter [MQTT-3.10.3-2].
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

impl Packet for UnsubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Unsubscribe
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
        let packet = UnsubscribePacket::with_topics(&["a/+", "b/#"], PacketId::new(5)).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0xa2);

        let mut ba = ByteArray::new(&buf);
        let decoded = UnsubscribePacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.packet_id().value(), 5);
        assert_eq!(decoded.topics().len(), 2);
        assert_eq!(decoded.topics()[0].as_ref(), "a/+");
    }
}
