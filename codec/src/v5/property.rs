// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{
    BinaryData, BoolData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, QoS,
    StringData, StringPairData, U16Data, U32Data, VarInt,
};

/// Maximum number of user properties kept per packet.
///
/// Extra pairs found while decoding are dropped without error.
pub const MAX_USER_PROPERTIES: usize = 8;

/// Property types which may occur more than once in a property list.
pub const MULTIPLE_PROPERTIES: &[PropertyType] = &[
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
];

/// Check that every property in `properties` is one of `types`, and that
/// non-repeatable properties occur at most once.
///
/// # Errors
///
/// Returns the offending property type.
pub fn check_property_type_list(
    properties: &[Property],
    types: &[PropertyType],
) -> Result<(), PropertyType> {
    if properties.is_empty() {
        return Ok(());
    }

    for property in properties {
        if !types.contains(&property.property_type()) {
            return Err(property.property_type());
        }
    }

    for property_type in types {
        let count = properties
            .iter()
            .filter(|p| p.property_type() == *property_type)
            .count();
        if count > 1 && !MULTIPLE_PROPERTIES.contains(property_type) {
            return Err(*property_type);
        }
    }

    Ok(())
}

/// Property identifier byte.
#[allow(clippy::module_name_repetitions)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0b,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1a,
    ServerReference = 0x1c,
    ReasonString = 0x1f,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2a,
}

impl PropertyType {
    /// Get byte length used in packet.
    #[must_use]
    #[inline]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// A single `(identifier, value)` pair in a property list.
///
/// The shape of the value is fixed by the identifier: byte, two byte
/// integer, four byte integer, variable byte integer, UTF-8 string,
/// binary data, or UTF-8 string pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Byte. Used in PUBLISH, Will Properties.
    ///
    /// 0 means the payload is unspecified bytes, 1 means UTF-8 encoded
    /// character data.
    PayloadFormatIndicator(BoolData),

    /// Four Byte Integer. Used in PUBLISH, Will Properties.
    ///
    /// Lifetime of the message in seconds.
    MessageExpiryInterval(U32Data),

    /// UTF-8 Encoded String. Used in PUBLISH, Will Properties.
    ContentType(StringData),

    /// UTF-8 Encoded String. Used in PUBLISH, Will Properties.
    ///
    /// Topic Name for a response message.
    ResponseTopic(StringData),

    /// Binary Data. Used in PUBLISH, Will Properties.
    ///
    /// Used by the sender of the Request Message to identify which request
    /// the Response Message is for when it is received.
    CorrelationData(BinaryData),

    /// Variable Byte Integer. Used in PUBLISH, SUBSCRIBE.
    ///
    /// The Subscription Identifier can have a value of 1 to 268,435,455.
    SubscriptionIdentifier(VarInt),

    /// Four Byte Integer. Used in CONNECT, CONNACK, DISCONNECT.
    ///
    /// Session Expiry Interval in seconds. If absent, the Session ends when
    /// the Network Connection is closed; 0xFFFFFFFF means the Session does
    /// not expire.
    SessionExpiryInterval(U32Data),

    /// UTF-8 Encoded String. Used in CONNACK.
    ///
    /// The Client Identifier which was assigned by the Server because a
    /// zero length Client Identifier was found in CONNECT [MQTT-3.2.2-16].
    AssignedClientIdentifier(StringData),

    /// Two Byte Integer. Used in CONNACK.
    ///
    /// If present, the Client MUST use this value instead of the Keep Alive
    /// it sent on CONNECT [MQTT-3.2.2-21].
    ServerKeepAlive(U16Data),

    /// UTF-8 Encoded String. Used in CONNECT, CONNACK, AUTH.
    ///
    /// Name of the authentication method used for extended authentication.
    AuthenticationMethod(StringData),

    /// Binary Data. Used in CONNECT, CONNACK, AUTH.
    ///
    /// Contents are defined by the authentication method.
    AuthenticationData(BinaryData),

    /// Byte. Used in CONNECT.
    ///
    /// The Client uses this value to indicate whether the Reason String or
    /// User Properties are sent in the case of failures [MQTT-3.1.2-29].
    RequestProblemInformation(BoolData),

    /// Four Byte Integer. Will Properties.
    ///
    /// Delay in seconds before the Server publishes the Will
    /// Message [MQTT-3.1.3-9].
    WillDelayInterval(U32Data),

    /// Byte. Used in CONNECT.
    ///
    /// A value of 0 indicates that the Server MUST NOT return Response
    /// Information [MQTT-3.1.2-28].
    RequestResponseInformation(BoolData),

    /// UTF-8 Encoded String. Used in CONNACK.
    ///
    /// Used as the basis for creating a Response Topic.
    ResponseInformation(StringData),

    /// UTF-8 Encoded String. Used in CONNACK, DISCONNECT.
    ///
    /// Identifies another Server for the Client to use.
    ServerReference(StringData),

    /// UTF-8 Encoded String. Used in all acknowledgement packets.
    ///
    /// A human readable reason string designed for diagnostics.
    ReasonString(StringData),

    /// Two Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// The maximum number of QoS 1 and QoS 2 publications that can be
    /// processed concurrently. There is no mechanism to limit the QoS 0
    /// publications that the other end might try to send.
    ReceiveMaximum(U16Data),

    /// Two Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// The highest value accepted as a Topic Alias. Zero or absent means
    /// topic aliases are not accepted on this connection.
    TopicAliasMaximum(U16Data),

    /// Two Byte Integer. Used in PUBLISH.
    ///
    /// An integer value used to identify the Topic instead of using the
    /// Topic Name. Topic Alias values must be non-zero and no larger than
    /// the receiver's Topic Alias Maximum [MQTT-3.3.2-9].
    TopicAlias(U16Data),

    /// Byte. Used in CONNACK.
    ///
    /// Maximum QoS the Server supports.
    MaximumQoS(QoS),

    /// Byte. Used in CONNACK.
    ///
    /// Declares whether the Server supports retained messages.
    RetainAvailable(BoolData),

    /// UTF-8 String Pair. Used everywhere.
    ///
    /// The same name is allowed to appear more than once.
    UserProperty(StringPairData),

    /// Four Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// The maximum packet size the sender is willing to accept.
    MaximumPacketSize(U32Data),

    /// Byte. Used in CONNACK.
    ///
    /// Declares whether the Server supports Wildcard Subscriptions.
    WildcardSubscriptionAvailable(BoolData),

    /// Byte. Used in CONNACK.
    ///
    /// Declares whether the Server supports Subscription Identifiers.
    SubscriptionIdentifierAvailable(BoolData),

    /// Byte. Used in CONNACK.
    ///
    /// Declares whether the Server supports Shared Subscriptions.
    SharedSubscriptionAvailable(BoolData),
}

impl Property {
    /// Get the property identifier of this value.
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::PayloadFormatIndicator(_) => PropertyType::PayloadFormatIndicator,
            Self::MessageExpiryInterval(_) => PropertyType::MessageExpiryInterval,
            Self::ContentType(_) => PropertyType::ContentType,
            Self::ResponseTopic(_) => PropertyType::ResponseTopic,
            Self::CorrelationData(_) => PropertyType::CorrelationData,
            Self::SubscriptionIdentifier(_) => PropertyType::SubscriptionIdentifier,
            Self::SessionExpiryInterval(_) => PropertyType::SessionExpiryInterval,
            Self::AssignedClientIdentifier(_) => PropertyType::AssignedClientIdentifier,
            Self::ServerKeepAlive(_) => PropertyType::ServerKeepAlive,
            Self::AuthenticationMethod(_) => PropertyType::AuthenticationMethod,
            Self::AuthenticationData(_) => PropertyType::AuthenticationData,
            Self::RequestProblemInformation(_) => PropertyType::RequestProblemInformation,
            Self::WillDelayInterval(_) => PropertyType::WillDelayInterval,
            Self::RequestResponseInformation(_) => PropertyType::RequestResponseInformation,
            Self::ResponseInformation(_) => PropertyType::ResponseInformation,
            Self::ServerReference(_) => PropertyType::ServerReference,
            Self::ReasonString(_) => PropertyType::ReasonString,
            Self::ReceiveMaximum(_) => PropertyType::ReceiveMaximum,
            Self::TopicAliasMaximum(_) => PropertyType::TopicAliasMaximum,
            Self::TopicAlias(_) => PropertyType::TopicAlias,
            Self::MaximumQoS(_) => PropertyType::MaximumQoS,
            Self::RetainAvailable(_) => PropertyType::RetainAvailable,
            Self::UserProperty(_) => PropertyType::UserProperty,
            Self::MaximumPacketSize(_) => PropertyType::MaximumPacketSize,
            Self::WildcardSubscriptionAvailable(_) => PropertyType::WildcardSubscriptionAvailable,
            Self::SubscriptionIdentifierAvailable(_) => {
                PropertyType::SubscriptionIdentifierAvailable
            }
            Self::SharedSubscriptionAvailable(_) => PropertyType::SharedSubscriptionAvailable,
        }
    }

    /// Get byte length in packet, including the identifier byte.
    #[must_use]
    pub fn bytes(&self) -> usize {
        PropertyType::bytes()
            + match self {
                Self::PayloadFormatIndicator(_)
                | Self::RequestProblemInformation(_)
                | Self::RequestResponseInformation(_)
                | Self::MaximumQoS(_)
                | Self::RetainAvailable(_)
                | Self::WildcardSubscriptionAvailable(_)
                | Self::SubscriptionIdentifierAvailable(_)
                | Self::SharedSubscriptionAvailable(_) => BoolData::bytes(),
                Self::MessageExpiryInterval(_)
                | Self::SessionExpiryInterval(_)
                | Self::WillDelayInterval(_)
                | Self::MaximumPacketSize(_) => U32Data::bytes(),
                Self::ServerKeepAlive(_)
                | Self::ReceiveMaximum(_)
                | Self::TopicAliasMaximum(_)
                | Self::TopicAlias(_) => U16Data::bytes(),
                Self::SubscriptionIdentifier(v) => v.bytes(),
                Self::ContentType(v)
                | Self::ResponseTopic(v)
                | Self::AssignedClientIdentifier(v)
                | Self::AuthenticationMethod(v)
                | Self::ResponseInformation(v)
                | Self::ServerReference(v)
                | Self::ReasonString(v) => v.bytes(),
                Self::CorrelationData(v) | Self::AuthenticationData(v) => v.bytes(),
                Self::UserProperty(v) => v.bytes(),
            }
    }

    fn decode_value(ba: &mut ByteArray, property_type: PropertyType) -> Result<Self, DecodeError> {
        match property_type {
            PropertyType::PayloadFormatIndicator => {
                Ok(Self::PayloadFormatIndicator(BoolData::decode(ba)?))
            }
            PropertyType::MessageExpiryInterval => {
                Ok(Self::MessageExpiryInterval(U32Data::decode(ba)?))
            }
            PropertyType::ContentType => Ok(Self::ContentType(StringData::decode(ba)?)),
            PropertyType::ResponseTopic => Ok(Self::ResponseTopic(StringData::decode(ba)?)),
            PropertyType::CorrelationData => Ok(Self::CorrelationData(BinaryData::decode(ba)?)),
            PropertyType::SubscriptionIdentifier => {
                Ok(Self::SubscriptionIdentifier(VarInt::decode(ba)?))
            }
            PropertyType::SessionExpiryInterval => {
                Ok(Self::SessionExpiryInterval(U32Data::decode(ba)?))
            }
            PropertyType::AssignedClientIdentifier => {
                Ok(Self::AssignedClientIdentifier(StringData::decode(ba)?))
            }
            PropertyType::ServerKeepAlive => Ok(Self::ServerKeepAlive(U16Data::decode(ba)?)),
            PropertyType::AuthenticationMethod => {
                Ok(Self::AuthenticationMethod(StringData::decode(ba)?))
            }
            PropertyType::AuthenticationData => {
                Ok(Self::AuthenticationData(BinaryData::decode(ba)?))
            }
            PropertyType::RequestProblemInformation => {
                Ok(Self::RequestProblemInformation(BoolData::decode(ba)?))
            }
            PropertyType::WillDelayInterval => Ok(Self::WillDelayInterval(U32Data::decode(ba)?)),
            PropertyType::RequestResponseInformation => {
                Ok(Self::RequestResponseInformation(BoolData::decode(ba)?))
            }
            PropertyType::ResponseInformation => {
                Ok(Self::ResponseInformation(StringData::decode(ba)?))
            }
            PropertyType::ServerReference => Ok(Self::ServerReference(StringData::decode(ba)?)),
            PropertyType::ReasonString => Ok(Self::ReasonString(StringData::decode(ba)?)),
            PropertyType::ReceiveMaximum => Ok(Self::ReceiveMaximum(U16Data::decode(ba)?)),
            PropertyType::TopicAliasMaximum => Ok(Self::TopicAliasMaximum(U16Data::decode(ba)?)),
            PropertyType::TopicAlias => Ok(Self::TopicAlias(U16Data::decode(ba)?)),
            PropertyType::MaximumQoS => {
                let qos = QoS::try_from(ba.read_byte()?)?;
                Ok(Self::MaximumQoS(qos))
            }
            PropertyType::RetainAvailable => Ok(Self::RetainAvailable(BoolData::decode(ba)?)),
            PropertyType::UserProperty => Ok(Self::UserProperty(StringPairData::decode(ba)?)),
            PropertyType::MaximumPacketSize => Ok(Self::MaximumPacketSize(U32Data::decode(ba)?)),
            PropertyType::WildcardSubscriptionAvailable => {
                Ok(Self::WildcardSubscriptionAvailable(BoolData::decode(ba)?))
            }
            PropertyType::SubscriptionIdentifierAvailable => {
                Ok(Self::SubscriptionIdentifierAvailable(BoolData::decode(ba)?))
            }
            PropertyType::SharedSubscriptionAvailable => {
                Ok(Self::SharedSubscriptionAvailable(BoolData::decode(ba)?))
            }
        }
    }
}

impl EncodePacket for Property {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        buf.push(self.property_type() as u8);

        match self {
            Self::PayloadFormatIndicator(v)
            | Self::RequestProblemInformation(v)
            | Self::RequestResponseInformation(v)
            | Self::RetainAvailable(v)
            | Self::WildcardSubscriptionAvailable(v)
            | Self::SubscriptionIdentifierAvailable(v)
            | Self::SharedSubscriptionAvailable(v) => {
                v.encode(buf)?;
            }
            Self::MaximumQoS(v) => buf.push(*v as u8),
            Self::MessageExpiryInterval(v)
            | Self::SessionExpiryInterval(v)
            | Self::WillDelayInterval(v)
            | Self::MaximumPacketSize(v) => {
                v.encode(buf)?;
            }
            Self::ServerKeepAlive(v)
            | Self::ReceiveMaximum(v)
            | Self::TopicAliasMaximum(v)
            | Self::TopicAlias(v) => {
                v.encode(buf)?;
            }
            Self::SubscriptionIdentifier(v) => {
                v.encode(buf)?;
            }
            Self::ContentType(v)
            | Self::ResponseTopic(v)
            | Self::AssignedClientIdentifier(v)
            | Self::AuthenticationMethod(v)
            | Self::ResponseInformation(v)
            | Self::ServerReference(v)
            | Self::ReasonString(v) => {
                v.encode(buf)?;
            }
            Self::CorrelationData(v) | Self::AuthenticationData(v) => {
                v.encode(buf)?;
            }
            Self::UserProperty(v) => {
                v.encode(buf)?;
            }
        }

        Ok(buf.len() - old_len)
    }
}

/// A property list, prefixed on the wire with its byte length as a
/// variable byte integer.
///
/// Encoding is order-insensitive; the decoder populates values in the
/// order they are seen.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl Properties {
    /// Create an empty property list.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Get a reference to inner property list.
    #[must_use]
    pub fn props(&self) -> &[Property] {
        &self.0
    }

    /// Returns true if no property is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get number of properties set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Add a property to the list, replacing any previous value of the same
    /// type unless that type may occur multiple times.
    pub fn set(&mut self, property: Property) -> &mut Self {
        let property_type = property.property_type();
        if !MULTIPLE_PROPERTIES.contains(&property_type) {
            self.0.retain(|p| p.property_type() != property_type);
        }
        self.0.push(property);
        self
    }

    /// Add a user property pair.
    ///
    /// Pairs beyond [`MAX_USER_PROPERTIES`] are dropped without error.
    ///
    /// # Errors
    ///
    /// Returns error if key or value is too long.
    pub fn add_user_property(&mut self, key: &str, value: &str) -> Result<&mut Self, EncodeError> {
        if self.user_properties().len() < MAX_USER_PROPERTIES {
            let pair = StringPairData::new(key, value)?;
            self.0.push(Property::UserProperty(pair));
        }
        Ok(self)
    }

    fn find(&self, property_type: PropertyType) -> Option<&Property> {
        self.0.iter().find(|p| p.property_type() == property_type)
    }

    /// Byte length of the property values, without the length prefix.
    fn payload_bytes(&self) -> usize {
        self.0.iter().map(Property::bytes).sum()
    }

    /// Get byte length in packet, including the length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let payload_bytes = self.payload_bytes();
        let prefix = VarInt::from(payload_bytes).map_or(1, |v| v.bytes());
        prefix + payload_bytes
    }

    pub fn session_expiry_interval(&self) -> Option<u32> {
        match self.find(PropertyType::SessionExpiryInterval) {
            Some(Property::SessionExpiryInterval(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn message_expiry_interval(&self) -> Option<u32> {
        match self.find(PropertyType::MessageExpiryInterval) {
            Some(Property::MessageExpiryInterval(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn receive_maximum(&self) -> Option<u16> {
        match self.find(PropertyType::ReceiveMaximum) {
            Some(Property::ReceiveMaximum(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn maximum_packet_size(&self) -> Option<u32> {
        match self.find(PropertyType::MaximumPacketSize) {
            Some(Property::MaximumPacketSize(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn topic_alias(&self) -> Option<u16> {
        match self.find(PropertyType::TopicAlias) {
            Some(Property::TopicAlias(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn topic_alias_maximum(&self) -> Option<u16> {
        match self.find(PropertyType::TopicAliasMaximum) {
            Some(Property::TopicAliasMaximum(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self.find(PropertyType::ContentType) {
            Some(Property::ContentType(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn response_topic(&self) -> Option<&str> {
        match self.find(PropertyType::ResponseTopic) {
            Some(Property::ResponseTopic(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn correlation_data(&self) -> Option<&[u8]> {
        match self.find(PropertyType::CorrelationData) {
            Some(Property::CorrelationData(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn subscription_identifier(&self) -> Option<usize> {
        match self.find(PropertyType::SubscriptionIdentifier) {
            Some(Property::SubscriptionIdentifier(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn reason_string(&self) -> Option<&str> {
        match self.find(PropertyType::ReasonString) {
            Some(Property::ReasonString(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn assigned_client_identifier(&self) -> Option<&str> {
        match self.find(PropertyType::AssignedClientIdentifier) {
            Some(Property::AssignedClientIdentifier(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn server_keep_alive(&self) -> Option<u16> {
        match self.find(PropertyType::ServerKeepAlive) {
            Some(Property::ServerKeepAlive(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn server_reference(&self) -> Option<&str> {
        match self.find(PropertyType::ServerReference) {
            Some(Property::ServerReference(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn response_information(&self) -> Option<&str> {
        match self.find(PropertyType::ResponseInformation) {
            Some(Property::ResponseInformation(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn authentication_method(&self) -> Option<&str> {
        match self.find(PropertyType::AuthenticationMethod) {
            Some(Property::AuthenticationMethod(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn authentication_data(&self) -> Option<&[u8]> {
        match self.find(PropertyType::AuthenticationData) {
            Some(Property::AuthenticationData(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn will_delay_interval(&self) -> Option<u32> {
        match self.find(PropertyType::WillDelayInterval) {
            Some(Property::WillDelayInterval(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn payload_format_indicator(&self) -> Option<bool> {
        match self.find(PropertyType::PayloadFormatIndicator) {
            Some(Property::PayloadFormatIndicator(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn request_problem_information(&self) -> Option<bool> {
        match self.find(PropertyType::RequestProblemInformation) {
            Some(Property::RequestProblemInformation(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn request_response_information(&self) -> Option<bool> {
        match self.find(PropertyType::RequestResponseInformation) {
            Some(Property::RequestResponseInformation(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn maximum_qos(&self) -> Option<QoS> {
        match self.find(PropertyType::MaximumQoS) {
            Some(Property::MaximumQoS(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn retain_available(&self) -> Option<bool> {
        match self.find(PropertyType::RetainAvailable) {
            Some(Property::RetainAvailable(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn wildcard_subscription_available(&self) -> Option<bool> {
        match self.find(PropertyType::WildcardSubscriptionAvailable) {
            Some(Property::WildcardSubscriptionAvailable(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn subscription_identifier_available(&self) -> Option<bool> {
        match self.find(PropertyType::SubscriptionIdentifierAvailable) {
            Some(Property::SubscriptionIdentifierAvailable(v)) => Some(v.value()),
            _ => None,
        }
    }

    pub fn shared_subscription_available(&self) -> Option<bool> {
        match self.find(PropertyType::SharedSubscriptionAvailable) {
            Some(Property::SharedSubscriptionAvailable(v)) => Some(v.value()),
            _ => None,
        }
    }

    /// Get all user property pairs.
    #[must_use]
    pub fn user_properties(&self) -> Vec<(&str, &str)> {
        self.0
            .iter()
            .filter_map(|p| match p {
                Property::UserProperty(pair) => {
                    Some((pair.key().as_ref(), pair.value().as_ref()))
                }
                _ => None,
            })
            .collect()
    }
}

impl DecodePacket for Properties {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let payload_bytes = VarInt::decode(ba)?;
        let end = ba.offset() + payload_bytes.value();

        let mut properties = Vec::new();
        let mut user_property_count = 0;
        while ba.offset() < end {
            let property_type = PropertyType::try_from(ba.read_byte()?)?;
            let property = Property::decode_value(ba, property_type)?;
            if property_type == PropertyType::UserProperty {
                // Extra user properties are dropped, not an error.
                user_property_count += 1;
                if user_property_count > MAX_USER_PROPERTIES {
                    continue;
                }
            }
            properties.push(property);
        }
        if ba.offset() != end {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self(properties))
    }
}

impl EncodePacket for Properties {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let payload_bytes =
            VarInt::from(self.payload_bytes()).map_err(|_err| EncodeError::InvalidVarInt)?;
        payload_bytes.encode(buf)?;

        for property in &self.0 {
            property.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_properties() {
        let properties = Properties::new();
        let mut buf = Vec::new();
        properties.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x00]);

        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let mut properties = Properties::new();
        properties
            .set(Property::SessionExpiryInterval(U32Data::new(3600)))
            .set(Property::TopicAlias(U16Data::new(7)));
        properties.add_user_property("region", "attic").unwrap();

        let mut buf = Vec::new();
        let written = properties.encode(&mut buf).unwrap();
        assert_eq!(written, properties.bytes());

        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba).unwrap();
        assert_eq!(decoded.session_expiry_interval(), Some(3600));
        assert_eq!(decoded.topic_alias(), Some(7));
        assert_eq!(decoded.user_properties(), vec![("region", "attic")]);
    }

    #[test]
    fn test_unknown_property_id() {
        // Property length 3, unknown id 0x7f.
        let buf = [0x03, 0x7f, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba),
            Err(DecodeError::InvalidPropertyType)
        );
    }

    #[test]
    fn test_user_properties_truncated() {
        let mut properties = Properties::new();
        for i in 0..12 {
            let key = format!("k{i}");
            properties.add_user_property(&key, "v").unwrap();
        }
        assert_eq!(properties.user_properties().len(), MAX_USER_PROPERTIES);

        let mut buf = Vec::new();
        properties.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba).unwrap();
        assert_eq!(decoded.user_properties().len(), MAX_USER_PROPERTIES);
    }
}
