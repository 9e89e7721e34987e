// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use codec::utils::random_client_id;
use codec::ProtocolLevel;
use serde::{Deserialize, Serialize};

/// Default maximum packet size, 2 MiB.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 2 * 1024 * 1024;

/// Default largest accepted topic alias value.
pub const DEFAULT_MAX_TOPIC_ALIAS: u16 = u16::MAX;

/// Default maximum topic byte length.
pub const DEFAULT_MAX_TOPIC_LENGTH: usize = 256;

/// Default per-client subscription limit.
pub const DEFAULT_MAX_SUBSCRIPTIONS_PER_CLIENT: usize = 100;

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Maximum packet size accepted from clients.
    pub max_packet_size: usize,

    /// Largest topic alias value accepted on v5 connections; advertised in
    /// the CONNACK `Topic Alias Maximum` property.
    pub max_topic_alias: u16,

    /// Maximum byte length of publish topics and subscription filters.
    pub max_topic_length: usize,

    /// Maximum number of distinct subscriptions per client.
    pub max_subscriptions_per_client: usize,

    /// Publish `$SYS/brokers/<client-id>/{connected,disconnected}` events.
    pub sys_events: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_topic_alias: DEFAULT_MAX_TOPIC_ALIAS,
            max_topic_length: DEFAULT_MAX_TOPIC_LENGTH,
            max_subscriptions_per_client: DEFAULT_MAX_SUBSCRIPTIONS_PER_CLIENT,
            sys_events: false,
        }
    }
}

/// Client connect options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client id; a random one is generated when empty.
    pub client_id: String,

    /// Optional username.
    pub username: Option<String>,

    /// Optional password; only sent when `username` is set.
    pub password: Option<Vec<u8>>,

    /// Keep alive interval in seconds; 0 disables keep alive.
    pub keep_alive: u16,

    /// Clean session (3.1.1) / clean start (5.0) flag.
    pub clean_session: bool,

    /// Protocol version to speak.
    pub protocol_level: ProtocolLevel,

    /// Session Expiry Interval property, in seconds. Only sent on v5
    /// connections.
    pub session_expiry: Option<u32>,
}

impl ClientConfig {
    /// Create a config with the given `client_id`; a random id is
    /// generated when `client_id` is empty.
    pub fn new(client_id: impl Into<String>) -> Self {
        let mut client_id = client_id.into();
        if client_id.is_empty() {
            client_id = random_client_id();
        }
        Self {
            client_id,
            username: None,
            password: None,
            keep_alive: 60,
            clean_session: true,
            protocol_level: ProtocolLevel::V311,
            session_expiry: None,
        }
    }

    /// Switch to MQTT 5.0.
    #[must_use]
    pub fn v5(mut self) -> Self {
        self.protocol_level = ProtocolLevel::V5;
        self
    }

    /// Set username and password.
    #[must_use]
    pub fn credentials(mut self, username: &str, password: &[u8]) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_vec());
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.max_packet_size, 2 * 1024 * 1024);
        assert_eq!(config.max_topic_alias, 65535);
        assert_eq!(config.max_topic_length, 256);
        assert_eq!(config.max_subscriptions_per_client, 100);
        assert!(!config.sys_events);
    }

    #[test]
    fn test_client_config_random_id() {
        let config = ClientConfig::new("");
        assert!(!config.client_id.is_empty());
        assert_eq!(config.protocol_level, ProtocolLevel::V311);
    }
}
