// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! A QoS-0 MQTT messaging library.
//!
//! `mqtt0` provides MQTT 3.1.1 and 5.0 support on top of the
//! [`mqtt0_codec`](codec) packet codec:
//!
//! - a subscription [`trie`](trie::Trie) with `+`/`#` wildcard matching,
//! - a message dispatch [`Mux`],
//! - a [`Client`] driving one transport,
//! - a [`Broker`] serving many concurrent clients over host-supplied
//!   transports, with authentication, ACL, shared subscriptions and
//!   `$SYS` lifecycle events.
//!
//! The broker does not own a listener; the host accepts connections and
//! hands each one to [`Broker::serve_conn`].

pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod mux;
pub mod stream;
pub mod transport;
pub mod trie;
pub mod types;

pub use auth::{AllowAll, Authenticator};
pub use broker::{Broker, BrokerBuilder};
pub use client::{Client, Publisher};
pub use config::{BrokerConfig, ClientConfig};
pub use error::{Error, ErrorKind};
pub use mux::Mux;
pub use transport::Transport;
pub use trie::Trie;
pub use types::{Handler, Message};
