// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! A QoS-0 MQTT broker serving host-supplied transports.
//!
//! The broker owns no listener. The host accepts connections and calls
//! [`Broker::serve_conn`] once per connection, usually from a spawned
//! task; the call blocks until that connection terminates.
//!
//! Lock order is `clients` before `subs` before any shared-group mutex.
//! A client handle's write mutex is never acquired while `subs` is held:
//! message routing snapshots the matching handles first and sends after
//! releasing the lock.

mod handle;
mod session;
mod sys;

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

use codec::parse_shared_filter;

use crate::auth::{AllowAll, Authenticator};
use crate::config::BrokerConfig;
use crate::error::Error;
use crate::trie::Trie;
use crate::types::{Handler, Message};

pub(crate) use handle::{ClientHandle, SharedGroup, WriterSlot};

/// Connection lifecycle callback.
type Callback = Arc<dyn Fn(&str) + Send + Sync>;

/// Builder for [`Broker`].
pub struct BrokerBuilder {
    config: BrokerConfig,
    authenticator: Arc<dyn Authenticator>,
    handler: Option<Arc<dyn Handler>>,
    on_connect: Option<Callback>,
    on_disconnect: Option<Callback>,
}

impl BrokerBuilder {
    /// Create a new broker builder.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            authenticator: Arc::new(AllowAll),
            handler: None,
            on_connect: None,
            on_disconnect: None,
        }
    }

    /// Set the authenticator; defaults to [`AllowAll`].
    #[must_use]
    pub fn authenticator<A: Authenticator + 'static>(mut self, authenticator: A) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Set the handler invoked for every accepted publish, typically a
    /// [`Mux`](crate::Mux).
    #[must_use]
    pub fn handler<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Set the handler from a shared reference.
    #[must_use]
    pub fn shared_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set the callback fired after a client completes CONNECT.
    #[must_use]
    pub fn on_connect<F: Fn(&str) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Set the callback fired after a client's connection terminates.
    #[must_use]
    pub fn on_disconnect<F: Fn(&str) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Build the broker.
    #[must_use]
    pub fn build(self) -> Broker {
        Broker {
            config: self.config,
            authenticator: self.authenticator,
            handler: self.handler,
            on_connect: self.on_connect,
            on_disconnect: self.on_disconnect,
            subs: StdMutex::new(SubState {
                patterns: Trie::new(),
                shared: Trie::new(),
                groups: Vec::new(),
            }),
            clients: Mutex::new(ClientState {
                clients: HashMap::new(),
                subscriptions: HashMap::new(),
            }),
        }
    }
}

/// Subscription tables, guarded by one mutex.
struct SubState {
    /// Normal subscriptions: pattern to subscribed client handle, one
    /// entry per subscribing client.
    patterns: Trie<Arc<ClientHandle>>,

    /// Shared subscriptions: actual topic filter to group.
    shared: Trie<Arc<SharedGroup>>,

    /// All groups ever created, for `(group, topic)` lookup. Emptied
    /// groups linger until broker teardown.
    groups: Vec<Arc<SharedGroup>>,
}

/// Client registry, guarded by one mutex.
struct ClientState {
    /// Connected (or previously connected) clients by client id.
    clients: HashMap<String, Arc<ClientHandle>>,

    /// Filter strings each client subscribed to, for disconnect cleanup.
    subscriptions: HashMap<String, Vec<String>>,
}

/// A QoS-0 MQTT broker supporting both 3.1.1 and 5.0 clients.
pub struct Broker {
    config: BrokerConfig,
    authenticator: Arc<dyn Authenticator>,
    handler: Option<Arc<dyn Handler>>,
    on_connect: Option<Callback>,
    on_disconnect: Option<Callback>,
    subs: StdMutex<SubState>,
    clients: Mutex<ClientState>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl Broker {
    /// Create a new broker with the given config and default policies.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        BrokerBuilder::new(config).build()
    }

    /// Create a builder for this broker.
    #[must_use]
    pub fn builder(config: BrokerConfig) -> BrokerBuilder {
        BrokerBuilder::new(config)
    }

    /// Get broker config.
    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Publish a server-originated message to all matching subscribers.
    ///
    /// Unlike client publishes, no `$`-topic or ACL check applies here;
    /// this is the path `$SYS` events use.
    ///
    /// # Errors
    ///
    /// Reserved for future delivery errors; currently always `Ok`.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        let msg = Message::new(topic, Bytes::copy_from_slice(payload));
        self.route_message(&msg, None).await;
        Ok(())
    }

    /// Register a connection under `client_id`, creating a new handle or
    /// taking over an existing one.
    ///
    /// Returns the handle and the generation this connection owns; the
    /// caller must pass the same generation to [`Broker::cleanup_client`].
    async fn register_client(
        &self,
        client_id: &str,
        username: &str,
        slot: WriterSlot,
    ) -> (Arc<ClientHandle>, u64) {
        let mut state = self.clients.lock().await;

        if let Some(handle) = state.clients.get(client_id).cloned() {
            // Existing id: the previous connection is displaced, its
            // subscriptions stay with the handle.
            log::info!("broker: Client {client_id} taken over by new connection");
            let generation = handle.take_over(slot).await;
            (handle, generation)
        } else {
            let handle = Arc::new(ClientHandle::new(client_id, username));
            let generation = handle.attach(slot).await;
            state.clients.insert(client_id.to_string(), Arc::clone(&handle));
            state.subscriptions.insert(client_id.to_string(), Vec::new());
            (handle, generation)
        }
    }

    /// Tear down a terminated connection's state.
    ///
    /// Does nothing when `expected_generation` no longer matches: the id
    /// was taken over and the handle now belongs to a newer connection.
    /// The handle itself and its registry entry stay in place until the
    /// broker is dropped.
    async fn cleanup_client(&self, handle: &Arc<ClientHandle>, expected_generation: u64) {
        if handle.generation() != expected_generation {
            log::debug!(
                "broker: Skipping cleanup of {}, connection was taken over",
                handle.client_id()
            );
            return;
        }

        if self.config.sys_events {
            self.emit_sys_disconnected(handle).await;
        }

        handle.detach().await;

        let mut state = self.clients.lock().await;
        let patterns = state
            .subscriptions
            .get_mut(handle.client_id())
            .map(std::mem::take)
            .unwrap_or_default();

        let mut subs = self.subs.lock().unwrap();
        for pattern in &patterns {
            if let Some((group, topic)) = parse_shared_filter(pattern) {
                if let Some(shared_group) = subs
                    .groups
                    .iter()
                    .find(|g| g.group() == group && g.topic() == topic)
                {
                    shared_group.remove(handle);
                }
            } else {
                subs.patterns.remove_value(pattern, |h| Arc::ptr_eq(h, handle));
            }
        }
        log::debug!(
            "broker: Cleaned up {} subscriptions of {}",
            patterns.len(),
            handle.client_id()
        );
    }

    /// Register `handle` as a subscriber of `filter`.
    ///
    /// Returns false when the filter is rejected: too long, denied by
    /// ACL, over the per-client limit, or structurally invalid.
    async fn handle_subscribe(&self, handle: &Arc<ClientHandle>, filter: &str) -> bool {
        let shared = parse_shared_filter(filter);
        let effective_topic = shared.map_or(filter, |(_group, topic)| topic);

        if filter.len() > self.config.max_topic_length {
            log::warn!(
                "broker: Subscribe filter from {} exceeds topic length limit",
                handle.client_id()
            );
            return false;
        }

        if !self.authenticator.acl(handle.client_id(), effective_topic, false) {
            log::warn!(
                "broker: ACL denied subscribe from {} to {effective_topic}",
                handle.client_id()
            );
            return false;
        }

        let mut state = self.clients.lock().await;
        let Some(tracked) = state.subscriptions.get_mut(handle.client_id()) else {
            return false;
        };

        // A duplicate filter replaces the existing subscription; it must
        // not count against the limit nor add a tracking entry.
        let resubscribe = tracked.iter().any(|pattern| pattern == filter);
        if !resubscribe {
            if tracked.len() >= self.config.max_subscriptions_per_client {
                log::warn!(
                    "broker: Client {} exceeds subscription limit",
                    handle.client_id()
                );
                return false;
            }
            tracked.push(filter.to_string());
        }

        let inserted = {
            let mut subs = self.subs.lock().unwrap();
            match shared {
                Some((group, topic)) => {
                    let existing = subs
                        .groups
                        .iter()
                        .find(|g| g.group() == group && g.topic() == topic)
                        .cloned();
                    if let Some(shared_group) = existing {
                        shared_group.add(Arc::clone(handle));
                        true
                    } else {
                        let shared_group = Arc::new(SharedGroup::new(group, topic));
                        match subs.shared.insert(topic, Arc::clone(&shared_group)) {
                            Ok(()) => {
                                shared_group.add(Arc::clone(handle));
                                subs.groups.push(shared_group);
                                true
                            }
                            Err(err) => {
                                log::warn!("broker: Invalid shared filter {filter}: {err}");
                                false
                            }
                        }
                    }
                }
                None => {
                    // SUBSCRIBE replaces an existing subscription with the
                    // same filter [MQTT-3.8.4-3].
                    subs.patterns.remove_value(filter, |h| Arc::ptr_eq(h, handle));
                    match subs.patterns.insert(filter, Arc::clone(handle)) {
                        Ok(()) => true,
                        Err(err) => {
                            log::warn!("broker: Invalid filter {filter}: {err}");
                            false
                        }
                    }
                }
            }
        };

        if !inserted && !resubscribe {
            if let Some(tracked) = state.subscriptions.get_mut(handle.client_id()) {
                tracked.retain(|pattern| pattern != filter);
            }
        }

        if inserted {
            log::debug!("broker: Client {} subscribed to {filter}", handle.client_id());
        }
        inserted
    }

    /// Drop `handle`'s subscription of `filter`.
    async fn handle_unsubscribe(&self, handle: &Arc<ClientHandle>, filter: &str) {
        let mut state = self.clients.lock().await;

        {
            let mut subs = self.subs.lock().unwrap();
            match parse_shared_filter(filter) {
                Some((group, topic)) => {
                    if let Some(shared_group) = subs
                        .groups
                        .iter()
                        .find(|g| g.group() == group && g.topic() == topic)
                    {
                        shared_group.remove(handle);
                    }
                }
                None => {
                    subs.patterns.remove_value(filter, |h| Arc::ptr_eq(h, handle));
                }
            }
        }

        if let Some(tracked) = state.subscriptions.get_mut(handle.client_id()) {
            if let Some(position) = tracked.iter().position(|pattern| pattern == filter) {
                tracked.remove(position);
            }
        }
        log::debug!(
            "broker: Client {} unsubscribed from {filter}",
            handle.client_id()
        );
    }

    /// Process a PUBLISH received from `sender`.
    ///
    /// Rejected publishes are dropped without feedback, consistent with
    /// QoS 0: empty topics, over-long topics, `$`-prefixed topics and
    /// ACL denials all fall out here.
    async fn handle_publish(
        &self,
        sender: &Arc<ClientHandle>,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) {
        if topic.is_empty() {
            return;
        }
        if topic.len() > self.config.max_topic_length {
            log::warn!(
                "broker: Publish topic from {} exceeds topic length limit",
                sender.client_id()
            );
            return;
        }
        // Clients may not publish into the server-reserved namespace.
        if topic.starts_with('$') {
            log::debug!(
                "broker: Dropping $-topic publish from {}: {topic}",
                sender.client_id()
            );
            return;
        }
        if !self.authenticator.acl(sender.client_id(), topic, true) {
            log::warn!(
                "broker: ACL denied publish from {} to {topic}",
                sender.client_id()
            );
            return;
        }

        log::trace!("broker: Client {} published to {topic}", sender.client_id());

        let msg = Message {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
            retain,
        };

        if let Some(handler) = &self.handler {
            if let Err(err) = handler.handle(sender.client_id(), &msg) {
                log::error!("broker: Handler failed for {topic}: {err}");
            }
        }

        self.route_message(&msg, Some(sender)).await;
    }

    /// Fan `msg` out to every matching subscriber.
    ///
    /// Normal subscribers each get a copy; every matching shared group
    /// contributes exactly one member, chosen round-robin. The sender
    /// never receives its own publication.
    ///
    /// The subscription lock is released before any send so a slow
    /// subscriber only stalls this publisher.
    async fn route_message(&self, msg: &Message, sender: Option<&Arc<ClientHandle>>) {
        let targets = {
            let subs = self.subs.lock().unwrap();
            let mut handles = Vec::new();
            subs.patterns.match_all(&msg.topic, &mut handles);

            let mut groups = Vec::new();
            subs.shared.match_all(&msg.topic, &mut groups);
            for group in groups {
                if let Some(member) = group.next_subscriber() {
                    handles.push(member);
                }
            }
            handles
        };

        for handle in targets {
            if let Some(sender) = sender {
                if Arc::ptr_eq(&handle, sender) {
                    continue;
                }
            }
            if !handle.send_publish(msg).await {
                log::debug!("broker: Dropped message to {}", handle.client_id());
            }
        }
    }
}
