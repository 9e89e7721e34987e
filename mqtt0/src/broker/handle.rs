// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-client connection handles and shared subscription groups.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use codec::{v3, v5, EncodePacket, ProtocolLevel};

use crate::error::{Error, ErrorKind};
use crate::stream::READ_BUFFER_SIZE;
use crate::transport::TransportWriter;
use crate::types::Message;

/// The write half of a connection plus the protocol version it speaks.
pub(crate) struct WriterSlot {
    pub writer: TransportWriter,
    pub level: ProtocolLevel,
}

/// Broker-side state of one client identity.
///
/// A handle is created on the first CONNECT with a given client id and
/// lives until broker teardown; it outlives the transport currently
/// backing it. The write mutex guards the transport slot, so outbound
/// packets from the read loop and from publish fan-out never interleave.
///
/// Pointer identity (`Arc::ptr_eq`) identifies a handle inside the
/// subscription trie and in shared groups.
pub(crate) struct ClientHandle {
    client_id: String,

    username: String,

    /// The current transport's write half; `None` while disconnected.
    writer: Mutex<Option<WriterSlot>>,

    active: AtomicBool,

    /// Incremented on every takeover so the cleanup of a replaced
    /// connection can detect that it no longer owns this handle.
    generation: AtomicU64,
}

impl ClientHandle {
    pub fn new(client_id: &str, username: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            username: username.to_string(),
            writer: Mutex::new(None),
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Attach the first transport to a fresh handle. Returns the current
    /// generation.
    pub async fn attach(&self, slot: WriterSlot) -> u64 {
        let mut guard = self.writer.lock().await;
        *guard = Some(slot);
        self.active.store(true, Ordering::SeqCst);
        self.generation()
    }

    /// Replace the transport of a handle whose client id reconnected.
    ///
    /// The old writer is shut down so the replaced peer observes EOF; its
    /// read loop then exits and its cleanup sees a generation mismatch.
    /// Returns the new generation.
    pub async fn take_over(&self, slot: WriterSlot) -> u64 {
        let mut guard = self.writer.lock().await;
        self.active.store(false, Ordering::SeqCst);
        if let Some(old) = guard.as_mut() {
            let _ = old.writer.shutdown().await;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        *guard = Some(slot);
        self.active.store(true, Ordering::SeqCst);
        generation
    }

    /// Drop the transport and deactivate the handle.
    pub async fn detach(&self) {
        let mut guard = self.writer.lock().await;
        self.active.store(false, Ordering::SeqCst);
        *guard = None;
    }

    /// Write a pre-serialized packet to the current transport.
    ///
    /// A send failure deactivates the handle; its read loop will then
    /// exit on its next iteration.
    pub async fn send_bytes(&self, data: &[u8]) -> Result<(), Error> {
        let mut guard = self.writer.lock().await;
        if !self.is_active() {
            return Err(Error::new(ErrorKind::ConnectionClosed, "Client is inactive"));
        }
        let Some(slot) = guard.as_mut() else {
            return Err(Error::new(ErrorKind::ConnectionClosed, "No transport attached"));
        };

        let result = async {
            slot.writer.write_all(data).await?;
            slot.writer.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(err) = result {
            log::warn!("broker: Send to {} failed: {err}", self.client_id);
            self.active.store(false, Ordering::SeqCst);
            *guard = None;
            return Err(err.into());
        }
        Ok(())
    }

    /// Serialize `packet` and send it to the current transport.
    pub async fn send_packet<P: EncodePacket>(&self, packet: &P) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(READ_BUFFER_SIZE);
        packet.encode(&mut buf)?;
        self.send_bytes(&buf).await
    }

    /// Forward an application message as a QoS-0 PUBLISH in this
    /// connection's protocol version. Returns true on success.
    pub async fn send_publish(&self, msg: &Message) -> bool {
        let mut guard = self.writer.lock().await;
        if !self.is_active() {
            return false;
        }
        let Some(slot) = guard.as_mut() else {
            return false;
        };

        let mut buf = Vec::with_capacity(READ_BUFFER_SIZE);
        let encoded = match slot.level {
            ProtocolLevel::V311 => v3::PublishPacket::new(&msg.topic, &msg.payload)
                .and_then(|mut packet| {
                    packet.set_retain(msg.retain);
                    packet.encode(&mut buf)
                }),
            ProtocolLevel::V5 => v5::PublishPacket::new(&msg.topic, &msg.payload)
                .and_then(|mut packet| {
                    packet.set_retain(msg.retain);
                    packet.encode(&mut buf)
                }),
        };
        if let Err(err) = encoded {
            log::error!("broker: Failed to encode publish to {}: {err:?}", self.client_id);
            return false;
        }

        let result = async {
            slot.writer.write_all(&buf).await?;
            slot.writer.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(err) = result {
            log::warn!("broker: Send to {} failed: {err}", self.client_id);
            self.active.store(false, Ordering::SeqCst);
            *guard = None;
            return false;
        }
        true
    }
}

/// A round-robin group of subscribers created by `$share/<group>/<topic>`
/// filters.
///
/// Keyed by the `(group, topic)` pair; each matching message is delivered
/// to exactly one member. Groups whose last member left stay registered
/// until broker teardown.
pub(crate) struct SharedGroup {
    group: String,

    topic: String,

    subscribers: StdMutex<Vec<Arc<ClientHandle>>>,

    /// Monotonic counter for next-member selection.
    next: AtomicUsize,
}

impl SharedGroup {
    pub fn new(group: &str, topic: &str) -> Self {
        Self {
            group: group.to_string(),
            topic: topic.to_string(),
            subscribers: StdMutex::new(Vec::new()),
            next: AtomicUsize::new(0),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Add `handle` to the group; re-adding the same handle is a no-op.
    pub fn add(&self, handle: Arc<ClientHandle>) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if !subscribers.iter().any(|member| Arc::ptr_eq(member, &handle)) {
            subscribers.push(handle);
        }
    }

    /// Remove `handle` from the group by pointer identity.
    pub fn remove(&self, handle: &Arc<ClientHandle>) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|member| !Arc::ptr_eq(member, handle));
    }

    /// Pick the next subscriber round-robin; `None` when the group is
    /// empty.
    pub fn next_subscriber(&self) -> Option<Arc<ClientHandle>> {
        let subscribers = self.subscribers.lock().unwrap();
        if subscribers.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::SeqCst) % subscribers.len();
        Some(Arc::clone(&subscribers[index]))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_group_round_robin() {
        let group = SharedGroup::new("workers", "jobs/+");
        assert!(group.next_subscriber().is_none());

        let a = Arc::new(ClientHandle::new("a", ""));
        let b = Arc::new(ClientHandle::new("b", ""));
        group.add(Arc::clone(&a));
        group.add(Arc::clone(&a));
        group.add(Arc::clone(&b));

        let first = group.next_subscriber().unwrap();
        let second = group.next_subscriber().unwrap();
        let third = group.next_subscriber().unwrap();
        assert!(Arc::ptr_eq(&first, &a));
        assert!(Arc::ptr_eq(&second, &b));
        assert!(Arc::ptr_eq(&third, &a));

        group.remove(&a);
        let next = group.next_subscriber().unwrap();
        assert!(Arc::ptr_eq(&next, &b));

        group.remove(&b);
        assert!(group.is_empty());
        assert!(group.next_subscriber().is_none());
    }
}
