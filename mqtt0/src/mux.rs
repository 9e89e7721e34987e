// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! A topic-pattern message multiplexer.

use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::trie::Trie;
use crate::types::{Handler, Message};

#[derive(Clone)]
struct MuxEntry {
    /// Registration order; dispatch invokes handlers in this order when
    /// several patterns match one topic.
    seq: u64,

    handler: Arc<dyn Handler>,
}

struct MuxInner {
    trie: Trie<MuxEntry>,
    next_seq: u64,
}

/// Dispatches every incoming message to all handlers whose pattern
/// matches its topic.
///
/// The internal lock covers both pattern mutation and dispatch, so
/// pattern updates cannot invalidate an in-progress fan-out. Handlers
/// MUST NOT register or dispatch on the same mux re-entrantly; doing so
/// deadlocks.
///
/// `Mux` itself implements [`Handler`], so muxes compose: one mux can be
/// registered as a handler of another.
pub struct Mux {
    inner: Mutex<MuxInner>,
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

impl Mux {
    /// Create an empty mux.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MuxInner {
                trie: Trie::new(),
                next_seq: 0,
            }),
        }
    }

    /// Register `handler` for all topics matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns error if `pattern` is not a valid topic filter.
    pub fn handle(&self, pattern: &str, handler: Arc<dyn Handler>) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.trie.insert(pattern, MuxEntry { seq, handler })
    }

    /// Register a plain function for all topics matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns error if `pattern` is not a valid topic filter.
    pub fn handle_fn<F>(&self, pattern: &str, f: F) -> Result<(), Error>
    where
        F: Fn(&str, &Message) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.handle(pattern, Arc::new(f))
    }

    /// Dispatch `msg` to every matching handler, in registration order.
    ///
    /// All matching handlers run even when one fails; the first error is
    /// returned for deterministic behavior.
    ///
    /// # Errors
    ///
    /// Returns the first handler error.
    pub fn handle_message(&self, client_id: &str, msg: &Message) -> Result<(), Error> {
        let inner = self.inner.lock().unwrap();
        let mut entries = Vec::new();
        inner.trie.match_all(&msg.topic, &mut entries);
        entries.sort_by_key(|entry| entry.seq);

        let mut first_error = None;
        for entry in &entries {
            if let Err(err) = entry.handler.handle(client_id, msg) {
                log::error!("mux: Handler failed for topic {}: {err}", msg.topic);
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Handler for Mux {
    fn handle(&self, client_id: &str, msg: &Message) -> Result<(), Error> {
        self.handle_message(client_id, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_overlapping_patterns() {
        let mux = Mux::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        mux.handle_fn("device/+/state", move |_id, _msg| {
            o.lock().unwrap().push("plus");
            Ok(())
        })
        .unwrap();
        let o = Arc::clone(&order);
        mux.handle_fn("device/#", move |_id, _msg| {
            o.lock().unwrap().push("hash");
            Ok(())
        })
        .unwrap();

        let msg = Message::new("device/001/state", &b"on"[..]);
        mux.handle_message("tester", &msg).unwrap();
        assert_eq!(order.lock().unwrap().as_slice(), &["plus", "hash"]);
    }

    #[test]
    fn test_no_match() {
        let mux = Mux::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        mux.handle_fn("a/b", move |_id, _msg| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let msg = Message::new("x/y", &b""[..]);
        mux.handle_message("tester", &msg).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_first_error_wins() {
        let mux = Mux::new();
        mux.handle_fn("t", |_id, _msg| {
            Err(Error::new(ErrorKind::ProtocolError, "first"))
        })
        .unwrap();
        mux.handle_fn("t", |_id, _msg| Err(Error::new(ErrorKind::IoError, "second")))
            .unwrap();

        let msg = Message::new("t", &b""[..]);
        let err = mux.handle_message("tester", &msg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[test]
    fn test_mux_composes() {
        let inner_mux = Arc::new(Mux::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        inner_mux
            .handle_fn("a/b", move |_id, _msg| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let outer = Mux::new();
        outer.handle("a/#", inner_mux).unwrap();

        let msg = Message::new("a/b", &b""[..]);
        outer.handle_message("tester", &msg).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
