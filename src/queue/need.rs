// src/queue/need.rs
//! Pub/sub of queue signals
//!
//! Producers announce what they enqueued; agents announce lanes they found
//! empty. Each in-process subscriber gets its own unbounded channel;
//! subscribers whose receiver was dropped are pruned on the next publish.
//!
//! Workers and generators run in separate processes, so a bus built with
//! [`NeedBus::shared`] also leaves every `Wanted` signal under
//! `need:<lane>` in the state store, where [`NeedBus::take_wanted`] picks it
//! up from any process.

use crate::state::store::{need_key, StateStore};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// A signal about one lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeedSignal {
    /// An item was appended to the lane
    Enqueued(String),

    /// An agent found the lane empty and wants more work
    Wanted(String),
}

impl NeedSignal {
    pub fn lane(&self) -> &str {
        match self {
            NeedSignal::Enqueued(lane) | NeedSignal::Wanted(lane) => lane,
        }
    }
}

/// Fan-out bus for [`NeedSignal`]s
#[derive(Clone, Default)]
pub struct NeedBus {
    subscribers: Arc<Mutex<Vec<Sender<NeedSignal>>>>,

    /// Cross-process mailbox for `Wanted` signals, with their TTL
    store: Option<(Arc<dyn StateStore>, Duration)>,
}

impl NeedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus that also records needs in `store`; a need lapses after `ttl`
    pub fn shared(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self {
            subscribers: Arc::default(),
            store: Some((store, ttl)),
        }
    }

    /// True when needs reach other processes
    pub fn is_shared(&self) -> bool {
        self.store.is_some()
    }

    pub fn subscribe(&self) -> Receiver<NeedSignal> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber; returns how many received it
    ///
    /// `Wanted` signals are also written to the store of a shared bus.
    pub fn publish(&self, signal: NeedSignal) -> usize {
        if let (NeedSignal::Wanted(lane), Some((store, ttl))) = (&signal, &self.store) {
            if let Err(e) = store.set(&need_key(lane), "wanted", Some(*ttl)) {
                warn!("Failed to record need for {}: {}", lane, e);
            }
        }

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(signal.clone()).is_ok());
        trace!("Published {:?} to {} subscribers", signal, subscribers.len());
        subscribers.len()
    }

    /// Consume a need recorded in the store; false for an in-process bus
    pub fn take_wanted(&self, lane: &str) -> bool {
        let (store, _) = match &self.store {
            Some(shared) => shared,
            None => return false,
        };

        let key = need_key(lane);
        match store.get(&key) {
            Ok(Some(_)) => {
                if let Err(e) = store.delete(&key) {
                    warn!("Failed to clear need for {}: {}", lane, e);
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Cannot read need for {}: {}", lane, e);
                false
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
