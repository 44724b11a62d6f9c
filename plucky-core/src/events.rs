//! # State-Change Event Bus
//!
//! Publishes `(key, old, new)` changes of user-facing state to any number of
//! subscribers over crossbeam channels. Subscribers whose receiver has been
//! dropped are pruned on the next publish.

use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;

/// Why a value changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    User,
    /// Applied while restoring stored preferences.
    Hydration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub key: String,
    pub old: Value,
    pub new: Value,
    pub origin: ChangeOrigin,
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<StateChange>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<StateChange> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, change: StateChange) {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
