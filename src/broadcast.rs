//! KB-update broadcaster.
//!
//! Transports subscribe per session and receive an event after every
//! successful assertion. Delivery is best-effort: a subscriber whose
//! channel has closed is dropped on the spot and never fails the
//! assertion path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Event published after a successful assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KbUpdate {
    pub session_id: String,
    pub new_clauses: Vec<String>,
    pub full_knowledge_base: String,
}

/// A subscription handle. Cloneable; identity is the id, so re-subscribing
/// the same handle is idempotent.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: Uuid,
    sender: mpsc::UnboundedSender<KbUpdate>,
}

impl Subscriber {
    /// Create a subscriber and the receiving end a transport drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<KbUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Per-session subscriber registry.
///
/// The map is internally synchronized; sends iterate a snapshot so
/// concurrent subscribe/unsubscribe calls never deadlock a broadcast.
#[derive(Debug, Default)]
pub struct KbUpdateBroadcaster {
    subscribers: Mutex<HashMap<String, HashMap<Uuid, mpsc::UnboundedSender<KbUpdate>>>>,
}

impl KbUpdateBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: &str, subscriber: &Subscriber) {
        let mut map = self.subscribers.lock().expect("broadcaster lock");
        map.entry(session_id.to_string())
            .or_default()
            .insert(subscriber.id, subscriber.sender.clone());
    }

    pub fn unsubscribe(&self, session_id: &str, subscriber: &Subscriber) {
        let mut map = self.subscribers.lock().expect("broadcaster lock");
        if let Some(session_subs) = map.get_mut(session_id) {
            session_subs.remove(&subscriber.id);
            if session_subs.is_empty() {
                map.remove(session_id);
            }
        }
    }

    /// Remove the subscriber from every session (transport disconnect).
    pub fn unsubscribe_all(&self, subscriber: &Subscriber) {
        let mut map = self.subscribers.lock().expect("broadcaster lock");
        map.retain(|_, session_subs| {
            session_subs.remove(&subscriber.id);
            !session_subs.is_empty()
        });
    }

    /// Deliver `update` to every subscriber of its session, dropping any
    /// whose receiving end has gone away.
    pub fn broadcast(&self, update: KbUpdate) {
        let targets: Vec<(Uuid, mpsc::UnboundedSender<KbUpdate>)> = {
            let map = self.subscribers.lock().expect("broadcaster lock");
            match map.get(&update.session_id) {
                Some(session_subs) => session_subs
                    .iter()
                    .map(|(id, sender)| (*id, sender.clone()))
                    .collect(),
                None => return,
            }
        };

        let mut dead = Vec::new();
        for (id, sender) in &targets {
            if sender.send(update.clone()).is_err() {
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            debug!(
                session = %update.session_id,
                dropped = dead.len(),
                "dropping dead subscribers"
            );
            let mut map = self.subscribers.lock().expect("broadcaster lock");
            if let Some(session_subs) = map.get_mut(&update.session_id) {
                for id in dead {
                    session_subs.remove(&id);
                }
                if session_subs.is_empty() {
                    map.remove(&update.session_id);
                }
            }
        }
    }

    /// Number of live subscriptions for a session.
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers
            .lock()
            .expect("broadcaster lock")
            .get(session_id)
            .map_or(0, HashMap::len)
    }
}
