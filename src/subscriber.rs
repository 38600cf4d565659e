use std::{collections::BTreeMap, fmt::Display};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::Outbound;

/// Identifies one websocket subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct SubscriberId(Uuid);

impl SubscriberId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where serialized outbound messages for a subscriber go.
pub(crate) type Outbox = mpsc::UnboundedSender<String>;

fn serialize(message: &Outbound) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(?e, "Could not serialize outbound message");
            None
        }
    }
}

/// Everyone currently listening.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    outboxes: BTreeMap<SubscriberId, Outbox>,
}

impl Subscribers {
    pub(crate) fn insert(&mut self, id: SubscriberId, outbox: Outbox) {
        self.outboxes.insert(id, outbox);
    }

    pub(crate) fn remove(&mut self, id: &SubscriberId) {
        if self.outboxes.remove(id).is_some() {
            debug!(%id, "Subscriber removed");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// Send to a single subscriber. Returns false if it is gone.
    pub(crate) fn send(outbox: &Outbox, message: &Outbound) -> bool {
        match serialize(message) {
            Some(text) => outbox.send(text).is_ok(),
            None => true,
        }
    }

    /// Send to everyone, dropping subscribers which are gone.
    pub(crate) fn broadcast(&mut self, message: &Outbound) {
        if self.outboxes.is_empty() {
            return;
        }

        let Some(text) = serialize(message) else {
            return;
        };

        self.outboxes.retain(|id, outbox| {
            let alive = outbox.send(text.clone()).is_ok();
            if !alive {
                debug!(%id, "Subscriber gone, removing");
            }
            alive
        });
    }
}
