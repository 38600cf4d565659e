//! Decides which engine slot(s) an identified controller feeds.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::ControllerIdentity;

/// A logical output channel, e.g. "A" or "B".
///
/// Slot names are upper-cased on creation so "a" and "A" are the same slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SlotId(String);

impl SlotId {
    /// Create a slot id.
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        Self(name.as_ref().trim().to_uppercase())
    }

    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SlotId {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&str> for SlotId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<SlotId> for String {
    fn from(slot: SlotId) -> Self {
        slot.0
    }
}

impl Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How controllers map onto engine slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoutingMode {
    /// A single controller drives every slot.
    /// Its channel "A" feeds slot "A", its channel "B" feeds slot "B" and so on.
    #[default]
    Channels,

    /// Each controller is pinned to exactly one slot.
    Controllers,
}

/// What a controller was granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// The controller owns all these slots, and its channels select between them.
    Channels(Vec<SlotId>),

    /// The controller owns this single slot.
    Slot(SlotId),
}

impl Assignment {
    /// The slots held by this assignment.
    pub fn slots(&self) -> Vec<SlotId> {
        match self {
            Assignment::Channels(slots) => slots.clone(),
            Assignment::Slot(slot) => vec![slot.clone()],
        }
    }
}

impl Display for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Assignment::Channels(slots) => {
                write!(f, "channels ")?;
                for (index, slot) in slots.iter().enumerate() {
                    if index > 0 {
                        write!(f, "+")?;
                    }
                    write!(f, "{slot}")?;
                }
                Ok(())
            }
            Assignment::Slot(slot) => write!(f, "slot {slot}"),
        }
    }
}

/// Reasons a controller is left unattached.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The same device id already holds a slot, likely via another (ghost) port.
    #[error("device `{device_id}` is already attached on `{port}`")]
    AlreadyAttached {
        /// The duplicated device id.
        device_id: String,

        /// Where it is attached.
        port: String,
    },

    /// The slot table points at a slot which is not active.
    #[error("slot `{0}` from the slot table is not an active slot")]
    InvalidSlot(SlotId),

    /// The slot table points at a slot someone else holds.
    #[error("slot `{slot}` is held by `{holder}`")]
    SlotTaken {
        /// The wanted slot.
        slot: SlotId,

        /// The device id currently holding it.
        holder: String,
    },

    /// Only one controller may be attached in [`RoutingMode::Channels`].
    #[error("a controller is already attached")]
    Busy,

    /// Every slot is held.
    #[error("no free slot")]
    NoFreeSlot,
}

/// Owns slot occupancy.
#[derive(Debug)]
pub struct Router {
    mode: RoutingMode,
    slots: Vec<SlotId>,
    slot_table: BTreeMap<String, SlotId>,
    occupants: BTreeMap<SlotId, ControllerIdentity>,
}

impl Router {
    /// Create a router over the given active slots, in priority order.
    pub fn new(
        mode: RoutingMode,
        slots: Vec<SlotId>,
        slot_table: BTreeMap<String, SlotId>,
    ) -> Self {
        Self {
            mode,
            slots,
            slot_table,
            occupants: BTreeMap::new(),
        }
    }

    /// The routing mode.
    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// The active slots, in priority order.
    pub fn slots(&self) -> &[SlotId] {
        &self.slots
    }

    /// Who holds the given slot, if anyone.
    pub fn occupant(&self, slot: &SlotId) -> Option<&ControllerIdentity> {
        self.occupants.get(slot)
    }

    /// Slots nobody holds, in priority order.
    pub fn free_slots(&self) -> Vec<SlotId> {
        self.slots
            .iter()
            .filter(|slot| !self.occupants.contains_key(*slot))
            .cloned()
            .collect()
    }

    fn attached_port_of(&self, device_id: &str) -> Option<&str> {
        self.occupants
            .values()
            .find(|occupant| occupant.device_id == device_id)
            .map(|occupant| occupant.port.as_str())
    }

    /// Try to grant the controller a place.
    /// On success the controller occupies the granted slot(s) until [`Router::release`].
    pub fn assign(&mut self, identity: &ControllerIdentity) -> Result<Assignment, Rejection> {
        if let Some(port) = self.attached_port_of(&identity.device_id) {
            return Err(Rejection::AlreadyAttached {
                device_id: identity.device_id.clone(),
                port: port.to_owned(),
            });
        }

        let assignment = match self.mode {
            RoutingMode::Channels => {
                if !self.occupants.is_empty() {
                    return Err(Rejection::Busy);
                }
                Assignment::Channels(self.slots.clone())
            }
            RoutingMode::Controllers => Assignment::Slot(self.pick_slot(identity)?),
        };

        for slot in assignment.slots() {
            self.occupants.insert(slot, identity.clone());
        }

        info!(port = %identity.port, device_id = %identity.device_id, "Granted {assignment}");

        Ok(assignment)
    }

    fn pick_slot(&self, identity: &ControllerIdentity) -> Result<SlotId, Rejection> {
        if let Some(wanted) = self.slot_table.get(&identity.device_id) {
            if !self.slots.contains(wanted) {
                return Err(Rejection::InvalidSlot(wanted.clone()));
            }

            return match self.occupants.get(wanted) {
                Some(holder) => Err(Rejection::SlotTaken {
                    slot: wanted.clone(),
                    holder: holder.device_id.clone(),
                }),
                None => Ok(wanted.clone()),
            };
        }

        self.free_slots()
            .into_iter()
            .next()
            .ok_or(Rejection::NoFreeSlot)
    }

    /// Free every slot held via the given port.
    /// Returns the slots which were freed.
    pub fn release(&mut self, port: &str) -> Vec<SlotId> {
        let released = self
            .occupants
            .iter()
            .filter(|(_, occupant)| occupant.port == port)
            .map(|(slot, _)| slot.clone())
            .collect::<BTreeSet<_>>();

        for slot in &released {
            self.occupants.remove(slot);
        }

        debug!(%port, ?released, "Released");

        released.into_iter().collect()
    }
}
