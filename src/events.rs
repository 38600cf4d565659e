use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    machine::MachineStatus,
    protocol::{ControllerIdentity, SetValue},
    router::SlotId,
};

/// Everything the server sends to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    /// The server's version, sent once to each new subscriber.
    ServerVersion {
        /// Version string.
        version: String,
    },

    /// A description of the host.
    MachineStatus(MachineStatus),

    /// Controller presence and channel liveness.
    ControllerStatus(ControllerStatus),

    /// A control changed on a controller.
    Set(SetEvent),
}

/// A normalized control change, attributed to an engine slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetEvent {
    /// The channel the controller reported, or the slot for single channel devices.
    pub channel: String,

    /// The control which changed.
    pub key: String,

    /// The coerced value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<SetValue>,

    /// The engine slot this event is routed to.
    pub engine: SlotId,

    /// Other fields the controller sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Liveness of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    /// Whether liveness messages arrived recently enough.
    pub online: bool,

    /// Milliseconds since the last liveness message, if any arrived.
    pub age_ms: Option<u64>,
}

impl ChannelStatus {
    /// A channel nothing was heard from.
    pub fn unknown() -> Self {
        Self {
            online: false,
            age_ms: None,
        }
    }
}

/// Liveness of a set of channels.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderStatus {
    /// The offline timeout used, in seconds.
    pub timeout_sec: f64,

    /// Per channel liveness.
    pub channels: BTreeMap<SlotId, ChannelStatus>,
}

/// Controller presence as seen by subscribers.
///
/// In channel routing there is one status for the whole controller,
/// in controller routing there is one per slot and `engine` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    /// The slot this status is about, in controller routing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<SlotId>,

    /// Whether a controller is streaming.
    pub connected: bool,

    /// The active engine slots.
    pub engines: Vec<SlotId>,

    /// Channel liveness.
    pub encoders: EncoderStatus,

    /// Port of the connected controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    /// Id of the connected controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Firmware of the connected controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fw: Option<String>,

    /// Encoder fixture wired to each channel of the connected controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoder_names: Option<BTreeMap<SlotId, String>>,
}

impl ControllerStatus {
    /// Fill in identity fields from a connected controller.
    pub fn with_controller(mut self, identity: &ControllerIdentity) -> Self {
        self.connected = true;
        self.port = Some(identity.port.clone());
        self.device_id = Some(identity.device_id.clone());
        self.fw = Some(identity.fw.clone());
        self
    }

    /// Whether the given channel is online according to this status.
    pub fn is_online(&self, channel: &SlotId) -> bool {
        self.encoders
            .channels
            .get(channel)
            .map(|status| status.online)
            .unwrap_or_default()
    }
}
