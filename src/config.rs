use std::{
    collections::{BTreeMap, BTreeSet},
    net::{IpAddr, Ipv4Addr},
    path::Path,
    time::Duration,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    router::{RoutingMode, SlotId},
};

/// Durations are written as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(duration.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Where subscribers connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsocketConfig {
    /// Address to listen on.
    pub host: IpAddr,

    /// Port to listen on.
    pub port: u16,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8765,
        }
    }
}

/// How much of the raw serial traffic to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialLogMode {
    /// Periodic one line summaries.
    #[default]
    Digest,

    /// Every line, at debug level.
    Full,
}

/// Serial port discovery and reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate for probing and streaming.
    pub baud: u32,

    /// Flow control used when opening ports.
    pub flow_control: serialport::FlowControl,

    /// How often to look for new controllers.
    #[serde(rename = "scan_interval_ms", with = "millis")]
    pub scan_interval: Duration,

    /// How long a device gets to answer an identify request.
    #[serde(rename = "probe_timeout_ms", with = "millis")]
    pub probe_timeout: Duration,

    /// Ports never probed.
    pub exclude: BTreeSet<String>,

    /// Serial traffic logging.
    pub log: SerialLogMode,

    /// Window of a digest log line.
    #[serde(rename = "digest_window_ms", with = "millis")]
    pub digest_window: Duration,

    /// At most this many keys are shown per digest line.
    pub digest_max_keys: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: 115_200,
            flow_control: serialport::FlowControl::None,
            scan_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(1),
            exclude: BTreeSet::from([
                "/dev/cu.debug-console".to_owned(),
                "/dev/cu.Bluetooth-Incoming-Port".to_owned(),
            ]),
            log: SerialLogMode::default(),
            digest_window: Duration::from_secs(5),
            digest_max_keys: 10,
        }
    }
}

/// Which devices count as controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// The `deviceType` a controller reports in its `hello`.
    pub device_type: String,

    /// If set, only device ids in `allowlist` are accepted.
    pub strict_allowlist: bool,

    /// Accepted device ids when `strict_allowlist` is set.
    pub allowlist: BTreeSet<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device_type: "bauklank-controller".into(),
            strict_allowlist: false,
            allowlist: BTreeSet::new(),
        }
    }
}

/// Engine slots and how controllers are routed onto them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginesConfig {
    /// See [`RoutingMode`].
    pub routing: RoutingMode,

    /// The active slots, in priority order.
    pub slots: Vec<SlotId>,

    /// Pins a controller (by device id) to a slot.
    /// Only used in [`RoutingMode::Controllers`].
    pub slot_table: BTreeMap<String, SlotId>,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            routing: RoutingMode::default(),
            slots: vec![SlotId::new("A"), SlotId::new("B")],
            slot_table: BTreeMap::new(),
        }
    }
}

/// Channel liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Messages with this key count as a sign of life.
    pub key: String,

    /// A channel without a sign of life for this long is offline.
    #[serde(rename = "offline_timeout_ms", with = "millis")]
    pub offline_timeout: Duration,

    /// How often liveness is recomputed.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,

    /// Status is broadcast at least this often, even if nothing flipped.
    #[serde(rename = "refresh_interval_ms", with = "millis")]
    pub refresh_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            key: "rate".into(),
            offline_timeout: Duration::from_secs(6),
            poll_interval: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(5),
        }
    }
}

/// Periodic housekeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// How often controller presence is logged.
    #[serde(rename = "heartbeat_interval_ms", with = "millis")]
    pub heartbeat_interval: Duration,

    /// How often the machine status is rebuilt.
    #[serde(rename = "machine_status_interval_ms", with = "millis")]
    pub machine_status_interval: Duration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            machine_status_interval: Duration::from_secs(5),
        }
    }
}

/// The configuration used for running the server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// See [`WebsocketConfig`].
    pub websocket: WebsocketConfig,

    /// See [`SerialConfig`].
    pub serial: SerialConfig,

    /// See [`ControllerConfig`].
    pub controller: ControllerConfig,

    /// See [`EnginesConfig`].
    pub engines: EnginesConfig,

    /// See [`LivenessConfig`].
    pub liveness: LivenessConfig,

    /// See [`StatusConfig`].
    pub status: StatusConfig,

    /// Which encoder fixture is wired to which channel, per controller device id.
    pub topology: BTreeMap<String, BTreeMap<SlotId, String>>,
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Ok(Self::ron().from_str::<Config>(input)?)
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            engines: EnginesConfig {
                routing: RoutingMode::Controllers,
                slots: vec![SlotId::new("A"), SlotId::new("B")],
                slot_table: BTreeMap::from([
                    ("ctl-left".to_owned(), SlotId::new("A")),
                    ("ctl-right".to_owned(), SlotId::new("B")),
                ]),
            },
            topology: BTreeMap::from([(
                "ctl-left".to_owned(),
                BTreeMap::from([
                    (SlotId::new("A"), "encoder-1".to_owned()),
                    (SlotId::new("B"), "encoder-2".to_owned()),
                ]),
            )]),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::InternalIssue(format!("Could not serialize configuration: {e}")))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p)?;

        Self::deserialize(&s)
    }

    /// Only use these slots.
    pub fn with_slots(mut self, slots: Vec<SlotId>) -> Self {
        self.engines.slots = slots;
        self
    }

    fn check_slots(&self) -> Result<(), Error> {
        let slots = &self.engines.slots;

        if slots.is_empty() {
            return Err(Error::BadConfig(
                "At least one engine slot must be active".into(),
            ));
        }

        if slots.iter().any(|slot| slot.as_str().is_empty()) {
            return Err(Error::BadConfig("Engine slot names must be non-empty".into()));
        }

        let duplicates = slots.iter().duplicates().collect::<Vec<_>>();
        if !duplicates.is_empty() {
            return Err(Error::BadConfig(format!(
                "Engine slots must be unique. Duplicates: {duplicates:?}"
            )));
        }

        Ok(())
    }

    fn check_topology(&self) -> Result<(), Error> {
        for (device_id, channels) in &self.topology {
            if let Some(channel) = channels
                .keys()
                .find(|channel| !self.engines.slots.contains(channel))
            {
                return Err(Error::BadConfig(format!(
                    "Topology of `{device_id}` names channel `{channel}`, which is not an active slot"
                )));
            }
        }

        let duplicates = self
            .topology
            .values()
            .flat_map(|channels| channels.values())
            .duplicates()
            .collect::<Vec<_>>();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(format!(
                "An encoder can only be wired to one channel. Duplicates: {duplicates:?}"
            )))
        }
    }

    fn check_intervals(&self) -> Result<(), Error> {
        let intervals = [
            ("serial.scan_interval_ms", self.serial.scan_interval),
            ("serial.digest_window_ms", self.serial.digest_window),
            ("liveness.poll_interval_ms", self.liveness.poll_interval),
            ("status.heartbeat_interval_ms", self.status.heartbeat_interval),
            (
                "status.machine_status_interval_ms",
                self.status.machine_status_interval,
            ),
        ];

        match intervals.iter().find(|(_, interval)| interval.is_zero()) {
            Some((name, _)) => Err(Error::BadConfig(format!("`{name}` must be above zero"))),
            None => Ok(()),
        }
    }

    /// Check the invariants which serde can't.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_slots()?;
        self.check_topology()?;
        self.check_intervals()?;

        Ok(())
    }
}
