//! The newline delimited JSON spoken over the serial link.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Messages the host sends to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum HostMessage {
    /// Ask the device to identify itself.
    #[serde(rename = "whoareyou")]
    WhoAreYou,
}

impl HostMessage {
    /// The message as a single line, without the line delimiter.
    pub fn to_line(&self) -> String {
        match self {
            HostMessage::WhoAreYou => r#"{"type":"whoareyou"}"#.to_owned(),
        }
    }
}

/// The result of a successful identify handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerIdentity {
    /// The serial port the controller answered on.
    pub port: String,

    /// The kind of device, e.g. "bauklank-controller".
    pub device_type: String,

    /// The unique id of this device.
    pub device_id: String,

    /// Firmware version.
    pub fw: String,
}

impl Display for ControllerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} (fw {})", self.device_id, self.port, self.fw)
    }
}

/// The fields of a `hello` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Reported device type.
    pub device_type: String,

    /// Reported device id.
    pub device_id: String,

    /// Reported firmware.
    pub fw: String,
}

impl Hello {
    /// Read a `hello` from a JSON object.
    /// Returns `None` if the object is of some other type.
    /// Missing fields are read as empty strings.
    pub fn from_object(object: &Map<String, Value>) -> Option<Self> {
        if object.get("type").and_then(Value::as_str) != Some("hello") {
            return None;
        }

        Some(Self {
            device_type: string_field(object, "deviceType"),
            device_id: string_field(object, "deviceId"),
            fw: string_field(object, "fw"),
        })
    }

    /// Bind the hello to the port it arrived on.
    pub fn into_identity(self, port: &str) -> ControllerIdentity {
        ControllerIdentity {
            port: port.to_owned(),
            device_type: self.device_type,
            device_id: self.device_id,
            fw: self.fw,
        }
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> String {
    match object.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Try to read a line as a JSON object.
///
/// Controllers print free text debug lines, so anything not starting with `{`
/// or not parsing as an object yields `None`.
pub fn json_object(line: &str) -> Option<Map<String, Value>> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }

    serde_json::from_str::<Map<String, Value>>(line).ok()
}

/// How a key's value should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Discrete controls, e.g. volume steps.
    Integer,

    /// Continuous controls, e.g. playback rate.
    Float,

    /// Passed along as-is.
    Opaque,
}

impl ValueKind {
    /// The kind of values carried by the given key.
    pub fn of_key(key: &str) -> Self {
        match key {
            "volume" | "tone" => Self::Integer,
            "rate" => Self::Float,
            _ => Self::Opaque,
        }
    }
}

/// A `set` value after coercion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SetValue {
    /// An integer value.
    Integer(i64),

    /// A floating point value.
    Float(f64),

    /// The value as it came from the wire,
    /// either because the key is not known or coercion did not work.
    Raw(Value),
}

impl SetValue {
    /// Coerce the raw value according to the key.
    /// Never fails: if coercion is not possible the raw value is kept.
    pub fn coerce(key: &str, raw: Value) -> Self {
        let coerced = match ValueKind::of_key(key) {
            ValueKind::Integer => as_integer(&raw).map(Self::Integer),
            ValueKind::Float => as_float(&raw).map(Self::Float),
            ValueKind::Opaque => None,
        };

        coerced.unwrap_or(Self::Raw(raw))
    }
}

impl Display for SetValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetValue::Integer(v) => write!(f, "{v}"),
            SetValue::Float(v) => write!(f, "{v}"),
            SetValue::Raw(v) => write!(f, "{v}"),
        }
    }
}

fn as_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn as_float(raw: &Value) -> Option<f64> {
    let f = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;

    // Not representable in JSON.
    f.is_finite().then_some(f)
}

/// A `set` message as read from the wire, before routing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSet {
    /// The channel, upper-cased, if the device sent one.
    pub channel: Option<String>,

    /// The control which changed.
    pub key: String,

    /// The new value, coerced by key.
    pub value: Option<SetValue>,

    /// Any other fields the device sent, forwarded untouched.
    pub extra: Map<String, Value>,
}

impl RawSet {
    /// Read a `set` from a JSON object.
    /// Returns `None` if the object is of some other type.
    pub fn from_object(mut object: Map<String, Value>) -> Option<Self> {
        if object.get("type").and_then(Value::as_str) != Some("set") {
            return None;
        }
        object.remove("type");
        object.remove("engine");

        let channel = object
            .remove("channel")
            .map(|channel| match channel {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .map(|channel| channel.trim().to_uppercase())
            .filter(|channel| !channel.is_empty());

        let key = match object.remove("key") {
            Some(Value::String(s)) => s,
            None | Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
        };

        let value = object
            .remove("value")
            .map(|raw| SetValue::coerce(&key, raw));

        Some(Self {
            channel,
            key,
            value,
            extra: object,
        })
    }
}
