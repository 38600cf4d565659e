//! The identify handshake.
//!
//! Many serial devices may be attached to the host. A port is only worth streaming from
//! if the device on it answers an identify request as the expected device type.

use std::{collections::BTreeSet, time::Duration};

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace};

use crate::{
    protocol::{json_object, ControllerIdentity, Hello, HostMessage},
    serial::codecs::lines::{LinesCodec, StringCodec},
    transport::Transport,
};

/// Probes ports for the expected controller.
#[derive(Debug, Clone)]
pub struct Prober {
    timeout: Duration,
    baud: u32,
    device_type: String,
    allowlist: Option<BTreeSet<String>>,
}

impl Prober {
    /// A prober waiting at most `timeout` for a `hello` of the given device type.
    pub fn new(timeout: Duration, baud: u32, device_type: &str) -> Self {
        Self {
            timeout,
            baud,
            device_type: device_type.to_owned(),
            allowlist: None,
        }
    }

    /// Only accept controllers with these device ids.
    pub fn with_allowlist(mut self, allowlist: BTreeSet<String>) -> Self {
        self.allowlist = Some(allowlist);
        self
    }

    /// Open the port, ask the device who it is, and close the port again.
    ///
    /// Returns `None` if the port cannot be opened, nothing sensible arrives in time,
    /// or the device is not one of ours.
    pub async fn probe<T: Transport>(
        &self,
        transport: &T,
        port: &str,
    ) -> Option<ControllerIdentity> {
        let stream = match transport.open(port, self.baud).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(%port, %e, "Probe open failed");
                return None;
            }
        };

        self.probe_stream(port, stream).await
    }

    /// Run the handshake on an already opened stream.
    /// The stream is dropped before returning.
    pub async fn probe_stream<S>(&self, port: &str, stream: S) -> Option<ControllerIdentity>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, LinesCodec::newline().into_string_codec(true));

        debug!(%port, "Probing");

        if let Err(e) = framed.send(HostMessage::WhoAreYou.to_line()).await {
            debug!(%port, %e, "Probe write failed");
            return None;
        }

        let reply = tokio::time::timeout(self.timeout, first_json_object(&mut framed)).await;

        match reply {
            Ok(Some(object)) => self.identify(port, &object),
            Ok(None) => {
                debug!(%port, "Port closed during probe");
                None
            }
            Err(_) => {
                debug!(%port, timeout = ?self.timeout, "No response");
                None
            }
        }
    }

    /// Judge the first JSON object a device sent.
    pub fn identify(&self, port: &str, object: &Map<String, Value>) -> Option<ControllerIdentity> {
        let Some(hello) = Hello::from_object(object) else {
            debug!(%port, ?object, "Unexpected response");
            return None;
        };

        if hello.device_type != self.device_type {
            debug!(%port, device_type = %hello.device_type, "Not our device type");
            return None;
        }

        if let Some(allowlist) = &self.allowlist {
            if !allowlist.contains(&hello.device_id) {
                info!(%port, device_id = %hello.device_id, "Ignoring controller not in the allowlist");
                return None;
            }
        }

        let identity = hello.into_identity(port);
        info!(%identity, "Found controller");

        Some(identity)
    }
}

async fn first_json_object<S>(
    framed: &mut Framed<S, StringCodec>,
) -> Option<Map<String, Value>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!(%e, "Probe read failed");
                return None;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        trace!(%line, "RX");

        if let Some(object) = json_object(line) {
            return Some(object);
        }
    }

    None
}
