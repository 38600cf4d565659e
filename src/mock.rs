//! An in-memory serial transport with scripted devices,
//! useful to test discovery and sessions without the actual serial ports.

use std::{
    collections::BTreeMap,
    future::{self, Future},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::{io::DuplexStream, sync::mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info_span, trace, Instrument};

use crate::{
    protocol::HostMessage,
    serial::{codecs::lines::LinesCodec, error::SerialPortError},
    transport::Transport,
};

const MOCK_BUFFER_SIZE: usize = 4096;

/// How a mock device behaves.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    /// Lines written before answering an identify request, e.g. boot chatter.
    preamble: Vec<String>,

    /// The answer to an identify request. Silent if `None`.
    hello: Option<String>,
}

impl MockDevice {
    /// A device answering identify requests with a `hello`.
    pub fn controller(device_type: &str, device_id: &str, fw: &str) -> Self {
        Self {
            preamble: vec![],
            hello: Some(
                json!({
                    "type": "hello",
                    "deviceType": device_type,
                    "deviceId": device_id,
                    "fw": fw,
                })
                .to_string(),
            ),
        }
    }

    /// A device which never answers, like a modem or a debug console.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Answer identify requests with this exact line.
    pub fn answering(line: &str) -> Self {
        Self {
            preamble: vec![],
            hello: Some(line.to_owned()),
        }
    }

    /// Write this line before each answer.
    pub fn with_preamble(mut self, line: &str) -> Self {
        self.preamble.push(line.to_owned());
        self
    }
}

#[derive(Debug)]
struct MockPort {
    device: MockDevice,
    opens: usize,
    inject: Option<mpsc::UnboundedSender<String>>,
}

#[derive(Debug, Default)]
struct Inner {
    ports: BTreeMap<String, MockPort>,
    fail_enumeration: bool,
}

/// A serial transport where each port is backed by an in-memory pipe
/// and a task playing the device.
///
/// Cloning gives another handle to the same set of ports.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    /// A transport without any ports.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plug in a device.
    /// Replaces any device already on this port.
    pub fn add(&self, port: &str, device: MockDevice) {
        self.lock().ports.insert(
            port.to_owned(),
            MockPort {
                device,
                opens: 0,
                inject: None,
            },
        );
    }

    /// Plug in a controller.
    pub fn add_controller(&self, port: &str, device_type: &str, device_id: &str, fw: &str) {
        self.add(port, MockDevice::controller(device_type, device_id, fw));
    }

    /// Plug in a device which never answers.
    pub fn add_silent(&self, port: &str) {
        self.add(port, MockDevice::silent());
    }

    /// Unplug a device.
    /// Whoever has the port open sees the stream end.
    pub fn unplug(&self, port: &str) {
        if self.lock().ports.remove(port).is_some() {
            debug!(%port, "Unplugged");
        }
    }

    /// Have the device write a line to whoever opened the port last.
    /// Returns false if the port is not open.
    pub fn send_line(&self, port: &str, line: &str) -> bool {
        self.lock()
            .ports
            .get(port)
            .and_then(|port| port.inject.as_ref())
            .map(|inject| inject.send(line.to_owned()).is_ok())
            .unwrap_or_default()
    }

    /// How many times the port was opened.
    pub fn opens(&self, port: &str) -> usize {
        self.lock()
            .ports
            .get(port)
            .map(|port| port.opens)
            .unwrap_or_default()
    }

    /// Make listing ports fail, as if the host could not enumerate them.
    pub fn fail_enumeration(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }
}

impl MockTransport {
    fn list(&self) -> Result<Vec<String>, SerialPortError> {
        let inner = self.lock();

        if inner.fail_enumeration {
            return Err(SerialPortError::Open {
                path: "<enumeration>".into(),
                problem: "mock enumeration failure".into(),
            });
        }

        Ok(inner.ports.keys().cloned().collect())
    }

    fn plug_in(&self, path: &str) -> Result<DuplexStream, SerialPortError> {
        let mut inner = self.lock();

        let port = inner
            .ports
            .get_mut(path)
            .ok_or_else(|| SerialPortError::Open {
                path: path.to_owned(),
                problem: "No such mock port".into(),
            })?;

        let (host_side, device_side) = tokio::io::duplex(MOCK_BUFFER_SIZE);
        let (inject_sender, inject_receiver) = mpsc::unbounded_channel();

        port.opens += 1;
        port.inject = Some(inject_sender);

        tokio::spawn(
            play_device(port.device.clone(), device_side, inject_receiver)
                .instrument(info_span!("mock", %path)),
        );

        Ok(host_side)
    }
}

impl Transport for MockTransport {
    type Port = DuplexStream;

    fn available_ports(&self) -> impl Future<Output = Result<Vec<String>, SerialPortError>> + Send {
        future::ready(self.list())
    }

    fn open(
        &self,
        path: &str,
        _baud: u32,
    ) -> impl Future<Output = Result<Self::Port, SerialPortError>> + Send {
        future::ready(self.plug_in(path))
    }
}

async fn play_device(
    device: MockDevice,
    wire: DuplexStream,
    mut inject: mpsc::UnboundedReceiver<String>,
) {
    let mut framed = Framed::new(wire, LinesCodec::newline().into_string_codec(true));

    loop {
        tokio::select! {
            line = framed.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    _ => {
                        trace!("Host closed the port");
                        return;
                    }
                };

                if line.trim() != HostMessage::WhoAreYou.to_line() {
                    trace!(%line, "Ignoring host line");
                    continue;
                }

                if let Some(hello) = &device.hello {
                    for line in device.preamble.iter().chain(std::iter::once(hello)) {
                        if framed.send(line.clone()).await.is_err() {
                            return;
                        }
                    }
                }
            }
            line = inject.recv() => {
                match line {
                    Some(line) => {
                        if framed.send(line).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        trace!("Device unplugged");
                        return;
                    }
                }
            }
        }
    }
}
