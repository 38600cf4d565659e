use std::future::Future;

use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::trace;

use crate::{serial::error::SerialPortError, transport::Transport};

/// Serial ports of the host, via `tokio-serial`.
#[derive(Debug, Clone)]
pub struct SerialTransport {
    flow_control: serialport::FlowControl,
}

impl SerialTransport {
    /// Ports will be opened with the given flow control.
    pub fn new(flow_control: serialport::FlowControl) -> Self {
        Self { flow_control }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(serialport::FlowControl::None)
    }
}

fn try_create_serial_port(
    baud: u32,
    flow_control: serialport::FlowControl,
    path: &str,
) -> Result<SerialStream, SerialPortError> {
    tokio_serial::new(path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(flow_control)
        .open_native_async()
        .map_err(|e| SerialPortError::Open {
            path: path.to_owned(),
            problem: e.to_string(),
        })
}

fn list_ports() -> Result<Vec<String>, SerialPortError> {
    let ports = serialport::available_ports().map_err(|e| SerialPortError::Open {
        path: "<enumeration>".into(),
        problem: e.to_string(),
    })?;

    Ok(ports
        .into_iter()
        .map(|info| {
            trace!(port = %info.port_name, kind = ?info.port_type, "Found port");
            info.port_name
        })
        .collect())
}

// Enumeration and opening (termios setup included) are blocking syscalls.
async fn offload<R, F>(what: &str, f: F) -> Result<R, SerialPortError>
where
    F: FnOnce() -> Result<R, SerialPortError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .unwrap_or_else(|e| {
            Err(SerialPortError::Open {
                path: what.to_owned(),
                problem: e.to_string(),
            })
        })
}

impl Transport for SerialTransport {
    type Port = SerialStream;

    fn available_ports(&self) -> impl Future<Output = Result<Vec<String>, SerialPortError>> + Send {
        offload("<enumeration>", list_ports)
    }

    fn open(
        &self,
        path: &str,
        baud: u32,
    ) -> impl Future<Output = Result<Self::Port, SerialPortError>> + Send {
        trace!(%path, %baud, flow_control = ?self.flow_control, "Opening port");

        let path = path.to_owned();
        let flow_control = self.flow_control;

        async move {
            let what = path.clone();
            offload(&what, move || try_create_serial_port(baud, flow_control, &path)).await
        }
    }
}
