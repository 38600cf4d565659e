use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::serial::error::SerialPortError;

/// Something which can list and open serial ports.
///
/// Real hardware goes through [`crate::serial::serial_port::SerialTransport`],
/// tests use [`crate::mock::MockTransport`].
///
/// Both operations may touch the OS in blocking ways.
/// Implementations must keep that off the async runtime threads.
pub trait Transport: Send + Sync + 'static {
    /// An opened port. Dropping it closes the port.
    type Port: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// The names of all ports on the host.
    fn available_ports(&self) -> impl Future<Output = Result<Vec<String>, SerialPortError>> + Send;

    /// Open a port.
    /// Once opened, the port is read asynchronously.
    fn open(
        &self,
        path: &str,
        baud: u32,
    ) -> impl Future<Output = Result<Self::Port, SerialPortError>> + Send;
}
