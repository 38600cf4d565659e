/// Serial port related errors.
pub mod error;

/// Opening real serial ports.
pub mod serial_port;

/// Codecs for encoding/decoding messages to/from wire.
pub mod codecs;

/// Lists the serial ports worth probing.
pub mod ports;
