#![deny(missing_docs)]

//! This crate finds serial-attached hardware controllers and relays their events
//! to websocket subscribers.
//!
//! Serial ports on the host are probed with an identify handshake.
//! A port answering as the expected device type is handed an engine slot
//! (or all of them, in [`router::RoutingMode::Channels`]) and streamed from until it fails.
//!
//! Each `set` line a controller sends is normalized, attributed to an engine slot
//! and broadcast to every subscriber. Channel liveness is inferred from how recently
//! a `rate` message was seen, and reported alongside controller presence.

/// The command line interface.
pub mod cli;

/// The server's configuration.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Messages sent to subscribers.
pub mod events;

/// Channel liveness.
pub mod liveness;

/// Setting up logging.
pub mod logging;

/// A description of the host.
pub mod machine;

/// An in-memory serial transport.
pub mod mock;

/// The identify handshake.
pub mod prober;

/// The serial protocol.
pub mod protocol;

/// Engine slot allocation.
pub mod router;

/// Serial ports and codecs.
pub mod serial;

/// Code relating to setting up a server.
pub mod server;

/// Opening and listing ports.
pub mod transport;

/// The server version.
pub mod version;

pub(crate) mod control_center;
pub(crate) mod scheduler;
pub(crate) mod session;
pub(crate) mod subscriber;
pub(crate) mod websocket;
