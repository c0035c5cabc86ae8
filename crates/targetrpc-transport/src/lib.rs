//! Byte-stream transports for devkit RPC links.
//!
//! The lowest layer of targetrpc. A devkit is normally reached over a UART
//! exposed by its debug probe; tests and simulators use a Unix socket pair
//! instead. Both are wrapped by [`ByteStream`], which adds the timed
//! read/write semantics the framing layer relies on.

pub mod error;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use serial::{available_ports, open_serial, PortInfo, SerialConfig};
pub use traits::ByteStream;
