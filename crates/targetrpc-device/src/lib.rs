//! Devkits under test.
//!
//! Tracks which boards are connected, which are in use, and how to flash,
//! reset, halt and read logs from them. [`RpcSession`] ties a devkit to an
//! established [`RpcChannel`](targetrpc_rpc::RpcChannel) for the duration of
//! a test and dumps the device log when it ends.
//!
//! Probe access (J-Link, RTT) is injected through [`DeviceControl`] and
//! [`RttBackend`]; this crate does not talk to probe vendor libraries.

pub mod control;
pub mod devconf;
pub mod devkit;
pub mod error;
pub mod family;
pub mod log;
pub mod registry;
pub mod session;

pub use control::DeviceControl;
pub use devconf::{DevConf, DeviceEntry};
pub use devkit::{find_serial_port, Devkit};
pub use error::{DeviceError, Result};
pub use family::{Core, Family};
pub use log::{DeviceLog, LogSource, RttBackend, RttLogger};
pub use registry::DeviceRegistry;
pub use session::{RpcSession, SessionConfig};
