//! Framed UART RPC for driving embedded test firmware from the host.
//!
//! A test host and a device exchange `"UART"`-framed packets over a serial
//! link. After an INIT handshake the host sends commands, waits for
//! responses, and consumes events the device raises asynchronously.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial ports and in-memory byte streams
//! - [`frame`]: frame codec, stream reassembler and the receive thread
//! - [`rpc`]: packet codec, handshake and the request/response channel
//! - [`device`]: devkit registry, device logs and test sessions (behind `device` feature)

/// Re-export transport types.
pub mod transport {
    pub use targetrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use targetrpc_frame::*;
}

/// Re-export RPC types.
pub mod rpc {
    pub use targetrpc_rpc::*;
}

/// Re-export device types (requires `device` feature).
#[cfg(feature = "device")]
pub mod device {
    pub use targetrpc_device::*;
}
