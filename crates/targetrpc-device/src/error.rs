use std::time::Duration;

use crate::family::Family;

/// Errors that can occur while provisioning or driving a devkit.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// No registered devkit matches the request, or all matches are in use.
    #[error("no available {family} devkit{}", .snr.map(|s| format!(" with snr {s}")).unwrap_or_default())]
    NotAvailable { family: Family, snr: Option<u32> },

    /// No devkit with this name is registered or available.
    #[error("devkit {0:?} not available")]
    UnknownDevice(String),

    /// The probe reported a failure.
    #[error("[{snr}] probe error: {message}")]
    Control { snr: u32, message: String },

    /// The device log backend did not come up in time.
    #[error("[{snr}] unable to start logging within {timeout:?}")]
    LogStart { snr: u32, timeout: Duration },

    /// The devkit has no known serial port.
    #[error("[{snr}] no serial port found")]
    NoSerialPort { snr: u32 },

    /// The device never completed the RPC handshake.
    #[error("[{device}] unresponsive device (no handshake within {timeout:?})")]
    Unresponsive {
        device: String,
        timeout: Duration,
        /// Device log captured up to the failure.
        log: String,
    },

    /// Invalid device configuration.
    #[error("device configuration error: {0}")]
    Config(String),

    /// RPC-level error.
    #[error("rpc error: {0}")]
    Rpc(#[from] targetrpc_rpc::RpcError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] targetrpc_transport::TransportError),

    /// I/O error (reading configuration files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
