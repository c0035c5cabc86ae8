use std::fmt;
use std::io;

use targetrpc_device::DeviceError;
use targetrpc_frame::FrameError;
use targetrpc_rpc::RpcError;
use targetrpc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HANDSHAKE_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = io_code(err.kind());
    CliError::new(code, format!("{context}: {err}"))
}

fn io_code(kind: io::ErrorKind) -> i32 {
    match kind {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    }
}

fn serial_code(err: &serialport::Error) -> i32 {
    match err.kind() {
        serialport::ErrorKind::Io(kind) => io_code(kind),
        serialport::ErrorKind::InvalidInput => USAGE,
        _ => TRANSPORT_ERROR,
    }
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match &err {
        TransportError::Open { source, .. } | TransportError::Serial(source) => serial_code(source),
        TransportError::Io(source) => io_code(source.kind()),
        TransportError::WriteTimeout { .. } => TIMEOUT,
        TransportError::Closed => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::FrameTooLarge { .. } | FrameError::ChecksumMismatch { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Transport(err) => transport_error(context, err),
        RpcError::Frame(err) => frame_error(context, err),
        RpcError::EstablishTimeout(_)
        | RpcError::CommandTimeout { .. }
        | RpcError::AsyncTimeout { .. }
        | RpcError::EventTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RpcError::HandshakeRejected(_) => {
            CliError::new(HANDSHAKE_FAILED, format!("{context}: {err}"))
        }
        RpcError::MalformedHeader { .. }
        | RpcError::UnknownKind(_)
        | RpcError::UnsupportedKind { .. }
        | RpcError::Schema(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        RpcError::OpcodeOutOfRange { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        RpcError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn device_error(context: &str, err: DeviceError) -> CliError {
    match err {
        DeviceError::Rpc(err) => rpc_error(context, err),
        DeviceError::Transport(err) => transport_error(context, err),
        DeviceError::Io(err) => io_error(context, err),
        DeviceError::Json(_) | DeviceError::Config(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        DeviceError::Unresponsive { .. } | DeviceError::LogStart { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeouts_map_to_124() {
        let err = rpc_error(
            "cmd failed",
            RpcError::CommandTimeout {
                opcode: 1,
                timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("cmd failed: "));

        let err = transport_error(
            "send failed",
            TransportError::WriteTimeout {
                timeout: Duration::from_secs(1),
                written: 0,
                total: 4,
            },
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn nested_transport_errors_keep_their_code() {
        let err = rpc_error(
            "open failed",
            RpcError::Frame(FrameError::Transport(TransportError::Io(io::Error::from(
                io::ErrorKind::PermissionDenied,
            )))),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }

    #[test]
    fn rejected_handshake_has_its_own_code() {
        let err = rpc_error("monitor", RpcError::HandshakeRejected("group".into()));
        assert_eq!(err.code, HANDSHAKE_FAILED);
        assert_eq!(rpc_error("x", RpcError::UnknownKind(9)).code, DATA_INVALID);
    }

    #[test]
    fn bad_devconf_is_invalid_data() {
        let err = device_error("devconf", DeviceError::Config("duplicate".into()));
        assert_eq!(err.code, DATA_INVALID);
        let err = device_error(
            "devconf",
            DeviceError::Io(io::Error::from(io::ErrorKind::PermissionDenied)),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }
}
