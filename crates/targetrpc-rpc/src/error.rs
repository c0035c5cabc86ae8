use std::time::Duration;

use crate::packet::{HeaderShape, PacketKind};

/// Errors that can occur in RPC channel operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] targetrpc_frame::FrameError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] targetrpc_transport::TransportError),

    /// The packet is shorter than its RPC header.
    #[error("malformed header ({len} bytes, need {need})")]
    MalformedHeader { len: usize, need: usize },

    /// The kind byte does not name a packet kind.
    #[error("unknown packet kind {0:#04x}")]
    UnknownKind(u8),

    /// The kind cannot be expressed in this header shape.
    #[error("{kind} packets have no {shape} encoding")]
    UnsupportedKind { kind: PacketKind, shape: HeaderShape },

    /// The opcode does not fit the header's opcode field.
    #[error("opcode {opcode:#06x} out of range (max {max:#04x})")]
    OpcodeOutOfRange { opcode: u16, max: u16 },

    /// The device's INIT payload did not match the expected group/version.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// The channel did not reach the established state in time.
    #[error("channel not established after {0:?}")]
    EstablishTimeout(Duration),

    /// No response to a command in time.
    #[error("command {opcode:#04x} timed out after {timeout:?}")]
    CommandTimeout { opcode: u16, timeout: Duration },

    /// No acknowledgement for an event in time.
    #[error("event {opcode:#04x} not acknowledged after {timeout:?}")]
    AsyncTimeout { opcode: u16, timeout: Duration },

    /// No event arrived in time.
    #[error("no event received within {0:?}")]
    EventTimeout(Duration),

    /// Another command is still waiting for its response.
    #[error("command {opcode:#04x} already in flight")]
    CommandInFlight { opcode: u16 },

    /// Another event is still waiting for its acknowledgement.
    #[error("event {opcode:#04x} already awaiting ACK")]
    EventInFlight { opcode: u16 },

    /// The channel was closed.
    #[error("channel closed")]
    Closed,

    /// A payload does not match its field layout.
    #[error("schema error: {0}")]
    Schema(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;
