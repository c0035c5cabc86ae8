//! RPC packets and the multiplexing channel for devkit test links.
//!
//! This is the layer tests talk to. An [`RpcChannel`] sits on top of a framed
//! link, answers the device's INIT handshake, correlates command responses,
//! queues and acknowledges events, forwards device log lines, and routes
//! everything else to registered handlers.

pub mod channel;
pub mod error;
pub mod handshake;
pub mod log;
pub mod packet;
pub mod schema;

pub use channel::{ChannelConfig, ChannelState, Handler, HandlerContext, RpcChannel};
pub use error::{Result, RpcError};
pub use handshake::{HandshakeConfig, DEFAULT_GROUP, PROTOCOL_VERSION};
pub use log::{LogSink, TracingLogSink};
pub use packet::{Addressing, HeaderShape, PacketKind, RpcPacket, BROADCAST};
pub use schema::{FieldType, FieldValue, Fields, PacketSchema};
