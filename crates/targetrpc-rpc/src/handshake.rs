use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use targetrpc_frame::Hex;

use crate::error::{Result, RpcError};
use crate::packet::{Addressing, PacketKind, RpcPacket, BROADCAST};

/// Handshake protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x00;

/// RPC group served by the test firmware.
pub const DEFAULT_GROUP: &str = "nrf_pytest";

/// What both ends must agree on for a link to be established.
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// RPC group name carried in the INIT payload.
    pub group: String,
    pub version: u8,
    /// Group id this side advertises as `group_src`.
    pub local_group_id: u8,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            version: PROTOCOL_VERSION,
            local_group_id: 0,
        }
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("group", &self.group)
            .field("version", &format_args!("{:#04x}", self.version))
            .field("local_group_id", &self.local_group_id)
            .finish()
    }
}

impl HandshakeConfig {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Self::default()
        }
    }

    /// `version || group name`, the payload both sides exchange in INIT.
    pub fn init_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.group.len());
        buf.put_u8(self.version);
        buf.put_slice(self.group.as_bytes());
        buf.freeze()
    }

    /// Check a received INIT payload byte for byte.
    pub fn validate(&self, payload: &[u8]) -> Result<()> {
        let expected = self.init_payload();
        if payload == expected.as_ref() {
            return Ok(());
        }

        let reason = match payload.split_first() {
            None => "empty INIT payload".to_string(),
            Some((version, _)) if *version != self.version => format!(
                "protocol version {version:#04x}, expected {:#04x}",
                self.version
            ),
            Some((_, group)) => match std::str::from_utf8(group) {
                Ok(name) => format!("group {name:?}, expected {:?}", self.group),
                Err(_) => format!("group bytes [{}], expected {:?}", Hex(group), self.group),
            },
        };
        Err(RpcError::HandshakeRejected(reason))
    }

    /// Our INIT answer, addressed to the peer's group.
    pub fn init_reply(&self, remote_group_id: u8) -> RpcPacket {
        RpcPacket::new(PacketKind::Init, 0, self.init_payload()).with_addressing(Addressing {
            src: 0,
            dst: BROADCAST,
            group_src: self.local_group_id,
            group_dst: remote_group_id,
        })
    }
}
