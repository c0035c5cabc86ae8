use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use targetrpc_frame::Hex;

use crate::error::{Result, RpcError};

/// Broadcast endpoint / group id.
pub const BROADCAST: u8 = 0xFF;

const ADDRESSED_HEADER_SIZE: usize = 5;
const SIMPLE_HEADER_SIZE: usize = 3;
const ADDRESSED_CMD_FLAG: u8 = 0x80;

/// RPC packet category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PacketKind {
    Init,
    InitRsp,
    Cmd,
    Rsp,
    Evt,
    Ack,
    Err,
    Log,
}

impl PacketKind {
    pub const ALL: [PacketKind; 8] = [
        PacketKind::Init,
        PacketKind::InitRsp,
        PacketKind::Cmd,
        PacketKind::Rsp,
        PacketKind::Evt,
        PacketKind::Ack,
        PacketKind::Err,
        PacketKind::Log,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PacketKind::Init => "INIT",
            PacketKind::InitRsp => "INITRSP",
            PacketKind::Cmd => "CMD",
            PacketKind::Rsp => "RSP",
            PacketKind::Evt => "EVT",
            PacketKind::Ack => "ACK",
            PacketKind::Err => "ERR",
            PacketKind::Log => "LOG",
        }
    }

    fn simple_code(self) -> u8 {
        match self {
            PacketKind::Init => 0,
            PacketKind::InitRsp => 1,
            PacketKind::Cmd => 2,
            PacketKind::Rsp => 3,
            PacketKind::Evt => 4,
            PacketKind::Ack => 5,
            PacketKind::Err => 6,
            PacketKind::Log => 7,
        }
    }

    fn from_simple_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.simple_code() == code)
    }

    /// Kind byte in the addressed header. CMD is flagged by the high bit instead.
    fn addressed_code(self) -> Option<u8> {
        match self {
            PacketKind::Evt => Some(0),
            PacketKind::Rsp => Some(1),
            PacketKind::Ack => Some(2),
            PacketKind::Err => Some(3),
            PacketKind::Init => Some(4),
            PacketKind::Cmd => Some(ADDRESSED_CMD_FLAG),
            PacketKind::InitRsp | PacketKind::Log => None,
        }
    }

    fn from_addressed_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PacketKind::Evt),
            1 => Some(PacketKind::Rsp),
            2 => Some(PacketKind::Ack),
            3 => Some(PacketKind::Err),
            4 => Some(PacketKind::Init),
            _ => None,
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// RPC header layout.
///
/// `Addressed` is the current protocol:
/// ```text
/// ┌──────────────┬──────────┬─────┬───────────┬───────────┐
/// │ KIND_AND_SRC │ OPCODE   │ DST │ GROUP_SRC │ GROUP_DST │
/// │ (1B)         │ (1B)     │(1B) │ (1B)      │ (1B)      │
/// └──────────────┴──────────┴─────┴───────────┴───────────┘
/// ```
/// `Simple` is the older `KIND (1B) | OPCODE (2B LE)` layout, kept for
/// firmware that predates group routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderShape {
    #[default]
    Addressed,
    Simple,
}

impl HeaderShape {
    pub fn header_len(self) -> usize {
        match self {
            HeaderShape::Addressed => ADDRESSED_HEADER_SIZE,
            HeaderShape::Simple => SIMPLE_HEADER_SIZE,
        }
    }

    pub fn max_opcode(self) -> u16 {
        match self {
            HeaderShape::Addressed => u8::MAX as u16,
            HeaderShape::Simple => u16::MAX,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HeaderShape::Addressed => "addressed",
            HeaderShape::Simple => "simple",
        }
    }
}

impl fmt::Display for HeaderShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Endpoint and group routing carried by addressed headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Addressing {
    /// Source endpoint. Only carried on the wire for CMD packets (7 bits).
    pub src: u8,
    pub dst: u8,
    pub group_src: u8,
    pub group_dst: u8,
}

impl Default for Addressing {
    fn default() -> Self {
        Self {
            src: 0,
            dst: BROADCAST,
            group_src: 0,
            group_dst: BROADCAST,
        }
    }
}

/// A decoded RPC packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcPacket {
    pub kind: PacketKind,
    pub opcode: u16,
    /// Present on packets decoded from addressed headers.
    pub addressing: Option<Addressing>,
    pub payload: Bytes,
}

impl RpcPacket {
    pub fn new(kind: PacketKind, opcode: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            opcode,
            addressing: None,
            payload: payload.into(),
        }
    }

    pub fn with_addressing(mut self, addressing: Addressing) -> Self {
        self.addressing = Some(addressing);
        self
    }

    /// Serialize header and payload.
    ///
    /// Packets without addressing use [`Addressing::default`] in the
    /// addressed shape.
    pub fn encode(&self, shape: HeaderShape) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(shape.header_len() + self.payload.len());
        self.encode_into(shape, &mut buf)?;
        Ok(buf.freeze())
    }

    pub fn encode_into(&self, shape: HeaderShape, dst: &mut BytesMut) -> Result<()> {
        if self.opcode > shape.max_opcode() {
            return Err(RpcError::OpcodeOutOfRange {
                opcode: self.opcode,
                max: shape.max_opcode(),
            });
        }

        match shape {
            HeaderShape::Addressed => {
                let code = self
                    .kind
                    .addressed_code()
                    .ok_or(RpcError::UnsupportedKind {
                        kind: self.kind,
                        shape,
                    })?;
                let addressing = self.addressing.unwrap_or_default();
                let first = if self.kind == PacketKind::Cmd {
                    code | (addressing.src & !ADDRESSED_CMD_FLAG)
                } else {
                    code
                };
                dst.put_u8(first);
                dst.put_u8(self.opcode as u8);
                dst.put_u8(addressing.dst);
                dst.put_u8(addressing.group_src);
                dst.put_u8(addressing.group_dst);
            }
            HeaderShape::Simple => {
                dst.put_u8(self.kind.simple_code());
                dst.put_u16_le(self.opcode);
            }
        }
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Parse a frame payload. The payload after the header is kept as-is.
    pub fn decode(mut bytes: Bytes, shape: HeaderShape) -> Result<Self> {
        let need = shape.header_len();
        if bytes.len() < need {
            return Err(RpcError::MalformedHeader {
                len: bytes.len(),
                need,
            });
        }
        let payload = bytes.split_off(need);
        let header = bytes;

        match shape {
            HeaderShape::Addressed => {
                let first = header[0];
                let (kind, src) = if first & ADDRESSED_CMD_FLAG != 0 {
                    (PacketKind::Cmd, first & !ADDRESSED_CMD_FLAG)
                } else {
                    let kind =
                        PacketKind::from_addressed_code(first).ok_or(RpcError::UnknownKind(first))?;
                    (kind, 0)
                };
                Ok(Self {
                    kind,
                    opcode: header[1] as u16,
                    addressing: Some(Addressing {
                        src,
                        dst: header[2],
                        group_src: header[3],
                        group_dst: header[4],
                    }),
                    payload,
                })
            }
            HeaderShape::Simple => {
                let kind =
                    PacketKind::from_simple_code(header[0]).ok_or(RpcError::UnknownKind(header[0]))?;
                Ok(Self {
                    kind,
                    opcode: u16::from_le_bytes([header[1], header[2]]),
                    addressing: None,
                    payload,
                })
            }
        }
    }
}

impl fmt::Display for RpcPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02x} LEN {} DATA {}",
            self.kind,
            self.opcode,
            self.payload.len(),
            Hex(&self.payload)
        )
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use targetrpc_frame::{Checksum, Reassembler};

    use super::*;

    const INIT_FRAME: [u8; 23] = [
        0x55, 0x41, 0x52, 0x54, 0x10, 0x00, 0x00, 0x04, 0x00, 0xff, 0x00, 0xff, 0x00, 0x6e, 0x72,
        0x66, 0x5f, 0x70, 0x79, 0x74, 0x65, 0x73, 0x74,
    ];

    #[test]
    fn decodes_firmware_init_frame() {
        let mut reassembler = Reassembler::new(Checksum::Placeholder);
        let mut payloads = Vec::new();
        reassembler.feed(&INIT_FRAME, |payload| payloads.push(payload));
        assert_eq!(payloads.len(), 1);

        let packet = RpcPacket::decode(payloads.remove(0), HeaderShape::Addressed).unwrap();
        assert_eq!(packet.kind, PacketKind::Init);
        assert_eq!(packet.opcode, 0);
        assert_eq!(
            packet.addressing,
            Some(Addressing {
                src: 0,
                dst: 0xff,
                group_src: 0,
                group_dst: 0xff,
            })
        );
        assert_eq!(packet.payload.as_ref(), b"\x00nrf_pytest");
    }

    #[test]
    fn addressed_cmd_carries_source_in_kind_byte() {
        let packet = RpcPacket::new(PacketKind::Cmd, 0x06, &b"\x01"[..]).with_addressing(Addressing {
            src: 0x05,
            dst: 0x01,
            group_src: 0x02,
            group_dst: 0x03,
        });

        let wire = packet.encode(HeaderShape::Addressed).unwrap();
        assert_eq!(wire.as_ref(), &[0x85, 0x06, 0x01, 0x02, 0x03, 0x01]);

        let decoded = RpcPacket::decode(wire, HeaderShape::Addressed).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn addressed_kinds_map_to_fixed_bytes() {
        for (kind, byte) in [
            (PacketKind::Evt, 0u8),
            (PacketKind::Rsp, 1),
            (PacketKind::Ack, 2),
            (PacketKind::Err, 3),
            (PacketKind::Init, 4),
        ] {
            let wire = RpcPacket::new(kind, 1, Bytes::new())
                .encode(HeaderShape::Addressed)
                .unwrap();
            assert_eq!(wire[0], byte, "{kind}");
            let decoded = RpcPacket::decode(wire, HeaderShape::Addressed).unwrap();
            assert_eq!(decoded.kind, kind);
        }
    }

    #[test]
    fn addressed_rejects_kinds_without_encoding() {
        for kind in [PacketKind::InitRsp, PacketKind::Log] {
            let err = RpcPacket::new(kind, 0, Bytes::new())
                .encode(HeaderShape::Addressed)
                .unwrap_err();
            assert!(matches!(err, RpcError::UnsupportedKind { .. }));
        }
    }

    #[test]
    fn addressed_rejects_wide_opcode() {
        let err = RpcPacket::new(PacketKind::Evt, 0x100, Bytes::new())
            .encode(HeaderShape::Addressed)
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::OpcodeOutOfRange { opcode: 0x100, max: 0xff }
        ));
    }

    #[test]
    fn addressed_unknown_kind_byte() {
        let err = RpcPacket::decode(Bytes::from_static(&[0x05, 0, 0, 0, 0]), HeaderShape::Addressed)
            .unwrap_err();
        assert!(matches!(err, RpcError::UnknownKind(0x05)));
    }

    #[test]
    fn simple_shape_roundtrip() {
        let packet = RpcPacket::new(PacketKind::Log, 0x1337, &b"boot ok"[..]);
        let wire = packet.encode(HeaderShape::Simple).unwrap();
        assert_eq!(&wire[..3], &[7, 0x37, 0x13]);

        let decoded = RpcPacket::decode(wire, HeaderShape::Simple).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn simple_kind_codes() {
        for (code, kind) in PacketKind::ALL.into_iter().enumerate() {
            let decoded =
                RpcPacket::decode(Bytes::from(vec![code as u8, 0, 0]), HeaderShape::Simple).unwrap();
            assert_eq!(decoded.kind, kind);
        }
        let err = RpcPacket::decode(Bytes::from_static(&[8, 0, 0]), HeaderShape::Simple).unwrap_err();
        assert!(matches!(err, RpcError::UnknownKind(8)));
    }

    #[test]
    fn short_packets_are_malformed() {
        let err = RpcPacket::decode(Bytes::from_static(&[0x04, 0x00]), HeaderShape::Addressed)
            .unwrap_err();
        assert!(matches!(err, RpcError::MalformedHeader { len: 2, need: 5 }));

        let err = RpcPacket::decode(Bytes::new(), HeaderShape::Simple).unwrap_err();
        assert!(matches!(err, RpcError::MalformedHeader { len: 0, need: 3 }));
    }

    #[test]
    fn header_only_packet_has_empty_payload() {
        let decoded =
            RpcPacket::decode(Bytes::from_static(&[0x02, 0x09, 0xff, 0, 0xff]), HeaderShape::Addressed)
                .unwrap();
        assert_eq!(decoded.kind, PacketKind::Ack);
        assert_eq!(decoded.opcode, 9);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn display_shows_kind_opcode_and_data() {
        let packet = RpcPacket::new(PacketKind::Evt, 0x04, &b"\x01\x02"[..]);
        assert_eq!(packet.to_string(), "EVT 04 LEN 2 DATA 01 02");
    }

    fn addressed_kind() -> impl Strategy<Value = PacketKind> {
        prop::sample::select(
            PacketKind::ALL
                .into_iter()
                .filter(|kind| kind.addressed_code().is_some())
                .collect::<Vec<_>>(),
        )
    }

    fn payload() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..=1024)
    }

    proptest! {
        #[test]
        fn addressed_packets_roundtrip(
            kind in addressed_kind(),
            opcode in any::<u8>(),
            src in 0u8..0x80,
            dst in any::<u8>(),
            group_src in any::<u8>(),
            group_dst in any::<u8>(),
            payload in payload(),
        ) {
            // Only CMD carries a source endpoint on the wire.
            let src = if kind == PacketKind::Cmd { src } else { 0 };
            let packet = RpcPacket::new(kind, opcode as u16, payload).with_addressing(Addressing {
                src,
                dst,
                group_src,
                group_dst,
            });

            let wire = packet.encode(HeaderShape::Addressed).unwrap();
            prop_assert_eq!(wire.len(), HeaderShape::Addressed.header_len() + packet.payload.len());
            prop_assert_eq!(RpcPacket::decode(wire, HeaderShape::Addressed).unwrap(), packet);
        }

        #[test]
        fn simple_packets_roundtrip(
            kind in prop::sample::select(PacketKind::ALL.to_vec()),
            opcode in any::<u16>(),
            payload in payload(),
        ) {
            let packet = RpcPacket::new(kind, opcode, payload);

            let wire = packet.encode(HeaderShape::Simple).unwrap();
            prop_assert_eq!(wire.len(), HeaderShape::Simple.header_len() + packet.payload.len());
            prop_assert_eq!(RpcPacket::decode(wire, HeaderShape::Simple).unwrap(), packet);
        }

        #[test]
        fn addressed_rejects_every_wide_opcode(opcode in 0x100u16..) {
            let err = RpcPacket::new(PacketKind::Evt, opcode, Bytes::new())
                .encode(HeaderShape::Addressed)
                .unwrap_err();
            let out_of_range = matches!(err, RpcError::OpcodeOutOfRange { max: 0xff, .. });
            prop_assert!(out_of_range);
        }
    }
}
