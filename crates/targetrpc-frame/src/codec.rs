use bytes::{BufMut, Bytes, BytesMut};

use crate::checksum::Checksum;
use crate::error::{FrameError, Result};

/// Frame header: magic (4) + length (2) + checksum (1) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Magic bytes: "UART".
pub const MAGIC: [u8; 4] = *b"UART";

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes.
    pub length: u16,
    pub checksum: u8,
}

impl FrameHeader {
    /// Parse a header from the first [`HEADER_SIZE`] bytes of `bytes`.
    ///
    /// Returns `None` if fewer bytes are available or the magic does not match.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header = bytes.get(..HEADER_SIZE)?;
        if header[..4] != MAGIC {
            return None;
        }
        Some(Self {
            length: u16::from_le_bytes([header[4], header[5]]),
            checksum: header[6],
        })
    }

    /// Total wire size of the frame this header introduces.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Checksum byte as carried on the wire.
    pub checksum: u8,
    pub payload: Bytes,
}

impl Frame {
    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬──────────┬─────────────────┐
/// │ Magic (4B)   │ Length    │ Checksum │ Payload         │
/// │ "UART"       │ (2B LE)   │ (1B)     │ (Length bytes)  │
/// └──────────────┴───────────┴──────────┴─────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], checksum: Checksum, dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::FrameTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u16_le(payload.len() as u16);
    dst.put_u8(checksum.compute(payload));
    dst.put_slice(payload);
    Ok(())
}

/// Decode one frame from the start of `src`.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet, and
/// `Err(FrameError::Desync)` if it doesn't start with a header. On success
/// also returns the number of bytes the frame occupied; `src` is not modified.
pub fn decode_frame(src: &[u8], checksum: Checksum) -> Result<Option<(Frame, usize)>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let header = FrameHeader::parse(src).ok_or(FrameError::Desync)?;
    let total = header.frame_len();
    if src.len() < total {
        return Ok(None); // Need more data
    }

    let payload = &src[HEADER_SIZE..total];
    checksum.verify(payload, header.checksum)?;

    Ok(Some((
        Frame {
            checksum: header.checksum,
            payload: Bytes::copy_from_slice(payload),
        },
        total,
    )))
}

/// Space-separated lowercase hex, for logs and CLI output.
pub struct Hex<'a>(pub &'a [u8]);

impl std::fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_encode_layout() {
        let mut buf = BytesMut::new();
        encode_frame(b"hi", Checksum::Placeholder, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"UART\x02\x00\x00hi");
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = b"hello, devkit!";

        encode_frame(payload, Checksum::Crc8, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len());

        let (frame, consumed) = decode_frame(&buf, Checksum::Crc8).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(frame.payload.as_ref(), payload);
        assert_eq!(frame.checksum, Checksum::Crc8.compute(payload));
        assert_eq!(frame.wire_size(), consumed);
    }

    #[test]
    fn test_decode_init_frame_from_firmware() {
        let wire = [
            0x55, 0x41, 0x52, 0x54, 0x10, 0x00, 0x00, 0x04, 0x00, 0xff, 0x00, 0xff, 0x00, 0x6e,
            0x72, 0x66, 0x5f, 0x70, 0x79, 0x74, 0x65, 0x73, 0x74,
        ];
        let (frame, consumed) = decode_frame(&wire, Checksum::Placeholder)
            .unwrap()
            .unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(frame.payload.len(), 16);
        assert!(frame.payload.ends_with(b"nrf_pytest"));
    }

    #[test]
    fn test_decode_incomplete_header() {
        let result = decode_frame(b"UAR", Checksum::Placeholder).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", Checksum::Placeholder, &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        let result = decode_frame(&buf, Checksum::Placeholder).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_bad_magic_is_desync() {
        let result = decode_frame(b"UARX\x00\x00\x00", Checksum::Placeholder);
        assert!(matches!(result, Err(FrameError::Desync)));
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut buf = BytesMut::new();
        encode_frame(b"data", Checksum::Crc8, &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let result = decode_frame(&buf, Checksum::Crc8);
        assert!(matches!(result, Err(FrameError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_encode_payload_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let mut buf = BytesMut::new();
        let result = encode_frame(&payload, Checksum::Placeholder, &mut buf);
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_max_payload_fits() {
        let payload = vec![0xAB; MAX_PAYLOAD];
        let mut buf = BytesMut::new();
        encode_frame(&payload, Checksum::Placeholder, &mut buf).unwrap();
        assert_eq!(&buf[4..6], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"", Checksum::Placeholder, &mut buf).unwrap();

        let (frame, consumed) = decode_frame(&buf, Checksum::Placeholder)
            .unwrap()
            .unwrap();
        assert_eq!(consumed, HEADER_SIZE);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_header_parse_needs_full_header() {
        assert!(FrameHeader::parse(b"UART\x01\x00").is_none());
        let header = FrameHeader::parse(b"UART\x01\x02\x03trailing").unwrap();
        assert_eq!(header.length, 0x0201);
        assert_eq!(header.checksum, 3);
        assert_eq!(header.frame_len(), HEADER_SIZE + 0x0201);
    }

    #[test]
    fn test_hex_display() {
        assert_eq!(Hex(&[0x55, 0x0a, 0xff]).to_string(), "55 0a ff");
        assert_eq!(Hex(&[]).to_string(), "");
    }

    fn checksum_strategy() -> impl Strategy<Value = Checksum> {
        prop_oneof![Just(Checksum::Placeholder), Just(Checksum::Crc8)]
    }

    /// A payload of `len` bytes seeded from `seed`; cheap even at the maximum length.
    fn patterned(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn any_length_roundtrips(
            len in 0..=MAX_PAYLOAD,
            seed in any::<u8>(),
            checksum in checksum_strategy(),
        ) {
            let payload = patterned(len, seed);
            let mut buf = BytesMut::new();
            encode_frame(&payload, checksum, &mut buf).unwrap();
            prop_assert_eq!(buf.len(), HEADER_SIZE + len);

            let (frame, consumed) = decode_frame(&buf, checksum).unwrap().unwrap();
            prop_assert_eq!(consumed, buf.len());
            prop_assert_eq!(frame.payload.as_ref(), payload.as_slice());
            prop_assert_eq!(frame.checksum, checksum.compute(&payload));
        }

        #[test]
        fn random_payloads_roundtrip(
            payload in prop::collection::vec(any::<u8>(), 0..512),
            checksum in checksum_strategy(),
        ) {
            let mut buf = BytesMut::new();
            encode_frame(&payload, checksum, &mut buf).unwrap();

            let (frame, _) = decode_frame(&buf, checksum).unwrap().unwrap();
            prop_assert_eq!(frame.payload.as_ref(), payload.as_slice());
        }

        #[test]
        fn oversized_payloads_are_rejected(extra in 1usize..4096) {
            let payload = vec![0u8; MAX_PAYLOAD + extra];
            let mut buf = BytesMut::new();
            let result = encode_frame(&payload, Checksum::Placeholder, &mut buf);
            let too_large = matches!(
                result,
                Err(FrameError::FrameTooLarge { size, max: MAX_PAYLOAD }) if size == MAX_PAYLOAD + extra
            );
            prop_assert!(too_large);
            prop_assert!(buf.is_empty());
        }
    }
}
