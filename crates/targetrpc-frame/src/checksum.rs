use crc::{Crc, CRC_8_SMBUS};

use crate::error::{FrameError, Result};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// How the frame checksum byte is produced and verified.
///
/// Deployed firmware writes a constant zero and never checks it, so
/// [`Checksum::Placeholder`] is the default. [`Checksum::Crc8`] needs a
/// firmware build that computes the same CRC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Checksum {
    /// Always writes 0; any received value is accepted.
    #[default]
    Placeholder,
    /// CRC-8/SMBUS over the payload.
    Crc8,
}

impl Checksum {
    /// The checksum byte for `payload`.
    pub fn compute(self, payload: &[u8]) -> u8 {
        match self {
            Checksum::Placeholder => 0,
            Checksum::Crc8 => CRC8.checksum(payload),
        }
    }

    /// Check a received checksum byte against `payload`.
    pub fn verify(self, payload: &[u8], received: u8) -> Result<()> {
        match self {
            Checksum::Placeholder => Ok(()),
            Checksum::Crc8 => {
                let actual = CRC8.checksum(payload);
                if actual == received {
                    Ok(())
                } else {
                    Err(FrameError::ChecksumMismatch {
                        expected: received,
                        actual,
                    })
                }
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Checksum::Placeholder => "placeholder",
            Checksum::Crc8 => "crc8",
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
