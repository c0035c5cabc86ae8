use targetrpc_transport::TransportError;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The bytes at the head of the buffer are not a frame header.
    ///
    /// Recovered by the reassembler; never seen by channel callers.
    #[error("frame magic mismatch (expected \"UART\")")]
    Desync,

    /// The payload does not fit the 16-bit length field.
    #[error("payload too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The payload does not match the checksum carried in its header.
    #[error("checksum mismatch (header {expected:#04x}, computed {actual:#04x})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// The underlying byte stream failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
