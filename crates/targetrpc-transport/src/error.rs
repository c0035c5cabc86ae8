use std::time::Duration;

/// Errors that can occur in byte-stream transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the serial port.
    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        source: serialport::Error,
    },

    /// A serial port control operation failed.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// An I/O error occurred on the stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The write did not complete before its deadline.
    #[error("write timed out after {timeout:?} ({written} of {total} bytes sent)")]
    WriteTimeout {
        timeout: Duration,
        written: usize,
        total: usize,
    },

    /// The remote end closed the stream.
    #[error("stream closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
