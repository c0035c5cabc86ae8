use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};
use tracing::trace;

use crate::error::{Result, TransportError};

/// Smallest timeout handed to the OS; a zero socket timeout means "block forever".
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// A connected byte stream. Implements Read + Write.
///
/// On hardware this wraps a serial port. On Unix it can also wrap a socket,
/// which is how loopback tests and device simulators stand in for a UART.
pub struct ByteStream {
    inner: ByteStreamInner,
    name: String,
}

enum ByteStreamInner {
    Serial(Box<dyn SerialPort>),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ByteStreamInner::Serial(port) => port.read(buf),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ByteStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ByteStreamInner::Serial(port) => port.write(buf),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            ByteStreamInner::Serial(port) => port.flush(),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl ByteStream {
    pub(crate) fn from_serial(port: Box<dyn SerialPort>, name: impl Into<String>) -> Self {
        Self {
            inner: ByteStreamInner::Serial(port),
            name: name.into(),
        }
    }

    /// Wrap a connected Unix socket.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream, name: impl Into<String>) -> Self {
        Self {
            inner: ByteStreamInner::Unix(stream),
            name: name.into(),
        }
    }

    /// A connected pair of in-memory streams: `(host, device)`.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (host, device) = std::os::unix::net::UnixStream::pair()?;
        Ok((
            Self::from_unix(host, "loopback-host"),
            Self::from_unix(device, "loopback-device"),
        ))
    }

    /// Port path or label, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read whatever is available, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when nothing arrived in time. End of stream is
    /// reported as [`TransportError::Closed`].
    pub fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.set_read_timeout(timeout)?;

        match self.read(buf) {
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => Ok(n),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    /// Write all of `data` before `timeout` elapses (blocking).
    ///
    /// Returns the number of bytes written, which is always `data.len()` on success.
    pub fn write_all_timeout(&mut self, data: &[u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut written = 0usize;

        while written < data.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::WriteTimeout {
                    timeout,
                    written,
                    total: data.len(),
                });
            }
            self.set_write_timeout(remaining)?;

            match self.write(&data[written..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => written += n,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        loop {
            match self.flush() {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        trace!(stream = %self.name, written, "write complete");
        Ok(written)
    }

    /// Discard bytes queued in the OS input and output buffers.
    ///
    /// Sockets have no separate driver buffers; this is a no-op for them.
    pub fn clear_buffers(&self) -> Result<()> {
        match &self.inner {
            ByteStreamInner::Serial(port) => port.clear(ClearBuffer::All).map_err(Into::into),
            #[cfg(unix)]
            ByteStreamInner::Unix(_) => Ok(()),
        }
    }

    /// Try to clone this stream (creates a new OS handle).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            ByteStreamInner::Serial(port) => ByteStreamInner::Serial(port.try_clone()?),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => ByteStreamInner::Unix(stream.try_clone()?),
        };
        Ok(Self {
            inner,
            name: self.name.clone(),
        })
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        let timeout = timeout.max(MIN_TIMEOUT);
        match &mut self.inner {
            ByteStreamInner::Serial(port) => port.set_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => {
                stream.set_read_timeout(Some(timeout)).map_err(Into::into)
            }
        }
    }

    fn set_write_timeout(&mut self, timeout: Duration) -> Result<()> {
        let timeout = timeout.max(MIN_TIMEOUT);
        match &mut self.inner {
            // Reads and writes share one timeout on a serial handle; the
            // receive loop owns a separate clone, so this does not leak into it.
            ByteStreamInner::Serial(port) => port.set_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => {
                stream.set_write_timeout(Some(timeout)).map_err(Into::into)
            }
        }
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            ByteStreamInner::Serial(_) => "serial",
            #[cfg(unix)]
            ByteStreamInner::Unix(_) => "unix",
        };
        f.debug_struct("ByteStream")
            .field("type", &kind)
            .field("name", &self.name)
            .finish()
    }
}
