use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use targetrpc_transport::serial::{DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT};
use targetrpc_transport::{ByteStream, SerialConfig, TransportError};
use tracing::{debug, trace, warn};

use crate::checksum::Checksum;
use crate::codec::{encode_frame, Hex};
use crate::error::{FrameError, Result};
use crate::reassembler::Reassembler;

/// Maximum bytes taken from the stream per read.
pub const READ_CHUNK_SIZE: usize = 256;

const DEFAULT_IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Settings for a framed link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub checksum: Checksum,
    /// How long one read waits for bytes.
    pub read_timeout: Duration,
    /// Pause after a read that returned nothing.
    pub idle_sleep: Duration,
    /// Deadline for writing one whole frame.
    pub write_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            checksum: Checksum::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            idle_sleep: DEFAULT_IDLE_SLEEP,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl LinkConfig {
    /// Link settings that follow a serial port's timeouts.
    pub fn for_serial(serial: &SerialConfig) -> Self {
        Self {
            read_timeout: serial.read_timeout,
            write_timeout: serial.write_timeout,
            ..Self::default()
        }
    }
}

/// Where an RPC channel sends its outgoing packets.
pub trait PacketSink: Send + Sync {
    /// Frame and transmit one packet.
    fn send(&self, payload: &[u8]) -> Result<()>;

    /// Drop anything queued in the transport in either direction.
    fn clear_buffers(&self) -> Result<()>;
}

/// Writes framed payloads to a stream. Cheap to clone; clones share the stream.
#[derive(Clone)]
pub struct FrameSender {
    stream: Arc<Mutex<ByteStream>>,
    checksum: Checksum,
    write_timeout: Duration,
}

impl FrameSender {
    pub fn new(stream: ByteStream, checksum: Checksum, write_timeout: Duration) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
            checksum,
            write_timeout,
        }
    }

    /// Encode and write one frame (blocking). Returns the bytes written.
    pub fn send_frame(&self, payload: &[u8]) -> Result<usize> {
        let mut buf = BytesMut::new();
        encode_frame(payload, self.checksum, &mut buf)?;

        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        trace!(stream = %stream.name(), tx = %Hex(&buf), "TX");
        let written = stream.write_all_timeout(&buf, self.write_timeout)?;
        Ok(written)
    }
}

impl PacketSink for FrameSender {
    fn send(&self, payload: &[u8]) -> Result<()> {
        self.send_frame(payload).map(|_| ())
    }

    fn clear_buffers(&self) -> Result<()> {
        let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        stream.clear_buffers()?;
        Ok(())
    }
}

impl std::fmt::Debug for FrameSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSender")
            .field("checksum", &self.checksum)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

/// A stream with a running receive thread.
///
/// The thread reads chunks, feeds them through a [`Reassembler`] and calls
/// the payload callback on the receive thread itself, in arrival order.
/// The link only reads; pair it with a [`FrameSender`] on a clone of the
/// stream to transmit.
pub struct FrameLink {
    name: String,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FrameLink {
    /// Start the receive thread on `stream`.
    pub fn spawn<F>(stream: ByteStream, config: LinkConfig, on_payload: F) -> Result<Self>
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        let name = stream.name().to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let handle = thread::Builder::new()
            .name(format!("targetrpc-rx {name}"))
            .spawn({
                let stop = Arc::clone(&stop);
                let running = Arc::clone(&running);
                move || {
                    receive_loop(stream, &config, &stop, on_payload);
                    running.store(false, Ordering::Release);
                }
            })
            .map_err(|err| FrameError::Transport(TransportError::Io(err)))?;

        debug!(stream = %name, "receive thread started");
        Ok(Self {
            name,
            stop,
            running,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once the receive thread has exited (closed, or the stream ended).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the receive thread and wait for it to exit.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(stream = %self.name, "receive thread panicked");
            }
            debug!(stream = %self.name, "receive thread stopped");
        }
    }
}

impl Drop for FrameLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop<F>(mut reader: ByteStream, config: &LinkConfig, stop: &AtomicBool, mut on_payload: F)
where
    F: FnMut(Bytes),
{
    let mut reassembler = Reassembler::new(config.checksum);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    while !stop.load(Ordering::Acquire) {
        match reader.read_chunk(&mut chunk, config.read_timeout) {
            Ok(0) => thread::sleep(config.idle_sleep),
            Ok(n) => {
                trace!(stream = %reader.name(), rx = %Hex(&chunk[..n]), "RX");
                reassembler.feed(&chunk[..n], &mut on_payload);
            }
            Err(TransportError::Closed) => {
                debug!(stream = %reader.name(), "stream closed by peer");
                break;
            }
            Err(err) => {
                warn!(stream = %reader.name(), %err, "read failed, stopping receive thread");
                break;
            }
        }
    }

    let stats = reassembler.stats();
    debug!(
        stream = %reader.name(),
        frames = stats.frames,
        resync_bytes = stats.resync_bytes,
        checksum_failures = stats.checksum_failures,
        "receive loop finished"
    );
}
