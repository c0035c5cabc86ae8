//! Device log capture.
//!
//! Firmware logs reach the host one of two ways: as LOG packets on the RPC
//! link, or over SEGGER RTT through the debug probe. Either way the text ends
//! up in the devkit's [`DeviceLog`], which is dumped when a session closes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use targetrpc_rpc::LogSink;
use tracing::{debug, warn};

use crate::error::{DeviceError, Result};

/// Accumulated device log text. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct DeviceLog {
    text: Arc<Mutex<String>>,
}

impl DeviceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, text: &str) {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }

    /// Snapshot of everything captured so far.
    pub fn contents(&self) -> String {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn is_empty(&self) -> bool {
        self.text
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl LogSink for DeviceLog {
    fn append(&self, text: &str) {
        self.push(text);
    }
}

/// RTT access through a debug probe.
pub trait RttBackend: Send {
    /// Start RTT on the target.
    fn start(&mut self) -> Result<()>;

    /// Whether the RTT control block has been located in target RAM.
    fn control_block_found(&mut self) -> Result<bool>;

    /// Read up to `buf.len()` bytes from up-channel `channel`.
    fn read(&mut self, channel: u32, buf: &mut [u8]) -> Result<usize>;

    fn stop(&mut self) -> Result<()>;
}

/// RTT channel carrying the firmware log.
pub const RTT_LOG_CHANNEL: u32 = 0;
/// Largest single RTT read.
pub const RTT_READ_SIZE: usize = 255;
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_SEARCH_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_READ_INTERVAL: Duration = Duration::from_millis(10);

/// Streams an RTT channel into a [`DeviceLog`] on a background thread.
pub struct RttLogger {
    snr: u32,
    backend: Option<Box<dyn RttBackend>>,
    search_timeout: Duration,
    search_interval: Duration,
    read_interval: Duration,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<Box<dyn RttBackend>>>,
}

impl fmt::Debug for RttLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RttLogger")
            .field("snr", &self.snr)
            .field("search_timeout", &self.search_timeout)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl RttLogger {
    pub fn new(snr: u32, backend: Box<dyn RttBackend>) -> Self {
        Self {
            snr,
            backend: Some(backend),
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            search_interval: DEFAULT_SEARCH_INTERVAL,
            read_interval: DEFAULT_READ_INTERVAL,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// How long [`open`](Self::open) waits for the control block.
    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn with_intervals(mut self, search: Duration, read: Duration) -> Self {
        self.search_interval = search;
        self.read_interval = read;
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Start RTT and block until the control block is found.
    ///
    /// A logger that is already running is left alone.
    pub fn open(&mut self, log: &DeviceLog) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(backend) = self.backend.take() else {
            return Err(DeviceError::Control {
                snr: self.snr,
                message: "RTT backend lost by an earlier session".to_string(),
            });
        };

        self.stop.store(false, Ordering::SeqCst);
        let (ready_tx, ready_rx) = mpsc::channel();
        let worker = RttWorker {
            backend,
            log: log.clone(),
            stop: Arc::clone(&self.stop),
            search_interval: self.search_interval,
            read_interval: self.read_interval,
        };
        let handle = thread::Builder::new()
            .name(format!("targetrpc-rtt {}", self.snr))
            .spawn(move || worker.run(ready_tx))?;
        self.worker = Some(handle);

        match ready_rx.recv_timeout(self.search_timeout) {
            Ok(Ok(())) => {
                debug!(snr = self.snr, "RTT control block found");
                Ok(())
            }
            Ok(Err(err)) => {
                self.close();
                Err(err)
            }
            Err(_) => {
                self.close();
                Err(DeviceError::LogStart {
                    snr: self.snr,
                    timeout: self.search_timeout,
                })
            }
        }
    }

    /// Stop the reader thread and RTT. Idempotent.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(backend) => self.backend = Some(backend),
                Err(_) => warn!(snr = self.snr, "RTT reader thread panicked"),
            }
        }
    }
}

impl Drop for RttLogger {
    fn drop(&mut self) {
        self.close();
    }
}

struct RttWorker {
    backend: Box<dyn RttBackend>,
    log: DeviceLog,
    stop: Arc<AtomicBool>,
    search_interval: Duration,
    read_interval: Duration,
}

impl RttWorker {
    fn run(mut self, ready: mpsc::Sender<Result<()>>) -> Box<dyn RttBackend> {
        if let Err(err) = self.backend.start() {
            let _ = ready.send(Err(err));
            return self.backend;
        }

        loop {
            if self.stop.load(Ordering::SeqCst) {
                self.stop_backend();
                return self.backend;
            }
            match self.backend.control_block_found() {
                Ok(true) => break,
                Ok(false) => thread::sleep(self.search_interval),
                Err(err) => {
                    let _ = ready.send(Err(err));
                    self.stop_backend();
                    return self.backend;
                }
            }
        }
        let _ = ready.send(Ok(()));

        let mut buf = [0u8; RTT_READ_SIZE];
        while !self.stop.load(Ordering::SeqCst) {
            match self.backend.read(RTT_LOG_CHANNEL, &mut buf) {
                Ok(0) => {}
                Ok(n) => self.log.push(&String::from_utf8_lossy(&buf[..n])),
                Err(err) => {
                    warn!(error = %err, "RTT read failed; stopping log capture");
                    break;
                }
            }
            thread::sleep(self.read_interval);
        }

        self.stop_backend();
        self.backend
    }

    fn stop_backend(&mut self) {
        if let Err(err) = self.backend.stop() {
            warn!(error = %err, "RTT stop failed");
        }
    }
}

/// Where a devkit's log comes from.
#[derive(Debug, Default)]
pub enum LogSource {
    /// LOG packets on the RPC link; nothing to start or stop.
    #[default]
    Rpc,
    Rtt(RttLogger),
}

impl LogSource {
    pub fn open(&mut self, log: &DeviceLog) -> Result<()> {
        match self {
            LogSource::Rpc => Ok(()),
            LogSource::Rtt(logger) => logger.open(log),
        }
    }

    pub fn close(&mut self) {
        if let LogSource::Rtt(logger) = self {
            logger.close();
        }
    }
}
