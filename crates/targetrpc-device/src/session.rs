use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use targetrpc_frame::LinkConfig;
use targetrpc_rpc::{ChannelConfig, RpcChannel, RpcError};
use targetrpc_transport::{open_serial, ByteStream, SerialConfig};
use tracing::{info, warn};

use crate::devkit::Devkit;
use crate::error::{DeviceError, Result};

/// How long a freshly reset device gets to complete the handshake.
pub const DEFAULT_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub serial: SerialConfig,
    pub link: LinkConfig,
    pub channel: ChannelConfig,
    pub establish_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let serial = SerialConfig::default();
        Self {
            link: LinkConfig::for_serial(&serial),
            serial,
            channel: ChannelConfig::default(),
            establish_timeout: DEFAULT_ESTABLISH_TIMEOUT,
        }
    }
}

/// An RPC channel to a devkit that was reset into a known state.
///
/// Dereferences to the [`RpcChannel`]. Closing (or dropping) the session
/// closes the link, stops log capture, halts the device and writes the
/// captured device log to the tracing output.
pub struct RpcSession<'a> {
    devkit: &'a mut Devkit,
    channel: RpcChannel,
    closed: bool,
}

impl<'a> RpcSession<'a> {
    /// Open the devkit's serial port and bring up a session on it.
    pub fn open_serial(devkit: &'a mut Devkit, config: SessionConfig) -> Result<Self> {
        let stream = open_serial(devkit.serial_port()?, &config.serial)?;
        Self::open(devkit, stream, config)
    }

    /// Bring up a session on an already open stream.
    ///
    /// The device is reset after the channel is listening, so its INIT is
    /// never missed.
    pub fn open(devkit: &'a mut Devkit, stream: ByteStream, config: SessionConfig) -> Result<Self> {
        let channel_config = ChannelConfig {
            label: devkit.name().to_string(),
            ..config.channel
        };
        let channel = RpcChannel::open(stream, config.link, channel_config)?;
        channel.set_log_sink(Arc::new(devkit.log().clone()));

        let mut session = Self {
            devkit,
            channel,
            closed: false,
        };
        session.devkit.reset()?;
        session.devkit.open_log()?;

        match session.channel.wait_established(config.establish_timeout) {
            Ok(()) => {
                info!(device = %session.devkit.name(), "device session established");
                Ok(session)
            }
            Err(RpcError::EstablishTimeout(timeout)) => {
                let log = session.teardown();
                Err(DeviceError::Unresponsive {
                    device: session.devkit.name().to_string(),
                    timeout,
                    log,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn channel(&self) -> &RpcChannel {
        &self.channel
    }

    pub fn devkit(&self) -> &Devkit {
        self.devkit
    }

    /// End the session and return the device log it captured.
    pub fn close(mut self) -> String {
        self.teardown()
    }

    fn teardown(&mut self) -> String {
        let log = self.devkit.log().contents();
        if self.closed {
            return log;
        }
        self.closed = true;

        self.channel.close();
        self.devkit.close_log();
        if let Err(err) = self.devkit.halt() {
            warn!(device = %self.devkit.name(), error = %err, "halt failed");
        }
        let log = self.devkit.log().contents();
        info!(device = %self.devkit.name(), "Device logs:\n{log}");
        log
    }
}

impl Deref for RpcSession<'_> {
    type Target = RpcChannel;

    fn deref(&self) -> &RpcChannel {
        &self.channel
    }
}

impl Drop for RpcSession<'_> {
    fn drop(&mut self) {
        self.teardown();
    }
}
