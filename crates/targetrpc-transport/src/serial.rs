use std::time::Duration;

use serialport::{FlowControl, SerialPortType};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::ByteStream;

/// Default line rate used by the devkit firmware.
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

/// Default read timeout; one poll of the receive loop.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Default per-write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// Hardware (RTS/CTS) flow control.
    pub rtscts: bool,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            rtscts: true,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl SerialConfig {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_rtscts(mut self, rtscts: bool) -> Self {
        self.rtscts = rtscts;
        self
    }

    fn flow_control(&self) -> FlowControl {
        if self.rtscts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        }
    }
}

/// Open a serial port.
///
/// # Errors
///
/// Returns [`TransportError::Open`] if the port does not exist or cannot be
/// configured with the requested settings.
pub fn open_serial(port: &str, config: &SerialConfig) -> Result<ByteStream> {
    let handle = serialport::new(port, config.baud_rate)
        .flow_control(config.flow_control())
        .timeout(config.read_timeout)
        .open()
        .map_err(|source| TransportError::Open {
            port: port.to_string(),
            source,
        })?;

    debug!(
        port,
        baud = config.baud_rate,
        rtscts = config.rtscts,
        "serial port opened"
    );
    Ok(ByteStream::from_serial(handle, port))
}

/// A serial port visible to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    /// USB serial number, when the port belongs to a USB device.
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl PortInfo {
    /// `usb` for USB-attached ports, `other` otherwise.
    pub fn kind(&self) -> &'static str {
        if self.vid.is_some() {
            "usb"
        } else {
            "other"
        }
    }
}

/// Enumerate serial ports, sorted by name.
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()?
        .into_iter()
        .map(|info| match info.port_type {
            SerialPortType::UsbPort(usb) => PortInfo {
                name: info.port_name,
                serial_number: usb.serial_number,
                manufacturer: usb.manufacturer,
                product: usb.product,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
            },
            _ => PortInfo {
                name: info.port_name,
                serial_number: None,
                manufacturer: None,
                product: None,
                vid: None,
                pid: None,
            },
        })
        .collect();

    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}
