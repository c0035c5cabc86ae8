use std::fmt;
use std::path::Path;

use targetrpc_transport::PortInfo;
use tracing::{info, warn};

use crate::control::DeviceControl;
use crate::error::{DeviceError, Result};
use crate::family::{Core, Family};
use crate::log::{DeviceLog, LogSource};

/// One development kit on the bench.
pub struct Devkit {
    name: String,
    snr: u32,
    family: Family,
    port: Option<String>,
    control: Option<Box<dyn DeviceControl>>,
    log: DeviceLog,
    log_source: LogSource,
}

impl fmt::Debug for Devkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Devkit")
            .field("name", &self.name)
            .field("snr", &self.snr)
            .field("family", &self.family)
            .field("port", &self.port)
            .field("probe", &self.control.is_some())
            .field("log_source", &self.log_source)
            .finish()
    }
}

impl fmt::Display for Devkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {}",
            self.name,
            self.snr,
            self.port.as_deref().unwrap_or("-")
        )
    }
}

impl Devkit {
    pub fn new(name: impl Into<String>, snr: u32, family: Family) -> Self {
        Self {
            name: name.into(),
            snr,
            family,
            port: None,
            control: None,
            log: DeviceLog::new(),
            log_source: LogSource::Rpc,
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_control(mut self, control: Box<dyn DeviceControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn with_log_source(mut self, source: LogSource) -> Self {
        self.log_source = source;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snr(&self) -> u32 {
        self.snr
    }

    pub fn family(&self) -> &Family {
        &self.family
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn has_probe(&self) -> bool {
        self.control.is_some()
    }

    /// The devkit's log buffer.
    pub fn log(&self) -> &DeviceLog {
        &self.log
    }

    /// The application UART, or [`DeviceError::NoSerialPort`].
    pub fn serial_port(&self) -> Result<&str> {
        self.port
            .as_deref()
            .ok_or(DeviceError::NoSerialPort { snr: self.snr })
    }

    /// Fill in the port from an enumeration if none was configured.
    pub fn resolve_port(&mut self, ports: &[PortInfo]) -> Result<&str> {
        if self.port.is_none() {
            self.port = find_serial_port(self.snr, &self.family, ports).map(|p| p.name.clone());
        }
        self.serial_port()
    }

    /// Program the application image and, on multi-core parts, the network
    /// core image first. Resets afterwards.
    pub fn flash(&mut self, app: &Path, net: Option<&Path>) -> Result<()> {
        let Some(control) = self.control.as_mut() else {
            return Err(DeviceError::Control {
                snr: self.snr,
                message: "no probe attached; cannot flash".to_string(),
            });
        };

        if let Some(net) = net {
            if !self.family.has_network_core() {
                return Err(DeviceError::Config(format!(
                    "{} has no network core to flash {}",
                    self.family,
                    net.display()
                )));
            }
            info!(device = %self.name, image = %net.display(), core = %Core::Net, "flashing");
            control.flash(net, Core::Net)?;
        }
        info!(device = %self.name, image = %app.display(), core = %Core::App, "flashing");
        control.flash(app, Core::App)?;
        control.reset()
    }

    pub fn reset(&mut self) -> Result<()> {
        match self.control.as_mut() {
            Some(control) => control.reset(),
            None => {
                warn!(device = %self.name, snr = self.snr, "no probe attached; reset the device by hand");
                Ok(())
            }
        }
    }

    /// Halt the CPU. Without a probe there is nothing to do.
    pub fn halt(&mut self) -> Result<()> {
        match self.control.as_mut() {
            Some(control) => control.halt(),
            None => {
                info!(device = %self.name, "no probe attached; not halting");
                Ok(())
            }
        }
    }

    /// Clear the log buffer and start capturing.
    pub fn open_log(&mut self) -> Result<()> {
        self.log.clear();
        self.log_source.open(&self.log)
    }

    pub fn close_log(&mut self) {
        self.log_source.close();
    }
}

/// Pick the application UART of the probe with serial number `snr`.
///
/// J-Link probes report zero-padded serial numbers. nRF53 kits put the app
/// core on the last of the probe's ports; others on the first.
pub fn find_serial_port<'a>(snr: u32, family: &Family, ports: &'a [PortInfo]) -> Option<&'a PortInfo> {
    let mut matching: Vec<&PortInfo> = ports
        .iter()
        .filter(|port| {
            port.serial_number
                .as_deref()
                .and_then(|s| s.trim().trim_start_matches('0').parse::<u64>().ok())
                == Some(u64::from(snr))
        })
        .collect();
    matching.sort_by(|a, b| a.name.cmp(&b.name));

    if family.uart_port_is_last() {
        matching.last().copied()
    } else {
        matching.first().copied()
    }
}
