use tracing::{debug, warn};

use crate::control::DeviceControl;
use crate::devconf::{DevConf, DeviceEntry};
use crate::devkit::Devkit;
use crate::error::{DeviceError, Result};
use crate::family::Family;

/// Pool of bench devkits.
///
/// [`acquire`](Self::acquire) hands a devkit out by value so only one test
/// can drive it; [`release`](Self::release) puts it back.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    available: Vec<Devkit>,
    in_use: Vec<(u32, String)>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a bench file. `control` supplies a probe per entry.
    pub fn from_devconf<F>(conf: &DevConf, mut control: F) -> Self
    where
        F: FnMut(&DeviceEntry) -> Option<Box<dyn DeviceControl>>,
    {
        let mut registry = Self::new();
        for entry in &conf.devices {
            let mut devkit = Devkit::new(entry.name.clone(), entry.snr, entry.family.clone());
            if let Some(port) = &entry.port {
                devkit = devkit.with_port(port.clone());
            }
            if let Some(probe) = control(entry) {
                devkit = devkit.with_control(probe);
            }
            registry.register(devkit);
        }
        registry
    }

    pub fn register(&mut self, devkit: Devkit) {
        debug!(devkit = %devkit, "registered");
        self.available.push(devkit);
    }

    /// Number of devkits, in use or not.
    pub fn len(&self) -> usize {
        self.available.len() + self.in_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn available(&self) -> impl Iterator<Item = &Devkit> {
        self.available.iter()
    }

    pub fn is_in_use(&self, snr: u32) -> bool {
        self.in_use.iter().any(|(s, _)| *s == snr)
    }

    /// Take the first free devkit of `family`, optionally pinned to `snr`.
    pub fn acquire(&mut self, family: &Family, snr: Option<u32>) -> Result<Devkit> {
        let index = self
            .available
            .iter()
            .position(|dk| dk.family() == family && snr.is_none_or(|s| dk.snr() == s))
            .ok_or_else(|| DeviceError::NotAvailable {
                family: family.clone(),
                snr,
            })?;
        Ok(self.check_out(index))
    }

    pub fn acquire_named(&mut self, name: &str) -> Result<Devkit> {
        let index = self
            .available
            .iter()
            .position(|dk| dk.name() == name)
            .ok_or_else(|| DeviceError::UnknownDevice(name.to_string()))?;
        Ok(self.check_out(index))
    }

    /// Return a devkit taken with `acquire`.
    ///
    /// A devkit this registry did not hand out is ignored, so the pool never
    /// holds two entries for one board. Returns whether it was taken back.
    pub fn release(&mut self, devkit: Devkit) -> bool {
        let snr = devkit.snr();
        let Some(index) = self.in_use.iter().position(|(s, _)| *s == snr) else {
            warn!(devkit = %devkit, "release of a devkit that is not checked out, ignoring");
            return false;
        };
        self.in_use.remove(index);
        debug!(devkit = %devkit, "released");
        self.available.push(devkit);
        true
    }

    /// Halt every devkit nobody is using, so idle boards stay off the air.
    pub fn halt_unused(&mut self) {
        for devkit in &mut self.available {
            if let Err(err) = devkit.halt() {
                warn!(devkit = %devkit.name(), error = %err, "halt failed");
            }
        }
    }

    fn check_out(&mut self, index: usize) -> Devkit {
        let devkit = self.available.remove(index);
        self.in_use.push((devkit.snr(), devkit.name().to_string()));
        debug!(devkit = %devkit, "acquired");
        devkit
    }
}
