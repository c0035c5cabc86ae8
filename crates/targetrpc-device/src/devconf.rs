//! Bench description file.
//!
//! ```json
//! {
//!   "devices": [
//!     { "name": "central", "snr": 1050123456, "family": "NRF52" },
//!     { "name": "peripheral", "segger": 1050654321, "family": "nrf53", "port": "/dev/ttyACM4" }
//!   ],
//!   "configurations": {
//!     "ble-pair": { "central": "central", "peripheral": "peripheral" }
//!   }
//! }
//! ```
//!
//! A configuration maps test roles to device names.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};
use crate::family::Family;

/// One devkit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    /// Probe serial number.
    #[serde(alias = "segger")]
    pub snr: u32,
    pub family: Family,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevConf {
    pub devices: Vec<DeviceEntry>,
    /// Configuration name, then role to device name.
    #[serde(default)]
    pub configurations: BTreeMap<String, BTreeMap<String, String>>,
}

impl DevConf {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let conf: DevConf = serde_json::from_str(text)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Names and serial numbers must be unique; configurations may only
    /// reference listed devices.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut snrs = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return Err(DeviceError::Config(format!(
                    "duplicate device name {:?}",
                    device.name
                )));
            }
            if !snrs.insert(device.snr) {
                return Err(DeviceError::Config(format!(
                    "duplicate serial number {}",
                    device.snr
                )));
            }
        }

        for (config, roles) in &self.configurations {
            for (role, device) in roles {
                if !names.contains(device.as_str()) {
                    return Err(DeviceError::Config(format!(
                        "configuration {config:?} role {role:?} names unknown device {device:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Role to device name mapping for `name`.
    pub fn configuration(&self, name: &str) -> Result<&BTreeMap<String, String>> {
        self.configurations
            .get(name)
            .ok_or_else(|| DeviceError::Config(format!("no configuration named {name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BENCH: &str = r#"{
        "devices": [
            { "name": "central", "snr": 1050123456, "family": "NRF52" },
            { "name": "peripheral", "segger": 1050654321, "family": "nrf53", "port": "/dev/ttyACM4" }
        ],
        "configurations": {
            "ble-pair": { "central": "central", "peripheral": "peripheral" }
        }
    }"#;

    #[test]
    fn parses_devices_and_configurations() {
        let conf = DevConf::from_json(BENCH).unwrap();
        assert_eq!(conf.devices.len(), 2);

        let peripheral = conf.device("peripheral").unwrap();
        assert_eq!(peripheral.snr, 1_050_654_321);
        assert_eq!(peripheral.family, Family::Nrf53);
        assert_eq!(peripheral.port.as_deref(), Some("/dev/ttyACM4"));
        assert!(conf.device("central").unwrap().port.is_none());

        let roles = conf.configuration("ble-pair").unwrap();
        assert_eq!(roles["central"], "central");
        assert!(conf.configuration("mesh").is_err());
    }

    #[test]
    fn configurations_are_optional() {
        let conf = DevConf::from_json(r#"{"devices": []}"#).unwrap();
        assert!(conf.devices.is_empty());
        assert!(conf.configurations.is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let text = r#"{"devices": [
            {"name": "a", "snr": 1, "family": "NRF52"},
            {"name": "a", "snr": 2, "family": "NRF52"}
        ]}"#;
        assert!(matches!(DevConf::from_json(text), Err(DeviceError::Config(_))));
    }

    #[test]
    fn duplicate_snrs_are_rejected() {
        let text = r#"{"devices": [
            {"name": "a", "snr": 1, "family": "NRF52"},
            {"name": "b", "snr": 1, "family": "NRF91"}
        ]}"#;
        let err = DevConf::from_json(text).unwrap_err();
        assert!(err.to_string().contains("serial number 1"));
    }

    #[test]
    fn unknown_role_device_is_rejected() {
        let text = r#"{
            "devices": [{"name": "a", "snr": 1, "family": "NRF52"}],
            "configurations": {"solo": {"dut": "b"}}
        }"#;
        let err = DevConf::from_json(text).unwrap_err();
        assert!(err.to_string().contains("\"b\""));
    }

    #[test]
    fn bad_json_is_a_json_error() {
        assert!(matches!(DevConf::from_json("{"), Err(DeviceError::Json(_))));
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir().join(format!("targetrpc-devconf-{}.json", std::process::id()));
        fs::write(&path, BENCH).unwrap();
        let conf = DevConf::load(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(conf.devices[0].name, "central");

        assert!(matches!(DevConf::load(&path), Err(DeviceError::Io(_))));
    }
}
