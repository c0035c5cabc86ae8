use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// SoC family of a devkit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Family {
    Nrf52,
    Nrf53,
    Nrf91,
    /// Any other family, upper-cased.
    Other(String),
}

impl Family {
    pub fn name(&self) -> &str {
        match self {
            Family::Nrf52 => "NRF52",
            Family::Nrf53 => "NRF53",
            Family::Nrf91 => "NRF91",
            Family::Other(name) => name,
        }
    }

    /// Whether the SoC has a separate network core to flash.
    pub fn has_network_core(&self) -> bool {
        matches!(self, Family::Nrf53)
    }

    /// Which of the probe's virtual COM ports carries the application UART.
    ///
    /// nRF53 DKs expose the app core on the last port; others on the first.
    pub fn uart_port_is_last(&self) -> bool {
        matches!(self, Family::Nrf53)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Family {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "" => Err(DeviceError::Config("empty device family".to_string())),
            "NRF52" => Ok(Family::Nrf52),
            "NRF53" => Ok(Family::Nrf53),
            "NRF91" => Ok(Family::Nrf91),
            _ => Ok(Family::Other(upper)),
        }
    }
}

impl TryFrom<String> for Family {
    type Error = DeviceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Family> for String {
    fn from(family: Family) -> Self {
        family.name().to_string()
    }
}

/// CPU core to flash on multi-core SoCs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Core {
    #[default]
    App,
    Net,
}

impl fmt::Display for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Core::App => "APP",
            Core::Net => "NET",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("nrf53".parse::<Family>().unwrap(), Family::Nrf53);
        assert_eq!(" NRF52 ".parse::<Family>().unwrap(), Family::Nrf52);
        assert_eq!(
            "esp32".parse::<Family>().unwrap(),
            Family::Other("ESP32".into())
        );
        assert!("".parse::<Family>().is_err());
    }

    #[test]
    fn serde_uses_upper_case_names() {
        let family: Family = serde_json::from_str("\"nrf91\"").unwrap();
        assert_eq!(family, Family::Nrf91);
        assert_eq!(serde_json::to_string(&family).unwrap(), "\"NRF91\"");
        assert_eq!(serde_json::to_string(&Core::Net).unwrap(), "\"NET\"");
    }

    #[test]
    fn only_nrf53_has_network_core() {
        assert!(Family::Nrf53.has_network_core());
        assert!(Family::Nrf53.uart_port_is_last());
        assert!(!Family::Nrf52.has_network_core());
        assert!(!Family::Other("X".into()).uart_port_is_last());
    }
}
