//! Node identity and metadata types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Extended Unique Identifier of a LoRaWAN end device
///
/// 16 hex digits, stored lowercase. This is the sole registry key and is
/// immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevEui(String);

/// Invalid EUI string
#[derive(Debug, thiserror::Error)]
#[error("invalid device EUI '{0}': expected 16 hex digits")]
pub struct InvalidEui(pub String);

impl FromStr for DevEui {
    type Err = InvalidEui;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidEui(s.to_string()));
        }
        Ok(DevEui(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for DevEui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device classification
///
/// A closed set of known unit types plus free text for anything else.
/// The server-side device description carries this; "Blank Unit" is the
/// default for devices without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceType {
    BlankUnit,
    Sensor,
    Tracker,
    Actuator,
    Other(String),
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::BlankUnit
    }
}

impl DeviceType {
    pub fn as_str(&self) -> &str {
        match self {
            DeviceType::BlankUnit => "Blank Unit",
            DeviceType::Sensor => "Sensor",
            DeviceType::Tracker => "Tracker",
            DeviceType::Actuator => "Actuator",
            DeviceType::Other(s) => s,
        }
    }
}

impl From<&str> for DeviceType {
    fn from(s: &str) -> Self {
        match s.trim() {
            "" | "Blank Unit" => DeviceType::BlankUnit,
            "Sensor" => DeviceType::Sensor,
            "Tracker" => DeviceType::Tracker,
            "Actuator" => DeviceType::Actuator,
            other => DeviceType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for DeviceType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeviceType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(DeviceType::from(s.as_str()))
    }
}

/// One known end device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub dev_eui: DevEui,
    /// Display name (mutable, not unique)
    pub name: String,
    #[serde(default)]
    pub device_type: DeviceType,
    /// Application the device was registered under, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
}

impl Node {
    pub fn new(dev_eui: DevEui, name: impl Into<String>) -> Self {
        Self {
            dev_eui,
            name: name.into(),
            device_type: DeviceType::default(),
            application_id: None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (EUI: {})", self.name, self.dev_eui)
    }
}
