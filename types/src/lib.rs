//! Enumerations shared by the registry, the gen1 validator/parser, and the
//! coap client. Kept dependency-free except for `serde`, which a handful of
//! variants need for event payloads.

use std::{
    io::{Error, ErrorKind},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Two- or three-letter Shelly sensor tag (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorType {
    /// Switch / generic state.
    S,
    /// Temperature.
    T,
    /// Input.
    I,
    /// Luminosity.
    L,
    /// Alarm.
    A,
    /// Battery.
    B,
    /// Concentration.
    C,
    /// Energy.
    E,
    /// Event.
    Ev,
    /// Event count.
    Evc,
}

impl SensorType {
    pub fn has_value(value: &str) -> bool {
        Self::from_str(value).is_ok()
    }
}

impl ToString for SensorType {
    fn to_string(&self) -> String {
        match self {
            Self::S => "S",
            Self::T => "T",
            Self::I => "I",
            Self::L => "L",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::E => "E",
            Self::Ev => "EV",
            Self::Evc => "EVC",
        }
        .to_string()
    }
}

impl FromStr for SensorType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "S" => Self::S,
            "T" => Self::T,
            "I" => Self::I,
            "L" => Self::L,
            "A" => Self::A,
            "B" => Self::B,
            "C" => Self::C,
            "E" => Self::E,
            "EV" => Self::Ev,
            "EVC" => Self::Evc,
            _ => return Err(Error::new(ErrorKind::InvalidInput, value.to_string())),
        })
    }
}

/// Measurement unit carried by a sensor (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorUnit {
    W,
    Wh,
    V,
    A,
    DegreesC,
    DegreesF,
    K,
    Percent,
    Ppm,
    Lux,
    Seconds,
}

impl SensorUnit {
    pub fn has_value(value: &str) -> bool {
        Self::from_str(value).is_ok()
    }
}

impl ToString for SensorUnit {
    fn to_string(&self) -> String {
        match self {
            Self::W => "W",
            Self::Wh => "Wh",
            Self::V => "V",
            Self::A => "A",
            Self::DegreesC => "\u{00b0}C",
            Self::DegreesF => "\u{00b0}F",
            Self::K => "K",
            Self::Percent => "%",
            Self::Ppm => "ppm",
            Self::Lux => "lux",
            Self::Seconds => "s",
        }
        .to_string()
    }
}

impl FromStr for SensorUnit {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "W" => Self::W,
            "Wh" => Self::Wh,
            "V" => Self::V,
            "A" => Self::A,
            "\u{00b0}C" | "degC" | "C" => Self::DegreesC,
            "\u{00b0}F" | "degF" | "F" => Self::DegreesF,
            "K" => Self::K,
            "%" | "pct" => Self::Percent,
            "ppm" => Self::Ppm,
            "lux" => Self::Lux,
            "s" => Self::Seconds,
            _ => return Err(Error::new(ErrorKind::InvalidInput, value.to_string())),
        })
    }
}

/// Structural data type derived from a sensor's `T` tag (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    String,
    Float,
    Integer,
    Boolean,
    Enum,
}

/// Device-level scalar attribute kind (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    State,
    IpAddress,
    MacAddress,
    FirmwareVersion,
    Model,
}

impl AttributeType {
    pub fn has_value(value: &str) -> bool {
        Self::from_str(value).is_ok()
    }
}

impl ToString for AttributeType {
    fn to_string(&self) -> String {
        match self {
            Self::State => "state",
            Self::IpAddress => "ip_address",
            Self::MacAddress => "mac_address",
            Self::FirmwareVersion => "firmware_version",
            Self::Model => "model",
        }
        .to_string()
    }
}

impl FromStr for AttributeType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "state" => Self::State,
            "ip_address" => Self::IpAddress,
            "mac_address" => Self::MacAddress,
            "firmware_version" => Self::FirmwareVersion,
            "model" => Self::Model,
            _ => return Err(Error::new(ErrorKind::InvalidInput, value.to_string())),
        })
    }
}

/// Connection state carried by the STATE attribute.
///
/// `Unknown` is the value a freshly initialized device carries before its
/// first CoAP frame or timeout check runs; `Disconnected` is set only by
/// the connector's `stop()` (see SPEC_FULL.md §10.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Unknown,
    Connected,
    Lost,
    Disconnected,
}

impl ToString for ConnectionState {
    fn to_string(&self) -> String {
        match self {
            Self::Unknown => "unknown",
            Self::Connected => "connected",
            Self::Lost => "lost",
            Self::Disconnected => "disconnected",
        }
        .to_string()
    }
}

impl FromStr for ConnectionState {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "unknown" => Self::Unknown,
            "connected" => Self::Connected,
            "lost" => Self::Lost,
            "disconnected" => Self::Disconnected,
            _ => return Err(Error::new(ErrorKind::InvalidInput, value.to_string())),
        })
    }
}

/// Provenance tag controlling which fields of a device record may be
/// overwritten by which source (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DescriptionSource {
    Manual,
    Coap,
    Http,
}

/// Control actions accepted on the connector's control surface (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlAction {
    Discover,
    Restart,
}

impl ControlAction {
    pub fn has_value(value: &str) -> bool {
        Self::from_str(value).is_ok()
    }
}

impl FromStr for ControlAction {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "discover" => Self::Discover,
            "restart" => Self::Restart,
            _ => return Err(Error::new(ErrorKind::InvalidInput, value.to_string())),
        })
    }
}

/// Kind of an inbound message, combining transport (CoAP/HTTP) and payload
/// shape (status/description/shelly) (spec §4.2, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    CoapStatus,
    CoapDescription,
    HttpShelly,
    HttpStatus,
    HttpDescription,
}

/// Command kind tracked by the commands registry for timeout/coalescing
/// purposes (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Describe,
    WriteSensor,
    GetState,
}

/// Canonical names that enumerated sensor values (switch/button reports) are
/// normalized to (spec §4.3).
pub const CANONICAL_ENUM_VALUES: &[&str] = &[
    "on", "off", "pressed", "released", "hold", "single", "double", "triple", "long",
];

/// Normalizes a raw enumerated sensor value to one of
/// [`CANONICAL_ENUM_VALUES`], case-insensitively. Returns `None` if the
/// value is not one of the known canonical names.
pub fn normalize_enum_value(raw: &str) -> Option<&'static str> {
    let lower = raw.to_ascii_lowercase();
    CANONICAL_ENUM_VALUES.iter().copied().find(|v| **v == lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_type_round_trips() {
        for value in ["S", "T", "I", "L", "A", "B", "C", "E", "EV", "EVC"] {
            let parsed = SensorType::from_str(value).unwrap();
            assert_eq!(parsed.to_string(), value);
        }
    }

    #[test]
    fn sensor_type_rejects_unknown() {
        assert!(SensorType::from_str("Z").is_err());
    }

    #[test]
    fn description_source_orders_by_precedence() {
        assert!(DescriptionSource::Manual < DescriptionSource::Coap);
        assert!(DescriptionSource::Coap < DescriptionSource::Http);
    }

    #[test]
    fn normalizes_enum_values_case_insensitively() {
        assert_eq!(normalize_enum_value("ON"), Some("on"));
        assert_eq!(normalize_enum_value("Single"), Some("single"));
        assert_eq!(normalize_enum_value("bogus"), None);
    }
}
