//! Input shapes for seeding the registry from persisted (MANUAL-source)
//! devices on `initialize()` (spec §4.7, SPEC_FULL.md §10.5).
//!
//! Channel/property identifiers are combined strings
//! (`"<n>_<description>"` / `"<n>_<type>_<description>"`) exactly as in
//! `original_source/fastybird_shelly_connector/connector.py`'s
//! `initialize_device_channel`/`initialize_device_channel_property`.

use std::net::IpAddr;

use types::DataType;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ManualDevice {
    pub device_id: Uuid,
    pub device_identifier: String,
    pub device_type: Option<String>,
    pub enabled: bool,
    pub ip_address: Option<IpAddr>,
    pub properties: Vec<ManualDeviceProperty>,
    pub channels: Vec<ManualChannel>,
}

#[derive(Debug, Clone)]
pub struct ManualDeviceProperty {
    pub property_id: Uuid,
    /// Matched against [`types::AttributeType::from_str`]'s string form
    /// (e.g. `"state"`, `"mac_address"`).
    pub identifier: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ManualChannel {
    pub channel_id: Uuid,
    /// `"<n>_<description>"`, e.g. `"0_relay"`.
    pub identifier: String,
    pub properties: Vec<ManualChannelProperty>,
}

#[derive(Debug, Clone)]
pub struct ManualChannelProperty {
    pub property_id: Uuid,
    /// `"<n>_<type>_<description>"`, e.g. `"112_S_output"`.
    pub identifier: String,
    pub unit: Option<String>,
    pub data_type: DataType,
    pub value_format: Option<String>,
    pub value_invalid: Option<String>,
    pub queryable: bool,
    pub settable: bool,
}
