use std::{net::IpAddr, time::Instant};

use types::{AttributeType, CommandKind, DataType, DescriptionSource, SensorType, SensorUnit};
use uuid::Uuid;

/// Default freshness window for a sensor value (spec §4.3).
pub const DEFAULT_SENSOR_TTL_SECS: u64 = 120;

/// Default time after which a device with no traffic is considered lost
/// (spec §4.1).
pub const DEFAULT_LOST_TIMEOUT_SECS: u64 = 120;

/// Default deadline for an in-flight command (spec §4.1, §5).
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 5;

/// Maximum number of retries for a sensor write before giving up until the
/// next tick (spec §4.1).
pub const WRITE_RETRY_BUDGET: u8 = 5;

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_id: Uuid,
    pub device_identifier: String,
    pub device_type: Option<String>,
    pub mac_address: Option<String>,
    pub firmware_version: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub enabled: bool,
    pub description_source: DescriptionSource,
    pub last_communication_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub block_id: Uuid,
    pub device_id: Uuid,
    pub block_identifier: i64,
    pub block_description: String,
}

#[derive(Debug, Clone)]
pub struct SensorRecord {
    pub sensor_id: Uuid,
    pub device_id: Uuid,
    pub block_id: Uuid,
    pub sensor_identifier: i64,
    pub sensor_type: SensorType,
    pub description: String,
    pub unit: Option<SensorUnit>,
    pub data_type: DataType,
    pub value_format: Option<String>,
    pub value_invalid: Option<String>,
    pub queryable: bool,
    pub settable: bool,
    pub actual_value: Option<String>,
    pub expected_value: Option<String>,
    pub value_valid_till: Option<Instant>,
    pub expected_pending: bool,
}

impl SensorRecord {
    /// Seconds a value stays fresh once received (spec §4.3). Currently a
    /// fixed default; left as a method so a later per-sensor TTL override
    /// has somewhere to live without changing every call site.
    pub fn ttl_secs(&self) -> u64 {
        DEFAULT_SENSOR_TTL_SECS
    }
}

#[derive(Debug, Clone)]
pub struct AttributeRecord {
    pub attribute_id: Uuid,
    pub device_id: Uuid,
    pub attribute_type: AttributeType,
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub device_id: Uuid,
    pub command_kind: CommandKind,
    pub sent_at: Instant,
    pub timeout_deadline: Instant,
    pub context: Option<String>,
    pub retries: u8,
}
