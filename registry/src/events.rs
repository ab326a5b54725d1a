//! Event bus topic names (spec §6) and the payload types dispatched on them.

use uuid::Uuid;

use crate::records::{AttributeRecord, BlockRecord, DeviceRecord, SensorRecord};

pub const DEVICE_CREATED_OR_UPDATED: &str = "registry.deviceRecordCreatedOrUpdated";
pub const BLOCK_CREATED_OR_UPDATED: &str = "registry.blockRecordCreatedOrUpdated";
pub const SENSOR_CREATED_OR_UPDATED: &str = "registry.sensorRecordCreatedOrUpdated";
pub const ATTRIBUTE_CREATED_OR_UPDATED: &str = "registry.attributeRecordCreatedOrUpdated";
pub const ATTRIBUTE_ACTUAL_VALUE_UPDATED: &str = "registry.attributeRecordActualValueUpdated";
pub const SENSOR_ACTUAL_VALUE_UPDATED: &str = "registry.sensorRecordActualValueUpdated";
pub const WRITE_SENSOR_EXPECTED_VALUE: &str = "registry.writeSensorExpectedValue";

#[derive(Debug, Clone)]
pub struct DeviceCreatedOrUpdated {
    pub record: DeviceRecord,
}

#[derive(Debug, Clone)]
pub struct BlockCreatedOrUpdated {
    pub record: BlockRecord,
}

#[derive(Debug, Clone)]
pub struct SensorCreatedOrUpdated {
    pub record: SensorRecord,
}

#[derive(Debug, Clone)]
pub struct AttributeCreatedOrUpdated {
    pub record: AttributeRecord,
}

#[derive(Debug, Clone)]
pub struct AttributeActualValueUpdated {
    pub record: AttributeRecord,
}

#[derive(Debug, Clone)]
pub struct SensorActualValueUpdated {
    pub record: SensorRecord,
}

#[derive(Debug, Clone, Copy)]
pub struct WriteSensorExpectedValue {
    pub sensor_id: Uuid,
}
