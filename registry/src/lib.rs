//! In-memory registry of Shelly devices, blocks, sensors and attributes
//! (spec §4.1). Mirrors the shape of `app/core/src/devices.rs`'s `Devices`
//! table, split into one store per record kind and fronted by a single
//! [`Registries`] facade that owns the cascade-delete and tick orchestration.

pub mod events;
pub mod model;
pub mod records;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use uuid::Uuid;

use eventbus::EventBus;

pub use model::{
    AttributesRegistry, BlocksRegistry, CommandsRegistry, DeviceUpsert, DevicesRegistry,
    SensorUpsert, SensorsRegistry,
};
pub use records::{
    AttributeRecord, BlockRecord, CommandRecord, DeviceRecord, SensorRecord,
    DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_LOST_TIMEOUT_SECS, DEFAULT_SENSOR_TTL_SECS,
    WRITE_RETRY_BUDGET,
};

/// Owns every record store and the event bus they dispatch on. The
/// connector holds one of these for its whole lifetime.
pub struct Registries {
    pub devices: DevicesRegistry,
    pub blocks: BlocksRegistry,
    pub sensors: SensorsRegistry,
    pub attributes: AttributesRegistry,
    pub commands: CommandsRegistry,
    events: Arc<EventBus>,
}

impl Registries {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            devices: DevicesRegistry::new(events.clone()),
            blocks: BlocksRegistry::new(events.clone()),
            sensors: SensorsRegistry::new(events.clone()),
            attributes: AttributesRegistry::new(events.clone()),
            commands: CommandsRegistry::new(),
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Removes a device and everything that hangs off it: its blocks, their
    /// sensors, its attributes, and any in-flight commands (spec §4.1).
    pub fn remove_device(&self, device_id: Uuid) {
        for block_id in self.blocks.remove_for_device(device_id) {
            self.sensors.remove_for_block(block_id);
        }
        self.attributes.remove_for_device(device_id);
        self.commands.clear_for_device(device_id);
        self.devices.remove(device_id);
    }

    /// Drops every record across every store. Used by the connector's
    /// `stop()` and by tests that need a clean slate.
    pub fn reset(&self) {
        self.blocks.reset_all();
        self.sensors.reset_all();
        self.attributes.reset_all();
        self.commands.reset_all();
        self.devices.reset();
    }

    /// Tick entry point for freshness supervision (spec §4.1, §5).
    pub fn check_timeout(&self, now: Instant, lost_timeout: Duration) {
        self.devices.check_timeout(&self.attributes, now, lost_timeout);
    }

    /// Tick entry point for the sensor write-back state machine (spec §4.1,
    /// §8 scenario 5).
    pub fn check_write(&self, now: Instant) -> Vec<events::WriteSensorExpectedValue> {
        self.sensors.check_write(&self.commands, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{AttributeType, ConnectionState, DataType, DescriptionSource, SensorType};

    fn registries() -> Registries {
        Registries::new(Arc::new(EventBus::new()))
    }

    fn upsert_device(registries: &Registries, identifier: &str, source: DescriptionSource) -> DeviceRecord {
        registries.devices.append(DeviceUpsert {
            device_id: None,
            device_identifier: identifier.to_string(),
            device_type: Some("SHSW-1".to_string()),
            mac_address: Some("AA:BB:CC:DD:EE:FF".to_string()),
            firmware_version: Some("1.0".to_string()),
            ip_address: None,
            enabled: true,
            description_source: source,
        })
    }

    #[test]
    fn append_is_idempotent_by_identifier() {
        let registries = registries();
        let first = upsert_device(&registries, "shellyswitch25-ABC", DescriptionSource::Coap);
        let second = upsert_device(&registries, "shellyswitch25-ABC", DescriptionSource::Coap);

        assert_eq!(first.device_id, second.device_id);
        assert_eq!(registries.devices.get_all().len(), 1);
    }

    #[test]
    fn higher_precedence_source_is_not_overwritten_by_lower() {
        let registries = registries();
        let manual = registries.devices.append(DeviceUpsert {
            device_id: None,
            device_identifier: "shellyswitch25-ABC".to_string(),
            device_type: Some("manual-name".to_string()),
            mac_address: None,
            firmware_version: None,
            ip_address: None,
            enabled: true,
            description_source: DescriptionSource::Http,
        });

        let updated = registries.devices.append(DeviceUpsert {
            device_id: Some(manual.device_id),
            device_identifier: "shellyswitch25-ABC".to_string(),
            device_type: Some("coap-name".to_string()),
            mac_address: None,
            firmware_version: None,
            ip_address: None,
            enabled: true,
            description_source: DescriptionSource::Coap,
        });

        assert_eq!(updated.device_type.as_deref(), Some("manual-name"));
    }

    #[test]
    fn cascade_delete_removes_blocks_sensors_and_attributes() {
        let registries = registries();
        let device = upsert_device(&registries, "shellyswitch25-ABC", DescriptionSource::Coap);

        let block = registries.blocks.append(None, device.device_id, 0, "relay".to_string());
        let sensor = registries.sensors.append(SensorUpsert {
            sensor_id: None,
            device_id: device.device_id,
            block_id: block.block_id,
            sensor_identifier: 0,
            sensor_type: SensorType::S,
            description: "output".to_string(),
            unit: None,
            data_type: DataType::Boolean,
            value_format: None,
            value_invalid: None,
            queryable: true,
            settable: true,
        });
        registries
            .attributes
            .append(None, device.device_id, AttributeType::State, Some("connected".to_string()));

        registries.remove_device(device.device_id);

        assert!(registries.devices.get_by_id(device.device_id).is_none());
        assert!(registries.blocks.get_by_id(block.block_id).is_none());
        assert!(registries.sensors.get_by_id(sensor.sensor_id).is_none());
        assert!(registries
            .attributes
            .get_by_type(device.device_id, AttributeType::State)
            .is_none());
    }

    #[test]
    fn check_timeout_marks_stale_device_lost_then_reconnects() {
        let registries = registries();
        let device = upsert_device(&registries, "shellyswitch25-ABC", DescriptionSource::Coap);
        registries.attributes.set_state(device.device_id, ConnectionState::Connected);

        let start = Instant::now();
        registries.devices.record_communication(device.device_id, start);

        let later = start + Duration::from_secs(200);
        registries.check_timeout(later, Duration::from_secs(120));
        assert_eq!(registries.attributes.get_state(device.device_id), Some(ConnectionState::Lost));

        registries.devices.record_communication(device.device_id, later);
        registries.check_timeout(later, Duration::from_secs(120));
        assert_eq!(registries.attributes.get_state(device.device_id), Some(ConnectionState::Connected));
    }

    #[test]
    fn check_write_fires_once_then_retires_on_match() {
        let registries = registries();
        let device = upsert_device(&registries, "shellyswitch25-ABC", DescriptionSource::Coap);
        let block = registries.blocks.append(None, device.device_id, 0, "relay".to_string());
        let sensor = registries.sensors.append(SensorUpsert {
            sensor_id: None,
            device_id: device.device_id,
            block_id: block.block_id,
            sensor_identifier: 0,
            sensor_type: SensorType::S,
            description: "output".to_string(),
            unit: None,
            data_type: DataType::Boolean,
            value_format: None,
            value_invalid: None,
            queryable: true,
            settable: true,
        });

        registries.sensors.set_expected_value(sensor.sensor_id, Some("true".to_string()));

        let t0 = Instant::now();
        let fired = registries.check_write(t0);
        assert_eq!(fired.len(), 1);

        let fired_again = registries.check_write(t0);
        assert!(fired_again.is_empty(), "still within timeout, should not refire");

        registries.sensors.set_actual_value(sensor.sensor_id, Some("true".to_string()), None);
        let fired_after_match = registries.check_write(t0);
        assert!(fired_after_match.is_empty());
        assert!(registries.commands.get(device.device_id, types::CommandKind::WriteSensor).is_none());
    }

    #[test]
    fn check_write_retries_until_budget_exhausted_then_gives_up() {
        let registries = registries();
        let device = upsert_device(&registries, "shellyswitch25-ABC", DescriptionSource::Coap);
        let block = registries.blocks.append(None, device.device_id, 0, "relay".to_string());
        let sensor = registries.sensors.append(SensorUpsert {
            sensor_id: None,
            device_id: device.device_id,
            block_id: block.block_id,
            sensor_identifier: 0,
            sensor_type: SensorType::S,
            description: "output".to_string(),
            unit: None,
            data_type: DataType::Boolean,
            value_format: None,
            value_invalid: None,
            queryable: true,
            settable: true,
        });

        registries.sensors.set_expected_value(sensor.sensor_id, Some("true".to_string()));

        let mut now = Instant::now();
        registries.check_write(now);

        for _ in 0..(WRITE_RETRY_BUDGET as u32) {
            now += Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS + 1);
            registries.check_write(now);
        }

        assert!(registries.commands.get(device.device_id, types::CommandKind::WriteSensor).is_none());
        let final_sensor = registries.sensors.get_by_id(sensor.sensor_id).unwrap();
        assert!(final_sensor.expected_value.is_none());
    }
}
