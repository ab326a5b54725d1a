//! Owning stores for the four registry record kinds (spec §4.1).
//!
//! Each store is confined to the connector's tick thread (spec §5); the
//! `RwLock`s here guard against accidental misuse rather than real
//! contention, the same role `parking_lot::RwLock` plays in
//! `app/core/src/devices.rs`'s `Devices` table.

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use uuid::Uuid;

use types::{AttributeType, CommandKind, ConnectionState, DataType, DescriptionSource, SensorType, SensorUnit};

use eventbus::EventBus;

use crate::{
    events,
    records::{
        AttributeRecord, BlockRecord, CommandRecord, DeviceRecord, SensorRecord,
        DEFAULT_COMMAND_TIMEOUT_SECS, WRITE_RETRY_BUDGET,
    },
};

/// Parameters for [`DevicesRegistry::append`].
#[derive(Debug, Clone)]
pub struct DeviceUpsert {
    pub device_id: Option<Uuid>,
    pub device_identifier: String,
    pub device_type: Option<String>,
    pub mac_address: Option<String>,
    pub firmware_version: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub enabled: bool,
    pub description_source: DescriptionSource,
}

pub struct DevicesRegistry {
    store: RwLock<HashMap<Uuid, DeviceRecord>>,
    by_identifier: RwLock<HashMap<String, Uuid>>,
    events: Arc<EventBus>,
}

impl DevicesRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            by_identifier: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Idempotent create-or-update. Fields carried by a lower-precedence
    /// `description_source` than what the record already has never
    /// overwrite fields the higher source already populated (spec §3).
    pub fn append(&self, upsert: DeviceUpsert) -> DeviceRecord {
        let mut store = self.store.write();
        let mut by_identifier = self.by_identifier.write();

        let existing_id = upsert
            .device_id
            .filter(|id| store.contains_key(id))
            .or_else(|| by_identifier.get(&upsert.device_identifier).copied());

        let record = if let Some(id) = existing_id {
            let existing = store.get(&id).expect("indexed record must exist");
            let may_overwrite = upsert.description_source >= existing.description_source;

            DeviceRecord {
                device_id: id,
                device_identifier: upsert.device_identifier.clone(),
                device_type: pick(may_overwrite, &existing.device_type, upsert.device_type),
                mac_address: pick(may_overwrite, &existing.mac_address, upsert.mac_address),
                firmware_version: pick(
                    may_overwrite,
                    &existing.firmware_version,
                    upsert.firmware_version,
                ),
                ip_address: pick(may_overwrite, &existing.ip_address, upsert.ip_address),
                enabled: upsert.enabled,
                description_source: existing.description_source.max(upsert.description_source),
                last_communication_at: existing.last_communication_at,
            }
        } else {
            DeviceRecord {
                device_id: upsert.device_id.unwrap_or_else(Uuid::new_v4),
                device_identifier: upsert.device_identifier.clone(),
                device_type: upsert.device_type,
                mac_address: upsert.mac_address,
                firmware_version: upsert.firmware_version,
                ip_address: upsert.ip_address,
                enabled: upsert.enabled,
                description_source: upsert.description_source,
                last_communication_at: None,
            }
        };

        by_identifier.insert(record.device_identifier.clone(), record.device_id);
        store.insert(record.device_id, record.clone());

        drop(store);
        drop(by_identifier);

        self.events.dispatch(
            events::DEVICE_CREATED_OR_UPDATED,
            &events::DeviceCreatedOrUpdated {
                record: record.clone(),
            },
        );

        record
    }

    pub fn get_by_id(&self, device_id: Uuid) -> Option<DeviceRecord> {
        self.store.read().get(&device_id).cloned()
    }

    pub fn get_by_identifier(&self, identifier: &str) -> Option<DeviceRecord> {
        let id = *self.by_identifier.read().get(identifier)?;
        self.get_by_id(id)
    }

    pub fn get_all(&self) -> Vec<DeviceRecord> {
        self.store.read().values().cloned().collect()
    }

    /// Idempotent; removing an unknown id is a no-op.
    pub fn remove(&self, device_id: Uuid) {
        if let Some(record) = self.store.write().remove(&device_id) {
            self.by_identifier.write().remove(&record.device_identifier);
        }
    }

    pub fn reset(&self) {
        self.store.write().clear();
        self.by_identifier.write().clear();
    }

    /// Bumps the freshness clock for a device; called whenever any frame
    /// attributable to it is processed.
    pub fn record_communication(&self, device_id: Uuid, now: Instant) {
        if let Some(record) = self.store.write().get_mut(&device_id) {
            record.last_communication_at = Some(now);
        }
    }

    /// For every enabled device whose last traffic predates `lost_timeout`,
    /// transitions its STATE attribute to `Lost`; when traffic resumes,
    /// transitions it back to `Connected` (spec §4.1).
    pub fn check_timeout(&self, attributes: &AttributesRegistry, now: Instant, lost_timeout: Duration) {
        let devices = self.get_all();

        for device in devices {
            if !device.enabled {
                continue;
            }

            let timed_out = match device.last_communication_at {
                Some(last) => now.saturating_duration_since(last) >= lost_timeout,
                None => true,
            };

            let current_state = attributes.get_state(device.device_id);

            if timed_out {
                if current_state != Some(ConnectionState::Lost) {
                    log::warn!("device {} timed out, marking lost", device.device_identifier);
                    attributes.set_state(device.device_id, ConnectionState::Lost);
                }
            } else if current_state == Some(ConnectionState::Lost) {
                log::info!("device {} resumed, marking connected", device.device_identifier);
                attributes.set_state(device.device_id, ConnectionState::Connected);
            }
        }
    }
}

fn pick<T: Clone>(may_overwrite: bool, existing: &Option<T>, incoming: Option<T>) -> Option<T> {
    if incoming.is_some() && (may_overwrite || existing.is_none()) {
        incoming
    } else {
        existing.clone()
    }
}

pub struct BlocksRegistry {
    store: RwLock<HashMap<Uuid, BlockRecord>>,
    by_device_and_identifier: RwLock<HashMap<(Uuid, i64), Uuid>>,
    events: Arc<EventBus>,
}

impl BlocksRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            by_device_and_identifier: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn append(
        &self,
        block_id: Option<Uuid>,
        device_id: Uuid,
        block_identifier: i64,
        block_description: String,
    ) -> BlockRecord {
        let mut store = self.store.write();
        let mut index = self.by_device_and_identifier.write();

        let key = (device_id, block_identifier);
        let existing_id = block_id
            .filter(|id| store.contains_key(id))
            .or_else(|| index.get(&key).copied());

        let record = BlockRecord {
            block_id: existing_id.or(block_id).unwrap_or_else(Uuid::new_v4),
            device_id,
            block_identifier,
            block_description,
        };

        index.insert(key, record.block_id);
        store.insert(record.block_id, record.clone());

        drop(store);
        drop(index);

        self.events.dispatch(
            events::BLOCK_CREATED_OR_UPDATED,
            &events::BlockCreatedOrUpdated {
                record: record.clone(),
            },
        );

        record
    }

    pub fn get_by_id(&self, block_id: Uuid) -> Option<BlockRecord> {
        self.store.read().get(&block_id).cloned()
    }

    pub fn get_by_identifier(&self, device_id: Uuid, block_identifier: i64) -> Option<BlockRecord> {
        let id = *self
            .by_device_and_identifier
            .read()
            .get(&(device_id, block_identifier))?;
        self.get_by_id(id)
    }

    pub fn get_all_by_device(&self, device_id: Uuid) -> Vec<BlockRecord> {
        self.store
            .read()
            .values()
            .filter(|b| b.device_id == device_id)
            .cloned()
            .collect()
    }

    pub fn remove(&self, block_id: Uuid) {
        if let Some(record) = self.store.write().remove(&block_id) {
            self.by_device_and_identifier
                .write()
                .remove(&(record.device_id, record.block_identifier));
        }
    }

    /// Removes every block belonging to `device_id`, returning their ids so
    /// the caller can cascade into dependent sensors.
    pub fn remove_for_device(&self, device_id: Uuid) -> Vec<Uuid> {
        let ids: Vec<Uuid> = self.get_all_by_device(device_id).into_iter().map(|b| b.block_id).collect();
        for id in &ids {
            self.remove(*id);
        }
        ids
    }

    pub fn reset_all(&self) {
        self.store.write().clear();
        self.by_device_and_identifier.write().clear();
    }

    pub fn reset_for_device(&self, device_id: Uuid) {
        self.remove_for_device(device_id);
    }
}

pub struct SensorsRegistry {
    store: RwLock<HashMap<Uuid, SensorRecord>>,
    by_device_and_identifier: RwLock<HashMap<(Uuid, i64), Uuid>>,
    by_block: RwLock<HashMap<Uuid, Vec<Uuid>>>,
    events: Arc<EventBus>,
}

/// Parameters for [`SensorsRegistry::append`].
#[derive(Debug, Clone)]
pub struct SensorUpsert {
    pub sensor_id: Option<Uuid>,
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
}

impl SensorsRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            by_device_and_identifier: RwLock::new(HashMap::new()),
            by_block: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn append(&self, upsert: SensorUpsert) -> SensorRecord {
        let mut store = self.store.write();
        let mut index = self.by_device_and_identifier.write();
        let mut by_block = self.by_block.write();

        let key = (upsert.device_id, upsert.sensor_identifier);
        let existing_id = upsert
            .sensor_id
            .filter(|id| store.contains_key(id))
            .or_else(|| index.get(&key).copied());

        let existing_record = existing_id.and_then(|id| store.get(&id).cloned());

        let (actual_value, expected_value, value_valid_till, expected_pending) = existing_record
            .as_ref()
            .map(|r| (r.actual_value.clone(), r.expected_value.clone(), r.value_valid_till, r.expected_pending))
            .unwrap_or((None, None, None, false));

        let settable = upsert.settable;
        let expected_value = if settable { expected_value } else { None };

        let record = SensorRecord {
            sensor_id: existing_id.or(upsert.sensor_id).unwrap_or_else(Uuid::new_v4),
            device_id: upsert.device_id,
            block_id: upsert.block_id,
            sensor_identifier: upsert.sensor_identifier,
            sensor_type: upsert.sensor_type,
            description: upsert.description,
            unit: upsert.unit,
            data_type: upsert.data_type,
            value_format: upsert.value_format,
            value_invalid: upsert.value_invalid,
            queryable: upsert.queryable,
            settable,
            actual_value,
            expected_value,
            value_valid_till,
            expected_pending,
        };

        index.insert(key, record.sensor_id);

        // Only index newly created sensors into the block; a re-append of an
        // already-present sensor (periodic re-description) must not push its
        // id again. If the sensor moved to a different block, re-home it.
        match existing_record.as_ref() {
            None => by_block.entry(record.block_id).or_default().push(record.sensor_id),
            Some(old) if old.block_id != record.block_id => {
                if let Some(list) = by_block.get_mut(&old.block_id) {
                    list.retain(|id| *id != record.sensor_id);
                }
                by_block.entry(record.block_id).or_default().push(record.sensor_id);
            }
            Some(_) => {}
        }

        store.insert(record.sensor_id, record.clone());

        drop(store);
        drop(index);
        drop(by_block);

        self.events.dispatch(
            events::SENSOR_CREATED_OR_UPDATED,
            &events::SensorCreatedOrUpdated {
                record: record.clone(),
            },
        );

        record
    }

    pub fn get_by_id(&self, sensor_id: Uuid) -> Option<SensorRecord> {
        self.store.read().get(&sensor_id).cloned()
    }

    pub fn get_by_identifier(&self, device_id: Uuid, sensor_identifier: i64) -> Option<SensorRecord> {
        let id = *self
            .by_device_and_identifier
            .read()
            .get(&(device_id, sensor_identifier))?;
        self.get_by_id(id)
    }

    pub fn get_all_by_block(&self, block_id: Uuid) -> Vec<SensorRecord> {
        let store = self.store.read();
        self.by_block
            .read()
            .get(&block_id)
            .into_iter()
            .flatten()
            .filter_map(|id| store.get(id).cloned())
            .collect()
    }

    pub fn remove(&self, sensor_id: Uuid) {
        if let Some(record) = self.store.write().remove(&sensor_id) {
            self.by_device_and_identifier
                .write()
                .remove(&(record.device_id, record.sensor_identifier));

            if let Some(list) = self.by_block.write().get_mut(&record.block_id) {
                list.retain(|id| *id != sensor_id);
            }
        }
    }

    pub fn remove_for_block(&self, block_id: Uuid) {
        let ids = self.by_block.write().remove(&block_id).unwrap_or_default();
        for id in ids {
            self.remove(id);
        }
    }

    /// Sets the live measurement. Emits
    /// [`events::SENSOR_ACTUAL_VALUE_UPDATED`] iff the normalised value
    /// differs from what was stored (spec §4.1).
    pub fn set_actual_value(&self, sensor_id: Uuid, value: Option<String>, valid_till: Option<Instant>) -> bool {
        let mut store = self.store.write();
        let Some(record) = store.get_mut(&sensor_id) else {
            log::debug!("set_actual_value for unregistered sensor {}", sensor_id);
            return false;
        };

        let changed = record.actual_value != value;
        record.actual_value = value;
        record.value_valid_till = valid_till;
        let snapshot = record.clone();
        drop(store);

        if changed {
            self.events.dispatch(
                events::SENSOR_ACTUAL_VALUE_UPDATED,
                &events::SensorActualValueUpdated { record: snapshot },
            );
        }

        changed
    }

    /// Requests a new value to be written out to the device. Resets the
    /// in-flight flag when the requested value actually changes, so a
    /// superseding write is not blocked behind a stale pending one.
    pub fn set_expected_value(&self, sensor_id: Uuid, value: Option<String>) {
        let mut store = self.store.write();
        let Some(record) = store.get_mut(&sensor_id) else {
            log::debug!("set_expected_value for unregistered sensor {}", sensor_id);
            return;
        };

        if !record.settable {
            log::warn!("ignoring expected value for non-settable sensor {}", sensor_id);
            return;
        }

        if record.expected_value != value {
            record.expected_value = value;
            record.expected_pending = false;
        }
    }

    pub fn get_all(&self) -> Vec<SensorRecord> {
        self.store.read().values().cloned().collect()
    }

    pub fn reset_all(&self) {
        self.store.write().clear();
        self.by_device_and_identifier.write().clear();
        self.by_block.write().clear();
    }

    pub fn reset_for_block(&self, block_id: Uuid) {
        self.remove_for_block(block_id);
    }

    /// Scans for sensors with a pending write request and dispatches one
    /// [`events::WRITE_SENSOR_EXPECTED_VALUE`] per sensor per tick, subject
    /// to the retry budget (spec §4.1, §8 scenario 5).
    pub fn check_write(&self, commands: &CommandsRegistry, now: Instant) -> Vec<events::WriteSensorExpectedValue> {
        let mut fired = Vec::new();
        let mut store = self.store.write();

        for sensor in store.values_mut() {
            if sensor.expected_value.is_none() || !sensor.settable {
                continue;
            }

            if sensor.expected_value == sensor.actual_value {
                if sensor.expected_pending {
                    sensor.expected_pending = false;
                    commands.clear(sensor.device_id, CommandKind::WriteSensor);
                }
                continue;
            }

            if sensor.expected_pending {
                match commands.get(sensor.device_id, CommandKind::WriteSensor) {
                    Some(cmd) if now < cmd.timeout_deadline => continue,
                    Some(cmd) if cmd.retries + 1 >= WRITE_RETRY_BUDGET => {
                        log::error!(
                            "write retry budget exhausted for sensor {}, giving up",
                            sensor.sensor_id
                        );
                        commands.clear(sensor.device_id, CommandKind::WriteSensor);
                        sensor.expected_pending = false;
                        sensor.expected_value = None;
                        continue;
                    }
                    Some(_) => {
                        log::warn!("write command timed out for sensor {}, retrying", sensor.sensor_id);
                        commands.bump_retry(sensor.device_id, CommandKind::WriteSensor, now);
                        sensor.expected_pending = false;
                    }
                    None => {
                        sensor.expected_pending = false;
                    }
                }
            }

            sensor.expected_pending = true;
            commands.start_or_coalesce(
                sensor.device_id,
                CommandKind::WriteSensor,
                Some(sensor.sensor_id.to_string()),
                now,
                Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            );

            fired.push(events::WriteSensorExpectedValue {
                sensor_id: sensor.sensor_id,
            });
        }

        drop(store);

        for event in &fired {
            self.events.dispatch(events::WRITE_SENSOR_EXPECTED_VALUE, event);
        }

        fired
    }
}

pub struct AttributesRegistry {
    store: RwLock<HashMap<Uuid, AttributeRecord>>,
    by_device_and_type: RwLock<HashMap<(Uuid, AttributeType), Uuid>>,
    events: Arc<EventBus>,
}

impl AttributesRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            by_device_and_type: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn append(
        &self,
        attribute_id: Option<Uuid>,
        device_id: Uuid,
        attribute_type: AttributeType,
        value: Option<String>,
    ) -> AttributeRecord {
        let mut store = self.store.write();
        let mut index = self.by_device_and_type.write();

        let key = (device_id, attribute_type);
        let existing_id = attribute_id
            .filter(|id| store.contains_key(id))
            .or_else(|| index.get(&key).copied());

        let record = AttributeRecord {
            attribute_id: existing_id.or(attribute_id).unwrap_or_else(Uuid::new_v4),
            device_id,
            attribute_type,
            value,
        };

        index.insert(key, record.attribute_id);
        store.insert(record.attribute_id, record.clone());

        drop(store);
        drop(index);

        self.events.dispatch(
            events::ATTRIBUTE_CREATED_OR_UPDATED,
            &events::AttributeCreatedOrUpdated {
                record: record.clone(),
            },
        );

        record
    }

    pub fn get_by_id(&self, attribute_id: Uuid) -> Option<AttributeRecord> {
        self.store.read().get(&attribute_id).cloned()
    }

    pub fn get_by_type(&self, device_id: Uuid, attribute_type: AttributeType) -> Option<AttributeRecord> {
        let id = *self.by_device_and_type.read().get(&(device_id, attribute_type))?;
        self.get_by_id(id)
    }

    pub fn get_all_by_device(&self, device_id: Uuid) -> Vec<AttributeRecord> {
        self.store
            .read()
            .values()
            .filter(|a| a.device_id == device_id)
            .cloned()
            .collect()
    }

    pub fn get_all_by_type(&self, attribute_type: AttributeType) -> Vec<AttributeRecord> {
        self.store
            .read()
            .values()
            .filter(|a| a.attribute_type == attribute_type)
            .cloned()
            .collect()
    }

    /// Sets a value, emitting [`events::ATTRIBUTE_ACTUAL_VALUE_UPDATED`] iff
    /// it differs from what was stored (spec §4.1).
    pub fn set_value(&self, attribute_id: Uuid, value: Option<String>) -> bool {
        let mut store = self.store.write();
        let Some(record) = store.get_mut(&attribute_id) else {
            log::debug!("set_value for unregistered attribute {}", attribute_id);
            return false;
        };

        let changed = record.value != value;
        record.value = value;
        let snapshot = record.clone();
        drop(store);

        if changed {
            self.events.dispatch(
                events::ATTRIBUTE_ACTUAL_VALUE_UPDATED,
                &events::AttributeActualValueUpdated { record: snapshot },
            );
        }

        changed
    }

    pub fn get_state(&self, device_id: Uuid) -> Option<ConnectionState> {
        self.get_by_type(device_id, AttributeType::State)?
            .value
            .and_then(|v| v.parse().ok())
    }

    /// Ensures the STATE attribute exists for `device_id`, then sets it.
    pub fn set_state(&self, device_id: Uuid, state: ConnectionState) {
        let attribute_id = self
            .get_by_type(device_id, AttributeType::State)
            .map(|a| a.attribute_id)
            .unwrap_or_else(|| {
                self.append(None, device_id, AttributeType::State, None).attribute_id
            });

        self.set_value(attribute_id, Some(state.to_string()));
    }

    pub fn remove(&self, attribute_id: Uuid) {
        if let Some(record) = self.store.write().remove(&attribute_id) {
            self.by_device_and_type
                .write()
                .remove(&(record.device_id, record.attribute_type));
        }
    }

    pub fn remove_for_device(&self, device_id: Uuid) {
        let ids: Vec<Uuid> = self
            .get_all_by_device(device_id)
            .into_iter()
            .map(|a| a.attribute_id)
            .collect();

        for id in ids {
            self.remove(id);
        }
    }

    pub fn reset_all(&self) {
        self.store.write().clear();
        self.by_device_and_type.write().clear();
    }

    pub fn reset_for_device(&self, device_id: Uuid) {
        self.remove_for_device(device_id);
    }
}

pub struct CommandsRegistry {
    store: RwLock<HashMap<(Uuid, CommandKind), CommandRecord>>,
}

impl Default for CommandsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandsRegistry {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, device_id: Uuid, kind: CommandKind) -> Option<CommandRecord> {
        self.store.read().get(&(device_id, kind)).cloned()
    }

    /// Starts tracking a new in-flight command, or refreshes `sent_at` if
    /// one is already in flight for this key (spec §3: "a second request
    /// coalesces rather than duplicating").
    pub fn start_or_coalesce(
        &self,
        device_id: Uuid,
        kind: CommandKind,
        context: Option<String>,
        now: Instant,
        timeout: Duration,
    ) {
        let mut store = self.store.write();
        let entry = store.entry((device_id, kind)).or_insert_with(|| CommandRecord {
            device_id,
            command_kind: kind,
            sent_at: now,
            timeout_deadline: now + timeout,
            context: context.clone(),
            retries: 0,
        });

        entry.sent_at = now;
        entry.timeout_deadline = now + timeout;
        entry.context = context;
    }

    pub fn bump_retry(&self, device_id: Uuid, kind: CommandKind, now: Instant) {
        if let Some(cmd) = self.store.write().get_mut(&(device_id, kind)) {
            cmd.retries += 1;
            cmd.sent_at = now;
            cmd.timeout_deadline = now + Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS);
        }
    }

    pub fn clear(&self, device_id: Uuid, kind: CommandKind) {
        self.store.write().remove(&(device_id, kind));
    }

    pub fn clear_for_device(&self, device_id: Uuid) {
        self.store.write().retain(|(id, _), _| *id != device_id);
    }

    pub fn reset_all(&self) {
        self.store.write().clear();
    }
}
