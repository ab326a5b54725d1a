//! Turns a validated Gen1 payload into registry mutations (spec §4.3).
//!
//! Each `apply_*` function is a tagged-variant decoder per §9's redesign
//! note: no dynamic field lookup survives past this module, only typed
//! matches on a parsed [`serde_json::Value`].

use std::{net::IpAddr, str::FromStr, time::Instant};

use serde_json::Value;

use registry::{DeviceUpsert, Registries, SensorUpsert};
use types::{AttributeType, DataType, DescriptionSource, SensorType, SensorUnit};

const CANONICAL_RELAY_SENSOR: i64 = 112;
const CANONICAL_METER_POWER_SENSOR: i64 = 111;
const CANONICAL_METER_ENERGY_SENSOR: i64 = 113;
const CANONICAL_INPUT_SENSOR: i64 = 118;
const CANONICAL_TMP_BLOCK: i64 = 3;
const CANONICAL_TMP_SENSOR: i64 = 3101;
const CANONICAL_HUM_SENSOR: i64 = 3103;

pub fn apply_coap_description(
    registries: &Registries,
    device_identifier: &str,
    device_type: &str,
    device_ip: Option<IpAddr>,
    payload: &Value,
    now: Instant,
) {
    let device = registries.devices.append(DeviceUpsert {
        device_id: None,
        device_identifier: device_identifier.to_string(),
        device_type: Some(device_type.to_string()),
        mac_address: None,
        firmware_version: None,
        ip_address: device_ip,
        enabled: true,
        description_source: DescriptionSource::Coap,
    });
    registries.devices.record_communication(device.device_id, now);

    let Some(blocks) = payload.get("blk").and_then(Value::as_array) else {
        log::warn!("coap description for {device_identifier} missing 'blk'");
        return;
    };

    for entry in blocks {
        let (Some(identifier), Some(description)) = (
            entry.get("I").and_then(Value::as_i64),
            entry.get("D").and_then(Value::as_str),
        ) else {
            log::warn!("malformed block entry for {device_identifier}: {entry}");
            continue;
        };

        registries
            .blocks
            .append(None, device.device_id, identifier, description.to_string());
    }

    let Some(sensors) = payload.get("sen").and_then(Value::as_array) else {
        log::warn!("coap description for {device_identifier} missing 'sen'");
        return;
    };

    for entry in sensors {
        apply_sensor_description(registries, device.device_id, entry);
    }
}

fn apply_sensor_description(registries: &Registries, device_id: uuid::Uuid, entry: &Value) {
    let (Some(identifier), Some(tag), Some(description), Some(block_identifier)) = (
        entry.get("I").and_then(Value::as_i64),
        entry.get("T").and_then(Value::as_str),
        entry.get("D").and_then(Value::as_str),
        entry.get("L").and_then(Value::as_i64),
    ) else {
        log::warn!("malformed sensor entry for device {device_id}: {entry}");
        return;
    };

    let Ok(sensor_type) = SensorType::from_str(tag) else {
        log::warn!("unrecognised sensor type tag '{tag}' for device {device_id}");
        return;
    };

    let Some(block) = registries.blocks.get_by_identifier(device_id, block_identifier) else {
        log::debug!("sensor {identifier} references unknown block {block_identifier}");
        return;
    };

    let unit = entry
        .get("U")
        .and_then(Value::as_str)
        .and_then(|raw| SensorUnit::from_str(raw).ok());

    let data_type = derive_data_type(sensor_type, unit.is_some());

    let range = entry.get("R").and_then(Value::as_str);
    let settable = range.is_some_and(|r| !r.is_empty());

    registries.sensors.append(SensorUpsert {
        sensor_id: None,
        device_id,
        block_id: block.block_id,
        sensor_identifier: identifier,
        sensor_type,
        description: description.to_string(),
        unit,
        data_type,
        value_format: range.map(str::to_string),
        value_invalid: entry.get("Lvl").and_then(Value::as_str).map(str::to_string),
        queryable: true,
        settable,
    });
}

/// Maps a Shelly sensor tag to a structural data type (spec §4.3).
fn derive_data_type(sensor_type: SensorType, has_unit: bool) -> DataType {
    match sensor_type {
        SensorType::S if has_unit => DataType::Float,
        SensorType::S => DataType::Enum,
        SensorType::I => DataType::Integer,
        SensorType::B if has_unit => DataType::Float,
        SensorType::B => DataType::Integer,
        SensorType::A => DataType::Boolean,
        SensorType::Ev | SensorType::Evc => DataType::Enum,
        SensorType::T | SensorType::L | SensorType::C | SensorType::E => DataType::Float,
    }
}

pub fn apply_coap_status(registries: &Registries, device_identifier: &str, payload: &Value, now: Instant) {
    let Some(device) = registries.devices.get_by_identifier(device_identifier) else {
        log::debug!("status frame for unknown device {device_identifier}");
        return;
    };

    let Some(entries) = payload.get("G").and_then(Value::as_array) else {
        return;
    };

    for entry in entries {
        let Some(triple) = entry.as_array() else {
            continue;
        };

        let Some(sensor_identifier) = triple.get(1).and_then(Value::as_i64) else {
            continue;
        };

        let Some(sensor) = registries
            .sensors
            .get_by_identifier(device.device_id, sensor_identifier)
        else {
            log::debug!("status frame references unknown sensor {sensor_identifier} on {device_identifier}");
            continue;
        };

        let raw_value = triple.get(2);
        let formatted = raw_value.and_then(|v| format_value(v, sensor.data_type));

        let valid_till = now + std::time::Duration::from_secs(sensor.ttl_secs());
        registries.sensors.set_actual_value(sensor.sensor_id, formatted, Some(valid_till));
    }

    registries.devices.record_communication(device.device_id, now);
}

pub fn apply_http_shelly(
    registries: &Registries,
    device_identifier: &str,
    device_ip: Option<IpAddr>,
    payload: &Value,
    now: Instant,
) {
    let device_type = payload.get("type").and_then(Value::as_str).map(str::to_string);
    let mac = payload.get("mac").and_then(Value::as_str).map(str::to_string);
    let fw = payload.get("fw").and_then(Value::as_str).map(str::to_string);

    let device = registries.devices.append(DeviceUpsert {
        device_id: None,
        device_identifier: device_identifier.to_string(),
        device_type: device_type.clone(),
        mac_address: mac.clone(),
        firmware_version: fw.clone(),
        ip_address: device_ip,
        enabled: true,
        description_source: DescriptionSource::Http,
    });
    registries.devices.record_communication(device.device_id, now);

    if let Some(mac) = mac {
        registries.attributes.append(None, device.device_id, AttributeType::MacAddress, Some(mac));
    }
    if let Some(fw) = fw {
        registries
            .attributes
            .append(None, device.device_id, AttributeType::FirmwareVersion, Some(fw));
    }
    if let Some(device_type) = device_type {
        registries.attributes.append(None, device.device_id, AttributeType::Model, Some(device_type));
    }
}

pub fn apply_http_status(registries: &Registries, device_identifier: &str, payload: &Value, now: Instant) {
    let Some(device) = registries.devices.get_by_identifier(device_identifier) else {
        log::debug!("HTTP status for unknown device {device_identifier}");
        return;
    };

    if let Some(relays) = payload.get("relays").and_then(Value::as_array) {
        for (index, relay) in relays.iter().enumerate() {
            let value = relay.get("ison").and_then(Value::as_bool).map(bool_string);
            set_canonical(registries, device.device_id, index as i64, CANONICAL_RELAY_SENSOR, value, now);
        }
    }

    // "lights" follow the relay output schema on Gen1 devices; no distinct
    // canonical ids are documented for it.
    if let Some(lights) = payload.get("lights").and_then(Value::as_array) {
        for (index, light) in lights.iter().enumerate() {
            let value = light.get("ison").and_then(Value::as_bool).map(bool_string);
            set_canonical(registries, device.device_id, index as i64, CANONICAL_RELAY_SENSOR, value, now);
        }
    }

    if let Some(meters) = payload.get("meters").and_then(Value::as_array) {
        for (index, meter) in meters.iter().enumerate() {
            let power = meter.get("power").and_then(Value::as_f64).map(|v| v.to_string());
            set_canonical(registries, device.device_id, index as i64, CANONICAL_METER_POWER_SENSOR, power, now);

            let energy = meter.get("total").and_then(Value::as_f64).map(|v| v.to_string());
            set_canonical(registries, device.device_id, index as i64, CANONICAL_METER_ENERGY_SENSOR, energy, now);
        }
    }

    if let Some(inputs) = payload.get("inputs").and_then(Value::as_array) {
        for (index, input) in inputs.iter().enumerate() {
            let value = input.get("input").and_then(Value::as_i64).map(|v| v.to_string());
            set_canonical(registries, device.device_id, index as i64, CANONICAL_INPUT_SENSOR, value, now);
        }
    }

    if let Some(tmp) = payload.get("tmp") {
        let value = tmp.get("tC").and_then(Value::as_f64).map(|v| v.to_string());
        set_canonical(registries, device.device_id, CANONICAL_TMP_BLOCK, CANONICAL_TMP_SENSOR, value, now);
    }

    if let Some(hum) = payload.get("hum") {
        let value = hum.get("value").and_then(Value::as_f64).map(|v| v.to_string());
        set_canonical(registries, device.device_id, CANONICAL_TMP_BLOCK, CANONICAL_HUM_SENSOR, value, now);
    }

    registries.devices.record_communication(device.device_id, now);
}

fn set_canonical(
    registries: &Registries,
    device_id: uuid::Uuid,
    block_identifier: i64,
    sensor_identifier: i64,
    value: Option<String>,
    now: Instant,
) {
    let Some(sensor) = registries.sensors.get_by_identifier(device_id, sensor_identifier) else {
        log::debug!(
            "HTTP status references unregistered canonical sensor ({block_identifier}, {sensor_identifier})"
        );
        return;
    };

    let valid_till = now + std::time::Duration::from_secs(sensor.ttl_secs());
    registries.sensors.set_actual_value(sensor.sensor_id, value, Some(valid_till));
}

fn bool_string(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

/// Normalises a raw JSON scalar to its stored string representation per
/// `sensor`'s structural [`DataType`] (spec §4.3's numeric semantics).
fn format_value(value: &Value, data_type: DataType) -> Option<String> {
    match data_type {
        DataType::Boolean => match value {
            Value::Bool(b) => Some(bool_string(*b)),
            Value::Number(n) => n.as_i64().map(|n| bool_string(n != 0)),
            _ => None,
        },
        DataType::Integer => value.as_i64().map(|n| n.to_string()),
        DataType::Float => value.as_f64().map(|n| n.to_string()),
        DataType::Enum => {
            let raw = value.as_str().map(str::to_string).or_else(|| value.as_i64().map(|n| n.to_string()))?;
            Some(types::normalize_enum_value(&raw).map(str::to_string).unwrap_or(raw))
        }
        DataType::String => value.as_str().map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventbus::EventBus;
    use std::sync::Arc;

    fn registries() -> Registries {
        Registries::new(Arc::new(EventBus::new()))
    }

    fn description_payload() -> Value {
        serde_json::from_str(
            r#"{"blk":[{"I":0,"D":"relay_0"}],"sen":[{"I":112,"T":"S","D":"output","R":"0/1","L":0}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn coap_description_creates_device_block_and_sensor() {
        let registries = registries();
        apply_coap_description(&registries, "abcdef123456", "shsw-25", None, &description_payload(), Instant::now());

        let device = registries.devices.get_by_identifier("abcdef123456").unwrap();
        assert_eq!(device.device_type.as_deref(), Some("shsw-25"));

        let block = registries.blocks.get_by_identifier(device.device_id, 0).unwrap();
        assert_eq!(block.block_description, "relay_0");

        let sensor = registries.sensors.get_by_identifier(device.device_id, 112).unwrap();
        assert_eq!(sensor.description, "output");
        assert!(sensor.settable);
    }

    #[test]
    fn coap_status_sets_actual_value_and_is_idempotent() {
        let registries = registries();
        apply_coap_description(&registries, "abcdef123456", "shsw-25", None, &description_payload(), Instant::now());

        let status: Value = serde_json::from_str(r#"{"G":[[0,112,1]]}"#).unwrap();
        let now = Instant::now();
        apply_coap_status(&registries, "abcdef123456", &status, now);

        let device = registries.devices.get_by_identifier("abcdef123456").unwrap();
        let sensor = registries.sensors.get_by_identifier(device.device_id, 112).unwrap();
        assert_eq!(sensor.actual_value.as_deref(), Some("1"));

        let changed = registries.sensors.set_actual_value(sensor.sensor_id, Some("1".to_string()), Some(now));
        assert!(!changed, "re-applying the same value must not report a change");
    }

    #[test]
    fn coap_status_skips_unknown_sensor() {
        let registries = registries();
        apply_coap_description(&registries, "abcdef123456", "shsw-25", None, &description_payload(), Instant::now());

        let status: Value = serde_json::from_str(r#"{"G":[[0,999,1]]}"#).unwrap();
        apply_coap_status(&registries, "abcdef123456", &status, Instant::now());
    }

    #[test]
    fn http_shelly_sets_mac_firmware_and_model_attributes() {
        let registries = registries();
        let payload: Value = serde_json::from_str(r#"{"type":"SHSW-1","mac":"AABBCC","fw":"1.2.3"}"#).unwrap();
        apply_http_shelly(&registries, "aabbcc", None, &payload, Instant::now());

        let device = registries.devices.get_by_identifier("aabbcc").unwrap();
        assert_eq!(device.mac_address.as_deref(), Some("AABBCC"));
        assert_eq!(
            registries
                .attributes
                .get_by_type(device.device_id, AttributeType::FirmwareVersion)
                .and_then(|a| a.value),
            Some("1.2.3".to_string())
        );
    }

    #[test]
    fn http_status_maps_relays_to_canonical_sensor() {
        let registries = registries();
        apply_coap_description(&registries, "abcdef123456", "shsw-25", None, &description_payload(), Instant::now());

        let payload: Value = serde_json::from_str(r#"{"relays":[{"ison":true}]}"#).unwrap();
        apply_http_status(&registries, "abcdef123456", &payload, Instant::now());

        let device = registries.devices.get_by_identifier("abcdef123456").unwrap();
        let sensor = registries.sensors.get_by_identifier(device.device_id, 112).unwrap();
        assert_eq!(sensor.actual_value.as_deref(), Some("true"));
    }

    #[test]
    fn coap_description_counts_as_communication() {
        let registries = registries();
        let now = Instant::now();
        apply_coap_description(&registries, "abcdef123456", "shsw-25", None, &description_payload(), now);

        let device = registries.devices.get_by_identifier("abcdef123456").unwrap();
        registries.check_timeout(now, std::time::Duration::from_secs(120));
        assert_ne!(
            registries.attributes.get_state(device.device_id),
            Some(types::ConnectionState::Lost),
            "a device just described must not be marked lost before its timeout elapses"
        );
    }

    #[test]
    fn http_shelly_counts_as_communication() {
        let registries = registries();
        let now = Instant::now();
        let payload: Value = serde_json::from_str(r#"{"type":"SHSW-1","mac":"AABBCC","fw":"1.2.3"}"#).unwrap();
        apply_http_shelly(&registries, "aabbcc", None, &payload, now);

        let device = registries.devices.get_by_identifier("aabbcc").unwrap();
        assert_eq!(device.last_communication_at, Some(now));
    }
}
