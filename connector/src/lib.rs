//! Connector facade: lifecycle, tick loop, write/control entry points
//! (spec §4.7). Grounded on `hylarana/src/lib.rs`'s `Hylarana` struct (one
//! owner, thin entry points) for the shape, and
//! `original_source/.../connector.py` for the exact method set and tick
//! ordering.

pub mod identifiers;
pub mod manual;
pub mod persistence;

use std::{
    net::SocketAddr,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use thiserror::Error;
use uuid::Uuid;

use coap::{CoapClient, CoapClientError};
use eventbus::EventBus;
use receiver::Receiver;
use registry::{events as registry_events, AttributeRecord, DeviceUpsert, Registries, SensorUpsert};
use types::{AttributeType, ConnectionState, ControlAction, DescriptionSource, SensorType};

use manual::ManualDevice;
use persistence::{LoggingPersistenceListener, PersistenceListener};

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Coap(#[from] CoapClientError),
}

pub struct Connector {
    registries: Registries,
    events: Arc<EventBus>,
    receiver: Arc<Receiver>,
    coap: Mutex<Option<Arc<CoapClient>>>,
    stopped: AtomicBool,
    bind_addr: SocketAddr,
    lost_timeout: Duration,
    discovery_interval: Duration,
}

impl Connector {
    pub fn new(
        bind_addr: SocketAddr,
        lost_timeout: Duration,
        discovery_interval: Duration,
        persistence: Arc<dyn PersistenceListener>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        subscribe_persistence(&events, persistence);

        Self {
            registries: Registries::new(events.clone()),
            events,
            receiver: Arc::new(Receiver::new()),
            coap: Mutex::new(None),
            stopped: AtomicBool::new(false),
            bind_addr,
            lost_timeout,
            discovery_interval,
        }
    }

    pub fn with_logging_persistence(bind_addr: SocketAddr, lost_timeout: Duration) -> Self {
        Self::new(
            bind_addr,
            lost_timeout,
            coap::DISCOVERY_INTERVAL,
            Arc::new(LoggingPersistenceListener::new()),
        )
    }

    pub fn with_logging_persistence_and_discovery_interval(
        bind_addr: SocketAddr,
        lost_timeout: Duration,
        discovery_interval: Duration,
    ) -> Self {
        Self::new(bind_addr, lost_timeout, discovery_interval, Arc::new(LoggingPersistenceListener::new()))
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Seeds the registry from persisted (MANUAL-source) devices
    /// (SPEC_FULL.md §10.5). Malformed channel/property identifiers are
    /// logged at WARN and skipped, never abort the whole call.
    pub fn initialize(&self, devices: &[ManualDevice]) {
        self.registries.reset();

        for device in devices {
            self.initialize_device(device);
        }
    }

    fn initialize_device(&self, device: &ManualDevice) {
        let record = self.registries.devices.append(DeviceUpsert {
            device_id: Some(device.device_id),
            device_identifier: device.device_identifier.clone(),
            device_type: device.device_type.clone(),
            mac_address: None,
            firmware_version: None,
            ip_address: device.ip_address,
            enabled: device.enabled,
            description_source: DescriptionSource::Manual,
        });

        for property in &device.properties {
            self.initialize_device_property(record.device_id, property);
        }

        for channel in &device.channels {
            self.initialize_device_channel(record.device_id, channel);
        }
    }

    fn initialize_device_property(&self, device_id: Uuid, property: &manual::ManualDeviceProperty) {
        let Ok(attribute_type) = AttributeType::from_str(&property.identifier) else {
            return;
        };

        let attribute = self.registries.attributes.append(
            Some(property.property_id),
            device_id,
            attribute_type,
            property.value.clone(),
        );

        if attribute_type == AttributeType::State {
            self.registries
                .attributes
                .set_value(attribute.attribute_id, Some(ConnectionState::Unknown.to_string()));
        }
    }

    fn initialize_device_channel(&self, device_id: Uuid, channel: &manual::ManualChannel) {
        let Some(parsed) = identifiers::parse_channel_identifier(&channel.identifier) else {
            log::warn!("device {device_id} channel {} couldn't be initialized", channel.channel_id);
            return;
        };

        self.registries.blocks.append(
            Some(channel.channel_id),
            device_id,
            parsed.identifier,
            parsed.description,
        );

        for property in &channel.properties {
            self.initialize_device_channel_property(device_id, channel.channel_id, property);
        }
    }

    fn initialize_device_channel_property(
        &self,
        device_id: Uuid,
        block_id: Uuid,
        property: &manual::ManualChannelProperty,
    ) {
        let Some(parsed) = identifiers::parse_property_identifier(&property.identifier) else {
            log::warn!("device {device_id} channel {block_id} property {} couldn't be initialized", property.property_id);
            return;
        };

        let Ok(sensor_type) = SensorType::from_str(&parsed.sensor_type) else {
            log::warn!("device {device_id} property {} has unknown sensor type '{}'", property.property_id, parsed.sensor_type);
            return;
        };

        let unit = match &property.unit {
            Some(raw) => match types::SensorUnit::from_str(raw) {
                Ok(unit) => Some(unit),
                Err(_) => {
                    log::warn!("device {device_id} property {} has unknown unit '{raw}'", property.property_id);
                    return;
                }
            },
            None => None,
        };

        self.registries.sensors.append(SensorUpsert {
            sensor_id: Some(property.property_id),
            device_id,
            block_id,
            sensor_identifier: parsed.identifier,
            sensor_type,
            description: parsed.description,
            unit,
            data_type: property.data_type,
            value_format: property.value_format.clone(),
            value_invalid: property.value_invalid.clone(),
            queryable: property.queryable,
            settable: property.settable,
        });
    }

    /// Opens the CoAP client and its background run loop (spec §4.7).
    pub async fn start(&self) -> Result<(), ConnectorError> {
        self.stopped.store(false, Ordering::SeqCst);

        let client = Arc::new(CoapClient::bind_with_discovery_interval(self.bind_addr, self.discovery_interval).await?);
        client.spawn_run_loop(self.receiver.clone());

        *self.coap.lock().unwrap() = Some(client);

        log::info!("connector has been started");
        Ok(())
    }

    /// Closes the CoAP client, marks every device disconnected, stops
    /// accepting further ticks from continuing registry mutation (spec
    /// §4.7).
    pub fn stop(&self) {
        if let Some(client) = self.coap.lock().unwrap().take() {
            client.stop();
        }

        for attribute in self.registries.attributes.get_all_by_type(AttributeType::State) {
            self.set_disconnected(&attribute);
        }

        log::info!("connector has been stopped");
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn set_disconnected(&self, attribute: &AttributeRecord) {
        self.registries
            .attributes
            .set_value(attribute.attribute_id, Some(ConnectionState::Disconnected.to_string()));
    }

    pub fn has_unfinished_tasks(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// One tick: drain one inbound frame, then run timeout/write
    /// supervision (spec §4.7, §5). A stopped connector with no unfinished
    /// tasks is a no-op; a stopped connector still drains its queue so
    /// in-flight frames are not silently lost.
    pub fn handle(&self, now: Instant) {
        if self.stopped.load(Ordering::SeqCst) && !self.has_unfinished_tasks() {
            log::warn!("connector is stopped and can't process another tick");
            return;
        }

        self.receiver.process_one(&self.registries, now);

        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        self.registries.check_timeout(now, self.lost_timeout);
        self.registries.check_write(now);
    }

    pub fn write_property(&self, sensor_id: Uuid, expected_value: Option<String>) {
        self.registries.sensors.set_expected_value(sensor_id, expected_value);
    }

    pub fn write_control(&self, action: ControlAction) -> impl std::future::Future<Output = ()> + '_ {
        async move {
            match action {
                ControlAction::Discover => {
                    if let Some(client) = self.coap.lock().unwrap().clone() {
                        if let Err(err) = client.discover().await {
                            log::error!("discover control action failed: {err}");
                        }
                    }
                }
                ControlAction::Restart => {
                    // Documented no-op stub (spec §9 open question).
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.coap
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|client| client.is_connected())
    }
}

fn subscribe_persistence(events: &Arc<EventBus>, persistence: Arc<dyn PersistenceListener>) {
    let p = persistence.clone();
    events.subscribe(
        registry_events::DEVICE_CREATED_OR_UPDATED,
        Box::new(move |event| {
            if let Some(event) = event.downcast_ref::<registry_events::DeviceCreatedOrUpdated>() {
                p.device_created_or_updated(&event.record);
            }
        }),
    );

    let p = persistence.clone();
    events.subscribe(
        registry_events::BLOCK_CREATED_OR_UPDATED,
        Box::new(move |event| {
            if let Some(event) = event.downcast_ref::<registry_events::BlockCreatedOrUpdated>() {
                p.block_created_or_updated(&event.record);
            }
        }),
    );

    let p = persistence.clone();
    events.subscribe(
        registry_events::SENSOR_CREATED_OR_UPDATED,
        Box::new(move |event| {
            if let Some(event) = event.downcast_ref::<registry_events::SensorCreatedOrUpdated>() {
                p.sensor_created_or_updated(&event.record);
            }
        }),
    );

    let p = persistence.clone();
    events.subscribe(
        registry_events::ATTRIBUTE_CREATED_OR_UPDATED,
        Box::new(move |event| {
            if let Some(event) = event.downcast_ref::<registry_events::AttributeCreatedOrUpdated>() {
                p.attribute_created_or_updated(&event.record);
            }
        }),
    );

    let p = persistence.clone();
    events.subscribe(
        registry_events::ATTRIBUTE_ACTUAL_VALUE_UPDATED,
        Box::new(move |event| {
            if let Some(event) = event.downcast_ref::<registry_events::AttributeActualValueUpdated>() {
                p.attribute_value_updated(&event.record);
            }
        }),
    );

    let p = persistence.clone();
    events.subscribe(
        registry_events::SENSOR_ACTUAL_VALUE_UPDATED,
        Box::new(move |event| {
            if let Some(event) = event.downcast_ref::<registry_events::SensorActualValueUpdated>() {
                p.sensor_value_updated(&event.record);
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use manual::{ManualChannel, ManualChannelProperty, ManualDevice, ManualDeviceProperty};
    use std::net::{Ipv4Addr, SocketAddr};

    fn connector() -> Connector {
        Connector::with_logging_persistence(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 5683)), Duration::from_secs(120))
    }

    fn sample_device() -> ManualDevice {
        ManualDevice {
            device_id: Uuid::new_v4(),
            device_identifier: "shellyswitch25-abc".to_string(),
            device_type: Some("shsw-25".to_string()),
            enabled: true,
            ip_address: None,
            properties: vec![ManualDeviceProperty {
                property_id: Uuid::new_v4(),
                identifier: "state".to_string(),
                value: None,
            }],
            channels: vec![ManualChannel {
                channel_id: Uuid::new_v4(),
                identifier: "0_relay".to_string(),
                properties: vec![ManualChannelProperty {
                    property_id: Uuid::new_v4(),
                    identifier: "112_S_output".to_string(),
                    unit: None,
                    data_type: types::DataType::Enum,
                    value_format: Some("0/1".to_string()),
                    value_invalid: None,
                    queryable: true,
                    settable: true,
                }],
            }],
        }
    }

    #[test]
    fn initialize_seeds_registry_with_unknown_state() {
        let connector = connector();
        let device = sample_device();
        connector.initialize(&[device.clone()]);

        let record = connector.registries().devices.get_by_id(device.device_id).unwrap();
        assert_eq!(record.device_identifier, "shellyswitch25-abc");

        let state = connector.registries().attributes.get_state(device.device_id);
        assert_eq!(state, Some(ConnectionState::Unknown));

        let block = connector.registries().blocks.get_by_identifier(device.device_id, 0).unwrap();
        assert_eq!(block.block_description, "relay");

        let sensor = connector.registries().sensors.get_by_identifier(device.device_id, 112).unwrap();
        assert_eq!(sensor.description, "output");
    }

    #[test]
    fn initialize_skips_malformed_channel_without_panicking() {
        let connector = connector();
        let mut device = sample_device();
        device.channels[0].identifier = "not-well-formed".to_string();

        connector.initialize(&[device.clone()]);

        assert!(connector.registries().blocks.get_all_by_device(device.device_id).is_empty());
    }

    #[test]
    fn stop_marks_state_attribute_disconnected() {
        let connector = connector();
        let device = sample_device();
        connector.initialize(&[device.clone()]);

        connector.stop();

        let state = connector.registries().attributes.get_state(device.device_id);
        assert_eq!(state, Some(ConnectionState::Disconnected));
    }

    #[test]
    fn has_unfinished_tasks_reflects_receiver_state() {
        let connector = connector();
        assert!(!connector.has_unfinished_tasks());
    }
}
