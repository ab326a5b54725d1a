//! Boundary to the downstream persistence collaborator (spec §6).
//!
//! The real storage layer is explicitly out of scope (spec §1); this trait
//! is the seam a caller plugs an implementation into. The default
//! [`LoggingPersistenceListener`] satisfies §7 error kind 5 ("state manager
//! not configured" → WARN once, continue) by just logging what it would
//! have persisted.

use registry::{AttributeRecord, BlockRecord, DeviceRecord, SensorRecord};

/// Observers must not call back into registry mutators (spec §9's
/// redesign note on synchronous dispatch).
pub trait PersistenceListener: Send + Sync {
    fn device_created_or_updated(&self, _record: &DeviceRecord) {}
    fn block_created_or_updated(&self, _record: &BlockRecord) {}
    fn sensor_created_or_updated(&self, _record: &SensorRecord) {}
    fn attribute_created_or_updated(&self, _record: &AttributeRecord) {}
    fn attribute_value_updated(&self, _record: &AttributeRecord) {}
    fn sensor_value_updated(&self, _record: &SensorRecord) {}
}

pub struct LoggingPersistenceListener {
    warned: std::sync::atomic::AtomicBool,
}

impl Default for LoggingPersistenceListener {
    fn default() -> Self {
        Self {
            warned: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl LoggingPersistenceListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn warn_once(&self) {
        if !self.warned.swap(true, std::sync::atomic::Ordering::SeqCst) {
            log::warn!("no persistence collaborator configured; registry events are logged only");
        }
    }
}

impl PersistenceListener for LoggingPersistenceListener {
    fn device_created_or_updated(&self, record: &DeviceRecord) {
        self.warn_once();
        log::debug!("device created/updated: {}", record.device_identifier);
    }

    fn block_created_or_updated(&self, record: &BlockRecord) {
        self.warn_once();
        log::debug!("block created/updated: {}", record.block_description);
    }

    fn sensor_created_or_updated(&self, record: &SensorRecord) {
        self.warn_once();
        log::debug!("sensor created/updated: {}", record.description);
    }

    fn attribute_created_or_updated(&self, record: &AttributeRecord) {
        self.warn_once();
        log::debug!("attribute created/updated: {:?}", record.attribute_type);
    }

    fn attribute_value_updated(&self, record: &AttributeRecord) {
        self.warn_once();
        log::debug!("attribute value updated: {:?} = {:?}", record.attribute_type, record.value);
    }

    fn sensor_value_updated(&self, record: &SensorRecord) {
        self.warn_once();
        log::debug!("sensor value updated: {} = {:?}", record.description, record.actual_value);
    }
}
