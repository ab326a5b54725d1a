//! Single-consumer FIFO of inbound device frames (spec §4.4).
//!
//! Producers are the client threads (CoAP, later HTTP); the tick thread is
//! the sole consumer via [`Receiver::process_one`]. Modeled on
//! `transport/src/multicast/mod.rs`'s bounded `crossbeam::channel` handoff
//! between the socket task and its consumer, generalised here to an
//! explicit soft cap with oldest-drop instead of a hard-bounded channel
//! (spec §9's open question).

use std::{
    net::IpAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use crossbeam::queue::SegQueue;

use gen1::{parser, validate, Validity};
use registry::Registries;
use types::MessageKind;

/// Queue depth above which the oldest entry is dropped on push (spec §9).
pub const SOFT_CAP: usize = 1024;

#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub device_identifier: String,
    pub device_type: Option<String>,
    pub device_ip: Option<IpAddr>,
    pub payload: Vec<u8>,
    pub kind: MessageKind,
}

#[derive(Default)]
pub struct Receiver {
    queue: SegQueue<InboundFrame>,
    len: AtomicU64,
    dropped: AtomicU64,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_coap_message(
        &self,
        device_identifier: String,
        device_type: String,
        device_ip: IpAddr,
        payload: Vec<u8>,
        kind: MessageKind,
    ) {
        self.enqueue(InboundFrame {
            device_identifier,
            device_type: Some(device_type),
            device_ip: Some(device_ip),
            payload,
            kind,
        });
    }

    pub fn on_http_message(&self, device_identifier: String, device_ip: IpAddr, payload: Vec<u8>, kind: MessageKind) {
        self.enqueue(InboundFrame {
            device_identifier,
            device_type: None,
            device_ip: Some(device_ip),
            payload,
            kind,
        });
    }

    fn enqueue(&self, frame: InboundFrame) {
        self.queue.push(frame);
        let len = self.len.fetch_add(1, Ordering::SeqCst) + 1;

        if len as usize > SOFT_CAP {
            if self.queue.pop().is_some() {
                self.len.fetch_sub(1, Ordering::SeqCst);
                self.dropped.fetch_add(1, Ordering::SeqCst);
                log::warn!("receiver queue over soft cap of {SOFT_CAP}, dropped oldest frame");
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len.load(Ordering::SeqCst) == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Drains and processes exactly one queued frame, if any (spec §4.4,
    /// §4.7's `handle()` tick order).
    pub fn process_one(&self, registries: &Registries, now: Instant) {
        let Some(frame) = self.queue.pop() else {
            return;
        };
        self.len.fetch_sub(1, Ordering::SeqCst);

        match validate(frame.kind, &frame.payload) {
            Validity::Invalid(reason) => {
                let preview: String = String::from_utf8_lossy(&frame.payload[..frame.payload.len().min(120)]).to_string();
                log::warn!(
                    "dropping malformed {:?} frame from {}: {reason} (payload preview: {preview})",
                    frame.kind,
                    frame.device_identifier
                );
                return;
            }
            Validity::Valid => {}
        }

        let parsed: serde_json::Value = match serde_json::from_slice(&frame.payload) {
            Ok(value) => value,
            Err(err) => {
                log::error!("payload for {} passed validation but failed to re-parse: {err}", frame.device_identifier);
                return;
            }
        };

        match frame.kind {
            MessageKind::CoapDescription => {
                let device_type = frame.device_type.as_deref().unwrap_or_default();
                parser::apply_coap_description(registries, &frame.device_identifier, device_type, frame.device_ip, &parsed, now);
            }
            MessageKind::CoapStatus => {
                parser::apply_coap_status(registries, &frame.device_identifier, &parsed, now);
            }
            MessageKind::HttpShelly => {
                parser::apply_http_shelly(registries, &frame.device_identifier, frame.device_ip, &parsed, now);
            }
            MessageKind::HttpStatus => {
                parser::apply_http_status(registries, &frame.device_identifier, &parsed, now);
            }
            MessageKind::HttpDescription => {
                let device_type = frame.device_type.as_deref().unwrap_or_default();
                parser::apply_coap_description(registries, &frame.device_identifier, device_type, frame.device_ip, &parsed, now);
            }
        }
    }

    pub fn queue_len(&self) -> u64 {
        self.len.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventbus::EventBus;
    use std::{net::Ipv4Addr, sync::Arc};

    fn registries() -> Registries {
        Registries::new(Arc::new(EventBus::new()))
    }

    #[test]
    fn enqueue_then_drain_processes_message() {
        let receiver = Receiver::new();
        let registries = registries();

        receiver.on_coap_message(
            "abcdef123456".to_string(),
            "shsw-25".to_string(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            br#"{"blk":[{"I":0,"D":"relay_0"}],"sen":[{"I":112,"T":"S","D":"output","R":"0/1","L":0}]}"#.to_vec(),
            MessageKind::CoapDescription,
        );

        assert!(!receiver.is_empty());
        receiver.process_one(&registries, Instant::now());
        assert!(receiver.is_empty());

        assert!(registries.devices.get_by_identifier("abcdef123456").is_some());
    }

    #[test]
    fn malformed_frame_is_dropped_without_registry_change() {
        let receiver = Receiver::new();
        let registries = registries();

        receiver.on_coap_message(
            "abcdef123456".to_string(),
            "shsw-25".to_string(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            b"not json".to_vec(),
            MessageKind::CoapDescription,
        );

        receiver.process_one(&registries, Instant::now());
        assert!(receiver.is_empty());
        assert!(registries.devices.get_by_identifier("abcdef123456").is_none());
    }

    #[test]
    fn overflow_drops_oldest_and_counts_it() {
        let receiver = Receiver::new();

        for i in 0..(SOFT_CAP + 5) {
            receiver.on_coap_message(
                format!("device-{i}"),
                "shsw-25".to_string(),
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                br#"{"blk":[],"sen":[]}"#.to_vec(),
                MessageKind::CoapDescription,
            );
        }

        assert_eq!(receiver.dropped_count(), 5);
        assert_eq!(receiver.queue_len() as usize, SOFT_CAP);
    }
}
