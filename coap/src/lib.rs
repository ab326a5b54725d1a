//! Multicast CoAP client: discovery timer + inbound frame decoding (spec
//! §4.5). Socket lifecycle is grounded on `transport/src/multicast/mod.rs`'s
//! `Socket::create` (non-blocking `UdpSocket`, `join_multicast_v4`,
//! `tokio::select!` loop) and `discovery/src/lib.rs`'s periodic-broadcast
//! task shape.

pub mod options;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{net::UdpSocket, time::interval};

use options::{decode, DecodeError, FrameKind};
use receiver::Receiver;
use types::MessageKind;

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 187);
pub const COAP_PORT: u16 = 5683;
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// The literal Uri-Path "cit/d" discovery datagram (spec §4.5).
const DISCOVER_DATAGRAM: &[u8] = &[0x50, 0x01, 0x00, 0x0A, 0xB3, 0x63, 0x69, 0x74, 0x01, 0x64, 0xFF];

#[derive(Debug, Error)]
pub enum CoapClientError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One multicast socket plus the background task draining it into a
/// [`Receiver`]. `stop()` sets a flag the `run` task observes between
/// 100 ms-timed-out recvs, per spec §5's cancellation model.
pub struct CoapClient {
    socket: Arc<UdpSocket>,
    stopped: Arc<AtomicBool>,
    discovery_interval: Duration,
}

impl CoapClient {
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, CoapClientError> {
        Self::bind_with_discovery_interval(bind_addr, DISCOVERY_INTERVAL).await
    }

    pub async fn bind_with_discovery_interval(
        bind_addr: SocketAddr,
        discovery_interval: Duration,
    ) -> Result<Self, CoapClientError> {
        assert!(bind_addr.is_ipv4());

        let std_socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;
        std_socket.set_reuse_address(true)?;
        std_socket.set_nonblocking(true)?;
        std_socket.bind(&bind_addr.into())?;

        let socket = UdpSocket::from_std(std_socket.into())?;
        if let IpAddr::V4(bind_ip) = bind_addr.ip() {
            socket.join_multicast_v4(MULTICAST_GROUP, bind_ip)?;
        }

        Ok(Self {
            socket: Arc::new(socket),
            stopped: Arc::new(AtomicBool::new(false)),
            discovery_interval,
        })
    }

    /// Sends the discovery datagram to the multicast group once.
    pub async fn discover(&self) -> Result<(), CoapClientError> {
        log::debug!("sending CoAP discovery datagram");
        self.socket
            .send_to(DISCOVER_DATAGRAM, (MULTICAST_GROUP, COAP_PORT))
            .await?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Spawns the periodic-discovery + receive loop. The loop pushes decoded
    /// frames into `receiver` and returns only when `stop()` has been
    /// called; it never panics the caller on a single bad datagram (spec §7
    /// kind 1/2).
    pub fn spawn_run_loop(self: &Arc<Self>, receiver: Arc<Receiver>) {
        let client = self.clone();

        let discovery_interval = self.discovery_interval;

        tokio::spawn(async move {
            let mut discovery_timer = interval(discovery_interval);
            let mut buf = vec![0u8; 2048];

            loop {
                if client.stopped.load(Ordering::SeqCst) {
                    break;
                }

                tokio::select! {
                    _ = discovery_timer.tick() => {
                        if let Err(err) = client.discover().await {
                            log::error!("CoAP discovery send failed: {err}");
                        }
                    }
                    result = tokio::time::timeout(Duration::from_millis(100), client.socket.recv_from(&mut buf)) => {
                        match result {
                            Ok(Ok((size, addr))) => client.handle_datagram(&buf[..size], addr.ip(), &receiver),
                            Ok(Err(err)) => log::error!("CoAP recv error: {err}"),
                            Err(_timeout) => {}
                        }
                    }
                }
            }

            log::debug!("CoAP client run loop stopped");
        });
    }

    fn handle_datagram(&self, data: &[u8], source_ip: IpAddr, receiver: &Receiver) {
        let decoded = match decode(data, source_ip) {
            Ok(decoded) => decoded,
            Err(DecodeError::UnsupportedCode(_)) => return,
            Err(err) => {
                log::warn!("malformed CoAP datagram from {source_ip}: {err}");
                return;
            }
        };

        let kind = match decoded.kind {
            FrameKind::Status => MessageKind::CoapStatus,
            FrameKind::Description => MessageKind::CoapDescription,
        };

        log::debug!(
            "CoAP frame: type={} id={} kind={:?}",
            decoded.device_type,
            decoded.device_identifier,
            kind
        );

        receiver.on_coap_message(
            decoded.device_identifier.to_ascii_lowercase(),
            decoded.device_type.to_ascii_lowercase(),
            source_ip,
            decoded.payload.into_bytes(),
            kind,
        );
    }
}
