//! # Link Module
//!
//! Telemetry link to the vehicle.
//!
//! This module handles:
//! - Parsing and validating the connection URL
//! - Tracking remote systems by their heartbeats
//! - Delivering flight-mode, raw-message and calibration-session callbacks
//! - Releasing subscriptions when they are dropped
//!
//! The traits here are the seams the session coordinator works against;
//! [`mavlink_link::MavlinkLink`] implements all of them over a MAVLink connection.

pub mod calibration;
pub mod endpoint;
pub mod flight_mode;
pub mod mavlink_link;

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use mavlink::ardupilotmega::MavMessage;
use mavlink::{MavlinkVersion, Message};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{MonitorError, Result};
use crate::status::FlightMode;
use calibration::{CalibrationResult, ProgressData};

/// Time without a heartbeat after which a system counts as disconnected
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(3);

/// Transport scheme of a connection URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Listen for UDP datagrams
    UdpIn,
    /// Send UDP datagrams to a remote address
    UdpOut,
    /// Accept a TCP connection
    TcpIn,
    /// Connect to a TCP server
    TcpOut,
}

impl Scheme {
    fn parse(scheme: &str) -> Result<Self> {
        match scheme {
            "udpin" => Ok(Scheme::UdpIn),
            "udpout" => Ok(Scheme::UdpOut),
            "tcpin" => Ok(Scheme::TcpIn),
            "tcpout" => Ok(Scheme::TcpOut),
            other => Err(MonitorError::Connection(format!(
                "Unsupported connection scheme: {}",
                other
            ))),
        }
    }

    /// Scheme as written in a URL
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::UdpIn => "udpin",
            Scheme::UdpOut => "udpout",
            Scheme::TcpIn => "tcpin",
            Scheme::TcpOut => "tcpout",
        }
    }
}

/// Validated `<scheme>://<ip>:<port>` connection URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    scheme: Scheme,
    ip: IpAddr,
    port: u16,
}

impl ConnectionUrl {
    /// Build a URL from its parts
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Connection`] if the scheme is unsupported, the
    /// address is not an IP address, or the port is 0
    ///
    /// # Examples
    ///
    /// ```
    /// use mag_cal_monitor::link::ConnectionUrl;
    ///
    /// let url = ConnectionUrl::new("udpin", "127.0.0.1", 14550)?;
    /// assert_eq!(url.to_string(), "udpin://127.0.0.1:14550");
    /// # Ok::<(), mag_cal_monitor::error::MonitorError>(())
    /// ```
    pub fn new(scheme: &str, address: &str, port: u16) -> Result<Self> {
        let scheme = Scheme::parse(scheme)?;
        let ip = address.parse::<IpAddr>().map_err(|e| {
            MonitorError::Connection(format!("Invalid address {}: {}", address, e))
        })?;

        if port == 0 {
            return Err(MonitorError::Connection("Port must not be 0".to_string()));
        }

        Ok(Self { scheme, ip, port })
    }

    /// Parse a full `<scheme>://<ip>:<port>` URL
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Connection`] if the URL is malformed
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url.split_once("://").ok_or_else(|| {
            MonitorError::Connection(format!("Missing scheme separator in {}", url))
        })?;

        let (address, port) = rest.rsplit_once(':').ok_or_else(|| {
            MonitorError::Connection(format!("Missing port in {}", url))
        })?;

        let port = port.parse::<u16>().map_err(|e| {
            MonitorError::Connection(format!("Invalid port {}: {}", port, e))
        })?;

        // IPv6 addresses are written in brackets
        let address = address.trim_start_matches('[').trim_end_matches(']');

        Self::new(scheme, address, port)
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}://{}:{}", self.scheme.as_str(), ip, self.port),
            IpAddr::V6(ip) => write!(f, "{}://[{}]:{}", self.scheme.as_str(), ip, self.port),
        }
    }
}

/// A vehicle seen on the link
#[derive(Debug)]
pub struct RemoteSystem {
    system_id: u8,
    component_id: u8,
    heartbeat_timeout: Duration,
    last_heartbeat: Mutex<Option<Instant>>,
}

/// Shared, read-only handle to a remote system
pub type SystemHandle = Arc<RemoteSystem>;

impl RemoteSystem {
    pub fn new(system_id: u8, component_id: u8, heartbeat_timeout: Duration) -> Self {
        Self {
            system_id,
            component_id,
            heartbeat_timeout,
            last_heartbeat: Mutex::new(None),
        }
    }

    pub fn system_id(&self) -> u8 {
        self.system_id
    }

    pub fn component_id(&self) -> u8 {
        self.component_id
    }

    /// Note that a heartbeat from this system just arrived
    pub fn record_heartbeat(&self) {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Whether a heartbeat arrived within the heartbeat timeout
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|seen| seen.elapsed() < self.heartbeat_timeout)
    }
}

/// A live feed registration
///
/// The delivery task is aborted when the subscription is dropped.
#[derive(Debug)]
pub struct Subscription {
    name: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, task: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the delivery task is still running
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!("Releasing subscription {}", self.name);
        self.task.abort();
    }
}

/// Callback receiving every flight-mode update
pub type FlightModeCallback = Box<dyn Fn(FlightMode) + Send + Sync>;

/// A message payload as it came off the wire
///
/// MAVLink v2 drops trailing zero bytes, so `payload` may be shorter than the
/// message definition; missing bytes read as zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: u32,
    pub payload: Vec<u8>,
}

impl RawMessage {
    /// Serialize a typed message the way it would travel in a v2 frame
    pub fn encode(message: &MavMessage) -> Self {
        let mut payload = [0u8; 255];
        let len = message.ser(MavlinkVersion::V2, &mut payload);
        Self {
            message_id: message.message_id(),
            payload: payload[..len].to_vec(),
        }
    }

    /// Byte at `offset`, zero past the end
    #[must_use]
    pub fn byte(&self, offset: usize) -> u8 {
        self.payload.get(offset).copied().unwrap_or(0)
    }

    /// Little-endian `f32` at `offset`, zero-padded past the end
    #[must_use]
    pub fn f32_le(&self, offset: usize) -> f32 {
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.byte(offset + i);
        }
        f32::from_le_bytes(bytes)
    }
}

/// Callback receiving every message with the subscribed ID
pub type RawMessageCallback = Box<dyn Fn(&RawMessage) + Send + Sync>;

/// Callback receiving calibration-session progress
pub type CalibrationCallback = Box<dyn Fn(CalibrationResult, ProgressData) + Send + Sync>;

/// Establishes the link and announces systems that appear on it
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Bind or open the connection described by `url`
    fn add_connection(&self, url: &ConnectionUrl) -> Result<()>;

    /// Notifications for systems that appear or reconnect
    ///
    /// Systems already connected when this is called are announced again.
    fn subscribe_new_system(&self) -> broadcast::Receiver<SystemHandle>;
}

/// Flight-mode updates of one system
#[cfg_attr(test, mockall::automock)]
pub trait TelemetryFeed: Send + Sync {
    fn subscribe_flight_mode(&self, system: &SystemHandle, callback: FlightModeCallback)
        -> Subscription;
}

/// Raw MAVLink messages of one system, selected by message ID
#[cfg_attr(test, mockall::automock)]
pub trait RawMessageFeed: Send + Sync {
    fn subscribe_message(
        &self,
        system: &SystemHandle,
        message_id: u32,
        callback: RawMessageCallback,
    ) -> Subscription;
}

/// Magnetometer calibration sessions
#[cfg_attr(test, mockall::automock)]
pub trait CalibrationService: Send + Sync {
    /// Start a calibration and stream its progress until it finishes
    fn calibrate_magnetometer(
        &self,
        system: &SystemHandle,
        callback: CalibrationCallback,
    ) -> Subscription;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url_from_parts() {
        let url = ConnectionUrl::new("udpin", "127.0.0.1", 14550).unwrap();
        assert_eq!(url.scheme(), Scheme::UdpIn);
        assert_eq!(url.port(), 14550);
        assert_eq!(url.to_string(), "udpin://127.0.0.1:14550");
    }

    #[test]
    fn test_connection_url_parse() {
        let url = ConnectionUrl::parse("tcpout://10.0.0.2:5760").unwrap();
        assert_eq!(url.scheme(), Scheme::TcpOut);
        assert_eq!(url.ip().to_string(), "10.0.0.2");
        assert_eq!(url.port(), 5760);
    }

    #[test]
    fn test_connection_url_parse_ipv6() {
        let url = ConnectionUrl::parse("udpin://[::1]:14550").unwrap();
        assert_eq!(url.to_string(), "udpin://[::1]:14550");
        assert_eq!(url.ip(), IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1]));
    }

    #[test]
    fn test_connection_url_rejects_invalid_input() {
        for url in [
            "127.0.0.1:14550",
            "udpin://127.0.0.1",
            "udpin://localhost:14550",
            "udpin://127.0.0.1:0",
            "udpin://127.0.0.1:99999",
            "serial://127.0.0.1:14550",
        ] {
            match ConnectionUrl::parse(url) {
                Err(MonitorError::Connection(_)) => {}
                other => panic!("Expected Connection error for {}, got: {:?}", url, other),
            }
        }
    }

    #[test]
    fn test_remote_system_connection_state() {
        let system = RemoteSystem::new(1, 1, DEFAULT_HEARTBEAT_TIMEOUT);
        assert!(!system.is_connected());

        system.record_heartbeat();
        assert!(system.is_connected());
    }

    #[test]
    fn test_remote_system_times_out() {
        let system = RemoteSystem::new(1, 1, Duration::from_millis(10));
        system.record_heartbeat();
        std::thread::sleep(Duration::from_millis(30));
        assert!(!system.is_connected());
    }

    #[test]
    fn test_raw_message_reads_past_truncated_payload() {
        let raw = RawMessage {
            message_id: 192,
            payload: vec![0x00, 0x00, 0x80, 0x3f, 7],
        };
        assert_eq!(raw.f32_le(0), 1.0);
        assert_eq!(raw.byte(4), 7);
        // Trailing zeros were dropped on the wire
        assert_eq!(raw.byte(42), 0);
        assert_eq!(raw.f32_le(3), f32::from_le_bytes([0x3f, 7, 0, 0]));
    }

    #[test]
    fn test_raw_message_encode_drops_trailing_zeros() {
        use mavlink::ardupilotmega::MAG_CAL_REPORT_DATA;

        let raw = RawMessage::encode(&MavMessage::MAG_CAL_REPORT(MAG_CAL_REPORT_DATA {
            compass_id: 2,
            ..MAG_CAL_REPORT_DATA::default()
        }));
        assert_eq!(raw.message_id, 192);
        assert_eq!(raw.payload.len(), 41);
        assert_eq!(raw.byte(40), 2);
    }

    #[tokio::test]
    async fn test_dropping_subscription_aborts_task() {
        let task = tokio::spawn(std::future::pending::<()>());
        let subscription = Subscription::new("test", task);
        assert_eq!(subscription.name(), "test");
        assert!(subscription.is_active());
        drop(subscription);
    }
}
