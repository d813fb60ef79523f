//! MAVLink implementation of the link traits

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use mavlink::ardupilotmega::{
    MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavResult, MavState, MavType,
    COMMAND_LONG_DATA, HEARTBEAT_DATA, STATUSTEXT_DATA,
};
use mavlink::MavHeader;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use super::calibration::{parse_status_text, CalibrationResult, ProgressData};
use super::endpoint::{is_transient, Endpoint, Frame};
use super::flight_mode::flight_mode_from_heartbeat;
use super::{
    CalibrationCallback, CalibrationService, ConnectionUrl, FlightModeCallback,
    RawMessageCallback, RawMessageFeed, RemoteSystem, Subscription, SystemHandle,
    TelemetryFeed, Transport, DEFAULT_HEARTBEAT_TIMEOUT,
};
use crate::error::{MonitorError, Result};

/// Ground-station system ID used in outgoing messages
pub const GCS_SYSTEM_ID: u8 = 245;

/// Ground-station component ID (MAV_COMP_ID_MISSIONPLANNER)
pub const GCS_COMPONENT_ID: u8 = 190;

/// Interval of outgoing ground-station heartbeats
const GCS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Buffered messages per subscriber before it starts lagging
const MESSAGE_CHANNEL_CAPACITY: usize = 256;

/// Buffered new-system notifications
const SYSTEM_CHANNEL_CAPACITY: usize = 16;

type Connection = Arc<Endpoint>;

/// Identity and timing of the local end of the link
#[derive(Debug, Clone, Copy)]
pub struct LinkSettings {
    pub heartbeat_timeout: Duration,
    pub system_id: u8,
    pub component_id: u8,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
        }
    }
}

/// MAVLink ground-station link
///
/// A receive thread publishes every frame to the feed subscriptions and
/// tracks remote systems by their autopilot heartbeats. Feed subscriptions run
/// as Tokio tasks, so they must be created from inside a runtime.
///
/// Dropping the link stops its threads within a read timeout or a heartbeat
/// interval, whichever is longer.
pub struct MavlinkLink {
    shared: Arc<Shared>,
}

struct Shared {
    settings: LinkSettings,
    connection: Mutex<Option<Connection>>,
    messages: broadcast::Sender<Arc<Frame>>,
    new_systems: broadcast::Sender<SystemHandle>,
    systems: Mutex<HashMap<u8, SystemHandle>>,
    sequence: AtomicU8,
    running: AtomicBool,
}

impl std::fmt::Debug for MavlinkLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MavlinkLink")
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

impl MavlinkLink {
    pub fn new(settings: LinkSettings) -> Self {
        let (messages, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (new_systems, _) = broadcast::channel(SYSTEM_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                settings,
                connection: Mutex::new(None),
                messages,
                new_systems,
                systems: Mutex::new(HashMap::new()),
                sequence: AtomicU8::new(0),
                running: AtomicBool::new(true),
            }),
        }
    }

    /// Systems seen on the link so far
    pub fn systems(&self) -> Vec<SystemHandle> {
        self.shared
            .systems
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Spawn a task feeding frames of `system` to `handler` until it breaks
    fn spawn_listener<F>(&self, name: &str, system: &SystemHandle, mut handler: F) -> Subscription
    where
        F: FnMut(&Frame) -> ControlFlow<()> + Send + 'static,
    {
        // Subscribe before spawning so nothing sent after this call is missed
        let mut receiver = self.shared.messages.subscribe();
        let system_id = system.system_id();
        let task_name = name.to_string();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(frame) if frame.header.system_id == system_id => {
                        if handler(&frame).is_break() {
                            debug!("{} subscription finished", task_name);
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("{} subscription fell behind, skipped {} messages", task_name, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Subscription::new(name, task)
    }
}

impl Drop for MavlinkLink {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
    }
}

impl Shared {
    fn header(&self) -> MavHeader {
        MavHeader {
            system_id: self.settings.system_id,
            component_id: self.settings.component_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn send(&self, message: &MavMessage) -> Result<()> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| MonitorError::Connection("No connection added".to_string()))?;

        connection
            .send(self.header(), message)
            .map_err(|e| MonitorError::Connection(format!("Failed to send message: {}", e)))?;

        Ok(())
    }

    /// Track heartbeats, then hand the frame to every subscriber
    fn dispatch(&self, frame: Frame) {
        if let Some(MavMessage::HEARTBEAT(heartbeat)) = &frame.message {
            if is_autopilot_heartbeat(heartbeat) {
                self.track_system(&frame.header);
            }
        }

        // No subscribers yet is fine
        let _ = self.messages.send(Arc::new(frame));
    }

    fn track_system(&self, header: &MavHeader) {
        let system = {
            let mut systems = self.systems.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(systems.entry(header.system_id).or_insert_with(|| {
                Arc::new(RemoteSystem::new(
                    header.system_id,
                    header.component_id,
                    self.settings.heartbeat_timeout,
                ))
            }))
        };

        let was_connected = system.is_connected();
        system.record_heartbeat();

        if !was_connected {
            info!(
                "System {} (component {}) is connected",
                system.system_id(),
                system.component_id()
            );
            let _ = self.new_systems.send(system);
        }
    }

    fn receive_loop(&self, connection: Connection) {
        while self.running.load(Ordering::Relaxed) {
            match connection.recv() {
                Ok(frame) => self.dispatch(frame),
                Err(e) if is_transient(&e) => {}
                Err(e) => {
                    error!("MAVLink link closed: {}", e);
                    break;
                }
            }
        }
        debug!("Receive thread stopped");
    }

    fn heartbeat_loop(&self) {
        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = self.send(&gcs_heartbeat()) {
                debug!("Failed to send heartbeat: {}", e);
            }
            thread::sleep(GCS_HEARTBEAT_INTERVAL);
        }
    }
}

impl Transport for MavlinkLink {
    fn add_connection(&self, url: &ConnectionUrl) -> Result<()> {
        let mut slot = self
            .shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if slot.is_some() {
            return Err(MonitorError::Connection(
                "A connection was already added".to_string(),
            ));
        }

        let connection: Connection = Arc::new(
            Endpoint::open(url)
                .map_err(|e| MonitorError::Connection(format!("Failed to open {}: {}", url, e)))?,
        );

        let shared = Arc::clone(&self.shared);
        let receiver_connection = Arc::clone(&connection);
        thread::Builder::new()
            .name("mavlink-rx".to_string())
            .spawn(move || shared.receive_loop(receiver_connection))?;

        *slot = Some(connection);
        drop(slot);

        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("mavlink-heartbeat".to_string())
            .spawn(move || shared.heartbeat_loop())?;

        info!("Listening on {}", url);
        Ok(())
    }

    fn subscribe_new_system(&self) -> broadcast::Receiver<SystemHandle> {
        let receiver = self.shared.new_systems.subscribe();

        // Announce systems that connected before this subscription existed
        for system in self.systems() {
            if system.is_connected() {
                let _ = self.shared.new_systems.send(system);
            }
        }

        receiver
    }
}

impl TelemetryFeed for MavlinkLink {
    fn subscribe_flight_mode(&self, system: &SystemHandle, callback: FlightModeCallback) -> Subscription {
        // Companion computers share the system ID but not the component
        let component_id = system.component_id();
        self.spawn_listener("flight_mode", system, move |frame| {
            if frame.header.component_id != component_id {
                return ControlFlow::Continue(());
            }
            if let Some(MavMessage::HEARTBEAT(heartbeat)) = &frame.message {
                callback(flight_mode_from_heartbeat(heartbeat));
            }
            ControlFlow::Continue(())
        })
    }
}

impl RawMessageFeed for MavlinkLink {
    fn subscribe_message(
        &self,
        system: &SystemHandle,
        message_id: u32,
        callback: RawMessageCallback,
    ) -> Subscription {
        self.spawn_listener(&format!("message_{}", message_id), system, move |frame| {
            if frame.raw.message_id == message_id {
                callback(&frame.raw);
            }
            ControlFlow::Continue(())
        })
    }
}

impl CalibrationService for MavlinkLink {
    fn calibrate_magnetometer(&self, system: &SystemHandle, callback: CalibrationCallback) -> Subscription {
        let subscription = self.spawn_listener("calibration", system, move |frame| {
            let update = match &frame.message {
                Some(MavMessage::STATUSTEXT(status)) => parse_status_text(&status_text(status)),
                Some(MavMessage::COMMAND_ACK(ack))
                    if matches!(ack.command, MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION) =>
                {
                    ack_result(ack.result).map(|result| (result, ProgressData::default()))
                }
                _ => None,
            };

            match update {
                Some((result, progress)) => {
                    callback(result, progress);
                    if result.is_terminal() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                }
                None => ControlFlow::Continue(()),
            }
        });

        match self
            .shared
            .send(&mag_calibration_command(system.system_id(), system.component_id()))
        {
            Ok(()) => info!("Started magnetometer calibration on system {}", system.system_id()),
            Err(e) => warn!("Could not start magnetometer calibration: {}", e),
        }

        subscription
    }
}

fn gcs_heartbeat() -> MavMessage {
    MavMessage::HEARTBEAT(HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
    })
}

fn mag_calibration_command(target_system: u8, target_component: u8) -> MavMessage {
    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        param1: 0.0,
        // Magnetometer
        param2: 1.0,
        param3: 0.0,
        param4: 0.0,
        param5: 0.0,
        param6: 0.0,
        param7: 0.0,
        command: MavCmd::MAV_CMD_PREFLIGHT_CALIBRATION,
        target_system,
        target_component,
        confirmation: 0,
    })
}

/// Heartbeat of a flight controller, not of a ground station or companion computer
fn is_autopilot_heartbeat(heartbeat: &HEARTBEAT_DATA) -> bool {
    !matches!(heartbeat.mavtype, MavType::MAV_TYPE_GCS)
        && !matches!(heartbeat.autopilot, MavAutopilot::MAV_AUTOPILOT_INVALID)
}

/// STATUSTEXT up to the first NUL, as UTF-8
fn status_text(status: &STATUSTEXT_DATA) -> String {
    let len = status
        .text
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(status.text.len());
    String::from_utf8_lossy(&status.text[..len]).into_owned()
}

fn ack_result(result: MavResult) -> Option<CalibrationResult> {
    match result {
        MavResult::MAV_RESULT_ACCEPTED | MavResult::MAV_RESULT_IN_PROGRESS => None,
        MavResult::MAV_RESULT_TEMPORARILY_REJECTED => Some(CalibrationResult::Busy),
        MavResult::MAV_RESULT_UNSUPPORTED => Some(CalibrationResult::Unsupported),
        _ => Some(CalibrationResult::CommandDenied),
    }
}
