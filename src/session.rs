//! # Session Coordinator
//!
//! Runs the one-time startup sequence:
//!
//! ```text
//! Idle -> Connecting -> WaitingForSystem -> SystemReady
//! ```
//!
//! 1. **Connecting** - bind the transport; a failure ends the session
//! 2. **WaitingForSystem** - wait for the first system that reports itself
//!    connected (cancellable, optional timeout)
//! 3. **SystemReady** - register the flight-mode, raw-message and calibration
//!    subscriptions against that system
//!
//! The returned [`ActiveSession`] owns every subscription and releases them
//! when dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::link::{
    CalibrationService, ConnectionUrl, RawMessage, RawMessageFeed, Subscription, SystemHandle,
    TelemetryFeed, Transport,
};
use crate::monitor::{CalibrationMonitor, RawMessageKind};

/// Startup state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    WaitingForSystem,
    SystemReady,
}

/// Feeds registered once a system is ready
pub struct Feeds<'a> {
    pub telemetry: &'a dyn TelemetryFeed,
    pub raw: &'a dyn RawMessageFeed,
    /// `None` skips starting a calibration session
    pub calibration: Option<&'a dyn CalibrationService>,
}

/// Subscriptions of a connected system
#[derive(Debug)]
pub struct ActiveSession {
    system: SystemHandle,
    subscriptions: Vec<Subscription>,
}

impl ActiveSession {
    pub fn system(&self) -> &SystemHandle {
        &self.system
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Release every subscription
    pub fn close(self) {
        info!(
            "Releasing {} subscriptions for system {}",
            self.subscriptions.len(),
            self.system.system_id()
        );
    }
}

/// Drives the startup sequence
#[derive(Debug)]
pub struct SessionCoordinator {
    url: ConnectionUrl,
    handshake_timeout: Option<Duration>,
    state: SessionState,
}

impl SessionCoordinator {
    /// # Arguments
    ///
    /// * `url` - Where the transport binds
    /// * `handshake_timeout` - Longest wait for a system, `None` waits forever
    pub fn new(url: ConnectionUrl, handshake_timeout: Option<Duration>) -> Self {
        Self {
            url,
            handshake_timeout,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn url(&self) -> &ConnectionUrl {
        &self.url
    }

    /// Bind the transport and register for new-system notifications
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Connection`] if the session was already started
    /// or the transport fails to bind
    pub fn connect(&mut self, transport: &dyn Transport) -> Result<broadcast::Receiver<SystemHandle>> {
        if self.state != SessionState::Idle {
            return Err(MonitorError::Connection(format!(
                "Session already started (state {:?})",
                self.state
            )));
        }

        self.state = SessionState::Connecting;
        info!("Connecting through {}", self.url);
        transport.add_connection(&self.url)?;

        let systems = transport.subscribe_new_system();
        self.state = SessionState::WaitingForSystem;
        Ok(systems)
    }

    /// Block until the first connected system appears
    ///
    /// Later notifications are ignored; the receiver is dropped on return.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `cancel` fires first ([`MonitorError::HandshakeCancelled`])
    /// - the handshake timeout elapses ([`MonitorError::HandshakeTimeout`])
    /// - the link closes before any system appears
    pub async fn wait_for_system(
        &mut self,
        mut systems: broadcast::Receiver<SystemHandle>,
        cancel: &CancellationToken,
    ) -> Result<SystemHandle> {
        info!("Waiting for system...");

        let wait = async {
            loop {
                match systems.recv().await {
                    Ok(system) if system.is_connected() => return Ok(system),
                    Ok(system) => {
                        debug!("System {} appeared but is not connected", system.system_id());
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} system notifications", skipped);
                    }
                    Err(RecvError::Closed) => {
                        return Err(MonitorError::Connection(
                            "Link closed before any system connected".to_string(),
                        ));
                    }
                }
            }
        };

        let handshake_timeout = self.handshake_timeout;
        let bounded_wait = async {
            match handshake_timeout {
                Some(limit) => match tokio::time::timeout(limit, wait).await {
                    Ok(result) => result,
                    Err(_) => Err(MonitorError::HandshakeTimeout(limit)),
                },
                None => wait.await,
            }
        };

        let system = tokio::select! {
            _ = cancel.cancelled() => Err(MonitorError::HandshakeCancelled),
            result = bounded_wait => result,
        }?;

        info!("System {} is connected", system.system_id());
        self.state = SessionState::SystemReady;
        Ok(system)
    }

    /// Register every feed against `system`
    pub fn register(
        &self,
        system: &SystemHandle,
        monitor: &Arc<CalibrationMonitor>,
        feeds: &Feeds<'_>,
    ) -> ActiveSession {
        let mut subscriptions = Vec::with_capacity(2 + RawMessageKind::ALL.len());

        let flight_monitor = Arc::clone(monitor);
        subscriptions.push(feeds.telemetry.subscribe_flight_mode(
            system,
            Box::new(move |mode| flight_monitor.on_flight_mode(mode)),
        ));

        for kind in RawMessageKind::ALL {
            let raw_monitor = Arc::clone(monitor);
            subscriptions.push(feeds.raw.subscribe_message(
                system,
                kind.message_id(),
                Box::new(move |message: &RawMessage| raw_monitor.on_raw_message(message)),
            ));
        }

        if let Some(calibration) = feeds.calibration {
            let progress_monitor = Arc::clone(monitor);
            subscriptions.push(calibration.calibrate_magnetometer(
                system,
                Box::new(move |result, progress| {
                    progress_monitor.on_calibration_progress(result, &progress)
                }),
            ));
        }

        info!(
            "Registered {} subscriptions on system {}",
            subscriptions.len(),
            system.system_id()
        );

        ActiveSession {
            system: Arc::clone(system),
            subscriptions,
        }
    }

    /// Run the whole startup sequence
    ///
    /// # Errors
    ///
    /// Returns error if binding fails or no system connects (see
    /// [`SessionCoordinator::connect`] and [`SessionCoordinator::wait_for_system`]).
    /// No subscription is registered in that case.
    pub async fn start(
        &mut self,
        transport: &dyn Transport,
        feeds: &Feeds<'_>,
        monitor: &Arc<CalibrationMonitor>,
        cancel: &CancellationToken,
    ) -> Result<ActiveSession> {
        let systems = self.connect(transport)?;
        let system = self.wait_for_system(systems, cancel).await?;
        Ok(self.register(&system, monitor, feeds))
    }
}
