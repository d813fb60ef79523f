//! # Calibration Monitor
//!
//! Feed callbacks land here. Flight-mode updates and the two raw calibration
//! messages go through their own [`ChangeDetector`]; calibration-session
//! progress is reported on every callback.
//!
//! Raw calibration messages are told apart by message ID:
//!
//! | ID  | Message            | Extra field      |
//! |-----|--------------------|------------------|
//! | 191 | `MAG_CAL_PROGRESS` | completion in %  |
//! | 192 | `MAG_CAL_REPORT`   | fitness          |
//!
//! Both are decoded from payload offsets rather than the dialect's enums, so a
//! `cal_status` the dialect does not name still gets through.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::detector::ChangeDetector;
use crate::link::calibration::{CalibrationResult, ProgressData};
use crate::link::RawMessage;
use crate::sink::{EventSink, MonitorEvent};
use crate::status::FlightMode;

/// Raw calibration message tracked by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RawMessageKind {
    /// `MAG_CAL_PROGRESS` (ID 191)
    Progress,
    /// `MAG_CAL_REPORT` (ID 192)
    Report,
}

impl RawMessageKind {
    pub const ALL: [RawMessageKind; 2] = [RawMessageKind::Progress, RawMessageKind::Report];

    #[must_use]
    pub fn from_message_id(message_id: u32) -> Option<Self> {
        match message_id {
            191 => Some(RawMessageKind::Progress),
            192 => Some(RawMessageKind::Report),
            _ => None,
        }
    }

    #[must_use]
    pub fn message_id(self) -> u32 {
        match self {
            RawMessageKind::Progress => 191,
            RawMessageKind::Report => 192,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            RawMessageKind::Progress => "MAG_CAL_PROGRESS",
            RawMessageKind::Report => "MAG_CAL_REPORT",
        }
    }
}

// MAG_CAL_PROGRESS payload offsets
const PROGRESS_COMPASS_ID: usize = 12;
const PROGRESS_CAL_STATUS: usize = 14;
const PROGRESS_COMPLETION_PCT: usize = 16;

// MAG_CAL_REPORT payload offsets
const REPORT_FITNESS: usize = 0;
const REPORT_COMPASS_ID: usize = 40;
const REPORT_CAL_STATUS: usize = 42;

/// Payload shared by both raw calibration messages
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    pub compass_id: u8,
    pub cal_status: u8,
    /// Only in `MAG_CAL_REPORT`
    pub fitness: Option<f32>,
    /// Only in `MAG_CAL_PROGRESS`
    pub completion_pct: Option<u8>,
}

/// The part of a calibration record that decides whether it is news
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationReportState {
    pub compass_id: u8,
    pub cal_status: u8,
}

impl CalibrationRecord {
    /// Decode a raw calibration message
    ///
    /// # Returns
    ///
    /// * `Option<(RawMessageKind, CalibrationRecord)>` - `None` for any other message
    pub fn decode(message: &RawMessage) -> Option<(RawMessageKind, Self)> {
        let kind = RawMessageKind::from_message_id(message.message_id)?;
        let record = match kind {
            RawMessageKind::Progress => Self {
                compass_id: message.byte(PROGRESS_COMPASS_ID),
                cal_status: message.byte(PROGRESS_CAL_STATUS),
                fitness: None,
                completion_pct: Some(message.byte(PROGRESS_COMPLETION_PCT)),
            },
            RawMessageKind::Report => Self {
                compass_id: message.byte(REPORT_COMPASS_ID),
                cal_status: message.byte(REPORT_CAL_STATUS),
                fitness: Some(message.f32_le(REPORT_FITNESS)),
                completion_pct: None,
            },
        };
        Some((kind, record))
    }

    #[must_use]
    pub fn state(&self) -> CalibrationReportState {
        CalibrationReportState {
            compass_id: self.compass_id,
            cal_status: self.cal_status,
        }
    }
}

/// Decides which feed updates reach the event sink
pub struct CalibrationMonitor {
    flight_mode: ChangeDetector<FlightMode>,
    progress_messages: ChangeDetector<CalibrationReportState>,
    report_messages: ChangeDetector<CalibrationReportState>,
    sink: Arc<dyn EventSink>,
}

impl CalibrationMonitor {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            flight_mode: ChangeDetector::new(),
            progress_messages: ChangeDetector::new(),
            report_messages: ChangeDetector::new(),
            sink,
        }
    }

    /// Detector of one raw message stream
    pub fn detector(&self, kind: RawMessageKind) -> &ChangeDetector<CalibrationReportState> {
        match kind {
            RawMessageKind::Progress => &self.progress_messages,
            RawMessageKind::Report => &self.report_messages,
        }
    }

    /// Detector of the flight-mode stream
    pub fn flight_mode_detector(&self) -> &ChangeDetector<FlightMode> {
        &self.flight_mode
    }

    /// Report the flight mode if it changed
    pub fn on_flight_mode(&self, mode: FlightMode) {
        if self.flight_mode.observe(mode) {
            info!("Flight mode changed to {}", mode.label());
            self.sink.emit(&MonitorEvent::flight_mode(mode));
        }
    }

    /// Route a raw message to its calibration stream by message ID
    pub fn on_raw_message(&self, message: &RawMessage) {
        match CalibrationRecord::decode(message) {
            Some((kind, record)) => self.on_calibration_record(kind, record),
            None => warn!("Ignoring untracked message ID {}", message.message_id),
        }
    }

    /// Report a calibration record if compass or status changed
    ///
    /// Fitness and completion are shown with the event but never decide it.
    pub fn on_calibration_record(&self, kind: RawMessageKind, record: CalibrationRecord) {
        if self.detector(kind).observe(record.state()) {
            self.sink.emit(&MonitorEvent::calibration_report(kind, &record));
        } else {
            debug!(
                "Suppressed repeated {} for compass {} (status {})",
                kind.name(),
                record.compass_id,
                record.cal_status
            );
        }
    }

    /// Report calibration-session progress as delivered
    pub fn on_calibration_progress(&self, result: CalibrationResult, progress: &ProgressData) {
        self.sink.emit(&MonitorEvent::calibration_progress(progress));

        if result.is_terminal() {
            info!("Calibration session finished: {:?}", result);
        }
    }
}
