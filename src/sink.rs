//! # Event Sink
//!
//! Renders detected changes for the operator.
//!
//! Field order is fixed per event type:
//! - flight mode: code, then label
//! - calibration report: header with the message ID, compass ID, status code
//!   and label, then fitness (or completion for progress messages)
//! - calibration progress: status text and progress percentage, each only
//!   when present
//!
//! ```
//! use mag_cal_monitor::sink::{render_lines, MonitorEvent};
//! use mag_cal_monitor::status::FlightMode;
//!
//! let lines = render_lines(&MonitorEvent::flight_mode(FlightMode::Hold));
//! assert_eq!(lines, vec!["Flight mode 3: Hold"]);
//! ```

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

use crate::link::calibration::ProgressData;
use crate::monitor::{CalibrationRecord, RawMessageKind};
use crate::status::{map_calibration_status, FlightMode};

/// A change worth showing to the operator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    FlightMode {
        code: u32,
        label: &'static str,
    },
    CalibrationReport {
        message: &'static str,
        message_id: u32,
        compass_id: u8,
        status: u8,
        label: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        fitness: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        completion_pct: Option<u8>,
    },
    CalibrationProgress {
        #[serde(skip_serializing_if = "Option::is_none")]
        status_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f32>,
    },
}

impl MonitorEvent {
    pub fn flight_mode(mode: FlightMode) -> Self {
        MonitorEvent::FlightMode {
            code: mode.code(),
            label: mode.label(),
        }
    }

    pub fn calibration_report(kind: RawMessageKind, record: &CalibrationRecord) -> Self {
        MonitorEvent::CalibrationReport {
            message: kind.name(),
            message_id: kind.message_id(),
            compass_id: record.compass_id,
            status: record.cal_status,
            label: map_calibration_status(record.cal_status),
            fitness: record.fitness,
            completion_pct: record.completion_pct,
        }
    }

    pub fn calibration_progress(progress: &ProgressData) -> Self {
        MonitorEvent::CalibrationProgress {
            status_text: progress
                .has_status_text
                .then(|| progress.status_text.clone()),
            progress: progress.has_progress.then_some(progress.progress),
        }
    }
}

/// Receives every event the monitor decides to report
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &MonitorEvent);
}

/// Render an event as operator-facing text lines
pub fn render_lines(event: &MonitorEvent) -> Vec<String> {
    match event {
        MonitorEvent::FlightMode { code, label } => {
            vec![format!("Flight mode {}: {}", code, label)]
        }
        MonitorEvent::CalibrationReport {
            message,
            message_id,
            compass_id,
            status,
            label,
            fitness,
            completion_pct,
        } => {
            let mut lines = vec![
                format!("Received {} packet (ID {})", message, message_id),
                format!("Compass ID: {}", compass_id),
                format!("Status {}: {}", status, label),
            ];
            if let Some(fitness) = fitness {
                lines.push(format!("Fitness: {}", *fitness as i32));
            }
            if let Some(completion) = completion_pct {
                lines.push(format!("Completion: {}%", completion));
            }
            lines
        }
        MonitorEvent::CalibrationProgress {
            status_text,
            progress,
        } => {
            let mut lines = Vec::new();
            if let Some(text) = status_text {
                lines.push(format!("Compass calibration status: {}", text));
            }
            if let Some(progress) = progress {
                lines.push(format!("Compass calibration progress: {}%", format_percent(*progress)));
            }
            lines
        }
    }
}

/// Percentage of a 0..1 fraction, rounded to two decimals
fn format_percent(fraction: f32) -> String {
    let percent = (f64::from(fraction) * 100.0 * 100.0).round() / 100.0;
    format!("{}", percent)
}

/// Writes rendered text to an output stream
pub struct TextSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TextSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> EventSink for TextSink<W> {
    fn emit(&self, event: &MonitorEvent) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);

        // Separate multi-line blocks from the running output
        if matches!(event, MonitorEvent::CalibrationReport { .. }) {
            let _ = writeln!(out);
        }

        for line in render_lines(event) {
            if let Err(e) = writeln!(out, "{}", line) {
                debug!("Failed to write event: {}", e);
                return;
            }
        }
        let _ = out.flush();
    }
}

/// Writes one JSON object per event
pub struct JsonlSink<W: Write + Send> {
    out: Mutex<W>,
}

#[derive(Serialize)]
struct JsonlRecord<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a MonitorEvent,
}

impl<W: Write + Send> JsonlSink<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JsonlSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> EventSink for JsonlSink<W> {
    fn emit(&self, event: &MonitorEvent) {
        let record = JsonlRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                debug!("Failed to serialize event: {}", e);
                return;
            }
        };

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            debug!("Failed to write event: {}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn report(compass_id: u8, cal_status: u8, fitness: f32) -> CalibrationRecord {
        CalibrationRecord {
            compass_id,
            cal_status,
            fitness: Some(fitness),
            completion_pct: None,
        }
    }

    #[test]
    fn test_flight_mode_lines() {
        let lines = render_lines(&MonitorEvent::flight_mode(FlightMode::ReturnToLaunch));
        assert_eq!(lines, vec!["Flight mode 5: ReturnToLaunch"]);
    }

    #[test]
    fn test_report_lines_in_order() {
        let event = MonitorEvent::calibration_report(RawMessageKind::Report, &report(0, 4, 12.7));
        assert_eq!(
            render_lines(&event),
            vec![
                "Received MAG_CAL_REPORT packet (ID 192)",
                "Compass ID: 0",
                "Status 4: MAG_CAL_SUCCESS",
                "Fitness: 12",
            ]
        );
    }

    #[test]
    fn test_progress_message_lines() {
        let record = CalibrationRecord {
            compass_id: 1,
            cal_status: 2,
            fitness: None,
            completion_pct: Some(37),
        };
        let event = MonitorEvent::calibration_report(RawMessageKind::Progress, &record);
        assert_eq!(
            render_lines(&event),
            vec![
                "Received MAG_CAL_PROGRESS packet (ID 191)",
                "Compass ID: 1",
                "Status 2: MAG_CAL_RUNNING_STEP_ONE",
                "Completion: 37%",
            ]
        );
    }

    #[test]
    fn test_progress_only() {
        let progress = ProgressData {
            has_status_text: false,
            status_text: "ignored".to_string(),
            has_progress: true,
            progress: 0.42,
        };
        let lines = render_lines(&MonitorEvent::calibration_progress(&progress));
        assert_eq!(lines, vec!["Compass calibration progress: 42%"]);
    }

    #[test]
    fn test_status_text_only() {
        let progress = ProgressData::with_status_text("rotate to a different side");
        let lines = render_lines(&MonitorEvent::calibration_progress(&progress));
        assert_eq!(lines, vec!["Compass calibration status: rotate to a different side"]);
    }

    #[test]
    fn test_status_text_then_progress() {
        let progress = ProgressData {
            has_status_text: true,
            status_text: "back side done".to_string(),
            has_progress: true,
            progress: 0.5,
        };
        let lines = render_lines(&MonitorEvent::calibration_progress(&progress));
        assert_eq!(
            lines,
            vec![
                "Compass calibration status: back side done",
                "Compass calibration progress: 50%",
            ]
        );
    }

    #[test]
    fn test_empty_progress_renders_nothing() {
        let lines = render_lines(&MonitorEvent::calibration_progress(&ProgressData::default()));
        assert!(lines.is_empty());
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(0.0), "0");
        assert_eq!(format_percent(1.0), "100");
        assert_eq!(format_percent(0.125), "12.5");
        assert_eq!(format_percent(0.07), "7");
    }

    #[test]
    fn test_text_sink_output() {
        let sink = TextSink::new(Vec::new());
        sink.emit(&MonitorEvent::flight_mode(FlightMode::Manual));
        sink.emit(&MonitorEvent::calibration_report(RawMessageKind::Report, &report(0, 2, 3.0)));

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            output,
            "Flight mode 9: Manual\n\
             \n\
             Received MAG_CAL_REPORT packet (ID 192)\n\
             Compass ID: 0\n\
             Status 2: MAG_CAL_RUNNING_STEP_ONE\n\
             Fitness: 3\n"
        );
    }

    #[test]
    fn test_jsonl_sink_output() {
        let sink = JsonlSink::new(Vec::new());
        sink.emit(&MonitorEvent::calibration_report(RawMessageKind::Report, &report(1, 200, 0.0)));

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(output.lines().count(), 1);

        let value: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(value["event"], "calibration_report");
        assert_eq!(value["message_id"], 192);
        assert_eq!(value["compass_id"], 1);
        assert_eq!(value["status"], 200);
        assert_eq!(value["label"], "UNKNOWN_STATUS");
        assert!(value["timestamp"].is_string());
        assert!(value.get("completion_pct").is_none());
    }
}
