//! # Calibration Session Protocol
//!
//! Progress of an autopilot-driven magnetometer calibration.
//!
//! The calibration is started with `MAV_CMD_PREFLIGHT_CALIBRATION` and the
//! autopilot then reports through `STATUSTEXT` messages prefixed with `[cal] `:
//!
//! - `[cal] progress <N>` - percentage done
//! - `[cal] calibration done: ...` - finished successfully
//! - `[cal] calibration failed: ...` - aborted with an error
//! - `[cal] calibration cancelled` - cancelled by the operator
//! - anything else - an instruction for the operator (e.g. which side to point down)

use serde::Serialize;

/// Prefix of calibration status texts
const CAL_PREFIX: &str = "[cal] ";

/// Outcome carried with every progress callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CalibrationResult {
    /// Still running, more updates follow
    Next,
    /// Calibration finished successfully
    Success,
    /// Calibration failed on the vehicle
    Failed,
    /// Calibration was cancelled
    Cancelled,
    /// Vehicle is busy and rejected the command for now
    Busy,
    /// Vehicle denied the command
    CommandDenied,
    /// Vehicle does not support the command
    Unsupported,
}

impl CalibrationResult {
    /// Whether the session is over after this result
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != CalibrationResult::Next
    }
}

/// Progress payload of a calibration callback
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressData {
    pub has_status_text: bool,
    pub status_text: String,
    pub has_progress: bool,
    /// Fraction done, 0.0 to 1.0
    pub progress: f32,
}

impl ProgressData {
    pub fn with_status_text(text: impl Into<String>) -> Self {
        Self {
            has_status_text: true,
            status_text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_progress(progress: f32) -> Self {
        Self {
            has_progress: true,
            progress: progress.clamp(0.0, 1.0),
            ..Self::default()
        }
    }
}

/// Parse a calibration status text
///
/// # Returns
///
/// * `Option<(CalibrationResult, ProgressData)>` - `None` if the text is not a calibration message
///
/// # Examples
///
/// ```
/// use mag_cal_monitor::link::calibration::{parse_status_text, CalibrationResult};
///
/// let (result, progress) = parse_status_text("[cal] progress 42").unwrap();
/// assert_eq!(result, CalibrationResult::Next);
/// assert!(progress.has_progress);
/// assert!((progress.progress - 0.42).abs() < 1e-6);
///
/// assert!(parse_status_text("Armed").is_none());
/// ```
pub fn parse_status_text(text: &str) -> Option<(CalibrationResult, ProgressData)> {
    let body = text.trim_end().strip_prefix(CAL_PREFIX)?;

    if let Some(value) = body.strip_prefix("progress ") {
        let percent = value
            .split_whitespace()
            .next()
            .and_then(|number| number.parse::<u32>().ok())?;
        let fraction = percent.min(100) as f32 / 100.0;
        return Some((CalibrationResult::Next, ProgressData::with_progress(fraction)));
    }

    let result = if body.starts_with("calibration done") {
        CalibrationResult::Success
    } else if body.starts_with("calibration failed") {
        CalibrationResult::Failed
    } else if body.starts_with("calibration cancelled") {
        CalibrationResult::Cancelled
    } else {
        CalibrationResult::Next
    };

    Some((result, ProgressData::with_status_text(body)))
}
