//! # Status Mapping
//!
//! Maps flight-mode and magnetometer calibration status codes to the labels
//! shown to the operator. Every code maps to a label; codes outside the known
//! set get a distinguishable "unknown" label instead of an error.

use serde::Serialize;

/// Label for flight-mode codes outside the known set
pub const UNKNOWN_FLIGHT_MODE_LABEL: &str = "Unknown; a new mode?";

/// Label for calibration status codes outside the known set
pub const UNKNOWN_CAL_STATUS_LABEL: &str = "UNKNOWN_STATUS";

/// Calibration status code reported once the compass calibration succeeded
pub const MAG_CAL_SUCCESS: u8 = 4;

/// Flight mode as reported by the telemetry feed
///
/// The numeric codes are stable and are what the operator sees next to the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlightMode {
    Unknown,
    Ready,
    Takeoff,
    Hold,
    Mission,
    ReturnToLaunch,
    Land,
    Offboard,
    FollowMe,
    Manual,
    Altctl,
    Posctl,
    Acro,
    Stabilized,
    Rattitude,
}

impl FlightMode {
    /// All known flight modes in code order
    pub const ALL: [FlightMode; 15] = [
        FlightMode::Unknown,
        FlightMode::Ready,
        FlightMode::Takeoff,
        FlightMode::Hold,
        FlightMode::Mission,
        FlightMode::ReturnToLaunch,
        FlightMode::Land,
        FlightMode::Offboard,
        FlightMode::FollowMe,
        FlightMode::Manual,
        FlightMode::Altctl,
        FlightMode::Posctl,
        FlightMode::Acro,
        FlightMode::Stabilized,
        FlightMode::Rattitude,
    ];

    /// Numeric code of this flight mode
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            FlightMode::Unknown => 0,
            FlightMode::Ready => 1,
            FlightMode::Takeoff => 2,
            FlightMode::Hold => 3,
            FlightMode::Mission => 4,
            FlightMode::ReturnToLaunch => 5,
            FlightMode::Land => 6,
            FlightMode::Offboard => 7,
            FlightMode::FollowMe => 8,
            FlightMode::Manual => 9,
            FlightMode::Altctl => 10,
            FlightMode::Posctl => 11,
            FlightMode::Acro => 12,
            FlightMode::Stabilized => 13,
            FlightMode::Rattitude => 14,
        }
    }

    /// Look up a flight mode by its numeric code
    ///
    /// # Examples
    ///
    /// ```
    /// use mag_cal_monitor::status::FlightMode;
    ///
    /// assert_eq!(FlightMode::from_code(4), Some(FlightMode::Mission));
    /// assert_eq!(FlightMode::from_code(99), None);
    /// ```
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|mode| mode.code() == code)
    }

    /// Human-readable label
    #[must_use]
    pub fn label(self) -> &'static str {
        map_flight_mode(self.code())
    }
}

/// Map a flight-mode code to its label
///
/// # Examples
///
/// ```
/// use mag_cal_monitor::status::map_flight_mode;
///
/// assert_eq!(map_flight_mode(5), "ReturnToLaunch");
/// assert_eq!(map_flight_mode(200), "Unknown; a new mode?");
/// ```
#[must_use]
pub fn map_flight_mode(code: u32) -> &'static str {
    match code {
        0 => "Unknown",
        1 => "Ready",
        2 => "Takeoff",
        3 => "Hold",
        4 => "Mission",
        5 => "ReturnToLaunch",
        6 => "Land",
        7 => "Offboard",
        8 => "FollowMe",
        9 => "Manual",
        10 => "Altctl",
        11 => "Posctl",
        12 => "Acro",
        13 => "Stabilized",
        14 => "Rattitude",
        _ => UNKNOWN_FLIGHT_MODE_LABEL,
    }
}

/// Map a MAVLink `MAG_CAL_STATUS` code to its label
///
/// # Examples
///
/// ```
/// use mag_cal_monitor::status::map_calibration_status;
///
/// assert_eq!(map_calibration_status(4), "MAG_CAL_SUCCESS");
/// assert_eq!(map_calibration_status(200), "UNKNOWN_STATUS");
/// ```
#[must_use]
pub fn map_calibration_status(code: u8) -> &'static str {
    match code {
        0 => "MAG_CAL_NOT_STARTED",
        1 => "MAG_CAL_WAITING_TO_START",
        2 => "MAG_CAL_RUNNING_STEP_ONE",
        3 => "MAG_CAL_RUNNING_STEP_TWO",
        MAG_CAL_SUCCESS => "MAG_CAL_SUCCESS",
        5 => "MAG_CAL_FAILED",
        6 => "MAG_CAL_BAD_ORIENTATION",
        7 => "MAG_CAL_BAD_RADIUS",
        _ => UNKNOWN_CAL_STATUS_LABEL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flight_mode_codes_round_trip_through_labels() {
        for mode in FlightMode::ALL {
            assert_eq!(FlightMode::from_code(mode.code()), Some(mode));
            assert_eq!(mode.label(), format!("{:?}", mode));
        }
    }

    #[test]
    fn test_flight_mode_codes_are_contiguous() {
        for (index, mode) in FlightMode::ALL.iter().enumerate() {
            assert_eq!(mode.code(), index as u32);
        }
    }

    #[test]
    fn test_unknown_flight_mode_code() {
        assert_eq!(map_flight_mode(15), UNKNOWN_FLIGHT_MODE_LABEL);
        assert_eq!(map_flight_mode(u32::MAX), UNKNOWN_FLIGHT_MODE_LABEL);
        assert_eq!(FlightMode::from_code(15), None);
    }

    #[test]
    fn test_unknown_mode_is_not_the_unknown_label() {
        // The real Unknown mode and an unrecognised code stay distinguishable
        assert_eq!(FlightMode::Unknown.label(), "Unknown");
        assert_ne!(FlightMode::Unknown.label(), UNKNOWN_FLIGHT_MODE_LABEL);
    }

    #[test]
    fn test_calibration_status_labels() {
        let expected = [
            "MAG_CAL_NOT_STARTED",
            "MAG_CAL_WAITING_TO_START",
            "MAG_CAL_RUNNING_STEP_ONE",
            "MAG_CAL_RUNNING_STEP_TWO",
            "MAG_CAL_SUCCESS",
            "MAG_CAL_FAILED",
            "MAG_CAL_BAD_ORIENTATION",
            "MAG_CAL_BAD_RADIUS",
        ];
        for (code, label) in expected.iter().enumerate() {
            assert_eq!(map_calibration_status(code as u8), *label);
        }
    }

    #[test]
    fn test_calibration_status_out_of_range() {
        for code in [8u8, 42, 200, 255] {
            assert_eq!(map_calibration_status(code), UNKNOWN_CAL_STATUS_LABEL);
        }
    }
}
