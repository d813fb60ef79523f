//! # Flight Mode Decoding
//!
//! Derives the [`FlightMode`] from a HEARTBEAT's custom mode.
//!
//! ## PX4
//!
//! `custom_mode` packs the main mode in bits 16..24 and the auto sub mode in
//! bits 24..32.
//!
//! ## ArduPilot
//!
//! `custom_mode` is the copter mode number.

use mavlink::ardupilotmega::{MavAutopilot, MavModeFlag, HEARTBEAT_DATA};

use crate::status::FlightMode;

/// Autopilot family that sent the heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Autopilot {
    Px4,
    ArduPilot,
    Other,
}

// PX4 main modes
const PX4_MAIN_MANUAL: u8 = 1;
const PX4_MAIN_ALTCTL: u8 = 2;
const PX4_MAIN_POSCTL: u8 = 3;
const PX4_MAIN_AUTO: u8 = 4;
const PX4_MAIN_ACRO: u8 = 5;
const PX4_MAIN_OFFBOARD: u8 = 6;
const PX4_MAIN_STABILIZED: u8 = 7;
const PX4_MAIN_RATTITUDE: u8 = 8;

// PX4 auto sub modes
const PX4_AUTO_READY: u8 = 1;
const PX4_AUTO_TAKEOFF: u8 = 2;
const PX4_AUTO_LOITER: u8 = 3;
const PX4_AUTO_MISSION: u8 = 4;
const PX4_AUTO_RTL: u8 = 5;
const PX4_AUTO_LAND: u8 = 6;
const PX4_AUTO_FOLLOW_TARGET: u8 = 8;
const PX4_AUTO_PRECLAND: u8 = 9;

/// Flight mode of a heartbeat
pub fn flight_mode_from_heartbeat(heartbeat: &HEARTBEAT_DATA) -> FlightMode {
    let autopilot = match heartbeat.autopilot {
        MavAutopilot::MAV_AUTOPILOT_PX4 => Autopilot::Px4,
        MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA => Autopilot::ArduPilot,
        _ => Autopilot::Other,
    };
    let custom_mode_enabled = heartbeat
        .base_mode
        .contains(MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED);

    decode_flight_mode(autopilot, custom_mode_enabled, heartbeat.custom_mode)
}

/// Flight mode from an autopilot's custom mode field
///
/// # Examples
///
/// ```
/// use mag_cal_monitor::link::flight_mode::{decode_flight_mode, Autopilot};
/// use mag_cal_monitor::status::FlightMode;
///
/// // PX4 AUTO.MISSION
/// assert_eq!(decode_flight_mode(Autopilot::Px4, true, 0x0404_0000), FlightMode::Mission);
/// // ArduPilot LAND
/// assert_eq!(decode_flight_mode(Autopilot::ArduPilot, true, 9), FlightMode::Land);
/// ```
pub fn decode_flight_mode(autopilot: Autopilot, custom_mode_enabled: bool, custom_mode: u32) -> FlightMode {
    if !custom_mode_enabled {
        return FlightMode::Unknown;
    }

    match autopilot {
        Autopilot::Px4 => px4_flight_mode(custom_mode),
        Autopilot::ArduPilot => ardupilot_flight_mode(custom_mode),
        Autopilot::Other => FlightMode::Unknown,
    }
}

fn px4_flight_mode(custom_mode: u32) -> FlightMode {
    let main_mode = ((custom_mode >> 16) & 0xFF) as u8;
    let sub_mode = ((custom_mode >> 24) & 0xFF) as u8;

    match main_mode {
        PX4_MAIN_MANUAL => FlightMode::Manual,
        PX4_MAIN_ALTCTL => FlightMode::Altctl,
        PX4_MAIN_POSCTL => FlightMode::Posctl,
        PX4_MAIN_ACRO => FlightMode::Acro,
        PX4_MAIN_OFFBOARD => FlightMode::Offboard,
        PX4_MAIN_STABILIZED => FlightMode::Stabilized,
        PX4_MAIN_RATTITUDE => FlightMode::Rattitude,
        PX4_MAIN_AUTO => match sub_mode {
            PX4_AUTO_READY => FlightMode::Ready,
            PX4_AUTO_TAKEOFF => FlightMode::Takeoff,
            PX4_AUTO_LOITER => FlightMode::Hold,
            PX4_AUTO_MISSION => FlightMode::Mission,
            PX4_AUTO_RTL => FlightMode::ReturnToLaunch,
            PX4_AUTO_LAND | PX4_AUTO_PRECLAND => FlightMode::Land,
            PX4_AUTO_FOLLOW_TARGET => FlightMode::FollowMe,
            _ => FlightMode::Unknown,
        },
        _ => FlightMode::Unknown,
    }
}

fn ardupilot_flight_mode(custom_mode: u32) -> FlightMode {
    match custom_mode {
        0 => FlightMode::Stabilized,          // STABILIZE
        1 => FlightMode::Acro,                // ACRO
        2 => FlightMode::Altctl,              // ALT_HOLD
        3 => FlightMode::Mission,             // AUTO
        4 => FlightMode::Offboard,            // GUIDED
        5 | 17 => FlightMode::Hold,           // LOITER, BRAKE
        6 | 21 => FlightMode::ReturnToLaunch, // RTL, SMART_RTL
        9 => FlightMode::Land,                // LAND
        16 => FlightMode::Posctl,             // POSHOLD
        23 => FlightMode::FollowMe,           // FOLLOW
        _ => FlightMode::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px4_mode(main: u8, sub: u8) -> u32 {
        (u32::from(sub) << 24) | (u32::from(main) << 16)
    }

    #[test]
    fn test_px4_main_modes() {
        let cases = [
            (PX4_MAIN_MANUAL, FlightMode::Manual),
            (PX4_MAIN_ALTCTL, FlightMode::Altctl),
            (PX4_MAIN_POSCTL, FlightMode::Posctl),
            (PX4_MAIN_ACRO, FlightMode::Acro),
            (PX4_MAIN_OFFBOARD, FlightMode::Offboard),
            (PX4_MAIN_STABILIZED, FlightMode::Stabilized),
            (PX4_MAIN_RATTITUDE, FlightMode::Rattitude),
        ];
        for (main, expected) in cases {
            assert_eq!(decode_flight_mode(Autopilot::Px4, true, px4_mode(main, 0)), expected);
        }
    }

    #[test]
    fn test_px4_auto_sub_modes() {
        let cases = [
            (PX4_AUTO_READY, FlightMode::Ready),
            (PX4_AUTO_TAKEOFF, FlightMode::Takeoff),
            (PX4_AUTO_LOITER, FlightMode::Hold),
            (PX4_AUTO_MISSION, FlightMode::Mission),
            (PX4_AUTO_RTL, FlightMode::ReturnToLaunch),
            (PX4_AUTO_LAND, FlightMode::Land),
            (PX4_AUTO_PRECLAND, FlightMode::Land),
            (PX4_AUTO_FOLLOW_TARGET, FlightMode::FollowMe),
        ];
        for (sub, expected) in cases {
            assert_eq!(
                decode_flight_mode(Autopilot::Px4, true, px4_mode(PX4_MAIN_AUTO, sub)),
                expected
            );
        }
    }

    #[test]
    fn test_px4_unknown_modes() {
        assert_eq!(decode_flight_mode(Autopilot::Px4, true, px4_mode(42, 0)), FlightMode::Unknown);
        assert_eq!(
            decode_flight_mode(Autopilot::Px4, true, px4_mode(PX4_MAIN_AUTO, 42)),
            FlightMode::Unknown
        );
    }

    #[test]
    fn test_ardupilot_copter_modes() {
        assert_eq!(decode_flight_mode(Autopilot::ArduPilot, true, 0), FlightMode::Stabilized);
        assert_eq!(decode_flight_mode(Autopilot::ArduPilot, true, 5), FlightMode::Hold);
        assert_eq!(decode_flight_mode(Autopilot::ArduPilot, true, 6), FlightMode::ReturnToLaunch);
        assert_eq!(decode_flight_mode(Autopilot::ArduPilot, true, 16), FlightMode::Posctl);
        assert_eq!(decode_flight_mode(Autopilot::ArduPilot, true, 99), FlightMode::Unknown);
    }

    #[test]
    fn test_custom_mode_disabled() {
        assert_eq!(decode_flight_mode(Autopilot::Px4, false, px4_mode(PX4_MAIN_MANUAL, 0)), FlightMode::Unknown);
        assert_eq!(decode_flight_mode(Autopilot::ArduPilot, false, 9), FlightMode::Unknown);
    }

    #[test]
    fn test_other_autopilot() {
        assert_eq!(decode_flight_mode(Autopilot::Other, true, 9), FlightMode::Unknown);
    }
}
