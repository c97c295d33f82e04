//! Percent to pulse mapping for the door motor controller.
//!
//! The controller has no absolute positioning. A full close is a single
//! command, and opening is done by sending a number of fixed-size pulses,
//! each of which drives the motor a small step up from the closed position.

use std::time::Duration;

use uuid::Uuid;

/// GATT characteristic that accepts drive commands.
pub const WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00000000_8e22_4541_9d4c_21edae82ed19);

/// One open step.
pub const OPEN_PULSE_PAYLOAD: [u8; 32] = [
    0x00, 0x27, 0x29, 0xe5, 0x68, 0x27, 0x29, 0xe5, 0x68, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0e,
    0x34, 0x0e, 0x34, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x13,
];

/// Drives the door all the way down.
pub const CLOSE_PAYLOAD: [u8; 32] = [
    0x00, 0x2a, 0x29, 0xe5, 0x68, 0x2a, 0x29, 0xe5, 0x68, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0e,
    0x34, 0x0e, 0x34, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2a,
];

pub const MAX_PERCENT: u8 = 100;

/// Number of pulses that opens the door to `percent`, rounding half up.
///
/// Percentages above 100 are treated as 100.
pub fn pulses_for(percent: u8, base_pulses: u32) -> u32 {
    let percent = u64::from(percent.min(MAX_PERCENT));
    let pulses = (percent * u64::from(base_pulses) + 50) / 100;

    // never exceeds base_pulses since percent <= 100
    pulses as u32
}

/// Applies the configured open cap to a requested percentage.
///
/// A cap of 0 means "no cap".
pub fn effective_percent(requested: u8, cap: u8) -> u8 {
    let requested = requested.min(MAX_PERCENT);
    if cap == 0 {
        requested
    } else {
        requested.min(cap.min(MAX_PERCENT))
    }
}

/// Approximate opening percentage reached after `pulses` pulses from closed.
pub fn percent_for_pulses(pulses: u32, base_pulses: u32) -> u8 {
    if base_pulses == 0 {
        return 0;
    }
    let base = u64::from(base_pulses);
    let pulses = u64::from(pulses.min(base_pulses));

    ((pulses * 200 + base) / (base * 2)) as u8
}

/// The writes needed to carry out one open or close request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulsePlan {
    /// Effective opening percentage after the cap
    pub percent: u8,
    /// Send a full close before the open pulses
    pub home_first: bool,
    /// Open pulses to send; 0 means a plain close
    pub pulses: u32,
    /// Pause between consecutive pulses
    pub interval: Duration,
}

impl PulsePlan {
    pub fn close() -> Self {
        Self {
            percent: 0,
            home_first: false,
            pulses: 0,
            interval: Duration::ZERO,
        }
    }

    pub fn open(
        requested: u8,
        cap: u8,
        base_pulses: u32,
        interval: Duration,
        home_before_open: bool,
    ) -> Self {
        let percent = effective_percent(requested, cap);
        let pulses = pulses_for(percent, base_pulses);
        if pulses == 0 {
            // an open that rounds to nothing is a close
            return Self::close();
        }

        Self {
            percent,
            home_first: home_before_open,
            pulses,
            interval,
        }
    }

    pub fn is_close(&self) -> bool {
        self.pulses == 0
    }

    /// Time spent between the first and the last pulse.
    pub fn pulse_span(&self) -> Duration {
        self.interval * self.pulses.saturating_sub(1)
    }
}
