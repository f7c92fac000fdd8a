//! Published battery status that other tasks and interrupts can poll.
//!
//! Each value is its own atomic, so a single read is never torn, but two reads
//! may straddle a tick. Use `BatteryMonitor::report` when a consistent view of
//! every field is needed.

use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

/// What the battery is doing right now. The discriminants match the codes the
/// rest of the firmware reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BatteryState {
    /// No charger, load above `min_current`
    Discharge = 0,
    /// No charger, idle. Voltage is trustworthy for calibration
    Relaxed = 1,
    /// Charger seen, waiting for its voltage to settle
    BeginCharge = 2,
    /// Charging, counting down the time estimate
    Charge = 3,
    /// Battery voltage crossed the charge ready threshold
    ChargeFinished = 4,
}

impl BatteryState {
    pub fn from_u8(code: u8) -> Option<BatteryState> {
        match code {
            0 => Some(BatteryState::Discharge),
            1 => Some(BatteryState::Relaxed),
            2 => Some(BatteryState::BeginCharge),
            3 => Some(BatteryState::Charge),
            4 => Some(BatteryState::ChargeFinished),
            _ => None,
        }
    }

    pub fn is_charging(self) -> bool {
        matches!(
            self,
            BatteryState::BeginCharge | BatteryState::Charge | BatteryState::ChargeFinished
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            BatteryState::Discharge => "Discharge",
            BatteryState::Relaxed => "Relaxed",
            BatteryState::BeginCharge => "BeginCharge",
            BatteryState::Charge => "Charge",
            BatteryState::ChargeFinished => "ChargeFinished",
        }
    }
}

/// Converts a state of charge fraction to a whole percentage, truncating
pub fn soc_to_percent(soc: f32) -> u8 {
    (soc * 100.) as u8
}

/// A copy of every query value, taken at one point in time
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BatteryReport {
    pub state: BatteryState,
    pub state_of_charge: f32,
    pub charge_time_left_min: u16,
}

impl BatteryReport {
    pub fn state_of_charge_percent(&self) -> u8 {
        soc_to_percent(self.state_of_charge)
    }

    pub fn is_charging(&self) -> bool {
        self.state.is_charging()
    }

    pub fn is_discharge_allowed(&self) -> bool {
        !self.is_charging()
    }
}

/// Lock-free status written by the monitor once per tick.
///
/// Only plain loads and stores are used, so this works on cores without
/// compare-and-swap (thumbv6m).
pub struct BatteryStatus {
    state: AtomicU8,
    charge_time_left_min: AtomicU16,
    /// `f32` bit pattern of the state of charge fraction
    soc_bits: AtomicU32,
}

impl BatteryStatus {
    pub const fn new() -> BatteryStatus {
        BatteryStatus {
            state: AtomicU8::new(BatteryState::Relaxed as u8),
            charge_time_left_min: AtomicU16::new(0),
            soc_bits: AtomicU32::new(0),
        }
    }

    pub(crate) fn publish(&self, report: &BatteryReport) {
        self.soc_bits
            .store(report.state_of_charge.to_bits(), Ordering::Relaxed);
        self.charge_time_left_min
            .store(report.charge_time_left_min, Ordering::Relaxed);
        self.state.store(report.state as u8, Ordering::Release);
    }

    pub fn state(&self) -> BatteryState {
        // only `publish` writes this, always with a valid discriminant
        BatteryState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(BatteryState::Relaxed)
    }

    pub fn charge_time_left_minutes(&self) -> u16 {
        self.charge_time_left_min.load(Ordering::Relaxed)
    }

    pub fn state_of_charge_fraction(&self) -> f32 {
        f32::from_bits(self.soc_bits.load(Ordering::Relaxed))
    }

    pub fn state_of_charge_percent(&self) -> u8 {
        soc_to_percent(self.state_of_charge_fraction())
    }

    pub fn is_charging(&self) -> bool {
        self.state().is_charging()
    }

    pub fn is_discharge_allowed(&self) -> bool {
        !self.is_charging()
    }
}

impl Default for BatteryStatus {
    fn default() -> Self {
        BatteryStatus::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static STATUS: BatteryStatus = BatteryStatus::new();

    #[test]
    fn starts_relaxed_and_empty() {
        let status = BatteryStatus::new();
        assert_eq!(status.state(), BatteryState::Relaxed);
        assert_eq!(status.state_of_charge_fraction(), 0.);
        assert_eq!(status.charge_time_left_minutes(), 0);
        assert!(status.is_discharge_allowed());
    }

    #[test]
    fn publish_is_visible_through_a_static() {
        STATUS.publish(&BatteryReport {
            state: BatteryState::Charge,
            state_of_charge: 0.427,
            charge_time_left_min: 33,
        });
        assert_eq!(STATUS.state(), BatteryState::Charge);
        assert_eq!(STATUS.state_of_charge_fraction(), 0.427);
        assert_eq!(STATUS.state_of_charge_percent(), 42);
        assert_eq!(STATUS.charge_time_left_minutes(), 33);
        assert!(STATUS.is_charging());
        assert!(!STATUS.is_discharge_allowed());
    }

    #[test]
    fn charging_states() {
        for code in 0..=4 {
            let state = BatteryState::from_u8(code).unwrap();
            assert_eq!(state as u8, code);
            assert_eq!(state.is_charging(), code >= 2);
        }
        assert_eq!(BatteryState::from_u8(5), None);
    }

    #[test]
    fn percent_truncates() {
        assert_eq!(soc_to_percent(0.0199), 1);
        assert_eq!(soc_to_percent(0.999), 99);
        assert_eq!(soc_to_percent(1.), 100);
    }
}
