//! Static battery configuration, checked once before the monitor starts.

use core::fmt;

use crate::calibration::CalibrationCurve;

/// Period of the control loop the tick thresholds are derived from
pub const DEFAULT_TICK_PERIOD_MS: u32 = 100;

/// Longest tick period that still counts minutes closely enough
pub const MAX_TICK_PERIOD_MS: u32 = 1_000;

const MS_PER_MINUTE: u32 = 60_000;

/// Reasons a configuration is rejected
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A curve entry is NaN or infinite
    NonFiniteCurve,
    /// Curve voltages must be strictly ascending
    VoltagesNotAscending,
    /// Curve percentages must never decrease
    PercentagesDecreasing,
    /// Curve percentages must stay within 0-100
    PercentageOutOfRange,
    /// One of the threshold scalars is NaN or infinite
    NonFiniteThreshold,
    /// Tick period must be 1-1000ms and divide a minute evenly
    TickPeriodOutOfRange,
}

impl ConfigError {
    /// Short description, usable with `ufmt` which can't drive `fmt::Display`
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigError::NonFiniteCurve => "curve has non-finite entries",
            ConfigError::VoltagesNotAscending => "curve voltages not ascending",
            ConfigError::PercentagesDecreasing => "curve percentages decrease",
            ConfigError::PercentageOutOfRange => "curve percentages outside 0-100",
            ConfigError::NonFiniteThreshold => "threshold is not finite",
            ConfigError::TickPeriodOutOfRange => "tick period not 1-1000ms dividing a minute",
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the battery monitor needs to know about the pack and charger
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BatteryConfig {
    /// Resting voltage to charge percentage mapping
    pub curve: CalibrationCurve,
    /// Current draw (A) above which the battery is discharging
    pub min_current: f32,
    /// Charger voltage above which a charger is present
    pub min_charge_voltage: f32,
    /// Battery voltage above which charging is complete
    pub charge_ready_voltage: f32,
    /// Ticks to sit in `Relaxed` before recalibrating from voltage
    pub min_time_before_calib: u16,
    /// Minutes to charge an empty battery with a nominal (10 unit) charger voltage
    pub time_to_full_charge_min: u16,
    /// Period between calls to `BatteryMonitor::tick`
    pub tick_period_ms: u32,
}

impl BatteryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            self.min_current,
            self.min_charge_voltage,
            self.charge_ready_voltage,
        ];
        if thresholds.iter().any(|t| !t.is_finite()) {
            return Err(ConfigError::NonFiniteThreshold);
        }

        // the minute rollover is a whole tick count
        if self.tick_period_ms == 0
            || self.tick_period_ms > MAX_TICK_PERIOD_MS
            || MS_PER_MINUTE % self.tick_period_ms != 0
        {
            return Err(ConfigError::TickPeriodOutOfRange);
        }
        Ok(())
    }

    /// Number of ticks making up one minute of wall time
    pub fn ticks_per_minute(&self) -> u32 {
        MS_PER_MINUTE / self.tick_period_ms
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::calibration::LIPO_1S_CURVE;

    fn config() -> BatteryConfig {
        BatteryConfig {
            curve: LIPO_1S_CURVE,
            min_current: 0.05,
            min_charge_voltage: 4.5,
            charge_ready_voltage: 4.18,
            min_time_before_calib: 300,
            time_to_full_charge_min: 120,
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
        }
    }

    #[test]
    fn default_period_is_600_ticks_a_minute() {
        assert_eq!(config().validate(), Ok(()));
        assert_eq!(config().ticks_per_minute(), 600);
    }

    #[test]
    fn rollover_rescales_with_period() {
        let mut cfg = config();
        cfg.tick_period_ms = 250;
        assert_eq!(cfg.ticks_per_minute(), 240);
        assert_eq!(cfg.validate(), Ok(()));
        cfg.tick_period_ms = MAX_TICK_PERIOD_MS;
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.ticks_per_minute(), 60);
        cfg.tick_period_ms = 1;
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.ticks_per_minute(), 60_000);
    }

    #[test]
    fn rejects_bad_period() {
        let mut cfg = config();
        cfg.tick_period_ms = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::TickPeriodOutOfRange));
        cfg.tick_period_ms = 1_001;
        assert_eq!(cfg.validate(), Err(ConfigError::TickPeriodOutOfRange));
        cfg.tick_period_ms = 60_000;
        assert_eq!(cfg.validate(), Err(ConfigError::TickPeriodOutOfRange));
        // 85 ticks of 700ms leaves 500ms of every minute uncounted
        cfg.tick_period_ms = 700;
        assert_eq!(cfg.validate(), Err(ConfigError::TickPeriodOutOfRange));
        cfg.tick_period_ms = 7;
        assert_eq!(cfg.validate(), Err(ConfigError::TickPeriodOutOfRange));
    }

    #[test]
    fn rejects_non_finite_thresholds() {
        let mut cfg = config();
        cfg.charge_ready_voltage = f32::NAN;
        assert_eq!(cfg.validate(), Err(ConfigError::NonFiniteThreshold));
        assert_eq!(ConfigError::NonFiniteThreshold.as_str(), "threshold is not finite");
    }
}
