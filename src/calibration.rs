//! Maps battery voltage to state of charge. The stock curve numbers come from
//! https://blog.ampow.com/lipo-voltage-chart/

use crate::config::ConfigError;

/// Number of points in a calibration curve
pub const CURVE_POINTS: usize = 11;

/// Single cell LiPo resting voltage for 0%, 10%, ... 100% state of charge
pub const LIPO_1S_VOLTAGE: [f32; CURVE_POINTS] = [
    3.27, // Don't discharge below this amount for good battery health
    3.69, 3.71, 3.75, 3.79, 3.82, 3.85, 3.91, 3.98, 4.08, 4.20,
];

/// Percentages matching `LIPO_1S_VOLTAGE`
pub const LIPO_1S_PERCENTAGE: [f32; CURVE_POINTS] = [
    0., 10., 20., 30., 40., 50., 60., 70., 80., 90., 100.,
];

/// Stock single cell LiPo curve
pub const LIPO_1S_CURVE: CalibrationCurve = CalibrationCurve {
    voltages: LIPO_1S_VOLTAGE,
    percentages: LIPO_1S_PERCENTAGE,
};

/// Linearly interpolates `ys` at `value` over the points `xs`.
///
/// Values outside of `xs` clamp to the first or last output. `xs` must be sorted
/// ascending and the same length as `ys`, with at least two points.
pub fn interpolate(value: f32, xs: &[f32], ys: &[f32]) -> f32 {
    debug_assert!(xs.len() >= 2 && xs.len() == ys.len());
    let last = xs.len() - 1;

    // written as a negation so a NaN probe clamps low too
    if !(value > xs[0]) {
        return ys[0];
    }
    if value >= xs[last] {
        return ys[last];
    }

    let mut pos = 1;
    while value > xs[pos] {
        pos += 1;
    }

    // exact table points are returned as-is
    if value == xs[pos] {
        return ys[pos];
    }

    (value - xs[pos - 1]) * (ys[pos] - ys[pos - 1]) / (xs[pos] - xs[pos - 1]) + ys[pos - 1]
}

/// A validated voltage to percentage curve
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CalibrationCurve {
    voltages: [f32; CURVE_POINTS],
    percentages: [f32; CURVE_POINTS],
}

impl CalibrationCurve {
    /// Builds a curve, checking that it describes a monotonic mapping into 0-100%
    ///
    /// # Arguments
    /// * voltages: Battery voltages, strictly ascending
    /// * percentages: Charge percentage at each voltage, non-decreasing
    pub fn new(
        voltages: [f32; CURVE_POINTS],
        percentages: [f32; CURVE_POINTS],
    ) -> Result<CalibrationCurve, ConfigError> {
        let curve = CalibrationCurve {
            voltages,
            percentages,
        };
        curve.validate()?;
        Ok(curve)
    }

    /// Checks the curve invariants
    fn validate(&self) -> Result<(), ConfigError> {
        if self.voltages.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::NonFiniteCurve);
        }
        if self.percentages.iter().any(|p| !p.is_finite()) {
            return Err(ConfigError::NonFiniteCurve);
        }
        if self.voltages.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ConfigError::VoltagesNotAscending);
        }
        if self.percentages.windows(2).any(|w| w[1] < w[0]) {
            return Err(ConfigError::PercentagesDecreasing);
        }
        if self.percentages[0] < 0. || self.percentages[CURVE_POINTS - 1] > 100. {
            return Err(ConfigError::PercentageOutOfRange);
        }
        Ok(())
    }

    /// Charge percentage (0-100) for the given battery voltage
    pub fn percentage(&self, voltage: f32) -> f32 {
        interpolate(voltage, &self.voltages, &self.percentages)
    }
}

/// Converts a resting battery voltage to a state of charge fraction (0-1)
pub fn calibrate_soc(voltage: f32, curve: &CalibrationCurve) -> f32 {
    curve.percentage(voltage) / 100.
}

#[cfg(test)]
mod test {
    use super::*;

    const XS: [f32; 3] = [1., 2., 4.];
    const YS: [f32; 3] = [10., 20., 60.];

    #[test]
    fn clamps_outside_the_table() {
        for probe in [-100., 0., 0.999, 1.] {
            assert_eq!(interpolate(probe, &XS, &YS), 10.);
        }
        for probe in [4., 4.001, 1e9, f32::INFINITY] {
            assert_eq!(interpolate(probe, &XS, &YS), 60.);
        }
        assert_eq!(interpolate(f32::NEG_INFINITY, &XS, &YS), 10.);
        assert_eq!(interpolate(f32::NAN, &XS, &YS), 10.);
    }

    #[test]
    fn exact_points_are_not_interpolated() {
        for (x, y) in LIPO_1S_VOLTAGE.iter().zip(LIPO_1S_PERCENTAGE.iter()) {
            assert_eq!(interpolate(*x, &LIPO_1S_VOLTAGE, &LIPO_1S_PERCENTAGE), *y);
        }
    }

    #[test]
    fn interpolates_within_segments() {
        assert!((interpolate(1.5, &XS, &YS) - 15.).abs() < 1e-4);
        assert!((interpolate(3., &XS, &YS) - 40.).abs() < 1e-4);
        assert!((interpolate(3.5, &XS, &YS) - 50.).abs() < 1e-4);
    }

    #[test]
    fn output_is_monotonic() {
        let mut previous = f32::NEG_INFINITY;
        let mut voltage = 3.0;
        while voltage < 4.5 {
            let percentage = LIPO_1S_CURVE.percentage(voltage);
            assert!(percentage >= previous, "dropped at {}", voltage);
            previous = percentage;
            voltage += 0.001;
        }
    }

    #[test]
    fn soc_stays_in_unit_range() {
        for voltage in [-5., 0., 3.0, 3.27, 3.5, 3.8, 4.1, 4.2, 4.3, 50.] {
            let soc = calibrate_soc(voltage, &LIPO_1S_CURVE);
            assert!((0. ..=1.).contains(&soc), "soc {} at {}", soc, voltage);
        }
        assert_eq!(calibrate_soc(4.2, &LIPO_1S_CURVE), 1.);
        assert_eq!(calibrate_soc(3.82, &LIPO_1S_CURVE), 0.5);
    }

    #[test]
    fn stock_curve_is_valid() {
        assert_eq!(LIPO_1S_CURVE.validate(), Ok(()));
        assert_eq!(
            CalibrationCurve::new(LIPO_1S_VOLTAGE, LIPO_1S_PERCENTAGE),
            Ok(LIPO_1S_CURVE)
        );
    }

    #[test]
    fn rejects_malformed_curves() {
        let mut voltages = LIPO_1S_VOLTAGE;
        voltages[4] = voltages[3];
        assert_eq!(
            CalibrationCurve::new(voltages, LIPO_1S_PERCENTAGE),
            Err(ConfigError::VoltagesNotAscending)
        );

        let mut percentages = LIPO_1S_PERCENTAGE;
        percentages[6] = 5.;
        assert_eq!(
            CalibrationCurve::new(LIPO_1S_VOLTAGE, percentages),
            Err(ConfigError::PercentagesDecreasing)
        );

        let mut percentages = LIPO_1S_PERCENTAGE;
        percentages[10] = 101.;
        assert_eq!(
            CalibrationCurve::new(LIPO_1S_VOLTAGE, percentages),
            Err(ConfigError::PercentageOutOfRange)
        );

        let mut voltages = LIPO_1S_VOLTAGE;
        voltages[0] = f32::NAN;
        assert_eq!(
            CalibrationCurve::new(voltages, LIPO_1S_PERCENTAGE),
            Err(ConfigError::NonFiniteCurve)
        );
    }
}
