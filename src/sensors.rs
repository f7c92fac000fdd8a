//! The three readings the battery monitor samples every tick.

use core::marker::PhantomData;
use embedded_hal::adc::{Channel, OneShot};

/// Source of battery and charger readings.
///
/// Reads are infallible. A sensor that fails must hand back something finite,
/// like its last good reading.
pub trait BatterySensors {
    /// Battery terminal voltage (V)
    fn read_battery_voltage(&mut self) -> f32;
    /// Current drawn from the battery (A)
    fn read_battery_current(&mut self) -> f32;
    /// Voltage at the charger input
    fn read_charge_voltage(&mut self) -> f32;
}

/// How raw ADC counts turn into physical units
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SensorScaling {
    /// Count at the ADC reference voltage (4095 for 12 bits)
    pub full_scale: u16,
    /// ADC reference voltage
    pub ref_voltage: f32,
    /// Multiplier undoing the battery sense resistor divider
    pub battery_divider: f32,
    /// Multiplier undoing the charger sense resistor divider
    pub charger_divider: f32,
    /// Current sense amplifier output at zero current (V)
    pub current_offset: f32,
    /// Current sense amplifier gain (V/A)
    pub current_gain: f32,
}

impl SensorScaling {
    /// Voltage at the ADC pin for a raw reading
    pub fn counts_to_volts(&self, counts: u16) -> f32 {
        (counts as f32 / self.full_scale as f32) * self.ref_voltage
    }
}

/// Samples the battery, current sense and charger channels of a single ADC.
///
/// `M` is the ADC peripheral the channels belong to, `A` the driver reading it.
pub struct AdcSensors<M, A, VP, IP, CP> {
    adc: A,
    battery_pin: VP,
    current_pin: IP,
    charger_pin: CP,
    scaling: SensorScaling,
    last_battery_voltage: f32,
    last_current: f32,
    last_charge_voltage: f32,
    _adc: PhantomData<M>,
}

impl<M, A, VP, IP, CP> AdcSensors<M, A, VP, IP, CP>
where
    VP: Channel<M>,
    IP: Channel<M>,
    CP: Channel<M>,
    A: OneShot<M, u16, VP> + OneShot<M, u16, IP> + OneShot<M, u16, CP>,
{
    pub fn new(
        adc: A,
        battery_pin: VP,
        current_pin: IP,
        charger_pin: CP,
        scaling: SensorScaling,
    ) -> Self {
        AdcSensors {
            adc,
            battery_pin,
            current_pin,
            charger_pin,
            scaling,
            last_battery_voltage: 0.,
            last_current: 0.,
            last_charge_voltage: 0.,
            _adc: PhantomData,
        }
    }
}

/// Blocks on a conversion, returning `None` if the ADC reported an error
fn sample<M, A, P>(adc: &mut A, pin: &mut P) -> Option<u16>
where
    P: Channel<M>,
    A: OneShot<M, u16, P>,
{
    nb::block!(adc.read(pin)).ok()
}

impl<M, A, VP, IP, CP> BatterySensors for AdcSensors<M, A, VP, IP, CP>
where
    VP: Channel<M>,
    IP: Channel<M>,
    CP: Channel<M>,
    A: OneShot<M, u16, VP> + OneShot<M, u16, IP> + OneShot<M, u16, CP>,
{
    fn read_battery_voltage(&mut self) -> f32 {
        if let Some(counts) = sample::<M, _, _>(&mut self.adc, &mut self.battery_pin) {
            self.last_battery_voltage =
                self.scaling.counts_to_volts(counts) * self.scaling.battery_divider;
        }
        self.last_battery_voltage
    }

    fn read_battery_current(&mut self) -> f32 {
        if let Some(counts) = sample::<M, _, _>(&mut self.adc, &mut self.current_pin) {
            let volts = self.scaling.counts_to_volts(counts);
            self.last_current = (volts - self.scaling.current_offset) / self.scaling.current_gain;
        }
        self.last_current
    }

    fn read_charge_voltage(&mut self) -> f32 {
        if let Some(counts) = sample::<M, _, _>(&mut self.adc, &mut self.charger_pin) {
            self.last_charge_voltage =
                self.scaling.counts_to_volts(counts) * self.scaling.charger_divider;
        }
        self.last_charge_voltage
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Fake ADC returning a fixed count per channel, or an error for `None`
    struct FakeAdc {
        counts: [Option<u16>; 3],
    }

    struct BatteryPin;
    struct CurrentPin;
    struct ChargerPin;

    impl Channel<FakeAdc> for BatteryPin {
        type ID = u8;
        fn channel() -> u8 {
            0
        }
    }

    impl Channel<FakeAdc> for CurrentPin {
        type ID = u8;
        fn channel() -> u8 {
            1
        }
    }

    impl Channel<FakeAdc> for ChargerPin {
        type ID = u8;
        fn channel() -> u8 {
            2
        }
    }

    impl<P: Channel<FakeAdc, ID = u8>> OneShot<FakeAdc, u16, P> for FakeAdc {
        type Error = ();

        fn read(&mut self, _pin: &mut P) -> nb::Result<u16, ()> {
            self.counts[P::channel() as usize].ok_or(nb::Error::Other(()))
        }
    }

    const SCALING: SensorScaling = SensorScaling {
        full_scale: 4095,
        ref_voltage: 3.3,
        battery_divider: 2.,
        charger_divider: 4.,
        current_offset: 0.5,
        current_gain: 1.,
    };

    fn sensors(
        counts: [Option<u16>; 3],
    ) -> AdcSensors<FakeAdc, FakeAdc, BatteryPin, CurrentPin, ChargerPin> {
        AdcSensors::new(FakeAdc { counts }, BatteryPin, CurrentPin, ChargerPin, SCALING)
    }

    #[test]
    fn scales_counts() {
        let mut s = sensors([Some(4095), Some(4095), Some(2048)]);
        assert!((s.read_battery_voltage() - 6.6).abs() < 1e-4);
        assert!((s.read_battery_current() - 2.8).abs() < 1e-4);
        assert!((s.read_charge_voltage() - 6.6).abs() < 0.01);
    }

    #[test]
    fn holds_last_good_reading_on_error() {
        let mut s = sensors([None, None, None]);
        assert_eq!(s.read_battery_voltage(), 0.);
        assert_eq!(s.read_charge_voltage(), 0.);

        s.adc.counts = [Some(2048), Some(620), Some(4095)];
        let voltage = s.read_battery_voltage();
        let current = s.read_battery_current();
        assert!((s.read_charge_voltage() - 13.2).abs() < 1e-4);

        s.adc.counts = [None, None, None];
        assert_eq!(s.read_battery_voltage(), voltage);
        assert_eq!(s.read_battery_current(), current);
        assert!((s.read_charge_voltage() - 13.2).abs() < 1e-4);
    }
}
