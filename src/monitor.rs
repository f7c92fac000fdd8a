//! Battery charge/discharge state machine, stepped once per control loop tick.

use crate::calibration::calibrate_soc;
use crate::config::{BatteryConfig, ConfigError};
use crate::sensors::BatterySensors;
use crate::status::{soc_to_percent, BatteryReport, BatteryState, BatteryStatus};

/// Two charger readings closer than this (V) are considered stable
pub const CHARGE_VOLTAGE_STABLE_LIMIT: f32 = 0.2;
/// Charger voltage `time_to_full_charge_min` is specified against
const NOMINAL_CHARGE_VOLTAGE: f32 = 10.;
/// At or below this percentage a discharging battery raises a warning
const LOW_SOC_PERCENT: u8 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// Readings attached to charge start/finish notifications
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChargeReport {
    pub charge_voltage: f32,
    pub soc_percent: u8,
    pub minutes_left: u16,
    pub battery_voltage: f32,
}

/// Something worth telling the user about. Rendering is up to the caller.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BatteryEvent {
    ChargeStarted(ChargeReport),
    ChargeFinished(ChargeReport),
    LowSoc { soc_percent: u8, battery_voltage: f32 },
}

impl BatteryEvent {
    pub fn severity(&self) -> Severity {
        match self {
            BatteryEvent::LowSoc { .. } => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// Owns the battery state and is the only writer of its `BatteryStatus`
pub struct BatteryMonitor<'a, S> {
    config: BatteryConfig,
    sensors: S,
    status: &'a BatteryStatus,
    ticks_per_minute: u32,

    state: BatteryState,
    soc: f32,
    calib_counter: u32,
    sec_counter: u32,
    charge_time_left_min: u16,
    last_charge_voltage: f32,
    low_soc_alarm_raised: bool,
}

impl<'a, S: BatterySensors> BatteryMonitor<'a, S> {
    /// Validates the configuration and takes an initial state of charge reading,
    /// so queries never see an uncalibrated battery.
    ///
    /// # Arguments
    /// * config: Battery and charger parameters
    /// * sensors: Where voltage and current readings come from
    /// * status: Published copy of the query values, usually a `static`
    pub fn new(
        config: BatteryConfig,
        mut sensors: S,
        status: &'a BatteryStatus,
    ) -> Result<BatteryMonitor<'a, S>, ConfigError> {
        config.validate()?;

        let soc = calibrate_soc(sensors.read_battery_voltage(), &config.curve);
        let monitor = BatteryMonitor {
            ticks_per_minute: config.ticks_per_minute(),
            config,
            sensors,
            status,
            state: BatteryState::Relaxed,
            soc,
            calib_counter: 0,
            sec_counter: 0,
            charge_time_left_min: 0,
            last_charge_voltage: 0.,
            low_soc_alarm_raised: false,
        };
        status.publish(&monitor.report());
        Ok(monitor)
    }

    /// Runs one step of the state machine. Must be called every
    /// `config.tick_period_ms`.
    ///
    /// # Returns
    /// The notification raised on this tick, if any
    pub fn tick(&mut self) -> Option<BatteryEvent> {
        let battery_current = self.sensors.read_battery_current();
        let charge_voltage = self.sensors.read_charge_voltage();
        let battery_voltage = self.sensors.read_battery_voltage();
        let previous = self.state;

        // charger removed, whatever we were doing
        if charge_voltage <= self.config.min_charge_voltage {
            self.state = if battery_current > self.config.min_current {
                BatteryState::Discharge
            } else {
                BatteryState::Relaxed
            };
            self.charge_time_left_min = 0;
        }

        // charger (re)inserted
        if charge_voltage > self.config.min_charge_voltage
            && self.state != BatteryState::Charge
            && self.state != BatteryState::ChargeFinished
        {
            self.state = BatteryState::BeginCharge;
            self.charge_time_left_min = 1;
        }

        if self.state != BatteryState::Discharge {
            self.low_soc_alarm_raised = false;
        }

        let event = match self.state {
            BatteryState::Relaxed => {
                self.calib_counter += 1;
                if self.calib_counter > u32::from(self.config.min_time_before_calib) {
                    self.calibrate(battery_voltage);
                    self.calib_counter = 0;
                }
                None
            }
            BatteryState::Discharge => {
                self.calib_counter = 0;
                let soc_percent = soc_to_percent(self.soc);
                if soc_percent <= LOW_SOC_PERCENT && !self.low_soc_alarm_raised {
                    self.low_soc_alarm_raised = true;
                    Some(BatteryEvent::LowSoc {
                        soc_percent,
                        battery_voltage,
                    })
                } else {
                    None
                }
            }
            BatteryState::BeginCharge => self.begin_charge(charge_voltage, battery_voltage),
            BatteryState::Charge => self.charge(charge_voltage, battery_voltage),
            BatteryState::ChargeFinished => {
                self.sec_counter = 0;
                self.calibrate(battery_voltage);
                None
            }
        };

        if self.state != previous {
            serial_write!("battery: {} -> {}\r\n", previous.name(), self.state.name());
        }
        self.status.publish(&self.report());
        event
    }

    /// Waits for the charger voltage to settle, then estimates the charge time
    fn begin_charge(&mut self, charge_voltage: f32, battery_voltage: f32) -> Option<BatteryEvent> {
        if libm::fabsf(charge_voltage - self.last_charge_voltage) < CHARGE_VOLTAGE_STABLE_LIMIT {
            self.sec_counter = 0;
            self.charge_time_left_min = self.estimate_charge_time(charge_voltage);
            self.state = BatteryState::Charge;
            // recalibrate as soon as we're relaxed again
            self.calib_counter = u32::from(self.config.min_time_before_calib);
            // next charge cycle needs two fresh readings
            self.last_charge_voltage = 0.;

            return Some(BatteryEvent::ChargeStarted(ChargeReport {
                charge_voltage,
                soc_percent: self.state_of_charge_percent(),
                minutes_left: self.charge_time_left_min,
                battery_voltage,
            }));
        }

        self.last_charge_voltage = charge_voltage;
        None
    }

    fn charge(&mut self, charge_voltage: f32, battery_voltage: f32) -> Option<BatteryEvent> {
        self.sec_counter += 1;
        if self.sec_counter > self.ticks_per_minute {
            self.sec_counter = 0;
            self.charge_time_left_min = self.charge_time_left_min.saturating_sub(1).max(1);
        }

        if battery_voltage > self.config.charge_ready_voltage {
            self.state = BatteryState::ChargeFinished;
            self.charge_time_left_min = 0;
            // charger voltage has settled, the reading is good again
            self.calibrate(battery_voltage);

            return Some(BatteryEvent::ChargeFinished(ChargeReport {
                charge_voltage,
                soc_percent: self.state_of_charge_percent(),
                minutes_left: 0,
                battery_voltage,
            }));
        }
        None
    }

    /// Minutes to full, scaled inversely with charger voltage. Never less than 1.
    fn estimate_charge_time(&self, charge_voltage: f32) -> u16 {
        let full_charge = f32::from(self.config.time_to_full_charge_min);
        let minutes = libm::roundf(
            (1. - self.soc) * (full_charge * (1. / (charge_voltage / NOMINAL_CHARGE_VOLTAGE))),
        );
        // float to int casts saturate, NaN becomes 0
        (minutes as u16).max(1)
    }

    fn calibrate(&mut self, battery_voltage: f32) {
        self.soc = calibrate_soc(battery_voltage, &self.config.curve);
    }

    pub fn state(&self) -> BatteryState {
        self.state
    }

    pub fn charge_time_left_minutes(&self) -> u16 {
        self.charge_time_left_min
    }

    /// State of charge as a whole percentage (0-100), truncated
    pub fn state_of_charge_percent(&self) -> u8 {
        soc_to_percent(self.soc)
    }

    pub fn state_of_charge_fraction(&self) -> f32 {
        self.soc
    }

    pub fn is_charging(&self) -> bool {
        self.state.is_charging()
    }

    pub fn is_discharge_allowed(&self) -> bool {
        !self.is_charging()
    }

    /// Copy of every query value as of the last tick
    pub fn report(&self) -> BatteryReport {
        BatteryReport {
            state: self.state,
            state_of_charge: self.soc,
            charge_time_left_min: self.charge_time_left_min,
        }
    }

    /// The status this monitor publishes to
    pub fn status(&self) -> &'a BatteryStatus {
        self.status
    }

    pub fn sensors_mut(&mut self) -> &mut S {
        &mut self.sensors
    }
}
