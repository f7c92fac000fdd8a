//! Battery powered device firmware tracking state of charge and charging of a single LiPo cell.

#![no_std]
#![no_main]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

/// 12 bit ADC
const ADC_FULLSCALE: u16 = 4095;
/// Using VDDA / 2 with digital gain 1/2, our reference is ~3.3v
const ADC_REF_VOLTAGE: f32 = 3.3;

const SENSOR_SCALING: SensorScaling = SensorScaling {
    full_scale: ADC_FULLSCALE,
    ref_voltage: ADC_REF_VOLTAGE,
    // external HW divides the battery by two
    battery_divider: 2.,
    // 30k / 10k divider on the charger input
    charger_divider: 4.,
    // high side current sense amp, 1V/A into a 1k load
    current_offset: 0.,
    current_gain: 1.,
};

const BATTERY_CONFIG: BatteryConfig = BatteryConfig {
    curve: LIPO_1S_CURVE,
    min_current: 0.02,
    // USB charger input sits at ~5v when plugged in
    min_charge_voltage: 4.4,
    charge_ready_voltage: 4.15,
    // five minutes of rest before trusting the voltage
    min_time_before_calib: 3_000,
    // against a 10v charger, doubles on USB
    time_to_full_charge_min: 90,
    tick_period_ms: DEFAULT_TICK_PERIOD_MS,
};

use panic_semihosting as _; // Panic handler

#[cfg(feature = "usbserial")]
use battery_monitor_rs::usbserial;
use battery_monitor_rs::{
    calibration::LIPO_1S_CURVE,
    config::{BatteryConfig, DEFAULT_TICK_PERIOD_MS},
    monitor::{BatteryEvent, BatteryMonitor, ChargeReport, Severity},
    sensors::{AdcSensors, SensorScaling},
    serial_write,
    status::BatteryStatus,
};

use core::sync::atomic;
use cortex_m::peripheral::NVIC;
use feather_m0 as hal;
use hal::adc::Adc;
use hal::clock::{enable_internal_32kosc, ClockGenId, ClockSource, GenericClockController};
use hal::entry;
use hal::pac::{adc, interrupt, CorePeripherals, Peripherals, ADC, TC4};
use hal::prelude::*;

/// boolean indicating if our timer interrupt has fired
#[allow(unused)]
static INTERRUPT_FIRED: atomic::AtomicBool = atomic::AtomicBool::new(false);

/// Latest battery status, readable from anywhere
static BATTERY_STATUS: BatteryStatus = BatteryStatus::new();

/// Main function, running the battery control loop
#[entry]
fn main() -> ! {
    #[allow(unused_mut)] // Only used when usbserial is enabled
    let mut core = CorePeripherals::take().unwrap();
    let mut peripherals = Peripherals::take().unwrap();
    let mut pins = hal::Pins::new(peripherals.PORT);

    // just 8 MHz for lower power consumption
    #[cfg(not(feature = "usbserial"))]
    let mut clocks = GenericClockController::with_internal_8mhz(
        peripherals.GCLK,
        &mut peripherals.PM,
        &mut peripherals.SYSCTRL,
        &mut peripherals.NVMCTRL,
    );

    // 48 MHz needed for USB
    #[cfg(feature = "usbserial")]
    let mut clocks = GenericClockController::with_external_32kosc(
        peripherals.GCLK,
        &mut peripherals.PM,
        &mut peripherals.SYSCTRL,
        &mut peripherals.NVMCTRL,
    );

    #[cfg(feature = "usbserial")]
    usbserial::USBSerial::init(
        &mut peripherals.PM,
        peripherals.USB,
        &mut core.NVIC,
        &mut clocks,
        pins.usb_dm,
        pins.usb_dp,
        &mut pins.port,
    );

    let mut red_led = pins.d13.into_open_drain_output(&mut pins.port);
    red_led.set_high().unwrap();

    #[cfg(feature = "sleeping-delay")]
    let mut runner_delay = {
        use hal::sleeping_delay::SleepingDelay;
        use hal::timer;

        // Get a clock & make a sleeping delay object. use internal 32k clock that runs
        // in standby
        enable_internal_32kosc(&mut peripherals.SYSCTRL);
        let timer_clock = clocks
            .configure_gclk_divider_and_source(ClockGenId::GCLK1, 1, ClockSource::OSC32K, false)
            .unwrap();
        clocks.configure_standby(ClockGenId::GCLK1, true);
        let tc45 = &clocks.tc4_tc5(&timer_clock).unwrap();
        let timer = timer::TimerCounter::tc4_(tc45, peripherals.TC4, &mut peripherals.PM);
        // We can also use it in standby mode, if all of the clocks are configured to
        //   opperate in standby, for even more power savings
        core.SCB.set_sleepdeep();

        unsafe {
            // enable interrupts
            core.NVIC.set_priority(interrupt::TC4, 2);
            NVIC::unmask(interrupt::TC4);
        }

        SleepingDelay::new(timer, &INTERRUPT_FIRED)
    };

    #[cfg(not(feature = "sleeping-delay"))]
    let mut runner_delay = {
        use hal::delay::Delay;

        Delay::new(core.SYST, &mut clocks)
    };

    let mut adc = Adc::adc(peripherals.ADC, &mut peripherals.PM, &mut clocks);
    adc.gain(adc::inputctrl::GAIN_A::DIV2);
    adc.reference(adc::refctrl::REFSEL_A::INTVCC1);
    adc.samples(adc::avgctrl::SAMPLENUM_A::_32);

    let batt_in_div_2 = pins.d9.into_function_b(&mut pins.port);
    let current_sense = pins.a4.into_function_b(&mut pins.port);
    let charger_sense = pins.a3.into_function_b(&mut pins.port);
    let sensors = AdcSensors::<ADC, _, _, _, _>::new(
        adc,
        batt_in_div_2,
        current_sense,
        charger_sense,
        SENSOR_SCALING,
    );

    let mut monitor = match BatteryMonitor::new(BATTERY_CONFIG, sensors, &BATTERY_STATUS) {
        Ok(monitor) => monitor,
        Err(_e) => {
            serial_write!("battery config rejected: {}\r\n", _e.as_str());
            loop {
                error(&mut red_led, &mut runner_delay);
            }
        }
    };

    red_led.set_low().unwrap();
    serial_write!(
        "battery monitor up, {}% charged\r\n",
        BATTERY_STATUS.state_of_charge_percent()
    );

    loop {
        if let Some(event) = monitor.tick() {
            report(&event);
        }

        // LED on while a charger is connected
        if monitor.is_charging() {
            red_led.set_high().unwrap();
        } else {
            red_led.set_low().unwrap();
        }

        runner_delay.delay_ms(BATTERY_CONFIG.tick_period_ms);
    }
}

/// Renders a voltage for `ufmt`, which can't print floats
#[allow(unused)]
fn millivolts(volts: f32) -> u32 {
    (volts * 1000.) as u32
}

/// Logs a battery notification
#[allow(unused_variables)]
fn report(event: &BatteryEvent) {
    let level = match event.severity() {
        Severity::Info => "INFO",
        Severity::Warning => "WARN",
    };

    match event {
        BatteryEvent::ChargeStarted(charge) => log_charge(level, "charging started", charge),
        BatteryEvent::ChargeFinished(charge) => log_charge(level, "charging finished", charge),
        BatteryEvent::LowSoc {
            soc_percent,
            battery_voltage,
        } => serial_write!(
            "{} low battery: {}% at {}mV\r\n",
            level,
            *soc_percent,
            millivolts(*battery_voltage)
        ),
    }
}

#[allow(unused_variables)]
fn log_charge(level: &str, what: &str, charge: &ChargeReport) {
    serial_write!(
        "{} {}: charger {}mV, {}%, {} min left, battery {}mV\r\n",
        level,
        what,
        millivolts(charge.charge_voltage),
        charge.soc_percent,
        charge.minutes_left,
        millivolts(charge.battery_voltage)
    );
}

/// Blinks an SOS pattern indicating an error
///
/// # Parameters
/// * `red_led`: The LED pin to blink
/// * `delay`: The `Delay` instance to wait
fn error<PIN, T>(red_led: &mut PIN, delay: &mut T)
where
    PIN: embedded_hal::digital::v2::OutputPin<Error = ()>,
    T: embedded_hal::blocking::delay::DelayMs<u32>,
{
    const SHORT_BLIP_MS: u32 = 250;
    const LONG_BLIP_MS: u32 = 500;

    for blip_ms in [SHORT_BLIP_MS, LONG_BLIP_MS, SHORT_BLIP_MS] {
        for _ in 0..3 {
            red_led.set_high().ok();
            delay.delay_ms(blip_ms);
            red_led.set_low().ok();
            delay.delay_ms(blip_ms);
        }
    }

    delay.delay_ms(2 * LONG_BLIP_MS);
}

/// The sleeping timer interrupt that wakes us up
#[interrupt]
fn TC4() {
    // Let the sleepingtimer know that the interrupt fired, and clear it
    INTERRUPT_FIRED.store(true, atomic::Ordering::Relaxed);
    unsafe {
        TC4::ptr()
            .as_ref()
            .unwrap()
            .count16()
            .intflag
            .modify(|_, w| w.ovf().set_bit());
    }
}
