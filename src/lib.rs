//! The abstracted components for the battery-monitor binary.

#![cfg_attr(not(test), no_std)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

/// Formats a line with `ufmt` and writes it to the USB serial port
#[cfg(feature = "usbserial")]
#[macro_export]
macro_rules! serial_write {
    ($($arg:tt)*) => {{
        let mut line: heapless::String<{ $crate::usbserial::LINE_CAPACITY }> = heapless::String::new();
        // lines that don't fit are dropped whole
        if ufmt::uwrite!(line, $($arg)*).is_ok() {
            $crate::usbserial::USBSerial::write_to_usb(line.as_str());
        }
    }};
}

/// Logging is compiled out without the `usbserial` feature
#[cfg(not(feature = "usbserial"))]
#[macro_export]
macro_rules! serial_write {
    ($($tt:tt)*) => {{}};
}

pub mod calibration;
pub mod config;
pub mod monitor;
pub mod sensors;
pub mod status;
#[cfg(feature = "usbserial")]
pub mod usbserial;

pub use calibration::{calibrate_soc, interpolate, CalibrationCurve};
pub use config::{BatteryConfig, ConfigError};
pub use monitor::{BatteryEvent, BatteryMonitor};
pub use sensors::BatterySensors;
pub use status::{BatteryState, BatteryStatus};
