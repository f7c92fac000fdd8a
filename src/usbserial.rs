//! USB CDC-ACM serial port used as the log output.

extern crate feather_m0 as hal;
extern crate usb_device;
extern crate usbd_serial;

use cortex_m::interrupt as cs;
use cortex_m::peripheral::NVIC;
use hal::clock::GenericClockController;
use hal::gpio::{Floating, Input, Port};
use hal::pac::{interrupt, PM, USB};
use hal::usb::UsbBus;
use usb_device::bus::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_serial::{SerialPort, USB_CLASS_CDC};

/// Longest line `serial_write!` formats before giving up on it
pub const LINE_CAPACITY: usize = 128;

pub struct USBSerial {
    usb_bus: UsbDevice<'static, UsbBus>,
    usb_serial: SerialPort<'static, UsbBus>,
}

static mut USB_SERIAL: Option<USBSerial> = None;
static mut BUS_ALLOCATOR: Option<UsbBusAllocator<UsbBus>> = None;

impl USBSerial {
    /// Initializes the `USBSerial` singleton. Calling it again does nothing.
    ///
    /// # Arguments
    ///  * pm_perph: The power management peripheral
    ///  * usb_perph: The USB peripheral
    ///  * nvic: For enabling the USB interrupt
    ///  * clocks: The clocks instance for USB peripheral clocking
    ///  * dm: The d- GPIO pad
    ///  * dp: The d+ GPIO pad
    ///  * port: the GPIO port
    pub fn init(
        pm_perph: &mut PM,
        usb_perph: USB,
        nvic: &mut NVIC,
        clocks: &mut GenericClockController,
        dm: hal::gpio::Pa24<Input<Floating>>,
        dp: hal::gpio::Pa25<Input<Floating>>,
        port: &mut Port,
    ) {
        cs::free(|_| unsafe {
            if USB_SERIAL.is_some() {
                return;
            }
            BUS_ALLOCATOR = Some(hal::usb_allocator(
                usb_perph, clocks, pm_perph, dm, dp, port,
            ));
            let allocator = match BUS_ALLOCATOR.as_ref() {
                Some(allocator) => allocator,
                None => return,
            };
            USB_SERIAL = Some(USBSerial {
                usb_bus: UsbDeviceBuilder::new(allocator, UsbVidPid(0x16c0, 0x27dd))
                    .manufacturer("Holmes Engineering")
                    .product("Battery monitor log")
                    .serial_number("BATT")
                    .device_class(USB_CLASS_CDC)
                    .build(),
                usb_serial: SerialPort::new(allocator),
            });
        });

        unsafe {
            nvic.set_priority(interrupt::USB, 1);
            NVIC::unmask(interrupt::USB);
        }
    }

    /// Queues a log line on the serial port.
    ///
    /// Output is dropped rather than blocking the control loop when no host is
    /// listening or the endpoint buffer is full.
    ///
    /// # Arguments
    /// * message: The text to send
    pub fn write_to_usb(message: &str) {
        cs::free(|_| unsafe {
            let usbserial = match USB_SERIAL.as_mut() {
                Some(usbserial) => usbserial,
                None => return,
            };

            let mut bytes = message.as_bytes();
            while !bytes.is_empty() {
                match usbserial.usb_serial.write(bytes) {
                    Ok(written) => bytes = &bytes[written..],
                    Err(_) => break,
                }
            }
        });
    }

    /// Services the USB peripheral. Anything the host sends is discarded.
    fn poll_usb() {
        let mut read_buf = [0u8; 64];
        cs::free(|_| unsafe {
            if let Some(usbserial) = USB_SERIAL.as_mut() {
                if usbserial.usb_bus.poll(&mut [&mut usbserial.usb_serial]) {
                    while let Ok(count) = usbserial.usb_serial.read(&mut read_buf) {
                        if count == 0 {
                            break;
                        }
                    }
                }
            }
        });
    }
}

#[interrupt]
fn USB() {
    USBSerial::poll_usb();
}
