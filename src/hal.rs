//! Transport over an `embedded-hal` SPI bus and a GPIO chip select.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus as HalSpiBus;
use log::warn;

use crate::bus::{BusClock, SpiBus};
use crate::constant::BUS_IDLE;

/// `SPI` must be owned exclusively: the card keeps DO driven while CS is low,
/// so chip select is toggled here rather than by a shared-bus device.
///
/// `reclock` reconfigures the peripheral for a clock profile (about 400 kHz
/// for `Slow`, up to 25 MHz for `Fast`).
pub struct HalBus<SPI, CS, F> {
    spi: SPI,
    cs: CS,
    reclock: F,
}

impl<SPI, CS, F> HalBus<SPI, CS, F>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
    F: FnMut(&mut SPI, BusClock),
{
    pub fn new(spi: SPI, cs: CS, reclock: F) -> Self {
        Self { spi, cs, reclock }
    }

    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, CS, F> SpiBus for HalBus<SPI, CS, F>
where
    SPI: HalSpiBus<u8>,
    CS: OutputPin,
    F: FnMut(&mut SPI, BusClock),
{
    fn begin(&mut self) -> bool {
        self.cs.set_high().is_ok()
    }

    fn activate(&mut self) {
        if self.cs.set_low().is_err() {
            warn!("chip select low failed");
        }
    }

    fn deactivate(&mut self) {
        if self.spi.flush().is_err() {
            warn!("spi flush failed");
        }
        if self.cs.set_high().is_err() {
            warn!("chip select high failed");
        }
    }

    // Bus faults read as an idle line so the protocol layer times out
    fn exchange(&mut self, byte: u8) -> u8 {
        let mut word = [byte];
        match self.spi.transfer_in_place(&mut word) {
            Ok(()) => word[0],
            Err(_) => {
                warn!("spi transfer failed");
                BUS_IDLE
            }
        }
    }

    fn receive_bulk(&mut self, buf: &mut [u8]) {
        // Cards expect DI held high while streaming data out
        buf.fill(BUS_IDLE);
        if self.spi.transfer_in_place(buf).is_err() {
            warn!("spi bulk receive failed");
            buf.fill(BUS_IDLE);
        }
    }

    fn send_bulk(&mut self, buf: &[u8]) {
        if self.spi.write(buf).is_err() {
            warn!("spi bulk send failed");
        }
    }

    fn set_clock(&mut self, clock: BusClock) {
        (self.reclock)(&mut self.spi, clock);
    }
}
