//! Transport contract between the protocol engine and the SPI peripheral.

/// Bus clock profile. Cards must be negotiated on the slow profile; the fast
/// profile is only applied once a dialect has been detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusClock {
    Slow,
    Fast,
}

/// Full-duplex SPI link to a single card.
///
/// Every call blocks until the bytes have been clocked. Implementations own
/// the chip-select line and the clock configuration of both profiles.
pub trait SpiBus {
    /// Low-level bring-up (power pin, peripheral begin). Returns `false` when
    /// no bus is attached.
    fn begin(&mut self) -> bool;

    /// Assert chip select.
    fn activate(&mut self);

    /// Release chip select.
    fn deactivate(&mut self);

    fn exchange(&mut self, byte: u8) -> u8;

    /// Clock in `buf.len()` bytes while sending 0xFF.
    fn receive_bulk(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.exchange(0xFF);
        }
    }

    fn send_bulk(&mut self, buf: &[u8]) {
        for &b in buf {
            self.exchange(b);
        }
    }

    fn set_clock(&mut self, clock: BusClock);

    // Socket switches, override when the board wires them
    fn card_detect(&mut self) -> bool {
        true
    }

    fn write_protect(&mut self) -> bool {
        false
    }
}

/// Monotonic millisecond tick source. Wrap-around is tolerated.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

impl<F> Clock for F
where
    F: Fn() -> u32,
{
    fn now_ms(&self) -> u32 {
        self()
    }
}
