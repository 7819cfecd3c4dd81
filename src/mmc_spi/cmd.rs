use log::{debug, trace};

use crate::bus::{Clock, SpiBus};
use crate::constant::*;

use super::MmcSpi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiCommand {
    pub opcode: u8,
    pub arg: u32,
    pub app: bool,
    pub wait_ready: bool,
}

impl SpiCommand {
    pub fn new(opcode: u8, arg: u32) -> Self {
        Self {
            opcode: opcode & 0x3F,
            arg,
            app: false,
            wait_ready: true,
        }
    }

    /// Application command, escaped with CMD55 on the wire.
    pub fn app(opcode: u8, arg: u32) -> Self {
        Self {
            app: true,
            ..Self::new(opcode, arg)
        }
    }

    /// Skip the ready-wait before the frame.
    pub fn no_wait(mut self) -> Self {
        self.wait_ready = false;
        self
    }

    // Only CMD0 and CMD8 are CRC-checked in SPI mode
    pub fn crc(&self) -> u8 {
        match self.opcode {
            MMC_GO_IDLE_STATE => CMD0_CRC,
            SD_SEND_IF_COND => CMD8_CRC,
            _ => CMD_DUMMY_CRC,
        }
    }

    pub fn frame(&self) -> [u8; 6] {
        let [a3, a2, a1, a0] = self.arg.to_be_bytes();
        [CMD_START_BITS | self.opcode, a3, a2, a1, a0, self.crc()]
    }
}

impl<B: SpiBus, C: Clock> MmcSpi<B, C> {
    /// Send a command and return its R1 byte. 0xFF means the card never
    /// answered or was not ready.
    pub(crate) fn send_command(&mut self, cmd: &SpiCommand) -> u8 {
        if cmd.app {
            let escape = SpiCommand {
                opcode: MMC_APP_CMD,
                arg: 0,
                app: false,
                wait_ready: cmd.wait_ready,
            };
            let res = self.send_command(&escape);
            if res > R1_IDLE_STATE {
                return res;
            }
        }

        // Select the card and wait for ready except to stop multiple block read
        if cmd.opcode != MMC_STOP_TRANSMISSION {
            self.deselect();
            self.select();
            if cmd.wait_ready && !self.wait_ready(self.timeouts.command_ms) {
                debug!("CMD{} not sent: card busy", cmd.opcode);
                self.deselect();
                return R1_NO_RESPONSE;
            }
        }

        let frame = cmd.frame();
        trace!("frame: {:02x?}", frame);
        for b in frame {
            self.bus.exchange(b);
        }

        // The card emits a stuff byte right after CMD12
        if cmd.opcode == MMC_STOP_TRANSMISSION {
            self.bus.exchange(BUS_IDLE);
        }

        let mut res = R1_NO_RESPONSE;
        for _ in 0..CMD_RESPONSE_POLLS {
            res = self.bus.exchange(BUS_IDLE);
            if res & R1_INVALID_MASK == 0 {
                break;
            }
        }

        debug!(
            "{}CMD{}({:#x}) -> {:#04x}",
            if cmd.app { "A" } else { "" },
            cmd.opcode,
            cmd.arg,
            res
        );
        res
    }

    /// Read the trailing bytes of an R3/R7 response.
    pub(crate) fn read_response_tail(&mut self) -> [u8; 4] {
        let mut tail = [0u8; 4];
        for b in tail.iter_mut() {
            *b = self.bus.exchange(BUS_IDLE);
        }
        tail
    }
}
