// ===== Block Device Interface =====

use log::{debug, warn};

use crate::bus::{Clock, SpiBus};
use crate::constant::*;
use crate::err::{check_r1, DiskError, SdError};

use super::{CardType, Deadline, DiskStatus, MmcSpi, SpiCommand};

/// Outgoing data packet, framed by its start token.
#[derive(Debug, Clone, Copy)]
pub enum WritePacket<'a> {
    Single(&'a [u8]),
    Multi(&'a [u8]),
    StopTran,
}

impl WritePacket<'_> {
    pub fn token(&self) -> u8 {
        match self {
            WritePacket::Single(_) => TOKEN_START_BLOCK,
            WritePacket::Multi(_) => TOKEN_START_MULTI_WRITE,
            WritePacket::StopTran => TOKEN_STOP_TRAN,
        }
    }

    fn payload(&self) -> Option<&[u8]> {
        match self {
            WritePacket::Single(data) | WritePacket::Multi(data) => Some(*data),
            WritePacket::StopTran => None,
        }
    }
}

/// Number of sectors covered by a transfer buffer.
fn sector_span(len: usize) -> Result<usize, DiskError> {
    if len == 0 || len % SECTOR_SIZE != 0 {
        return Err(DiskError::InvalidParameter);
    }
    Ok(len / SECTOR_SIZE)
}

/// Address argument for sector commands: byte offset unless block addressed.
pub(crate) fn card_address(card: CardType, sector: u32) -> Result<u32, DiskError> {
    if card.is_block_addressed() {
        Ok(sector)
    } else {
        sector
            .checked_mul(SECTOR_SIZE as u32)
            .ok_or(DiskError::InvalidParameter)
    }
}

impl<B: SpiBus, C: Clock> MmcSpi<B, C> {
    /// Read `buf.len() / 512` sectors starting at `sector`.
    pub fn read(&mut self, buf: &mut [u8], sector: u32) -> Result<(), DiskError> {
        let count = sector_span(buf.len())?;
        let card = self.ready_card()?;
        let addr = card_address(card, sector)?;

        debug!("read {} sector(s) at {} (arg {:#x})", count, sector, addr);

        let result = if count == 1 {
            self.read_single(addr, buf)
        } else {
            self.read_multi(addr, buf)
        };
        self.deselect();

        result.map_err(|err| {
            warn!("read at sector {} failed: {}", sector, err);
            DiskError::Io(err)
        })
    }

    /// Write `buf.len() / 512` sectors starting at `sector`.
    pub fn write(&mut self, buf: &[u8], sector: u32) -> Result<(), DiskError> {
        let count = sector_span(buf.len())?;
        let card = self.ready_card()?;
        if self.status.contains(DiskStatus::PROTECT) {
            return Err(DiskError::WriteProtected);
        }
        let addr = card_address(card, sector)?;

        debug!("write {} sector(s) at {} (arg {:#x})", count, sector, addr);

        let result = if count == 1 {
            self.write_single(addr, buf)
        } else {
            self.write_multi(card, addr, count, buf)
        };
        self.deselect();

        result.map_err(|err| {
            warn!("write at sector {} failed: {}", sector, err);
            DiskError::Io(err)
        })
    }

    fn read_single(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), SdError> {
        let r1 = self.send_command(&SpiCommand::new(MMC_READ_SINGLE_BLOCK, addr));
        check_r1(MMC_READ_SINGLE_BLOCK, r1)?;
        self.receive_block(buf)
    }

    fn read_multi(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), SdError> {
        let r1 = self.send_command(&SpiCommand::new(MMC_READ_MULTIPLE_BLOCK, addr));
        check_r1(MMC_READ_MULTIPLE_BLOCK, r1)?;

        let mut result = Ok(());
        for block in buf.chunks_exact_mut(SECTOR_SIZE) {
            if let Err(err) = self.receive_block(block) {
                result = Err(err);
                break;
            }
        }

        self.send_command(&SpiCommand::new(MMC_STOP_TRANSMISSION, 0));
        result
    }

    fn write_single(&mut self, addr: u32, buf: &[u8]) -> Result<(), SdError> {
        let r1 = self.send_command(&SpiCommand::new(MMC_WRITE_BLOCK, addr));
        check_r1(MMC_WRITE_BLOCK, r1)?;
        self.send_block(WritePacket::Single(buf))
    }

    fn write_multi(
        &mut self,
        card: CardType,
        addr: u32,
        count: usize,
        buf: &[u8],
    ) -> Result<(), SdError> {
        if card.is_sd() {
            // Pre-erase hint, the result is not significant
            self.send_command(&SpiCommand::app(SD_APP_SET_WR_BLK_ERASE_COUNT, count as u32));
        }

        let r1 = self.send_command(&SpiCommand::new(MMC_WRITE_MULTIPLE_BLOCK, addr));
        check_r1(MMC_WRITE_MULTIPLE_BLOCK, r1)?;

        let mut result = Ok(());
        for block in buf.chunks_exact(SECTOR_SIZE) {
            if let Err(err) = self.send_block(WritePacket::Multi(block)) {
                result = Err(err);
                break;
            }
        }

        let stop = self.send_block(WritePacket::StopTran);
        result.and(stop)
    }

    /// Receive one data packet of `buf.len()` bytes.
    pub(crate) fn receive_block(&mut self, buf: &mut [u8]) -> Result<(), SdError> {
        let deadline = Deadline::start(&self.clock, self.timeouts.read_ms);
        let token = loop {
            let token = self.bus.exchange(BUS_IDLE);
            if token != BUS_IDLE || deadline.expired(&self.clock) {
                break token;
            }
        };

        match token {
            TOKEN_START_BLOCK => {}
            BUS_IDLE => return Err(SdError::DataTimeout),
            token => return Err(SdError::InvalidToken(token)),
        }

        self.receive_bytes(buf);
        // Discard CRC
        self.skip_bytes(2);
        Ok(())
    }

    /// Send one data packet, or the stop token of a multi-block write.
    pub(crate) fn send_block(&mut self, packet: WritePacket<'_>) -> Result<(), SdError> {
        if !self.wait_ready(self.timeouts.write_ms) {
            return Err(SdError::WriteTimeout);
        }

        self.bus.exchange(packet.token());
        if let Some(data) = packet.payload() {
            self.send_bytes(&data[..SECTOR_SIZE]);
            // Dummy CRC
            self.skip_bytes(2);

            let resp = self.bus.exchange(BUS_IDLE);
            if resp & DATA_RESP_MASK != DATA_RESP_ACCEPTED {
                return Err(SdError::DataRejected(resp));
            }
        }
        Ok(())
    }

    pub(crate) fn skip_bytes(&mut self, count: usize) {
        for _ in 0..count {
            self.bus.exchange(BUS_IDLE);
        }
    }

    fn receive_bytes(&mut self, buf: &mut [u8]) {
        cfg_if::cfg_if! {
            if #[cfg(feature = "dma")] {
                self.bus.receive_bulk(buf);
            } else if #[cfg(feature = "pio")] {
                for b in buf.iter_mut() {
                    *b = self.bus.exchange(BUS_IDLE);
                }
            } else {
                self.bus.receive_bulk(buf);
            }
        }
    }

    fn send_bytes(&mut self, buf: &[u8]) {
        cfg_if::cfg_if! {
            if #[cfg(feature = "dma")] {
                self.bus.send_bulk(buf);
            } else if #[cfg(feature = "pio")] {
                for &b in buf {
                    self.bus.exchange(b);
                }
            } else {
                self.bus.send_bulk(buf);
            }
        }
    }
}
