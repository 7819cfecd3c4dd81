use log::{debug, warn};

use crate::bus::{Clock, SpiBus};
use crate::constant::*;
use crate::err::{check_r1, DiskError, SdError};

use super::block::card_address;
use super::csd::{erase_block_sectors, sd_status_erase_block_sectors, sector_count, supports_sector_erase};
use super::{CardType, MmcSpi, SpiCommand};

/// Drive control requests other than sector read/write.
#[derive(Debug)]
pub enum Ioctl<'a> {
    /// Wait for the end of the card's internal write process.
    Sync,
    GetSectorCount(&'a mut u64),
    GetSectorSize(&'a mut u16),
    /// Erase block size in sectors.
    GetBlockSize(&'a mut u32),
    /// Erase the sector range `start..=end`.
    Trim { start: u32, end: u32 },
    GetType(&'a mut u8),
    GetCsd(&'a mut [u8; CSD_LEN]),
    GetCid(&'a mut [u8; CID_LEN]),
    GetOcr(&'a mut [u8; OCR_LEN]),
    GetSdStatus(&'a mut [u8; SD_STATUS_LEN]),
}

impl<B: SpiBus, C: Clock> MmcSpi<B, C> {
    pub fn ioctl(&mut self, req: Ioctl<'_>) -> Result<(), DiskError> {
        let card = self.ready_card()?;
        let result = self.dispatch_ioctl(card, req);
        self.deselect();

        if let Err(err) = &result {
            warn!("ioctl failed: {}", err);
        }
        result
    }

    fn dispatch_ioctl(&mut self, card: CardType, req: Ioctl<'_>) -> Result<(), DiskError> {
        match req {
            Ioctl::Sync => {
                self.select();
                if self.wait_ready(self.timeouts.command_ms) {
                    Ok(())
                } else {
                    Err(DiskError::Io(SdError::Timeout))
                }
            }
            Ioctl::GetSectorCount(out) => {
                let csd = self.read_register_block::<CSD_LEN>(MMC_SEND_CSD)?;
                *out = sector_count(&csd);
                debug!("sector count: {}", *out);
                Ok(())
            }
            Ioctl::GetSectorSize(out) => {
                *out = SECTOR_SIZE as u16;
                Ok(())
            }
            Ioctl::GetBlockSize(out) => {
                *out = if matches!(card, CardType::SdV2 | CardType::SdHc) {
                    let status = self.read_sd_status::<SD_STATUS_PARTIAL_LEN>()?;
                    self.skip_bytes(SD_STATUS_TRAILING_BYTES);
                    sd_status_erase_block_sectors(&status)
                } else {
                    let csd = self.read_register_block::<CSD_LEN>(MMC_SEND_CSD)?;
                    erase_block_sectors(card, &csd)
                };
                debug!("erase block size: {} sectors", *out);
                Ok(())
            }
            Ioctl::Trim { start, end } => self.trim(card, start, end),
            Ioctl::GetType(out) => {
                *out = card.bits();
                Ok(())
            }
            Ioctl::GetCsd(out) => {
                *out = self.read_register_block::<CSD_LEN>(MMC_SEND_CSD)?;
                Ok(())
            }
            Ioctl::GetCid(out) => {
                *out = self.read_register_block::<CID_LEN>(MMC_SEND_CID)?;
                Ok(())
            }
            Ioctl::GetOcr(out) => {
                let r1 = self.send_command(&SpiCommand::new(MMC_READ_OCR, 0));
                check_r1(MMC_READ_OCR, r1)?;
                *out = self.read_response_tail();
                Ok(())
            }
            Ioctl::GetSdStatus(out) => {
                *out = self.read_sd_status::<SD_STATUS_LEN>()?;
                Ok(())
            }
        }
    }

    fn trim(&mut self, card: CardType, start: u32, end: u32) -> Result<(), DiskError> {
        if !card.is_sd() {
            return Err(DiskError::Io(SdError::UnsupportedCard));
        }

        let mut csd = [0u8; CSD_LEN];
        self.ioctl(Ioctl::GetCsd(&mut csd))?;
        if !supports_sector_erase(&csd) {
            return Err(DiskError::Io(SdError::UnsupportedCard));
        }

        let st = card_address(card, start)?;
        let ed = card_address(card, end)?;
        debug!("erase {}..={} (arg {:#x}..={:#x})", start, end, st, ed);

        let r1 = self.send_command(&SpiCommand::new(SD_ERASE_WR_BLK_START, st));
        check_r1(SD_ERASE_WR_BLK_START, r1)?;
        let r1 = self.send_command(&SpiCommand::new(SD_ERASE_WR_BLK_END, ed));
        check_r1(SD_ERASE_WR_BLK_END, r1)?;
        let r1 = self.send_command(&SpiCommand::new(MMC_ERASE, 0));
        check_r1(MMC_ERASE, r1)?;

        if !self.wait_ready(self.timeouts.erase_ms) {
            return Err(DiskError::Io(SdError::EraseTimeout));
        }
        Ok(())
    }

    /// Register delivered as a data packet (CSD, CID).
    fn read_register_block<const N: usize>(&mut self, opcode: u8) -> Result<[u8; N], SdError> {
        let r1 = self.send_command(&SpiCommand::new(opcode, 0));
        check_r1(opcode, r1)?;
        let mut reg = [0u8; N];
        self.receive_block(&mut reg)?;
        Ok(reg)
    }

    /// First `N` bytes of the 64-byte SD status.
    fn read_sd_status<const N: usize>(&mut self) -> Result<[u8; N], SdError> {
        let r1 = self.send_command(&SpiCommand::app(SD_APP_SD_STATUS, 0));
        check_r1(SD_APP_SD_STATUS, r1)?;
        // Second byte of the R2 response
        self.skip_bytes(1);
        let mut status = [0u8; N];
        self.receive_block(&mut status)?;
        Ok(status)
    }
}
