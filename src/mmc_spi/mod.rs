mod block;
mod cmd;
mod csd;
mod deadline;
mod ioctl;

pub use block::WritePacket;
pub use cmd::SpiCommand;
pub use csd::{erase_block_sectors, sd_status_erase_block_sectors, sector_count, supports_sector_erase};
pub use deadline::{Deadline, Timeouts};
pub use ioctl::Ioctl;

use core::fmt::Display;

use bitflags::bitflags;
use log::{debug, info, warn};

use crate::bus::{BusClock, Clock, SpiBus};
use crate::constant::*;
use crate::err::DiskError;

bitflags! {
    /// Drive status as reported to the filesystem layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiskStatus: u8 {
        const NOINIT = 0x01;
        const NODISK = 0x02;
        const PROTECT = 0x04;
    }
}

/// Card dialect, resolved once during initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    Mmc,
    SdV1,
    SdV2,
    /// High capacity SD v2, addressed in 512-byte units.
    SdHc,
}

impl CardType {
    pub fn is_sd(&self) -> bool {
        !matches!(self, CardType::Mmc)
    }

    pub fn is_block_addressed(&self) -> bool {
        matches!(self, CardType::SdHc)
    }

    /// Legacy type bits as reported by `MMC_GET_TYPE`.
    pub fn bits(&self) -> u8 {
        match self {
            CardType::Mmc => CT_MMC,
            CardType::SdV1 => CT_SD1,
            CardType::SdV2 => CT_SD2,
            CardType::SdHc => CT_SD2 | CT_BLOCK,
        }
    }
}

/// Progress of the negotiation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Uninitialized,
    Idle,
    DialectProbed,
    TypeResolved,
    Ready,
    Failed,
}

/// SD/MMC card driven over SPI.
pub struct MmcSpi<B, C> {
    bus: B,
    clock: C,
    status: DiskStatus,
    card_type: Option<CardType>,
    stage: InitStage,
    timeouts: Timeouts,
}

impl<B, C> Display for MmcSpi<B, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "MMC over SPI {{ status: {:?}, card: {:?}, stage: {:?} }}",
            self.status, self.card_type, self.stage
        )
    }
}

impl<B: SpiBus, C: Clock> MmcSpi<B, C> {
    pub fn new(bus: B, clock: C) -> Self {
        Self {
            bus,
            clock,
            status: DiskStatus::NOINIT,
            card_type: None,
            stage: InitStage::Uninitialized,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn status(&self) -> DiskStatus {
        self.status
    }

    pub fn card_type(&self) -> Option<CardType> {
        self.card_type
    }

    pub fn stage(&self) -> InitStage {
        self.stage
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn release(self) -> (B, C) {
        (self.bus, self.clock)
    }

    /// Sample the socket switches and latch NODISK / PROTECT.
    pub fn poll_socket(&mut self) {
        if self.bus.write_protect() {
            self.status.insert(DiskStatus::PROTECT);
        } else {
            self.status.remove(DiskStatus::PROTECT);
        }

        if self.bus.card_detect() {
            self.status.remove(DiskStatus::NODISK);
        } else {
            self.status.insert(DiskStatus::NODISK | DiskStatus::NOINIT);
        }
    }

    /// Bring up the bus and negotiate the card. Returns the resulting status.
    pub fn initialize(&mut self) -> DiskStatus {
        info!("SD/MMC over SPI initialization started");

        if !self.bring_up() {
            warn!("SPI bus not available");
            self.status.insert(DiskStatus::NOINIT);
            self.card_type = None;
            self.stage = InitStage::Failed;
            return self.status;
        }

        if self.status.contains(DiskStatus::NODISK) {
            warn!("no card in socket");
            return self.status;
        }

        self.stage = InitStage::Uninitialized;

        // 上电后至少 74 个时钟, CS 保持高电平
        for _ in 0..POWER_UP_DUMMY_BYTES {
            self.bus.exchange(BUS_IDLE);
        }

        let card_type = self.negotiate();
        self.card_type = card_type;
        self.deselect();

        match card_type {
            Some(ty) => {
                self.bus.set_clock(BusClock::Fast);
                self.status.remove(DiskStatus::NOINIT);
                self.stage = InitStage::Ready;
                info!("card ready: {:?}", ty);
            }
            None => {
                self.status = DiskStatus::NOINIT;
                self.stage = InitStage::Failed;
                warn!("card initialization failed");
            }
        }

        self.status
    }

    fn bring_up(&mut self) -> bool {
        if !self.bus.begin() {
            return false;
        }
        self.bus.set_clock(BusClock::Slow);
        self.bus.deactivate();
        true
    }

    fn negotiate(&mut self) -> Option<CardType> {
        let r1 = self.send_command(&SpiCommand::new(MMC_GO_IDLE_STATE, 0).no_wait());
        if r1 != R1_IDLE_STATE {
            warn!("card did not enter idle state: {:#04x}", r1);
            return None;
        }
        self.stage = InitStage::Idle;

        let deadline = Deadline::start(&self.clock, self.timeouts.init_ms);
        let r1 = self.send_command(&SpiCommand::new(SD_SEND_IF_COND, SD_IF_COND_VHS_PATTERN));
        self.stage = InitStage::DialectProbed;

        let card_type = if r1 == R1_IDLE_STATE {
            self.negotiate_sd_v2(&deadline)
        } else {
            self.negotiate_legacy(&deadline)
        };

        if card_type.is_some() {
            self.stage = InitStage::TypeResolved;
        }
        card_type
    }

    fn negotiate_sd_v2(&mut self, deadline: &Deadline) -> Option<CardType> {
        let r7 = self.read_response_tail();
        let pattern = SD_IF_COND_VHS_PATTERN.to_be_bytes();
        if r7[2..] != pattern[2..] {
            warn!("SEND_IF_COND echo mismatch: {:02x?}", r7);
            return None;
        }

        // Wait for end of initialization with ACMD41(HCS)
        while !deadline.expired(&self.clock)
            && self.send_command(&SpiCommand::app(SD_APP_OP_COND, OCR_HCS)) != R1_READY
        {}

        if deadline.expired(&self.clock)
            || self.send_command(&SpiCommand::new(MMC_READ_OCR, 0)) != R1_READY
        {
            warn!("SD v2 card did not leave idle state");
            return None;
        }

        let ocr = self.read_response_tail();
        debug!("OCR: {:02x?}", ocr);
        if ocr[0] & OCR_CCS_BYTE0 != 0 {
            Some(CardType::SdHc)
        } else {
            Some(CardType::SdV2)
        }
    }

    fn negotiate_legacy(&mut self, deadline: &Deadline) -> Option<CardType> {
        let (card_type, poll) =
            if self.send_command(&SpiCommand::app(SD_APP_OP_COND, 0)) <= R1_IDLE_STATE {
                (CardType::SdV1, SpiCommand::app(SD_APP_OP_COND, 0))
            } else {
                (CardType::Mmc, SpiCommand::new(MMC_SEND_OP_COND, 0))
            };
        debug!("legacy dialect candidate: {:?}", card_type);

        while !deadline.expired(&self.clock) && self.send_command(&poll) != R1_READY {}

        if deadline.expired(&self.clock)
            || self.send_command(&SpiCommand::new(MMC_SET_BLOCKLEN, SECTOR_SIZE as u32))
                != R1_READY
        {
            warn!("{:?} card did not accept 512-byte block length", card_type);
            return None;
        }

        Some(card_type)
    }

    // Deselect card and release SPI
    pub(crate) fn deselect(&mut self) {
        self.bus.deactivate();
        // Dummy clock, force DO hi-z for multiple slave SPI
        self.bus.exchange(BUS_IDLE);
    }

    pub(crate) fn select(&mut self) {
        self.bus.activate();
        // Dummy clock, force DO enabled
        self.bus.exchange(BUS_IDLE);
    }

    /// Poll until the card releases DO (reads 0xFF) or `ms` elapses.
    pub(crate) fn wait_ready(&mut self, ms: u32) -> bool {
        let deadline = Deadline::start(&self.clock, ms);
        loop {
            if self.bus.exchange(BUS_IDLE) == BUS_IDLE {
                return true;
            }
            if deadline.expired(&self.clock) {
                return false;
            }
        }
    }

    fn ready_card(&self) -> Result<CardType, DiskError> {
        if self.status.contains(DiskStatus::NOINIT) {
            return Err(DiskError::NotReady);
        }
        self.card_type.ok_or(DiskError::NotReady)
    }
}
