#![cfg_attr(not(test), no_std)]

//! SD / MMC card block driver over a plain SPI link.
//!
//! [`mmc_spi::MmcSpi`] speaks the SPI-mode card protocol on top of a
//! [`bus::SpiBus`] transport; [`diskio::DiskIo`] exposes it as drive 0 of a
//! FAT filesystem's disk interface.

pub mod bus;
pub mod constant;
pub mod diskio;
mod err;
#[cfg(feature = "embedded-hal")]
pub mod hal;
pub mod mmc_spi;

pub use bus::{BusClock, Clock, SpiBus};
pub use diskio::{DResult, DiskIo};
pub use err::{DiskError, SdError};
pub use mmc_spi::{CardType, DiskStatus, InitStage, Ioctl, MmcSpi, Timeouts};
