//! Drive-indexed disk interface for a FAT filesystem layer.
//!
//! Only physical drive 0 exists. Every call holds the drive lock for the
//! whole select-to-deselect span of the operation.

use core::fmt::Display;

use log::debug;
use spin::Mutex;

use crate::bus::{Clock, SpiBus};
use crate::constant::*;
use crate::err::DiskError;
use crate::mmc_spi::{DiskStatus, Ioctl, MmcSpi};

/// Result codes of the disk functions, numbered as the filesystem expects.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DResult {
    Ok = 0,
    Error = 1,
    WrPrt = 2,
    NotRdy = 3,
    ParErr = 4,
}

impl From<Result<(), DiskError>> for DResult {
    fn from(res: Result<(), DiskError>) -> Self {
        match res {
            Ok(()) => DResult::Ok,
            Err(DiskError::InvalidParameter) => DResult::ParErr,
            Err(DiskError::NotReady) => DResult::NotRdy,
            Err(DiskError::WriteProtected) => DResult::WrPrt,
            Err(DiskError::Io(_)) => DResult::Error,
        }
    }
}

impl Display for DResult {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DResult::Ok => "succeeded",
            DResult::Error => "hard error",
            DResult::WrPrt => "write protected",
            DResult::NotRdy => "not ready",
            DResult::ParErr => "invalid parameter",
        };
        write!(f, "{}", s)
    }
}

pub struct DiskIo<B, C> {
    drive: Mutex<MmcSpi<B, C>>,
}

impl<B: SpiBus, C: Clock> DiskIo<B, C> {
    pub const fn new(drive: MmcSpi<B, C>) -> Self {
        Self {
            drive: Mutex::new(drive),
        }
    }

    /// Run `f` with exclusive access to the drive.
    pub fn with_drive<R>(&self, f: impl FnOnce(&mut MmcSpi<B, C>) -> R) -> R {
        let mut drive = self.drive.lock();
        f(&mut drive)
    }

    pub fn into_inner(self) -> MmcSpi<B, C> {
        self.drive.into_inner()
    }

    pub fn disk_status(&self, pdrv: u8) -> DiskStatus {
        if pdrv != 0 {
            return DiskStatus::NOINIT;
        }
        let mut drive = self.drive.lock();
        drive.poll_socket();
        drive.status()
    }

    pub fn disk_initialize(&self, pdrv: u8) -> DiskStatus {
        if pdrv != 0 {
            return DiskStatus::NOINIT;
        }
        let mut drive = self.drive.lock();
        drive.poll_socket();
        drive.initialize()
    }

    pub fn disk_read(&self, pdrv: u8, buf: &mut [u8], sector: u32, count: u32) -> DResult {
        let Some(len) = transfer_len(pdrv, buf.len(), count) else {
            return DResult::ParErr;
        };
        self.drive.lock().read(&mut buf[..len], sector).into()
    }

    pub fn disk_write(&self, pdrv: u8, buf: &[u8], sector: u32, count: u32) -> DResult {
        let Some(len) = transfer_len(pdrv, buf.len(), count) else {
            return DResult::ParErr;
        };
        self.drive.lock().write(&buf[..len], sector).into()
    }

    /// Typed control request.
    pub fn ioctl(&self, pdrv: u8, req: Ioctl<'_>) -> DResult {
        if pdrv != 0 {
            return DResult::ParErr;
        }
        self.drive.lock().ioctl(req).into()
    }

    /// Control request by numeric code. Multi-byte values in `buf` are
    /// native-endian.
    pub fn disk_ioctl(&self, pdrv: u8, code: u8, buf: &mut [u8]) -> DResult {
        if pdrv != 0 {
            return DResult::ParErr;
        }
        debug!("disk_ioctl code {} ({} byte buffer)", code, buf.len());

        let mut drive = self.drive.lock();
        let res = match code {
            CTRL_SYNC => drive.ioctl(Ioctl::Sync),
            GET_SECTOR_COUNT => sector_count_out(&mut drive, buf),
            GET_SECTOR_SIZE => match prefix::<2>(buf) {
                Some(out) => {
                    let mut size = 0u16;
                    let res = drive.ioctl(Ioctl::GetSectorSize(&mut size));
                    if res.is_ok() {
                        *out = size.to_ne_bytes();
                    }
                    res
                }
                None => Err(DiskError::InvalidParameter),
            },
            GET_BLOCK_SIZE => match prefix::<4>(buf) {
                Some(out) => {
                    let mut size = 0u32;
                    let res = drive.ioctl(Ioctl::GetBlockSize(&mut size));
                    if res.is_ok() {
                        *out = size.to_ne_bytes();
                    }
                    res
                }
                None => Err(DiskError::InvalidParameter),
            },
            CTRL_TRIM => match prefix::<8>(buf) {
                Some(range) => {
                    let start = u32::from_ne_bytes([range[0], range[1], range[2], range[3]]);
                    let end = u32::from_ne_bytes([range[4], range[5], range[6], range[7]]);
                    drive.ioctl(Ioctl::Trim { start, end })
                }
                None => Err(DiskError::InvalidParameter),
            },
            MMC_GET_TYPE => match prefix::<1>(buf) {
                Some(out) => drive.ioctl(Ioctl::GetType(&mut out[0])),
                None => Err(DiskError::InvalidParameter),
            },
            MMC_GET_CSD => match prefix::<CSD_LEN>(buf) {
                Some(out) => drive.ioctl(Ioctl::GetCsd(out)),
                None => Err(DiskError::InvalidParameter),
            },
            MMC_GET_CID => match prefix::<CID_LEN>(buf) {
                Some(out) => drive.ioctl(Ioctl::GetCid(out)),
                None => Err(DiskError::InvalidParameter),
            },
            MMC_GET_OCR => match prefix::<OCR_LEN>(buf) {
                Some(out) => drive.ioctl(Ioctl::GetOcr(out)),
                None => Err(DiskError::InvalidParameter),
            },
            MMC_GET_SDSTAT => match prefix::<SD_STATUS_LEN>(buf) {
                Some(out) => drive.ioctl(Ioctl::GetSdStatus(out)),
                None => Err(DiskError::InvalidParameter),
            },
            _ => Err(DiskError::InvalidParameter),
        };
        res.into()
    }
}

/// Byte length of a `count`-sector transfer, if the request is valid.
fn transfer_len(pdrv: u8, buf_len: usize, count: u32) -> Option<usize> {
    if pdrv != 0 || count == 0 {
        return None;
    }
    let len = (count as usize).checked_mul(SECTOR_SIZE)?;
    (len <= buf_len).then_some(len)
}

fn prefix<const N: usize>(buf: &mut [u8]) -> Option<&mut [u8; N]> {
    buf.get_mut(..N)?.try_into().ok()
}

// Always a 32-bit count, saturated; use `Ioctl::GetSectorCount` for the full width
fn sector_count_out<B: SpiBus, C: Clock>(
    drive: &mut MmcSpi<B, C>,
    buf: &mut [u8],
) -> Result<(), DiskError> {
    let Some(out) = prefix::<4>(buf) else {
        return Err(DiskError::InvalidParameter);
    };
    let mut count = 0u64;
    drive.ioctl(Ioctl::GetSectorCount(&mut count))?;
    *out = u32::try_from(count).unwrap_or(u32::MAX).to_ne_bytes();
    Ok(())
}
