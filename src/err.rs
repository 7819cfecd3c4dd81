// ===== Types and Structures =====

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    Timeout,
    DataTimeout,
    WriteTimeout,
    EraseTimeout,
    InvalidToken(u8),
    CommandRejected { cmd: u8, r1: u8 },
    DataRejected(u8),
    UnsupportedCard,
    NoCard,
}

impl fmt::Display for SdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdError::Timeout => write!(f, "Command timeout error"),
            SdError::DataTimeout => write!(f, "Data start token timeout"),
            SdError::WriteTimeout => write!(f, "Card busy before data packet"),
            SdError::EraseTimeout => write!(f, "Erase did not complete"),
            SdError::InvalidToken(token) => write!(f, "Invalid data token: 0x{:02X}", token),
            SdError::CommandRejected { cmd, r1 } => {
                write!(f, "CMD{} rejected: R1=0x{:02X}", cmd, r1)
            }
            SdError::DataRejected(resp) => write!(f, "Data packet rejected: 0x{:02X}", resp),
            SdError::UnsupportedCard => write!(f, "Unsupported card"),
            SdError::NoCard => write!(f, "No card detected"),
        }
    }
}

/// Result of a block-device operation as seen by the filesystem layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    InvalidParameter,
    NotReady,
    WriteProtected,
    Io(SdError),
}

impl From<SdError> for DiskError {
    fn from(err: SdError) -> Self {
        DiskError::Io(err)
    }
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskError::InvalidParameter => write!(f, "Invalid parameter"),
            DiskError::NotReady => write!(f, "Drive not ready"),
            DiskError::WriteProtected => write!(f, "Medium is write protected"),
            DiskError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

// 把 R1 响应转换为错误, 0xFF 表示没有响应
pub(crate) fn check_r1(cmd: u8, r1: u8) -> Result<(), SdError> {
    match r1 {
        0x00 => Ok(()),
        0xFF => Err(SdError::Timeout),
        r1 => Err(SdError::CommandRejected { cmd, r1 }),
    }
}
