// SD/MMC command indices (SPI mode)
pub const MMC_GO_IDLE_STATE: u8 = 0; // CMD0
pub const MMC_SEND_OP_COND: u8 = 1; // CMD1
pub const SD_SEND_IF_COND: u8 = 8; // CMD8
pub const MMC_SEND_CSD: u8 = 9; // CMD9
pub const MMC_SEND_CID: u8 = 10; // CMD10
pub const MMC_STOP_TRANSMISSION: u8 = 12; // CMD12
pub const MMC_SET_BLOCKLEN: u8 = 16; // CMD16
pub const MMC_READ_SINGLE_BLOCK: u8 = 17; // CMD17
pub const MMC_READ_MULTIPLE_BLOCK: u8 = 18; // CMD18
pub const MMC_WRITE_BLOCK: u8 = 24; // CMD24
pub const MMC_WRITE_MULTIPLE_BLOCK: u8 = 25; // CMD25
pub const SD_ERASE_WR_BLK_START: u8 = 32; // CMD32
pub const SD_ERASE_WR_BLK_END: u8 = 33; // CMD33
pub const MMC_ERASE: u8 = 38; // CMD38
pub const MMC_APP_CMD: u8 = 55; // CMD55
pub const MMC_READ_OCR: u8 = 58; // CMD58

// SD application commands, only valid after MMC_APP_CMD
pub const SD_APP_SD_STATUS: u8 = 13; // ACMD13
pub const SD_APP_SET_WR_BLK_ERASE_COUNT: u8 = 23; // ACMD23
pub const SD_APP_OP_COND: u8 = 41; // ACMD41

// Command frame
pub const CMD_START_BITS: u8 = 0x40;
pub const CMD0_CRC: u8 = 0x95; // valid CRC for CMD0(0)
pub const CMD8_CRC: u8 = 0x87; // valid CRC for CMD8(0x1AA)
pub const CMD_DUMMY_CRC: u8 = 0x01; // dummy CRC + stop bit
pub const CMD_RESPONSE_POLLS: usize = 10;

// Arguments
pub const SD_IF_COND_VHS_PATTERN: u32 = 0x1AA; // 2.7-3.6V + check pattern
pub const OCR_HCS: u32 = 1 << 30;
pub const OCR_CCS_BYTE0: u8 = 0x40;

// R1 response bits
pub const R1_READY: u8 = 0x00;
pub const R1_IDLE_STATE: u8 = 0x01;
pub const R1_NO_RESPONSE: u8 = 0xFF;
pub const R1_INVALID_MASK: u8 = 0x80;

// Data tokens
pub const TOKEN_START_BLOCK: u8 = 0xFE;
pub const TOKEN_START_MULTI_WRITE: u8 = 0xFC;
pub const TOKEN_STOP_TRAN: u8 = 0xFD;
pub const DATA_RESP_MASK: u8 = 0x1F;
pub const DATA_RESP_ACCEPTED: u8 = 0x05;

pub const BUS_IDLE: u8 = 0xFF;
pub const POWER_UP_DUMMY_BYTES: usize = 10; // 80 clocks

// Sizes
pub const SECTOR_SIZE: usize = 512;
pub const CSD_LEN: usize = 16;
pub const CID_LEN: usize = 16;
pub const OCR_LEN: usize = 4;
pub const SD_STATUS_LEN: usize = 64;
// GET_BLOCK_SIZE reads the first 16 bytes of SD status, the rest is clocked out
pub const SD_STATUS_PARTIAL_LEN: usize = 16;
pub const SD_STATUS_TRAILING_BYTES: usize = SD_STATUS_LEN - SD_STATUS_PARTIAL_LEN;

// Timeouts in ms
pub const INIT_TIMEOUT_MS: u32 = 1000;
pub const READ_TIMEOUT_MS: u32 = 200;
pub const WRITE_TIMEOUT_MS: u32 = 500;
pub const CMD_TIMEOUT_MS: u32 = 600;
pub const ERASE_TIMEOUT_MS: u32 = 30000;

// FatFs disk_ioctl command codes
pub const CTRL_SYNC: u8 = 0;
pub const GET_SECTOR_COUNT: u8 = 1;
pub const GET_SECTOR_SIZE: u8 = 2;
pub const GET_BLOCK_SIZE: u8 = 3;
pub const CTRL_TRIM: u8 = 4;
pub const MMC_GET_TYPE: u8 = 10;
pub const MMC_GET_CSD: u8 = 11;
pub const MMC_GET_CID: u8 = 12;
pub const MMC_GET_OCR: u8 = 13;
pub const MMC_GET_SDSTAT: u8 = 14;

// Card type bits reported by MMC_GET_TYPE
pub const CT_MMC: u8 = 0x01;
pub const CT_SD1: u8 = 0x02;
pub const CT_SD2: u8 = 0x04;
pub const CT_BLOCK: u8 = 0x08;
