//! Card configuration register decoding.
//!
//! The CSD is kept as the 16 raw bytes received from the card, MSB first,
//! so byte 0 holds bits [127:120].

use crate::constant::CSD_LEN;

use super::CardType;

/// CSD_STRUCTURE field, bits [127:126].
pub fn csd_structure(csd: &[u8; CSD_LEN]) -> u8 {
    csd[0] >> 6
}

/// Card capacity in 512-byte sectors.
pub fn sector_count(csd: &[u8; CSD_LEN]) -> u64 {
    if csd_structure(csd) == 1 {
        // SDC ver 2.00: C_SIZE [69:48], capacity = (C_SIZE + 1) * 512 KiB
        let csize =
            csd[9] as u64 + ((csd[8] as u64) << 8) + (((csd[7] & 63) as u64) << 16) + 1;
        csize << 10
    } else {
        // SDC ver 1.XX or MMC ver 3: READ_BL_LEN + C_SIZE_MULT + 2
        let n = (csd[5] & 15) as u32
            + ((csd[10] & 128) >> 7) as u32
            + (((csd[9] & 3) as u32) << 1)
            + 2;
        let csize = (csd[8] >> 6) as u64
            + ((csd[7] as u64) << 2)
            + (((csd[6] & 3) as u64) << 10)
            + 1;
        if n >= 9 {
            csize << (n - 9)
        } else {
            csize >> (9 - n)
        }
    }
}

/// Erase block size in sectors for SD v1 and MMC cards, from the CSD.
pub fn erase_block_sectors(card: CardType, csd: &[u8; CSD_LEN]) -> u32 {
    match card {
        CardType::Mmc => {
            // ERASE_GRP_SIZE [46:42], ERASE_GRP_MULT [41:37]
            let grp_size = ((csd[10] & 124) >> 2) as u32;
            let grp_mult = (((csd[10] & 3) as u32) << 3) + ((csd[11] & 224) >> 5) as u32;
            (grp_size + 1) * (grp_mult + 1)
        }
        _ => {
            // SECTOR_SIZE [45:39] in WRITE_BL_LEN units
            let sector_size = (((csd[10] & 63) as u32) << 1) + ((csd[11] & 128) >> 7) as u32;
            let shift = (csd[13] >> 6).saturating_sub(1);
            (sector_size + 1) << shift
        }
    }
}

/// Erase block size in sectors from the AU_SIZE field of the SD status.
pub fn sd_status_erase_block_sectors(sd_status: &[u8]) -> u32 {
    16u32 << (sd_status[10] >> 4)
}

/// Whether CMD32/CMD33 may address single sectors.
pub fn supports_sector_erase(csd: &[u8; CSD_LEN]) -> bool {
    // ERASE_BLK_EN [46] only matters for version 1 registers
    csd_structure(csd) != 0 || csd[10] & 0x40 != 0
}
