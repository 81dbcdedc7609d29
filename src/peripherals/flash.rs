//! RA2L1 data-flash controller (FACI-LP)
//!
//! Two windows share one 8 KiB backing array:
//!
//! | range                     | role                                  |
//! |---------------------------|---------------------------------------|
//! | 0x407EC000 + offsets below| FACI-LP command/status registers      |
//! | 0x40100000 - 0x40101FFF   | memory-mapped data-flash read window  |
//!
//! Programming follows the FSP low-power flash driver sequence: latch the
//! start/end addresses (carrying the 0xFE000000 write-alias base) and the
//! write byte, then kick FCR with a command code. Erase zero-fills the
//! inclusive range, write stores one byte. The busy bit in FSTATR1 flips
//! on every access, which is exactly enough for the FSP driver's
//! poll-until-clear loop to terminate.

use log::{debug, trace, warn};

/// Backing-store size in bytes (RA2L1 data flash is 8 KiB).
pub const DATA_FLASH_LENGTH: usize = 0x2000;

/// CPU-visible base of the data-flash read window.
pub const DATAFLASH_READ_BASE: u32 = 0x4010_0000;

/// Alias base the FSP driver uses for program/erase addresses.
pub const DATAFLASH_WRITE_BASE: u32 = 0xFE00_0000;

/// Register offsets within the FACI-LP block
mod regs {
    /// Flash access status (inert)
    pub const FASR: u32 = 0x104;
    /// Start address, low half-word
    pub const FSARL: u32 = 0x108;
    /// Start address, high half-word
    pub const FSARH: u32 = 0x110;
    /// Flash control: command trigger
    pub const FCR: u32 = 0x114;
    /// End address, low half-word
    pub const FEARL: u32 = 0x120;
    /// End address, high half-word
    pub const FEARH: u32 = 0x128;
    /// Flash status 1: busy bit
    pub const FSTATR1: u32 = 0x12C;
    /// Write buffer byte 0
    pub const FWBL0: u32 = 0x130;
}

/// FCR command codes (FSP r_flash_lp constants)
pub mod fcr_cmd {
    pub const CLEAR: u32 = 0x00;
    pub const WRITE: u32 = 0x81;
    pub const BLANK_CHECK: u32 = 0x83;
    pub const ERASE: u32 = 0x84;
}

const FSTATR1_BUSY: u32 = 0x40;

/// FACI-LP model: command registers plus the backing array.
#[derive(Debug)]
pub struct FlashController {
    data: Vec<u8>,
    start_addr: u32,
    end_addr: u32,
    write_buffer: u8,
    fstatr1: u32,
}

impl FlashController {
    pub fn new() -> Self {
        Self {
            data: vec![0; DATA_FLASH_LENGTH],
            start_addr: 0,
            end_addr: 0,
            write_buffer: 0,
            fstatr1: 0,
        }
    }

    /// Read a FACI-LP register.
    pub fn read(&mut self, offset: u32, _size: u32) -> u32 {
        match offset {
            regs::FSTATR1 => {
                // The FSP driver polls this until the busy bit clears;
                // flipping it every access guarantees forward progress.
                self.fstatr1 ^= FSTATR1_BUSY;
                self.fstatr1
            }
            _ => 0,
        }
    }

    /// Write a FACI-LP register.
    pub fn write(&mut self, offset: u32, _size: u32, value: u32) {
        match offset {
            regs::FSTATR1 => self.fstatr1 ^= FSTATR1_BUSY,
            regs::FASR => {}
            regs::FSARH => {
                self.start_addr = (self.start_addr & 0x0000_FFFF) | ((value & 0xFFFF) << 16);
            }
            regs::FSARL => {
                self.start_addr = (self.start_addr & 0xFFFF_0000) | (value & 0xFFFF);
            }
            regs::FEARH => {
                self.end_addr = (self.end_addr & 0x0000_FFFF) | ((value & 0xFFFF) << 16);
            }
            regs::FEARL => {
                self.end_addr = (self.end_addr & 0xFFFF_0000) | (value & 0xFFFF);
            }
            regs::FWBL0 => self.write_buffer = (value & 0xFF) as u8,
            regs::FCR => {
                self.process_command(value);
                self.fstatr1 = if value != 0 { FSTATR1_BUSY } else { 0 };
            }
            _ => trace!("faci-lp: ignored write {offset:#x} <- {value:#x}"),
        }
    }

    fn process_command(&mut self, command: u32) {
        match command {
            fcr_cmd::ERASE => {
                let start = self.start_addr.wrapping_sub(DATAFLASH_WRITE_BASE) as usize;
                let end = self.end_addr.wrapping_sub(DATAFLASH_WRITE_BASE) as usize;
                if start >= DATA_FLASH_LENGTH || end >= DATA_FLASH_LENGTH || end < start {
                    warn!(
                        "faci-lp: erase range {:#010x}..{:#010x} out of bounds, ignored",
                        self.start_addr, self.end_addr
                    );
                    return;
                }
                debug!("faci-lp: erase {start:#x}..={end:#x}");
                self.data[start..=end].fill(0);
            }
            fcr_cmd::WRITE => {
                let addr = self.start_addr.wrapping_sub(DATAFLASH_WRITE_BASE) as usize;
                if addr >= DATA_FLASH_LENGTH {
                    warn!(
                        "faci-lp: write address {:#010x} out of bounds, ignored",
                        self.start_addr
                    );
                    return;
                }
                self.data[addr] = self.write_buffer;
            }
            fcr_cmd::BLANK_CHECK | fcr_cmd::CLEAR => {}
            _ => debug!("faci-lp: unknown command {command:#04x}"),
        }
    }

    /// Width-aware read from the memory-mapped data-flash window.
    ///
    /// Misaligned wide accesses read as zero, matching the hardware's
    /// bus-fault-free behavior for the widths firmware actually issues.
    pub fn read_data(&self, offset: u32, size: u32) -> u32 {
        let offset = offset as usize;
        let size = size as usize;
        if size == 0 || offset + size > DATA_FLASH_LENGTH {
            return 0;
        }
        if offset % size != 0 {
            return 0;
        }
        let mut value: u32 = 0;
        for i in (0..size.min(4)).rev() {
            value = (value << 8) | self.data[offset + i] as u32;
        }
        value
    }

    /// Writes through the read window have no effect on hardware.
    pub fn write_data(&self, offset: u32, value: u32) {
        trace!("dflash: ignored window write {offset:#x} <- {value:#x}");
    }
}

impl Default for FlashController {
    fn default() -> Self {
        Self::new()
    }
}
