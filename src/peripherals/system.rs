//! Clock, CAN, and RTC stub registers
//!
//! Just enough of the SYSTEM/CAN0/RTC windows for the FSP startup code
//! to get through clock and peripheral bring-up:
//!
//! - `OSCSF` reads as "all oscillators stable" so the HOCO wait loop
//!   exits immediately;
//! - `SCKDIVCR` reads back the reset divider configuration;
//! - `MOSCCR` is a plain read/write latch the startup code toggles;
//! - CAN0 `CTLR` writes are mirrored into `STR` (mode-change request
//!   bits acknowledge instantly);
//! - RTC `RCR2` latches its start bit so the driver's poll completes.
//!
//! Everything else in these windows reads zero and ignores writes.

use log::trace;

/// Offsets within the SYSTEM window (base 0x4001E000)
mod system_regs {
    /// System clock division control
    pub const SCKDIVCR: u32 = 0x020;
    /// Main clock oscillator control
    pub const MOSCCR: u32 = 0x032;
    /// Oscillation stabilization flag
    pub const OSCSF: u32 = 0x03C;
}

/// Offsets within the CAN0 window
mod can_regs {
    /// Control register
    pub const CTLR: u32 = 0x0840;
    /// Status register
    pub const STR: u32 = 0x0842;
}

/// Offsets within the RTC window
mod rtc_regs {
    /// RTC control register 2
    pub const RCR2: u32 = 0x0F;
}

/// HOCO and main oscillator stable.
const OSCSF_STABLE: u32 = 9;

/// Reset value of SCKDIVCR (ICK and PCKB dividers).
const SCKDIVCR_RESET: u32 = 0x0000_0104;

/// Stub state for the SYSTEM, CAN0, and RTC windows.
#[derive(Debug)]
pub struct SystemControl {
    mosccr: u32,
    can_str: u32,
    rtc_rcr2: u32,
}

impl SystemControl {
    pub fn new() -> Self {
        Self {
            mosccr: 1,
            can_str: 0x100,
            rtc_rcr2: 0x40,
        }
    }

    pub fn read_system(&self, offset: u32, _size: u32) -> u32 {
        match offset {
            system_regs::OSCSF => OSCSF_STABLE,
            system_regs::MOSCCR => self.mosccr,
            system_regs::SCKDIVCR => SCKDIVCR_RESET,
            _ => 0,
        }
    }

    pub fn write_system(&mut self, offset: u32, _size: u32, value: u32) {
        match offset {
            system_regs::MOSCCR => self.mosccr = value,
            system_regs::SCKDIVCR => {}
            _ => trace!("system: ignored write {offset:#x} <- {value:#x}"),
        }
    }

    pub fn read_can(&self, offset: u32, _size: u32) -> u32 {
        match offset {
            can_regs::STR => self.can_str,
            _ => 0,
        }
    }

    pub fn write_can(&mut self, offset: u32, _size: u32, value: u32) {
        if offset == can_regs::CTLR {
            // Mode-change requests acknowledge immediately
            self.can_str = value & 0x300;
        }
    }

    pub fn read_rtc(&self, offset: u32, _size: u32) -> u32 {
        match offset {
            rtc_regs::RCR2 => self.rtc_rcr2,
            _ => 0,
        }
    }

    pub fn write_rtc(&mut self, offset: u32, _size: u32, value: u32) {
        if offset == rtc_regs::RCR2 {
            self.rtc_rcr2 = (self.rtc_rcr2 & !1) | (value & 1);
        }
    }
}

impl Default for SystemControl {
    fn default() -> Self {
        Self::new()
    }
}
