//! RA2L1 Asynchronous General-purpose Timer (AGT)
//!
//! Memory-mapped at 0x40084000, one 0x100-stride block per channel.
//!
//! Each channel is a 16-bit down-counter with a clock-select prescaler.
//! Writing the start pattern to AGTCR arms the channel: a background
//! thread sleeps `reload / freq` and pulses the channel's underflow line,
//! looping while the mode register selects repeat operation. The stop
//! pattern disarms the channel cooperatively; the thread observes it
//! after the sleep in flight.
//!
//! Register layout follows the vendor header; the FSP start/stop control
//! patterns come from r_agt.c.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};

use crate::irq::IrqHandle;

/// Register offsets within one AGT channel block
mod regs {
    /// 16-bit counter / reload value
    pub const AGT: u32 = 0x00;
    /// Compare match A (unmodeled)
    pub const AGTCMA: u32 = 0x02;
    /// Compare match B (unmodeled)
    pub const AGTCMB: u32 = 0x04;
    /// Control: start/stop patterns and status flags
    pub const AGTCR: u32 = 0x08;
    /// Mode 1: operating mode (bits 0-2) and count source (bits 4-6)
    pub const AGTMR1: u32 = 0x09;
    /// Mode 2: clock divider selector (bits 0-2)
    pub const AGTMR2: u32 = 0x0A;
    /// I/O control (unmodeled)
    pub const AGTIOC: u32 = 0x0C;
    /// Event pin select (unmodeled)
    pub const AGTISR: u32 = 0x0D;
    /// Compare match function select (unmodeled)
    pub const AGTCMSR: u32 = 0x0E;
    /// Input select (unmodeled)
    pub const AGTIOSEL: u32 = 0x0F;
}

/// AGTCR command patterns (FSP r_agt.c)
pub mod ctrl {
    /// Stop the counter, keep status flags
    pub const STOP_TIMER: u8 = 0xF0;
    /// Start the counter
    pub const START_TIMER: u8 = 0xF1;
    /// Stop and clear status flags
    pub const FORCE_STOP: u8 = 0xF4;
    /// TSTART | TCSTF bits reflected back to firmware polls
    pub const RUN_BITS: u8 = 0x03;
}

/// AGTMR1 operating mode selecting repeat operation. Any other mode value
/// fires a single pulse and returns to idle.
const TMOD_REPEAT: u8 = 1;

/// High-speed on-chip oscillator frequency.
pub const HOCO_HZ: u64 = 48_000_000;

/// Default peripheral module clock B (HOCO / 2).
pub const PCLKB_HZ: u64 = HOCO_HZ / 2;

/// Clock frequencies the timer channels divide down from.
#[derive(Debug, Clone, Copy)]
pub struct ClockConfig {
    /// Peripheral module clock B in Hz
    pub pclkb_hz: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { pclkb_hz: PCLKB_HZ }
    }
}

impl ClockConfig {
    /// Effective count frequency for a clock-select value (AGTMR1 bits 4-6).
    ///
    /// Entries 2 and 4-7 are reserved in the vendor table and yield zero;
    /// a channel configured with one of them must never be armed.
    pub fn agt_frequency(&self, tck: u8) -> u64 {
        let candidates = [
            self.pclkb_hz,
            self.pclkb_hz / 8,
            0,
            self.pclkb_hz / 2,
            0,
            0,
            0,
            0,
        ];
        candidates[(tck & 0x07) as usize]
    }
}

/// State shared between the register interface and the timing thread.
///
/// `armed` is the firmware-visible run request: set by the start pattern,
/// cleared by the stop pattern (or by the thread when a one-shot expires).
/// `running` tracks thread lifetime and makes arming idempotent; only the
/// thread itself moves it from true to false.
#[derive(Debug)]
struct Shared {
    armed: AtomicBool,
    running: AtomicBool,
    reload: AtomicU16,
    tmod: AtomicU8,
}

/// One AGT channel: registers plus its background timing thread.
#[derive(Debug)]
pub struct AgtChannel {
    channel: usize,
    /// AGTCR readback value
    agtcr: u8,
    /// Clock select from AGTMR1 bits 4-6
    tck: u8,
    /// AGTMR2 divider latch (bits 0-2)
    divider: u8,
    shared: Arc<Shared>,
    irq: IrqHandle,
    clock: ClockConfig,
}

impl AgtChannel {
    /// Create an idle channel wired to `irq`.
    pub fn new(channel: usize, irq: IrqHandle, clock: ClockConfig) -> Self {
        Self {
            channel,
            agtcr: 0,
            tck: 0,
            divider: 0,
            shared: Arc::new(Shared {
                armed: AtomicBool::new(false),
                running: AtomicBool::new(false),
                reload: AtomicU16::new(0),
                tmod: AtomicU8::new(0),
            }),
            irq,
            clock,
        }
    }

    /// True while the channel is armed.
    pub fn is_running(&self) -> bool {
        self.shared.armed.load(Ordering::Acquire)
    }

    /// Disarm the channel, as if firmware wrote the stop pattern.
    pub fn stop(&mut self) {
        self.agtcr &= !ctrl::RUN_BITS;
        self.shared.armed.store(false, Ordering::Release);
    }

    /// Read a register (offset within the channel block).
    pub fn read(&self, offset: u32, _size: u32) -> u32 {
        match offset {
            regs::AGT => self.shared.reload.load(Ordering::Acquire) as u32,
            regs::AGTCR => self.agtcr as u32,
            regs::AGTMR1 => (self.shared.tmod.load(Ordering::Acquire) | (self.tck << 4)) as u32,
            regs::AGTMR2 => self.divider as u32,
            _ => 0,
        }
    }

    /// Write a register (offset within the channel block).
    pub fn write(&mut self, offset: u32, _size: u32, value: u32) {
        match offset {
            regs::AGT => {
                self.shared
                    .reload
                    .store((value & 0xFFFF) as u16, Ordering::Release);
            }
            regs::AGTCR => {
                self.agtcr = (value & 0xFF) as u8;
                self.process_control((value & 0xFF) as u8);
            }
            regs::AGTMR1 => {
                self.shared
                    .tmod
                    .store((value & 0x07) as u8, Ordering::Release);
                self.tck = ((value >> 4) & 0x07) as u8;
            }
            regs::AGTMR2 => {
                self.divider = (value & 0x07) as u8;
            }
            regs::AGTCMA | regs::AGTCMB | regs::AGTIOC | regs::AGTISR | regs::AGTCMSR
            | regs::AGTIOSEL => {}
            _ => {}
        }
    }

    fn process_control(&mut self, value: u8) {
        match value {
            ctrl::START_TIMER => {
                self.agtcr |= ctrl::RUN_BITS;
                self.start();
            }
            ctrl::STOP_TIMER | ctrl::FORCE_STOP => self.stop(),
            _ => {}
        }
    }

    /// Arm the channel and spawn the timing thread if none is alive.
    fn start(&mut self) {
        let freq = self.clock.agt_frequency(self.tck);
        if freq == 0 {
            warn!(
                "agt{}: reserved clock select {}, not arming",
                self.channel, self.tck
            );
            return;
        }

        self.shared.armed.store(true, Ordering::Release);

        // Idempotent: a second start while the thread is alive only
        // re-raises the armed flag.
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let shared = self.shared.clone();
        let irq = self.irq.clone();
        let channel = self.channel;
        let spawned = thread::Builder::new()
            .name(format!("agt{channel}"))
            .spawn(move || timer_main(channel, shared, irq, freq));
        if let Err(err) = spawned {
            // Degraded mode: the channel stays armed but never fires.
            error!("agt{}: timer thread spawn failed: {err}", self.channel);
        }
    }
}

impl Drop for AgtChannel {
    fn drop(&mut self) {
        self.shared.armed.store(false, Ordering::Release);
    }
}

/// Timing-thread body for one armed channel.
fn timer_main(channel: usize, shared: Arc<Shared>, irq: IrqHandle, freq_hz: u64) {
    loop {
        let mut reload = shared.reload.load(Ordering::Acquire) as u64;
        if reload == 0 {
            // A reload of zero wraps to the full 16-bit period
            reload = 0xFFFF;
        }
        let interval = Duration::from_nanos(reload.saturating_mul(1_000_000_000) / freq_hz);
        debug!("agt{channel}: armed, interval {interval:?}");

        while shared.armed.load(Ordering::Acquire) {
            thread::sleep(interval);
            irq.pulse();
            if shared.tmod.load(Ordering::Acquire) != TMOD_REPEAT {
                debug!("agt{channel}: one-shot expired");
                shared.armed.store(false, Ordering::Release);
            }
        }
        shared.running.store(false, Ordering::Release);
        // A start pattern landing between the armed check and the store
        // above re-raises armed without spawning; reclaim the slot
        // instead of leaving the channel armed with no thread alive.
        if shared.armed.load(Ordering::Acquire) && !shared.running.swap(true, Ordering::AcqRel) {
            continue;
        }
        return;
    }
}
