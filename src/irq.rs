//! Interrupt bridge between peripheral models and the CPU collaborator.
//!
//! Peripherals never talk to the NVIC model directly; they hold an
//! [`IrqHandle`] for each of their wired lines and assert/clear/pulse it.
//! The CPU-side collaborator polls the shared [`InterruptBridge`] for line
//! levels and drains pulse counts at its own instruction boundaries, so
//! assertions from background threads become visible "eventually, after
//! the effect" rather than at a precise cycle.
//!
//! Line numbers follow the NVIC vector assignment used by the sampled
//! firmware images (see [`lines`]). Channels without real-hardware
//! interrupt wiring get an inert handle that never asserts.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Number of external interrupt lines exposed to the CPU core.
pub const NUM_LINES: usize = 32;

/// Fixed vector assignment for the wired peripheral lines.
pub mod lines {
    /// SCI0 receive-data-ready
    pub const SCI0_RXI: usize = 0;
    /// SCI0 transmit-data-empty
    pub const SCI0_TXI: usize = 1;
    /// SCI0 transmit-complete
    pub const SCI0_TEI: usize = 2;
    /// AGT0 underflow pulse
    pub const AGT0_UNDERFLOW: usize = 3;
    /// SCI9 receive-data-ready
    pub const SCI9_RXI: usize = 4;
    /// SCI9 transmit-data-empty
    pub const SCI9_TXI: usize = 5;
    /// SCI9 transmit-complete
    pub const SCI9_TEI: usize = 6;
    /// AGT1 underflow pulse
    pub const AGT1_UNDERFLOW: usize = 7;
}

/// Per-line state: a level (for level-sensitive sources like rxi) and a
/// pulse counter (for edge sources like timer underflow and txi/tei).
#[derive(Debug, Default)]
struct LineState {
    level: AtomicBool,
    pulses: AtomicU64,
}

/// Shared interrupt-line state.
///
/// Thread-safe by construction: every field is atomic, so dispatcher-thread
/// register handlers and background timer/receive threads can signal lines
/// without a lock, and the CPU collaborator can poll without blocking them.
#[derive(Debug)]
pub struct InterruptBridge {
    lines: [LineState; NUM_LINES],
}

impl InterruptBridge {
    /// Create a bridge with all lines deasserted.
    pub fn new() -> Self {
        Self {
            lines: std::array::from_fn(|_| LineState::default()),
        }
    }

    /// Current level of a line.
    pub fn level(&self, line: usize) -> bool {
        self.lines[line].level.load(Ordering::Acquire)
    }

    /// Drain the pulse count for a line (returns pulses since last drain).
    pub fn take_pulses(&self, line: usize) -> u64 {
        self.lines[line].pulses.swap(0, Ordering::AcqRel)
    }

    /// Peek at the pulse count without draining it.
    pub fn pulses(&self, line: usize) -> u64 {
        self.lines[line].pulses.load(Ordering::Acquire)
    }

    /// True if any line is asserted or has an undrained pulse.
    pub fn any_pending(&self) -> bool {
        self.lines
            .iter()
            .any(|l| l.level.load(Ordering::Acquire) || l.pulses.load(Ordering::Acquire) != 0)
    }

    fn assert(&self, line: usize) {
        self.lines[line].level.store(true, Ordering::Release);
    }

    fn clear(&self, line: usize) {
        self.lines[line].level.store(false, Ordering::Release);
    }

    fn pulse(&self, line: usize) {
        self.lines[line].pulses.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for InterruptBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// A peripheral's handle on one named interrupt line.
///
/// Cloneable and `Send` so background threads can carry their own copy.
/// An inert handle (unwired channel) swallows every operation.
#[derive(Debug, Clone)]
pub struct IrqHandle {
    wired: Option<(Arc<InterruptBridge>, usize)>,
}

impl IrqHandle {
    /// Handle wired to `line` on `bridge`.
    ///
    /// Line numbers are fixed init-time tables, so an out-of-range value is
    /// a wiring bug and fails loudly here rather than per-access.
    pub fn wired(bridge: Arc<InterruptBridge>, line: usize) -> Self {
        assert!(line < NUM_LINES, "irq line {line} out of range");
        Self {
            wired: Some((bridge, line)),
        }
    }

    /// Handle for a channel with no real-hardware interrupt wiring.
    pub const fn inert() -> Self {
        Self { wired: None }
    }

    /// True if this handle actually reaches the bridge.
    pub fn is_wired(&self) -> bool {
        self.wired.is_some()
    }

    /// Raise the line level.
    pub fn assert(&self) {
        if let Some((bridge, line)) = &self.wired {
            bridge.assert(*line);
        }
    }

    /// Drop the line level.
    pub fn clear(&self) {
        if let Some((bridge, line)) = &self.wired {
            bridge.clear(*line);
        }
    }

    /// Edge-trigger the line once.
    pub fn pulse(&self) {
        if let Some((bridge, line)) = &self.wired {
            bridge.pulse(*line);
        }
    }
}
