//! MMIO address decode and bus dispatch.
//!
//! [`AddressMap`] is an ordered table of non-overlapping register ranges
//! built once at init; lookups binary-search it and yield the peripheral
//! kind plus the offset within its window. [`SystemBus`] pairs a map
//! with the peripheral instances and is what the CPU emulation calls for
//! every load and store.
//!
//! Access to an unmapped address is not an error: reads return zero and
//! writes are dropped, matching the tolerant bus behavior firmware was
//! developed against.

use std::sync::Arc;

use log::trace;

use crate::irq::InterruptBridge;
use crate::peripherals::gpio::PinMonitor;
use crate::peripherals::serial::LineCallback;
use crate::peripherals::timer::ClockConfig;
use crate::peripherals::{self, Peripherals};
use crate::transport::SerialTransport;
use crate::SocError;

/// Peripheral windows the bus can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralKind {
    System,
    Can,
    Rtc,
    Gpio,
    Pfs,
    Sci,
    Agt,
    Aes,
    FaciLp,
    DataFlash,
}

/// One contiguous register window.
#[derive(Debug, Clone, Copy)]
pub struct RegisterRange {
    pub base: u32,
    pub size: u32,
    pub kind: PeripheralKind,
}

impl RegisterRange {
    const fn new(base: u32, size: u32, kind: PeripheralKind) -> Self {
        Self { base, size, kind }
    }

    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < self.size
    }
}

/// Ordered, non-overlapping address decode table.
#[derive(Debug)]
pub struct AddressMap {
    ranges: Vec<RegisterRange>,
}

impl AddressMap {
    /// Build a map, rejecting overlapping windows.
    pub fn new(mut ranges: Vec<RegisterRange>) -> Result<Self, SocError> {
        ranges.sort_by_key(|r| r.base);
        for pair in ranges.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if b.base - a.base < a.size {
                return Err(SocError::OverlappingRanges {
                    first: a.base,
                    second: b.base,
                });
            }
        }
        Ok(Self { ranges })
    }

    /// The RA2L1 peripheral memory map (vendor base addresses).
    pub fn ra2l1() -> Result<Self, SocError> {
        use PeripheralKind::*;
        let gpio_size = peripherals::gpio::NUM_PORTS as u32 * peripherals::gpio::PORT_STRIDE;
        let pfs_size = peripherals::gpio::NUM_PORTS as u32 * peripherals::gpio::PFS_PORT_STRIDE;
        let sci_size = peripherals::serial::NUM_CHANNELS as u32 * peripherals::SCI_STRIDE;
        let agt_size = peripherals::NUM_AGT_CHANNELS as u32 * peripherals::AGT_STRIDE;

        let ranges = vec![
            RegisterRange::new(0x4001_E000, 0x1000, System),
            RegisterRange::new(0x4004_0000, gpio_size, Gpio),
            RegisterRange::new(0x4004_0800, pfs_size, Pfs),
            RegisterRange::new(0x4004_4000, 0x100, Rtc),
            RegisterRange::new(0x4005_0000, 0x1000, Can),
            RegisterRange::new(0x4007_0000, sci_size, Sci),
            RegisterRange::new(0x4008_4000, agt_size, Agt),
            RegisterRange::new(0x400D_0000, 0x100, Aes),
            RegisterRange::new(
                peripherals::flash::DATAFLASH_READ_BASE,
                peripherals::flash::DATA_FLASH_LENGTH as u32,
                DataFlash,
            ),
            RegisterRange::new(0x407E_C000, 0x200, FaciLp),
        ];
        Self::new(ranges)
    }

    /// Resolve an absolute address to its window and offset.
    pub fn resolve(&self, addr: u32) -> Option<(PeripheralKind, u32)> {
        let idx = self.ranges.partition_point(|r| r.base <= addr);
        if idx == 0 {
            return None;
        }
        let range = &self.ranges[idx - 1];
        range.contains(addr).then(|| (range.kind, addr - range.base))
    }
}

/// The CPU-facing bus: address decode plus peripheral dispatch.
///
/// All calls happen on the CPU emulation thread; peripherals that need
/// background timing own their threads internally.
#[derive(Debug)]
pub struct SystemBus {
    map: AddressMap,
    peripherals: Peripherals,
}

impl SystemBus {
    /// Build a bus over the RA2L1 memory map.
    pub fn new(bridge: Arc<InterruptBridge>, clock: ClockConfig) -> Result<Self, SocError> {
        Ok(Self {
            map: AddressMap::ra2l1()?,
            peripherals: Peripherals::new(bridge, clock)?,
        })
    }

    /// Load from a peripheral address.
    pub fn read(&mut self, addr: u32, size: u32) -> u32 {
        match self.map.resolve(addr) {
            Some((kind, offset)) => self.peripherals.read(kind, offset, size),
            None => {
                trace!("bus: unmapped read {addr:#010x}");
                0
            }
        }
    }

    /// Store to a peripheral address.
    pub fn write(&mut self, addr: u32, size: u32, value: u32) {
        match self.map.resolve(addr) {
            Some((kind, offset)) => self.peripherals.write(kind, offset, size, value),
            None => trace!("bus: unmapped write {addr:#010x} <- {value:#x}"),
        }
    }

    /// Connect a byte-stream transport to an SCI channel.
    pub fn attach_transport(
        &mut self,
        channel: usize,
        transport: Arc<dyn SerialTransport>,
        callback: Option<LineCallback>,
    ) -> Result<(), SocError> {
        self.peripherals.attach_transport(channel, transport, callback)
    }

    /// Attach a pin-level observer to the GPIO block.
    pub fn set_pin_monitor(&mut self, monitor: Box<dyn PinMonitor>) {
        self.peripherals.set_pin_monitor(monitor);
    }

    /// Stop every background thread.
    pub fn shutdown(&mut self) {
        self.peripherals.shutdown();
    }
}
