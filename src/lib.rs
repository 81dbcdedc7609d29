//! Peripheral emulation core for the Renesas RA2L1 (Cortex-M23) SoC.
//!
//! Models the on-chip peripherals an RA2L1 firmware image touches during
//! normal operation, behind a single memory-mapped bus interface. A CPU
//! emulation drives [`SystemBus::read`] / [`SystemBus::write`] for every
//! peripheral load and store and polls the [`InterruptBridge`] for
//! pending interrupt lines.
//!
//! Peripheral memory map:
//!
//! | base        | peripheral                               |
//! |-------------|------------------------------------------|
//! | 0x4001E000  | SYSTEM (clock generation, stubbed)       |
//! | 0x40040000  | PORT0-PORT8 I/O ports (0x20 stride)      |
//! | 0x40040800  | PFS pin-function select                  |
//! | 0x40044000  | RTC (stubbed)                            |
//! | 0x40050000  | CAN0 (stubbed)                           |
//! | 0x40070000  | SCI0-SCI9 serial (0x20 stride)           |
//! | 0x40084000  | AGT0-AGT1 timers (0x100 stride)          |
//! | 0x400D0000  | SC324 AES accelerator                    |
//! | 0x40100000  | data-flash read window (8 KiB)           |
//! | 0x407EC000  | FACI-LP data-flash controller            |
//!
//! Timers and serial receive paths run on background threads; everything
//! they report back to the CPU flows through interrupt lines and locked
//! per-channel buffers, so the bus itself never blocks.

pub mod bus;
pub mod irq;
pub mod peripherals;
pub mod transport;


use thiserror::Error;

pub use bus::{AddressMap, PeripheralKind, RegisterRange, SystemBus};
pub use irq::{lines, InterruptBridge, IrqHandle};
pub use peripherals::gpio::PinMonitor;
pub use peripherals::timer::ClockConfig;
pub use peripherals::Peripherals;
pub use transport::{host_pair, HostEndpoint, SerialTransport};

/// Construction-time failures.
///
/// Register access at runtime never fails: malformed firmware sequences
/// are silent no-ops. Errors exist only for wiring mistakes an embedder
/// makes while building the SoC.
#[derive(Debug, Error)]
pub enum SocError {
    #[error("{peripheral} channel {channel} out of range (max {max})")]
    InvalidChannel {
        peripheral: &'static str,
        channel: usize,
        max: usize,
    },

    #[error("register ranges at {first:#010x} and {second:#010x} overlap")]
    OverlappingRanges { first: u32, second: u32 },
}
