//! RA2L1 I/O port block (PORT0-PORT8) and pin-function select (PFS)
//!
//! Port register blocks sit at 0x40040000 with a 0x20 stride; the PFS
//! matrix sits at 0x40040800, one 32-bit word per pin, 16 pins per port.
//!
//! Modeled registers per port:
//!
//! | offset | register | behavior                                        |
//! |--------|----------|-------------------------------------------------|
//! | 0x00   | PCNTR1   | write: PDR lower half, output levels upper half; read: levels upper, PDR lower |
//! | 0x04   | PCNTR2   | levels half-word                                |
//! | 0x08   | PCNTR3   | inert                                           |
//! | 0x0C   | PCNTR4   | inert                                           |
//!
//! A PFS write that configures a pin as input with the pull-up enabled
//! drives that pin's level high, which is what firmware probing a
//! switch on an open line observes on real silicon.
//!
//! An optional [`PinMonitor`] gets told about every level change and may
//! override live levels (e.g. an interactive board viewer holding a
//! button down). With no monitor attached, reads reflect exactly what
//! was written.

use log::{debug, trace, warn};

/// Number of I/O ports on the part.
pub const NUM_PORTS: usize = 9;

/// Byte stride between consecutive port register blocks.
pub const PORT_STRIDE: u32 = 0x20;

/// Bytes of PFS space per port (16 pins, one word each).
pub const PFS_PORT_STRIDE: u32 = 0x40;

/// Register offsets within one port block
mod regs {
    pub const PCNTR1: u32 = 0x00;
    pub const PCNTR2: u32 = 0x04;
    pub const PCNTR3: u32 = 0x08;
    pub const PCNTR4: u32 = 0x0C;
}

/// PmnPFS bit fields
mod pfs_bits {
    /// Port Direction (1 = output)
    pub const PDR: u32 = 1 << 2;
    /// Pull-up Control (1 = pull-up enabled)
    pub const PCR: u32 = 1 << 4;
}

/// Observer/overrider for pin levels.
///
/// Replaces the out-of-process board viewer the deployment tooling used:
/// the capability surface is the same (watch level changes, inject
/// external levels) without the shared-object loading.
pub trait PinMonitor: Send {
    /// Called once when the monitor is attached.
    fn launched(&mut self) {}

    /// Called after any write that changed a port's direction or levels.
    fn update(&mut self, port: usize, pdr: u16, levels: u16);

    /// Live external levels for a port, if the monitor wants to drive
    /// them. `None` leaves the latched levels in effect.
    fn levels(&self, port: usize) -> Option<u16> {
        None
    }
}

/// Direction and level latches for one port.
#[derive(Debug, Default, Clone, Copy)]
struct PortState {
    pdr: u16,
    val: u16,
}

/// All nine ports plus the PFS matrix.
pub struct GpioPorts {
    ports: [PortState; NUM_PORTS],
    monitor: Option<Box<dyn PinMonitor>>,
}

impl GpioPorts {
    pub fn new() -> Self {
        Self {
            ports: [PortState::default(); NUM_PORTS],
            monitor: None,
        }
    }

    /// Attach a level observer/overrider.
    pub fn set_monitor(&mut self, mut monitor: Box<dyn PinMonitor>) {
        monitor.launched();
        self.monitor = Some(monitor);
    }

    fn levels(&self, port: usize) -> u16 {
        if let Some(monitor) = &self.monitor {
            if let Some(levels) = monitor.levels(port) {
                return levels;
            }
        }
        self.ports[port].val
    }

    fn notify(&mut self, port: usize) {
        let PortState { pdr, val } = self.ports[port];
        if let Some(monitor) = &mut self.monitor {
            monitor.update(port, pdr, val);
        }
    }

    /// Read a port-block register. `offset` is relative to PORT0.
    pub fn read(&mut self, offset: u32, _size: u32) -> u32 {
        let port = (offset / PORT_STRIDE) as usize;
        if port >= NUM_PORTS {
            warn!("gpio: read past PORT8 (offset {offset:#x})");
            return 0;
        }
        match offset % PORT_STRIDE {
            regs::PCNTR1 => {
                ((self.levels(port) as u32) << 16) | self.ports[port].pdr as u32
            }
            regs::PCNTR2 => self.levels(port) as u32,
            _ => 0,
        }
    }

    /// Write a port-block register. `offset` is relative to PORT0.
    pub fn write(&mut self, offset: u32, _size: u32, value: u32) {
        let port = (offset / PORT_STRIDE) as usize;
        if port >= NUM_PORTS {
            warn!("gpio: write past PORT8 (offset {offset:#x})");
            return;
        }
        match offset % PORT_STRIDE {
            regs::PCNTR1 => {
                self.ports[port].pdr = (value & 0xFFFF) as u16;
                self.ports[port].val = (value >> 16) as u16;
                trace!("gpio: port {port} pdr={:#06x} val={:#06x}", value & 0xFFFF, value >> 16);
                self.notify(port);
            }
            regs::PCNTR2 => {
                self.ports[port].val = (value & 0xFFFF) as u16;
                self.notify(port);
            }
            _ => {}
        }
    }

    /// Read a PFS word. Pin-function state is not latched.
    pub fn read_pfs(&mut self, _offset: u32, _size: u32) -> u32 {
        0
    }

    /// Write a PFS word. `offset` is relative to the PFS base.
    pub fn write_pfs(&mut self, offset: u32, _size: u32, value: u32) {
        let port = (offset / PFS_PORT_STRIDE) as usize;
        if port >= NUM_PORTS {
            warn!("gpio: pfs write past PORT8 (offset {offset:#x})");
            return;
        }
        let pin = (offset % PFS_PORT_STRIDE) / 4;

        if value & pfs_bits::PDR != 0 {
            debug!("gpio: port {port} pin {pin} set output");
        } else {
            let pull_up = value & pfs_bits::PCR != 0;
            debug!("gpio: port {port} pin {pin} set input, pull-up {pull_up}");
            // An open input with the pull-up on floats high
            if pull_up {
                self.ports[port].val |= 1 << pin;
                self.notify(port);
            }
        }
    }
}

impl Default for GpioPorts {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GpioPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioPorts")
            .field("ports", &self.ports)
            .field("monitored", &self.monitor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_pcntr1_round_trip() {
        let mut gpio = GpioPorts::new();
        // PDR in the lower half, output levels in the upper
        gpio.write(regs::PCNTR1, 4, 0x00A5_00FF);

        let value = gpio.read(regs::PCNTR1, 4);
        assert_eq!(value, 0x00A5_00FF);
        assert_eq!(gpio.read(regs::PCNTR2, 4), 0x00A5);
    }

    #[test]
    fn test_pcntr2_sets_levels_only() {
        let mut gpio = GpioPorts::new();
        gpio.write(regs::PCNTR1, 4, 0x0000_00FF);
        gpio.write(regs::PCNTR2, 4, 0x1234);

        assert_eq!(gpio.read(regs::PCNTR1, 4), 0x1234_00FF);
    }

    #[test]
    fn test_ports_decode_by_stride() {
        let mut gpio = GpioPorts::new();
        gpio.write(2 * PORT_STRIDE + regs::PCNTR2, 4, 0x0001);
        gpio.write(5 * PORT_STRIDE + regs::PCNTR2, 4, 0x0020);

        assert_eq!(gpio.read(2 * PORT_STRIDE + regs::PCNTR2, 4), 0x0001);
        assert_eq!(gpio.read(5 * PORT_STRIDE + regs::PCNTR2, 4), 0x0020);
        assert_eq!(gpio.read(regs::PCNTR2, 4), 0);
    }

    #[test]
    fn test_out_of_range_port_is_noop() {
        let mut gpio = GpioPorts::new();
        let past_end = NUM_PORTS as u32 * PORT_STRIDE;

        gpio.write(past_end + regs::PCNTR2, 4, 0xFFFF);
        assert_eq!(gpio.read(past_end + regs::PCNTR2, 4), 0);
        // Port 8 itself is still reachable
        gpio.write(8 * PORT_STRIDE + regs::PCNTR2, 4, 0x8000);
        assert_eq!(gpio.read(8 * PORT_STRIDE + regs::PCNTR2, 4), 0x8000);
    }

    #[test]
    fn test_pcntr3_pcntr4_inert() {
        let mut gpio = GpioPorts::new();
        gpio.write(regs::PCNTR3, 4, 0xFFFF_FFFF);
        gpio.write(regs::PCNTR4, 4, 0xFFFF_FFFF);

        assert_eq!(gpio.read(regs::PCNTR3, 4), 0);
        assert_eq!(gpio.read(regs::PCNTR4, 4), 0);
        assert_eq!(gpio.read(regs::PCNTR1, 4), 0);
    }

    #[test]
    fn test_pfs_input_pullup_reads_high() {
        let mut gpio = GpioPorts::new();
        // Port 1, pin 4: input with pull-up
        gpio.write_pfs(PFS_PORT_STRIDE + 4 * 4, 4, pfs_bits::PCR);

        assert_eq!(gpio.read(PORT_STRIDE + regs::PCNTR2, 4), 1 << 4);
    }

    #[test]
    fn test_pfs_output_or_no_pullup_leaves_levels() {
        let mut gpio = GpioPorts::new();
        gpio.write_pfs(0, 4, pfs_bits::PDR | pfs_bits::PCR);
        gpio.write_pfs(4, 4, 0);

        assert_eq!(gpio.read(regs::PCNTR2, 4), 0);
    }

    #[test]
    fn test_pfs_out_of_range_port_is_noop() {
        let mut gpio = GpioPorts::new();
        gpio.write_pfs(NUM_PORTS as u32 * PFS_PORT_STRIDE, 4, pfs_bits::PCR);

        for port in 0..NUM_PORTS as u32 {
            assert_eq!(gpio.read(port * PORT_STRIDE + regs::PCNTR2, 4), 0);
        }
    }

    struct RecordingMonitor {
        seen: Arc<Mutex<Vec<(usize, u16, u16)>>>,
        held: Option<(usize, u16)>,
        launched: Arc<Mutex<bool>>,
    }

    impl PinMonitor for RecordingMonitor {
        fn launched(&mut self) {
            *self.launched.lock().unwrap() = true;
        }

        fn update(&mut self, port: usize, pdr: u16, levels: u16) {
            self.seen.lock().unwrap().push((port, pdr, levels));
        }

        fn levels(&self, port: usize) -> Option<u16> {
            match self.held {
                Some((p, levels)) if p == port => Some(levels),
                _ => None,
            }
        }
    }

    #[test]
    fn test_monitor_sees_level_changes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let launched = Arc::new(Mutex::new(false));
        let mut gpio = GpioPorts::new();
        gpio.set_monitor(Box::new(RecordingMonitor {
            seen: seen.clone(),
            held: None,
            launched: launched.clone(),
        }));

        assert!(*launched.lock().unwrap());
        gpio.write(regs::PCNTR1, 4, 0x0001_0002);
        gpio.write(PORT_STRIDE + regs::PCNTR2, 4, 0x0004);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(0, 0x0002, 0x0001), (1, 0, 0x0004)]);
    }

    #[test]
    fn test_monitor_override_wins_on_read() {
        let mut gpio = GpioPorts::new();
        gpio.set_monitor(Box::new(RecordingMonitor {
            seen: Arc::new(Mutex::new(Vec::new())),
            held: Some((0, 0x8001)),
            launched: Arc::new(Mutex::new(false)),
        }));

        gpio.write(regs::PCNTR2, 4, 0x0002);
        assert_eq!(gpio.read(regs::PCNTR2, 4), 0x8001);
        // Other ports stay latched
        gpio.write(PORT_STRIDE + regs::PCNTR2, 4, 0x0002);
        assert_eq!(gpio.read(PORT_STRIDE + regs::PCNTR2, 4), 0x0002);
    }
}
