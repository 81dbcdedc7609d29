//! Peripheral models and the per-kind dispatch layer.
//!
//! [`Peripherals`] owns every device instance; the bus resolves an
//! absolute address to a `(kind, offset)` pair and hands it here, where
//! the multi-channel blocks (SCI, AGT, GPIO ports) decode their channel
//! from the offset stride.

pub mod cipher;
pub mod flash;
pub mod gpio;
pub mod serial;
pub mod system;
pub mod timer;

use std::sync::Arc;

use crate::bus::PeripheralKind;
use crate::irq::{lines, InterruptBridge, IrqHandle};
use crate::transport::SerialTransport;
use crate::SocError;

use cipher::AesAccelerator;
use flash::FlashController;
use gpio::{GpioPorts, PinMonitor};
use serial::{LineCallback, SciChannel};
use system::SystemControl;
use timer::{AgtChannel, ClockConfig};

/// Number of AGT timer channels.
pub const NUM_AGT_CHANNELS: usize = 2;

/// Byte stride between SCI channel blocks.
pub const SCI_STRIDE: u32 = 0x20;

/// Byte stride between AGT channel blocks.
pub const AGT_STRIDE: u32 = 0x100;

/// Every peripheral instance behind the bus.
#[derive(Debug)]
pub struct Peripherals {
    agt: Vec<AgtChannel>,
    sci: Vec<SciChannel>,
    flash: FlashController,
    aes: AesAccelerator,
    gpio: GpioPorts,
    system: SystemControl,
}

impl Peripherals {
    /// Build all peripheral instances wired to `bridge`.
    pub fn new(bridge: Arc<InterruptBridge>, clock: ClockConfig) -> Result<Self, SocError> {
        let agt_lines = [lines::AGT0_UNDERFLOW, lines::AGT1_UNDERFLOW];
        let agt = agt_lines
            .iter()
            .enumerate()
            .map(|(ch, &line)| {
                AgtChannel::new(ch, IrqHandle::wired(bridge.clone(), line), clock)
            })
            .collect();

        let sci = (0..serial::NUM_CHANNELS)
            .map(|ch| {
                let bridge = bridge.clone();
                SciChannel::new(ch, move |line| IrqHandle::wired(bridge.clone(), line))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            agt,
            sci,
            flash: FlashController::new(),
            aes: AesAccelerator::new(),
            gpio: GpioPorts::new(),
            system: SystemControl::new(),
        })
    }

    /// Dispatch a read to the resolved peripheral.
    pub fn read(&mut self, kind: PeripheralKind, offset: u32, size: u32) -> u32 {
        match kind {
            PeripheralKind::System => self.system.read_system(offset, size),
            PeripheralKind::Can => self.system.read_can(offset, size),
            PeripheralKind::Rtc => self.system.read_rtc(offset, size),
            PeripheralKind::Gpio => self.gpio.read(offset, size),
            PeripheralKind::Pfs => self.gpio.read_pfs(offset, size),
            PeripheralKind::Sci => {
                let channel = (offset / SCI_STRIDE) as usize;
                self.sci[channel].read(offset % SCI_STRIDE, size)
            }
            PeripheralKind::Agt => {
                let channel = (offset / AGT_STRIDE) as usize;
                self.agt[channel].read(offset % AGT_STRIDE, size)
            }
            PeripheralKind::Aes => self.aes.read(offset, size),
            PeripheralKind::FaciLp => self.flash.read(offset, size),
            PeripheralKind::DataFlash => self.flash.read_data(offset, size),
        }
    }

    /// Dispatch a write to the resolved peripheral.
    pub fn write(&mut self, kind: PeripheralKind, offset: u32, size: u32, value: u32) {
        match kind {
            PeripheralKind::System => self.system.write_system(offset, size, value),
            PeripheralKind::Can => self.system.write_can(offset, size, value),
            PeripheralKind::Rtc => self.system.write_rtc(offset, size, value),
            PeripheralKind::Gpio => self.gpio.write(offset, size, value),
            PeripheralKind::Pfs => self.gpio.write_pfs(offset, size, value),
            PeripheralKind::Sci => {
                let channel = (offset / SCI_STRIDE) as usize;
                self.sci[channel].write(offset % SCI_STRIDE, size, value);
            }
            PeripheralKind::Agt => {
                let channel = (offset / AGT_STRIDE) as usize;
                self.agt[channel].write(offset % AGT_STRIDE, size, value);
            }
            PeripheralKind::Aes => self.aes.write(offset, size, value),
            PeripheralKind::FaciLp => self.flash.write(offset, size, value),
            PeripheralKind::DataFlash => self.flash.write_data(offset, value),
        }
    }

    /// Connect a byte-stream transport to an SCI channel.
    pub fn attach_transport(
        &mut self,
        channel: usize,
        transport: Arc<dyn SerialTransport>,
        callback: Option<LineCallback>,
    ) -> Result<(), SocError> {
        let sci = self
            .sci
            .get_mut(channel)
            .ok_or(SocError::InvalidChannel {
                peripheral: "sci",
                channel,
                max: serial::NUM_CHANNELS - 1,
            })?;
        sci.attach(transport, callback);
        Ok(())
    }

    /// Attach a pin-level observer to the GPIO block.
    pub fn set_pin_monitor(&mut self, monitor: Box<dyn PinMonitor>) {
        self.gpio.set_monitor(monitor);
    }

    /// Stop every background thread (receive threads join, timers disarm).
    pub fn shutdown(&mut self) {
        for sci in &mut self.sci {
            sci.shutdown();
        }
        for agt in &mut self.agt {
            agt.stop();
        }
    }
}
