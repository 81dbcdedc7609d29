//! RA2L1 Serial Communications Interface (SCI)
//!
//! Memory-mapped at 0x40070000, one 0x20-stride block per channel,
//! 10 channels (SCI0-SCI9).
//!
//! Two data paths share each channel's register state:
//! - transmit runs synchronously on the dispatcher thread: a TDR write
//!   hands the byte to the transport and pulses txi when transmit
//!   interrupts are enabled; dropping the TIE bit in SCR pulses tei;
//! - receive runs on a dedicated per-channel thread: transport reads are
//!   appended to the channel's ring buffer under the channel lock, line
//!   endings are normalized for the optional line-assembly callback, and
//!   rxi is asserted after each flush.
//!
//! An RDR read pops one buffered byte and clears rxi when the buffer
//! drains; pop and push take the same per-channel mutex. Only SCI0 and
//! SCI9 have interrupt wiring on this part; the other channels are inert
//! stubs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error, trace};

use crate::irq::{lines, IrqHandle};
use crate::transport::SerialTransport;
use crate::SocError;

/// Number of SCI channels on the part.
pub const NUM_CHANNELS: usize = 10;

/// Receive ring-buffer capacity in bytes.
pub const RX_BUF_SIZE: usize = 0x400;

const ASCII_CR: u8 = 0x0D;
const ASCII_LF: u8 = 0x0A;

/// Register offsets within one SCI channel block
mod regs {
    /// Serial mode (latched, no behavior modeled)
    pub const SMR: u32 = 0x00;
    /// Bit rate (latched, no behavior modeled)
    pub const BRR: u32 = 0x01;
    /// Serial control: interrupt enables
    pub const SCR: u32 = 0x02;
    /// Transmit data
    pub const TDR: u32 = 0x03;
    /// Serial status (inert, reads zero)
    pub const SSR: u32 = 0x04;
    /// Receive data
    pub const RDR: u32 = 0x05;
}

/// SCR bit masks
pub mod scr_bits {
    /// Transmit Interrupt Enable
    pub const TIE: u8 = 0x80;
}

/// Per-channel interrupt wiring: (rxi, txi, tei) vector numbers.
/// Channels absent from this table never assert.
fn irq_lines_for(channel: usize) -> Option<(usize, usize, usize)> {
    match channel {
        0 => Some((lines::SCI0_RXI, lines::SCI0_TXI, lines::SCI0_TEI)),
        9 => Some((lines::SCI9_RXI, lines::SCI9_TXI, lines::SCI9_TEI)),
        _ => None,
    }
}

/// Callback invoked with each assembled input line (trailing `\n`).
pub type LineCallback = Box<dyn Fn(usize, &[u8]) + Send + Sync>;

/// Fixed-capacity circular receive buffer.
///
/// `start` advances on pop, the write position is `(start + len) % cap`.
/// When full, a push overwrites the oldest unread byte: receive overrun
/// is lossy by design, never fatal.
#[derive(Debug)]
struct RxBuffer {
    buf: [u8; RX_BUF_SIZE],
    start: usize,
    len: usize,
}

impl RxBuffer {
    fn new() -> Self {
        Self {
            buf: [0; RX_BUF_SIZE],
            start: 0,
            len: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, byte: u8) {
        let end = (self.start + self.len) % RX_BUF_SIZE;
        self.buf[end] = byte;
        if self.len == RX_BUF_SIZE {
            // Overrun: drop the oldest unread byte
            self.start = (self.start + 1) % RX_BUF_SIZE;
        } else {
            self.len += 1;
        }
    }

    fn push_slice(&mut self, data: &[u8]) {
        for &b in data {
            self.push(b);
        }
    }

    fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.buf[self.start];
        self.start = (self.start + 1) % RX_BUF_SIZE;
        self.len -= 1;
        Some(byte)
    }
}

/// One SCI channel: register state, ring buffer, and receive thread.
pub struct SciChannel {
    channel: usize,
    smr: u8,
    brr: u8,
    scr: u8,
    rx: Arc<Mutex<RxBuffer>>,
    running: Arc<AtomicBool>,
    irq_rxi: IrqHandle,
    irq_txi: IrqHandle,
    irq_tei: IrqHandle,
    transport: Option<Arc<dyn SerialTransport>>,
    rx_thread: Option<JoinHandle<()>>,
}

impl SciChannel {
    /// Create channel `channel` with its fixed interrupt wiring.
    ///
    /// Fails loudly at init for an out-of-range index; per-access bounds
    /// problems are the dispatcher's concern, not this constructor's.
    pub fn new(
        channel: usize,
        wire: impl Fn(usize) -> IrqHandle,
    ) -> Result<Self, SocError> {
        if channel >= NUM_CHANNELS {
            return Err(SocError::InvalidChannel {
                peripheral: "sci",
                channel,
                max: NUM_CHANNELS - 1,
            });
        }
        let (irq_rxi, irq_txi, irq_tei) = match irq_lines_for(channel) {
            Some((rxi, txi, tei)) => (wire(rxi), wire(txi), wire(tei)),
            None => (IrqHandle::inert(), IrqHandle::inert(), IrqHandle::inert()),
        };
        Ok(Self {
            channel,
            smr: 0,
            brr: 0,
            scr: 0,
            rx: Arc::new(Mutex::new(RxBuffer::new())),
            running: Arc::new(AtomicBool::new(false)),
            irq_rxi,
            irq_txi,
            irq_tei,
            transport: None,
            rx_thread: None,
        })
    }

    /// Channel index.
    pub fn channel(&self) -> usize {
        self.channel
    }

    /// Connect a byte-stream transport and start the receive thread.
    ///
    /// Spawn failure is logged and leaves the channel transmit-only; the
    /// rest of the system keeps running.
    pub fn attach(&mut self, transport: Arc<dyn SerialTransport>, callback: Option<LineCallback>) {
        self.transport = Some(transport.clone());
        self.running.store(true, Ordering::Release);

        let channel = self.channel;
        let rx = self.rx.clone();
        let running = self.running.clone();
        let irq_rxi = self.irq_rxi.clone();
        let spawned = thread::Builder::new()
            .name(format!("sci{channel}-rx"))
            .spawn(move || receive_main(channel, transport, rx, running, irq_rxi, callback));
        match spawned {
            Ok(handle) => self.rx_thread = Some(handle),
            Err(err) => {
                error!("sci{}: receive thread spawn failed: {err}", self.channel);
                self.running.store(false, Ordering::Release);
            }
        }
    }

    /// Stop the receive thread and close the transport.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(transport) = &self.transport {
            transport.close();
        }
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
    }

    /// Read a register (offset within the channel block).
    pub fn read(&mut self, offset: u32, _size: u32) -> u32 {
        match offset {
            regs::RDR => {
                let mut rx = self.rx.lock().unwrap();
                let value = rx.pop().unwrap_or(0);
                // Pop and flag-clear stay atomic against the receive
                // thread; both sides hold the channel lock.
                if rx.is_empty() {
                    self.irq_rxi.clear();
                }
                value as u32
            }
            regs::SCR => self.scr as u32,
            regs::SMR => self.smr as u32,
            regs::BRR => self.brr as u32,
            regs::SSR => 0,
            _ => 0,
        }
    }

    /// Write a register (offset within the channel block).
    pub fn write(&mut self, offset: u32, _size: u32, value: u32) {
        let byte = (value & 0xFF) as u8;
        match offset {
            regs::TDR => self.transmit(byte),
            regs::SCR => {
                // TIE falling edge signals transmit-complete
                if self.scr & scr_bits::TIE != 0 && byte & scr_bits::TIE == 0 {
                    self.irq_tei.pulse();
                }
                self.scr = byte;
            }
            regs::SMR => self.smr = byte,
            regs::BRR => self.brr = byte,
            _ => {}
        }
    }

    /// Transmit path: synchronous on the dispatcher thread.
    fn transmit(&mut self, data: u8) {
        // Host terminals expect carriage returns
        let data = if data == ASCII_LF { ASCII_CR } else { data };
        if let Some(transport) = &self.transport {
            if let Err(err) = transport.send(&[data]) {
                debug!("sci{}: transmit dropped: {err}", self.channel);
            }
        } else {
            trace!("sci{}: transmit with no transport: {data:#04x}", self.channel);
        }
        if self.scr & scr_bits::TIE != 0 {
            self.irq_txi.pulse();
        }
    }

    /// Test/host hook: bytes currently buffered for RDR.
    pub fn rx_pending(&self) -> usize {
        self.rx.lock().unwrap().len
    }
}

impl Drop for SciChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SciChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SciChannel")
            .field("channel", &self.channel)
            .field("scr", &self.scr)
            .field("attached", &self.transport.is_some())
            .finish()
    }
}

/// Receive-thread body: transport -> ring buffer -> rxi.
fn receive_main(
    channel: usize,
    transport: Arc<dyn SerialTransport>,
    rx: Arc<Mutex<RxBuffer>>,
    running: Arc<AtomicBool>,
    irq_rxi: IrqHandle,
    callback: Option<LineCallback>,
) {
    let mut chunk = [0u8; RX_BUF_SIZE];
    // Line assembly state is per channel, never shared across threads
    let mut line: Vec<u8> = Vec::with_capacity(RX_BUF_SIZE);

    while running.load(Ordering::Acquire) {
        let n = match transport.recv(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                error!("sci{channel}: transport read error: {err}");
                break;
            }
        };

        {
            let mut buf = rx.lock().unwrap();
            buf.push_slice(&chunk[..n]);
        }

        if let Some(cb) = &callback {
            for &b in &chunk[..n] {
                if b == ASCII_CR || b == ASCII_LF {
                    // CR, LF, and CRLF all collapse to a single newline
                    if !line.is_empty() {
                        line.push(b'\n');
                        cb(channel, &line);
                        line.clear();
                    }
                } else {
                    line.push(b);
                }
            }
        }

        irq_rxi.assert();
    }
    debug!("sci{channel}: receive thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::InterruptBridge;
    use crate::transport::host_pair;
    use std::time::{Duration, Instant};

    fn wired_channel(channel: usize) -> (SciChannel, Arc<InterruptBridge>) {
        let bridge = Arc::new(InterruptBridge::new());
        let b = bridge.clone();
        let sci = SciChannel::new(channel, move |line| IrqHandle::wired(b.clone(), line)).unwrap();
        (sci, bridge)
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_invalid_channel_rejected_at_init() {
        let err = SciChannel::new(NUM_CHANNELS, |_| IrqHandle::inert());
        assert!(err.is_err());
    }

    #[test]
    fn test_unwired_channel_is_inert() {
        let (mut sci, bridge) = wired_channel(3);
        sci.write(regs::SCR, 1, scr_bits::TIE as u32);
        sci.write(regs::TDR, 1, b'x' as u32);
        assert!(!bridge.any_pending());
    }

    #[test]
    fn test_transmit_reaches_transport() {
        let (mut sci, _bridge) = wired_channel(0);
        let (transport, host) = host_pair();
        sci.attach(transport, None);

        sci.write(regs::TDR, 1, b'h' as u32);
        sci.write(regs::TDR, 1, b'i' as u32);

        let mut out = Vec::new();
        assert!(wait_until(Duration::from_secs(1), || {
            out.extend_from_slice(&host.drain());
            out == b"hi"
        }));
        sci.shutdown();
    }

    #[test]
    fn test_transmit_pulses_txi_per_byte_under_tie() {
        let (mut sci, bridge) = wired_channel(0);

        sci.write(regs::SCR, 1, scr_bits::TIE as u32);
        for b in b"abc" {
            sci.write(regs::TDR, 1, *b as u32);
        }
        assert_eq!(bridge.take_pulses(lines::SCI0_TXI), 3);

        // TIE clear: transmits no longer pulse (tei fires once instead)
        sci.write(regs::SCR, 1, 0);
        sci.write(regs::TDR, 1, b'd' as u32);
        assert_eq!(bridge.take_pulses(lines::SCI0_TXI), 0);
    }

    #[test]
    fn test_tie_falling_edge_pulses_tei_exactly_once() {
        let (mut sci, bridge) = wired_channel(0);

        sci.write(regs::SCR, 1, scr_bits::TIE as u32);
        assert_eq!(bridge.pulses(lines::SCI0_TEI), 0);

        sci.write(regs::SCR, 1, 0);
        assert_eq!(bridge.take_pulses(lines::SCI0_TEI), 1);

        // Writing zero again is not a falling edge
        sci.write(regs::SCR, 1, 0);
        assert_eq!(bridge.pulses(lines::SCI0_TEI), 0);
    }

    #[test]
    fn test_lf_converted_to_cr_on_transmit() {
        let (mut sci, _bridge) = wired_channel(0);
        let (transport, host) = host_pair();
        sci.attach(transport, None);

        sci.write(regs::TDR, 1, ASCII_LF as u32);
        let chunk = host.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(chunk, [ASCII_CR]);
        sci.shutdown();
    }

    #[test]
    fn test_receive_round_trip_in_order() {
        let (mut sci, bridge) = wired_channel(0);
        let (transport, host) = host_pair();
        sci.attach(transport, None);

        host.send(b"hello");
        assert!(wait_until(Duration::from_secs(2), || sci.rx_pending() == 5));
        assert!(bridge.level(lines::SCI0_RXI));

        let mut got = Vec::new();
        for _ in 0..5 {
            got.push(sci.read(regs::RDR, 1) as u8);
        }
        assert_eq!(got, b"hello");

        // Draining the buffer clears the receive-ready line
        assert!(!bridge.level(lines::SCI0_RXI));
        sci.shutdown();
    }

    #[test]
    fn test_rdr_empty_reads_zero() {
        let (mut sci, bridge) = wired_channel(0);
        assert_eq!(sci.read(regs::RDR, 1), 0);
        assert!(!bridge.level(lines::SCI0_RXI));
    }

    #[test]
    fn test_rxi_stays_asserted_while_data_remains() {
        let (mut sci, bridge) = wired_channel(0);
        let (transport, host) = host_pair();
        sci.attach(transport, None);

        host.send(b"ab");
        assert!(wait_until(Duration::from_secs(2), || sci.rx_pending() == 2));

        let _ = sci.read(regs::RDR, 1);
        assert!(bridge.level(lines::SCI0_RXI));
        let _ = sci.read(regs::RDR, 1);
        assert!(!bridge.level(lines::SCI0_RXI));
        sci.shutdown();
    }

    #[test]
    fn test_overrun_drops_oldest_bytes() {
        let mut buf = RxBuffer::new();
        for i in 0..(RX_BUF_SIZE + 4) {
            buf.push((i & 0xFF) as u8);
        }
        assert_eq!(buf.len, RX_BUF_SIZE);
        // First four bytes were overwritten
        assert_eq!(buf.pop(), Some(4));
        assert_eq!(buf.pop(), Some(5));
    }

    #[test]
    fn test_ring_buffer_wraps_in_order() {
        let mut buf = RxBuffer::new();
        // Advance start partway, then wrap the write position past the end
        for i in 0..100u8 {
            buf.push(i);
        }
        for i in 0..100u8 {
            assert_eq!(buf.pop(), Some(i));
        }
        let data: Vec<u8> = (0..RX_BUF_SIZE).map(|i| (i % 251) as u8).collect();
        buf.push_slice(&data);
        for (i, &b) in data.iter().enumerate() {
            assert_eq!(buf.pop(), Some(b), "mismatch at {i}");
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_callback_normalizes_endings() {
        let (mut sci, _bridge) = wired_channel(9);
        let (transport, host) = host_pair();
        let seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        sci.attach(
            transport,
            Some(Box::new(move |_ch, line| {
                sink.lock().unwrap().push(line.to_vec());
            })),
        );

        host.send(b"one\r\ntwo\nthree\r");
        assert!(wait_until(Duration::from_secs(2), || {
            seen.lock().unwrap().len() == 3
        }));

        let lines = seen.lock().unwrap();
        assert_eq!(lines[0], b"one\n");
        assert_eq!(lines[1], b"two\n");
        assert_eq!(lines[2], b"three\n");
        drop(lines);
        sci.shutdown();
    }

    #[test]
    fn test_shutdown_stops_receive_thread() {
        let (mut sci, _bridge) = wired_channel(0);
        let (transport, host) = host_pair();
        sci.attach(transport, None);

        sci.shutdown();
        // Bytes sent after shutdown are never buffered
        host.send(b"late");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sci.rx_pending(), 0);
    }

    #[test]
    fn test_concurrent_push_and_pop_keep_order() {
        let (mut sci, _bridge) = wired_channel(0);
        let (transport, host) = host_pair();
        sci.attach(transport, None);

        let total = 512usize;
        let feeder = thread::spawn(move || {
            for i in 0..total {
                host.send(&[(i % 251) as u8]);
            }
            host
        });

        let mut got = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while got.len() < total && Instant::now() < deadline {
            if sci.rx_pending() > 0 {
                got.push(sci.read(regs::RDR, 1) as u8);
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
        let _host = feeder.join().unwrap();

        assert_eq!(got.len(), total);
        for (i, &b) in got.iter().enumerate() {
            assert_eq!(b, (i % 251) as u8, "mismatch at {i}");
        }
        sci.shutdown();
    }
}
