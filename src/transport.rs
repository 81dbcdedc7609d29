//! Byte-stream transport boundary for the SCI serial channels.
//!
//! Deployments typically bridge each channel to a host character device;
//! the boundary here is the [`SerialTransport`] trait so an embedder can
//! plug in a pty, socket, or an in-memory pair.
//! [`host_pair`] provides the in-memory implementation used by tests and
//! by hosts that just want to exchange bytes with the firmware.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How often a blocked receive re-checks the closed flag.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One serial channel's byte-stream endpoint.
///
/// `send` runs on the dispatcher thread and must not block; `recv` runs on
/// the channel's receive thread and blocks until data arrives or the
/// transport is closed. Implementations handle their own interior
/// synchronization (both sides hold a shared reference).
pub trait SerialTransport: Send + Sync {
    /// Hand outbound bytes (firmware transmit data) to the outside world.
    fn send(&self, data: &[u8]) -> io::Result<()>;

    /// Blocking read of the next inbound chunk.
    ///
    /// Returns `Ok(0)` exactly when the transport has been closed; the
    /// receive thread treats that as end-of-stream and exits.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the stream, unblocking any pending `recv`.
    fn close(&self);
}

/// Host-side endpoint of an in-memory transport pair.
pub struct HostEndpoint {
    to_device: Sender<Vec<u8>>,
    from_device: Receiver<Vec<u8>>,
}

impl HostEndpoint {
    /// Push bytes toward the firmware's receive path.
    pub fn send(&self, data: &[u8]) {
        // A closed device side just drops the bytes, like writing to a
        // disconnected terminal.
        let _ = self.to_device.send(data.to_vec());
    }

    /// Wait up to `timeout` for the next chunk the firmware transmitted.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.from_device.recv_timeout(timeout).ok()
    }

    /// Collect everything the firmware has transmitted so far.
    pub fn drain(&self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(chunk) = self.from_device.try_recv() {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Device-side endpoint of an in-memory transport pair.
pub struct PairTransport {
    inbound: Mutex<Inbound>,
    outbound: Sender<Vec<u8>>,
    closed: AtomicBool,
}

struct Inbound {
    rx: Receiver<Vec<u8>>,
    /// Bytes from a chunk larger than the caller's buffer.
    pending: VecDeque<u8>,
}

impl SerialTransport for PairTransport {
    fn send(&self, data: &[u8]) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"));
        }
        self.outbound
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "host endpoint dropped"))
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut inbound = self.inbound.lock().unwrap();
        loop {
            if !inbound.pending.is_empty() {
                let n = buf.len().min(inbound.pending.len());
                for slot in buf[..n].iter_mut() {
                    // Length checked above, pop cannot fail.
                    *slot = inbound.pending.pop_front().unwrap_or(0);
                }
                return Ok(n);
            }
            if self.closed.load(Ordering::Acquire) {
                return Ok(0);
            }
            match inbound.rx.recv_timeout(RECV_POLL_INTERVAL) {
                Ok(chunk) => inbound.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Build an in-memory transport pair: the device side goes to
/// `SciChannel::attach`, the host side stays with the embedder.
pub fn host_pair() -> (Arc<PairTransport>, HostEndpoint) {
    let (host_tx, device_rx) = mpsc::channel();
    let (device_tx, host_rx) = mpsc::channel();

    let transport = Arc::new(PairTransport {
        inbound: Mutex::new(Inbound {
            rx: device_rx,
            pending: VecDeque::new(),
        }),
        outbound: device_tx,
        closed: AtomicBool::new(false),
    });
    let host = HostEndpoint {
        to_device: host_tx,
        from_device: host_rx,
    };
    (transport, host)
}
