//! In-memory packet sources for unit tests.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::address::SourceAddress;
use crate::config::{StreamConfig, RTP_HEADER_SIZE};
use crate::ingest::{Connector, PacketSource};

/// Route `log` output through the test harness (`RUST_LOG=debug` to see it).
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Build a datagram with a zeroed RTP header and `payload_len` bytes of `fill`.
pub fn rtp_packet(fill: u8, payload_len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; RTP_HEADER_SIZE];
    packet[0] = 0x80;
    packet.extend(std::iter::repeat(fill).take(payload_len));
    packet
}

/// A connector whose sources are fed through channels.
///
/// Every `connect` opens a fresh channel for the address. Dropping the
/// sending side with [`disconnect`](Self::disconnect) makes the source fail
/// its next receive, as a socket error would.
#[derive(Default)]
pub struct ChannelConnector {
    senders: Mutex<HashMap<SourceAddress, Sender<Vec<u8>>>>,
    connects: Mutex<HashMap<SourceAddress, usize>>,
    closed: Arc<AtomicUsize>,
    fail_next: AtomicBool,
}

impl ChannelConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&self, address: &SourceAddress, packet: Vec<u8>) {
        if let Some(sender) = self.senders.lock().get(address) {
            let _ = sender.send(packet);
        }
    }

    pub fn disconnect(&self, address: &SourceAddress) {
        self.senders.lock().remove(address);
    }

    pub fn fail_next_connect(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn connect_count(&self, address: &SourceAddress) -> usize {
        self.connects.lock().get(address).copied().unwrap_or(0)
    }

    /// Number of sources dropped so far.
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connector for ChannelConnector {
    fn connect(
        &self,
        address: &SourceAddress,
        config: &StreamConfig,
    ) -> io::Result<Box<dyn PacketSource>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "address already in use",
            ));
        }

        let (tx, rx) = mpsc::channel();
        self.senders.lock().insert(*address, tx);
        *self.connects.lock().entry(*address).or_insert(0) += 1;

        Ok(Box::new(ChannelSource {
            rx,
            timeout: config.recv_timeout,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct ChannelSource {
    rx: Receiver<Vec<u8>>,
    timeout: Duration,
    closed: Arc<AtomicUsize>,
}

impl PacketSource for ChannelSource {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.rx.recv_timeout(self.timeout) {
            Ok(packet) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                Ok(Some(n))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "source disconnected",
            )),
        }
    }
}

impl Drop for ChannelSource {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
