//! Ring-buffered live stream with a single ingestion thread.
//!
//! A [`TsStreamer`] owns the ring buffer for one source address. One
//! dedicated thread receives datagrams, strips the fixed framing header and
//! appends the payload at the live edge. Any number of consumers read at
//! absolute offsets with [`TsStreamer::read_at`], blocking until the bytes
//! they asked for have been ingested.
//!
//! ```text
//!   socket ──► ingest thread ──► RingBuffer (Mutex) ──► read_at(pos) ◄── consumers
//!                                    │    ▲
//!                                    └────┘ Condvar::notify_all on every write
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::address::SourceAddress;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::ingest::{Connector, PacketSource};
use crate::ring::RingBuffer;

/// Point-in-time counters for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStats {
    /// Total payload bytes ingested since the last start.
    pub bytes_fetched: u64,
    /// Datagrams received, including discarded ones.
    pub datagrams_received: u64,
    /// Datagrams too short to carry payload.
    pub datagrams_discarded: u64,
    /// Whether the ingestion loop is running.
    pub active: bool,
}

struct StreamState {
    ring: RingBuffer,
    active: bool,
    datagrams_received: u64,
    datagrams_discarded: u64,
}

/// State shared between the streamer, its ingestion thread and cancel tokens.
struct Shared {
    state: Mutex<StreamState>,
    data_ready: Condvar,
}

impl Shared {
    fn wake_all(&self) {
        self.data_ready.notify_all();
    }
}

/// Cancels blocked reads of one consumer without affecting the stream.
///
/// Cancellation is sticky: every later read through the same handle fails
/// with [`StreamError::Cancelled`].
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Take the lock so a reader between its flag check and its wait
        // cannot miss the wake-up.
        let _state = self.shared.state.lock();
        self.shared.wake_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A live stream for one source address.
pub struct TsStreamer {
    address: SourceAddress,
    config: StreamConfig,
    shared: Arc<Shared>,
    /// Handle to the ingestion thread (if running).
    ingest_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TsStreamer {
    /// Create an inactive streamer; allocates the ring buffer.
    pub fn new(address: SourceAddress, config: StreamConfig) -> Self {
        let ring = RingBuffer::with_capacity(config.buffer_capacity);
        Self {
            address,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(StreamState {
                    ring,
                    active: false,
                    datagrams_received: 0,
                    datagrams_discarded: 0,
                }),
                data_ready: Condvar::new(),
            }),
            ingest_handle: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &SourceAddress {
        &self.address
    }

    pub fn capacity(&self) -> usize {
        self.config.buffer_capacity
    }

    /// Open the packet source and spawn the ingestion thread.
    ///
    /// Counters are reset to zero. Fails if the source cannot be opened, in
    /// which case the stream stays inactive.
    pub fn start(&self, connector: &dyn Connector) -> Result<(), StreamError> {
        let mut handle_slot = self.ingest_handle.lock();

        if self.shared.state.lock().active {
            warn!(
                "[TsStreamer] Streaming should be stopped before start for {}",
                self.address
            );
            return Ok(());
        }

        // A previous loop that exited on its own still needs joining.
        if let Some(stale) = handle_slot.take() {
            let _ = stale.join();
        }

        let source = connector
            .connect(&self.address, &self.config)
            .map_err(|e| {
                error!("[TsStreamer] Failed to open source {}: {}", self.address, e);
                StreamError::SocketOpen {
                    address: self.address,
                    source: e,
                }
            })?;

        {
            let mut state = self.shared.state.lock();
            state.ring.reset();
            state.datagrams_received = 0;
            state.datagrams_discarded = 0;
            state.active = true;
        }

        let shared = Arc::clone(&self.shared);
        let address = self.address;
        let header_size = self.config.header_size;
        let max_packet_size = self.config.max_packet_size;

        let spawned = thread::Builder::new()
            .name(format!("ingest-{}", address))
            .spawn(move || run_ingest(shared, address, header_size, max_packet_size, source));

        match spawned {
            Ok(handle) => {
                *handle_slot = Some(handle);
                info!("[TsStreamer] Streaming started for {}", self.address);
                Ok(())
            }
            Err(e) => {
                error!(
                    "[TsStreamer] Failed to spawn ingestion thread for {}: {}",
                    self.address, e
                );
                self.shared.state.lock().active = false;
                Err(StreamError::Io(e))
            }
        }
    }

    /// Stop ingestion and wait for the ingestion thread to exit.
    ///
    /// Blocked readers are woken and observe [`StreamError::Unavailable`].
    /// Once this returns the socket has been closed. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.active = false;
            self.shared.wake_all();
        }

        let handle = self.ingest_handle.lock().take();
        if let Some(handle) = handle {
            info!("[TsStreamer] Stopping ingestion for {}...", self.address);
            if handle.join().is_err() {
                error!("[TsStreamer] Ingestion thread panicked for {}", self.address);
            }
            info!("[TsStreamer] Streaming stopped for {}", self.address);
        }
    }

    /// Whether the ingestion loop is running.
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// Total bytes ingested so far (the live edge).
    pub fn buffered_position(&self) -> u64 {
        self.shared.state.lock().ring.bytes_fetched()
    }

    pub fn stats(&self) -> StreamStats {
        let state = self.shared.state.lock();
        StreamStats {
            bytes_fetched: state.ring.bytes_fetched(),
            datagrams_received: state.datagrams_received,
            datagrams_discarded: state.datagrams_discarded,
            active: state.active,
        }
    }

    /// Create a cancel token bound to this stream's wake-up condition.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Read `buf.len()` bytes starting at absolute stream offset `pos`.
    ///
    /// Blocks until the bytes have been ingested. Fails immediately with
    /// [`StreamError::Overrun`] if `pos` has already been overwritten and with
    /// [`StreamError::Unavailable`] once the stream is not active.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.read_at_inner(pos, buf, None)
    }

    /// Like [`read_at`](Self::read_at), but also returns
    /// [`StreamError::Cancelled`] once `cancel` fires.
    pub fn read_at_cancellable(
        &self,
        pos: u64,
        buf: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<usize, StreamError> {
        self.read_at_inner(pos, buf, Some(cancel))
    }

    fn read_at_inner(
        &self,
        pos: u64,
        buf: &mut [u8],
        cancel: Option<&CancelToken>,
    ) -> Result<usize, StreamError> {
        let capacity = self.config.buffer_capacity;
        if buf.len() > capacity {
            return Err(StreamError::ReadTooLarge {
                requested: buf.len(),
                capacity,
            });
        }

        let mut state = self.shared.state.lock();
        loop {
            if !state.active {
                return Err(StreamError::Unavailable);
            }
            if cancel.map_or(false, CancelToken::is_cancelled) {
                return Err(StreamError::Cancelled);
            }

            let fetched = state.ring.bytes_fetched();
            if state.ring.is_overrun(pos) {
                warn!(
                    "[TsStreamer] Read of overwritten data on {}: pos={}, fetched={}",
                    self.address, pos, fetched
                );
                return Err(StreamError::Overrun {
                    position: pos,
                    fetched,
                    capacity,
                });
            }

            if state.ring.copy_to(pos, buf) {
                return Ok(buf.len());
            }

            // A single write may not carry enough new bytes; re-check on wake.
            self.shared.data_ready.wait(&mut state);
        }
    }
}

impl Drop for TsStreamer {
    fn drop(&mut self) {
        self.stop();
        debug!("[TsStreamer] Dropped for {}", self.address);
    }
}

fn run_ingest(
    shared: Arc<Shared>,
    address: SourceAddress,
    header_size: usize,
    max_packet_size: usize,
    mut source: Box<dyn PacketSource>,
) {
    info!("[TsStreamer] Ingestion thread started for {}", address);

    let mut packet = vec![0u8; max_packet_size];
    let mut total_bytes: u64 = 0;

    loop {
        if !shared.state.lock().active {
            break;
        }

        let received = match source.recv(&mut packet) {
            Ok(Some(n)) => n,
            Ok(None) => continue,
            Err(e) => {
                error!("[TsStreamer] Error reading from {}: {}", address, e);
                shared.state.lock().active = false;
                shared.wake_all();
                break;
            }
        };

        let mut state = shared.state.lock();
        state.datagrams_received += 1;

        if received <= header_size {
            state.datagrams_discarded += 1;
            trace!(
                "[TsStreamer] Discarded {}-byte datagram from {}",
                received,
                address
            );
            continue;
        }

        let payload = &packet[header_size..received];
        state.ring.write(payload);
        total_bytes += payload.len() as u64;
        drop(state);

        shared.wake_all();
    }

    // Close the socket before the thread is observed as finished.
    drop(source);
    info!(
        "[TsStreamer] Ingestion thread stopped for {}, total bytes: {}",
        address, total_bytes
    );
}
