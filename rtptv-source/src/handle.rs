//! Per-consumer read cursor over a shared stream.

use std::sync::Arc;

use crate::address::SourceAddress;
use crate::error::StreamError;
use crate::streamer::{CancelToken, TsStreamer};

/// One consumer's view of a [`TsStreamer`].
///
/// A handle starts at the live edge captured when it was acquired. Reads
/// advance its own cursor only; other handles on the same stream are not
/// affected. Obtain handles from
/// [`StreamRegistry::acquire`](crate::registry::StreamRegistry::acquire) and
/// give them back with
/// [`StreamRegistry::release`](crate::registry::StreamRegistry::release).
pub struct ConsumerHandle {
    streamer: Arc<TsStreamer>,
    /// Absolute stream offset this consumer counts from.
    start_offset: u64,
    /// Bytes read so far, relative to `start_offset`.
    last_read_position: u64,
    cancel: CancelToken,
}

impl ConsumerHandle {
    pub(crate) fn new(streamer: Arc<TsStreamer>) -> Self {
        let start_offset = streamer.buffered_position();
        let cancel = streamer.cancel_token();
        Self {
            streamer,
            start_offset,
            last_read_position: 0,
            cancel,
        }
    }

    /// Read `buf.len()` bytes at this consumer's cursor, blocking until they
    /// are available.
    ///
    /// Errors from the stream (overrun, unavailable, cancelled) are returned
    /// unchanged and leave the cursor where it was.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let pos = self.start_offset + self.last_read_position;
        let n = self.streamer.read_at_cancellable(pos, buf, &self.cancel)?;
        self.last_read_position += n as u64;
        Ok(n)
    }

    /// Move the baseline by `delta` bytes without touching read progress.
    pub fn shift_start_position(&mut self, delta: i64) {
        self.start_offset = self.start_offset.saturating_add_signed(delta);
    }

    /// Bytes ingested since this consumer's baseline.
    pub fn buffered_position(&self) -> u64 {
        self.streamer
            .buffered_position()
            .saturating_sub(self.start_offset)
    }

    /// Bytes read so far, relative to the baseline.
    pub fn last_read_position(&self) -> u64 {
        self.last_read_position
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn address(&self) -> &SourceAddress {
        self.streamer.address()
    }

    /// Token that aborts this handle's blocked and future reads.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn streamer(&self) -> &Arc<TsStreamer> {
        &self.streamer
    }
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("address", self.streamer.address())
            .field("start_offset", &self.start_offset)
            .field("last_read_position", &self.last_read_position)
            .finish()
    }
}
