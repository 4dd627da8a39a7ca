//! Copies a data source to a byte sink on a background thread.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::error::StreamError;
use crate::source::DataSource;
use crate::streamer::CancelToken;
use crate::uri::DataSpec;

/// TS packet size.
pub const TS_PACKET_SIZE: usize = 188;

/// Bytes requested per read: 7 TS packets, the usual payload of one datagram.
pub const RECORD_CHUNK_SIZE: usize = TS_PACKET_SIZE * 7;

/// Why a recording ended.
#[derive(Debug)]
pub enum RecordingOutcome {
    /// Stopped by [`StreamRecorder::stop_recording`].
    Stopped,
    /// A recorded file was read to its end.
    EndOfStream,
    /// The source failed (overrun, stream lost, ...).
    SourceFailed(StreamError),
    /// Writing to the sink failed.
    SinkFailed(std::io::Error),
}

/// Result of one recording run.
#[derive(Debug)]
pub struct RecordingSummary {
    pub bytes_written: u64,
    pub outcome: RecordingOutcome,
}

type Sink = Box<dyn Write + Send>;

struct Worker {
    handle: JoinHandle<RecordingSummary>,
    cancel: Option<CancelToken>,
}

/// Records one data source into one sink.
///
/// Recording starts at the live edge: bytes the source buffered before
/// [`start_recording`](Self::start_recording) are skipped.
pub struct StreamRecorder {
    parts: Option<(Box<dyn DataSource>, Sink)>,
    recording: Arc<AtomicBool>,
    worker: Option<Worker>,
}

impl StreamRecorder {
    pub fn new(source: Box<dyn DataSource>, sink: Sink) -> Self {
        Self {
            parts: Some((source, sink)),
            recording: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Whether the recording thread is still copying.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Open the source for `spec` and start copying on a new thread.
    ///
    /// A recorder runs once; starting it again fails with
    /// [`StreamError::Closed`].
    pub fn start_recording(&mut self, spec: &DataSpec) -> Result<(), StreamError> {
        let (mut source, sink) = self.parts.take().ok_or(StreamError::Closed)?;

        if let Err(e) = source.open(spec) {
            error!("[StreamRecorder] Failed to open {}: {}", spec.uri, e);
            self.parts = Some((source, sink));
            return Err(e);
        }

        // Discard the pre-roll the source has already buffered.
        let buffered = source.buffered_position();
        source.shift_start_position(i64::try_from(buffered).unwrap_or(i64::MAX));

        let cancel = source.cancel_token();
        self.recording.store(true, Ordering::SeqCst);
        let recording = Arc::clone(&self.recording);

        let spawned = thread::Builder::new()
            .name("recorder".to_string())
            .spawn(move || run_recording(source, sink, recording));

        match spawned {
            Ok(handle) => {
                info!(
                    "[StreamRecorder] Recording started for {} (skipped {} bytes)",
                    spec.uri, buffered
                );
                self.worker = Some(Worker { handle, cancel });
                Ok(())
            }
            Err(e) => {
                self.recording.store(false, Ordering::SeqCst);
                error!("[StreamRecorder] Failed to spawn recording thread: {}", e);
                Err(StreamError::Io(e))
            }
        }
    }

    /// Stop recording and wait for the thread to finish.
    ///
    /// Returns `None` if recording was never started.
    pub fn stop_recording(&mut self) -> Option<RecordingSummary> {
        let worker = self.worker.take()?;
        self.recording.store(false, Ordering::SeqCst);
        if let Some(cancel) = &worker.cancel {
            cancel.cancel();
        }

        match worker.handle.join() {
            Ok(summary) => {
                info!(
                    "[StreamRecorder] Recording finished: {} bytes, {:?}",
                    summary.bytes_written, summary.outcome
                );
                Some(summary)
            }
            Err(_) => {
                error!("[StreamRecorder] Recording thread panicked");
                None
            }
        }
    }
}

impl Drop for StreamRecorder {
    fn drop(&mut self) {
        self.stop_recording();
    }
}

fn run_recording(
    mut source: Box<dyn DataSource>,
    mut sink: Sink,
    recording: Arc<AtomicBool>,
) -> RecordingSummary {
    let mut buf = vec![0u8; RECORD_CHUNK_SIZE];
    let mut bytes_written: u64 = 0;

    let mut outcome = loop {
        if !recording.load(Ordering::SeqCst) {
            break RecordingOutcome::Stopped;
        }

        let n = match source.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(StreamError::Cancelled) => break RecordingOutcome::Stopped,
            Err(StreamError::EndOfStream) => break RecordingOutcome::EndOfStream,
            Err(e) => {
                warn!("[StreamRecorder] Read failed, stopping recording: {}", e);
                break RecordingOutcome::SourceFailed(e);
            }
        };

        if let Err(e) = sink.write_all(&buf[..n]) {
            error!("[StreamRecorder] Write failed, stopping recording: {}", e);
            break RecordingOutcome::SinkFailed(e);
        }
        bytes_written += n as u64;
    };

    if let Err(e) = sink.flush() {
        warn!("[StreamRecorder] Failed to flush sink: {}", e);
        if matches!(outcome, RecordingOutcome::Stopped | RecordingOutcome::EndOfStream) {
            outcome = RecordingOutcome::SinkFailed(e);
        }
    }
    source.close();
    recording.store(false, Ordering::SeqCst);
    debug!("[StreamRecorder] Recording thread exiting");

    RecordingSummary {
        bytes_written,
        outcome,
    }
}
