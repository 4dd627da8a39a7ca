//! Pull-style data sources over recorded files and live streams.
//!
//! [`TsDataSource`] picks its backend from the URI scheme at `open` time:
//! `file://` reads a recording, `udp://` and `rtp://` read a live stream
//! through the shared [`StreamRegistry`]. Each backend carries its own close
//! behaviour; only the stream backend holds a registry session.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use log::{debug, info};

use crate::error::StreamError;
use crate::handle::ConsumerHandle;
use crate::registry::StreamRegistry;
use crate::session::{SessionId, SessionIdAllocator};
use crate::streamer::CancelToken;
use crate::uri::{DataSpec, StreamUri};

/// Uniform read interface for playback and recording consumers.
pub trait DataSource: Send {
    /// Start supplying bytes for `spec`.
    ///
    /// Returns the number of readable bytes, or `None` when the length is
    /// not known in advance (live streams).
    fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>, StreamError>;

    /// Read up to `buf.len()` bytes.
    ///
    /// `Ok(0)` is only returned for an empty `buf`. The end of a recording is
    /// reported as [`StreamError::EndOfStream`].
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Release the underlying resources. Idempotent.
    fn close(&mut self);

    /// The URI being read, `None` before a successful open.
    fn uri(&self) -> Option<&StreamUri>;

    /// Bytes available since this consumer's baseline.
    fn buffered_position(&self) -> u64;

    /// Bytes read since this consumer's baseline.
    fn last_read_position(&self) -> u64;

    /// Move the consumer's baseline by `delta` bytes.
    fn shift_start_position(&mut self, delta: i64);

    /// Token that aborts a blocked read, for sources that can block.
    fn cancel_token(&self) -> Option<CancelToken> {
        None
    }
}

enum FileState {
    Unopened,
    Open { uri: StreamUri, file: File },
    Closed,
}

/// Reads a recorded TS file.
///
/// Live-stream bookkeeping does not apply: both positions report 0 and
/// shifting is a no-op.
pub struct FileDataSource {
    state: FileState,
}

impl FileDataSource {
    pub fn new() -> Self {
        Self {
            state: FileState::Unopened,
        }
    }
}

impl Default for FileDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSource for FileDataSource {
    fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>, StreamError> {
        let path = spec
            .uri
            .file_path()
            .ok_or_else(|| StreamError::UnsupportedScheme(spec.uri.to_string()))?;

        let mut file = File::open(path)?;
        let length = file.metadata()?.len();
        let position = spec.position.min(length);
        file.seek(SeekFrom::Start(position))?;

        debug!(
            "[FileDataSource] Opened {} at {} of {} bytes",
            path.display(),
            position,
            length
        );
        self.state = FileState::Open {
            uri: spec.uri.clone(),
            file,
        };
        Ok(Some(length - position))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        match &mut self.state {
            FileState::Unopened => Err(StreamError::NotOpened),
            FileState::Closed => Err(StreamError::Closed),
            FileState::Open { file, .. } => {
                if buf.is_empty() {
                    return Ok(0);
                }
                match file.read(buf)? {
                    0 => Err(StreamError::EndOfStream),
                    n => Ok(n),
                }
            }
        }
    }

    fn close(&mut self) {
        if let FileState::Open { uri, .. } = &self.state {
            debug!("[FileDataSource] Closed {}", uri);
            self.state = FileState::Closed;
        }
    }

    fn uri(&self) -> Option<&StreamUri> {
        match &self.state {
            FileState::Open { uri, .. } => Some(uri),
            _ => None,
        }
    }

    fn buffered_position(&self) -> u64 {
        0
    }

    fn last_read_position(&self) -> u64 {
        0
    }

    fn shift_start_position(&mut self, _delta: i64) {}
}

enum StreamState {
    Unopened,
    Open {
        uri: StreamUri,
        handle: ConsumerHandle,
    },
    Closed,
}

/// Reads a live stream through a registry session.
///
/// The session is released exactly once, on `close` or on drop.
pub struct StreamDataSource {
    registry: Arc<StreamRegistry>,
    session: SessionId,
    state: StreamState,
}

impl StreamDataSource {
    pub fn new(registry: Arc<StreamRegistry>, session: SessionId) -> Self {
        Self {
            registry,
            session,
            state: StreamState::Unopened,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }
}

impl DataSource for StreamDataSource {
    fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>, StreamError> {
        let address = spec
            .uri
            .source_address()
            .ok_or_else(|| StreamError::UnsupportedScheme(spec.uri.to_string()))?;

        // Reopening gives up the previous session first.
        self.close();

        let handle = self.registry.acquire(&address, self.session)?;
        info!(
            "[StreamDataSource] Session {} opened {} at offset {}",
            self.session,
            spec.uri,
            handle.start_offset()
        );
        self.state = StreamState::Open {
            uri: spec.uri.clone(),
            handle,
        };
        Ok(None)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        match &mut self.state {
            StreamState::Unopened => Err(StreamError::NotOpened),
            StreamState::Closed => Err(StreamError::Closed),
            StreamState::Open { handle, .. } => handle.read(buf),
        }
    }

    fn close(&mut self) {
        match std::mem::replace(&mut self.state, StreamState::Closed) {
            StreamState::Open { uri, handle } => {
                self.registry.release(handle, self.session);
                info!(
                    "[StreamDataSource] Session {} closed {}",
                    self.session, uri
                );
            }
            StreamState::Unopened => self.state = StreamState::Unopened,
            StreamState::Closed => {}
        }
    }

    fn uri(&self) -> Option<&StreamUri> {
        match &self.state {
            StreamState::Open { uri, .. } => Some(uri),
            _ => None,
        }
    }

    fn buffered_position(&self) -> u64 {
        match &self.state {
            StreamState::Open { handle, .. } => handle.buffered_position(),
            _ => 0,
        }
    }

    fn last_read_position(&self) -> u64 {
        match &self.state {
            StreamState::Open { handle, .. } => handle.last_read_position(),
            _ => 0,
        }
    }

    fn shift_start_position(&mut self, delta: i64) {
        if let StreamState::Open { handle, .. } = &mut self.state {
            handle.shift_start_position(delta);
        }
    }

    fn cancel_token(&self) -> Option<CancelToken> {
        match &self.state {
            StreamState::Open { handle, .. } => Some(handle.cancel_token()),
            _ => None,
        }
    }
}

impl Drop for StreamDataSource {
    fn drop(&mut self) {
        self.close();
    }
}

enum Backend {
    Unopened,
    File(FileDataSource),
    Stream(StreamDataSource),
}

/// A data source that selects its backend from the URI scheme.
pub struct TsDataSource {
    registry: Arc<StreamRegistry>,
    session: SessionId,
    backend: Backend,
}

impl TsDataSource {
    pub fn new(registry: Arc<StreamRegistry>, session: SessionId) -> Self {
        Self {
            registry,
            session,
            backend: Backend::Unopened,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Whether the current backend reads a live stream.
    pub fn is_live(&self) -> bool {
        matches!(self.backend, Backend::Stream(_))
    }

    fn current(&self) -> Option<&dyn DataSource> {
        match &self.backend {
            Backend::Unopened => None,
            Backend::File(source) => Some(source),
            Backend::Stream(source) => Some(source),
        }
    }

    fn current_mut(&mut self) -> Option<&mut dyn DataSource> {
        match &mut self.backend {
            Backend::Unopened => None,
            Backend::File(source) => Some(source),
            Backend::Stream(source) => Some(source),
        }
    }
}

impl DataSource for TsDataSource {
    fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>, StreamError> {
        if let Some(previous) = self.current_mut() {
            previous.close();
        }

        let mut backend = match spec.uri {
            StreamUri::File(_) => Backend::File(FileDataSource::new()),
            StreamUri::Udp(_) | StreamUri::Rtp(_) => Backend::Stream(StreamDataSource::new(
                Arc::clone(&self.registry),
                self.session,
            )),
        };

        let result = match &mut backend {
            Backend::File(source) => source.open(spec),
            Backend::Stream(source) => source.open(spec),
            Backend::Unopened => Err(StreamError::NotOpened),
        };
        self.backend = backend;
        result
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.current_mut()
            .ok_or(StreamError::NotOpened)?
            .read(buf)
    }

    fn close(&mut self) {
        if let Some(source) = self.current_mut() {
            source.close();
        }
    }

    fn uri(&self) -> Option<&StreamUri> {
        self.current().and_then(DataSource::uri)
    }

    fn buffered_position(&self) -> u64 {
        self.current().map_or(0, DataSource::buffered_position)
    }

    fn last_read_position(&self) -> u64 {
        self.current().map_or(0, DataSource::last_read_position)
    }

    fn shift_start_position(&mut self, delta: i64) {
        if let Some(source) = self.current_mut() {
            source.shift_start_position(delta);
        }
    }

    fn cancel_token(&self) -> Option<CancelToken> {
        self.current().and_then(DataSource::cancel_token)
    }
}

/// Creates data sources that share one session id and registry.
#[derive(Clone)]
pub struct DataSourceFactory {
    registry: Arc<StreamRegistry>,
    session: SessionId,
}

impl DataSourceFactory {
    /// Create a factory with a fresh session id from `sessions`.
    pub fn new(registry: Arc<StreamRegistry>, sessions: &SessionIdAllocator) -> Self {
        Self::with_session(registry, sessions.next())
    }

    pub fn with_session(registry: Arc<StreamRegistry>, session: SessionId) -> Self {
        Self { registry, session }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn create_data_source(&self) -> TsDataSource {
        TsDataSource::new(Arc::clone(&self.registry), self.session)
    }
}
