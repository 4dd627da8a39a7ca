//! Registry of live streams shared between sessions.
//!
//! Sessions tuned to the same source address share one [`TsStreamer`] (one
//! socket, one ingestion thread) and each get their own [`ConsumerHandle`].
//! The stream starts with its first session and stops with its last.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::address::SourceAddress;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::handle::ConsumerHandle;
use crate::ingest::{Connector, UdpConnector};
use crate::session::SessionId;
use crate::streamer::{StreamStats, TsStreamer};

struct RegistryEntry {
    streamer: Arc<TsStreamer>,
    sessions: HashSet<SessionId>,
}

/// Snapshot of one registered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub address: SourceAddress,
    pub session_count: usize,
    pub stats: StreamStats,
}

/// Maps source addresses to running streams and reference-counts them by
/// session.
///
/// `acquire` and `release` are serialized by one registry-wide lock that is
/// also held across stream start and stop, so a stream can never be stopped
/// while another session is half-way through acquiring it.
pub struct StreamRegistry {
    streams: Mutex<HashMap<SourceAddress, RegistryEntry>>,
    connector: Arc<dyn Connector>,
    config: StreamConfig,
}

impl StreamRegistry {
    /// Create a registry opening real UDP sockets.
    pub fn new(config: StreamConfig) -> Self {
        Self::with_connector(config, Arc::new(UdpConnector))
    }

    /// Create a registry using a custom packet source connector.
    pub fn with_connector(config: StreamConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            connector,
            config,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Join `session` to the stream for `address`, starting it if needed.
    ///
    /// The returned handle starts at the stream's current live edge. A stream
    /// whose ingestion ended on an error is restarted in place, keeping its
    /// sessions. If the socket cannot be opened no entry is left behind.
    pub fn acquire(
        &self,
        address: &SourceAddress,
        session: SessionId,
    ) -> Result<ConsumerHandle, StreamError> {
        let mut streams = self.streams.lock();

        if let Some(entry) = streams.get_mut(address) {
            if !entry.streamer.is_active() {
                warn!(
                    "[StreamRegistry] Stream for {} is no longer active, restarting",
                    address
                );
                entry.streamer.stop();
                let streamer = Arc::new(TsStreamer::new(*address, self.config.clone()));
                if let Err(e) = streamer.start(self.connector.as_ref()) {
                    streams.remove(address);
                    return Err(e);
                }
                entry.streamer = streamer;
            }

            entry.sessions.insert(session);
            debug!(
                "[StreamRegistry] Session {} joined {} ({} sessions)",
                session,
                address,
                entry.sessions.len()
            );
            return Ok(ConsumerHandle::new(Arc::clone(&entry.streamer)));
        }

        let streamer = Arc::new(TsStreamer::new(*address, self.config.clone()));
        streamer.start(self.connector.as_ref())?;

        let handle = ConsumerHandle::new(Arc::clone(&streamer));
        let mut sessions = HashSet::new();
        sessions.insert(session);
        streams.insert(*address, RegistryEntry { streamer, sessions });
        info!(
            "[StreamRegistry] Created stream for {} (session {})",
            address, session
        );

        Ok(handle)
    }

    /// Remove `session` from the stream `handle` reads from.
    ///
    /// The stream is stopped and forgotten once its last session leaves.
    /// Releasing a session that is not registered is a no-op.
    pub fn release(&self, handle: ConsumerHandle, session: SessionId) {
        let address = *handle.address();
        // Detach before a possible stop so the stream drops with the entry.
        drop(handle);

        let mut streams = self.streams.lock();
        let Some(entry) = streams.get_mut(&address) else {
            debug!(
                "[StreamRegistry] Release of {} for unknown stream {}",
                session, address
            );
            return;
        };

        if !entry.sessions.remove(&session) {
            debug!(
                "[StreamRegistry] Session {} already released from {}",
                session, address
            );
            return;
        }

        debug!(
            "[StreamRegistry] Session {} left {} ({} remaining)",
            session,
            address,
            entry.sessions.len()
        );

        if entry.sessions.is_empty() {
            if let Some(entry) = streams.remove(&address) {
                entry.streamer.stop();
                info!("[StreamRegistry] Removed stream for {}", address);
            }
        }
    }

    /// Number of registered streams.
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Registered source addresses.
    pub fn addresses(&self) -> Vec<SourceAddress> {
        self.streams.lock().keys().copied().collect()
    }

    /// Sessions currently holding the stream for `address`.
    pub fn sessions(&self, address: &SourceAddress) -> Vec<SessionId> {
        let streams = self.streams.lock();
        let mut sessions: Vec<_> = streams
            .get(address)
            .map(|entry| entry.sessions.iter().copied().collect())
            .unwrap_or_default();
        sessions.sort();
        sessions
    }

    /// Statistics for every registered stream.
    pub fn stats(&self) -> Vec<StreamInfo> {
        let streams = self.streams.lock();
        streams
            .iter()
            .map(|(address, entry)| StreamInfo {
                address: *address,
                session_count: entry.sessions.len(),
                stats: entry.streamer.stats(),
            })
            .collect()
    }

    /// Stop every stream and clear the registry.
    pub fn shutdown(&self) {
        let mut streams = self.streams.lock();
        if streams.is_empty() {
            return;
        }
        info!("[StreamRegistry] Shutting down {} streams", streams.len());
        for (address, entry) in streams.drain() {
            entry.streamer.stop();
            debug!("[StreamRegistry] Stopped stream for {}", address);
        }
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
