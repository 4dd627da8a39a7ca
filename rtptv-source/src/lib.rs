//! Shared ring-buffered live sources for RTP/MPEG-TS streams.
//!
//! Every multicast or unicast source address is received by exactly one
//! socket and one ingestion thread, no matter how many consumers are tuned to
//! it. Consumers each read the stream at their own pace through an
//! independent cursor, as long as they stay within the ring buffer.
//!
//! # Layout
//!
//! ```text
//!                       StreamRegistry
//!              (address -> stream, session sets)
//!                            │
//!          ┌─────────────────┼─────────────────┐
//!          ▼                 ▼                 ▼
//!     TsStreamer        TsStreamer        TsStreamer      one per address
//!   socket + thread   socket + thread   socket + thread
//!     RingBuffer        RingBuffer        RingBuffer
//!      │      │              │
//!      ▼      ▼              ▼
//!  Consumer Consumer     Consumer                         one per session
//!   Handle   Handle       Handle
//!      │      │              │
//!      ▼      ▼              ▼
//!  TsDataSource ...     StreamRecorder
//! ```
//!
//! Datagrams carry a fixed 12-byte RTP header which is stripped; the rest is
//! appended verbatim. No resequencing is performed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtptv_source::{
//!     DataSource, DataSourceFactory, DataSpec, SessionIdAllocator, StreamConfig, StreamRegistry,
//! };
//!
//! let registry = Arc::new(StreamRegistry::new(StreamConfig::default()));
//! let sessions = SessionIdAllocator::new();
//!
//! let factory = DataSourceFactory::new(Arc::clone(&registry), &sessions);
//! let mut source = factory.create_data_source();
//! source.open(&DataSpec::parse("udp://239.0.0.1:5000")?)?;
//!
//! let mut buf = [0u8; 188 * 7];
//! let n = source.read(&mut buf)?;
//! println!("read {} bytes", n);
//! source.close();
//! # Ok::<(), rtptv_source::StreamError>(())
//! ```

pub mod address;
pub mod config;
pub mod error;
pub mod handle;
pub mod ingest;
pub mod recorder;
pub mod registry;
pub mod ring;
pub mod session;
pub mod source;
pub mod streamer;
pub mod uri;

#[cfg(test)]
mod testing;

pub use address::SourceAddress;
pub use config::{StreamConfig, DEFAULT_BUFFER_CAPACITY, MAX_PACKET_SIZE, RTP_HEADER_SIZE};
pub use error::StreamError;
pub use handle::ConsumerHandle;
pub use ingest::{Connector, PacketSource, UdpConnector, UdpPacketSource};
pub use recorder::{
    RecordingOutcome, RecordingSummary, StreamRecorder, RECORD_CHUNK_SIZE, TS_PACKET_SIZE,
};
pub use registry::{StreamInfo, StreamRegistry};
pub use session::{SessionId, SessionIdAllocator};
pub use source::{DataSource, DataSourceFactory, FileDataSource, StreamDataSource, TsDataSource};
pub use streamer::{CancelToken, StreamStats, TsStreamer};
pub use uri::{DataSpec, StreamUri};
