//! Error types for shared stream sources.

use std::io;

use thiserror::Error;

use crate::address::SourceAddress;

/// Errors returned by streams, consumer handles and data sources.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The datagram socket for a source address could not be opened.
    #[error("Failed to open socket for {address}: {source}")]
    SocketOpen {
        address: SourceAddress,
        #[source]
        source: io::Error,
    },

    /// The requested window has already been overwritten in the ring buffer.
    #[error("Buffer overrun: position {position} is more than {capacity} bytes behind {fetched}")]
    Overrun {
        position: u64,
        fetched: u64,
        capacity: usize,
    },

    /// The stream is not ingesting (stopped or failed).
    #[error("Stream unavailable")]
    Unavailable,

    /// A file-backed source has no more data.
    #[error("End of stream")]
    EndOfStream,

    /// The data source was closed.
    #[error("Data source closed")]
    Closed,

    /// The data source was read before it was opened.
    #[error("Data source not opened")]
    NotOpened,

    /// A blocked read was cancelled by its owner.
    #[error("Read cancelled")]
    Cancelled,

    /// A single read asked for more bytes than the ring buffer can hold.
    #[error("Read of {requested} bytes exceeds buffer capacity {capacity}")]
    ReadTooLarge { requested: usize, capacity: usize },

    /// The URI scheme is not supported.
    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// The URI could not be parsed.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// I/O error from a file-backed source or thread creation.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// Returns true if the reader fell too far behind the live edge.
    pub fn is_overrun(&self) -> bool {
        matches!(self, StreamError::Overrun { .. })
    }

    /// Returns true if the underlying stream is no longer ingesting.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StreamError::Unavailable)
    }
}
