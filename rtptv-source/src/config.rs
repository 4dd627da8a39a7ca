//! Per-stream buffering and ingestion parameters.

use std::time::Duration;

/// Size of an RTP fixed header without CSRCs or extensions.
pub const RTP_HEADER_SIZE: usize = 12;

/// Largest datagram the ingestion loop expects to receive.
pub const MAX_PACKET_SIZE: usize = 2048;

/// Default ring buffer capacity (32 MiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = MAX_PACKET_SIZE * 512 * 32;

/// Default socket receive timeout. Bounds how long `stop()` waits for the
/// ingestion loop to notice the stop request.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// Stream configuration shared by every stream a registry creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Ring buffer capacity in bytes.
    pub buffer_capacity: usize,
    /// Leading bytes stripped from every datagram.
    pub header_size: usize,
    /// Scratch buffer size for one datagram.
    pub max_packet_size: usize,
    /// Socket receive timeout used to poll for stop requests.
    pub recv_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            header_size: RTP_HEADER_SIZE,
            max_packet_size: MAX_PACKET_SIZE,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
        }
    }
}

impl StreamConfig {
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    pub fn header_size(mut self, size: usize) -> Self {
        self.header_size = size;
        self
    }

    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.max(1);
        self
    }

    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        // A zero timeout is rejected by the socket API.
        self.recv_timeout = timeout.max(Duration::from_millis(1));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.buffer_capacity, 32 * 1024 * 1024);
        assert_eq!(config.header_size, 12);
        assert_eq!(config.max_packet_size, 2048);
    }

    #[test]
    fn test_builder_clamps() {
        let config = StreamConfig::default()
            .buffer_capacity(0)
            .recv_timeout(Duration::ZERO)
            .header_size(0);
        assert_eq!(config.buffer_capacity, 1);
        assert_eq!(config.recv_timeout, Duration::from_millis(1));
        assert_eq!(config.header_size, 0);
    }
}
