//! Configuration file format.
//!
//! ```toml
//! [stream]
//! buffer_size = 33554432
//! header_size = 12
//! recv_timeout_ms = 200
//!
//! [server]
//! listen = "0.0.0.0:40772"
//! max_connections = 16
//!
//! [recording]
//! output_dir = "recordings"
//!
//! [logging]
//! log_dir = "logs"
//! retention_days = 7
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use rtptv_source::StreamConfig;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "rtptv-proxy.toml";

#[derive(Debug, serde::Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub recording: RecordingSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, serde::Deserialize, Default)]
pub struct StreamSection {
    /// Ring buffer capacity in bytes.
    pub buffer_size: Option<usize>,
    /// Bytes stripped from the start of every datagram.
    pub header_size: Option<usize>,
    pub max_packet_size: Option<usize>,
    pub recv_timeout_ms: Option<u64>,
}

impl StreamSection {
    /// Overlay the values present in this section onto `base`.
    pub fn apply(&self, base: StreamConfig) -> StreamConfig {
        let mut config = base;
        if let Some(size) = self.buffer_size {
            config = config.buffer_capacity(size);
        }
        if let Some(size) = self.header_size {
            config = config.header_size(size);
        }
        if let Some(size) = self.max_packet_size {
            config = config.max_packet_size(size);
        }
        if let Some(ms) = self.recv_timeout_ms {
            config = config.recv_timeout(Duration::from_millis(ms));
        }
        config
    }
}

#[derive(Debug, serde::Deserialize, Default)]
pub struct ServerSection {
    pub listen: Option<String>,
    pub max_connections: Option<usize>,
    /// Bytes forwarded to a client per read.
    pub chunk_size: Option<usize>,
}

#[derive(Debug, serde::Deserialize, Default)]
pub struct RecordingSection {
    pub output_dir: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

pub fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Explicit path > `rtptv-proxy.toml` in the working directory > none.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Some(default_path)
        } else {
            None
        }
    })
}
