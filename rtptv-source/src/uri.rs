//! Stream URIs and open requests.
//!
//! Supported forms:
//!
//! ```text
//! file:///var/lib/rtptv/recordings/NHK_2024_0101_1200_7.ts
//! udp://239.0.0.1:5000        udp://@239.0.0.1:5000       udp://@:5000
//! rtp://239.0.0.1:5000
//! ```

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::address::SourceAddress;
use crate::error::StreamError;

/// A parsed stream URI. The scheme selects the data source implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUri {
    /// A recorded file.
    File(PathBuf),
    /// A live UDP stream carrying RTP-framed TS.
    Udp(SourceAddress),
    /// A live RTP stream.
    Rtp(SourceAddress),
}

impl StreamUri {
    /// The network address for live URIs, `None` for files.
    pub fn source_address(&self) -> Option<SourceAddress> {
        match self {
            StreamUri::File(_) => None,
            StreamUri::Udp(addr) | StreamUri::Rtp(addr) => Some(*addr),
        }
    }

    /// The file path for file URIs.
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            StreamUri::File(path) => Some(path),
            _ => None,
        }
    }

    /// Build a file URI for a local path.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        StreamUri::File(path.into())
    }
}

fn parse_network_address(rest: &str, uri: &str) -> Result<SourceAddress, StreamError> {
    // VLC style "@group:port" means "listen on".
    let rest = rest.strip_prefix('@').unwrap_or(rest);
    let rest = rest
        .split(|c: char| c == '/' || c == '?')
        .next()
        .unwrap_or_default();

    if rest.is_empty() {
        return Err(StreamError::InvalidUri(uri.to_string()));
    }

    let host_port = if rest.starts_with(':') {
        format!("0.0.0.0{}", rest)
    } else {
        rest.to_string()
    };

    if let Ok(addr) = host_port.parse::<SocketAddr>() {
        return Ok(SourceAddress::new(addr));
    }

    host_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(SourceAddress::new)
        .ok_or_else(|| StreamError::InvalidUri(uri.to_string()))
}

impl FromStr for StreamUri {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| StreamError::InvalidUri(s.to_string()))?;

        match scheme.to_ascii_lowercase().as_str() {
            "file" => {
                if rest.is_empty() {
                    return Err(StreamError::InvalidUri(s.to_string()));
                }
                Ok(StreamUri::File(PathBuf::from(rest)))
            }
            "udp" => Ok(StreamUri::Udp(parse_network_address(rest, s)?)),
            "rtp" => Ok(StreamUri::Rtp(parse_network_address(rest, s)?)),
            other => Err(StreamError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for StreamUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamUri::File(path) => write!(f, "file://{}", path.display()),
            StreamUri::Udp(addr) => write!(f, "udp://{}", addr),
            StreamUri::Rtp(addr) => write!(f, "rtp://{}", addr),
        }
    }
}

/// A request to open a data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSpec {
    pub uri: StreamUri,
    /// Byte offset to start from. Honoured by file sources only; live sources
    /// always start at the live edge.
    pub position: u64,
}

impl DataSpec {
    pub fn new(uri: StreamUri) -> Self {
        Self { uri, position: 0 }
    }

    /// Parse a URI string into a spec starting at position 0.
    pub fn parse(uri: &str) -> Result<Self, StreamError> {
        Ok(Self::new(uri.parse()?))
    }

    pub fn with_position(mut self, position: u64) -> Self {
        self.position = position;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_udp_variants() {
        let plain: StreamUri = "udp://239.0.0.1:5000".parse().unwrap();
        let at: StreamUri = "udp://@239.0.0.1:5000".parse().unwrap();
        let trailing: StreamUri = "udp://239.0.0.1:5000/".parse().unwrap();

        assert_eq!(plain, at);
        assert_eq!(plain, trailing);
        assert_eq!(
            plain.source_address().unwrap().socket_addr(),
            "239.0.0.1:5000".parse().unwrap()
        );
    }

    #[test]
    fn test_parse_listen_any() {
        let uri: StreamUri = "udp://@:5004".parse().unwrap();
        assert_eq!(
            uri.source_address().unwrap().socket_addr(),
            "0.0.0.0:5004".parse().unwrap()
        );
    }

    #[test]
    fn test_parse_rtp_and_file() {
        let rtp: StreamUri = "RTP://239.1.2.3:1234".parse().unwrap();
        assert!(matches!(rtp, StreamUri::Rtp(_)));

        let file: StreamUri = "file:///tmp/rec/ch1_2024_0101_1200_3.ts".parse().unwrap();
        assert!(matches!(file, StreamUri::File(_)));
        assert_eq!(
            file.file_path().unwrap(),
            Path::new("/tmp/rec/ch1_2024_0101_1200_3.ts")
        );
        assert!(file.source_address().is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "http://example.com/a.ts".parse::<StreamUri>(),
            Err(StreamError::UnsupportedScheme(s)) if s == "http"
        ));
        assert!(matches!(
            "239.0.0.1:5000".parse::<StreamUri>(),
            Err(StreamError::InvalidUri(_))
        ));
        assert!(matches!(
            "udp://".parse::<StreamUri>(),
            Err(StreamError::InvalidUri(_))
        ));
        assert!(matches!(
            "file://".parse::<StreamUri>(),
            Err(StreamError::InvalidUri(_))
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        for s in [
            "udp://239.0.0.1:5000",
            "rtp://[ff15::1]:5004",
            "file:///tmp/a.ts",
        ] {
            let uri: StreamUri = s.parse().unwrap();
            assert_eq!(uri.to_string(), s);
        }
    }

    #[test]
    fn test_data_spec() {
        let spec = DataSpec::parse("file:///tmp/a.ts").unwrap().with_position(188);
        assert_eq!(spec.position, 188);
        assert!(spec.uri.file_path().is_some());
    }
}
