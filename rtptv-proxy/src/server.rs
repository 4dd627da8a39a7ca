//! TCP server forwarding streams to clients.
//!
//! A client sends one line holding the URI to play (`udp://239.0.0.1:5000`,
//! `file:///recordings/NHK_2024_0101_1200_1.ts`, ...). The server answers
//! `OK` and then writes raw TS bytes until either side hangs up, or answers
//! `ERR <reason>` and closes.
//!
//! Every connection gets its own registry session, so clients tuned to the
//! same address share one ingestion loop while reading at their own pace.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use rtptv_source::{
    CancelToken, DataSource, DataSourceFactory, DataSpec, SessionIdAllocator, StreamError,
    StreamRegistry,
};

/// Longest accepted request line.
const MAX_REQUEST_LINE: usize = 4096;

/// Chunks buffered between the blocking reader and the socket writer.
const CHUNK_QUEUE_DEPTH: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Bytes read from the source per chunk.
    pub chunk_size: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request error: {0}")]
    Request(#[from] LinesCodecError),

    #[error("Reader task failed: {0}")]
    Reader(String),
}

/// The main server that listens for connections and spawns sessions.
pub struct Server {
    config: ServerConfig,
    registry: Arc<StreamRegistry>,
    sessions: Arc<SessionIdAllocator>,
    connection_slots: Arc<Semaphore>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        registry: Arc<StreamRegistry>,
        sessions: Arc<SessionIdAllocator>,
    ) -> Self {
        let connection_slots = Arc::new(Semaphore::new(config.max_connections.max(1)));
        Self {
            config,
            registry,
            sessions,
            connection_slots,
        }
    }

    /// Bind the configured address and serve until an accept error.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!("Server listening on {}", listener.local_addr()?);

        loop {
            let permit = match Arc::clone(&self.connection_slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            };

            match listener.accept().await {
                Ok((socket, addr)) => {
                    let registry = Arc::clone(&self.registry);
                    let factory = DataSourceFactory::new(registry, &self.sessions);
                    let session_id = factory.session();
                    let chunk_size = self.config.chunk_size.max(1);

                    info!("[Session {}] New connection from {}", session_id, addr);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, factory, chunk_size).await {
                            error!("[Session {}] Connection error: {}", session_id, e);
                        }
                        info!("[Session {}] Connection closed", session_id);
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }
}

/// Handle a single client connection.
async fn handle_connection(
    socket: TcpStream,
    factory: DataSourceFactory,
    chunk_size: usize,
) -> Result<(), ServerError> {
    socket.set_nodelay(true)?;
    let session_id = factory.session();
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE));

    let Some(request) = framed.next().await else {
        debug!("[Session {}] Client left before sending a request", session_id);
        return Ok(());
    };
    let request = request?;

    let spec = match DataSpec::parse(&request) {
        Ok(spec) => spec,
        Err(e) => {
            warn!("[Session {}] Bad request {:?}: {}", session_id, request, e);
            framed.send(format!("ERR {}", e)).await?;
            return Ok(());
        }
    };

    let (ready_tx, ready_rx) = oneshot::channel();
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Bytes>(CHUNK_QUEUE_DEPTH);

    let mut source = factory.create_data_source();
    let reader = tokio::task::spawn_blocking(move || {
        run_reader(&mut source, &spec, chunk_size, ready_tx, chunk_tx);
        source.close();
    });

    let cancel = match ready_rx.await {
        Ok(Ok(cancel)) => cancel,
        Ok(Err(e)) => {
            framed.send(format!("ERR {}", e)).await?;
            reader.await.map_err(|e| ServerError::Reader(e.to_string()))?;
            return Ok(());
        }
        Err(_) => {
            return Err(ServerError::Reader("reader exited before opening".to_string()));
        }
    };

    framed.send("OK").await?;
    let (mut read_half, mut write_half) = framed.into_inner().into_split();
    let mut probe = [0u8; 256];
    let mut bytes_sent: u64 = 0;

    loop {
        tokio::select! {
            chunk = chunk_rx.recv() => {
                let Some(chunk) = chunk else {
                    break;
                };
                if let Err(e) = write_half.write_all(&chunk).await {
                    debug!("[Session {}] Client write failed: {}", session_id, e);
                    break;
                }
                bytes_sent += chunk.len() as u64;
            }
            read = read_half.read(&mut probe) => {
                match read {
                    // Anything the client sends after the request is ignored.
                    Ok(n) if n > 0 => {}
                    _ => {
                        debug!("[Session {}] Client hung up", session_id);
                        break;
                    }
                }
            }
        }
    }

    // Unblock the reader if it is waiting for live data.
    if let Some(cancel) = cancel {
        cancel.cancel();
    }
    drop(chunk_rx);
    reader.await.map_err(|e| ServerError::Reader(e.to_string()))?;
    let _ = write_half.shutdown().await;

    info!("[Session {}] Sent {} bytes", session_id, bytes_sent);
    Ok(())
}

/// Open `source` and forward its data as chunks until it ends or the
/// receiver goes away. Runs on a blocking thread.
fn run_reader(
    source: &mut dyn DataSource,
    spec: &DataSpec,
    chunk_size: usize,
    ready_tx: oneshot::Sender<Result<Option<CancelToken>, StreamError>>,
    chunk_tx: mpsc::Sender<Bytes>,
) {
    if let Err(e) = source.open(spec) {
        error!("Failed to open {}: {}", spec.uri, e);
        let _ = ready_tx.send(Err(e));
        return;
    }
    if ready_tx.send(Ok(source.cancel_token())).is_err() {
        return;
    }

    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(StreamError::EndOfStream) | Err(StreamError::Cancelled) => break,
            Err(e) => {
                warn!("Read from {} failed: {}", spec.uri, e);
                break;
            }
        };
        if chunk_tx
            .blocking_send(Bytes::copy_from_slice(&buf[..n]))
            .is_err()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::net::UdpSocket;
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    use super::*;
    use rtptv_source::StreamConfig;

    async fn start_server(chunk_size: usize) -> (SocketAddr, Arc<StreamRegistry>) {
        let config = StreamConfig::default()
            .buffer_capacity(1024 * 1024)
            .recv_timeout(Duration::from_millis(20));
        let registry = Arc::new(StreamRegistry::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Server::new(
            ServerConfig {
                listen_addr: addr,
                max_connections: 4,
                chunk_size,
            },
            Arc::clone(&registry),
            Arc::new(SessionIdAllocator::new()),
        );
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });
        (addr, registry)
    }

    async fn request(addr: SocketAddr, uri: &str) -> (String, BufReader<TcpStream>) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(format!("{}\n", uri).as_bytes()).await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        (line.trim_end().to_string(), reader)
    }

    #[tokio::test]
    async fn test_serves_recorded_file() {
        let dir = std::env::temp_dir().join(format!("rtptv-server-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("CH1_2024_0101_0000_1.ts");
        let data: Vec<u8> = (0..188 * 20).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let (addr, _registry) = start_server(1316).await;
        let (status, mut reader) = request(addr, &format!("file://{}", path.display())).await;
        assert_eq!(status, "OK");

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn test_rejects_unsupported_scheme() {
        let (addr, registry) = start_server(1316).await;
        let (status, _) = request(addr, "http://example.com/live.ts").await;
        assert!(status.starts_with("ERR"), "unexpected status {}", status);
        assert_eq!(registry.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_reports_missing_file() {
        let (addr, _registry) = start_server(1316).await;
        let (status, _) = request(addr, "file:///nonexistent/rtptv/missing.ts").await;
        assert!(status.starts_with("ERR"), "unexpected status {}", status);
    }

    #[tokio::test]
    async fn test_forwards_live_udp_stream() {
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        let source_addr = probe.local_addr().unwrap();
        drop(probe);

        let (addr, registry) = start_server(1304).await;
        let (status, mut reader) = request(addr, &format!("udp://{}", source_addr)).await;
        assert_eq!(status, "OK");
        assert_eq!(registry.stream_count(), 1);

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut expected = Vec::new();
        for fill in 1..=3u8 {
            let mut packet = vec![0x80u8; 12];
            packet.extend(std::iter::repeat(fill).take(1304));
            expected.extend_from_slice(&packet[12..]);
            sender.send_to(&packet, source_addr).unwrap();
        }

        let mut received = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(5), reader.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, expected);

        // Hanging up releases the session and stops the stream.
        drop(reader);
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.stream_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
