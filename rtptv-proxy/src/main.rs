//! rtptv-proxy: share RTP/MPEG-TS live streams between clients.
//!
//! `serve` forwards live streams (and recordings) to TCP clients, with every
//! client tuned to the same source address sharing one socket. `record`
//! writes one stream to a TS file until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};

mod config;
mod logging;
mod server;
mod writer;

use config::{load_config, resolve_config_path, ConfigFile};
use rtptv_source::{
    DataSourceFactory, DataSpec, RecordingOutcome, SessionIdAllocator, StreamConfig, StreamInfo,
    StreamRecorder, StreamRegistry, RECORD_CHUNK_SIZE,
};
use server::{Server, ServerConfig};
use writer::TsFileWriter;

const DEFAULT_LISTEN: &str = "0.0.0.0:40772";
const DEFAULT_MAX_CONNECTIONS: usize = 16;
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;
const DEFAULT_OUTPUT_DIR: &str = "recordings";
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// rtptv-proxy - Shared RTP/MPEG-TS live stream proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long, global = true)]
    log_retention_days: Option<u64>,

    /// Ring buffer size per stream in bytes
    #[arg(long, global = true)]
    buffer_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve streams to TCP clients
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Maximum concurrent connections
        #[arg(short = 'c', long)]
        max_connections: Option<usize>,
    },
    /// Record one stream to a TS file
    Record {
        /// Stream URI, e.g. udp://239.0.0.1:5000
        uri: String,

        /// Channel name used in the file name
        #[arg(long)]
        channel: String,

        /// Program title used in the file name
        #[arg(long)]
        title: Option<String>,

        /// Directory recordings are written to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = match resolve_config_path(args.config.clone()) {
        Some(path) => match load_config(&path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        },
        None => ConfigFile::default(),
    };

    // Command line takes precedence over the config file
    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| file_config.logging.log_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
    let log_retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(DEFAULT_LOG_RETENTION_DAYS);

    logging::init_logging(
        &log_dir,
        log_retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    let mut stream_config = file_config.stream.apply(StreamConfig::default());
    if let Some(size) = args.buffer_size {
        stream_config = stream_config.buffer_capacity(size);
    }
    info!(
        "Stream config: buffer={} bytes, header={} bytes, recv_timeout={:?}",
        stream_config.buffer_capacity, stream_config.header_size, stream_config.recv_timeout
    );

    let registry = Arc::new(StreamRegistry::new(stream_config));
    let sessions = Arc::new(SessionIdAllocator::new());

    let result = match args.command {
        Command::Serve {
            listen,
            max_connections,
        } => {
            let listen_addr = match listen {
                Some(addr) => addr,
                None => file_config
                    .server
                    .listen
                    .as_deref()
                    .unwrap_or(DEFAULT_LISTEN)
                    .parse()?,
            };
            let config = ServerConfig {
                listen_addr,
                max_connections: max_connections
                    .or(file_config.server.max_connections)
                    .unwrap_or(DEFAULT_MAX_CONNECTIONS),
                chunk_size: file_config.server.chunk_size.unwrap_or(RECORD_CHUNK_SIZE),
            };
            serve(config, Arc::clone(&registry), sessions).await
        }
        Command::Record {
            uri,
            channel,
            title,
            output_dir,
            duration,
        } => {
            let output_dir = output_dir
                .or_else(|| file_config.recording.output_dir.as_ref().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
            let spec = DataSpec::parse(&uri)?;
            let factory = DataSourceFactory::new(Arc::clone(&registry), &sessions);
            record(
                factory,
                spec,
                output_dir,
                channel,
                title,
                duration.map(Duration::from_secs),
            )
            .await
        }
    };

    let shutdown_registry = Arc::clone(&registry);
    tokio::task::spawn_blocking(move || shutdown_registry.shutdown()).await?;
    info!("rtptv-proxy stopped");

    result
}

async fn serve(
    config: ServerConfig,
    registry: Arc<StreamRegistry>,
    sessions: Arc<SessionIdAllocator>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("rtptv-proxy starting...");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Max connections: {}", config.max_connections);
    info!("  Chunk size: {}", config.chunk_size);

    let server = Server::new(config, registry, sessions);
    let run = server.run();
    tokio::pin!(run);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut stats_ticker = tokio::time::interval(STATS_INTERVAL);
    stats_ticker.tick().await;

    loop {
        tokio::select! {
            result = &mut run => {
                if let Err(e) = &result {
                    error!("Server error: {}", e);
                }
                result?;
                break;
            }
            _ = &mut ctrl_c => {
                let active = server.registry().stream_count();
                info!("Interrupted, shutting down ({} active streams)", active);
                break;
            }
            _ = stats_ticker.tick() => log_stream_stats(server.registry()),
        }
    }

    log_stream_stats(server.registry());
    Ok(())
}

fn log_stream_stats(registry: &StreamRegistry) {
    for info in registry.stats() {
        info!("{}", describe_stream(&info));
    }
}

fn describe_stream(info: &StreamInfo) -> String {
    format!(
        "[Stats] {} {}: sessions={}, fetched={} bytes, datagrams={}, discarded={}",
        info.address,
        if info.stats.active { "active" } else { "stopped" },
        info.session_count,
        info.stats.bytes_fetched,
        info.stats.datagrams_received,
        info.stats.datagrams_discarded,
    )
}

async fn record(
    factory: DataSourceFactory,
    spec: DataSpec,
    output_dir: PathBuf,
    channel: String,
    title: Option<String>,
    duration: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    let writer = TsFileWriter::create(&output_dir, &channel, title.as_deref())?;
    let file_uri = writer.uri();
    info!(
        "Recording file {} (instance {})",
        writer.path().display(),
        writer.instance_id()
    );

    let source = factory.create_data_source();
    let recorder = StreamRecorder::new(Box::new(source), Box::new(writer));

    info!("Recording {} to {}", spec.uri, file_uri);
    let mut recorder = tokio::task::spawn_blocking(move || {
        let mut recorder = recorder;
        recorder.start_recording(&spec).map(|_| recorder)
    })
    .await??;

    let deadline = duration.map(|d| tokio::time::Instant::now() + d);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping recording");
                break;
            }
            _ = ticker.tick() => {
                if !recorder.is_recording() {
                    break;
                }
                if deadline.map_or(false, |d| tokio::time::Instant::now() >= d) {
                    info!("Recording duration reached");
                    break;
                }
            }
        }
    }

    let summary = tokio::task::spawn_blocking(move || recorder.stop_recording()).await?;
    match summary {
        Some(summary) => {
            match &summary.outcome {
                RecordingOutcome::Stopped | RecordingOutcome::EndOfStream => {
                    info!("Recorded {} bytes to {}", summary.bytes_written, file_uri)
                }
                RecordingOutcome::SourceFailed(e) => warn!(
                    "Recording stopped after {} bytes, source failed: {}",
                    summary.bytes_written, e
                ),
                RecordingOutcome::SinkFailed(e) => error!(
                    "Recording stopped after {} bytes, write failed: {}",
                    summary.bytes_written, e
                ),
            }
            println!("{}", file_uri);
        }
        None => error!("Recording thread did not report a result"),
    }

    Ok(())
}
