// SensorCache Server - HTTP front end for the telemetry engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # SensorCache Server
//!
//! ## Usage
//!
//! ```bash
//! # Serve on the default port with records under $HOME/temperatures
//! sensorcache-server
//!
//! # Direct ingestion, custom port and data directory
//! sensorcache-server --port 9090 --data-dir /var/lib/sensors --ingest-mode direct
//!
//! # Backfill from a recorded dataset at 100x speed
//! sensorcache-server --replay-csv dataset.csv --replay-speed 100
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sensorcache::{
    FsStore, IngestMode, ServiceConfig, TelemetryError, TelemetryService, DEFAULT_STORE_DIR,
};
use sensorcache_server::replay::{ReplayConfig, ReplayEngine};
use sensorcache_server::{router, AppState};
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// SensorCache telemetry server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (1024 or above)
    #[arg(
        short,
        long,
        env = "SENSOR_SERVER_PORT",
        default_value_t = 8080,
        value_parser = clap::value_parser!(u16).range(1024..)
    )]
    port: u16,

    /// Address to bind
    #[arg(long, env = "SENSOR_SERVER_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Directory holding one JSON record per sensor [default: $HOME/temperatures]
    #[arg(long, env = "SENSOR_SERVER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Requests served concurrently
    #[arg(long, env = "SENSOR_SERVER_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: usize,

    /// Time a request may wait for a slot and run, in milliseconds (0 = no limit)
    #[arg(long, env = "SENSOR_SERVER_REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    request_timeout_ms: u64,

    /// Seconds between cache flushes
    #[arg(long, env = "SENSOR_SERVER_FLUSH_INTERVAL_SECS", default_value_t = 10)]
    flush_interval_secs: u64,

    /// Seconds between retention cleanups
    #[arg(long, env = "SENSOR_SERVER_CLEANUP_INTERVAL_SECS", default_value_t = 43_200)]
    cleanup_interval_secs: u64,

    /// Days of readings kept per sensor
    #[arg(long, env = "SENSOR_SERVER_RETENTION_DAYS", default_value_t = 7)]
    retention_days: u32,

    /// How submitted readings reach the cache (queued, direct)
    #[arg(
        long,
        env = "SENSOR_SERVER_INGEST_MODE",
        default_value = "queued",
        value_parser = parse_ingest_mode
    )]
    ingest_mode: IngestMode,

    /// CSV dataset to backfill on startup
    #[arg(long, env = "SENSOR_SERVER_REPLAY_CSV")]
    replay_csv: Option<String>,

    /// Replay speed multiplier (1.0 = recorded pace, 0 = as fast as possible)
    #[arg(long, default_value_t = 0.0)]
    replay_speed: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SENSOR_SERVER_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn parse_ingest_mode(s: &str) -> Result<IngestMode, String> {
    s.parse().map_err(|e: TelemetryError| e.to_string())
}

impl Args {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            retention_days: self.retention_days,
            max_in_flight: self.max_connections,
            request_timeout: (self.request_timeout_ms > 0)
                .then(|| Duration::from_millis(self.request_timeout_ms)),
            ingest_mode: self.ingest_mode,
            ..Default::default()
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_STORE_DIR)
        })
    }

    fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Errors that stop the server.
#[derive(Debug, thiserror::Error)]
enum ServerError {
    #[error("Startup failed: {0}")]
    Startup(#[from] TelemetryError),

    #[error("Cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("SensorCache Server v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), ServerError> {
    let data_dir = args.data_dir();
    info!("Sensor records stored under {}", data_dir.display());

    let store = Arc::new(FsStore::open(&data_dir)?);
    let config = args.service_config();
    let service = Arc::new(match config.ingest_mode {
        IngestMode::Queued => TelemetryService::with_memory_queue(config, store).await?,
        IngestMode::Direct => TelemetryService::start(config, store, None).await?,
    });

    let mut state = AppState::new(service.clone());
    let mut replay = None;

    // Backfill runs alongside the server; a bad dataset is not fatal
    if let Some(csv_path) = args.replay_csv.clone() {
        let config = ReplayConfig {
            csv_path,
            speed: args.replay_speed,
        };

        match ReplayEngine::from_csv(config) {
            Ok(engine) => {
                let info = engine.dataset_info();
                info!(
                    "Dataset loaded: {} sensors, {} rows",
                    info.sensor_count, info.row_count
                );
                state = state.with_replay(engine.state(), info);

                let engine = Arc::new(engine);
                let runner = {
                    let engine = engine.clone();
                    let service = service.clone();
                    tokio::spawn(async move { engine.run(service).await })
                };
                replay = Some((engine, runner));
            }
            Err(e) => {
                error!("Failed to load dataset: {}", e);
            }
        }
    }

    let app = router(Arc::new(state));

    let addr = args.addr();
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // The backfill must be done before the service stops taking readings
    if let Some((engine, runner)) = replay {
        engine.stop();
        if let Err(e) = runner.await {
            warn!("Replay task ended abnormally: {}", e);
        }
    }

    if let Some(report) = service.shutdown().await {
        info!(
            "Final flush: {} saved, {} failed",
            report.saved,
            report.failed.len()
        );
    }

    served.map_err(ServerError::Serve)
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining requests");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["sensorcache-server"]).unwrap();
        assert_eq!(args.port, 8080);
        assert_eq!(args.ingest_mode, IngestMode::Queued);

        let config = args.service_config();
        assert_eq!(config.max_in_flight, 10);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.cleanup_interval, Duration::from_secs(12 * 60 * 60));
        assert_eq!(config.retention_days, 7);
    }

    #[test]
    fn test_privileged_port_rejected() {
        assert!(Args::try_parse_from(["sensorcache-server", "--port", "80"]).is_err());
        assert!(Args::try_parse_from(["sensorcache-server", "--port", "1024"]).is_ok());
    }

    #[test]
    fn test_ingest_mode_flag() {
        let args =
            Args::try_parse_from(["sensorcache-server", "--ingest-mode", "direct"]).unwrap();
        assert_eq!(args.service_config().ingest_mode, IngestMode::Direct);
        assert!(Args::try_parse_from(["sensorcache-server", "--ingest-mode", "carrier-pigeon"])
            .is_err());
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let args =
            Args::try_parse_from(["sensorcache-server", "--request-timeout-ms", "0"]).unwrap();
        assert_eq!(args.service_config().request_timeout, None);
    }

    #[test]
    fn test_explicit_data_dir() {
        let args =
            Args::try_parse_from(["sensorcache-server", "--data-dir", "/srv/sensors"]).unwrap();
        assert_eq!(args.data_dir(), PathBuf::from("/srv/sensors"));
        assert_eq!(args.addr().port(), 8080);
    }
}
