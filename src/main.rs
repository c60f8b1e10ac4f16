//! Sensor ingestion daemon - Main Entry Point
//!
//! `run` starts the subscriber and the health server and waits for a
//! signal; `latest` and `history` query the store directly.

use clap::{Parser, Subcommand};
use sensor_ingest::config::IngestConfig;
use sensor_ingest::error::{IngestError, IngestResult};
use sensor_ingest::observability::{
    health::HealthServer, init_default_logging, init_logging, metrics::metrics, LogFormat,
};
use sensor_ingest::query::{NoDataResponse, QueryError, QueryService};
use sensor_ingest::store::{ReadingStore, SqliteStore};
use sensor_ingest::subscriber::{BackoffPolicy, Subscriber};
use sensor_ingest::transport::mqtt::MqttClient;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

/// How long to wait for the subscriber to finish its in-flight message
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// MQTT sensor telemetry ingestion
#[derive(Parser)]
#[command(name = "sensor-ingest")]
#[command(about = "Ingest MQTT sensor telemetry into SQLite and query it")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion daemon
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Print the most recent reading as JSON
    Latest,
    /// Print recent readings as JSON, newest first
    History {
        /// Number of entries (default 50)
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, log_format_from_env(), false),
        _ => init_logging(Level::TRACE, log_format_from_env(), true),
    }

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_daemon(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Latest => handle_latest_command(&config).await,
        Commands::History { limit } => handle_history_command(&config, limit).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn log_format_from_env() -> LogFormat {
    LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default())
}

fn load_configuration(config_path: Option<&Path>) -> IngestResult<IngestConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(IngestConfig::load_from_file(path)?);
    }

    for path_str in ["sensor-ingest.toml", "config/sensor-ingest.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(IngestConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using defaults");
    let config = IngestConfig::default();
    config.validate()?;
    Ok(config)
}

async fn open_store(config: &IngestConfig) -> IngestResult<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.store).await?;
    store.initialize().await?;
    Ok(Arc::new(store))
}

async fn run_daemon(config: IngestConfig) -> IngestResult<()> {
    info!(
        "Starting sensor-ingest v{} on topic {}",
        env!("CARGO_PKG_VERSION"),
        config.mqtt.topic
    );

    // Storage failures at startup are fatal
    let store = open_store(&config).await?;

    let transport = MqttClient::new(
        config.mqtt.clone(),
        Duration::from_secs(config.subscriber.connect_timeout_secs),
    );
    let mut subscriber = Subscriber::new(
        transport,
        store.clone(),
        config.mqtt.topic.clone(),
        BackoffPolicy::from_config(&config.subscriber),
    );

    if config.health.enabled {
        let health_server = Arc::new(HealthServer::new(
            config.health_port(),
            subscriber.state(),
            store.clone(),
        ));
        tokio::spawn(health_server.start());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut subscriber_handle = tokio::spawn(async move {
        subscriber.run(shutdown_rx).await;
    });

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Ingesting readings, waiting for shutdown signal");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        result = &mut subscriber_handle => {
            store.close().await;
            return match result {
                Ok(()) => Err(IngestError::internal_error("subscriber stopped unexpectedly")),
                Err(e) => Err(IngestError::internal_error(format!("subscriber task failed: {e}"))),
            };
        }
    }

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut subscriber_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Subscriber task ended abnormally: {}", e),
        Err(_) => {
            warn!("Subscriber did not stop within {:?}, aborting", SHUTDOWN_GRACE);
            subscriber_handle.abort();
        }
    }

    store.close().await;

    let snapshot = metrics().get_metrics();
    info!(
        stored = snapshot.ingest.readings_stored,
        rejected = snapshot.ingest.messages_rejected,
        write_failures = snapshot.ingest.write_failures,
        "Shutdown complete"
    );
    Ok(())
}

fn handle_config_command(config: &IngestConfig, show: bool) -> IngestResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| IngestError::internal_error(format!("cannot render config: {e}")))?;
        println!("{rendered}");
    }

    if config.mqtt.username_env.is_some() && config.get_mqtt_username().is_none() {
        warn!("MQTT username variable is configured but not set");
    }
    if config.mqtt.password_env.is_some() && config.get_mqtt_password().is_none() {
        warn!("MQTT password variable is configured but not set");
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn handle_latest_command(config: &IngestConfig) -> IngestResult<()> {
    let service = QueryService::new(open_store(config).await?);

    let body = match service.get_latest().await {
        Ok(latest) => serde_json::to_string_pretty(&latest)?,
        Err(QueryError::NoData) => serde_json::to_string_pretty(&NoDataResponse::default())?,
        Err(e) => return Err(e.into()),
    };

    println!("{body}");
    Ok(())
}

async fn handle_history_command(config: &IngestConfig, limit: Option<usize>) -> IngestResult<()> {
    let service = QueryService::new(open_store(config).await?);
    let history = service.get_history(limit).await?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}
