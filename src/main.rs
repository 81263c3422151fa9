//! CLI for wordcount
//!
//! Subcommands:
//! - `broker`: run the durable stream broker behind its WebSocket server
//! - `server`: run the HTTP front-end and its correlator
//! - `worker`: run one worker dispatch loop

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use wordcount::broker::{Broker, Retention, StreamBroker};
use wordcount::config::{Settings, load_config};
use wordcount::correlation::Communicator;
use wordcount::frontend::{AppState, start_http_server};
use wordcount::persistence::StreamStore;
use wordcount::transport::{RemoteBroker, start_broker_server};
use wordcount::utils::AppError;
use wordcount::utils::logging;
use wordcount::worker::{WordCountJob, Worker};

#[derive(Parser)]
#[command(name = "wordcount")]
enum Command {
    /// Start the stream broker
    Broker,
    /// Start the HTTP front-end
    Server {
        /// Broker URL (default from config: ws://127.0.0.1:6380)
        #[arg(long)]
        broker_url: Option<String>,
    },
    /// Start a worker
    Worker {
        /// Broker URL (default from config: ws://127.0.0.1:6380)
        #[arg(long)]
        broker_url: Option<String>,
        /// Front-end URL artifacts are fetched from
        #[arg(long)]
        server_url: Option<String>,
        /// Name in the request consumer group; generated when absent
        #[arg(long)]
        consumer_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = Command::parse();

    match run(cmd).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // no-op when `run` already installed the configured subscriber
            logging::init("info");
            error!("Exiting: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cmd: Command) -> Result<(), AppError> {
    let mut config = load_config()?;
    logging::init(&config.log.level);

    match cmd {
        Command::Broker => run_broker(config).await,
        Command::Server { broker_url } => {
            if let Some(url) = broker_url {
                config.broker.url = url;
            }
            run_server(config).await
        }
        Command::Worker {
            broker_url,
            server_url,
            consumer_name,
        } => {
            if let Some(url) = broker_url {
                config.broker.url = url;
            }
            if let Some(url) = server_url {
                config.worker.server_url = url;
            }
            if consumer_name.is_some() {
                config.worker.consumer_name = consumer_name;
            }
            run_worker(config).await
        }
    }
}

async fn run_broker(config: Settings) -> Result<(), AppError> {
    let addr = format!("{}:{}", config.broker.host, config.broker.port);
    let store = StreamStore::open(&config.broker.data_dir)?;
    let broker = Arc::new(Broker::with_store(
        store,
        Retention {
            max_entries_per_stream: config.broker.max_entries_per_stream,
            entry_ttl_secs: config.broker.entry_ttl_secs,
        },
    )?);

    let outcome = tokio::select! {
        result = start_broker_server(&addr, broker.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    };
    broker.close().await;
    outcome
}

async fn run_server(config: Settings) -> Result<(), AppError> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let broker = Arc::new(RemoteBroker::connect(&config.broker.url).await?);
    let communicator =
        Communicator::initialize(broker, config.streams, config.correlator).await?;

    let state = AppState {
        communicator: communicator.clone(),
        upload_dir: PathBuf::from(&config.server.upload_dir),
        request_timeout: Duration::from_secs(config.server.request_timeout_secs),
        max_upload_bytes: config.server.max_upload_bytes,
    };

    let outcome = tokio::select! {
        result = start_http_server(&addr, state) => result,
        _ = communicator.stopped() => Err(AppError::CorrelatorStopped),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    };
    communicator.disconnect().await;
    outcome
}

async fn run_worker(config: Settings) -> Result<(), AppError> {
    let broker = Arc::new(RemoteBroker::connect(&config.broker.url).await?);
    let worker = Worker::new(
        broker.clone(),
        WordCountJob::new(&config.worker.server_url),
        config.streams,
        &config.worker,
    );
    info!(consumer = %worker.consumer(), server_url = %config.worker.server_url, "Starting worker");

    let outcome = tokio::select! {
        result = worker.run() => result.map_err(AppError::from),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    };
    broker.close().await;
    outcome
}
