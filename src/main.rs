//! Delta Relay
//!
//! Periodically replays unprocessed document deltas in timestamp order and
//! publishes each one to the configured exchange.

use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use delta_relay::avro::{self, Schema};
use delta_relay::core::{config::parse_duration, logging, Config};
use delta_relay::publish::{AmqpConnection, AmqpMessage, DeltaPublisher, LocalAmqpConnection, V1MessageWriter};
use delta_relay::storage::MemDeltaDao;
use delta_relay::system::{metrics, EventBus};
use delta_relay::DeltaProcessor;
use std::sync::Arc;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let matches = Command::new("delta-relay")
        .version(delta_relay::VERSION)
        .about("Ordered publishing of document deltas.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
        )
        .arg(
            Arg::new("documents")
                .long("documents")
                .value_name("FILE")
                .help("JSON fixture of documents to seed the in-memory store")
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .value_name("DURATION")
                .help("Time between processing passes (e.g. 500ms, 5s)")
        )
        .arg(
            Arg::new("exchange")
                .long("exchange")
                .value_name("NAME")
                .help("Exchange deltas are published to")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
        )
        .arg(
            Arg::new("once")
                .long("once")
                .action(ArgAction::SetTrue)
                .help("Run a single pass and exit")
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .action(ArgAction::SetTrue)
                .help("Decode and log every published message")
        )
        .get_matches();

    // Load configuration
    let mut config = if let Some(config_path) = matches.get_one::<String>("config") {
        let mut config = Config::from_file(config_path)
            .with_context(|| format!("Failed to load config file {}", config_path))?;
        config.apply_env_overrides()?;
        config
    } else {
        Config::load()?
    };

    // Apply CLI overrides
    apply_cli_overrides(&mut config, &matches)?;
    config.validate()?;

    logging::init(&config.logging);
    info!("Starting Delta Relay v{}", delta_relay::VERSION);

    if config.metrics.enable_prometheus {
        metrics::init_registry();
    }

    let dao = match &config.processor.documents {
        Some(path) => MemDeltaDao::from_json_file(path)
            .with_context(|| format!("Failed to load documents from {}", path.display()))?,
        None => {
            warn!("No documents fixture configured, starting with an empty store");
            MemDeltaDao::new()
        }
    };

    let (connection, receiver) = LocalAmqpConnection::from_config(&config.amqp);
    connection.connect().await?;
    let connection = Arc::new(connection);

    let writer = V1MessageWriter::from_config(&config.writer).context("Failed to load message schema")?;
    let consumer = spawn_consumer(receiver, writer.schema().clone(), matches.get_flag("dump"));

    let publisher = DeltaPublisher::new(connection.clone(), Arc::new(writer));
    let processor = DeltaProcessor::new(Arc::new(dao), publisher, EventBus::default());

    if matches.get_flag("once") {
        run_pass(&processor, &config).await;
    } else {
        let mut ticker = tokio::time::interval(config.processor.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => run_pass(&processor, &config).await,
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping processor...");
                    break;
                }
            }
        }
    }

    // Closing every sender ends the consumer once the queue is drained
    connection.disconnect();
    drop(processor);
    drop(connection);
    if let Err(e) = consumer.await {
        error!(error = %e, "Message consumer task failed");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &clap::ArgMatches) -> anyhow::Result<()> {
    if let Some(documents) = matches.get_one::<String>("documents") {
        config.processor.documents = Some(documents.into());
    }

    if let Some(interval) = matches.get_one::<String>("interval") {
        config.processor.interval = parse_duration(interval)
            .map_err(|e| anyhow::anyhow!("Invalid interval {}: {}", interval, e))?;
    }

    if let Some(exchange) = matches.get_one::<String>("exchange") {
        config.amqp.exchange = exchange.clone();
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    Ok(())
}

/// Run one processing pass and log its outcome
async fn run_pass(processor: &DeltaProcessor, config: &Config) {
    let span = tracing::info_span!("pass", pass_id = %uuid::Uuid::new_v4());

    match processor.process().instrument(span).await {
        Ok(summary) => debug!(?summary, "Pass complete"),
        Err(e) => error!(error = %e, "Pass aborted"),
    }

    if config.metrics.enable_prometheus && config.metrics.log_after_pass {
        debug!(metrics = %metrics::collect_metrics(), "Metrics snapshot");
    }
}

/// Drain the local exchange, optionally decoding each message
fn spawn_consumer(
    receiver: flume::Receiver<AmqpMessage>,
    schema: Schema,
    dump: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(message) = receiver.recv_async().await {
            let delta_uid = message.options.headers.get("delta_uid").cloned().unwrap_or_default();

            if !dump {
                debug!(exchange = %message.exchange, %delta_uid, bytes = message.body.len(), "Message delivered");
                continue;
            }

            match avro::decode(&schema, &message.body) {
                Ok(decoded) => info!(exchange = %message.exchange, %delta_uid, message = %decoded, "Message delivered"),
                Err(e) => warn!(%delta_uid, error = %e, "Failed to decode delivered message"),
            }
        }
    })
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
