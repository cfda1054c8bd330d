//! ruuvi-mqtt: forward RuuviTag measurements to an MQTT broker
//!
//! Decoded measurements arrive as JSON lines on stdin (or `--input`), are
//! filtered, calibrated and buffered, then published one by one.

mod cli;
mod config;
mod logging;
mod source;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal;
use tokio::sync::watch;

use ruuvi_mqtt_connectors::{AsyncConnector, MqttConnector, Publisher};
use ruuvi_mqtt_core::{Ingestor, PipelineStats, RecordBuffer, SystemTime};

use crate::cli::Args;
use crate::config::{FileConfig, GatewayConfig};
use crate::source::JsonLinesSource;

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.debug);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(args));
    // A pending stdin read holds a blocking thread that never finishes
    runtime.shutdown_timeout(Duration::from_secs(1));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!("Starting ruuvi-mqtt v{}", ruuvi_mqtt_core::VERSION);

    let file = args.config.as_deref().map(FileConfig::load).transpose()?;
    let config = GatewayConfig::build(&args, file)?;

    let stats = Arc::new(PipelineStats::new());
    let buffer = Arc::new(RecordBuffer::new(config.buffer_size, Arc::clone(&stats))?);

    let connector = MqttConnector::connect(config.mqtt).context("Failed to set up MQTT connection")?;
    let mut publisher = Publisher::new(connector, config.topic, config.retry, Arc::clone(&stats));
    let mut ingestor = Ingestor::new(
        Arc::new(config.registry),
        config.ingest,
        Arc::clone(&buffer),
        Arc::clone(&stats),
    );

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &config.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Could not open input {}", path.display()))?;
            info!("Reading measurements from {}", path.display());
            Box::new(BufReader::new(file))
        }
        None => {
            info!("Reading measurements from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    };
    let mut source = JsonLinesSource::new(reader, Arc::new(SystemTime));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut ingest_task = tokio::spawn(async move {
        ingestor.run(&mut source, shutdown_rx).await;
    });
    let publish_buffer = Arc::clone(&buffer);
    let mut publish_task = tokio::spawn(async move {
        let result = publisher.run(&publish_buffer).await;
        (publisher, result)
    });

    let mut ingest_done = false;
    let mut publish_outcome = None;
    tokio::select! {
        _ = shutdown_signal() => {}
        joined = &mut ingest_task => {
            ingest_done = true;
            if let Err(e) = joined {
                error!("Ingestion task failed: {}", e);
            }
        }
        joined = &mut publish_task => publish_outcome = Some(joined),
    }

    // Stop reading, then let the publisher drain what is buffered
    shutdown_tx.send_replace(true);
    if !ingest_done {
        if let Err(e) = ingest_task.await {
            error!("Ingestion task failed: {}", e);
        }
    }
    buffer.close();

    let publish_outcome = match publish_outcome {
        Some(joined) => Some(joined),
        None => {
            if !buffer.is_empty() {
                info!("Publishing {} buffered records before exit", buffer.len());
            }
            tokio::select! {
                joined = &mut publish_task => Some(joined),
                _ = shutdown_signal() => {
                    warn!("Second signal received, abandoning {} buffered records", buffer.len());
                    publish_task.abort();
                    None
                }
            }
        }
    };

    let result = match publish_outcome {
        Some(Ok((mut publisher, result))) => {
            let connector = publisher.connector_mut();
            if let Err(e) = connector.disconnect().await {
                warn!("MQTT disconnect failed: {}", e);
            }
            info!("MQTT connection statistics: {}", connector.stats());
            result.context("Publishing failed")
        }
        Some(Err(e)) => Err(e).context("Publisher task failed"),
        None => Ok(()),
    };

    info!("Record buffer statistics: {} capacity={}", buffer.stats(), buffer.capacity());
    info!("Pipeline statistics: {}", stats.snapshot());
    result
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
