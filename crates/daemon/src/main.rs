//! Sluice Relay Engine - Main Entry Point
//!
//! Composition root: the explicit startup topology is wired here, not in
//! the core. broker -> consumer -> valve inlet -> valve -> worker.

mod config;
mod echo;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sluice_core::application::{
    shutdown_channel, ConsumerConfig, ConsumerSystem, ProducerConfig, ProducerSystem, RateValve,
    SharedRegistry, Worker,
};
use sluice_core::application::constants::DEFAULT_MAILBOX_CAPACITY;
use sluice_core::domain::ValveConfig;
use sluice_core::port::time_provider::SystemTimeProvider;
use sluice_core::port::MessageBroker;
use sluice_infra_broker::ChannelBroker;

use config::DaemonConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const WORKER_NAME: &str = "worker";
const PRODUCER_NAME: &str = "producer1";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging (json for production, pretty for development)
    let log_format = std::env::var("SLUICE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("sluice_core=info,sluice_infra_broker=info,sluice_daemon=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Sluice relay engine v{} starting...", VERSION);

    // 2. Load configuration (fatal on invalid values)
    let config = DaemonConfig::from_env()?;
    let valve_config = ValveConfig::new(config.rate, config.window, config.max_backlog)
        .map_err(|e| anyhow::anyhow!("Valve configuration rejected: {}", e))?;

    info!(
        rate = config.rate,
        window_ms = config.window.as_millis() as u64,
        broker = %config.broker_url,
        topics = ?config.topics,
        "Configuration loaded"
    );

    // 3. Setup dependencies (DI wiring)
    let broker: Arc<dyn MessageBroker> = Arc::new(ChannelBroker::new());
    let time_provider = Arc::new(SystemTimeProvider);
    let registry = Arc::new(SharedRegistry::new());
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    // 4. Start the worker and register it by name
    let (supervisor_tx, mut supervisor_rx) = tokio::sync::mpsc::unbounded_channel();
    let (worker_addr, worker_handle) = Worker::spawn(
        WORKER_NAME,
        DEFAULT_MAILBOX_CAPACITY,
        Arc::new(echo::EchoProcessor),
        Some(supervisor_tx),
        shutdown_rx.clone(),
    );
    registry
        .register(WORKER_NAME, worker_addr)
        .map_err(|e| anyhow::anyhow!("Worker registration failed: {}", e))?;

    tokio::spawn(async move {
        while let Some(event) = supervisor_rx.recv().await {
            error!(worker = %event.worker, reason = %event.reason, "Worker reported failure");
        }
    });

    // 5. Start the valve and bind it to the registered worker
    let (valve, _valve_join) = RateValve::spawn(valve_config, shutdown_rx.clone());
    let target = registry
        .lookup(WORKER_NAME)
        .map_err(|e| anyhow::anyhow!("Worker lookup failed: {}", e))?;
    valve
        .set_target(Some(target))
        .map_err(|e| anyhow::anyhow!("Valve target binding failed: {}", e))?;

    // 6. Start the inbound bridge, relaying into the valve
    let (inlet_addr, _inlet_join) = valve.inlet(DEFAULT_MAILBOX_CAPACITY);
    let consumers = ConsumerSystem::new(Arc::clone(&broker), time_provider);
    let consumer = consumers
        .start(ConsumerConfig {
            group_id: config.group_id.clone(),
            broker_url: config.broker_url.clone(),
            topics: config.topics.clone(),
            relay_target: Some(inlet_addr),
        })
        .await
        .map_err(|e| anyhow::anyhow!("Consumer start failed: {}", e))?;

    // 7. Start the outbound bridge
    let producers = ProducerSystem::new(Arc::clone(&broker));
    producers
        .start(ProducerConfig {
            broker_url: config.broker_url.clone(),
            producer_name: PRODUCER_NAME.to_string(),
        })
        .map_err(|e| anyhow::anyhow!("Producer start failed: {}", e))?;

    info!("System ready. Waiting for work...");
    info!("Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Draining...");

    // 9. Graceful shutdown: bridges drain first, then the pipeline stops
    let report = consumer.stop(SHUTDOWN_GRACE).await;
    info!(
        relayed = report.relayed,
        relay_failures = report.relay_failures,
        abandoned = report.abandoned,
        "Consumer drained"
    );
    producers.stop(SHUTDOWN_GRACE).await;

    shutdown_tx.shutdown();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, worker_handle).await;

    info!("Shutdown complete.");

    Ok(())
}
