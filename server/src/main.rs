//! Orderflow service binary.
//!
//! Wires the saga to its backends leaves-first (durable store, inventory
//! cache, event bus, inventory coordinator, saga coordinator), then runs the
//! HTTP listener alongside the background tasks: the payment-result consumer
//! loop, the inventory mirror worker, the reconciliation sweep, and (in
//! development) the mock payment worker.

mod config;
mod error;
mod handlers;
mod payment_worker;
mod router;
mod state;

use crate::config::{Config, Environment};
use crate::state::AppInventory;
use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use orderflow_postgres::{PgEventLedger, PgInventoryStore, PgOrderStore, PgProductStore};
use orderflow_redis::RedisInventoryCache;
use orderflow_redpanda::{EventConsumer, RedpandaEventBus};
use orderflow_saga::{SagaConfig, SagaCoordinator, mirror_channel, run_mirror_worker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Capacity of the cache-to-store mirror queue.
const MIRROR_QUEUE_CAPACITY: usize = 4096;

/// Cadence of the cache/store reconciliation sweep.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Grace period for background tasks after the listener stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(config.environment);

    tracing::info!(
        port = config.port,
        env = ?config.environment,
        kafka_topic = %config.kafka_topic,
        order_timeout_secs = config.order_timeout.as_secs(),
        payment_timeout_secs = config.payment_timeout.as_secs(),
        jaeger = config.jaeger_endpoint.as_deref().unwrap_or("disabled"),
        "starting orderflow"
    );

    if let Some(port) = config.prometheus_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("failed to start prometheus exporter")?;
        tracing::info!(port = port, "prometheus exporter listening");
    }

    // Backends, leaves first.
    let pool = orderflow_postgres::connect(&config.database_url).await?;
    orderflow_postgres::run_migrations(&pool).await?;

    let products = Arc::new(PgProductStore::new(pool.clone()));
    let orders = Arc::new(PgOrderStore::new(pool.clone()));
    let ledger = Arc::new(PgEventLedger::new(pool.clone()));
    let inventory_store = Arc::new(PgInventoryStore::new(pool.clone()));

    let cache = Arc::new(
        RedisInventoryCache::connect(
            &config.redis_addr,
            config.redis_password.as_deref(),
            config.redis_db,
        )
        .await?,
    );

    let bus = Arc::new(
        RedpandaEventBus::builder()
            .brokers(config.kafka_brokers.as_str())
            .topic(config.kafka_topic.as_str())
            .build()?,
    );

    let (mirror_tx, mirror_rx) = mirror_channel(MIRROR_QUEUE_CAPACITY);
    let inventory: AppInventory =
        AppInventory::new(Arc::clone(&cache), Arc::clone(&inventory_store), mirror_tx);

    // A cold cache is survivable: reservations fall back to the row-locked
    // store until the next sweep seeds it.
    if let Err(e) = inventory.seed_cache().await {
        tracing::warn!(error = %e, "cache seeding failed; serving from the durable store");
    }

    let saga = Arc::new(SagaCoordinator::new(
        products,
        orders,
        ledger,
        inventory.clone(),
        Arc::clone(&bus),
        SagaConfig { reservation_deadline: config.order_timeout, ..SagaConfig::default() },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mirror_handle = tokio::spawn(run_mirror_worker(Arc::clone(&inventory_store), mirror_rx));
    let reconcile_handle =
        tokio::spawn(run_reconciliation(inventory.clone(), shutdown_rx.clone()));

    let consumer = EventConsumer::new(
        &config.kafka_brokers,
        &config.kafka_consumer_group,
        &config.kafka_topic,
    )?;
    let saga_for_consumer = Arc::clone(&saga);
    let consumer_handle = tokio::spawn(consumer.run(
        move |envelope| {
            let saga = Arc::clone(&saga_for_consumer);
            async move { saga.handle_event(envelope).await }
        },
        shutdown_rx.clone(),
    ));

    let worker_handle = if config.payment_worker_enabled {
        let worker_consumer = EventConsumer::new(
            &config.kafka_brokers,
            &format!("{}-payment-worker", config.kafka_consumer_group),
            &config.kafka_topic,
        )?;
        tracing::info!("mock payment worker enabled");
        Some(tokio::spawn(payment_worker::run(
            Arc::clone(&bus),
            worker_consumer,
            config.payment_timeout,
            shutdown_rx.clone(),
        )))
    } else {
        None
    };

    let app = router::router(Arc::clone(&saga));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(addr = %listener.local_addr()?, "http listener ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received, draining");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // The consumer loops finish their in-flight handler (through the ledger
    // insert) before exiting; anything interrupted earlier is simply
    // redelivered on restart.
    let drain = async {
        let _ = consumer_handle.await;
        if let Some(handle) = worker_handle {
            let _ = handle.await;
        }
        let _ = reconcile_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("background tasks did not drain within the grace period");
    }

    // Dropping the saga releases the last mirror sender so the worker drains
    // its queue and exits.
    drop(saga);
    drop(inventory);
    if tokio::time::timeout(Duration::from_secs(5), mirror_handle).await.is_err() {
        tracing::warn!("mirror worker did not drain within the grace period");
    }

    tracing::info!("orderflow stopped");
    Ok(())
}

fn init_tracing(environment: Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match environment {
        Environment::Production => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        },
        Environment::Development => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        },
    }
}

/// Periodically reset the cache to durable-store values, bounding the age of
/// any drift left by failed mirrors or releases.
async fn run_reconciliation(inventory: AppInventory, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; startup already seeded.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = ticker.tick() => {
                match inventory.reconcile().await {
                    Ok(report) if report.discrepancies > 0 => {
                        tracing::info!(
                            products = report.products,
                            discrepancies = report.discrepancies,
                            "reconciliation sweep repaired drift"
                        );
                    },
                    Ok(_) => tracing::debug!("reconciliation sweep clean"),
                    Err(e) => tracing::warn!(error = %e, "reconciliation sweep failed"),
                }
            },
        }
    }
    tracing::debug!("reconciliation task exiting");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::warn!("failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
