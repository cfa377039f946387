// Pool payment processor
//
// One payment scheduler per enabled pool, each with its own daemon client and
// Redis store, plus a Prometheus endpoint.

use anyhow::{Context, Result};
use axum::{http::{header, StatusCode}, response::IntoResponse, routing::get};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use pool_payments::blockchain::DaemonRpcClient;
use pool_payments::config::{PaymentsConfig, PoolConfig};
use pool_payments::metrics::prometheus as metrics;
use pool_payments::payout::{setup_pool, PaymentProcessor, PaymentScheduler, RecoveryJournal};
use pool_payments::store::RedisStore;

async fn api_metrics() -> impl IntoResponse {
    let body = metrics::render();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

async fn api_health() -> &'static str {
    "ok"
}

async fn start_pool(cfg: Arc<PaymentsConfig>, coin: String, pool: PoolConfig) -> Result<PaymentScheduler> {
    let daemon = Arc::new(DaemonRpcClient::new(&coin, &pool.daemon));
    let redis_url = pool.redis_url(&cfg.redis_url).to_string();
    let store = Arc::new(RedisStore::new(
        &coin,
        &redis_url,
        Duration::from_secs(cfg.store_timeout_secs),
    )?);
    if let Err(e) = store.ping().await {
        tracing::warn!(coin = %coin, "redis not reachable yet ({}), cycles will retry", e);
    }

    let journal = RecoveryJournal::new(&cfg.recovery_dir, &coin);
    let ctx = setup_pool(&coin, &pool, daemon.as_ref(), &journal).await?;

    tracing::info!(
        coin = %coin,
        "Payment processing setup to run every {}s with daemon ({}@{}:{}) and redis ({})",
        ctx.payment_interval.as_secs(),
        pool.daemon.user.as_deref().unwrap_or(""),
        pool.daemon.host,
        pool.daemon.port,
        redis_url
    );

    let processor = Arc::new(PaymentProcessor::new(ctx, daemon, store, journal));
    Ok(PaymentScheduler::new(processor))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("could not register SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl+C, shutting down");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cfg = Arc::new(PaymentsConfig::load()?);
    std::fs::create_dir_all(&cfg.recovery_dir)
        .with_context(|| format!("cannot create recovery dir {}", cfg.recovery_dir.display()))?;

    let mut setups = JoinSet::new();
    for (coin, pool) in cfg.enabled_pools() {
        let (cfg, coin, pool) = (cfg.clone(), coin.clone(), pool.clone());
        setups.spawn(async move {
            let res = start_pool(cfg, coin.clone(), pool).await;
            (coin, res)
        });
    }

    let mut schedulers = Vec::new();
    while let Some(joined) = setups.join_next().await {
        match joined {
            Ok((_, Ok(scheduler))) => schedulers.push(scheduler),
            Ok((coin, Err(e))) => {
                tracing::error!(coin = %coin, "payment processing not started: {:#}", e);
            }
            Err(e) => tracing::error!("pool setup task failed: {}", e),
        }
    }
    if schedulers.is_empty() {
        tracing::warn!("no pool passed payment setup, only serving metrics");
    }

    let handles: Vec<_> = schedulers.iter().map(PaymentScheduler::start).collect();

    let api = axum::Router::new()
        .route("/health", get(api_health))
        .route("/metrics", get(api_metrics));
    let listener = tokio::net::TcpListener::bind(&cfg.metrics_listen)
        .await
        .with_context(|| format!("cannot bind metrics listener {}", cfg.metrics_listen))?;

    tracing::info!("📡 Payments metrics listening on {}", cfg.metrics_listen);
    axum::serve(listener, api)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for scheduler in &schedulers {
        scheduler.stop();
    }
    for handle in handles {
        let _ = handle.await;
    }
    for scheduler in &schedulers {
        if !scheduler.wait_idle(Duration::from_secs(60)).await {
            tracing::warn!(coin = %scheduler.coin(), "payment cycle still running at shutdown");
        }
    }

    tracing::info!("🏁 Payment processor shut down cleanly");
    Ok(())
}
