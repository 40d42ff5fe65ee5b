//! News ingest service: binary entrypoint.
//! Loads config, wires the ingest context, starts the tier scheduler in the
//! background and serves the read API through Shuttle.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_news_ingest::{
    api, config::load_config_default, ingest::PriorityScheduler, metrics::Metrics, IngestContext,
};

/// `RUST_LOG` filter (default `market_news_ingest=info,warn`), compact output,
/// JSON when `LOG_FORMAT=json`. Safe to call when a subscriber already exists.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_news_ingest=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = load_config_default()?;

    let metrics = match Metrics::init(config.cache.ttl_secs) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = ?e, "metrics disabled");
            None
        }
    };

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(IngestContext::from_config(config, shutdown.clone()).await?);

    let scheduler = PriorityScheduler::from_config(&ctx.config().scheduler, ctx.clone());
    // Runs for the lifetime of the service; the token is cancelled on ctrl-c
    // and in-flight tier runs are drained before the signal task exits.
    let scheduler = scheduler.spawn(shutdown.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
            match scheduler.await {
                Ok(()) => tracing::info!("scheduler drained"),
                Err(e) => tracing::warn!(error = ?e, "scheduler task ended abnormally"),
            }
        }
    });

    let mut router = api::router(ctx);
    if let Some(m) = &metrics {
        router = router.merge(m.router());
    }

    Ok(router.into())
}
