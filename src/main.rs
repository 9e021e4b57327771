mod cache;
mod codec;
mod driver;
mod error;
mod handlers;
mod models;
mod pool;
mod snmp;
mod state;
mod telnet;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::handlers::create_routes;
use crate::snmp::UdpConnector;
use crate::state::{AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("olt_gateway=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    info!(
        model = %config.olt_model,
        host = %config.olt_host,
        pool_max = config.pool_max,
        "starting OLT gateway"
    );

    let state = Arc::new(AppState::new(config.clone(), UdpConnector));

    let scheduler = JobScheduler::new()
        .await
        .context("creating job scheduler")?;
    let purge_state = Arc::clone(&state);
    let job = Job::new_async(config.cache_purge_cron.as_str(), move |_uuid, _lock| {
        let state = Arc::clone(&purge_state);
        Box::pin(async move {
            let purged = state.cache.purge_expired().await;
            if purged > 0 {
                let remaining = state.cache.len().await;
                info!(purged, remaining, "expired cache entries removed");
            }
        })
    })
    .with_context(|| format!("invalid CACHE_PURGE_CRON {:?}", config.cache_purge_cron))?;
    scheduler.add(job).await.context("scheduling cache purge")?;
    scheduler.start().await.context("starting job scheduler")?;

    let app = create_routes(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(mut client) = state.telnet.lock().await.take() {
        if let Err(e) = client.close().await {
            warn!(error = %e, "closing telnet session failed");
        }
    }
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "listening for ctrl-c failed");
    }
}
