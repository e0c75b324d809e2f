use std::future::IntoFuture;
use std::sync::Arc;

use reveal_feed::broadcast::Broadcaster;
use reveal_feed::clock::{Clock, SystemClock};
use reveal_feed::config::ServiceConfig;
use reveal_feed::generator::OsRngGenerator;
use reveal_feed::history::HistoryStore;
use reveal_feed::registry::SubscriberRegistry;
use reveal_feed::router::create_router;
use reveal_feed::scheduler::RevealScheduler;
use reveal_feed::state::AppState;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = reveal_feed::SERVICE_VERSION,
        types_version = types::LIB_VERSION,
        "Starting reveal feed service"
    );

    let config = ServiceConfig::load()?;
    tracing::info!(?config, "Configuration loaded");

    let history = Arc::new(HistoryStore::load_or_empty(
        config.history_path.clone(),
        config.history_max,
    ));
    let registry = Arc::new(SubscriberRegistry::new(config.subscriber_queue));
    let broadcaster = Arc::new(Broadcaster::new(registry));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let aligner = config.aligner();

    let scheduler = RevealScheduler::new(
        aligner,
        Arc::clone(&clock),
        Arc::new(OsRngGenerator),
        Arc::clone(&history),
        Arc::clone(&broadcaster),
        config.scheduler(),
    )
    .spawn();

    let state = AppState::new(history, broadcaster, clock, aligner)
        .with_init_history_len(config.init_history_len)
        .with_keep_alive(config.keep_alive());
    let app = create_router(state, config.static_dir.as_deref());

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    // Open event streams never finish on their own, so shutdown does not
    // wait for them.
    tokio::select! {
        served = axum::serve(listener, app).into_future() => served?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
    }

    scheduler.abort();
    Ok(())
}
