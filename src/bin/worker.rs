use std::time::Duration;

use tokio::time::{interval, sleep};
use tracing_subscriber::EnvFilter;
use wardrobe_ai::{
    app_state::AppState,
    config::AppConfig,
    db,
    services::{
        dispatcher, gateway, lease::LeaseKeeper, provider::GenAiClient, queue::JobQueue,
        storage::AssetStore,
    },
};

const POLL_INTERVAL_MS: u64 = 1000; // 1 second
const SWEEP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting wardrobe-ai worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");
    let leases = LeaseKeeper::new(&config.redis_url).expect("Failed to initialize lease keeper");

    let assets = AssetStore::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize asset store");

    let provider = GenAiClient::new(&config.provider_api_base(), &config.cf_api_token)
        .expect("Failed to initialize Workers AI client");

    let state = AppState::new(
        db_pool,
        queue,
        leases,
        assets,
        provider,
        config.ai_enabled,
    );

    // Reconciliation sweep: closes the create-then-enqueue gap and keeps
    // the queue depth gauge current.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            match gateway::sweep_stranded(&sweep_state).await {
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "reconciliation sweep failed"),
            }
            match sweep_state.queue.queue_depth().await {
                Ok(depth) => metrics::gauge!("ai_queue_depth").set(depth as f64),
                Err(e) => tracing::warn!(error = %e, "failed to read queue depth"),
            }
        }
    });

    tracing::info!("Worker ready, starting job processing loop");

    // Main processing loop
    loop {
        match dispatcher::process_next(&state).await {
            Ok(true) => {
                // Delivery handled, check for the next one immediately
                tracing::debug!("delivery handled, checking for next");
            }
            Ok(false) => {
                // No job available, sleep before next poll
                tracing::trace!("no deliveries available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "error processing delivery, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}
