mod app_state;
mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::{lease::LeaseKeeper, provider::GenAiClient, queue::JobQueue, storage::AssetStore};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing wardrobe-ai server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("ai_jobs_submitted_total", "Total AI jobs submitted, by kind");
    metrics::describe_counter!("ai_jobs_completed_total", "Total AI jobs completed");
    metrics::describe_counter!("ai_jobs_failed_total", "Total AI jobs that exhausted retries");
    metrics::describe_histogram!(
        "ai_job_processing_seconds",
        "Time to process one AI job attempt"
    );
    metrics::describe_gauge!(
        "ai_queue_depth",
        "Current number of pending deliveries in the job queue"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis job queue and lease keeper
    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");
    let leases = LeaseKeeper::new(&config.redis_url).expect("Failed to initialize lease keeper");

    // Initialize image-asset store (read-only)
    tracing::info!("Initializing R2 asset store");
    let assets = AssetStore::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize asset store");

    // Initialize Workers AI client
    tracing::info!("Initializing Workers AI client");
    let provider = GenAiClient::new(&config.provider_api_base(), &config.cf_api_token)
        .expect("Failed to initialize Workers AI client");

    if !config.ai_enabled {
        tracing::warn!("AI processing is disabled; submissions will return 503");
    }

    // Create shared application state
    let state = AppState::new(
        db_pool,
        queue,
        leases,
        assets,
        provider,
        config.ai_enabled,
    );

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/ai/jobs",
            post(routes::jobs::submit_job).get(routes::jobs::list_jobs),
        )
        .route("/api/ai/jobs/{job_id}", get(routes::jobs::get_job))
        .route(
            "/outfits/{outfit_id}/visualize",
            post(routes::outfits::visualize_outfit),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB: JSON bodies only

    tracing::info!("Starting wardrobe-ai on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
