use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{
    lease::LeaseKeeper, provider::GenAiClient, queue::JobQueue, storage::AssetStore,
};

/// Shared application state, built once at startup and injected into the
/// route handlers and the worker dispatcher. Process-wide connections
/// (Postgres pool, Redis client) live here; nothing is accessed ambiently.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<JobQueue>,
    pub leases: Arc<LeaseKeeper>,
    pub assets: Arc<AssetStore>,
    pub provider: Arc<GenAiClient>,
    /// Global kill switch; submissions return 503 while disabled.
    pub ai_enabled: bool,
}

impl AppState {
    pub fn new(
        db: PgPool,
        queue: JobQueue,
        leases: LeaseKeeper,
        assets: AssetStore,
        provider: GenAiClient,
        ai_enabled: bool,
    ) -> Self {
        Self {
            db,
            queue: Arc::new(queue),
            leases: Arc::new(leases),
            assets: Arc::new(assets),
            provider: Arc::new(provider),
            ai_enabled,
        }
    }
}
