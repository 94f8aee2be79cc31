//! Dispatcher tests against real PostgreSQL and Redis, with the generation
//! provider and the asset store replaced by local HTTP stubs.
//!
//! Requires DATABASE_URL and REDIS_URL (plus the usual provider/storage
//! variables for config loading; their values are not used).
//!
//! Run with: cargo test --test dispatcher_test -- --ignored

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::{Json, Router};
use sqlx::PgPool;
use tokio::time::sleep;
use uuid::Uuid;
use wardrobe_ai::{
    app_state::AppState,
    config::AppConfig,
    db::{self, job_queries},
    models::job::{JobKind, JobRecord, JobStatus},
    services::{
        dispatcher, gateway,
        lease::LeaseKeeper,
        provider::{GenAiClient, VISION_MODEL},
        queue::JobQueue,
        storage::AssetStore,
    },
};

/// The full per-delivery path: dequeue, lease, transition, handler with the
/// provider call, outcome reconciliation. Two phases share the queue
/// sequentially so one phase's stub never serves the other's deliveries.
#[tokio::test]
#[ignore]
async fn test_dispatcher_settles_jobs_end_to_end() {
    let asset_base = spawn_stub(Router::new().fallback(|| async { &b"not-a-real-jpeg"[..] })).await;

    // Phase 1: the provider rejects every attempt. The job retries with
    // backoff and lands failed after exactly 3 attempts.
    let rejecting = spawn_stub(json_responder(
        StatusCode::BAD_REQUEST,
        serde_json::json!({ "errors": [{ "message": "image could not be decoded" }] }),
    ))
    .await;
    let state = build_state(&rejecting, &asset_base).await;
    let item_id = insert_item(&state.db, Some("assets/items/dispatch-fail.jpg")).await;

    let submitted = Instant::now();
    let record = gateway::submit(&state, JobKind::InferItem, Some(item_id), None, None)
        .await
        .expect("submit failed");

    let settled = drive_until_terminal(&state, record.id, Duration::from_secs(30)).await;
    assert_eq!(settled.status, JobStatus::Failed);
    assert_eq!(settled.attempts, 3);
    assert!(settled.result.is_none());
    assert!(
        submitted.elapsed() >= Duration::from_secs(6),
        "backoff delays between attempts were not observed"
    );

    let error = settled.error.expect("failed record must carry an error");
    assert_eq!(error["code"], "provider_rejected");
    assert_eq!(error["attempts"], 3);
    assert!(!state.queue.is_live(settled.id).await.expect("is_live failed"));

    // No fourth delivery exists: further polling leaves the record as is.
    let poll_until = Instant::now() + Duration::from_secs(2);
    while Instant::now() < poll_until {
        dispatcher::process_next(&state)
            .await
            .expect("process_next failed");
        sleep(Duration::from_millis(100)).await;
    }
    let after = job_queries::get_job(&state.db, settled.id)
        .await
        .expect("get failed")
        .expect("record not found");
    assert_eq!(after.status, JobStatus::Failed);
    assert_eq!(after.attempts, 3);

    // Phase 2: the provider answers with a well-formed description. The job
    // completes on the first attempt with the result and model recorded.
    let succeeding = spawn_stub(json_responder(
        StatusCode::OK,
        serde_json::json!({
            "result": {
                "description": "```json\n{\"category\":\"jacket\",\"colors\":[\"navy\"],\
                                \"seasons\":[\"fall\"],\"style_tags\":[\"casual\"],\
                                \"pattern\":null,\"material_guess\":\"wool\"}\n```"
            }
        }),
    ))
    .await;
    let state = build_state(&succeeding, &asset_base).await;
    let item_id = insert_item(&state.db, Some("assets/items/dispatch-ok.jpg")).await;

    let record = gateway::submit(&state, JobKind::InferItem, Some(item_id), None, None)
        .await
        .expect("submit failed");

    let settled = drive_until_terminal(&state, record.id, Duration::from_secs(10)).await;
    assert_eq!(settled.status, JobStatus::Completed);
    assert_eq!(settled.attempts, 1);
    assert_eq!(settled.model_name.as_deref(), Some(VISION_MODEL));
    assert!(settled.error.is_none());
    let result = settled.result.expect("completed record must carry a result");
    assert_eq!(result["attributes"]["category"], "jacket");
    assert!(!state.queue.is_live(settled.id).await.expect("is_live failed"));
}

/// Poll the dispatcher until the record settles.
async fn drive_until_terminal(state: &AppState, job_id: Uuid, wait: Duration) -> JobRecord {
    let deadline = Instant::now() + wait;
    loop {
        let worked = dispatcher::process_next(state)
            .await
            .expect("process_next failed");
        let record = job_queries::get_job(&state.db, job_id)
            .await
            .expect("get failed")
            .expect("record not found");
        if record.status.is_terminal() {
            return record;
        }
        assert!(
            Instant::now() < deadline,
            "job {job_id} did not settle within {wait:?}"
        );
        if !worked {
            sleep(Duration::from_millis(100)).await;
        }
    }
}

fn json_responder(status: StatusCode, body: serde_json::Value) -> Router {
    Router::new().fallback(move || {
        let body = body.clone();
        async move { (status, Json(body)) }
    })
}

async fn spawn_stub(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("stub bind failed");
    let addr = listener.local_addr().expect("stub addr failed");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub serve failed");
    });
    format!("http://{addr}")
}

async fn build_state(provider_base: &str, asset_base: &str) -> AppState {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize queue");
    let leases = LeaseKeeper::new(&config.redis_url).expect("Failed to initialize leases");
    let assets = AssetStore::new("wardrobe-test", asset_base, "test-access", "test-secret")
        .expect("Failed to initialize asset store");
    let provider =
        GenAiClient::new(provider_base, "test-token").expect("Failed to initialize provider client");

    AppState::new(db_pool, queue, leases, assets, provider, true)
}

async fn insert_item(pool: &PgPool, image_key: Option<&str>) -> Uuid {
    let item_id = Uuid::new_v4();
    sqlx::query("INSERT INTO items (id, name, category, image_key) VALUES ($1, $2, $3, $4)")
        .bind(item_id)
        .bind("dispatch item")
        .bind("jacket")
        .bind(image_key)
        .execute(pool)
        .await
        .expect("item insert failed");
    item_id
}
