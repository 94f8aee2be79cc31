//! Queue retry/backoff and lease properties against a real Redis.
//!
//! Requires a running Redis instance; set REDIS_URL to override the
//! default (redis://localhost:6379).
//!
//! Run with: cargo test --test retry_test -- --ignored

use std::time::{Duration, Instant};

use tokio::time::sleep;
use uuid::Uuid;
use wardrobe_ai::models::job::JobKind;
use wardrobe_ai::services::lease::LeaseKeeper;
use wardrobe_ai::services::queue::{DeliveryOutcome, JobQueue};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// Drain deliveries until one matches `job_id`, so concurrent test runs
/// sharing the queue do not interfere. Foreign deliveries are pushed back
/// via defer with a long delay.
async fn dequeue_own(
    queue: &JobQueue,
    job_id: Uuid,
    wait: Duration,
) -> Option<wardrobe_ai::services::queue::QueuedJob> {
    let deadline = Instant::now() + wait;
    loop {
        match queue.dequeue().await.expect("dequeue failed") {
            Some(job) if job.job_id == job_id => return Some(job),
            Some(other) => queue
                .defer(&other, Duration::from_secs(300))
                .await
                .expect("defer failed"),
            None => {
                if Instant::now() >= deadline {
                    return None;
                }
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[tokio::test]
#[ignore]
async fn test_three_attempts_with_backoff_then_exhausted() {
    let queue = JobQueue::new(&redis_url()).expect("queue init failed");
    let job_id = Uuid::new_v4();

    assert!(queue
        .enqueue(job_id, JobKind::InferItem)
        .await
        .expect("enqueue failed"));

    // Attempt 1 delivered immediately.
    let first = dequeue_own(&queue, job_id, Duration::from_secs(1))
        .await
        .expect("first delivery missing");
    assert_eq!(first.attempt, 1);

    // Failure schedules attempt 2 after >= 2s.
    let scheduled = Instant::now();
    let delay = queue
        .schedule_retry(&first)
        .await
        .expect("retry failed")
        .expect("attempt 1 must be retryable");
    assert_eq!(delay, Duration::from_secs(2));
    assert!(
        dequeue_own(&queue, job_id, Duration::from_millis(500)).await.is_none(),
        "redelivery before the backoff elapsed"
    );

    let second = dequeue_own(&queue, job_id, Duration::from_secs(5))
        .await
        .expect("second delivery missing");
    assert_eq!(second.attempt, 2);
    assert!(scheduled.elapsed() >= Duration::from_secs(2));

    // Failure schedules attempt 3 after >= 4s.
    let scheduled = Instant::now();
    let delay = queue
        .schedule_retry(&second)
        .await
        .expect("retry failed")
        .expect("attempt 2 must be retryable");
    assert_eq!(delay, Duration::from_secs(4));

    let third = dequeue_own(&queue, job_id, Duration::from_secs(8))
        .await
        .expect("third delivery missing");
    assert_eq!(third.attempt, 3);
    assert!(scheduled.elapsed() >= Duration::from_secs(4));

    // Attempt 3 failing exhausts the cap: no fourth delivery, the caller
    // acknowledges the terminal outcome explicitly.
    let exhausted = queue.schedule_retry(&third).await.expect("retry failed");
    assert!(exhausted.is_none(), "a 4th attempt was scheduled");

    queue
        .finish(&third, DeliveryOutcome::Failed)
        .await
        .expect("finish failed");
    assert!(!queue.is_live(job_id).await.expect("is_live failed"));

    assert!(
        dequeue_own(&queue, job_id, Duration::from_secs(1)).await.is_none(),
        "message redelivered after terminal acknowledgement"
    );
}

#[tokio::test]
#[ignore]
async fn test_enqueue_is_idempotent_while_live() {
    let queue = JobQueue::new(&redis_url()).expect("queue init failed");
    let job_id = Uuid::new_v4();

    assert!(queue
        .enqueue(job_id, JobKind::ExtractLabel)
        .await
        .expect("enqueue failed"));
    // Retried submissions are no-ops while the message is live.
    for _ in 0..5 {
        assert!(!queue
            .enqueue(job_id, JobKind::ExtractLabel)
            .await
            .expect("enqueue failed"));
    }

    let delivery = dequeue_own(&queue, job_id, Duration::from_secs(1))
        .await
        .expect("delivery missing");
    // Still live while in-flight.
    assert!(!queue
        .enqueue(job_id, JobKind::ExtractLabel)
        .await
        .expect("enqueue failed"));

    queue
        .finish(&delivery, DeliveryOutcome::Completed)
        .await
        .expect("finish failed");

    // After the terminal acknowledgement the id may be enqueued again.
    assert!(queue
        .enqueue(job_id, JobKind::ExtractLabel)
        .await
        .expect("enqueue failed"));
    let delivery = dequeue_own(&queue, job_id, Duration::from_secs(1))
        .await
        .expect("delivery missing");
    queue
        .finish(&delivery, DeliveryOutcome::Completed)
        .await
        .expect("finish failed");
}

#[tokio::test]
#[ignore]
async fn test_concurrent_enqueues_create_one_live_message() {
    let queue = std::sync::Arc::new(JobQueue::new(&redis_url()).expect("queue init failed"));
    let job_id = Uuid::new_v4();

    let attempts = (0..8).map(|_| {
        let queue = queue.clone();
        async move { queue.enqueue(job_id, JobKind::InferItem).await.expect("enqueue failed") }
    });
    let results = futures::future::join_all(attempts).await;

    assert_eq!(
        results.iter().filter(|created| **created).count(),
        1,
        "exactly one concurrent enqueue must win"
    );

    let delivery = dequeue_own(&queue, job_id, Duration::from_secs(1))
        .await
        .expect("delivery missing");
    assert!(
        dequeue_own(&queue, job_id, Duration::from_millis(300)).await.is_none(),
        "a second delivery exists for the same id"
    );
    queue
        .finish(&delivery, DeliveryOutcome::Completed)
        .await
        .expect("finish failed");
}

#[tokio::test]
#[ignore]
async fn test_lease_serializes_holders() {
    let leases = LeaseKeeper::new(&redis_url()).expect("lease init failed");
    let job_id = Uuid::new_v4();

    let token = leases
        .acquire(job_id)
        .await
        .expect("acquire failed")
        .expect("first acquire must succeed");

    // A second worker is refused while the lease is held.
    assert!(leases.acquire(job_id).await.expect("acquire failed").is_none());

    // Releasing with a stale token is a no-op.
    leases
        .release(job_id, "not-the-token")
        .await
        .expect("release failed");
    assert!(leases.acquire(job_id).await.expect("acquire failed").is_none());

    // Releasing with the holder token frees the id.
    leases.release(job_id, &token).await.expect("release failed");
    let token2 = leases
        .acquire(job_id)
        .await
        .expect("acquire failed")
        .expect("acquire after release must succeed");
    leases.release(job_id, &token2).await.expect("release failed");
}

#[tokio::test]
#[ignore]
async fn test_defer_redelivers_same_attempt() {
    let queue = JobQueue::new(&redis_url()).expect("queue init failed");
    let job_id = Uuid::new_v4();

    assert!(queue
        .enqueue(job_id, JobKind::GenerateOutfit)
        .await
        .expect("enqueue failed"));

    let delivery = dequeue_own(&queue, job_id, Duration::from_secs(1))
        .await
        .expect("delivery missing");

    queue
        .defer(&delivery, Duration::from_secs(1))
        .await
        .expect("defer failed");

    let redelivered = dequeue_own(&queue, job_id, Duration::from_secs(3))
        .await
        .expect("deferred delivery missing");
    // Deferral is not a failed attempt; the counter is unchanged.
    assert_eq!(redelivered.attempt, delivery.attempt);

    queue
        .finish(&redelivered, DeliveryOutcome::Completed)
        .await
        .expect("finish failed");
}
