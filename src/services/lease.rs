use redis::{AsyncCommands, ExistenceCheck, SetExpiry, SetOptions};
use uuid::Uuid;

const LEASE_KEY_PREFIX: &str = "wardrobe_ai:lease:";

/// Lease TTL. Longer than the 60s handler budget so a live handler never
/// loses its lease, short enough that a crashed worker cannot wedge a job.
const LEASE_TTL_MS: u64 = 90_000;

/// Compare-and-delete so a worker can only release its own lease, never one
/// that expired and was re-acquired by somebody else.
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Per-job-id processing lease shared by all workers through Redis. At most
/// one holder per id at a time; holding it is what serializes duplicate
/// deliveries of the same job.
pub struct LeaseKeeper {
    client: redis::Client,
}

impl LeaseKeeper {
    pub fn new(redis_url: &str) -> Result<Self, LeaseError> {
        let client = redis::Client::open(redis_url).map_err(LeaseError::Redis)?;
        Ok(Self { client })
    }

    fn key(job_id: Uuid) -> String {
        format!("{LEASE_KEY_PREFIX}{job_id}")
    }

    /// Try to acquire the lease for a job id. Returns the holder token on
    /// success, `None` if another worker currently holds it.
    pub async fn acquire(&self, job_id: Uuid) -> Result<Option<String>, LeaseError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(LeaseError::Redis)?;

        let token = Uuid::new_v4().to_string();
        let opts = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::PX(LEASE_TTL_MS));
        let acquired: bool = conn
            .set_options(Self::key(job_id), &token, opts)
            .await
            .map_err(LeaseError::Redis)?;

        Ok(acquired.then_some(token))
    }

    /// Release a held lease. A no-op if the lease already expired or is
    /// held under a different token.
    pub async fn release(&self, job_id: Uuid, token: &str) -> Result<(), LeaseError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(LeaseError::Redis)?;

        redis::Script::new(RELEASE_SCRIPT)
            .key(Self::key(job_id))
            .arg(token)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(LeaseError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
