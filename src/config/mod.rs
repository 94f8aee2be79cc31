use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue and processing leases
    pub redis_url: String,

    /// Cloudflare account ID
    pub cf_account_id: String,

    /// Cloudflare Workers AI API token
    pub cf_api_token: String,

    /// Override for the Workers AI run endpoint (tests point this at a stub)
    pub cf_api_base: Option<String>,

    /// Global switch for AI processing; submissions 503 while disabled
    #[serde(default = "default_ai_enabled")]
    pub ai_enabled: bool,

    /// R2 bucket holding wardrobe image assets
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_ai_enabled() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Account-scoped Workers AI run endpoint.
    pub fn provider_api_base(&self) -> String {
        self.cf_api_base.clone().unwrap_or_else(|| {
            format!(
                "https://api.cloudflare.com/client/v4/accounts/{}/ai/run",
                self.cf_account_id
            )
        })
    }
}
