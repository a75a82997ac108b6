use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    /// Directory agent subprocesses run in.
    pub agent_workdir: String,
    /// Directory holding per-provider credential files.
    pub agent_credentials_dir: String,
    /// Hard per-invocation agent timeout, seconds.
    pub agent_timeout_secs: u64,
    /// Queue worker poll interval, milliseconds.
    pub worker_poll_interval_ms: u64,
    /// Items stuck in processing longer than this are recovered to pending.
    pub stale_claim_secs: i64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            agent_workdir: std::env::var("AGENT_WORKDIR")
                .unwrap_or_else(|_| "/tmp/agent-work".to_string()),
            agent_credentials_dir: require_env("AGENT_CREDENTIALS_DIR")?,
            agent_timeout_secs: parse_env("AGENT_TIMEOUT_SECS", 300)?,
            worker_poll_interval_ms: parse_env("WORKER_POLL_INTERVAL_MS", 2000)?,
            stale_claim_secs: parse_env("STALE_CLAIM_SECS", 1800)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .with_context(|| format!("'{key}' must be a valid number")),
        Err(_) => Ok(default),
    }
}
