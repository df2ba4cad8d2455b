use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_ASSIGNMENT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RELEASE_SCHEDULE: &str = "0 0 3 * * *";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Postgres URL, or `memory://` for an in-process store
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Card payload encryption
    pub field_passphrase: Secret<String>,

    // Assignment
    pub assignment_timeout_ms: u64,

    // Card release job (cron, with seconds)
    pub release_schedule: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Ok(Self {
            database_url: config.get("database_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            field_passphrase: Secret::new(config.get("field_passphrase")?),

            assignment_timeout_ms: config
                .get("assignment_timeout_ms")
                .unwrap_or(DEFAULT_ASSIGNMENT_TIMEOUT_MS),

            release_schedule: config
                .get("release_schedule")
                .unwrap_or_else(|_| DEFAULT_RELEASE_SCHEDULE.to_string()),
        })
    }

    pub fn assignment_timeout(&self) -> Duration {
        Duration::from_millis(self.assignment_timeout_ms)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.starts_with("memory://")
    }
}
