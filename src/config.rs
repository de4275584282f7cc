//! Application configuration loaded from environment variables.
//!
//! Secrets (the warehouse refresh token, the operator API key and the
//! scheduler token) are read once at startup and held in memory.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Largest chunk Firestore accepts in a single transaction.
pub const MAX_INSERT_CHUNK: usize = 500;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Remote API ---
    /// Warehouse GraphQL endpoint
    pub graphql_url: String,
    /// Token refresh endpoint
    pub token_url: String,
    /// Long-lived refresh token (the credential)
    pub refresh_token: String,

    // --- Server ---
    /// GCP project ID, or "memory" for the in-process store
    pub gcp_project_id: String,
    /// Frontend URL for CORS
    pub frontend_url: String,
    /// Server port
    pub port: u16,
    /// Bearer key required on `/api/*`
    pub operator_api_key: String,
    /// Shared secret required on `/tasks/*`
    pub scheduler_token: String,

    // --- Fetch pacing ---
    pub page_size: u32,
    pub page_delay: Duration,
    pub credit_cooldown: Duration,
    pub max_pages: u32,
    /// Wall-clock budget for one paginated fetch, if the host imposes one.
    pub fetch_deadline: Option<Duration>,
    pub deadline_margin: Duration,

    // --- Snapshots ---
    pub snapshot_poll_interval: Duration,
    pub snapshot_max_polls: u32,

    // --- Cache ---
    pub insert_chunk_size: usize,

    // --- Schedules ---
    pub schedule_poll_interval: Duration,
    pub schedule_tolerance: Duration,
    pub schedule_timezone: chrono_tz::Tz,
    /// Run the due check from an in-process ticker as well as the task route.
    pub schedule_internal_ticker: bool,

    // --- Jobs ---
    pub job_retention: Duration,
}

impl Config {
    /// Offline configuration for tests.
    pub fn test_default() -> Self {
        Self {
            graphql_url: "http://localhost:9/graphql".to_string(),
            token_url: "http://localhost:9/auth/refresh".to_string(),
            refresh_token: "test_refresh_token".to_string(),
            gcp_project_id: "memory".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            port: 8080,
            operator_api_key: "test_operator_key".to_string(),
            scheduler_token: "test_scheduler_token".to_string(),
            page_size: 100,
            page_delay: Duration::from_millis(1),
            credit_cooldown: Duration::from_millis(1),
            max_pages: 500,
            fetch_deadline: None,
            deadline_margin: Duration::from_secs(10),
            snapshot_poll_interval: Duration::from_millis(1),
            snapshot_max_polls: 60,
            insert_chunk_size: MAX_INSERT_CHUNK,
            schedule_poll_interval: Duration::from_secs(5 * 60),
            schedule_tolerance: Duration::from_secs(5 * 60),
            schedule_timezone: chrono_tz::UTC,
            schedule_internal_ticker: false,
            job_retention: Duration::from_secs(10 * 60),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let config = Self {
            graphql_url: env::var("WMS_GRAPHQL_URL")
                .unwrap_or_else(|_| "https://public-api.shiphero.com/graphql".to_string()),
            token_url: env::var("WMS_TOKEN_URL")
                .unwrap_or_else(|_| "https://public-api.shiphero.com/auth/refresh".to_string()),
            refresh_token: env::var("WMS_REFRESH_TOKEN")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("WMS_REFRESH_TOKEN"))?,

            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            port: parse_or("PORT", 8080)?,
            operator_api_key: env::var("OPERATOR_API_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("OPERATOR_API_KEY"))?,
            scheduler_token: env::var("SCHEDULER_TOKEN")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SCHEDULER_TOKEN"))?,

            page_size: parse_or("PAGE_SIZE", 100)?,
            page_delay: Duration::from_millis(parse_or("PAGE_DELAY_MS", 1000)?),
            credit_cooldown: Duration::from_millis(parse_or("CREDIT_COOLDOWN_MS", 3000)?),
            max_pages: parse_or("MAX_PAGES", 500)?,
            fetch_deadline: match env::var("FETCH_DEADLINE_SECS") {
                Ok(raw) => Some(Duration::from_secs(parse_value(
                    "FETCH_DEADLINE_SECS",
                    &raw,
                )?)),
                Err(_) => None,
            },
            deadline_margin: Duration::from_secs(parse_or("DEADLINE_MARGIN_SECS", 10)?),

            snapshot_poll_interval: Duration::from_secs(parse_or("SNAPSHOT_POLL_SECS", 30)?),
            snapshot_max_polls: parse_or("SNAPSHOT_MAX_POLLS", 60)?,

            insert_chunk_size: parse_or("INSERT_CHUNK_SIZE", MAX_INSERT_CHUNK)?,

            schedule_poll_interval: Duration::from_secs(
                60 * parse_or::<u64>("SCHEDULE_POLL_MINUTES", 5)?,
            ),
            schedule_tolerance: Duration::from_secs(
                60 * parse_or::<u64>("SCHEDULE_TOLERANCE_MINUTES", 5)?,
            ),
            schedule_timezone: parse_or("SCHEDULE_TIMEZONE", chrono_tz::UTC)?,
            schedule_internal_ticker: parse_or("SCHEDULE_INTERNAL_TICKER", false)?,

            job_retention: Duration::from_secs(60 * parse_or::<u64>("JOB_RETENTION_MINUTES", 10)?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would silently skip schedules or overflow
    /// store write limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule_tolerance < self.schedule_poll_interval {
            return Err(ConfigError::Invalid {
                name: "SCHEDULE_TOLERANCE_MINUTES",
                reason: "must be at least SCHEDULE_POLL_MINUTES".to_string(),
            });
        }
        if self.insert_chunk_size == 0 || self.insert_chunk_size > MAX_INSERT_CHUNK {
            return Err(ConfigError::Invalid {
                name: "INSERT_CHUNK_SIZE",
                reason: format!("must be between 1 and {}", MAX_INSERT_CHUNK),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                name: "PAGE_SIZE",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Whether to use the in-process store instead of Firestore.
    pub fn uses_memory_store(&self) -> bool {
        self.gcp_project_id == "memory"
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        reason: format!("cannot parse {:?}", raw),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
