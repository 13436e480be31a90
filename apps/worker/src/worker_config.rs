use std::time::Duration;

use leasewarden_core::{AppError, AppResult};

/// Backing engine used for lease rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStoreBackend {
    /// PostgreSQL `leases` table.
    Postgres {
        /// Connection string.
        database_url: String,
    },
    /// Redis keys under a prefix.
    Redis {
        /// Connection string.
        redis_url: String,
        /// Key prefix for lease rows.
        key_prefix: String,
    },
    /// Process-local store; only coordinates tasks inside this process.
    Memory,
}

/// Runtime configuration for the sync worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub backend: LeaseStoreBackend,
    pub worker_id: String,
    pub lease_id: String,
    pub lease_duration: Duration,
    pub interval: Duration,
    pub min_interval: Option<Duration>,
    pub sync_endpoint_url: String,
    pub sync_shared_secret: Option<String>,
}

impl WorkerConfig {
    /// Loads configuration from process environment variables.
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which returns a variable's value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let optional = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let required = |name: &str| {
            optional(name).ok_or_else(|| AppError::Validation(format!("{name} is required")))
        };
        let parse_u64 = |name: &str, default: u64| match optional(name) {
            Some(value) => value.parse::<u64>().map_err(|error| {
                AppError::Validation(format!("invalid {name} value '{value}': {error}"))
            }),
            None => Ok(default),
        };

        let backend = match optional("LEASE_STORE_BACKEND")
            .unwrap_or_else(|| "postgres".to_owned())
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" => LeaseStoreBackend::Postgres {
                database_url: required("DATABASE_URL")?,
            },
            "redis" => LeaseStoreBackend::Redis {
                redis_url: required("REDIS_URL")?,
                key_prefix: optional("REDIS_LEASE_KEY_PREFIX")
                    .unwrap_or_else(|| "leasewarden:lease".to_owned()),
            },
            "memory" => LeaseStoreBackend::Memory,
            other => {
                return Err(AppError::Validation(format!(
                    "unknown LEASE_STORE_BACKEND '{other}', expected postgres, redis or memory"
                )));
            }
        };

        let worker_id =
            optional("WORKER_ID").unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let lease_id = optional("SYNC_LEASE_ID").unwrap_or_else(|| "external-sync".to_owned());
        let lease_seconds = parse_u64("SYNC_LEASE_SECONDS", 30)?;
        let interval_ms = parse_u64("SYNC_INTERVAL_MS", 15_000)?;
        let min_interval_seconds = parse_u64("SYNC_MIN_INTERVAL_SECONDS", 0)?;
        let sync_endpoint_url = required("SYNC_ENDPOINT_URL")?;
        let sync_shared_secret = optional("SYNC_SHARED_SECRET");

        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "SYNC_LEASE_SECONDS must be greater than zero".to_owned(),
            ));
        }

        if interval_ms == 0 {
            return Err(AppError::Validation(
                "SYNC_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            backend,
            worker_id,
            lease_id,
            lease_duration: Duration::from_secs(lease_seconds),
            interval: Duration::from_millis(interval_ms),
            min_interval: (min_interval_seconds > 0)
                .then(|| Duration::from_secs(min_interval_seconds)),
            sync_endpoint_url,
            sync_shared_secret,
        })
    }
}
