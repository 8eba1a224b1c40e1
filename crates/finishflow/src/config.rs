use crate::jobs::retry::RetryConfig;
use crate::jobs::runner::RunnerConfig;

/// Runtime configuration, read once from the environment (and `.env` when present).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub lease_seconds: i64,
    pub sweep_interval_ms: u64,
    pub batch_size: usize,
    pub run_once: bool,
    pub admin_addr: Option<String>,
    pub admin_token: Option<String>,
    pub director_token: Option<String>,
    pub migrate_on_startup: bool,
    pub default_max_attempts: i32,
    pub retry: RetryConfig,
    pub recipient_concurrency: usize,
    pub handler_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("FINISHFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let lease_seconds = env_parse("FINISHFLOW_LEASE_SECONDS", "LEASE_SECONDS")
            .unwrap_or(60_i64)
            .max(1);

        let sweep_interval_ms = env_parse("FINISHFLOW_SWEEP_INTERVAL_MS", "SWEEP_INTERVAL_MS")
            .unwrap_or(1_000_u64)
            .max(50);

        let batch_size = env_parse("FINISHFLOW_BATCH_SIZE", "BATCH_SIZE")
            .unwrap_or(16_usize)
            .clamp(1, 256);

        let run_once = env_bool("FINISHFLOW_RUN_ONCE").unwrap_or(false);

        let admin_addr = env_or_fallback("FINISHFLOW_ADMIN_ADDR", "ADMIN_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let admin_token = env_or_fallback("FINISHFLOW_ADMIN_TOKEN", "ADMIN_TOKEN");
        let director_token = env_or_fallback("FINISHFLOW_DIRECTOR_TOKEN", "DIRECTOR_TOKEN");

        let migrate_on_startup = env_bool("FINISHFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let default_max_attempts = env_parse("FINISHFLOW_MAX_ATTEMPTS", "MAX_ATTEMPTS")
            .unwrap_or(5_i32)
            .max(1);

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            base_seconds: env_parse("FINISHFLOW_RETRY_BASE_SECONDS", "RETRY_BASE_SECONDS")
                .unwrap_or(defaults.base_seconds)
                .max(0),
            max_seconds: env_parse("FINISHFLOW_RETRY_MAX_SECONDS", "RETRY_MAX_SECONDS")
                .unwrap_or(defaults.max_seconds)
                .max(0),
            jitter_pct: jitter_pct(
                env_parse("FINISHFLOW_RETRY_JITTER_PCT", "RETRY_JITTER_PCT"),
                defaults.jitter_pct,
            ),
        };

        let recipient_concurrency =
            env_parse("FINISHFLOW_RECIPIENT_CONCURRENCY", "RECIPIENT_CONCURRENCY")
                .unwrap_or(4_usize)
                .clamp(1, 64);

        let handler_timeout_ms = env_parse("FINISHFLOW_HANDLER_TIMEOUT_MS", "HANDLER_TIMEOUT_MS")
            .unwrap_or(30_000_u64)
            .max(100);

        Ok(Self {
            database_url,
            worker_id,
            lease_seconds,
            sweep_interval_ms,
            batch_size,
            run_once,
            admin_addr,
            admin_token,
            director_token,
            migrate_on_startup,
            default_max_attempts,
            retry,
            recipient_concurrency,
            handler_timeout_ms,
        })
    }

    pub fn runner(&self) -> RunnerConfig {
        RunnerConfig {
            lease: chrono::Duration::seconds(self.lease_seconds),
            batch_size: self.batch_size,
            retry: self.retry.clone(),
        }
    }

    pub fn handler_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.handler_timeout_ms)
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T: std::str::FromStr>(primary: &str, fallback: &str) -> Option<T> {
    env_or_fallback(primary, fallback).and_then(|s| s.trim().parse().ok())
}

/// `NaN` and infinities parse as `f64` but fall back to the default.
fn jitter_pct(raw: Option<f64>, default: f64) -> f64 {
    raw.filter(|v| v.is_finite())
        .unwrap_or(default)
        .clamp(0.0, 1.0)
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
