use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub ssrf_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub tokens: Vec<String>,
    pub session_ttl_seconds: u64,
    pub max_failures: u32,
    pub backoff_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub public_rps: f64,
    pub public_burst: u32,
    pub protected_rps: f64,
    pub protected_burst: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub max_attempts: u32,
    pub max_age_hours: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub reconcile_on_start: bool,
}

/// Outcome distribution for the deterministic mock providers.
///
/// Percentages are cumulative thresholds over a 0..100 roll; per-channel
/// seeds override the global seed so scenarios stay reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub timeout_pct: u32,
    pub error_pct: u32,
    pub ratelimit_pct: u32,
    pub seed: Option<u64>,
    pub sms_seed: Option<u64>,
    pub email_seed: Option<u64>,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
                log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                ssrf_allowlist: csv(
                    &env::var("SSRF_ALLOWLIST").unwrap_or_else(|_| "example.com".to_string()),
                ),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            auth: AuthConfig {
                enabled: env::var("AUTH_ENABLED")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
                tokens: csv(&env::var("AUTH_TOKENS").unwrap_or_default()),
                session_ttl_seconds: parse_or("AUTH_SESSION_TTL_SECONDS", 3600),
                max_failures: parse_or("AUTH_MAX_FAILURES", 5) as u32,
                backoff_seconds: parse_or("AUTH_BACKOFF_SECONDS", 2),
            },
            rate_limit: RateLimitConfig {
                public_rps: env::var("RATE_LIMIT_PUBLIC_RPS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5.0),
                public_burst: parse_or("RATE_LIMIT_PUBLIC_BURST", 10) as u32,
                protected_rps: env::var("RATE_LIMIT_PROTECTED_RPS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2.0),
                protected_burst: parse_or("RATE_LIMIT_PROTECTED_BURST", 5) as u32,
            },
            queue: QueueConfig {
                capacity: parse_or("QUEUE_CAPACITY", 1024) as usize,
            },
            worker: WorkerConfig {
                max_attempts: parse_or("WORKER_MAX_ATTEMPTS", 10) as u32,
                max_age_hours: parse_or("WORKER_MAX_AGE_HOURS", 72),
                backoff_base_ms: parse_or("WORKER_BACKOFF_BASE_MS", 200),
                backoff_cap_ms: parse_or("WORKER_BACKOFF_CAP_MS", 5000),
                reconcile_on_start: env::var("RECONCILE_ON_START")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            },
            provider: ProviderConfig {
                timeout_pct: parse_or("PROVIDER_TIMEOUT_PCT", 0) as u32,
                error_pct: parse_or("PROVIDER_ERROR_PCT", 0) as u32,
                ratelimit_pct: parse_or("PROVIDER_RATELIMIT_PCT", 0) as u32,
                seed: seed_var("PROVIDER_SEED"),
                sms_seed: seed_var("PROVIDER_SMS_SEED"),
                email_seed: seed_var("PROVIDER_EMAIL_SEED"),
            },
        }
    }
}

fn parse_or(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn seed_var(key: &str) -> Option<u64> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

fn csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
