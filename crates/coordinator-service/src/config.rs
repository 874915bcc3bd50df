//! Environment-sourced configuration, matching the teacher's
//! `RunnerConfig::from_env` convention rather than a config-file layer.

use std::time::Duration;

use coordinator_store::GroupCap;

pub struct Config {
    pub database_url: String,
    pub poll_interval: Duration,
    pub dispatch_global_cap: GroupCap,
    pub worker_count: Option<usize>,
    pub visibility_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub metadata_cleanup_interval: Duration,
    pub metadata_retention: chrono::Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable required"))?;

        Ok(Self {
            database_url,
            poll_interval: Duration::from_millis(env_parse("POLL_INTERVAL_MS", 2_000)),
            dispatch_global_cap: match std::env::var("DISPATCH_GLOBAL_CAP").ok() {
                Some(raw) if raw.eq_ignore_ascii_case("unbounded") => GroupCap::Unbounded,
                Some(raw) => GroupCap::Bounded(raw.parse().unwrap_or(100)),
                None => GroupCap::Unbounded,
            },
            worker_count: std::env::var("WORKER_COUNT").ok().and_then(|v| v.parse().ok()),
            visibility_timeout: Duration::from_secs(env_parse("VISIBILITY_TIMEOUT_SECS", 20 * 60)),
            shutdown_timeout: Duration::from_secs(env_parse("SHUTDOWN_TIMEOUT_SECS", 30)),
            metadata_cleanup_interval: Duration::from_secs(env_parse(
                "METADATA_CLEANUP_INTERVAL_SECS",
                3_600,
            )),
            metadata_retention: chrono::Duration::seconds(env_parse(
                "METADATA_RETENTION_SECS",
                7 * 24 * 3_600,
            )),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `CHAIN_SHARP_POSTGRES_LOG_LEVEL` overrides whatever `RUST_LOG` or the
/// configured default would resolve to.
pub fn resolve_log_filter() -> String {
    if let Ok(level) = std::env::var("CHAIN_SHARP_POSTGRES_LOG_LEVEL") {
        return format!("coordinator_service={level},coordinator_engine={level},coordinator_store={level}");
    }
    std::env::var("RUST_LOG").unwrap_or_else(|_| "coordinator_service=info,coordinator_engine=info".into())
}
