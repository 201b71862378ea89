use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:adaptive-engine.db?mode=rwc";
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;
const DEFAULT_CONFIG_RELOAD_INTERVAL_MS: u64 = 30_000;
const DEFAULT_PERSIST_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl LogRotation {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "hourly" => Some(Self::Hourly),
            "never" => Some(Self::Never),
            _ => None,
        }
    }
}

/// Where decision and persistence logs go. Stdout is always on; a log
/// directory adds a rolling file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
    pub dir: Option<PathBuf>,
    pub rotation: LogRotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub database_url: String,
    pub flush_interval: Duration,
    pub config_reload_interval: Duration,
    pub persist_timeout: Duration,
    /// Seeds a deterministic generator when set.
    pub rng_seed: Option<u64>,
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable lookup. Malformed values
    /// fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |name: &str, default: u64| {
            let ms = lookup(name)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(default);
            Duration::from_millis(ms)
        };

        Self {
            database_url: lookup("DATABASE_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            flush_interval: millis("FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL_MS),
            config_reload_interval: millis(
                "CONFIG_RELOAD_INTERVAL_MS",
                DEFAULT_CONFIG_RELOAD_INTERVAL_MS,
            ),
            persist_timeout: millis("PERSIST_TIMEOUT_MS", DEFAULT_PERSIST_TIMEOUT_MS),
            rng_seed: lookup("ENGINE_RNG_SEED").and_then(|value| value.trim().parse().ok()),
            log: LogConfig {
                filter: lookup("RUST_LOG")
                    .filter(|f| !f.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
                dir: lookup("ENGINE_LOG_DIR")
                    .filter(|dir| !dir.trim().is_empty())
                    .map(PathBuf::from),
                rotation: lookup("ENGINE_LOG_ROTATION")
                    .and_then(|value| LogRotation::parse(&value))
                    .unwrap_or_default(),
            },
        }
    }
}
