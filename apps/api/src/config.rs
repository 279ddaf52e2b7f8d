use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub telegram_bot_token: String,
    pub telegram_webhook_secret: Option<String>,
    pub anthropic_api_key: String,
    pub platform: PlatformConfig,
    pub engine: EngineConfig,
    pub port: u16,
    pub rust_log: String,
}

/// Recruitment platform endpoints and OAuth client credentials.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub api_url: String,
    pub oauth_url: String,
    pub web_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

/// Defaults applied to every user unless the user record overrides them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoApplyDefaults {
    pub max_applications_per_day: u32,
    pub cover_letter_max_length: usize,
    pub auto_apply_enabled: bool,
    pub auto_apply_interval_minutes: u32,
}

impl Default for AutoApplyDefaults {
    fn default() -> Self {
        Self {
            max_applications_per_day: 50,
            cover_letter_max_length: 2000,
            auto_apply_enabled: false,
            auto_apply_interval_minutes: 30,
        }
    }
}

/// Knobs for the orchestration engine. Immutable once built; each component
/// receives a copy through its constructor.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub defaults: AutoApplyDefaults,
    /// Global cap on cycles executing at the same time, regardless of user count.
    pub worker_pool_size: usize,
    pub max_candidates_per_cycle: u32,
    pub max_transient_retries: u32,
    pub token_safety_margin: Duration,
    pub external_call_timeout: Duration,
    pub dedup_ttl: Duration,
    /// Link target for the button attached to cycle summaries.
    pub platform_web_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            defaults: AutoApplyDefaults::default(),
            worker_pool_size: 8,
            max_candidates_per_cycle: 20,
            max_transient_retries: 3,
            token_safety_margin: Duration::from_secs(60),
            external_call_timeout: Duration::from_secs(30),
            dedup_ttl: Duration::from_secs(90 * 24 * 60 * 60),
            platform_web_url: "https://hh.ru".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let platform = PlatformConfig {
            api_url: env_or("PLATFORM_API_URL", "https://api.hh.ru".to_string())?,
            oauth_url: env_or("PLATFORM_OAUTH_URL", "https://hh.ru/oauth".to_string())?,
            web_url: env_or("PLATFORM_WEB_URL", "https://hh.ru".to_string())?,
            client_id: require_env("PLATFORM_CLIENT_ID")?,
            client_secret: require_env("PLATFORM_CLIENT_SECRET")?,
            user_agent: env_or(
                "PLATFORM_USER_AGENT",
                format!("autoapply/{}", env!("CARGO_PKG_VERSION")),
            )?,
        };

        let defaults = AutoApplyDefaults {
            max_applications_per_day: env_or("MAX_APPLICATIONS_PER_DAY", 50)?,
            cover_letter_max_length: env_or("COVER_LETTER_MAX_LENGTH", 2000)?,
            auto_apply_enabled: env_or("AUTO_APPLY_ENABLED", false)?,
            auto_apply_interval_minutes: env_or("AUTO_APPLY_INTERVAL_MINUTES", 30)?,
        };

        let engine = EngineConfig {
            defaults,
            worker_pool_size: env_or("WORKER_POOL_SIZE", 8usize)?.max(1),
            max_candidates_per_cycle: env_or("MAX_CANDIDATES_PER_CYCLE", 20)?,
            max_transient_retries: env_or("MAX_TRANSIENT_RETRIES", 3)?,
            token_safety_margin: Duration::from_secs(env_or("TOKEN_SAFETY_MARGIN_SECS", 60)?),
            external_call_timeout: Duration::from_secs(env_or("EXTERNAL_CALL_TIMEOUT_SECS", 30)?),
            dedup_ttl: dedup_ttl(env_or("DEDUP_TTL_DAYS", 90)?)?,
            platform_web_url: platform.web_url.clone(),
        };

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            telegram_bot_token: require_env("TELEGRAM_BOT_TOKEN")?,
            telegram_webhook_secret: std::env::var("TELEGRAM_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            platform,
            engine,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Reads `key` and parses it, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value")),
        _ => Ok(default),
    }
}

/// Upper bound on marker retention; larger values overflow instant arithmetic.
const MAX_DEDUP_TTL_DAYS: u64 = 36_500;

fn dedup_ttl(days: u64) -> Result<Duration> {
    if days > MAX_DEDUP_TTL_DAYS {
        anyhow::bail!("DEDUP_TTL_DAYS must be at most {MAX_DEDUP_TTL_DAYS}, got {days}");
    }
    Ok(Duration::from_secs(days * 24 * 60 * 60))
}
