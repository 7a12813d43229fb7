use serde::Deserialize;
use std::time::Duration;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub redis: RedisConfig,
    pub openai: OpenAiConfig,
    pub polling: PollingConfig,
    pub quota: QuotaConfig,
    pub cleanup: CleanupConfig,
    pub security: SecurityConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub sentinel_enabled: bool,
    pub sentinel_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub instructions: String,
    pub assistant_name: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_factor: f64,
    pub max_wait_secs: u64,
    pub generation_retries: u32,
    pub max_message_pages: u32,
}

impl PollingConfig {
    /// Interval to wait after `current`, grown by the backoff factor and capped.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let grown = current.as_millis() as f64 * self.backoff_factor.max(1.0);
        let capped = grown.min(self.max_interval_ms as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    pub default_limit: u64,  // words sent + received
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub bcrypt_cost: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    pub max_body_size: usize,  // bytes
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::Environment::with_prefix("APP").prefix_separator("_").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    // Blank connection settings are fatal before any dependency is contacted.
    pub fn validate(&self) -> AppResult<()> {
        if self.store.backend == StoreBackend::Redis {
            if self.redis.sentinel_enabled {
                let sentinel = self.redis.sentinel_url.as_deref().unwrap_or("");
                if sentinel.trim().is_empty() {
                    return Err(AppError::Credential("No Redis sentinel URL provided!".into()));
                }
            } else if self.redis.url.trim().is_empty() {
                return Err(AppError::Credential("No Redis URL provided!".into()));
            }
        }

        if self.openai.api_key.trim().is_empty() {
            return Err(AppError::Credential("No API key provided!".into()));
        }

        if self.quota.default_limit == 0 {
            return Err(AppError::Validation("Quota limit must be positive".into()));
        }

        Ok(())
    }

    pub fn redis_url(&self) -> &str {
        match (&self.redis.sentinel_url, self.redis.sentinel_enabled) {
            (Some(url), true) => url,
            _ => &self.redis.url,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        server: ServerConfig { host: "127.0.0.1".into(), port: 0 },
        store: StoreConfig { backend: StoreBackend::Memory },
        redis: RedisConfig {
            url: "redis://127.0.0.1:6379/".into(),
            sentinel_enabled: false,
            sentinel_url: None,
        },
        openai: OpenAiConfig {
            api_key: "sk-test".into(),
            base_url: "http://127.0.0.1:9".into(),
            model: "gpt-4-1106-preview".into(),
            instructions: "You are a friendly assistant.".into(),
            assistant_name: "chat-demo".into(),
            request_timeout_secs: 5,
        },
        polling: PollingConfig {
            initial_interval_ms: 250,
            max_interval_ms: 2000,
            backoff_factor: 2.0,
            max_wait_secs: 120,
            generation_retries: 1,
            max_message_pages: 20,
        },
        quota: QuotaConfig { default_limit: 3000 },
        cleanup: CleanupConfig { max_attempts: 3, retry_delay_ms: 0 },
        security: SecurityConfig { bcrypt_cost: 4 },
        upload: UploadConfig { max_body_size: 65536 },
    }
}
