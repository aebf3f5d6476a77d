use clap::Parser;
use std::time::Duration;

use crate::credentials::CredentialPool;
use crate::dispatcher::DispatcherConfig;
use crate::error::ConfigError;
use crate::rate_limit::RateLimitConfig;

// CLI argument structure; every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "chat-gateway")]
#[command(about = "Chat proxy with API key rotation and per-IP rate limiting")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "UPSTREAM_URL", default_value = "https://openrouter.ai/api/v1/chat/completions")]
    pub upstream_url: String,

    #[arg(long, env = "UPSTREAM_MODEL", default_value = "openai/gpt-3.5-turbo")]
    pub model: String,

    // Upstream API keys (comma-separated)
    #[arg(long, env = "OPENROUTER_API_KEYS", hide_env_values = true)]
    pub api_keys: Option<String>,

    // Allow starting without keys
    #[arg(long, env = "CHAT_GATEWAY_DEV", default_value_t = false)]
    pub dev: bool,

    // How long a failing key sits out
    #[arg(long, env = "KEY_COOLDOWN_SECONDS", default_value_t = 60)]
    pub cooldown_secs: u64,

    // Pause between failed attempts
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 100)]
    pub retry_delay_ms: u64,

    #[arg(long, env = "ATTEMPT_TIMEOUT_SECS", default_value_t = 15)]
    pub attempt_timeout_secs: u64,

    #[arg(long, env = "MAX_TOKENS", default_value_t = 100)]
    pub max_tokens: u32,

    #[arg(long, env = "TEMPERATURE", default_value_t = 0.5)]
    pub temperature: f32,

    // Rate limit max chat requests per window
    #[arg(long, env = "CHAT_RATE_LIMIT", default_value_t = 30)]
    pub chat_rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "RATE_WINDOW_SECS", default_value_t = 60)]
    pub rate_window: u64,

    #[arg(long, env = "CHAT_BLOCK_SECS", default_value_t = 300)]
    pub chat_block_secs: u64,

    #[arg(long, env = "RATE_LIMIT_SWEEP_PROBABILITY", default_value_t = 0.01)]
    pub sweep_probability: f64,

    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            temperature: 0.5,
        }
    }
}

impl Args {
    /// Keys from configuration. Empty is only accepted in dev mode.
    pub fn credential_pool(&self) -> Result<CredentialPool, ConfigError> {
        let pool = self
            .api_keys
            .as_deref()
            .map(CredentialPool::parse)
            .unwrap_or_default();
        if pool.is_empty() && !self.dev {
            return Err(ConfigError::NoCredentials);
        }
        Ok(pool)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            upstream_url: self.upstream_url.clone(),
            model: self.model.clone(),
            cooldown: Duration::from_secs(self.cooldown_secs),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }

    pub fn chat_rate_limit(&self) -> Result<RateLimitConfig, ConfigError> {
        if self.chat_rate_limit == 0 {
            return Err(ConfigError::Invalid {
                name: "chat-rate-limit",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(RateLimitConfig {
            window: Duration::from_secs(self.rate_window),
            max_requests: self.chat_rate_limit,
            block_duration: Duration::from_secs(self.chat_block_secs),
        })
    }

    pub fn generation(&self) -> Result<GenerationParams, ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid {
                name: "temperature",
                reason: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid {
                name: "max-tokens",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(GenerationParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        })
    }
}
