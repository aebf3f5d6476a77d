//! Upstream completion client that rotates through a pool of API keys.
//!
//! Every attempt uses the key at the front of the pool. A key that fails is
//! moved to the back and suspended for the cooldown period; a key that
//! answers is moved to the front so the next turn starts with it. A single
//! call makes at most two attempts per key, strictly one after the other.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::credentials::{CredentialPool, fingerprint};
use crate::error::UpstreamError;
use crate::metrics::{COOLDOWN_SKIPS, DISPATCH_LATENCY, UPSTREAM_ATTEMPTS};
use crate::models::{CompletionRequest, CompletionResponse, Message};

const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub upstream_url: String,
    pub model: String,
    pub cooldown: Duration,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            upstream_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "openai/gpt-3.5-turbo".to_string(),
            cooldown: Duration::from_secs(60),
            retry_delay: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

pub struct Dispatcher {
    client: reqwest::Client,
    config: DispatcherConfig,
    pool: Mutex<CredentialPool>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        client: reqwest::Client,
        config: DispatcherConfig,
        pool: CredentialPool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            config,
            pool: Mutex::new(pool),
            clock,
        }
    }

    pub fn upstream_url(&self) -> &str {
        &self.config.upstream_url
    }

    pub async fn pool_size(&self) -> usize {
        self.pool.lock().await.len()
    }

    /// Current priority order of the pool, front first.
    pub async fn pool_order(&self) -> Vec<String> {
        self.pool.lock().await.keys()
    }

    /// Returns the first non-empty reply, or `None` once the attempt budget is spent.
    pub async fn dispatch(
        &self,
        conversation: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Option<String> {
        let started = Instant::now();
        let max_attempts = self.pool_size().await * 2;

        for attempt in 1..=max_attempts {
            // The lock is never held across the network call
            let key = {
                let mut pool = self.pool.lock().await;
                let Some(key) = pool.front().map(str::to_string) else {
                    error!("no keys remaining to try");
                    break;
                };
                if pool.is_cooling(&key, self.clock.now_ms()) {
                    COOLDOWN_SKIPS.inc();
                    debug!(key = %fingerprint(&key), attempt, "key cooling down, rotating to back");
                    pool.demote(&key);
                    continue;
                }
                key
            };

            debug!(key = %fingerprint(&key), attempt, max_attempts, "trying key");
            match self.attempt(&key, conversation, max_tokens, temperature).await {
                Ok(reply) => {
                    UPSTREAM_ATTEMPTS.with_label_values(&["success"]).inc();
                    self.pool.lock().await.promote(&key);
                    DISPATCH_LATENCY.observe(started.elapsed().as_secs_f64());
                    debug!(key = %fingerprint(&key), attempt, "key answered, promoted to front");
                    return Some(reply);
                }
                Err(err) => {
                    UPSTREAM_ATTEMPTS.with_label_values(&[err.outcome()]).inc();
                    warn!(key = %fingerprint(&key), attempt, max_attempts, error = %err, "attempt failed, rotating key");
                    {
                        let mut pool = self.pool.lock().await;
                        pool.demote(&key);
                        let until = self.clock.now_ms() + self.config.cooldown.as_millis() as u64;
                        pool.cool_down(&key, until);
                    }
                    if !self.config.retry_delay.is_zero() {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        DISPATCH_LATENCY.observe(started.elapsed().as_secs_f64());
        warn!(max_attempts, "all attempts exhausted, no reply obtained");
        None
    }

    async fn attempt(
        &self,
        key: &str,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, UpstreamError> {
        let payload = CompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens,
            temperature,
        };
        tokio::time::timeout(self.config.attempt_timeout, self.call(key, &payload))
            .await
            .map_err(|_| UpstreamError::Timeout(self.config.attempt_timeout))?
    }

    async fn call(&self, key: &str, payload: &CompletionRequest<'_>) -> Result<String, UpstreamError> {
        let res = self
            .client
            .post(&self.config.upstream_url)
            .bearer_auth(key)
            .json(payload)
            .send()
            .await?;

        match res.status().as_u16() {
            200 => {
                let body: CompletionResponse = res.json().await?;
                body.reply().ok_or(UpstreamError::EmptyReply)
            }
            status @ (402 | 429) => Err(UpstreamError::rejected(status)),
            status => {
                let text = res.text().await.unwrap_or_default();
                Err(UpstreamError::Status {
                    status,
                    body: text.chars().take(ERROR_BODY_LIMIT).collect(),
                })
            }
        }
    }
}
