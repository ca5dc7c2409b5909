//! Provider failover.
//!
//! Each provider gets a few attempts while its errors look transient
//! (rate limits, 5xx, network hiccups); anything else moves straight on to
//! the next provider in `[providers] failover_order`.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::{ChatMessage, ChatResponse, LlmProvider};

const TRANSIENT_STATUS: [&str; 5] = ["429", "500", "502", "503", "504"];
const TRANSIENT_PHRASES: [&str; 8] = [
    "rate limit",
    "rate_limit",
    "overloaded",
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "temporarily unavailable",
];

pub struct ModelRouter {
    providers: Vec<Box<dyn LlmProvider>>,
    attempts_per_provider: u32,
    backoff: Duration,
}

impl ModelRouter {
    /// `providers` in failover order; the first one names the router
    pub fn with_failover(providers: Vec<Box<dyn LlmProvider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(anyhow!("no LLM provider configured"));
        }
        Ok(Self {
            providers,
            attempts_per_provider: 2,
            backoff: Duration::from_millis(500),
        })
    }

    pub fn with_max_retries(mut self, attempts: u32) -> Self {
        self.attempts_per_provider = attempts.max(1);
        self
    }

    /// Delay before the second attempt; doubles for each one after
    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.backoff = delay;
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.provider_name()).collect()
    }

    fn primary(&self) -> &dyn LlmProvider {
        // Non-empty by construction
        self.providers[0].as_ref()
    }

    async fn attempt(
        &self,
        provider: &dyn LlmProvider,
        messages: &[ChatMessage],
        system: &str,
    ) -> Result<ChatResponse> {
        let mut attempt = 1;
        loop {
            let err = match provider.chat(messages, system).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            let transient = is_transient(&err.to_string());
            warn!(
                "{} call {}/{} failed (transient: {}): {}",
                provider.provider_name(),
                attempt,
                self.attempts_per_provider,
                transient,
                err
            );
            if !transient || attempt >= self.attempts_per_provider {
                return Err(err);
            }
            let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
            debug!("Retrying {} in {:?}", provider.provider_name(), delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl LlmProvider for ModelRouter {
    fn provider_name(&self) -> &str {
        self.primary().provider_name()
    }

    fn model(&self) -> &str {
        self.primary().model()
    }

    async fn chat(&self, messages: &[ChatMessage], system: &str) -> Result<ChatResponse> {
        let mut last_error = None;
        for (idx, provider) in self.providers.iter().enumerate() {
            match self.attempt(provider.as_ref(), messages, system).await {
                Ok(response) => {
                    if idx > 0 {
                        info!("{} ({}) answered after failover", provider.provider_name(), provider.model());
                    }
                    return Ok(response);
                }
                Err(e) => last_error = Some(e),
            }
            if let Some(next) = self.providers.get(idx + 1) {
                info!("Failing over from {} to {}", provider.provider_name(), next.provider_name());
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no LLM provider configured")))
    }
}

fn is_transient(err: &str) -> bool {
    let lower = err.to_lowercase();
    TRANSIENT_STATUS.iter().any(|code| lower.contains(code))
        || TRANSIENT_PHRASES.iter().any(|phrase| lower.contains(phrase))
}
