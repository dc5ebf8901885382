//! Request pacing and rate-limit cooldown for provider calls

use std::time::{Duration, Instant};

use crate::config::PipelineConfig;

/// Paces requests to one provider and tracks consecutive rate-limit hits
pub struct RateLimiter {
    /// Minimum delay between requests
    min_delay: Duration,
    /// Wait after a rate-limited response when the provider gives no hint
    cooldown: Duration,
    /// Consecutive rate-limited responses tolerated for one page
    max_consecutive_429s: u32,
    /// Last request time
    last_request: Option<Instant>,
    /// Consecutive rate limit hits
    consecutive_429s: u32,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::ZERO, Duration::from_secs(60), 10)
    }
}

impl RateLimiter {
    pub fn new(min_delay: Duration, cooldown: Duration, max_consecutive_429s: u32) -> Self {
        Self {
            min_delay,
            cooldown,
            max_consecutive_429s,
            last_request: None,
            consecutive_429s: 0,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.request_spacing(),
            config.rate_limit_cooldown(),
            config.max_rate_limit_retries,
        )
    }

    /// Wait before making the next request
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }

    /// Handle a successful request
    pub fn on_success(&mut self) {
        self.consecutive_429s = 0;
    }

    /// Handle a rate limit (HTTP 429) response, returning how long to wait
    /// before retrying the same request.
    ///
    /// The configured cooldown applies unless the provider asked for longer.
    pub fn on_rate_limit(&mut self, retry_after: Option<Duration>) -> Duration {
        self.consecutive_429s += 1;
        retry_after.map_or(self.cooldown, |hint| hint.max(self.cooldown))
    }

    /// Forget rate-limit hits from an earlier window
    pub fn reset(&mut self) {
        self.consecutive_429s = 0;
    }

    /// Whether the current request has been rate limited too many times in a row
    pub fn should_give_up(&self) -> bool {
        self.consecutive_429s > self.max_consecutive_429s
    }

    pub fn consecutive_429s(&self) -> u32 {
        self.consecutive_429s
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
