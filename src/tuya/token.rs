use std::time::Duration;

use tracing::{info, warn};

use super::{models::TokenResult, Transport, TuyaClient, TuyaError};
use crate::clock::Clock;

/// Below this remaining lifetime a token is no longer used for calls.
const VALIDITY_MARGIN_MS: i64 = 100_000;
/// Below this remaining lifetime the refresh endpoint is not trusted either.
const REFRESH_MARGIN_MS: i64 = 10_000;

/// The access/refresh token pair. `Default` is the absent state.
///
/// Always replaced as a whole value; fields are never patched individually.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: String,
    /// Server timestamp (ms) of the response that issued this token.
    pub issued_at_ms: i64,
    pub expires_in_secs: i64,
    pub refresh_token: String,
}

impl TokenState {
    pub fn from_response(t: i64, result: TokenResult) -> Self {
        Self {
            access_token: result.access_token,
            issued_at_ms: t,
            expires_in_secs: result.expire_time,
            refresh_token: result.refresh_token,
        }
    }

    fn age_below(&self, now_ms: i64, margin_ms: i64) -> bool {
        !self.access_token.is_empty()
            && now_ms - self.issued_at_ms < self.expires_in_secs * 1000 - margin_ms
    }

    /// Usable for API calls without touching the token endpoints.
    pub fn is_valid(&self, now_ms: i64) -> bool {
        self.age_below(now_ms, VALIDITY_MARGIN_MS)
    }

    /// Too old to use, but still accepted by the refresh endpoint.
    pub fn is_refreshable(&self, now_ms: i64) -> bool {
        self.age_below(now_ms, REFRESH_MARGIN_MS)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            delay: Duration::from_secs(15),
        }
    }
}

/// Owns the token lifecycle: Absent → Valid → refreshable-but-aging → Expired,
/// with Absent and Expired both routed back through minting.
#[derive(Debug, Default)]
pub struct TokenManager {
    state: TokenState,
    policy: RetryPolicy,
}

impl TokenManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: TokenState::default(),
            policy,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &TokenState {
        &self.state
    }

    /// Returns a usable access token, minting or refreshing when needed.
    ///
    /// Makes at most `policy.max_attempts` token calls, sleeping
    /// `policy.delay` between them. Refresh vs. mint is decided per attempt,
    /// so a token that ages past the refresh margin while retrying falls back
    /// to minting.
    pub async fn ensure_valid<T, C>(
        &mut self,
        client: &TuyaClient<T>,
        clock: &C,
    ) -> Result<String, TuyaError>
    where
        T: Transport,
        C: Clock,
    {
        if self.state.is_valid(clock.now_millis()) {
            return Ok(self.state.access_token.clone());
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = clock.now();
            let result = if self.state.is_refreshable(now.timestamp_millis()) {
                info!(attempt, "Refreshing Tuya access token");
                client.refresh_token(&self.state.refresh_token, now).await
            } else {
                info!(attempt, "Minting new Tuya access token");
                client.mint_token(now).await
            };

            match result {
                Ok(state) => {
                    info!(expires_in_secs = state.expires_in_secs, "Tuya access token acquired");
                    self.state = state;
                    return Ok(self.state.access_token.clone());
                }
                Err(e) if attempt >= self.policy.max_attempts => {
                    return Err(TuyaError::TokenExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Token request failed; retrying"
                    );
                    clock.sleep(self.policy.delay).await;
                }
            }
        }
    }
}
