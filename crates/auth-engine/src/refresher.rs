//! Refresh-token exchange with bounded exponential backoff.

use crate::api::AuthApi;
use crate::config::RefreshConfig;
use crate::error::RefreshError;
use crate::types::Session;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Exchanges refresh tokens for sessions, retrying transient failures.
///
/// Retry delay for attempt `i` is `retry_base_delay * 2^i`, inserted before
/// each retry. Retrying stops as soon as the time already spent plus the
/// next delay would exceed `retry_budget`.
#[derive(Clone)]
pub struct TokenRefresher {
    api: AuthApi,
    config: RefreshConfig,
}

impl TokenRefresher {
    pub fn new(api: AuthApi, config: RefreshConfig) -> Self {
        Self { api, config }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, RefreshError> {
        let started_at = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match self.api.refresh_access_token(refresh_token).await {
                Ok(session) => {
                    debug!(
                        attempts = attempt + 1,
                        user_id = %session.user.id,
                        "Token refresh succeeded"
                    );
                    return Ok(session);
                }
                Err(e) if e.is_transient() => {
                    let delay = self.config.delay_for_attempt(attempt);
                    let projected = started_at.elapsed().saturating_add(delay);
                    if projected > self.config.retry_budget {
                        warn!(
                            attempts = attempt + 1,
                            error = %e,
                            "Token refresh retry budget exhausted"
                        );
                        return Err(RefreshError::RetryBudgetExhausted {
                            attempts: attempt + 1,
                            last: e.to_string(),
                        });
                    }

                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Refresh failed with transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Refresh failed with non-transient error");
                    return Err(RefreshError::classify(e));
                }
            }
        }
    }
}
