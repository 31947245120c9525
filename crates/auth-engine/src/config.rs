//! Configuration for the auth client.

use crate::{AuthError, AuthResult};
use auth_storage::StorageKeys;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// How OAuth and magic-link sign-ins hand the session back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowType {
    /// Tokens arrive in the callback URL fragment.
    Implicit,
    /// An auth code arrives in the callback URL query and is exchanged with
    /// the stored code verifier.
    #[default]
    Pkce,
}

/// Timing policy for refreshing sessions.
///
/// These values are deployment policy rather than protocol constants, so they
/// are all overridable.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Interval between background auto-refresh ticks.
    pub tick_interval: Duration,
    /// Refresh proactively once the session expires within this many ticks.
    pub tick_threshold: i64,
    /// A session counts as expired this long before its real expiry.
    pub expiry_margin: Duration,
    /// Backoff before the first retry; doubles for every later retry.
    pub retry_base_delay: Duration,
    /// A refresh stops retrying once the next backoff would end past this
    /// much time after the first attempt.
    pub retry_budget: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            tick_threshold: 3,
            expiry_margin: Duration::from_secs(30),
            retry_base_delay: Duration::from_millis(200),
            retry_budget: Duration::from_secs(30),
        }
    }
}

impl RefreshConfig {
    /// Calculate the delay before retry number `attempt + 1` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.retry_base_delay.saturating_mul(factor)
    }

    /// Set the tick interval and keep the retry budget aligned with it.
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self.retry_budget = tick_interval;
        self
    }
}

/// Auth client configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Auth API base URL, e.g. `https://abc123.supabase.co/auth/v1`.
    pub url: Url,
    /// Project API key, sent as the `apikey` header.
    pub api_key: String,
    /// Extra headers sent with every request.
    pub headers: HashMap<String, String>,
    /// Storage key for the persisted session.
    pub storage_key: String,
    /// Sign-in flow used for OAuth, OTP and password recovery links.
    pub flow_type: FlowType,
    /// Start the background refresh loop when the client is created.
    pub auto_refresh_token: bool,
    /// Refresh timing policy.
    pub refresh: RefreshConfig,
}

impl AuthConfig {
    /// Create a config for a project URL (`https://<ref>.supabase.co`).
    pub fn new(project_url: &str, api_key: impl Into<String>) -> AuthResult<Self> {
        let base = project_url.trim_end_matches('/');
        let url = Url::parse(&format!("{}/auth/v1", base))?;
        Ok(Self::with_auth_url(url, api_key))
    }

    /// Create a config from a full auth API URL.
    pub fn with_auth_url(url: Url, api_key: impl Into<String>) -> Self {
        Self {
            url,
            api_key: api_key.into(),
            headers: HashMap::new(),
            storage_key: StorageKeys::DEFAULT_SESSION_KEY.to_string(),
            flow_type: FlowType::default(),
            auto_refresh_token: true,
            refresh: RefreshConfig::default(),
        }
    }

    /// Build a config from environment variables.
    ///
    /// `SUPABASE_URL` and `SUPABASE_ANON_KEY` are required. Optional overrides:
    /// `SUPABASE_AUTH_STORAGE_KEY`, `SUPABASE_AUTH_FLOW` (`pkce` | `implicit`),
    /// `SUPABASE_AUTH_AUTO_REFRESH` (`true` | `false`) and
    /// `SUPABASE_AUTH_TICK_SECS`.
    pub fn from_env() -> AuthResult<Self> {
        let project_url = env_value("SUPABASE_URL")
            .ok_or_else(|| AuthError::Config("SUPABASE_URL is not set".to_string()))?;
        let api_key = env_value("SUPABASE_ANON_KEY")
            .ok_or_else(|| AuthError::Config("SUPABASE_ANON_KEY is not set".to_string()))?;

        let mut config = Self::new(&project_url, api_key)?;

        if let Some(key) = env_value("SUPABASE_AUTH_STORAGE_KEY") {
            config.storage_key = key;
        }

        if let Some(flow) = env_value("SUPABASE_AUTH_FLOW") {
            config.flow_type = match flow.to_ascii_lowercase().as_str() {
                "pkce" => FlowType::Pkce,
                "implicit" => FlowType::Implicit,
                other => {
                    return Err(AuthError::Config(format!(
                        "Unsupported SUPABASE_AUTH_FLOW: {}",
                        other
                    )))
                }
            };
        }

        if let Some(auto_refresh) = env_value("SUPABASE_AUTH_AUTO_REFRESH") {
            config.auto_refresh_token = auto_refresh
                .parse()
                .map_err(|_| AuthError::Config(format!("Invalid SUPABASE_AUTH_AUTO_REFRESH: {}", auto_refresh)))?;
        }

        if let Some(tick_secs) = env_value("SUPABASE_AUTH_TICK_SECS").and_then(|s| s.parse().ok()) {
            config.refresh = config
                .refresh
                .with_tick_interval(Duration::from_secs(tick_secs));
        }

        Ok(config)
    }

    pub fn with_storage_key(mut self, storage_key: impl Into<String>) -> Self {
        self.storage_key = storage_key.into();
        self
    }

    pub fn with_flow_type(mut self, flow_type: FlowType) -> Self {
        self.flow_type = flow_type;
        self
    }

    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh_token = enabled;
        self
    }

    pub fn with_refresh_config(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Resolve a path relative to the auth base URL.
    pub(crate) fn endpoint(&self, path: &str) -> AuthResult<Url> {
        let base = self.url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}/{}", base, path.trim_start_matches('/')))?)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_config_default() {
        let config = RefreshConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(30));
        assert_eq!(config.tick_threshold, 3);
        assert_eq!(config.expiry_margin, Duration::from_secs(30));
        assert_eq!(config.retry_base_delay, Duration::from_millis(200));
        assert_eq!(config.retry_budget, config.tick_interval);
    }

    #[test]
    fn test_refresh_config_delay_exponential_backoff() {
        let config = RefreshConfig::default();

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(6400));
    }

    #[test]
    fn test_refresh_config_delay_saturates() {
        let config = RefreshConfig::default();
        assert!(config.delay_for_attempt(64) >= config.delay_for_attempt(31));
    }

    #[test]
    fn test_with_tick_interval_moves_retry_budget() {
        let config = RefreshConfig::default().with_tick_interval(Duration::from_secs(5));
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.retry_budget, Duration::from_secs(5));
    }

    #[test]
    fn test_auth_config_new_appends_auth_path() {
        let config = AuthConfig::new("https://abc123.supabase.co/", "anon-key").unwrap();
        assert_eq!(config.url.as_str(), "https://abc123.supabase.co/auth/v1");
        assert_eq!(config.storage_key, "supabase.auth.token");
        assert_eq!(config.flow_type, FlowType::Pkce);
        assert!(config.auto_refresh_token);
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let config = AuthConfig::new("https://abc123.supabase.co", "anon-key").unwrap();
        let url = config.endpoint("/token").unwrap();
        assert_eq!(url.as_str(), "https://abc123.supabase.co/auth/v1/token");
    }

    #[test]
    fn test_auth_config_rejects_invalid_url() {
        assert!(AuthConfig::new("not a url", "anon-key").is_err());
    }
}
