//! Session, user and auth event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default margin before `expires_at` at which a session counts as expired.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Authenticated user as returned by the auth API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub aud: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sign_in_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub app_metadata: serde_json::Value,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_anonymous: bool,
}

/// The current access/refresh token pair plus user and expiry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SessionWire")]
pub struct Session {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime of the access token in seconds, as issued.
    pub expires_in: i64,
    /// Absolute expiry as a unix timestamp (seconds).
    pub expires_at: i64,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_refresh_token: Option<String>,
    pub user: User,
}

/// Token responses may omit `expires_at`; it is then derived from `expires_in`.
#[derive(Deserialize)]
struct SessionWire {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: i64,
    #[serde(default)]
    expires_at: Option<i64>,
    refresh_token: String,
    #[serde(default)]
    provider_token: Option<String>,
    #[serde(default)]
    provider_refresh_token: Option<String>,
    user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl From<SessionWire> for Session {
    fn from(wire: SessionWire) -> Self {
        let expires_at = wire
            .expires_at
            .unwrap_or_else(|| Utc::now().timestamp().saturating_add(wire.expires_in));
        Self {
            access_token: wire.access_token,
            token_type: wire.token_type,
            expires_in: wire.expires_in,
            expires_at,
            refresh_token: wire.refresh_token,
            provider_token: wire.provider_token,
            provider_refresh_token: wire.provider_refresh_token,
            user: wire.user,
        }
    }
}

impl Session {
    /// `now + margin >= expires_at`, using the default 30s margin.
    pub fn is_expired(&self) -> bool {
        self.is_expired_with(EXPIRY_MARGIN)
    }

    pub fn is_expired_with(&self, margin: Duration) -> bool {
        self.is_expired_at(Utc::now().timestamp(), margin)
    }

    /// Expiry check against an explicit clock reading (unix seconds).
    pub fn is_expired_at(&self, now: i64, margin: Duration) -> bool {
        let margin = i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
        now.saturating_add(margin) >= self.expires_at
    }

    /// Seconds left before `expires_at` (negative once past).
    pub fn seconds_until_expiry(&self) -> i64 {
        self.expires_at - Utc::now().timestamp()
    }
}

/// Auth state transitions delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    UserDeleted,
    PasswordRecovery,
    MfaChallengeVerified,
}

/// An event together with the session it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthStateChange {
    pub event: AuthChangeEvent,
    pub session: Option<Session>,
}

/// Result of operations that may or may not establish a session
/// (sign-up with email confirmation pending, OTP verification).
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    pub user: User,
    pub session: Option<Session>,
}
