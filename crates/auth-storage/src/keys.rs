//! Storage key constants.

/// Storage keys used by the auth engine
pub struct StorageKeys;

impl StorageKeys {
    /// Default key for the serialized session record
    pub const DEFAULT_SESSION_KEY: &'static str = "supabase.auth.token";

    /// Suffix appended to the session key for the pending PKCE code verifier
    pub const CODE_VERIFIER_SUFFIX: &'static str = "-code-verifier";

    /// Key holding the PKCE code verifier for a given session key.
    pub fn code_verifier_key(session_key: &str) -> String {
        format!("{}{}", session_key, Self::CODE_VERIFIER_SUFFIX)
    }
}
