//! Public auth client.
//!
//! `AuthClient` ties the engine together for one client instance: its own
//! storage, transport, event bus, session manager and auto-refresh loop.
//! Nothing is shared between instances.
//!
//! Operations that establish a new identity (sign-up, sign-in, OTP
//! verification, code exchange, `set_session`) clear the stored session before the
//! network exchange, so a background refresh of the old session cannot race
//! the new one.

use crate::api::AuthApi;
use crate::config::{AuthConfig, FlowType};
use crate::error::{is_already_signed_out_status, ApiError};
use crate::event_bus::{AuthStateChanges, EventBus, ListenerRegistration};
use crate::params::{
    Identifier, OAuthOptions, OtpParams, OtpTarget, OtpType, SignInWithPasswordParams, SignOutScope,
    SignUpParams, UserAttributes, VerifyOtpParams,
};
use crate::pkce::{PkceProvider, S256Pkce};
use crate::refresher::TokenRefresher;
use crate::scheduler::AutoRefreshScheduler;
use crate::session::SessionManager;
use crate::store::SessionStore;
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::types::{AuthChangeEvent, AuthResponse, AuthStateChange, Session, User};
use crate::{AuthError, AuthResult};
use auth_storage::{LocalStorage, StorageKeys};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Client for the Supabase auth API with local session management.
pub struct AuthClient {
    client_id: Uuid,
    config: Arc<AuthConfig>,
    api: AuthApi,
    storage: Arc<dyn LocalStorage>,
    verifier_key: String,
    manager: SessionManager,
    bus: EventBus,
    scheduler: AutoRefreshScheduler,
    pkce: Arc<dyn PkceProvider>,
}

impl AuthClient {
    /// Create a client using the default reqwest transport.
    pub fn new(config: AuthConfig, storage: Arc<dyn LocalStorage>) -> Self {
        Self::with_transport(config, storage, Arc::new(ReqwestTransport::new()))
    }

    /// Create a client with a custom HTTP transport.
    ///
    /// The auto-refresh loop is started when `auto_refresh_token` is set and
    /// a tokio runtime is available.
    pub fn with_transport(
        config: AuthConfig,
        storage: Arc<dyn LocalStorage>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let client_id = Uuid::new_v4();
        let config = Arc::new(config);
        let api = AuthApi::new(config.clone(), transport);
        let bus = EventBus::new();
        let store = SessionStore::new(storage.clone(), config.storage_key.clone());
        let refresher = TokenRefresher::new(api.clone(), config.refresh.clone());
        let manager = SessionManager::new(client_id, store, refresher, bus.clone());
        let scheduler = AutoRefreshScheduler::new(manager.clone(), config.refresh.clone());

        let client = Self {
            client_id,
            verifier_key: StorageKeys::code_verifier_key(&config.storage_key),
            config,
            api,
            storage,
            manager,
            bus,
            scheduler,
            pkce: Arc::new(S256Pkce),
        };

        debug!(client_id = %client_id, url = %client.config.url, "Auth client created");

        if client.config.auto_refresh_token && tokio::runtime::Handle::try_current().is_ok() {
            client.scheduler.start();
        }

        client
    }

    /// Replace the PKCE capability.
    pub fn with_pkce(mut self, pkce: Arc<dyn PkceProvider>) -> Self {
        self.pkce = pkce;
        self
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // ========================================================================
    // Sign-up / sign-in
    // ========================================================================

    /// Create an account. A session is returned when the project does not
    /// require email or phone confirmation.
    pub async fn sign_up(&self, params: SignUpParams) -> AuthResult<AuthResponse> {
        self.manager.remove()?;

        let mut body = Map::new();
        params.identifier.apply(&mut body);
        body.insert("password".to_string(), params.password.into());
        if let Some(data) = params.data {
            body.insert("data".to_string(), data);
        }
        insert_captcha(&mut body, params.captcha_token);
        if matches!(params.identifier, Identifier::Email(_)) {
            self.insert_pkce_challenge(&mut body)?;
        }

        let response = self
            .api
            .sign_up(&Value::Object(body), params.redirect_to.as_deref())
            .await?;

        match &response.session {
            Some(session) => self.manager.update(session, AuthChangeEvent::SignedIn)?,
            None => info!(
                client_id = %self.client_id,
                user_id = %response.user.id,
                "Signed up, confirmation pending"
            ),
        }
        Ok(response)
    }

    pub async fn sign_in_with_password(&self, params: SignInWithPasswordParams) -> AuthResult<Session> {
        self.manager.remove()?;

        let mut body = Map::new();
        params.identifier.apply(&mut body);
        body.insert("password".to_string(), params.password.into());
        insert_captcha(&mut body, params.captcha_token);

        let session = self.api.sign_in_with_password(&Value::Object(body)).await?;
        self.manager.update(&session, AuthChangeEvent::SignedIn)?;
        Ok(session)
    }

    /// Create an anonymous user and sign in as it.
    pub async fn sign_in_anonymously(&self, data: Option<Value>) -> AuthResult<Session> {
        self.manager.remove()?;

        let mut body = Map::new();
        if let Some(data) = data {
            body.insert("data".to_string(), data);
        }

        let response = self.api.sign_up(&Value::Object(body), None).await?;
        let session = response.session.ok_or(AuthError::SessionMissing)?;
        self.manager.update(&session, AuthChangeEvent::SignedIn)?;
        Ok(session)
    }

    /// Send a magic link or one-time password. No session is established
    /// until the OTP is verified.
    pub async fn sign_in_with_otp(&self, params: OtpParams) -> AuthResult<()> {
        let mut body = Map::new();
        params.identifier.apply(&mut body);
        body.insert("create_user".to_string(), params.should_create_user.into());
        if let Some(data) = params.data {
            body.insert("data".to_string(), data);
        }
        insert_captcha(&mut body, params.captcha_token);
        if matches!(params.identifier, Identifier::Email(_)) {
            self.insert_pkce_challenge(&mut body)?;
        }

        self.api
            .send_otp(&Value::Object(body), params.redirect_to.as_deref())
            .await
    }

    /// Verify a one-time password or email link token.
    ///
    /// A verified `recovery` OTP is announced as `PasswordRecovery`.
    pub async fn verify_otp(&self, params: VerifyOtpParams) -> AuthResult<AuthResponse> {
        self.manager.remove()?;

        let mut body = Map::new();
        body.insert("type".to_string(), serde_json::to_value(params.otp_type)?);
        match &params.target {
            OtpTarget::Email(email) => {
                body.insert("email".to_string(), email.clone().into());
            }
            OtpTarget::Phone(phone) => {
                body.insert("phone".to_string(), phone.clone().into());
            }
            OtpTarget::TokenHash(hash) => {
                body.insert("token_hash".to_string(), hash.clone().into());
            }
        }
        if let Some(token) = params.token {
            body.insert("token".to_string(), token.into());
        }
        insert_captcha(&mut body, params.captcha_token);

        let response = self
            .api
            .verify_otp(&Value::Object(body), params.redirect_to.as_deref())
            .await?;

        if let Some(session) = &response.session {
            let event = if params.otp_type == OtpType::Recovery {
                AuthChangeEvent::PasswordRecovery
            } else {
                AuthChangeEvent::SignedIn
            };
            self.manager.update(session, event)?;
        }
        Ok(response)
    }

    // ========================================================================
    // OAuth / PKCE
    // ========================================================================

    /// URL to send the user to for an OAuth sign-in with `provider`.
    ///
    /// In the PKCE flow a fresh code verifier is stored for the later
    /// [`exchange_code_for_session`](Self::exchange_code_for_session).
    pub fn get_oauth_sign_in_url(&self, provider: &str, options: OAuthOptions) -> AuthResult<Url> {
        let mut query: Vec<(String, String)> = Vec::new();
        if let Some(redirect_to) = options.redirect_to {
            query.push(("redirect_to".to_string(), redirect_to));
        }
        if let Some(scopes) = options.scopes {
            query.push(("scopes".to_string(), scopes));
        }
        if let Some((challenge, method)) = self.prepare_pkce()? {
            query.push(("code_challenge".to_string(), challenge));
            query.push(("code_challenge_method".to_string(), method.to_string()));
        }
        query.extend(options.query_params);

        self.api.authorize_url(provider, &query)
    }

    /// Exchange a PKCE auth code for a session.
    pub async fn exchange_code_for_session(&self, auth_code: &str) -> AuthResult<Session> {
        let code_verifier = self
            .storage
            .retrieve_string(&self.verifier_key)?
            .ok_or(AuthError::MissingCodeVerifier)?;

        self.manager.remove()?;
        let session = self.api.exchange_code(auth_code, &code_verifier).await?;
        self.remove_code_verifier();

        self.manager.update(&session, AuthChangeEvent::SignedIn)?;
        Ok(session)
    }

    /// Complete a sign-in from a redirect callback URL.
    ///
    /// Handles both `?code=` (PKCE) and `#access_token=...` (implicit)
    /// callbacks. Error parameters in the URL are returned as an API error.
    pub async fn session_from_url(&self, url: &str) -> AuthResult<Session> {
        let url = Url::parse(url)?;
        let params = callback_params(&url);

        if let Some(error) = callback_error(&params) {
            warn!(client_id = %self.client_id, error = %error, "Callback URL carries an error");
            return Err(AuthError::Api(error));
        }

        if let Some(code) = params.get("code") {
            return self.exchange_code_for_session(code).await;
        }

        if self.config.flow_type == FlowType::Pkce && !params.contains_key("access_token") {
            return Err(AuthError::InvalidCallbackUrl("missing auth code".to_string()));
        }

        let required = |name: &str| {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| AuthError::InvalidCallbackUrl(format!("missing {}", name)))
        };
        let access_token = required("access_token")?;
        let refresh_token = required("refresh_token")?;
        let expires_in: i64 = required("expires_in")?
            .parse()
            .map_err(|_| AuthError::InvalidCallbackUrl("invalid expires_in".to_string()))?;
        let token_type = required("token_type")?;
        let expires_at = match params.get("expires_at") {
            Some(value) => value
                .parse()
                .map_err(|_| AuthError::InvalidCallbackUrl("invalid expires_at".to_string()))?,
            None => Utc::now().timestamp() + expires_in,
        };

        self.manager.remove()?;
        let user = self.api.get_user(&access_token).await?;
        let session = Session {
            access_token,
            token_type,
            expires_in,
            expires_at,
            refresh_token,
            provider_token: params.get("provider_token").cloned(),
            provider_refresh_token: params.get("provider_refresh_token").cloned(),
            user,
        };

        let event = if params.get("type").map(String::as_str) == Some("recovery") {
            AuthChangeEvent::PasswordRecovery
        } else {
            AuthChangeEvent::SignedIn
        };
        self.manager.update(&session, event)?;
        Ok(session)
    }

    // ========================================================================
    // Session access
    // ========================================================================

    /// Install a session from an externally obtained token pair.
    ///
    /// Any stored session is dropped first and an in-flight refresh for it
    /// is superseded.
    /// An expired access token is refreshed through the regular refresh
    /// path; otherwise the user is fetched and the session stored as
    /// `SignedIn`.
    pub async fn set_session(&self, access_token: &str, refresh_token: &str) -> AuthResult<Session> {
        let expires_at = decode_jwt_expiry(access_token)?;
        self.manager.remove()?;
        let now = Utc::now().timestamp();
        let margin = i64::try_from(self.config.refresh.expiry_margin.as_secs()).unwrap_or(i64::MAX);

        if now.saturating_add(margin) >= expires_at {
            debug!(client_id = %self.client_id, "Access token expired, refreshing");
            return self.manager.refresh(Some(refresh_token)).await;
        }

        let user = self.api.get_user(access_token).await?;
        let session = Session {
            access_token: access_token.to_string(),
            token_type: "bearer".to_string(),
            expires_in: expires_at - now,
            expires_at,
            refresh_token: refresh_token.to_string(),
            provider_token: None,
            provider_refresh_token: None,
            user,
        };
        self.manager.update(&session, AuthChangeEvent::SignedIn)?;
        Ok(session)
    }

    /// Refresh now. With `None` the stored refresh token is used.
    pub async fn refresh_session(&self, refresh_token: Option<&str>) -> AuthResult<Session> {
        self.manager.refresh(refresh_token).await
    }

    /// A valid session, refreshed first if it expired.
    pub async fn session(&self) -> AuthResult<Session> {
        self.manager.session(true).await
    }

    /// The stored session as-is. No validation, no network.
    pub fn current_session(&self) -> Option<Session> {
        self.manager.stored_session()
    }

    /// Fetch the user for `jwt`, or for the current session.
    pub async fn user(&self, jwt: Option<&str>) -> AuthResult<User> {
        match jwt {
            Some(jwt) => self.api.get_user(jwt).await,
            None => {
                let session = self.session().await?;
                self.api.get_user(&session.access_token).await
            }
        }
    }

    pub async fn update_user(&self, attributes: UserAttributes) -> AuthResult<User> {
        let session = self.session().await?;
        let user = self
            .api
            .update_user(&session.access_token, &attributes, None)
            .await?;

        let updated = Session {
            user: user.clone(),
            ..session
        };
        self.manager.update(&updated, AuthChangeEvent::UserUpdated)?;
        Ok(user)
    }

    pub async fn reset_password_for_email(&self, email: &str, redirect_to: Option<&str>) -> AuthResult<()> {
        let mut body = Map::new();
        body.insert("email".to_string(), email.into());
        self.insert_pkce_challenge(&mut body)?;
        self.api.recover(&Value::Object(body), redirect_to).await
    }

    /// Verify an MFA challenge, upgrading the session's assurance level.
    pub async fn mfa_verify(&self, factor_id: &str, challenge_id: &str, code: &str) -> AuthResult<Session> {
        let session = self.session().await?;
        let upgraded = self
            .api
            .mfa_verify(&session.access_token, factor_id, challenge_id, code)
            .await?;
        self.manager
            .update(&upgraded, AuthChangeEvent::MfaChallengeVerified)?;
        Ok(upgraded)
    }

    /// Sign out.
    ///
    /// Unless `scope` is `Others`, local state is cleared and `SignedOut`
    /// emitted before the server is told. 401, 403 and 404 from the logout
    /// endpoint mean the session is already gone and count as success.
    ///
    /// The stored access token is sent as-is, even if expired. No refresh
    /// is attempted.
    pub async fn sign_out(&self, scope: SignOutScope) -> AuthResult<()> {
        let access_token = self
            .manager
            .stored_session()
            .map(|session| session.access_token);

        if scope != SignOutScope::Others {
            self.manager.remove()?;
            self.remove_code_verifier();
            self.bus.emit(AuthChangeEvent::SignedOut, None);
            info!(client_id = %self.client_id, scope = scope.as_str(), "Signed out locally");
        }

        let Some(access_token) = access_token else {
            return Ok(());
        };

        match self.api.logout(&access_token, scope).await {
            Ok(()) => Ok(()),
            Err(e) if e.status().is_some_and(is_already_signed_out_status) => {
                debug!(
                    client_id = %self.client_id,
                    status = ?e.status(),
                    "Session already invalidated server-side"
                );
                Ok(())
            }
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e, "Remote sign-out failed");
                Err(e)
            }
        }
    }

    // ========================================================================
    // Events and lifecycle
    // ========================================================================

    /// Register a listener. Its first event is `InitialSession` with the
    /// current session (refreshed first if it expired).
    pub fn on_auth_state_change<F>(&self, listener: F) -> ListenerRegistration
    where
        F: Fn(&AuthStateChange) + Send + Sync + 'static,
    {
        let manager = self.manager.clone();
        self.bus
            .subscribe(listener, async move { manager.session(true).await.ok() })
    }

    /// Auth state changes as a channel.
    pub fn auth_state_changes(&self) -> AuthStateChanges {
        let manager = self.manager.clone();
        self.bus
            .changes(async move { manager.session(true).await.ok() })
    }

    pub fn start_auto_refresh(&self) -> bool {
        self.scheduler.start()
    }

    pub fn stop_auto_refresh(&self) -> bool {
        self.scheduler.stop()
    }

    pub fn is_auto_refresh_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Stop background work and remove every listener.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.bus.clear();
        debug!(client_id = %self.client_id, "Auth client shut down");
    }

    // ========================================================================
    // PKCE helpers
    // ========================================================================

    /// Generate and store a code verifier when the PKCE flow is in use.
    fn prepare_pkce(&self) -> AuthResult<Option<(String, &'static str)>> {
        if self.config.flow_type != FlowType::Pkce {
            return Ok(None);
        }
        let verifier = self.pkce.generate_code_verifier();
        self.storage.store(&self.verifier_key, verifier.as_bytes())?;
        Ok(Some((
            self.pkce.code_challenge(&verifier),
            self.pkce.challenge_method(),
        )))
    }

    fn insert_pkce_challenge(&self, body: &mut Map<String, Value>) -> AuthResult<()> {
        if let Some((challenge, method)) = self.prepare_pkce()? {
            body.insert("code_challenge".to_string(), challenge.into());
            body.insert("code_challenge_method".to_string(), method.into());
        }
        Ok(())
    }

    fn remove_code_verifier(&self) {
        if let Err(e) = self.storage.remove(&self.verifier_key) {
            warn!(client_id = %self.client_id, error = %e, "Failed to remove code verifier");
        }
    }
}

fn insert_captcha(body: &mut Map<String, Value>, captcha_token: Option<String>) {
    if let Some(token) = captcha_token {
        body.insert(
            "gotrue_meta_security".to_string(),
            json!({ "captcha_token": token }),
        );
    }
}

/// Query and fragment parameters of a callback URL. Fragment values win.
fn callback_params(url: &Url) -> HashMap<String, String> {
    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(fragment) = url.fragment() {
        params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
    }
    params
}

fn callback_error(params: &HashMap<String, String>) -> Option<ApiError> {
    let error = params.get("error");
    let description = params.get("error_description");
    if error.is_none() && description.is_none() {
        return None;
    }

    let code = params.get("error_code").or(error).cloned();
    let message = description
        .or(error)
        .cloned()
        .unwrap_or_default();
    Some(ApiError::new(400, code, message))
}

/// Read the `exp` claim of a JWT without verifying its signature.
fn decode_jwt_expiry(token: &str) -> AuthResult<i64> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(AuthError::InvalidToken("not a JWT".to_string())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::InvalidToken(format!("payload is not base64url: {}", e)))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::InvalidToken(format!("payload is not JSON: {}", e)))?;

    claims
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or_else(|| AuthError::InvalidToken("missing exp claim".to_string()))
}
