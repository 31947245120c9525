//! GoTrue REST API request/response mapping.

use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::types::{AuthResponse, Session, User};
use crate::{AuthError, AuthResult, SignOutScope, UserAttributes};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Thin client for the auth endpoints the engine needs.
#[derive(Clone)]
pub struct AuthApi {
    config: Arc<AuthConfig>,
    transport: Arc<dyn HttpTransport>,
}

impl AuthApi {
    pub fn new(config: Arc<AuthConfig>, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    /// Exchange a refresh token for a new session.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> AuthResult<Session> {
        let request = self.request(
            HttpMethod::Post,
            "token",
            &[("grant_type", "refresh_token")],
            Some(&json!({ "refresh_token": refresh_token })),
            None,
        )?;
        self.send_json(request).await
    }

    pub async fn sign_in_with_password(&self, body: &Value) -> AuthResult<Session> {
        let request = self.request(
            HttpMethod::Post,
            "token",
            &[("grant_type", "password")],
            Some(body),
            None,
        )?;
        self.send_json(request).await
    }

    /// Exchange a PKCE auth code and its verifier for a session.
    pub async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> AuthResult<Session> {
        let request = self.request(
            HttpMethod::Post,
            "token",
            &[("grant_type", "pkce")],
            Some(&json!({
                "auth_code": auth_code,
                "code_verifier": code_verifier,
            })),
            None,
        )?;
        self.send_json(request).await
    }

    pub async fn sign_up(&self, body: &Value, redirect_to: Option<&str>) -> AuthResult<AuthResponse> {
        let query = redirect_query(redirect_to);
        let request = self.request(HttpMethod::Post, "signup", &query, Some(body), None)?;
        let value: Value = self.send_json(request).await?;
        decode_auth_response(value)
    }

    /// Send a magic link or one-time password.
    pub async fn send_otp(&self, body: &Value, redirect_to: Option<&str>) -> AuthResult<()> {
        let query = redirect_query(redirect_to);
        let request = self.request(HttpMethod::Post, "otp", &query, Some(body), None)?;
        self.send(request).await.map(|_| ())
    }

    pub async fn verify_otp(&self, body: &Value, redirect_to: Option<&str>) -> AuthResult<AuthResponse> {
        let query = redirect_query(redirect_to);
        let request = self.request(HttpMethod::Post, "verify", &query, Some(body), None)?;
        let value: Value = self.send_json(request).await?;
        decode_auth_response(value)
    }

    /// Send a password recovery email.
    pub async fn recover(&self, body: &Value, redirect_to: Option<&str>) -> AuthResult<()> {
        let query = redirect_query(redirect_to);
        let request = self.request(HttpMethod::Post, "recover", &query, Some(body), None)?;
        self.send(request).await.map(|_| ())
    }

    pub async fn get_user(&self, access_token: &str) -> AuthResult<User> {
        let request = self.request(HttpMethod::Get, "user", &[], None, Some(access_token))?;
        self.send_json(request).await
    }

    pub async fn update_user(
        &self,
        access_token: &str,
        attributes: &UserAttributes,
        redirect_to: Option<&str>,
    ) -> AuthResult<User> {
        let query = redirect_query(redirect_to);
        let body = serde_json::to_value(attributes)?;
        let request = self.request(HttpMethod::Put, "user", &query, Some(&body), Some(access_token))?;
        self.send_json(request).await
    }

    pub async fn mfa_verify(
        &self,
        access_token: &str,
        factor_id: &str,
        challenge_id: &str,
        code: &str,
    ) -> AuthResult<Session> {
        let path = format!("factors/{}/verify", factor_id);
        let request = self.request(
            HttpMethod::Post,
            &path,
            &[],
            Some(&json!({ "challenge_id": challenge_id, "code": code })),
            Some(access_token),
        )?;
        self.send_json(request).await
    }

    /// Invalidate sessions server-side.
    pub async fn logout(&self, access_token: &str, scope: SignOutScope) -> AuthResult<()> {
        let request = self.request(
            HttpMethod::Post,
            "logout",
            &[("scope", scope.as_str())],
            None,
            Some(access_token),
        )?;
        self.send(request).await.map(|_| ())
    }

    /// URL that starts an OAuth sign-in with `provider`.
    pub fn authorize_url(&self, provider: &str, query: &[(String, String)]) -> AuthResult<Url> {
        let mut url = self.config.endpoint("authorize")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("provider", provider);
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn request(
        &self,
        method: HttpMethod,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> AuthResult<HttpRequest> {
        let mut url = self.config.endpoint(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let mut request = HttpRequest::new(method, url);
        request
            .headers
            .push(("apikey".to_string(), self.config.api_key.clone()));
        for (name, value) in &self.config.headers {
            request.headers.push((name.clone(), value.clone()));
        }
        if let Some(token) = bearer {
            request
                .headers
                .push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        if let Some(body) = body {
            request
                .headers
                .push(("Content-Type".to_string(), "application/json".to_string()));
            request.body = Some(serde_json::to_vec(body)?);
        }

        Ok(request)
    }

    async fn send(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        let path = request.url.path().to_string();
        debug!(method = ?request.method, path = %path, "Sending auth request");

        let response = self.transport.execute(request).await?;
        if response.is_success() {
            return Ok(response);
        }

        match ApiError::from_body(response.status, &response.body) {
            Some(api) => {
                warn!(
                    path = %path,
                    status = api.status,
                    code = ?api.code,
                    "Auth request failed"
                );
                Err(AuthError::Api(api))
            }
            None => {
                let body = String::from_utf8_lossy(&response.body).into_owned();
                warn!(path = %path, status = response.status, "Auth request failed with opaque body");
                Err(AuthError::UnexpectedStatus {
                    status: response.status,
                    body,
                })
            }
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> AuthResult<T> {
        let response = self.send(request).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}

fn redirect_query(redirect_to: Option<&str>) -> Vec<(&str, &str)> {
    redirect_to
        .map(|redirect| vec![("redirect_to", redirect)])
        .unwrap_or_default()
}

/// Sign-up and verify return a session when one was issued, otherwise the
/// bare user (e.g. email confirmation pending).
fn decode_auth_response(value: Value) -> AuthResult<AuthResponse> {
    if value.get("access_token").is_some() {
        let session: Session = serde_json::from_value(value)?;
        return Ok(AuthResponse {
            user: session.user.clone(),
            session: Some(session),
        });
    }

    let user: User = match value.get("user") {
        Some(user) => serde_json::from_value(user.clone())?,
        None => serde_json::from_value(value)?,
    };
    Ok(AuthResponse {
        user,
        session: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_auth_response_with_session() {
        let value = json!({
            "access_token": "access",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh",
            "user": {"id": "user-1", "aud": "authenticated"},
        });
        let response = decode_auth_response(value).unwrap();
        assert_eq!(response.user.id, "user-1");
        assert_eq!(response.session.unwrap().access_token, "access");
    }

    #[test]
    fn test_decode_auth_response_user_only() {
        let value = json!({"id": "user-2", "aud": "authenticated", "email": "a@b.co"});
        let response = decode_auth_response(value).unwrap();
        assert_eq!(response.user.id, "user-2");
        assert!(response.session.is_none());
    }

    #[test]
    fn test_decode_auth_response_wrapped_user() {
        let value = json!({"user": {"id": "user-3"}, "session": null});
        let response = decode_auth_response(value).unwrap();
        assert_eq!(response.user.id, "user-3");
        assert!(response.session.is_none());
    }
}
