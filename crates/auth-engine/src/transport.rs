//! HTTP transport seam.
//!
//! The auth engine builds requests and interprets responses; moving bytes is
//! delegated to an [`HttpTransport`]. [`ReqwestTransport`] is the default.

use crate::AuthResult;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// HTTP method subset used by the auth API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

/// Outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Value of a query parameter on the request URL.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Response as seen by the auth engine.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes HTTP requests for the auth engine.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request. Only transport failures are errors; every HTTP status
    /// comes back as a response.
    async fn execute(&self, request: HttpRequest) -> AuthResult<HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }

    /// Transport with a per-request timeout.
    pub fn with_timeout(timeout: Duration) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        };

        let mut builder = self.http_client.request(method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_lookup_is_case_insensitive() {
        let mut request = HttpRequest::new(
            HttpMethod::Post,
            Url::parse("https://example.com/auth/v1/logout?scope=local").unwrap(),
        );
        request
            .headers
            .push(("Authorization".to_string(), "Bearer abc".to_string()));

        assert_eq!(request.header("authorization"), Some("Bearer abc"));
        assert_eq!(request.query_param("scope").as_deref(), Some("local"));
        assert_eq!(request.query_param("missing"), None);
    }

    #[test]
    fn test_response_success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(302, "").is_success());
        assert!(!HttpResponse::new(404, "").is_success());
    }
}
