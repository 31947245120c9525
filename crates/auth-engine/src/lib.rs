//! Session and token lifecycle engine for the Supabase auth API.
//!
//! This crate provides:
//! - A single persisted session per client, read and written through an
//!   injected [`LocalStorage`](auth_storage::LocalStorage)
//! - Single-flight token refresh with bounded exponential backoff
//! - A background auto-refresh loop that refreshes ahead of expiry
//! - Ordered per-listener auth state notifications
//! - The public sign-up/sign-in/sign-out surface ([`AuthClient`])

mod api;
mod client;
mod config;
mod error;
mod event_bus;
mod params;
mod pkce;
mod refresher;
mod scheduler;
mod session;
mod store;
mod transport;
mod types;

#[cfg(test)]
mod tests;

pub use api::AuthApi;
pub use client::AuthClient;
pub use config::{AuthConfig, FlowType, RefreshConfig};
pub use error::{ApiError, AuthError, AuthResult, RefreshError};
pub use event_bus::{AuthStateChanges, EventBus, ListenerRegistration};
pub use params::{
    Identifier, OAuthOptions, OtpParams, OtpTarget, OtpType, SignInWithPasswordParams, SignOutScope,
    SignUpParams, UserAttributes, VerifyOtpParams,
};
pub use pkce::{PkceProvider, S256Pkce};
pub use refresher::TokenRefresher;
pub use scheduler::AutoRefreshScheduler;
pub use session::SessionManager;
pub use store::SessionStore;
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use types::{AuthChangeEvent, AuthResponse, AuthStateChange, Session, User, EXPIRY_MARGIN};
