//! Integration tests for the auth engine.
//!
//! - `harness.rs`         - Mock transport, event recorder and wiring helpers
//! - `session_manager.rs` - Session reads, single-flight refresh, failure policy
//! - `refresher.rs`       - Retry classification and backoff budget
//! - `scheduler.rs`       - Auto-refresh loop lifecycle and tick decisions
//! - `event_bus.rs`       - Initial session delivery through the client
//! - `sign_out.rs`        - Sign-out scopes and remote logout tolerance
//! - `facade.rs`          - Sign-up/sign-in/OTP/OAuth/PKCE operations

mod event_bus;
mod sign_out;
