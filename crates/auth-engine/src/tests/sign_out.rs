//! Sign-out tests.

use super::harness::{
    expired_session, fresh_session, invalid_grant, server_unavailable, wait_until, ClientHarness,
    EventRecorder, MockResponse,
};
use crate::params::SignOutScope;
use crate::types::AuthChangeEvent;
use crate::AuthError;
use auth_storage::{LocalStorage, StorageKeys};
use serde_json::json;
use std::time::Duration;

async fn signed_in_client() -> (ClientHarness, EventRecorder) {
    let h = ClientHarness::new();
    h.seed(&fresh_session("a1", "r1"));
    let recorder = EventRecorder::on_client(&h.client);
    wait_until(|| !recorder.events().is_empty()).await;
    (h, recorder)
}

#[tokio::test]
async fn others_scope_keeps_local_session() {
    let (h, recorder) = signed_in_client().await;
    h.transport.on("logout", MockResponse::Raw(204, Vec::new()));

    h.client.sign_out(SignOutScope::Others).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        h.stored_session().map(|session| session.access_token),
        Some("a1".to_string())
    );
    assert_eq!(recorder.count(AuthChangeEvent::SignedOut), 0);

    let request = &h.transport.requests("logout")[0];
    assert_eq!(request.query_param("scope").as_deref(), Some("others"));
    assert_eq!(request.header("authorization"), Some("Bearer a1"));
}

#[tokio::test]
async fn not_found_still_clears_session_with_one_event() {
    let (h, recorder) = signed_in_client().await;
    h.transport.on(
        "logout",
        MockResponse::Json(404, json!({"code": 404, "msg": "Session not found"})),
    );

    h.client.sign_out(SignOutScope::Local).await.unwrap();
    wait_until(|| recorder.count(AuthChangeEvent::SignedOut) == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(h.stored_session().is_none());
    assert_eq!(recorder.count(AuthChangeEvent::SignedOut), 1);
    assert!(recorder.changes().last().unwrap().session.is_none());
}

#[tokio::test]
async fn unauthorized_and_forbidden_count_as_signed_out() {
    for status in [401u16, 403] {
        let (h, _recorder) = signed_in_client().await;
        h.transport.on(
            "logout",
            MockResponse::Json(status, json!({"msg": "invalid JWT"})),
        );

        assert!(h.client.sign_out(SignOutScope::Global).await.is_ok());
        assert!(h.stored_session().is_none());
    }
}

#[tokio::test]
async fn other_logout_failures_surface_after_local_clear() {
    let (h, recorder) = signed_in_client().await;
    h.transport.on(
        "logout",
        MockResponse::Json(500, json!({"msg": "database unavailable"})),
    );

    let result = h.client.sign_out(SignOutScope::Local).await;
    wait_until(|| recorder.count(AuthChangeEvent::SignedOut) == 1).await;

    match result {
        Err(AuthError::Api(api)) => assert_eq!(api.status, 500),
        other => panic!("expected API error, got {:?}", other),
    }
    assert!(h.stored_session().is_none());
}

#[tokio::test]
async fn global_scope_is_sent_to_server() {
    let (h, _recorder) = signed_in_client().await;
    h.transport.on("logout", MockResponse::Raw(204, Vec::new()));

    h.client.sign_out(SignOutScope::Global).await.unwrap();

    let request = &h.transport.requests("logout")[0];
    assert_eq!(request.query_param("scope").as_deref(), Some("global"));
}

#[tokio::test]
async fn without_session_only_local_state_is_cleared() {
    let h = ClientHarness::new();
    let recorder = EventRecorder::on_client(&h.client);
    wait_until(|| !recorder.events().is_empty()).await;

    h.client.sign_out(SignOutScope::Local).await.unwrap();
    wait_until(|| recorder.count(AuthChangeEvent::SignedOut) == 1).await;

    assert_eq!(h.transport.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn local_state_is_cleared_before_remote_call() {
    let (h, recorder) = signed_in_client().await;
    h.transport.on(
        "logout",
        MockResponse::delayed(Duration::from_secs(5), MockResponse::Raw(204, Vec::new())),
    );

    let (result, during) = tokio::join!(h.client.sign_out(SignOutScope::Local), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        (h.stored_session(), recorder.count(AuthChangeEvent::SignedOut))
    });

    assert!(result.is_ok());
    assert_eq!(during, (None, 1));
}

#[tokio::test]
async fn sign_out_removes_pending_code_verifier() {
    let (h, _recorder) = signed_in_client().await;
    h.transport.on("logout", MockResponse::Raw(204, Vec::new()));
    let verifier_key = StorageKeys::code_verifier_key(StorageKeys::DEFAULT_SESSION_KEY);
    h.storage.store(&verifier_key, b"verifier").unwrap();

    h.client.sign_out(SignOutScope::Local).await.unwrap();

    assert!(!h.storage.has(&verifier_key).unwrap());
}

#[tokio::test]
async fn others_scope_with_expired_session_leaves_it_in_place() {
    let h = ClientHarness::new();
    h.seed(&expired_session("a1", "r1"));
    h.transport.on("token", invalid_grant());
    h.transport.on("logout", MockResponse::Raw(204, Vec::new()));

    h.client.sign_out(SignOutScope::Others).await.unwrap();

    assert_eq!(
        h.stored_session().map(|session| session.access_token),
        Some("a1".to_string())
    );
    assert_eq!(h.transport.calls("token"), 0);
    let request = &h.transport.requests("logout")[0];
    assert_eq!(request.header("authorization"), Some("Bearer a1"));
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_cleared_without_refreshing() {
    let h = ClientHarness::new();
    h.seed(&expired_session("a1", "r1"));
    h.transport.on("token", server_unavailable());
    h.transport.on("logout", MockResponse::Raw(204, Vec::new()));

    let started = tokio::time::Instant::now();
    h.client.sign_out(SignOutScope::Local).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(h.stored_session().is_none());
    assert_eq!(h.transport.calls("token"), 0);
    let request = &h.transport.requests("logout")[0];
    assert_eq!(request.header("authorization"), Some("Bearer a1"));
    assert_eq!(request.query_param("scope").as_deref(), Some("local"));
}
