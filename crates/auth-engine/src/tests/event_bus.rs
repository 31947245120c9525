//! Auth state notifications as seen through the client.

use super::harness::{
    expired_session, fresh_session, session_json, wait_until, ClientHarness, EventRecorder,
    MockResponse,
};
use crate::params::SignInWithPasswordParams;
use crate::types::AuthChangeEvent;
use crate::SignOutScope;

#[tokio::test]
async fn initial_session_carries_stored_session() {
    let h = ClientHarness::new();
    let stored = fresh_session("a1", "r1");
    h.seed(&stored);

    let recorder = EventRecorder::on_client(&h.client);
    wait_until(|| !recorder.events().is_empty()).await;

    let changes = recorder.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].event, AuthChangeEvent::InitialSession);
    assert_eq!(changes[0].session, Some(stored));
}

#[tokio::test]
async fn initial_session_without_stored_session_is_empty() {
    let h = ClientHarness::new();

    let recorder = EventRecorder::on_client(&h.client);
    wait_until(|| !recorder.events().is_empty()).await;

    assert_eq!(recorder.changes()[0].event, AuthChangeEvent::InitialSession);
    assert!(recorder.changes()[0].session.is_none());
}

#[tokio::test]
async fn expired_session_is_refreshed_before_initial_session() {
    let h = ClientHarness::new();
    h.seed(&expired_session("a1", "r1"));
    let refreshed = fresh_session("a2", "r2");
    h.transport
        .on("token", MockResponse::ok(serde_json::to_value(&refreshed).unwrap()));

    let recorder = EventRecorder::on_client(&h.client);
    wait_until(|| recorder.events().len() == 2).await;

    // The refresh happened while the initial state was computed; its event
    // is queued behind InitialSession.
    let changes = recorder.changes();
    assert_eq!(changes[0].event, AuthChangeEvent::InitialSession);
    assert_eq!(changes[0].session, Some(refreshed.clone()));
    assert_eq!(changes[1].event, AuthChangeEvent::TokenRefreshed);
    assert_eq!(h.transport.calls("token"), 1);
}

#[tokio::test]
async fn late_listener_gets_initial_session_exactly_once() {
    let h = ClientHarness::new();
    h.transport.on(
        "token",
        MockResponse::ok(session_json("a1", "r1", super::harness::now() + 3600)),
    );
    h.transport.on("logout", MockResponse::Raw(204, Vec::new()));

    let early = EventRecorder::on_client(&h.client);
    h.client
        .sign_in_with_password(SignInWithPasswordParams::email("user-1@example.com", "pw"))
        .await
        .unwrap();
    h.client.sign_out(SignOutScope::Local).await.unwrap();
    wait_until(|| early.events().len() == 3).await;

    let late = EventRecorder::on_client(&h.client);
    wait_until(|| !late.events().is_empty()).await;
    h.client
        .sign_in_with_password(SignInWithPasswordParams::email("user-1@example.com", "pw"))
        .await
        .unwrap();
    wait_until(|| late.events().len() == 2).await;
    wait_until(|| early.events().len() == 4).await;

    assert_eq!(
        early.events(),
        vec![
            AuthChangeEvent::InitialSession,
            AuthChangeEvent::SignedIn,
            AuthChangeEvent::SignedOut,
            AuthChangeEvent::SignedIn,
        ]
    );
    assert_eq!(
        late.events(),
        vec![AuthChangeEvent::InitialSession, AuthChangeEvent::SignedIn]
    );
    assert_eq!(late.count(AuthChangeEvent::InitialSession), 1);
}

#[tokio::test]
async fn removed_listener_stops_receiving() {
    let h = ClientHarness::new();
    h.transport.on(
        "token",
        MockResponse::ok(session_json("a1", "r1", super::harness::now() + 3600)),
    );

    let recorder = EventRecorder::on_client(&h.client);
    wait_until(|| !recorder.events().is_empty()).await;
    recorder.registration.remove();
    recorder.registration.remove();

    h.client
        .sign_in_with_password(SignInWithPasswordParams::email("user-1@example.com", "pw"))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(recorder.events(), vec![AuthChangeEvent::InitialSession]);
}

#[tokio::test]
async fn auth_state_changes_channel() {
    let h = ClientHarness::new();
    h.transport.on(
        "token",
        MockResponse::ok(session_json("a1", "r1", super::harness::now() + 3600)),
    );

    let mut changes = h.client.auth_state_changes();
    let initial = changes.recv().await.unwrap();
    assert_eq!(initial.event, AuthChangeEvent::InitialSession);

    let session = h
        .client
        .sign_in_with_password(SignInWithPasswordParams::email("user-1@example.com", "pw"))
        .await
        .unwrap();

    let signed_in = changes.recv().await.unwrap();
    assert_eq!(signed_in.event, AuthChangeEvent::SignedIn);
    assert_eq!(signed_in.session, Some(session));
}

#[tokio::test]
async fn shutdown_removes_all_listeners() {
    let h = ClientHarness::new();
    let first = EventRecorder::on_client(&h.client);
    let second = EventRecorder::on_client(&h.client);

    h.client.shutdown();

    assert!(first.registration.is_removed());
    assert!(second.registration.is_removed());
}

#[tokio::test]
async fn clients_do_not_share_events() {
    let first = ClientHarness::new();
    let second = ClientHarness::new();
    first.transport.on(
        "token",
        MockResponse::ok(session_json("a1", "r1", super::harness::now() + 3600)),
    );

    let other = EventRecorder::on_client(&second.client);
    wait_until(|| !other.events().is_empty()).await;

    first
        .client
        .sign_in_with_password(SignInWithPasswordParams::email("user-1@example.com", "pw"))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(other.events(), vec![AuthChangeEvent::InitialSession]);
    assert!(second.client.current_session().is_none());
    assert_ne!(first.client.client_id(), second.client.client_id());
}
