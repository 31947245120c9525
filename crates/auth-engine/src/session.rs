//! Session manager.
//!
//! Owns the "give me a valid session" path: reads the stored session,
//! checks expiry and joins or starts the single in-flight refresh. At most
//! one refresh network exchange is outstanding per client at any time.
//!
//! The refresh itself runs on a spawned task so it always settles, even if
//! every caller awaiting it goes away. Its outcome is shared by all waiters.
//!
//! `update` and `remove` bump a write epoch. A refresh that started under an
//! older epoch does not touch the store when it settles; its waiters get
//! [`RefreshError::Superseded`], except `session()` callers, who get the
//! newer session if it is still valid.

use crate::error::RefreshError;
use crate::event_bus::EventBus;
use crate::refresher::TokenRefresher;
use crate::store::SessionStore;
use crate::types::{AuthChangeEvent, Session};
use crate::{AuthError, AuthResult};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type RefreshFuture = Shared<BoxFuture<'static, Result<Session, RefreshError>>>;

struct InFlightRefresh {
    id: u64,
    refresh_token: String,
    future: RefreshFuture,
}

/// Why a refresh is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    /// The stored session is expired.
    Expired,
    /// Refresh the stored session now, regardless of expiry.
    Forced,
    /// Refresh a caller-supplied token that may not be the stored one.
    Explicit,
}

enum Flight {
    Ready(Session),
    Pending(RefreshFuture),
    /// A refresh for another token is running; wait for it, then retry.
    Busy(RefreshFuture),
}

struct ManagerInner {
    client_id: Uuid,
    store: SessionStore,
    refresher: TokenRefresher,
    bus: EventBus,
    expiry_margin: Duration,
    in_flight: Mutex<Option<InFlightRefresh>>,
    next_flight_id: AtomicU64,
    epoch: Mutex<u64>,
}

/// Coordinates session reads, refreshes and writes for one client.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(client_id: Uuid, store: SessionStore, refresher: TokenRefresher, bus: EventBus) -> Self {
        let expiry_margin = refresher.config().expiry_margin;
        Self {
            inner: Arc::new(ManagerInner {
                client_id,
                store,
                refresher,
                bus,
                expiry_margin,
                in_flight: Mutex::new(None),
                next_flight_id: AtomicU64::new(1),
                epoch: Mutex::new(0),
            }),
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.inner.client_id
    }

    /// Get the current session, refreshing it first if it is expired.
    ///
    /// With `validate_expiration == false` the stored session is returned
    /// as-is. Fails with [`AuthError::SessionMissing`] when nothing is
    /// stored, or with the refresh error when the refresh fails.
    pub async fn session(&self, validate_expiration: bool) -> AuthResult<Session> {
        let session = self.inner.store.get().ok_or(AuthError::SessionMissing)?;

        if !validate_expiration || !session.is_expired_with(self.inner.expiry_margin) {
            return Ok(session);
        }

        debug!(
            client_id = %self.inner.client_id,
            expires_at = session.expires_at,
            "Stored session expired, refreshing"
        );
        self.join_refresh(session.refresh_token, RefreshMode::Expired)
            .await
    }

    /// Refresh now, regardless of expiry.
    ///
    /// With `None` the stored session's refresh token is used. Joins a
    /// refresh that is already in flight instead of starting another one.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> AuthResult<Session> {
        match refresh_token {
            Some(token) => {
                self.join_refresh(token.to_string(), RefreshMode::Explicit)
                    .await
            }
            None => {
                let session = self.inner.store.get().ok_or(AuthError::SessionMissing)?;
                self.join_refresh(session.refresh_token, RefreshMode::Forced)
                    .await
            }
        }
    }

    /// Replace the stored session and announce it with `event`.
    pub fn update(&self, session: &Session, event: AuthChangeEvent) -> AuthResult<()> {
        {
            let mut epoch = self.inner.epoch.lock();
            *epoch += 1;
            self.inner.store.store(session)?;
            self.inner.bus.emit(event, Some(session.clone()));
        }
        self.inner.detach_in_flight();

        info!(
            client_id = %self.inner.client_id,
            user_id = %session.user.id,
            event = ?event,
            "Session updated"
        );
        Ok(())
    }

    /// Delete the stored session. Emits nothing.
    pub fn remove(&self) -> AuthResult<()> {
        {
            let mut epoch = self.inner.epoch.lock();
            *epoch += 1;
            self.inner.store.delete()?;
        }
        self.inner.detach_in_flight();

        debug!(client_id = %self.inner.client_id, "Session removed");
        Ok(())
    }

    /// The stored session without expiry validation or network access.
    pub fn stored_session(&self) -> Option<Session> {
        self.inner.store.get()
    }

    /// True while a refresh exchange is outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    async fn join_refresh(&self, refresh_token: String, mode: RefreshMode) -> AuthResult<Session> {
        loop {
            let future = match self.flight(refresh_token.clone(), mode)? {
                Flight::Ready(session) => return Ok(session),
                Flight::Pending(future) => future,
                Flight::Busy(other) => {
                    let _ = other.await;
                    continue;
                }
            };

            return match future.await {
                Err(RefreshError::Superseded) if mode == RefreshMode::Expired => {
                    // A newer session was written while we waited.
                    self.inner
                        .store
                        .get()
                        .filter(|session| !session.is_expired_with(self.inner.expiry_margin))
                        .ok_or(AuthError::Refresh(RefreshError::Superseded))
                }
                result => result.map_err(AuthError::from),
            };
        }
    }

    /// Join the in-flight refresh, or create it.
    ///
    /// An explicit refresh only joins a flight for the same token.
    ///
    /// Without an in-flight refresh the store is re-read under the lock: a
    /// session replaced meanwhile (different refresh token), or one that is
    /// no longer expired, is returned instead of refreshing again.
    fn flight(&self, refresh_token: String, mode: RefreshMode) -> AuthResult<Flight> {
        let started_epoch = *self.inner.epoch.lock();
        let mut slot = self.inner.in_flight.lock();

        if let Some(in_flight) = slot.as_ref() {
            if mode == RefreshMode::Explicit && in_flight.refresh_token != refresh_token {
                debug!(
                    client_id = %self.inner.client_id,
                    flight_id = in_flight.id,
                    "Waiting for refresh of another token"
                );
                return Ok(Flight::Busy(in_flight.future.clone()));
            }
            debug!(
                client_id = %self.inner.client_id,
                flight_id = in_flight.id,
                "Joining in-flight refresh"
            );
            return Ok(Flight::Pending(in_flight.future.clone()));
        }

        if mode != RefreshMode::Explicit {
            let stored = self.inner.store.get().ok_or(AuthError::SessionMissing)?;
            if stored.refresh_token != refresh_token {
                debug!(client_id = %self.inner.client_id, "Session already replaced, skipping refresh");
                return Ok(Flight::Ready(stored));
            }
            if mode == RefreshMode::Expired && !stored.is_expired_with(self.inner.expiry_margin) {
                return Ok(Flight::Ready(stored));
            }
        }

        let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let token = refresh_token.clone();
        let handle = tokio::spawn(async move {
            let result = inner.refresher.refresh(&token).await;
            let outcome = inner.settle(started_epoch, result);
            inner.clear_in_flight(id);
            outcome
        });

        let future = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(RefreshError::Transient(format!("refresh task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        debug!(client_id = %self.inner.client_id, flight_id = id, mode = ?mode, "Starting refresh");
        *slot = Some(InFlightRefresh {
            id,
            refresh_token,
            future: future.clone(),
        });
        Ok(Flight::Pending(future))
    }
}

impl ManagerInner {
    /// Apply a finished refresh to the store, unless the session was
    /// replaced or removed while it ran.
    fn settle(
        &self,
        started_epoch: u64,
        result: Result<Session, RefreshError>,
    ) -> Result<Session, RefreshError> {
        let epoch = self.epoch.lock();
        if *epoch != started_epoch {
            info!(client_id = %self.client_id, "Discarding refresh result for a replaced session");
            return Err(RefreshError::Superseded);
        }

        match result {
            Ok(session) => {
                if let Err(e) = self.store.store(&session) {
                    error!(client_id = %self.client_id, error = %e, "Failed to persist refreshed session");
                }
                self.bus
                    .emit(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
                info!(
                    client_id = %self.client_id,
                    user_id = %session.user.id,
                    expires_at = session.expires_at,
                    "Session refreshed"
                );
                Ok(session)
            }
            Err(e) if e.is_permanent() => {
                warn!(client_id = %self.client_id, error = %e, "Refresh token rejected, clearing session");
                if let Err(delete_err) = self.store.delete() {
                    error!(client_id = %self.client_id, error = %delete_err, "Failed to clear rejected session");
                }
                Err(e)
            }
            Err(e) => {
                warn!(client_id = %self.client_id, error = %e, "Refresh failed, keeping stored session");
                Err(e)
            }
        }
    }

    fn clear_in_flight(&self, id: u64) {
        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            *slot = None;
        }
    }

    fn detach_in_flight(&self) {
        if let Some(in_flight) = self.in_flight.lock().take() {
            debug!(client_id = %self.client_id, flight_id = in_flight.id, "Detached in-flight refresh");
        }
    }
}
