//! Background auto-refresh loop.

use crate::config::RefreshConfig;
use crate::session::SessionManager;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

struct RunningLoop {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Proactively refreshes the stored session before it expires.
///
/// Every `tick_interval` the loop looks at the stored session and, once it
/// expires within `tick_threshold` ticks, forces a refresh through the
/// [`SessionManager`]. Failures are logged and retried on the next tick.
pub struct AutoRefreshScheduler {
    manager: SessionManager,
    config: RefreshConfig,
    running: Mutex<Option<RunningLoop>>,
}

impl AutoRefreshScheduler {
    pub fn new(manager: SessionManager, config: RefreshConfig) -> Self {
        Self {
            manager,
            config,
            running: Mutex::new(None),
        }
    }

    /// Start the loop. Returns `false` if it was already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
        {
            trace!(client_id = %self.manager.client_id(), "Auto-refresh already running");
            return false;
        }

        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(run(self.manager.clone(), self.config.clone(), cancelled));
        *running = Some(RunningLoop { cancel, handle });

        info!(
            client_id = %self.manager.client_id(),
            tick_secs = self.config.tick_interval.as_secs(),
            "Auto-refresh started"
        );
        true
    }

    /// Stop the loop. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(current) => {
                let _ = current.cancel.send(true);
                info!(client_id = %self.manager.client_id(), "Auto-refresh stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
    }
}

impl Drop for AutoRefreshScheduler {
    fn drop(&mut self) {
        if let Some(current) = self.running.get_mut().take() {
            let _ = current.cancel.send(true);
        }
    }
}

async fn run(manager: SessionManager, config: RefreshConfig, mut cancelled: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = cancelled.changed() => break,
            _ = tokio::time::sleep(config.tick_interval) => {}
        }
        if *cancelled.borrow() {
            break;
        }

        tokio::select! {
            _ = cancelled.changed() => break,
            _ = tick(&manager, &config) => {}
        }
    }
    debug!(client_id = %manager.client_id(), "Auto-refresh loop exited");
}

async fn tick(manager: &SessionManager, config: &RefreshConfig) {
    let Some(session) = manager.stored_session() else {
        trace!(client_id = %manager.client_id(), "No stored session, skipping tick");
        return;
    };

    let ticks = ticks_until_expiry(session.expires_at, Utc::now().timestamp(), config);
    if ticks > config.tick_threshold {
        trace!(client_id = %manager.client_id(), ticks, "Session still fresh");
        return;
    }

    debug!(
        client_id = %manager.client_id(),
        ticks,
        threshold = config.tick_threshold,
        "Session close to expiry, refreshing"
    );
    if let Err(e) = manager.refresh(None).await {
        warn!(client_id = %manager.client_id(), error = %e, "Auto-refresh tick failed");
    }
}

/// `floor((expires_at - now) / tick_interval)`.
fn ticks_until_expiry(expires_at: i64, now: i64, config: &RefreshConfig) -> i64 {
    let tick_ms = i64::try_from(config.tick_interval.as_millis())
        .unwrap_or(i64::MAX)
        .max(1);
    expires_at
        .saturating_sub(now)
        .saturating_mul(1000)
        .div_euclid(tick_ms)
}
