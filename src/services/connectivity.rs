// Connectivity Manager
// Tracks remote reachability: UNKNOWN -> CONNECTED / DISCONNECTED on probe results.
// Readers never block on probes; background and out-of-band probes update state.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config_store::EngineConfig;
use super::remote_client::{RemoteDetector, RemoteError};
use crate::models::ConnectivityState;

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivitySnapshot {
    pub state: ConnectivityState,
    pub attempts: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    state: ConnectivityState,
    attempts: u32,
    checked_at: Option<Instant>,
    last_checked: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Clears `probe_in_flight` when the spawned probe ends, is aborted or panics.
struct InFlightGuard(Arc<ConnectivityManager>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.probe_in_flight.store(false, Ordering::Release);
    }
}

pub struct ConnectivityManager {
    inner: Mutex<Inner>,
    probe_timeout: Duration,
    max_attempts: u32,
    freshness_window: Duration,
    probe_in_flight: AtomicBool,
}

impl ConnectivityManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            probe_timeout: config.probe_timeout(),
            max_attempts: config.max_attempts.max(1),
            freshness_window: config.freshness_window(),
            probe_in_flight: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectivityState::Connected
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        let inner = self.inner.lock();
        ConnectivitySnapshot {
            state: inner.state,
            attempts: inner.attempts,
            last_checked: inner.last_checked,
            last_error: inner.last_error.clone(),
        }
    }

    /// True when the state was never checked or is older than the freshness window.
    pub fn is_stale(&self) -> bool {
        match self.inner.lock().checked_at {
            Some(at) => at.elapsed() > self.freshness_window,
            None => true,
        }
    }

    /// Whether the periodic timer should probe now. Stops re-probing a
    /// disconnected service once the attempt budget is spent.
    pub fn wants_background_probe(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            ConnectivityState::Disconnected => inner.attempts < self.max_attempts,
            ConnectivityState::Connected | ConnectivityState::Unknown => true,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.state = ConnectivityState::Connected;
        inner.attempts = 0;
        inner.checked_at = Some(Instant::now());
        inner.last_checked = Some(Utc::now());
        inner.last_error = None;
        drop(inner);

        if previous != ConnectivityState::Connected {
            info!("[CONNECTIVITY] {:?} -> CONNECTED", previous);
        }
    }

    pub fn record_failure(&self, reason: &str) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.state = ConnectivityState::Disconnected;
        inner.attempts = inner.attempts.saturating_add(1).min(self.max_attempts);
        inner.checked_at = Some(Instant::now());
        inner.last_checked = Some(Utc::now());
        inner.last_error = Some(reason.to_string());
        let attempts = inner.attempts;
        drop(inner);

        warn!(
            "[CONNECTIVITY] {:?} -> DISCONNECTED attempt={}/{} reason={}",
            previous, attempts, self.max_attempts, reason
        );
    }

    /// Used by the orchestrator after a failed remote masking call.
    pub fn mark_disconnected(&self, reason: &str) {
        self.record_failure(reason);
    }

    /// Probe once under the probe timeout and record the outcome.
    pub async fn probe(&self, remote: &dyn RemoteDetector) -> bool {
        let outcome = match tokio::time::timeout(self.probe_timeout, remote.health_check()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.probe_timeout)),
        };

        match outcome {
            Ok(()) => {
                self.record_success();
                true
            }
            Err(e) => {
                self.record_failure(&e.to_string());
                false
            }
        }
    }

    /// Manual reconnect: reset the attempt budget and probe inline.
    pub async fn reconnect(&self, remote: &dyn RemoteDetector) -> bool {
        info!("[CONNECTIVITY] manual reconnect to {}", remote.endpoint());
        self.inner.lock().attempts = 0;
        self.probe(remote).await
    }

    /// Fire a probe without waiting for it. At most one out-of-band probe runs
    /// at a time; extra requests are dropped.
    pub fn spawn_probe(self: &Arc<Self>, remote: Arc<dyn RemoteDetector>) -> Option<JoinHandle<bool>> {
        if self.probe_in_flight.swap(true, Ordering::AcqRel) {
            debug!("[CONNECTIVITY] probe already in flight, skipping");
            return None;
        }
        let guard = InFlightGuard(Arc::clone(self));
        Some(tokio::spawn(async move {
            guard.0.probe(remote.as_ref()).await
        }))
    }

    /// Periodic health loop. Runs until `cancel` fires.
    pub fn spawn_health_loop(
        self: &Arc<Self>,
        remote: Arc<dyn RemoteDetector>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if manager.wants_background_probe() {
                            manager.probe(remote.as_ref()).await;
                        } else {
                            debug!("[CONNECTIVITY] attempt budget spent, waiting for reconnect");
                        }
                    }
                }
            }
            debug!("[CONNECTIVITY] health loop stopped");
        })
    }
}
