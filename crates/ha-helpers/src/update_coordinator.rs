//! Data update coordinator
//!
//! Polls an integration's data source on a fixed interval and keeps the
//! latest result plus a `last_update_success` flag for dependents. One
//! coordinator exists per config entry; entities read from it instead of
//! talking to the device themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Raised by an updater when fetching data failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct UpdateFailed(pub String);

impl UpdateFailed {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The data source a coordinator polls
#[async_trait]
pub trait DataUpdater: Send + Sync + 'static {
    type Data: Clone + Send + Sync + 'static;

    /// Fetch fresh data. Called at most once at a time per coordinator.
    async fn update(&self) -> Result<Self::Data, UpdateFailed>;
}

/// Result of the most recent refresh
#[derive(Debug, Clone)]
pub struct CoordinatorSnapshot<T> {
    /// Data from the last successful update
    pub data: Option<T>,
    /// Whether the last update succeeded
    pub last_update_success: bool,
    /// Error of the last update, cleared on success
    pub last_error: Option<UpdateFailed>,
    /// When the last update finished
    pub last_update: Option<DateTime<Utc>>,
}

impl<T> Default for CoordinatorSnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            last_update_success: true,
            last_error: None,
            last_update: None,
        }
    }
}

/// Periodic refresh driver around a [`DataUpdater`]
pub struct DataUpdateCoordinator<U: DataUpdater> {
    name: String,
    update_interval: Duration,
    updater: U,
    refresh_lock: Mutex<()>,
    snapshot: watch::Sender<CoordinatorSnapshot<U::Data>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl<U: DataUpdater> DataUpdateCoordinator<U> {
    /// Create a coordinator. Nothing is polled until [`refresh`](Self::refresh)
    /// or [`start`](Self::start) is called.
    pub fn new(name: impl Into<String>, update_interval: Duration, updater: U) -> Self {
        let (snapshot, _) = watch::channel(CoordinatorSnapshot::default());
        Self {
            name: name.into(),
            update_interval,
            updater,
            refresh_lock: Mutex::new(()),
            snapshot,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn updater(&self) -> &U {
        &self.updater
    }

    /// Run one update and record its outcome
    pub async fn refresh(&self) {
        let _guard = self.refresh_lock.lock().await;

        let result = self.updater.update().await;
        let was_success = self.last_update_success();
        let now = Utc::now();

        match result {
            Ok(data) => {
                if !was_success {
                    info!("Fetching {} data recovered", self.name);
                }
                self.snapshot.send_modify(|s| {
                    s.data = Some(data);
                    s.last_update_success = true;
                    s.last_error = None;
                    s.last_update = Some(now);
                });
            }
            Err(err) => {
                // Only the transition into failure is worth an error line
                if was_success {
                    error!("Error fetching {} data: {}", self.name, err);
                } else {
                    debug!("Error fetching {} data: {}", self.name, err);
                }
                self.snapshot.send_modify(|s| {
                    s.last_update_success = false;
                    s.last_error = Some(err);
                    s.last_update = Some(now);
                });
            }
        }
    }

    pub fn last_update_success(&self) -> bool {
        self.snapshot.borrow().last_update_success
    }

    pub fn last_error(&self) -> Option<UpdateFailed> {
        self.snapshot.borrow().last_error.clone()
    }

    /// Data from the last successful update
    pub fn data(&self) -> Option<U::Data> {
        self.snapshot.borrow().data.clone()
    }

    /// Watch refresh results
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorSnapshot<U::Data>> {
        self.snapshot.subscribe()
    }

    /// Start the scheduled refresh.
    ///
    /// The first refresh happens one interval from now; callers are expected
    /// to have refreshed once already. Calling this again is a no-op, and a
    /// coordinator cannot be restarted after [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) || self.cancel.is_cancelled() {
            return;
        }

        let coordinator = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let name = self.name.clone();
        let mut interval = tokio::time::interval(self.update_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(coordinator) = coordinator.upgrade() else { break };
                        coordinator.refresh().await;
                    }
                }
            }

            debug!("Stopped scheduled refresh of {}", name);
        });

        debug!(
            "Scheduled refresh of {} every {:?}",
            self.name, self.update_interval
        );
    }

    /// Stop the scheduled refresh
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<U: DataUpdater> Drop for DataUpdateCoordinator<U> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
