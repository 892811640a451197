//! Connection coordinator
//!
//! Keeps one MQTT session per config entry alive. Each scheduled tick
//! connects if the session is down and does nothing once it is up.
//!
//! ```text
//!                 ConnectFailed
//!                   ┌─────┐
//!                   ▼     │
//!             Disconnected ──ConnectSucceeded──▶ Connected
//!                   ▲                               │
//!                   └────────ConnectionLost─────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use ha_config_entries::ListenerId;
use ha_core::Platform;
use ha_helpers::{DataUpdateCoordinator, DataUpdater, UpdateFailed};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::RoborockMqtt;
use crate::constants::{DOMAIN, SCAN_INTERVAL};

/// MQTT session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Inputs of the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectSucceeded,
    ConnectFailed,
    /// The session dropped after having been established
    ConnectionLost,
}

impl ConnectionState {
    /// Next state after `event`
    pub fn transition(self, event: ConnectionEvent) -> ConnectionState {
        match (self, event) {
            (_, ConnectionEvent::ConnectSucceeded) => ConnectionState::Connected,
            (state, ConnectionEvent::ConnectFailed) => state,
            (_, ConnectionEvent::ConnectionLost) => ConnectionState::Disconnected,
        }
    }

    /// Whether a tick in this state has to call `connect`
    pub fn needs_connect(self) -> bool {
        self == ConnectionState::Disconnected
    }
}

/// Update routine: connect when disconnected
pub struct ConnectionUpdater {
    mqtt: Arc<dyn RoborockMqtt>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionUpdater {
    pub fn new(mqtt: Arc<dyn RoborockMqtt>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { mqtt, state }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn apply(&self, event: ConnectionEvent) -> ConnectionState {
        let mut next = ConnectionState::Disconnected;
        self.state.send_modify(|state| {
            *state = state.transition(event);
            next = *state;
        });
        next
    }
}

#[async_trait]
impl DataUpdater for ConnectionUpdater {
    type Data = ConnectionState;

    async fn update(&self) -> Result<ConnectionState, UpdateFailed> {
        let state = self.state();
        if !state.needs_connect() {
            return Ok(state);
        }

        debug!("Connecting to roborock mqtt");
        let mqtt = Arc::clone(&self.mqtt);
        let outcome = tokio::task::spawn_blocking(move || mqtt.connect()).await;

        match outcome {
            Ok(Ok(())) => Ok(self.apply(ConnectionEvent::ConnectSucceeded)),
            Ok(Err(err)) => {
                self.apply(ConnectionEvent::ConnectFailed);
                Err(UpdateFailed(err.to_string()))
            }
            Err(err) => {
                self.apply(ConnectionEvent::ConnectFailed);
                Err(UpdateFailed(format!("connect worker failed: {err}")))
            }
        }
    }
}

/// Per-entry coordinator of the Roborock integration
pub struct RoborockDataUpdateCoordinator {
    entry_id: String,
    inner: Arc<DataUpdateCoordinator<ConnectionUpdater>>,
    platforms: Vec<Platform>,
    update_listener: Option<ListenerId>,
}

impl RoborockDataUpdateCoordinator {
    pub fn new(entry_id: impl Into<String>, mqtt: Arc<dyn RoborockMqtt>) -> Self {
        Self {
            entry_id: entry_id.into(),
            inner: Arc::new(DataUpdateCoordinator::new(
                DOMAIN,
                SCAN_INTERVAL,
                ConnectionUpdater::new(mqtt),
            )),
            platforms: Vec::new(),
            update_listener: None,
        }
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    /// One update tick
    pub async fn refresh(&self) {
        self.inner.refresh().await;
    }

    pub fn last_update_success(&self) -> bool {
        self.inner.last_update_success()
    }

    pub fn last_error(&self) -> Option<UpdateFailed> {
        self.inner.last_error()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.updater().state()
    }

    /// Force a reconnect on the next tick.
    ///
    /// Polling never notices a dropped session by itself; whoever observes
    /// the drop reports it here.
    pub fn mark_disconnected(&self) {
        let updater = self.inner.updater();
        if updater.state() == ConnectionState::Connected {
            warn!("Roborock mqtt connection lost for entry {}", self.entry_id);
        }
        updater.apply(ConnectionEvent::ConnectionLost);
    }

    /// The underlying polling coordinator, for entities that watch it
    pub fn coordinator(&self) -> &Arc<DataUpdateCoordinator<ConnectionUpdater>> {
        &self.inner
    }

    /// Platforms this entry was forwarded to
    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub(crate) fn set_platforms(&mut self, platforms: Vec<Platform>) {
        self.platforms = platforms;
    }

    pub(crate) fn update_listener(&self) -> Option<ListenerId> {
        self.update_listener
    }

    pub(crate) fn set_update_listener(&mut self, id: ListenerId) {
        self.update_listener = Some(id);
    }

    /// Start ticking every [`SCAN_INTERVAL`]
    pub fn start(&self) {
        self.inner.start();
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}
