//! Test doubles for the Roborock integration
//!
//! Provides a scripted cloud (discovery + MQTT), recording entity platforms
//! and a harness wiring them into a config entries manager.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ha_config_entries::{ConfigEntries, ConfigEntry, EntityPlatform};
use ha_core::Platform;
use ha_roborock::constants::{CONF_BASE_URL, CONF_ENTRY_USERNAME, CONF_USER_DATA};
use ha_roborock::{
    ApiError, ClientFactory, HomeData, RoborockApi, RoborockIntegration, RoborockMqtt, UserData,
    DOMAIN,
};
use ha_storage::Storage;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Barrier;

/// Install a tracing subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Everything the fake cloud was asked to do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum CloudCall {
    ApiClient {
        username: String,
        device_identifier: String,
        base_url: String,
    },
    GetHomeData(UserData),
    MqttClient(UserData, HomeData),
    Connect,
}

struct CloudState {
    calls: Mutex<Vec<CloudCall>>,
    home_data: Mutex<Result<HomeData, ApiError>>,
    connect_script: Mutex<VecDeque<Result<(), ApiError>>>,
}

/// Scripted Roborock cloud. Clones share state.
#[derive(Clone)]
pub struct MockCloud {
    state: Arc<CloudState>,
}

impl MockCloud {
    pub fn new() -> Self {
        Self {
            state: Arc::new(CloudState {
                calls: Mutex::new(Vec::new()),
                home_data: Mutex::new(Ok(discovered_home_data())),
                connect_script: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn fail_discovery(&self, err: ApiError) {
        *self.state.home_data.lock().unwrap() = Err(err);
    }

    /// Queue results for upcoming `connect` calls; once drained, connects succeed
    pub fn script_connects(&self, results: Vec<Result<(), ApiError>>) {
        self.state.connect_script.lock().unwrap().extend(results);
    }

    pub fn calls(&self) -> Vec<CloudCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn home_data_fetches(&self) -> usize {
        self.count(|c| matches!(c, CloudCall::GetHomeData(_)))
    }

    pub fn connects(&self) -> usize {
        self.count(|c| matches!(c, CloudCall::Connect))
    }

    fn count(&self, pred: impl Fn(&CloudCall) -> bool) -> usize {
        self.state.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: CloudCall) {
        self.state.calls.lock().unwrap().push(call);
    }
}

impl RoborockApi for MockCloud {
    fn get_home_data(&self, user_data: &UserData) -> Result<HomeData, ApiError> {
        self.record(CloudCall::GetHomeData(user_data.clone()));
        self.state.home_data.lock().unwrap().clone()
    }
}

impl RoborockMqtt for MockCloud {
    fn connect(&self) -> Result<(), ApiError> {
        self.record(CloudCall::Connect);
        self.state
            .connect_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

impl ClientFactory for MockCloud {
    fn api_client(
        &self,
        username: &str,
        device_identifier: &str,
        base_url: &str,
    ) -> Arc<dyn RoborockApi> {
        self.record(CloudCall::ApiClient {
            username: username.to_string(),
            device_identifier: device_identifier.to_string(),
            base_url: base_url.to_string(),
        });
        Arc::new(self.clone())
    }

    fn mqtt_client(&self, user_data: &UserData, home_data: &HomeData) -> Arc<dyn RoborockMqtt> {
        self.record(CloudCall::MqttClient(user_data.clone(), home_data.clone()));
        Arc::new(self.clone())
    }
}

/// Entity platform that records calls and answers unloads as configured
pub struct MockPlatform {
    pub setups: AtomicUsize,
    pub unloads: AtomicUsize,
    unload_ok: AtomicBool,
    unload_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            setups: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
            unload_ok: AtomicBool::new(true),
            unload_barrier: Mutex::new(None),
        })
    }

    pub fn refuse_unload(&self) {
        self.unload_ok.store(false, Ordering::SeqCst);
    }

    /// Make unloads wait on `barrier` before answering
    pub fn unload_through(&self, barrier: Arc<Barrier>) {
        *self.unload_barrier.lock().unwrap() = Some(barrier);
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityPlatform for MockPlatform {
    async fn setup_entry(&self, _entry: &ConfigEntry) -> Result<(), String> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unload_entry(&self, _entry: &ConfigEntry) -> bool {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        let barrier = self.unload_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        self.unload_ok.load(Ordering::SeqCst)
    }
}

/// Manager + integration + fake cloud + platforms
pub struct Harness {
    _dir: TempDir,
    pub entries: Arc<ConfigEntries>,
    pub integration: Arc<RoborockIntegration>,
    pub cloud: MockCloud,
    pub vacuum: Arc<MockPlatform>,
    pub sensor: Arc<MockPlatform>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();

        let dir = TempDir::new().unwrap();
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(dir.path()))));
        let cloud = MockCloud::new();
        let integration = Arc::new(RoborockIntegration::new(Arc::new(cloud.clone())));
        entries.register_integration(integration.clone());

        let vacuum = MockPlatform::new();
        let sensor = MockPlatform::new();
        entries.register_platform(DOMAIN, Platform::Vacuum, vacuum.clone());
        entries.register_platform(DOMAIN, Platform::Sensor, sensor.clone());

        Self {
            _dir: dir,
            entries,
            integration,
            cloud,
            vacuum,
            sensor,
        }
    }

    /// Add an entry to the manager and return it as stored
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntry {
        self.entries.add(entry).await.unwrap()
    }
}

/// Entry without cached home data: `user_data={"k":1}`, `base_url="https://x"`,
/// `username="u"`, unique id and entry id `dev1`
pub fn roborock_entry() -> ConfigEntry {
    let mut entry = ConfigEntry::new(DOMAIN, "u")
        .with_unique_id("dev1")
        .with_data_value(CONF_USER_DATA, json!({"k": 1}))
        .with_data_value(CONF_BASE_URL, json!("https://x"))
        .with_data_value(CONF_ENTRY_USERNAME, json!("u"));
    entry.entry_id = "dev1".to_string();
    entry
}

pub fn discovered_home_data() -> HomeData {
    HomeData(json!({"id": 1, "name": "My Home", "devices": [{"duid": "abc"}]}))
}

/// Let spawned platform setups run
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
