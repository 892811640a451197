//! Setup / unload / reload of Roborock entries against a fake cloud

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{discovered_home_data, roborock_entry, settle, CloudCall, Harness};
use ha_config_entries::{
    ConfigEntriesError, ConfigEntryState, ConfigEntryUpdate, Integration, SetupError,
};
use ha_core::Platform;
use ha_roborock::constants::CONF_HOME_DATA;
use ha_roborock::{ApiError, ConnectionState, HomeData, UserData, SCAN_INTERVAL};
use serde_json::json;
use tokio::sync::Barrier;

#[tokio::test]
async fn test_setup_discovers_home_data_once() {
    let h = Harness::new();
    let entry = h.add(roborock_entry()).await;

    tokio_test::assert_ok!(h.integration.setup_entry(&h.entries, &entry).await);

    let user_data = UserData(json!({"k": 1}));
    assert_eq!(
        h.cloud.calls(),
        vec![
            CloudCall::ApiClient {
                username: "u".into(),
                device_identifier: "dev1".into(),
                base_url: "https://x".into(),
            },
            CloudCall::GetHomeData(user_data.clone()),
            CloudCall::MqttClient(user_data, discovered_home_data()),
            CloudCall::Connect,
        ]
    );

    assert_eq!(h.integration.registry().len(), 1);
    let coordinator = h.integration.coordinator("dev1").unwrap();
    assert!(coordinator.last_update_success());
    assert_eq!(coordinator.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_cached_home_data_skips_discovery() {
    let h = Harness::new();
    let cached = HomeData(json!({"id": 99}));
    let entry = h
        .add(roborock_entry().with_data_value(CONF_HOME_DATA, cached.0.clone()))
        .await;

    h.integration
        .setup_entry(&h.entries, &entry)
        .await
        .unwrap();

    assert_eq!(h.cloud.home_data_fetches(), 0);
    assert!(h
        .cloud
        .calls()
        .contains(&CloudCall::MqttClient(UserData(json!({"k": 1})), cached)));
}

#[tokio::test]
async fn test_discovered_home_data_not_written_back() {
    let h = Harness::new();
    let entry = h.add(roborock_entry()).await;

    h.entries.setup(&entry.entry_id).await.unwrap();

    let stored = h.entries.get(&entry.entry_id).unwrap();
    assert!(!stored.data.contains_key(CONF_HOME_DATA));
}

#[tokio::test]
async fn test_first_refresh_failure_is_not_ready() {
    let h = Harness::new();
    h.cloud
        .script_connects(vec![Err(ApiError::Connection("broker down".into()))]);
    let entry = h.add(roborock_entry()).await;

    let result = h.integration.setup_entry(&h.entries, &entry).await;

    assert_eq!(
        result,
        Err(SetupError::NotReady("connection failed: broker down".into()))
    );
    assert!(h.integration.registry().is_empty());
    assert_eq!(h.entries.update_listener_count(&entry.entry_id), 0);
    settle().await;
    assert_eq!(h.vacuum.setups(), 0);
}

#[tokio::test]
async fn test_discovery_failure_aborts_setup() {
    let h = Harness::new();
    h.cloud.fail_discovery(ApiError::Auth("token expired".into()));
    let entry = h.add(roborock_entry()).await;

    let result = h.integration.setup_entry(&h.entries, &entry).await;

    assert!(matches!(result, Err(SetupError::Failed(ref msg)) if msg.contains("token expired")));
    assert!(!h
        .cloud
        .calls()
        .iter()
        .any(|c| matches!(c, CloudCall::MqttClient(..))));
    assert!(h.integration.registry().is_empty());
}

#[tokio::test]
async fn test_missing_user_data_fails_setup() {
    let h = Harness::new();
    let mut entry = roborock_entry();
    entry.data.remove("user_data");
    let entry = h.add(entry).await;

    let result = h.integration.setup_entry(&h.entries, &entry).await;
    assert!(matches!(result, Err(SetupError::Failed(_))));
    assert!(h.cloud.calls().is_empty());
}

#[tokio::test]
async fn test_manager_maps_setup_outcomes() {
    let h = Harness::new();

    let entry = h.add(roborock_entry()).await;
    h.cloud
        .script_connects(vec![Err(ApiError::Connection("refused".into()))]);
    let result = h.entries.setup(&entry.entry_id).await;
    assert!(matches!(result, Err(ConfigEntriesError::NotReady(_))));
    assert_eq!(
        h.entries.get(&entry.entry_id).unwrap().state,
        ConfigEntryState::SetupRetry
    );

    // Next attempt connects
    h.entries.unload(&entry.entry_id).await.unwrap();
    h.entries.setup(&entry.entry_id).await.unwrap();
    assert!(h.entries.get(&entry.entry_id).unwrap().is_loaded());

    let h = Harness::new();
    h.cloud.fail_discovery(ApiError::Request("502".into()));
    let entry = h.add(roborock_entry()).await;
    let result = h.entries.setup(&entry.entry_id).await;
    assert!(matches!(result, Err(ConfigEntriesError::SetupFailed(_))));
    assert_eq!(
        h.entries.get(&entry.entry_id).unwrap().state,
        ConfigEntryState::SetupError
    );
}

#[tokio::test]
async fn test_connected_ticks_do_not_reconnect() {
    let h = Harness::new();
    let entry = h.add(roborock_entry()).await;
    h.integration
        .setup_entry(&h.entries, &entry)
        .await
        .unwrap();

    let coordinator = h.integration.coordinator("dev1").unwrap();
    for _ in 0..5 {
        coordinator.refresh().await;
    }

    assert_eq!(h.cloud.connects(), 1);
    assert!(coordinator.last_update_success());
}

#[tokio::test(start_paused = true)]
async fn test_connect_fault_retried_on_next_tick() {
    let h = Harness::new();
    let entry = h.add(roborock_entry()).await;
    h.integration
        .setup_entry(&h.entries, &entry)
        .await
        .unwrap();

    let coordinator = h.integration.coordinator("dev1").unwrap();
    coordinator.mark_disconnected();
    h.cloud
        .script_connects(vec![Err(ApiError::Connection("timeout".into()))]);

    // Tick N fails
    tokio::time::sleep(SCAN_INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(h.cloud.connects(), 2);
    assert!(!coordinator.last_update_success());
    assert_eq!(coordinator.connection_state(), ConnectionState::Disconnected);

    // Tick N+1 connects
    tokio::time::sleep(SCAN_INTERVAL).await;
    assert_eq!(h.cloud.connects(), 3);
    assert!(coordinator.last_update_success());
    assert_eq!(coordinator.connection_state(), ConnectionState::Connected);

    // Further ticks are no-ops
    tokio::time::sleep(SCAN_INTERVAL * 3).await;
    assert_eq!(h.cloud.connects(), 3);
}

#[tokio::test]
async fn test_platforms_forwarded_per_options() {
    let h = Harness::new();
    let entry = h
        .add(roborock_entry().with_option("sensor", json!(false)))
        .await;

    h.entries.setup(&entry.entry_id).await.unwrap();
    settle().await;

    assert_eq!(h.vacuum.setups(), 1);
    assert_eq!(h.sensor.setups(), 0);
    let coordinator = h.integration.coordinator("dev1").unwrap();
    assert_eq!(coordinator.platforms(), &[Platform::Vacuum]);

    assert!(h.entries.unload(&entry.entry_id).await.unwrap());
    assert_eq!(h.vacuum.unloads(), 1);
    assert_eq!(h.sensor.unloads(), 0);
}

#[tokio::test]
async fn test_unload_removes_coordinator() {
    let h = Harness::new();
    let entry = h.add(roborock_entry()).await;
    h.entries.setup(&entry.entry_id).await.unwrap();
    let coordinator = h.integration.coordinator("dev1").unwrap();

    assert!(h.entries.unload(&entry.entry_id).await.unwrap());

    assert!(h.integration.registry().is_empty());
    assert!(coordinator.coordinator().is_shutdown());
    assert_eq!(h.entries.update_listener_count(&entry.entry_id), 0);
    assert_eq!(h.vacuum.unloads(), 1);
    assert_eq!(h.sensor.unloads(), 1);
}

#[tokio::test]
async fn test_partial_unload_failure_keeps_coordinator() {
    let h = Harness::new();
    let entry = h.add(roborock_entry()).await;
    h.entries.setup(&entry.entry_id).await.unwrap();
    h.sensor.refuse_unload();

    assert!(!h.entries.unload(&entry.entry_id).await.unwrap());

    // Every platform was still asked
    assert_eq!(h.vacuum.unloads(), 1);
    assert_eq!(h.sensor.unloads(), 1);
    assert!(h.integration.registry().contains("dev1"));
    assert_eq!(
        h.entries.get(&entry.entry_id).unwrap().state,
        ConfigEntryState::FailedUnload
    );
}

#[tokio::test]
async fn test_unload_unknown_entry_succeeds() {
    let h = Harness::new();
    let entry = roborock_entry();
    assert!(h.integration.unload_entry(&h.entries, &entry).await);
}

#[tokio::test]
async fn test_unload_then_reload_leaves_one_coordinator() {
    let h = Harness::new();
    let entry = h.add(roborock_entry()).await;
    h.integration
        .setup_entry(&h.entries, &entry)
        .await
        .unwrap();
    let first = h.integration.coordinator("dev1").unwrap();

    assert!(h.integration.unload_entry(&h.entries, &entry).await);
    h.integration
        .reload_entry(&h.entries, &entry)
        .await
        .unwrap();

    assert_eq!(h.integration.registry().len(), 1);
    let current = h.integration.coordinator("dev1").unwrap();
    assert!(!Arc::ptr_eq(&first, &current));
    assert!(current.last_update_success());
    assert_eq!(h.entries.update_listener_count(&entry.entry_id), 1);
    // Fresh setup each time: one discovery per setup
    assert_eq!(h.cloud.home_data_fetches(), 2);
}

#[tokio::test]
async fn test_reload_after_failed_unload_replaces_coordinator() {
    let h = Harness::new();
    let entry = h.add(roborock_entry()).await;
    h.integration
        .setup_entry(&h.entries, &entry)
        .await
        .unwrap();
    let stale = h.integration.coordinator("dev1").unwrap();
    h.vacuum.refuse_unload();

    h.integration
        .reload_entry(&h.entries, &entry)
        .await
        .unwrap();

    assert_eq!(h.integration.registry().len(), 1);
    assert!(stale.coordinator().is_shutdown());
    assert_eq!(h.entries.update_listener_count(&entry.entry_id), 1);
}

#[tokio::test]
async fn test_options_update_reloads_entry() {
    let h = Harness::new();
    let entry = h.add(roborock_entry()).await;
    h.entries.setup(&entry.entry_id).await.unwrap();
    let before = h.integration.coordinator("dev1").unwrap();
    assert_eq!(before.platforms(), &[Platform::Vacuum, Platform::Sensor]);

    let options = HashMap::from([("sensor".to_string(), json!(false))]);
    h.entries
        .update(&entry.entry_id, ConfigEntryUpdate::new().options(options))
        .await
        .unwrap();

    let after = h.integration.coordinator("dev1").unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.platforms(), &[Platform::Vacuum]);
    assert!(before.coordinator().is_shutdown());
    assert_eq!(h.entries.update_listener_count(&entry.entry_id), 1);
    assert_eq!(h.sensor.unloads(), 1);
}

#[tokio::test]
async fn test_platforms_unload_concurrently() {
    let h = Harness::new();
    let entry = h.add(roborock_entry()).await;
    h.entries.setup(&entry.entry_id).await.unwrap();

    // Each unload waits for the other, so a one-at-a-time unload never returns
    let barrier = Arc::new(Barrier::new(2));
    h.vacuum.unload_through(barrier.clone());
    h.sensor.unload_through(barrier);

    let unloaded = tokio::time::timeout(
        Duration::from_secs(5),
        h.integration.unload_entry(&h.entries, &entry),
    )
    .await
    .expect("platform unloads did not overlap");

    assert!(unloaded);
    assert_eq!(h.vacuum.unloads(), 1);
    assert_eq!(h.sensor.unloads(), 1);
    assert!(h.integration.registry().is_empty());
}

#[tokio::test]
async fn test_options_reload_not_ready_leaves_entry_loaded() {
    let h = Harness::new();
    let entry = h.add(roborock_entry()).await;
    h.entries.setup(&entry.entry_id).await.unwrap();

    h.cloud
        .script_connects(vec![Err(ApiError::Connection("broker down".into()))]);
    let options = HashMap::from([("sensor".to_string(), json!(false))]);
    h.entries
        .update(&entry.entry_id, ConfigEntryUpdate::new().options(options))
        .await
        .unwrap();

    // Listener-driven reload bypasses the manager state
    assert!(h.entries.get(&entry.entry_id).unwrap().is_loaded());
    assert!(h.integration.registry().is_empty());
    assert_eq!(h.entries.update_listener_count(&entry.entry_id), 0);

    h.entries.reload(&entry.entry_id).await.unwrap();

    let coordinator = h.integration.coordinator("dev1").unwrap();
    assert!(coordinator.last_update_success());
    assert_eq!(coordinator.platforms(), &[Platform::Vacuum]);
    assert_eq!(h.entries.update_listener_count(&entry.entry_id), 1);
}
