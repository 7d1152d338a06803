use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::{sync::mpsc, task::JoinHandle};

use greenhouse_client::{
    gateway::{EnvironmentGateway, GatewaySettings, RealtimeGateway, SnapshotObserver},
    model::{RelayId, ThresholdUpdate, Thresholds},
    store::{paths, MemoryStore, RealtimeStore},
    EnvironmentalSnapshot, GatewayError,
};

const DEVICE: &str = "rpi_01";

fn settings() -> GatewaySettings {
    GatewaySettings {
        request_timeout: Duration::from_secs(1),
        command_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(50),
    }
}

fn status_doc(temperature: f64) -> Value {
    json!({
        "device_id": DEVICE,
        "timestamp": "2024-05-01T12:00:00.000000",
        "sensor_data": {"temperature": temperature, "humidity": 70.0, "last_reading": "2024-05-01T11:59:50.000000"},
        "relay_status": {"heater": true, "humidifier": false, "water_pump": false, "aquarium_pump": true},
        "thresholds": {"temp_min": 25.0, "temp_max": 28.0, "humidity_min": 60.0, "humidity_max": 80.0},
        "esp32_status": {"connected": true, "last_contact": null},
        "system_info": {"uptime": 1234.5, "status": "running"}
    })
}

async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.set(&paths::device_status(DEVICE), &status_doc(26.0)).await.unwrap();
    store
}

fn gateway(store: MemoryStore) -> RealtimeGateway<MemoryStore> {
    RealtimeGateway::new(store, Some(DEVICE.to_owned()), settings())
}

/// Answers every relay command the way the hub does; the aquarium pump
/// channel always fails.
fn spawn_device(store: MemoryStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut commands = store.listen(&paths::relay_control(DEVICE)).await.unwrap();
        while let Some(Ok(command)) = commands.next().await {
            let Some(command) = command else { continue };
            let id = command["command_id"].as_str().unwrap().to_owned();
            let success = command["relay"] != "aquarium_pump";
            let response = json!({
                "command_id": id,
                "success": success,
                "timestamp": "2024-05-01T12:00:01.000000",
                "device_id": DEVICE,
            });
            store.set(&paths::command_response(&id), &response).await.unwrap();
        }
    })
}

async fn wait_until_removed(store: &MemoryStore, path: &str) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while store.get(path).await.unwrap().is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("response entry was not cleared");
}

type Update = Result<EnvironmentalSnapshot, GatewayError>;

struct Collect(mpsc::UnboundedSender<Update>);

#[async_trait]
impl SnapshotObserver for Collect {
    async fn on_update(&self, snapshot: EnvironmentalSnapshot) {
        let _ = self.0.send(Ok(snapshot));
    }

    async fn on_error(&self, error: GatewayError) {
        let _ = self.0.send(Err(error));
    }
}

fn observer() -> (Arc<Collect>, mpsc::UnboundedReceiver<Update>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Collect(tx)), rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Update>) -> Update {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no update delivered")
        .expect("observer channel closed")
}

// ---------------------------------------------------------------------------
// Snapshots and discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_snapshot_reads_device_status() {
    let gw = gateway(seeded_store().await);
    let snapshot = gw.fetch_snapshot().await.unwrap();

    assert_eq!(snapshot.temperature, 26.0);
    assert!(snapshot.relays.heater);
    assert!(snapshot.relays.aquarium_pump);
    assert_eq!(snapshot.thresholds.temp_max(), 28.0);
    assert!(snapshot.last_contact.is_none());
}

#[tokio::test]
async fn unpublished_status_is_unreachable() {
    let gw = gateway(MemoryStore::new());
    assert!(matches!(gw.fetch_snapshot().await, Err(GatewayError::Unreachable(_))));
}

#[tokio::test]
async fn hub_device_is_discovered_by_type() {
    let store = seeded_store().await;
    store
        .set(
            paths::DEVICES,
            &json!({
                "esp_01": {"device_type": "esp32"},
                "rpi_01": {"device_type": "raspberry_pi", "status": "online"}
            }),
        )
        .await
        .unwrap();

    let gw = RealtimeGateway::new(store, None, settings());
    assert_eq!(gw.fetch_snapshot().await.unwrap().temperature, 26.0);
}

#[tokio::test]
async fn discovery_without_hub_fails() {
    let store = seeded_store().await;
    let gw = RealtimeGateway::new(store.clone(), None, settings());
    assert!(matches!(gw.fetch_snapshot().await, Err(GatewayError::Unreachable(_))));

    store.set(paths::DEVICES, &json!({"esp_01": {"device_type": "esp32"}})).await.unwrap();
    assert!(matches!(gw.fetch_snapshot().await, Err(GatewayError::Unreachable(_))));
}

// ---------------------------------------------------------------------------
// Command correlation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn acknowledged_command_resolves_and_clears_response() {
    let store = seeded_store().await;
    let device = spawn_device(store.clone());
    let gw = gateway(store.clone());

    assert_eq!(gw.send_relay_command(RelayId::Humidifier, true).await, Ok(true));
    assert_eq!(gw.pending_commands(), 0);

    let command = store.get(&paths::relay_control(DEVICE)).await.unwrap().unwrap();
    assert_eq!(command["relay"], "humidifier");
    assert_eq!(command["state"], true);
    assert!(command["timestamp"].is_i64());
    let id = command["command_id"].as_str().unwrap().to_owned();

    wait_until_removed(&store, &paths::command_response(&id)).await;
    device.abort();
}

#[tokio::test]
async fn refused_command_reports_false() {
    let store = seeded_store().await;
    let device = spawn_device(store.clone());
    let gw = gateway(store);

    assert_eq!(gw.send_relay_command(RelayId::AquariumPump, false).await, Ok(false));
    assert_eq!(gw.send_relay_command(RelayId::WaterPump, true).await, Ok(true));
    assert_eq!(gw.pending_commands(), 0);
    device.abort();
}

#[tokio::test]
async fn every_command_gets_a_fresh_correlation_id() {
    let store = seeded_store().await;
    let device = spawn_device(store.clone());
    let gw = gateway(store.clone());

    gw.send_relay_command(RelayId::Heater, false).await.unwrap();
    let first = store.get(&paths::relay_control(DEVICE)).await.unwrap().unwrap();
    gw.send_relay_command(RelayId::Heater, false).await.unwrap();
    let second = store.get(&paths::relay_control(DEVICE)).await.unwrap().unwrap();

    assert_ne!(first["command_id"], second["command_id"]);
    device.abort();
}

#[tokio::test]
async fn unanswered_command_times_out_and_late_answer_is_ignored() {
    let store = seeded_store().await;
    let gw = gateway(store.clone());

    let err = gw.send_relay_command(RelayId::Heater, true).await.unwrap_err();
    assert_eq!(err, GatewayError::Timeout(Duration::from_millis(300)));
    assert_eq!(gw.pending_commands(), 0);

    let command = store.get(&paths::relay_control(DEVICE)).await.unwrap().unwrap();
    let id = command["command_id"].as_str().unwrap().to_owned();
    store
        .set(&paths::command_response(&id), &json!({"command_id": id, "success": true}))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gw.pending_commands(), 0);
    // Nobody is listening any more, so the late answer stays where it landed.
    assert!(store.get(&paths::command_response(&id)).await.unwrap().is_some());
}

#[tokio::test]
async fn abandoned_command_is_not_left_pending() {
    let store = seeded_store().await;
    let gw = gateway(store);

    let send = gw.send_relay_command(RelayId::Heater, true);
    assert!(tokio::time::timeout(Duration::from_millis(50), send).await.is_err());
    assert_eq!(gw.pending_commands(), 0);
}

#[tokio::test]
async fn offline_store_fails_command_without_leaking() {
    let store = seeded_store().await;
    let gw = gateway(store.clone());
    store.set_offline(true);

    let err = gw.send_relay_command(RelayId::Heater, true).await.unwrap_err();
    assert!(matches!(err, GatewayError::Unreachable(_)));
    assert_eq!(gw.pending_commands(), 0);
}

// ---------------------------------------------------------------------------
// Thresholds and history
// ---------------------------------------------------------------------------

#[tokio::test]
async fn threshold_update_is_written_for_the_hub() {
    let store = seeded_store().await;
    let gw = gateway(store.clone());

    let update = ThresholdUpdate::new(Thresholds::new(24.0, 29.0, 65.0, 90.0).unwrap());
    assert_eq!(gw.send_threshold_update(&update).await, Ok(true));

    let written = store.get(&paths::threshold_command(DEVICE)).await.unwrap().unwrap();
    assert_eq!(written["temp_min"], 24.0);
    assert_eq!(written["temp_max"], 29.0);
    assert_eq!(written["humidity_min"], 65.0);
    assert_eq!(written["humidity_max"], 90.0);
    assert_eq!(written["timestamp"], update.issued_at.timestamp_millis());
}

#[tokio::test]
async fn history_keeps_the_requested_window() {
    let store = seeded_store().await;
    let rows: Vec<Value> = (0..20)
        .map(|i| {
            json!({
                "timestamp": format!("2024-05-01T{:02}:{:02}:00", 8 + i / 6, (i % 6) * 10),
                "temperature": 20.0 + i as f64,
                "humidity": 60.0,
                "heater_status": i % 2 == 0,
                "humidifier_status": 0
            })
        })
        .collect();
    store.set(&paths::history(DEVICE), &Value::Array(rows)).await.unwrap();

    let history = gateway(store).fetch_history(2).await.unwrap();
    assert_eq!(history.hours, 2);
    assert_eq!(history.len(), 12);
    assert_eq!(history.points[0].temperature, 28.0);
    assert_eq!(history.points[11].temperature, 39.0);
}

#[tokio::test]
async fn missing_history_is_empty() {
    let history = gateway(seeded_store().await).fetch_history(24).await.unwrap();
    assert!(history.is_empty());
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscription_delivers_current_then_changes() {
    let store = seeded_store().await;
    let gw = gateway(store.clone());
    let (obs, mut rx) = observer();

    gw.subscribe(obs);
    assert_eq!(next(&mut rx).await.unwrap().temperature, 26.0);

    store.set(&paths::device_status(DEVICE), &status_doc(27.0)).await.unwrap();
    store.set(&paths::device_status(DEVICE), &status_doc(28.0)).await.unwrap();
    assert_eq!(next(&mut rx).await.unwrap().temperature, 27.0);
    assert_eq!(next(&mut rx).await.unwrap().temperature, 28.0);

    gw.unsubscribe();
    gw.unsubscribe();
    store.set(&paths::device_status(DEVICE), &status_doc(20.0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn second_subscription_replaces_the_first() {
    let store = seeded_store().await;
    let gw = gateway(store.clone());
    let (first, mut first_rx) = observer();
    let (second, mut second_rx) = observer();

    gw.subscribe(first);
    next(&mut first_rx).await.unwrap();

    gw.subscribe(second);
    next(&mut second_rx).await.unwrap();

    store.set(&paths::device_status(DEVICE), &status_doc(30.0)).await.unwrap();
    assert_eq!(next(&mut second_rx).await.unwrap().temperature, 30.0);
    assert!(first_rx.try_recv().is_err());

    gw.unsubscribe();
}

#[tokio::test]
async fn bad_document_is_reported_and_subscription_continues() {
    let store = seeded_store().await;
    let gw = gateway(store.clone());
    let (obs, mut rx) = observer();

    gw.subscribe(obs);
    next(&mut rx).await.unwrap();

    store
        .set(&paths::device_status(DEVICE), &json!({"relay_status": {"heater": true}}))
        .await
        .unwrap();
    assert!(matches!(next(&mut rx).await, Err(GatewayError::Malformed(_))));

    store.set(&paths::device_status(DEVICE), &status_doc(22.0)).await.unwrap();
    assert_eq!(next(&mut rx).await.unwrap().temperature, 22.0);
    gw.unsubscribe();
}

#[tokio::test]
async fn subscription_reattaches_after_connection_loss() {
    let store = seeded_store().await;
    let gw = gateway(store.clone());
    let (obs, mut rx) = observer();

    gw.subscribe(obs);
    next(&mut rx).await.unwrap();

    store.set_offline(true);
    assert!(matches!(next(&mut rx).await, Err(GatewayError::Unreachable(_))));

    store.set_offline(false);
    store.set(&paths::device_status(DEVICE), &status_doc(24.5)).await.unwrap();
    let snapshot = loop {
        match next(&mut rx).await {
            Ok(snapshot) => break snapshot,
            Err(GatewayError::Unreachable(_)) => continue,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    };
    assert_eq!(snapshot.temperature, 24.5);
    gw.unsubscribe();
}
