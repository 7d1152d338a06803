use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::GatewayError,
    hub::models::HistoryRow,
    model::{parse_timestamp, EnvironmentalSnapshot, HistoryPoint, RelayStates, Thresholds},
};

// ---------------------------------------------------------------------------
// device_status/{deviceId}
//
// Written wholesale by the hub on every sync:
//
// {
//   "device_id": "rpi_01",
//   "timestamp": "...",
//   "sensor_data":  { "temperature", "humidity", "last_reading" },
//   "relay_status": { "heater", "humidifier", "water_pump", "aquarium_pump" },
//   "thresholds":   { "temp_min", "temp_max", "humidity_min", "humidity_max" },
//   "esp32_status": { "connected", "last_contact" },
//   "system_info":  { "uptime", "status" }
// }
//
// Only the sensor readings are mandatory; sections the hub has not written
// yet keep their defaults.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DeviceStatusDoc {
    pub sensor_data: SensorSection,
    #[serde(default, alias = "relay_states")]
    pub relay_status: RelaySection,
    pub thresholds: Option<ThresholdSection>,
    #[serde(default)]
    pub esp32_status: Esp32Section,
}

#[derive(Debug, Deserialize)]
pub struct SensorSection {
    pub temperature: f64,
    pub humidity: f64,
    pub last_reading: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub heater: bool,
    pub humidifier: bool,
    pub water_pump: bool,
    pub aquarium_pump: bool,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdSection {
    #[serde(alias = "temperature_min")]
    pub temp_min: f64,
    #[serde(alias = "temperature_max")]
    pub temp_max: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Esp32Section {
    pub connected: bool,
    pub last_contact: Option<String>,
}

impl TryFrom<DeviceStatusDoc> for EnvironmentalSnapshot {
    type Error = GatewayError;

    fn try_from(doc: DeviceStatusDoc) -> Result<Self, GatewayError> {
        let SensorSection { temperature, humidity, last_reading } = doc.sensor_data;
        if !temperature.is_finite() || !humidity.is_finite() {
            return Err(GatewayError::malformed("sensor_data: non-finite reading"));
        }

        let thresholds = match doc.thresholds {
            Some(t) => Thresholds::new(t.temp_min, t.temp_max, t.humidity_min, t.humidity_max)
                .map_err(|e| GatewayError::malformed(format!("thresholds: {e}")))?,
            None => Thresholds::default(),
        };

        let r = doc.relay_status;
        Ok(Self {
            temperature,
            humidity,
            relays: RelayStates {
                heater: r.heater,
                humidifier: r.humidifier,
                water_pump: r.water_pump,
                aquarium_pump: r.aquarium_pump,
            },
            thresholds,
            device_connected: doc.esp32_status.connected,
            last_contact: doc.esp32_status.last_contact.as_deref().and_then(parse_timestamp),
            last_reading: last_reading.as_deref().and_then(parse_timestamp),
            retrieved_at: Utc::now(),
        })
    }
}

/// Decode a `device_status` value; an absent document means the hub never
/// published.
pub fn snapshot_from_value(value: Option<Value>) -> Result<EnvironmentalSnapshot, GatewayError> {
    let value = value.ok_or_else(|| GatewayError::unreachable("hub has not published a status"))?;
    let doc: DeviceStatusDoc = serde_json::from_value(value)
        .map_err(|e| GatewayError::malformed(format!("device_status: {e}")))?;
    EnvironmentalSnapshot::try_from(doc)
}

// ---------------------------------------------------------------------------
// devices/{deviceId}
// ---------------------------------------------------------------------------

pub const HUB_DEVICE_TYPE: &str = "raspberry_pi";

#[derive(Debug, Deserialize)]
pub struct DeviceEntry {
    pub device_type: Option<String>,
}

/// First registered device whose `device_type` is the hub's.
pub fn find_hub_device(devices: &Value) -> Option<String> {
    devices.as_object()?.iter().find_map(|(id, entry)| {
        let entry = DeviceEntry::deserialize(entry).ok()?;
        (entry.device_type.as_deref() == Some(HUB_DEVICE_TYPE)).then(|| id.clone())
    })
}

// ---------------------------------------------------------------------------
// historical_data/{deviceId}
//
// Either a list or a map keyed by push id (which sorts chronologically).
// Rows that do not decode are skipped.
// ---------------------------------------------------------------------------

pub fn history_points(value: Option<Value>) -> Vec<HistoryPoint> {
    let rows: Vec<Value> = match value {
        Some(Value::Array(items)) => items,
        Some(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
        _ => Vec::new(),
    };

    rows.into_iter()
        .filter_map(|row| serde_json::from_value::<HistoryRow>(row).ok())
        .map(|row| HistoryPoint::from(&row))
        .collect()
}
