use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    error::GatewayError,
    model::{parse_timestamp, EnvironmentalSnapshot, Flag, HistoryPoint, RelayStates, Thresholds},
};

// ---------------------------------------------------------------------------
// Status: GET /status
//
// {
//   "timestamp": "2024-05-01T12:00:00.000000",
//   "sensor_data":  { "temperature": 26.1, "humidity": 71.0, "last_reading": "..." },
//   "relay_status": { "heater": false, "humidifier": true, "water_pump": false, "aquarium_pump": false },
//   "thresholds":   { "temperature_min": 25, "temperature_max": 28, "humidity_min": 60, "humidity_max": 80 },
//   "esp32_status": { "connected": true, "last_contact": "..." | null }
// }
//
// Every section is required on this endpoint.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub timestamp: Option<String>,
    pub sensor_data: SensorData,
    #[serde(alias = "relay_states")]
    pub relay_status: RelayStatus,
    pub thresholds: ThresholdValues,
    pub esp32_status: Esp32Status,
}

#[derive(Debug, Deserialize)]
pub struct SensorData {
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity percentage
    pub humidity: f64,
    pub last_reading: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RelayStatus {
    pub heater: bool,
    pub humidifier: bool,
    pub water_pump: bool,
    pub aquarium_pump: bool,
}

impl From<&RelayStatus> for RelayStates {
    fn from(r: &RelayStatus) -> Self {
        Self {
            heater: r.heater,
            humidifier: r.humidifier,
            water_pump: r.water_pump,
            aquarium_pump: r.aquarium_pump,
        }
    }
}

/// `/status` spells the temperature bounds out; `/thresholds` and the
/// realtime store abbreviate them. Both spellings are accepted.
#[derive(Debug, Deserialize)]
pub struct ThresholdValues {
    #[serde(alias = "temp_min")]
    pub temperature_min: f64,
    #[serde(alias = "temp_max")]
    pub temperature_max: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
}

impl TryFrom<&ThresholdValues> for Thresholds {
    type Error = GatewayError;

    fn try_from(t: &ThresholdValues) -> Result<Self, GatewayError> {
        Thresholds::new(t.temperature_min, t.temperature_max, t.humidity_min, t.humidity_max)
            .map_err(|e| GatewayError::malformed(format!("thresholds: {e}")))
    }
}

#[derive(Debug, Deserialize)]
pub struct Esp32Status {
    pub connected: bool,
    pub last_contact: Option<String>,
}

impl TryFrom<StatusResponse> for EnvironmentalSnapshot {
    type Error = GatewayError;

    fn try_from(s: StatusResponse) -> Result<Self, GatewayError> {
        let SensorData { temperature, humidity, last_reading } = s.sensor_data;
        if !temperature.is_finite() || !humidity.is_finite() {
            return Err(GatewayError::malformed("sensor_data: non-finite reading"));
        }

        Ok(Self {
            temperature,
            humidity,
            relays: RelayStates::from(&s.relay_status),
            thresholds: Thresholds::try_from(&s.thresholds)?,
            device_connected: s.esp32_status.connected,
            last_contact: s.esp32_status.last_contact.as_deref().and_then(parse_timestamp),
            last_reading: last_reading.as_deref().and_then(parse_timestamp),
            retrieved_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Write envelope: POST /control, POST /thresholds
//
//   { "status": "success", "message": "heater turned ON" }
//   { "status": "error",   "message": "Failed to control heater" }
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WriteResponse {
    pub status: String,
    pub message: Option<String>,
}

impl WriteResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Serialize)]
pub struct ControlRequest<'a> {
    pub relay: &'a str,
    pub state: bool,
}

#[derive(Debug, Serialize)]
pub struct ThresholdRequest {
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity_min: f64,
    pub humidity_max: f64,
}

impl From<&Thresholds> for ThresholdRequest {
    fn from(t: &Thresholds) -> Self {
        Self {
            temp_min: t.temp_min(),
            temp_max: t.temp_max(),
            humidity_min: t.humidity_min(),
            humidity_max: t.humidity_max(),
        }
    }
}

// ---------------------------------------------------------------------------
// History: GET /history?hours=N
//
//   { "status": "success", "data": [ { "timestamp", "temperature", "humidity",
//                                      "heater_status", "humidifier_status" } ] }
//   { "status": "error", "message": "..." }
//
// The hub returns rows newest first and stores relay flags as 0/1.
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub status: String,
    #[serde(default)]
    pub data: Vec<HistoryRow>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryRow {
    pub timestamp: Option<String>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub heater_status: Option<Flag>,
    pub humidifier_status: Option<Flag>,
}

impl From<&HistoryRow> for HistoryPoint {
    fn from(row: &HistoryRow) -> Self {
        Self {
            timestamp: row.timestamp.as_deref().and_then(parse_timestamp),
            temperature: row.temperature.unwrap_or_default(),
            humidity: row.humidity.unwrap_or_default(),
            heater_on: row.heater_status.is_some_and(Flag::as_bool),
            humidifier_on: row.humidifier_status.is_some_and(Flag::as_bool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = r#"{
        "timestamp": "2024-05-01T12:00:00.000000",
        "sensor_data": {"temperature": 26.5, "humidity": 71.2, "last_reading": "2024-05-01T11:59:30.000000"},
        "relay_status": {"heater": false, "humidifier": true, "water_pump": false, "aquarium_pump": true},
        "thresholds": {"temperature_min": 25.0, "temperature_max": 28.0, "humidity_min": 60.0, "humidity_max": 80.0},
        "esp32_status": {"connected": true, "last_contact": null}
    }"#;

    #[test]
    fn status_maps_to_snapshot() {
        let resp: StatusResponse = serde_json::from_str(STATUS).unwrap();
        let s = EnvironmentalSnapshot::try_from(resp).unwrap();
        assert_eq!(s.temperature, 26.5);
        assert_eq!(s.humidity, 71.2);
        assert!(s.relays.humidifier);
        assert!(s.relays.aquarium_pump);
        assert!(!s.relays.heater);
        assert_eq!(s.thresholds.temp_max(), 28.0);
        assert!(s.device_connected);
        assert!(s.last_contact.is_none());
        assert!(s.last_reading.is_some());
    }

    #[test]
    fn status_accepts_relay_states_and_short_threshold_names() {
        let body = STATUS
            .replace("relay_status", "relay_states")
            .replace("temperature_min", "temp_min")
            .replace("temperature_max", "temp_max");
        let resp: StatusResponse = serde_json::from_str(&body).unwrap();
        assert!(EnvironmentalSnapshot::try_from(resp).is_ok());
    }

    #[test]
    fn status_missing_section_fails_to_deserialize() {
        let body = r#"{"sensor_data": {"temperature": 1.0, "humidity": 2.0}}"#;
        let err = serde_json::from_str::<StatusResponse>(body).unwrap_err();
        assert!(err.to_string().contains("relay_status"));
    }

    #[test]
    fn inverted_thresholds_are_malformed() {
        let body = STATUS.replace("\"temperature_min\": 25.0", "\"temperature_min\": 30.0");
        let resp: StatusResponse = serde_json::from_str(&body).unwrap();
        let err = EnvironmentalSnapshot::try_from(resp).unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(msg) if msg.contains("thresholds")));
    }

    #[test]
    fn write_envelope_success() {
        let ok: WriteResponse = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        let err: WriteResponse =
            serde_json::from_str(r#"{"status":"error","message":"nope"}"#).unwrap();
        assert!(ok.is_success());
        assert!(!err.is_success());
    }

    #[test]
    fn history_rows_accept_integer_flags() {
        let body = r#"{"status":"success","data":[
            {"timestamp":"2024-05-01 12:00:00","temperature":24.0,"humidity":65.0,"heater_status":1,"humidifier_status":0}
        ]}"#;
        let resp: HistoryResponse = serde_json::from_str(body).unwrap();
        let point = HistoryPoint::from(&resp.data[0]);
        assert!(point.heater_on);
        assert!(!point.humidifier_on);
        assert!(point.timestamp.is_some());
    }

    #[test]
    fn control_request_serializes_wire_shape() {
        let body = serde_json::to_value(ControlRequest { relay: "water_pump", state: true }).unwrap();
        assert_eq!(body, serde_json::json!({"relay": "water_pump", "state": true}));
    }
}
