use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ThresholdError;

// ---------------------------------------------------------------------------
// Relays
// ---------------------------------------------------------------------------

/// Actuators wired to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayId {
    Heater,
    Humidifier,
    WaterPump,
    AquariumPump,
}

impl RelayId {
    pub const ALL: [RelayId; 4] = [
        RelayId::Heater,
        RelayId::Humidifier,
        RelayId::WaterPump,
        RelayId::AquariumPump,
    ];

    /// Name used on the wire by both hub transports.
    pub fn wire_name(self) -> &'static str {
        match self {
            RelayId::Heater => "heater",
            RelayId::Humidifier => "humidifier",
            RelayId::WaterPump => "water_pump",
            RelayId::AquariumPump => "aquarium_pump",
        }
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for RelayId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        RelayId::ALL
            .into_iter()
            .find(|r| r.wire_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown relay: {s:?}"))
    }
}

/// On/off state of every relay. All relays default to off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStates {
    pub heater: bool,
    pub humidifier: bool,
    pub water_pump: bool,
    pub aquarium_pump: bool,
}

impl RelayStates {
    pub fn get(&self, relay: RelayId) -> bool {
        match relay {
            RelayId::Heater => self.heater,
            RelayId::Humidifier => self.humidifier,
            RelayId::WaterPump => self.water_pump,
            RelayId::AquariumPump => self.aquarium_pump,
        }
    }

    pub fn set(&mut self, relay: RelayId, on: bool) {
        match relay {
            RelayId::Heater => self.heater = on,
            RelayId::Humidifier => self.humidifier = on,
            RelayId::WaterPump => self.water_pump = on,
            RelayId::AquariumPump => self.aquarium_pump = on,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (RelayId, bool)> + '_ {
        RelayId::ALL.into_iter().map(|r| (r, self.get(r)))
    }

    pub fn active_count(&self) -> usize {
        self.iter().filter(|(_, on)| *on).count()
    }

    pub fn any_active(&self) -> bool {
        self.active_count() > 0
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Operator-configured optimal bounds. Construct through [`Thresholds::new`]
/// so the `min <= max` invariant always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Thresholds {
    temp_min: f64,
    temp_max: f64,
    humidity_min: f64,
    humidity_max: f64,
}

impl Thresholds {
    pub fn new(
        temp_min: f64,
        temp_max: f64,
        humidity_min: f64,
        humidity_max: f64,
    ) -> Result<Self, ThresholdError> {
        check_bounds("temperature", temp_min, temp_max)?;
        check_bounds("humidity", humidity_min, humidity_max)?;
        Ok(Self { temp_min, temp_max, humidity_min, humidity_max })
    }

    pub fn temp_min(&self) -> f64 {
        self.temp_min
    }

    pub fn temp_max(&self) -> f64 {
        self.temp_max
    }

    pub fn humidity_min(&self) -> f64 {
        self.humidity_min
    }

    pub fn humidity_max(&self) -> f64 {
        self.humidity_max
    }
}

fn check_bounds(name: &'static str, min: f64, max: f64) -> Result<(), ThresholdError> {
    if !min.is_finite() || !max.is_finite() {
        return Err(ThresholdError::NotFinite { name });
    }
    if min > max {
        return Err(ThresholdError::Inverted { name, min, max });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One consistent read of the hub. Replaced wholesale on every update.
///
/// `Default` is the pre-fetch state: zero readings, every relay off,
/// zero thresholds, hub disconnected.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvironmentalSnapshot {
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity percentage
    pub humidity: f64,
    pub relays: RelayStates,
    pub thresholds: Thresholds,
    pub device_connected: bool,
    /// Last time the hub heard from its sensor node.
    pub last_contact: Option<DateTime<Utc>>,
    /// Hub-side time of the sensor reading.
    pub last_reading: Option<DateTime<Utc>>,
    /// Client-side capture time.
    pub retrieved_at: DateTime<Utc>,
}

impl EnvironmentalSnapshot {
    /// True when both snapshots describe the same remote state, regardless of
    /// when they were captured.
    pub fn same_state(&self, other: &Self) -> bool {
        self.temperature == other.temperature
            && self.humidity == other.humidity
            && self.relays == other.relays
            && self.thresholds == other.thresholds
            && self.device_connected == other.device_connected
            && self.last_contact == other.last_contact
            && self.last_reading == other.last_reading
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A single relay toggle awaiting one correlated acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayCommand {
    pub relay: RelayId,
    pub desired_state: bool,
    pub correlation_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

impl RelayCommand {
    pub fn new(relay: RelayId, desired_state: bool) -> Self {
        Self {
            relay,
            desired_state,
            correlation_id: Uuid::new_v4(),
            issued_at: Utc::now(),
        }
    }
}

/// Write-only threshold push.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdUpdate {
    pub thresholds: Thresholds,
    pub issued_at: DateTime<Utc>,
}

impl ThresholdUpdate {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds, issued_at: Utc::now() }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub timestamp: Option<DateTime<Utc>>,
    pub temperature: f64,
    pub humidity: f64,
    pub heater_on: bool,
    pub humidifier_on: bool,
}

/// Readings logged by the hub over a requested window, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoricalData {
    pub hours: u32,
    pub points: Vec<HistoryPoint>,
}

impl HistoricalData {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Relay flags logged by the hub arrive as JSON booleans or as SQLite 0/1.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Integer(i64),
}

impl Flag {
    pub fn as_bool(self) -> bool {
        match self {
            Flag::Bool(v) => v,
            Flag::Integer(v) => v != 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Parse a hub timestamp. The hub writes `datetime.isoformat()` without an
/// offset, which is taken as UTC; RFC 3339 with an offset is also accepted.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
