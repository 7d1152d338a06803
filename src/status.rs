//! Pure mapping from a snapshot to the classifications and advice shown to
//! the operator. Nothing here performs I/O or can fail; snapshots are
//! validated when they are parsed.

use std::fmt;

use serde::Serialize;

use crate::model::EnvironmentalSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Low,
    Optimal,
    High,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::Low => "LOW",
            Classification::Optimal => "OPTIMAL",
            Classification::High => "HIGH",
        })
    }
}

/// `value < min` is LOW, `value > max` is HIGH, anything else OPTIMAL.
pub fn classify(value: f64, min: f64, max: f64) -> Classification {
    if value < min {
        Classification::Low
    } else if value > max {
        Classification::High
    } else {
        Classification::Optimal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemActivity {
    Active,
    Standby,
}

impl fmt::Display for SystemActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SystemActivity::Active => "ACTIVE",
            SystemActivity::Standby => "STANDBY",
        })
    }
}

pub fn system_activity(snapshot: &EnvironmentalSnapshot) -> SystemActivity {
    if snapshot.relays.any_active() {
        SystemActivity::Active
    } else {
        SystemActivity::Standby
    }
}

pub fn temperature_status(snapshot: &EnvironmentalSnapshot) -> Classification {
    let t = &snapshot.thresholds;
    classify(snapshot.temperature, t.temp_min(), t.temp_max())
}

pub fn humidity_status(snapshot: &EnvironmentalSnapshot) -> Classification {
    let t = &snapshot.thresholds;
    classify(snapshot.humidity, t.humidity_min(), t.humidity_max())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    MonitorHeating,
    ReduceHeating,
    MonitorHumidity,
    ReduceHumidity,
    CheckHubConnection,
    EnvironmentOptimal,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::MonitorHeating => "monitor heating",
            Recommendation::ReduceHeating => "reduce heating",
            Recommendation::MonitorHumidity => "monitor humidity",
            Recommendation::ReduceHumidity => "reduce humidity",
            Recommendation::CheckHubConnection => "check hub connection",
            Recommendation::EnvironmentOptimal => "environment optimal",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advice in a fixed order: temperature, humidity, connectivity, and the
/// all-clear last.
pub fn recommendations(snapshot: &EnvironmentalSnapshot) -> Vec<Recommendation> {
    let temperature = temperature_status(snapshot);
    let humidity = humidity_status(snapshot);
    let mut out = Vec::new();

    match temperature {
        Classification::Low => out.push(Recommendation::MonitorHeating),
        Classification::High => out.push(Recommendation::ReduceHeating),
        Classification::Optimal => {}
    }
    match humidity {
        Classification::Low => out.push(Recommendation::MonitorHumidity),
        Classification::High => out.push(Recommendation::ReduceHumidity),
        Classification::Optimal => {}
    }
    if !snapshot.device_connected {
        out.push(Recommendation::CheckHubConnection);
    }
    if out.is_empty() {
        out.push(Recommendation::EnvironmentOptimal);
    }
    out
}

/// Everything the dashboard renders for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub temperature: Classification,
    pub humidity: Classification,
    pub activity: SystemActivity,
    pub active_relays: usize,
    pub recommendations: Vec<Recommendation>,
}

impl StatusReport {
    pub fn from_snapshot(snapshot: &EnvironmentalSnapshot) -> Self {
        Self {
            temperature: temperature_status(snapshot),
            humidity: humidity_status(snapshot),
            activity: system_activity(snapshot),
            active_relays: snapshot.relays.active_count(),
            recommendations: recommendations(snapshot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RelayId, RelayStates, Thresholds};

    fn snapshot(temperature: f64, humidity: f64, connected: bool) -> EnvironmentalSnapshot {
        EnvironmentalSnapshot {
            temperature,
            humidity,
            thresholds: Thresholds::new(25.0, 28.0, 60.0, 80.0).unwrap(),
            device_connected: connected,
            ..Default::default()
        }
    }

    #[test]
    fn classify_boundaries_are_optimal() {
        assert_eq!(classify(25.0, 25.0, 28.0), Classification::Optimal);
        assert_eq!(classify(28.0, 25.0, 28.0), Classification::Optimal);
        assert_eq!(classify(24.99, 25.0, 28.0), Classification::Low);
        assert_eq!(classify(28.01, 25.0, 28.0), Classification::High);
    }

    #[test]
    fn classify_is_monotonic_in_value() {
        let (min, max) = (-3.5, 12.25);
        let mut previous = Classification::Low;
        for step in -200..=200 {
            let value = step as f64 * 0.1;
            let class = classify(value, min, max);
            assert!(class >= previous, "classification went backwards at {value}");
            previous = class;
        }
        assert_eq!(previous, Classification::High);
    }

    #[test]
    fn classify_degenerate_range() {
        assert_eq!(classify(5.0, 5.0, 5.0), Classification::Optimal);
        assert_eq!(classify(4.0, 5.0, 5.0), Classification::Low);
        assert_eq!(classify(6.0, 5.0, 5.0), Classification::High);
    }

    #[test]
    fn activity_follows_relays() {
        let mut s = snapshot(26.0, 70.0, true);
        assert_eq!(system_activity(&s), SystemActivity::Standby);
        for relay in RelayId::ALL {
            let mut relays = RelayStates::default();
            relays.set(relay, true);
            s.relays = relays;
            assert_eq!(system_activity(&s), SystemActivity::Active, "{relay} alone");
        }
    }

    #[test]
    fn cold_snapshot_is_low_and_asks_for_heating() {
        let s = snapshot(22.0, 70.0, true);
        assert_eq!(temperature_status(&s), Classification::Low);
        assert_eq!(recommendations(&s), vec![Recommendation::MonitorHeating]);
    }

    #[test]
    fn in_range_connected_idle_is_exactly_optimal() {
        let s = snapshot(26.0, 70.0, true);
        let recs: Vec<&str> = recommendations(&s).into_iter().map(Recommendation::as_str).collect();
        assert_eq!(recs, vec!["environment optimal"]);
    }

    #[test]
    fn disconnected_hub_is_never_optimal() {
        let s = snapshot(26.0, 70.0, false);
        assert_eq!(recommendations(&s), vec![Recommendation::CheckHubConnection]);
    }

    #[test]
    fn recommendation_order_is_temperature_humidity_connectivity() {
        let s = snapshot(20.0, 90.0, false);
        assert_eq!(
            recommendations(&s),
            vec![
                Recommendation::MonitorHeating,
                Recommendation::ReduceHumidity,
                Recommendation::CheckHubConnection,
            ]
        );
    }

    #[test]
    fn report_bundles_everything() {
        let mut s = snapshot(30.0, 50.0, true);
        s.relays.heater = true;
        let report = StatusReport::from_snapshot(&s);
        assert_eq!(report.temperature, Classification::High);
        assert_eq!(report.humidity, Classification::Low);
        assert_eq!(report.activity, SystemActivity::Active);
        assert_eq!(report.active_relays, 1);
        assert_eq!(
            report.recommendations,
            vec![Recommendation::ReduceHeating, Recommendation::MonitorHumidity]
        );
    }
}
