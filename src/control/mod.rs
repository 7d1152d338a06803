pub mod service;

pub use service::ControlService;

use crate::model::{EnvironmentalSnapshot, RelayId};

/// One relay change the automation rules ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub relay: RelayId,
    pub desired: bool,
}

/// Thermostat/humidistat rules, the same ones the hub runs locally:
///
/// - heater on below `temp_min`, off at or above `temp_max`
/// - humidifier on below `humidity_min`, off at or above `humidity_max`
///
/// Only changes are planned; nothing is planned for a disconnected hub.
pub fn plan_actions(snapshot: &EnvironmentalSnapshot) -> Vec<Action> {
    if !snapshot.device_connected {
        return Vec::new();
    }

    let t = &snapshot.thresholds;
    let relays = &snapshot.relays;
    let mut actions = Vec::new();

    if snapshot.temperature < t.temp_min() && !relays.heater {
        actions.push(Action { relay: RelayId::Heater, desired: true });
    } else if snapshot.temperature >= t.temp_max() && relays.heater {
        actions.push(Action { relay: RelayId::Heater, desired: false });
    }

    if snapshot.humidity < t.humidity_min() && !relays.humidifier {
        actions.push(Action { relay: RelayId::Humidifier, desired: true });
    } else if snapshot.humidity >= t.humidity_max() && relays.humidifier {
        actions.push(Action { relay: RelayId::Humidifier, desired: false });
    }

    actions
}
