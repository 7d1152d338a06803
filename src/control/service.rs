use std::{sync::Arc, time::Duration};

use tokio::time;
use tracing::{error, info, warn};

use super::plan_actions;
use crate::{gateway::EnvironmentGateway, snapshot_cache::SnapshotCache};

/// Applies the automation rules to the cached snapshot on a fixed interval.
pub struct ControlService {
    gateway: Arc<dyn EnvironmentGateway>,
    cache: SnapshotCache,
    interval: Duration,
}

impl ControlService {
    pub fn new(gateway: Arc<dyn EnvironmentGateway>, cache: SnapshotCache, interval: Duration) -> Self {
        Self { gateway, cache, interval }
    }

    /// Runs the control loop indefinitely.
    /// Spawn this via `tokio::spawn`.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Control loop started");
        let mut ticker = time::interval(self.interval);

        loop {
            ticker.tick().await;
            let applied = self.run_once().await;
            if applied > 0 {
                info!(applied, "Control iteration applied relay changes");
            }
        }
    }

    /// One pass over the latest fresh snapshot. Returns how many commands
    /// the hub acknowledged.
    pub async fn run_once(&self) -> usize {
        let Some(snapshot) = self.cache.fresh().await else {
            info!("No fresh snapshot in cache; skipping control iteration");
            return 0;
        };

        let mut applied = 0;
        for action in plan_actions(&snapshot) {
            info!(
                relay = %action.relay,
                state = action.desired,
                temperature = snapshot.temperature,
                humidity = snapshot.humidity,
                "Automation rule triggered"
            );

            match self.gateway.send_relay_command(action.relay, action.desired).await {
                Ok(true) => applied += 1,
                Ok(false) => warn!(relay = %action.relay, "Hub refused automation command"),
                Err(e) => error!(relay = %action.relay, error = %e, "Automation command failed"),
            }
        }
        applied
    }
}
