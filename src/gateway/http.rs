use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{EnvironmentGateway, GatewaySettings, SnapshotObserver, SubscriptionSlot};
use crate::{
    error::GatewayError,
    hub::HubClient,
    model::{EnvironmentalSnapshot, HistoricalData, RelayId, ThresholdUpdate},
};

/// Pull-based gateway over the hub's JSON API. Live updates are emulated by
/// polling `/status`.
#[derive(Debug)]
pub struct HttpGateway {
    hub: HubClient,
    poll_interval: Duration,
    subscription: SubscriptionSlot,
}

impl HttpGateway {
    pub fn new(hub: HubClient, settings: GatewaySettings) -> Self {
        Self {
            hub,
            poll_interval: settings.poll_interval,
            subscription: SubscriptionSlot::default(),
        }
    }
}

#[async_trait]
impl EnvironmentGateway for HttpGateway {
    async fn fetch_snapshot(&self) -> Result<EnvironmentalSnapshot, GatewayError> {
        self.hub.get_status().await
    }

    async fn send_relay_command(
        &self,
        relay: RelayId,
        desired: bool,
    ) -> Result<bool, GatewayError> {
        info!(relay = %relay, state = desired, "Sending relay command");
        self.hub.control_relay(relay, desired).await
    }

    async fn send_threshold_update(&self, update: &ThresholdUpdate) -> Result<bool, GatewayError> {
        info!(thresholds = ?update.thresholds, "Sending threshold update");
        self.hub.update_thresholds(update).await
    }

    async fn fetch_history(&self, hours: u32) -> Result<HistoricalData, GatewayError> {
        self.hub.get_history(hours).await
    }

    fn subscribe(&self, observer: Arc<dyn SnapshotObserver>) {
        info!(interval_secs = self.poll_interval.as_secs(), "Status polling subscription started");
        self.subscription
            .start(poll_status(self.hub.clone(), self.poll_interval, observer));
    }

    fn unsubscribe(&self) {
        if self.subscription.stop() {
            info!("Status polling subscription stopped");
        }
    }
}

async fn poll_status(hub: HubClient, interval: Duration, observer: Arc<dyn SnapshotObserver>) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<EnvironmentalSnapshot> = None;

    loop {
        ticker.tick().await;
        match hub.get_status().await {
            Ok(snapshot) => {
                if last.as_ref().is_some_and(|prev| prev.same_state(&snapshot)) {
                    debug!("Hub status unchanged");
                    continue;
                }
                last = Some(snapshot.clone());
                observer.on_update(snapshot).await;
            }
            Err(e) => {
                warn!(error = %e, "Status poll failed");
                // The next good poll is delivered even if unchanged.
                last = None;
                observer.on_error(e).await;
            }
        }
    }
}
