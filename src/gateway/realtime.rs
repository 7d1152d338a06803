use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{
    bounded, correlation::CommandCorrelator, EnvironmentGateway, GatewaySettings,
    SnapshotObserver, SubscriptionSlot,
};
use crate::{
    error::GatewayError,
    model::{EnvironmentalSnapshot, HistoricalData, RelayCommand, RelayId, ThresholdUpdate},
    store::{
        models::{find_hub_device, history_points, snapshot_from_value},
        paths, RealtimeStore, ValueStream,
    },
};

/// Readings the hub archives per hour.
const HISTORY_ROWS_PER_HOUR: usize = 6;

/// Push-based gateway over a realtime store shared with the hub.
pub struct RealtimeGateway<S> {
    inner: Arc<Inner<S>>,
    subscription: SubscriptionSlot,
}

struct Inner<S> {
    store: Arc<S>,
    device_id: OnceCell<String>,
    correlator: CommandCorrelator<S>,
    settings: GatewaySettings,
}

impl<S: RealtimeStore> RealtimeGateway<S> {
    /// With `device_id` unset the hub is discovered under `devices/*` on
    /// first use.
    pub fn new(store: S, device_id: Option<String>, settings: GatewaySettings) -> Self {
        let store = Arc::new(store);
        Self {
            inner: Arc::new(Inner {
                correlator: CommandCorrelator::new(
                    store.clone(),
                    settings.command_timeout,
                    settings.request_timeout,
                ),
                store,
                device_id: OnceCell::new_with(device_id),
                settings,
            }),
            subscription: SubscriptionSlot::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Commands still waiting for an acknowledgment.
    pub fn pending_commands(&self) -> usize {
        self.inner.correlator.pending().len()
    }
}

impl<S: RealtimeStore> Inner<S> {
    async fn device_id(&self) -> Result<&str, GatewayError> {
        let id = self
            .device_id
            .get_or_try_init(|| async {
                let devices = bounded(
                    self.settings.request_timeout,
                    self.store.get(paths::DEVICES),
                )
                .await?
                .ok_or_else(|| GatewayError::unreachable("no devices registered"))?;

                let id = find_hub_device(&devices)
                    .ok_or_else(|| GatewayError::unreachable("no hub device registered"))?;
                info!(device_id = %id, "Discovered hub device");
                Ok::<_, GatewayError>(id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn fetch_snapshot(&self) -> Result<EnvironmentalSnapshot, GatewayError> {
        let id = self.device_id().await?;
        let value = bounded(
            self.settings.request_timeout,
            self.store.get(&paths::device_status(id)),
        )
        .await?;
        snapshot_from_value(value)
    }
}

#[async_trait]
impl<S: RealtimeStore> EnvironmentGateway for RealtimeGateway<S> {
    async fn fetch_snapshot(&self) -> Result<EnvironmentalSnapshot, GatewayError> {
        self.inner.fetch_snapshot().await
    }

    async fn send_relay_command(
        &self,
        relay: RelayId,
        desired: bool,
    ) -> Result<bool, GatewayError> {
        let id = self.inner.device_id().await?;
        self.inner
            .correlator
            .send(id, RelayCommand::new(relay, desired))
            .await
    }

    async fn send_threshold_update(&self, update: &ThresholdUpdate) -> Result<bool, GatewayError> {
        let id = self.inner.device_id().await?;
        let t = &update.thresholds;
        let payload = json!({
            "temp_min": t.temp_min(),
            "temp_max": t.temp_max(),
            "humidity_min": t.humidity_min(),
            "humidity_max": t.humidity_max(),
            "timestamp": update.issued_at.timestamp_millis(),
        });

        bounded(
            self.inner.settings.request_timeout,
            self.inner.store.set(&paths::threshold_command(id), &payload),
        )
        .await?;
        info!(device_id = %id, thresholds = ?t, "Threshold update written");
        Ok(true)
    }

    async fn fetch_history(&self, hours: u32) -> Result<HistoricalData, GatewayError> {
        let id = self.inner.device_id().await?;
        let value = bounded(
            self.inner.settings.request_timeout,
            self.inner.store.get(&paths::history(id)),
        )
        .await?;

        let mut points = history_points(value);
        let keep = hours as usize * HISTORY_ROWS_PER_HOUR;
        if points.len() > keep {
            points.drain(..points.len() - keep);
        }
        debug!(device_id = %id, hours, points = points.len(), "History fetched");
        Ok(HistoricalData { hours, points })
    }

    fn subscribe(&self, observer: Arc<dyn SnapshotObserver>) {
        info!("Realtime status subscription started");
        self.subscription
            .start(listen_status(self.inner.clone(), observer));
    }

    fn unsubscribe(&self) {
        if self.subscription.stop() {
            info!("Realtime status subscription stopped");
        }
    }
}

/// Follows `device_status/{id}` for as long as the subscription lives,
/// re-attaching after `poll_interval` whenever the stream fails.
async fn listen_status<S: RealtimeStore>(inner: Arc<Inner<S>>, observer: Arc<dyn SnapshotObserver>) {
    loop {
        match attach(&inner).await {
            Ok(mut updates) => {
                while let Some(item) = updates.next().await {
                    match item.and_then(snapshot_from_value) {
                        Ok(snapshot) => observer.on_update(snapshot).await,
                        Err(e) => {
                            warn!(error = %e, "Realtime status update failed");
                            observer.on_error(e).await;
                        }
                    }
                }
                debug!("Realtime status stream ended");
            }
            Err(e) => {
                warn!(error = %e, "Failed to attach realtime status listener");
                observer.on_error(e).await;
            }
        }
        tokio::time::sleep(inner.settings.poll_interval).await;
        debug!("Re-attaching realtime status listener");
    }
}

async fn attach<S: RealtimeStore>(inner: &Inner<S>) -> Result<ValueStream, GatewayError> {
    let id = inner.device_id().await?;
    bounded(
        inner.settings.request_timeout,
        inner.store.listen(&paths::device_status(id)),
    )
    .await
}
