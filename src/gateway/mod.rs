//! Remote state gateway: one capability trait over the hub, with a
//! pull-based HTTP backend and a push-based realtime-store backend chosen at
//! startup.

pub mod correlation;
pub mod http;
pub mod realtime;

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    config::{Config, GatewayBackend},
    error::GatewayError,
    hub::HubClient,
    model::{EnvironmentalSnapshot, HistoricalData, RelayId, ThresholdUpdate},
    store::FirebaseStore,
};

pub use self::{http::HttpGateway, realtime::RealtimeGateway};

/// Receives live updates from a subscription. Called from the gateway's
/// listener task, one call at a time and in transport order.
#[async_trait]
pub trait SnapshotObserver: Send + Sync {
    async fn on_update(&self, snapshot: EnvironmentalSnapshot);

    /// The subscription stays active after an error.
    async fn on_error(&self, error: GatewayError);
}

#[async_trait]
pub trait EnvironmentGateway: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<EnvironmentalSnapshot, GatewayError>;

    /// Issue exactly one command. `Ok(false)` means the hub answered and
    /// refused.
    async fn send_relay_command(&self, relay: RelayId, desired: bool)
        -> Result<bool, GatewayError>;

    /// `Ok(true)` means the write was accepted, not that the hub applied it.
    async fn send_threshold_update(&self, update: &ThresholdUpdate) -> Result<bool, GatewayError>;

    async fn fetch_history(&self, hours: u32) -> Result<HistoricalData, GatewayError>;

    /// Start delivering updates to `observer`. A second call replaces the
    /// first subscription.
    fn subscribe(&self, observer: Arc<dyn SnapshotObserver>);

    /// Stop delivering updates. Safe to call when not subscribed.
    fn unsubscribe(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub request_timeout: Duration,
    pub command_timeout: Duration,
    pub poll_interval: Duration,
}

impl From<&Config> for GatewaySettings {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout,
            command_timeout: config.command_timeout,
            poll_interval: config.poll_interval,
        }
    }
}

/// Build the backend named by the configuration.
pub fn connect(config: &Config) -> Result<Arc<dyn EnvironmentGateway>, GatewayError> {
    let settings = GatewaySettings::from(config);

    match &config.backend {
        GatewayBackend::Http { base_url } => {
            info!(base_url = %base_url, "Using HTTP hub gateway");
            let hub = HubClient::new(base_url, settings.request_timeout)?;
            Ok(Arc::new(HttpGateway::new(hub, settings)))
        }
        GatewayBackend::Firebase { database_url, auth_token, device_id } => {
            info!(database_url = %database_url, device_id = ?device_id, "Using realtime database gateway");
            let store =
                FirebaseStore::new(database_url, auth_token.clone(), settings.request_timeout)?;
            Ok(Arc::new(RealtimeGateway::new(store, device_id.clone(), settings)))
        }
    }
}

/// Race `fut` against `limit`; the loser is dropped.
pub(crate) async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| GatewayError::Timeout(limit))?
}

// ---------------------------------------------------------------------------
// SubscriptionSlot
// ---------------------------------------------------------------------------

/// The single listener task a gateway may own.
#[derive(Debug, Default)]
pub struct SubscriptionSlot {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionSlot {
    /// Abort the current listener, if any, then spawn `listener`.
    pub fn start(&self, listener: impl Future<Output = ()> + Send + 'static) {
        let mut slot = self.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(listener));
    }

    /// Returns whether a listener was running.
    pub fn stop(&self) -> bool {
        match self.lock().take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SubscriptionSlot {
    fn drop(&mut self) {
        self.stop();
    }
}
