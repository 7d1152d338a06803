//! Façade used by front ends: every operation runs on the worker pool and
//! its result is posted to the presentation context as a [`DashboardEvent`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    advisory::{AdvisoryClient, Analysis, DEFAULT_PROMPT},
    dispatch::{Dispatcher, WorkerPool},
    error::{AdvisoryError, GatewayError},
    gateway::{EnvironmentGateway, SnapshotObserver},
    model::{EnvironmentalSnapshot, HistoricalData, RelayId, ThresholdUpdate, Thresholds},
    snapshot_cache::SnapshotCache,
    status::StatusReport,
};

#[derive(Debug, Clone)]
pub enum DashboardEvent {
    Snapshot {
        snapshot: EnvironmentalSnapshot,
        report: StatusReport,
    },
    RelayCommand {
        relay: RelayId,
        desired: bool,
        outcome: Result<bool, GatewayError>,
    },
    Thresholds(Result<bool, GatewayError>),
    History(Result<HistoricalData, GatewayError>),
    AdvisoryStarted,
    AdvisoryFinished(Result<Analysis, AdvisoryError>),
    /// A fetch or the live subscription failed; cached data is now stale.
    Error(GatewayError),
}

#[derive(Clone)]
pub struct Dashboard {
    gateway: Arc<dyn EnvironmentGateway>,
    advisory: AdvisoryClient,
    pool: WorkerPool,
    events: Dispatcher<DashboardEvent>,
    cache: SnapshotCache,
}

impl Dashboard {
    pub fn new(
        gateway: Arc<dyn EnvironmentGateway>,
        advisory: AdvisoryClient,
        pool: WorkerPool,
        events: Dispatcher<DashboardEvent>,
    ) -> Self {
        Self {
            gateway,
            advisory,
            pool,
            events,
            cache: SnapshotCache::new(),
        }
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn gateway(&self) -> &Arc<dyn EnvironmentGateway> {
        &self.gateway
    }

    pub fn refresh(&self) -> JoinHandle<()> {
        let this = self.clone();
        self.pool.spawn(async move {
            this.load_snapshot().await;
        })
    }

    /// Toggle one relay; a successful command is followed by a refresh.
    pub fn set_relay(&self, relay: RelayId, desired: bool) -> JoinHandle<()> {
        let this = self.clone();
        self.pool.spawn(async move {
            let outcome = this.gateway.send_relay_command(relay, desired).await;
            match &outcome {
                Ok(true) => info!(relay = %relay, state = desired, "Relay command acknowledged"),
                Ok(false) => warn!(relay = %relay, state = desired, "Relay command refused by hub"),
                Err(e) => warn!(relay = %relay, error = %e, "Relay command failed"),
            }
            let refresh = matches!(outcome, Ok(true));
            this.events.post(DashboardEvent::RelayCommand { relay, desired, outcome });
            if refresh {
                this.load_snapshot().await;
            }
        })
    }

    pub fn update_thresholds(&self, thresholds: Thresholds) -> JoinHandle<()> {
        let this = self.clone();
        self.pool.spawn(async move {
            let update = ThresholdUpdate::new(thresholds);
            let outcome = this.gateway.send_threshold_update(&update).await;
            this.events.post(DashboardEvent::Thresholds(outcome));
        })
    }

    pub fn fetch_history(&self, hours: u32) -> JoinHandle<()> {
        let this = self.clone();
        self.pool.spawn(async move {
            let outcome = this.gateway.fetch_history(hours).await;
            if let Ok(history) = &outcome {
                info!(hours, points = history.len(), "History loaded");
            }
            this.events.post(DashboardEvent::History(outcome));
        })
    }

    pub fn start_live_updates(&self) {
        let forwarder = Forwarder {
            events: self.events.clone(),
            cache: self.cache.clone(),
        };
        self.gateway.subscribe(Arc::new(forwarder));
    }

    pub fn stop_live_updates(&self) {
        self.gateway.unsubscribe();
    }

    /// Analyse a photo; `prompt` defaults to [`DEFAULT_PROMPT`].
    pub fn analyze_image(&self, image: Vec<u8>, prompt: Option<String>) -> JoinHandle<()> {
        self.events.post(DashboardEvent::AdvisoryStarted);
        let advisory = self.advisory.clone();
        let events = self.events.clone();
        self.pool.spawn(async move {
            let prompt = prompt.as_deref().unwrap_or(DEFAULT_PROMPT);
            let outcome = advisory.analyze(&image, prompt).await;
            if let Err(e) = &outcome {
                warn!(error = %e, "Image analysis failed");
            }
            events.post(DashboardEvent::AdvisoryFinished(outcome));
        })
    }

    async fn load_snapshot(&self) {
        match self.gateway.fetch_snapshot().await {
            Ok(snapshot) => deliver(&self.events, &self.cache, snapshot).await,
            Err(e) => fail(&self.events, &self.cache, e).await,
        }
    }
}

async fn deliver(
    events: &Dispatcher<DashboardEvent>,
    cache: &SnapshotCache,
    snapshot: EnvironmentalSnapshot,
) {
    cache.update(snapshot.clone()).await;
    let report = StatusReport::from_snapshot(&snapshot);
    events.post(DashboardEvent::Snapshot { snapshot, report });
}

async fn fail(events: &Dispatcher<DashboardEvent>, cache: &SnapshotCache, error: GatewayError) {
    warn!(error = %error, "Hub status unavailable");
    cache.record_error(error.clone()).await;
    events.post(DashboardEvent::Error(error));
}

/// Feeds subscription updates into the cache and the presentation context.
struct Forwarder {
    events: Dispatcher<DashboardEvent>,
    cache: SnapshotCache,
}

#[async_trait]
impl SnapshotObserver for Forwarder {
    async fn on_update(&self, snapshot: EnvironmentalSnapshot) {
        deliver(&self.events, &self.cache, snapshot).await;
    }

    async fn on_error(&self, error: GatewayError) {
        fail(&self.events, &self.cache, error).await;
    }
}
