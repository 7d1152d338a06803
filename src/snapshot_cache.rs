use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{error::GatewayError, model::EnvironmentalSnapshot};

/// Latest snapshot plus the most recent failure since it was taken.
///
/// Cloning shares the state. A snapshot followed by an error is kept but
/// marked stale, so old readings are never shown without the error next to
/// them.
#[derive(Clone, Default)]
pub struct SnapshotCache {
    inner: Arc<RwLock<Entry>>,
}

#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub snapshot: Option<EnvironmentalSnapshot>,
    pub last_error: Option<GatewayError>,
    pub error_at: Option<DateTime<Utc>>,
}

impl Entry {
    /// True when the cached snapshot predates the last error.
    pub fn is_stale(&self) -> bool {
        self.snapshot.is_some() && self.last_error.is_some()
    }

    /// Snapshot only if no error followed it.
    pub fn fresh(&self) -> Option<&EnvironmentalSnapshot> {
        match self.last_error {
            None => self.snapshot.as_ref(),
            Some(_) => None,
        }
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot and clear any error.
    pub async fn update(&self, snapshot: EnvironmentalSnapshot) {
        let mut entry = self.inner.write().await;
        entry.snapshot = Some(snapshot);
        entry.last_error = None;
        entry.error_at = None;
    }

    pub async fn record_error(&self, error: GatewayError) {
        let mut entry = self.inner.write().await;
        entry.last_error = Some(error);
        entry.error_at = Some(Utc::now());
    }

    pub async fn get(&self) -> Entry {
        self.inner.read().await.clone()
    }

    pub async fn fresh(&self) -> Option<EnvironmentalSnapshot> {
        self.inner.read().await.fresh().cloned()
    }
}
