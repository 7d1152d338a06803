//! Client for a greenhouse environment hub: sensor and relay state, relay
//! commands, threshold updates, live subscriptions, and photo advice from a
//! vision model.

pub mod advisory;
pub mod config;
pub mod control;
pub mod dashboard;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod model;
pub mod snapshot_cache;
pub mod status;
pub mod store;

pub use crate::{
    config::Config,
    error::{AdvisoryError, GatewayError, ThresholdError},
    gateway::{EnvironmentGateway, SnapshotObserver},
    model::{EnvironmentalSnapshot, RelayId, RelayStates, Thresholds},
};
