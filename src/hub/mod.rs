pub mod models;

use std::{sync::Arc, time::Duration};

use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{
    error::GatewayError,
    model::{EnvironmentalSnapshot, HistoricalData, HistoryPoint, RelayId, ThresholdUpdate},
};

use self::models::{
    ControlRequest, HistoryResponse, StatusResponse, ThresholdRequest, WriteResponse,
};

/// JSON client for the hub's own HTTP API.
#[derive(Debug, Clone)]
pub struct HubClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl HubClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: base_url.trim_end_matches('/').to_owned(),
                timeout,
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// `GET /status`
    pub async fn get_status(&self) -> Result<EnvironmentalSnapshot, GatewayError> {
        let resp: StatusResponse = self.get_json("/status").await?;
        EnvironmentalSnapshot::try_from(resp)
    }

    /// `POST /control`. True when the hub reports `"status": "success"`.
    pub async fn control_relay(&self, relay: RelayId, state: bool) -> Result<bool, GatewayError> {
        let body = ControlRequest { relay: relay.wire_name(), state };
        let resp: WriteResponse = self.post_json("/control", &body).await?;
        if !resp.is_success() {
            debug!(relay = %relay, message = ?resp.message, "Hub refused relay command");
        }
        Ok(resp.is_success())
    }

    /// `POST /thresholds`
    pub async fn update_thresholds(&self, update: &ThresholdUpdate) -> Result<bool, GatewayError> {
        let body = ThresholdRequest::from(&update.thresholds);
        let resp: WriteResponse = self.post_json("/thresholds", &body).await?;
        Ok(resp.is_success())
    }

    /// `GET /history?hours=N`, returned oldest first.
    pub async fn get_history(&self, hours: u32) -> Result<HistoricalData, GatewayError> {
        let resp: HistoryResponse = self.get_json(&format!("/history?hours={hours}")).await?;
        if resp.status != "success" {
            return Err(GatewayError::transport(format!(
                "history request failed: {}",
                resp.message.as_deref().unwrap_or("unknown error")
            )));
        }

        let mut points: Vec<HistoryPoint> = resp.data.iter().map(HistoryPoint::from).collect();
        points.reverse();
        Ok(HistoricalData { hours, points })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.inner.base_url, path);
        debug!(url = %url, "GET hub");

        let resp = self
            .inner
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GatewayError::from_reqwest(e, self.inner.timeout))?;

        self.decode(path, resp).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.inner.base_url, path);
        debug!(url = %url, "POST hub");

        let resp = self
            .inner
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GatewayError::from_reqwest(e, self.inner.timeout))?;

        self.decode(path, resp).await
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        path: &str,
        resp: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| GatewayError::from_reqwest(e, self.inner.timeout))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::malformed(format!("{path}: {e}")))
    }
}
