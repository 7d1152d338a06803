use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header::ACCEPT, Client, Response};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::{
    events::{apply_event, EventParser, StreamEvent},
    RealtimeStore, ValueStream,
};
use crate::error::GatewayError;

/// Firebase Realtime Database over its REST interface.
///
/// Reads and writes are `GET`/`PUT`/`DELETE {db}/{path}.json`; listeners
/// hold a `text/event-stream` response open and mirror the listened path
/// locally.
#[derive(Debug, Clone)]
pub struct FirebaseStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    database_url: String,
    auth_token: Option<String>,
    request_timeout: Duration,
}

impl FirebaseStore {
    pub fn new(
        database_url: &str,
        auth_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        // No client-wide timeout: it would also cut event streams.
        let http = Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                database_url: database_url.trim_end_matches('/').to_owned(),
                auth_token,
                request_timeout,
            }),
        })
    }

    fn url(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        match &self.inner.auth_token {
            Some(token) => format!("{}/{path}.json?auth={token}", self.inner.database_url),
            None => format!("{}/{path}.json", self.inner.database_url),
        }
    }

    fn map_err(&self, err: reqwest::Error) -> GatewayError {
        GatewayError::from_reqwest(err, self.inner.request_timeout)
    }
}

#[async_trait]
impl RealtimeStore for FirebaseStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, GatewayError> {
        debug!(path = %path, "Firebase GET");

        let bytes = self
            .inner
            .http
            .get(self.url(path))
            .timeout(self.inner.request_timeout)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| self.map_err(e))?
            .bytes()
            .await
            .map_err(|e| self.map_err(e))?;

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::malformed(format!("{path}: {e}")))?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn set(&self, path: &str, value: &Value) -> Result<(), GatewayError> {
        debug!(path = %path, "Firebase PUT");

        self.inner
            .http
            .put(self.url(path))
            .timeout(self.inner.request_timeout)
            .json(value)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), GatewayError> {
        debug!(path = %path, "Firebase DELETE");

        self.inner
            .http
            .delete(self.url(path))
            .timeout(self.inner.request_timeout)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn listen(&self, path: &str) -> Result<ValueStream, GatewayError> {
        debug!(path = %path, "Firebase stream attach");

        let resp = tokio::time::timeout(
            self.inner.request_timeout,
            self.inner
                .http
                .get(self.url(path))
                .header(ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| GatewayError::Timeout(self.inner.request_timeout))?
        .and_then(Response::error_for_status)
        .map_err(|e| self.map_err(e))?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(pump(resp, path.to_owned(), tx));
        Ok(ReceiverStream::new(rx).boxed())
    }
}

type Sender = mpsc::Sender<Result<Option<Value>, GatewayError>>;

/// Reads the event stream until it fails or the consumer goes away.
async fn pump(resp: Response, path: String, tx: Sender) {
    let mut body = Box::pin(resp.bytes_stream());
    let mut parser = EventParser::default();
    let mut mirror = Value::Null;
    let mut attached = false;

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!(path = %path, "Firebase stream dropped by consumer");
                return;
            }
            chunk = body.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                let e = e.without_url();
                warn!(path = %path, error = %e, "Firebase stream read failed");
                let _ = tx.send(Err(GatewayError::transport(e.to_string()))).await;
                return;
            }
            None => {
                let _ = tx.send(Err(GatewayError::unreachable("event stream closed"))).await;
                return;
            }
        };

        for raw in parser.push(&bytes) {
            let outcome = StreamEvent::parse(&raw).and_then(|event| match event {
                Some(event) => apply_event(&mut mirror, event),
                None => Ok(false),
            });

            match outcome {
                Ok(changed) if changed || (!attached && raw.name == "put") => {
                    attached = true;
                    let current = (!mirror.is_null()).then(|| mirror.clone());
                    if tx.send(Ok(current)).await.is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path, error = %e, "Firebase stream terminated");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
    }
}
