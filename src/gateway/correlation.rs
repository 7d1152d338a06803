//! Command/acknowledgment correlation for the push backend.
//!
//! A relay command is written once to `commands/{device}/relay_control` with
//! a fresh correlation id; the hub answers at
//! `command_responses/{correlation_id}` with `{"success": bool, ...}`.
//! Every command gets exactly one outcome: the hub's answer, a timeout, or a
//! transport error.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bounded;
use crate::{
    error::GatewayError,
    model::RelayCommand,
    store::{paths, RealtimeStore, ValueStream},
};

type Outcome = Result<bool, GatewayError>;

/// Commands waiting for their acknowledgment, keyed by correlation id.
///
/// Resolving takes the waiting sender out of the map, so the first
/// resolution wins and every later one is a no-op.
#[derive(Debug, Default)]
pub struct PendingCommands {
    waiting: Mutex<HashMap<Uuid, oneshot::Sender<Outcome>>>,
}

impl PendingCommands {
    pub fn register(&self, id: Uuid) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    /// Deliver the outcome for `id`. Returns false if the command was
    /// already resolved, cancelled, or never registered.
    pub fn resolve(&self, id: Uuid, outcome: Outcome) -> bool {
        match self.lock().remove(&id) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, id: Uuid) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<Outcome>>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct CommandCorrelator<S> {
    store: Arc<S>,
    pending: Arc<PendingCommands>,
    /// Bound on the acknowledgment.
    command_timeout: Duration,
    /// Bound on attaching the listener and writing the command.
    request_timeout: Duration,
}

impl<S: RealtimeStore> CommandCorrelator<S> {
    pub fn new(store: Arc<S>, command_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            store,
            pending: Arc::new(PendingCommands::default()),
            command_timeout,
            request_timeout,
        }
    }

    pub fn pending(&self) -> &PendingCommands {
        &self.pending
    }

    pub async fn send(&self, device_id: &str, command: RelayCommand) -> Result<bool, GatewayError> {
        let id = command.correlation_id;
        let response_path = paths::command_response(&id.to_string());
        let outcome = self.pending.register(id);
        // Dropping `send` at any await below cancels the command.
        let mut guard = PendingGuard { pending: self.pending.clone(), id, listener: None };

        // Attach before writing: the store replays the current value on
        // attach, so an answer written before the first poll is not lost.
        let responses = bounded(self.request_timeout, self.store.listen(&response_path)).await?;
        guard.listener = Some(tokio::spawn(await_response(
            self.store.clone(),
            self.pending.clone(),
            id,
            response_path,
            responses,
        )));

        let payload = json!({
            "relay": command.relay.wire_name(),
            "state": command.desired_state,
            "command_id": id.to_string(),
            "timestamp": command.issued_at.timestamp_millis(),
        });
        let relay_path = paths::relay_control(device_id);
        bounded(self.request_timeout, self.store.set(&relay_path, &payload)).await?;
        info!(
            device_id = %device_id,
            relay = %command.relay,
            state = command.desired_state,
            command_id = %id,
            "Relay command written"
        );

        match tokio::time::timeout(self.command_timeout, outcome).await {
            Ok(Ok(result)) => {
                // The listener still has to clear the response entry.
                guard.detach();
                result
            }
            Ok(Err(_)) => Err(GatewayError::transport("response listener dropped")),
            Err(_) => {
                warn!(command_id = %id, timeout_secs = self.command_timeout.as_secs(), "Relay command not acknowledged");
                Err(GatewayError::Timeout(self.command_timeout))
            }
        }
    }
}

/// Owns a command's registry entry and response listener until it resolves.
/// Dropping it aborts the listener and forgets the command.
struct PendingGuard {
    pending: Arc<PendingCommands>,
    id: Uuid,
    listener: Option<JoinHandle<()>>,
}

impl PendingGuard {
    fn detach(&mut self) {
        self.listener.take();
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if self.pending.cancel(self.id) {
            debug!(command_id = %self.id, "Relay command abandoned");
        }
    }
}

/// Waits for the first response value, resolves the command, and deletes
/// the response entry.
async fn await_response<S: RealtimeStore>(
    store: Arc<S>,
    pending: Arc<PendingCommands>,
    id: Uuid,
    path: String,
    mut responses: ValueStream,
) {
    while let Some(item) = responses.next().await {
        match item {
            Ok(None) => continue,
            Ok(Some(response)) => {
                let success = response.get("success").and_then(Value::as_bool).unwrap_or(false);
                debug!(command_id = %id, success, "Relay command acknowledged");
                if pending.resolve(id, Ok(success)) {
                    if let Err(e) = store.remove(&path).await {
                        warn!(command_id = %id, error = %e, "Failed to clear command response");
                    }
                }
                return;
            }
            Err(e) => {
                pending.resolve(id, Err(e));
                return;
            }
        }
    }
    pending.resolve(id, Err(GatewayError::transport("response stream ended")));
}
