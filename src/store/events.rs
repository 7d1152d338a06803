//! Realtime Database streaming protocol (server-sent events).
//!
//! ```text
//! event: put
//! data: {"path": "/", "data": {"sensor_data": {...}}}
//!
//! event: keep-alive
//! data: null
//! ```

use serde::Deserialize;
use serde_json::Value;

use super::set_at;
use crate::error::GatewayError;

/// One `event:`/`data:` block, before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: String,
    pub data: String,
}

/// Incremental SSE splitter. Feed it body chunks as they arrive; it keeps
/// partial lines between calls.
#[derive(Debug, Default)]
pub struct EventParser {
    buf: Vec<u8>,
    name: Option<String>,
    data: Vec<String>,
}

impl EventParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    out.push(event);
                }
            } else if line.starts_with(':') {
                continue;
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.name = Some(rest.trim().to_owned());
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.trim_start().to_owned());
            }
        }
        out
    }

    fn dispatch(&mut self) -> Option<RawEvent> {
        let name = self.name.take();
        let data = std::mem::take(&mut self.data).join("\n");
        name.map(|name| RawEvent { name, data })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    Cancel(String),
    AuthRevoked,
}

#[derive(Deserialize)]
struct Envelope {
    path: String,
    data: Value,
}

impl StreamEvent {
    /// `Ok(None)` for event types this client does not act on.
    pub fn parse(raw: &RawEvent) -> Result<Option<Self>, GatewayError> {
        let envelope = || {
            serde_json::from_str::<Envelope>(&raw.data)
                .map_err(|e| GatewayError::malformed(format!("{} event: {e}", raw.name)))
        };

        Ok(Some(match raw.name.as_str() {
            "put" => {
                let Envelope { path, data } = envelope()?;
                StreamEvent::Put { path, data }
            }
            "patch" => {
                let Envelope { path, data } = envelope()?;
                StreamEvent::Patch { path, data }
            }
            "keep-alive" => StreamEvent::KeepAlive,
            "cancel" => StreamEvent::Cancel(raw.data.clone()),
            "auth_revoked" => StreamEvent::AuthRevoked,
            _ => return Ok(None),
        }))
    }
}

/// Apply an event to the local mirror of the listened path. Returns whether
/// the mirror changed; `cancel` and `auth_revoked` end the stream.
pub fn apply_event(mirror: &mut Value, event: StreamEvent) -> Result<bool, GatewayError> {
    let before = mirror.clone();

    match event {
        StreamEvent::Put { path, data } => set_at(mirror, &path, data),
        StreamEvent::Patch { path, data } => {
            let Value::Object(children) = data else {
                return Err(GatewayError::malformed("patch event data is not an object"));
            };
            for (key, value) in children {
                set_at(mirror, &format!("{path}/{key}"), value);
            }
        }
        StreamEvent::KeepAlive => return Ok(false),
        StreamEvent::Cancel(reason) => {
            return Err(GatewayError::transport(format!("listener cancelled by server: {reason}")))
        }
        StreamEvent::AuthRevoked => {
            return Err(GatewayError::transport("credential revoked by server"))
        }
    }

    Ok(*mirror != before)
}
