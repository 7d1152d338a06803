//! Hierarchical key-value stores with change listeners.
//!
//! The push backend of the gateway talks to the hub through one of these.
//! Paths are `/`-separated; a `null` value and an absent key are the same
//! thing, and writing `null` removes the key.

pub mod events;
pub mod firebase;
pub mod memory;
pub mod models;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::error::GatewayError;

pub use self::{firebase::FirebaseStore, memory::MemoryStore};

/// Values observed at one path: the current value first, then one item per
/// change. An `Err` item is terminal; the stream ends after it.
pub type ValueStream = BoxStream<'static, Result<Option<Value>, GatewayError>>;

#[async_trait]
pub trait RealtimeStore: Send + Sync + 'static {
    async fn get(&self, path: &str) -> Result<Option<Value>, GatewayError>;

    /// Replace the value at `path`.
    async fn set(&self, path: &str, value: &Value) -> Result<(), GatewayError>;

    async fn remove(&self, path: &str) -> Result<(), GatewayError>;

    async fn listen(&self, path: &str) -> Result<ValueStream, GatewayError>;
}

// ---------------------------------------------------------------------------
// Paths shared with the hub
// ---------------------------------------------------------------------------

pub mod paths {
    pub const DEVICES: &str = "devices";

    pub fn device_status(device_id: &str) -> String {
        format!("device_status/{device_id}")
    }

    pub fn relay_control(device_id: &str) -> String {
        format!("commands/{device_id}/relay_control")
    }

    pub fn threshold_command(device_id: &str) -> String {
        format!("commands/{device_id}/thresholds")
    }

    pub fn command_response(correlation_id: &str) -> String {
        format!("command_responses/{correlation_id}")
    }

    pub fn history(device_id: &str) -> String {
        format!("historical_data/{device_id}")
    }
}

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Value stored at `path`, treating `null` as absent.
pub fn value_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for key in segments(path) {
        node = node.as_object()?.get(key)?;
    }
    (!node.is_null()).then_some(node)
}

/// Write `value` at `path`, creating intermediate objects. Writing `null`
/// removes the key and prunes parents left empty.
pub fn set_at(root: &mut Value, path: &str, value: Value) {
    if value.is_null() {
        remove_at(root, path);
        return;
    }

    let mut node = root;
    for key in segments(path) {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = &mut node[key];
    }
    *node = value;
}

pub fn remove_at(root: &mut Value, path: &str) {
    remove_in(root, &segments(path));
}

fn remove_in(node: &mut Value, segs: &[&str]) {
    let Some((first, rest)) = segs.split_first() else {
        *node = Value::Null;
        return;
    };
    let Value::Object(map) = &mut *node else { return };

    if rest.is_empty() {
        map.remove(*first);
    } else if let Some(child) = map.get_mut(*first) {
        remove_in(child, rest);
        if child.is_null() {
            map.remove(*first);
        }
    }

    let emptied = map.is_empty();
    if emptied {
        *node = Value::Null;
    }
}
