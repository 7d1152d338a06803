use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::Value;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    Mutex,
};
use tracing::warn;

use super::{remove_at, set_at, value_at, RealtimeStore, ValueStream};
use crate::error::GatewayError;

const DEFAULT_BACKLOG: usize = 256;

/// In-process store with the same semantics as the hosted database.
///
/// A test double for the realtime backend: no configuration selects it.
/// Cloning shares the tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tree: Mutex<Value>,
    changes: broadcast::Sender<Change>,
    offline: AtomicBool,
}

/// Published after every mutation, in mutation order.
#[derive(Debug, Clone)]
enum Change {
    Tree(Arc<Value>),
    Offline,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_backlog(DEFAULT_BACKLOG)
    }

    /// `backlog` is how many writes a listener may fall behind before its
    /// stream fails.
    pub fn with_backlog(backlog: usize) -> Self {
        let (changes, _) = broadcast::channel(backlog.max(1));
        Self {
            inner: Arc::new(Inner {
                tree: Mutex::new(Value::Null),
                changes,
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate losing the connection. While offline every call fails with
    /// `Unreachable` and open listeners end with an error.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
        if offline {
            let _ = self.inner.changes.send(Change::Offline);
        }
    }

    /// Whole tree, for assertions.
    pub async fn dump(&self) -> Value {
        self.inner.tree.lock().await.clone()
    }

    fn check_online(&self) -> Result<(), GatewayError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::unreachable("memory store offline"));
        }
        Ok(())
    }

    async fn mutate(&self, apply: impl FnOnce(&mut Value)) -> Result<(), GatewayError> {
        self.check_online()?;
        let mut tree = self.inner.tree.lock().await;
        apply(&mut tree);
        // Published under the lock so listeners see writes in order.
        let _ = self.inner.changes.send(Change::Tree(Arc::new(tree.clone())));
        Ok(())
    }
}

struct Listener {
    rx: broadcast::Receiver<Change>,
    path: String,
    last: Option<Value>,
    done: bool,
}

impl Listener {
    async fn next_change(&mut self) -> Option<Result<Option<Value>, GatewayError>> {
        if self.done {
            return None;
        }
        loop {
            let tree = match self.rx.recv().await {
                Ok(Change::Tree(tree)) => tree,
                Ok(Change::Offline) => {
                    self.done = true;
                    return Some(Err(GatewayError::unreachable("memory store offline")));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(path = %self.path, skipped, "Memory store listener fell behind");
                    self.done = true;
                    return Some(Err(GatewayError::transport(format!(
                        "listener fell behind by {skipped} updates"
                    ))));
                }
                Err(RecvError::Closed) => return None,
            };

            let value = value_at(&tree, &self.path).cloned();
            if value != self.last {
                self.last = value.clone();
                return Some(Ok(value));
            }
        }
    }
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, GatewayError> {
        self.check_online()?;
        Ok(value_at(&*self.inner.tree.lock().await, path).cloned())
    }

    async fn set(&self, path: &str, value: &Value) -> Result<(), GatewayError> {
        let value = value.clone();
        self.mutate(|tree| set_at(tree, path, value)).await
    }

    async fn remove(&self, path: &str) -> Result<(), GatewayError> {
        self.mutate(|tree| remove_at(tree, path)).await
    }

    async fn listen(&self, path: &str) -> Result<ValueStream, GatewayError> {
        self.check_online()?;

        // Subscribe and read under the lock: every later write is seen
        // exactly once.
        let (rx, current) = {
            let tree = self.inner.tree.lock().await;
            (self.inner.changes.subscribe(), value_at(&tree, path).cloned())
        };

        let listener = Listener {
            rx,
            path: path.to_owned(),
            last: current.clone(),
            done: false,
        };
        let changes = stream::unfold(listener, |mut l| async move {
            let item = l.next_change().await?;
            Some((item, l))
        });

        Ok(stream::once(async move { Ok(current) }).chain(changes).boxed())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let store = MemoryStore::new();
        store.set("a/b", &json!({"x": 1})).await.unwrap();
        assert_eq!(store.get("a/b/x").await.unwrap(), Some(json!(1)));
        store.remove("a/b").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.dump().await.is_null());
    }

    #[tokio::test]
    async fn listen_yields_current_then_changes_only() {
        let store = MemoryStore::new();
        store.set("status", &json!(1)).await.unwrap();
        let mut values = store.listen("status").await.unwrap();

        assert_eq!(values.next().await, Some(Ok(Some(json!(1)))));

        store.set("unrelated", &json!(true)).await.unwrap();
        store.set("status", &json!(2)).await.unwrap();
        assert_eq!(values.next().await, Some(Ok(Some(json!(2)))));

        store.remove("status").await.unwrap();
        assert_eq!(values.next().await, Some(Ok(None)));
    }

    #[tokio::test]
    async fn back_to_back_writes_are_each_delivered() {
        let store = MemoryStore::new();
        let mut values = store.listen("status").await.unwrap();
        assert_eq!(values.next().await, Some(Ok(None)));

        for n in 1..=5 {
            store.set("status", &json!(n)).await.unwrap();
        }
        for n in 1..=5 {
            assert_eq!(values.next().await, Some(Ok(Some(json!(n)))));
        }
    }

    #[tokio::test]
    async fn slow_listener_gets_an_error() {
        let store = MemoryStore::with_backlog(2);
        let mut values = store.listen("status").await.unwrap();
        assert_eq!(values.next().await, Some(Ok(None)));

        for n in 1..=4 {
            store.set("status", &json!(n)).await.unwrap();
        }
        assert!(matches!(values.next().await, Some(Err(GatewayError::Transport(_)))));
        assert!(values.next().await.is_none());
    }

    #[tokio::test]
    async fn offline_fails_calls_and_ends_listeners() {
        let store = MemoryStore::new();
        let mut values = store.listen("x").await.unwrap();
        assert_eq!(values.next().await, Some(Ok(None)));

        store.set_offline(true);
        assert!(matches!(values.next().await, Some(Err(GatewayError::Unreachable(_)))));
        assert!(values.next().await.is_none());
        assert!(matches!(store.get("x").await, Err(GatewayError::Unreachable(_))));

        store.set_offline(false);
        assert!(store.get("x").await.is_ok());
    }
}
