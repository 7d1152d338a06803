//! Execution contexts: a bounded pool for blocking-on-network work and a
//! single serial context where every result is delivered.

use std::{future::Future, sync::Arc};

use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinHandle,
};
use tracing::debug;

pub const DEFAULT_WORKERS: usize = 3;

/// Runs gateway and advisory operations with at most `size` in flight.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self { permits: Arc::new(Semaphore::new(size)), size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Operations currently holding a worker.
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Queue `job`; it starts once a worker is free.
    pub fn spawn<F>(&self, job: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // The pool never closes its semaphore.
            let _permit = permits.acquire_owned().await.ok();
            job.await;
        })
    }
}

/// Consumer of events on the presentation context.
pub trait EventSink<E>: Send + 'static {
    fn handle(&mut self, event: E);
}

impl<E, F> EventSink<E> for F
where
    F: FnMut(E) + Send + 'static,
{
    fn handle(&mut self, event: E) {
        self(event)
    }
}

/// Handle for posting events to the presentation context. The context is a
/// single task that owns the sink, so the sink never runs concurrently with
/// itself. It stops once every handle is dropped.
#[derive(Debug)]
pub struct Dispatcher<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<E: Send + 'static> Dispatcher<E> {
    pub fn start(mut sink: impl EventSink<E>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<E>();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.handle(event);
            }
            debug!("Presentation context stopped");
        });
        (Self { tx }, task)
    }

    /// Returns false once the context has stopped.
    pub fn post(&self, event: E) -> bool {
        self.tx.send(event).is_ok()
    }
}
