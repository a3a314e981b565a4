//! Transports for engine tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{watch, Notify};

use super::error::TransportError;
use super::protocol::{PullRequest, PullResponse, PushRequest, PushResponse, RowPayload};
use super::transport::SyncTransport;
use crate::server::{ServerStore, ServerStoreError};

fn map_err(e: ServerStoreError) -> TransportError {
    match e {
        ServerStoreError::ResyncRequired { current_position } => {
            TransportError::ResyncRequired { current_position }
        }
        ServerStoreError::BadRequest(message) => TransportError::Http {
            status: 400,
            message,
        },
        other => TransportError::Http {
            status: 500,
            message: other.to_string(),
        },
    }
}

/// Calls a server store directly, skipping HTTP.
pub struct InProcessTransport {
    server: ServerStore,
}

impl InProcessTransport {
    pub fn new(server: ServerStore) -> Self {
        Self { server }
    }
}

#[async_trait]
impl SyncTransport for InProcessTransport {
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError> {
        // round-trip through JSON like the wire would
        let request: PushRequest = serde_json::to_value(request)
            .and_then(serde_json::from_value)
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        self.server.push(&request).await.map_err(map_err)
    }

    async fn pull(&self, request: &PullRequest) -> Result<PullResponse, TransportError> {
        self.server.pull(request).await.map_err(map_err)
    }

    async fn fetch_row(
        &self,
        table: &str,
        pk: &str,
    ) -> Result<Option<RowPayload>, TransportError> {
        self.server.fetch(table, pk).await.map_err(map_err)
    }
}

/// Every call fails with a network error.
#[derive(Default)]
pub struct FailingTransport {
    calls: AtomicUsize,
}

impl FailingTransport {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self) -> TransportError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TransportError::Network("connection refused".into())
    }
}

#[async_trait]
impl SyncTransport for FailingTransport {
    async fn push(&self, _request: &PushRequest) -> Result<PushResponse, TransportError> {
        Err(self.fail())
    }

    async fn pull(&self, _request: &PullRequest) -> Result<PullResponse, TransportError> {
        Err(self.fail())
    }

    async fn fetch_row(
        &self,
        _table: &str,
        _pk: &str,
    ) -> Result<Option<RowPayload>, TransportError> {
        Err(self.fail())
    }
}

/// Holds pulls until [`open`](Self::open) is called.
pub struct GatedTransport {
    inner: InProcessTransport,
    gate: watch::Sender<bool>,
    blocked: Notify,
    notified: AtomicBool,
    pulls: AtomicUsize,
}

impl GatedTransport {
    pub fn new(inner: InProcessTransport) -> Self {
        Self {
            inner,
            gate: watch::Sender::new(false),
            blocked: Notify::new(),
            notified: AtomicBool::new(false),
            pulls: AtomicUsize::new(0),
        }
    }

    /// Resolves once a pull is waiting at the gate.
    pub async fn wait_until_blocked(&self) {
        self.blocked.notified().await;
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncTransport for GatedTransport {
    async fn push(&self, request: &PushRequest) -> Result<PushResponse, TransportError> {
        self.inner.push(request).await
    }

    async fn pull(&self, request: &PullRequest) -> Result<PullResponse, TransportError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if !self.notified.swap(true, Ordering::SeqCst) {
            self.blocked.notify_one();
        }
        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        self.inner.pull(request).await
    }

    async fn fetch_row(
        &self,
        table: &str,
        pk: &str,
    ) -> Result<Option<RowPayload>, TransportError> {
        self.inner.fetch_row(table, pk).await
    }
}
