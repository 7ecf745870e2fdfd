//! In-process channel pair used by embedders and tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

use super::traits::{CommandChannel, InboundEnvelope, OutboundCall};

/// Widget side of an in-memory channel.
pub struct MemoryChannel {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundEnvelope>>,
    outbox: Arc<Outbox>,
}

/// Host side of an in-memory channel: posts envelopes and records the
/// calls the widget made.
#[derive(Clone)]
pub struct HostHandle {
    source: String,
    tx: mpsc::UnboundedSender<InboundEnvelope>,
    outbox: Arc<Outbox>,
}

#[derive(Default)]
struct Outbox {
    calls: Mutex<Vec<OutboundCall>>,
    changed: Notify,
}

impl MemoryChannel {
    /// Create a channel and the host handle that talks to it. Envelopes
    /// posted through the handle carry `host_source` as their origin.
    pub fn pair(host_source: impl Into<String>) -> (Self, HostHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Arc::new(Outbox::default());
        (
            Self {
                inbound: tokio::sync::Mutex::new(rx),
                outbox: Arc::clone(&outbox),
            },
            HostHandle {
                source: host_source.into(),
                tx,
                outbox,
            },
        )
    }
}

#[async_trait]
impl CommandChannel for MemoryChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, call: &OutboundCall) -> anyhow::Result<()> {
        self.outbox.calls.lock().push(call.clone());
        self.outbox.changed.notify_waiters();
        Ok(())
    }

    async fn listen(&self, tx: mpsc::Sender<InboundEnvelope>) -> anyhow::Result<()> {
        // Held for the listener's lifetime; an aborted listener releases it.
        let mut inbound = self.inbound.lock().await;
        while let Some(envelope) = inbound.recv().await {
            if tx.send(envelope).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

impl HostHandle {
    /// Post `data` as this host.
    pub fn post(&self, data: Value) -> anyhow::Result<()> {
        self.post_from(self.source.clone(), data)
    }

    /// Post `data` claiming an arbitrary origin.
    pub fn post_from(&self, source: impl Into<String>, data: Value) -> anyhow::Result<()> {
        self.tx
            .send(InboundEnvelope::new(source, data))
            .map_err(|_| anyhow::anyhow!("memory channel closed"))
    }

    /// Calls the widget has sent so far.
    pub fn calls(&self) -> Vec<OutboundCall> {
        self.outbox.calls.lock().clone()
    }

    /// Wait until a call named `name` has been sent.
    pub async fn wait_for_call(&self, name: &str) -> OutboundCall {
        loop {
            let changed = self.outbox.changed.notified();
            if let Some(call) = self.calls().into_iter().find(|c| c.name == name) {
                return call;
            }
            changed.await;
        }
    }
}
