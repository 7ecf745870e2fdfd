use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw message received from the host side of a channel.
///
/// `source` identifies the sending browsing context; `data` is the posted
/// payload, which may be anything.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    pub source: String,
    pub data: Value,
}

impl InboundEnvelope {
    pub fn new(source: impl Into<String>, data: Value) -> Self {
        Self {
            source: source.into(),
            data,
        }
    }
}

/// A call sent from the widget to the host page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundCall {
    pub src: String,
    #[serde(rename = "fn")]
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Transport between the widget and its host page.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Deliver a call to the host page
    async fn send(&self, call: &OutboundCall) -> anyhow::Result<()>;

    /// Forward incoming host messages to `tx` (long-running)
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundEnvelope>) -> anyhow::Result<()>;
}
