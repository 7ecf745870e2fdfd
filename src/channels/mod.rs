pub mod memory;
pub mod stdio;
pub mod traits;

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use memory::{HostHandle, MemoryChannel};
pub use stdio::StdioChannel;
pub use traits::{CommandChannel, InboundEnvelope, OutboundCall};

/// Fire-and-forget calls from the widget to its host page.
#[derive(Clone)]
pub struct ParentCaller {
    channel: Arc<dyn CommandChannel>,
    source_tag: Arc<str>,
}

impl ParentCaller {
    pub fn new(channel: Arc<dyn CommandChannel>, source_tag: &str) -> Self {
        Self {
            channel,
            source_tag: Arc::from(source_tag),
        }
    }

    /// Send `{src, fn: name, args}` on a detached task. Delivery failures are
    /// logged and never reach the caller.
    pub fn call(&self, name: &str, args: Vec<Value>) -> JoinHandle<()> {
        let call = OutboundCall {
            src: self.source_tag.to_string(),
            name: name.to_string(),
            args,
        };
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            match channel.send(&call).await {
                Ok(()) => debug!(channel = channel.name(), call = %call.name, "parent call sent"),
                Err(e) => warn!(channel = channel.name(), call = %call.name, "parent call failed: {e}"),
            }
        })
    }
}
