//! Widget session wiring.
//!
//! A [`WidgetRuntime`] owns one store and the services built on it, and hands
//! out at most one live [`CommandBridge`] at a time.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::api::{HttpLivechatClient, LivechatApi};
use crate::bridge::{BridgeError, BridgeSlot, CommandBridge, CommandTable};
use crate::channels::{CommandChannel, ParentCaller};
use crate::config::Config;
use crate::store::Store;
use crate::triggers::{AgentResolver, TriggerEngine};

/// Services shared by every command handler.
pub struct WidgetContext {
    pub store: Store,
    pub api: Arc<dyn LivechatApi>,
    pub agents: Arc<AgentResolver>,
    pub triggers: Arc<TriggerEngine>,
    pub parent: ParentCaller,
}

pub struct WidgetRuntime {
    context: Arc<WidgetContext>,
    channel: Arc<dyn CommandChannel>,
    source_tag: String,
    bridge_taken: Arc<AtomicBool>,
}

impl WidgetRuntime {
    /// Build a runtime around an existing API client.
    pub fn new(config: &Config, api: Arc<dyn LivechatApi>, channel: Arc<dyn CommandChannel>) -> Self {
        let store = Store::new(config.initial_state());
        let parent = ParentCaller::new(Arc::clone(&channel), &config.source_tag);
        let agents = Arc::new(AgentResolver::new(
            store.clone(),
            Arc::clone(&api),
            config.agent_ttl(),
        ));
        let triggers = Arc::new(TriggerEngine::new(
            store.clone(),
            Arc::clone(&api),
            Arc::clone(&agents),
            parent.clone(),
        ));
        info!(
            channel = channel.name(),
            triggers = config.triggers.len(),
            ttl_ms = config.agent_cache.ttl_ms,
            "widget runtime created"
        );
        Self {
            context: Arc::new(WidgetContext {
                store,
                api,
                agents,
                triggers,
                parent,
            }),
            channel,
            source_tag: config.source_tag.clone(),
            bridge_taken: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build a runtime talking HTTP to `config.server_url`.
    pub fn from_config(config: &Config, channel: Arc<dyn CommandChannel>) -> anyhow::Result<Self> {
        let api = HttpLivechatClient::new(&config.server_url, config.http_timeout())
            .context("Failed to create livechat REST client")?;
        Ok(Self::new(config, Arc::new(api), channel))
    }

    pub fn context(&self) -> &Arc<WidgetContext> {
        &self.context
    }

    pub fn store(&self) -> &Store {
        &self.context.store
    }

    pub fn triggers(&self) -> &Arc<TriggerEngine> {
        &self.context.triggers
    }

    /// Construct the bridge with the full widget command set.
    pub fn bridge(&self, context_id: impl Into<String>) -> Result<CommandBridge, BridgeError> {
        self.bridge_with_table(context_id, CommandTable::widget_api())
    }

    /// Construct the bridge with a custom command table. Fails while another
    /// bridge from this runtime is alive.
    pub fn bridge_with_table(
        &self,
        context_id: impl Into<String>,
        table: CommandTable,
    ) -> Result<CommandBridge, BridgeError> {
        let slot = BridgeSlot::acquire(&self.bridge_taken)?;
        Ok(CommandBridge::new(
            slot,
            context_id.into(),
            self.source_tag.clone(),
            Arc::clone(&self.context),
            table,
            Arc::clone(&self.channel),
        ))
    }
}
