//! Proactive trigger firing.
//!
//! Triggers are read from the server configuration in the store. The engine
//! selects them by condition, resolves the sending agent, injects the
//! resulting messages into the conversation and opens the widget.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::agent::AgentResolver;
use super::condition::{has_trigger_condition, page_url_matches, time_on_site_secs};
use super::fetch::request_trigger_messages;
use super::types::{
    Trigger, TriggerAction, ACTION_EXTERNAL_SERVICE, ACTION_SEND_MESSAGE,
    CONDITION_AFTER_REGISTRATION, CONDITION_CHAT_OPENED, CONDITION_PAGE_URL,
    CONDITION_TIME_ON_SITE,
};
use crate::api::{LivechatApi, PageInfo};
use crate::channels::ParentCaller;
use crate::messages;
use crate::store::{Agent, Message, Store};
use crate::util::create_token;

// ── Fire outcome ────────────────────────────────────────────────

/// Result of attempting to fire one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// Messages were injected and the widget was opened.
    Fired { trigger_id: String, messages: usize },
    /// The trigger was selected but did not run.
    Skipped { trigger_id: String, reason: String },
}

impl FireOutcome {
    pub fn is_fired(&self) -> bool {
        matches!(self, Self::Fired { .. })
    }
}

// ── Engine ──────────────────────────────────────────────────────

pub struct TriggerEngine {
    store: Store,
    api: Arc<dyn LivechatApi>,
    agents: Arc<AgentResolver>,
    parent: ParentCaller,
    fired: Mutex<HashSet<String>>,
}

impl TriggerEngine {
    pub fn new(
        store: Store,
        api: Arc<dyn LivechatApi>,
        agents: Arc<AgentResolver>,
        parent: ParentCaller,
    ) -> Self {
        Self {
            store,
            api,
            agents,
            parent,
            fired: Mutex::new(HashSet::new()),
        }
    }

    /// Forget which `runOnce` triggers have fired, starting a new session.
    pub fn reset_session(&self) {
        self.fired.lock().clear();
    }

    /// Enabled triggers declaring `condition`.
    fn triggers_with(&self, condition: &str) -> Vec<Trigger> {
        let has_condition = has_trigger_condition(condition);
        self.store
            .state()
            .config
            .triggers
            .into_iter()
            .filter(|t| t.enabled && has_condition(t))
            .collect()
    }

    /// Fire every `page-url` trigger whose pattern matches the visited URL.
    pub async fn process_page_visit(&self, info: &PageInfo) -> Vec<FireOutcome> {
        let href = info.location.href.as_str();
        let matching: Vec<Trigger> = self
            .triggers_with(CONDITION_PAGE_URL)
            .into_iter()
            .filter(|t| t.conditions.iter().any(|c| page_url_matches(c, href)))
            .collect();
        self.fire_all(&matching).await
    }

    pub async fn process_guest_registration(&self) -> Vec<FireOutcome> {
        let triggers = self.triggers_with(CONDITION_AFTER_REGISTRATION);
        self.fire_all(&triggers).await
    }

    pub async fn process_chat_opened(&self) -> Vec<FireOutcome> {
        let triggers = self.triggers_with(CONDITION_CHAT_OPENED);
        self.fire_all(&triggers).await
    }

    /// Start one timer per `time-on-site` trigger. Dropping the handles does
    /// not cancel the timers; abort them to do so.
    pub fn schedule_time_on_site(self: &Arc<Self>) -> Vec<JoinHandle<FireOutcome>> {
        let mut handles = Vec::new();
        for trigger in self.triggers_with(CONDITION_TIME_ON_SITE) {
            let Some(secs) = trigger
                .conditions
                .iter()
                .filter(|c| c.name == CONDITION_TIME_ON_SITE)
                .find_map(time_on_site_secs)
            else {
                warn!(trigger_id = %trigger.id, "time-on-site trigger without a valid delay");
                continue;
            };
            let engine = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                engine.fire(&trigger).await
            }));
        }
        handles
    }

    async fn fire_all(&self, triggers: &[Trigger]) -> Vec<FireOutcome> {
        let mut outcomes = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            outcomes.push(self.fire(trigger).await);
        }
        outcomes
    }

    /// Run all actions of `trigger`, then open the widget.
    #[tracing::instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    pub async fn fire(&self, trigger: &Trigger) -> FireOutcome {
        if !trigger.enabled {
            return skipped(trigger, "disabled");
        }
        // Reserve before the first await so concurrent firings cannot both run.
        if trigger.run_once && !self.fired.lock().insert(trigger.id.clone()) {
            return skipped(trigger, "already fired in this session");
        }

        let mut batch = Vec::new();
        for action in &trigger.actions {
            let agent = match self.agents.get_agent(action).await {
                Ok(agent) => agent,
                Err(e) => {
                    warn!("trigger skipped: agent resolution failed: {e}");
                    return self.release(trigger, &e.to_string());
                }
            };
            match self.messages_for(trigger, action, agent).await {
                Ok(messages) => batch.extend(messages),
                Err(reason) => {
                    warn!("trigger skipped: {reason}");
                    return self.release(trigger, &reason);
                }
            }
        }

        let count = batch.len();
        messages::upsert_many(&self.store, batch).await;
        self.store.update(|s| s.minimized = false).await;
        self.parent.call("openWidget", Vec::new());
        info!(messages = count, "trigger fired");

        FireOutcome::Fired {
            trigger_id: trigger.id.clone(),
            messages: count,
        }
    }

    /// Skip a trigger that failed after reserving its `runOnce` slot.
    fn release(&self, trigger: &Trigger, reason: &str) -> FireOutcome {
        if trigger.run_once {
            self.fired.lock().remove(&trigger.id);
        }
        skipped(trigger, reason)
    }

    async fn messages_for(
        &self,
        trigger: &Trigger,
        action: &TriggerAction,
        agent: Agent,
    ) -> Result<Vec<Message>, String> {
        let now = Utc::now();
        match action.name.as_str() {
            ACTION_SEND_MESSAGE => {
                let text = action.params.msg.clone().unwrap_or_default();
                Ok(vec![trigger_message(text, agent, now)])
            }
            ACTION_EXTERNAL_SERVICE => {
                let state = self.store.state();
                let metadata: Map<String, Value> = state
                    .custom_fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                let mut contents = request_trigger_messages(
                    self.api.as_ref(),
                    &trigger.id,
                    state.token.as_deref(),
                    &metadata,
                )
                .await
                .map_err(|e| e.to_string())?;
                contents.sort_by_key(|c| c.order);
                Ok(contents
                    .into_iter()
                    .enumerate()
                    .map(|(i, content)| {
                        let offset = chrono::Duration::milliseconds(i64::try_from(i).unwrap_or(0));
                        let mut message = trigger_message(content.msg, agent.clone(), now + offset);
                        message.extra.extend(content.extra);
                        message
                    })
                    .collect())
            }
            other => Err(format!("unknown trigger action '{other}'")),
        }
    }
}

fn skipped(trigger: &Trigger, reason: &str) -> FireOutcome {
    FireOutcome::Skipped {
        trigger_id: trigger.id.clone(),
        reason: reason.to_string(),
    }
}

fn trigger_message(text: String, agent: Agent, ts: chrono::DateTime<Utc>) -> Message {
    let mut message = Message::new(create_token(), ts, text);
    message.u = Some(agent);
    message.extra.insert("trigger".into(), Value::Bool(true));
    message
}
