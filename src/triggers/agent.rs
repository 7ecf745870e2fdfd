//! Agent resolution for trigger actions.
//!
//! `queue` senders are resolved through the backend, cached in
//! `defaultAgent` for the configured TTL, and deduplicated while a lookup is
//! outstanding: concurrent callers await the same shared future.
//!
//! The in-flight slot carries its start time and is checked on read. An entry
//! older than the TTL is discarded, so a lookup that never settles cannot
//! block later resolutions. Settled entries are dropped by the caller that
//! observes the result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::{SenderKind, TriggerAction};
use crate::api::{ApiError, LivechatApi};
use crate::store::{Agent, Store};

/// Default agent cache lifetime (one hour).
pub const DEFAULT_AGENT_TTL: Duration = Duration::from_millis(3_600_000);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("Unknown sender: {0}")]
    UnknownSender(String),
    #[error("agent lookup failed: {0}")]
    Lookup(#[from] ApiError),
}

type SharedLookup = Shared<BoxFuture<'static, Result<Agent, AgentError>>>;

struct InFlight {
    id: u64,
    started_at: Instant,
    handle: SharedLookup,
}

/// Resolves the agent a trigger message is attributed to.
pub struct AgentResolver {
    store: Store,
    api: Arc<dyn LivechatApi>,
    ttl: Duration,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

impl AgentResolver {
    pub fn new(store: Store, api: Arc<dyn LivechatApi>, ttl: Duration) -> Self {
        Self {
            store,
            api,
            ttl,
            in_flight: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Resolve the agent for `action` according to its sender kind.
    pub async fn get_agent(&self, action: &TriggerAction) -> Result<Agent, AgentError> {
        match action.sender_kind() {
            Ok(SenderKind::Custom) => Ok(Agent::named(
                action.params.name.clone().unwrap_or_default(),
            )),
            Ok(SenderKind::Queue) => self.resolve_queued().await,
            Err(sender) => {
                warn!("agent resolution: unknown sender '{sender}'");
                Err(AgentError::UnknownSender(sender))
            }
        }
    }

    /// Whether a queue lookup is currently shared with new callers.
    pub fn has_pending_lookup(&self) -> bool {
        self.in_flight
            .lock()
            .as_ref()
            .is_some_and(|flight| self.is_joinable(flight))
    }

    fn is_joinable(&self, flight: &InFlight) -> bool {
        flight.started_at.elapsed() < self.ttl && flight.handle.peek().is_none()
    }

    async fn resolve_queued(&self) -> Result<Agent, AgentError> {
        let (id, handle) = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref().filter(|flight| self.is_joinable(flight)) {
                Some(flight) => {
                    debug!(flight = flight.id, "agent resolution: joining pending lookup");
                    (flight.id, flight.handle.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let handle =
                        lookup(self.store.clone(), Arc::clone(&self.api), self.ttl)
                            .boxed()
                            .shared();
                    *slot = Some(InFlight {
                        id,
                        started_at: Instant::now(),
                        handle: handle.clone(),
                    });
                    (id, handle)
                }
            }
        };

        let result = handle.await;

        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|flight| flight.id == id) {
            *slot = None;
        }
        result
    }
}

async fn lookup(store: Store, api: Arc<dyn LivechatApi>, ttl: Duration) -> Result<Agent, AgentError> {
    let state = store.state();
    if let Some(agent) = state
        .default_agent
        .as_ref()
        .filter(|agent| is_fresh(agent, ttl, Utc::now()))
    {
        debug!(username = %agent.username, "agent resolution: cache hit");
        return Ok(agent.clone());
    }

    let department = state.guest_department().map(str::to_string);
    let agent = api
        .next_agent(state.token.as_deref(), department.as_deref())
        .await
        .map_err(|e| {
            warn!("agent resolution: backend lookup failed: {e}");
            AgentError::from(e)
        })?;

    let cached = Agent {
        department,
        ts: Some(Utc::now()),
        ..agent
    };
    store
        .update(|s| s.default_agent = Some(cached.clone()))
        .await;
    info!(
        username = %cached.username,
        department = cached.department.as_deref().unwrap_or(""),
        "agent resolution: cached new default agent"
    );
    Ok(cached)
}

/// A cached agent is fresh while its `ts` is younger than `ttl`.
fn is_fresh(agent: &Agent, ttl: Duration, now: DateTime<Utc>) -> bool {
    let Some(ts) = agent.ts else {
        return false;
    };
    match now.signed_duration_since(ts).to_std() {
        Ok(age) => age < ttl,
        // Timestamp in the future: treat as just resolved.
        Err(_) => true,
    }
}
