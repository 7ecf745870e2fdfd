//! Cross-context command bridge.
//!
//! The bridge listens on a [`CommandChannel`], filters envelopes by origin
//! and source tag, and dispatches accepted commands to the [`CommandTable`].
//! Accepted commands start in the order they were posted and run
//! concurrently on the router task, so a slow handler does not hold up the
//! listener or the commands behind it.

pub mod commands;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::{CommandChannel, InboundEnvelope};
use crate::runtime::WidgetContext;
use crate::util::json_excerpt;

pub use commands::{CommandError, CommandTable};

/// Buffered envelopes between the channel and the router.
const INBOUND_CAPACITY: usize = 64;
const LOG_EXCERPT_CHARS: usize = 120;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("a command bridge already exists for this widget runtime")]
    AlreadyConstructed,
}

// ── Dispatch result ─────────────────────────────────────────────

/// Why an envelope was dropped without running a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Posted by the widget's own context.
    OwnOrigin,
    /// Payload is not a JSON object.
    NotAnObject,
    /// `src` is missing or carries another tag.
    ForeignSource,
    /// `fn` is missing or not a string.
    MissingCommand,
}

/// Outcome of dispatching one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// The handler ran to completion.
    Completed { command: String },
    /// The command was accepted but its handler (or lookup) failed.
    Failed { command: String, error: String },
    /// The envelope was dropped before dispatch.
    Ignored(IgnoreReason),
}

/// An accepted command ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub args: Vec<Value>,
}

// ── Singleton slot ──────────────────────────────────────────────

/// Claim on the runtime's single bridge slot, released on drop.
pub(crate) struct BridgeSlot {
    taken: Arc<AtomicBool>,
}

impl BridgeSlot {
    pub(crate) fn acquire(taken: &Arc<AtomicBool>) -> Result<Self, BridgeError> {
        taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BridgeError::AlreadyConstructed)?;
        Ok(Self {
            taken: Arc::clone(taken),
        })
    }
}

impl Drop for BridgeSlot {
    fn drop(&mut self) {
        self.taken.store(false, Ordering::Release);
    }
}

// ── Bridge ──────────────────────────────────────────────────────

struct Router {
    context_id: String,
    source_tag: String,
    ctx: Arc<WidgetContext>,
    table: CommandTable,
}

pub struct CommandBridge {
    router: Arc<Router>,
    channel: Arc<dyn CommandChannel>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: Arc<watch::Sender<bool>>,
    _slot: BridgeSlot,
}

impl CommandBridge {
    pub(crate) fn new(
        slot: BridgeSlot,
        context_id: String,
        source_tag: String,
        ctx: Arc<WidgetContext>,
        table: CommandTable,
        channel: Arc<dyn CommandChannel>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            router: Arc::new(Router {
                context_id,
                source_tag,
                ctx,
                table,
            }),
            channel,
            listener: Mutex::new(None),
            closed: Arc::new(closed),
            _slot: slot,
        }
    }

    pub fn context_id(&self) -> &str {
        &self.router.context_id
    }

    pub fn is_active(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Start listening on the channel. Calling while active is a no-op;
    /// returns whether a listener was started.
    pub fn init(&self) -> bool {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            debug!("bridge: init while active ignored");
            return false;
        }
        self.closed.send_replace(false);

        let (tx, mut rx) = mpsc::channel(INBOUND_CAPACITY);
        let channel = Arc::clone(&self.channel);
        let router = Arc::clone(&self.router);
        let closed = Arc::clone(&self.closed);
        *listener = Some(tokio::spawn(async move {
            let name = channel.name().to_string();
            let listen = async move {
                if let Err(e) = channel.listen(tx).await {
                    error!(channel = %name, "bridge: channel listener failed: {e}");
                }
            };
            // Dispatches share this task: each starts in arrival order and
            // interleaves with the others only at its await points.
            let route = async move {
                let mut running = FuturesUnordered::new();
                loop {
                    tokio::select! {
                        received = rx.recv() => match received {
                            Some(envelope) => {
                                let router = Arc::clone(&router);
                                running.push(async move { router.dispatch(envelope).await });
                            }
                            None => break,
                        },
                        Some(_) = running.next(), if !running.is_empty() => {}
                    }
                }
                while running.next().await.is_some() {}
            };
            tokio::join!(listen, route);
            closed.send_replace(true);
            debug!("bridge: channel closed");
        }));
        info!(
            context_id = %self.router.context_id,
            channel = self.channel.name(),
            "bridge: listening"
        );
        true
    }

    /// Stop listening. Safe to call when inactive. Commands already
    /// dispatched keep running.
    pub fn reset(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
            info!(context_id = %self.router.context_id, "bridge: stopped");
        }
    }

    /// Wait until the channel stops delivering envelopes.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Validate an envelope without running anything.
    pub fn accept(&self, envelope: &InboundEnvelope) -> Result<Command, IgnoreReason> {
        self.router.accept(envelope)
    }

    /// Filter and run one envelope to completion.
    pub async fn dispatch(&self, envelope: InboundEnvelope) -> DispatchResult {
        self.router.dispatch(envelope).await
    }
}

impl Drop for CommandBridge {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

impl Router {
    fn accept(&self, envelope: &InboundEnvelope) -> Result<Command, IgnoreReason> {
        if envelope.source == self.context_id {
            return Err(IgnoreReason::OwnOrigin);
        }
        let Value::Object(data) = &envelope.data else {
            return Err(IgnoreReason::NotAnObject);
        };
        match data.get("src").and_then(Value::as_str) {
            Some(src) if src == self.source_tag => {}
            _ => return Err(IgnoreReason::ForeignSource),
        }
        let Some(name) = data.get("fn").and_then(Value::as_str) else {
            return Err(IgnoreReason::MissingCommand);
        };
        let args = match data.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(args)) => args.clone(),
            Some(other) => vec![other.clone()],
        };
        Ok(Command {
            name: name.to_string(),
            args,
        })
    }

    #[tracing::instrument(skip(self, envelope), fields(source = %envelope.source))]
    async fn dispatch(&self, envelope: InboundEnvelope) -> DispatchResult {
        let command = match self.accept(&envelope) {
            Ok(command) => command,
            Err(reason) => {
                debug!(
                    ?reason,
                    payload = %json_excerpt(&envelope.data, LOG_EXCERPT_CHARS),
                    "bridge: envelope ignored"
                );
                return DispatchResult::Ignored(reason);
            }
        };

        let Some(handler) = self.table.get(&command.name) else {
            let err = CommandError::UnknownCommand(command.name.clone());
            error!(command = %command.name, "bridge: {err}");
            return DispatchResult::Failed {
                command: command.name,
                error: err.to_string(),
            };
        };

        debug!(command = %command.name, args = command.args.len(), "bridge: dispatching");
        match handler(Arc::clone(&self.ctx), command.args).await {
            Ok(()) => DispatchResult::Completed {
                command: command.name,
            },
            Err(e) => {
                match &e {
                    CommandError::InvalidBusinessUnit | CommandError::MissingToken => {
                        warn!(command = %command.name, "bridge: command rejected: {e}");
                    }
                    _ => error!(command = %command.name, "bridge: command failed: {e}"),
                }
                DispatchResult::Failed {
                    command: command.name,
                    error: e.to_string(),
                }
            }
        }
    }
}
