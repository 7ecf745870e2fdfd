pub mod agent;
pub mod condition;
pub mod engine;
pub mod fetch;
pub mod types;

pub use agent::{AgentError, AgentResolver, DEFAULT_AGENT_TTL};
pub use condition::has_trigger_condition;
pub use engine::{FireOutcome, TriggerEngine};
pub use fetch::{request_trigger_messages, FetchError};
pub use types::{SenderKind, Trigger, TriggerAction, TriggerCondition, TriggerContent};
