use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// ── Condition names ─────────────────────────────────────────────

pub const CONDITION_PAGE_URL: &str = "page-url";
pub const CONDITION_TIME_ON_SITE: &str = "time-on-site";
pub const CONDITION_CHAT_OPENED: &str = "chat-opened-by-visitor";
pub const CONDITION_AFTER_REGISTRATION: &str = "after-guest-registration";

// ── Action names ────────────────────────────────────────────────

pub const ACTION_SEND_MESSAGE: &str = "send-message";
pub const ACTION_EXTERNAL_SERVICE: &str = "use-external-service";

// ── Trigger ─────────────────────────────────────────────────────

/// Declarative automation rule, loaded from configuration and read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub run_once: bool,
    #[serde(default)]
    pub conditions: Vec<TriggerCondition>,
    #[serde(default)]
    pub actions: Vec<TriggerAction>,
}

fn default_enabled() -> bool {
    true
}

/// A named behavioral predicate. `value` meaning depends on the name
/// (URL pattern for `page-url`, seconds for `time-on-site`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TriggerCondition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl TriggerCondition {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Condition value rendered as text (numbers are stringified).
    pub fn value_str(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TriggerAction {
    pub name: String,
    #[serde(default)]
    pub params: TriggerActionParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerActionParams {
    /// `queue`, `custom`, or anything else (rejected at resolution time).
    #[serde(default)]
    pub sender: String,
    /// Synthesized agent username for `custom` senders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Other keys (e.g. `serviceFallbackMessage`) are carried verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TriggerAction {
    pub fn send_message(sender: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: ACTION_SEND_MESSAGE.to_string(),
            params: TriggerActionParams {
                sender: sender.into(),
                msg: Some(msg.into()),
                ..TriggerActionParams::default()
            },
        }
    }

    pub fn sender_kind(&self) -> Result<SenderKind, String> {
        self.params.sender.parse()
    }
}

// ── Sender ──────────────────────────────────────────────────────

/// Who a trigger message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderKind {
    /// Route through backend agent assignment.
    Queue,
    /// Synthesize the agent from the trigger's own metadata.
    Custom,
}

impl FromStr for SenderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queue" => Ok(Self::Queue),
            "custom" => Ok(Self::Custom),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for SenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue => write!(f, "queue"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

// ── Trigger message payloads ────────────────────────────────────

/// A message-like record produced by an external trigger service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerContent {
    pub msg: String,
    #[serde(default)]
    pub order: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TriggerContent {
    pub fn new(msg: impl Into<String>, order: i64) -> Self {
        Self {
            msg: msg.into(),
            order,
            extra: Map::new(),
        }
    }
}
