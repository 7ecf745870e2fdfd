use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::triggers::types::Trigger;

// ── Session state ───────────────────────────────────────────────

/// The widget's session record. Owned exclusively by [`super::Store`].
///
/// Field names follow the widget wire format (camelCase) so that host
/// pages and the backend see the same shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    /// Visitor token used for every backend call.
    pub token: Option<String>,
    /// Registered visitor as returned by the backend.
    pub user: Option<Visitor>,
    /// Currently open room.
    pub room: Option<Room>,
    /// Embedding configuration driven by the host page.
    pub iframe: IframeState,
    /// Server-provided widget configuration.
    pub config: WidgetConfig,
    /// Conversation log, unique by `_id`, ordered by `ts`.
    pub messages: Vec<Message>,
    /// Cached agent resolution.
    pub default_agent: Option<Agent>,
    pub business_unit: Option<String>,
    pub parent_url: Option<String>,
    pub minimized: bool,
    pub expanded: bool,
    pub visible: bool,
    pub undocked: bool,
    pub unread: usize,
    pub last_read_message_id: Option<String>,
    pub custom_fields: BTreeMap<String, String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            token: None,
            user: None,
            room: None,
            iframe: IframeState::default(),
            config: WidgetConfig::default(),
            messages: Vec::new(),
            default_agent: None,
            business_unit: None,
            parent_url: None,
            minimized: true,
            expanded: false,
            visible: true,
            undocked: false,
            unread: 0,
            last_read_message_id: None,
            custom_fields: BTreeMap::new(),
        }
    }
}

impl SessionState {
    /// Department currently requested for this guest (iframe override).
    pub fn guest_department(&self) -> Option<&str> {
        self.iframe
            .guest
            .department
            .as_deref()
            .filter(|d| !d.is_empty())
    }
}

/// Host-controlled embedding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IframeState {
    pub theme: Theme,
    pub language: Option<String>,
    pub visible: bool,
    /// Guest data set by the host page before registration.
    pub guest: Guest,
}

impl Default for IframeState {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            language: None,
            visible: true,
            guest: Guest::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Theme {
    pub color: Option<String>,
    pub font_color: Option<String>,
    pub icon_color: Option<String>,
    pub title: Option<String>,
    pub offline_title: Option<String>,
}

/// Visitor identity as supplied by the host page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Guest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Registered visitor record returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Visitor {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub token: Option<String>,
    pub name: Option<String>,
    pub department: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    #[serde(rename = "_id")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Department {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

/// Server configuration payload; unknown settings are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    pub departments: Vec<Department>,
    pub triggers: Vec<Trigger>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Agent ───────────────────────────────────────────────────────

/// Party responsible for a conversation, real or synthesized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    /// Resolution time; the only input to cache expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Agent {
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }
}

// ── Message ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub u: Option<Agent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(id: impl Into<String>, ts: DateTime<Utc>, msg: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ts,
            msg: Some(msg.into()),
            u: None,
            extra: Map::new(),
        }
    }
}
