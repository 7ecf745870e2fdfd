//! Livechat REST client interface.
//!
//! The widget runtime only depends on the [`LivechatApi`] trait; the HTTP
//! implementation lives in [`http`]. Tests substitute in-memory fakes.

#[cfg(test)]
pub(crate) mod fake;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{Agent, Guest, Message, Visitor, WidgetConfig};

pub use http::HttpLivechatClient;

// ── Errors ──────────────────────────────────────────────────────

/// Failure of a backend call.
///
/// `fallback_message` is populated when the backend answered with an error
/// body carrying `fallbackMessage` (trigger external-service calls).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("livechat api error (status={status:?}): {message}")]
pub struct ApiError {
    pub status: Option<u16>,
    pub message: String,
    pub fallback_message: Option<String>,
}

impl ApiError {
    /// Error without an HTTP status (transport, decoding, missing input).
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            fallback_message: None,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            fallback_message: None,
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback_message = Some(fallback.into());
        self
    }
}

// ── Payloads ────────────────────────────────────────────────────

/// Navigation telemetry reported by the host page on every visit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageInfo {
    pub change: String,
    pub title: String,
    pub location: PageLocation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageLocation {
    pub href: String,
}

// ── Client trait ────────────────────────────────────────────────

/// Backend operations used by the widget runtime.
#[async_trait]
pub trait LivechatApi: Send + Sync {
    /// Ask the backend which agent would take a conversation now.
    async fn next_agent(
        &self,
        token: Option<&str>,
        department: Option<&str>,
    ) -> Result<Agent, ApiError>;

    /// Register or update a visitor.
    async fn grant_visitor(&self, visitor: &Guest) -> Result<Visitor, ApiError>;

    async fn send_visitor_navigation(
        &self,
        token: Option<&str>,
        rid: Option<&str>,
        page_info: &PageInfo,
    ) -> Result<(), ApiError>;

    /// Store a custom field on the visitor record.
    async fn send_custom_field(
        &self,
        token: &str,
        key: &str,
        value: &str,
        overwrite: bool,
    ) -> Result<(), ApiError>;

    /// Widget configuration for the given visitor/department/unit.
    async fn config(
        &self,
        token: Option<&str>,
        department: Option<&str>,
        business_unit: Option<&str>,
    ) -> Result<WidgetConfig, ApiError>;

    /// Room history, oldest first.
    async fn load_messages(&self, token: &str, rid: &str) -> Result<Vec<Message>, ApiError>;

    /// Raw POST under the API root; returns the decoded JSON body.
    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError>;
}
