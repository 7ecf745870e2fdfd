//! Host-page command handlers.
//!
//! Every handler receives the shared [`WidgetContext`] and the command's
//! positional arguments as raw JSON. Argument decoding happens per handler so
//! a malformed argument only fails that one command.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::api::{ApiError, PageInfo, PageLocation};
use crate::messages;
use crate::runtime::WidgetContext;
use crate::store::{Agent, Guest, StoreError, Theme};
use crate::util::create_token;

/// Fields that survive `clearWidgetData`.
const PRESERVED_ON_CLEAR: &[&str] = &["minimized", "visible", "undocked", "expanded", "businessUnit"];

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("invalid argument #{index} for '{command}': {reason}")]
    InvalidArgument {
        command: String,
        index: usize,
        reason: String,
    },
    #[error("Error! Invalid business ids")]
    InvalidBusinessUnit,
    #[error("no livechat token found; initialize the widget before setting a business unit")]
    MissingToken,
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type CommandFuture = BoxFuture<'static, Result<(), CommandError>>;
pub type CommandHandler = Arc<dyn Fn(Arc<WidgetContext>, Vec<Value>) -> CommandFuture + Send + Sync>;

// ── Command table ───────────────────────────────────────────────

/// Name → handler lookup used by the bridge.
#[derive(Clone, Default)]
pub struct CommandTable {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous entry.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Arc<WidgetContext>, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
    {
        self.handlers.insert(
            name.to_string(),
            Arc::new(move |ctx: Arc<WidgetContext>, args: Vec<Value>| -> CommandFuture {
                handler(ctx, args).boxed()
            }),
        );
    }

    pub fn get(&self, name: &str) -> Option<CommandHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The full widget command set.
    pub fn widget_api() -> Self {
        let mut table = Self::new();
        table.register("pageVisited", page_visited);
        table.register("setCustomField", set_custom_field);
        table.register("setTheme", set_theme);
        table.register("setDepartment", set_department_command);
        table.register("setBusinessUnit", set_business_unit);
        table.register("clearBusinessUnit", clear_business_unit);
        table.register("clearDepartment", clear_department);
        table.register("clearWidgetData", clear_widget_data);
        table.register("setAgent", set_agent);
        table.register("setExpanded", set_expanded);
        table.register("setGuestToken", set_guest_token);
        table.register("setGuestName", set_guest_name);
        table.register("setGuestEmail", set_guest_email);
        table.register("registerGuest", register_guest);
        table.register("setLanguage", set_language);
        table.register("showWidget", show_widget);
        table.register("hideWidget", hide_widget);
        table.register("minimizeWidget", minimize_widget);
        table.register("maximizeWidget", maximize_widget);
        table.register("setParentUrl", set_parent_url);
        table
    }
}

// ── Argument decoding ───────────────────────────────────────────

/// Decode the positional argument at `index`. Missing and `null` decode to
/// `None`.
fn arg<T: DeserializeOwned>(
    command: &str,
    args: &[Value],
    index: usize,
) -> Result<Option<T>, CommandError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| CommandError::InvalidArgument {
                command: command.to_string(),
                index,
                reason: e.to_string(),
            }),
    }
}

fn required<T: DeserializeOwned>(
    command: &str,
    args: &[Value],
    index: usize,
) -> Result<T, CommandError> {
    arg(command, args, index)?.ok_or_else(|| CommandError::InvalidArgument {
        command: command.to_string(),
        index,
        reason: "missing".to_string(),
    })
}

/// Scalar rendered as text; strings are taken verbatim.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ── Shared flows ────────────────────────────────────────────────

/// Register or update the visitor with the backend.
async fn create_or_update_guest(ctx: &WidgetContext, guest: Guest) -> Result<(), CommandError> {
    if let Some(token) = guest.token.clone() {
        ctx.store.update(|s| s.token = Some(token)).await;
    }
    let was_registered = ctx.store.state().user.is_some();
    let user = ctx.api.grant_visitor(&guest).await?;
    ctx.store.update(|s| s.user = Some(user)).await;
    if !was_registered {
        ctx.triggers.process_guest_registration().await;
    }
    Ok(())
}

/// Merge `data` into the iframe guest; re-register when a visitor exists.
async fn update_iframe_guest(ctx: &WidgetContext, data: Map<String, Value>) -> Result<(), CommandError> {
    ctx.store
        .set_state(json!({ "iframe": { "guest": Value::Object(data.clone()) } }))
        .await?;

    let state = ctx.store.state();
    if state.user.is_none() {
        return Ok(());
    }
    let mut guest: Guest = serde_json::from_value(Value::Object(data))?;
    guest.token = state.token;
    create_or_update_guest(ctx, guest).await
}

async fn load_config(ctx: &WidgetContext) -> Result<(), CommandError> {
    let state = ctx.store.state();
    let config = ctx
        .api
        .config(
            state.token.as_deref(),
            state.guest_department(),
            state.business_unit.as_deref(),
        )
        .await?;
    ctx.store.update(|s| s.config = config).await;
    debug!("widget config reloaded");
    Ok(())
}

async fn load_messages(ctx: &WidgetContext) -> Result<(), CommandError> {
    let state = ctx.store.state();
    let (Some(token), Some(room)) = (state.token.as_deref(), state.room.as_ref()) else {
        return Ok(());
    };
    let history = ctx.api.load_messages(token, &room.id).await?;
    messages::upsert_many(&ctx.store, history).await;
    Ok(())
}

async fn set_department(ctx: &WidgetContext, value: &str) -> Result<(), CommandError> {
    let state = ctx.store.state();
    let department = state
        .config
        .departments
        .iter()
        .find(|d| d.id == value || d.name == value)
        .map(|d| d.id.clone())
        .unwrap_or_default();

    let mut data = Map::new();
    data.insert("department".into(), Value::String(department.clone()));
    update_iframe_guest(ctx, data).await?;

    let cleared = ctx
        .store
        .update(|s| {
            let stale = s
                .default_agent
                .as_ref()
                .is_some_and(|agent| agent.department.as_deref() != Some(department.as_str()));
            if stale {
                s.default_agent = None;
            }
            stale
        })
        .await;
    if cleared {
        debug!(department = %department, "default agent cleared after department change");
    }

    let existing = state.user.as_ref().and_then(|u| u.department.as_deref());
    if existing != Some(department.as_str()) {
        load_config(ctx).await?;
        load_messages(ctx).await?;
    }
    Ok(())
}

async fn update_business_unit(ctx: &WidgetContext, unit: Option<String>) -> Result<(), CommandError> {
    let state = ctx.store.state();
    let Some(token) = state.token.as_deref() else {
        return Err(CommandError::MissingToken);
    };
    let config = ctx.api.config(Some(token), None, unit.as_deref()).await?;
    ctx.store
        .update(|s| {
            s.config.departments = config.departments;
            s.business_unit = unit;
        })
        .await;
    Ok(())
}

// ── Handlers ────────────────────────────────────────────────────

async fn page_visited(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let info: PageInfo = required("pageVisited", &args, 0)?;
    if info.change == "url" {
        ctx.triggers.process_page_visit(&info).await;
    }

    let state = ctx.store.state();
    let page_info = PageInfo {
        change: info.change,
        title: info.title,
        location: PageLocation {
            href: info.location.href,
        },
    };
    if let Err(e) = ctx
        .api
        .send_visitor_navigation(
            state.token.as_deref(),
            state.room.as_ref().map(|r| r.id.as_str()),
            &page_info,
        )
        .await
    {
        warn!("pageVisited: navigation telemetry failed: {e}");
    }
    Ok(())
}

async fn set_custom_field(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let key: String = required("setCustomField", &args, 0)?;
    let value = args.get(1).map(text).unwrap_or_default();
    let overwrite: bool = arg("setCustomField", &args, 2)?.unwrap_or(true);

    ctx.store
        .update(|s| {
            if overwrite || !s.custom_fields.contains_key(&key) {
                s.custom_fields.insert(key.clone(), value.clone());
            }
        })
        .await;

    let state = ctx.store.state();
    if let (Some(_), Some(token)) = (state.user.as_ref(), state.token.as_deref()) {
        ctx.api
            .send_custom_field(token, &key, &value, overwrite)
            .await?;
    }
    Ok(())
}

#[derive(Deserialize)]
struct ThemeArg {
    #[serde(default)]
    theme: Theme,
}

async fn set_theme(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let ThemeArg { theme } = required::<ThemeArg>("setTheme", &args, 0)?;
    ctx.store.update(|s| s.iframe.theme = theme).await;
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DepartmentArg {
    Plain(String),
    Wrapped { value: String },
}

impl DepartmentArg {
    fn into_value(self) -> String {
        match self {
            Self::Plain(v) | Self::Wrapped { value: v } => v,
        }
    }
}

async fn set_department_command(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let value = arg::<DepartmentArg>("setDepartment", &args, 0)?
        .map(DepartmentArg::into_value)
        .unwrap_or_default();
    set_department(&ctx, &value).await
}

async fn set_business_unit(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let unit: String = arg("setBusinessUnit", &args, 0)?.unwrap_or_default();
    if unit.trim().is_empty() {
        return Err(CommandError::InvalidBusinessUnit);
    }
    if ctx.store.state().business_unit.as_deref() == Some(unit.as_str()) {
        return Ok(());
    }
    update_business_unit(&ctx, Some(unit)).await
}

async fn clear_business_unit(ctx: Arc<WidgetContext>, _args: Vec<Value>) -> Result<(), CommandError> {
    if ctx.store.state().business_unit.is_none() {
        return Ok(());
    }
    update_business_unit(&ctx, None).await
}

async fn clear_department(ctx: Arc<WidgetContext>, _args: Vec<Value>) -> Result<(), CommandError> {
    let mut data = Map::new();
    data.insert("department".into(), Value::String(String::new()));
    update_iframe_guest(&ctx, data).await
}

async fn clear_widget_data(ctx: Arc<WidgetContext>, _args: Vec<Value>) -> Result<(), CommandError> {
    ctx.store.reset(PRESERVED_ON_CLEAR).await?;
    ctx.triggers.reset_session();
    info!("widget data cleared");
    Ok(())
}

async fn set_agent(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let agent = args
        .into_iter()
        .next()
        .and_then(|value| serde_json::from_value::<Agent>(value).ok())
        .filter(|agent| {
            agent.id.as_deref().is_some_and(|id| !id.is_empty()) && !agent.username.is_empty()
        });
    let Some(mut agent) = agent else {
        warn!("setAgent: the fields _id and username are mandatory");
        return Ok(());
    };
    agent.ts = Some(Utc::now());
    ctx.store.update(|s| s.default_agent = Some(agent)).await;
    Ok(())
}

async fn set_expanded(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let expanded: bool = arg("setExpanded", &args, 0)?.unwrap_or(false);
    ctx.store.update(|s| s.expanded = expanded).await;
    Ok(())
}

async fn set_guest_token(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let token: String = required("setGuestToken", &args, 0)?;
    if ctx.store.state().token.as_deref() == Some(token.as_str()) {
        return Ok(());
    }
    let guest = Guest {
        token: Some(token),
        ..Guest::default()
    };
    create_or_update_guest(&ctx, guest).await?;
    load_config(&ctx).await
}

async fn set_guest_name(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let name = args.first().map(text).unwrap_or_default();
    let mut data = Map::new();
    data.insert("name".into(), Value::String(name));
    update_iframe_guest(&ctx, data).await
}

async fn set_guest_email(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let email = args.first().map(text).unwrap_or_default();
    let mut data = Map::new();
    data.insert("email".into(), Value::String(email));
    update_iframe_guest(&ctx, data).await
}

async fn register_guest(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let Some(Value::Object(data)) = args.into_iter().next() else {
        warn!("registerGuest: guest data must be an object");
        return Ok(());
    };
    let mut guest: Guest = match serde_json::from_value(Value::Object(data)) {
        Ok(guest) => guest,
        Err(e) => {
            warn!("registerGuest: invalid guest data: {e}");
            return Ok(());
        }
    };
    if guest.token.as_deref().unwrap_or_default().is_empty() {
        guest.token = Some(create_token());
    }
    if let Some(department) = guest.department.clone().filter(|d| !d.is_empty()) {
        set_department(&ctx, &department).await?;
    }
    create_or_update_guest(&ctx, guest).await
}

#[derive(Deserialize)]
struct LanguageArg {
    #[serde(default)]
    language: Option<String>,
}

async fn set_language(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let LanguageArg { language } = required::<LanguageArg>("setLanguage", &args, 0)?;
    ctx.store.update(|s| s.iframe.language = language).await;
    Ok(())
}

async fn show_widget(ctx: Arc<WidgetContext>, _args: Vec<Value>) -> Result<(), CommandError> {
    ctx.store.update(|s| s.iframe.visible = true).await;
    ctx.parent.call("showWidget", Vec::new());
    Ok(())
}

async fn hide_widget(ctx: Arc<WidgetContext>, _args: Vec<Value>) -> Result<(), CommandError> {
    ctx.store.update(|s| s.iframe.visible = false).await;
    ctx.parent.call("hideWidget", Vec::new());
    Ok(())
}

async fn minimize_widget(ctx: Arc<WidgetContext>, _args: Vec<Value>) -> Result<(), CommandError> {
    ctx.store.update(|s| s.minimized = true).await;
    ctx.parent.call("closeWidget", Vec::new());
    Ok(())
}

async fn maximize_widget(ctx: Arc<WidgetContext>, _args: Vec<Value>) -> Result<(), CommandError> {
    ctx.store.update(|s| s.minimized = false).await;
    ctx.parent.call("openWidget", Vec::new());
    messages::mark_read(&ctx.store).await;
    ctx.triggers.process_chat_opened().await;
    Ok(())
}

async fn set_parent_url(ctx: Arc<WidgetContext>, args: Vec<Value>) -> Result<(), CommandError> {
    let parent_url: Option<String> = arg("setParentUrl", &args, 0)?;
    ctx.store.update(|s| s.parent_url = parent_url).await;
    Ok(())
}
