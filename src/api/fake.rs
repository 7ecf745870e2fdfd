//! In-memory [`LivechatApi`] used by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{ApiError, LivechatApi, PageInfo};
use crate::store::{Agent, Guest, Message, Visitor, WidgetConfig};

pub(crate) struct FakeApi {
    pub agent: Mutex<Result<Agent, ApiError>>,
    pub agent_delay: Mutex<Duration>,
    pub next_agent_calls: AtomicUsize,
    pub departments_seen: Mutex<Vec<Option<String>>>,
    pub post_response: Mutex<Result<Value, ApiError>>,
    pub posts: Mutex<Vec<(String, Value)>>,
    pub granted: Mutex<Vec<Guest>>,
    pub navigations: Mutex<Vec<PageInfo>>,
    pub custom_fields: Mutex<Vec<(String, String, bool)>>,
    pub config: Mutex<WidgetConfig>,
    pub config_calls: Mutex<Vec<(Option<String>, Option<String>)>>,
    pub history: Mutex<Vec<Message>>,
    pub load_messages_calls: AtomicUsize,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            agent: Mutex::new(Ok(Agent::named("agent.smith"))),
            agent_delay: Mutex::new(Duration::ZERO),
            next_agent_calls: AtomicUsize::new(0),
            departments_seen: Mutex::new(Vec::new()),
            post_response: Mutex::new(Ok(Value::Null)),
            posts: Mutex::new(Vec::new()),
            granted: Mutex::new(Vec::new()),
            navigations: Mutex::new(Vec::new()),
            custom_fields: Mutex::new(Vec::new()),
            config: Mutex::new(WidgetConfig::default()),
            config_calls: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            load_messages_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeApi {
    pub fn next_agent_calls(&self) -> usize {
        self.next_agent_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivechatApi for FakeApi {
    async fn next_agent(
        &self,
        _token: Option<&str>,
        department: Option<&str>,
    ) -> Result<Agent, ApiError> {
        self.next_agent_calls.fetch_add(1, Ordering::SeqCst);
        self.departments_seen
            .lock()
            .push(department.map(str::to_string));
        let delay = *self.agent_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.agent.lock().clone()
    }

    async fn grant_visitor(&self, visitor: &Guest) -> Result<Visitor, ApiError> {
        self.granted.lock().push(visitor.clone());
        Ok(Visitor {
            id: Some("visitor-1".into()),
            token: visitor.token.clone(),
            name: visitor.name.clone(),
            department: visitor.department.clone(),
            ..Visitor::default()
        })
    }

    async fn send_visitor_navigation(
        &self,
        _token: Option<&str>,
        _rid: Option<&str>,
        page_info: &PageInfo,
    ) -> Result<(), ApiError> {
        self.navigations.lock().push(page_info.clone());
        Ok(())
    }

    async fn send_custom_field(
        &self,
        _token: &str,
        key: &str,
        value: &str,
        overwrite: bool,
    ) -> Result<(), ApiError> {
        self.custom_fields
            .lock()
            .push((key.to_string(), value.to_string(), overwrite));
        Ok(())
    }

    async fn config(
        &self,
        _token: Option<&str>,
        department: Option<&str>,
        business_unit: Option<&str>,
    ) -> Result<WidgetConfig, ApiError> {
        self.config_calls.lock().push((
            department.map(str::to_string),
            business_unit.map(str::to_string),
        ));
        Ok(self.config.lock().clone())
    }

    async fn load_messages(&self, _token: &str, _rid: &str) -> Result<Vec<Message>, ApiError> {
        self.load_messages_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.history.lock().clone())
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.posts.lock().push((path.to_string(), body.clone()));
        self.post_response.lock().clone()
    }
}
