use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, LivechatApi, PageInfo};
use crate::store::{Agent, Guest, Message, Visitor, WidgetConfig};
use crate::util::truncate_with_ellipsis;

const MAX_ERROR_BODY_CHARS: usize = 200;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// `reqwest`-backed Livechat REST client rooted at `{server_url}/api`.
pub struct HttpLivechatClient {
    base_url: String,
    client: Client,
}

#[derive(Deserialize)]
struct AgentEnvelope {
    agent: Agent,
}

#[derive(Deserialize)]
struct VisitorEnvelope {
    visitor: Visitor,
}

#[derive(Deserialize)]
struct ConfigEnvelope {
    config: WidgetConfig,
}

#[derive(Deserialize)]
struct MessagesEnvelope {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    fallback_message: Option<String>,
}

impl HttpLivechatClient {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base_url: format!("{}/api", server_url.trim_end_matches('/')),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::transport(format!("request failed: {e}")))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::transport(format!("failed to read response body: {e}")))?;
        tracing::debug!("livechat response: status={} len={}", status, body.len());

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &body));
        }

        serde_json::from_slice(&body).map_err(|e| {
            let raw = String::from_utf8_lossy(&body);
            tracing::warn!(
                "livechat response deserialization failed: {e}. body_excerpt={}",
                truncate_with_ellipsis(&raw, MAX_ERROR_BODY_CHARS)
            );
            ApiError::with_status(status.as_u16(), format!("invalid response body: {e}"))
        })
    }
}

/// Build an [`ApiError`] from a non-2xx response, keeping the backend's
/// `fallbackMessage` when the body is JSON.
fn error_from_body(status: u16, body: &[u8]) -> ApiError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => {
            let message = parsed
                .error
                .or(parsed.message)
                .unwrap_or_else(|| format!("request failed with status {status}"));
            ApiError {
                status: Some(status),
                message,
                fallback_message: parsed.fallback_message.filter(|m| !m.is_empty()),
            }
        }
        Err(_) => {
            let raw = String::from_utf8_lossy(body);
            ApiError::with_status(status, truncate_with_ellipsis(&raw, MAX_ERROR_BODY_CHARS))
        }
    }
}

fn push_query<'a>(query: &mut Vec<(&'static str, &'a str)>, key: &'static str, value: Option<&'a str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        query.push((key, value));
    }
}

#[async_trait]
impl LivechatApi for HttpLivechatClient {
    async fn next_agent(
        &self,
        token: Option<&str>,
        department: Option<&str>,
    ) -> Result<Agent, ApiError> {
        let token = token.ok_or_else(|| ApiError::transport("visitor token is required"))?;
        let mut query = Vec::new();
        push_query(&mut query, "department", department);
        let envelope: AgentEnvelope = self
            .send_json(
                self.request(Method::GET, &format!("/v1/livechat/agent.next/{token}"))
                    .query(&query),
            )
            .await?;
        Ok(envelope.agent)
    }

    async fn grant_visitor(&self, visitor: &Guest) -> Result<Visitor, ApiError> {
        let envelope: VisitorEnvelope = self
            .send_json(
                self.request(Method::POST, "/v1/livechat/visitor")
                    .json(&json!({ "visitor": visitor })),
            )
            .await?;
        Ok(envelope.visitor)
    }

    async fn send_visitor_navigation(
        &self,
        token: Option<&str>,
        rid: Option<&str>,
        page_info: &PageInfo,
    ) -> Result<(), ApiError> {
        let _: Value = self
            .send_json(
                self.request(Method::POST, "/v1/livechat/page.visited")
                    .json(&json!({ "token": token, "rid": rid, "pageInfo": page_info })),
            )
            .await?;
        Ok(())
    }

    async fn send_custom_field(
        &self,
        token: &str,
        key: &str,
        value: &str,
        overwrite: bool,
    ) -> Result<(), ApiError> {
        let _: Value = self
            .send_json(self.request(Method::POST, "/v1/livechat/custom.field").json(&json!({
                "token": token,
                "key": key,
                "value": value,
                "overwrite": overwrite,
            })))
            .await?;
        Ok(())
    }

    async fn config(
        &self,
        token: Option<&str>,
        department: Option<&str>,
        business_unit: Option<&str>,
    ) -> Result<WidgetConfig, ApiError> {
        let mut query = Vec::new();
        push_query(&mut query, "token", token);
        push_query(&mut query, "department", department);
        push_query(&mut query, "businessUnit", business_unit);
        let envelope: ConfigEnvelope = self
            .send_json(self.request(Method::GET, "/v1/livechat/config").query(&query))
            .await?;
        Ok(envelope.config)
    }

    async fn load_messages(&self, token: &str, rid: &str) -> Result<Vec<Message>, ApiError> {
        let envelope: MessagesEnvelope = self
            .send_json(
                self.request(Method::GET, &format!("/v1/livechat/messages.history/{rid}"))
                    .query(&[("token", token)]),
            )
            .await?;
        let mut messages = envelope.messages;
        messages.sort_by_key(|m| m.ts);
        Ok(messages)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.send_json(self.request(Method::POST, path).json(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpLivechatClient {
        HttpLivechatClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn next_agent_sends_department_and_unwraps_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/livechat/agent.next/tok-1"))
            .and(query_param("department", "sales"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "agent": {"_id": "a1", "username": "alice"},
                "success": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let agent = client_for(&server)
            .next_agent(Some("tok-1"), Some("sales"))
            .await
            .unwrap();
        assert_eq!(agent.id.as_deref(), Some("a1"));
        assert_eq!(agent.username, "alice");
    }

    #[tokio::test]
    async fn next_agent_without_token_fails_before_network() {
        let server = MockServer::start().await;
        let err = client_for(&server).next_agent(None, None).await.unwrap_err();
        assert_eq!(err.status, None);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn post_error_body_exposes_fallback_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/livechat/triggers/t1/call"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "error": "error-invalid-external-service-response",
                "fallbackMessage": "Our team will reply soon"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .post("/v1/livechat/triggers/t1/call", &json!({"token": "tok"}))
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(400));
        assert_eq!(err.message, "error-invalid-external-service-response");
        assert_eq!(err.fallback_message.as_deref(), Some("Our team will reply soon"));
    }

    #[tokio::test]
    async fn non_json_error_body_is_truncated_into_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("x".repeat(500)))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .post("/v1/anything", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(502));
        assert!(err.fallback_message.is_none());
        assert!(err.message.chars().count() <= MAX_ERROR_BODY_CHARS + 3);
    }

    #[tokio::test]
    async fn grant_visitor_wraps_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/livechat/visitor"))
            .and(body_json(json!({"visitor": {"token": "tok", "name": "Ana"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "visitor": {"_id": "v1", "token": "tok", "name": "Ana"}
            })))
            .mount(&server)
            .await;

        let guest = Guest {
            token: Some("tok".into()),
            name: Some("Ana".into()),
            ..Guest::default()
        };
        let visitor = client_for(&server).grant_visitor(&guest).await.unwrap();
        assert_eq!(visitor.id.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn load_messages_orders_by_timestamp() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/livechat/messages.history/r1"))
            .and(query_param("token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [
                    {"_id": "m2", "ts": "2024-01-01T00:00:02Z", "msg": "second"},
                    {"_id": "m1", "ts": "2024-01-01T00:00:01Z", "msg": "first"}
                ]
            })))
            .mount(&server)
            .await;

        let messages = client_for(&server).load_messages("tok", "r1").await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2"]);
    }
}
