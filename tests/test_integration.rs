//! Integration tests: the widget runtime talking HTTP to a mocked livechat
//! server.

use std::sync::Arc;
use std::time::Duration;

use livechat_widget::api::HttpLivechatClient;
use livechat_widget::channels::{InboundEnvelope, MemoryChannel};
use livechat_widget::triggers::Trigger;
use livechat_widget::{Config, DispatchResult, WidgetRuntime};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runtime_for(server: &MockServer, config_toml: &str) -> WidgetRuntime {
    let mut config = Config::from_toml(config_toml).unwrap();
    config.server_url = server.uri();
    config.validate().unwrap();
    let (channel, _host) = MemoryChannel::pair("host");
    WidgetRuntime::from_config(&config, Arc::new(channel)).unwrap()
}

fn command(name: &str, args: Value) -> InboundEnvelope {
    InboundEnvelope::new("host", json!({"src": "rocketchat", "fn": name, "args": args}))
}

const QUEUE_TRIGGER: &str = r#"
[[triggers]]
_id = "hello"
name = "Greeting"

[[triggers.conditions]]
name = "chat-opened-by-visitor"

[[triggers.actions]]
name = "send-message"

[triggers.actions.params]
sender = "queue"
msg = "Hello from the team"
"#;

#[tokio::test]
async fn config_file_triggers_reach_the_session() {
    let server = MockServer::start().await;
    let runtime = runtime_for(&server, QUEUE_TRIGGER);

    let triggers: Vec<Trigger> = runtime.store().state().config.triggers;
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].name, "Greeting");
    assert!(triggers[0].enabled);
    assert_eq!(triggers[0].actions[0].params.sender, "queue");
}

#[tokio::test]
async fn chat_opened_trigger_resolves_queue_agent_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/livechat/agent.next/tok-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "agent": {"_id": "a1", "username": "rita"},
            "success": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = runtime_for(&server, QUEUE_TRIGGER);
    runtime
        .store()
        .set_state(json!({"token": "tok-42"}))
        .await
        .unwrap();
    let bridge = runtime.bridge("widget").unwrap();

    let result = bridge.dispatch(command("maximizeWidget", json!([]))).await;
    assert!(matches!(result, DispatchResult::Completed { .. }));

    let state = runtime.store().state();
    assert!(!state.minimized);
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].msg.as_deref(), Some("Hello from the team"));
    assert_eq!(state.messages[0].u.as_ref().unwrap().username, "rita");
    assert_eq!(state.default_agent.as_ref().unwrap().username, "rita");

    // Second resolution within the TTL is served from the cache.
    let trigger = state.config.triggers[0].clone();
    assert!(runtime.triggers().fire(&trigger).await.is_fired());
    assert_eq!(runtime.store().state().messages.len(), 2);
}

#[tokio::test]
async fn external_service_fallback_is_shown_when_backend_rejects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/livechat/triggers/ext/call"))
        .and(body_partial_json(json!({"token": "tok-7"})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "error": "error-invalid-external-service-response",
            "fallbackMessage": "An agent will be with you shortly"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = runtime_for(
        &server,
        r#"
        [[triggers]]
        _id = "ext"

        [[triggers.actions]]
        name = "use-external-service"
        params = { sender = "custom", name = "Helper" }
        "#,
    );
    runtime
        .store()
        .set_state(json!({"token": "tok-7"}))
        .await
        .unwrap();

    let trigger = runtime.store().state().config.triggers[0].clone();
    assert!(runtime.triggers().fire(&trigger).await.is_fired());

    let state = runtime.store().state();
    assert_eq!(state.messages.len(), 1);
    assert_eq!(
        state.messages[0].msg.as_deref(),
        Some("An agent will be with you shortly")
    );
    assert_eq!(state.messages[0].u.as_ref().unwrap().username, "Helper");
}

#[tokio::test]
async fn register_guest_posts_visitor_with_generated_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/livechat/visitor"))
        .and(body_partial_json(json!({"visitor": {"name": "Lin"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "visitor": {"_id": "v1", "token": "server-token", "name": "Lin"},
            "success": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = runtime_for(&server, "");
    let bridge = runtime.bridge("widget").unwrap();

    let result = bridge
        .dispatch(command("registerGuest", json!([{"name": "Lin"}])))
        .await;
    assert!(matches!(result, DispatchResult::Completed { .. }));

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let sent_token = body["visitor"]["token"].as_str().unwrap().to_string();
    assert!(!sent_token.is_empty());

    let state = runtime.store().state();
    assert_eq!(state.token.as_deref(), Some(sent_token.as_str()));
    assert_eq!(state.user.unwrap().id.as_deref(), Some("v1"));
}

#[tokio::test]
async fn business_unit_change_reloads_config() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/livechat/config"))
        .and(query_param("businessUnit", "emea"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "config": {
                "departments": [{"_id": "d-emea", "name": "EMEA"}],
                "triggers": []
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = runtime_for(&server, "");
    runtime
        .store()
        .set_state(json!({"token": "tok-1"}))
        .await
        .unwrap();
    let bridge = runtime.bridge("widget").unwrap();

    let result = bridge.dispatch(command("setBusinessUnit", json!(["emea"]))).await;
    assert!(matches!(result, DispatchResult::Completed { .. }));

    let state = runtime.store().state();
    assert_eq!(state.business_unit.as_deref(), Some("emea"));
    assert_eq!(state.config.departments[0].name, "EMEA");
}

#[tokio::test]
async fn backend_outage_fails_only_the_affected_command() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/livechat/visitor"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let runtime = runtime_for(&server, "");
    let bridge = runtime.bridge("widget").unwrap();

    let failed = bridge
        .dispatch(command("registerGuest", json!([{"name": "Kim"}])))
        .await;
    match failed {
        DispatchResult::Failed { command, error } => {
            assert_eq!(command, "registerGuest");
            assert!(error.contains("503"), "unexpected error: {error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let ok = bridge.dispatch(command("setExpanded", json!([true]))).await;
    assert!(matches!(ok, DispatchResult::Completed { .. }));
    assert!(runtime.store().state().expanded);
}

#[tokio::test]
async fn http_client_honors_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/livechat/agent.next/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_json(json!({"agent": {"username": "late"}})),
        )
        .mount(&server)
        .await;

    let client = HttpLivechatClient::new(&server.uri(), Duration::from_millis(200)).unwrap();
    let err = livechat_widget::api::LivechatApi::next_agent(&client, Some("slow"), None)
        .await
        .unwrap_err();
    assert_eq!(err.status, None);
}
