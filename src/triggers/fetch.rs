use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::types::TriggerContent;
use crate::api::{ApiError, LivechatApi};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Unable to fetch message from external service.")]
    Unavailable(#[source] ApiError),
}

#[derive(Deserialize)]
struct CallEnvelope {
    response: CallResponse,
}

#[derive(Deserialize)]
struct CallResponse {
    #[serde(default)]
    contents: Vec<TriggerContent>,
}

/// Call the backend's external-service endpoint for `trigger_id`.
///
/// `metadata` is sent as `extraData: [{key, value}, ...]` in key order. On
/// failure, a backend-provided `fallbackMessage` becomes a single content
/// `{msg: fallback, order: 0}`; without one the call fails.
pub async fn request_trigger_messages(
    api: &dyn LivechatApi,
    trigger_id: &str,
    token: Option<&str>,
    metadata: &Map<String, Value>,
) -> Result<Vec<TriggerContent>, FetchError> {
    let extra_data: Vec<Value> = metadata
        .iter()
        .map(|(key, value)| json!({ "key": key, "value": value }))
        .collect();
    let path = format!("/v1/livechat/triggers/{trigger_id}/call");
    let body = json!({ "extraData": extra_data, "token": token });

    let outcome = match api.post(&path, &body).await {
        Ok(raw) => serde_json::from_value::<CallEnvelope>(raw)
            .map(|envelope| envelope.response.contents)
            .map_err(|e| ApiError::transport(format!("malformed trigger response: {e}"))),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(contents) => {
            debug!(trigger_id, count = contents.len(), "trigger fetch: contents received");
            Ok(contents)
        }
        Err(e) => match e.fallback_message.clone() {
            Some(fallback) => {
                warn!(trigger_id, "trigger fetch failed, using fallback message: {e}");
                Ok(vec![TriggerContent::new(fallback, 0)])
            }
            None => {
                warn!(trigger_id, "trigger fetch failed: {e}");
                Err(FetchError::Unavailable(e))
            }
        },
    }
}
