//! Chat-completions classifier for OpenAI-compatible endpoints.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{ClassifierError, FunctionSpec, IntentClassifier};
use crate::types::Intent;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-0613";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full URL of the chat-completions endpoint.
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        OpenAiConfig {
            url: url.into(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct OpenAiClassifier {
    config: OpenAiConfig,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    functions: &'a [FunctionSpec],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    /// A JSON document encoded as a string.
    #[serde(default)]
    arguments: String,
}

impl OpenAiClassifier {
    pub fn new(config: OpenAiConfig) -> Result<Self, ClassifierError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClassifierError::Transport)?;
        Ok(OpenAiClassifier { config, http })
    }
}

/// Decodes a chat-completions response body into an intent.
///
/// Arguments that are not valid JSON are passed on as a JSON string so the
/// handler can reject them with a proper reply.
fn parse_response(body: &[u8]) -> Result<Intent, ClassifierError> {
    let response: ChatResponse = serde_json::from_slice(body).map_err(ClassifierError::Decode)?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(ClassifierError::NoChoices)?;

    let call = choice.message.function_call.map(|call| {
        let arguments = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&call.arguments).unwrap_or_else(|e| {
                warn!(function = %call.name, error = %e, "Function arguments are not JSON");
                Value::String(call.arguments.clone())
            })
        };
        (call.name, arguments)
    });
    Ok(Intent::from_parts(call, choice.message.content))
}

impl IntentClassifier for OpenAiClassifier {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn classify(
        &self,
        system_prompt: &str,
        user_text: &str,
        catalog: &[FunctionSpec],
    ) -> Result<Intent, ClassifierError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_text,
                },
            ],
            functions: catalog,
        };

        let response = self
            .http
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(ClassifierError::Transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(ClassifierError::Transport)?;
        if !status.is_success() {
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let intent = parse_response(&body)?;
        debug!(?intent, "Classified message");
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn function_call_arguments_are_decoded() {
        let body = json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "function_call": {
                        "name": "bookkeeping",
                        "arguments": "{\"remark\":\"包子\",\"amount\":\"15\"}"
                    }
                },
                "finish_reason": "function_call"
            }]
        });
        let intent = parse_response(body.to_string().as_bytes()).unwrap();
        assert_eq!(
            intent,
            Intent::function_call("bookkeeping", json!({"remark": "包子", "amount": "15"}))
        );
    }

    #[test]
    fn broken_arguments_are_kept_as_a_string() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "function_call": { "name": "bookkeeping", "arguments": "{remark: 包子" }
                }
            }]
        });
        let intent = parse_response(body.to_string().as_bytes()).unwrap();
        assert_eq!(intent, Intent::function_call("bookkeeping", json!("{remark: 包子")));
    }

    #[test]
    fn missing_arguments_become_an_empty_object() {
        let body = json!({
            "choices": [{ "message": { "function_call": { "name": "get_ledger" } } }]
        });
        let intent = parse_response(body.to_string().as_bytes()).unwrap();
        assert_eq!(intent, Intent::function_call("get_ledger", json!({})));
    }

    #[test]
    fn plain_content_is_free_text() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "你好" } }]
        });
        let intent = parse_response(body.to_string().as_bytes()).unwrap();
        assert_eq!(intent, Intent::FreeText("你好".to_string()));
    }

    #[test]
    fn empty_choices_is_an_error() {
        let err = parse_response(br#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, ClassifierError::NoChoices));
    }

    #[test]
    fn non_json_body_is_an_error() {
        let err = parse_response(b"<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, ClassifierError::Decode(_)));
    }

    #[test]
    fn request_serializes_system_then_user() {
        let catalog = Vec::new();
        let request = ChatRequest {
            model: DEFAULT_MODEL,
            messages: [
                ChatMessage {
                    role: "system",
                    content: "prompt",
                },
                ChatMessage {
                    role: "user",
                    content: "包子 15",
                },
            ],
            functions: &catalog,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], DEFAULT_MODEL);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "包子 15");
        assert_eq!(value["functions"], json!([]));
    }
}
