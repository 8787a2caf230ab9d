//! Chat-completion clients.
//!
//! The inference wire format is opaque to this core: both the local daemon
//! and the cloud endpoint speak the common chat-completions shape, and the
//! rest of the crate only sees the [`ChatClient`] trait.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// One conversation turn sent to the model.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    /// Set on `tool` turns: the id of the assistant tool call being answered.
    pub tool_call_id: Option<String>,
    /// Set on assistant turns that invoked tools. Every `tool` turn must be
    /// preceded by an assistant turn introducing its `tool_call_id`, or the
    /// chat-completions endpoint rejects the transcript.
    pub tool_calls: Vec<ChatToolCall>,
}

impl ChatMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    /// Assistant turn that requested tool calls (content may be empty).
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ChatToolCall>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: calls,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Tool call requested by the model.
#[derive(Debug, Clone)]
pub struct ChatToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument JSON, exactly as the model produced it.
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Tool schemas in `{type:"function", function:{...}}` form.
    pub tools: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ChatToolCall>,
}

/// Opaque chat-completion backend.
#[async_trait]
pub trait ChatClient: Send + Sync + std::fmt::Debug {
    /// Short label for logs ("local", "cloud", "local+cloud-fallback").
    fn describe(&self) -> &str;

    async fn chat(&self, request: ChatRequest) -> anyhow::Result<ChatResponse>;
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

fn wire_message(message: &ChatMessage) -> Value {
    let mut wire = serde_json::json!({
        "role": message.role,
        "content": message.content,
    });
    if let Some(id) = &message.tool_call_id {
        wire["tool_call_id"] = Value::String(id.clone());
    }
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                serde_json::json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments},
                })
            })
            .collect();
    }
    wire
}

fn request_body(request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(wire_message).collect();
    let mut body = serde_json::json!({
        "model": request.model,
        "messages": messages,
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.clone());
    }
    body
}

fn parse_response(wire: WireResponse) -> ChatResponse {
    let Some(choice) = wire.choices.into_iter().next() else {
        return ChatResponse::default();
    };
    ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls: choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ChatToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect(),
    }
}

/// Client for the local LMX daemon (chat-completions compatible).
#[derive(Debug)]
pub struct LocalClient {
    http: reqwest::Client,
    base_url: String,
}

impl LocalClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ChatClient for LocalClient {
    fn describe(&self) -> &str {
        "local"
    }

    async fn chat(&self, request: ChatRequest) -> anyhow::Result<ChatResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&request_body(&request))
            .send()
            .await?
            .error_for_status()?;
        let wire: WireResponse = response.json().await?;
        Ok(parse_response(wire))
    }
}

/// Client for a cloud chat-completions endpoint with bearer auth.
#[derive(Debug)]
pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CloudClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ChatClient for CloudClient {
    fn describe(&self) -> &str {
        "cloud"
    }

    async fn chat(&self, request: ChatRequest) -> anyhow::Result<ChatResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body(&request))
            .send()
            .await?
            .error_for_status()?;
        let wire: WireResponse = response.json().await?;
        Ok(parse_response(wire))
    }
}

/// Decorator that retries a failed local call against the cloud, silently.
/// This is the zero-config fallback: the caller never sees the switch.
#[derive(Debug)]
pub struct FallbackClient {
    primary: Arc<dyn ChatClient>,
    fallback: Arc<dyn ChatClient>,
}

impl FallbackClient {
    pub fn new(primary: Arc<dyn ChatClient>, fallback: Arc<dyn ChatClient>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl ChatClient for FallbackClient {
    fn describe(&self) -> &str {
        "local+cloud-fallback"
    }

    async fn chat(&self, request: ChatRequest) -> anyhow::Result<ChatResponse> {
        match self.primary.chat(request.clone()).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(error = %e, "Local inference failed, falling back to cloud");
                self.fallback.chat(request).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FailingClient;

    #[async_trait]
    impl ChatClient for FailingClient {
        fn describe(&self) -> &str {
            "failing"
        }

        async fn chat(&self, _request: ChatRequest) -> anyhow::Result<ChatResponse> {
            anyhow::bail!("connection refused")
        }
    }

    #[derive(Debug)]
    struct EchoClient;

    #[async_trait]
    impl ChatClient for EchoClient {
        fn describe(&self) -> &str {
            "echo"
        }

        async fn chat(&self, request: ChatRequest) -> anyhow::Result<ChatResponse> {
            Ok(ChatResponse {
                content: request.messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                tool_calls: Vec::new(),
            })
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("hello")],
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fallback_silently_switches_on_primary_failure() {
        let client = FallbackClient::new(Arc::new(FailingClient), Arc::new(EchoClient));
        let response = client.chat(request()).await.unwrap();
        assert_eq!(response.content, "hello");
    }

    #[test]
    fn test_wire_response_parsing() {
        let raw = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "read", "arguments": "{\"path\":\"a.rs\"}"}
                    }]
                }
            }]
        });
        let wire: WireResponse = serde_json::from_value(raw).unwrap();
        let parsed = parse_response(wire);
        assert!(parsed.content.is_empty());
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "read");
    }

    #[test]
    fn test_request_body_omits_empty_tools() {
        let body = request_body(&request());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_request_body_echoes_assistant_tool_calls() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![
                ChatMessage::user("read a.rs"),
                ChatMessage::assistant_tool_calls(
                    "",
                    vec![ChatToolCall {
                        id: "call_1".into(),
                        name: "read".into(),
                        arguments: "{\"path\":\"a.rs\"}".into(),
                    }],
                ),
                ChatMessage::tool("call_1", "fn main() {}"),
            ],
            tools: Vec::new(),
        };
        let body = request_body(&req);
        let messages = body["messages"].as_array().unwrap();

        let assistant = &messages[1];
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["tool_calls"][0]["id"], "call_1");
        assert_eq!(assistant["tool_calls"][0]["type"], "function");
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "read");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            "{\"path\":\"a.rs\"}"
        );

        let tool = &messages[2];
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
        // Plain turns never carry a tool_calls array.
        assert!(messages[0].get("tool_calls").is_none());
    }
}
