//! Generative backends
//!
//! [`ChatBackend`] is the seam between the strategies and a language model.
//! [`HttpChatBackend`] talks to hosted chat-completion APIs; which wire
//! format and endpoint it uses follows from the model identifier.

use crate::error::BackendError;
use crate::tools::{parse_text_protocol, text_protocol_prompt, ToolCall, ToolSpec};
use async_trait::async_trait;
use remedy_core::{ChatMessage, ChatRole};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Environment variable holding the hosted API key
pub const API_KEY_ENV: &str = "LLM_API_KEY";

/// What the backend said
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendReply {
    /// Free text, possibly empty
    pub content: String,
    /// Tool invocations in the order returned
    pub tool_calls: Vec<ToolCall>,
}

impl BackendReply {
    /// Reply carrying a single tool call
    #[must_use]
    pub fn tool(call: ToolCall) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![call],
        }
    }
}

/// A chat-completion endpoint
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the conversation and return the model's reply
    ///
    /// With a non-empty `tools` slice the model is asked to answer with a
    /// tool call. A reply without one is not an error.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<BackendReply, BackendError>;
}

/// Wire protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFlavor {
    /// OpenAI chat completions with required tool choice
    OpenAi,
    /// Anthropic messages with tool use
    Anthropic,
    /// DashScope OpenAI-compatible mode
    DashScope,
    /// Self-hosted endpoint without native tool calling
    Local,
}

impl ModelFlavor {
    /// Pick the protocol family from a model identifier
    #[must_use]
    pub fn for_model(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        if lower.contains("claude") {
            Self::Anthropic
        } else if lower.contains("gpt") {
            Self::OpenAi
        } else if ["qwen", "qwq", "glm", "kimi", "llama", "deepseek"]
            .iter()
            .any(|family| lower.contains(family))
        {
            Self::DashScope
        } else {
            Self::Local
        }
    }

    /// Default endpoint
    #[must_use]
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::DashScope => "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions",
            Self::Local => "http://localhost:8000/v1/chat/completions",
        }
    }

    /// Whether the endpoint needs a real API key
    #[must_use]
    pub fn is_hosted(self) -> bool {
        self != Self::Local
    }
}

fn wire_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::Assistant => "assistant",
        ChatRole::User | ChatRole::Tool => "user",
    }
}

/// HTTP chat backend
pub struct HttpChatBackend {
    model: String,
    flavor: ModelFlavor,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpChatBackend {
    /// Create a backend
    ///
    /// `api_base` replaces the flavor's default endpoint.
    pub fn new(
        model: impl Into<String>,
        api_base: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self, BackendError> {
        let model = model.into();
        let flavor = ModelFlavor::for_model(&model);
        let api_key = match (api_key, flavor.is_hosted()) {
            (Some(key), _) => key,
            (None, false) => "local".to_string(),
            (None, true) => return Err(BackendError::MissingApiKey(model)),
        };
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| BackendError::Transport(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: api_base.unwrap_or_else(|| flavor.endpoint().to_string()),
            model,
            flavor,
            api_key,
            client,
            max_retries: 1,
        })
    }

    /// Create a backend reading the key from `LLM_API_KEY`
    pub fn from_env(
        model: impl Into<String>,
        api_base: Option<String>,
    ) -> Result<Self, BackendError> {
        Self::new(model, api_base, std::env::var(API_KEY_ENV).ok())
    }

    /// With a retry count for transport failures and missing tool calls
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Protocol family in use
    #[must_use]
    pub fn flavor(&self) -> ModelFlavor {
        self.flavor
    }

    /// Request body for one attempt
    #[must_use]
    pub fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        if self.flavor == ModelFlavor::Anthropic {
            return self.anthropic_body(messages, tools);
        }

        let mut wire: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": wire_role(m.role), "content": m.content}))
            .collect();

        if tools.is_empty() {
            return json!({"model": self.model, "messages": wire, "max_tokens": 8192});
        }
        let openai_tools: Vec<Value> = tools.iter().map(ToolSpec::to_openai).collect();
        match self.flavor {
            ModelFlavor::OpenAi => json!({
                "model": self.model,
                "messages": wire,
                "tools": openai_tools,
                "tool_choice": "required",
            }),
            ModelFlavor::DashScope => json!({
                "model": self.model,
                "messages": wire,
                "tools": openai_tools,
                "max_tokens": 1024,
                "stream": false,
                "enable_thinking": false,
            }),
            ModelFlavor::Local | ModelFlavor::Anthropic => {
                if let Some(last) = messages.last() {
                    let prompt = text_protocol_prompt(&last.content, tools);
                    if let Some(slot) = wire.last_mut() {
                        *slot = json!({"role": wire_role(last.role), "content": prompt});
                    }
                }
                json!({"model": self.model, "messages": wire})
            }
        }
    }

    fn anthropic_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let wire: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| json!({"role": wire_role(m.role), "content": m.content}))
            .collect();
        let mut body = json!({
            "model": self.model,
            "system": system.join("\n"),
            "messages": wire,
            "max_tokens": 8192,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(ToolSpec::to_anthropic).collect());
            body["tool_choice"] = json!({"type": "any"});
        }
        body
    }

    /// Decode a response body
    pub fn parse_response(
        &self,
        body: &Value,
        tools: &[ToolSpec],
    ) -> Result<BackendReply, BackendError> {
        if self.flavor == ModelFlavor::Anthropic {
            return Ok(parse_anthropic(body));
        }
        let message = body
            .pointer("/choices/0/message")
            .or_else(|| body.pointer("/data/response/choices/0/message"))
            .ok_or_else(|| BackendError::Decode("response has no choices".into()))?;
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let tool_calls = if self.flavor == ModelFlavor::Local {
            parse_text_protocol(&content, tools)
        } else {
            message
                .get("tool_calls")
                .and_then(Value::as_array)
                .map(|calls| {
                    calls
                        .iter()
                        .filter_map(|c| {
                            let function = c.get("function")?;
                            let name = function.get("name")?.as_str()?;
                            let arguments =
                                function.get("arguments").cloned().unwrap_or(Value::Null);
                            Some(ToolCall::new(name, arguments))
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(BackendReply { content, tool_calls })
    }

    async fn send(&self, body: &Value) -> Result<Value, BackendError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        request = if self.flavor == ModelFlavor::Anthropic {
            request
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
        } else {
            request.bearer_auth(&self.api_key)
        };

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

fn parse_anthropic(body: &Value) -> BackendReply {
    let mut reply = BackendReply::default();
    for block in body
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    reply.content.push_str(text);
                }
            }
            Some("tool_use") => {
                if let Some(name) = block.get("name").and_then(Value::as_str) {
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    reply.tool_calls.push(ToolCall::new(name, input));
                }
            }
            _ => {}
        }
    }
    reply
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<BackendReply, BackendError> {
        let body = self.request_body(messages, tools);
        let mut last_reply = BackendReply::default();

        for attempt in 0..=self.max_retries {
            let reply = match self.send(&body).await {
                Ok(raw) => self.parse_response(&raw, tools),
                Err(e) => Err(e),
            };
            match reply {
                Ok(reply) if tools.is_empty() || !reply.tool_calls.is_empty() => return Ok(reply),
                Ok(reply) => {
                    tracing::warn!(model = %self.model, attempt, "backend replied without a tool call");
                    last_reply = reply;
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    tracing::warn!(model = %self.model, attempt, error = %e, "backend request failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(last_reply)
    }
}

impl fmt::Debug for HttpChatBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpChatBackend")
            .field("model", &self.model)
            .field("flavor", &self.flavor)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{PRINT_PLAYBOOK, PROBE_SYSTEM};
    use pretty_assertions::assert_eq;

    fn backend(model: &str) -> HttpChatBackend {
        HttpChatBackend::new(model, None, Some("key".into())).unwrap()
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("you are an SRE"),
            ChatMessage::user("fix ts-order-service"),
        ]
    }

    #[test]
    fn flavor_follows_model_identifier() {
        assert_eq!(ModelFlavor::for_model("gpt-4o"), ModelFlavor::OpenAi);
        assert_eq!(ModelFlavor::for_model("claude-3-5-sonnet"), ModelFlavor::Anthropic);
        assert_eq!(ModelFlavor::for_model("qwen-plus"), ModelFlavor::DashScope);
        assert_eq!(ModelFlavor::for_model("Kimi-K2"), ModelFlavor::DashScope);
        assert_eq!(ModelFlavor::for_model(""), ModelFlavor::Local);
    }

    #[test]
    fn hosted_models_need_a_key() {
        assert!(matches!(
            HttpChatBackend::new("gpt-4o", None, None),
            Err(BackendError::MissingApiKey(_))
        ));
        assert!(HttpChatBackend::new("my-local-model", None, None).is_ok());
    }

    #[test]
    fn openai_requires_a_tool_call() {
        let body = backend("gpt-4o").request_body(&conversation(), &[ToolSpec::print_playbook()]);
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["tools"][0]["function"]["name"], PRINT_PLAYBOOK);
    }

    #[test]
    fn anthropic_lifts_the_system_prompt() {
        let body = backend("claude-3-5-sonnet")
            .request_body(&conversation(), &[ToolSpec::probe_system()]);
        assert_eq!(body["system"], "you are an SRE");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["tool_choice"]["type"], "any");
        assert_eq!(body["tools"][0]["input_schema"]["required"][0], "cmds");
    }

    #[test]
    fn local_models_get_the_text_protocol() {
        let tools = [ToolSpec::print_playbook()];
        let b = backend("");
        let body = b.request_body(&conversation(), &tools);
        let last = body["messages"][1]["content"].as_str().unwrap();
        assert!(last.contains("Action Input:"));
        assert!(body.get("tools").is_none());

        let raw = json!({"choices": [{"message": {"content":
            "Action: print_playbook\nAction Input: {\"code\": \"- hosts: all\"}"}}]});
        let reply = b.parse_response(&raw, &tools).unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
    }

    #[test]
    fn parses_openai_and_proxy_envelopes() {
        let b = backend("gpt-4o");
        let call = json!({"function": {"name": PROBE_SYSTEM, "arguments": "{\"cmds\": \"ls\"}"}});
        let plain = json!({"choices": [{"message": {"content": null, "tool_calls": [call]}}]});
        let proxied =
            json!({"data": {"response": {"choices": [{"message": {"tool_calls": [call]}}]}}});
        for raw in [plain, proxied] {
            let reply = b.parse_response(&raw, &[]).unwrap();
            assert_eq!(reply.tool_calls[0].name, PROBE_SYSTEM);
        }
        assert!(b.parse_response(&json!({}), &[]).is_err());
    }

    #[test]
    fn parses_anthropic_tool_use() {
        let raw = json!({"stop_reason": "tool_use", "content": [
            {"type": "text", "text": "Let me look."},
            {"type": "tool_use", "name": PROBE_SYSTEM, "input": {"cmds": "kubectl get pods"}}
        ]});
        let reply = backend("claude-3-5-sonnet").parse_response(&raw, &[]).unwrap();
        assert_eq!(reply.content, "Let me look.");
        assert_eq!(reply.tool_calls[0].arguments["cmds"], "kubectl get pods");
    }
}
