//! LLM adapter for tool-calling chat completions.
//!
//! Supports OpenAI-compatible and Anthropic APIs, selected via environment
//! variables or configuration. Requests are never retried; a failed call is
//! reported to the caller, which decides how to degrade.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{AgentError, AgentResult};
use crate::inference::{
    ChatMessage, ChatRole, InferenceClient, InferenceRequest, InferenceResponse, ToolCall,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const MAX_TOKENS: u32 = 8192;

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
}

impl std::str::FromStr for LlmProvider {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(AgentError::Config(format!("unknown LLM provider '{}'", other))),
        }
    }
}

/// HTTP client for a chat-completion API
pub struct LlmAdapter {
    provider: LlmProvider,
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl LlmAdapter {
    /// Create a new LLM adapter with explicit configuration
    pub fn new(provider: LlmProvider, api_key: String, model: Option<String>) -> Self {
        let (default_model, base_url) = match provider {
            LlmProvider::OpenAI => ("gpt-4o-mini", OPENAI_BASE_URL),
            LlmProvider::Anthropic => ("claude-sonnet-4-5", ANTHROPIC_BASE_URL),
        };

        Self {
            provider,
            api_key,
            model: model.unwrap_or_else(|| default_model.to_string()),
            base_url: base_url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the adapter at a compatible endpoint (proxy, gateway, local server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create an LLM adapter from environment variables
    ///
    /// Checks in order:
    /// 1. OPENAI_API_KEY
    /// 2. ANTHROPIC_API_KEY
    ///
    /// `KILN_LLM_MODEL` and `KILN_LLM_BASE_URL` override the defaults.
    pub fn from_env() -> AgentResult<Self> {
        Self::from_config(&LlmConfig::default())
    }

    /// Create an LLM adapter from configuration plus API keys from the environment
    pub fn from_config(config: &LlmConfig) -> AgentResult<Self> {
        let key = |name: &str| std::env::var(name).ok().filter(|k| !k.is_empty());
        let model = std::env::var("KILN_LLM_MODEL").ok().or_else(|| config.model.clone());
        let base_url = std::env::var("KILN_LLM_BASE_URL")
            .ok()
            .or_else(|| config.base_url.clone());

        let provider = config
            .provider
            .as_deref()
            .map(str::parse::<LlmProvider>)
            .transpose()?;

        let adapter = match provider {
            Some(LlmProvider::OpenAI) => key("OPENAI_API_KEY")
                .map(|k| Self::new(LlmProvider::OpenAI, k, model))
                .ok_or(AgentError::LlmNotConfigured)?,
            Some(LlmProvider::Anthropic) => key("ANTHROPIC_API_KEY")
                .map(|k| Self::new(LlmProvider::Anthropic, k, model))
                .ok_or(AgentError::LlmNotConfigured)?,
            None => {
                if let Some(k) = key("OPENAI_API_KEY") {
                    Self::new(LlmProvider::OpenAI, k, model)
                } else if let Some(k) = key("ANTHROPIC_API_KEY") {
                    Self::new(LlmProvider::Anthropic, k, model)
                } else {
                    return Err(AgentError::LlmNotConfigured);
                }
            }
        };

        Ok(match base_url {
            Some(url) => adapter.with_base_url(url),
            None => adapter,
        })
    }

    /// Get the current provider
    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    /// Get the current model
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post(&self, path: &str, body: &Value) -> AgentResult<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);
        let builder = self.client.post(&url).json(body);
        let builder = match self.provider {
            LlmProvider::OpenAI => builder.bearer_auth(&self.api_key),
            LlmProvider::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01"),
        };

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Inference(format!(
                "{:?} API error {}: {}",
                self.provider, status, text
            )));
        }
        Ok(response)
    }

    async fn complete_openai(&self, request: &InferenceRequest) -> AgentResult<InferenceResponse> {
        let body = openai_body(&self.model, request);
        let result: OpenAIResponse = self
            .post("chat/completions", &body)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::Inference(format!("Failed to parse response: {}", e)))?;

        let message = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| AgentError::Inference("No response from OpenAI".to_string()))?;

        let mut tool_calls = Vec::new();
        for call in message.tool_calls.unwrap_or_default() {
            // Malformed argument JSON is passed through as a string so the
            // registry reports it as invalid arguments.
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments));
            tool_calls.push(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            });
        }

        Ok(InferenceResponse {
            content: message.content.filter(|c| !c.is_empty()),
            tool_calls,
        })
    }

    async fn complete_anthropic(&self, request: &InferenceRequest) -> AgentResult<InferenceResponse> {
        let body = anthropic_body(&self.model, request);
        let result: AnthropicResponse = self
            .post("messages", &body)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::Inference(format!("Failed to parse response: {}", e)))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in result.content {
            match block {
                AnthropicBlock::Text { text: t } => text.push_str(&t),
                AnthropicBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                AnthropicBlock::Other => {}
            }
        }

        Ok(InferenceResponse {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
        })
    }

    /// Single-shot text completion used by the LLM phase generator
    pub async fn complete_text(&self, system: &str, prompt: &str) -> AgentResult<String> {
        let request = InferenceRequest {
            messages: vec![ChatMessage::system(system), ChatMessage::user(prompt)],
            tools: Vec::new(),
            metadata: crate::inference::InferenceMetadata {
                session_id: String::new(),
                turn: 0,
                current_state: String::new(),
            },
        };
        self.complete(&request)
            .await?
            .content
            .ok_or_else(|| AgentError::Inference("empty completion".to_string()))
    }
}

#[async_trait]
impl InferenceClient for LlmAdapter {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &InferenceRequest) -> AgentResult<InferenceResponse> {
        debug!(
            "LLM request: {} messages, {} tools, turn {}",
            request.messages.len(),
            request.tools.len(),
            request.metadata.turn
        );
        match self.provider {
            LlmProvider::OpenAI => self.complete_openai(request).await,
            LlmProvider::Anthropic => self.complete_anthropic(request).await,
        }
    }
}

fn openai_body(model: &str, request: &InferenceRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|m| match m.role {
            ChatRole::Tool => json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id,
                "content": m.content,
            }),
            ChatRole::Assistant if !m.tool_calls.is_empty() => json!({
                "role": "assistant",
                "content": m.content,
                "tool_calls": m.tool_calls.iter().map(|c| json!({
                    "id": c.id,
                    "type": "function",
                    "function": {"name": c.name, "arguments": c.arguments.to_string()},
                })).collect::<Vec<_>>(),
            }),
            role => json!({"role": role_name(role), "content": m.content}),
        })
        .collect();

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_completion_tokens": MAX_TOKENS,
    });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| json!({
                "type": "function",
                "function": {"name": t.name, "description": t.description, "parameters": t.parameters},
            }))
            .collect();
    }
    body
}

fn anthropic_body(model: &str, request: &InferenceRequest) -> Value {
    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();

    // Tool results travel as user turns; consecutive ones are merged.
    let mut messages: Vec<Value> = Vec::new();
    for m in request.messages.iter().filter(|m| m.role != ChatRole::System) {
        let (role, blocks) = match m.role {
            ChatRole::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id,
                    "content": m.content,
                })],
            ),
            ChatRole::Assistant => {
                let mut blocks = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({"type": "text", "text": m.content}));
                }
                for call in &m.tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                ("assistant", blocks)
            }
            _ => ("user", vec![json!({"type": "text", "text": m.content})]),
        };

        match messages.last_mut() {
            Some(last) if last["role"] == role => {
                if let Some(content) = last["content"].as_array_mut() {
                    content.extend(blocks);
                }
            }
            _ => messages.push(json!({"role": role, "content": blocks})),
        }
    }

    let mut body = json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "messages": messages,
    });
    if !system.is_empty() {
        body["system"] = Value::String(system.join("\n\n"));
    }
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.parameters}))
            .collect();
    }
    body
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

// OpenAI API types
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    id: String,
    function: OpenAIFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunction {
    name: String,
    arguments: String,
}

// Anthropic API types
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}
