//! Inference boundary.
//!
//! The orchestrator talks to a language model only through
//! [`InferenceClient`]: it sends the conversation, the tool schemas and
//! session metadata, and gets back reply text, tool calls, or both.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{AgentError, AgentResult};

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }

    /// A call with no arguments.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, Value::Object(Default::default()))
    }
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// The result of a tool call, fed back to the model.
    pub fn tool_result(call_id: impl Into<String>, payload: &Value) -> Self {
        Self {
            role: ChatRole::Tool,
            content: payload.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Function-style tool description sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// Session metadata attached to every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceMetadata {
    pub session_id: String,
    pub turn: u32,
    pub current_state: String,
}

/// One request to the inference boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    pub metadata: InferenceMetadata,
}

/// Reply text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl InferenceResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn call(name: impl Into<String>) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCall::bare(name)],
        }
    }

    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls: calls,
        }
    }

    pub fn with_text(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Call/response boundary to a language model.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "inference"
    }

    async fn complete(&self, request: &InferenceRequest) -> AgentResult<InferenceResponse>;
}

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Respond(InferenceResponse),
    Fail(String),
}

/// Inference client that replays a fixed script.
///
/// When the script runs out, the last step repeats if `repeat_last` is set;
/// otherwise every further call fails.
#[derive(Debug, Default)]
pub struct ScriptedInference {
    steps: Mutex<VecDeque<ScriptStep>>,
    last: Mutex<Option<ScriptStep>>,
    repeat_last: bool,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedInference {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    /// Script made only of responses.
    pub fn responses(responses: Vec<InferenceResponse>) -> Self {
        Self::new(responses.into_iter().map(ScriptStep::Respond).collect())
    }

    /// Return the same response forever.
    pub fn repeating(response: InferenceResponse) -> Self {
        Self::new(vec![ScriptStep::Respond(response)]).repeat_last()
    }

    pub fn repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &InferenceRequest) -> AgentResult<InferenceResponse> {
        self.requests.lock().push(request.clone());

        let next = self.steps.lock().pop_front();
        let step = match next {
            Some(step) => {
                *self.last.lock() = Some(step.clone());
                step
            }
            None if self.repeat_last => self
                .last
                .lock()
                .clone()
                .ok_or_else(|| AgentError::Inference("empty script".to_string()))?,
            None => return Err(AgentError::Inference("script exhausted".to_string())),
        };

        debug!("Scripted inference turn {}", request.metadata.turn);
        match step {
            ScriptStep::Respond(response) => Ok(response),
            ScriptStep::Fail(message) => Err(AgentError::Inference(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(turn: u32) -> InferenceRequest {
        InferenceRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
            metadata: InferenceMetadata {
                session_id: "s1".to_string(),
                turn,
                current_state: "IDLE".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_script_replays_in_order() {
        let client = ScriptedInference::new(vec![
            ScriptStep::Respond(InferenceResponse::call("plan_next_phase")),
            ScriptStep::Fail("provider down".to_string()),
        ]);

        let first = client.complete(&request(1)).await.unwrap();
        assert_eq!(first.tool_calls[0].name, "plan_next_phase");

        let second = client.complete(&request(2)).await.unwrap_err();
        assert!(second.is_inference());

        assert!(client.complete(&request(3)).await.is_err());
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_repeating_script() {
        let client = ScriptedInference::repeating(InferenceResponse::text("thinking"));
        for turn in 1..=5 {
            let response = client.complete(&request(turn)).await.unwrap();
            assert_eq!(response.content.as_deref(), Some("thinking"));
        }
        assert_eq!(client.requests()[4].metadata.turn, 5);
    }

    #[test]
    fn test_tool_result_message() {
        let message = ChatMessage::tool_result("call_1", &serde_json::json!({"success": true}));
        assert_eq!(message.role, ChatRole::Tool);
        assert_eq!(message.content, r#"{"success":true}"#);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
    }
}
