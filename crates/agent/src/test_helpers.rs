//! Shared test helpers for agent, session and orchestrator tests.

use async_trait::async_trait;
use hisho_core::error::{ProviderError, ToolError};
use hisho_core::message::{Message, MessageToolCall};
use hisho_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use hisho_core::tool::{Tool, ToolRegistry, ToolResult};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// A provider that replays scripted responses and records every request.
///
/// Once the script runs out it keeps returning an `ApiError`.
pub struct ScriptedProvider {
    responses: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            responses: Mutex::new(vec![Err(error)]),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            });
        }
        responses.remove(0)
    }
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        stop_reason: Some("end_turn".into()),
        model: "scripted-model".into(),
    }
}

pub fn tool_call_response(id: &str, name: &str, arguments: &str) -> ProviderResponse {
    let mut message = Message::assistant("");
    message.tool_calls = vec![MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }];
    ProviderResponse {
        message,
        usage: None,
        stop_reason: Some("tool_use".into()),
        model: "scripted-model".into(),
    }
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;
        Ok(ToolResult::ok(text))
    }
}

pub fn registry_with(tools: Vec<Box<dyn Tool>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.extend(tools);
    registry
}

/// A tool that signals `entered` and then waits for `gate` before answering.
pub struct GateTool {
    entered: Arc<Notify>,
    gate: Arc<Notify>,
}

impl GateTool {
    pub fn new(entered: Arc<Notify>, gate: Arc<Notify>) -> Self {
        Self { entered, gate }
    }
}

#[async_trait]
impl Tool for GateTool {
    fn name(&self) -> &str {
        "gate"
    }
    fn description(&self) -> &str {
        "Waits for the test to release it"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(ToolResult::ok("released"))
    }
}
