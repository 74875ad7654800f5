//! The conversational agent and its generation loop.
//!
//! An [`Agent`] owns one session's history. Each call to
//! [`Agent::generate`] appends the user prompt, then alternates model calls
//! and tool execution until the model answers without tool calls. Progress
//! is reported as raw runtime events in the converse-stream shape; the
//! orchestrator normalizes them for the client.

use std::sync::Arc;

use hisho_config::ModelConfig;
use hisho_core::error::ProviderError;
use hisho_core::message::{Conversation, Message, MessageToolCall};
use hisho_core::provider::{Provider, ProviderRequest};
use hisho_core::tool::{ToolCall, ToolRegistry};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Model settings applied to every request an agent makes.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Maximum model/tool round trips per prompt
    pub max_iterations: u32,
}

impl From<&ModelConfig> for AgentSettings {
    fn from(config: &ModelConfig) -> Self {
        Self {
            model: config.model_id.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            max_iterations: config.max_tool_iterations,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&ModelConfig::default())
    }
}

/// Why generation stopped before completing.
enum Stop {
    /// The event receiver is gone; nobody is listening any more.
    Disconnected,
    Failed(hisho_core::Error),
}

impl From<ProviderError> for Stop {
    fn from(e: ProviderError) -> Self {
        Stop::Failed(e.into())
    }
}

/// One session's conversational agent.
pub struct Agent {
    provider: Arc<dyn Provider>,
    settings: AgentSettings,
    system_prompt: String,
    conversation: Conversation,
    tools: Arc<ToolRegistry>,
}

impl Agent {
    /// Create an agent with empty history and no capabilities.
    pub fn new(
        provider: Arc<dyn Provider>,
        settings: AgentSettings,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            settings,
            system_prompt: system_prompt.into(),
            conversation: Conversation::new(),
            tools: Arc::new(ToolRegistry::new()),
        }
    }

    /// Replace the attached capability set.
    pub fn set_tools(&mut self, tools: Arc<ToolRegistry>) {
        self.tools = tools;
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Run one prompt to completion, sending raw events to `events`.
    ///
    /// Returns `Ok` when the model finished or when the receiver was dropped
    /// (generation stops at the next event it tries to send, and never
    /// starts a model call once the receiver is gone). Provider
    /// failures are returned as errors; tool failures are handed back to the
    /// model as text.
    pub async fn generate(
        &mut self,
        prompt: &str,
        events: mpsc::Sender<Value>,
    ) -> Result<(), hisho_core::Error> {
        match self.run(prompt, &events).await {
            Ok(()) => Ok(()),
            Err(Stop::Disconnected) => {
                debug!(
                    conversation_id = %self.conversation.id,
                    "Event receiver dropped, stopping generation"
                );
                Ok(())
            }
            Err(Stop::Failed(e)) => Err(e),
        }
    }

    async fn run(&mut self, prompt: &str, events: &mpsc::Sender<Value>) -> Result<(), Stop> {
        info!(
            conversation_id = %self.conversation.id,
            messages = self.conversation.len(),
            tools = self.tools.len(),
            "Processing prompt"
        );

        self.conversation.push(Message::user(prompt));
        emit(events, json!({"init_event_loop": true})).await?;

        let tool_definitions = self.tools.definitions();

        for iteration in 1..=self.settings.max_iterations {
            debug!(
                conversation_id = %self.conversation.id,
                iteration,
                "Agent loop iteration"
            );
            emit(events, json!({"start_event_loop": true})).await?;

            let request = ProviderRequest {
                model: self.settings.model.clone(),
                system: Some(self.system_prompt.clone()),
                messages: self.conversation.messages().to_vec(),
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
                tools: tool_definitions.clone(),
            };

            // Receiver gone: stop before calling the model.
            if events.is_closed() {
                return Err(Stop::Disconnected);
            }
            let mut chunks = self.provider.stream(request).await?;
            emit(events, json!({"event": {"messageStart": {"role": "assistant"}}})).await?;

            let mut text = String::new();
            let mut tool_calls: Vec<MessageToolCall> = Vec::new();
            let mut stop_reason = None;

            while let Some(chunk) = chunks.recv().await {
                let chunk = chunk?;
                if let Some(delta) = chunk.content.filter(|c| !c.is_empty()) {
                    emit(
                        events,
                        json!({"event": {"contentBlockDelta": {"delta": {"text": delta}}}}),
                    )
                    .await?;
                    text.push_str(&delta);
                }
                for tc in chunk.tool_calls {
                    emit(
                        events,
                        json!({"event": {"contentBlockStart": {"start": {
                            "toolUse": {"toolUseId": tc.id, "name": tc.name}
                        }}}}),
                    )
                    .await?;
                    emit(
                        events,
                        json!({"event": {"contentBlockDelta": {"delta": {
                            "toolUse": {"input": tc.arguments}
                        }}}}),
                    )
                    .await?;
                    emit(events, json!({"event": {"contentBlockStop": {}}})).await?;
                    tool_calls.push(tc);
                }
                if chunk.done {
                    stop_reason = chunk.stop_reason;
                    break;
                }
            }

            let stop_reason = stop_reason.unwrap_or_else(|| {
                if tool_calls.is_empty() { "end_turn" } else { "tool_use" }.to_string()
            });

            let mut assistant = Message::assistant(text);
            assistant.tool_calls = tool_calls;

            if assistant.tool_calls.is_empty() {
                let final_text = assistant.content.clone();
                self.conversation.push(assistant);
                emit(events, json!({"event": {"messageStop": {"stopReason": stop_reason}}})).await?;
                emit(events, json!({"message": {"role": "assistant", "content": final_text}})).await?;
                emit(events, json!({"result": {"stop_reason": stop_reason}})).await?;
                return Ok(());
            }

            // History must never end in an unanswered tool call, so every
            // result is recorded before the next event goes out.
            let calls = assistant.tool_calls.clone();
            self.conversation.push(assistant);
            let mut results = Vec::with_capacity(calls.len());
            for tc in &calls {
                let message = self.execute_tool(tc).await;
                results.push(json!({
                    "toolUseId": tc.id,
                    "status": if message.is_error { "error" } else { "success" },
                }));
                self.conversation.push(message);
            }

            emit(events, json!({"event": {"messageStop": {"stopReason": stop_reason}}})).await?;
            emit(events, json!({"message": {"role": "user", "toolResults": results}})).await?;
        }

        warn!(
            conversation_id = %self.conversation.id,
            max_iterations = self.settings.max_iterations,
            "Max tool iterations reached"
        );
        Err(Stop::Failed(hisho_core::Error::Internal(format!(
            "maximum tool iterations ({}) reached",
            self.settings.max_iterations
        ))))
    }

    /// Execute one tool call, producing the tool-result message for history.
    async fn execute_tool(&self, tc: &MessageToolCall) -> Message {
        let call = ToolCall {
            id: tc.id.clone(),
            name: tc.name.clone(),
            arguments: serde_json::from_str(&tc.arguments).unwrap_or_else(|_| json!({})),
        };

        let start = std::time::Instant::now();
        let result = self.tools.execute(&call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(result) => {
                debug!(tool = %tc.name, success = result.success, duration_ms, "Tool executed");
                if result.success {
                    Message::tool_result(&tc.id, result.output)
                } else {
                    Message::tool_error(&tc.id, result.output)
                }
            }
            Err(e) => {
                warn!(tool = %tc.name, error = %e, duration_ms, "Tool execution failed");
                Message::tool_error(&tc.id, format!("エラー: {e}"))
            }
        }
    }
}

async fn emit(events: &mpsc::Sender<Value>, event: Value) -> Result<(), Stop> {
    events.send(event).await.map_err(|_| Stop::Disconnected)
}
