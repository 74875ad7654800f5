//! Bedrock runtime provider implementation.
//!
//! Uses the Converse API (`POST /model/{modelId}/converse`) and its
//! streaming twin (`/converse-stream`) with bearer API-key authentication.
//!
//! Features:
//! - System prompt as a top-level `system` block list
//! - Native tool use with `toolUse` / `toolResult` content blocks
//! - Consecutive tool results folded into one user turn, as the API requires
//! - Token streaming over AWS event-stream frames

use async_trait::async_trait;
use aws_smithy_eventstream::frame::{DecodedFrame, MessageFrameDecoder};
use aws_smithy_types::event_stream::Message as EventMessage;
use bytes::BytesMut;
use futures::StreamExt;
use hisho_core::error::ProviderError;
use hisho_core::message::{Message, MessageToolCall, Role};
use hisho_core::provider::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

const DEFAULT_MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Bedrock Converse API provider.
pub struct BedrockProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl BedrockProvider {
    /// Create a new provider against the `us-east-1` runtime.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: "bedrock".into(),
            base_url: "https://bedrock-runtime.us-east-1.amazonaws.com".into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Use a custom base URL (regional endpoint, proxy, or test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `action` is `converse` or `converse-stream`.
    fn model_url(&self, model: &str, action: &str) -> String {
        format!(
            "{}/model/{}/{action}",
            self.base_url,
            model.replace(':', "%3A")
        )
    }

    /// POST `body` and map non-200 statuses to provider errors.
    async fn send(&self, url: &str, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "model runtime rejected the API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Bedrock API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }

    /// Convert history to Converse messages.
    ///
    /// Tool results travel as `user` turns; adjacent turns with the same
    /// role are merged so the API sees strictly alternating roles.
    fn to_api_messages(messages: &[Message]) -> Vec<ConverseMessage> {
        let mut result: Vec<ConverseMessage> = Vec::new();

        for msg in messages {
            let (role, blocks) = match msg.role {
                Role::User => ("user", vec![ContentBlock::Text(msg.content.clone())]),
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text(msg.content.clone()));
                    }
                    for tc in &msg.tool_calls {
                        let input: serde_json::Value = serde_json::from_str(&tc.arguments)
                            .unwrap_or_else(|_| serde_json::json!({}));
                        blocks.push(ContentBlock::ToolUse(ToolUseBlock {
                            tool_use_id: tc.id.clone(),
                            name: tc.name.clone(),
                            input,
                        }));
                    }
                    ("assistant", blocks)
                }
                Role::Tool => (
                    "user",
                    vec![ContentBlock::ToolResult(ToolResultBlock {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: vec![ToolResultContent {
                            text: msg.content.clone(),
                        }],
                        status: if msg.is_error { "error" } else { "success" },
                    })],
                ),
            };

            if blocks.is_empty() {
                continue;
            }

            match result.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => result.push(ConverseMessage {
                    role,
                    content: blocks,
                }),
            }
        }

        result
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ToolSpecWrapper> {
        tools
            .iter()
            .map(|t| ToolSpecWrapper {
                tool_spec: ToolSpec {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: InputSchema {
                        json: t.parameters.clone(),
                    },
                },
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messages": Self::to_api_messages(&request.messages),
            "inferenceConfig": {
                "maxTokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                "temperature": request.temperature,
            },
        });

        if let Some(system) = &request.system {
            body["system"] = serde_json::json!([{ "text": system }]);
        }

        if !request.tools.is_empty() {
            body["toolConfig"] = serde_json::json!({
                "tools": Self::to_api_tools(&request.tools),
            });
        }

        body
    }

    fn response_to_provider_response(
        api_resp: ConverseResponse,
        model: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let blocks = api_resp
            .output
            .message
            .map(|m| m.content)
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "Converse response carried no output message".into(),
            })?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in blocks {
            if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                text.push_str(t);
            } else if let Some(tool_use) = block.get("toolUse") {
                tool_calls.push(MessageToolCall {
                    id: tool_use["toolUseId"].as_str().unwrap_or_default().to_string(),
                    name: tool_use["name"].as_str().unwrap_or_default().to_string(),
                    arguments: tool_use
                        .get("input")
                        .map(|i| i.to_string())
                        .unwrap_or_else(|| "{}".into()),
                });
            }
        }

        let mut message = Message::assistant(text);
        message.tool_calls = tool_calls;

        Ok(ProviderResponse {
            message,
            usage: api_resp.usage.map(Usage::from),
            stop_reason: api_resp.stop_reason,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl hisho_core::Provider for BedrockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = self.model_url(&request.model, "converse");
        let body = Self::build_body(&request);

        debug!(
            provider = "bedrock",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending converse request"
        );

        let response = self.send(&url, &body).await?;

        let api_resp: ConverseResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse converse response: {e}"),
            })?;

        Self::response_to_provider_response(api_resp, &request.model)
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let url = self.model_url(&request.model, "converse-stream");
        let body = Self::build_body(&request);

        debug!(
            provider = "bedrock",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming converse request"
        );

        let response = self.send(&url, &body).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = BytesMut::new();
            let mut decoder = MessageFrameDecoder::new();
            let mut assembler = StreamAssembler::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                loop {
                    let frame = match decoder.decode_frame(&mut buffer) {
                        Ok(DecodedFrame::Complete(frame)) => frame,
                        Ok(_) => break,
                        Err(e) => {
                            let _ = tx
                                .send(Err(ProviderError::StreamInterrupted(format!(
                                    "malformed event-stream frame: {e}"
                                ))))
                                .await;
                            return;
                        }
                    };

                    match assembler.on_frame(&frame) {
                        Ok(Some(chunk)) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            let _ = tx.send(Ok(assembler.finish())).await;
        });

        Ok(rx)
    }
}

// --- Streaming ---

/// Folds ConverseStream events into [`StreamChunk`]s.
///
/// Text deltas pass straight through; a tool call is emitted once its
/// content block stops and its JSON input is complete.
#[derive(Debug, Default)]
struct StreamAssembler {
    tool: Option<PendingToolUse>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    input: String,
}

impl StreamAssembler {
    fn on_frame(&mut self, frame: &EventMessage) -> Result<Option<StreamChunk>, ProviderError> {
        let payload: Value = serde_json::from_slice(frame.payload()).unwrap_or(Value::Null);

        match header(frame, ":message-type") {
            Some("event") => Ok(header(frame, ":event-type")
                .and_then(|event_type| self.on_event(event_type, &payload))),
            Some("exception") => Err(ProviderError::StreamInterrupted(format!(
                "{}: {}",
                header(frame, ":exception-type").unwrap_or("exception"),
                payload["message"].as_str().unwrap_or_default()
            ))),
            Some("error") => Err(ProviderError::StreamInterrupted(format!(
                "{}: {}",
                header(frame, ":error-code").unwrap_or("error"),
                header(frame, ":error-message").unwrap_or_default()
            ))),
            other => {
                trace!(message_type = ?other, "Ignoring event-stream frame");
                Ok(None)
            }
        }
    }

    fn on_event(&mut self, event_type: &str, payload: &Value) -> Option<StreamChunk> {
        match event_type {
            "contentBlockStart" => {
                if let Some(tool_use) = payload["start"].get("toolUse") {
                    self.tool = Some(PendingToolUse {
                        id: tool_use["toolUseId"].as_str().unwrap_or_default().to_string(),
                        name: tool_use["name"].as_str().unwrap_or_default().to_string(),
                        input: String::new(),
                    });
                }
                None
            }
            "contentBlockDelta" => {
                let delta = &payload["delta"];
                if let Some(text) = delta["text"].as_str().filter(|t| !t.is_empty()) {
                    return Some(partial(Some(text.to_string()), Vec::new()));
                }
                if let (Some(tool), Some(input)) =
                    (self.tool.as_mut(), delta["toolUse"]["input"].as_str())
                {
                    tool.input.push_str(input);
                }
                None
            }
            "contentBlockStop" => self.tool.take().map(|tool| {
                let arguments = if tool.input.is_empty() {
                    "{}".to_string()
                } else {
                    tool.input
                };
                partial(
                    None,
                    vec![MessageToolCall {
                        id: tool.id,
                        name: tool.name,
                        arguments,
                    }],
                )
            }),
            "messageStop" => {
                self.stop_reason = payload["stopReason"].as_str().map(str::to_string);
                None
            }
            "metadata" => {
                self.usage = payload
                    .get("usage")
                    .cloned()
                    .and_then(|u| serde_json::from_value::<ConverseUsage>(u).ok())
                    .map(Usage::from);
                None
            }
            _ => None,
        }
    }

    /// The closing chunk, sent when the response body ends.
    fn finish(self) -> StreamChunk {
        StreamChunk {
            content: None,
            tool_calls: Vec::new(),
            done: true,
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }
}

fn partial(content: Option<String>, tool_calls: Vec<MessageToolCall>) -> StreamChunk {
    StreamChunk {
        content,
        tool_calls,
        done: false,
        stop_reason: None,
        usage: None,
    }
}

fn header<'a>(frame: &'a EventMessage, name: &str) -> Option<&'a str> {
    frame
        .headers()
        .iter()
        .find(|h| h.name().as_str() == name)
        .and_then(|h| h.value().as_string().ok())
        .map(|v| v.as_str())
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ConverseMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ContentBlock {
    Text(String),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolUseBlock {
    tool_use_id: String,
    name: String,
    input: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultBlock {
    tool_use_id: String,
    content: Vec<ToolResultContent>,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ToolResultContent {
    text: String,
}

#[derive(Debug, Serialize)]
struct ToolSpecWrapper {
    #[serde(rename = "toolSpec")]
    tool_spec: ToolSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolSpec {
    name: String,
    description: String,
    input_schema: InputSchema,
}

#[derive(Debug, Serialize)]
struct InputSchema {
    json: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseResponse {
    output: ConverseOutput,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ConverseUsage>,
}

#[derive(Debug, Deserialize)]
struct ConverseOutput {
    #[serde(default)]
    message: Option<ConverseOutputMessage>,
}

#[derive(Debug, Deserialize)]
struct ConverseOutputMessage {
    #[serde(default)]
    content: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<ConverseUsage> for Usage {
    fn from(u: ConverseUsage) -> Self {
        Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.total_tokens,
        }
    }
}
