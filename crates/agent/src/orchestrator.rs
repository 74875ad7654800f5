//! Request entrypoint: credential check, capabilities, session, streaming.
//!
//! ```text
//! request ─► credential? ──no──► [text: not connected] ─► end
//!               │yes
//!               ▼
//!        capability set ─► session agent (locked) ─► generate
//!                                                     │ raw events (cap 1)
//!                                                     ▼
//!                                               normalize ─► wire events
//! ```

use std::sync::Arc;

use hisho_core::tool::{CapabilityFactory, ToolRegistry};
use hisho_core::{Credential, Provider};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentSettings};
use crate::normalize::{WireEvent, normalize};
use crate::prompt::system_prompt;
use crate::session::{SessionRegistry, SharedAgent};

/// Reply when the request carries no usable credential.
pub const NOT_CONNECTED_MESSAGE: &str = "Outlook に連携されていません。画面右上の「Entra IDに接続」ボタンをクリックして連携してください。";

const WIRE_BUFFER: usize = 16;

/// One user turn as received from the transport.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    #[serde(default)]
    pub prompt: String,

    /// Bearer token for the calendar/task APIs.
    #[serde(default, alias = "msGraphAccessToken")]
    pub credential: Option<Credential>,

    /// IANA timezone id; blank means the configured default.
    #[serde(default, alias = "userTimeZone")]
    pub timezone: Option<String>,

    /// Client clock at send time. Informational only.
    #[serde(default, alias = "clientNowIso")]
    pub client_timestamp: Option<String>,
}

/// Turns requests into streams of wire events.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    capabilities: Arc<dyn CapabilityFactory>,
    sessions: Arc<SessionRegistry>,
    settings: AgentSettings,
    default_timezone: String,
    wiki_enabled: bool,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        capabilities: Arc<dyn CapabilityFactory>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            provider,
            capabilities,
            sessions,
            settings: AgentSettings::default(),
            default_timezone: hisho_config::default_timezone(),
            wiki_enabled: false,
        }
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_default_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.default_timezone = timezone.into();
        self
    }

    /// Whether new sessions are told about the wiki in their system prompt.
    pub fn with_wiki(mut self, enabled: bool) -> Self {
        self.wiki_enabled = enabled;
        self
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Handle one request. Must be called within a tokio runtime.
    ///
    /// The returned stream ends when generation finishes. Dropping it stops
    /// generation at its next event; the session keeps the history so far.
    pub fn invoke(&self, request: InvokeRequest, session_id: Option<&str>) -> ReceiverStream<WireEvent> {
        let (wire_tx, wire_rx) = mpsc::channel(WIRE_BUFFER);

        let Some(credential) = request.credential.filter(|c| !c.is_blank()) else {
            info!(?session_id, "Request without credential, asking user to connect");
            // Fresh channel with spare capacity: cannot fail.
            let _ = wire_tx.try_send(WireEvent::text(NOT_CONNECTED_MESSAGE));
            return ReceiverStream::new(wire_rx);
        };

        let timezone = request
            .timezone
            .filter(|tz| !tz.trim().is_empty())
            .unwrap_or_else(|| self.default_timezone.clone());

        let tools = Arc::new(self.capabilities.build(&credential, &timezone));

        let (agent, is_new) = self.sessions.resolve(session_id, || {
            Agent::new(
                Arc::clone(&self.provider),
                self.settings.clone(),
                system_prompt(&timezone, self.wiki_enabled),
            )
        });

        info!(
            ?session_id,
            is_new,
            tools = tools.len(),
            timezone = %timezone,
            client_timestamp = request.client_timestamp.as_deref().unwrap_or(""),
            "Session resolved"
        );

        tokio::spawn(run_generation(agent, tools, request.prompt, wire_tx));
        ReceiverStream::new(wire_rx)
    }
}

async fn run_generation(
    agent: SharedAgent,
    tools: Arc<ToolRegistry>,
    prompt: String,
    wire: mpsc::Sender<WireEvent>,
) {
    let mut agent = agent.lock_owned().await;
    if wire.is_closed() {
        debug!("Client went away before generation started");
        return;
    }
    agent.set_tools(tools);

    // The agent stops once `raw_rx` is dropped; leave as soon as the client does.
    let (raw_tx, mut raw_rx) = mpsc::channel::<Value>(1);
    let forward_wire = wire.clone();
    let forward = async move {
        loop {
            let raw = tokio::select! {
                biased;
                () = forward_wire.closed() => None,
                raw = raw_rx.recv() => raw,
            };
            let Some(raw) = raw else { break };
            if let Some(event) = normalize(&raw) {
                if forward_wire.send(event).await.is_err() {
                    break;
                }
            }
        }
        if forward_wire.is_closed() {
            debug!("Client went away, stopping generation");
        }
    };

    let (result, ()) = tokio::join!(agent.generate(&prompt, raw_tx), forward);

    if let Err(e) = result {
        warn!(error = %e, "Generation failed");
        let _ = wire
            .send(WireEvent::text(format!("エラーが発生しました: {e}")))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use hisho_core::error::ProviderError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_stream::StreamExt;

    /// Counts builds and hands out an echo tool.
    #[derive(Default)]
    struct CountingFactory {
        builds: AtomicUsize,
        timezones: std::sync::Mutex<Vec<String>>,
    }

    impl CapabilityFactory for CountingFactory {
        fn build(&self, _credential: &Credential, timezone: &str) -> ToolRegistry {
            self.builds.fetch_add(1, Ordering::SeqCst);
            self.timezones.lock().unwrap().push(timezone.to_string());
            registry_with(vec![Box::new(EchoTool)])
        }
    }

    fn orchestrator(provider: Arc<ScriptedProvider>, factory: Arc<CountingFactory>) -> Orchestrator {
        let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(600), 100));
        Orchestrator::new(provider, factory, sessions)
    }

    fn request(prompt: &str, credential: Option<&str>) -> InvokeRequest {
        InvokeRequest {
            prompt: prompt.into(),
            credential: credential.map(Credential::from),
            ..InvokeRequest::default()
        }
    }

    async fn texts(stream: ReceiverStream<WireEvent>) -> Vec<WireEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn missing_or_blank_credential_short_circuits() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let factory = Arc::new(CountingFactory::default());
        let orch = orchestrator(provider.clone(), factory.clone());

        for credential in [None, Some(""), Some("  ")] {
            let events = texts(orch.invoke(request("予定は？", credential), Some("s1"))).await;
            assert_eq!(events, vec![WireEvent::text(NOT_CONNECTED_MESSAGE)]);
        }

        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
        assert!(orch.sessions().is_empty());
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn streams_tool_use_then_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_response("t1", "echo", r#"{"text":"x"}"#),
            text_response("完了しました"),
        ]));
        let factory = Arc::new(CountingFactory::default());
        let orch = orchestrator(provider, factory.clone());

        let events = texts(orch.invoke(request("go", Some("tok")), Some("s1"))).await;
        assert_eq!(
            events,
            vec![
                WireEvent::ToolUse {
                    tool_name: "echo".into()
                },
                WireEvent::text("完了しました"),
            ]
        );
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn same_session_keeps_history() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_response("はじめまして"),
            text_response("覚えています"),
        ]));
        let factory = Arc::new(CountingFactory::default());
        let orch = orchestrator(provider.clone(), factory.clone());

        texts(orch.invoke(request("こんにちは", Some("tok")), Some("s1"))).await;
        texts(orch.invoke(request("覚えてる？", Some("tok2")), Some("s1"))).await;

        assert_eq!(orch.sessions().len(), 1);
        // Second call sees both earlier messages plus the new prompt
        assert_eq!(provider.requests()[1].messages.len(), 3);
        // Capabilities rebuilt for every request
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_session_id_is_stateless() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_response("a"),
            text_response("b"),
        ]));
        let orch = orchestrator(provider.clone(), Arc::new(CountingFactory::default()));

        texts(orch.invoke(request("1", Some("tok")), None)).await;
        texts(orch.invoke(request("2", Some("tok")), None)).await;

        assert!(orch.sessions().is_empty());
        assert_eq!(provider.requests()[1].messages.len(), 1);
    }

    #[tokio::test]
    async fn provider_failure_becomes_trailing_text() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::RateLimited {
            retry_after_secs: 5,
        }));
        let orch = orchestrator(provider, Arc::new(CountingFactory::default()));

        let events = texts(orch.invoke(request("hi", Some("tok")), Some("s1"))).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            WireEvent::Text { data } => {
                assert!(data.starts_with("エラーが発生しました: "));
                assert!(data.contains("Rate limited"));
            }
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_timezone_uses_default() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("a"), text_response("b")]));
        let factory = Arc::new(CountingFactory::default());
        let orch = orchestrator(provider, factory.clone()).with_default_timezone("Asia/Tokyo");

        let mut req = request("hi", Some("tok"));
        req.timezone = Some(" ".into());
        texts(orch.invoke(req, None)).await;

        let mut req = request("hi", Some("tok"));
        req.timezone = Some("Europe/Berlin".into());
        texts(orch.invoke(req, None)).await;

        assert_eq!(
            *factory.timezones.lock().unwrap(),
            vec!["Asia/Tokyo".to_string(), "Europe/Berlin".to_string()]
        );
    }

    /// Wait until the in-flight generation for `session_id` has released its agent.
    async fn settled(orch: &Orchestrator, session_id: &str) -> SharedAgent {
        let (agent, is_new) = orch
            .sessions()
            .resolve(Some(session_id), || panic!("session should exist"));
        assert!(!is_new);
        drop(agent.lock().await);
        agent
    }

    #[tokio::test]
    async fn dropped_stream_makes_no_model_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_response("unused")]));
        let orch = orchestrator(provider.clone(), Arc::new(CountingFactory::default()));

        drop(orch.invoke(request("hi", Some("tok")), Some("s1")));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(provider.requests().is_empty());
        assert!(orch.sessions().contains("s1"));
    }

    #[tokio::test]
    async fn disconnect_during_tool_turn_stops_before_next_model_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call_response("t1", "gate", "{}"),
            text_response("never requested"),
        ]));
        let entered = Arc::new(tokio::sync::Notify::new());
        let gate = Arc::new(tokio::sync::Notify::new());
        let orch = Orchestrator::new(
            provider.clone(),
            Arc::new(GateFactory {
                entered: Arc::clone(&entered),
                gate: Arc::clone(&gate),
            }),
            Arc::new(SessionRegistry::new(Duration::from_secs(600), 10)),
        );

        let mut stream = orch.invoke(request("go", Some("tok")), Some("s1"));
        assert_eq!(
            stream.next().await,
            Some(WireEvent::ToolUse {
                tool_name: "gate".into()
            })
        );
        entered.notified().await;
        drop(stream);
        gate.notify_one();

        let agent = settled(&orch, "s1").await;
        assert_eq!(provider.requests().len(), 1);
        // The tool result is still recorded: user, assistant tool call, tool result
        let agent = agent.lock().await;
        let messages = agent.conversation().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, "released");
    }

    /// Hands out a single tool that waits on a shared gate.
    struct GateFactory {
        entered: Arc<tokio::sync::Notify>,
        gate: Arc<tokio::sync::Notify>,
    }

    impl CapabilityFactory for GateFactory {
        fn build(&self, _credential: &Credential, _timezone: &str) -> ToolRegistry {
            registry_with(vec![Box::new(GateTool::new(
                Arc::clone(&self.entered),
                Arc::clone(&self.gate),
            ))])
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_on_one_session_are_serialized() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_response("一つ目"),
            text_response("二つ目"),
        ]));
        let orch = Arc::new(orchestrator(
            provider.clone(),
            Arc::new(CountingFactory::default()),
        ));

        let first = orch.invoke(request("a", Some("tok")), Some("shared"));
        let second = orch.invoke(request("b", Some("tok")), Some("shared"));
        let (first, second) = tokio::join!(texts(first), texts(second));

        // Each request saw exactly its own reply
        let mut replies: Vec<WireEvent> = first.into_iter().chain(second).collect();
        replies.sort_by_key(|e| format!("{e:?}"));
        let mut expected = vec![WireEvent::text("一つ目"), WireEvent::text("二つ目")];
        expected.sort_by_key(|e| format!("{e:?}"));
        assert_eq!(replies, expected);

        // The second generation started only after the first finished
        let mut sizes: Vec<usize> = provider
            .requests()
            .iter()
            .map(|r| r.messages.len())
            .collect();
        sizes.sort();
        assert_eq!(sizes, vec![1, 3]);
        assert_eq!(orch.sessions().len(), 1);
        let agent = settled(&orch, "shared").await;
        assert_eq!(agent.lock().await.conversation().len(), 4);
    }

    #[test]
    fn request_accepts_frontend_field_names() {
        let req: InvokeRequest = serde_json::from_value(serde_json::json!({
            "prompt": "今日の予定は？",
            "msGraphAccessToken": "tok",
            "userTimeZone": "Asia/Tokyo",
            "clientNowIso": "2026-01-15T09:00:00+09:00"
        }))
        .unwrap();
        assert_eq!(req.credential.unwrap().expose(), "tok");
        assert_eq!(req.timezone.as_deref(), Some("Asia/Tokyo"));
        assert_eq!(req.client_timestamp.as_deref(), Some("2026-01-15T09:00:00+09:00"));

        let req: InvokeRequest = serde_json::from_value(serde_json::json!({
            "prompt": "x",
            "credential": null,
            "clientTimestamp": "t"
        }))
        .unwrap();
        assert!(req.credential.is_none());
        assert!(req.timezone.is_none());
        assert_eq!(req.client_timestamp.as_deref(), Some("t"));
    }
}
