//! Credential-bound capabilities for Hisho.
//!
//! Capabilities let the agent act for the caller: read and create calendar
//! events, manage task lists, and search or edit wiki pages. Each request gets
//! a fresh set from [`ApiCapabilityFactory`], bound to that request's
//! credential and timezone.

pub mod graph;
pub mod http;
pub mod todo;
pub mod wiki;

pub use graph::{GraphCapabilities, GraphClient};
pub use todo::{TaskFields, TodoCapabilities};
pub use wiki::WikiCapabilities;

use hisho_config::{GraphConfig, WikiConfig};
use hisho_core::tool::{CapabilityFactory, ToolRegistry};
use hisho_core::Credential;

/// Production capability factory: calendar and tasks always, wiki when configured.
pub struct ApiCapabilityFactory {
    http: reqwest::Client,
    graph_base_url: String,
    wiki: Option<WikiConfig>,
}

impl ApiCapabilityFactory {
    pub fn new(graph: &GraphConfig, wiki: Option<WikiConfig>) -> hisho_core::Result<Self> {
        let http = http::build_client(graph.timeout_secs)
            .map_err(|e| hisho_core::Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            graph_base_url: graph.base_url.clone(),
            wiki,
        })
    }
}

impl CapabilityFactory for ApiCapabilityFactory {
    fn build(&self, credential: &Credential, timezone: &str) -> ToolRegistry {
        let client = GraphClient::new(
            self.http.clone(),
            self.graph_base_url.clone(),
            credential.clone(),
            timezone,
        );

        let mut registry = ToolRegistry::new();
        registry.extend(GraphCapabilities::new(client.clone()).into_tools());
        registry.extend(TodoCapabilities::new(client).into_tools());
        registry.extend(WikiCapabilities::tools(&self.http, self.wiki.as_ref()));

        tracing::debug!(tools = registry.len(), timezone, "Built capability set");
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hisho_core::ToolCall;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "eyJ0eXAiOiJKV1QiLCJhbGciOi-secret";

    fn graph_config(base_url: String) -> GraphConfig {
        GraphConfig {
            base_url,
            ..GraphConfig::default()
        }
    }

    fn wiki_config() -> WikiConfig {
        WikiConfig {
            url: "https://example.atlassian.net".into(),
            email: "me@example.com".into(),
            api_token: "wiki-token".into(),
            default_space_key: None,
        }
    }

    #[test]
    fn calendar_and_tasks_without_wiki() {
        let factory = ApiCapabilityFactory::new(&GraphConfig::default(), None).unwrap();
        let registry = factory.build(&Credential::new(TOKEN), "Asia/Tokyo");
        assert_eq!(
            registry.names(),
            vec![
                "complete_task",
                "create_meeting",
                "create_task",
                "get_current_datetime",
                "get_schedule",
                "get_task_lists",
                "get_tasks",
                "update_task",
            ]
        );
    }

    #[test]
    fn wiki_tools_added_when_configured() {
        let factory =
            ApiCapabilityFactory::new(&GraphConfig::default(), Some(wiki_config())).unwrap();
        let registry = factory.build(&Credential::new(TOKEN), "Asia/Tokyo");
        assert_eq!(registry.len(), 12);
        assert!(registry.get("search_confluence").is_some());
    }

    #[test]
    fn credential_never_in_definitions() {
        let factory =
            ApiCapabilityFactory::new(&GraphConfig::default(), Some(wiki_config())).unwrap();
        let registry = factory.build(&Credential::new(TOKEN), "Asia/Tokyo");
        let defs = serde_json::to_string(&registry.definitions()).unwrap();
        assert!(!defs.contains(TOKEN));
        assert!(!defs.contains("wiki-token"));
    }

    #[tokio::test]
    async fn builds_are_independent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/todo/lists"))
            .and(header("authorization", "Bearer first"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/todo/lists"))
            .and(header("authorization", "Bearer second"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .expect(1)
            .mount(&server)
            .await;

        let factory = ApiCapabilityFactory::new(&graph_config(server.uri()), None).unwrap();
        let first = factory.build(&Credential::new("first"), "Asia/Tokyo");
        let second = factory.build(&Credential::new("second"), "UTC");

        let call = ToolCall {
            id: "c1".into(),
            name: "get_task_lists".into(),
            arguments: json!({}),
        };
        let r2 = second.execute(&call).await.unwrap();
        let r1 = first.execute(&call).await.unwrap();

        assert_eq!(r1.output, "タスクリストがありません。");
        assert_eq!(r2.output, "エラー: 401 - expired");
        assert!(!r2.output.contains("second"));
    }
}
