//! Wiki capabilities over the Confluence Cloud REST API.
//!
//! Authenticated with the site account from configuration, not with the
//! caller's credential. When no wiki is configured the set is empty.

use std::sync::Arc;

use async_trait::async_trait;
use hisho_config::WikiConfig;
use hisho_core::error::ToolError;
use hisho_core::tool::{Tool, ToolResult};
use reqwest::{Method, RequestBuilder};
use serde_json::{Value, json};

use crate::http::{CallError, non_empty_str, required_str, send_json, str_field};

const DEFAULT_SEARCH_LIMIT: u64 = 10;

/// Wiki operations for the configured site.
#[derive(Debug, Clone)]
pub struct WikiCapabilities {
    http: reqwest::Client,
    config: WikiConfig,
}

impl WikiCapabilities {
    pub fn new(http: reqwest::Client, config: WikiConfig) -> Self {
        let config = WikiConfig {
            url: config.url.trim_end_matches('/').to_string(),
            ..config
        };
        Self { http, config }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/wiki/rest/api/{}", self.config.url, path))
            .basic_auth(&self.config.email, Some(&self.config.api_token))
    }

    pub async fn get_page(&self, page_id: &str) -> ToolResult {
        let request = self
            .request(Method::GET, &format!("content/{page_id}"))
            .query(&[("expand", "body.storage,version")]);

        match send_json(request, &[200]).await {
            Ok(page) => ToolResult::ok(format!(
                "# {}\n\nバージョン: {}\n\n{}",
                str_field(&page, "title").unwrap_or("(タイトルなし)"),
                version_label(&page),
                page["body"]["storage"]["value"].as_str().unwrap_or_default()
            )),
            Err(e) => ToolResult::failed(format!("エラー: ページの取得に失敗しました - {e}")),
        }
    }

    pub async fn search(&self, query: &str, space_key: Option<&str>, limit: u64) -> ToolResult {
        let mut cql = format!("text ~ \"{query}\"");
        if let Some(space) = space_key {
            cql.push_str(&format!(" AND space = \"{space}\""));
        }
        let limit = limit.to_string();
        let request = self
            .request(Method::GET, "search")
            .query(&[("cql", cql.as_str()), ("limit", limit.as_str())]);

        let data = match send_json(request, &[200]).await {
            Ok(data) => data,
            Err(e) => return ToolResult::failed(format!("エラー: 検索に失敗しました - {e}")),
        };

        let items = data["results"].as_array().map(Vec::as_slice).unwrap_or(&[]);
        if items.is_empty() {
            return ToolResult::ok("検索結果が見つかりませんでした。");
        }

        let lines: Vec<String> = items
            .iter()
            .map(|item| {
                let content = &item["content"];
                format!(
                    "- [{}] (ID: {}, スペース: {})",
                    str_field(content, "title").unwrap_or("(タイトルなし)"),
                    str_field(content, "id").unwrap_or_default(),
                    item["resultGlobalContainer"]["title"]
                        .as_str()
                        .unwrap_or_default()
                )
            })
            .collect();

        ToolResult::ok(format!(
            "検索結果 ({}件):\n{}",
            items.len(),
            lines.join("\n")
        ))
    }

    /// Create a page; the space falls back to the configured default.
    pub async fn create_page(
        &self,
        title: &str,
        body: &str,
        space_key: Option<&str>,
        parent_id: Option<&str>,
    ) -> ToolResult {
        let Some(space) = space_key.or(self.config.default_space_key.as_deref()) else {
            return ToolResult::failed(
                "エラー: スペースキーが指定されておらず、デフォルトスペースキーも設定されていません",
            );
        };

        let mut page = json!({
            "type": "page",
            "title": title,
            "space": {"key": space},
            "body": {"storage": {"value": body, "representation": "storage"}},
        });
        if let Some(parent) = parent_id {
            page["ancestors"] = json!([{"id": parent}]);
        }

        let request = self.request(Method::POST, "content").json(&page);
        match send_json(request, &[200, 201]).await {
            Ok(created) => {
                let id = str_field(&created, "id").unwrap_or_default();
                ToolResult::ok(format!(
                    "ページを作成しました: {} (ID: {})\nURL: {}/wiki/spaces/{}/pages/{}",
                    title, id, self.config.url, space, id
                ))
            }
            Err(e) => ToolResult::failed(format!("エラー: ページの作成に失敗しました - {e}")),
        }
    }

    /// Replace title and body, writing the next version after the current one.
    pub async fn update_page(&self, page_id: &str, title: &str, body: &str) -> ToolResult {
        match self.try_update_page(page_id, title, body).await {
            Ok(updated) => ToolResult::ok(format!(
                "ページを更新しました: {} (Version: {})",
                title,
                version_label(&updated)
            )),
            Err(e) => ToolResult::failed(format!("エラー: ページの更新に失敗しました - {e}")),
        }
    }

    async fn try_update_page(
        &self,
        page_id: &str,
        title: &str,
        body: &str,
    ) -> Result<Value, CallError> {
        let current = send_json(
            self.request(Method::GET, &format!("content/{page_id}"))
                .query(&[("expand", "version")]),
            &[200],
        )
        .await?;
        let version = current["version"]["number"]
            .as_u64()
            .ok_or_else(|| CallError::Transport("missing version".into()))?;

        let page = json!({
            "id": page_id,
            "type": "page",
            "title": title,
            "body": {"storage": {"value": body, "representation": "storage"}},
            "version": {"number": version + 1},
        });
        send_json(
            self.request(Method::PUT, &format!("content/{page_id}")).json(&page),
            &[200],
        )
        .await
    }

    /// Tools for the configured wiki, or none when the integration is off.
    pub fn tools(http: &reqwest::Client, config: Option<&WikiConfig>) -> Vec<Box<dyn Tool>> {
        let Some(config) = config else {
            return Vec::new();
        };
        let caps = Arc::new(Self::new(http.clone(), config.clone()));
        [
            WikiOp::GetPage,
            WikiOp::Search,
            WikiOp::CreatePage,
            WikiOp::UpdatePage,
        ]
        .into_iter()
        .map(|op| {
            Box::new(WikiTool {
                op,
                caps: Arc::clone(&caps),
            }) as Box<dyn Tool>
        })
        .collect()
    }
}

fn version_label(page: &Value) -> String {
    page["version"]["number"]
        .as_u64()
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".into())
}

#[derive(Debug, Clone, Copy)]
enum WikiOp {
    GetPage,
    Search,
    CreatePage,
    UpdatePage,
}

struct WikiTool {
    op: WikiOp,
    caps: Arc<WikiCapabilities>,
}

#[async_trait]
impl Tool for WikiTool {
    fn name(&self) -> &str {
        match self.op {
            WikiOp::GetPage => "get_confluence_page",
            WikiOp::Search => "search_confluence",
            WikiOp::CreatePage => "create_confluence_page",
            WikiOp::UpdatePage => "update_confluence_page",
        }
    }

    fn description(&self) -> &str {
        match self.op {
            WikiOp::GetPage => "Confluenceページの内容を取得します。",
            WikiOp::Search => "Confluenceでコンテンツを検索します。",
            WikiOp::CreatePage => "Confluenceに新しいページを作成します。",
            WikiOp::UpdatePage => "既存のConfluenceページを更新します。",
        }
    }

    fn parameters_schema(&self) -> Value {
        let page_id = json!({"type": "string", "description": "ページID（URLの末尾の数字、例: 123456789）"});
        match self.op {
            WikiOp::GetPage => json!({
                "type": "object",
                "properties": {"page_id": page_id},
                "required": ["page_id"]
            }),
            WikiOp::Search => json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "検索キーワード"},
                    "space_key": {"type": "string", "description": "スペースキーで絞り込み（省略時は全スペース）"},
                    "limit": {"type": "integer", "description": "取得件数", "default": DEFAULT_SEARCH_LIMIT}
                },
                "required": ["query"]
            }),
            WikiOp::CreatePage => json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "ページタイトル"},
                    "body": {"type": "string", "description": "ページ本文（HTML形式）"},
                    "space_key": {"type": "string", "description": "スペースキー（省略時はデフォルトスペース）"},
                    "parent_id": {"type": "string", "description": "親ページID（省略時はスペースのトップレベル）"}
                },
                "required": ["title", "body"]
            }),
            WikiOp::UpdatePage => json!({
                "type": "object",
                "properties": {
                    "page_id": page_id,
                    "title": {"type": "string", "description": "新しいタイトル"},
                    "body": {"type": "string", "description": "新しい本文（HTML形式）"}
                },
                "required": ["page_id", "title", "body"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        match self.op {
            WikiOp::GetPage => {
                let page_id = required_str(&arguments, "page_id")?;
                Ok(self.caps.get_page(page_id).await)
            }
            WikiOp::Search => {
                let query = required_str(&arguments, "query")?;
                let space_key = non_empty_str(&arguments, "space_key");
                let limit = arguments["limit"].as_u64().unwrap_or(DEFAULT_SEARCH_LIMIT);
                Ok(self.caps.search(query, space_key, limit).await)
            }
            WikiOp::CreatePage => {
                let title = required_str(&arguments, "title")?;
                let body = required_str(&arguments, "body")?;
                Ok(self
                    .caps
                    .create_page(
                        title,
                        body,
                        non_empty_str(&arguments, "space_key"),
                        non_empty_str(&arguments, "parent_id"),
                    )
                    .await)
            }
            WikiOp::UpdatePage => {
                let page_id = required_str(&arguments, "page_id")?;
                let title = required_str(&arguments, "title")?;
                let body = required_str(&arguments, "body")?;
                Ok(self.caps.update_page(page_id, title, body).await)
            }
        }
    }
}
