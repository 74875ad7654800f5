//! Calendar capabilities over the Graph API.
//!
//! `GraphCapabilities` is constructed with the caller's credential and
//! timezone; the model only ever sees the tool names and argument schemas
//! exposed by [`GraphCapabilities::into_tools`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use hisho_core::error::ToolError;
use hisho_core::tool::{Tool, ToolResult};
use hisho_core::Credential;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder};
use serde_json::{Value, json};

use crate::http::{char_slice, optional_str, required_str, send_json, str_field};

const WEEKDAY_JP: [&str; 7] = [
    "月曜日", "火曜日", "水曜日", "木曜日", "金曜日", "土曜日", "日曜日",
];

/// Authorized access to the Graph API for one caller.
///
/// Shared by the calendar and task capability sets.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    credential: Credential,
    timezone: String,
}

impl GraphClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credential: Credential,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
            timezone: timezone.into(),
        }
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header(AUTHORIZATION, self.credential.bearer())
    }
}

/// Render the current-datetime line in `timezone`.
///
/// Unknown timezone ids fall back to UTC, still echoing the requested id.
pub fn render_current_datetime(now: DateTime<Utc>, timezone: &str) -> String {
    let tz: Tz = timezone.parse().unwrap_or(chrono_tz::UTC);
    let local = now.with_timezone(&tz);
    let weekday = WEEKDAY_JP[local.weekday().num_days_from_monday() as usize];
    format!(
        "現在日時: {}（{}）{} ({})",
        local.format("%Y年%m月%d日"),
        weekday,
        local.format("%H:%M:%S"),
        timezone
    )
}

/// Calendar operations bound to one caller.
#[derive(Debug, Clone)]
pub struct GraphCapabilities {
    client: GraphClient,
}

impl GraphCapabilities {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn current_datetime(&self) -> ToolResult {
        ToolResult::ok(render_current_datetime(Utc::now(), self.client.timezone()))
    }

    /// Events between `start_iso` and `end_iso`, one line per event.
    pub async fn get_schedule(&self, start_iso: &str, end_iso: &str) -> ToolResult {
        let request = self
            .client
            .request(Method::GET, "/me/calendarView")
            .header(
                "Prefer",
                format!("outlook.timezone=\"{}\"", self.client.timezone()),
            )
            .query(&[("startDateTime", start_iso), ("endDateTime", end_iso)]);

        let data = match send_json(request, &[200]).await {
            Ok(data) => data,
            Err(e) => return ToolResult::failed(format!("エラー: {e}")),
        };

        let events = data["value"].as_array().map(Vec::as_slice).unwrap_or(&[]);
        if events.is_empty() {
            return ToolResult::ok("指定期間に予定はありません。");
        }

        let lines: Vec<String> = events
            .iter()
            .map(|ev| {
                let start = ev["start"]["dateTime"].as_str().unwrap_or_default();
                let end = ev["end"]["dateTime"].as_str().unwrap_or_default();
                let subject = str_field(ev, "subject").unwrap_or("(件名なし)");
                format!(
                    "- {}〜{} {}",
                    char_slice(start, 0, 16),
                    char_slice(end, 11, 16),
                    subject
                )
            })
            .collect();

        ToolResult::ok(lines.join("\n"))
    }

    /// Create an event and invite `attendees` as required participants.
    pub async fn create_meeting(
        &self,
        subject: &str,
        start_iso: &str,
        end_iso: &str,
        attendees: &[String],
        body: Option<&str>,
    ) -> ToolResult {
        let tz = self.client.timezone();
        let mut event = json!({
            "subject": subject,
            "start": {"dateTime": start_iso, "timeZone": tz},
            "end": {"dateTime": end_iso, "timeZone": tz},
            "attendees": attendees
                .iter()
                .map(|email| json!({"emailAddress": {"address": email}, "type": "required"}))
                .collect::<Vec<_>>(),
        });
        if let Some(body) = body.filter(|b| !b.is_empty()) {
            event["body"] = json!({"contentType": "text", "content": body});
        }

        let request = self.client.request(Method::POST, "/me/events").json(&event);
        match send_json(request, &[200, 201]).await {
            Ok(created) => ToolResult::ok(format!(
                "会議を作成しました: {} ({})",
                str_field(&created, "subject").unwrap_or(subject),
                str_field(&created, "webLink").unwrap_or_default()
            )),
            Err(e) => ToolResult::failed(format!("エラー: {e}")),
        }
    }

    /// Expose the set as tools for the agent.
    pub fn into_tools(self) -> Vec<Box<dyn Tool>> {
        let caps = Arc::new(self);
        [
            GraphOp::CurrentDatetime,
            GraphOp::GetSchedule,
            GraphOp::CreateMeeting,
        ]
        .into_iter()
        .map(|op| {
            Box::new(GraphTool {
                op,
                caps: Arc::clone(&caps),
            }) as Box<dyn Tool>
        })
        .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum GraphOp {
    CurrentDatetime,
    GetSchedule,
    CreateMeeting,
}

struct GraphTool {
    op: GraphOp,
    caps: Arc<GraphCapabilities>,
}

#[async_trait]
impl Tool for GraphTool {
    fn name(&self) -> &str {
        match self.op {
            GraphOp::CurrentDatetime => "get_current_datetime",
            GraphOp::GetSchedule => "get_schedule",
            GraphOp::CreateMeeting => "create_meeting",
        }
    }

    fn description(&self) -> &str {
        match self.op {
            GraphOp::CurrentDatetime => {
                "現在の日時と曜日を取得します。セッションの最初に必ず呼び出してください。"
            }
            GraphOp::GetSchedule => "指定期間の予定一覧を取得します。",
            GraphOp::CreateMeeting => {
                "Outlook カレンダーに会議を作成し、参加者に招待を送ります。"
            }
        }
    }

    fn parameters_schema(&self) -> Value {
        match self.op {
            GraphOp::CurrentDatetime => json!({"type": "object", "properties": {}}),
            GraphOp::GetSchedule => json!({
                "type": "object",
                "properties": {
                    "start_iso": {
                        "type": "string",
                        "description": "開始日時（ISO8601形式、例: 2026-01-15T09:00:00+09:00）"
                    },
                    "end_iso": {
                        "type": "string",
                        "description": "終了日時（ISO8601形式、例: 2026-01-15T18:00:00+09:00）"
                    }
                },
                "required": ["start_iso", "end_iso"]
            }),
            GraphOp::CreateMeeting => json!({
                "type": "object",
                "properties": {
                    "subject": {"type": "string", "description": "会議のタイトル"},
                    "start_iso": {
                        "type": "string",
                        "description": "開始日時（ISO8601形式、例: 2026-01-15T10:00:00+09:00）"
                    },
                    "end_iso": {
                        "type": "string",
                        "description": "終了日時（ISO8601形式、例: 2026-01-15T10:30:00+09:00）"
                    },
                    "attendees": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "参加者のメールアドレスのリスト"
                    },
                    "body": {"type": "string", "description": "会議の説明（省略可）"}
                },
                "required": ["subject", "start_iso", "end_iso", "attendees"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        match self.op {
            GraphOp::CurrentDatetime => Ok(self.caps.current_datetime()),
            GraphOp::GetSchedule => {
                let start = required_str(&arguments, "start_iso")?;
                let end = required_str(&arguments, "end_iso")?;
                Ok(self.caps.get_schedule(start, end).await)
            }
            GraphOp::CreateMeeting => {
                let subject = required_str(&arguments, "subject")?;
                let start = required_str(&arguments, "start_iso")?;
                let end = required_str(&arguments, "end_iso")?;
                let attendees: Vec<String> = arguments
                    .get("attendees")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        ToolError::InvalidArguments("Missing 'attendees' argument".into())
                    })?
                    .iter()
                    .filter_map(|a| a.as_str().map(str::to_string))
                    .collect();
                let body = optional_str(&arguments, "body");
                Ok(self
                    .caps
                    .create_meeting(subject, start, end, &attendees, body)
                    .await)
            }
        }
    }
}
