//! Task-list capabilities (Microsoft To Do over the Graph API).

use std::sync::Arc;

use async_trait::async_trait;
use hisho_core::error::ToolError;
use hisho_core::tool::{Tool, ToolResult};
use reqwest::Method;
use serde_json::{Map, Value, json};

use crate::graph::GraphClient;
use crate::http::{non_empty_str, optional_str, required_str, send_json, str_field};

fn importance_label(importance: &str) -> &str {
    match importance {
        "low" => "低",
        "normal" => "通常",
        "high" => "高",
        other => other,
    }
}

/// Fields of a task create/update request. `None` leaves a field untouched.
#[derive(Debug, Default, Clone)]
pub struct TaskFields<'a> {
    pub title: Option<&'a str>,
    pub due_date: Option<&'a str>,
    pub importance: Option<&'a str>,
    pub body: Option<&'a str>,
    pub reminder_datetime: Option<&'a str>,
}

impl TaskFields<'_> {
    fn to_json(&self, timezone: &str) -> Map<String, Value> {
        let mut task = Map::new();
        if let Some(title) = self.title {
            task.insert("title".into(), json!(title));
        }
        if let Some(importance) = self.importance {
            task.insert("importance".into(), json!(importance));
        }
        if let Some(due) = self.due_date {
            task.insert(
                "dueDateTime".into(),
                json!({"dateTime": due, "timeZone": timezone}),
            );
        }
        if let Some(body) = self.body {
            task.insert(
                "body".into(),
                json!({"content": body, "contentType": "text"}),
            );
        }
        if let Some(reminder) = self.reminder_datetime {
            task.insert(
                "reminderDateTime".into(),
                json!({"dateTime": reminder, "timeZone": timezone}),
            );
            task.insert("isReminderOn".into(), json!(true));
        }
        task
    }
}

/// Task operations bound to one caller.
#[derive(Debug, Clone)]
pub struct TodoCapabilities {
    client: GraphClient,
}

impl TodoCapabilities {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub async fn get_task_lists(&self) -> ToolResult {
        let request = self.client.request(Method::GET, "/me/todo/lists");
        let data = match send_json(request, &[200]).await {
            Ok(data) => data,
            Err(e) => return ToolResult::failed(format!("エラー: {e}")),
        };

        let lists = data["value"].as_array().map(Vec::as_slice).unwrap_or(&[]);
        if lists.is_empty() {
            return ToolResult::ok("タスクリストがありません。");
        }

        let lines: Vec<String> = lists
            .iter()
            .map(|list| {
                let default_mark = if str_field(list, "wellknownListName") == Some("defaultList") {
                    " [デフォルト]"
                } else {
                    ""
                };
                format!(
                    "- {}{} (ID: {})",
                    str_field(list, "displayName").unwrap_or("(名前なし)"),
                    default_mark,
                    str_field(list, "id").unwrap_or_default()
                )
            })
            .collect();

        ToolResult::ok(format!("タスクリスト一覧:\n{}", lines.join("\n")))
    }

    pub async fn get_tasks(&self, list_id: &str, include_completed: bool) -> ToolResult {
        let mut request = self
            .client
            .request(Method::GET, &format!("/me/todo/lists/{list_id}/tasks"));
        if !include_completed {
            request = request.query(&[("$filter", "status ne 'completed'")]);
        }

        let data = match send_json(request, &[200]).await {
            Ok(data) => data,
            Err(e) => return ToolResult::failed(format!("エラー: {e}")),
        };

        let tasks = data["value"].as_array().map(Vec::as_slice).unwrap_or(&[]);
        if tasks.is_empty() {
            return ToolResult::ok("タスクがありません。");
        }

        let lines: Vec<String> = tasks
            .iter()
            .map(|task| {
                let icon = if str_field(task, "status") == Some("completed") {
                    "✓"
                } else {
                    "○"
                };
                let importance = importance_label(str_field(task, "importance").unwrap_or("normal"));
                let due = task["dueDateTime"]["dateTime"]
                    .as_str()
                    .map(|d| format!(" 期限: {}", d.chars().take(10).collect::<String>()))
                    .unwrap_or_default();
                format!(
                    "{} {} [重要度: {}]{} (ID: {})",
                    icon,
                    str_field(task, "title").unwrap_or("(タイトルなし)"),
                    importance,
                    due,
                    str_field(task, "id").unwrap_or_default()
                )
            })
            .collect();

        ToolResult::ok(format!("タスク一覧:\n{}", lines.join("\n")))
    }

    /// Create a task; `fields.title` is required and importance defaults to `normal`.
    pub async fn create_task(&self, list_id: &str, fields: TaskFields<'_>) -> ToolResult {
        let fields = TaskFields {
            importance: fields.importance.or(Some("normal")),
            ..fields
        };
        let body = fields.to_json(self.client.timezone());
        let request = self
            .client
            .request(Method::POST, &format!("/me/todo/lists/{list_id}/tasks"))
            .json(&body);

        match send_json(request, &[200, 201]).await {
            Ok(created) => ToolResult::ok(format!(
                "タスクを作成しました: {} (ID: {})",
                str_field(&created, "title").unwrap_or_default(),
                str_field(&created, "id").unwrap_or_default()
            )),
            Err(e) => ToolResult::failed(format!("エラー: {e}")),
        }
    }

    /// Patch only the provided fields. Nothing provided means no request.
    pub async fn update_task(&self, list_id: &str, task_id: &str, fields: TaskFields<'_>) -> ToolResult {
        let body = fields.to_json(self.client.timezone());
        if body.is_empty() {
            return ToolResult::ok("更新する項目が指定されていません。");
        }
        self.patch_task(list_id, task_id, Value::Object(body), "タスクを更新しました")
            .await
    }

    pub async fn complete_task(&self, list_id: &str, task_id: &str) -> ToolResult {
        self.patch_task(
            list_id,
            task_id,
            json!({"status": "completed"}),
            "タスクを完了にしました",
        )
        .await
    }

    async fn patch_task(&self, list_id: &str, task_id: &str, body: Value, done: &str) -> ToolResult {
        let request = self
            .client
            .request(
                Method::PATCH,
                &format!("/me/todo/lists/{list_id}/tasks/{task_id}"),
            )
            .json(&body);

        match send_json(request, &[200]).await {
            Ok(updated) => ToolResult::ok(format!(
                "{}: {}",
                done,
                str_field(&updated, "title").unwrap_or_default()
            )),
            Err(e) => ToolResult::failed(format!("エラー: {e}")),
        }
    }

    /// Expose the set as tools for the agent.
    pub fn into_tools(self) -> Vec<Box<dyn Tool>> {
        let caps = Arc::new(self);
        [
            TodoOp::GetTaskLists,
            TodoOp::GetTasks,
            TodoOp::CreateTask,
            TodoOp::UpdateTask,
            TodoOp::CompleteTask,
        ]
        .into_iter()
        .map(|op| {
            Box::new(TodoTool {
                op,
                caps: Arc::clone(&caps),
            }) as Box<dyn Tool>
        })
        .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum TodoOp {
    GetTaskLists,
    GetTasks,
    CreateTask,
    UpdateTask,
    CompleteTask,
}

struct TodoTool {
    op: TodoOp,
    caps: Arc<TodoCapabilities>,
}

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        match self.op {
            TodoOp::GetTaskLists => "get_task_lists",
            TodoOp::GetTasks => "get_tasks",
            TodoOp::CreateTask => "create_task",
            TodoOp::UpdateTask => "update_task",
            TodoOp::CompleteTask => "complete_task",
        }
    }

    fn description(&self) -> &str {
        match self.op {
            TodoOp::GetTaskLists => {
                "Microsoft To Do のタスクリスト一覧を取得します。タスクを操作する前に、まずこのツールでリストIDを確認してください。"
            }
            TodoOp::GetTasks => "指定したタスクリスト内のタスク一覧を取得します。",
            TodoOp::CreateTask => "新しいタスクを作成します。",
            TodoOp::UpdateTask => "既存のタスクを更新します。省略した項目は変更されません。",
            TodoOp::CompleteTask => "タスクを完了状態にします。",
        }
    }

    fn parameters_schema(&self) -> Value {
        let list_id = json!({"type": "string", "description": "タスクリストID（get_task_lists で取得）"});
        let task_id = json!({"type": "string", "description": "タスクID（get_tasks で取得）"});
        let importance = json!({
            "type": "string",
            "enum": ["low", "normal", "high"],
            "description": "重要度（low/normal/high）"
        });
        let due_date = json!({
            "type": "string",
            "description": "期限日時（ISO8601形式、例: 2026-01-20T17:00:00+09:00）"
        });

        match self.op {
            TodoOp::GetTaskLists => json!({"type": "object", "properties": {}}),
            TodoOp::GetTasks => json!({
                "type": "object",
                "properties": {
                    "list_id": list_id,
                    "include_completed": {
                        "type": "boolean",
                        "description": "完了済みタスクも含めるか",
                        "default": false
                    }
                },
                "required": ["list_id"]
            }),
            TodoOp::CreateTask => json!({
                "type": "object",
                "properties": {
                    "list_id": list_id,
                    "title": {"type": "string", "description": "タスクのタイトル"},
                    "due_date": due_date,
                    "importance": importance,
                    "body": {"type": "string", "description": "詳細説明（省略可）"},
                    "reminder_datetime": {
                        "type": "string",
                        "description": "リマインダー日時（ISO8601形式、省略可）"
                    }
                },
                "required": ["list_id", "title"]
            }),
            TodoOp::UpdateTask => json!({
                "type": "object",
                "properties": {
                    "list_id": list_id,
                    "task_id": task_id,
                    "title": {"type": "string", "description": "新しいタイトル"},
                    "due_date": due_date,
                    "importance": importance,
                    "body": {"type": "string", "description": "新しい詳細説明"}
                },
                "required": ["list_id", "task_id"]
            }),
            TodoOp::CompleteTask => json!({
                "type": "object",
                "properties": {"list_id": list_id, "task_id": task_id},
                "required": ["list_id", "task_id"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        match self.op {
            TodoOp::GetTaskLists => Ok(self.caps.get_task_lists().await),
            TodoOp::GetTasks => {
                let list_id = required_str(&arguments, "list_id")?;
                let include_completed = arguments["include_completed"].as_bool().unwrap_or(false);
                Ok(self.caps.get_tasks(list_id, include_completed).await)
            }
            TodoOp::CreateTask => {
                let list_id = required_str(&arguments, "list_id")?;
                let fields = TaskFields {
                    title: Some(required_str(&arguments, "title")?),
                    due_date: non_empty_str(&arguments, "due_date"),
                    importance: non_empty_str(&arguments, "importance"),
                    body: non_empty_str(&arguments, "body"),
                    reminder_datetime: non_empty_str(&arguments, "reminder_datetime"),
                };
                Ok(self.caps.create_task(list_id, fields).await)
            }
            TodoOp::UpdateTask => {
                let list_id = required_str(&arguments, "list_id")?;
                let task_id = required_str(&arguments, "task_id")?;
                let fields = TaskFields {
                    title: optional_str(&arguments, "title"),
                    due_date: optional_str(&arguments, "due_date"),
                    importance: optional_str(&arguments, "importance"),
                    body: optional_str(&arguments, "body"),
                    reminder_datetime: None,
                };
                Ok(self.caps.update_task(list_id, task_id, fields).await)
            }
            TodoOp::CompleteTask => {
                let list_id = required_str(&arguments, "list_id")?;
                let task_id = required_str(&arguments, "task_id")?;
                Ok(self.caps.complete_task(list_id, task_id).await)
            }
        }
    }
}
