//! Raw runtime events → client wire events.
//!
//! The generation loop reports progress as loosely shaped JSON records (the
//! converse-stream shape plus loop bookkeeping). Clients only care about two
//! things: text fragments and notice that a tool is being used. Everything
//! else is dropped here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent to the client.
///
/// Serialized as `{"type":"text","data":..}` or
/// `{"type":"tool_use","tool_name":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// A fragment of the assistant's reply.
    Text { data: String },

    /// The assistant started using a tool.
    ToolUse { tool_name: String },
}

impl WireEvent {
    pub fn text(data: impl Into<String>) -> Self {
        Self::Text { data: data.into() }
    }
}

/// A raw event classified by the part clients care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    TextDelta(String),
    ToolUseStart(String),
    Unrecognized,
}

impl RawEvent {
    /// Classify `raw`. Text deltas win over tool-use starts; anything
    /// malformed is `Unrecognized`.
    pub fn parse(raw: &Value) -> Self {
        let Some(inner) = raw
            .get("event")
            .and_then(Value::as_object)
            .filter(|inner| !inner.is_empty())
        else {
            return Self::Unrecognized;
        };

        if let Some(text) = inner
            .get("contentBlockDelta")
            .and_then(|d| d.get("delta"))
            .and_then(|d| d.get("text"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            return Self::TextDelta(text.to_string());
        }

        if let Some(tool_use) = inner
            .get("contentBlockStart")
            .and_then(|s| s.get("start"))
            .and_then(|s| s.get("toolUse"))
            .and_then(Value::as_object)
            .filter(|t| !t.is_empty())
        {
            let name = tool_use
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Self::ToolUseStart(name.to_string());
        }

        Self::Unrecognized
    }
}

impl From<RawEvent> for Option<WireEvent> {
    fn from(event: RawEvent) -> Self {
        match event {
            RawEvent::TextDelta(data) => Some(WireEvent::Text { data }),
            RawEvent::ToolUseStart(tool_name) => Some(WireEvent::ToolUse { tool_name }),
            RawEvent::Unrecognized => None,
        }
    }
}

/// Normalize one raw event; `None` means drop it.
pub fn normalize(raw: &Value) -> Option<WireEvent> {
    RawEvent::parse(raw).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_delta() {
        let raw = json!({"event": {"contentBlockDelta": {"delta": {"text": "hi"}}}});
        assert_eq!(normalize(&raw), Some(WireEvent::text("hi")));
    }

    #[test]
    fn tool_use_start() {
        let raw = json!({"event": {"contentBlockStart": {"start": {"toolUse": {"name": "get_schedule"}}}}});
        assert_eq!(
            normalize(&raw),
            Some(WireEvent::ToolUse {
                tool_name: "get_schedule".into()
            })
        );
    }

    #[test]
    fn tool_use_without_name_is_unknown() {
        let raw = json!({"event": {"contentBlockStart": {"start": {"toolUse": {"toolUseId": "t1"}}}}});
        assert_eq!(RawEvent::parse(&raw), RawEvent::ToolUseStart("unknown".into()));

        let raw = json!({"event": {"contentBlockStart": {"start": {"toolUse": {"name": 7}}}}});
        assert_eq!(RawEvent::parse(&raw), RawEvent::ToolUseStart("unknown".into()));
    }

    #[test]
    fn text_takes_priority_over_tool_use() {
        let raw = json!({"event": {
            "contentBlockDelta": {"delta": {"text": "a"}},
            "contentBlockStart": {"start": {"toolUse": {"name": "x"}}}
        }});
        assert_eq!(RawEvent::parse(&raw), RawEvent::TextDelta("a".into()));
    }

    #[test]
    fn empty_text_falls_through_to_tool_use() {
        let raw = json!({"event": {
            "contentBlockDelta": {"delta": {"text": ""}},
            "contentBlockStart": {"start": {"toolUse": {"name": "x"}}}
        }});
        assert_eq!(RawEvent::parse(&raw), RawEvent::ToolUseStart("x".into()));
    }

    #[test]
    fn everything_else_is_dropped() {
        let dropped = [
            json!(null),
            json!("text"),
            json!(42),
            json!([1, 2]),
            json!({}),
            json!({"event": null}),
            json!({"event": {}}),
            json!({"event": "contentBlockDelta"}),
            json!({"init_event_loop": true}),
            json!({"start_event_loop": true}),
            json!({"message": {"role": "assistant", "content": "x"}}),
            json!({"result": {"stop_reason": "end_turn"}}),
            json!({"event": {"messageStart": {"role": "assistant"}}}),
            json!({"event": {"messageStop": {"stopReason": "end_turn"}}}),
            json!({"event": {"contentBlockStop": {}}}),
            json!({"event": {"contentBlockDelta": {"delta": {"toolUse": {"input": "{}"}}}}}),
            json!({"event": {"contentBlockDelta": {"delta": {"text": 5}}}}),
            json!({"event": {"contentBlockDelta": "garbage"}}),
            json!({"event": {"contentBlockStart": {"start": {"toolUse": {}}}}}),
            json!({"event": {"contentBlockStart": {"start": {"toolUse": "name"}}}}),
        ];
        for raw in &dropped {
            assert_eq!(normalize(raw), None, "expected drop for {raw}");
        }
    }

    #[test]
    fn wire_shapes() {
        assert_eq!(
            serde_json::to_value(WireEvent::text("こんにちは")).unwrap(),
            json!({"type": "text", "data": "こんにちは"})
        );
        assert_eq!(
            serde_json::to_value(WireEvent::ToolUse {
                tool_name: "get_tasks".into()
            })
            .unwrap(),
            json!({"type": "tool_use", "tool_name": "get_tasks"})
        );
    }
}
