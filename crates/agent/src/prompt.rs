//! System prompt for the secretary agent.

/// Build the system prompt for a new session in `timezone`.
pub fn system_prompt(timezone: &str, wiki_enabled: bool) -> String {
    let services = if wiki_enabled {
        "Outlook カレンダー、Microsoft To Do、Confluence"
    } else {
        "Outlook カレンダー、Microsoft To Do"
    };

    format!(
        "あなたは秘書AIエージェントです。
ユーザーの {services} を操作できます。

# タイムゾーン
{timezone}

# 注意事項
- 日時は必ず ISO8601 形式（例: 2026-01-15T10:00:00+09:00）で指定してください
- 「今日」「明日」「今週」などの相対表現を使う場合は、必ず get_current_datetime ツールで現在日時を確認してから処理してください
- 曜日を計算で求めず、必ず get_current_datetime ツールで確認してください
- To Do のタスク操作には必ず list_id が必要です。まず get_task_lists でリストIDを取得してください
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_timezone_and_rules() {
        let prompt = system_prompt("Europe/Paris", false);
        assert!(prompt.contains("# タイムゾーン\nEurope/Paris"));
        assert!(prompt.contains("get_current_datetime"));
        assert!(prompt.contains("get_task_lists"));
        assert!(prompt.contains("ISO8601"));
        assert!(!prompt.contains("Confluence"));
    }

    #[test]
    fn mentions_wiki_when_enabled() {
        assert!(system_prompt("Asia/Tokyo", true).contains("Confluence"));
    }
}
