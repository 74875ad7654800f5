//! `hisho chat`: One request through the orchestrator, printed as it streams.

use std::io::Write;

use hisho_agent::{InvokeRequest, WireEvent};
use hisho_config::AppConfig;
use hisho_core::Credential;
use tokio_stream::StreamExt;

pub async fn run(
    message: String,
    session: Option<String>,
    timezone: Option<String>,
    credential: Option<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if config.model.api_key.is_none() {
        eprintln!("  WARNING: AWS_BEARER_TOKEN_BEDROCK is not set; model calls will fail.");
    }

    let orchestrator = hisho_gateway::build_orchestrator(&config)?;
    let request = InvokeRequest {
        prompt: message,
        credential: credential.map(Credential::new),
        timezone,
        client_timestamp: None,
    };

    let mut events = orchestrator.invoke(request, session.as_deref());
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        write!(stdout, "{}", render(&event))?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    Ok(())
}

/// Terminal rendering of one wire event.
fn render(event: &WireEvent) -> String {
    match event {
        WireEvent::Text { data } => data.clone(),
        WireEvent::ToolUse { tool_name } => format!("\n[tool: {tool_name}]\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_text_verbatim() {
        assert_eq!(render(&WireEvent::text("こんにちは")), "こんにちは");
    }

    #[test]
    fn renders_tool_marker_on_its_own_line() {
        let event = WireEvent::ToolUse {
            tool_name: "get_schedule".into(),
        };
        assert_eq!(render(&event), "\n[tool: get_schedule]\n");
    }
}
