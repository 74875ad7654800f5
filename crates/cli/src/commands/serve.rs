//! `hisho serve`: Start the HTTP invocation gateway.

use hisho_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Hisho Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.model.model_id);
    println!(
        "   Wiki:      {}",
        if config.wiki.is_some() { "enabled" } else { "disabled" }
    );

    hisho_gateway::start(config).await?;

    Ok(())
}
