//! `hisho config`: Show configuration.

use hisho_config::AppConfig;

pub fn run(default: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if default {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{config:#?}");

    Ok(())
}
