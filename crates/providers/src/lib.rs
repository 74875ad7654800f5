//! Model runtime implementations for Hisho.
//!
//! All providers implement the `hisho_core::Provider` trait.

pub mod bedrock;

pub use bedrock::BedrockProvider;

use std::sync::Arc;

use hisho_config::ModelConfig;
use hisho_core::Provider;
use hisho_core::error::ProviderError;

/// Build the configured provider.
pub fn build_from_config(config: &ModelConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "no model runtime API key (set AWS_BEARER_TOKEN_BEDROCK or model.api_key)".into(),
        )
    })?;
    let provider = BedrockProvider::new(api_key)?.with_base_url(config.endpoint_url());
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_not_configured() {
        let err = build_from_config(&ModelConfig::default())
            .err()
            .expect("should fail");
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn builds_with_api_key() {
        let config = ModelConfig {
            api_key: Some("key".into()),
            ..ModelConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "bedrock");
    }
}
