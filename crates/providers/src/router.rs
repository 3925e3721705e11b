//! Provider selection from configuration.

use std::sync::Arc;
use streamrelay_config::{AppConfig, ProviderKind};
use streamrelay_core::error::ProviderError;
use streamrelay_core::provider::Provider;
use tracing::info;

use crate::gemini::GeminiProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Build the configured backend.
///
/// An API key is required unless `api_url` points at a self-hosted
/// OpenAI-compatible server.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().unwrap_or_default();
    if api_key.is_empty() && (config.api_url.is_none() || config.provider == ProviderKind::Gemini) {
        return Err(ProviderError::NotConfigured(format!(
            "no API key for provider '{}' (set STREAMRELAY_API_KEY)",
            config.provider
        )));
    }

    let provider: Arc<dyn Provider> = match config.provider {
        ProviderKind::OpenAi => {
            let base_url = config
                .api_url
                .as_deref()
                .unwrap_or(OpenAiCompatProvider::DEFAULT_BASE_URL);
            Arc::new(OpenAiCompatProvider::new("openai", base_url, api_key))
        }
        ProviderKind::Gemini => {
            let mut provider = GeminiProvider::new(api_key);
            if let Some(url) = &config.api_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
    };

    info!(provider = %provider.name(), model = %config.default_model, "Provider ready");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_openai_by_default() {
        let config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn builds_gemini() {
        let config = AppConfig {
            provider: ProviderKind::Gemini,
            api_key: Some("g".into()),
            ..AppConfig::default()
        };
        assert_eq!(build_from_config(&config).unwrap().name(), "gemini");
    }

    #[test]
    fn missing_key_is_not_configured() {
        let result = build_from_config(&AppConfig::default());
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn self_hosted_url_needs_no_key() {
        let config = AppConfig {
            api_url: Some("http://localhost:11434/v1".into()),
            ..AppConfig::default()
        };
        assert!(build_from_config(&config).is_ok());
    }
}
