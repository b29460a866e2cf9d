//! LLM provider implementations for Cerebro.
//!
//! All providers implement the `cerebro_core::Provider` trait. The agent
//! loop only ever talks to an `Arc<dyn Provider>` built by [`build_from_config`].

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use cerebro_config::AppConfig;
use cerebro_core::error::ProviderError;
use cerebro_core::provider::Provider;
use std::sync::Arc;

/// Build the chat model provider from configuration.
///
/// Fails with [`ProviderError::NotConfigured`] when no API key is available
/// for a remote endpoint.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let base_url = config.provider.base_url.as_str();
    let is_local = base_url.contains("localhost") || base_url.contains("127.0.0.1");

    let api_key = match (&config.provider.api_key, is_local) {
        (Some(key), _) => key.clone(),
        (None, true) => String::new(),
        (None, false) => {
            return Err(ProviderError::NotConfigured(
                "no API key; set CEREBRO_API_KEY or OPENROUTER_API_KEY".into(),
            ));
        }
    };

    Ok(Arc::new(OpenAiCompatProvider::new(
        provider_name(base_url),
        base_url,
        api_key,
    )))
}

fn provider_name(base_url: &str) -> &'static str {
    if base_url.contains("openrouter.ai") {
        "openrouter"
    } else if base_url.contains("api.openai.com") {
        "openai"
    } else {
        "openai-compat"
    }
}
