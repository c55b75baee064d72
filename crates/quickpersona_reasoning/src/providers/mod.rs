pub mod mock;
pub mod openai;

use crate::llm::LlmClient;
use anyhow::Result;
use quickpersona_core::config::LlmConfig;
use std::sync::Arc;

/// Build the client named by `llm.provider`.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider.to_lowercase().as_str() {
        "openai" | "openai-compatible" | "deepseek" => {
            Ok(Arc::new(openai::OpenAiClient::new(config)?))
        }
        "mock" => Ok(Arc::new(mock::MockProvider::new(&config.model))),
        other => anyhow::bail!("Unknown LLM provider: {}", other),
    }
}
