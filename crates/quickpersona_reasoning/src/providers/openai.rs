use crate::api_types::{ContentBlock, Message, MessagesResponse, Role};
use crate::llm::{CompletionParams, LlmClient};
use crate::retry::HttpStatusError;
use anyhow::{Context, Result};
use quickpersona_core::config::LlmConfig;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;

/// Chat-completions client for OpenAI and API-compatible gateways.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
        let base_url = config
            .base_url
            .clone()
            .or_else(|| env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            // Architect calls carry their own deadline; this only bounds a hung socket
            client: Client::builder()
                .timeout(config.timeout() * 2)
                .build()
                .context("Failed to build HTTP client")?,
            api_key,
            base_url,
            model: config.model.clone(),
        })
    }

    fn build_payload(&self, system: &str, messages: &[Message], params: &CompletionParams) -> Value {
        let mut openai_messages = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            openai_messages.push(json!({ "role": "system", "content": system }));
        }
        for msg in messages {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            openai_messages.push(json!({ "role": role, "content": msg.text() }));
        }

        json!({
            "model": params.model.as_deref().unwrap_or(&self.model),
            "messages": openai_messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<MessagesResponse> {
        let payload = self.build_payload(system, &messages, &params);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await
            .context("Failed to send request to OpenAI")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpStatusError {
                provider: "OpenAI".to_string(),
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            }
            .into());
        }

        let resp_json: Value = response.json().await.context("Invalid OpenAI response body")?;
        let choice = &resp_json["choices"][0];
        let text = choice["message"]["content"].as_str().unwrap_or_default();
        let finish_reason = choice["finish_reason"].as_str().map(str::to_string);

        tracing::debug!(chars = text.chars().count(), "OpenAI completion received");
        Ok(MessagesResponse {
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            stop_reason: finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiClient {
        OpenAiClient {
            client: Client::new(),
            api_key: "k".into(),
            base_url: "http://localhost".into(),
            model: "gpt-4o-mini".into(),
        }
    }

    #[test]
    fn test_payload_shape() {
        let payload = client().build_payload(
            "",
            &[Message::user("你好")],
            &CompletionParams::default(),
        );
        let msgs = payload["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(msgs[0]["content"], "你好");
        assert_eq!(payload["model"], "gpt-4o-mini");
    }

    #[test]
    fn test_payload_model_override_and_system() {
        let params = CompletionParams {
            model: Some("architect-large".into()),
            ..Default::default()
        };
        let payload = client().build_payload("sys", &[Message::user("hi")], &params);
        assert_eq!(payload["model"], "architect-large");
        assert_eq!(payload["messages"][0]["role"], "system");
    }
}
