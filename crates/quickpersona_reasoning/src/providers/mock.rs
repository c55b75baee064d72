//! Mock LLM provider with deterministic replies, for running without API keys.
//!
//! Recognises the structured prompts by the JSON keys they ask for and
//! answers with a well-formed reply, so every command can be exercised
//! offline.

use crate::api_types::{Message, MessagesResponse};
use crate::llm::{CompletionParams, LlmClient};
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct MockProvider {
    model: String,
}

impl MockProvider {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }

    fn reply_to(&self, prompt: &str) -> String {
        if prompt.contains("\"missing\"") {
            r#"{"provided": ["personality"], "missing": []}"#.to_string()
        } else if prompt.contains("\"action\"") {
            r#"{"action": "help"}"#.to_string()
        } else if prompt.contains("\"profile_text\"") {
            r#"{"profile_text": "(Mock) 一位活跃的聊天参与者", "traits": ["友善"], "interests": [], "speaking_style": "简短", "emotional_tendency": "平稳"}"#
                .to_string()
        } else {
            format!(
                "姓名：小橘\n身份：({} mock) 一只住在书店里的猫娘\n性格：温柔、好奇、偶尔傲娇\n说话风格：句尾喜欢加“喵”，称呼对方为{{{{user}}}}",
                self.model
            )
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for MockProvider {
    async fn complete(
        &self,
        _system: &str,
        messages: Vec<Message>,
        _params: CompletionParams,
    ) -> Result<MessagesResponse> {
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        let prompt = messages.last().map(Message::text).unwrap_or_default();
        Ok(MessagesResponse::from_text(self.reply_to(&prompt)))
    }
}
