use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of every persona id minted by this plugin.
pub const PERSONA_PREFIX: &str = "qp_";

/// A persona as stored by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub persona_id: String,
    pub system_prompt: String,
}

impl Persona {
    pub fn new(persona_id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            persona_id: persona_id.into(),
            system_prompt: system_prompt.into(),
        }
    }

    pub fn is_plugin_owned(&self) -> bool {
        is_plugin_persona(&self.persona_id)
    }
}

/// The host's persona storage.
#[async_trait]
pub trait PersonaStore: Send + Sync {
    /// `Ok(None)` when no persona has this id.
    async fn get(&self, persona_id: &str) -> Result<Option<Persona>>;
    async fn list(&self) -> Result<Vec<Persona>>;
    async fn create(&self, persona_id: &str, system_prompt: &str) -> Result<()>;
    async fn update(&self, persona_id: &str, system_prompt: &str) -> Result<()>;
    async fn delete(&self, persona_id: &str) -> Result<()>;
}

/// The host's conversation bookkeeping, used to bind a persona to a chat.
///
/// `origin` is the host's unified message origin of the chat window.
#[async_trait]
pub trait ConversationManager: Send + Sync {
    async fn current_conversation(&self, origin: &str) -> Result<Option<String>>;
    async fn set_persona(&self, origin: &str, conversation_id: &str, persona_id: &str) -> Result<()>;
    async fn new_conversation(
        &self,
        origin: &str,
        persona_id: Option<&str>,
        title: Option<&str>,
    ) -> Result<String>;
}

pub fn is_plugin_persona(persona_id: &str) -> bool {
    persona_id.starts_with(PERSONA_PREFIX)
}

/// Mint a persona id from a free-text hint.
///
/// Only ASCII alphanumerics and CJK ideographs of the hint survive, capped at
/// ten characters.
pub fn generate_persona_id(hint: &str) -> String {
    let clean: String = hint
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || ('\u{4e00}'..='\u{9fff}').contains(c))
        .take(10)
        .collect();
    let hex = Uuid::new_v4().simple().to_string();
    if clean.is_empty() {
        format!("{}{}", PERSONA_PREFIX, &hex[..10])
    } else {
        format!("{}{}_{}", PERSONA_PREFIX, clean, &hex[..6])
    }
}

/// Truncate to `max_chars` characters for previews.
pub fn shorten(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

const NAME_KEYS: [&str; 5] = ["姓名", "名字", "角色名", "名称", "name"];

/// Best-effort character name lookup across the supported prompt formats.
pub fn extract_char_name(prompt: &str) -> Option<String> {
    for raw in prompt.lines() {
        let line = raw
            .trim()
            .trim_start_matches(['-', '*', ' '])
            .replace("**", "");
        let line = line.trim().trim_matches('"');

        for key in NAME_KEYS {
            let Some(rest) = strip_prefix_ignore_case(line, key) else {
                continue;
            };
            let rest = rest.trim_start_matches('"').trim_start();
            if let Some(value) = rest.strip_prefix(':').or_else(|| rest.strip_prefix('：')) {
                let value = value.trim().trim_matches(['"', ',', ' ']);
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }

        if let Some(inner) = line.strip_prefix("<name>").and_then(|s| s.strip_suffix("</name>")) {
            if !inner.trim().is_empty() {
                return Some(inner.trim().to_string());
            }
        }
    }

    prompt
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("# "))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        s.get(prefix.len()..)
    } else {
        None
    }
}

/// Substitute `{{char}}` and `{{user}}` placeholders.
pub fn replace_placeholders(prompt: &str, char_name: Option<&str>, user_name: &str) -> String {
    let mut out = prompt.replace("{{user}}", user_name).replace("{{User}}", user_name);
    if let Some(name) = char_name {
        out = out.replace("{{char}}", name).replace("{{Char}}", name);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_persona_id_with_hint() {
        let id = generate_persona_id("一个傲娇的 cat-girl!!");
        assert!(id.starts_with("qp_一个傲娇的catgi_"));
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 6);
    }

    #[test]
    fn test_generate_persona_id_empty_hint() {
        let id = generate_persona_id("!!!");
        assert!(id.starts_with(PERSONA_PREFIX));
        assert_eq!(id.len(), PERSONA_PREFIX.len() + 10);
    }

    #[test]
    fn test_generate_persona_id_unique() {
        assert_ne!(generate_persona_id("猫娘"), generate_persona_id("猫娘"));
    }

    #[test]
    fn test_shorten_counts_chars() {
        assert_eq!(shorten("你好世界", 10), "你好世界");
        assert_eq!(shorten("你好世界", 2), "你好...");
    }

    #[test]
    fn test_extract_char_name_variants() {
        assert_eq!(extract_char_name("姓名：小雪\n年龄：17").as_deref(), Some("小雪"));
        assert_eq!(extract_char_name("- **姓名**: 琪露诺").as_deref(), Some("琪露诺"));
        assert_eq!(extract_char_name("  <name>Alice</name>").as_deref(), Some("Alice"));
        assert_eq!(extract_char_name("\"name\": \"Mio\",").as_deref(), Some("Mio"));
        assert_eq!(extract_char_name("# 猫娘小橘\n## 性格").as_deref(), Some("猫娘小橘"));
        assert_eq!(extract_char_name("只是一段描述"), None);
    }

    #[test]
    fn test_replace_placeholders() {
        let out = replace_placeholders("{{char}}喜欢{{user}}", Some("小雪"), "阿明");
        assert_eq!(out, "小雪喜欢阿明");
        let keep = replace_placeholders("{{char}}和{{user}}", None, "阿明");
        assert_eq!(keep, "{{char}}和阿明");
    }

    #[test]
    fn test_plugin_ownership() {
        assert!(Persona::new("qp_x", "p").is_plugin_owned());
        assert!(!Persona::new("default", "p").is_plugin_owned());
    }
}
