//! Persona prompt output formats.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Layout of a persona system prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PromptFormat {
    #[default]
    Natural,
    Markdown,
    Xml,
    Json,
    Yaml,
}

impl PromptFormat {
    pub const ALL: [PromptFormat; 5] = [
        PromptFormat::Natural,
        PromptFormat::Markdown,
        PromptFormat::Xml,
        PromptFormat::Json,
        PromptFormat::Yaml,
    ];

    /// Parse a user-supplied format name. Unknown names map to `Natural`.
    pub fn parse(s: &str) -> Self {
        Self::from_alias(s).unwrap_or_default()
    }

    /// Strict alias lookup, `None` for unknown names.
    pub fn from_alias(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "natural" | "自然语言" | "text" | "txt" => Some(Self::Natural),
            "markdown" | "md" => Some(Self::Markdown),
            "xml" => Some(Self::Xml),
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::Natural => "natural",
            Self::Markdown => "markdown",
            Self::Xml => "xml",
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Natural => "自然语言",
            Self::Markdown => "Markdown",
            Self::Xml => "XML",
            Self::Json => "JSON",
            Self::Yaml => "YAML",
        }
    }
}

impl fmt::Display for PromptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl From<String> for PromptFormat {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<PromptFormat> for String {
    fn from(f: PromptFormat) -> Self {
        f.key().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        assert_eq!(PromptFormat::parse("MD"), PromptFormat::Markdown);
        assert_eq!(PromptFormat::parse(" yml "), PromptFormat::Yaml);
        assert_eq!(PromptFormat::parse("自然语言"), PromptFormat::Natural);
        assert_eq!(PromptFormat::parse("txt"), PromptFormat::Natural);
        assert_eq!(PromptFormat::parse("XML"), PromptFormat::Xml);
    }

    #[test]
    fn test_unknown_falls_back() {
        assert_eq!(PromptFormat::parse("docx"), PromptFormat::Natural);
        assert_eq!(PromptFormat::from_alias("docx"), None);
    }

    #[test]
    fn test_serde_roundtrip_uses_key() {
        let json = serde_json::to_string(&PromptFormat::Json).unwrap();
        assert_eq!(json, "\"json\"");
        let back: PromptFormat = serde_json::from_str("\"markdown\"").unwrap();
        assert_eq!(back, PromptFormat::Markdown);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(PromptFormat::Natural.to_string(), "自然语言");
        assert_eq!(PromptFormat::Yaml.display_name(), "YAML");
    }
}
