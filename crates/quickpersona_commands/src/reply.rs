use serde::Serialize;
use std::fmt;

const RULE: &str = "------------------------------";

/// A structured reply the host may render as an image card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Card {
    pub icon: String,
    pub title: String,
    pub subtitle: String,
    /// Ordered key/value rows shown above the content.
    pub meta: Vec<(String, String)>,
    pub content: String,
    pub footer: Option<String>,
}

impl Card {
    pub fn new(icon: &str, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            icon: icon.to_string(),
            title: title.into(),
            subtitle: String::new(),
            meta: Vec::new(),
            content: content.into(),
            footer: None,
        }
    }

    pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = subtitle.into();
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.meta.push((key.to_string(), value.into()));
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    /// Plain-text rendering for hosts without an image renderer.
    pub fn to_plain_text(&self) -> String {
        let mut lines = vec![format!("{} {}", self.icon, self.title)];
        if !self.subtitle.is_empty() {
            lines.push(self.subtitle.clone());
        }
        for (key, value) in &self.meta {
            lines.push(format!("{}: {}", key, value));
        }
        lines.push(RULE.to_string());
        lines.push(self.content.clone());
        if let Some(footer) = &self.footer {
            lines.push(RULE.to_string());
            lines.push(format!("💡 {}", footer));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Text { text: String },
    Card(Card),
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text { text: text.into() }
    }

    pub fn to_plain_text(&self) -> String {
        match self {
            Reply::Text { text } => text.clone(),
            Reply::Card(card) => card.to_plain_text(),
        }
    }
}

impl From<Card> for Reply {
    fn from(card: Card) -> Self {
        Reply::Card(card)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_plain_text())
    }
}
