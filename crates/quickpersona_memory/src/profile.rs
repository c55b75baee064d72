use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fewest buffered messages that may trigger an age-based flush.
pub const MIN_MESSAGES_FOR_AGE_FLUSH: usize = 3;

/// How a monitored user's messages are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileMode {
    /// Every group and private chat.
    #[default]
    Global,
    /// Only the listed groups.
    Group,
}

impl ProfileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileMode::Global => "global",
            ProfileMode::Group => "group",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProfileMode::Global => "全局",
            ProfileMode::Group => "群聊",
        }
    }
}

impl fmt::Display for ProfileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "global" | "全局" => Ok(ProfileMode::Global),
            "group" | "群聊" | "群" => Ok(ProfileMode::Group),
            other => Err(format!("unknown profile mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserProfile {
    pub user_id: String,
    pub nickname: String,
    pub profile_text: String,
    pub traits: Vec<String>,
    pub interests: Vec<String>,
    pub speaking_style: String,
    pub emotional_tendency: String,
    /// Messages folded into this profile so far.
    pub message_count: u64,
    pub last_updated: i64, // Unix timestamp, 0 = never analysed
    pub created_at: i64,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>, now: i64) -> Self {
        Self {
            user_id: user_id.into(),
            created_at: now,
            ..Default::default()
        }
    }

    /// A profile is empty until the first successful analysis.
    pub fn is_analysed(&self) -> bool {
        !self.profile_text.is_empty()
    }

    /// Human readable summary fed back into incremental analysis.
    pub fn summary(&self) -> String {
        format!(
            "画像描述: {}\n性格特征: {}\n兴趣爱好: {}\n说话风格: {}\n情感倾向: {}",
            self.profile_text,
            self.traits.join(", "),
            self.interests.join(", "),
            self.speaking_style,
            self.emotional_tendency,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMonitor {
    pub user_id: String,
    pub mode: ProfileMode,
    /// Only consulted in [`ProfileMode::Group`].
    pub group_ids: Vec<String>,
    pub enabled: bool,
    pub created_at: i64,
    pub created_by: String,
}

impl ProfileMonitor {
    /// Whether a message from this user in `group_id` (empty for private
    /// chats) should be collected.
    pub fn matches(&self, group_id: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.mode {
            ProfileMode::Global => true,
            ProfileMode::Group => {
                group_id.is_some_and(|g| self.group_ids.iter().any(|id| id == g))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub nickname: String,
}

/// Messages of one monitored user waiting for the next analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBuffer {
    pub user_id: String,
    pub messages: Vec<BufferedMessage>,
    /// Starts at creation time so a fresh buffer is not immediately stale.
    pub last_flush: i64,
}

impl MessageBuffer {
    pub fn new(user_id: impl Into<String>, now: i64) -> Self {
        Self {
            user_id: user_id.into(),
            messages: Vec::new(),
            last_flush: now,
        }
    }

    pub fn push(&mut self, message: BufferedMessage) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn should_flush(&self, now: i64, min_messages: usize, max_age_secs: u64) -> bool {
        if self.messages.is_empty() {
            return false;
        }
        if self.messages.len() >= min_messages {
            return true;
        }
        let age = now.saturating_sub(self.last_flush);
        self.messages.len() >= MIN_MESSAGES_FOR_AGE_FLUSH && age > max_age_secs as i64
    }

    /// Drain all messages and reset the flush clock.
    pub fn flush(&mut self, now: i64) -> Vec<BufferedMessage> {
        self.last_flush = now;
        std::mem::take(&mut self.messages)
    }

    /// Return messages from a failed analysis. Only done when nothing new
    /// arrived meanwhile, so repeated failures never duplicate messages.
    pub fn restore(&mut self, messages: Vec<BufferedMessage>) -> bool {
        if self.messages.is_empty() {
            self.messages = messages;
            true
        } else {
            false
        }
    }
}

fn local_time(ts: i64) -> Option<DateTime<Local>> {
    Utc.timestamp_opt(ts, 0).single().map(|t| t.with_timezone(&Local))
}

/// `YYYY-mm-dd HH:MM:SS` in local time, `-` for zero.
pub fn format_timestamp(ts: i64) -> String {
    if ts == 0 {
        return "-".to_string();
    }
    local_time(ts)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Render buffered messages as analysis input, one line per message:
/// `[群123] 14:05: 内容` or `[私聊] 14:05: 内容`.
pub fn format_messages(messages: &[BufferedMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let time = local_time(m.timestamp)
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_default();
            let location = if m.group_id.is_empty() {
                "[私聊]".to_string()
            } else {
                format!("[群{}]", m.group_id)
            };
            format!("{} {}: {}", location, time, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
