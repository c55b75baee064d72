pub mod config;
pub mod format;
pub mod persona;
pub mod session;

pub use config::{ConfigSource, PluginConfig, SharedConfig};
pub use format::PromptFormat;
pub use persona::{ConversationManager, Persona, PersonaStore, PERSONA_PREFIX};
pub use session::{AcquireError, Expiry, OperationKind, PendingOperation, SessionLocks, StaleOperation};

use serde::{Deserialize, Serialize};

/// An inbound chat message as handed over by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Host's unified origin of the chat window, e.g. `qq:group:12345`.
    pub origin: String,
    pub sender_id: String,
    pub sender_name: String,
    /// Empty for private chats.
    pub group_id: String,
    pub text: String,
    pub timestamp: i64, // Unix timestamp
}

impl InboundMessage {
    /// Key of the conversation this message belongs to; commands are
    /// serialized per key.
    pub fn session_id(&self) -> &str {
        if !self.origin.is_empty() {
            &self.origin
        } else if !self.sender_id.is_empty() {
            &self.sender_id
        } else {
            "default"
        }
    }

    /// Group id from the message, or parsed out of a `platform:group:<id>` origin.
    pub fn group(&self) -> Option<&str> {
        if !self.group_id.is_empty() {
            return Some(&self.group_id);
        }
        let mut parts = self.origin.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(_), Some("group"), Some(id)) if !id.is_empty() => Some(id),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.sender_name.is_empty() {
            "User"
        } else {
            &self.sender_name
        }
    }
}
