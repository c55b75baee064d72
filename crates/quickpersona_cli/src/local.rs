//! A file-backed stand-in for the chat host: personas and conversations are
//! kept in one JSON document under the data directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use quickpersona_core::{ConversationManager, Persona, PersonaStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

const DEFAULT_PERSONA: (&str, &str) = ("default", "You are a helpful assistant.");

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConversationRecord {
    origin: String,
    persona_id: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct HostState {
    personas: BTreeMap<String, String>,
    conversations: BTreeMap<String, ConversationRecord>,
    /// origin -> current conversation id
    current: BTreeMap<String, String>,
}

pub struct LocalHost {
    path: PathBuf,
    state: Mutex<HostState>,
}

impl LocalHost {
    /// Open `<data_dir>/host.json`, seeding a `default` persona on first run.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let path = data_dir.join("host.json");

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut state = HostState::default();
                state
                    .personas
                    .insert(DEFAULT_PERSONA.0.to_string(), DEFAULT_PERSONA.1.to_string());
                state
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        let host = Self {
            path,
            state: Mutex::new(state),
        };
        {
            let state = host.state.lock().await;
            host.persist(&state).await?;
        }
        Ok(host)
    }

    async fn persist(&self, state: &HostState) -> Result<()> {
        let text = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&self.path, text)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    /// Persona bound to the origin's current conversation.
    pub async fn active_persona(&self, origin: &str) -> Option<String> {
        let state = self.state.lock().await;
        let conversation = state.current.get(origin)?;
        state.conversations.get(conversation)?.persona_id.clone()
    }
}

#[async_trait]
impl PersonaStore for LocalHost {
    async fn get(&self, persona_id: &str) -> Result<Option<Persona>> {
        let state = self.state.lock().await;
        Ok(state
            .personas
            .get(persona_id)
            .map(|prompt| Persona::new(persona_id, prompt.as_str())))
    }

    async fn list(&self) -> Result<Vec<Persona>> {
        let state = self.state.lock().await;
        Ok(state
            .personas
            .iter()
            .map(|(id, prompt)| Persona::new(id.as_str(), prompt.as_str()))
            .collect())
    }

    async fn create(&self, persona_id: &str, system_prompt: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.personas.contains_key(persona_id) {
            anyhow::bail!("Persona {} already exists", persona_id);
        }
        state
            .personas
            .insert(persona_id.to_string(), system_prompt.to_string());
        self.persist(&state).await
    }

    async fn update(&self, persona_id: &str, system_prompt: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(prompt) = state.personas.get_mut(persona_id) else {
            anyhow::bail!("Persona {} does not exist", persona_id);
        };
        *prompt = system_prompt.to_string();
        self.persist(&state).await
    }

    async fn delete(&self, persona_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.personas.remove(persona_id);
        for record in state.conversations.values_mut() {
            if record.persona_id.as_deref() == Some(persona_id) {
                record.persona_id = None;
            }
        }
        self.persist(&state).await
    }
}

#[async_trait]
impl ConversationManager for LocalHost {
    async fn current_conversation(&self, origin: &str) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state.current.get(origin).cloned())
    }

    async fn set_persona(&self, _origin: &str, conversation_id: &str, persona_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(record) = state.conversations.get_mut(conversation_id) else {
            anyhow::bail!("Conversation {} does not exist", conversation_id);
        };
        record.persona_id = Some(persona_id.to_string());
        self.persist(&state).await
    }

    async fn new_conversation(
        &self,
        origin: &str,
        persona_id: Option<&str>,
        title: Option<&str>,
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        let id = Uuid::new_v4().simple().to_string();
        state.conversations.insert(
            id.clone(),
            ConversationRecord {
                origin: origin.to_string(),
                persona_id: persona_id.map(str::to_string),
                title: title.map(str::to_string),
            },
        );
        state.current.insert(origin.to_string(), id.clone());
        self.persist(&state).await?;
        tracing::debug!(origin, conversation = %id, "Conversation created");
        Ok(id)
    }
}
