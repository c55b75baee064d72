//! Persona operations against the host stores plus the local backup history.

use quickpersona_core::persona::{extract_char_name, is_plugin_persona, replace_placeholders};
use quickpersona_core::{ConfigSource, ConversationManager, Persona, PersonaStore};
use quickpersona_memory::{BackupError, BackupStore, PersonaBackup};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PersonaError {
    #[error("persona not found: {0}")]
    NotFound(String),
    /// Only personas minted by this plugin may be deleted here.
    #[error("persona {0} was not created by this plugin")]
    NotOwned(String),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

/// How an activation was carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// The chat's current conversation now uses the persona.
    Updated { conversation_id: String },
    /// The chat had no conversation; a new one was created.
    Created { conversation_id: String },
}

pub struct PersonaService {
    store: Arc<dyn PersonaStore>,
    conversations: Arc<dyn ConversationManager>,
    backups: Arc<BackupStore>,
    config: Arc<dyn ConfigSource>,
}

impl PersonaService {
    pub fn new(
        store: Arc<dyn PersonaStore>,
        conversations: Arc<dyn ConversationManager>,
        backups: Arc<BackupStore>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            store,
            conversations,
            backups,
            config,
        }
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub async fn get(&self, persona_id: &str) -> Result<Persona, PersonaError> {
        self.store
            .get(persona_id)
            .await?
            .ok_or_else(|| PersonaError::NotFound(persona_id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<Persona>, PersonaError> {
        Ok(self.store.list().await?)
    }

    /// Save `system_prompt` under `persona_id` after filling `{{char}}` and
    /// `{{user}}`. An existing prompt is backed up first when `backup` is set.
    /// Returns the prompt as stored.
    pub async fn create_or_update(
        &self,
        persona_id: &str,
        system_prompt: &str,
        backup: bool,
        user_name: &str,
    ) -> Result<String, PersonaError> {
        let char_name = extract_char_name(system_prompt);
        let processed = replace_placeholders(system_prompt, char_name.as_deref(), user_name);

        match self.store.get(persona_id).await? {
            Some(existing) => {
                if backup {
                    let versions = self.config.current().persona.backup_versions;
                    self.backups
                        .add_backup(persona_id, &existing.system_prompt, versions)
                        .await?;
                }
                self.store.update(persona_id, &processed).await?;
                tracing::info!(persona_id, "Persona updated");
            }
            None => {
                self.store.create(persona_id, &processed).await?;
                tracing::info!(persona_id, "Persona created");
            }
        }
        Ok(processed)
    }

    /// Delete a plugin persona together with its backups.
    pub async fn delete(&self, persona_id: &str) -> Result<(), PersonaError> {
        self.get(persona_id).await?;
        if !is_plugin_persona(persona_id) {
            return Err(PersonaError::NotOwned(persona_id.to_string()));
        }
        self.store.delete(persona_id).await?;
        if let Err(e) = self.backups.delete_persona(persona_id).await {
            tracing::warn!(persona_id, "Persona deleted but backups remain: {}", e);
        }
        tracing::info!(persona_id, "Persona deleted");
        Ok(())
    }

    /// Restore the newest backup and drop it from the history.
    /// `Ok(None)` when there is nothing to roll back to.
    pub async fn rollback(&self, persona_id: &str) -> Result<Option<PersonaBackup>, PersonaError> {
        let Some(backup) = self.backups.latest(persona_id).await else {
            return Ok(None);
        };
        self.store.update(persona_id, &backup.system_prompt).await?;
        // Persona already restored at this point
        if let Err(e) = self.backups.take_latest(persona_id).await {
            tracing::warn!(persona_id, "Rolled back but could not drop the backup: {}", e);
        }
        tracing::info!(persona_id, version = backup.version, "Persona rolled back");
        Ok(Some(backup))
    }

    pub async fn activate(&self, origin: &str, persona_id: &str) -> Result<Activation, PersonaError> {
        match self.conversations.current_conversation(origin).await? {
            Some(conversation_id) => {
                self.conversations
                    .set_persona(origin, &conversation_id, persona_id)
                    .await?;
                Ok(Activation::Updated { conversation_id })
            }
            None => {
                let title = format!("人格: {}", persona_id);
                let conversation_id = self
                    .conversations
                    .new_conversation(origin, Some(persona_id), Some(&title))
                    .await?;
                Ok(Activation::Created { conversation_id })
            }
        }
    }

    pub async fn new_conversation(&self, origin: &str, persona_id: Option<&str>) -> Result<String, PersonaError> {
        let title = persona_id.map(|id| format!("人格: {}", id));
        Ok(self
            .conversations
            .new_conversation(origin, persona_id, title.as_deref())
            .await?)
    }
}
