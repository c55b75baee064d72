//! The plugin facade: wires stores, services and command handlers together
//! and turns one inbound message into replies.

use crate::parser::{self, Command};
use crate::profile_commands::ProfileCommands;
use crate::reply::Reply;
use crate::service::PersonaService;
use crate::workshop::PersonaWorkshop;
use anyhow::{Context, Result};
use quickpersona_core::{ConfigSource, ConversationManager, InboundMessage, PersonaStore};
use quickpersona_memory::{BackupStore, SqliteProfileStore};
use quickpersona_reasoning::{ArchitectService, LlmClient, ProfileService};
use std::sync::Arc;

pub struct QuickPersona {
    workshop: PersonaWorkshop,
    profile_commands: ProfileCommands,
    profiles: Arc<ProfileService>,
}

impl QuickPersona {
    /// Load backups and profile data from the configured data directory.
    pub async fn new(
        config: Arc<dyn ConfigSource>,
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn PersonaStore>,
        conversations: Arc<dyn ConversationManager>,
    ) -> Result<Self> {
        let cfg = config.current();

        let backups = Arc::new(BackupStore::new(cfg.storage.backups_dir()));
        backups.load().await.context("Failed to load persona backups")?;

        let db_path = cfg.storage.profile_db_path();
        let profile_store = SqliteProfileStore::new(&db_path)
            .await
            .with_context(|| format!("Failed to open profile database {}", db_path.display()))?;

        let architect = Arc::new(ArchitectService::new(llm, config.clone()));
        let profiles = Arc::new(ProfileService::new(profile_store, architect.clone(), config.clone()));
        profiles.load().await.context("Failed to load user profiles")?;

        let personas = PersonaService::new(store, conversations, backups, config.clone());
        tracing::info!(data_dir = %cfg.storage.data_dir.display(), "QuickPersona ready");

        Ok(Self {
            workshop: PersonaWorkshop::new(personas, architect, config),
            profile_commands: ProfileCommands::new(profiles.clone()),
            profiles,
        })
    }

    pub fn workshop(&self) -> &PersonaWorkshop {
        &self.workshop
    }

    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    /// Every message is offered to the profiler first. Commands are then
    /// dispatched; plain messages may answer a guided generation request.
    pub async fn handle(&self, msg: &InboundMessage) -> Vec<Reply> {
        if let Err(e) = self.profiles.observe(msg).await {
            tracing::warn!(sender = %msg.sender_id, "Profile observation failed: {:#}", e);
        }

        match parser::parse_message(msg) {
            Some(command) => {
                tracing::debug!(session = msg.session_id(), ?command, "Dispatching command");
                self.dispatch(msg, command).await
            }
            None => self.workshop.supplement(msg).await.unwrap_or_default(),
        }
    }

    async fn dispatch(&self, msg: &InboundMessage, command: Command) -> Vec<Reply> {
        let w = &self.workshop;
        match command {
            Command::Help => w.help(),
            Command::Smart(query) => w.smart(msg, &query).await,
            Command::Generate(description) => w.generate(msg, &description).await,
            Command::Apply => w.apply(msg).await,
            Command::Cancel => w.cancel(msg),
            Command::Status => w.status(msg),
            Command::List => w.list().await,
            Command::View(id) => w.view(msg, id.as_deref()).await,
            Command::History(id) => w.history(msg, id.as_deref()).await,
            Command::Rollback(id) => w.rollback(msg, id.as_deref()).await,
            Command::Refine(feedback) => w.refine(msg, &feedback).await,
            Command::Shrink(intensity) => w.shrink(msg, intensity.as_deref()).await,
            Command::Use(id) => w.use_persona(msg, id.as_deref()).await,
            Command::Activate(id) => w.activate(msg, id.as_deref()).await,
            Command::NewChat(id) => w.new_chat(msg, id.as_deref()).await,
            Command::Delete(id) => w.delete(msg, id.as_deref()).await,
            Command::Convert(target) => w.convert(msg, target.as_deref()).await,
            Command::Profile(sub) => self.profile_commands.handle(msg, sub).await,
        }
    }
}
