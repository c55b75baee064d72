//! User profiling: monitors, message buffering and LLM-driven profile
//! analysis on top of [`SqliteProfileStore`].

use crate::architect::{ArchitectService, ProfileAnalysis};
use crate::prompts::{self, render};
use anyhow::Result;
use quickpersona_core::config::TemplateOverrides;
use quickpersona_core::{ConfigSource, InboundMessage};
use quickpersona_memory::profile::{format_messages, BufferedMessage, MessageBuffer, ProfileMode, ProfileMonitor, UserProfile};
use quickpersona_memory::SqliteProfileStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Buffers are written back every this many messages.
const BUFFER_SAVE_INTERVAL: usize = 5;

impl ProfileAnalysis {
    /// Overwrite the fields the model returned.
    pub fn apply_to(self, profile: &mut UserProfile) {
        if let Some(text) = self.profile_text {
            profile.profile_text = text;
        }
        if let Some(traits) = self.traits {
            profile.traits = traits;
        }
        if let Some(interests) = self.interests {
            profile.interests = interests;
        }
        if let Some(style) = self.speaking_style {
            profile.speaking_style = style;
        }
        if let Some(tendency) = self.emotional_tendency {
            profile.emotional_tendency = tendency;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStatus {
    pub message_count: usize,
    /// `None` when the user has no buffer.
    pub last_flush: Option<i64>,
}

#[derive(Default)]
struct ProfileState {
    loaded: bool,
    profiles: HashMap<String, UserProfile>,
    monitors: HashMap<String, ProfileMonitor>,
    buffers: HashMap<String, MessageBuffer>,
}

pub struct ProfileService {
    store: SqliteProfileStore,
    architect: Arc<ArchitectService>,
    config: Arc<dyn ConfigSource>,
    state: Mutex<ProfileState>,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl ProfileService {
    pub fn new(store: SqliteProfileStore, architect: Arc<ArchitectService>, config: Arc<dyn ConfigSource>) -> Self {
        Self {
            store,
            architect,
            config,
            state: Mutex::new(ProfileState::default()),
        }
    }

    async fn ensure_loaded(&self, state: &mut ProfileState) -> Result<()> {
        if state.loaded {
            return Ok(());
        }
        for profile in self.store.list_profiles().await? {
            state.profiles.insert(profile.user_id.clone(), profile);
        }
        for monitor in self.store.list_monitors().await? {
            state.monitors.insert(monitor.user_id.clone(), monitor);
        }
        for buffer in self.store.list_buffers().await? {
            state.buffers.insert(buffer.user_id.clone(), buffer);
        }
        state.loaded = true;
        tracing::info!(
            profiles = state.profiles.len(),
            monitors = state.monitors.len(),
            "Profile service loaded"
        );
        Ok(())
    }

    /// Load everything from the database once. Later calls are no-ops.
    pub async fn load(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await
    }

    // ========================================================================
    // Monitors
    // ========================================================================

    /// Start (or reconfigure) monitoring a user. Creates an empty profile and
    /// buffer if none exist.
    pub async fn add_monitor(
        &self,
        user_id: &str,
        mode: ProfileMode,
        group_ids: Vec<String>,
        created_by: &str,
    ) -> Result<ProfileMonitor> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        let now = now();

        let monitor = ProfileMonitor {
            user_id: user_id.to_string(),
            mode,
            group_ids,
            enabled: true,
            created_at: now,
            created_by: created_by.to_string(),
        };
        self.store.save_monitor(&monitor).await?;
        state.monitors.insert(user_id.to_string(), monitor.clone());

        if !state.profiles.contains_key(user_id) {
            let profile = UserProfile::new(user_id, now);
            self.store.save_profile(&profile).await?;
            state.profiles.insert(user_id.to_string(), profile);
        }
        state
            .buffers
            .entry(user_id.to_string())
            .or_insert_with(|| MessageBuffer::new(user_id, now));

        tracing::info!(user_id, mode = mode.as_str(), "Profile monitor added");
        Ok(monitor)
    }

    /// Stop monitoring. The profile and buffer are kept.
    pub async fn remove_monitor(&self, user_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        if state.monitors.remove(user_id).is_none() {
            return Ok(false);
        }
        self.store.delete_monitor(user_id).await?;
        tracing::info!(user_id, "Profile monitor removed");
        Ok(true)
    }

    pub async fn monitor(&self, user_id: &str) -> Result<Option<ProfileMonitor>> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        Ok(state.monitors.get(user_id).cloned())
    }

    pub async fn monitors(&self) -> Result<Vec<ProfileMonitor>> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        let mut list: Vec<_> = state.monitors.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(list)
    }

    pub async fn is_monitored(&self, user_id: &str, group_id: Option<&str>) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        Ok(state.monitors.get(user_id).is_some_and(|m| m.matches(group_id)))
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Feed one inbound message. Returns whether a profile update ran.
    pub async fn observe(&self, message: &InboundMessage) -> Result<bool> {
        let cfg = self.config.current();
        if !cfg.profile.enabled || message.sender_id.is_empty() || message.text.trim().is_empty() {
            return Ok(false);
        }
        let user_id = message.sender_id.as_str();
        let group_id = message.group();
        let timestamp = if message.timestamp > 0 { message.timestamp } else { now() };

        let should_flush = {
            let mut state = self.state.lock().await;
            self.ensure_loaded(&mut state).await?;
            if !state.monitors.get(user_id).is_some_and(|m| m.matches(group_id)) {
                return Ok(false);
            }

            let buffer = state
                .buffers
                .entry(user_id.to_string())
                .or_insert_with(|| MessageBuffer::new(user_id, timestamp));
            buffer.push(BufferedMessage {
                content: message.text.clone(),
                timestamp,
                group_id: group_id.unwrap_or_default().to_string(),
                nickname: message.sender_name.clone(),
            });
            let flush = buffer.should_flush(timestamp, cfg.profile.min_messages, cfg.profile.max_buffer_age_secs);
            let periodic_save = !flush && buffer.len() % BUFFER_SAVE_INTERVAL == 0;
            let snapshot = periodic_save.then(|| buffer.clone());

            if !message.sender_name.is_empty() {
                if let Some(profile) = state.profiles.get_mut(user_id) {
                    profile.nickname = message.sender_name.clone();
                }
            }
            if let Some(buffer) = snapshot {
                self.store.save_buffer(&buffer).await?;
            }
            flush
        };

        if should_flush {
            self.update_profile(user_id).await?;
        }
        Ok(should_flush)
    }

    /// Flush a user's buffer into an analysis now. Returns `false` when the
    /// buffer is empty or the analysis failed.
    pub async fn force_update(&self, user_id: &str) -> Result<bool> {
        {
            let mut state = self.state.lock().await;
            self.ensure_loaded(&mut state).await?;
            if state.buffers.get(user_id).map_or(true, MessageBuffer::is_empty) {
                return Ok(false);
            }
        }
        self.update_profile(user_id).await
    }

    /// Drain the buffer, analyse without holding the state lock, then either
    /// fold the result into the profile or put the messages back.
    async fn update_profile(&self, user_id: &str) -> Result<bool> {
        let (messages, prompt) = {
            let mut state = self.state.lock().await;
            let ts = now();
            let Some(buffer) = state.buffers.get_mut(user_id) else {
                return Ok(false);
            };
            if buffer.is_empty() {
                return Ok(false);
            }
            let messages = buffer.flush(ts);
            let snapshot = buffer.clone();
            self.store.save_buffer(&snapshot).await?;

            let profile = state
                .profiles
                .entry(user_id.to_string())
                .or_insert_with(|| UserProfile::new(user_id, ts));
            let prompt = self.analysis_prompt(profile, &messages);
            (messages, prompt)
        };

        let analysis = self.architect.analyze_profile(&prompt).await;

        let mut state = self.state.lock().await;
        let analysed = analysis.is_ok();
        match analysis {
            Ok(analysis) => {
                let ts = now();
                let profile = state
                    .profiles
                    .entry(user_id.to_string())
                    .or_insert_with(|| UserProfile::new(user_id, ts));
                analysis.apply_to(profile);
                profile.message_count += messages.len() as u64;
                profile.last_updated = ts;
                let snapshot = profile.clone();
                self.store.save_profile(&snapshot).await?;
                tracing::info!(user_id, total = snapshot.message_count, "Profile updated");
            }
            Err(e) => {
                tracing::error!(user_id, "Profile update failed: {:#}", e);
                let ts = now();
                let buffer = state
                    .buffers
                    .entry(user_id.to_string())
                    .or_insert_with(|| MessageBuffer::new(user_id, ts));
                if !buffer.restore(messages) {
                    tracing::warn!(user_id, "New messages arrived meanwhile, dropping the failed batch");
                }
                let snapshot = buffer.clone();
                self.store.save_buffer(&snapshot).await?;
            }
        }
        Ok(analysed)
    }

    fn analysis_prompt(&self, profile: &UserProfile, messages: &[BufferedMessage]) -> String {
        let cfg = self.config.current();
        let messages_text = format_messages(messages);
        if profile.is_analysed() {
            let template = TemplateOverrides::pick(&cfg.templates.profile_update, prompts::PROFILE_UPDATE);
            render(
                template,
                &[("current_profile", &profile.summary()), ("new_messages", &messages_text)],
            )
        } else {
            let template = TemplateOverrides::pick(&cfg.templates.profile_init, prompts::PROFILE_INIT);
            let nickname = messages
                .first()
                .map(|m| m.nickname.as_str())
                .filter(|n| !n.is_empty())
                .unwrap_or("未知");
            render(
                template,
                &[("user_id", &profile.user_id), ("nickname", nickname), ("messages", &messages_text)],
            )
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        Ok(state.profiles.get(user_id).cloned())
    }

    pub async fn profiles(&self) -> Result<Vec<UserProfile>> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        let mut list: Vec<_> = state.profiles.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(list)
    }

    /// Remove profile, monitor and buffer. Returns whether a profile existed.
    pub async fn delete_profile(&self, user_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        let existed = state.profiles.remove(user_id).is_some();
        state.monitors.remove(user_id);
        state.buffers.remove(user_id);
        self.store.delete_user(user_id).await?;
        tracing::info!(user_id, existed, "Profile deleted");
        Ok(existed)
    }

    pub async fn buffer_status(&self, user_id: &str) -> Result<BufferStatus> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        Ok(match state.buffers.get(user_id) {
            Some(buffer) => BufferStatus {
                message_count: buffer.len(),
                last_flush: (buffer.last_flush > 0).then_some(buffer.last_flush),
            },
            None => BufferStatus {
                message_count: 0,
                last_flush: None,
            },
        })
    }
}
