//! Persona commands: generation flows, drafts awaiting confirmation and
//! management of saved personas.
//!
//! Drafts live in [`SessionLocks`], one per conversation. Generate and shrink
//! refuse to start while anything is pending; refine and convert replace a
//! pending persona draft explicitly, and only if it is still the draft they
//! started from once the model answers. Guided generation parks a
//! [`Draft::Guided`] request and consumes the requester's next plain message
//! as the supplement reply.

use crate::reply::{Card, Reply};
use crate::service::{Activation, PersonaError, PersonaService};
use quickpersona_core::persona::{generate_persona_id, shorten};
use quickpersona_core::{AcquireError, ConfigSource, Expiry, InboundMessage, OperationKind, PromptFormat, SessionLocks};
use quickpersona_reasoning::{ArchitectService, Intensity, Intent, IntentContext, MissingField};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

const CONFIRM_FOOTER: &str = "发送 /快捷人格 确认生成 或 /快捷人格 取消操作";
const SELECT_FIRST: &str = "请先使用 /快捷人格 选择人格 <人格ID> 选择一个人格";
const NOTHING_PENDING: &str = "没有待确认的人格";

pub const HELP_TEXT: &str = "快捷人格生成器 - 命令列表

🤖 智能入口（推荐）
/人格 <自然语言> - 智能识别意图，自动执行
/快捷人格 <自然语言> - 简写形式，同上

📝 生成与优化
/快捷人格 生成人格 <描述> - 根据描述生成人格
/快捷人格 优化人格 <反馈> - 优化人格（可直接优化待确认的人格）
/快捷人格 压缩人格 [强度] - 压缩提示词(轻度/中度/极限)
/快捷人格 转换格式 <格式> - 转换提示词格式(natural/markdown/xml/json/yaml)

📋 管理
/快捷人格 查看状态 - 查看当前状态
/快捷人格 确认生成 - 确认并保存待确认的人格
/快捷人格 取消操作 - 取消待确认的人格
/快捷人格 人格列表 - 列出所有人格
/快捷人格 查看详情 [人格ID] - 查看人格详情
/快捷人格 历史版本 [人格ID] - 查看备份版本
/快捷人格 版本回滚 [人格ID] - 回滚到最新备份
/快捷人格 选择人格 <人格ID> - 选择人格
/快捷人格 应用人格 [人格ID] - 应用人格到当前对话
/快捷人格 新建对话 [人格ID] - 新建对话
/快捷人格 删除人格 <人格ID> - 删除人格

💡 使用流程示例：
  /快捷人格 生成一个傲娇猫娘  → 生成人格
  /快捷人格 让她更傲娇一点    → 直接优化待确认的人格
  /快捷人格 确认              → 满意后保存人格
  /快捷人格 应用              → 让AI使用此人格

📌 别名：qp, quickpersona";

/// What a conversation has parked in its session slot.
#[derive(Debug, Clone)]
pub enum Draft {
    /// A candidate prompt waiting for apply or cancel.
    Persona {
        persona_id: String,
        system_prompt: String,
        /// Prompt the draft was derived from, if any.
        original_prompt: Option<String>,
    },
    /// Guided generation waiting for the requester's supplement reply.
    Guided(GuidedRequest),
}

#[derive(Debug, Clone)]
pub struct GuidedRequest {
    pub requester_id: String,
    pub description: String,
    pub missing: Vec<MissingField>,
    pub provided: Vec<String>,
}

/// How the user answered the missing-field prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplementChoice {
    pub supplements: String,
    /// Labels the user supplied themselves.
    pub user_fields: Vec<String>,
    /// Labels left for the model to invent.
    pub auto_fields: Vec<String>,
    pub skipped: bool,
    /// The reply started with field numbers.
    pub numbered: bool,
}

fn selection_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^([\d,，、\s]+)\s*(.*)$").expect("static regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("static regex"))
}

/// Interpret a supplement reply: `跳过`/`skip`/`s` hands every field to the
/// model, `2,3 内容` assigns the content to fields 2 and 3, anything else is
/// free-form supplement text.
pub fn parse_supplement_reply(reply: &str, missing: &[MissingField]) -> SupplementChoice {
    let reply = reply.trim();
    let labels: Vec<String> = missing.iter().map(|f| f.display_label().to_string()).collect();

    if matches!(reply.to_lowercase().as_str(), "跳过" | "skip" | "s") {
        return SupplementChoice {
            supplements: String::new(),
            user_fields: Vec::new(),
            auto_fields: labels,
            skipped: true,
            numbered: false,
        };
    }

    let Some(caps) = selection_re().captures(reply) else {
        return SupplementChoice {
            supplements: reply.to_string(),
            user_fields: Vec::new(),
            auto_fields: labels,
            skipped: false,
            numbered: false,
        };
    };

    let selected: HashSet<usize> = number_re()
        .find_iter(&caps[1])
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    let content = caps.get(2).map_or("", |m| m.as_str()).trim();

    let (user_fields, auto_fields): (Vec<_>, Vec<_>) = labels
        .into_iter()
        .enumerate()
        .partition(|(i, _)| selected.contains(&(i + 1)));
    let user_fields: Vec<String> = user_fields.into_iter().map(|(_, l)| l).collect();
    let auto_fields: Vec<String> = auto_fields.into_iter().map(|(_, l)| l).collect();

    let supplements = if user_fields.is_empty() {
        content.to_string()
    } else {
        format!("用户为以下字段提供了信息: {}\n内容: {}", user_fields.join(", "), content)
    };
    SupplementChoice {
        supplements,
        user_fields,
        auto_fields,
        skipped: false,
        numbered: true,
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "无".to_string()
    } else {
        items.join(", ")
    }
}

fn conflict_reply(existing: OperationKind) -> Reply {
    match existing {
        OperationKind::Guided => Reply::text(
            "⏳ 正在等待你补充人格信息，请回复编号或\"跳过\"\n或发送 /快捷人格 取消操作",
        ),
        _ => Reply::text("你有一个待确认的人格，请先 /快捷人格 确认生成 或 /快捷人格 取消操作"),
    }
}

/// The draft a refine or convert started from was confirmed, cancelled or
/// replaced while the model was working.
fn draft_changed_reply(action: &str, current: Option<OperationKind>) -> Reply {
    match current {
        Some(kind) => Reply::text(format!(
            "⚠️ {}期间待确认的人格已被新的{}操作替换，本次结果已丢弃",
            action, kind
        )),
        None => Reply::text(format!(
            "⚠️ {}期间待确认的人格已被确认或取消，本次结果已丢弃",
            action
        )),
    }
}

fn format_persona_error(persona_id: &str, err: &PersonaError) -> Reply {
    match err {
        PersonaError::NotFound(_) => Reply::text(format!("❌ 未找到人格: {}", persona_id)),
        other => Reply::text(format!("❌ 操作失败: {}", other)),
    }
}

pub struct PersonaWorkshop {
    personas: PersonaService,
    architect: Arc<ArchitectService>,
    config: Arc<dyn ConfigSource>,
    locks: SessionLocks<Draft>,
}

impl PersonaWorkshop {
    pub fn new(personas: PersonaService, architect: Arc<ArchitectService>, config: Arc<dyn ConfigSource>) -> Self {
        Self {
            personas,
            architect,
            config,
            locks: SessionLocks::new(),
        }
    }

    pub fn locks(&self) -> &SessionLocks<Draft> {
        &self.locks
    }

    pub fn personas(&self) -> &PersonaService {
        &self.personas
    }

    fn format(&self) -> PromptFormat {
        self.config.current().persona.default_prompt_format
    }

    /// Drop the pending operation if it outlived its timeout. Guided requests
    /// use the shorter guided timeout.
    fn expire_stale(&self, session: &str) -> Option<OperationKind> {
        let cfg = self.config.current();
        let max_age = match self.locks.peek(session)?.kind {
            OperationKind::Guided => cfg.persona.guided_timeout(),
            _ => cfg.persona.pending_timeout(),
        };
        match self.locks.expire_if_stale(session, max_age) {
            Expiry::Expired(op) => Some(op.kind),
            Expiry::Absent | Expiry::Fresh => None,
        }
    }

    /// The pending persona draft as (revision, persona id, prompt), if the
    /// slot holds one.
    fn pending_draft(&self, session: &str) -> Option<(u64, String, String)> {
        let op = self.locks.peek(session)?;
        match op.draft_payload {
            Draft::Persona {
                persona_id,
                system_prompt,
                ..
            } => Some((op.revision, persona_id, system_prompt)),
            Draft::Guided(_) => None,
        }
    }

    /// Explicit id, else the conversation's selected persona.
    fn target_id(&self, session: &str, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(str::to_string)
            .filter(|s| !s.is_empty())
            .or_else(|| self.locks.selected_persona(session))
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    pub fn help(&self) -> Vec<Reply> {
        vec![Reply::text(HELP_TEXT)]
    }

    /// Route a free-text request through intent recognition.
    pub async fn smart(&self, msg: &InboundMessage, query: &str) -> Vec<Reply> {
        let query = query.trim();
        if query.is_empty() {
            return self.help();
        }
        let session = msg.session_id();
        self.expire_stale(session);

        let persona_list = match self.personas.list().await {
            Ok(list) => list.into_iter().map(|p| p.persona_id).collect(),
            Err(e) => {
                tracing::warn!("Failed to list personas for intent context: {}", e);
                Vec::new()
            }
        };
        let context = IntentContext {
            current_persona_id: self.locks.selected_persona(session),
            persona_list,
            has_pending: self.locks.peek(session).is_some(),
        };

        let intent = self.architect.recognize_intent(query, &context).await;
        tracing::info!(session, query, ?intent, "Smart entry routed");

        match intent {
            Intent::Generate { description } => self.generate(msg, &description).await,
            Intent::Refine { feedback } => self.refine(msg, &feedback).await,
            Intent::Shrink { intensity } => self.shrink_with(msg, intensity).await,
            Intent::List => self.list().await,
            Intent::View { persona_id } => self.view(msg, persona_id.as_deref()).await,
            Intent::Activate { persona_id: Some(id) } => self.activate(msg, Some(id.as_str())).await,
            Intent::Activate { persona_id: None } => vec![Reply::text(format!(
                "请指定要激活的人格，例如：/快捷人格 智能 切换到猫娘\n可用人格: {}",
                context.persona_list_text()
            ))],
            Intent::Delete { persona_id: Some(id) } => self.delete(msg, Some(id.as_str())).await,
            Intent::Delete { persona_id: None } => vec![Reply::text("请指定要删除的人格ID")],
            Intent::Rollback => self.rollback(msg, None).await,
            Intent::Status => self.status(msg),
            Intent::Apply => self.apply(msg).await,
            Intent::Cancel => self.cancel(msg),
            Intent::Help | Intent::Unrecognized { .. } => self.help(),
        }
    }

    // ========================================================================
    // Generation
    // ========================================================================

    pub async fn generate(&self, msg: &InboundMessage, description: &str) -> Vec<Reply> {
        let description = description.trim();
        if description.is_empty() {
            return vec![Reply::text("请提供人格描述，例如：/快捷人格 生成人格 一个温柔的猫娘")];
        }
        let session = msg.session_id();
        self.expire_stale(session);
        if let Some(op) = self.locks.peek(session) {
            return vec![conflict_reply(op.kind)];
        }

        if self.config.current().persona.enable_guided_generation {
            self.guided_generation(msg, description).await
        } else {
            self.quick_generation(msg, description).await
        }
    }

    async fn quick_generation(&self, msg: &InboundMessage, description: &str) -> Vec<Reply> {
        let mut replies = vec![Reply::text(format!("🔄 正在根据描述生成人格...\n描述: {}", description))];
        let result = self.architect.generate_persona(description, self.format()).await;
        replies.extend(self.finish_generation(msg, description, result, "快速生成").await);
        replies
    }

    async fn guided_generation(&self, msg: &InboundMessage, description: &str) -> Vec<Reply> {
        let mut replies = vec![Reply::text(format!("🎭 正在分析你的人格描述...\n描述: {}", description))];
        let analysis = self.architect.analyze_missing_fields(description).await;

        if analysis.missing.is_empty() {
            replies.push(Reply::text("✅ 描述完整，正在生成人格..."));
            replies.extend(self.quick_generation(msg, description).await);
            return replies;
        }

        let mut lines = vec!["📋 检测到以下设定缺失，请选择要补充的内容：".to_string(), String::new()];
        for (i, field) in analysis.missing.iter().enumerate() {
            lines.push(format!("{}️⃣ {}（{}）", i + 1, field.display_label(), field.hint));
        }
        lines.push(String::new());
        lines.push("💡 回复对应数字（如\"2,3\"）并补充内容".to_string());
        lines.push("💡 回复\"跳过\"让 AI 自动生成所有缺失部分".to_string());

        let request = GuidedRequest {
            requester_id: msg.sender_id.clone(),
            description: description.to_string(),
            missing: analysis.missing,
            provided: analysis.provided,
        };
        match self
            .locks
            .acquire(msg.session_id(), OperationKind::Guided, Draft::Guided(request))
        {
            Ok(()) => replies.push(Reply::text(lines.join("\n"))),
            Err(AcquireError::Conflict { existing }) => replies.push(conflict_reply(existing)),
        }
        replies
    }

    /// Handle a plain (non-command) message. Returns `None` unless it answers
    /// this sender's guided generation request.
    pub async fn supplement(&self, msg: &InboundMessage) -> Option<Vec<Reply>> {
        let session = msg.session_id();
        let op = self.locks.peek(session)?;
        let Draft::Guided(request) = &op.draft_payload else {
            return None;
        };
        if request.requester_id != msg.sender_id || msg.text.trim().is_empty() {
            return None;
        }
        if self.expire_stale(session) == Some(OperationKind::Guided) {
            return Some(vec![Reply::text("⏰ 等待超时，已取消生成")]);
        }

        // Whoever releases the request owns the reply
        let released = self.locks.release_if(session, |op| {
            matches!(&op.draft_payload, Draft::Guided(r) if r.requester_id == msg.sender_id)
        })?;
        let Draft::Guided(request) = released.draft_payload else {
            return None;
        };

        let choice = parse_supplement_reply(&msg.text, &request.missing);
        let mut replies = Vec::new();
        if choice.skipped {
            replies.push(Reply::text("⏭️ 已跳过，AI 将自动生成缺失部分..."));
        } else if choice.numbered {
            replies.push(Reply::text(format!(
                "✅ 已收集，正在生成完整人格...\n📝 用户补充: {}\n🤖 AI 生成: {}",
                join_or_none(&choice.user_fields),
                join_or_none(&choice.auto_fields)
            )));
        } else {
            replies.push(Reply::text("📝 已收到补充信息，正在生成人格..."));
        }

        let result = self
            .architect
            .generate_with_supplements(&request.description, &choice.supplements, &choice.auto_fields, self.format())
            .await;
        replies.extend(self.finish_generation(msg, &request.description, result, "引导式生成").await);
        Some(replies)
    }

    /// Shared tail of every generation flow: auto-compress, then park the
    /// draft or save it directly.
    async fn finish_generation(
        &self,
        msg: &InboundMessage,
        description: &str,
        result: anyhow::Result<String>,
        mode: &str,
    ) -> Vec<Reply> {
        let generated = match result {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Persona generation failed: {:#}", e);
                return vec![Reply::text("❌ 生成失败，请检查 LLM 配置或稍后重试")];
            }
        };
        let mut replies = Vec::new();
        let prompt = self.auto_compress(generated, &mut replies).await;
        let persona_id = generate_persona_id(description);
        let session = msg.session_id();

        if self.config.current().persona.confirm_before_apply {
            let draft = Draft::Persona {
                persona_id: persona_id.clone(),
                system_prompt: prompt.clone(),
                original_prompt: None,
            };
            if let Err(AcquireError::Conflict { existing }) = self.locks.acquire(session, OperationKind::Generate, draft) {
                replies.push(conflict_reply(existing));
                return replies;
            }
            replies.push(
                Card::new("🎭", "人格生成完成", prompt.as_str())
                    .subtitle(format!("模式: {} | 待确认", mode))
                    .meta("人格ID", persona_id.as_str())
                    .meta("字符数", char_len(&prompt).to_string())
                    .footer(CONFIRM_FOOTER)
                    .into(),
            );
        } else {
            match self
                .personas
                .create_or_update(&persona_id, &prompt, false, msg.display_name())
                .await
            {
                Ok(saved) => {
                    self.locks.select_persona(session, &persona_id);
                    replies.push(
                        Card::new("✅", "人格已创建并应用", saved.as_str())
                            .subtitle(format!("模式: {}", mode))
                            .meta("人格ID", persona_id.as_str())
                            .meta("字符数", char_len(&saved).to_string())
                            .into(),
                    );
                }
                Err(e) => {
                    tracing::error!(persona_id, "Saving generated persona failed: {}", e);
                    replies.push(Reply::text("❌ 应用人格失败，请查看日志"));
                }
            }
        }
        replies
    }

    /// Shrink an over-long draft at light intensity. The original is kept
    /// when the result is empty, not shorter, or under 30% of the limit.
    async fn auto_compress(&self, prompt: String, notes: &mut Vec<Reply>) -> String {
        let cfg = self.config.current();
        let max_len = cfg.persona.max_prompt_length;
        let len = char_len(&prompt);
        if !cfg.persona.auto_compress || len <= max_len {
            return prompt;
        }

        notes.push(Reply::text(format!(
            "⚠️ 生成的提示词过长({}字符，限制{})，正在自动压缩...",
            len, max_len
        )));
        let compressed = match self
            .architect
            .shrink_persona(&prompt, Intensity::Light, cfg.persona.default_prompt_format)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Auto-compress failed: {:#}", e);
                String::new()
            }
        };

        let new_len = char_len(&compressed);
        if compressed.trim().is_empty() {
            notes.push(Reply::text("⚠️ 自动压缩返回空结果，保留原始结果"));
            prompt
        } else if new_len >= len {
            notes.push(Reply::text(format!("⚠️ 自动压缩后长度未减少({}字符)，保留原始结果", new_len)));
            prompt
        } else if (new_len as f64) < max_len as f64 * 0.3 {
            notes.push(Reply::text(format!("⚠️ 自动压缩后过短({}字符)，保留原始结果", new_len)));
            prompt
        } else {
            notes.push(Reply::text(format!("✅ 自动压缩完成: {} → {} 字符", len, new_len)));
            compressed
        }
    }

    // ========================================================================
    // Draft lifecycle
    // ========================================================================

    /// Save the pending draft, backing up the previous version.
    pub async fn apply(&self, msg: &InboundMessage) -> Vec<Reply> {
        let session = msg.session_id();
        self.expire_stale(session);
        // Of a concurrent apply and cancel only one gets the draft
        let Some(op) = self
            .locks
            .release_if(session, |op| matches!(op.draft_payload, Draft::Persona { .. }))
        else {
            return vec![Reply::text(NOTHING_PENDING)];
        };
        let (persona_id, system_prompt) = match &op.draft_payload {
            Draft::Persona {
                persona_id,
                system_prompt,
                ..
            } => (persona_id.clone(), system_prompt.clone()),
            Draft::Guided(_) => return vec![Reply::text(NOTHING_PENDING)],
        };

        match self
            .personas
            .create_or_update(&persona_id, &system_prompt, true, msg.display_name())
            .await
        {
            Ok(_) => {
                self.locks.select_persona(session, &persona_id);
                vec![Reply::text(format!(
                    "✅ 人格已保存！\n📌 人格ID: {}\n💡 使用 /快捷人格 应用人格 让 AI 使用此人格",
                    persona_id
                ))]
            }
            Err(e) => {
                tracing::error!(persona_id, "Saving persona failed: {}", e);
                // Give the draft back, with its original deadline, so the user can retry
                if let Err(AcquireError::Conflict { existing }) = self.locks.restore(op) {
                    tracing::warn!(session, ?existing, "Draft dropped, a newer operation took the slot");
                }
                vec![Reply::text(format!("❌ 保存人格失败: {}", e))]
            }
        }
    }

    pub fn cancel(&self, msg: &InboundMessage) -> Vec<Reply> {
        let session = msg.session_id();
        self.expire_stale(session);
        match self.locks.release(session) {
            Some(op) => {
                tracing::info!(session, kind = ?op.kind, "Pending operation cancelled");
                vec![Reply::text("✅ 已取消")]
            }
            None => vec![Reply::text(NOTHING_PENDING)],
        }
    }

    pub fn status(&self, msg: &InboundMessage) -> Vec<Reply> {
        let session = msg.session_id();
        self.expire_stale(session);
        let pending = self.locks.peek(session);

        let state = match pending.as_ref().map(|op| op.kind) {
            None => "空闲",
            Some(OperationKind::Guided) => "等待补充信息",
            Some(_) => "等待确认",
        };
        let mut lines = vec!["📊 当前状态".to_string(), format!("会话状态: {}", state)];
        if let Some(current) = self.locks.selected_persona(session) {
            lines.push(format!("当前人格: {}", current));
        }

        if let Some(op) = pending {
            let created = op
                .created_at
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S")
                .to_string();
            let (id, preview) = match &op.draft_payload {
                Draft::Persona {
                    persona_id,
                    system_prompt,
                    ..
                } => (persona_id.clone(), shorten(system_prompt, 100)),
                Draft::Guided(request) => ("(生成后分配)".to_string(), shorten(&request.description, 100)),
            };
            lines.push("\n📌 待确认人格:".to_string());
            lines.push(format!("  ID: {}", id));
            lines.push(format!("  模式: {}", op.kind.label()));
            lines.push(format!("  创建于: {}", created));
            lines.push(format!("  提示词预览: {}", preview));
        }
        vec![Reply::text(lines.join("\n"))]
    }

    // ========================================================================
    // Saved personas
    // ========================================================================

    pub async fn list(&self) -> Vec<Reply> {
        let personas = match self.personas.list().await {
            Ok(list) => list,
            Err(e) => {
                tracing::error!("Listing personas failed: {}", e);
                return vec![Reply::text(format!("❌ 获取列表失败: {}", e))];
            }
        };
        if personas.is_empty() {
            return vec![Reply::text("当前没有人格")];
        }

        let mut lines = vec!["📋 人格列表".to_string()];
        for p in &personas {
            let marker = if p.is_plugin_owned() { "🔹" } else { "  " };
            lines.push(format!("{} {}: {}", marker, p.persona_id, shorten(&p.system_prompt, 30)));
        }
        lines.push(format!("\n共 {} 个人格 (🔹 表示由本插件创建)", personas.len()));
        vec![Reply::text(lines.join("\n"))]
    }

    pub async fn view(&self, msg: &InboundMessage, persona_id: Option<&str>) -> Vec<Reply> {
        let Some(persona_id) = self.target_id(msg.session_id(), persona_id) else {
            return vec![Reply::text("请指定人格ID，例如: /快捷人格 查看详情 qp_猫娘_abc123")];
        };
        let persona = match self.personas.get(&persona_id).await {
            Ok(p) => p,
            Err(e) => return vec![format_persona_error(&persona_id, &e)],
        };

        let mut card = Card::new("📄", format!("人格详情: {}", persona.persona_id), persona.system_prompt.as_str())
            .meta("字符数", char_len(&persona.system_prompt).to_string());
        let versions = self.personas.backups().count(&persona_id).await;
        if versions > 0 {
            card = card.meta("历史版本", format!("{} 个", versions));
        }
        vec![card.into()]
    }

    pub async fn history(&self, msg: &InboundMessage, persona_id: Option<&str>) -> Vec<Reply> {
        let Some(persona_id) = self.target_id(msg.session_id(), persona_id) else {
            return vec![Reply::text("请指定人格ID，例如: /快捷人格 历史版本 qp_猫娘_abc123")];
        };
        let backups = self.personas.backups().all(&persona_id).await;
        if backups.is_empty() {
            return vec![Reply::text(format!("❌ 没有找到 {} 的历史版本", persona_id))];
        }

        let rule = "-".repeat(30);
        let mut lines = vec![format!("📜 {} 的历史版本 (共 {} 个)", persona_id, backups.len()), rule.clone()];
        for (i, backup) in backups.iter().enumerate() {
            lines.push(format!("{}. [{}]", i + 1, backup.backed_up_at.format("%Y-%m-%d %H:%M:%S")));
            lines.push(format!("   {}", shorten(&backup.system_prompt, 50)));
        }
        lines.push(rule);
        lines.push("💡 使用 /快捷人格 版本回滚 可回滚到最新备份".to_string());
        vec![Reply::text(lines.join("\n"))]
    }

    pub async fn rollback(&self, msg: &InboundMessage, persona_id: Option<&str>) -> Vec<Reply> {
        let Some(persona_id) = self.target_id(msg.session_id(), persona_id) else {
            return vec![Reply::text("请指定人格ID，例如: /快捷人格 版本回滚 qp_猫娘_abc123")];
        };
        match self.personas.rollback(&persona_id).await {
            Ok(Some(backup)) => vec![Reply::text(format!(
                "✅ 已回滚到 {} 的版本\n📝 提示词预览: {}",
                backup.backed_up_at.format("%Y-%m-%d %H:%M:%S"),
                shorten(&backup.system_prompt, 200)
            ))],
            Ok(None) => vec![Reply::text(format!("❌ 没有找到 {} 的备份", persona_id))],
            Err(e) => {
                tracing::error!(persona_id, "Rollback failed: {}", e);
                vec![Reply::text(format!("❌ 回滚失败: {}", e))]
            }
        }
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Refine the pending draft if there is one, else the selected persona.
    pub async fn refine(&self, msg: &InboundMessage, feedback: &str) -> Vec<Reply> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return vec![Reply::text("请提供优化反馈，例如：/快捷人格 优化人格 说话再可爱一点")];
        }
        let session = msg.session_id();
        self.expire_stale(session);

        let mut replies = Vec::new();
        let (persona_id, current, pending_revision) = match self.pending_draft(session) {
            Some((revision, persona_id, prompt)) => {
                replies.push(Reply::text(format!(
                    "🔄 正在优化待确认的人格...\n📌 人格ID: {}\n反馈: {}",
                    persona_id, feedback
                )));
                (persona_id, prompt, Some(revision))
            }
            None => {
                let Some(persona_id) = self.locks.selected_persona(session) else {
                    return vec![Reply::text(SELECT_FIRST)];
                };
                let persona = match self.personas.get(&persona_id).await {
                    Ok(p) => p,
                    Err(e) => return vec![format_persona_error(&persona_id, &e)],
                };
                replies.push(Reply::text(format!("🔄 正在根据反馈优化人格...\n反馈: {}", feedback)));
                (persona_id, persona.system_prompt, None)
            }
        };
        let is_pending = pending_revision.is_some();

        let result = match self.architect.refine_persona(&current, feedback, self.format()).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(persona_id, "Refine failed: {:#}", e);
                replies.push(Reply::text("❌ 优化失败，请稍后重试"));
                return replies;
            }
        };

        if is_pending || self.config.current().persona.confirm_before_apply {
            let draft = Draft::Persona {
                persona_id: persona_id.clone(),
                system_prompt: result.clone(),
                original_prompt: Some(current),
            };
            if let Some(revision) = pending_revision {
                if let Err(stale) = self.locks.replace_if(session, revision, OperationKind::Refine, draft) {
                    tracing::info!(session, persona_id, current = ?stale.current, "Draft changed during refine");
                    replies.push(draft_changed_reply("优化", stale.current));
                    return replies;
                }
            } else if let Err(AcquireError::Conflict { existing }) =
                self.locks.acquire(session, OperationKind::Refine, draft)
            {
                replies.push(conflict_reply(existing));
                return replies;
            }
            let title = if is_pending {
                "人格优化完成（已更新待确认人格）"
            } else {
                "人格优化完成"
            };
            replies.push(
                Card::new("✨", title, result.as_str())
                    .subtitle("模式: 优化 | 待确认")
                    .meta("人格ID", persona_id.as_str())
                    .meta("字符数", char_len(&result).to_string())
                    .footer("可继续发送反馈优化，或 /快捷人格 确认生成")
                    .into(),
            );
        } else {
            match self
                .personas
                .create_or_update(&persona_id, &result, true, msg.display_name())
                .await
            {
                Ok(saved) => replies.push(
                    Card::new("✅", "人格已优化", saved.as_str())
                        .subtitle("模式: 优化")
                        .meta("人格ID", persona_id.as_str())
                        .meta("字符数", char_len(&saved).to_string())
                        .into(),
                ),
                Err(e) => {
                    tracing::error!(persona_id, "Saving refined persona failed: {}", e);
                    replies.push(Reply::text("❌ 应用失败，请查看日志"));
                }
            }
        }
        replies
    }

    pub async fn shrink(&self, msg: &InboundMessage, intensity: Option<&str>) -> Vec<Reply> {
        self.shrink_with(msg, Intensity::parse(intensity.unwrap_or_default())).await
    }

    /// Compress the selected persona. Results that are not shorter or under
    /// 50 characters are rejected.
    pub async fn shrink_with(&self, msg: &InboundMessage, intensity: Intensity) -> Vec<Reply> {
        let session = msg.session_id();
        self.expire_stale(session);
        if let Some(op) = self.locks.peek(session) {
            return vec![conflict_reply(op.kind)];
        }
        let Some(persona_id) = self.locks.selected_persona(session) else {
            return vec![Reply::text(SELECT_FIRST)];
        };
        let persona = match self.personas.get(&persona_id).await {
            Ok(p) => p,
            Err(e) => return vec![format_persona_error(&persona_id, &e)],
        };

        let original_len = char_len(&persona.system_prompt);
        let mut replies = vec![Reply::text(format!(
            "🔄 正在压缩人格提示词...\n原始长度: {}字符\n压缩强度: {}",
            original_len, intensity
        ))];

        let result = match self
            .architect
            .shrink_persona(&persona.system_prompt, intensity, self.format())
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                replies.push(Reply::text("❌ 压缩失败：返回空结果"));
                return replies;
            }
            Err(e) => {
                tracing::error!(persona_id, "Shrink failed: {:#}", e);
                replies.push(Reply::text("❌ 压缩失败：返回空结果"));
                return replies;
            }
        };

        let new_len = char_len(&result);
        if new_len >= original_len {
            replies.push(Reply::text(format!(
                "⚠️ 压缩后长度未减少({}字符)，建议不使用此结果",
                new_len
            )));
            return replies;
        }
        if new_len < 50 {
            replies.push(Reply::text(format!(
                "⚠️ 压缩后过短({}字符)，可能丢失关键信息，建议不使用此结果",
                new_len
            )));
            return replies;
        }
        let reduction = (1.0 - new_len as f64 / original_len as f64) * 100.0;
        let effect = format!("{} → {} 字符", original_len, new_len);

        if self.config.current().persona.confirm_before_apply {
            let draft = Draft::Persona {
                persona_id: persona_id.clone(),
                system_prompt: result.clone(),
                original_prompt: Some(persona.system_prompt),
            };
            if let Err(AcquireError::Conflict { existing }) = self.locks.acquire(session, OperationKind::Compress, draft) {
                replies.push(conflict_reply(existing));
                return replies;
            }
            replies.push(
                Card::new("📦", "压缩完成", result.as_str())
                    .subtitle(format!("强度: {} | 待确认", intensity))
                    .meta("人格ID", persona_id.as_str())
                    .meta("压缩效果", effect)
                    .meta("减少比例", format!("{:.1}%", reduction))
                    .footer(CONFIRM_FOOTER)
                    .into(),
            );
        } else {
            match self
                .personas
                .create_or_update(&persona_id, &result, true, msg.display_name())
                .await
            {
                Ok(saved) => replies.push(
                    Card::new("✅", "压缩完成并已应用", saved.as_str())
                        .subtitle(format!("强度: {}", intensity))
                        .meta("人格ID", persona_id.as_str())
                        .meta("压缩效果", effect)
                        .meta("减少比例", format!("{:.1}%", reduction))
                        .into(),
                ),
                Err(e) => {
                    tracing::error!(persona_id, "Saving compressed persona failed: {}", e);
                    replies.push(Reply::text("❌ 应用失败，请查看日志"));
                }
            }
        }
        replies
    }

    /// Convert the pending draft or the selected persona. The result is
    /// always parked for confirmation.
    pub async fn convert(&self, msg: &InboundMessage, target: Option<&str>) -> Vec<Reply> {
        let Some(target) = target.map(str::trim).filter(|t| !t.is_empty()) else {
            return vec![Reply::text(
                "请指定目标格式：natural(自然语言), markdown(MD), xml, json, yaml\n例如：/快捷人格 转换格式 markdown",
            )];
        };
        let session = msg.session_id();
        self.expire_stale(session);

        let (persona_id, current, pending_revision) = match self.pending_draft(session) {
            Some((revision, persona_id, prompt)) => (persona_id, prompt, Some(revision)),
            None => {
                let Some(persona_id) = self.locks.selected_persona(session) else {
                    return vec![Reply::text("请先选择或生成一个人格")];
                };
                match self.personas.get(&persona_id).await {
                    Ok(p) => (persona_id, p.system_prompt, None),
                    Err(e) => return vec![format_persona_error(&persona_id, &e)],
                }
            }
        };

        let target = PromptFormat::parse(target);
        let mut replies = vec![Reply::text(format!(
            "🔄 正在将人格转换为 {} 格式...",
            target.display_name()
        ))];
        let result = match self.architect.convert_format(&current, self.format(), target).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(persona_id, "Format conversion failed: {:#}", e);
                replies.push(Reply::text("❌ 格式转换失败"));
                return replies;
            }
        };

        let draft = Draft::Persona {
            persona_id: persona_id.clone(),
            system_prompt: result.clone(),
            original_prompt: Some(current),
        };
        if let Some(revision) = pending_revision {
            if let Err(stale) = self.locks.replace_if(session, revision, OperationKind::Convert, draft) {
                tracing::info!(session, persona_id, current = ?stale.current, "Draft changed during conversion");
                replies.push(draft_changed_reply("格式转换", stale.current));
                return replies;
            }
        } else if let Err(AcquireError::Conflict { existing }) = self.locks.acquire(session, OperationKind::Convert, draft) {
            replies.push(conflict_reply(existing));
            return replies;
        }
        replies.push(
            Card::new("🔄", "格式转换完成", result.as_str())
                .subtitle(format!("目标格式: {} | 待确认", target.display_name()))
                .meta("人格ID", persona_id.as_str())
                .meta("字符数", char_len(&result).to_string())
                .footer(CONFIRM_FOOTER)
                .into(),
        );
        replies
    }

    // ========================================================================
    // Selection and activation
    // ========================================================================

    pub async fn use_persona(&self, msg: &InboundMessage, persona_id: Option<&str>) -> Vec<Reply> {
        let Some(persona_id) = persona_id.filter(|s| !s.is_empty()) else {
            return vec![Reply::text("请指定人格ID，例如: /快捷人格 选择人格 qp_猫娘_abc123")];
        };
        if let Err(e) = self.personas.get(persona_id).await {
            return vec![format_persona_error(persona_id, &e)];
        }
        self.locks.select_persona(msg.session_id(), persona_id);
        vec![Reply::text(format!(
            "✅ 已选择人格: {}\n后续的 优化人格/压缩人格 操作将针对此人格\n\n💡 使用 /快捷人格 应用人格 应用到当前对话",
            persona_id
        ))]
    }

    pub async fn activate(&self, msg: &InboundMessage, persona_id: Option<&str>) -> Vec<Reply> {
        let session = msg.session_id();
        let Some(persona_id) = self.target_id(session, persona_id) else {
            return vec![Reply::text("请指定人格ID，例如: /快捷人格 应用人格 qp_猫娘_abc123")];
        };
        if let Err(e) = self.personas.get(&persona_id).await {
            return vec![format_persona_error(&persona_id, &e)];
        }
        if msg.origin.is_empty() {
            return vec![Reply::text("❌ 无法获取会话信息")];
        }

        match self.personas.activate(&msg.origin, &persona_id).await {
            Ok(activation) => {
                self.locks.select_persona(session, &persona_id);
                let head = match activation {
                    Activation::Updated { .. } => format!("已激活人格: {}", persona_id),
                    Activation::Created { conversation_id } => {
                        format!("已创建新对话并激活人格: {}\n对话ID: {}", persona_id, conversation_id)
                    }
                };
                vec![Reply::text(format!("✅ {}\n📌 AI 的下一条回复将使用新人格", head))]
            }
            Err(e) => {
                tracing::error!(persona_id, "Activation failed: {}", e);
                vec![Reply::text(format!("❌ 应用失败: {}", e))]
            }
        }
    }

    pub async fn new_chat(&self, msg: &InboundMessage, persona_id: Option<&str>) -> Vec<Reply> {
        let session = msg.session_id();
        let persona_id = self.target_id(session, persona_id);
        if msg.origin.is_empty() {
            return vec![Reply::text("❌ 无法获取会话信息")];
        }
        if let Some(id) = &persona_id {
            if let Err(e) = self.personas.get(id).await {
                return vec![format_persona_error(id, &e)];
            }
        }

        match self.personas.new_conversation(&msg.origin, persona_id.as_deref()).await {
            Ok(conversation_id) => match persona_id {
                Some(id) => {
                    self.locks.select_persona(session, &id);
                    vec![Reply::text(format!(
                        "✅ 已创建新对话并应用人格\n📌 对话ID: {}\n🎭 人格: {}",
                        conversation_id, id
                    ))]
                }
                None => vec![Reply::text(format!(
                    "✅ 已创建新对话\n📌 对话ID: {}\n💡 使用 /快捷人格 应用人格 <人格ID> 指定人格",
                    conversation_id
                ))],
            },
            Err(e) => {
                tracing::error!("New conversation failed: {}", e);
                vec![Reply::text(format!("❌ 新建对话失败: {}", e))]
            }
        }
    }

    pub async fn delete(&self, msg: &InboundMessage, persona_id: Option<&str>) -> Vec<Reply> {
        let Some(persona_id) = persona_id.filter(|s| !s.is_empty()) else {
            return vec![Reply::text("请指定人格ID，例如: /快捷人格 删除人格 qp_猫娘_abc123")];
        };
        match self.personas.delete(persona_id).await {
            Ok(()) => {
                self.locks.clear_selection_if(msg.session_id(), persona_id);
                vec![Reply::text(format!("✅ 已删除人格: {}", persona_id))]
            }
            Err(PersonaError::NotFound(_)) => vec![Reply::text(format!("❌ 未找到人格: {}", persona_id))],
            Err(PersonaError::NotOwned(_)) => vec![Reply::text(format!(
                "⚠️ 人格 {} 不是由本插件创建的\n如果确定要删除，请在宿主的管理面板中操作",
                persona_id
            ))],
            Err(e) => {
                tracing::error!(persona_id, "Delete failed: {}", e);
                vec![Reply::text(format!("❌ 删除人格失败: {}", e))]
            }
        }
    }
}
