//! End-to-end command tests through the QuickPersona facade.
//!
//! The host is replaced by in-memory persona and conversation stores, the LLM
//! by a scripted queue. Backups and the profile database live in a temp dir.

use anyhow::Result;
use async_trait::async_trait;
use quickpersona_commands::{QuickPersona, Reply};
use quickpersona_core::{ConversationManager, InboundMessage, Persona, PersonaStore, PluginConfig, SharedConfig};
use quickpersona_reasoning::api_types::{Message, MessagesResponse};
use quickpersona_reasoning::llm::{CompletionParams, LlmClient};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

// ============================================================================
// Fakes
// ============================================================================

enum Scripted {
    Text(&'static str),
    Owned(String),
    Fail,
}

/// Holds back a completion whose prompt contains `marker` until opened.
struct Gate {
    marker: &'static str,
    entered: Notify,
    open: Notify,
}

struct MockLlmClient {
    replies: Mutex<Vec<Scripted>>,
    prompts: Mutex<Vec<String>>,
    call_count: AtomicUsize,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl MockLlmClient {
    fn new(replies: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            gate: Mutex::new(None),
        })
    }

    async fn hold(&self, marker: &'static str) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            marker,
            entered: Notify::new(),
            open: Notify::new(),
        });
        *self.gate.lock().await = Some(gate.clone());
        gate
    }

    async fn push(&self, reply: Scripted) {
        self.replies.lock().await.push(reply);
    }

    fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _system: &str, messages: Vec<Message>, _params: CompletionParams) -> Result<MessagesResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let prompt: String = messages.iter().map(Message::text).collect();
        self.prompts.lock().await.push(prompt.clone());

        let gate = self.gate.lock().await.clone();
        if let Some(gate) = gate.filter(|g| prompt.contains(g.marker)) {
            gate.entered.notify_one();
            gate.open.notified().await;
        }

        let next = {
            let mut queue = self.replies.lock().await;
            if queue.is_empty() {
                Scripted::Text("")
            } else {
                queue.remove(0)
            }
        };
        match next {
            Scripted::Text(t) => Ok(MessagesResponse::from_text(t)),
            Scripted::Owned(t) => Ok(MessagesResponse::from_text(t)),
            Scripted::Fail => anyhow::bail!("upstream unavailable"),
        }
    }
}

#[derive(Default)]
struct MemoryPersonaStore {
    personas: Mutex<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryPersonaStore {
    async fn prompt(&self, id: &str) -> Option<String> {
        self.personas.lock().await.get(id).cloned()
    }

    async fn ids(&self) -> Vec<String> {
        self.personas.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl PersonaStore for MemoryPersonaStore {
    async fn get(&self, persona_id: &str) -> Result<Option<Persona>> {
        Ok(self.prompt(persona_id).await.map(|p| Persona::new(persona_id, p)))
    }

    async fn list(&self) -> Result<Vec<Persona>> {
        let map = self.personas.lock().await;
        Ok(map.iter().map(|(id, p)| Persona::new(id.as_str(), p.as_str())).collect())
    }

    async fn create(&self, persona_id: &str, system_prompt: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("persona store is read-only");
        }
        self.personas.lock().await.insert(persona_id.to_string(), system_prompt.to_string());
        Ok(())
    }

    async fn update(&self, persona_id: &str, system_prompt: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("persona store is read-only");
        }
        let mut map = self.personas.lock().await;
        match map.get_mut(persona_id) {
            Some(p) => {
                *p = system_prompt.to_string();
                Ok(())
            }
            None => anyhow::bail!("no persona {}", persona_id),
        }
    }

    async fn delete(&self, persona_id: &str) -> Result<()> {
        self.personas.lock().await.remove(persona_id);
        Ok(())
    }
}

#[derive(Default)]
struct MemoryConversations {
    current: Mutex<HashMap<String, String>>,
    personas: Mutex<HashMap<String, Option<String>>>,
    next_id: AtomicUsize,
}

impl MemoryConversations {
    async fn persona_of(&self, conversation_id: &str) -> Option<String> {
        self.personas.lock().await.get(conversation_id).cloned().flatten()
    }
}

#[async_trait]
impl ConversationManager for MemoryConversations {
    async fn current_conversation(&self, origin: &str) -> Result<Option<String>> {
        Ok(self.current.lock().await.get(origin).cloned())
    }

    async fn set_persona(&self, _origin: &str, conversation_id: &str, persona_id: &str) -> Result<()> {
        self.personas
            .lock()
            .await
            .insert(conversation_id.to_string(), Some(persona_id.to_string()));
        Ok(())
    }

    async fn new_conversation(&self, origin: &str, persona_id: Option<&str>, _title: Option<&str>) -> Result<String> {
        let id = format!("conv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.current.lock().await.insert(origin.to_string(), id.clone());
        self.personas
            .lock()
            .await
            .insert(id.clone(), persona_id.map(str::to_string));
        Ok(id)
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    plugin: QuickPersona,
    llm: Arc<MockLlmClient>,
    store: Arc<MemoryPersonaStore>,
    conversations: Arc<MemoryConversations>,
    _dir: tempfile::TempDir,
}

async fn harness(replies: Vec<Scripted>, edit: impl FnOnce(&mut PluginConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = PluginConfig::default();
    cfg.storage.data_dir = dir.path().to_path_buf();
    cfg.llm.max_attempts = 1;
    cfg.persona.enable_guided_generation = false;
    cfg.persona.auto_compress = false;
    edit(&mut cfg);

    let llm = MockLlmClient::new(replies);
    let store = Arc::new(MemoryPersonaStore::default());
    let conversations = Arc::new(MemoryConversations::default());
    let plugin = QuickPersona::new(
        Arc::new(SharedConfig::new(cfg)),
        llm.clone(),
        store.clone(),
        conversations.clone(),
    )
    .await
    .unwrap();
    Harness {
        plugin,
        llm,
        store,
        conversations,
        _dir: dir,
    }
}

fn msg_from(sender: &str, text: &str) -> InboundMessage {
    InboundMessage {
        origin: "qq:group:100".to_string(),
        sender_id: sender.to_string(),
        sender_name: "阿明".to_string(),
        group_id: "100".to_string(),
        text: text.to_string(),
        timestamp: chrono::Utc::now().timestamp(),
    }
}

fn msg(text: &str) -> InboundMessage {
    msg_from("u1", text)
}

fn joined(replies: &[Reply]) -> String {
    replies.iter().map(Reply::to_plain_text).collect::<Vec<_>>().join("\n")
}

impl Harness {
    async fn send(&self, text: &str) -> String {
        joined(&self.plugin.handle(&msg(text)).await)
    }
}

const CAT_PROMPT: &str = "姓名：小橘\n性格：温柔\n说话风格：称呼对方为{{user}}，自称{{char}}";

// ============================================================================
// Generate, apply, cancel
// ============================================================================

#[tokio::test]
async fn test_generate_then_apply_saves_persona() {
    let h = harness(vec![Scripted::Text(CAT_PROMPT)], |_| {}).await;

    let out = h.send("/快捷人格 生成人格 温柔的猫娘").await;
    assert!(out.contains("人格生成完成"));
    assert!(out.contains("模式: 快速生成 | 待确认"));
    assert!(h.store.ids().await.is_empty());
    assert!(h.send("/qp status").await.contains("会话状态: 等待确认"));

    let out = h.send("/qp 确认").await;
    assert!(out.contains("✅ 人格已保存！"));
    let ids = h.store.ids().await;
    assert_eq!(ids.len(), 1);
    assert!(ids[0].starts_with("qp_温柔的猫娘_"));
    assert_eq!(
        h.store.prompt(&ids[0]).await.unwrap(),
        "姓名：小橘\n性格：温柔\n说话风格：称呼对方为阿明，自称小橘"
    );

    assert!(h.send("/qp status").await.contains("会话状态: 空闲"));
    assert!(h.send("/qp apply").await.contains("没有待确认的人格"));
}

#[tokio::test]
async fn test_second_generate_conflicts_until_cancel() {
    let h = harness(vec![Scripted::Text(CAT_PROMPT), Scripted::Text("姓名：小黑")], |_| {}).await;

    h.send("/qp gen 猫娘").await;
    let out = h.send("/qp gen 狗狗").await;
    assert!(out.contains("你有一个待确认的人格"));
    assert_eq!(h.llm.calls(), 1);

    assert!(h.send("/qp 取消").await.contains("✅ 已取消"));
    assert!(h.send("/qp 取消").await.contains("没有待确认的人格"));

    let out = h.send("/qp gen 狗狗").await;
    assert!(out.contains("姓名：小黑"));
    assert_eq!(h.llm.calls(), 2);
}

#[tokio::test]
async fn test_concurrent_apply_and_cancel_have_one_winner() {
    let h = harness(vec![Scripted::Text(CAT_PROMPT), Scripted::Text(CAT_PROMPT)], |_| {}).await;

    for cancel_first in [false, true] {
        h.send("/qp gen 猫娘").await;
        let saved_before = h.store.ids().await.len();

        let (applied, cancelled) = if cancel_first {
            let (cancelled, applied) = tokio::join!(h.send("/qp 取消"), h.send("/qp 确认"));
            (applied, cancelled)
        } else {
            tokio::join!(h.send("/qp 确认"), h.send("/qp 取消"))
        };

        let saved = applied.contains("✅ 人格已保存");
        let dropped = cancelled.contains("✅ 已取消");
        assert!(saved ^ dropped, "apply: {applied:?}, cancel: {cancelled:?}");
        assert!(applied.contains("没有待确认的人格") || cancelled.contains("没有待确认的人格"));
        assert_eq!(h.store.ids().await.len(), saved_before + usize::from(saved));
        assert!(h.send("/qp status").await.contains("会话状态: 空闲"));
    }
}

#[tokio::test]
async fn test_failed_apply_keeps_draft_and_deadline() {
    let h = harness(vec![Scripted::Text(CAT_PROMPT)], |_| {}).await;
    h.send("/qp gen 猫娘").await;
    let session = msg("").session_id().to_string();
    let before = h.plugin.workshop().locks().peek(&session).unwrap();

    h.store.fail_writes.store(true, Ordering::SeqCst);
    assert!(h.send("/qp 确认").await.contains("❌ 保存人格失败"));
    let after = h.plugin.workshop().locks().peek(&session).unwrap();
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(after.revision, before.revision);

    h.store.fail_writes.store(false, Ordering::SeqCst);
    assert!(h.send("/qp 确认").await.contains("✅ 人格已保存"));
    assert_eq!(h.store.ids().await.len(), 1);
}

#[tokio::test]
async fn test_generation_failure_leaves_session_idle() {
    let h = harness(vec![Scripted::Fail], |_| {}).await;
    let out = h.send("/qp gen 猫娘").await;
    assert!(out.contains("❌ 生成失败"));
    assert!(h.send("/qp status").await.contains("会话状态: 空闲"));
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let h = harness(vec![Scripted::Text(CAT_PROMPT), Scripted::Text(CAT_PROMPT)], |_| {}).await;
    h.send("/qp gen 猫娘").await;

    let mut other = msg("/qp gen 猫娘");
    other.origin = "qq:group:200".to_string();
    let out = joined(&h.plugin.handle(&other).await);
    assert!(out.contains("人格生成完成"));
}

#[tokio::test]
async fn test_direct_apply_without_confirmation() {
    let h = harness(vec![Scripted::Text(CAT_PROMPT)], |c| c.persona.confirm_before_apply = false).await;
    let out = h.send("/qp gen 猫娘").await;
    assert!(out.contains("人格已创建并应用"));
    assert_eq!(h.store.ids().await.len(), 1);
    assert!(h.send("/qp status").await.contains("当前人格: qp_猫娘_"));
}

// ============================================================================
// Auto-compress
// ============================================================================

#[tokio::test]
async fn test_auto_compress_shortens_long_result() {
    let long = "很".repeat(120);
    let short = "短".repeat(60);
    let h = harness(vec![Scripted::Owned(long), Scripted::Owned(short.clone())], |c| {
        c.persona.auto_compress = true;
        c.persona.max_prompt_length = 100;
    })
    .await;

    let out = h.send("/qp gen 猫娘").await;
    assert!(out.contains("生成的提示词过长(120字符，限制100)"));
    assert!(out.contains("✅ 自动压缩完成: 120 → 60 字符"));
    assert!(out.contains(&short));
}

#[tokio::test]
async fn test_auto_compress_keeps_original_when_too_short() {
    let long = "很".repeat(120);
    let h = harness(vec![Scripted::Owned(long.clone()), Scripted::Text("短")], |c| {
        c.persona.auto_compress = true;
        c.persona.max_prompt_length = 100;
    })
    .await;

    let out = h.send("/qp gen 猫娘").await;
    assert!(out.contains("自动压缩后过短(1字符)，保留原始结果"));
    assert!(out.contains(&long));
}

// ============================================================================
// Guided generation
// ============================================================================

const MISSING_JSON: &str = r#"{"provided": ["personality"], "missing": [
    {"field": "age", "label": "年龄", "hint": "多大了"},
    {"field": "appearance", "label": "外貌", "hint": "长什么样"}
]}"#;

#[tokio::test]
async fn test_guided_numbered_supplement() {
    let h = harness(vec![Scripted::Text(MISSING_JSON), Scripted::Text(CAT_PROMPT)], |c| {
        c.persona.enable_guided_generation = true;
    })
    .await;

    let out = h.send("/qp gen 温柔的猫娘").await;
    assert!(out.contains("1️⃣ 年龄（多大了）"));
    assert!(out.contains("2️⃣ 外貌（长什么样）"));
    assert!(h.send("/qp status").await.contains("等待补充信息"));

    // Someone else chatting in the group is not a supplement
    assert!(h.plugin.handle(&msg_from("u2", "2 白色长发")).await.is_empty());

    let out = h.send("2 白色长发").await;
    assert!(out.contains("📝 用户补充: 外貌"));
    assert!(out.contains("🤖 AI 生成: 年龄"));
    assert!(out.contains("人格生成完成"));
    assert!(out.contains("模式: 引导式生成 | 待确认"));

    let prompts = h.llm.prompts.lock().await;
    assert!(prompts[1].contains("白色长发"));
    assert!(prompts[1].contains("温柔的猫娘"));
}

#[tokio::test]
async fn test_guided_skip() {
    let h = harness(vec![Scripted::Text(MISSING_JSON), Scripted::Text(CAT_PROMPT)], |c| {
        c.persona.enable_guided_generation = true;
    })
    .await;
    h.send("/qp gen 猫娘").await;
    let out = h.send("跳过").await;
    assert!(out.contains("⏭️ 已跳过"));
    assert!(out.contains("人格生成完成"));
}

#[tokio::test]
async fn test_guided_complete_description_generates_directly() {
    let h = harness(
        vec![Scripted::Text(r#"{"provided": ["name"], "missing": []}"#), Scripted::Text(CAT_PROMPT)],
        |c| c.persona.enable_guided_generation = true,
    )
    .await;
    let out = h.send("/qp gen 猫娘").await;
    assert!(out.contains("✅ 描述完整，正在生成人格..."));
    assert!(out.contains("人格生成完成"));
}

#[tokio::test]
async fn test_guided_reply_after_timeout() {
    let h = harness(vec![Scripted::Text(MISSING_JSON)], |c| {
        c.persona.enable_guided_generation = true;
        c.persona.guided_timeout_secs = 0;
    })
    .await;
    h.send("/qp gen 猫娘").await;
    assert_eq!(h.send("跳过").await, "⏰ 等待超时，已取消生成");
    assert_eq!(h.llm.calls(), 1);
}

#[tokio::test]
async fn test_group_chatter_is_not_a_command() {
    let h = harness(vec![], |_| {}).await;
    assert!(h.send("persona 这个角色设定怎么样").await.is_empty());
    assert!(h.send("profile 这张头像好看吗").await.is_empty());
    assert_eq!(h.llm.calls(), 0);

    let mut private = msg("qp list");
    private.origin = "qq:private:u1".to_string();
    private.group_id.clear();
    assert!(joined(&h.plugin.handle(&private).await).contains("当前没有人格"));
}

#[tokio::test]
async fn test_plain_chat_without_guided_request_is_ignored() {
    let h = harness(vec![], |_| {}).await;
    assert!(h.plugin.handle(&msg("今天天气不错")).await.is_empty());
    assert_eq!(h.llm.calls(), 0);
}

// ============================================================================
// Refine, shrink, convert
// ============================================================================

#[tokio::test]
async fn test_refine_replaces_pending_draft() {
    let h = harness(
        vec![Scripted::Text(CAT_PROMPT), Scripted::Text("姓名：小橘\n性格：非常傲娇")],
        |_| {},
    )
    .await;
    h.send("/qp gen 猫娘").await;

    let out = h.send("/qp 优化人格 更傲娇一点").await;
    assert!(out.contains("🔄 正在优化待确认的人格"));
    assert!(out.contains("人格优化完成（已更新待确认人格）"));
    assert!(h.llm.prompts.lock().await[1].contains("更傲娇一点"));

    h.send("/qp 确认").await;
    let ids = h.store.ids().await;
    assert_eq!(h.store.prompt(&ids[0]).await.unwrap(), "姓名：小橘\n性格：非常傲娇");
}

#[tokio::test]
async fn test_refine_does_not_overwrite_newer_draft() {
    let h = harness(
        vec![
            Scripted::Text(CAT_PROMPT),
            Scripted::Text("姓名：小黑"),
            Scripted::Text("姓名：小橘\n性格：非常傲娇"),
        ],
        |_| {},
    )
    .await;
    h.send("/qp gen 猫娘").await;
    let gate = h.llm.hold("更傲娇一点").await;

    // Cancel and generate a new draft while the refine is waiting on the model
    let (refined, ()) = tokio::join!(h.send("/qp 优化人格 更傲娇一点"), async {
        gate.entered.notified().await;
        assert!(h.send("/qp 取消").await.contains("✅ 已取消"));
        assert!(h.send("/qp gen 狗狗").await.contains("人格生成完成"));
        gate.open.notify_one();
    });

    assert!(refined.contains("优化期间待确认的人格已被新的生成操作替换，本次结果已丢弃"));
    assert!(!refined.contains("人格优化完成"));
    let status = h.send("/qp status").await;
    assert!(status.contains("模式: 生成"));
    assert!(status.contains("提示词预览: 姓名：小黑"));

    h.send("/qp 确认").await;
    let ids = h.store.ids().await;
    assert_eq!(ids.len(), 1);
    assert!(ids[0].starts_with("qp_狗狗_"));
}

#[tokio::test]
async fn test_convert_after_apply_is_dropped() {
    let h = harness(vec![Scripted::Text(CAT_PROMPT), Scripted::Text("# 小橘\n- 性格: 温柔")], |_| {}).await;
    h.send("/qp gen 猫娘").await;
    let gate = h.llm.hold("格式转换专家").await;

    let (converted, ()) = tokio::join!(h.send("/qp convert markdown"), async {
        gate.entered.notified().await;
        assert!(h.send("/qp 确认").await.contains("✅ 人格已保存"));
        gate.open.notify_one();
    });

    assert!(converted.contains("格式转换期间待确认的人格已被确认或取消，本次结果已丢弃"));
    assert!(h.send("/qp status").await.contains("会话状态: 空闲"));
    let ids = h.store.ids().await;
    assert!(h.store.prompt(&ids[0]).await.unwrap().starts_with("姓名：小橘"));
}

#[tokio::test]
async fn test_refine_needs_a_target() {
    let h = harness(vec![], |_| {}).await;
    assert!(h.send("/qp refine 可爱点").await.contains("请先使用 /快捷人格 选择人格"));
    assert!(h.send("/qp refine").await.contains("请提供优化反馈"));
}

#[tokio::test]
async fn test_refine_saved_persona_backs_up_on_apply() {
    let h = harness(vec![Scripted::Text("姓名：小橘\n性格：活泼")], |_| {}).await;
    h.store.create("qp_cat_000001", CAT_PROMPT).await.unwrap();
    h.send("/qp use qp_cat_000001").await;

    let out = h.send("/qp refine 活泼一点").await;
    assert!(out.contains("人格优化完成"));
    assert_eq!(h.store.prompt("qp_cat_000001").await.unwrap(), CAT_PROMPT);

    h.send("/qp apply").await;
    assert_eq!(h.store.prompt("qp_cat_000001").await.unwrap(), "姓名：小橘\n性格：活泼");
    assert!(h.send("/qp history").await.contains("qp_cat_000001 的历史版本 (共 1 个)"));

    let out = h.send("/qp rollback").await;
    assert!(out.contains("✅ 已回滚到"));
    assert_eq!(h.store.prompt("qp_cat_000001").await.unwrap(), CAT_PROMPT);
    assert!(h.send("/qp rollback").await.contains("没有找到 qp_cat_000001 的备份"));
}

#[tokio::test]
async fn test_shrink_rejects_longer_result() {
    let original = "长".repeat(200);
    let h = harness(vec![Scripted::Owned("长".repeat(250))], |_| {}).await;
    h.store.create("qp_long_000001", &original).await.unwrap();
    h.send("/qp use qp_long_000001").await;

    let out = h.send("/qp shrink 极限").await;
    assert!(out.contains("压缩强度: 极限"));
    assert!(out.contains("压缩后长度未减少(250字符)"));
    assert!(h.send("/qp status").await.contains("会话状态: 空闲"));
}

#[tokio::test]
async fn test_shrink_parks_result_with_reduction() {
    let h = harness(vec![Scripted::Owned("短".repeat(100))], |_| {}).await;
    h.store.create("qp_long_000001", &"长".repeat(200)).await.unwrap();
    h.send("/qp use qp_long_000001").await;

    let out = h.send("/qp 压缩人格 中度").await;
    assert!(out.contains("压缩完成"));
    assert!(out.contains("压缩效果: 200 → 100 字符"));
    assert!(out.contains("减少比例: 50.0%"));
    assert!(h.send("/qp status").await.contains("模式: 压缩"));
}

#[tokio::test]
async fn test_convert_pending_draft() {
    let h = harness(
        vec![Scripted::Text(CAT_PROMPT), Scripted::Text("# 小橘\n- 性格: 温柔")],
        |_| {},
    )
    .await;
    assert!(h.send("/qp convert").await.contains("请指定目标格式"));
    assert!(h.send("/qp convert md").await.contains("请先选择或生成一个人格"));

    h.send("/qp gen 猫娘").await;
    let out = h.send("/qp 转换格式 markdown").await;
    assert!(out.contains("格式转换完成"));
    assert!(out.contains("目标格式: Markdown | 待确认"));
    assert!(h.send("/qp status").await.contains("模式: 格式转换"));
}

// ============================================================================
// Management
// ============================================================================

#[tokio::test]
async fn test_list_marks_plugin_personas() {
    let h = harness(vec![], |_| {}).await;
    assert!(h.send("/qp list").await.contains("当前没有人格"));

    h.store.create("qp_a_000001", "姓名：甲").await.unwrap();
    h.store.create("default", "You are a helpful assistant.").await.unwrap();
    let out = h.send("/qp list").await;
    assert!(out.contains("🔹 qp_a_000001: 姓名：甲"));
    assert!(out.contains("   default: You are a helpful assistant."));
    assert!(out.contains("共 2 个人格"));
}

#[tokio::test]
async fn test_delete_refuses_foreign_persona() {
    let h = harness(vec![], |_| {}).await;
    h.store.create("default", "host persona").await.unwrap();
    h.store.create("qp_a_000001", "姓名：甲").await.unwrap();

    assert!(h.send("/qp delete default").await.contains("不是由本插件创建的"));
    assert!(h.store.prompt("default").await.is_some());
    assert!(h.send("/qp delete qp_missing").await.contains("未找到人格"));

    h.send("/qp use qp_a_000001").await;
    assert!(h.send("/qp delete qp_a_000001").await.contains("✅ 已删除人格: qp_a_000001"));
    assert!(h.store.prompt("qp_a_000001").await.is_none());
    assert!(!h.send("/qp status").await.contains("当前人格"));
}

#[tokio::test]
async fn test_activate_creates_then_updates_conversation() {
    let h = harness(vec![], |_| {}).await;
    h.store.create("qp_a_000001", "姓名：甲").await.unwrap();
    h.store.create("qp_b_000001", "姓名：乙").await.unwrap();

    let out = h.send("/qp 应用人格 qp_a_000001").await;
    assert!(out.contains("已创建新对话并激活人格: qp_a_000001"));
    assert_eq!(h.conversations.persona_of("conv-1").await.as_deref(), Some("qp_a_000001"));

    let out = h.send("/qp activate qp_b_000001").await;
    assert!(out.contains("已激活人格: qp_b_000001"));
    assert_eq!(h.conversations.persona_of("conv-1").await.as_deref(), Some("qp_b_000001"));

    let out = h.send("/qp newchat").await;
    assert!(out.contains("✅ 已创建新对话并应用人格\n📌 对话ID: conv-2\n🎭 人格: qp_b_000001"));
}

#[tokio::test]
async fn test_view_shows_backup_count() {
    let h = harness(vec![Scripted::Text("姓名：甲二")], |c| c.persona.confirm_before_apply = false).await;
    h.store.create("qp_a_000001", "姓名：甲").await.unwrap();
    h.send("/qp use qp_a_000001").await;
    h.send("/qp refine 换个名字").await;

    let out = h.send("/qp view").await;
    assert!(out.contains("人格详情: qp_a_000001"));
    assert!(out.contains("历史版本: 1 个"));
    assert!(out.contains("姓名：甲二"));
    assert!(h.send("/qp view qp_nope").await.contains("❌ 未找到人格: qp_nope"));
}

// ============================================================================
// Smart entry
// ============================================================================

#[tokio::test]
async fn test_smart_entry_routes_generate() {
    let h = harness(
        vec![
            Scripted::Text(r#"好的 {"action": "generate", "description": "傲娇的猫娘"}"#),
            Scripted::Text(CAT_PROMPT),
        ],
        |_| {},
    )
    .await;
    let out = h.send("/人格 帮我做一个傲娇的猫娘").await;
    assert!(out.contains("人格生成完成"));
    assert!(h.llm.prompts.lock().await[1].contains("傲娇的猫娘"));
}

#[tokio::test]
async fn test_smart_entry_activate_without_id_lists_personas() {
    let h = harness(vec![Scripted::Text(r#"{"action": "activate"}"#)], |_| {}).await;
    h.store.create("qp_a_000001", "姓名：甲").await.unwrap();
    let out = h.send("/qp 切换人格").await;
    assert!(out.contains("请指定要激活的人格"));
    assert!(out.contains("可用人格: qp_a_000001"));
    assert!(h.llm.prompts.lock().await[0].contains("qp_a_000001"));
}

#[tokio::test]
async fn test_smart_entry_unparsable_reply_shows_help() {
    let h = harness(vec![Scripted::Text("我不知道")], |_| {}).await;
    let out = h.send("/人格 随便聊聊").await;
    assert!(out.contains("快捷人格生成器 - 命令列表"));
}

// ============================================================================
// Profiles
// ============================================================================

const PROFILE_JSON: &str = r#"{"profile_text": "喜欢猫的程序员", "traits": ["耐心"], "interests": ["猫"], "speaking_style": "简短", "emotional_tendency": "平稳"}"#;

#[tokio::test]
async fn test_profile_monitoring_flow() {
    let h = harness(vec![Scripted::Text(PROFILE_JSON)], |c| {
        c.profile.enabled = true;
        c.profile.min_messages = 3;
    })
    .await;

    let out = h.send("/画像 添加监控 u2 group").await;
    assert!(out.contains("📡 模式: 群聊模式 (群: 100)"));
    assert!(h.send("/画像 监控列表").await.contains("• u2 | 👥群聊(100) | ✅启用"));

    for text in ["早上好", "今天写了一天代码", "我家猫又在键盘上睡着了"] {
        h.plugin.handle(&msg_from("u2", text)).await;
    }
    assert_eq!(h.llm.calls(), 1);

    let out = h.send("/画像 查看 u2").await;
    assert!(out.contains("用户画像: 阿明 (u2)"));
    assert!(out.contains("喜欢猫的程序员"));
    assert!(out.contains("已分析消息: 3 条"));
    assert!(h.send("/画像 列表").await.contains("• 阿明 (u2): 喜欢猫的程序员"));

    assert!(h.send("/画像 强制更新 u2").await.contains("消息缓冲区为空，无法更新"));
    assert!(h.send("/画像 缓冲状态 u2").await.contains("📝 待处理消息: 0 条"));

    assert!(h.send("/画像 删除 u2").await.contains("✅ 已删除用户 u2 的画像和监控配置"));
    assert!(h.send("/画像 查看 u2").await.contains("❌ 未找到用户 u2 的画像"));
}

#[tokio::test]
async fn test_profile_force_update_failure_is_reported() {
    let h = harness(vec![Scripted::Text("不是 JSON")], |c| c.profile.enabled = true).await;
    h.send("/画像 add u2").await;
    h.plugin.handle(&msg_from("u2", "你好")).await;

    let out = h.send("/画像 update u2").await;
    assert!(out.contains("📝 待处理消息: 1 条"));
    assert!(out.contains("❌ 更新失败，请查看日志"));
    assert!(h.send("/画像 buffer u2").await.contains("📝 待处理消息: 1 条"));

    h.llm.push(Scripted::Text(PROFILE_JSON)).await;
    assert!(h.send("/画像 update u2").await.contains("✅ 画像已更新！"));
}

#[tokio::test]
async fn test_profile_commands_validate_arguments() {
    let h = harness(vec![], |_| {}).await;
    assert!(h.send("/画像 查看").await.contains("请指定用户ID"));
    assert!(h.send("/画像 移除监控 nobody").await.contains("未找到用户 nobody 的监控配置"));

    let mut private = msg("/画像 添加监控 u3 群聊");
    private.origin = "qq:private:u1".to_string();
    private.group_id.clear();
    let out = joined(&h.plugin.handle(&private).await);
    assert!(out.contains("群聊模式需要在群聊中使用"));
}
