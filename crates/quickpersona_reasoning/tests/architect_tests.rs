//! Integration tests for the ArchitectService and ProfileService.
//!
//! A MockLlmClient pops scripted replies from a queue and records every
//! prompt, so retry, timeout and parsing behaviour can be checked without
//! real LLM calls.

use anyhow::Result;
use async_trait::async_trait;
use quickpersona_core::{InboundMessage, PluginConfig, PromptFormat, SharedConfig};
use quickpersona_memory::{ProfileMode, SqliteProfileStore};
use quickpersona_reasoning::api_types::{Message, MessagesResponse};
use quickpersona_reasoning::llm::{CompletionParams, LlmClient};
use quickpersona_reasoning::retry::HttpStatusError;
use quickpersona_reasoning::{ArchitectService, Intensity, Intent, IntentContext, ProfileService};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

// ============================================================================
// Mock LLM Client
// ============================================================================

enum Scripted {
    Text(&'static str),
    Fail(&'static str),
    Status(u16),
    Hang,
}

struct MockLlmClient {
    replies: Mutex<Vec<Scripted>>,
    prompts: Mutex<Vec<String>>,
    models: Mutex<Vec<Option<String>>>,
    call_count: AtomicUsize,
}

impl MockLlmClient {
    fn new(replies: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
            models: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _system: &str, messages: Vec<Message>, params: CompletionParams) -> Result<MessagesResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(messages.iter().map(Message::text).collect());
        self.models.lock().await.push(params.model);
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
            Scripted::Fail(msg) => anyhow::bail!("{}", msg),
            Scripted::Status(status) => Err(HttpStatusError {
                provider: "Mock".into(),
                status,
                body: "rejected".into(),
            }
            .into()),
            Scripted::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(MessagesResponse::from_text("too late"))
            }
        }
    }
}

fn config(edit: impl FnOnce(&mut PluginConfig)) -> Arc<SharedConfig> {
    let mut cfg = PluginConfig::default();
    edit(&mut cfg);
    Arc::new(SharedConfig::new(cfg))
}

fn architect(client: Arc<MockLlmClient>, cfg: Arc<SharedConfig>) -> ArchitectService {
    ArchitectService::new(client, cfg)
}

// ============================================================================
// call_architect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_call_architect_trims_and_strips_fence() {
    let client = MockLlmClient::new(vec![Scripted::Text("\n```text\n姓名：小雪\n```  ")]);
    let svc = architect(client.clone(), config(|_| {}));
    assert_eq!(svc.call_architect("p").await.unwrap(), "姓名：小雪");
    assert_eq!(client.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_reply_is_retried() {
    let client = MockLlmClient::new(vec![Scripted::Text("   "), Scripted::Text("ok")]);
    let svc = architect(client.clone(), config(|c| c.llm.max_attempts = 2));
    assert_eq!(svc.call_architect("p").await.unwrap(), "ok");
    assert_eq!(client.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let client = MockLlmClient::new(vec![
        Scripted::Fail("connection reset"),
        Scripted::Fail("connection reset"),
        Scripted::Fail("connection reset"),
        Scripted::Text("never reached"),
    ]);
    let svc = architect(client.clone(), config(|c| c.llm.max_attempts = 3));
    assert!(svc.call_architect("p").await.is_err());
    assert_eq!(client.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_not_retried() {
    let client = MockLlmClient::new(vec![Scripted::Status(401), Scripted::Text("ok")]);
    let svc = architect(client.clone(), config(|c| c.llm.max_attempts = 3));
    assert!(svc.call_architect("p").await.is_err());
    assert_eq!(client.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_each_attempt_is_bounded_by_timeout() {
    let client = MockLlmClient::new(vec![Scripted::Hang, Scripted::Text("second try")]);
    let svc = architect(
        client.clone(),
        config(|c| {
            c.llm.timeout_secs = 5;
            c.llm.max_attempts = 2;
        }),
    );
    assert_eq!(svc.call_architect("p").await.unwrap(), "second try");
    assert_eq!(client.calls(), 2);

    let client = MockLlmClient::new(vec![Scripted::Hang]);
    let svc = architect(
        client.clone(),
        config(|c| {
            c.llm.timeout_secs = 5;
            c.llm.max_attempts = 1;
        }),
    );
    let err = svc.call_architect("p").await.unwrap_err();
    assert!(format!("{:#}", err).contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_provider_id_overrides_model() {
    let client = MockLlmClient::new(vec![Scripted::Text("a"), Scripted::Text("b")]);
    let svc = architect(client.clone(), config(|c| c.llm.provider_id = "architect-model".into()));
    svc.call_architect("p").await.unwrap();
    assert_eq!(client.models.lock().await[0].as_deref(), Some("architect-model"));

    let client = MockLlmClient::new(vec![Scripted::Text("a")]);
    let svc = architect(client.clone(), config(|_| {}));
    svc.call_architect("p").await.unwrap();
    assert_eq!(client.models.lock().await[0], None);
}

// ============================================================================
// Persona operations
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_template_override_is_read_per_call() {
    let client = MockLlmClient::new(vec![Scripted::Text("a"), Scripted::Text("b")]);
    let cfg = config(|_| {});
    let svc = architect(client.clone(), cfg.clone());

    svc.generate_persona("猫娘", PromptFormat::Natural).await.unwrap();
    let mut edited = PluginConfig::default();
    edited.templates.generate = Some("自定义：{description}".into());
    cfg.store(edited);
    svc.generate_persona("猫娘", PromptFormat::Natural).await.unwrap();

    let prompts = client.prompts.lock().await;
    assert!(prompts[0].contains("猫娘"));
    assert_ne!(prompts[0], "自定义：猫娘");
    assert_eq!(prompts[1], "自定义：猫娘");
}

#[tokio::test(start_paused = true)]
async fn test_shrink_and_convert_fill_templates() {
    let client = MockLlmClient::new(vec![Scripted::Text("short"), Scripted::Text("<persona/>")]);
    let svc = architect(client.clone(), config(|_| {}));

    svc.shrink_persona("原始人格", Intensity::Extreme, PromptFormat::Markdown).await.unwrap();
    svc.convert_format("原始人格", PromptFormat::Natural, PromptFormat::Xml).await.unwrap();

    let prompts = client.prompts.lock().await;
    assert!(prompts[0].contains("原始人格"));
    assert!(prompts[0].contains("极限"));
    assert!(prompts[1].contains(PromptFormat::Xml.display_name()));
    assert!(!prompts[1].contains("{target_format}"));
}

#[tokio::test(start_paused = true)]
async fn test_supplements_default_to_none_marker() {
    let client = MockLlmClient::new(vec![Scripted::Text("persona")]);
    let svc = architect(client.clone(), config(|_| {}));
    svc.generate_with_supplements("骑士", "", &["年龄".to_string(), "外貌".to_string()], PromptFormat::Natural)
        .await
        .unwrap();
    let prompts = client.prompts.lock().await;
    assert!(prompts[0].contains("年龄、外貌"));
    assert!(!prompts[0].contains("{supplements}"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_fields_parsed_from_prose() {
    let client = MockLlmClient::new(vec![Scripted::Text(
        r#"分析如下：{"provided": ["name"], "missing": [{"field": "age", "label": "年龄", "hint": "大概多大"}, {"field": ""}]}"#,
    )]);
    let svc = architect(client, config(|_| {}));
    let analysis = svc.analyze_missing_fields("一个叫小雪的女孩").await;
    assert_eq!(analysis.provided, vec!["name".to_string()]);
    assert_eq!(analysis.missing.len(), 1);
    assert_eq!(analysis.missing[0].label, "年龄");
}

#[tokio::test(start_paused = true)]
async fn test_missing_fields_fall_back_to_nothing_missing() {
    let client = MockLlmClient::new(vec![Scripted::Text("我无法判断")]);
    let svc = architect(client, config(|_| {}));
    assert!(svc.analyze_missing_fields("x").await.missing.is_empty());

    let client = MockLlmClient::new(vec![Scripted::Fail("down")]);
    let svc = architect(client, config(|c| c.llm.max_attempts = 1));
    assert!(svc.analyze_missing_fields("x").await.missing.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recognize_intent() {
    let client = MockLlmClient::new(vec![
        Scripted::Text("好的 {'action': 'delete', 'persona_id': 'qp_cat_1a2b3c',}"),
        Scripted::Text("抱歉我不明白"),
    ]);
    let svc = architect(client.clone(), config(|_| {}));
    let ctx = IntentContext {
        current_persona_id: Some("qp_cat_1a2b3c".into()),
        persona_list: vec!["qp_cat_1a2b3c".into()],
        has_pending: true,
    };

    let intent = svc.recognize_intent("删掉这个人格", &ctx).await;
    assert_eq!(
        intent,
        Intent::Delete {
            persona_id: Some("qp_cat_1a2b3c".into())
        }
    );
    assert_eq!(svc.recognize_intent("???", &ctx).await, Intent::Unrecognized { action: None });

    let prompts = client.prompts.lock().await;
    assert!(prompts[0].contains("删掉这个人格"));
    assert!(prompts[0].contains("qp_cat_1a2b3c"));
}

// ============================================================================
// ProfileService
// ============================================================================

fn chat(user: &str, group: &str, text: &str, ts: i64) -> InboundMessage {
    InboundMessage {
        origin: if group.is_empty() {
            format!("qq:private:{}", user)
        } else {
            format!("qq:group:{}", group)
        },
        sender_id: user.to_string(),
        sender_name: "阿明".to_string(),
        group_id: group.to_string(),
        text: text.to_string(),
        timestamp: ts,
    }
}

async fn profile_service(
    client: Arc<MockLlmClient>,
    dir: &tempfile::TempDir,
) -> (ProfileService, Arc<SharedConfig>) {
    let cfg = config(|c| {
        c.profile.enabled = true;
        c.profile.min_messages = 3;
        c.llm.max_attempts = 1;
    });
    let store = SqliteProfileStore::new(dir.path().join("profiles.db")).await.unwrap();
    let architect = Arc::new(ArchitectService::new(client, cfg.clone()));
    (ProfileService::new(store, architect, cfg.clone()), cfg)
}

const PROFILE_JSON: &str = r#"{"profile_text": "喜欢猫的程序员", "traits": ["耐心"], "interests": ["猫"], "speaking_style": "简短", "emotional_tendency": "平稳"}"#;

#[tokio::test]
async fn test_profile_updates_after_min_messages() {
    let dir = tempfile::tempdir().unwrap();
    let client = MockLlmClient::new(vec![Scripted::Text(PROFILE_JSON)]);
    let (svc, _) = profile_service(client.clone(), &dir).await;
    svc.add_monitor("u1", ProfileMode::Global, vec![], "admin").await.unwrap();

    let now = chrono::Utc::now().timestamp();
    assert!(!svc.observe(&chat("u1", "", "早", now)).await.unwrap());
    assert!(!svc.observe(&chat("u1", "100", "今天写代码", now)).await.unwrap());
    assert!(svc.observe(&chat("u1", "100", "猫好可爱", now)).await.unwrap());

    let profile = svc.profile("u1").await.unwrap().unwrap();
    assert_eq!(profile.profile_text, "喜欢猫的程序员");
    assert_eq!(profile.message_count, 3);
    assert!(profile.last_updated > 0);
    assert_eq!(svc.buffer_status("u1").await.unwrap().message_count, 0);

    // First analysis uses the init template with the nickname
    let prompts = client.prompts.lock().await;
    assert!(prompts[0].contains("阿明"));
    assert!(prompts[0].contains("[群100]"));
}

#[tokio::test]
async fn test_unmonitored_and_disabled_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let client = MockLlmClient::new(vec![]);
    let (svc, cfg) = profile_service(client.clone(), &dir).await;
    svc.add_monitor("u1", ProfileMode::Group, vec!["100".into()], "admin").await.unwrap();

    assert!(!svc.observe(&chat("u2", "100", "hi", 1)).await.unwrap());
    assert!(!svc.observe(&chat("u1", "200", "hi", 1)).await.unwrap());
    assert!(!svc.observe(&chat("u1", "", "hi", 1)).await.unwrap());
    assert_eq!(svc.buffer_status("u1").await.unwrap().message_count, 0);

    assert!(!svc.observe(&chat("u1", "100", "hi", 1)).await.unwrap());
    assert_eq!(svc.buffer_status("u1").await.unwrap().message_count, 1);

    let mut disabled = PluginConfig::default();
    disabled.profile.enabled = false;
    cfg.store(disabled);
    assert!(!svc.observe(&chat("u1", "100", "hi", 1)).await.unwrap());
    assert_eq!(svc.buffer_status("u1").await.unwrap().message_count, 1);
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_failed_update_restores_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let client = MockLlmClient::new(vec![Scripted::Text("不是 JSON"), Scripted::Text(PROFILE_JSON)]);
    let (svc, _) = profile_service(client.clone(), &dir).await;
    svc.add_monitor("u1", ProfileMode::Global, vec![], "admin").await.unwrap();

    for text in ["a", "b", "c"] {
        svc.observe(&chat("u1", "", text, 1_700_000_000)).await.unwrap();
    }
    assert_eq!(svc.buffer_status("u1").await.unwrap().message_count, 3);
    assert!(!svc.profile("u1").await.unwrap().unwrap().is_analysed());

    assert!(svc.force_update("u1").await.unwrap());
    assert_eq!(svc.profile("u1").await.unwrap().unwrap().message_count, 3);
    assert!(!svc.force_update("u1").await.unwrap());
}

#[tokio::test]
async fn test_incremental_update_uses_current_profile() {
    let dir = tempfile::tempdir().unwrap();
    let client = MockLlmClient::new(vec![
        Scripted::Text(PROFILE_JSON),
        Scripted::Text(r#"{"interests": ["猫", "咖啡"]}"#),
    ]);
    let (svc, _) = profile_service(client.clone(), &dir).await;
    svc.add_monitor("u1", ProfileMode::Global, vec![], "admin").await.unwrap();
    for round in 0..2 {
        for text in ["a", "b", "c"] {
            svc.observe(&chat("u1", "", &format!("{}{}", text, round), 1_700_000_000)).await.unwrap();
        }
    }

    let profile = svc.profile("u1").await.unwrap().unwrap();
    assert_eq!(profile.interests, vec!["猫".to_string(), "咖啡".to_string()]);
    assert_eq!(profile.profile_text, "喜欢猫的程序员");
    assert_eq!(profile.message_count, 6);
    assert!(client.prompts.lock().await[1].contains("喜欢猫的程序员"));
}

#[tokio::test]
async fn test_state_survives_restart_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (svc, _) = profile_service(MockLlmClient::new(vec![]), &dir).await;
        svc.add_monitor("u1", ProfileMode::Group, vec!["100".into()], "admin").await.unwrap();
        svc.add_monitor("u2", ProfileMode::Global, vec![], "admin").await.unwrap();
        assert!(svc.remove_monitor("u2").await.unwrap());
        assert!(!svc.remove_monitor("u2").await.unwrap());
    }

    let (svc, _) = profile_service(MockLlmClient::new(vec![]), &dir).await;
    let monitors = svc.monitors().await.unwrap();
    assert_eq!(monitors.len(), 1);
    assert_eq!(monitors[0].group_ids, vec!["100".to_string()]);
    assert_eq!(svc.profiles().await.unwrap().len(), 2);
    assert!(svc.is_monitored("u1", Some("100")).await.unwrap());

    assert!(svc.delete_profile("u1").await.unwrap());
    assert!(svc.profile("u1").await.unwrap().is_none());
    assert!(svc.monitor("u1").await.unwrap().is_none());
    assert!(!svc.delete_profile("u1").await.unwrap());
}
