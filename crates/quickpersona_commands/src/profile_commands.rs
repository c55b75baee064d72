//! `/画像` command handlers on top of [`ProfileService`].

use crate::parser::ProfileCommand;
use crate::reply::{Card, Reply};
use quickpersona_core::persona::shorten;
use quickpersona_core::InboundMessage;
use quickpersona_memory::profile::format_timestamp;
use quickpersona_memory::{ProfileMode, ProfileMonitor};
use quickpersona_reasoning::ProfileService;
use std::sync::Arc;

pub const PROFILE_HELP: &str = "📊 用户画像 - 命令列表

/画像 添加监控 <用户ID> [模式] - 添加用户监控
  模式: global(全局，默认) 或 group(仅当前群聊)
/画像 移除监控 <用户ID> - 移除用户监控
/画像 监控列表 - 查看所有监控
/画像 查看 <用户ID> - 查看用户画像
/画像 列表 - 列出所有已生成的画像
/画像 强制更新 <用户ID> - 立即分析缓冲区中的消息
/画像 删除 <用户ID> - 删除画像和监控配置
/画像 缓冲状态 <用户ID> - 查看消息缓冲区状态

💡 被监控用户的消息会自动收集，达到阈值后由 AI 分析生成画像";

fn usage(sub: &str) -> Reply {
    Reply::text(format!("请指定用户ID，例如：/画像 {} 123456789", sub))
}

fn or_placeholder(items: &[String]) -> String {
    if items.is_empty() {
        "暂无".to_string()
    } else {
        items.join(", ")
    }
}

fn non_empty(text: &str) -> &str {
    if text.is_empty() {
        "暂无"
    } else {
        text
    }
}

fn monitor_line(monitor: &ProfileMonitor) -> String {
    let scope = match monitor.mode {
        ProfileMode::Global => "🌐全局".to_string(),
        ProfileMode::Group => format!("👥群聊({})", monitor.group_ids.join(",")),
    };
    let state = if monitor.enabled { "✅启用" } else { "⏸️暂停" };
    format!("• {} | {} | {}", monitor.user_id, scope, state)
}

pub struct ProfileCommands {
    profiles: Arc<ProfileService>,
}

impl ProfileCommands {
    pub fn new(profiles: Arc<ProfileService>) -> Self {
        Self { profiles }
    }

    pub async fn handle(&self, msg: &InboundMessage, command: ProfileCommand) -> Vec<Reply> {
        match command {
            ProfileCommand::Help => vec![Reply::text(PROFILE_HELP)],
            ProfileCommand::AddMonitor { user_id, mode } => self.add_monitor(msg, user_id, mode).await,
            ProfileCommand::RemoveMonitor(Some(user)) => self.remove_monitor(&user).await,
            ProfileCommand::RemoveMonitor(None) => vec![usage("移除监控")],
            ProfileCommand::Monitors => self.monitors().await,
            ProfileCommand::View(Some(user)) => self.view(&user).await,
            ProfileCommand::View(None) => vec![usage("查看")],
            ProfileCommand::List => self.list().await,
            ProfileCommand::ForceUpdate(Some(user)) => self.force_update(&user).await,
            ProfileCommand::ForceUpdate(None) => vec![usage("强制更新")],
            ProfileCommand::Delete(Some(user)) => self.delete(&user).await,
            ProfileCommand::Delete(None) => vec![usage("删除")],
            ProfileCommand::BufferStatus(Some(user)) => self.buffer_status(&user).await,
            ProfileCommand::BufferStatus(None) => vec![usage("缓冲状态")],
        }
    }

    async fn add_monitor(&self, msg: &InboundMessage, user_id: Option<String>, mode: Option<String>) -> Vec<Reply> {
        let Some(user_id) = user_id else {
            return vec![usage("添加监控")];
        };
        let mode = match mode.as_deref().map(str::parse::<ProfileMode>) {
            None => ProfileMode::Global,
            Some(Ok(mode)) => mode,
            Some(Err(_)) => return vec![Reply::text("❌ 模式无效，可选: global(全局) 或 group(群聊)")],
        };

        let group_ids = match mode {
            ProfileMode::Global => Vec::new(),
            ProfileMode::Group => match msg.group() {
                Some(group) => vec![group.to_string()],
                None => return vec![Reply::text("❌ 群聊模式需要在群聊中使用")],
            },
        };

        match self
            .profiles
            .add_monitor(&user_id, mode, group_ids.clone(), &msg.sender_id)
            .await
        {
            Ok(_) => {
                let mode_text = match mode {
                    ProfileMode::Global => "全局模式".to_string(),
                    ProfileMode::Group => format!("群聊模式 (群: {})", group_ids.join(",")),
                };
                vec![Reply::text(format!(
                    "✅ 已添加画像监控\n👤 用户ID: {}\n📡 模式: {}\n💡 系统将自动收集该用户的消息并生成画像",
                    user_id, mode_text
                ))]
            }
            Err(e) => {
                tracing::error!(user_id, "Adding profile monitor failed: {:#}", e);
                vec![Reply::text(format!("❌ 添加监控失败: {}", e))]
            }
        }
    }

    async fn remove_monitor(&self, user_id: &str) -> Vec<Reply> {
        match self.profiles.remove_monitor(user_id).await {
            Ok(true) => vec![Reply::text(format!("✅ 已移除对用户 {} 的监控", user_id))],
            Ok(false) => vec![Reply::text(format!("❌ 未找到用户 {} 的监控配置", user_id))],
            Err(e) => {
                tracing::error!(user_id, "Removing profile monitor failed: {:#}", e);
                vec![Reply::text(format!("❌ 移除监控失败: {}", e))]
            }
        }
    }

    async fn monitors(&self) -> Vec<Reply> {
        let monitors = match self.profiles.monitors().await {
            Ok(list) => list,
            Err(e) => return vec![Reply::text(format!("❌ 获取监控列表失败: {}", e))],
        };
        if monitors.is_empty() {
            return vec![Reply::text("当前没有任何画像监控")];
        }
        let mut lines = vec!["📡 画像监控列表".to_string()];
        lines.extend(monitors.iter().map(monitor_line));
        lines.push(format!("\n共 {} 个监控", monitors.len()));
        vec![Reply::text(lines.join("\n"))]
    }

    async fn view(&self, user_id: &str) -> Vec<Reply> {
        let profile = match self.profiles.profile(user_id).await {
            Ok(Some(p)) => p,
            Ok(None) => return vec![Reply::text(format!("❌ 未找到用户 {} 的画像", user_id))],
            Err(e) => return vec![Reply::text(format!("❌ 查看画像失败: {}", e))],
        };

        let title = if profile.nickname.is_empty() {
            format!("用户画像: {}", profile.user_id)
        } else {
            format!("用户画像: {} ({})", profile.nickname, profile.user_id)
        };
        let content = if profile.is_analysed() {
            profile.profile_text.clone()
        } else {
            "尚未生成画像，等待收集足够的消息".to_string()
        };
        let updated = if profile.last_updated > 0 {
            format!("更新时间: {}", format_timestamp(profile.last_updated))
        } else {
            "更新时间: 从未".to_string()
        };

        let card = Card::new("👤", title, content)
            .meta("性格特征", or_placeholder(&profile.traits))
            .meta("兴趣爱好", or_placeholder(&profile.interests))
            .meta("说话风格", non_empty(&profile.speaking_style))
            .meta("情感倾向", non_empty(&profile.emotional_tendency))
            .meta("已分析消息", format!("{} 条", profile.message_count))
            .footer(updated);
        vec![card.into()]
    }

    async fn list(&self) -> Vec<Reply> {
        let profiles = match self.profiles.profiles().await {
            Ok(list) => list,
            Err(e) => return vec![Reply::text(format!("❌ 获取画像列表失败: {}", e))],
        };
        if profiles.is_empty() {
            return vec![Reply::text("当前没有任何用户画像")];
        }
        let mut lines = vec!["👥 用户画像列表".to_string()];
        for p in &profiles {
            let name = if p.nickname.is_empty() { &p.user_id } else { &p.nickname };
            let preview = if p.is_analysed() {
                shorten(&p.profile_text, 30)
            } else {
                "暂无描述".to_string()
            };
            lines.push(format!("• {} ({}): {}", name, p.user_id, preview));
        }
        lines.push(format!("\n共 {} 个画像", profiles.len()));
        vec![Reply::text(lines.join("\n"))]
    }

    async fn force_update(&self, user_id: &str) -> Vec<Reply> {
        let status = match self.profiles.buffer_status(user_id).await {
            Ok(status) => status,
            Err(e) => return vec![Reply::text(format!("❌ 更新失败: {}", e))],
        };
        if status.message_count == 0 {
            return vec![Reply::text(format!("❌ 用户 {} 的消息缓冲区为空，无法更新", user_id))];
        }

        let mut replies = vec![Reply::text(format!(
            "🔄 正在更新用户 {} 的画像...\n📝 待处理消息: {} 条",
            user_id, status.message_count
        ))];
        let updated = match self.profiles.force_update(user_id).await {
            Ok(updated) => updated,
            Err(e) => {
                tracing::error!(user_id, "Forced profile update failed: {:#}", e);
                false
            }
        };
        if updated {
            replies.push(Reply::text(format!(
                "✅ 画像已更新！使用 /画像 查看 {} 查看结果",
                user_id
            )));
        } else {
            replies.push(Reply::text("❌ 更新失败，请查看日志"));
        }
        replies
    }

    async fn delete(&self, user_id: &str) -> Vec<Reply> {
        match self.profiles.delete_profile(user_id).await {
            Ok(true) => vec![Reply::text(format!("✅ 已删除用户 {} 的画像和监控配置", user_id))],
            Ok(false) => vec![Reply::text(format!("❌ 未找到用户 {} 的画像", user_id))],
            Err(e) => {
                tracing::error!(user_id, "Deleting profile failed: {:#}", e);
                vec![Reply::text(format!("❌ 删除画像失败: {}", e))]
            }
        }
    }

    async fn buffer_status(&self, user_id: &str) -> Vec<Reply> {
        match self.profiles.buffer_status(user_id).await {
            Ok(status) => {
                let last = status.last_flush.map_or_else(|| "从未".to_string(), format_timestamp);
                vec![Reply::text(format!(
                    "📦 用户 {} 的缓冲区状态\n📝 待处理消息: {} 条\n⏰ 上次更新: {}",
                    user_id, status.message_count, last
                ))]
            }
            Err(e) => vec![Reply::text(format!("❌ 获取缓冲区状态失败: {}", e))],
        }
    }
}
