//! Turns chat text into commands.
//!
//! Three entry points are recognised: the persona group (`快捷人格`, `qp`,
//! `quickpersona`), the smart entry (`人格`, `persona`) and the profile group
//! (`画像`, `profile`). The leading `/` is optional in private chats and
//! required in groups. Unknown persona subcommands fall through to the smart
//! entry, so `/qp 生成一个猫娘` behaves like `/人格 生成一个猫娘`.

use quickpersona_core::InboundMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Smart(String),
    Generate(String),
    Apply,
    Cancel,
    Status,
    List,
    View(Option<String>),
    History(Option<String>),
    Rollback(Option<String>),
    Refine(String),
    Shrink(Option<String>),
    Use(Option<String>),
    Activate(Option<String>),
    NewChat(Option<String>),
    Delete(Option<String>),
    Convert(Option<String>),
    Profile(ProfileCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileCommand {
    Help,
    AddMonitor {
        user_id: Option<String>,
        mode: Option<String>,
    },
    RemoveMonitor(Option<String>),
    Monitors,
    View(Option<String>),
    List,
    ForceUpdate(Option<String>),
    Delete(Option<String>),
    BufferStatus(Option<String>),
}

const PERSONA_GROUP: [&str; 3] = ["快捷人格", "qp", "quickpersona"];
const SMART_ENTRY: [&str; 2] = ["人格", "persona"];
const PROFILE_GROUP: [&str; 2] = ["画像", "profile"];

/// First whitespace-delimited token and the trimmed remainder.
fn split_token(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], text[i..].trim()),
        None => (text, ""),
    }
}

fn is_one_of(token: &str, names: &[&str]) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(token))
}

fn arg(rest: &str) -> Option<String> {
    let (first, _) = split_token(rest);
    (!first.is_empty()).then(|| first.to_string())
}

/// Parse an inbound message. In a group only text starting with `/` is a
/// command, so chatter like "profile 图好看吗" stays chatter.
pub fn parse_message(msg: &InboundMessage) -> Option<Command> {
    if msg.group().is_some() && !msg.text.trim_start().starts_with('/') {
        return None;
    }
    parse(&msg.text)
}

/// `None` when the text is not addressed to this plugin. The leading `/` is
/// optional.
pub fn parse(text: &str) -> Option<Command> {
    let text = text.trim();
    let text = text.strip_prefix('/').unwrap_or(text);
    let (head, rest) = split_token(text);

    if is_one_of(head, &PERSONA_GROUP) {
        Some(parse_persona(rest))
    } else if is_one_of(head, &SMART_ENTRY) {
        Some(if rest.is_empty() {
            Command::Help
        } else {
            Command::Smart(rest.to_string())
        })
    } else if is_one_of(head, &PROFILE_GROUP) {
        Some(Command::Profile(parse_profile(rest)))
    } else {
        None
    }
}

fn parse_persona(text: &str) -> Command {
    if text.is_empty() {
        return Command::Help;
    }
    let (sub, rest) = split_token(text);
    match sub.to_lowercase().as_str() {
        "使用帮助" | "帮助" | "help" | "?" => Command::Help,
        "智能" | "smart" => {
            if rest.is_empty() {
                Command::Help
            } else {
                Command::Smart(rest.to_string())
            }
        }
        "生成人格" | "gen" => Command::Generate(rest.to_string()),
        "确认应用" | "确认生成" | "确认" | "apply" | "yes" => Command::Apply,
        "取消操作" | "取消" | "cancel" | "no" => Command::Cancel,
        "查看状态" | "status" => Command::Status,
        "人格列表" | "list" | "ls" => Command::List,
        "查看详情" | "view" => Command::View(arg(rest)),
        "历史版本" | "history" => Command::History(arg(rest)),
        "版本回滚" | "rollback" => Command::Rollback(arg(rest)),
        "优化人格" | "refine" => Command::Refine(rest.to_string()),
        "压缩人格" | "shrink" => Command::Shrink(arg(rest)),
        "选择人格" | "use" => Command::Use(arg(rest)),
        "激活人格" | "应用人格" | "activate" => Command::Activate(arg(rest)),
        "新建对话" | "newchat" => Command::NewChat(arg(rest)),
        "删除人格" | "delete" => Command::Delete(arg(rest)),
        "转换格式" | "convert" => Command::Convert(arg(rest)),
        _ => Command::Smart(text.to_string()),
    }
}

fn parse_profile(text: &str) -> ProfileCommand {
    let (sub, rest) = split_token(text);
    match sub.to_lowercase().as_str() {
        "" | "帮助" | "help" => ProfileCommand::Help,
        "添加监控" | "add" => {
            let (user, tail) = split_token(rest);
            ProfileCommand::AddMonitor {
                user_id: (!user.is_empty()).then(|| user.to_string()),
                mode: arg(tail),
            }
        }
        "移除监控" | "remove" => ProfileCommand::RemoveMonitor(arg(rest)),
        "监控列表" | "monitors" => ProfileCommand::Monitors,
        "查看" | "view" => ProfileCommand::View(arg(rest)),
        "列表" | "list" => ProfileCommand::List,
        "强制更新" | "update" => ProfileCommand::ForceUpdate(arg(rest)),
        "删除" | "delete" => ProfileCommand::Delete(arg(rest)),
        "缓冲状态" | "buffer" => ProfileCommand::BufferStatus(arg(rest)),
        _ => ProfileCommand::Help,
    }
}
