mod local;

use anyhow::Context;
use clap::Parser;
use quickpersona_commands::QuickPersona;
use quickpersona_core::{ConfigSource, InboundMessage, PluginConfig, SharedConfig};
use quickpersona_reasoning::providers::create_client;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use local::LocalHost;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "QP_CONFIG", default_value = "quickpersona.toml")]
    config: PathBuf,

    /// Overrides storage.data_dir from the config
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Sender id of the terminal user
    #[arg(short, long, default_value = "local")]
    user: String,

    /// Display name of the terminal user
    #[arg(short, long, default_value = "User")]
    name: String,

    /// Group id; empty means a private chat
    #[arg(short, long, default_value = "")]
    group: String,

    /// Write JSON logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Print replies as JSON instead of plain text
    #[arg(long)]
    json: bool,
}

/// The terminal user. `:as <id> [name]` switches identity so multi-user
/// flows (guided replies, profile monitoring) can be tried in one session.
struct Speaker {
    user_id: String,
    name: String,
    group_id: String,
}

impl Speaker {
    fn origin(&self) -> String {
        if self.group_id.is_empty() {
            format!("cli:private:{}", self.user_id)
        } else {
            format!("cli:group:{}", self.group_id)
        }
    }

    fn message(&self, text: &str) -> InboundMessage {
        InboundMessage {
            origin: self.origin(),
            sender_id: self.user_id.clone(),
            sender_name: self.name.clone(),
            group_id: self.group_id.clone(),
            text: text.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "quickpersona.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_dir.as_deref());

    info!("Initializing QuickPersona...");
    let mut config = PluginConfig::load_or_default(&args.config);
    if let Some(dir) = &args.data_dir {
        config.storage.data_dir = dir.clone();
    }
    let data_dir = config.storage.data_dir.clone();
    let llm = create_client(&config.llm).context("Failed to create LLM client")?;
    info!(provider = %config.llm.provider, model = %config.llm.model, "LLM client ready");
    let config: Arc<dyn ConfigSource> = Arc::new(SharedConfig::new(config));

    let host = Arc::new(LocalHost::open(&data_dir).await?);
    let plugin = QuickPersona::new(config, llm, host.clone(), host.clone()).await?;

    let mut speaker = Speaker {
        user_id: args.user,
        name: args.name,
        group_id: args.group,
    };

    println!("QuickPersona 已就绪。输入 /快捷人格 帮助 查看命令，输入 quit 退出。");
    let mut editor = DefaultEditor::new()?;

    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(trimmed);

        if trimmed == "quit" || trimmed == "exit" {
            break;
        }

        if let Some(rest) = trimmed.strip_prefix(":as ") {
            let mut parts = rest.split_whitespace();
            if let Some(id) = parts.next() {
                speaker.user_id = id.to_string();
                speaker.name = parts.next().unwrap_or(id).to_string();
            }
            println!("当前身份: {} ({})", speaker.name, speaker.user_id);
            continue;
        }

        if trimmed == ":persona" {
            match host.active_persona(&speaker.origin()).await {
                Some(id) => println!("当前对话人格: {}", id),
                None => println!("当前对话未绑定人格"),
            }
            continue;
        }

        let replies = plugin.handle(&speaker.message(trimmed)).await;
        for reply in replies {
            if args.json {
                println!("{}", serde_json::to_string(&reply)?);
            } else {
                println!("\n{}\n", reply);
            }
        }
    }

    info!("Bye.");
    Ok(())
}
