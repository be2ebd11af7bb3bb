//! Threadbee 本地命令行
//!
//! 在内存中维护一个会话：每行标准输入作为一次提问，回复打印到标准输出。
//! 用法：`threadbee [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use threadbee::agent::create_agent_components;
use threadbee::config::load_validated;
use threadbee::history::{BotIdentity, RawMessage, StaticTranscript};
use threadbee::{observability, SessionRouter};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const CLI_SESSION: &str = "cli";
const CLI_USER: &str = "local-user";
const CLI_BOT_ID: &str = "UTHREADBEE";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_validated(config_path).context("Invalid configuration")?;

    let bot_id = if cfg.slack.bot_id.is_empty() {
        CLI_BOT_ID.to_string()
    } else {
        cfg.slack.bot_id.clone()
    };
    let identity = BotIdentity::new(bot_id);
    let mention = identity.mention_token();

    let components = Arc::new(create_agent_components(&cfg));
    let router = SessionRouter::from_config(components, identity, &cfg);
    let transcript = StaticTranscript::new();

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout.write_all(b"> ").await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let trimmed = line.trim();
        if matches!(trimmed, "/quit" | "/exit") {
            break;
        }

        let result = router.handle_from_source(CLI_SESSION, trimmed, &transcript).await;
        let reply = result.output_text().to_string();

        // 只有正常完成的问答进入后续上下文
        if result.is_answered() {
            transcript.append(CLI_SESSION, RawMessage::from_user(CLI_USER, format!("{} {}", mention, trimmed)));
            transcript.append(CLI_SESSION, RawMessage::from_bot(router.identity().user_id(), reply.clone()));
        }

        stdout.write_all(format!("{}\n> ", reply).as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
