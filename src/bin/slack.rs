//! Threadbee Slack 服务
//!
//! 通过 Slack Events API 在线程中回答 @ 提及。
//!
//! 环境变量:
//! - SLACK_BOT_TOKEN: Bot User OAuth Token（xoxb-...）
//! - SLACK_SIGNING_SECRET: 校验请求签名（未设置时不校验，仅建议在本地调试时这样做）
//! - SLACK_BOT_ID 或 THREADBEE__SLACK__BOT_ID: Bot 的用户 ID
//! - OPENAI_API_KEY: LLM API Key（未设置时使用 Mock）
//!
//! 启动: cargo run --bin threadbee-slack --features slack

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use threadbee::agent::create_agent_components;
use threadbee::config::load_validated;
use threadbee::history::BotIdentity;
use threadbee::integrations::slack::{create_router, SlackState};
use threadbee::{observability, SessionRouter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_validated(config_path).context("Invalid configuration")?;

    let bot_token = std::env::var("SLACK_BOT_TOKEN").context("SLACK_BOT_TOKEN must be set")?;
    anyhow::ensure!(!cfg.slack.bot_id.is_empty(), "SLACK_BOT_ID must be set");

    let components = Arc::new(create_agent_components(&cfg));
    let router = SessionRouter::from_config(components, BotIdentity::new(&cfg.slack.bot_id), &cfg);
    let mut state = SlackState::new(router, bot_token, &cfg.slack.api_base);
    match std::env::var("SLACK_SIGNING_SECRET") {
        Ok(secret) if !secret.is_empty() => state = state.with_signing_secret(secret),
        _ => tracing::warn!("SLACK_SIGNING_SECRET not set, request signatures will not be verified"),
    }
    let state = Arc::new(state);

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.slack.port));
    tracing::info!("Threadbee Slack server listening on http://{}", addr);
    tracing::info!("Event Subscriptions URL: http://YOUR_HOST:{}/slack/events", cfg.slack.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
