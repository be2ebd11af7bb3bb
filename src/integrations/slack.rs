//! Slack 集成
//!
//! 通过 Events API Webhook 接收 app_mention 事件：拉取所在线程的记录（conversations.replies），
//! 交给 SessionRouter 处理，把 Markdown 转为 mrkdwn 后用 chat.postMessage 回复到同一线程。
//!
//! 重要：Slack 要求 Webhook 在 **3 秒内** 返回 200，否则判失败并重试。
//! 本模块在解析事件后立即返回，耗时处理在后台异步执行；重试投递按 event_id 去重。
//! 配置了 Signing Secret 时，先校验 X-Slack-Signature（v0 HMAC-SHA256，时间戳偏差不超过 5 分钟）。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::history::{BotIdentity, RawMessage, TranscriptError, TranscriptSource};
use crate::router::SessionRouter;

/// 单条消息的最大字符数，超出时分段发送
const MAX_MESSAGE_CHARS: usize = 3900;
/// 去重缓存上限，超出后清空
const MAX_PROCESSED_EVENTS: usize = 10_000;
/// 请求时间戳与本机时间的最大偏差（秒），防重放
const SIGNATURE_MAX_AGE_SECS: u64 = 300;

type HmacSha256 = Hmac<Sha256>;

/// Slack 服务状态
pub struct SlackState {
    pub router: SessionRouter,
    pub processed_events: RwLock<HashSet<String>>,
    pub bot_token: String,
    pub api_base: String,
    pub http: reqwest::Client,
    /// 为 None 时不校验签名
    pub signing_secret: Option<String>,
}

impl SlackState {
    pub fn new(router: SessionRouter, bot_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            router,
            processed_events: RwLock::new(HashSet::new()),
            bot_token: bot_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            signing_secret: None,
        }
    }

    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    /// 记录 event_id；已处理过返回 false
    async fn first_delivery(&self, event_id: &str) -> bool {
        if event_id.is_empty() {
            return true;
        }
        let mut processed = self.processed_events.write().await;
        if processed.contains(event_id) {
            return false;
        }
        if processed.len() >= MAX_PROCESSED_EVENTS {
            processed.clear();
        }
        processed.insert(event_id.to_string());
        true
    }
}

/// Events API 请求体（url_verification 与 event_callback 共用）
#[derive(Debug, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub challenge: Option<String>,
    pub event_id: Option<String>,
    pub event: Option<SlackEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub user: Option<String>,
    pub bot_id: Option<String>,
    pub text: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub channel: Option<String>,
}

/// conversations.replies 中的消息
#[derive(Debug, Deserialize)]
struct ReplyMessage {
    user: Option<String>,
    bot_id: Option<String>,
    text: Option<String>,
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepliesResponse {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    messages: Vec<ReplyMessage>,
}

/// 创建 Slack 路由
pub fn create_router(state: Arc<SlackState>) -> Router {
    Router::new()
        .route("/slack/events", post(events_handler))
        .route("/health", axum::routing::get(|| async { "OK" }))
        .with_state(state)
}

/// 校验 Slack 请求签名：`v0=` + hex(HMAC-SHA256(secret, "v0:{timestamp}:{body}"))
pub fn verify_signature(secret: &str, timestamp: &str, body: &[u8], signature: &str, now_secs: u64) -> bool {
    let Ok(ts) = timestamp.parse::<u64>() else {
        return false;
    };
    if now_secs.abs_diff(ts) > SIGNATURE_MAX_AGE_SECS {
        return false;
    }
    let Some(expected) = signature.strip_prefix("v0=").and_then(|h| hex::decode(h).ok()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

/// POST /slack/events
async fn events_handler(
    State(state): State<Arc<SlackState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Some(secret) = &state.signing_secret {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let timestamp = header_str(&headers, "x-slack-request-timestamp");
        let signature = header_str(&headers, "x-slack-signature");
        if !verify_signature(secret, timestamp, &body, signature, now) {
            tracing::warn!("Slack signature verification failed, rejecting request");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    let payload: EventPayload = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "invalid Slack payload");
        StatusCode::BAD_REQUEST
    })?;

    match payload.type_.as_deref() {
        Some("url_verification") => {
            return match payload.challenge {
                Some(challenge) => Ok(Json(serde_json::json!({ "challenge": challenge }))),
                None => Err(StatusCode::BAD_REQUEST),
            };
        }
        Some("event_callback") => {}
        other => {
            tracing::info!(payload_type = ?other, "Slack payload ignored");
            return Ok(Json(serde_json::json!({})));
        }
    }

    let Some(event) = payload.event else {
        tracing::warn!("Slack event_callback without event, ignoring");
        return Ok(Json(serde_json::json!({})));
    };
    if event.type_.as_deref() != Some("app_mention") {
        tracing::debug!(event_type = ?event.type_, "not an app_mention, ignoring");
        return Ok(Json(serde_json::json!({})));
    }
    if event.bot_id.is_some() {
        return Ok(Json(serde_json::json!({})));
    }
    let (Some(channel), Some(ts)) = (event.channel.clone(), event.ts.clone()) else {
        tracing::warn!("app_mention without channel or ts, ignoring");
        return Ok(Json(serde_json::json!({})));
    };

    let event_id = payload.event_id.unwrap_or_default();
    if !state.first_delivery(&event_id).await {
        tracing::debug!(event_id = %event_id, "duplicate Slack event ignored");
        return Ok(Json(serde_json::json!({})));
    }

    let thread_ts = event.thread_ts.clone().unwrap_or_else(|| ts.clone());
    let text = event.text.clone().unwrap_or_default();
    tracing::info!(channel = %channel, thread_ts = %thread_ts, "app_mention accepted, spawning background task");

    let state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = process_and_reply(&state, &channel, &thread_ts, &ts, &text).await {
            tracing::error!(channel = %channel, error = %e, "Slack background process error");
        }
    });

    Ok(Json(serde_json::json!({})))
}

/// 后台执行：拉取线程记录、调用 Agent、回复
async fn process_and_reply(
    state: &SlackState,
    channel: &str,
    thread_ts: &str,
    trigger_ts: &str,
    text: &str,
) -> anyhow::Result<()> {
    let transcript = SlackTranscript {
        http: state.http.clone(),
        api_base: state.api_base.clone(),
        bot_token: state.bot_token.clone(),
        channel: channel.to_string(),
        exclude_ts: Some(trigger_ts.to_string()),
        identity: state.router.identity().clone(),
    };
    let result = state.router.handle_from_source(thread_ts, text, &transcript).await;
    let reply = to_mrkdwn(result.output_text());
    post_message(state, channel, thread_ts, &reply).await
}

/// 通过 conversations.replies 读取一个线程的记录（不含触发本次请求的消息）
pub struct SlackTranscript {
    pub http: reqwest::Client,
    pub api_base: String,
    pub bot_token: String,
    pub channel: String,
    pub exclude_ts: Option<String>,
    pub identity: BotIdentity,
}

#[async_trait]
impl TranscriptSource for SlackTranscript {
    async fn fetch(&self, session_id: &str) -> Result<Vec<RawMessage>, TranscriptError> {
        let url = format!("{}/conversations.replies", self.api_base);
        let resp: RepliesResponse = self
            .http
            .get(&url)
            .bearer_auth(&self.bot_token)
            .query(&[("channel", self.channel.as_str()), ("ts", session_id)])
            .send()
            .await
            .map_err(|e| TranscriptError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| TranscriptError::Request(e.to_string()))?;
        if !resp.ok {
            return Err(TranscriptError::Api(resp.error.unwrap_or_else(|| "unknown error".to_string())));
        }
        Ok(resp
            .messages
            .into_iter()
            .filter(|m| m.ts.is_none() || m.ts != self.exclude_ts)
            .map(|m| to_raw_message(m, &self.identity))
            .collect())
    }
}

fn to_raw_message(m: ReplyMessage, identity: &BotIdentity) -> RawMessage {
    let bot_authored = m.bot_id.is_some() && m.user.as_deref() == Some(identity.user_id());
    RawMessage {
        author: m.user.or(m.bot_id),
        text: m.text,
        bot_authored,
    }
}

/// chat.postMessage，超长时分段
async fn post_message(state: &SlackState, channel: &str, thread_ts: &str, text: &str) -> anyhow::Result<()> {
    let url = format!("{}/chat.postMessage", state.api_base);
    for chunk in split_chunks(text, MAX_MESSAGE_CHARS) {
        let body = serde_json::json!({
            "channel": channel,
            "thread_ts": thread_ts,
            "text": chunk,
        });
        let resp: serde_json::Value = state
            .http
            .post(&url)
            .bearer_auth(&state.bot_token)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if resp["ok"].as_bool() != Some(true) {
            anyhow::bail!("Slack API error: {}", resp["error"].as_str().unwrap_or("unknown"));
        }
    }
    tracing::info!(channel, thread_ts, chars = text.chars().count(), "reply sent");
    Ok(())
}

fn split_chunks(text: &str, max: usize) -> Vec<String> {
    if text.chars().count() <= max {
        return vec![text.to_string()];
    }
    text.chars()
        .collect::<Vec<_>>()
        .chunks(max)
        .map(|c| c.iter().collect())
        .collect()
}

struct MrkdwnRules {
    heading: Regex,
    bullet: Regex,
    link: Regex,
    bold_star: Regex,
    bold_underscore: Regex,
    strike: Regex,
}

static MRKDWN_RULES: OnceLock<MrkdwnRules> = OnceLock::new();

fn mrkdwn_rules() -> &'static MrkdwnRules {
    MRKDWN_RULES.get_or_init(|| MrkdwnRules {
        heading: Regex::new(r"(?m)^#{1,6}\s+(.+?)\s*#*$").unwrap(),
        bullet: Regex::new(r"(?m)^(\s*)[-*+]\s+").unwrap(),
        link: Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").unwrap(),
        bold_star: Regex::new(r"\*\*(.+?)\*\*").unwrap(),
        bold_underscore: Regex::new(r"__(.+?)__").unwrap(),
        strike: Regex::new(r"~~(.+?)~~").unwrap(),
    })
}

/// Markdown -> Slack mrkdwn；代码块（```）内保持原样
pub fn to_mrkdwn(markdown: &str) -> String {
    let rules = mrkdwn_rules();
    markdown
        .split("```")
        .enumerate()
        .map(|(i, part)| {
            if i % 2 == 1 {
                return part.to_string();
            }
            let s = rules.heading.replace_all(part, "*${1}*");
            let s = rules.bullet.replace_all(&s, "${1}• ");
            let s = rules.link.replace_all(&s, "<${2}|${1}>");
            let s = rules.bold_star.replace_all(&s, "*${1}*");
            let s = rules.bold_underscore.replace_all(&s, "*${1}*");
            rules.strike.replace_all(&s, "~${1}~").into_owned()
        })
        .collect::<Vec<_>>()
        .join("```")
}
