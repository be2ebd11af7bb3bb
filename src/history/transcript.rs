//! 会话记录来源
//!
//! TranscriptSource 由传输层实现（如 Slack conversations.replies）；拉取失败时 load_history 退化为空历史，
//! 不会中止请求。

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::AgentError;
use crate::history::{reconstruct, BotIdentity, RawMessage, Turn};

#[derive(Error, Debug)]
pub enum TranscriptError {
    #[error("Transcript request failed: {0}")]
    Request(String),

    #[error("Transcript API error: {0}")]
    Api(String),
}

impl From<TranscriptError> for AgentError {
    fn from(e: TranscriptError) -> Self {
        AgentError::HistoryUnavailable(e.to_string())
    }
}

/// 按会话 ID 提供原始消息（按时间顺序）
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch(&self, session_id: &str) -> Result<Vec<RawMessage>, TranscriptError>;
}

/// 拉取并重建历史；任何拉取错误都降级为空历史并记录告警
pub async fn load_history(
    source: &dyn TranscriptSource,
    session_id: &str,
    identity: &BotIdentity,
) -> Vec<Turn> {
    match source.fetch(session_id).await {
        Ok(raw) => {
            let turns = reconstruct(&raw, identity);
            tracing::debug!(session_id, raw = raw.len(), turns = turns.len(), "history reconstructed");
            turns
        }
        Err(e) => {
            let err = AgentError::from(e);
            tracing::warn!(session_id, kind = ?err.kind(), error = %err, "continuing with empty history");
            Vec::new()
        }
    }
}

/// 内存中的会话记录（本地 CLI 与测试使用）
#[derive(Debug, Default)]
pub struct StaticTranscript {
    sessions: RwLock<HashMap<String, Vec<RawMessage>>>,
}

impl StaticTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(self, session_id: impl Into<String>, messages: Vec<RawMessage>) -> Self {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(session_id.into(), messages);
        }
        self
    }

    pub fn append(&self, session_id: &str, message: RawMessage) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.entry(session_id.to_string()).or_default().push(message);
        }
    }
}

#[async_trait]
impl TranscriptSource for StaticTranscript {
    async fn fetch(&self, session_id: &str) -> Result<Vec<RawMessage>, TranscriptError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| TranscriptError::Request(e.to_string()))?;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::TurnRole;

    struct BrokenSource;

    #[async_trait]
    impl TranscriptSource for BrokenSource {
        async fn fetch(&self, _session_id: &str) -> Result<Vec<RawMessage>, TranscriptError> {
            Err(TranscriptError::Api("channel_not_found".into()))
        }
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty() {
        let turns = load_history(&BrokenSource, "t1", &BotIdentity::new("UBOT")).await;
        assert!(turns.is_empty());
    }

    #[test]
    fn test_error_maps_to_history_unavailable() {
        let err = AgentError::from(TranscriptError::Api("channel_not_found".into()));
        assert_eq!(err.kind(), crate::core::ErrorKind::HistoryUnavailable);
        assert!(!err.is_terminal());
        assert_eq!(err.to_string(), "History unavailable: Transcript API error: channel_not_found");
    }

    #[tokio::test]
    async fn test_static_transcript_per_session() {
        let source = StaticTranscript::new()
            .with_session("t1", vec![RawMessage::from_user("U1", "<@UBOT> first")]);
        source.append("t1", RawMessage::from_bot("UBOT", "answer"));
        source.append("t2", RawMessage::from_user("U2", "<@UBOT> other thread"));

        let id = BotIdentity::new("UBOT");
        let t1 = load_history(&source, "t1", &id).await;
        assert_eq!(t1.len(), 2);
        assert_eq!(t1[1].role, TurnRole::Assistant);
        let t2 = load_history(&source, "t2", &id).await;
        assert_eq!(t2.len(), 1);
        assert!(load_history(&source, "missing", &id).await.is_empty());
    }
}
