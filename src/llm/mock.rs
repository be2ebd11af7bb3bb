//! Mock LLM 客户端（用于测试与未配置 API Key 时，无需网络）
//!
//! 按脚本依次返回回复；脚本用完后重复最后设定的固定回复，若没有则回显最后一条 User 消息。
//! 可设置延迟以模拟慢速模型，并统计调用次数。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    repeat: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定回复
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// 依次返回给定结果（可包含错误）
    pub fn with_results(results: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    /// 每次都返回同一回复
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self {
            repeat: Some(reply.into()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已发生的 complete 调用次数（包括被超时放弃的）
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_scripted(&self) -> Option<Result<String, LlmError>> {
        self.script.lock().ok().and_then(|mut s| s.pop_front())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(result) = self.next_scripted() {
            return result;
        }
        if let Some(ref reply) = self.repeat {
            return Ok(reply.clone());
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_echo() {
        let mock = MockLlmClient::with_replies(["one"]);
        let msgs = [Message::system("sys"), Message::user("ping")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "one");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "Echo from Mock: ping");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_repeating() {
        let mock = MockLlmClient::repeating("same");
        for _ in 0..3 {
            assert_eq!(mock.complete(&[]).await.unwrap(), "same");
        }
    }
}
