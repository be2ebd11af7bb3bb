//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::complete；RetryingLlmClient 在外层加单次超时与有限重试，
//! 重试耗尽后只返回分类后的 LlmError，不暴露底层传输错误。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 模型调用错误（已分类）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Model request timed out")]
    Timeout,

    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("Invalid model request: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// 超时、不可用、限流可重试；请求本身无效时重试无意义
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::InvalidRequest(_))
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成：messages 首条为 system
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 单次调用超时与重试策略
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 首次失败后的重试次数
    pub max_retries: u32,
    /// 单次调用超时
    pub timeout: Duration,
    /// 第 n 次重试前等待 backoff * n
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
            backoff: Duration::from_millis(500),
        }
    }
}

/// 带超时与重试的 LlmClient 包装
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(self.config.timeout, self.inner.complete(messages)).await {
                Ok(r) => r,
                Err(_) => Err(LlmError::Timeout),
            };
            match result {
                Ok(content) => return Ok(content),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let wait = match &e {
                        LlmError::RateLimited { retry_after_ms } => {
                            Duration::from_millis(*retry_after_ms).max(self.config.backoff.saturating_mul(attempt))
                        }
                        _ => self.config.backoff.saturating_mul(attempt),
                    };
                    tracing::warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "model call failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    tracing::error!(attempts = attempt + 1, error = %e, "model call failed");
                    return Err(e);
                }
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            timeout: Duration::from_millis(200),
            backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mock = Arc::new(MockLlmClient::with_results(vec![
            Err(LlmError::Unavailable("502".into())),
            Err(LlmError::Timeout),
            Ok("fine".into()),
        ]));
        let client = RetryingLlmClient::new(mock.clone(), fast(3));
        let out = client.complete(&[Message::user("hi")]).await.unwrap();
        assert_eq!(out, "fine");
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mock = Arc::new(MockLlmClient::with_results(vec![
            Err(LlmError::Unavailable("a".into())),
            Err(LlmError::Unavailable("b".into())),
            Err(LlmError::Unavailable("c".into())),
        ]));
        let client = RetryingLlmClient::new(mock.clone(), fast(1));
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert_eq!(err, LlmError::Unavailable("b".into()));
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_request_not_retried() {
        let mock = Arc::new(MockLlmClient::with_results(vec![Err(LlmError::InvalidRequest(
            "bad model".into(),
        ))]));
        let client = RetryingLlmClient::new(mock.clone(), fast(3));
        assert!(client.complete(&[Message::user("hi")]).await.is_err());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let mock = Arc::new(MockLlmClient::repeating("late").with_delay(Duration::from_millis(500)));
        let client = RetryingLlmClient::new(
            mock.clone(),
            RetryConfig {
                max_retries: 1,
                timeout: Duration::from_millis(30),
                backoff: Duration::ZERO,
            },
        );
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert_eq!(err, LlmError::Timeout);
        assert_eq!(mock.calls(), 2);
    }
}
