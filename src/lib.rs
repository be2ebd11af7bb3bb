//! Threadbee - 线程感知的工具调用型问答 Agent
//!
//! 模块划分：
//! - **agent**: 按配置装配 Planner / 工具 / 恢复策略
//! - **config**: 应用配置加载（TOML + 环境变量）与校验
//! - **core**: 错误分类、恢复策略、循环状态
//! - **history**: 从平台原始消息重建会话历史
//! - **integrations**: 平台接入（Slack，feature `slack`）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、超时重试、嵌入
//! - **memory**: 消息类型与文档检索
//! - **react**: Planner 与有界推理循环
//! - **router**: 会话路由、截止时间与结果分类
//! - **tools**: 工具注册表、执行器与内置工具（web_search、vector_search）

pub mod agent;
pub mod config;
pub mod core;
pub mod history;
#[cfg(feature = "slack")]
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod router;
pub mod tools;

pub use router::{InvocationResult, SessionRouter};
