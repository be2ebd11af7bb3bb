//! 推理层：Planner（消息拼装与回复解析）与 AgentLoop（有界的思考/工具/观察状态机）

pub mod loop_;
pub mod planner;

pub use loop_::{AgentLoop, LoopOutcome, DEFAULT_MAX_ITERATIONS};
pub use planner::{
    build_messages, build_system_prompt, parse_llm_output, ModelDecision, Planner, ToolCall,
};
