//! 历史重建：外部会话记录 -> 有序、带角色的 Turn 序列
//!
//! 核心不保存会话：每次请求都从 TranscriptSource 拉取原始记录并重建，重建是全函数、无副作用。

pub mod reconstruct;
pub mod transcript;

pub use reconstruct::{reconstruct, strip_mention, BotIdentity, RawMessage, Turn, TurnRole};
pub use transcript::{load_history, StaticTranscript, TranscriptError, TranscriptSource};
