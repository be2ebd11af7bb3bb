//! 核心层：错误分类、恢复策略、循环状态

pub mod error;
pub mod recovery;
pub mod state;

pub use error::{AgentError, ErrorKind, RecoveryAction, ToolInvocationError};
pub use recovery::RecoveryEngine;
pub use state::{LoopPhase, LoopState, Scratch, ScratchOutcome, ScratchStep};
