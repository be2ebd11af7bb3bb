//! 记忆层：发给模型的消息类型、预构建索引上的文档检索

pub mod conversation;
pub mod rag;

pub use conversation::{Message, Role};
pub use rag::{IndexEntry, RetrievalError, RetrievalResult, Retriever, VectorIndex};
