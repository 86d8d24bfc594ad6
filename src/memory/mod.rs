//! 记忆层：短期对话历史（仅内存，不跨进程持久化）

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role};
