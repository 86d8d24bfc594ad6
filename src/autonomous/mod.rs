//! 自主执行：主循环、对话模式、节奏控制、展示与挂起点

pub mod chat;
pub mod controller;
pub mod display;
pub mod pacing;
pub mod timing;

pub use chat::{run_chat, ChatSummary};
pub use controller::{AutonomousController, IterationOutcome, LoopEvent, LoopExit};
pub use display::{boxed, render_notice, ConsoleSink, DisplaySink, MemorySink, Notice};
pub use pacing::{estimate_tokens, process_response, truncate_to_tokens, PacingSettings, ProcessedResponse};
pub use timing::{RecordingSleeper, Sleeper, TokioSleeper, Waiter};
