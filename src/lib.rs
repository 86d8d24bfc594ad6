//! Autopilot - 自主执行控制器
//!
//! 模块划分：
//! - **autonomous**: 自主主循环、对话模式、自适应节奏、展示输出、可取消的等待
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、恢复阶梯、迭代状态、错误类型、关闭信号
//! - **executor**: 执行器接口、默认执行器、容量重试装饰器、生命周期管理
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、档位注册表、Monitor
//! - **memory**: 对话消息与有界对话记忆
//! - **observability**: 日志初始化

pub mod autonomous;
pub mod config;
pub mod core;
pub mod executor;
pub mod llm;
pub mod memory;
pub mod observability;

pub use autonomous::{AutonomousController, LoopEvent, LoopExit};
pub use config::{AgentMode, AppConfig};
pub use core::AgentError;
