//! 执行器：单轮执行接口、默认实现、容量重试装饰器与生命周期管理

pub mod lifecycle;
pub mod retry;
pub mod traits;
pub mod turn;

pub use lifecycle::ExecutorLifecycle;
pub use retry::CapacityRetry;
pub use traits::{Executor, ExecutorFactory, ExecutorOutput, RuntimeOptions};
pub use turn::{compose_system_prompt, TurnExecutor, TurnExecutorFactory};
