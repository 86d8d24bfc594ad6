//! 核心：错误分类与恢复、迭代状态、关闭信号

pub mod classifier;
pub mod error;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use classifier::{ErrorClassifier, FailureClassification, MarkerClassifier, CAPACITY_MARKERS};
pub use error::AgentError;
pub use recovery::{RecoveryLadder, RecoveryReport};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{IterationEntry, IterationState, RecentErrors, RECENT_ERRORS_CAPACITY};
