//! 核心层：错误与恢复、循环状态与事件、任务调度、优雅关闭、主控循环

pub mod controller;
pub mod error;
pub mod events;
pub mod recovery;
pub mod shutdown;
pub mod state;
pub mod task_scheduler;

pub use controller::{
    CycleOutcome, CycleStatus, LoopBuilder, LoopController, LoopHandle, RunSummary,
};
pub use error::{CoreError, ErrorKind, RecoveryAction};
pub use events::CycleEvent;
pub use recovery::RecoveryEngine;
pub use shutdown::{
    CleanupReport, MemorySnapshotCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason,
};
pub use state::{CyclePhase, CycleState};
pub use task_scheduler::{schedule, TaskScheduler};
