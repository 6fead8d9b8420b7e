//! 任务调度：Plan -> AgentTask 列表，以及 Act 阶段的并发许可
//!
//! schedule 是纯函数，保持计划顺序；空计划得到空任务列表。
//! Act 阶段的每个任务先从 Semaphore 取许可再分发，限制同时运行的 Agent 数。

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

use crate::agents::AgentTask;
use crate::cognition::Plan;

/// 将计划逐项转为可分发任务（顺序不变）
pub fn schedule(plan: &Plan) -> Vec<AgentTask> {
    plan.actions
        .iter()
        .map(|action| AgentTask::with_json(action.agent.trim(), action.args.clone()))
        .collect()
}

/// Act 阶段并发限制器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    /// Agent 并发限制（默认 3）
    agent_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_agents: usize) -> Self {
        let max_concurrent = max_concurrent_agents.max(1);
        Self {
            agent_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// 获取 Agent 执行许可
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.agent_semaphore.clone().acquire_owned().await
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
