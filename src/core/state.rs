//! 循环状态：九个阶段与单轮的中间值
//!
//! CycleState 只属于循环控制器，每轮重新创建；轮与轮之间只通过记忆库写回传递信息。

use serde::Serialize;
use uuid::Uuid;

use crate::agents::{AgentResult, AgentTask};
use crate::cognition::{Expanded, Plan};
use crate::memory::MemoryRecord;

/// 循环阶段（严格按声明顺序执行）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Perceive,
    Expand,
    Retrieve,
    Reflect,
    Plan,
    Schedule,
    Act,
    Compose,
    Persist,
}

impl CyclePhase {
    pub const ALL: [CyclePhase; 9] = [
        CyclePhase::Perceive,
        CyclePhase::Expand,
        CyclePhase::Retrieve,
        CyclePhase::Reflect,
        CyclePhase::Plan,
        CyclePhase::Schedule,
        CyclePhase::Act,
        CyclePhase::Compose,
        CyclePhase::Persist,
    ];

    /// 下一阶段；Persist 之后回到 Perceive
    pub fn next(self) -> CyclePhase {
        let idx = CyclePhase::ALL.iter().position(|p| *p == self).unwrap_or(0);
        CyclePhase::ALL[(idx + 1) % CyclePhase::ALL.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Perceive => "perceive",
            CyclePhase::Expand => "expand",
            CyclePhase::Retrieve => "retrieve",
            CyclePhase::Reflect => "reflect",
            CyclePhase::Plan => "plan",
            CyclePhase::Schedule => "schedule",
            CyclePhase::Act => "act",
            CyclePhase::Compose => "compose",
            CyclePhase::Persist => "persist",
        }
    }
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单轮循环的中间值
#[derive(Debug, Clone, Default)]
pub struct CycleState {
    pub cycle: u64,
    pub input: String,
    pub expanded: Option<Expanded>,
    pub candidates: Vec<MemoryRecord>,
    pub monologue: Option<String>,
    pub plan: Option<Plan>,
    pub tasks: Vec<AgentTask>,
    /// 与 tasks 一一对应、顺序相同
    pub results: Vec<AgentResult>,
    pub response: Option<String>,
    /// Persist 成功时写回的记录 id
    pub persisted: Option<Uuid>,
}

impl CycleState {
    pub fn new(cycle: u64, input: impl Into<String>) -> Self {
        Self {
            cycle,
            input: input.into(),
            ..Default::default()
        }
    }
}
