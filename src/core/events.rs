//! 循环过程事件：可观测性出口
//!
//! 控制器把阶段切换、降级、放弃、写回失败等推送到可选的事件通道；
//! 被自动恢复吸收的错误也一定会以事件形式出现，并同时写日志。

use serde::Serialize;

use crate::core::CyclePhase;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CycleEvent {
    /// 新一轮开始（已获得输入）
    CycleStarted { cycle: u64, input_preview: String },
    /// 进入阶段
    PhaseEntered { cycle: u64, phase: CyclePhase },
    /// 检索失败，降级为空候选
    RetrievalDegraded { cycle: u64, error: String },
    /// 检索到的候选数
    MemoryRecalled { cycle: u64, count: usize },
    /// 规划输出无法解析，按策略重试
    PlanRetry { cycle: u64, attempt: u32, error: String },
    /// 规划输出无法解析，按策略视为空计划
    PlanDegraded { cycle: u64, error: String },
    /// 单个 Agent 任务结束
    TaskFinished {
        cycle: u64,
        index: usize,
        agent: String,
        ok: bool,
        detail: String,
    },
    /// Compose 失败，使用备用回复
    ComposeFallback { cycle: u64, error: String },
    /// 本轮放弃，不输出回复
    CycleAborted {
        cycle: u64,
        phase: CyclePhase,
        error: String,
    },
    /// 写回记忆失败（不影响回复）
    PersistFailed { cycle: u64, error: String },
    /// 回复已交付
    ResponseDelivered { cycle: u64, preview: String },
    /// 循环停止
    Stopped { reason: String },
}
