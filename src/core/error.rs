//! 核心错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 (阶段, CoreError) 决定 Degrade / RetryPhase / AbortCycle / Terminate。

use thiserror::Error;

/// 循环运行过程中可能出现的错误（校验、未找到、后端失败、取消）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// 嵌入维度与记忆库固定维度不一致（属于校验错误）
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    /// 嵌入后端失败，或生成结果无法解析
    #[error("Provider failure: {0}")]
    ProviderFailure(String),

    #[error("Generation failure: {0}")]
    GenerationFailure(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 错误分类（对应日志与事件中的 kind 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Provider,
    Cancelled,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) | CoreError::EmbeddingDimensionMismatch { .. } => {
                ErrorKind::Validation
            }
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::ProviderFailure(_) | CoreError::GenerationFailure(_) => ErrorKind::Provider,
            CoreError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Provider => "provider",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// 恢复引擎根据 (阶段, 错误) 给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 吸收错误并以降级结果继续（空候选、丢弃写回、Failure 结果）
    Degrade,
    /// 重新执行当前阶段（仅用于可重试的规划解析失败）
    RetryPhase,
    /// 放弃本轮剩余阶段，回到 Perceive
    AbortCycle,
    /// 终止 run()
    Terminate,
}
