//! Aether - Rust 认知编排循环
//!
//! 模块划分：
//! - **agents**: 子 Agent 注册表与分发（超时、panic 隔离、审计日志）、内置 echo / web_search
//! - **cognition**: 输入扩展、阶段 prompt、规划解析
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 九阶段主控循环、错误与恢复、事件、任务调度、优雅关闭
//! - **io**: 输入源与回复输出端
//! - **llm**: 生成端口与嵌入端口（OpenAI 兼容 / Mock / 哈希嵌入）
//! - **memory**: 向量记忆库、保留策略、JSON 快照
//! - **observability**: tracing 初始化

pub mod agents;
pub mod cognition;
pub mod config;
pub mod core;
pub mod io;
pub mod llm;
pub mod memory;
pub mod observability;

pub use crate::core::{CoreError, LoopBuilder, LoopController, LoopHandle, RunSummary};
