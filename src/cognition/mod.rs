//! 认知层：输入扩展（意图识别）、阶段 prompt 构建、规划输出解析、经验摘要

pub mod expand;
pub mod plan;
pub mod prompts;

pub use expand::{Expanded, Expander, Intent};
pub use plan::{parse_plan, Plan, PlannedAction};
pub use prompts::{summarize_experience, PromptBuilder, PromptPhase};
