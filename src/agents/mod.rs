//! 子 Agent：任务与结果类型、注册表与分发、内置 Agent（echo / web_search）

pub mod builtin;
pub mod registry;
pub mod task;

pub use builtin::{register_builtin_agents, EchoAgent, WebSearchAgent};
pub use registry::{AgentHandler, AgentRegistry, FnAgent};
pub use task::{AgentResult, AgentTask, Arguments};
