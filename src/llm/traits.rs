//! 生成端口抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::generate：给定 prompt 返回文本。
//! 核心层从不自动重试生成失败，错误原样上抛，由循环控制器按阶段策略处理。

use async_trait::async_trait;

/// LLM 客户端 trait：单次非流式生成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 生成文本；失败时返回后端错误描述
    async fn generate(&self, prompt: &str) -> Result<String, String>;

    /// 模型名（用于日志）
    fn model_name(&self) -> &str {
        "unknown"
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
