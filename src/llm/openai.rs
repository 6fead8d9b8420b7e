//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；每次 generate 发送一条 user 消息，
//! 可选前置 system 消息（人设前言）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::LlmSection;
use crate::llm::{LlmClient, MockLlmClient};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：generate 时取首条 choice 的 content，空 content 视为失败
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    system_prompt: Option<String>,
    usage: TokenUsage,
}

/// 构造 async-openai 客户端；api_key 缺省时读 OPENAI_API_KEY
pub(crate) fn openai_client(base_url: Option<&str>, api_key: Option<&str>) -> Client<OpenAIConfig> {
    let api_key = api_key
        .map(String::from)
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_default();
    let mut config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(url) = base_url {
        config = config.with_api_base(url);
    }
    Client::with_config(config)
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        Self {
            client: openai_client(base_url, api_key),
            model: model.to_string(),
            system_prompt: None,
            usage: TokenUsage::new(),
        }
    }

    /// 设置 system 消息（人设前言）
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = if prompt.trim().is_empty() { None } else { Some(prompt) };
        self
    }

    fn to_openai_messages(&self, prompt: &str) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.clone())
                    .build()
                    .map_err(|e| e.to_string())?,
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()
                .map_err(|e| e.to_string())?,
        ));
        Ok(messages)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(prompt)?)
            .build()
            .map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "generation finished"
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| format!("{} returned an empty completion", self.model))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

/// 根据配置与环境变量选择生成后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &LlmSection, system_prompt: Option<&str>) -> Arc<dyn LlmClient> {
    let provider = cfg.provider.to_lowercase();
    let has_key = std::env::var("OPENAI_API_KEY")
        .map(|k| !k.is_empty())
        .unwrap_or(false);

    if provider == "openai" && has_key {
        tracing::info!(model = %cfg.model, "using OpenAI-compatible generation");
        let client = OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, None);
        let client = match system_prompt {
            Some(p) => client.with_system_prompt(p),
            None => client,
        };
        Arc::new(client)
    } else {
        if provider == "openai" {
            tracing::warn!("OPENAI_API_KEY not set, falling back to mock generation");
        } else {
            tracing::info!(provider = %cfg.provider, "using mock generation");
        }
        Arc::new(MockLlmClient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_accumulates() {
        let usage = TokenUsage::new();
        usage.add(10, 5);
        usage.add(1, 2);
        assert_eq!(usage.get(), (11, 7, 18));
    }

    #[test]
    fn test_mock_provider_selected() {
        let cfg = LlmSection::default();
        let llm = create_llm_from_config(&cfg, Some("persona"));
        assert_eq!(llm.model_name(), "mock");
    }

    #[test]
    fn test_blank_system_prompt_ignored() {
        let client = OpenAiClient::new(Some("http://localhost:1"), "m", Some("k")).with_system_prompt("  ");
        assert!(client.system_prompt.is_none());
        assert_eq!(client.model_name(), "m");
    }
}
