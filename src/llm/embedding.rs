//! 嵌入端口：供记忆库使用
//!
//! - OpenAiEmbedder：调用 OpenAI 兼容的 /embeddings 端点（请求固定维度）
//! - HashEmbedder：确定性离线实现（词哈希词袋 + L2 归一化），无 API Key 时使用

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::{LlmSection, MemorySection};
use crate::llm::openai::openai_client;

/// 嵌入提供方：将文本编码为向量；失败时返回错误字符串
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: Option<u32>,
}

impl OpenAiEmbedder {
    /// 从环境变量与可选 base_url 创建（与 LLM 共用 OPENAI_API_KEY / base_url）
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        Self {
            client: openai_client(base_url, api_key),
            model: model.to_string(),
            dimensions: None,
        }
    }

    /// 请求固定输出维度（text-embedding-3 系列支持）
    pub fn with_dimensions(mut self, dim: usize) -> Self {
        self.dimensions = u32::try_from(dim).ok();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let mut args = CreateEmbeddingRequestArgs::default();
        args.model(&self.model)
            .input(EmbeddingInput::String(text.trim().to_string()));
        if let Some(dim) = self.dimensions {
            args.dimensions(dim);
        }
        let request = args.build().map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .ok_or_else(|| "embedding response contained no data".to_string())
    }
}

/// 确定性嵌入：每个小写词哈希到一个桶，符号由哈希高位决定，最后 L2 归一化。
/// 相同文本总得到相同向量；空文本得到零向量。
/// 哈希固定为 64 位 FNV-1a，快照中保存的向量在不同构建之间保持可比。
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    fn embed_words(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let h = fnv1a(word.to_lowercase().as_bytes());
            let bucket = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(PRIME))
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        Ok(self.embed_words(text))
    }
}

/// 从应用配置创建嵌入提供方：provider=openai 且有 Key 时走 API，否则使用 HashEmbedder
pub fn create_embedder_from_config(
    llm: &LlmSection,
    memory: &MemorySection,
) -> Arc<dyn EmbeddingProvider> {
    let key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
    if llm.provider.eq_ignore_ascii_case("openai") && key.is_some() {
        tracing::info!(
            model = %llm.embedding_model,
            dim = memory.embedding_dim,
            "Using OpenAI embeddings"
        );
        return Arc::new(
            OpenAiEmbedder::new(llm.base_url.as_deref(), &llm.embedding_model, key.as_deref())
                .with_dimensions(memory.embedding_dim),
        );
    }
    tracing::debug!(dim = memory.embedding_dim, "Using hash embedder");
    Arc::new(HashEmbedder::new(memory.embedding_dim))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let e = HashEmbedder::new(32);
        let a = e.embed("The core loop").await.unwrap();
        let b = e.embed("the CORE loop").await.unwrap();
        assert_eq!(a.len(), 32);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hash_embedder_normalized() {
        let e = HashEmbedder::new(64);
        let v = e.embed("memory store with vector search").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[tokio::test]
    async fn test_hash_embedder_empty_is_zero() {
        let e = HashEmbedder::new(8);
        let v = e.embed("   ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
