//! 向量记忆库
//!
//! 持有按插入顺序排列的 MemoryRecord，所有记录嵌入维度相同（固定为 dimension）。
//! - store(text)：嵌入后追加一条记录，不去重
//! - search(query, top_k)：对全部记录按余弦相似度打分，降序返回前 top_k 条；
//!   分数相同时越新的越靠前
//!
//! 多会话共享：检索持读锁、写入持写锁；调用嵌入提供方时不持有任何锁。
//! 嵌入失败只影响当次调用，记忆库保持可用。

use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use uuid::Uuid;

use crate::core::CoreError;
use crate::llm::EmbeddingProvider;
use crate::memory::{MemoryRecord, RetentionPolicy, ScoredRecord};

pub struct MemoryStore {
    records: RwLock<Vec<MemoryRecord>>,
    embedder: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    retention: RetentionPolicy,
}

impl MemoryStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, dimension: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            embedder,
            dimension,
            retention: RetentionPolicy::default(),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// 调用嵌入提供方；维度不符返回 EmbeddingDimensionMismatch，后端失败返回 ProviderFailure
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        let embedding = self
            .embedder
            .embed(text)
            .await
            .map_err(CoreError::ProviderFailure)?;
        self.validate(&embedding)?;
        Ok(embedding)
    }

    /// 嵌入并写入一条记录，返回记录 id
    pub async fn store(&self, text: &str) -> Result<Uuid, CoreError> {
        let embedding = self.embed(text).await?;
        self.store_embedded(text, embedding)
    }

    /// 写入已嵌入的文本（维度与数值均需合法）
    pub fn store_embedded(&self, text: &str, embedding: Vec<f32>) -> Result<Uuid, CoreError> {
        self.insert_record(MemoryRecord::new(text, embedding))
    }

    /// 写入完整记录（快照恢复使用），保持 id 与 created_at
    pub fn insert_record(&self, record: MemoryRecord) -> Result<Uuid, CoreError> {
        self.validate(record.embedding())?;
        let id = record.id();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.push(record);
        let evicted = self.retention.apply(&mut records, Utc::now());
        let size = records.len();
        drop(records);
        if evicted > 0 {
            tracing::debug!(evicted, size, "Memory retention evicted records");
        }
        tracing::debug!(%id, size, "Stored memory");
        Ok(id)
    }

    /// 检索最相关的 top_k 条记录
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<MemoryRecord>, CoreError> {
        Ok(self
            .search_scored(query, top_k)
            .await?
            .into_iter()
            .map(|s| s.record)
            .collect())
    }

    /// 检索并附带分数：余弦相似度降序，平分时插入顺序靠后者优先
    pub async fn search_scored(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>, CoreError> {
        if top_k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed(query).await?;

        let now = Utc::now();
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut scored: Vec<(f32, usize)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| !self.retention.is_expired(r, now))
            .map(|(idx, r)| (cosine_similarity(&query_embedding, r.embedding()), idx))
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, idx)| ScoredRecord {
                record: records[idx].clone(),
                score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前全部记录的拷贝（插入顺序）
    pub fn records(&self) -> Vec<MemoryRecord> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.records.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn validate(&self, embedding: &[f32]) -> Result<(), CoreError> {
        if embedding.len() != self.dimension {
            return Err(CoreError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(CoreError::Validation(
                "embedding contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }
}

/// 余弦相似度（任一向量为零向量时为 0）
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    /// 按文本查表的嵌入；可切换为失败
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        failing: AtomicBool,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                table: entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                failing: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
            if self.failing.load(Ordering::SeqCst) {
                return Err("backend down".to_string());
            }
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| format!("no embedding for {text}"))
        }
    }

    fn abc_store() -> (Arc<TableEmbedder>, MemoryStore) {
        let embedder = Arc::new(TableEmbedder::new(&[
            ("A", vec![1.0, 0.0, 0.0]),
            ("B", vec![0.0, 1.0, 0.0]),
            ("C", vec![0.0, 0.7, 0.7]),
            ("D", vec![0.0, 0.0, 1.0]),
            ("B'", vec![0.0, 2.0, 0.0]),
            ("short", vec![1.0, 0.0]),
        ]));
        let store = MemoryStore::new(embedder.clone(), 3);
        (embedder, store)
    }

    #[tokio::test]
    async fn test_search_exact_match_first() {
        let (_, store) = abc_store();
        for t in ["A", "B", "C"] {
            store.store(t).await.unwrap();
        }
        let results = store.search("B", 2).await.unwrap();
        let texts: Vec<&str> = results.iter().map(|r| r.text()).collect();
        assert_eq!(texts, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_search_top_k_zero_and_empty_store() {
        let (embedder, store) = abc_store();
        assert!(store.search("A", 3).await.unwrap().is_empty());
        store.store("A").await.unwrap();
        embedder.failing.store(true, Ordering::SeqCst);
        assert!(store.search("anything", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tie_broken_by_recency() {
        let (_, store) = abc_store();
        store.store("B").await.unwrap();
        store.store("A").await.unwrap();
        store.store("B'").await.unwrap();
        let results = store.search_scored("B", 3).await.unwrap();
        // B 与 B' 方向相同，分数相同，后插入的 B' 在前
        assert_eq!(results[0].record.text(), "B'");
        assert_eq!(results[1].record.text(), "B");
        assert!((results[0].score - results[1].score).abs() < 1e-6);
        assert_eq!(results[2].record.text(), "A");
    }

    #[tokio::test]
    async fn test_search_idempotent() {
        let (_, store) = abc_store();
        for t in ["A", "B", "C", "D"] {
            store.store(t).await.unwrap();
        }
        let first = store.search("C", 3).await.unwrap();
        let second = store.search("C", 3).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_insert_keeps_relative_order() {
        let (_, store) = abc_store();
        store.store("B").await.unwrap();
        store.store("C").await.unwrap();
        let before: Vec<String> = store
            .search("B", 2)
            .await
            .unwrap()
            .iter()
            .map(|r| r.text().to_string())
            .collect();
        // 新记录 A 与 B 正交，分数不超过任何已有记录
        store.store("A").await.unwrap();
        let after: Vec<String> = store
            .search("B", 2)
            .await
            .unwrap()
            .iter()
            .map(|r| r.text().to_string())
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let (_, store) = abc_store();
        let err = store.store("short").await.unwrap_err();
        assert_eq!(err, CoreError::EmbeddingDimensionMismatch { expected: 3, actual: 2 });
        let err = store.store_embedded("x", vec![1.0; 4]).unwrap_err();
        assert!(matches!(err, CoreError::EmbeddingDimensionMismatch { actual: 4, .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_rejected() {
        let (_, store) = abc_store();
        let err = store.store_embedded("nan", vec![f32::NAN, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_store_usable() {
        let (embedder, store) = abc_store();
        store.store("A").await.unwrap();
        embedder.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            store.store("B").await.unwrap_err(),
            CoreError::ProviderFailure(_)
        ));
        assert!(matches!(
            store.search("A", 1).await.unwrap_err(),
            CoreError::ProviderFailure(_)
        ));
        embedder.failing.store(false, Ordering::SeqCst);
        store.store("B").await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.search("A", 1).await.unwrap()[0].text(), "A");
    }

    #[tokio::test]
    async fn test_retention_cap_applied_on_store() {
        let (_, store) = abc_store();
        let store = store.with_retention(RetentionPolicy::unbounded().with_max_records(2));
        for t in ["A", "B", "C"] {
            store.store(t).await.unwrap();
        }
        let texts: Vec<String> = store.records().iter().map(|r| r.text().to_string()).collect();
        assert_eq!(texts, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_search_skips_expired_records() {
        let (_, store) = abc_store();
        let store = store.with_retention(
            RetentionPolicy::unbounded().with_ttl(std::time::Duration::from_millis(50)),
        );
        store.store("B").await.unwrap();
        store.store("C").await.unwrap();
        assert_eq!(store.search("B", 2).await.unwrap().len(), 2);

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        // 过期记录尚未被下一次写入淘汰，但已不参与检索
        assert_eq!(store.len(), 2);
        assert!(store.search("B", 2).await.unwrap().is_empty());

        store.store("A").await.unwrap();
        assert_eq!(store.len(), 1);
        let texts: Vec<String> = store
            .search("B", 3)
            .await
            .unwrap()
            .iter()
            .map(|r| r.text().to_string())
            .collect();
        assert_eq!(texts, vec!["A"]);
    }

    #[tokio::test]
    async fn test_no_dedup() {
        let (_, store) = abc_store();
        store.store("A").await.unwrap();
        store.store("A").await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }
}
