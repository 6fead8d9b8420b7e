//! 记忆保留策略：容量上限 + 可选 TTL
//!
//! 写入后执行：先剔除过期记录，再从最旧处截断到 max_records。只删最旧的，
//! 剩余记录的插入顺序不变，检索的新近度排序因此保持一致。

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::memory::MemoryRecord;

/// 默认容量上限
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// 最多保留条数；None 表示不限
    pub max_records: Option<usize>,
    /// 记录存活时间；None 表示永不过期
    pub ttl: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_records: Some(DEFAULT_MAX_RECORDS),
            ttl: None,
        }
    }
}

impl RetentionPolicy {
    /// 不做任何淘汰
    pub fn unbounded() -> Self {
        Self {
            max_records: None,
            ttl: None,
        }
    }

    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = Some(max);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// 记录在 now 时刻是否已过期
    pub fn is_expired(&self, record: &MemoryRecord, now: DateTime<Utc>) -> bool {
        match self.ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()) {
            Some(ttl) => now - record.created_at() > ttl,
            None => false,
        }
    }

    /// 就地淘汰，返回被移除的条数
    pub fn apply(&self, records: &mut Vec<MemoryRecord>, now: DateTime<Utc>) -> usize {
        let before = records.len();
        if self.ttl.is_some() {
            records.retain(|r| !self.is_expired(r, now));
        }
        if let Some(max) = self.max_records {
            if records.len() > max {
                let excess = records.len() - max;
                records.drain(0..excess);
            }
        }
        before - records.len()
    }
}
