//! 记忆层：不可变记录、向量记忆库（余弦检索 + 新近度平分）、保留策略、快照持久化

pub mod record;
pub mod retention;
pub mod snapshot;
pub mod store;

pub use record::{MemoryRecord, ScoredRecord};
pub use retention::RetentionPolicy;
pub use snapshot::MemorySnapshot;
pub use store::{cosine_similarity, MemoryStore};
