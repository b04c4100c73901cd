//! 记忆层：只追加的交互记录、存储后端（进程内 / SQLite）、检索与后台写入

pub mod record;
pub mod retrieval;
pub mod sqlite;
pub mod store;
pub mod writer;

pub use record::{Importance, MemoryRecord, NewMemory, RecordKind};
pub use retrieval::{rank_by_recency, snippet, MemoryRetriever, RetrievalScope, ScoredMemory};
pub use sqlite::SqliteMemoryStore;
pub use store::{InMemoryMemoryStore, MemoryError, MemoryQuery, MemoryStore, RetentionPolicy};
pub use writer::MemoryWriter;
