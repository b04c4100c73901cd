//! SQLite 记忆存储（rusqlite，bundled）
//!
//! 单表 memories，只追加；嵌入向量以 JSON 文本存储。所有数据库操作在 spawn_blocking 中执行。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

use super::record::{Importance, MemoryRecord, NewMemory, RecordKind};
use super::store::{MemoryError, MemoryQuery, MemoryStore, RetentionPolicy};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    importance TEXT NOT NULL,
    kind TEXT NOT NULL,
    embedding TEXT
);
CREATE INDEX IF NOT EXISTS idx_memories_user_time ON memories(user_id, created_at);";

/// 固定宽度的时间戳文本，保证按字符串比较即按时间比较
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// SQLite 存储
pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
    policy: RetentionPolicy,
}

impl SqliteMemoryStore {
    /// 打开（不存在则创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>, policy: RetentionPolicy) -> Result<Self, MemoryError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| MemoryError::Backend(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, policy)
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory(policy: RetentionPolicy) -> Result<Self, MemoryError> {
        Self::from_connection(Connection::open_in_memory()?, policy)
    }

    fn from_connection(conn: Connection, policy: RetentionPolicy) -> Result<Self, MemoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            policy,
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, MemoryError>
    where
        F: FnOnce(&mut Connection) -> Result<T, MemoryError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| MemoryError::Backend("connection mutex poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| MemoryError::Task(e.to_string()))?
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let created_at: String = row.get(4)?;
    let importance: String = row.get(5)?;
    let kind: String = row.get(6)?;
    let embedding: Option<String> = row.get(7)?;
    Ok(MemoryRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        content: row.get(3)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        importance: Importance::parse(&importance),
        kind: RecordKind::parse(&kind),
        embedding: embedding.and_then(|e| serde_json::from_str(&e).ok()),
    })
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn save(&self, memory: NewMemory) -> Result<String, MemoryError> {
        let record = memory.into_record(Utc::now());
        let max_records = self.policy.max_records as i64;
        self.with_conn(move |conn| {
            let embedding = record
                .embedding
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO memories (id, user_id, session_id, content, created_at, importance, kind, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.user_id,
                    record.session_id,
                    record.content,
                    timestamp(record.created_at),
                    record.importance.as_str(),
                    record.kind.as_str(),
                    embedding,
                ],
            )?;
            // 按用户数量上限裁剪
            tx.execute(
                "DELETE FROM memories WHERE user_id = ?1 AND id NOT IN (
                    SELECT id FROM memories WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2
                 )",
                params![record.user_id, max_records],
            )?;
            tx.commit()?;
            Ok(record.id)
        })
        .await
    }

    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        let cutoff = timestamp(query.cutoff());
        let query = query.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, session_id, content, created_at, importance, kind, embedding
                 FROM memories
                 WHERE user_id = ?1 AND (?2 IS NULL OR session_id = ?2) AND created_at <= ?3
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?4",
            )?;
            let rows = stmt.query_map(
                params![query.user_id, query.session_id, cutoff, query.limit as i64],
                row_to_record,
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    async fn prune(&self) -> Result<usize, MemoryError> {
        let retention = chrono::Duration::from_std(self.policy.retention).unwrap_or_default();
        let oldest_allowed = timestamp(Utc::now() - retention);
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM memories WHERE created_at < ?1",
                params![oldest_allowed],
            )?;
            Ok(removed)
        })
        .await
    }
}
