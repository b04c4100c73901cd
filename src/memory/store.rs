//! 记忆存储：只追加的交互日志
//!
//! - MemoryStore：save / query / prune 三个操作，记录写入后不再修改
//! - InMemoryMemoryStore：进程内实现（测试与无持久化运行）

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::record::{MemoryRecord, NewMemory};

/// 存储错误
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for MemoryError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryError::Backend(e.to_string())
    }
}

/// 查询条件：按用户（可选会话）取最近 limit 条，排除 exclude_within 内刚写入的记录
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub user_id: String,
    pub session_id: Option<String>,
    pub limit: usize,
    pub exclude_within: Duration,
}

impl MemoryQuery {
    pub fn new(user_id: impl Into<String>, limit: usize) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: None,
            limit,
            exclude_within: Duration::ZERO,
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn excluding_last(mut self, window: Duration) -> Self {
        self.exclude_within = window;
        self
    }

    fn matches(&self, record: &MemoryRecord, cutoff: chrono::DateTime<Utc>) -> bool {
        record.user_id == self.user_id
            && self
                .session_id
                .as_deref()
                .map_or(true, |s| record.session_id == s)
            && record.created_at <= cutoff
    }

    pub(crate) fn cutoff(&self) -> chrono::DateTime<Utc> {
        let window = chrono::Duration::from_std(self.exclude_within).unwrap_or_default();
        Utc::now() - window
    }
}

/// 保留策略：超过 retention 的记录与超出 max_records（按用户）的最旧记录在 prune 时删除
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub retention: Duration,
    pub max_records: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30 * 24 * 3600),
            max_records: 1000,
        }
    }
}

/// 记忆存储 trait
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// 追加一条记录，返回分配的 id
    async fn save(&self, memory: NewMemory) -> Result<String, MemoryError>;

    /// 按时间倒序返回匹配记录（最新在前）
    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError>;

    /// 按保留策略清理，返回删除条数
    async fn prune(&self) -> Result<usize, MemoryError>;
}

/// 进程内存储
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    records: RwLock<Vec<MemoryRecord>>,
    policy: RetentionPolicy,
}

impl InMemoryMemoryStore {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            policy,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn save(&self, memory: NewMemory) -> Result<String, MemoryError> {
        let record = memory.into_record(Utc::now());
        let id = record.id.clone();
        let user = record.user_id.clone();
        let mut records = self.records.write().await;
        records.push(record);

        // 按用户数量上限：丢弃该用户最旧的记录
        let owned = records.iter().filter(|r| r.user_id == user).count();
        if owned > self.policy.max_records {
            let mut excess = owned - self.policy.max_records;
            records.retain(|r| {
                if excess > 0 && r.user_id == user {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
        Ok(id)
    }

    async fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
        let cutoff = query.cutoff();
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| query.matches(r, cutoff))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn prune(&self) -> Result<usize, MemoryError> {
        let retention = chrono::Duration::from_std(self.policy.retention).unwrap_or_default();
        let oldest_allowed = Utc::now() - retention;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.created_at >= oldest_allowed);
        Ok(before - records.len())
    }
}
