//! 记忆记录：每轮对话结束后写入一条，写入后不可变

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 重要度标签（检索时不参与排序，仅供下游参考）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    Normal,
    High,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Normal => "normal",
            Importance::High => "high",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Importance::Low,
            "high" => Importance::High,
            _ => Importance::Normal,
        }
    }
}

/// 记录种类：一轮对话或一次技能执行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Turn,
    SkillExecution,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Turn => "turn",
            RecordKind::SkillExecution => "skill_execution",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "skill_execution" => RecordKind::SkillExecution,
            _ => RecordKind::Turn,
        }
    }
}

/// 已持久化的记忆记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub importance: Importance,
    pub kind: RecordKind,
    pub embedding: Option<Vec<f32>>,
}

/// 待写入的记录（id 与时间戳由存储分配）
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub user_id: String,
    pub session_id: String,
    pub content: String,
    pub importance: Importance,
    pub kind: RecordKind,
    pub embedding: Option<Vec<f32>>,
}

impl NewMemory {
    pub fn turn(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            content: content.into(),
            importance: Importance::Normal,
            kind: RecordKind::Turn,
            embedding: None,
        }
    }

    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn into_record(self, created_at: DateTime<Utc>) -> MemoryRecord {
        MemoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: self.user_id,
            session_id: self.session_id,
            content: self.content,
            created_at,
            importance: self.importance,
            kind: self.kind,
            embedding: self.embedding,
        }
    }
}
