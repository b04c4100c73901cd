//! 会话上下文追踪
//!
//! 每个会话一份 SessionContext：最近操作、有界操作栈（满则丢最旧）、已提及实体、当前工作数据。
//! 未知会话的任何操作都会透明地创建新上下文，没有错误路径。

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::entities::{EntityCategory, EntityExtractor};

/// 操作类别；无法识别的技能归入 Query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Feasibility,
    BusinessPlan,
    Sensitivity,
    Save,
    Query,
}

impl OperationKind {
    /// 按技能 ID 归类
    pub fn classify(skill_id: &str) -> Self {
        let id = skill_id.to_ascii_lowercase();
        if id.contains("feasib") {
            OperationKind::Feasibility
        } else if id.contains("business_plan") || id.contains("businessplan") {
            OperationKind::BusinessPlan
        } else if id.contains("sensitiv") {
            OperationKind::Sensitivity
        } else if id.contains("save") {
            OperationKind::Save
        } else {
            OperationKind::Query
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Feasibility => "feasibility",
            OperationKind::BusinessPlan => "business_plan",
            OperationKind::Sensitivity => "sensitivity",
            OperationKind::Save => "save",
            OperationKind::Query => "query",
        }
    }

    fn is_analysis(&self) -> bool {
        matches!(
            self,
            OperationKind::Feasibility | OperationKind::BusinessPlan | OperationKind::Sensitivity
        )
    }
}

/// 一次已完成的操作
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub skill_id: String,
    pub inputs: Map<String, Value>,
    pub result: Value,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

impl Operation {
    pub fn new(skill_id: impl Into<String>, inputs: Map<String, Value>, result: Value) -> Self {
        let skill_id = skill_id.into();
        let kind = OperationKind::classify(&skill_id);
        let summary = summarize_operation(kind, &skill_id, &inputs);
        Self {
            kind,
            skill_id,
            inputs,
            result,
            timestamp: Utc::now(),
            summary,
        }
    }

    /// 输入中的字符串字段
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).and_then(Value::as_str)
    }
}

fn summarize_operation(kind: OperationKind, skill_id: &str, inputs: &Map<String, Value>) -> String {
    let args = inputs
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{}={}", k, s),
            other => format!("{}={}", k, other),
        })
        .collect::<Vec<_>>()
        .join(", ");
    if args.is_empty() {
        format!("{} via {}", kind.as_str(), skill_id)
    } else {
        format!("{} via {} ({})", kind.as_str(), skill_id, args)
    }
}

/// 当前工作数据：由最相关的已完成操作覆盖
#[derive(Debug, Clone, Default, Serialize)]
pub struct CurrentData {
    pub project_name: Option<String>,
    pub location: Option<String>,
    pub last_analysis: Option<Value>,
    pub last_workflow: Option<Value>,
}

/// 单个会话的上下文
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    stack: VecDeque<Operation>,
    capacity: usize,
    entities: BTreeMap<EntityCategory, BTreeSet<String>>,
    pub current: CurrentData,
    last_active: Instant,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            stack: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            entities: BTreeMap::new(),
            current: CurrentData::default(),
            last_active: Instant::now(),
        }
    }

    /// 最近一次操作（恒为操作栈栈顶）
    pub fn last_operation(&self) -> Option<&Operation> {
        self.stack.back()
    }

    /// 最近操作之前的那一次
    pub fn previous_operation(&self) -> Option<&Operation> {
        self.stack.iter().rev().nth(1)
    }

    /// 操作历史，从旧到新
    pub fn operations(&self) -> impl DoubleEndedIterator<Item = &Operation> {
        self.stack.iter()
    }

    pub fn operation_count(&self) -> usize {
        self.stack.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 某类已提及实体（有序、去重）
    pub fn entities(&self, category: EntityCategory) -> Vec<String> {
        self.entities
            .get(&category)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn add_entity(&mut self, category: EntityCategory, value: impl Into<String>) {
        self.entities.entry(category).or_default().insert(value.into());
    }

    fn push(&mut self, op: Operation) {
        while self.stack.len() >= self.capacity {
            self.stack.pop_front();
        }
        self.stack.push_back(op);
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_active.elapsed() > ttl
    }

    fn apply_current(&mut self, op: &Operation) {
        let project = op
            .input_str("project_name")
            .or_else(|| op.input_str("projectName"))
            .or_else(|| op.result.get("project_name").and_then(Value::as_str))
            .map(str::to_string);
        let location = op
            .input_str("location")
            .or_else(|| op.input_str("city"))
            .map(str::to_string);

        if op.kind.is_analysis() {
            if location.is_some() {
                self.current.location = location;
            }
            self.current.last_analysis = Some(op.result.clone());
        }
        if project.is_some() {
            self.current.project_name = project;
        }
    }

    /// 紧凑摘要：最近操作、当前数据、已提及实体；不含时间相关内容，相同状态输出相同
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        match self.last_operation() {
            Some(op) => lines.push(format!("Last operation: {}", op.summary)),
            None => lines.push("No previous operations in this session.".to_string()),
        }

        let mut current = Vec::new();
        if let Some(p) = &self.current.project_name {
            current.push(format!("project={}", p));
        }
        if let Some(l) = &self.current.location {
            current.push(format!("location={}", l));
        }
        if self.current.last_analysis.is_some() {
            current.push("last analysis available".to_string());
        }
        if let Some(wf) = &self.current.last_workflow {
            let name = wf.get("workflow").and_then(Value::as_str).unwrap_or("workflow");
            current.push(format!("last workflow={}", name));
        }
        if !current.is_empty() {
            lines.push(format!("Current data: {}", current.join(", ")));
        }

        for (category, values) in &self.entities {
            if !values.is_empty() {
                let joined = values.iter().cloned().collect::<Vec<_>>().join(", ");
                lines.push(format!("Mentioned {}: {}", category.label(), joined));
            }
        }
        if self.stack.len() > 1 {
            lines.push(format!("Operations in history: {}", self.stack.len()));
        }
        lines.join("\n")
    }
}

/// 上下文追踪器：所有会话的上下文，会话间并发安全
pub struct ContextTracker {
    sessions: RwLock<HashMap<String, SessionContext>>,
    capacity: usize,
    session_ttl: Duration,
    extractor: EntityExtractor,
}

impl ContextTracker {
    pub fn new(capacity: usize, session_ttl: Duration, extractor: EntityExtractor) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity,
            session_ttl,
            extractor,
        }
    }

    pub fn extractor(&self) -> &EntityExtractor {
        &self.extractor
    }

    /// 获取（不存在则创建）会话上下文的快照
    pub async fn get_or_create(&self, session_id: &str) -> SessionContext {
        let mut sessions = self.sessions.write().await;
        let ctx = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(session_id, self.capacity));
        ctx.touch();
        ctx.clone()
    }

    /// 记录一次已完成操作：入栈、更新当前数据、抽取实体
    pub async fn record_operation(&self, session_id: &str, op: Operation) {
        let found = {
            let mut found = self.extractor.extract_value(&Value::Object(op.inputs.clone()));
            found.extend(self.extractor.extract_value(&op.result));
            found
        };

        let mut sessions = self.sessions.write().await;
        let ctx = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(session_id, self.capacity));
        for (category, value) in found {
            ctx.add_entity(category, value);
        }
        ctx.apply_current(&op);
        tracing::debug!(session = %session_id, op = %op.summary, "operation recorded");
        ctx.push(op);
        ctx.touch();
    }

    /// 记录工作流结果（写入 current.last_workflow，并抽取实体）
    pub async fn record_workflow_result(&self, session_id: &str, workflow: &str, result: Value) {
        let found = self.extractor.extract_value(&result);
        let mut sessions = self.sessions.write().await;
        let ctx = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(session_id, self.capacity));
        for (category, value) in found {
            ctx.add_entity(category, value);
        }
        ctx.current.last_workflow = Some(serde_json::json!({
            "workflow": workflow,
            "result": result,
        }));
        ctx.touch();
    }

    /// 会话摘要；连续两次调用（中间无 record_operation）输出相同
    pub async fn summarize(&self, session_id: &str) -> String {
        {
            let sessions = self.sessions.read().await;
            if let Some(ctx) = sessions.get(session_id) {
                return ctx.summary();
            }
        }
        self.get_or_create(session_id).await.summary()
    }

    /// 最近操作之前的那一次（"go back"）
    pub async fn previous_operation(&self, session_id: &str) -> Option<Operation> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .and_then(|ctx| ctx.previous_operation().cloned())
    }

    pub async fn clear(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    /// 清理空闲超过 TTL 的会话，返回清理数量
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, ctx| !ctx.is_expired(self.session_ttl));
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, "expired session contexts evicted");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
